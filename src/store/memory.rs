//! In-memory schedule store.
//!
//! Implements [`ScheduleStore`] over maps guarded by one lock. Useful for
//! tests, the command-line tool and local development. Records are
//! returned in id order so results are deterministic.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::models::{
    BulkReschedulingOperation, DateRange, Session, SubscriptionFreeze, TherapistAvailability,
    TherapyRoom,
};
use crate::ports::{PortError, PortResult, ScheduleStore};

/// In-memory store. Clones share the same data.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    data: Arc<RwLock<StoreData>>,
}

#[derive(Default)]
struct StoreData {
    sessions: BTreeMap<String, Session>,
    availabilities: Vec<TherapistAvailability>,
    rooms: BTreeMap<String, TherapyRoom>,
    operations: BTreeMap<String, BulkReschedulingOperation>,
    freezes: BTreeMap<String, SubscriptionFreeze>,
    /// Simulates an unreachable backend.
    offline: bool,
    /// Session ids whose writes are refused.
    rejected_writes: HashSet<String>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the store.
    pub fn with_snapshot(
        sessions: Vec<Session>,
        availabilities: Vec<TherapistAvailability>,
        rooms: Vec<TherapyRoom>,
    ) -> Self {
        let store = Self::new();
        {
            let mut data = store.data.write();
            for session in sessions {
                data.sessions.insert(session.id.clone(), session);
            }
            data.availabilities = availabilities;
            for room in rooms {
                data.rooms.insert(room.id.clone(), room);
            }
        }
        store
    }

    /// Inserts or replaces a session without going through the port.
    pub fn put_session(&self, session: Session) {
        self.data.write().sessions.insert(session.id.clone(), session);
    }

    pub fn add_availability(&self, availability: TherapistAvailability) {
        self.data.write().availabilities.push(availability);
    }

    /// Current copy of a session, if present.
    pub fn get_session(&self, session_id: &str) -> Option<Session> {
        self.data.read().sessions.get(session_id).cloned()
    }

    /// All sessions in id order.
    pub fn all_sessions(&self) -> Vec<Session> {
        self.data.read().sessions.values().cloned().collect()
    }

    /// Makes every call fail with `Unavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.data.write().offline = offline;
    }

    /// Refuses writes to one session.
    pub fn reject_writes_for(&self, session_id: impl Into<String>) {
        self.data.write().rejected_writes.insert(session_id.into());
    }

    fn ensure_online(&self) -> PortResult<()> {
        if self.data.read().offline {
            Err(PortError::Unavailable("schedule store offline".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ScheduleStore for InMemoryStore {
    async fn session(&self, session_id: &str) -> PortResult<Session> {
        self.ensure_online()?;
        self.data
            .read()
            .sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("session {session_id}")))
    }

    async fn sessions_in_range(&self, range: DateRange) -> PortResult<Vec<Session>> {
        self.ensure_online()?;
        Ok(self
            .data
            .read()
            .sessions
            .values()
            .filter(|s| range.contains(s.date()))
            .cloned()
            .collect())
    }

    async fn sessions_for_student(
        &self,
        student_id: &str,
        range: DateRange,
    ) -> PortResult<Vec<Session>> {
        self.ensure_online()?;
        Ok(self
            .data
            .read()
            .sessions
            .values()
            .filter(|s| s.student_id == student_id && range.contains(s.date()))
            .cloned()
            .collect())
    }

    async fn upsert_session(&self, session: Session) -> PortResult<()> {
        self.ensure_online()?;
        let mut data = self.data.write();
        if data.rejected_writes.contains(&session.id) {
            return Err(PortError::Rejected(format!("write to session {} refused", session.id)));
        }
        data.sessions.insert(session.id.clone(), session);
        Ok(())
    }

    async fn availabilities(&self, range: DateRange) -> PortResult<Vec<TherapistAvailability>> {
        self.ensure_online()?;
        Ok(self
            .data
            .read()
            .availabilities
            .iter()
            .filter(|a| range.contains(a.date))
            .cloned()
            .collect())
    }

    async fn rooms(&self) -> PortResult<Vec<TherapyRoom>> {
        self.ensure_online()?;
        Ok(self.data.read().rooms.values().cloned().collect())
    }

    async fn operation(&self, operation_id: &str) -> PortResult<BulkReschedulingOperation> {
        self.ensure_online()?;
        self.data
            .read()
            .operations
            .get(operation_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("bulk operation {operation_id}")))
    }

    async fn save_operation(&self, operation: BulkReschedulingOperation) -> PortResult<()> {
        self.ensure_online()?;
        self.data
            .write()
            .operations
            .insert(operation.id.clone(), operation);
        Ok(())
    }

    async fn freeze(&self, freeze_id: &str) -> PortResult<SubscriptionFreeze> {
        self.ensure_online()?;
        self.data
            .read()
            .freezes
            .get(freeze_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("freeze {freeze_id}")))
    }

    async fn freezes_for_subscription(
        &self,
        subscription_id: &str,
    ) -> PortResult<Vec<SubscriptionFreeze>> {
        self.ensure_online()?;
        Ok(self
            .data
            .read()
            .freezes
            .values()
            .filter(|f| f.subscription_id == subscription_id)
            .cloned()
            .collect())
    }

    async fn save_freeze(&self, freeze: SubscriptionFreeze) -> PortResult<()> {
        self.ensure_online()?;
        self.data.write().freezes.insert(freeze.id.clone(), freeze);
        Ok(())
    }
}
