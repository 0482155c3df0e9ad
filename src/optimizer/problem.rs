//! Scheduling problem encoding shared by all search strategies.
//!
//! # Encoding
//!
//! Each schedulable session `i` has a domain: the list of placements
//! (therapist × room × date × start) that are valid on their own, that is
//! inside a bookable window, in a room that can host the session, and free of
//! blocking conflicts with every fixed session. A solution picks one domain
//! index per session (`None` = unassigned).
//!
//! What remains to be checked during search is only the interaction between
//! optimized sessions: therapist, student, room and equipment overlaps and
//! the daily caps.
//!
//! # Cost
//! `cost = conflicts + (1 − score)`: lower is better, and any conflict
//! outweighs the whole objective range.

use std::collections::{BTreeSet, HashMap};

use chrono::NaiveDate;

use super::objective::{self, ObjectiveBreakdown, PlacedItem};
use super::{OptimizationRequest, UnresolvedSession};
use crate::conflict::{ConflictDetector, DetectorConfig};
use crate::models::{
    Placement, ProposedSchedule, Session, SessionAssignment, TherapistAvailability, TherapyRoom,
    TimeWindow,
};

/// A partial or full assignment: domain index per session.
pub(crate) type Genes = [Option<usize>];

/// Domains and conflict bookkeeping for one optimization run.
pub(crate) struct SchedulingProblem<'r> {
    request: &'r OptimizationRequest,
    /// Sessions with at least one candidate placement.
    pub sessions: Vec<&'r Session>,
    /// Candidate placements per session.
    pub domains: Vec<Vec<Placement>>,
    /// Fixed sessions already in the room, per domain entry.
    fixed_room_load: Vec<Vec<u32>>,
    /// Sessions that have no candidate at all.
    pub unplaceable: Vec<UnresolvedSession>,
    /// Preference score per domain entry.
    preference: Vec<Vec<f64>>,
    room_capacity: HashMap<String, u32>,
    day_caps: HashMap<(String, NaiveDate), u32>,
    fixed_day_load: HashMap<(String, NaiveDate), u32>,
    therapists: Vec<String>,
    total: usize,
    step: i32,
    detector: ConflictDetector,
}

impl<'r> SchedulingProblem<'r> {
    /// Builds domains for every active session of the request.
    pub fn build(request: &'r OptimizationRequest, detector_config: &DetectorConfig) -> Self {
        let constraints = &request.constraints;
        let detector = ConflictDetector::new(detector_config.clone()).with_preferences(constraints);
        let step = detector_config.slot_step_min.max(1);
        let fixed: Vec<&Session> = request.fixed_sessions.iter().filter(|s| s.is_active()).collect();

        let room_capacity = request
            .rooms
            .iter()
            .map(|r| (r.id.clone(), r.capacity))
            .collect();

        let mut day_caps: HashMap<(String, NaiveDate), u32> = HashMap::new();
        for a in &request.availabilities {
            let cap = a.max_sessions_per_day.min(constraints.therapist.max_sessions_per_day);
            day_caps
                .entry((a.therapist_id.clone(), a.date))
                .and_modify(|c| *c = (*c).min(cap))
                .or_insert(cap);
        }
        let mut fixed_day_load: HashMap<(String, NaiveDate), u32> = HashMap::new();
        for s in &fixed {
            *fixed_day_load
                .entry((s.therapist_id().to_string(), s.date()))
                .or_insert(0) += 1;
        }

        let mut problem = Self {
            request,
            sessions: Vec::new(),
            domains: Vec::new(),
            fixed_room_load: Vec::new(),
            unplaceable: Vec::new(),
            preference: Vec::new(),
            room_capacity,
            day_caps,
            fixed_day_load,
            therapists: Vec::new(),
            total: 0,
            step,
            detector,
        };

        let mut therapists = BTreeSet::new();
        for session in request.sessions.iter().filter(|s| s.is_active()) {
            problem.total += 1;
            let candidates = request.therapists_for(session);
            therapists.extend(candidates.iter().cloned());

            let mut domain: Vec<Placement> = candidate_placements(
                session,
                &candidates,
                &request.dates_for(session),
                &request.availabilities,
                &request.rooms,
                step,
                constraints.facility.enforce_equipment,
            )
            .into_iter()
            .filter(|p| {
                problem
                    .detector
                    .check_placement(session, p, &request.fixed_sessions, &request.availabilities, &request.rooms)
                    .is_empty()
            })
            .collect();

            if domain.is_empty() {
                let unresolved = problem.explain(session, &request.fixed_sessions, 0);
                problem.unplaceable.push(unresolved);
                continue;
            }
            domain.sort_by_key(|p| {
                (
                    *p != session.placement,
                    p.date,
                    p.start_min,
                    p.therapist_id != session.therapist_id(),
                    p.room_id != session.room_id(),
                    p.therapist_id.clone(),
                    p.room_id.clone(),
                )
            });

            let loads = domain
                .iter()
                .map(|p| {
                    fixed
                        .iter()
                        .filter(|s| s.room_id() == p.room_id && s.placement.overlaps(p))
                        .count() as u32
                })
                .collect();
            let prefs = domain
                .iter()
                .map(|p| constraints.preference_score(&session.student_id, &p.window()))
                .collect();

            problem.sessions.push(session);
            problem.domains.push(domain);
            problem.fixed_room_load.push(loads);
            problem.preference.push(prefs);
        }
        problem.therapists = therapists.into_iter().collect();
        problem
    }

    /// Number of schedulable sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Start-time granularity of the domains (minutes).
    pub fn slot_step(&self) -> i32 {
        self.step
    }

    pub fn placement(&self, i: usize, k: usize) -> &Placement {
        &self.domains[i][k]
    }

    pub fn preference(&self, i: usize, k: usize) -> f64 {
        self.preference[i][k]
    }

    fn room_cap(&self, room_id: &str) -> u32 {
        self.room_capacity.get(room_id).copied().unwrap_or(1)
    }

    fn day_cap(&self, therapist_id: &str, date: NaiveDate) -> u32 {
        self.day_caps
            .get(&(therapist_id.to_string(), date))
            .copied()
            .unwrap_or(self.request.constraints.therapist.max_sessions_per_day)
    }

    fn fixed_day(&self, therapist_id: &str, date: NaiveDate) -> u32 {
        self.fixed_day_load
            .get(&(therapist_id.to_string(), date))
            .copied()
            .unwrap_or(0)
    }

    /// Conflicts between session `i` at `a` and session `j` at `b`,
    /// excluding room capacity and daily caps.
    fn pair_conflicts(&self, i: usize, a: &Placement, j: usize, b: &Placement) -> usize {
        if !a.overlaps(b) {
            return 0;
        }
        let mut n = 0;
        if a.therapist_id == b.therapist_id {
            n += 1;
        }
        if self.sessions[i].student_id == self.sessions[j].student_id {
            n += 1;
        }
        if a.room_id == b.room_id
            && self.request.constraints.facility.enforce_equipment
            && !self.sessions[i]
                .required_equipment
                .is_disjoint(&self.sessions[j].required_equipment)
        {
            n += 1;
        }
        n
    }

    /// Whether `i` at `a` rules out `j` at `b` outright. Used to prune
    /// domains; counted constraints (capacity > 1, daily caps) are left to
    /// [`Self::session_conflicts`].
    pub fn excludes(&self, i: usize, a: &Placement, j: usize, b: &Placement) -> bool {
        if self.pair_conflicts(i, a, j, b) > 0 {
            return true;
        }
        a.room_id == b.room_id
            && a.overlaps(b)
            && self.request.constraints.facility.enforce_room_capacity
            && self.room_cap(&a.room_id) <= 1
    }

    /// Conflicts session `i` would have at domain entry `k` against every
    /// other assigned session in `genes`.
    pub fn session_conflicts(&self, i: usize, k: usize, genes: &Genes) -> usize {
        let p = &self.domains[i][k];
        let mut n = 0;
        let mut room_load = self.fixed_room_load[i][k];
        let mut day_load = self.fixed_day(&p.therapist_id, p.date);

        for (j, gene) in genes.iter().enumerate() {
            let Some(kj) = gene else { continue };
            if j == i {
                continue;
            }
            let q = &self.domains[j][*kj];
            n += self.pair_conflicts(i, p, j, q);
            if q.room_id == p.room_id && q.overlaps(p) {
                room_load += 1;
            }
            if q.therapist_id == p.therapist_id && q.date == p.date {
                day_load += 1;
            }
        }
        if self.request.constraints.facility.enforce_room_capacity && room_load >= self.room_cap(&p.room_id) {
            n += 1;
        }
        if day_load + 1 > self.day_cap(&p.therapist_id, p.date) {
            n += 1;
        }
        n
    }

    /// Total conflicts of an assignment.
    pub fn conflict_count(&self, genes: &Genes) -> usize {
        let assigned: Vec<(usize, &Placement)> = genes
            .iter()
            .enumerate()
            .filter_map(|(i, g)| g.map(|k| (i, &self.domains[i][k])))
            .collect();

        let mut n = 0;
        let mut room_load: Vec<u32> = assigned
            .iter()
            .map(|(i, _)| genes[*i].map_or(0, |k| self.fixed_room_load[*i][k]))
            .collect();
        let mut day_count: HashMap<(&str, NaiveDate), u32> = HashMap::new();

        for (a, (i, p)) in assigned.iter().enumerate() {
            *day_count.entry((p.therapist_id.as_str(), p.date)).or_insert(0) += 1;
            for (b, (j, q)) in assigned.iter().enumerate().skip(a + 1) {
                if p.date != q.date {
                    continue;
                }
                n += self.pair_conflicts(*i, p, *j, q);
                if p.room_id == q.room_id && p.overlaps(q) {
                    room_load[a] += 1;
                    room_load[b] += 1;
                }
            }
        }
        if self.request.constraints.facility.enforce_room_capacity {
            for (a, (_, p)) in assigned.iter().enumerate() {
                if room_load[a] >= self.room_cap(&p.room_id) {
                    n += 1;
                }
            }
        }
        for ((therapist, date), count) in day_count {
            let total = count + self.fixed_day(therapist, date);
            n += total.saturating_sub(self.day_cap(therapist, date)) as usize;
        }
        n
    }

    /// Objective of an assignment.
    pub fn objective(&self, genes: &Genes) -> ObjectiveBreakdown {
        let placed: Vec<PlacedItem<'_>> = genes
            .iter()
            .enumerate()
            .filter_map(|(i, g)| {
                g.map(|k| {
                    let p = &self.domains[i][k];
                    PlacedItem {
                        student_id: &self.sessions[i].student_id,
                        therapist_id: &p.therapist_id,
                        date: p.date,
                        window: p.window(),
                    }
                })
            })
            .collect();
        let therapists: Vec<&str> = self.therapists.iter().map(String::as_str).collect();
        objective::evaluate(&placed, self.total, &therapists, &self.request.constraints)
    }

    /// Search cost (lower is better).
    pub fn cost(&self, genes: &Genes) -> f64 {
        self.conflict_count(genes) as f64 + (1.0 - self.objective(genes).score)
    }

    /// Cost of a full assignment.
    pub fn cost_full(&self, genes: &[usize]) -> f64 {
        let as_option: Vec<Option<usize>> = genes.iter().copied().map(Some).collect();
        self.cost(&as_option)
    }

    /// Indices ordered most constrained first (smallest domain).
    pub fn most_constrained_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.sort_by_key(|&i| (self.domains[i].len(), i));
        order
    }

    /// Turns any assignment into a conflict-free one.
    ///
    /// Sessions are visited most constrained first. A session keeps its
    /// placement when it is still free of conflicts with those accepted so
    /// far; otherwise the best conflict-free domain entry is taken. Sessions
    /// with no such entry become unresolved.
    pub fn repair(&self, genes: &Genes) -> (Vec<Option<usize>>, Vec<UnresolvedSession>) {
        let mut accepted: Vec<Option<usize>> = vec![None; self.len()];
        let mut unresolved = Vec::new();

        for i in self.most_constrained_order() {
            if let Some(k) = genes.get(i).copied().flatten() {
                if self.session_conflicts(i, k, &accepted) == 0 {
                    accepted[i] = Some(k);
                    continue;
                }
            }
            let mut best: Option<usize> = None;
            for k in 0..self.domains[i].len() {
                if self.session_conflicts(i, k, &accepted) > 0 {
                    continue;
                }
                // higher preference wins; ties keep the earlier entry
                let better = match best {
                    None => true,
                    Some(b) => self.preference(i, k) > self.preference(i, b),
                };
                if better {
                    best = Some(k);
                }
            }
            match best {
                Some(k) => accepted[i] = Some(k),
                None => unresolved.push(self.unresolved_for(i, &accepted)),
            }
        }
        (accepted, unresolved)
    }

    /// Proposed schedule of a repaired assignment.
    pub fn schedule(&self, genes: &Genes) -> ProposedSchedule {
        let mut schedule = ProposedSchedule::new();
        for (i, gene) in genes.iter().enumerate() {
            if let Some(k) = gene {
                let session = self.sessions[i];
                schedule.add(SessionAssignment::new(
                    session.id.clone(),
                    session.student_id.clone(),
                    self.domains[i][*k].clone(),
                ));
            }
        }
        schedule
    }

    fn unresolved_for(&self, i: usize, accepted: &Genes) -> UnresolvedSession {
        let session = self.sessions[i];
        let mut context: Vec<Session> = self.request.fixed_sessions.clone();
        for (j, gene) in accepted.iter().enumerate() {
            if let Some(k) = gene {
                context.push(self.sessions[j].placed_at(self.domains[j][*k].clone()));
            }
        }
        self.explain(session, &context, self.domains[i].len())
    }

    /// Why `session` cannot be placed, measured at its current placement.
    fn explain(&self, session: &Session, context: &[Session], candidates: usize) -> UnresolvedSession {
        let mut reasons: Vec<String> = self
            .detector
            .check_placement(
                session,
                &session.placement,
                context,
                &self.request.availabilities,
                &self.request.rooms,
            )
            .into_iter()
            .map(|c| c.message)
            .collect();
        if reasons.is_empty() || candidates > 0 {
            reasons.push(if candidates == 0 {
                "no candidate slot within the allowed therapists and dates".to_string()
            } else {
                format!("none of {candidates} candidate slots is free of conflicts")
            });
        }
        UnresolvedSession {
            session_id: session.id.clone(),
            reasons,
        }
    }
}

/// Every placement of `session` inside bookable windows of the given
/// therapists and dates, in rooms that can host it.
///
/// Rooms: the session's own room first, then the others by id.
pub(crate) fn candidate_placements(
    session: &Session,
    therapists: &[String],
    dates: &[NaiveDate],
    availabilities: &[TherapistAvailability],
    rooms: &[TherapyRoom],
    step: i32,
    enforce_equipment: bool,
) -> Vec<Placement> {
    let length = session.window().duration_min();
    if length <= 0 {
        return Vec::new();
    }
    let mut usable: Vec<&TherapyRoom> = rooms
        .iter()
        .filter(|r| r.can_host(&session.session_type))
        .filter(|r| !enforce_equipment || r.missing_equipment(&session.required_equipment).is_empty())
        .collect();
    usable.sort_by_key(|r| (r.id != session.room_id(), r.id.clone()));

    let mut out = Vec::new();
    for therapist in therapists {
        for date in dates {
            let records = availabilities
                .iter()
                .filter(|a| &a.therapist_id == therapist && a.date == *date);
            for record in records {
                for free in record.bookable_windows() {
                    let mut start = free.start_min;
                    while start + length <= free.end_min {
                        let window = TimeWindow::new(start, start + length);
                        for room in &usable {
                            out.push(Placement::new(therapist.clone(), room.id.clone(), *date, window));
                        }
                        start += step;
                    }
                }
            }
        }
    }
    out
}
