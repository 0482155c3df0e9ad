//! JSON request/response surface.
//!
//! Each operation takes a self-contained request record (the caller supplies
//! the snapshot) and returns the matching result record. [`handle_json`]
//! dispatches a raw JSON body by [`Operation`] and is what the
//! `schedule-engine` binary calls.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::EngineConfig;
use crate::conflict::{ConflictDetector, ConflictReport};
use crate::error::{Error, Result};
use crate::freeze::{analyze_impact, validate_request};
use crate::models::{FreezeRequest, ImpactAnalysis, OptimizationConstraints, Session, TherapistAvailability, TherapyRoom};
use crate::optimizer::{OptimizationRequest, OptimizationResult, ScheduleOptimizer};
use crate::validation::{into_error, validate_session, validate_snapshot};

/// Operations reachable through [`handle_json`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    DetectConflicts,
    Optimize,
    ImpactAnalysis,
}

/// Conflict check of one candidate against a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConflictCheckRequest {
    pub candidate: Session,
    #[serde(default)]
    pub sessions: Vec<Session>,
    pub availabilities: Vec<TherapistAvailability>,
    pub rooms: Vec<TherapyRoom>,
    /// Enables advisory checks.
    #[serde(default)]
    pub constraints: Option<OptimizationConstraints>,
}

/// Freeze impact over the student's sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImpactRequest {
    pub freeze: FreezeRequest,
    pub sessions: Vec<Session>,
}

pub fn detect_conflicts(request: &ConflictCheckRequest, config: &EngineConfig) -> Result<ConflictReport> {
    into_error(validate_session(&request.candidate))?;
    into_error(validate_snapshot(&request.sessions, &request.availabilities, &request.rooms))?;

    let mut detector = ConflictDetector::new(config.detector.clone());
    if let Some(constraints) = &request.constraints {
        constraints.validate()?;
        detector = detector.with_preferences(constraints);
    }
    Ok(detector.detect_conflicts(
        &request.candidate,
        &request.sessions,
        &request.availabilities,
        &request.rooms,
    ))
}

pub fn optimize(request: &OptimizationRequest, config: &EngineConfig) -> Result<OptimizationResult> {
    ScheduleOptimizer::from_config(config).generate_optimal_schedule(request)
}

pub fn impact_analysis(request: &ImpactRequest) -> Result<ImpactAnalysis> {
    validate_request(&request.freeze)?;
    Ok(analyze_impact(&request.freeze, request.sessions.clone()))
}

/// Parses `body` as the request of `operation`, runs it and serializes the
/// result.
pub fn handle_json(operation: Operation, body: &str, config: &EngineConfig) -> Result<serde_json::Value> {
    info!(?operation, bytes = body.len(), "handling request");
    let value = match operation {
        Operation::DetectConflicts => {
            let request: ConflictCheckRequest = serde_json::from_str(body)?;
            serde_json::to_value(detect_conflicts(&request, config)?)?
        }
        Operation::Optimize => {
            let request: OptimizationRequest = serde_json::from_str(body)?;
            serde_json::to_value(optimize(&request, config)?)?
        }
        Operation::ImpactAnalysis => {
            let request: ImpactRequest = serde_json::from_str(body)?;
            serde_json::to_value(impact_analysis(&request)?)?
        }
    };
    Ok(value)
}

/// JSON error body for a failed request.
pub fn error_body(err: &Error) -> serde_json::Value {
    let kind = match err {
        Error::Validation(_) | Error::InvalidConstraints(_) | Error::Json(_) => "validation",
        Error::Config(_) | Error::Toml(_) => "configuration",
        Error::NotFound { .. } => "not_found",
        Error::InvalidState { .. } => "invalid_state",
        Error::FreezeOverlap { .. } => "freeze_overlap",
        Error::Port(_) | Error::Io(_) => "collaborator",
    };
    let details = match err {
        Error::Validation(errors) => serde_json::to_value(errors).unwrap_or_default(),
        _ => serde_json::Value::Null,
    };
    serde_json::json!({
        "success": false,
        "error": kind,
        "message": err.to_string(),
        "details": details,
    })
}
