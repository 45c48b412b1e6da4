//! Plan generator contract
//!
//! Schedule content comes from an external generator behind [`PlanGenerator`].
//! Its reply is raw JSON (`{"sessions": [...]}`) and is validated here before
//! anything else looks at it. [`TemplateGenerator`] is a deterministic offline
//! implementation built from fixed weekly patterns per goal.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::GenerationError;
use crate::load::{LoadState, ReadinessLevel};
use crate::models::{
    ActivityType, BodyRegion, ExperienceLevel, Goal, Intensity, PlannedSession, UserProfile,
    VolumeCeiling,
};

pub const MAX_SESSIONS: usize = 14;
pub const MAX_SESSION_MINUTES: u32 = 600;

/// Failure reported by a generator implementation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct GeneratorFailure {
    pub reason: String,
}

impl GeneratorFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl From<GeneratorFailure> for GenerationError {
    fn from(failure: GeneratorFailure) -> Self {
        GenerationError::Unavailable {
            reason: failure.reason,
        }
    }
}

/// Profile fields a generator is allowed to see
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileSummary {
    pub user_id: String,
    pub experience: ExperienceLevel,
    pub open_injuries: Vec<BodyRegion>,
    pub weekly_volume_ceiling: Option<VolumeCeiling>,
}

impl ProfileSummary {
    pub fn from_profile(profile: &UserProfile, on: NaiveDate) -> Self {
        let mut open_injuries: Vec<BodyRegion> = profile.open_injuries(on).map(|i| i.region).collect();
        open_injuries.sort();
        open_injuries.dedup();
        ProfileSummary {
            user_id: profile.id.clone(),
            experience: profile.experience,
            open_injuries,
            weekly_volume_ceiling: profile.weekly_volume_ceiling.clone(),
        }
    }
}

/// Everything a generator receives for one weekly plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub profile: ProfileSummary,
    pub goal: Goal,
    pub load_state: LoadState,
    pub week_start: NaiveDate,
    pub note: Option<String>,
}

/// External schedule generator
#[async_trait]
pub trait PlanGenerator: Send + Sync {
    /// Identifier recorded on every proposal this generator produced
    fn name(&self) -> &str;

    /// Raw JSON schedule for the request
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GeneratorFailure>;
}

/// Wire shape of a generator reply
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleReply {
    pub sessions: Vec<PlannedSession>,
}

/// Parse and validate a raw reply, returning sessions ordered by day
pub fn parse_schedule(raw: &str) -> Result<Vec<PlannedSession>, GenerationError> {
    let reply: ScheduleReply =
        serde_json::from_str(strip_code_fence(raw)).map_err(|e| GenerationError::Unparsable {
            reason: e.to_string(),
        })?;
    validate_schedule(reply.sessions)
}

/// Schema checks on a parsed schedule
pub fn validate_schedule(mut sessions: Vec<PlannedSession>) -> Result<Vec<PlannedSession>, GenerationError> {
    if sessions.is_empty() || sessions.len() > MAX_SESSIONS {
        return Err(schema_violation(
            "sessions",
            format!("expected 1-{} sessions, got {}", MAX_SESSIONS, sessions.len()),
        ));
    }

    for (i, session) in sessions.iter().enumerate() {
        if session.day_offset > 6 {
            return Err(schema_violation(
                format!("sessions[{}].day_offset", i),
                format!("{} is outside 0-6", session.day_offset),
            ));
        }
        if session.duration_min > MAX_SESSION_MINUTES {
            return Err(schema_violation(
                format!("sessions[{}].duration_min", i),
                format!("{} exceeds {} minutes", session.duration_min, MAX_SESSION_MINUTES),
            ));
        }
        let declared_rest =
            session.activity == ActivityType::Rest || session.intensity == Intensity::Rest;
        if declared_rest && session.duration_min != 0 {
            return Err(schema_violation(
                format!("sessions[{}].duration_min", i),
                "rest sessions must have zero duration",
            ));
        }
        if let Some(km) = session.distance_km {
            if km.is_sign_negative() && !km.is_zero() {
                return Err(schema_violation(
                    format!("sessions[{}].distance_km", i),
                    "must not be negative",
                ));
            }
        }
    }

    // stable: same-day sessions keep the generator's order
    sessions.sort_by_key(|s| s.day_offset);
    Ok(sessions)
}

fn schema_violation(field: impl Into<String>, reason: impl Into<String>) -> GenerationError {
    GenerationError::SchemaViolation {
        field: field.into(),
        reason: reason.into(),
    }
}

/// Generators backed by language models often wrap JSON in a fenced block
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

/// Session kinds used by the weekly templates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionKind {
    EasyRun,
    Tempo,
    LongRun,
    Strength,
    Hiit,
    Recovery,
    Rest,
}

impl SessionKind {
    fn template(&self) -> (ActivityType, Intensity, u32, &'static str) {
        match self {
            SessionKind::EasyRun => (ActivityType::Running, Intensity::Easy, 30, "Easy run at conversational pace"),
            SessionKind::Tempo => (ActivityType::Running, Intensity::Hard, 40, "Tempo run, comfortably hard"),
            SessionKind::LongRun => (ActivityType::Running, Intensity::Easy, 60, "Long aerobic run"),
            SessionKind::Strength => (ActivityType::Strength, Intensity::Moderate, 45, "Full body resistance training"),
            SessionKind::Hiit => (ActivityType::Hiit, Intensity::Hard, 25, "High intensity intervals"),
            SessionKind::Recovery => (ActivityType::Mobility, Intensity::Recovery, 20, "Light movement and stretching"),
            SessionKind::Rest => (ActivityType::Rest, Intensity::Rest, 0, "Complete rest"),
        }
    }
}

fn weekly_pattern(goal: Goal) -> [SessionKind; 7] {
    use SessionKind::*;
    match goal {
        Goal::GeneralFitness => [Strength, EasyRun, Rest, Hiit, EasyRun, Strength, Rest],
        Goal::Strength => [Strength, Rest, Strength, Recovery, Strength, Rest, Rest],
        Goal::Endurance => [EasyRun, Tempo, Rest, EasyRun, Recovery, LongRun, Rest],
        Goal::FatLoss => [Hiit, Strength, EasyRun, Rest, Hiit, Strength, Rest],
        Goal::RacePrep => [EasyRun, Tempo, Rest, EasyRun, Rest, LongRun, Rest],
    }
}

/// Deterministic goal-pattern generator
///
/// Low readiness shortens sessions to 80% and drops hard sessions to moderate.
#[derive(Debug, Clone, Default)]
pub struct TemplateGenerator;

impl TemplateGenerator {
    pub fn new() -> Self {
        TemplateGenerator
    }

    /// Build the week without going through JSON
    pub fn sessions_for(&self, request: &GenerationRequest) -> Vec<PlannedSession> {
        let reduce = matches!(
            request.load_state.readiness_level,
            ReadinessLevel::Recover | ReadinessLevel::Rest
        );

        weekly_pattern(request.goal)
            .iter()
            .enumerate()
            .map(|(day, kind)| {
                let (activity, mut intensity, mut duration_min, description) = kind.template();
                let mut description = description.to_string();
                if reduce && *kind != SessionKind::Rest {
                    duration_min = duration_min * 4 / 5;
                    if intensity.is_high() {
                        intensity = Intensity::Moderate;
                    }
                    description.push_str(" (reduced for low readiness)");
                }
                PlannedSession {
                    day_offset: day as u8,
                    activity,
                    intensity,
                    duration_min,
                    distance_km: None,
                    body_regions: Vec::new(),
                    description,
                }
            })
            .collect()
    }
}

#[async_trait]
impl PlanGenerator for TemplateGenerator {
    fn name(&self) -> &str {
        "template"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GeneratorFailure> {
        let reply = ScheduleReply {
            sessions: self.sessions_for(request),
        };
        serde_json::to_string(&reply).map_err(|e| GeneratorFailure::new(e.to_string()))
    }
}
