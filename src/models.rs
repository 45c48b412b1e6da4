use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::ValidationError;
use crate::risk::RiskVerdict;

/// Plausible heart rate bounds (bpm) accepted from manual entry or extraction
pub const MIN_PLAUSIBLE_HR: u16 = 25;
pub const MAX_PLAUSIBLE_HR: u16 = 250;

/// Activity types a workout or planned session can have
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    Running,
    Cycling,
    Swimming,
    Rowing,
    Walking,
    Hiking,
    Strength,
    Hiit,
    Mobility,
    CrossTraining,
    Rest,
}

impl ActivityType {
    /// Body regions an activity loads when a session does not name its own
    pub fn primary_regions(&self) -> &'static [BodyRegion] {
        use BodyRegion::*;
        match self {
            ActivityType::Running => &[Knee, Ankle, Calf, Achilles, Hip],
            ActivityType::Cycling => &[Knee, Quadriceps, Hip],
            ActivityType::Swimming => &[Shoulder, Neck],
            ActivityType::Rowing => &[LowerBack, Shoulder, Hamstring],
            ActivityType::Walking | ActivityType::Hiking => &[Ankle, Foot, Knee],
            ActivityType::Strength => &[LowerBack, Shoulder, Knee],
            ActivityType::Hiit => &[Knee, Ankle, Shoulder],
            ActivityType::CrossTraining => &[Knee, Hip],
            ActivityType::Mobility | ActivityType::Rest => &[],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityType::Running => "running",
            ActivityType::Cycling => "cycling",
            ActivityType::Swimming => "swimming",
            ActivityType::Rowing => "rowing",
            ActivityType::Walking => "walking",
            ActivityType::Hiking => "hiking",
            ActivityType::Strength => "strength",
            ActivityType::Hiit => "hiit",
            ActivityType::Mobility => "mobility",
            ActivityType::CrossTraining => "cross_training",
            ActivityType::Rest => "rest",
        }
    }
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(['-', ' '], "_").as_str() {
            "running" | "run" => Ok(Self::Running),
            "cycling" | "ride" | "bike" => Ok(Self::Cycling),
            "swimming" | "swim" => Ok(Self::Swimming),
            "rowing" | "row" => Ok(Self::Rowing),
            "walking" | "walk" => Ok(Self::Walking),
            "hiking" | "hike" => Ok(Self::Hiking),
            "strength" | "lifting" | "gym" => Ok(Self::Strength),
            "hiit" | "intervals" => Ok(Self::Hiit),
            "mobility" | "yoga" | "stretching" => Ok(Self::Mobility),
            "cross_training" | "crosstraining" => Ok(Self::CrossTraining),
            "rest" => Ok(Self::Rest),
            other => Err(ValidationError::new(
                "activity",
                format!("unknown activity type '{}'", other),
            )),
        }
    }
}

/// Where an entry came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntrySource {
    Manual,
    Extracted,
}

/// Primary muscle/joint groups used for injury cross-referencing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyRegion {
    Neck,
    Shoulder,
    Elbow,
    Wrist,
    Chest,
    UpperBack,
    LowerBack,
    Core,
    Hip,
    Hamstring,
    Quadriceps,
    Knee,
    Calf,
    Achilles,
    Ankle,
    Foot,
}

impl BodyRegion {
    pub fn as_str(&self) -> &'static str {
        match self {
            BodyRegion::Neck => "neck",
            BodyRegion::Shoulder => "shoulder",
            BodyRegion::Elbow => "elbow",
            BodyRegion::Wrist => "wrist",
            BodyRegion::Chest => "chest",
            BodyRegion::UpperBack => "upper_back",
            BodyRegion::LowerBack => "lower_back",
            BodyRegion::Core => "core",
            BodyRegion::Hip => "hip",
            BodyRegion::Hamstring => "hamstring",
            BodyRegion::Quadriceps => "quadriceps",
            BodyRegion::Knee => "knee",
            BodyRegion::Calf => "calf",
            BodyRegion::Achilles => "achilles",
            BodyRegion::Ankle => "ankle",
            BodyRegion::Foot => "foot",
        }
    }
}

impl FromStr for BodyRegion {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(['-', ' '], "_").as_str() {
            "neck" => Ok(Self::Neck),
            "shoulder" | "shoulders" => Ok(Self::Shoulder),
            "elbow" => Ok(Self::Elbow),
            "wrist" => Ok(Self::Wrist),
            "chest" => Ok(Self::Chest),
            "upper_back" => Ok(Self::UpperBack),
            "lower_back" | "back" => Ok(Self::LowerBack),
            "core" | "abs" => Ok(Self::Core),
            "hip" | "hips" => Ok(Self::Hip),
            "hamstring" | "hamstrings" => Ok(Self::Hamstring),
            "quadriceps" | "quads" => Ok(Self::Quadriceps),
            "knee" | "knees" => Ok(Self::Knee),
            "calf" | "calves" => Ok(Self::Calf),
            "achilles" => Ok(Self::Achilles),
            "ankle" | "ankles" => Ok(Self::Ankle),
            "foot" | "feet" => Ok(Self::Foot),
            other => Err(ValidationError::new(
                "region",
                format!("unknown body region '{}'", other),
            )),
        }
    }
}

/// Free-text injury note pinned to a body region
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InjuryAnnotation {
    pub note: String,
    pub region: BodyRegion,
    pub noted_on: NaiveDate,
    /// None while the injury is still open
    pub resolved_on: Option<NaiveDate>,
}

impl InjuryAnnotation {
    /// Open on `date`: already noted and not yet resolved
    pub fn is_open_on(&self, date: NaiveDate) -> bool {
        self.noted_on <= date && self.resolved_on.map_or(true, |resolved| resolved > date)
    }
}

/// Training goal descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Goal {
    GeneralFitness,
    Strength,
    Endurance,
    FatLoss,
    RacePrep,
}

impl Goal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Goal::GeneralFitness => "general_fitness",
            Goal::Strength => "strength",
            Goal::Endurance => "endurance",
            Goal::FatLoss => "fat_loss",
            Goal::RacePrep => "race_prep",
        }
    }
}

impl Default for Goal {
    fn default() -> Self {
        Goal::GeneralFitness
    }
}

impl FromStr for Goal {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(['-', ' '], "_").as_str() {
            "general_fitness" | "general" | "fitness" => Ok(Self::GeneralFitness),
            "strength" => Ok(Self::Strength),
            "endurance" => Ok(Self::Endurance),
            "fat_loss" | "weight_loss" => Ok(Self::FatLoss),
            "race_prep" | "race" => Ok(Self::RacePrep),
            other => Err(ValidationError::new("goal", format!("unknown goal '{}'", other))),
        }
    }
}

/// Self-reported training experience
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperienceLevel {
    Beginner,
    Intermediate,
    Advanced,
}

impl Default for ExperienceLevel {
    fn default() -> Self {
        ExperienceLevel::Intermediate
    }
}

impl FromStr for ExperienceLevel {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "beginner" | "novice" => Ok(Self::Beginner),
            "intermediate" => Ok(Self::Intermediate),
            "advanced" | "expert" => Ok(Self::Advanced),
            other => Err(ValidationError::new(
                "experience",
                format!("unknown experience level '{}'", other),
            )),
        }
    }
}

/// Weekly volume ceiling chosen by the user
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeCeiling {
    pub duration_min: Option<u32>,
    pub distance_km: Option<Decimal>,
}

/// User profile: identity, thresholds, injuries and current goal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Unique user identifier
    pub id: String,

    /// Display name
    pub name: String,

    /// Date of birth for age-based estimates
    pub date_of_birth: Option<NaiveDate>,

    /// Age when no date of birth is known
    pub age: Option<u8>,

    /// Measured maximum heart rate
    pub max_hr: Option<u16>,

    /// Functional threshold used in the TSS formula
    pub ftp: Option<u16>,

    /// Optional personal weekly volume ceiling
    pub weekly_volume_ceiling: Option<VolumeCeiling>,

    /// Injury history, open and resolved
    #[serde(default)]
    pub injuries: Vec<InjuryAnnotation>,

    /// Current goal
    #[serde(default)]
    pub goal: Goal,

    /// Training experience
    #[serde(default)]
    pub experience: ExperienceLevel,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserProfile {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            date_of_birth: None,
            age: None,
            max_hr: None,
            ftp: None,
            weekly_volume_ceiling: None,
            injuries: Vec::new(),
            goal: Goal::default(),
            experience: ExperienceLevel::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Age on a given date, from date of birth when known
    pub fn age_on(&self, date: NaiveDate) -> Option<u8> {
        match self.date_of_birth {
            Some(dob) => {
                let mut years = date.year() - dob.year();
                if (date.month(), date.day()) < (dob.month(), dob.day()) {
                    years -= 1;
                }
                u8::try_from(years.max(0)).ok()
            }
            None => self.age,
        }
    }

    /// Measured max HR, else the age estimate `220 - age`
    pub fn effective_max_hr(&self, date: NaiveDate) -> Option<u16> {
        self.max_hr
            .or_else(|| self.age_on(date).map(|age| 220u16.saturating_sub(u16::from(age))))
    }

    /// Injuries still open on `date`
    pub fn open_injuries(&self, date: NaiveDate) -> impl Iterator<Item = &InjuryAnnotation> {
        self.injuries.iter().filter(move |i| i.is_open_on(date))
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.trim().is_empty() {
            return Err(ValidationError::new("id", "must not be empty"));
        }
        if let Some(max_hr) = self.max_hr {
            check_heart_rate("max_hr", max_hr)?;
        }
        if self.ftp == Some(0) {
            return Err(ValidationError::new("ftp", "must be positive"));
        }
        if let Some(ceiling) = &self.weekly_volume_ceiling {
            if let Some(km) = ceiling.distance_km {
                check_non_negative("weekly_volume_ceiling.distance_km", km)?;
            }
        }
        for injury in &self.injuries {
            if let Some(resolved) = injury.resolved_on {
                if resolved < injury.noted_on {
                    return Err(ValidationError::new(
                        "injuries.resolved_on",
                        "cannot precede the date the injury was noted",
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Structurally-valid workout delivered by manual entry or extraction, before TSS
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutCandidate {
    pub timestamp: DateTime<Utc>,
    pub activity: ActivityType,
    pub duration_min: Decimal,
    pub distance_km: Option<Decimal>,
    pub avg_hr: Option<u16>,
    pub peak_hr: Option<u16>,
    /// Subjective effort 1-10
    pub rpe: Option<u8>,
    pub source: EntrySource,
    /// Sequence position of the entry this one corrects
    #[serde(default)]
    pub supersedes: Option<u64>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl WorkoutCandidate {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.activity == ActivityType::Rest {
            return Err(ValidationError::new("activity", "a rest day is not a workout"));
        }
        check_positive("duration_min", self.duration_min)?;
        if let Some(km) = self.distance_km {
            check_non_negative("distance_km", km)?;
        }
        if let Some(hr) = self.avg_hr {
            check_heart_rate("avg_hr", hr)?;
        }
        if let Some(hr) = self.peak_hr {
            check_heart_rate("peak_hr", hr)?;
        }
        if let (Some(avg), Some(peak)) = (self.avg_hr, self.peak_hr) {
            if peak < avg {
                return Err(ValidationError::new(
                    "peak_hr",
                    format!("peak {} is below average {}", peak, avg),
                ));
            }
        }
        if let Some(rpe) = self.rpe {
            check_scale("rpe", rpe)?;
        }
        Ok(())
    }
}

/// Immutable workout record with its computed training stress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutEntry {
    pub timestamp: DateTime<Utc>,
    pub activity: ActivityType,
    pub duration_min: Decimal,
    pub distance_km: Option<Decimal>,
    pub avg_hr: Option<u16>,
    pub peak_hr: Option<u16>,
    pub rpe: Option<u8>,
    pub source: EntrySource,
    /// Training Stress Score, 2 decimal places
    pub tss: Decimal,
    /// Intensity factor used for the TSS
    pub intensity_factor: Decimal,
    #[serde(default)]
    pub supersedes: Option<u64>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl WorkoutEntry {
    pub fn validate(&self) -> Result<(), ValidationError> {
        WorkoutCandidate {
            timestamp: self.timestamp,
            activity: self.activity,
            duration_min: self.duration_min,
            distance_km: self.distance_km,
            avg_hr: self.avg_hr,
            peak_hr: self.peak_hr,
            rpe: self.rpe,
            source: self.source,
            supersedes: self.supersedes,
            notes: None,
        }
        .validate()?;
        check_non_negative("tss", self.tss)?;
        check_non_negative("intensity_factor", self.intensity_factor)
    }
}

/// Sleep and fatigue report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoverySignal {
    pub timestamp: DateTime<Utc>,
    pub sleep_hours: Option<Decimal>,
    /// Subjective sleep quality 1-10
    pub sleep_quality: Option<u8>,
    /// Subjective fatigue 1-10
    pub fatigue: Option<u8>,
    #[serde(default)]
    pub supersedes: Option<u64>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl RecoverySignal {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(hours) = self.sleep_hours {
            if hours < Decimal::ZERO || hours > dec!(24) {
                return Err(ValidationError::new(
                    "sleep_hours",
                    "must be between 0 and 24",
                ));
            }
        }
        if let Some(q) = self.sleep_quality {
            check_scale("sleep_quality", q)?;
        }
        if let Some(f) = self.fatigue {
            check_scale("fatigue", f)?;
        }
        Ok(())
    }
}

/// Recovery report as delivered by manual entry or extraction
pub type RecoveryCandidate = RecoverySignal;

/// One appended record in a user's log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogEntry {
    Workout(WorkoutEntry),
    Recovery(RecoverySignal),
}

impl LogEntry {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            LogEntry::Workout(w) => w.timestamp,
            LogEntry::Recovery(r) => r.timestamp,
        }
    }

    pub fn supersedes(&self) -> Option<u64> {
        match self {
            LogEntry::Workout(w) => w.supersedes,
            LogEntry::Recovery(r) => r.supersedes,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            LogEntry::Workout(_) => "workout",
            LogEntry::Recovery(_) => "recovery",
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            LogEntry::Workout(w) => w.validate(),
            LogEntry::Recovery(r) => r.validate(),
        }
    }
}

/// A log entry with its per-user sequence position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequencedEntry {
    pub user_id: String,
    pub sequence: u64,
    pub entry: LogEntry,
}

/// Planned session intensity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intensity {
    Rest,
    Recovery,
    Easy,
    Moderate,
    Hard,
    Max,
}

impl Intensity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intensity::Rest => "rest",
            Intensity::Recovery => "recovery",
            Intensity::Easy => "easy",
            Intensity::Moderate => "moderate",
            Intensity::Hard => "hard",
            Intensity::Max => "max",
        }
    }

    pub fn is_high(&self) -> bool {
        matches!(self, Intensity::Hard | Intensity::Max)
    }
}

/// One session in a proposed week
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedSession {
    /// Day within the week, 0 = week start
    pub day_offset: u8,
    pub activity: ActivityType,
    pub intensity: Intensity,
    pub duration_min: u32,
    #[serde(default)]
    pub distance_km: Option<Decimal>,
    /// Regions this session loads; empty means the activity's primary regions
    #[serde(default)]
    pub body_regions: Vec<BodyRegion>,
    #[serde(default)]
    pub description: String,
}

impl PlannedSession {
    pub fn is_rest(&self) -> bool {
        self.activity == ActivityType::Rest
            || self.intensity == Intensity::Rest
            || self.duration_min == 0
    }

    pub fn loaded_regions(&self) -> Vec<BodyRegion> {
        if self.is_rest() {
            Vec::new()
        } else if self.body_regions.is_empty() {
            self.activity.primary_regions().to_vec()
        } else {
            self.body_regions.clone()
        }
    }
}

/// Plan lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanState {
    Draft,
    PendingApproval,
    Approved,
    Rejected,
    Superseded,
}

impl PlanState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanState::Draft => "draft",
            PlanState::PendingApproval => "pending_approval",
            PlanState::Approved => "approved",
            PlanState::Rejected => "rejected",
            PlanState::Superseded => "superseded",
        }
    }
}

impl fmt::Display for PlanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanState {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "pending_approval" => Ok(Self::PendingApproval),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "superseded" => Ok(Self::Superseded),
            other => Err(ValidationError::new("state", format!("unknown plan state '{}'", other))),
        }
    }
}

/// Human decision on a pending proposal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    AcceptRisk,
    Reject,
}

/// Attributable decision event, kept with the verdict for audit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub kind: DecisionKind,
    pub actor: String,
    pub at: DateTime<Utc>,
    #[serde(default)]
    pub note: Option<String>,
}

impl Decision {
    pub fn accept_risk(actor: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            kind: DecisionKind::AcceptRisk,
            actor: actor.into(),
            at,
            note: None,
        }
    }

    pub fn reject(actor: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            kind: DecisionKind::Reject,
            actor: actor.into(),
            at,
            note: None,
        }
    }
}

/// Audit record of one lifecycle transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: PlanState,
    pub to: PlanState,
    pub at: DateTime<Utc>,
    pub reason: String,
}

/// A weekly schedule moving through the admission lifecycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanProposal {
    pub id: Uuid,
    pub user_id: String,
    pub goal: Goal,
    pub week_start: NaiveDate,
    /// Ordered by day offset
    pub sessions: Vec<PlannedSession>,
    pub state: PlanState,
    /// Attached at proposal time, never replaced
    pub verdict: RiskVerdict,
    pub decision: Option<Decision>,
    pub transitions: Vec<StateTransition>,
    pub created_at: DateTime<Utc>,
    /// Generator identifier
    pub generated_by: String,
    pub request_note: Option<String>,
}

impl PlanProposal {
    /// New draft; the verdict is attached separately by the orchestrator
    pub fn draft(
        user_id: impl Into<String>,
        goal: Goal,
        week_start: NaiveDate,
        sessions: Vec<PlannedSession>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            goal,
            week_start,
            sessions,
            state: PlanState::Draft,
            verdict: RiskVerdict::default(),
            decision: None,
            transitions: Vec::new(),
            created_at,
            generated_by: String::new(),
            request_note: None,
        }
    }

    pub fn training_sessions(&self) -> impl Iterator<Item = &PlannedSession> {
        self.sessions.iter().filter(|s| !s.is_rest())
    }

    pub fn total_duration_min(&self) -> u32 {
        self.training_sessions().map(|s| s.duration_min).sum()
    }

    /// Sum of planned distances, None when no session carries a distance
    pub fn total_distance_km(&self) -> Option<Decimal> {
        let mut total = None;
        for km in self.training_sessions().filter_map(|s| s.distance_km) {
            *total.get_or_insert(Decimal::ZERO) += km;
        }
        total
    }

    pub fn high_intensity_count(&self) -> usize {
        self.training_sessions().filter(|s| s.intensity.is_high()).count()
    }

    /// Days of the week without any training session
    pub fn rest_days(&self) -> usize {
        (0u8..7)
            .filter(|day| !self.training_sessions().any(|s| s.day_offset == *day))
            .count()
    }

    pub fn transition(&mut self, to: PlanState, at: DateTime<Utc>, reason: impl Into<String>) {
        self.transitions.push(StateTransition {
            from: self.state,
            to,
            at,
            reason: reason.into(),
        });
        self.state = to;
    }
}

fn check_heart_rate(field: &str, hr: u16) -> Result<(), ValidationError> {
    if !(MIN_PLAUSIBLE_HR..=MAX_PLAUSIBLE_HR).contains(&hr) {
        return Err(ValidationError::new(
            field,
            format!(
                "{} bpm is outside the plausible range {}-{}",
                hr, MIN_PLAUSIBLE_HR, MAX_PLAUSIBLE_HR
            ),
        ));
    }
    Ok(())
}

fn check_scale(field: &str, value: u8) -> Result<(), ValidationError> {
    if !(1..=10).contains(&value) {
        return Err(ValidationError::new(
            field,
            format!("{} is outside the 1-10 scale", value),
        ));
    }
    Ok(())
}

fn check_positive(field: &str, value: Decimal) -> Result<(), ValidationError> {
    if value <= Decimal::ZERO {
        return Err(ValidationError::new(field, format!("{} must be positive", value)));
    }
    Ok(())
}

fn check_non_negative(field: &str, value: Decimal) -> Result<(), ValidationError> {
    if value < Decimal::ZERO {
        return Err(ValidationError::new(field, format!("{} must not be negative", value)));
    }
    Ok(())
}
