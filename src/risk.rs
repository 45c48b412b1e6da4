//! Plan risk evaluation
//!
//! `RiskEvaluator::evaluate` scores a proposed week against the user's load
//! state and profile. Every rule runs, in a fixed order, so two evaluations
//! of the same inputs produce the same verdict down to the byte.

use chrono::Days;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;

use crate::load::LoadState;
use crate::models::{BodyRegion, ExperienceLevel, PlanProposal, UserProfile};

/// Tunable safety policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskPolicy {
    /// Allowed week-over-baseline increase, in percent
    pub volume_increase_ceiling_pct: Decimal,

    /// Excess (percentage points) still reported as Warning
    pub volume_warning_band_pct: Decimal,

    /// Excess still reported as High; anything above is Critical
    pub volume_high_band_pct: Decimal,

    /// Sessions at least this long count as long sessions
    pub long_session_min: u32,

    /// Sessions at least this long count towards the training base
    pub qualifying_session_min: u32,

    /// Qualifying sessions needed in the history window before long or hard work
    pub min_base_sessions: u32,

    /// Maximum share of high-intensity sessions, in percent
    pub max_high_intensity_pct: Decimal,

    /// Chronic load at which a high-intensity share is explained rather than flagged
    pub supported_chronic_load: Decimal,

    pub min_rest_days: u32,

    /// Readiness below which high-intensity sessions are flagged
    pub min_readiness_for_intensity: u8,

    /// Training sessions per week above which the count is noted
    pub session_count_note: u32,

    /// Training sessions per week above which approval is required
    pub session_count_limit: u32,

    /// Training sessions per week a beginner may take on without review
    pub max_beginner_sessions: u32,
}

impl Default for RiskPolicy {
    fn default() -> Self {
        RiskPolicy {
            volume_increase_ceiling_pct: dec!(10),
            volume_warning_band_pct: dec!(10),
            volume_high_band_pct: dec!(40),
            long_session_min: 90,
            qualifying_session_min: 30,
            min_base_sessions: 6,
            max_high_intensity_pct: dec!(20),
            supported_chronic_load: dec!(60),
            min_rest_days: 1,
            min_readiness_for_intensity: 40,
            session_count_note: 5,
            session_count_limit: 7,
            max_beginner_sessions: 4,
        }
    }
}

/// Violation severity, ordered Info < Warning < High < Critical
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// Severities that force human approval
    pub fn requires_approval(&self) -> bool {
        *self >= Severity::Warning
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rule identifiers in evaluation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskRule {
    VolumeJump,
    BaseTraining,
    InjuryConflict,
    IntensityDistribution,
    RestDays,
    WeeklyCeiling,
    LowReadiness,
    SessionCount,
    Experience,
}

impl RiskRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskRule::VolumeJump => "volume_jump",
            RiskRule::BaseTraining => "base_training",
            RiskRule::InjuryConflict => "injury_conflict",
            RiskRule::IntensityDistribution => "intensity_distribution",
            RiskRule::RestDays => "rest_days",
            RiskRule::WeeklyCeiling => "weekly_ceiling",
            RiskRule::LowReadiness => "low_readiness",
            RiskRule::SessionCount => "session_count",
            RiskRule::Experience => "experience",
        }
    }
}

impl fmt::Display for RiskRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One triggered rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleViolation {
    pub rule: RiskRule,
    pub severity: Severity,
    pub measured_value: Decimal,
    pub threshold: Decimal,
    pub detail: String,
}

/// Outcome of evaluating one proposal. Contains no timestamps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskVerdict {
    pub violations: Vec<RuleViolation>,
    pub requires_approval: bool,
    pub highest_severity: Option<Severity>,
}

impl RiskVerdict {
    pub fn from_violations(violations: Vec<RuleViolation>) -> Self {
        let highest_severity = violations.iter().map(|v| v.severity).max();
        RiskVerdict {
            requires_approval: highest_severity.map_or(false, |s| s.requires_approval()),
            highest_severity,
            violations,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn violation(&self, rule: RiskRule) -> Option<&RuleViolation> {
        self.violations.iter().find(|v| v.rule == rule)
    }

    /// SHA-256 hex digest of the canonical JSON form
    pub fn fingerprint(&self) -> Result<String, serde_json::Error> {
        let canonical = serde_json::to_vec(self)?;
        Ok(format!("{:x}", Sha256::digest(&canonical)))
    }
}

/// Core risk evaluation engine
pub struct RiskEvaluator {
    policy: RiskPolicy,
}

impl RiskEvaluator {
    pub fn new() -> Self {
        RiskEvaluator {
            policy: RiskPolicy::default(),
        }
    }

    pub fn with_policy(policy: RiskPolicy) -> Self {
        RiskEvaluator { policy }
    }

    pub fn policy(&self) -> &RiskPolicy {
        &self.policy
    }

    /// Run every rule against the proposal
    pub fn evaluate(
        &self,
        proposal: &PlanProposal,
        load_state: &LoadState,
        profile: &UserProfile,
    ) -> RiskVerdict {
        let mut violations = Vec::new();
        violations.extend(self.check_volume_jump(proposal, load_state));
        violations.extend(self.check_base_training(proposal, load_state));
        violations.extend(self.check_injury_conflict(proposal, profile));
        violations.extend(self.check_intensity_distribution(proposal, load_state));
        violations.extend(self.check_rest_days(proposal));
        violations.extend(self.check_weekly_ceiling(proposal, profile));
        violations.extend(self.check_low_readiness(proposal, load_state));
        violations.extend(self.check_session_count(proposal));
        violations.extend(self.check_experience(proposal, profile));

        RiskVerdict::from_violations(violations)
    }

    fn check_volume_jump(&self, proposal: &PlanProposal, state: &LoadState) -> Option<RuleViolation> {
        let history = &state.history;
        let (proposed, baseline, unit) =
            match (proposal.total_distance_km(), history.weekly_avg_distance_km) {
                (Some(km), Some(avg)) if avg > Decimal::ZERO => (km, avg, "km"),
                _ => (
                    Decimal::from(proposal.total_duration_min()),
                    history.weekly_avg_duration_min,
                    "min",
                ),
            };
        if baseline <= Decimal::ZERO {
            return None;
        }

        let measured = (proposed / baseline * dec!(100)).round_dp(2);
        let threshold = dec!(100) + self.policy.volume_increase_ceiling_pct;
        if measured <= threshold {
            return None;
        }

        let excess = measured - threshold;
        let severity = if excess <= self.policy.volume_warning_band_pct {
            Severity::Warning
        } else if excess <= self.policy.volume_high_band_pct {
            Severity::High
        } else {
            Severity::Critical
        };

        Some(RuleViolation {
            rule: RiskRule::VolumeJump,
            severity,
            measured_value: measured,
            threshold,
            detail: format!(
                "Planned {} {} is {}% of the trailing weekly average of {} {}",
                proposed.normalize(),
                unit,
                measured.normalize(),
                baseline.normalize(),
                unit
            ),
        })
    }

    fn check_base_training(&self, proposal: &PlanProposal, state: &LoadState) -> Option<RuleViolation> {
        let has_long = proposal
            .training_sessions()
            .any(|s| s.duration_min >= self.policy.long_session_min);
        let has_high = proposal.high_intensity_count() > 0;
        if !has_long && !has_high {
            return None;
        }

        let count = state
            .history
            .qualifying_sessions(self.policy.qualifying_session_min);
        let minimum = self.policy.min_base_sessions as usize;
        if count >= minimum {
            return None;
        }

        let severity = if count * 2 >= minimum {
            Severity::Warning
        } else {
            Severity::High
        };
        let reason = match (has_long, has_high) {
            (true, true) => "long and high-intensity sessions",
            (true, false) => "a long session",
            _ => "high-intensity sessions",
        };

        Some(RuleViolation {
            rule: RiskRule::BaseTraining,
            severity,
            measured_value: Decimal::from(count),
            threshold: Decimal::from(minimum),
            detail: format!(
                "Plan contains {} but only {} sessions of {}+ min in the last {} days",
                reason, count, self.policy.qualifying_session_min, state.history.window_days
            ),
        })
    }

    fn check_injury_conflict(&self, proposal: &PlanProposal, profile: &UserProfile) -> Option<RuleViolation> {
        let mut conflicting = 0usize;
        let mut regions: BTreeSet<BodyRegion> = BTreeSet::new();

        for session in proposal.training_sessions() {
            let date = proposal
                .week_start
                .checked_add_days(Days::new(u64::from(session.day_offset)))
                .unwrap_or(proposal.week_start);
            let open: BTreeSet<BodyRegion> = profile.open_injuries(date).map(|i| i.region).collect();
            let hits: Vec<BodyRegion> = session
                .loaded_regions()
                .into_iter()
                .filter(|r| open.contains(r))
                .collect();
            if !hits.is_empty() {
                conflicting += 1;
                regions.extend(hits);
            }
        }

        if conflicting == 0 {
            return None;
        }

        let names: Vec<&str> = regions.iter().map(|r| r.as_str()).collect();
        Some(RuleViolation {
            rule: RiskRule::InjuryConflict,
            severity: Severity::Critical,
            measured_value: Decimal::from(conflicting),
            threshold: Decimal::ZERO,
            detail: format!(
                "{} session(s) load a region with an open injury: {}",
                conflicting,
                names.join(", ")
            ),
        })
    }

    fn check_intensity_distribution(
        &self,
        proposal: &PlanProposal,
        state: &LoadState,
    ) -> Option<RuleViolation> {
        let training = proposal.training_sessions().count();
        if training == 0 {
            return None;
        }
        let high = proposal.high_intensity_count();
        let share = (Decimal::from(high) * dec!(100) / Decimal::from(training)).round_dp(2);
        let ceiling = self.policy.max_high_intensity_pct;
        if share <= ceiling {
            return None;
        }

        let (severity, note) = if state.chronic_load >= self.policy.supported_chronic_load {
            (Severity::Info, "; current chronic load supports it")
        } else if share <= ceiling * dec!(2) {
            (Severity::Warning, "")
        } else {
            (Severity::High, "")
        };

        Some(RuleViolation {
            rule: RiskRule::IntensityDistribution,
            severity,
            measured_value: share,
            threshold: ceiling,
            detail: format!(
                "{} of {} sessions are high intensity ({}%){}",
                high,
                training,
                share.normalize(),
                note
            ),
        })
    }

    fn check_rest_days(&self, proposal: &PlanProposal) -> Option<RuleViolation> {
        let rest_days = proposal.rest_days();
        let minimum = self.policy.min_rest_days as usize;
        if rest_days >= minimum {
            return None;
        }

        Some(RuleViolation {
            rule: RiskRule::RestDays,
            severity: Severity::Warning,
            measured_value: Decimal::from(rest_days),
            threshold: Decimal::from(minimum),
            detail: format!("Only {} rest day(s) scheduled this week", rest_days),
        })
    }

    fn check_weekly_ceiling(&self, proposal: &PlanProposal, profile: &UserProfile) -> Vec<RuleViolation> {
        let mut violations = Vec::new();
        let Some(ceiling) = &profile.weekly_volume_ceiling else {
            return violations;
        };

        if let Some(max_minutes) = ceiling.duration_min {
            let planned = proposal.total_duration_min();
            if planned > max_minutes {
                violations.push(RuleViolation {
                    rule: RiskRule::WeeklyCeiling,
                    severity: Severity::Warning,
                    measured_value: Decimal::from(planned),
                    threshold: Decimal::from(max_minutes),
                    detail: format!(
                        "Planned {} min exceeds your weekly ceiling of {} min",
                        planned, max_minutes
                    ),
                });
            }
        }

        if let (Some(max_km), Some(planned)) = (ceiling.distance_km, proposal.total_distance_km()) {
            if planned > max_km {
                violations.push(RuleViolation {
                    rule: RiskRule::WeeklyCeiling,
                    severity: Severity::Warning,
                    measured_value: planned,
                    threshold: max_km,
                    detail: format!(
                        "Planned {} km exceeds your weekly ceiling of {} km",
                        planned.normalize(),
                        max_km.normalize()
                    ),
                });
            }
        }

        violations
    }

    fn check_low_readiness(&self, proposal: &PlanProposal, state: &LoadState) -> Option<RuleViolation> {
        let high = proposal.high_intensity_count();
        let minimum = self.policy.min_readiness_for_intensity;
        if high == 0 || state.readiness_score >= minimum {
            return None;
        }

        Some(RuleViolation {
            rule: RiskRule::LowReadiness,
            severity: Severity::Warning,
            measured_value: Decimal::from(state.readiness_score),
            threshold: Decimal::from(minimum),
            detail: format!(
                "Readiness {} is below {} with {} high-intensity session(s) planned",
                state.readiness_score, minimum, high
            ),
        })
    }

    fn check_session_count(&self, proposal: &PlanProposal) -> Option<RuleViolation> {
        let count = proposal.training_sessions().count();
        let note = self.policy.session_count_note as usize;
        let limit = self.policy.session_count_limit as usize;
        if count <= note {
            return None;
        }

        let (severity, threshold, detail) = if count > limit {
            (
                Severity::High,
                limit,
                format!("{} sessions this week is very high, make sure recovery is scheduled", count),
            )
        } else {
            (
                Severity::Info,
                note,
                format!("{} sessions this week, monitor recovery", count),
            )
        };

        Some(RuleViolation {
            rule: RiskRule::SessionCount,
            severity,
            measured_value: Decimal::from(count),
            threshold: Decimal::from(threshold),
            detail,
        })
    }

    fn check_experience(&self, proposal: &PlanProposal, profile: &UserProfile) -> Option<RuleViolation> {
        if profile.experience != ExperienceLevel::Beginner {
            return None;
        }
        let count = proposal.training_sessions().count();
        let limit = self.policy.max_beginner_sessions as usize;
        let high = proposal.high_intensity_count();
        if high == 0 && count <= limit {
            return None;
        }

        let reason = match (high > 0, count > limit) {
            (true, true) => format!("{} sessions including {} high-intensity", count, high),
            (true, false) => format!("{} high-intensity session(s)", high),
            _ => format!("{} sessions", count),
        };

        Some(RuleViolation {
            rule: RiskRule::Experience,
            severity: Severity::Warning,
            measured_value: Decimal::from(count),
            threshold: Decimal::from(limit),
            detail: format!("Plan has {}, which is aggressive for a beginner", reason),
        })
    }
}

impl Default for RiskEvaluator {
    fn default() -> Self {
        Self::new()
    }
}
