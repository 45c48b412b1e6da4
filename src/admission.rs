use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{CoachError, ConflictError, Result, ValidationError};
use crate::models::{Decision, DecisionKind, PlanProposal, PlanState};

/// Actor recorded when a pending proposal times out
pub const EXPIRY_ACTOR: &str = "system:expiry";

/// Admission gate configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Hours a proposal may wait for a decision; None disables expiry
    pub approval_timeout_hours: Option<u32>,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        AdmissionConfig {
            approval_timeout_hours: Some(72),
        }
    }
}

/// Plan lifecycle state machine
///
/// `draft -> pending_approval -> {approved, rejected}`; a draft without
/// findings that need approval goes straight to approved. The move from
/// approved to superseded happens only inside the store's atomic
/// `set_active_plan`, through [`AdmissionGate::supersede`].
pub struct AdmissionGate {
    config: AdmissionConfig,
}

impl AdmissionGate {
    pub fn new() -> Self {
        AdmissionGate {
            config: AdmissionConfig::default(),
        }
    }

    pub fn with_config(config: AdmissionConfig) -> Self {
        AdmissionGate { config }
    }

    /// Route a scored draft to approved or pending_approval
    pub fn admit(&self, mut proposal: PlanProposal, now: DateTime<Utc>) -> Result<PlanProposal> {
        if proposal.state != PlanState::Draft {
            return Err(invalid_transition(&proposal, "admit"));
        }

        if proposal.verdict.requires_approval {
            let reason = match proposal.verdict.highest_severity {
                Some(severity) => format!("risk verdict requires approval ({})", severity),
                None => "risk verdict requires approval".to_string(),
            };
            proposal.transition(PlanState::PendingApproval, now, reason);
            info!(
                plan_id = %proposal.id,
                user_id = %proposal.user_id,
                violations = proposal.verdict.violations.len(),
                "Plan held for approval"
            );
        } else {
            proposal.transition(PlanState::Approved, now, "no findings requiring approval");
            debug!(plan_id = %proposal.id, user_id = %proposal.user_id, "Plan admitted");
        }

        Ok(proposal)
    }

    /// Apply the single human decision a pending proposal accepts
    pub fn decide(&self, mut proposal: PlanProposal, decision: Decision) -> Result<PlanProposal> {
        let action = match decision.kind {
            DecisionKind::AcceptRisk => "accept_risk",
            DecisionKind::Reject => "reject",
        };
        if proposal.state != PlanState::PendingApproval || proposal.decision.is_some() {
            return Err(invalid_transition(&proposal, action));
        }
        if decision.actor.trim().is_empty() {
            return Err(ValidationError::new("actor", "a decision must name its actor").into());
        }
        let pending_since = Self::pending_since(&proposal);
        if decision.at < pending_since {
            return Err(ValidationError::new(
                "at",
                format!("decision time {} precedes the pending transition at {}", decision.at, pending_since),
            )
            .into());
        }
        if self.is_expired(&proposal, decision.at) {
            return Err(ConflictError::ApprovalExpired {
                plan_id: proposal.id,
                pending_since,
            }
            .into());
        }

        let (target, reason) = match decision.kind {
            DecisionKind::AcceptRisk => (PlanState::Approved, format!("risk accepted by {}", decision.actor)),
            DecisionKind::Reject => (PlanState::Rejected, format!("rejected by {}", decision.actor)),
        };
        proposal.transition(target, decision.at, reason);
        info!(
            plan_id = %proposal.id,
            actor = %decision.actor,
            decision = action,
            "Recorded plan decision"
        );
        proposal.decision = Some(decision);

        Ok(proposal)
    }

    /// When the proposal entered pending_approval
    pub fn pending_since(proposal: &PlanProposal) -> DateTime<Utc> {
        proposal
            .transitions
            .iter()
            .rev()
            .find(|t| t.to == PlanState::PendingApproval)
            .map(|t| t.at)
            .unwrap_or(proposal.created_at)
    }

    /// Pending for longer than the configured timeout
    pub fn is_expired(&self, proposal: &PlanProposal, now: DateTime<Utc>) -> bool {
        match self.config.approval_timeout_hours {
            Some(hours) if proposal.state == PlanState::PendingApproval => {
                now - Self::pending_since(proposal) >= Duration::hours(i64::from(hours))
            }
            _ => false,
        }
    }

    /// Reject a timed-out pending proposal on behalf of the system
    pub fn expire(&self, mut proposal: PlanProposal, now: DateTime<Utc>) -> Result<PlanProposal> {
        if !self.is_expired(&proposal, now) {
            return Err(invalid_transition(&proposal, "expire"));
        }

        proposal.transition(PlanState::Rejected, now, "approval window elapsed");
        proposal.decision = Some(Decision {
            kind: DecisionKind::Reject,
            actor: EXPIRY_ACTOR.to_string(),
            at: now,
            note: Some("no decision before the approval timeout".to_string()),
        });
        info!(plan_id = %proposal.id, user_id = %proposal.user_id, "Pending plan expired");

        Ok(proposal)
    }

    /// Guard before a plan becomes active: approved, and flagged plans only with accepted risk
    pub fn ensure_activatable(proposal: &PlanProposal) -> Result<()> {
        if proposal.state != PlanState::Approved {
            return Err(ValidationError::new(
                "state",
                format!("plan {} is {}, not approved", proposal.id, proposal.state),
            )
            .into());
        }
        if proposal.verdict.requires_approval {
            let accepted = matches!(
                &proposal.decision,
                Some(Decision { kind: DecisionKind::AcceptRisk, .. })
            );
            if !accepted {
                return Err(CoachError::Internal(format!(
                    "plan {} requires approval but carries no accept_risk decision",
                    proposal.id
                )));
            }
        }
        Ok(())
    }

    /// Retire the previously active plan in favour of `by`
    pub fn supersede(
        mut previous: PlanProposal,
        by: Uuid,
        now: DateTime<Utc>,
    ) -> Result<PlanProposal> {
        if previous.state != PlanState::Approved {
            return Err(invalid_transition(&previous, "supersede"));
        }
        previous.transition(PlanState::Superseded, now, format!("superseded by plan {}", by));
        Ok(previous)
    }
}

impl Default for AdmissionGate {
    fn default() -> Self {
        Self::new()
    }
}

fn invalid_transition(proposal: &PlanProposal, action: &str) -> CoachError {
    ConflictError::InvalidTransition {
        plan_id: proposal.id,
        from: proposal.state,
        action: action.to_string(),
    }
    .into()
}
