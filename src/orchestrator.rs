//! Plan orchestration
//!
//! Drives generator -> risk evaluator -> admission gate -> store for one user
//! at a time. Writes for a user are serialized through a per-user async
//! mutex; plan writes never queue behind each other and report
//! `ConflictError::UserBusy` instead. The generator call happens before the
//! lock is taken and everything it could have raced with is recomputed under
//! the lock.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::admission::{AdmissionConfig, AdmissionGate};
use crate::error::{CoachError, ConflictError, GenerationError, Result, ValidationError};
use crate::generator::{parse_schedule, GenerationRequest, PlanGenerator, ProfileSummary};
use crate::load::{LoadConfig, LoadEstimator, LoadState};
use crate::models::{
    Decision, Goal, LogEntry, PlannedSession, PlanProposal, PlanState, RecoveryCandidate,
    SequencedEntry, UserProfile, WorkoutCandidate,
};
use crate::risk::{RiskEvaluator, RiskPolicy};
use crate::store::{EntryCursor, LogStore};
use crate::tss::TssCalculator;

/// Orchestrator tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Upper bound on one generator call
    pub generator_timeout_ms: u64,

    /// Entries per page when reading a user's log
    pub query_page_size: usize,

    pub cache_load_states: bool,

    /// Cached load states kept before the cache is flushed
    pub cache_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        OrchestratorConfig {
            generator_timeout_ms: 30_000,
            query_page_size: 256,
            cache_load_states: true,
            cache_capacity: 1024,
        }
    }
}

/// What the caller wants planned
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanRequest {
    /// Defaults to the profile's goal
    #[serde(default)]
    pub goal: Option<Goal>,
    pub week_start: NaiveDate,
    #[serde(default)]
    pub note: Option<String>,
}

/// Current picture of one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub user_id: String,
    pub load: LoadState,
    pub active_plan: Option<PlanProposal>,
    pub pending: Vec<PlanProposal>,
}

/// Requests the intent layer can deliver, one variant per capability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    LogWorkout {
        user_id: String,
        workout: WorkoutCandidate,
    },
    LogRecovery {
        user_id: String,
        recovery: RecoveryCandidate,
    },
    RequestPlan {
        user_id: String,
        #[serde(flatten)]
        request: PlanRequest,
    },
    QueryStatus {
        user_id: String,
    },
    Decide {
        user_id: String,
        plan_id: Uuid,
        decision: Decision,
    },
    ExpirePending {
        user_id: String,
    },
}

/// Result of one dispatched action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "data", rename_all = "snake_case")]
pub enum ActionOutcome {
    Logged(SequencedEntry),
    Plan(PlanProposal),
    Status(StatusReport),
    Expired(Vec<PlanProposal>),
}

#[derive(Clone)]
struct CachedLoad {
    high_water: u64,
    state: LoadState,
}

/// Per-user coordinator over store, estimator, evaluator, gate and generator
pub struct PlanOrchestrator {
    store: Arc<dyn LogStore>,
    generator: Arc<dyn PlanGenerator>,
    estimator: LoadEstimator,
    evaluator: RiskEvaluator,
    gate: AdmissionGate,
    config: OrchestratorConfig,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    cache: Mutex<HashMap<(String, DateTime<Utc>), CachedLoad>>,
}

impl PlanOrchestrator {
    /// Orchestrator with default policies
    pub fn new(store: Arc<dyn LogStore>, generator: Arc<dyn PlanGenerator>) -> Self {
        Self::with_config(
            store,
            generator,
            LoadConfig::default(),
            RiskPolicy::default(),
            AdmissionConfig::default(),
            OrchestratorConfig::default(),
        )
    }

    pub fn with_config(
        store: Arc<dyn LogStore>,
        generator: Arc<dyn PlanGenerator>,
        load: LoadConfig,
        risk: RiskPolicy,
        admission: AdmissionConfig,
        config: OrchestratorConfig,
    ) -> Self {
        PlanOrchestrator {
            store,
            generator,
            estimator: LoadEstimator::with_config(load),
            evaluator: RiskEvaluator::with_policy(risk),
            gate: AdmissionGate::with_config(admission),
            config,
            locks: Mutex::new(HashMap::new()),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn LogStore> {
        &self.store
    }

    fn user_lock(&self, user_id: &str) -> Result<Arc<AsyncMutex<()>>> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| CoachError::Internal("user lock registry poisoned".to_string()))?;
        // Drop locks nobody holds or waits on
        locks.retain(|user, lock| user == user_id || Arc::strong_count(lock) > 1);
        Ok(locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone())
    }

    /// Wait for the user's lock (log appends and profile edits)
    async fn lock_user(&self, user_id: &str) -> Result<OwnedMutexGuard<()>> {
        Ok(self.user_lock(user_id)?.lock_owned().await)
    }

    /// Take the user's lock or fail at once (plan-state writes)
    fn try_lock_user(&self, user_id: &str) -> Result<OwnedMutexGuard<()>> {
        self.user_lock(user_id)?.try_lock_owned().map_err(|_| {
            debug!(user_id, "Plan write rejected, user busy");
            ConflictError::UserBusy {
                user_id: user_id.to_string(),
            }
            .into()
        })
    }

    fn invalidate(&self, user_id: &str) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.retain(|(user, _), _| user != user_id);
        }
    }

    pub async fn put_profile(&self, profile: UserProfile) -> Result<()> {
        let _guard = self.lock_user(&profile.id).await?;
        self.store.put_profile(&profile)?;
        self.invalidate(&profile.id);
        info!(user_id = %profile.id, "Profile saved");
        Ok(())
    }

    fn profile_or_default(&self, user_id: &str) -> Result<UserProfile> {
        Ok(self
            .store
            .get_profile(user_id)?
            .unwrap_or_else(|| UserProfile::new(user_id, user_id)))
    }

    /// Score and append a workout
    pub async fn log_workout(&self, user_id: &str, workout: WorkoutCandidate) -> Result<SequencedEntry> {
        let _guard = self.lock_user(user_id).await?;
        let profile = self.profile_or_default(user_id)?;
        let entry = TssCalculator::score(workout, &profile)?;
        let tss = entry.tss;
        let stored = self.store.append(user_id, LogEntry::Workout(entry))?;
        self.invalidate(user_id);

        info!(user_id, sequence = stored.sequence, %tss, "Workout logged");
        Ok(stored)
    }

    /// Append a recovery report
    pub async fn log_recovery(&self, user_id: &str, recovery: RecoveryCandidate) -> Result<SequencedEntry> {
        let _guard = self.lock_user(user_id).await?;
        let stored = self.store.append(user_id, LogEntry::Recovery(recovery))?;
        self.invalidate(user_id);

        info!(user_id, sequence = stored.sequence, "Recovery logged");
        Ok(stored)
    }

    /// Load state as of `as_of`, from the cache when the log has not moved
    pub async fn load_state(&self, user_id: &str, as_of: DateTime<Utc>) -> Result<LoadState> {
        self.compute_load_state(user_id, as_of)
    }

    fn compute_load_state(&self, user_id: &str, as_of: DateTime<Utc>) -> Result<LoadState> {
        let high_water = self.store.latest_sequence(user_id)?;
        let key = (user_id.to_string(), as_of);

        if self.config.cache_load_states {
            if let Ok(cache) = self.cache.lock() {
                if let Some(cached) = cache.get(&key) {
                    if cached.high_water == high_water {
                        debug!(user_id, "Load state cache hit");
                        return Ok(cached.state.clone());
                    }
                }
            }
        }

        let window = Duration::days(i64::from(self.estimator.config().required_window_days()));
        let cursor = EntryCursor::new(
            self.store.as_ref(),
            user_id,
            as_of - window,
            as_of + Duration::nanoseconds(1),
            self.config.query_page_size,
        )?;
        let captured = cursor.high_water();
        let entries = cursor.collect_entries()?;
        let state = self.estimator.estimate(&entries, as_of);

        if self.config.cache_load_states {
            if let Ok(mut cache) = self.cache.lock() {
                if cache.len() >= self.config.cache_capacity {
                    cache.clear();
                }
                cache.insert(
                    key,
                    CachedLoad {
                        high_water: captured,
                        state: state.clone(),
                    },
                );
            }
        }
        Ok(state)
    }

    pub async fn status(&self, user_id: &str, as_of: DateTime<Utc>) -> Result<StatusReport> {
        let load = self.compute_load_state(user_id, as_of)?;
        let active_plan = self.store.get_active_plan(user_id)?;
        let pending = self
            .store
            .list_proposals(user_id)?
            .into_iter()
            .filter(|p| p.state == PlanState::PendingApproval)
            .collect();

        Ok(StatusReport {
            user_id: user_id.to_string(),
            load,
            active_plan,
            pending,
        })
    }

    async fn generate_sessions(&self, request: &GenerationRequest) -> Result<Vec<PlannedSession>> {
        let limit = self.config.generator_timeout_ms;
        let reply = tokio::time::timeout(
            std::time::Duration::from_millis(limit),
            self.generator.generate(request),
        )
        .await;

        let raw = match reply {
            Err(_) => {
                warn!(user_id = %request.profile.user_id, timeout_ms = limit, "Plan generator timed out");
                return Err(GenerationError::Timeout { millis: limit }.into());
            }
            Ok(Err(failure)) => {
                warn!(user_id = %request.profile.user_id, reason = %failure, "Plan generator failed");
                return Err(GenerationError::from(failure).into());
            }
            Ok(Ok(raw)) => raw,
        };

        parse_schedule(&raw).map_err(|e| {
            warn!(user_id = %request.profile.user_id, error = %e, "Plan generator reply rejected");
            e.into()
        })
    }

    /// Generate, score and admit a weekly plan
    pub async fn request_plan(
        &self,
        user_id: &str,
        request: PlanRequest,
        now: DateTime<Utc>,
    ) -> Result<PlanProposal> {
        let profile = self.store.get_profile(user_id)?.ok_or_else(|| {
            ValidationError::new("profile", format!("no profile for user {}", user_id))
        })?;
        let goal = request.goal.unwrap_or(profile.goal);
        let snapshot = self.compute_load_state(user_id, now)?;

        let generation = GenerationRequest {
            profile: ProfileSummary::from_profile(&profile, request.week_start),
            goal,
            load_state: snapshot,
            week_start: request.week_start,
            note: request.note.clone(),
        };
        let sessions = self.generate_sessions(&generation).await?;

        let _guard = self.try_lock_user(user_id)?;

        // The log or profile may have moved while the generator ran
        let profile = self.profile_or_default(user_id)?;
        let load = self.compute_load_state(user_id, now)?;

        let mut draft = PlanProposal::draft(user_id, goal, request.week_start, sessions, now);
        draft.generated_by = self.generator.name().to_string();
        draft.request_note = request.note;
        draft.verdict = self.evaluator.evaluate(&draft, &load, &profile);

        let admitted = self.gate.admit(draft, now)?;
        match admitted.state {
            PlanState::Approved => {
                let expected = self.store.get_active_plan(user_id)?.map(|p| p.id);
                self.store.set_active_plan(user_id, &admitted, expected)?;
            }
            _ => self.store.save_proposal(&admitted)?,
        }

        info!(
            user_id,
            plan_id = %admitted.id,
            state = %admitted.state,
            requires_approval = admitted.verdict.requires_approval,
            "Plan proposal admitted"
        );
        Ok(admitted)
    }

    /// Apply a human decision to a pending proposal
    pub async fn decide(&self, user_id: &str, plan_id: Uuid, decision: Decision) -> Result<PlanProposal> {
        let _guard = self.try_lock_user(user_id)?;

        let proposal = self
            .store
            .get_proposal(user_id, plan_id)?
            .ok_or_else(|| ConflictError::ProposalNotFound {
                user_id: user_id.to_string(),
                plan_id,
            })?;
        let at = decision.at;
        let decided = match self.gate.decide(proposal.clone(), decision) {
            Ok(decided) => decided,
            Err(err @ CoachError::Conflict(ConflictError::ApprovalExpired { .. })) => {
                // The late decision does not apply, but the timeout does
                let rejected = self.gate.expire(proposal, at)?;
                self.store.save_proposal(&rejected)?;
                warn!(user_id, plan_id = %plan_id, "Decision arrived after the approval window, plan expired");
                return Err(err);
            }
            Err(err) => return Err(err),
        };

        if decided.state == PlanState::Approved {
            let expected = self.store.get_active_plan(user_id)?.map(|p| p.id);
            self.store.set_active_plan(user_id, &decided, expected)?;
        } else {
            self.store.save_proposal(&decided)?;
        }
        Ok(decided)
    }

    /// Reject every pending proposal older than the approval timeout
    pub async fn expire_pending(&self, user_id: &str, now: DateTime<Utc>) -> Result<Vec<PlanProposal>> {
        let _guard = self.try_lock_user(user_id)?;

        let mut expired = Vec::new();
        for proposal in self.store.list_proposals(user_id)? {
            if !self.gate.is_expired(&proposal, now) {
                continue;
            }
            let rejected = self.gate.expire(proposal, now)?;
            self.store.save_proposal(&rejected)?;
            expired.push(rejected);
        }

        if !expired.is_empty() {
            info!(user_id, count = expired.len(), "Expired pending plans");
        }
        Ok(expired)
    }

    /// Dispatch one action
    pub async fn handle(&self, action: Action, now: DateTime<Utc>) -> Result<ActionOutcome> {
        match action {
            Action::LogWorkout { user_id, workout } => {
                self.log_workout(&user_id, workout).await.map(ActionOutcome::Logged)
            }
            Action::LogRecovery { user_id, recovery } => {
                self.log_recovery(&user_id, recovery).await.map(ActionOutcome::Logged)
            }
            Action::RequestPlan { user_id, request } => {
                self.request_plan(&user_id, request, now).await.map(ActionOutcome::Plan)
            }
            Action::QueryStatus { user_id } => self.status(&user_id, now).await.map(ActionOutcome::Status),
            Action::Decide {
                user_id,
                plan_id,
                decision,
            } => self
                .decide(&user_id, plan_id, decision)
                .await
                .map(ActionOutcome::Plan),
            Action::ExpirePending { user_id } => self
                .expire_pending(&user_id, now)
                .await
                .map(ActionOutcome::Expired),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::TemplateGenerator;
    use crate::models::{ActivityType, DecisionKind, EntrySource};
    use crate::store::MemoryStore;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn orchestrator() -> PlanOrchestrator {
        PlanOrchestrator::new(Arc::new(MemoryStore::new()), Arc::new(TemplateGenerator::new()))
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, 22, 18, 0, 0).unwrap()
    }

    #[test]
    fn test_action_wire_format() {
        let json = r#"{
            "action": "request_plan",
            "user_id": "u1",
            "goal": "endurance",
            "week_start": "2024-09-23"
        }"#;
        let action: Action = serde_json::from_str(json).unwrap();
        assert_eq!(
            action,
            Action::RequestPlan {
                user_id: "u1".to_string(),
                request: PlanRequest {
                    goal: Some(Goal::Endurance),
                    week_start: NaiveDate::from_ymd_opt(2024, 9, 23).unwrap(),
                    note: None,
                },
            }
        );

        let decide = Action::Decide {
            user_id: "u1".to_string(),
            plan_id: Uuid::nil(),
            decision: Decision {
                kind: DecisionKind::AcceptRisk,
                actor: "u1".to_string(),
                at: now(),
                note: None,
            },
        };
        let value = serde_json::to_value(&decide).unwrap();
        assert_eq!(value["action"], "decide");
        assert_eq!(value["decision"]["kind"], "accept_risk");
    }

    #[tokio::test]
    async fn test_cache_invalidated_on_append() {
        let orchestrator = orchestrator();
        let before = orchestrator.load_state("u1", now()).await.unwrap();
        assert_eq!(before.acute_load, dec!(0));

        orchestrator
            .log_workout(
                "u1",
                WorkoutCandidate {
                    timestamp: now() - Duration::hours(2),
                    activity: ActivityType::Running,
                    duration_min: dec!(60),
                    distance_km: None,
                    avg_hr: None,
                    peak_hr: None,
                    rpe: Some(7),
                    source: EntrySource::Manual,
                    supersedes: None,
                    notes: None,
                },
            )
            .await
            .unwrap();

        let after = orchestrator.load_state("u1", now()).await.unwrap();
        assert!(after.acute_load > before.acute_load);
    }

    #[test]
    fn test_idle_user_locks_are_pruned() {
        let orchestrator = orchestrator();
        let held = orchestrator.try_lock_user("u1").unwrap();
        for user in ["u2", "u3", "u4"] {
            drop(orchestrator.try_lock_user(user).unwrap());
        }

        // u1 is still held, only the latest idle entry survives
        let registered = orchestrator.locks.lock().unwrap().len();
        assert_eq!(registered, 2);
        assert!(orchestrator.locks.lock().unwrap().contains_key("u1"));

        drop(held);
        drop(orchestrator.try_lock_user("u5").unwrap());
        let users: Vec<String> = orchestrator.locks.lock().unwrap().keys().cloned().collect();
        assert_eq!(users, vec!["u5".to_string()]);
    }

    #[tokio::test]
    async fn test_request_plan_needs_profile() {
        let orchestrator = orchestrator();
        let err = orchestrator
            .request_plan(
                "ghost",
                PlanRequest {
                    goal: None,
                    week_start: NaiveDate::from_ymd_opt(2024, 9, 23).unwrap(),
                    note: None,
                },
                now(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoachError::Validation(_)));
    }
}
