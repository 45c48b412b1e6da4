use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use coachrs::admission::EXPIRY_ACTOR;
use coachrs::database::SqliteStore;
use coachrs::error::{CoachError, ConflictError};
use coachrs::generator::{GenerationRequest, GeneratorFailure, PlanGenerator};
use coachrs::models::{Decision, DecisionKind, PlanState, UserProfile};
use coachrs::orchestrator::{PlanOrchestrator, PlanRequest};
use coachrs::risk::RiskRule;
use coachrs::store::{LogStore, MemoryStore};

/// Full admission lifecycle, run against both store backends

const EASY_WEEK: &str = r#"{"sessions": [
    {"day_offset": 1, "activity": "running", "intensity": "easy", "duration_min": 30},
    {"day_offset": 4, "activity": "cycling", "intensity": "easy", "duration_min": 40}
]}"#;

/// One hard session with no training base behind it
const HARD_WEEK: &str = r#"{"sessions": [
    {"day_offset": 2, "activity": "running", "intensity": "hard", "duration_min": 50,
     "description": "6 x 800 m"}
]}"#;

/// Replies handed out in order
struct ScriptedGenerator {
    replies: Mutex<VecDeque<&'static str>>,
}

impl ScriptedGenerator {
    fn new(replies: &[&'static str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().copied().collect()),
        }
    }
}

#[async_trait]
impl PlanGenerator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, _request: &GenerationRequest) -> Result<String, GeneratorFailure> {
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .map(str::to_string)
            .ok_or_else(|| GeneratorFailure::new("script exhausted"))
    }
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 9, 22, 18, 0, 0).unwrap()
}

fn request() -> PlanRequest {
    PlanRequest {
        goal: None,
        week_start: NaiveDate::from_ymd_opt(2024, 9, 23).unwrap(),
        note: None,
    }
}

fn backends() -> Vec<(&'static str, Arc<dyn LogStore>)> {
    vec![
        ("memory", Arc::new(MemoryStore::new())),
        ("sqlite", Arc::new(SqliteStore::open_in_memory().unwrap())),
    ]
}

async fn orchestrator(store: Arc<dyn LogStore>, replies: &[&'static str]) -> PlanOrchestrator {
    let orchestrator = PlanOrchestrator::new(store, Arc::new(ScriptedGenerator::new(replies)));
    orchestrator
        .put_profile(UserProfile::new("athlete", "Test Athlete"))
        .await
        .unwrap();
    orchestrator
}

#[tokio::test]
async fn test_accept_risk_supersedes_active_plan() {
    for (backend, store) in backends() {
        let orchestrator = orchestrator(store.clone(), &[EASY_WEEK, HARD_WEEK]).await;

        let first = orchestrator
            .request_plan("athlete", request(), now())
            .await
            .unwrap();
        assert_eq!(first.state, PlanState::Approved, "{}", backend);

        let later = now() + Duration::hours(1);
        let flagged = orchestrator
            .request_plan("athlete", request(), later)
            .await
            .unwrap();
        assert_eq!(flagged.state, PlanState::PendingApproval, "{}", backend);
        assert!(flagged.verdict.violation(RiskRule::BaseTraining).is_some());
        assert_eq!(
            store.get_active_plan("athlete").unwrap().unwrap().id,
            first.id,
            "{}: pending plan must not displace the active one",
            backend
        );

        let decided_at = later + Duration::minutes(5);
        let approved = orchestrator
            .decide("athlete", flagged.id, Decision::accept_risk("athlete", decided_at))
            .await
            .unwrap();
        assert_eq!(approved.state, PlanState::Approved);
        assert_eq!(approved.decision.as_ref().unwrap().kind, DecisionKind::AcceptRisk);

        let active = store.get_active_plan("athlete").unwrap().unwrap();
        assert_eq!(active.id, flagged.id, "{}", backend);

        let retired = store.get_proposal("athlete", first.id).unwrap().unwrap();
        assert_eq!(retired.state, PlanState::Superseded, "{}", backend);
        let last = retired.transitions.last().unwrap();
        assert_eq!(last.from, PlanState::Approved);
        assert_eq!(last.at, decided_at);

        // Exactly one approved plan remains
        let approved_count = store
            .list_proposals("athlete")
            .unwrap()
            .iter()
            .filter(|p| p.state == PlanState::Approved)
            .count();
        assert_eq!(approved_count, 1, "{}", backend);
    }
}

#[tokio::test]
async fn test_second_decision_is_rejected() {
    for (backend, store) in backends() {
        let orchestrator = orchestrator(store, &[HARD_WEEK]).await;
        let flagged = orchestrator
            .request_plan("athlete", request(), now())
            .await
            .unwrap();

        orchestrator
            .decide("athlete", flagged.id, Decision::reject("athlete", now()))
            .await
            .unwrap();
        let err = orchestrator
            .decide("athlete", flagged.id, Decision::accept_risk("athlete", now()))
            .await
            .unwrap_err();

        assert!(
            matches!(
                err,
                CoachError::Conflict(ConflictError::InvalidTransition {
                    from: PlanState::Rejected,
                    ..
                })
            ),
            "{}: {:?}",
            backend,
            err
        );
    }
}

#[tokio::test]
async fn test_reject_keeps_current_plan() {
    for (backend, store) in backends() {
        let orchestrator = orchestrator(store.clone(), &[EASY_WEEK, HARD_WEEK]).await;
        let first = orchestrator
            .request_plan("athlete", request(), now())
            .await
            .unwrap();
        let flagged = orchestrator
            .request_plan("athlete", request(), now())
            .await
            .unwrap();

        let mut decision = Decision::reject("coach:maria", now());
        decision.note = Some("too much too soon".to_string());
        let rejected = orchestrator
            .decide("athlete", flagged.id, decision)
            .await
            .unwrap();

        assert_eq!(rejected.state, PlanState::Rejected);
        assert_eq!(
            store.get_proposal("athlete", flagged.id).unwrap().unwrap().decision.unwrap().actor,
            "coach:maria"
        );
        assert_eq!(
            store.get_active_plan("athlete").unwrap().unwrap().id,
            first.id,
            "{}",
            backend
        );
    }
}

#[tokio::test]
async fn test_decision_needs_actor() {
    let orchestrator = orchestrator(Arc::new(MemoryStore::new()), &[HARD_WEEK]).await;
    let flagged = orchestrator
        .request_plan("athlete", request(), now())
        .await
        .unwrap();

    let err = orchestrator
        .decide("athlete", flagged.id, Decision::accept_risk("  ", now()))
        .await
        .unwrap_err();
    assert!(matches!(err, CoachError::Validation(ref v) if v.field == "actor"));

    let stored = orchestrator.store().get_proposal("athlete", flagged.id).unwrap().unwrap();
    assert_eq!(stored.state, PlanState::PendingApproval);
}

#[tokio::test]
async fn test_unknown_plan_is_not_found() {
    let orchestrator = orchestrator(Arc::new(MemoryStore::new()), &[]).await;
    let err = orchestrator
        .decide("athlete", uuid::Uuid::new_v4(), Decision::accept_risk("athlete", now()))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CoachError::Conflict(ConflictError::ProposalNotFound { .. })
    ));
}

#[tokio::test]
async fn test_expiry_rejects_stale_proposals() {
    for (backend, store) in backends() {
        let orchestrator = orchestrator(store.clone(), &[HARD_WEEK, HARD_WEEK]).await;
        let stale = orchestrator
            .request_plan("athlete", request(), now())
            .await
            .unwrap();
        let fresh = orchestrator
            .request_plan("athlete", request(), now() + Duration::hours(48))
            .await
            .unwrap();

        let expired = orchestrator
            .expire_pending("athlete", now() + Duration::hours(72))
            .await
            .unwrap();

        assert_eq!(expired.len(), 1, "{}", backend);
        assert_eq!(expired[0].id, stale.id);
        let decision = expired[0].decision.as_ref().unwrap();
        assert_eq!(decision.actor, EXPIRY_ACTOR);
        assert_eq!(decision.kind, DecisionKind::Reject);

        assert_eq!(
            store.get_proposal("athlete", stale.id).unwrap().unwrap().state,
            PlanState::Rejected
        );
        assert_eq!(
            store.get_proposal("athlete", fresh.id).unwrap().unwrap().state,
            PlanState::PendingApproval
        );
    }
}

#[tokio::test]
async fn test_late_decision_expires_the_plan() {
    for (backend, store) in backends() {
        let orchestrator = orchestrator(store.clone(), &[HARD_WEEK]).await;
        let pending = orchestrator
            .request_plan("athlete", request(), now())
            .await
            .unwrap();
        assert_eq!(pending.state, PlanState::PendingApproval, "{}", backend);

        let err = orchestrator
            .decide(
                "athlete",
                pending.id,
                Decision::accept_risk("user:athlete", now() + Duration::days(30)),
            )
            .await
            .unwrap_err();
        assert!(
            matches!(
                err,
                CoachError::Conflict(ConflictError::ApprovalExpired { plan_id, .. }) if plan_id == pending.id
            ),
            "{}: {:?}",
            backend,
            err
        );
        assert!(!err.is_retryable());

        // The timeout is recorded, not the late acceptance
        let stored = store.get_proposal("athlete", pending.id).unwrap().unwrap();
        assert_eq!(stored.state, PlanState::Rejected, "{}", backend);
        assert_eq!(stored.decision.unwrap().actor, EXPIRY_ACTOR);
        assert!(store.get_active_plan("athlete").unwrap().is_none());
    }
}

#[tokio::test]
async fn test_decision_before_pending_is_invalid() {
    for (backend, store) in backends() {
        let orchestrator = orchestrator(store.clone(), &[HARD_WEEK]).await;
        let pending = orchestrator
            .request_plan("athlete", request(), now())
            .await
            .unwrap();

        let err = orchestrator
            .decide(
                "athlete",
                pending.id,
                Decision::accept_risk("user:athlete", now() - Duration::hours(1)),
            )
            .await
            .unwrap_err();
        match err {
            CoachError::Validation(v) => assert_eq!(v.field, "at", "{}", backend),
            other => panic!("{}: unexpected error {:?}", backend, other),
        }

        let stored = store.get_proposal("athlete", pending.id).unwrap().unwrap();
        assert_eq!(stored.state, PlanState::PendingApproval, "{}", backend);
        assert!(stored.decision.is_none());
        assert!(store.get_active_plan("athlete").unwrap().is_none());
    }
}

#[tokio::test]
async fn test_flagged_plan_cannot_be_forced_active() {
    for (backend, store) in backends() {
        let orchestrator = orchestrator(store.clone(), &[HARD_WEEK]).await;
        let mut flagged = orchestrator
            .request_plan("athlete", request(), now())
            .await
            .unwrap();

        // Skip the gate: approved state, no accept_risk decision
        flagged.transition(PlanState::Approved, now(), "forced");
        let err = store.set_active_plan("athlete", &flagged, None).unwrap_err();

        assert!(matches!(err, CoachError::Internal(_)), "{}: {:?}", backend, err);
        assert!(store.get_active_plan("athlete").unwrap().is_none());
    }
}
