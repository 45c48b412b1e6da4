use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use rust_decimal_macros::dec;
use std::sync::Arc;
use tempfile::TempDir;

use coachrs::database::SqliteStore;
use coachrs::generator::TemplateGenerator;
use coachrs::models::{
    ActivityType, EntrySource, LogEntry, PlanState, RecoverySignal, UserProfile, WorkoutCandidate,
};
use coachrs::orchestrator::{PlanOrchestrator, PlanRequest};
use coachrs::store::{EntryCursor, LogStore};

/// SQLite backend behaviour across reopen and through the lazy cursor

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 9, 22, 18, 0, 0).unwrap()
}

fn ride(at: DateTime<Utc>, minutes: u32) -> WorkoutCandidate {
    WorkoutCandidate {
        timestamp: at,
        activity: ActivityType::Cycling,
        duration_min: minutes.into(),
        distance_km: Some(dec!(30)),
        avg_hr: Some(142),
        peak_hr: Some(171),
        rpe: None,
        source: EntrySource::Extracted,
        supersedes: None,
        notes: None,
    }
}

fn recovery(at: DateTime<Utc>) -> RecoverySignal {
    RecoverySignal {
        timestamp: at,
        sleep_hours: Some(dec!(6.5)),
        sleep_quality: Some(6),
        fatigue: Some(5),
        supersedes: None,
        notes: None,
    }
}

fn profile() -> UserProfile {
    let mut profile = UserProfile::new("athlete", "Test Athlete");
    profile.age = Some(40);
    profile.ftp = Some(240);
    profile
}

#[tokio::test]
async fn test_state_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("coach.db");

    let (before, plan_id, plan_state) = {
        let store = Arc::new(SqliteStore::open(&path).unwrap());
        let orchestrator = PlanOrchestrator::new(store, Arc::new(TemplateGenerator::new()));
        orchestrator.put_profile(profile()).await.unwrap();

        for day in 1..=20 {
            orchestrator
                .log_workout("athlete", ride(now() - Duration::days(day), 60))
                .await
                .unwrap();
        }
        orchestrator
            .log_recovery("athlete", recovery(now() - Duration::hours(10)))
            .await
            .unwrap();

        let plan = orchestrator
            .request_plan(
                "athlete",
                PlanRequest {
                    goal: None,
                    week_start: NaiveDate::from_ymd_opt(2024, 9, 23).unwrap(),
                    note: None,
                },
                now(),
            )
            .await
            .unwrap();
        let status = orchestrator.status("athlete", now()).await.unwrap();
        (status.load, plan.id, plan.state)
    };

    let store = Arc::new(SqliteStore::open(&path).unwrap());
    assert_eq!(store.latest_sequence("athlete").unwrap(), 21);
    assert_eq!(store.get_profile("athlete").unwrap().unwrap().ftp, Some(240));

    let stored = store.get_proposal("athlete", plan_id).unwrap().unwrap();
    assert_eq!(stored.state, plan_state);
    if plan_state == PlanState::Approved {
        assert_eq!(store.get_active_plan("athlete").unwrap().unwrap().id, plan_id);
    }

    let orchestrator = PlanOrchestrator::new(store, Arc::new(TemplateGenerator::new()));
    let after = orchestrator.load_state("athlete", now()).await.unwrap();
    assert_eq!(after, before);
    assert!(after.recovery.is_some());
    assert!(after.readiness_score < 100);
}

#[test]
fn test_cursor_pages_restart_and_stop_at_high_water() {
    let dir = TempDir::new().unwrap();
    let store = SqliteStore::open(dir.path().join("cursor.db")).unwrap();

    // Appended out of timestamp order
    for offset in [5i64, 1, 4, 2, 3, 0] {
        store
            .append(
                "athlete",
                LogEntry::Recovery(recovery(now() - Duration::hours(offset))),
            )
            .unwrap();
    }

    let since = now() - Duration::days(1);
    let until = now() + Duration::seconds(1);
    let mut cursor = EntryCursor::new(&store, "athlete", since, until, 2).unwrap();
    assert_eq!(cursor.high_water(), 6);

    let first_two: Vec<u64> = cursor
        .by_ref()
        .take(2)
        .map(|e| e.unwrap().sequence)
        .collect();
    assert_eq!(first_two, vec![1, 3]);

    // Appends after creation are not visible to this cursor
    store
        .append("athlete", LogEntry::Recovery(recovery(now() - Duration::minutes(30))))
        .unwrap();

    let snapshot = cursor.clone();
    let rest: Vec<u64> = cursor.by_ref().map(|e| e.unwrap().sequence).collect();
    assert_eq!(rest, vec![5, 4, 2, 6]);
    let replay: Vec<u64> = snapshot.map(|e| e.unwrap().sequence).collect();
    assert_eq!(replay, rest);

    cursor.restart();
    assert_eq!(cursor.count(), 6);

    let fresh = store.query("athlete", since, until).unwrap();
    assert_eq!(fresh.high_water(), 7);
    assert_eq!(fresh.collect_entries().unwrap().len(), 7);
}

#[test]
fn test_query_range_is_half_open() {
    let store = SqliteStore::open_in_memory().unwrap();
    let start = now() - Duration::hours(3);
    for hour in 0..3 {
        store
            .append(
                "athlete",
                LogEntry::Recovery(recovery(start + Duration::hours(hour))),
            )
            .unwrap();
    }

    let entries = store
        .query("athlete", start, start + Duration::hours(2))
        .unwrap()
        .collect_entries()
        .unwrap();
    let sequences: Vec<u64> = entries.iter().map(|e| e.sequence).collect();
    assert_eq!(sequences, vec![1, 2]);

    assert!(store
        .query("other", start, now())
        .unwrap()
        .collect_entries()
        .unwrap()
        .is_empty());
}
