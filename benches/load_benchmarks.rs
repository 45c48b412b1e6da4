use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rust_decimal_macros::dec;

use coachrs::database::SqliteStore;
use coachrs::load::LoadEstimator;
use coachrs::models::{
    ActivityType, EntrySource, Goal, Intensity, LogEntry, PlanProposal, PlannedSession,
    SequencedEntry, UserProfile, WorkoutCandidate,
};
use coachrs::risk::RiskEvaluator;
use coachrs::store::{EntryCursor, LogStore};
use coachrs::tss::TssCalculator;

/// Benchmarks for the hot paths behind every plan request:
/// scoring, load estimation, rule evaluation and reading the log back.

fn as_of() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 9, 22, 18, 0, 0).unwrap()
}

fn candidate(i: i64) -> WorkoutCandidate {
    WorkoutCandidate {
        timestamp: as_of() - Duration::hours(6 + 20 * i),
        activity: if i % 3 == 0 { ActivityType::Cycling } else { ActivityType::Running },
        duration_min: (30 + (i % 5) * 15).into(),
        distance_km: Some((5 + i % 10).into()),
        avg_hr: if i % 2 == 0 { Some(130 + (i % 40) as u16) } else { None },
        peak_hr: None,
        rpe: Some(4 + (i % 6) as u8),
        source: EntrySource::Manual,
        supersedes: None,
        notes: None,
    }
}

fn create_log(size: i64) -> Vec<SequencedEntry> {
    let profile = UserProfile::new("bench", "Bench");
    (0..size)
        .map(|i| SequencedEntry {
            user_id: "bench".to_string(),
            sequence: (i + 1) as u64,
            entry: LogEntry::Workout(TssCalculator::score(candidate(i), &profile).unwrap()),
        })
        .collect()
}

fn bench_tss_scoring(c: &mut Criterion) {
    let profile = UserProfile::new("bench", "Bench");
    let candidates: Vec<WorkoutCandidate> = (0..100).map(candidate).collect();

    let mut group = c.benchmark_group("TSS Scoring");
    group.throughput(Throughput::Elements(candidates.len() as u64));
    group.bench_function("score_100", |b| {
        b.iter(|| {
            for c in &candidates {
                let _ = TssCalculator::score(black_box(c.clone()), &profile);
            }
        })
    });
    group.finish();
}

fn bench_load_estimation(c: &mut Criterion) {
    let estimator = LoadEstimator::new();
    let mut group = c.benchmark_group("Load Estimation");

    for &size in &[10i64, 100, 500] {
        let entries = create_log(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("estimate", size), &entries, |b, entries| {
            b.iter(|| estimator.estimate(black_box(entries), as_of()))
        });
    }

    group.finish();
}

fn bench_risk_evaluation(c: &mut Criterion) {
    let entries = create_log(100);
    let state = LoadEstimator::new().estimate(&entries, as_of());
    let profile = UserProfile::new("bench", "Bench");
    let sessions = (0..6u8)
        .map(|day| PlannedSession {
            day_offset: day,
            activity: ActivityType::Running,
            intensity: if day % 3 == 0 { Intensity::Hard } else { Intensity::Easy },
            duration_min: 45 + u32::from(day) * 10,
            distance_km: Some(dec!(12)),
            body_regions: Vec::new(),
            description: String::new(),
        })
        .collect();
    let proposal = PlanProposal::draft(
        "bench",
        Goal::Endurance,
        NaiveDate::from_ymd_opt(2024, 9, 23).unwrap(),
        sessions,
        as_of(),
    );
    let evaluator = RiskEvaluator::new();

    c.bench_function("risk_evaluate", |b| {
        b.iter(|| evaluator.evaluate(black_box(&proposal), &state, &profile))
    });
}

fn bench_sqlite_cursor(c: &mut Criterion) {
    let store = SqliteStore::open_in_memory().unwrap();
    for entry in create_log(1000) {
        store.append("bench", entry.entry).unwrap();
    }
    let since = as_of() - Duration::days(120);
    let until = as_of() + Duration::seconds(1);

    let mut group = c.benchmark_group("SQLite Cursor");
    group.throughput(Throughput::Elements(1000));
    for &page in &[64usize, 256, 1024] {
        group.bench_with_input(BenchmarkId::new("drain", page), &page, |b, &page| {
            b.iter(|| {
                EntryCursor::new(&store, "bench", since, until, page)
                    .unwrap()
                    .collect_entries()
                    .unwrap()
                    .len()
            })
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_tss_scoring,
    bench_load_estimation,
    bench_risk_evaluation,
    bench_sqlite_cursor
);
criterion_main!(benches);
