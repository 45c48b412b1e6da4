use chrono::{DateTime, Days, NaiveDate, Utc};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::models::{ActivityType, LogEntry, RecoverySignal, SequencedEntry, WorkoutEntry};

/// Load estimator configuration with customizable time constants and readiness weights
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    /// Acute load time constant in days (default: 7)
    pub acute_time_constant: u16,

    /// Chronic load time constant in days (default: 28)
    pub chronic_time_constant: u16,

    /// Upper bound on how far back the daily fold starts
    pub max_lookback_days: u32,

    /// Trailing window summarized for the risk rules, in weeks
    pub history_weeks: u32,

    /// Below this chronic load the ratio is undefined
    pub chronic_floor: Decimal,

    /// Ratio ceiling once defined
    pub ratio_cap: Decimal,

    /// Ratio above which readiness is penalized
    pub ratio_upper: Decimal,
    pub ratio_weight: Decimal,

    pub optimal_sleep_hours: Decimal,
    pub sleep_weight: Decimal,

    /// Fatigue (1-10) above which readiness is penalized
    pub fatigue_threshold: u8,
    pub fatigue_weight: Decimal,

    /// Recovery signals older than this are ignored
    pub recovery_max_age_days: u32,
}

impl Default for LoadConfig {
    fn default() -> Self {
        LoadConfig {
            acute_time_constant: 7,
            chronic_time_constant: 28,
            max_lookback_days: 120,
            history_weeks: 4,
            chronic_floor: dec!(1),
            ratio_cap: dec!(5),
            ratio_upper: dec!(1.3),
            ratio_weight: dec!(50),
            optimal_sleep_hours: dec!(7.5),
            sleep_weight: dec!(10),
            fatigue_threshold: 4,
            fatigue_weight: dec!(9),
            recovery_max_age_days: 3,
        }
    }
}

impl LoadConfig {
    /// Days of log the estimator needs before `as_of`
    pub fn required_window_days(&self) -> u32 {
        self.max_lookback_days.max(self.history_weeks * 7)
    }
}

/// Readiness bands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessLevel {
    Peak,     // 90 and above
    Strong,   // 75 to 89
    Moderate, // 60 to 74
    Recover,  // 40 to 59
    Rest,     // below 40
}

impl ReadinessLevel {
    pub fn from_score(score: u8) -> Self {
        match score {
            90..=u8::MAX => ReadinessLevel::Peak,
            75..=89 => ReadinessLevel::Strong,
            60..=74 => ReadinessLevel::Moderate,
            40..=59 => ReadinessLevel::Recover,
            _ => ReadinessLevel::Rest,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ReadinessLevel::Peak => "PEAK",
            ReadinessLevel::Strong => "STRONG",
            ReadinessLevel::Moderate => "MODERATE",
            ReadinessLevel::Recover => "RECOVER",
            ReadinessLevel::Rest => "REST",
        }
    }

    /// Get training recommendation
    pub fn recommendation(&self) -> &'static str {
        match self {
            ReadinessLevel::Peak => "Good day for a hard session",
            ReadinessLevel::Strong => "Train as planned, intensity is fine",
            ReadinessLevel::Moderate => "Keep it aerobic or focus on technique",
            ReadinessLevel::Recover => "Easy movement or active recovery only",
            ReadinessLevel::Rest => "Take a full rest day",
        }
    }
}

/// One non-superseded workout inside the history window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub date: NaiveDate,
    pub activity: ActivityType,
    pub duration_min: Decimal,
    pub distance_km: Option<Decimal>,
    pub tss: Decimal,
}

/// Trailing-window session summary consumed by the risk rules
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub window_days: u32,
    pub sessions: Vec<SessionSummary>,
    pub weekly_avg_duration_min: Decimal,
    /// None when no session in the window carries a distance
    pub weekly_avg_distance_km: Option<Decimal>,
}

impl TrainingHistory {
    /// Sessions at least `min_duration` minutes long
    pub fn qualifying_sessions(&self, min_duration: u32) -> usize {
        let min = Decimal::from(min_duration);
        self.sessions.iter().filter(|s| s.duration_min >= min).count()
    }
}

/// Derived load state of one user at one instant; never stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadState {
    pub as_of: DateTime<Utc>,
    pub acute_load: Decimal,
    pub chronic_load: Decimal,
    /// acute / chronic, None while chronic load is below the floor
    pub ratio: Option<Decimal>,
    pub readiness_score: u8,
    pub readiness_level: ReadinessLevel,
    /// Recovery signal the readiness score used, if any
    pub recovery: Option<RecoverySignal>,
    pub history: TrainingHistory,
}

impl LoadState {
    /// State of a user with no log at all
    pub fn empty(as_of: DateTime<Utc>) -> Self {
        LoadState {
            as_of,
            acute_load: Decimal::ZERO,
            chronic_load: Decimal::ZERO,
            ratio: None,
            readiness_score: 100,
            readiness_level: ReadinessLevel::Peak,
            recovery: None,
            history: TrainingHistory::default(),
        }
    }
}

/// Core load estimation engine
///
/// Pure: the same entries and `as_of` always give the same state. Entries
/// may arrive in any order; only their timestamps and sequences matter.
pub struct LoadEstimator {
    config: LoadConfig,
}

impl LoadEstimator {
    /// Create new estimator with default configuration
    pub fn new() -> Self {
        LoadEstimator {
            config: LoadConfig::default(),
        }
    }

    /// Create new estimator with custom configuration
    pub fn with_config(config: LoadConfig) -> Self {
        LoadEstimator { config }
    }

    pub fn config(&self) -> &LoadConfig {
        &self.config
    }

    /// Compute the load state as of `as_of` from a user's log entries
    pub fn estimate(&self, entries: &[SequencedEntry], as_of: DateTime<Utc>) -> LoadState {
        let visible: Vec<&SequencedEntry> = entries
            .iter()
            .filter(|e| e.entry.timestamp() <= as_of)
            .collect();
        let superseded = Self::superseded_sequences(&visible);
        let live: Vec<&SequencedEntry> = visible
            .into_iter()
            .filter(|e| !superseded.contains(&e.sequence))
            .collect();

        let workouts: Vec<&WorkoutEntry> = live
            .iter()
            .filter_map(|e| match &e.entry {
                LogEntry::Workout(w) => Some(w),
                LogEntry::Recovery(_) => None,
            })
            .collect();

        let end_date = as_of.date_naive();
        let daily_tss = Self::aggregate_daily_tss(&workouts);
        let (acute_load, chronic_load) = self.fold_loads(&daily_tss, end_date);
        let ratio = self.ratio(acute_load, chronic_load);
        let recovery = self.latest_recovery(&live, as_of);
        let readiness_score = self.readiness(ratio, recovery.as_ref());
        let history = self.history(&workouts, end_date);

        LoadState {
            as_of,
            acute_load,
            chronic_load,
            ratio,
            readiness_score,
            readiness_level: ReadinessLevel::from_score(readiness_score),
            recovery,
            history,
        }
    }

    /// Sequence positions replaced by a later correction
    fn superseded_sequences(entries: &[&SequencedEntry]) -> HashSet<u64> {
        entries.iter().filter_map(|e| e.entry.supersedes()).collect()
    }

    /// Aggregate daily TSS by UTC date
    pub fn aggregate_daily_tss(workouts: &[&WorkoutEntry]) -> BTreeMap<NaiveDate, Decimal> {
        let mut daily_tss: BTreeMap<NaiveDate, Decimal> = BTreeMap::new();
        for workout in workouts {
            *daily_tss
                .entry(workout.timestamp.date_naive())
                .or_insert(Decimal::ZERO) += workout.tss;
        }
        daily_tss
    }

    /// Fold daily TSS into (acute, chronic) loads ending on `end_date`
    pub fn fold_loads(
        &self,
        daily_tss: &BTreeMap<NaiveDate, Decimal>,
        end_date: NaiveDate,
    ) -> (Decimal, Decimal) {
        let first_date = match daily_tss.keys().next() {
            Some(first) if *first <= end_date => *first,
            _ => return (Decimal::ZERO, Decimal::ZERO),
        };
        let lookback_start = end_date
            .checked_sub_days(Days::new(u64::from(self.config.max_lookback_days)))
            .unwrap_or(first_date);
        let mut current_date = first_date.max(lookback_start);

        let acute_factor = Decimal::ONE / Decimal::from(self.config.acute_time_constant.max(1));
        let chronic_factor =
            Decimal::ONE / Decimal::from(self.config.chronic_time_constant.max(1));

        let mut acute = Decimal::ZERO;
        let mut chronic = Decimal::ZERO;

        while current_date <= end_date {
            let tss = daily_tss.get(&current_date).copied().unwrap_or(Decimal::ZERO);

            // L_today = L_yesterday + (TSS_today - L_yesterday) / τ
            acute += (tss - acute) * acute_factor;
            chronic += (tss - chronic) * chronic_factor;

            current_date = match current_date.succ_opt() {
                Some(next) => next,
                None => break,
            };
        }

        (acute.round_dp(2), chronic.round_dp(2))
    }

    /// Acute:chronic ratio, undefined below the chronic floor and capped otherwise
    pub fn ratio(&self, acute: Decimal, chronic: Decimal) -> Option<Decimal> {
        if chronic < self.config.chronic_floor || chronic <= Decimal::ZERO {
            return None;
        }
        Some((acute / chronic).min(self.config.ratio_cap).round_dp(2))
    }

    /// Most recent recovery signal within the freshness window
    fn latest_recovery(
        &self,
        entries: &[&SequencedEntry],
        as_of: DateTime<Utc>,
    ) -> Option<RecoverySignal> {
        let oldest = as_of - chrono::Duration::days(i64::from(self.config.recovery_max_age_days));
        entries
            .iter()
            .filter_map(|e| match &e.entry {
                LogEntry::Recovery(r) if r.timestamp >= oldest => Some((r.timestamp, e.sequence, r)),
                _ => None,
            })
            .max_by_key(|(timestamp, sequence, _)| (*timestamp, *sequence))
            .map(|(_, _, r)| r.clone())
    }

    /// Readiness 0-100: 100 minus ratio, sleep and fatigue penalties
    pub fn readiness(&self, ratio: Option<Decimal>, recovery: Option<&RecoverySignal>) -> u8 {
        let cfg = &self.config;
        let mut score = dec!(100);

        if let Some(ratio) = ratio {
            if ratio > cfg.ratio_upper {
                score -= (ratio - cfg.ratio_upper) * cfg.ratio_weight;
            }
        }

        if let Some(signal) = recovery {
            if let Some(sleep) = signal.sleep_hours {
                score -= (cfg.optimal_sleep_hours - sleep).max(Decimal::ZERO) * cfg.sleep_weight;
            }
            if let Some(fatigue) = signal.fatigue {
                let excess = i32::from(fatigue) - i32::from(cfg.fatigue_threshold);
                score -= Decimal::from(excess.max(0)) * cfg.fatigue_weight;
            }
        }

        score
            .clamp(Decimal::ZERO, dec!(100))
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            .to_u8()
            .unwrap_or(0)
    }

    /// Summarize the trailing history window ending on `end_date`
    fn history(&self, workouts: &[&WorkoutEntry], end_date: NaiveDate) -> TrainingHistory {
        let weeks = self.config.history_weeks.max(1);
        let window_days = weeks * 7;
        let window_start = end_date
            .checked_sub_days(Days::new(u64::from(window_days)))
            .unwrap_or(NaiveDate::MIN);

        let mut sessions: Vec<SessionSummary> = workouts
            .iter()
            .filter(|w| {
                let date = w.timestamp.date_naive();
                date > window_start && date <= end_date
            })
            .map(|w| SessionSummary {
                date: w.timestamp.date_naive(),
                activity: w.activity,
                duration_min: w.duration_min,
                distance_km: w.distance_km,
                tss: w.tss,
            })
            .collect();
        sessions.sort_by(|a, b| {
            (a.date, a.duration_min, a.tss).cmp(&(b.date, b.duration_min, b.tss))
        });

        let weeks = Decimal::from(weeks);
        let total_duration: Decimal = sessions.iter().map(|s| s.duration_min).sum();
        let distances: Vec<Decimal> = sessions.iter().filter_map(|s| s.distance_km).collect();
        let weekly_avg_distance_km = if distances.is_empty() {
            None
        } else {
            Some((distances.iter().sum::<Decimal>() / weeks).round_dp(2))
        };

        TrainingHistory {
            window_days,
            weekly_avg_duration_min: (total_duration / weeks).round_dp(2),
            weekly_avg_distance_km,
            sessions,
        }
    }
}

impl Default for LoadEstimator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntrySource;
    use chrono::TimeZone;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, day, hour, 0, 0).unwrap()
    }

    fn create_test_workout(sequence: u64, timestamp: DateTime<Utc>, tss: Decimal) -> SequencedEntry {
        SequencedEntry {
            user_id: "u1".to_string(),
            sequence,
            entry: LogEntry::Workout(WorkoutEntry {
                timestamp,
                activity: ActivityType::Running,
                duration_min: dec!(45),
                distance_km: Some(dec!(8)),
                avg_hr: None,
                peak_hr: None,
                rpe: Some(5),
                source: EntrySource::Manual,
                tss,
                intensity_factor: dec!(0.75),
                supersedes: None,
                notes: None,
            }),
        }
    }

    fn create_test_recovery(
        sequence: u64,
        timestamp: DateTime<Utc>,
        sleep: Option<Decimal>,
        fatigue: Option<u8>,
    ) -> SequencedEntry {
        SequencedEntry {
            user_id: "u1".to_string(),
            sequence,
            entry: LogEntry::Recovery(RecoverySignal {
                timestamp,
                sleep_hours: sleep,
                sleep_quality: None,
                fatigue,
                supersedes: None,
                notes: None,
            }),
        }
    }

    #[test]
    fn test_empty_log_is_neutral() {
        let estimator = LoadEstimator::new();
        let state = estimator.estimate(&[], at(20, 12));

        assert_eq!(state.acute_load, Decimal::ZERO);
        assert_eq!(state.chronic_load, Decimal::ZERO);
        assert_eq!(state.ratio, None);
        assert_eq!(state.readiness_score, 100);
        assert_eq!(state.readiness_level, ReadinessLevel::Peak);
    }

    #[test]
    fn test_single_spike_acute_faster_than_chronic() {
        let estimator = LoadEstimator::new();
        let entries = vec![create_test_workout(1, at(20, 7), dec!(70))];
        let state = estimator.estimate(&entries, at(20, 20));

        assert_eq!(state.acute_load, dec!(10));
        assert_eq!(state.chronic_load, dec!(2.5));
        assert_eq!(state.ratio, Some(dec!(4)));
    }

    #[test]
    fn test_ratio_floor_and_cap() {
        let estimator = LoadEstimator::new();
        assert_eq!(estimator.ratio(dec!(5), dec!(0.5)), None);
        assert_eq!(estimator.ratio(dec!(60), dec!(10)), Some(dec!(5)));
        assert_eq!(estimator.ratio(dec!(12), dec!(10)), Some(dec!(1.2)));
    }

    #[test]
    fn test_entries_after_as_of_are_ignored() {
        let estimator = LoadEstimator::new();
        let entries = vec![
            create_test_workout(1, at(10, 7), dec!(50)),
            create_test_workout(2, at(25, 7), dec!(500)),
        ];
        let before = estimator.estimate(&entries[..1], at(20, 12));
        let with_future = estimator.estimate(&entries, at(20, 12));
        assert_eq!(before, with_future);
    }

    #[test]
    fn test_superseded_entry_excluded() {
        let estimator = LoadEstimator::new();
        let mut correction = create_test_workout(2, at(20, 7), dec!(40));
        if let LogEntry::Workout(w) = &mut correction.entry {
            w.supersedes = Some(1);
        }
        let entries = vec![create_test_workout(1, at(20, 7), dec!(400)), correction];
        let state = estimator.estimate(&entries, at(20, 12));

        let expected = estimator.estimate(&[create_test_workout(3, at(20, 7), dec!(40))], at(20, 12));
        assert_eq!(state.acute_load, expected.acute_load);
        assert_eq!(state.history.sessions.len(), 1);
    }

    #[test]
    fn test_readiness_penalties() {
        let estimator = LoadEstimator::new();
        let signal = RecoverySignal {
            timestamp: at(20, 6),
            sleep_hours: Some(dec!(5.5)),
            sleep_quality: None,
            fatigue: Some(7),
            supersedes: None,
            notes: None,
        };
        // 100 - 2h*10 - 3*9
        assert_eq!(estimator.readiness(None, Some(&signal)), 53);
        // ratio 1.5 adds 0.2*50
        assert_eq!(estimator.readiness(Some(dec!(1.5)), Some(&signal)), 43);
        assert_eq!(estimator.readiness(Some(dec!(5)), Some(&signal)), 0);
        assert_eq!(estimator.readiness(Some(dec!(1.1)), None), 100);
    }

    #[test]
    fn test_stale_recovery_is_neutral() {
        let estimator = LoadEstimator::new();
        let entries = vec![create_test_recovery(1, at(10, 6), Some(dec!(3)), Some(10))];
        let state = estimator.estimate(&entries, at(20, 12));
        assert!(state.recovery.is_none());
        assert_eq!(state.readiness_score, 100);

        let fresh = vec![create_test_recovery(1, at(20, 6), Some(dec!(6.5)), None)];
        let state = estimator.estimate(&fresh, at(20, 12));
        assert_eq!(state.readiness_score, 90);
        assert_eq!(state.readiness_level, ReadinessLevel::Peak);
    }

    #[test]
    fn test_history_weekly_averages() {
        let estimator = LoadEstimator::new();
        let entries: Vec<SequencedEntry> = (0..8u32)
            .map(|i| create_test_workout(u64::from(i) + 1, at(1 + i * 3, 7), dec!(50)))
            .collect();
        let state = estimator.estimate(&entries, at(28, 12));

        // 8 x 45 min over 4 weeks, 8 x 8 km
        assert_eq!(state.history.sessions.len(), 8);
        assert_eq!(state.history.weekly_avg_duration_min, dec!(90));
        assert_eq!(state.history.weekly_avg_distance_km, Some(dec!(16)));
        assert_eq!(state.history.qualifying_sessions(30), 8);
        assert_eq!(state.history.qualifying_sessions(60), 0);
    }

    #[test]
    fn test_readiness_levels() {
        assert_eq!(ReadinessLevel::from_score(95), ReadinessLevel::Peak);
        assert_eq!(ReadinessLevel::from_score(75), ReadinessLevel::Strong);
        assert_eq!(ReadinessLevel::from_score(60), ReadinessLevel::Moderate);
        assert_eq!(ReadinessLevel::from_score(40), ReadinessLevel::Recover);
        assert_eq!(ReadinessLevel::from_score(39), ReadinessLevel::Rest);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn test_chronic_invariant_to_same_timestamp_order(
                values in prop::collection::vec(0u32..20_000, 1..12),
                rotate in 0usize..12,
            ) {
                let estimator = LoadEstimator::new();
                let entries: Vec<SequencedEntry> = values
                    .iter()
                    .enumerate()
                    .map(|(i, v)| create_test_workout(i as u64 + 1, at(15, 9), Decimal::new(i64::from(*v), 2)))
                    .collect();
                let mut shuffled = entries.clone();
                let len = shuffled.len();
                shuffled.rotate_left(rotate % len);
                shuffled.reverse();

                let a = estimator.estimate(&entries, at(20, 12));
                let b = estimator.estimate(&shuffled, at(20, 12));
                prop_assert_eq!(a.chronic_load, b.chronic_load);
                prop_assert_eq!(a.acute_load, b.acute_load);
                prop_assert_eq!(a, b);
            }

            #[test]
            fn test_acute_reacts_faster_to_spike(base in 0u32..100, spike in 150u32..600) {
                let estimator = LoadEstimator::new();
                let mut entries: Vec<SequencedEntry> = (1..=14u32)
                    .map(|d| create_test_workout(u64::from(d), at(d, 7), Decimal::from(base)))
                    .collect();
                let before = estimator.estimate(&entries, at(14, 20));
                entries.push(create_test_workout(15, at(15, 7), Decimal::from(spike)));
                let after = estimator.estimate(&entries, at(15, 20));

                prop_assert!(after.acute_load - before.acute_load > after.chronic_load - before.chronic_load);
            }
        }
    }
}
