use chrono::NaiveDate;
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::error::ValidationError;
use crate::models::{ActivityType, UserProfile, WorkoutCandidate, WorkoutEntry};

/// Nominal threshold used when the profile carries none; it cancels in the formula
pub const NOMINAL_FTP: u16 = 250;

/// TSS calculation result with the method used for the intensity factor
#[derive(Debug, Clone, PartialEq)]
pub struct TssResult {
    pub tss: Decimal,
    pub method: IntensityMethod,
    pub intensity_factor: Decimal,
}

/// Source of the intensity factor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntensityMethod {
    HeartRateZone, // avg_hr as a fraction of max HR
    Rpe,           // subjective effort
    ActivityDefault,
}

/// Core TSS calculation engine
pub struct TssCalculator;

impl TssCalculator {
    /// Calculate TSS for a workout candidate using the best available intensity signal
    pub fn calculate_tss(workout: &WorkoutCandidate, profile: &UserProfile) -> TssResult {
        let on = workout.timestamp.date_naive();
        let (intensity_factor, method) = Self::intensity_factor(workout, profile, on);
        let ftp = profile.ftp.unwrap_or(NOMINAL_FTP);
        let tss = Self::tss_from_intensity(workout.duration_min, intensity_factor, ftp);

        TssResult {
            tss,
            method,
            intensity_factor,
        }
    }

    /// Validate a candidate and turn it into an immutable entry with its TSS attached
    pub fn score(
        candidate: WorkoutCandidate,
        profile: &UserProfile,
    ) -> Result<WorkoutEntry, ValidationError> {
        candidate.validate()?;
        let result = Self::calculate_tss(&candidate, profile);

        Ok(WorkoutEntry {
            timestamp: candidate.timestamp,
            activity: candidate.activity,
            duration_min: candidate.duration_min,
            distance_km: candidate.distance_km,
            avg_hr: candidate.avg_hr,
            peak_hr: candidate.peak_hr,
            rpe: candidate.rpe,
            source: candidate.source,
            tss: result.tss,
            intensity_factor: result.intensity_factor,
            supersedes: candidate.supersedes,
            notes: candidate.notes,
        })
    }

    /// TSS = (duration_s × IF² × FTP) / (FTP × 3600) × 100, rounded to 2 dp
    pub fn tss_from_intensity(duration_min: Decimal, intensity_factor: Decimal, ftp: u16) -> Decimal {
        let ftp = Decimal::from(ftp.max(1));
        let duration_s = duration_min * dec!(60);
        let tss = (duration_s * intensity_factor * intensity_factor * ftp) / (ftp * dec!(3600))
            * dec!(100);

        tss.max(Decimal::ZERO)
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
    }

    /// Pick the intensity factor: heart rate zone, then RPE, then activity default
    pub fn intensity_factor(
        workout: &WorkoutCandidate,
        profile: &UserProfile,
        on: NaiveDate,
    ) -> (Decimal, IntensityMethod) {
        if let (Some(avg_hr), Some(max_hr)) = (workout.avg_hr, profile.effective_max_hr(on)) {
            if max_hr > 0 {
                let fraction = Decimal::from(avg_hr) / Decimal::from(max_hr);
                return (Self::zone_intensity(fraction), IntensityMethod::HeartRateZone);
            }
        }

        if let Some(rpe) = workout.rpe {
            return (dec!(0.5) + dec!(0.05) * Decimal::from(rpe), IntensityMethod::Rpe);
        }

        (
            Self::activity_default(workout.activity),
            IntensityMethod::ActivityDefault,
        )
    }

    /// Five-zone model on the fraction of max heart rate
    pub fn zone_intensity(fraction_of_max: Decimal) -> Decimal {
        if fraction_of_max < dec!(0.60) {
            dec!(0.55)
        } else if fraction_of_max < dec!(0.70) {
            dec!(0.65)
        } else if fraction_of_max < dec!(0.80) {
            dec!(0.75)
        } else if fraction_of_max < dec!(0.90) {
            dec!(0.85)
        } else {
            dec!(0.95)
        }
    }

    pub fn activity_default(activity: ActivityType) -> Decimal {
        match activity {
            ActivityType::Strength => dec!(0.60),
            ActivityType::Mobility => dec!(0.45),
            ActivityType::Rest => Decimal::ZERO,
            _ => dec!(0.70),
        }
    }
}
