use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Datelike, Days, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use colored::*;
use rust_decimal::Decimal;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tabled::{settings::Style, Table, Tabled};
use uuid::Uuid;

use coachrs::config::AppConfig;
use coachrs::database::SqliteStore;
use coachrs::error::CoachError;
use coachrs::generator::TemplateGenerator;
use coachrs::load::LoadState;
use coachrs::logging::{init_logging, LogLevel};
use coachrs::models::{
    ActivityType, BodyRegion, Decision, EntrySource, ExperienceLevel, Goal, InjuryAnnotation,
    LogEntry, PlanProposal, PlanState, RecoveryCandidate, SequencedEntry, UserProfile,
    WorkoutCandidate,
};
use coachrs::orchestrator::{PlanOrchestrator, PlanRequest};
use coachrs::store::LogStore;

/// coachrs - Risk-gated training plans
///
/// Logs workouts and recovery, tracks acute and chronic training load, and
/// admits weekly plans only after a safety review. Flagged plans wait for
/// an explicit decision before they become active.
#[derive(Parser)]
#[command(name = "coachrs")]
#[command(author = "coachrs contributors")]
#[command(version)]
#[command(about = "Risk-gated training plan CLI", long_about = None)]
struct Cli {
    /// Sets a custom config file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// User the command acts for
    #[arg(short, long, default_value = "default", global = true)]
    user: String,

    /// Increase verbosity of output
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show or edit the user profile
    Profile {
        #[command(subcommand)]
        action: ProfileAction,
    },

    /// Record a completed workout
    LogWorkout {
        /// Activity type (run, ride, swim, strength, ...)
        #[arg(short, long)]
        activity: ActivityType,

        /// Duration in minutes
        #[arg(short, long)]
        duration: Decimal,

        /// Distance in kilometres
        #[arg(long)]
        distance: Option<Decimal>,

        #[arg(long)]
        avg_hr: Option<u16>,

        #[arg(long)]
        peak_hr: Option<u16>,

        /// Perceived exertion, 1-10
        #[arg(long)]
        rpe: Option<u8>,

        /// When the workout happened (RFC 3339, default now)
        #[arg(long)]
        at: Option<DateTime<Utc>>,

        /// Sequence number of an earlier entry this one corrects
        #[arg(long)]
        corrects: Option<u64>,

        #[arg(long)]
        notes: Option<String>,
    },

    /// Record sleep and fatigue
    LogRecovery {
        /// Hours slept
        #[arg(short, long)]
        sleep: Option<Decimal>,

        /// Sleep quality, 1-10
        #[arg(short, long)]
        quality: Option<u8>,

        /// Fatigue, 1-10
        #[arg(short, long)]
        fatigue: Option<u8>,

        #[arg(long)]
        at: Option<DateTime<Utc>>,

        #[arg(long)]
        corrects: Option<u64>,

        #[arg(long)]
        notes: Option<String>,
    },

    /// Show load, readiness and plan state
    Status {
        /// Evaluate as of this instant (default now)
        #[arg(long)]
        at: Option<DateTime<Utc>>,

        /// Print JSON instead of tables
        #[arg(long)]
        json: bool,
    },

    /// Request a plan for the coming week
    Plan {
        /// Goal override (defaults to the profile goal)
        #[arg(short, long)]
        goal: Option<Goal>,

        /// First day of the plan (default: next Monday)
        #[arg(short, long)]
        week_start: Option<NaiveDate>,

        /// Free-text note passed to the generator
        #[arg(short, long)]
        note: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Accept or reject a plan waiting for approval
    Decide {
        /// Plan id
        plan_id: Uuid,

        /// Accept the reported risk
        #[arg(long, conflicts_with = "reject", required_unless_present = "reject")]
        accept: bool,

        #[arg(long)]
        reject: bool,

        /// Who decides (default: user:<id>)
        #[arg(long)]
        actor: Option<String>,

        #[arg(long)]
        note: Option<String>,
    },

    /// Reject proposals that waited too long for a decision
    Expire,

    /// List logged entries
    History {
        /// Days to look back
        #[arg(short, long, default_value = "28")]
        days: u64,
    },

    /// Export logged entries to CSV
    Export {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,

        #[arg(short, long, default_value = "365")]
        days: u64,
    },

    /// Configure application settings
    Config {
        /// List all configuration options
        #[arg(short, long)]
        list: bool,

        /// Set a configuration value (key=value)
        #[arg(short, long)]
        set: Option<String>,

        /// Get a configuration value
        #[arg(short, long)]
        get: Option<String>,

        /// Write a default config file
        #[arg(long)]
        init: bool,
    },
}

#[derive(Subcommand)]
enum ProfileAction {
    /// Print the stored profile
    Show,

    /// Create or update profile fields
    Set {
        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        age: Option<u8>,

        /// Date of birth (YYYY-MM-DD)
        #[arg(long)]
        dob: Option<NaiveDate>,

        /// Measured maximum heart rate
        #[arg(long)]
        max_hr: Option<u16>,

        #[arg(long)]
        ftp: Option<u16>,

        #[arg(long)]
        goal: Option<Goal>,

        #[arg(long)]
        experience: Option<ExperienceLevel>,

        /// Weekly ceiling in minutes
        #[arg(long)]
        ceiling_min: Option<u32>,

        /// Weekly ceiling in kilometres
        #[arg(long)]
        ceiling_km: Option<Decimal>,
    },

    /// Record an injury
    Injury {
        region: BodyRegion,
        note: String,

        /// Date noted (default today)
        #[arg(long)]
        since: Option<NaiveDate>,
    },

    /// Mark open injuries in a region as resolved
    Resolve {
        region: BodyRegion,

        #[arg(long)]
        on: Option<NaiveDate>,
    },
}

#[derive(Tabled)]
struct SessionRow {
    #[tabled(rename = "Day")]
    day: String,
    #[tabled(rename = "Activity")]
    activity: String,
    #[tabled(rename = "Intensity")]
    intensity: String,
    #[tabled(rename = "Minutes")]
    minutes: u32,
    #[tabled(rename = "Km")]
    distance: String,
    #[tabled(rename = "Description")]
    description: String,
}

#[derive(Tabled)]
struct ViolationRow {
    #[tabled(rename = "Rule")]
    rule: String,
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "Measured")]
    measured: String,
    #[tabled(rename = "Threshold")]
    threshold: String,
    #[tabled(rename = "Detail")]
    detail: String,
}

#[derive(Tabled)]
struct EntryRow {
    #[tabled(rename = "#")]
    sequence: u64,
    #[tabled(rename = "When")]
    when: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Summary")]
    summary: String,
    #[tabled(rename = "TSS")]
    tss: String,
}

/// One CSV line per logged entry
#[derive(Serialize)]
struct ExportRow {
    sequence: u64,
    timestamp: DateTime<Utc>,
    kind: &'static str,
    activity: Option<String>,
    duration_min: Option<Decimal>,
    distance_km: Option<Decimal>,
    avg_hr: Option<u16>,
    rpe: Option<u8>,
    tss: Option<Decimal>,
    intensity_factor: Option<Decimal>,
    sleep_hours: Option<Decimal>,
    sleep_quality: Option<u8>,
    fatigue: Option<u8>,
    supersedes: Option<u64>,
}

impl From<&SequencedEntry> for ExportRow {
    fn from(sequenced: &SequencedEntry) -> Self {
        let mut row = ExportRow {
            sequence: sequenced.sequence,
            timestamp: sequenced.entry.timestamp(),
            kind: sequenced.entry.kind(),
            activity: None,
            duration_min: None,
            distance_km: None,
            avg_hr: None,
            rpe: None,
            tss: None,
            intensity_factor: None,
            sleep_hours: None,
            sleep_quality: None,
            fatigue: None,
            supersedes: sequenced.entry.supersedes(),
        };

        match &sequenced.entry {
            LogEntry::Workout(w) => {
                row.activity = Some(w.activity.to_string());
                row.duration_min = Some(w.duration_min);
                row.distance_km = w.distance_km;
                row.avg_hr = w.avg_hr;
                row.rpe = w.rpe;
                row.tss = Some(w.tss);
                row.intensity_factor = Some(w.intensity_factor);
            }
            LogEntry::Recovery(r) => {
                row.sleep_hours = r.sleep_hours;
                row.sleep_quality = r.sleep_quality;
                row.fatigue = r.fatigue;
            }
        }
        row
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        match err.downcast_ref::<CoachError>() {
            Some(coach_err) => {
                eprintln!("{} {}", "Error:".red().bold(), coach_err.user_message());
                if coach_err.is_retryable() {
                    eprintln!("{}", "The operation can be retried.".dimmed());
                }
            }
            None => eprintln!("{} {:#}", "Error:".red().bold(), err),
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = AppConfig::load_or_default(cli.config.as_deref())?;

    match cli.verbose {
        0 => {}
        1 => config.logging.level = LogLevel::Info,
        2 => config.logging.level = LogLevel::Debug,
        _ => config.logging.level = LogLevel::Trace,
    }
    init_logging(&config.logging)?;

    if let Commands::Config { list, set, get, init } = &cli.command {
        return run_config(&mut config, cli.config.as_deref(), *list, set.as_deref(), get.as_deref(), *init);
    }

    let db_path = config.database_path();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create data directory: {:?}", parent))?;
    }
    let store = Arc::new(SqliteStore::open(&db_path)?);
    let orchestrator = PlanOrchestrator::with_config(
        store.clone(),
        Arc::new(TemplateGenerator::new()),
        config.load.clone(),
        config.risk.clone(),
        config.admission.clone(),
        config.orchestrator.clone(),
    );
    let user = cli.user.as_str();
    let now = Utc::now();

    match cli.command {
        Commands::Profile { action } => run_profile(&orchestrator, user, action, now).await?,

        Commands::LogWorkout {
            activity,
            duration,
            distance,
            avg_hr,
            peak_hr,
            rpe,
            at,
            corrects,
            notes,
        } => {
            let candidate = WorkoutCandidate {
                timestamp: at.unwrap_or(now),
                activity,
                duration_min: duration,
                distance_km: distance,
                avg_hr,
                peak_hr,
                rpe,
                source: EntrySource::Manual,
                supersedes: corrects,
                notes,
            };
            let logged = orchestrator.log_workout(user, candidate).await?;
            if let LogEntry::Workout(w) = &logged.entry {
                println!(
                    "{} #{} {} {} min, TSS {} (IF {})",
                    "✓ Logged".green().bold(),
                    logged.sequence,
                    w.activity,
                    w.duration_min,
                    w.tss,
                    w.intensity_factor
                );
            }
        }

        Commands::LogRecovery {
            sleep,
            quality,
            fatigue,
            at,
            corrects,
            notes,
        } => {
            let candidate = RecoveryCandidate {
                timestamp: at.unwrap_or(now),
                sleep_hours: sleep,
                sleep_quality: quality,
                fatigue,
                supersedes: corrects,
                notes,
            };
            let logged = orchestrator.log_recovery(user, candidate).await?;
            println!("{} #{} recovery", "✓ Logged".green().bold(), logged.sequence);
        }

        Commands::Status { at, json } => {
            let report = orchestrator.status(user, at.unwrap_or(now)).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_load(&report.load);
                match &report.active_plan {
                    Some(plan) => {
                        println!("\n{}", "Active plan".bold());
                        print_plan(plan);
                    }
                    None => println!("\n{}", "No active plan".dimmed()),
                }
                for plan in &report.pending {
                    println!("\n{}", "Awaiting decision".yellow().bold());
                    print_plan(plan);
                }
            }
        }

        Commands::Plan {
            goal,
            week_start,
            note,
            json,
        } => {
            let request = PlanRequest {
                goal,
                week_start: week_start.unwrap_or_else(|| next_monday(now.date_naive())),
                note,
            };
            let plan = orchestrator.request_plan(user, request, now).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&plan)?);
            } else {
                print_plan(&plan);
                if plan.state == PlanState::PendingApproval {
                    println!(
                        "\nDecide with: coachrs decide {} --accept | --reject",
                        plan.id.to_string().bold()
                    );
                }
            }
        }

        Commands::Decide {
            plan_id,
            accept,
            reject: _,
            actor,
            note,
        } => {
            let actor = actor.unwrap_or_else(|| format!("user:{}", user));
            let mut decision = if accept {
                Decision::accept_risk(actor, now)
            } else {
                Decision::reject(actor, now)
            };
            decision.note = note;

            let plan = orchestrator.decide(user, plan_id, decision).await?;
            print_plan(&plan);
        }

        Commands::Expire => {
            let expired = orchestrator.expire_pending(user, now).await?;
            if expired.is_empty() {
                println!("{}", "Nothing to expire".dimmed());
            }
            for plan in expired {
                println!("{} {}", "Expired".yellow().bold(), plan.id);
            }
        }

        Commands::History { days } => {
            let entries = read_entries(&store, user, days, now)?;
            let rows: Vec<EntryRow> = entries.iter().map(entry_row).collect();
            if rows.is_empty() {
                println!("{}", "No entries".dimmed());
            } else {
                println!("{}", Table::new(rows).with(Style::rounded()));
            }
        }

        Commands::Export { output, days } => {
            let entries = read_entries(&store, user, days, now)?;
            let mut writer = csv::Writer::from_path(&output)
                .with_context(|| format!("Failed to create {:?}", output))?;
            for entry in &entries {
                writer.serialize(ExportRow::from(entry))?;
            }
            writer.flush()?;
            println!(
                "{} {} entries to {:?}",
                "✓ Exported".green().bold(),
                entries.len(),
                output
            );
        }

        Commands::Config { .. } => bail!("config commands do not use the store"),
    }

    Ok(())
}

fn run_config(
    config: &mut AppConfig,
    path: Option<&Path>,
    list: bool,
    set: Option<&str>,
    get: Option<&str>,
    init: bool,
) -> Result<()> {
    if init {
        config.save(path)?;
        println!("{}", "✓ Configuration written".green());
    } else if let Some(key_value) = set {
        let (key, value) = key_value
            .split_once('=')
            .ok_or_else(|| anyhow!("Expected key=value, got '{}'", key_value))?;
        config.set_value(key.trim(), value.trim())?;
        config.save(path)?;
        println!("{} {} = {}", "✓ Set".green(), key.trim(), value.trim());
    } else if let Some(key) = get {
        match config.get_value(key)? {
            Some(value) => println!("{}", value),
            None => println!("{}", "(unset)".dimmed()),
        }
    } else if list {
        print!("{}", toml::to_string_pretty(config)?);
    } else {
        bail!("Use --list, --get, --set or --init");
    }
    Ok(())
}

async fn run_profile(
    orchestrator: &PlanOrchestrator,
    user: &str,
    action: ProfileAction,
    now: DateTime<Utc>,
) -> Result<()> {
    let existing = orchestrator.store().get_profile(user)?;

    match action {
        ProfileAction::Show => match existing {
            Some(profile) => println!("{}", serde_json::to_string_pretty(&profile)?),
            None => println!("{}", "No profile yet, create one with `profile set`".dimmed()),
        },

        ProfileAction::Set {
            name,
            age,
            dob,
            max_hr,
            ftp,
            goal,
            experience,
            ceiling_min,
            ceiling_km,
        } => {
            let mut profile = existing.unwrap_or_else(|| UserProfile::new(user, user));
            if let Some(name) = name {
                profile.name = name;
            }
            if age.is_some() {
                profile.age = age;
            }
            if dob.is_some() {
                profile.date_of_birth = dob;
            }
            if max_hr.is_some() {
                profile.max_hr = max_hr;
            }
            if ftp.is_some() {
                profile.ftp = ftp;
            }
            if let Some(goal) = goal {
                profile.goal = goal;
            }
            if let Some(experience) = experience {
                profile.experience = experience;
            }
            if ceiling_min.is_some() || ceiling_km.is_some() {
                let mut ceiling = profile.weekly_volume_ceiling.take().unwrap_or_default();
                if ceiling_min.is_some() {
                    ceiling.duration_min = ceiling_min;
                }
                if ceiling_km.is_some() {
                    ceiling.distance_km = ceiling_km;
                }
                profile.weekly_volume_ceiling = Some(ceiling);
            }
            profile.updated_at = now;
            orchestrator.put_profile(profile).await?;
            println!("{}", "✓ Profile saved".green());
        }

        ProfileAction::Injury {
            region,
            note,
            since,
        } => {
            let mut profile = existing.ok_or_else(|| anyhow!("No profile for '{}'", user))?;
            profile.injuries.push(InjuryAnnotation {
                note,
                region,
                noted_on: since.unwrap_or_else(|| now.date_naive()),
                resolved_on: None,
            });
            profile.updated_at = now;
            orchestrator.put_profile(profile).await?;
            println!("{} {}", "✓ Injury recorded:".green(), region.as_str());
        }

        ProfileAction::Resolve { region, on } => {
            let mut profile = existing.ok_or_else(|| anyhow!("No profile for '{}'", user))?;
            let on = on.unwrap_or_else(|| now.date_naive());
            let mut resolved = 0;
            for injury in profile
                .injuries
                .iter_mut()
                .filter(|i| i.region == region && i.resolved_on.is_none())
            {
                injury.resolved_on = Some(on);
                resolved += 1;
            }
            if resolved == 0 {
                bail!("No open injury for region {}", region.as_str());
            }
            profile.updated_at = now;
            orchestrator.put_profile(profile).await?;
            println!("{} {} ({})", "✓ Resolved".green(), region.as_str(), resolved);
        }
    }
    Ok(())
}

fn read_entries(
    store: &SqliteStore,
    user: &str,
    days: u64,
    now: DateTime<Utc>,
) -> Result<Vec<SequencedEntry>> {
    let since = now
        .checked_sub_days(Days::new(days))
        .ok_or_else(|| anyhow!("Look-back of {} days is out of range", days))?;
    // Include entries stamped at exactly `now`
    let until = now + chrono::Duration::seconds(1);
    Ok(store.query(user, since, until)?.collect_entries()?)
}

fn next_monday(today: NaiveDate) -> NaiveDate {
    let offset = (7 - today.weekday().num_days_from_monday()) % 7;
    today + Days::new(u64::from(offset))
}

fn entry_row(sequenced: &SequencedEntry) -> EntryRow {
    let when = sequenced.entry.timestamp().format("%Y-%m-%d %H:%M").to_string();
    let (summary, tss) = match &sequenced.entry {
        LogEntry::Workout(w) => {
            let distance = w
                .distance_km
                .map(|d| format!(", {} km", d))
                .unwrap_or_default();
            (
                format!("{} {} min{}", w.activity, w.duration_min, distance),
                w.tss.to_string(),
            )
        }
        LogEntry::Recovery(r) => {
            let mut parts = Vec::new();
            if let Some(sleep) = r.sleep_hours {
                parts.push(format!("sleep {}h", sleep));
            }
            if let Some(fatigue) = r.fatigue {
                parts.push(format!("fatigue {}", fatigue));
            }
            (parts.join(", "), String::new())
        }
    };
    let summary = match sequenced.entry.supersedes() {
        Some(seq) => format!("{} (corrects #{})", summary, seq),
        None => summary,
    };

    EntryRow {
        sequence: sequenced.sequence,
        when,
        kind: sequenced.entry.kind().to_string(),
        summary,
        tss,
    }
}

fn print_load(load: &LoadState) {
    let ratio = load
        .ratio
        .map(|r| r.to_string())
        .unwrap_or_else(|| "n/a".to_string());
    let level = match load.readiness_score {
        75..=100 => load.readiness_level.label().green(),
        40..=74 => load.readiness_level.label().yellow(),
        _ => load.readiness_level.label().red(),
    };

    println!("{}", "Training load".bold());
    println!("  Acute:     {}", load.acute_load);
    println!("  Chronic:   {}", load.chronic_load);
    println!("  Ratio:     {}", ratio);
    println!("  Readiness: {} {}", load.readiness_score, level);
    println!("  {}", load.readiness_level.recommendation().dimmed());
}

fn print_plan(plan: &PlanProposal) {
    let state = match plan.state {
        PlanState::Approved => plan.state.as_str().green().bold(),
        PlanState::PendingApproval => plan.state.as_str().yellow().bold(),
        PlanState::Rejected => plan.state.as_str().red().bold(),
        _ => plan.state.as_str().normal(),
    };
    println!(
        "Plan {} ({}, week of {}) {}",
        plan.id, plan.goal.as_str(), plan.week_start, state
    );

    let sessions: Vec<SessionRow> = plan
        .sessions
        .iter()
        .map(|s| SessionRow {
            day: (plan.week_start + Days::new(u64::from(s.day_offset)))
                .format("%a %d")
                .to_string(),
            activity: s.activity.to_string(),
            intensity: s.intensity.as_str().to_string(),
            minutes: s.duration_min,
            distance: s.distance_km.map(|d| d.to_string()).unwrap_or_default(),
            description: s.description.clone(),
        })
        .collect();
    println!("{}", Table::new(sessions).with(Style::rounded()));

    if !plan.verdict.violations.is_empty() {
        let violations: Vec<ViolationRow> = plan
            .verdict
            .violations
            .iter()
            .map(|v| ViolationRow {
                rule: v.rule.to_string(),
                severity: v.severity.to_string(),
                measured: v.measured_value.to_string(),
                threshold: v.threshold.to_string(),
                detail: v.detail.clone(),
            })
            .collect();
        println!("{}", Table::new(violations).with(Style::rounded()));
    }
}
