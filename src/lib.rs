// Library interface for coachrs modules
// The binary and the integration tests both go through this crate root

pub mod admission;
pub mod config;
pub mod database;
pub mod error;
pub mod generator;
pub mod load;
pub mod logging;
pub mod models;
pub mod orchestrator;
pub mod risk;
pub mod store;
pub mod tss;

// Re-export commonly used types for convenience
pub use models::*;
pub use admission::{AdmissionConfig, AdmissionGate};
pub use config::AppConfig;
pub use database::SqliteStore;
pub use error::{CoachError, ConflictError, DatabaseError, GenerationError, Result, ValidationError};
pub use generator::{GenerationRequest, GeneratorFailure, PlanGenerator, TemplateGenerator};
pub use load::{LoadConfig, LoadEstimator, LoadState, ReadinessLevel};
pub use logging::{LogConfig, LogFormat, LogLevel};
pub use orchestrator::{Action, ActionOutcome, OrchestratorConfig, PlanOrchestrator, PlanRequest, StatusReport};
pub use risk::{RiskEvaluator, RiskPolicy, RiskRule, RiskVerdict, RuleViolation, Severity};
pub use store::{EntryCursor, LogStore, MemoryStore};
pub use tss::TssCalculator;
