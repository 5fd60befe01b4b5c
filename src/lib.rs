//! Participation Compliance - weekly study-compliance engine for pregnancy and postpartum research
//!
//! The engine turns a participant's raw study activity into weekly compliance
//! through a deterministic pipeline: week anchoring → activity adapters →
//! compliance matrix → percentage normalization → compensation.
//!
//! ## Modules
//!
//! - **Anchoring**: study weeks from the projected due date or the delivery date
//! - **Adapters**: one per tracked activity, reading the study's analytical tables
//! - **Reporting**: stage reports, category averages and weekly compensation

pub mod adapters;
pub mod anchor;
pub mod cache;
pub mod compensation;
pub mod config;
pub mod directory;
pub mod encoder;
pub mod error;
pub mod matrix;
pub mod normalizer;
pub mod pipeline;
pub mod source;
pub mod types;
pub mod wear_api;

pub use anchor::{AnchorStrategy, StageWindows, WeekAnchorResolver};
pub use compensation::CompensationPolicy;
pub use config::{Config, ConfigError};
pub use directory::{JsonDirectory, ParticipantDirectory, TableDirectory};
pub use encoder::ReportEncoder;
pub use error::ComplianceError;
pub use matrix::ComplianceMatrixBuilder;
pub use normalizer::PercentageNormalizer;
pub use pipeline::{compute_stage, ComplianceReporter};
pub use source::{MemorySource, Query, TableName, TabularSource};
pub use types::{
    Activity, AnchorMode, ParticipantReport, Participant, RingVendor, StageOutcome, StageReport,
    StageRequest,
};
pub use wear_api::{UltrahumanClient, WearApi};

/// Version embedded in every report
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for reports
pub const PRODUCER_NAME: &str = "participation-compliance";
