//! Pipeline orchestration
//!
//! This module provides the public API of the compliance engine. For each stage
//! it runs the full pipeline: anchor resolution, activity adapters, matrix
//! assembly, percentage normalization and compensation.

use std::sync::Arc;
use tracing::{info, warn};

use crate::adapters::SharedSource;
use crate::anchor::{AnchorStrategy, WeekAnchorResolver};
use crate::cache::ResponseCache;
use crate::compensation::CompensationPolicy;
use crate::config::Config;
use crate::directory::ParticipantDirectory;
use crate::encoder::ReportEncoder;
use crate::error::ComplianceError;
use crate::matrix::ComplianceMatrixBuilder;
use crate::normalizer::PercentageNormalizer;
use crate::types::{
    validate_weeks, AnchorMode, Participant, ParticipantReport, StageOutcome, StageReport,
    StageRequest,
};
use crate::wear_api::{UltrahumanClient, WearApi};

/// Run one stage for an already resolved anchor.
///
/// Pipeline stages:
/// 1. WeekAnchorResolver output - week windows for the stage
/// 2. ComplianceMatrixBuilder - raw weekly counts per activity
/// 3. PercentageNormalizer - percentages and category averages
/// 4. CompensationPolicy - weekly payout and stage total
pub fn compute_stage(
    builder: &ComplianceMatrixBuilder,
    policy: &CompensationPolicy,
    participant: &Participant,
    strategy: &AnchorStrategy,
    label: &str,
    first_week: u32,
    last_week: u32,
) -> Result<StageReport, ComplianceError> {
    validate_weeks(first_week, last_week)?;
    let windows = strategy.stage_windows(first_week, last_week);
    let counts = builder.build(participant, &windows)?;
    let percentages = PercentageNormalizer::normalize(&counts)?;
    let compensation = policy.calculate(&percentages.averages);

    let anchor = strategy.anchor();
    let title = match strategy {
        AnchorStrategy::Postpartum { delivery_date, .. } => format!(
            "{label} Weekly Compliance (from delivery {})",
            delivery_date.format("%Y-%m-%d")
        ),
        AnchorStrategy::Gestational { .. } => format!("{label} Weekly Compliance"),
    };

    Ok(StageReport {
        label: label.to_string(),
        title,
        mode: anchor.mode,
        anchor,
        first_week,
        last_week,
        counts,
        percentages,
        compensation,
    })
}

/// Report generator wired to a participant directory and a matrix builder.
pub struct ComplianceReporter {
    directory: Box<dyn ParticipantDirectory>,
    builder: ComplianceMatrixBuilder,
    policy: CompensationPolicy,
    encoder: ReportEncoder,
}

impl ComplianceReporter {
    /// Create a reporter with the default compensation policy
    pub fn new(directory: Box<dyn ParticipantDirectory>, builder: ComplianceMatrixBuilder) -> Self {
        Self {
            directory,
            builder,
            policy: CompensationPolicy::default(),
            encoder: ReportEncoder::new(),
        }
    }

    /// Create a reporter from configuration.
    ///
    /// When the wear API fallback is enabled, Ultrahuman ring wear is counted
    /// through the vendor API with responses cached under the cache directory.
    pub fn from_config(
        config: &Config,
        source: SharedSource,
        directory: Box<dyn ParticipantDirectory>,
    ) -> Result<Self, ComplianceError> {
        config.validate()?;
        let wear_api: Option<Arc<dyn WearApi>> = if config.wear_api.enabled {
            config.ensure_directories()?;
            let cache = ResponseCache::new(&config.cache_dir);
            Some(Arc::new(UltrahumanClient::new(&config.wear_api, cache)?))
        } else {
            None
        };
        let builder = ComplianceMatrixBuilder::new(source, wear_api, config.bp_counting);
        Ok(Self::new(directory, builder))
    }

    /// Use a different compensation policy
    pub fn with_policy(mut self, policy: CompensationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Use a specific encoder for report metadata
    pub fn with_encoder(mut self, encoder: ReportEncoder) -> Self {
        self.encoder = encoder;
        self
    }

    pub fn encoder(&self) -> &ReportEncoder {
        &self.encoder
    }

    /// Participant ids in a segment
    pub fn list_participants(&self, segment: Option<&str>) -> Result<Vec<String>, ComplianceError> {
        self.directory.list_participants(segment)
    }

    /// Look up one participant
    pub fn participant(&self, participant_id: &str) -> Result<Participant, ComplianceError> {
        self.directory.get_participant(participant_id)
    }

    /// Generate one stage for a participant.
    ///
    /// A postpartum stage with a gestational fallback reports the fallback
    /// weeks when delivery data is missing.
    pub fn generate_stage(
        &self,
        participant: &Participant,
        stage: &StageRequest,
    ) -> Result<StageReport, ComplianceError> {
        let report = match WeekAnchorResolver::resolve(participant, stage.mode) {
            Ok(strategy) => compute_stage(
                &self.builder,
                &self.policy,
                participant,
                &strategy,
                &stage.label,
                stage.first_week,
                stage.last_week,
            )?,
            Err(ComplianceError::MissingAnchorData { reason, .. })
                if stage.mode == AnchorMode::Postpartum && stage.gestational_fallback.is_some() =>
            {
                let (first_week, last_week) = stage
                    .gestational_fallback
                    .unwrap_or((stage.first_week, stage.last_week));
                warn!(
                    participant = %participant.participant_id,
                    stage = %stage.label,
                    reason = %reason,
                    first_week,
                    last_week,
                    "postpartum anchor unavailable, reporting gestational weeks"
                );
                let strategy = WeekAnchorResolver::resolve(participant, AnchorMode::Gestational)?;
                let mut report = compute_stage(
                    &self.builder,
                    &self.policy,
                    participant,
                    &strategy,
                    &stage.label,
                    first_week,
                    last_week,
                )?;
                report.title = format!(
                    "{} Weekly Compliance (gestational weeks {first_week}-{last_week})",
                    stage.label
                );
                report
            }
            Err(e) => return Err(e),
        };

        info!(
            participant = %participant.participant_id,
            stage = %report.label,
            weeks = report.counts.week_count(),
            compensation = report.compensation.total,
            "stage complete"
        );
        Ok(report)
    }

    /// Generate every requested stage for one participant.
    ///
    /// A failing stage is recorded in the report and does not stop the others.
    pub fn generate_report(
        &self,
        participant_id: &str,
        stages: &[StageRequest],
    ) -> Result<ParticipantReport, ComplianceError> {
        let participant = self.participant(participant_id)?;

        let outcomes = stages
            .iter()
            .map(|stage| match self.generate_stage(&participant, stage) {
                Ok(report) => StageOutcome::Completed(report),
                Err(e) => {
                    warn!(
                        participant = %participant.participant_id,
                        stage = %stage.label,
                        error = %e,
                        "stage failed"
                    );
                    StageOutcome::Failed {
                        label: stage.label.clone(),
                        error: e.to_string(),
                    }
                }
            })
            .collect();

        Ok(self.encoder.assemble(&participant, outcomes))
    }
}
