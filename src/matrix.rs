//! Weekly compliance matrix builder

use std::sync::Arc;
use tracing::debug;

use crate::adapters::{
    ActivityAdapter, BloodPressureAdapter, BloodPressureCounting, DailyQuestionsAdapter,
    OuraRingAdapter, PeriodicQuestionnaireAdapter, SharedSource, SymptomCheckInAdapter,
    UltrahumanRingAdapter, WeightAdapter,
};
use crate::anchor::StageWindows;
use crate::error::ComplianceError;
use crate::types::{Activity, ComplianceMatrix, Participant, RingVendor};
use crate::wear_api::WearApi;

/// Runs the activity adapters for one stage and assembles the count matrix
pub struct ComplianceMatrixBuilder {
    adapters: Vec<Box<dyn ActivityAdapter>>,
}

impl ComplianceMatrixBuilder {
    /// Builder without adapters
    pub fn empty() -> Self {
        Self {
            adapters: Vec::new(),
        }
    }

    /// Builder with one adapter per activity over a shared source.
    ///
    /// With a wear API the Ultrahuman ring is counted through the vendor API.
    pub fn new(
        source: SharedSource,
        wear_api: Option<Arc<dyn WearApi>>,
        bp_counting: BloodPressureCounting,
    ) -> Self {
        let mut ultrahuman = UltrahumanRingAdapter::new(source.clone());
        if let Some(api) = wear_api {
            ultrahuman = ultrahuman.with_api(api);
        }

        Self::empty()
            .with_adapter(Box::new(SymptomCheckInAdapter::new(source.clone())))
            .with_adapter(Box::new(DailyQuestionsAdapter::new(source.clone())))
            .with_adapter(Box::new(PeriodicQuestionnaireAdapter::new(source.clone())))
            .with_adapter(Box::new(OuraRingAdapter::new(source.clone())))
            .with_adapter(Box::new(ultrahuman))
            .with_adapter(Box::new(WeightAdapter::new(source.clone())))
            .with_adapter(Box::new(
                BloodPressureAdapter::new(source).with_counting(bp_counting),
            ))
    }

    /// Register an adapter, replacing any adapter for the same activity.
    pub fn with_adapter(mut self, adapter: Box<dyn ActivityAdapter>) -> Self {
        let activity = adapter.activity();
        self.adapters.retain(|a| a.activity() != activity);
        self.adapters.push(adapter);
        self
    }

    /// Activities reported for a ring vendor, in display order
    pub fn active_activities(vendor: RingVendor) -> Vec<Activity> {
        let inactive_ring = match vendor {
            RingVendor::Oura => Activity::UltrahumanRingWear,
            RingVendor::Ultrahuman => Activity::OuraRingWear,
        };
        Activity::ALL
            .iter()
            .copied()
            .filter(|a| *a != inactive_ring)
            .collect()
    }

    fn adapter_for(&self, activity: Activity) -> Result<&dyn ActivityAdapter, ComplianceError> {
        self.adapters
            .iter()
            .find(|a| a.activity() == activity)
            .map(|a| a.as_ref())
            .ok_or_else(|| ComplianceError::MissingAdapter(activity.as_str().to_string()))
    }

    /// Build the count matrix for one stage.
    pub fn build(
        &self,
        participant: &Participant,
        windows: &StageWindows,
    ) -> Result<ComplianceMatrix, ComplianceError> {
        let expected = windows.week_count();
        let mut matrix = ComplianceMatrix::new(windows.week_labels());

        for activity in Self::active_activities(participant.ring_vendor) {
            let series = self.adapter_for(activity)?.fetch(participant, windows)?;
            if series.len() != expected {
                return Err(ComplianceError::DataShapeMismatch {
                    activity: activity.as_str().to_string(),
                    expected,
                    actual: series.len(),
                });
            }
            debug!(
                participant = %participant.participant_id,
                activity = activity.as_str(),
                values = ?series.values,
                "activity series"
            );
            matrix.insert(activity, series);
        }

        Ok(matrix)
    }
}
