//! Ultrahuman ring wear adapter
//!
//! Reads the ring's temperature samples from the `temp` table by default. When
//! a [`WearApi`] is attached, daily wear is asked from the vendor API instead.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, warn};

use super::{ActivityAdapter, SharedSource, WEAR_THRESHOLD};
use crate::anchor::StageWindows;
use crate::error::ComplianceError;
use crate::source::{Query, TableName};
use crate::types::{Activity, ActivityWeeklySeries, Participant};
use crate::wear_api::WearApi;

/// Temperature samples a fully worn day produces (one per five minutes)
pub const SAMPLES_PER_DAY: usize = 288;

const DAY_COLUMN: &str = "object_day_start_timestamp_iso8601_tz";
const SAMPLE_COLUMN: &str = "object_values_timestamp";

/// Counts days the Ultrahuman ring was worn long enough
pub struct UltrahumanRingAdapter {
    source: SharedSource,
    api: Option<Arc<dyn WearApi>>,
}

impl UltrahumanRingAdapter {
    pub fn new(source: SharedSource) -> Self {
        Self { source, api: None }
    }

    /// Use the vendor API for daily wear instead of the sample table.
    pub fn with_api(mut self, api: Arc<dyn WearApi>) -> Self {
        self.api = Some(api);
        self
    }

    fn from_table(
        &self,
        participant: &Participant,
        windows: &StageWindows,
    ) -> Result<ActivityWeeklySeries, ComplianceError> {
        let Some((start, end)) = windows.span() else {
            return Ok(windows.tally(|_| 0));
        };

        let query = Query::select(TableName::UltrahumanTemp, &[DAY_COLUMN, SAMPLE_COLUMN])
            .where_eq("pid", participant.participant_id.as_str())
            .where_not_null(DAY_COLUMN)
            .where_day_between(&[DAY_COLUMN], 0, start, end);
        let table = self.source.execute(&query)?;

        let mut samples: BTreeMap<_, BTreeSet<String>> = BTreeMap::new();
        for row in &table.rows {
            let (Some(day), Some(sample)) = (row.timestamp(DAY_COLUMN), row.get(SAMPLE_COLUMN))
            else {
                continue;
            };
            if sample.is_null() {
                continue;
            }
            let key = match sample.as_str() {
                Some(s) => s.to_string(),
                None => format!("{sample:?}"),
            };
            samples.entry(day.date()).or_default().insert(key);
        }

        let required = WEAR_THRESHOLD * SAMPLES_PER_DAY as f64;
        let worn: BTreeSet<_> = samples
            .into_iter()
            .filter(|(_, s)| s.len() as f64 >= required)
            .map(|(day, _)| day)
            .collect();

        debug!(
            participant = %participant.participant_id,
            rows = table.len(),
            worn_days = worn.len(),
            "ultrahuman wear days from samples"
        );
        Ok(windows.count_days(&worn))
    }

    fn from_api(
        &self,
        api: &dyn WearApi,
        participant: &Participant,
        windows: &StageWindows,
    ) -> Result<ActivityWeeklySeries, ComplianceError> {
        if windows.windows.is_empty() {
            return Ok(windows.tally(|_| 0));
        }
        let Some(email) = participant.email.as_deref() else {
            warn!(
                participant = %participant.participant_id,
                "no ring vendor email, counting no wear days"
            );
            return Ok(windows.tally(|_| 0));
        };

        let threshold = WEAR_THRESHOLD * 100.0;
        let series = windows.tally(|window| {
            window
                .days()
                .filter(|day| api.daily_wear_percentage(email, *day) >= threshold)
                .count() as u32
        });

        debug!(
            participant = %participant.participant_id,
            weeks = ?series.values,
            "ultrahuman wear days from vendor API"
        );
        Ok(series)
    }
}

impl ActivityAdapter for UltrahumanRingAdapter {
    fn activity(&self) -> Activity {
        Activity::UltrahumanRingWear
    }

    fn fetch(
        &self,
        participant: &Participant,
        windows: &StageWindows,
    ) -> Result<ActivityWeeklySeries, ComplianceError> {
        match &self.api {
            Some(api) => self.from_api(api.as_ref(), participant, windows),
            None => self.from_table(participant, windows),
        }
    }
}
