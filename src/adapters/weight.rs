//! Weight measurement adapter

use tracing::debug;

use super::{collect_days, ActivityAdapter, SharedSource, LOCAL_DAY_SHIFT_HOURS};
use crate::anchor::StageWindows;
use crate::error::ComplianceError;
use crate::source::{Query, TableName};
use crate::types::{Activity, ActivityWeeklySeries, Participant};

/// Counts days with a weight measurement from either health platform
pub struct WeightAdapter {
    source: SharedSource,
}

impl WeightAdapter {
    pub fn new(source: SharedSource) -> Self {
        Self { source }
    }
}

impl ActivityAdapter for WeightAdapter {
    fn activity(&self) -> Activity {
        Activity::Weight
    }

    fn fetch(
        &self,
        participant: &Participant,
        windows: &StageWindows,
    ) -> Result<ActivityWeeklySeries, ComplianceError> {
        let Some((start, end)) = windows.span() else {
            return Ok(windows.tally(|_| 0));
        };
        let pid = participant.participant_id.as_str();

        let healthkit = self.source.execute(
            &Query::select(TableName::HealthKitSamples, &["startdate"])
                .where_eq("participantidentifier", pid)
                .where_in("type", &["Weight"])
                .where_day_between(&["startdate"], LOCAL_DAY_SHIFT_HOURS, start, end),
        )?;
        let google_fit = self.source.execute(
            &Query::select(TableName::GoogleFitSamples, &["windowstart"])
                .where_eq("participantidentifier", pid)
                .where_in("type", &["Weight"])
                .where_day_between(&["windowstart"], LOCAL_DAY_SHIFT_HOURS, start, end),
        )?;

        let mut days = collect_days(&healthkit, &["startdate"], LOCAL_DAY_SHIFT_HOURS);
        days.extend(collect_days(&google_fit, &["windowstart"], LOCAL_DAY_SHIFT_HOURS));

        debug!(
            participant = %pid,
            healthkit = healthkit.len(),
            google_fit = google_fit.len(),
            days = days.len(),
            "weight days"
        );
        Ok(windows.count_days(&days))
    }
}
