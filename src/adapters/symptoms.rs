//! Symptom check-in adapter
//!
//! A day counts when the participant's device reported anything at all.

use tracing::debug;

use super::{collect_days, ActivityAdapter, SharedSource};
use crate::anchor::StageWindows;
use crate::error::ComplianceError;
use crate::source::{Query, TableName};
use crate::types::{Activity, ActivityWeeklySeries, Participant};

/// Counts days with at least one device data row
pub struct SymptomCheckInAdapter {
    source: SharedSource,
}

impl SymptomCheckInAdapter {
    pub fn new(source: SharedSource) -> Self {
        Self { source }
    }
}

impl ActivityAdapter for SymptomCheckInAdapter {
    fn activity(&self) -> Activity {
        Activity::SymptomCheckIn
    }

    fn fetch(
        &self,
        participant: &Participant,
        windows: &StageWindows,
    ) -> Result<ActivityWeeklySeries, ComplianceError> {
        let Some((start, end)) = windows.span() else {
            return Ok(windows.tally(|_| 0));
        };

        let query = Query::select(TableName::ProjectDeviceData, &["inserteddate"])
            .where_eq("participantidentifier", participant.participant_id.as_str())
            .where_day_between(&["inserteddate"], 0, start, end);
        let table = self.source.execute(&query)?;

        let days = collect_days(&table, &["inserteddate"], 0);
        debug!(
            participant = %participant.participant_id,
            rows = table.len(),
            days = days.len(),
            "symptom check-in days"
        );
        Ok(windows.count_days(&days))
    }
}
