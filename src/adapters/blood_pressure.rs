//! Blood pressure measurement adapter
//!
//! Readings come from the Omron cuff integration and from both health
//! platforms. Omron rows carry local time already; platform samples are shifted
//! to the study day first.

use chrono::NaiveDate;
use std::collections::BTreeSet;
use tracing::debug;

use super::{
    collect_days, ActivityAdapter, BloodPressureCounting, SharedSource, LOCAL_DAY_SHIFT_HOURS,
};
use crate::anchor::StageWindows;
use crate::error::ComplianceError;
use crate::source::{Query, TableName};
use crate::types::{Activity, ActivityWeeklySeries, Participant};

const OMRON_COLUMNS: [&str; 3] = ["datetimelocal", "datetime", "inserteddate"];
const GOOGLE_FIT_TYPES: [&str; 2] = ["blood_pressure_systolic", "blood_pressure_diastolic"];
const HEALTHKIT_TYPES: [&str; 2] = ["BloodPressureSystolic", "BloodPressureDiastolic"];

/// Counts days with a blood pressure reading
pub struct BloodPressureAdapter {
    source: SharedSource,
    counting: BloodPressureCounting,
}

impl BloodPressureAdapter {
    pub fn new(source: SharedSource) -> Self {
        Self {
            source,
            counting: BloodPressureCounting::default(),
        }
    }

    pub fn with_counting(mut self, counting: BloodPressureCounting) -> Self {
        self.counting = counting;
        self
    }

    /// Reading days per source system, in a fixed order
    fn source_days(
        &self,
        pid: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<[BTreeSet<NaiveDate>; 3], ComplianceError> {
        let omron = self.source.execute(
            &Query::select(TableName::OmronBloodPressure, &OMRON_COLUMNS)
                .where_eq("participantidentifier", pid)
                .where_day_between(&OMRON_COLUMNS, 0, start, end),
        )?;
        let google_fit = self.source.execute(
            &Query::select(TableName::GoogleFitSamples, &["windowstart"])
                .where_eq("participantidentifier", pid)
                .where_in("type", &GOOGLE_FIT_TYPES)
                .where_day_between(&["windowstart"], LOCAL_DAY_SHIFT_HOURS, start, end),
        )?;
        let healthkit = self.source.execute(
            &Query::select(TableName::HealthKitSamples, &["startdate"])
                .where_eq("participantidentifier", pid)
                .where_in("type", &HEALTHKIT_TYPES)
                .where_day_between(&["startdate"], LOCAL_DAY_SHIFT_HOURS, start, end),
        )?;

        debug!(
            participant = %pid,
            omron = omron.len(),
            google_fit = google_fit.len(),
            healthkit = healthkit.len(),
            "blood pressure rows"
        );

        Ok([
            collect_days(&omron, &OMRON_COLUMNS, 0),
            collect_days(&google_fit, &["windowstart"], LOCAL_DAY_SHIFT_HOURS),
            collect_days(&healthkit, &["startdate"], LOCAL_DAY_SHIFT_HOURS),
        ])
    }
}

impl ActivityAdapter for BloodPressureAdapter {
    fn activity(&self) -> Activity {
        Activity::BloodPressure
    }

    fn fetch(
        &self,
        participant: &Participant,
        windows: &StageWindows,
    ) -> Result<ActivityWeeklySeries, ComplianceError> {
        let Some((start, end)) = windows.span() else {
            return Ok(windows.tally(|_| 0));
        };
        let per_source = self.source_days(&participant.participant_id, start, end)?;

        Ok(match self.counting {
            BloodPressureCounting::Union => {
                let all: BTreeSet<NaiveDate> = per_source.into_iter().flatten().collect();
                windows.count_days(&all)
            }
            BloodPressureCounting::GreatestPerSource => windows.tally(|window| {
                per_source
                    .iter()
                    .map(|days| days.range(window.start..=window.end).count() as u32)
                    .max()
                    .unwrap_or(0)
            }),
        })
    }
}
