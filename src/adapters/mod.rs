//! Activity source adapters
//!
//! Each adapter pulls one activity's events for a participant from the query
//! source, buckets them into calendar days and counts the qualifying days in
//! every week window of a stage.

mod blood_pressure;
mod questionnaire;
mod questions;
mod ring_oura;
mod ring_ultrahuman;
mod symptoms;
mod weight;

pub use blood_pressure::BloodPressureAdapter;
pub use questionnaire::{PeriodicQuestionnaireAdapter, EXCEPTION_SURVEYS, WEEKLY_SURVEYS};
pub use questions::{DailyQuestionsAdapter, DAILY_SURVEYS, MIN_DAILY_ANSWERS};
pub use ring_oura::OuraRingAdapter;
pub use ring_ultrahuman::{UltrahumanRingAdapter, SAMPLES_PER_DAY};
pub use symptoms::SymptomCheckInAdapter;
pub use weight::WeightAdapter;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::anchor::StageWindows;
use crate::error::ComplianceError;
use crate::source::{Query, Table, TableName, TabularSource};
use crate::types::{Activity, ActivityWeeklySeries, Participant};

/// Hours added to survey and health-platform timestamps before taking the day
pub const LOCAL_DAY_SHIFT_HOURS: i64 = -7;

/// Minimum daily fraction for a ring to count as worn
pub const WEAR_THRESHOLD: f64 = 0.75;

/// Query source shared by all adapters of a run
pub type SharedSource = Arc<dyn TabularSource + Send + Sync>;

/// Trait for activity source adapters
pub trait ActivityAdapter: Send + Sync {
    /// Activity whose series this adapter produces
    fn activity(&self) -> Activity;

    /// Raw weekly counts for the stage, one value per week
    fn fetch(
        &self,
        participant: &Participant,
        windows: &StageWindows,
    ) -> Result<ActivityWeeklySeries, ComplianceError>;
}

/// How blood pressure days from several source systems are combined
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BloodPressureCounting {
    /// A day counts once if any source has a reading
    #[default]
    Union,
    /// Each source is counted on its own; the week takes the largest count
    GreatestPerSource,
}

impl BloodPressureCounting {
    pub fn from_str_opt(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "union" => Some(BloodPressureCounting::Union),
            "greatest" | "greatest_per_source" => Some(BloodPressureCounting::GreatestPerSource),
            _ => None,
        }
    }
}

/// Local day of a timestamp after applying an hour shift
pub(crate) fn local_day(ts: NaiveDateTime, shift_hours: i64) -> NaiveDate {
    (ts + Duration::hours(shift_hours)).date()
}

/// Distinct days on which the first usable timestamp column of a row falls.
pub(crate) fn collect_days(
    table: &Table,
    columns: &[&str],
    shift_hours: i64,
) -> BTreeSet<NaiveDate> {
    table
        .rows
        .iter()
        .filter_map(|row| row.coalesce_timestamp(columns))
        .map(|ts| local_day(ts, shift_hours))
        .collect()
}

/// One answered question of a survey submission
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SurveyAnswer {
    pub survey_name: String,
    pub result_key: String,
    pub result_identifier: Option<String>,
    /// Local day of the answer, shifted by [`LOCAL_DAY_SHIFT_HOURS`]
    pub day: NaiveDate,
}

/// Answers a participant gave to the named surveys.
///
/// Survey names live in `surveyresults` and answers in `surveyquestionresults`;
/// the two are joined on `surveyresultkey`. With a span, only answers whose
/// local day falls inside it are returned.
pub(crate) fn fetch_survey_answers(
    source: &dyn TabularSource,
    participant: &Participant,
    survey_names: &[&str],
    span: Option<(NaiveDate, NaiveDate)>,
) -> Result<Vec<SurveyAnswer>, ComplianceError> {
    let results = source.execute(
        &Query::select(TableName::SurveyResults, &["surveyresultkey", "surveyname"])
            .where_in("surveyname", survey_names),
    )?;
    let names: HashMap<&str, &str> = results
        .rows
        .iter()
        .filter_map(|row| Some((row.text("surveyresultkey")?, row.text("surveyname")?)))
        .collect();
    if names.is_empty() {
        return Ok(Vec::new());
    }

    let mut query = Query::select(
        TableName::SurveyQuestionResults,
        &["surveyresultkey", "resultidentifier", "startdate"],
    )
    .where_eq("participantidentifier", participant.participant_id.as_str());
    if let Some((start, end)) = span {
        query = query.where_day_between(&["startdate"], LOCAL_DAY_SHIFT_HOURS, start, end);
    }
    let answers = source.execute(&query)?;

    Ok(answers
        .rows
        .iter()
        .filter_map(|row| {
            let key = row.text("surveyresultkey")?;
            let name = names.get(key)?;
            let ts = row.timestamp("startdate")?;
            Some(SurveyAnswer {
                survey_name: name.to_string(),
                result_key: key.to_string(),
                result_identifier: row.text("resultidentifier").map(str::to_string),
                day: local_day(ts, LOCAL_DAY_SHIFT_HOURS),
            })
        })
        .collect())
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::NaiveDate;

    use crate::anchor::{AnchorStrategy, StageWindows};
    use crate::types::Participant;

    pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    pub fn participant() -> Participant {
        Participant::new("BB-0001")
    }

    /// Gestational weeks anchored on 2024-01-01 (a Monday)
    pub fn gestational(first: u32, last: u32) -> StageWindows {
        AnchorStrategy::Gestational {
            due_date: date(2024, 1, 1) + chrono::Duration::days(280),
        }
        .stage_windows(first, last)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::source::Row;

    #[test]
    fn test_bp_counting_from_str() {
        assert_eq!(
            BloodPressureCounting::from_str_opt("UNION"),
            Some(BloodPressureCounting::Union)
        );
        assert_eq!(
            BloodPressureCounting::from_str_opt("greatest"),
            Some(BloodPressureCounting::GreatestPerSource)
        );
        assert_eq!(BloodPressureCounting::from_str_opt("max"), None);
    }

    #[test]
    fn test_collect_days_shifts_and_dedups() {
        let table = Table {
            columns: vec!["startdate".to_string()],
            rows: vec![
                Row::new().with("startdate", "2024-01-02 06:59:00"),
                Row::new().with("startdate", "2024-01-01 20:00:00"),
                Row::new().with("startdate", "2024-01-02 07:00:00"),
            ],
        };
        let days = collect_days(&table, &["startdate"], LOCAL_DAY_SHIFT_HOURS);
        assert_eq!(
            days.into_iter().collect::<Vec<_>>(),
            vec![date(2024, 1, 1), date(2024, 1, 2)]
        );
    }
}
