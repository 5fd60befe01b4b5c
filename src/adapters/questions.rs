//! Structured daily questions adapter

use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use super::{fetch_survey_answers, ActivityAdapter, SharedSource};
use crate::anchor::StageWindows;
use crate::error::ComplianceError;
use crate::types::{Activity, ActivityWeeklySeries, Participant};

/// Morning and evening ecological momentary assessments
pub const DAILY_SURVEYS: [&str; 2] = ["EMA AM", "EMA PM"];

/// Distinct questions a day needs before it counts
pub const MIN_DAILY_ANSWERS: usize = 6;

/// Counts days with enough distinct EMA answers
pub struct DailyQuestionsAdapter {
    source: SharedSource,
}

impl DailyQuestionsAdapter {
    pub fn new(source: SharedSource) -> Self {
        Self { source }
    }
}

impl ActivityAdapter for DailyQuestionsAdapter {
    fn activity(&self) -> Activity {
        Activity::DailyQuestions
    }

    fn fetch(
        &self,
        participant: &Participant,
        windows: &StageWindows,
    ) -> Result<ActivityWeeklySeries, ComplianceError> {
        let Some(span) = windows.span() else {
            return Ok(windows.tally(|_| 0));
        };

        let answers =
            fetch_survey_answers(self.source.as_ref(), participant, &DAILY_SURVEYS, Some(span))?;

        // AM and PM answers pool into one per-day count
        let mut by_day: BTreeMap<_, BTreeSet<&str>> = BTreeMap::new();
        for answer in &answers {
            if let Some(id) = answer.result_identifier.as_deref() {
                by_day.entry(answer.day).or_default().insert(id);
            }
        }

        let qualifying: BTreeSet<_> = by_day
            .into_iter()
            .filter(|(_, ids)| ids.len() >= MIN_DAILY_ANSWERS)
            .map(|(day, _)| day)
            .collect();

        debug!(
            participant = %participant.participant_id,
            answers = answers.len(),
            days = qualifying.len(),
            "daily question days"
        );
        Ok(windows.count_days(&qualifying))
    }
}
