//! Periodic questionnaire adapter
//!
//! Weekly surveys count in any week they are submitted. Exception surveys are
//! scheduled for a single gestational week and only count there. After delivery
//! every listed survey counts the same, and a week is simply done or not done.

use chrono::NaiveDate;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

use super::{fetch_survey_answers, ActivityAdapter, SharedSource};
use crate::anchor::StageWindows;
use crate::error::ComplianceError;
use crate::types::{Activity, ActivityWeeklySeries, AnchorMode, Participant, WeekWindow};

/// Surveys expected every week
pub const WEEKLY_SURVEYS: [&str; 4] = [
    "mMOS (Weekly)",
    "PROMIS Sleep (Weekly)",
    "BRCS (Weekly)",
    "Pregnancy Experience Scale",
];

/// Surveys that only count in their designated gestational week
pub const EXCEPTION_SURVEYS: [(&str, u32); 3] = [
    ("Maternal Antenatal Attachment Scale", 20),
    ("Edinburgh Postnatal Depression Scale (EPDS)", 28),
    ("Perinatal Anxiety Screening Scale (PASS)", 32),
];

/// A survey submission dated by its earliest answer
#[derive(Debug, Clone, PartialEq, Eq)]
struct Submission {
    survey_name: String,
    day: NaiveDate,
}

/// Counts questionnaire completions per week
pub struct PeriodicQuestionnaireAdapter {
    source: SharedSource,
}

impl PeriodicQuestionnaireAdapter {
    pub fn new(source: SharedSource) -> Self {
        Self { source }
    }

    fn survey_names() -> Vec<&'static str> {
        WEEKLY_SURVEYS
            .iter()
            .copied()
            .chain(EXCEPTION_SURVEYS.iter().map(|(name, _)| *name))
            .collect()
    }

    fn submissions(
        &self,
        participant: &Participant,
        windows: &StageWindows,
    ) -> Result<Vec<Submission>, ComplianceError> {
        // Postpartum answers are limited to the follow-up period before dating
        // submissions; gestational submissions are dated over all answers.
        let span = match windows.mode {
            AnchorMode::Gestational => None,
            AnchorMode::Postpartum => windows.span(),
        };
        let answers = fetch_survey_answers(
            self.source.as_ref(),
            participant,
            &Self::survey_names(),
            span,
        )?;

        let mut earliest: HashMap<&str, (&str, NaiveDate)> = HashMap::new();
        for answer in &answers {
            earliest
                .entry(answer.result_key.as_str())
                .and_modify(|(_, day)| *day = (*day).min(answer.day))
                .or_insert((answer.survey_name.as_str(), answer.day));
        }

        Ok(earliest
            .into_values()
            .map(|(name, day)| Submission {
                survey_name: name.to_string(),
                day,
            })
            .collect())
    }
}

/// Gestational raw count: distinct weekly surveys plus exception surveys in their week
fn gestational_count(window: &WeekWindow, submissions: &[Submission]) -> u32 {
    let done: BTreeSet<&str> = submissions
        .iter()
        .filter(|s| window.contains(s.day))
        .map(|s| s.survey_name.as_str())
        .collect();

    let weekly = WEEKLY_SURVEYS.iter().filter(|name| done.contains(*name)).count();
    let exceptions = EXCEPTION_SURVEYS
        .iter()
        .filter(|(name, week)| *week == window.week && done.contains(name))
        .count();
    (weekly + exceptions) as u32
}

/// Postpartum raw count: 1 when any listed survey was submitted that week
fn postpartum_count(window: &WeekWindow, submissions: &[Submission]) -> u32 {
    u32::from(submissions.iter().any(|s| window.contains(s.day)))
}

impl ActivityAdapter for PeriodicQuestionnaireAdapter {
    fn activity(&self) -> Activity {
        Activity::PeriodicQuestionnaire
    }

    fn fetch(
        &self,
        participant: &Participant,
        windows: &StageWindows,
    ) -> Result<ActivityWeeklySeries, ComplianceError> {
        if windows.windows.is_empty() {
            return Ok(windows.tally(|_| 0));
        }

        let submissions = self.submissions(participant, windows)?;
        debug!(
            participant = %participant.participant_id,
            submissions = submissions.len(),
            mode = ?windows.mode,
            "questionnaire submissions"
        );

        Ok(match windows.mode {
            AnchorMode::Gestational => windows.tally(|w| gestational_count(w, &submissions)),
            AnchorMode::Postpartum => windows.tally(|w| postpartum_count(w, &submissions)),
        })
    }
}
