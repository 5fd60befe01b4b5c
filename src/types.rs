//! Core types for the compliance pipeline
//!
//! This module defines the data structures that flow through each stage of the
//! pipeline: participants, stage requests, raw weekly series, the count and
//! percentage matrices, and the compensation row.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ComplianceError;

/// Smart ring vendor assigned to a participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RingVendor {
    Oura,
    Ultrahuman,
}

impl RingVendor {
    /// Map the directory's `ring_vendor` field; anything but Oura is an Ultrahuman ring
    pub fn from_field(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()) {
            Some(v) if v == "oura" => RingVendor::Oura,
            _ => RingVendor::Ultrahuman,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RingVendor::Oura => "oura",
            RingVendor::Ultrahuman => "uh",
        }
    }

    /// The ring wear activity tracked for this vendor
    pub fn activity(&self) -> Activity {
        match self {
            RingVendor::Oura => Activity::OuraRingWear,
            RingVendor::Ultrahuman => Activity::UltrahumanRingWear,
        }
    }
}

/// Raw custom fields carried by the participant directory.
///
/// Values are kept as the directory delivered them; parsing happens when an
/// anchor is resolved so that malformed values surface as missing anchor data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomFields {
    /// Projected due date (`edd_final`)
    pub edd_final: Option<String>,
    /// Actual delivery date
    pub delivery_date: Option<String>,
    /// Length of the postpartum follow-up period in days
    pub postpartum_days: Option<String>,
}

/// A study participant, fetched once per report run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub participant_id: String,
    /// Email registered with the ring vendor
    pub email: Option<String>,
    pub ring_vendor: RingVendor,
    pub custom_fields: CustomFields,
}

impl Participant {
    pub fn new(participant_id: impl Into<String>) -> Self {
        Self {
            participant_id: participant_id.into(),
            email: None,
            ring_vendor: RingVendor::Ultrahuman,
            custom_fields: CustomFields::default(),
        }
    }
}

/// How week 1 is anchored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorMode {
    /// Week 1 starts 280 days before the projected due date
    Gestational,
    /// Week 1 starts on the delivery date
    Postpartum,
}

impl AnchorMode {
    /// Column label for a week in this mode
    pub fn week_label(&self, week: u32) -> String {
        match self {
            AnchorMode::Gestational => format!("W{week}"),
            AnchorMode::Postpartum => format!("PP W{week}"),
        }
    }
}

/// First day of week 1 for a participant under one anchoring mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeekAnchor {
    pub mode: AnchorMode,
    pub date: NaiveDate,
}

/// One study week as an inclusive calendar date range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeekWindow {
    pub week: u32,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl WeekWindow {
    /// Check if a day falls within this window.
    pub fn contains(&self, day: NaiveDate) -> bool {
        day >= self.start && day <= self.end
    }

    /// Iterate the calendar days of this window.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d <= end)
    }
}

/// Tracked activities.
///
/// The declaration order is the display order of matrix rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activity {
    SymptomCheckIn,
    DailyQuestions,
    PeriodicQuestionnaire,
    OuraRingWear,
    UltrahumanRingWear,
    Weight,
    BloodPressure,
}

/// Activity group used for the weekly averages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    SelfReport,
    Biometric,
}

impl Category {
    pub fn average_label(&self) -> &'static str {
        match self {
            Category::SelfReport => "Self Report Average",
            Category::Biometric => "Biometrics Average",
        }
    }
}

/// Rule for turning a raw weekly count into a completion percentage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    /// Days out of seven
    Daily,
    /// Done at least once
    Binary,
    /// Count out of a weekly target, full marks at the target
    Capped(u32),
}

impl Activity {
    pub const ALL: [Activity; 7] = [
        Activity::SymptomCheckIn,
        Activity::DailyQuestions,
        Activity::PeriodicQuestionnaire,
        Activity::OuraRingWear,
        Activity::UltrahumanRingWear,
        Activity::Weight,
        Activity::BloodPressure,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Activity::SymptomCheckIn => "symptom_check_in",
            Activity::DailyQuestions => "daily_questions",
            Activity::PeriodicQuestionnaire => "periodic_questionnaire",
            Activity::OuraRingWear => "oura_ring_wear",
            Activity::UltrahumanRingWear => "ultrahuman_ring_wear",
            Activity::Weight => "weight",
            Activity::BloodPressure => "blood_pressure",
        }
    }

    /// Row label shown to study coordinators
    pub fn label(&self) -> &'static str {
        match self {
            Activity::SymptomCheckIn => "Symptom check-in (daily)",
            Activity::DailyQuestions => "Daily questions (1-5 Q)",
            Activity::PeriodicQuestionnaire => "Weekly/bimonthly questionnaire",
            Activity::OuraRingWear => "Oura - Smart ring wear (~19h/day)",
            Activity::UltrahumanRingWear => "UH - Smart ring wear (~19h/day)",
            Activity::Weight => "Weight(per week)",
            Activity::BloodPressure => "BP (per week)",
        }
    }

    pub fn category(&self) -> Category {
        match self {
            Activity::SymptomCheckIn | Activity::DailyQuestions | Activity::PeriodicQuestionnaire => {
                Category::SelfReport
            }
            Activity::OuraRingWear
            | Activity::UltrahumanRingWear
            | Activity::Weight
            | Activity::BloodPressure => Category::Biometric,
        }
    }

    pub fn conversion(&self) -> Conversion {
        match self {
            Activity::SymptomCheckIn
            | Activity::DailyQuestions
            | Activity::OuraRingWear
            | Activity::UltrahumanRingWear => Conversion::Daily,
            Activity::PeriodicQuestionnaire => Conversion::Binary,
            Activity::Weight | Activity::BloodPressure => Conversion::Capped(2),
        }
    }
}

/// A contiguous week range reported as one unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "StageRequestFields")]
pub struct StageRequest {
    pub label: String,
    pub first_week: u32,
    pub last_week: u32,
    pub mode: AnchorMode,
    /// Gestational weeks to report instead when postpartum anchor data is missing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gestational_fallback: Option<(u32, u32)>,
}

impl StageRequest {
    /// Create a stage request, rejecting empty or zero-based week ranges.
    pub fn new(
        label: impl Into<String>,
        first_week: u32,
        last_week: u32,
        mode: AnchorMode,
    ) -> Result<Self, ComplianceError> {
        validate_weeks(first_week, last_week)?;
        Ok(Self {
            label: label.into(),
            first_week,
            last_week,
            mode,
            gestational_fallback: None,
        })
    }

    /// Report the given gestational weeks when delivery data is unavailable.
    pub fn with_gestational_fallback(
        mut self,
        first_week: u32,
        last_week: u32,
    ) -> Result<Self, ComplianceError> {
        validate_weeks(first_week, last_week)?;
        self.gestational_fallback = Some((first_week, last_week));
        Ok(self)
    }

    /// Number of weeks covered by this stage
    pub fn week_count(&self) -> usize {
        self.last_week
            .checked_sub(self.first_week)
            .map_or(0, |span| span as usize + 1)
    }

    /// The four stages of a standard participation report
    pub fn standard_stages() -> Vec<StageRequest> {
        vec![
            StageRequest::fixed("Prenatal Weeks 9-19", 9, 19, AnchorMode::Gestational, None),
            StageRequest::fixed("Prenatal Weeks 20-30", 20, 30, AnchorMode::Gestational, None),
            StageRequest::fixed("Prenatal Weeks 31-40", 31, 40, AnchorMode::Gestational, None),
            StageRequest::fixed(
                "Postpartum Weeks 1-6",
                1,
                6,
                AnchorMode::Postpartum,
                Some((41, 46)),
            ),
        ]
    }

    fn fixed(
        label: &str,
        first_week: u32,
        last_week: u32,
        mode: AnchorMode,
        gestational_fallback: Option<(u32, u32)>,
    ) -> Self {
        Self {
            label: label.to_string(),
            first_week,
            last_week,
            mode,
            gestational_fallback,
        }
    }
}

/// Wire form of [`StageRequest`], checked before it becomes one
#[derive(Deserialize)]
struct StageRequestFields {
    label: String,
    first_week: u32,
    last_week: u32,
    mode: AnchorMode,
    #[serde(default)]
    gestational_fallback: Option<(u32, u32)>,
}

impl TryFrom<StageRequestFields> for StageRequest {
    type Error = ComplianceError;

    fn try_from(fields: StageRequestFields) -> Result<Self, Self::Error> {
        let request = StageRequest::new(
            fields.label,
            fields.first_week,
            fields.last_week,
            fields.mode,
        )?;
        match fields.gestational_fallback {
            Some((first, last)) => request.with_gestational_fallback(first, last),
            None => Ok(request),
        }
    }
}

pub(crate) fn validate_weeks(first_week: u32, last_week: u32) -> Result<(), ComplianceError> {
    if first_week == 0 {
        return Err(ComplianceError::InvalidStage(
            "weeks are numbered from 1".to_string(),
        ));
    }
    if first_week > last_week {
        return Err(ComplianceError::InvalidStage(format!(
            "first week {first_week} is after last week {last_week}"
        )));
    }
    Ok(())
}

/// Raw per-week counts for one activity, one value per week of the stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityWeeklySeries {
    pub first_week: u32,
    pub values: Vec<u32>,
}

impl ActivityWeeklySeries {
    pub fn new(first_week: u32, values: Vec<u32>) -> Self {
        Self { first_week, values }
    }

    pub fn zeros(first_week: u32, weeks: usize) -> Self {
        Self::new(first_week, vec![0; weeks])
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value for an absolute study week
    pub fn get(&self, week: u32) -> Option<u32> {
        week.checked_sub(self.first_week)
            .and_then(|idx| self.values.get(idx as usize).copied())
    }
}

/// One raw-count row of the compliance matrix
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountRow {
    pub activity: Activity,
    pub label: String,
    pub series: ActivityWeeklySeries,
}

/// Activity x week matrix of raw counts for one stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceMatrix {
    pub week_labels: Vec<String>,
    pub rows: Vec<CountRow>,
}

impl ComplianceMatrix {
    pub fn new(week_labels: Vec<String>) -> Self {
        Self {
            week_labels,
            rows: Vec::new(),
        }
    }

    /// Insert or replace a row, keeping rows in display order.
    pub fn insert(&mut self, activity: Activity, series: ActivityWeeklySeries) {
        self.rows.retain(|row| row.activity != activity);
        self.rows.push(CountRow {
            activity,
            label: activity.label().to_string(),
            series,
        });
        self.rows.sort_by_key(|row| row.activity);
    }

    pub fn get(&self, activity: Activity) -> Option<&ActivityWeeklySeries> {
        self.rows
            .iter()
            .find(|row| row.activity == activity)
            .map(|row| &row.series)
    }

    pub fn week_count(&self) -> usize {
        self.week_labels.len()
    }
}

/// One percentage row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PercentageRow {
    pub activity: Activity,
    pub label: String,
    pub values: Vec<f64>,
}

/// Weekly category averages appended below the activity rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryAverages {
    pub self_report: Vec<f64>,
    pub biometric: Vec<f64>,
}

/// Percentage-normalized matrix for one stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PercentageMatrix {
    pub week_labels: Vec<String>,
    pub rows: Vec<PercentageRow>,
    pub averages: CategoryAverages,
}

impl PercentageMatrix {
    pub fn get(&self, activity: Activity) -> Option<&[f64]> {
        self.rows
            .iter()
            .find(|row| row.activity == activity)
            .map(|row| row.values.as_slice())
    }
}

/// Weekly compensation in whole dollars
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensationRow {
    pub weekly: Vec<u32>,
    pub total: u32,
}

/// Complete output for one stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    pub label: String,
    pub title: String,
    /// Mode actually used, which differs from the request after a fallback
    pub mode: AnchorMode,
    pub anchor: WeekAnchor,
    pub first_week: u32,
    pub last_week: u32,
    pub counts: ComplianceMatrix,
    pub percentages: PercentageMatrix,
    pub compensation: CompensationRow,
}

/// Outcome of one stage inside a participant report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageOutcome {
    Completed(StageReport),
    Failed { label: String, error: String },
}

/// Producer metadata embedded in encoded reports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportProducer {
    pub name: String,
    pub version: String,
}

/// Report for one participant across several stages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantReport {
    pub report_id: String,
    pub generated_at: DateTime<Utc>,
    pub producer: ReportProducer,
    pub participant_id: String,
    pub ring_vendor: RingVendor,
    pub stages: Vec<StageOutcome>,
}

impl ParticipantReport {
    /// Sum of compensation over the stages that completed
    pub fn total_compensation(&self) -> u32 {
        self.stages
            .iter()
            .filter_map(|stage| match stage {
                StageOutcome::Completed(report) => Some(report.compensation.total),
                StageOutcome::Failed { .. } => None,
            })
            .sum()
    }
}
