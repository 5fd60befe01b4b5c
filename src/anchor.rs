//! Week anchoring
//!
//! Resolves the date of study week 1 for a participant and turns a stage's week
//! range into concrete calendar windows. Gestational weeks count from 280 days
//! before the projected due date; postpartum weeks count from the delivery date
//! and stop at the end of the postpartum follow-up period.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime};
use std::collections::BTreeSet;

use crate::error::ComplianceError;
use crate::types::{ActivityWeeklySeries, AnchorMode, Participant, WeekAnchor, WeekWindow};

/// Days between week 1 and the projected due date (40 weeks)
pub const GESTATION_DAYS: i64 = 280;

pub const DAYS_PER_WEEK: i64 = 7;

/// Anchor strategy for one participant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnchorStrategy {
    Gestational { due_date: NaiveDate },
    Postpartum { delivery_date: NaiveDate, period_days: i64 },
}

impl AnchorStrategy {
    pub fn mode(&self) -> AnchorMode {
        match self {
            AnchorStrategy::Gestational { .. } => AnchorMode::Gestational,
            AnchorStrategy::Postpartum { .. } => AnchorMode::Postpartum,
        }
    }

    /// First day of week 1
    pub fn anchor(&self) -> WeekAnchor {
        let date = match self {
            AnchorStrategy::Gestational { due_date } => *due_date - Duration::days(GESTATION_DAYS),
            AnchorStrategy::Postpartum { delivery_date, .. } => *delivery_date,
        };
        WeekAnchor {
            mode: self.mode(),
            date,
        }
    }

    /// Last day of the postpartum period, if this strategy has one
    pub fn period_end(&self) -> Option<NaiveDate> {
        match self {
            AnchorStrategy::Gestational { .. } => None,
            AnchorStrategy::Postpartum {
                delivery_date,
                period_days,
            } => Some(*delivery_date + Duration::days(*period_days)),
        }
    }

    /// Calendar window for a week, or `None` when the week starts after the period end.
    pub fn window(&self, week: u32) -> Option<WeekWindow> {
        let anchor = self.anchor().date;
        let start = anchor + Duration::days(DAYS_PER_WEEK * (i64::from(week) - 1));
        let mut end = start + Duration::days(DAYS_PER_WEEK - 1);

        if let Some(period_end) = self.period_end() {
            if start > period_end {
                return None;
            }
            end = end.min(period_end);
        }

        Some(WeekWindow { week, start, end })
    }

    /// Windows for every in-range week of a stage.
    pub fn stage_windows(&self, first_week: u32, last_week: u32) -> StageWindows {
        let windows = (first_week..=last_week)
            .filter_map(|week| self.window(week))
            .collect();
        StageWindows {
            mode: self.mode(),
            first_week,
            last_week,
            windows,
        }
    }
}

/// Study week containing `day`, counted from `anchor` (week 1 starts on the anchor).
pub fn week_index(anchor: NaiveDate, day: NaiveDate) -> i64 {
    1 + (day - anchor).num_days().div_euclid(DAYS_PER_WEEK)
}

/// The week windows of one stage.
///
/// Weeks excluded by the anchor (postpartum weeks past the period end) have no
/// window, but still occupy a zero slot in every series produced here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageWindows {
    pub mode: AnchorMode,
    pub first_week: u32,
    pub last_week: u32,
    pub windows: Vec<WeekWindow>,
}

impl StageWindows {
    /// Weeks in the stage; an inverted range has none
    pub fn week_count(&self) -> usize {
        self.last_week
            .checked_sub(self.first_week)
            .map_or(0, |span| span as usize + 1)
    }

    pub fn week_labels(&self) -> Vec<String> {
        (self.first_week..=self.last_week)
            .map(|week| self.mode.week_label(week))
            .collect()
    }

    /// Earliest and latest day covered by any window
    pub fn span(&self) -> Option<(NaiveDate, NaiveDate)> {
        let start = self.windows.iter().map(|w| w.start).min()?;
        let end = self.windows.iter().map(|w| w.end).max()?;
        Some((start, end))
    }

    /// Build a full-length series from a per-window count.
    pub fn tally<F>(&self, mut count: F) -> ActivityWeeklySeries
    where
        F: FnMut(&WeekWindow) -> u32,
    {
        let values = (self.first_week..=self.last_week)
            .map(|week| {
                self.windows
                    .iter()
                    .find(|w| w.week == week)
                    .map(&mut count)
                    .unwrap_or(0)
            })
            .collect();
        ActivityWeeklySeries::new(self.first_week, values)
    }

    /// Count qualifying days per week window.
    pub fn count_days(&self, days: &BTreeSet<NaiveDate>) -> ActivityWeeklySeries {
        self.tally(|window| days.range(window.start..=window.end).count() as u32)
    }
}

/// Resolves anchor strategies from participant custom fields
pub struct WeekAnchorResolver;

impl WeekAnchorResolver {
    /// Resolve the anchor strategy for a participant under the given mode.
    pub fn resolve(
        participant: &Participant,
        mode: AnchorMode,
    ) -> Result<AnchorStrategy, ComplianceError> {
        let fields = &participant.custom_fields;
        let id = participant.participant_id.as_str();

        match mode {
            AnchorMode::Gestational => {
                let raw = fields
                    .edd_final
                    .as_deref()
                    .ok_or_else(|| ComplianceError::missing_anchor(id, "no projected due date"))?;
                let due_date = parse_field_date(raw).ok_or_else(|| {
                    ComplianceError::missing_anchor(id, format!("unparsable due date {raw:?}"))
                })?;
                Ok(AnchorStrategy::Gestational { due_date })
            }
            AnchorMode::Postpartum => {
                let raw_delivery = fields
                    .delivery_date
                    .as_deref()
                    .ok_or_else(|| ComplianceError::missing_anchor(id, "no delivery date"))?;
                let delivery_date = parse_field_date(raw_delivery).ok_or_else(|| {
                    ComplianceError::missing_anchor(
                        id,
                        format!("unparsable delivery date {raw_delivery:?}"),
                    )
                })?;
                let raw_days = fields
                    .postpartum_days
                    .as_deref()
                    .ok_or_else(|| ComplianceError::missing_anchor(id, "no postpartum period"))?;
                let period_days = parse_period_days(raw_days).ok_or_else(|| {
                    ComplianceError::missing_anchor(
                        id,
                        format!("invalid postpartum period {raw_days:?}"),
                    )
                })?;
                Ok(AnchorStrategy::Postpartum {
                    delivery_date,
                    period_days,
                })
            }
        }
    }
}

/// Parse a directory date field: a plain date, or a timestamp whose date part is used.
pub fn parse_field_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(ts.date());
        }
    }
    DateTime::parse_from_rfc3339(raw).ok().map(|ts| ts.date_naive())
}

/// A zero-length period counts as absent, like an unset field.
fn parse_period_days(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    let days = match raw.parse::<i64>() {
        Ok(days) => days,
        Err(_) => {
            let value = raw.parse::<f64>().ok()?;
            if !value.is_finite() || value.fract() != 0.0 {
                return None;
            }
            value as i64
        }
    };
    (days > 0).then_some(days)
}
