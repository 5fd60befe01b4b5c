//! Oura ring wear adapter

use std::collections::BTreeSet;
use tracing::debug;

use super::{ActivityAdapter, SharedSource, WEAR_THRESHOLD};
use crate::anchor::StageWindows;
use crate::error::ComplianceError;
use crate::source::{Query, TableName};
use crate::types::{Activity, ActivityWeeklySeries, Participant};

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Fraction of a day the ring was worn, from the non-wear seconds reported for it.
///
/// A missing non-wear value reads as full wear.
pub fn wear_fraction(nonwear_seconds: Option<f64>) -> f64 {
    (1.0 - nonwear_seconds.unwrap_or(0.0) / SECONDS_PER_DAY).clamp(0.0, 1.0)
}

/// Counts days the Oura ring was worn long enough
pub struct OuraRingAdapter {
    source: SharedSource,
}

impl OuraRingAdapter {
    pub fn new(source: SharedSource) -> Self {
        Self { source }
    }
}

impl ActivityAdapter for OuraRingAdapter {
    fn activity(&self) -> Activity {
        Activity::OuraRingWear
    }

    fn fetch(
        &self,
        participant: &Participant,
        windows: &StageWindows,
    ) -> Result<ActivityWeeklySeries, ComplianceError> {
        let Some((start, end)) = windows.span() else {
            return Ok(windows.tally(|_| 0));
        };

        let query = Query::select(TableName::OuraDailyActivity, &["timestamp", "nonweartime"])
            .where_eq("participantidentifier", participant.participant_id.as_str())
            .where_day_between(&["timestamp"], 0, start, end);
        let table = self.source.execute(&query)?;

        let worn: BTreeSet<_> = table
            .rows
            .iter()
            .filter(|row| wear_fraction(row.f64("nonweartime")) >= WEAR_THRESHOLD)
            .filter_map(|row| row.timestamp("timestamp").map(|ts| ts.date()))
            .collect();

        debug!(
            participant = %participant.participant_id,
            rows = table.len(),
            worn_days = worn.len(),
            "oura wear days"
        );
        Ok(windows.count_days(&worn))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::test_support::*;
    use crate::source::{MemorySource, Row, Value};
    use std::sync::Arc;

    fn activity_row(day: &str, nonwear: Value) -> Row {
        Row::new()
            .with("participantidentifier", "BB-0001")
            .with("timestamp", day)
            .with("nonweartime", nonwear)
    }

    #[test]
    fn test_wear_fraction_clamped() {
        assert_eq!(wear_fraction(Some(0.0)), 1.0);
        assert_eq!(wear_fraction(None), 1.0);
        assert_eq!(wear_fraction(Some(21_600.0)), 0.75);
        assert_eq!(wear_fraction(Some(100_000.0)), 0.0);
        assert_eq!(wear_fraction(Some(-500.0)), 1.0);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let source = MemorySource::new()
            // exactly 75% worn
            .with_row(TableName::OuraDailyActivity, activity_row("2024-01-01", Value::Int(21_600)))
            // just under
            .with_row(TableName::OuraDailyActivity, activity_row("2024-01-02", Value::Int(21_601)))
            // no non-wear value reported
            .with_row(TableName::OuraDailyActivity, activity_row("2024-01-03", Value::Null))
            .with_row(TableName::OuraDailyActivity, activity_row("2024-01-08T00:00:00", Value::text("0")));

        let adapter = OuraRingAdapter::new(Arc::new(source));
        let series = adapter.fetch(&participant(), &gestational(1, 2)).unwrap();
        assert_eq!(series.values, vec![2, 1]);
    }
}
