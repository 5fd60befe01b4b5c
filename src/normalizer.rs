//! Percentage normalization
//!
//! This module converts the raw count matrix into completion percentages.
//! - Daily activities count days out of seven
//! - The periodic questionnaire is done or not done
//! - Weight and blood pressure count readings out of a weekly target of two
//!
//! Category averages are the per-week mean over the three activities of each
//! [`Category`]; a matrix missing a member of either group is rejected.

use crate::error::ComplianceError;
use crate::types::{
    Activity, Category, CategoryAverages, ComplianceMatrix, Conversion, PercentageMatrix,
    PercentageRow,
};

const DAYS_PER_WEEK: f64 = 7.0;

/// Activities averaged together in each category
pub const CATEGORY_SIZE: usize = 3;

/// Normalizer for converting raw counts to percentages
pub struct PercentageNormalizer;

impl PercentageNormalizer {
    /// Normalize a count matrix
    pub fn normalize(matrix: &ComplianceMatrix) -> Result<PercentageMatrix, ComplianceError> {
        let rows: Vec<PercentageRow> = matrix
            .rows
            .iter()
            .map(|row| PercentageRow {
                activity: row.activity,
                label: row.label.clone(),
                values: row
                    .series
                    .values
                    .iter()
                    .map(|raw| convert(row.activity, *raw))
                    .collect(),
            })
            .collect();

        let weeks = matrix.week_count();
        let averages = CategoryAverages {
            self_report: category_average(&rows, Category::SelfReport, weeks)?,
            biometric: category_average(&rows, Category::Biometric, weeks)?,
        };

        Ok(PercentageMatrix {
            week_labels: matrix.week_labels.clone(),
            rows,
            averages,
        })
    }
}

/// Convert one raw weekly value into a percentage in `[0, 100]`
pub fn convert(activity: Activity, raw: u32) -> f64 {
    match activity.conversion() {
        Conversion::Daily => (f64::from(raw) / DAYS_PER_WEEK * 100.0).min(100.0),
        Conversion::Binary => {
            if raw >= 1 {
                100.0
            } else {
                0.0
            }
        }
        Conversion::Capped(target) => {
            if raw >= target {
                100.0
            } else {
                f64::from(raw) / f64::from(target) * 100.0
            }
        }
    }
}

/// Per-week mean over the fixed activity group of one category
fn category_average(
    rows: &[PercentageRow],
    category: Category,
    weeks: usize,
) -> Result<Vec<f64>, ComplianceError> {
    let members: Vec<&PercentageRow> = rows
        .iter()
        .filter(|row| row.activity.category() == category)
        .collect();
    if members.len() != CATEGORY_SIZE {
        return Err(ComplianceError::IncompleteCategory {
            category: category.average_label().to_string(),
            expected: CATEGORY_SIZE,
            actual: members.len(),
        });
    }

    Ok((0..weeks)
        .map(|week| {
            let sum: f64 = members
                .iter()
                .map(|row| row.values.get(week).copied().unwrap_or(0.0))
                .sum();
            sum / CATEGORY_SIZE as f64
        })
        .collect())
}
