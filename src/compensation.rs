//! Compensation calculator

use serde::{Deserialize, Serialize};

use crate::types::{CategoryAverages, CompensationRow};

/// Weekly payout rules
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompensationPolicy {
    /// Inclusive percentage a category average must reach to pay out
    pub threshold: f64,
    /// Dollars for meeting the self-report threshold
    pub self_report_amount: u32,
    /// Dollars for meeting the biometric threshold
    pub biometric_amount: u32,
}

impl Default for CompensationPolicy {
    fn default() -> Self {
        Self {
            threshold: 70.0,
            self_report_amount: 3,
            biometric_amount: 4,
        }
    }
}

impl CompensationPolicy {
    /// Compensation for one week
    pub fn weekly_amount(&self, self_report: f64, biometric: f64) -> u32 {
        let mut amount = 0;
        if self_report >= self.threshold {
            amount += self.self_report_amount;
        }
        if biometric >= self.threshold {
            amount += self.biometric_amount;
        }
        amount
    }

    /// Compensation row for a stage
    pub fn calculate(&self, averages: &CategoryAverages) -> CompensationRow {
        let weekly: Vec<u32> = averages
            .self_report
            .iter()
            .zip(&averages.biometric)
            .map(|(self_report, biometric)| self.weekly_amount(*self_report, *biometric))
            .collect();
        let total = weekly.iter().sum();
        CompensationRow { weekly, total }
    }
}
