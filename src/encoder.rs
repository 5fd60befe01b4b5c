//! Report encoding
//!
//! This module assembles participant reports and encodes them for whatever
//! renders them: JSON for tools, a plain-text table for people.

use chrono::Utc;
use std::fmt::Write;
use uuid::Uuid;

use crate::error::ComplianceError;
use crate::types::{
    Category, Participant, ParticipantReport, ReportProducer, StageOutcome, StageReport,
};
use crate::{PRODUCER_NAME, VERSION};

/// Encoder for participant reports
pub struct ReportEncoder {
    producer: ReportProducer,
}

impl Default for ReportEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportEncoder {
    pub fn new() -> Self {
        Self {
            producer: ReportProducer {
                name: PRODUCER_NAME.to_string(),
                version: VERSION.to_string(),
            },
        }
    }

    /// Wrap stage outcomes into a report with a fresh id
    pub fn assemble(
        &self,
        participant: &Participant,
        stages: Vec<StageOutcome>,
    ) -> ParticipantReport {
        ParticipantReport {
            report_id: Uuid::new_v4().to_string(),
            generated_at: Utc::now(),
            producer: self.producer.clone(),
            participant_id: participant.participant_id.clone(),
            ring_vendor: participant.ring_vendor,
            stages,
        }
    }

    /// Encode to JSON string
    pub fn encode_to_json(
        &self,
        report: &ParticipantReport,
        pretty: bool,
    ) -> Result<String, ComplianceError> {
        let json = if pretty {
            serde_json::to_string_pretty(report)?
        } else {
            serde_json::to_string(report)?
        };
        Ok(json)
    }

    /// Render every stage of a report as plain-text tables.
    pub fn render_table(&self, report: &ParticipantReport) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Participant {} (ring: {})",
            report.participant_id,
            report.ring_vendor.as_str()
        );
        for stage in &report.stages {
            out.push('\n');
            match stage {
                StageOutcome::Completed(stage) => out.push_str(&render_stage(stage)),
                StageOutcome::Failed { label, error } => {
                    let _ = writeln!(out, "{label}: failed: {error}");
                }
            }
        }
        out
    }
}

/// Render one stage: raw counts, then percentages with averages and compensation.
pub fn render_stage(stage: &StageReport) -> String {
    let labels = &stage.counts.week_labels;

    let count_rows: Vec<(String, Vec<String>)> = stage
        .counts
        .rows
        .iter()
        .map(|row| {
            let cells = row.series.values.iter().map(u32::to_string).collect();
            (row.label.clone(), cells)
        })
        .collect();

    let percent = |values: &[f64]| -> Vec<String> {
        values.iter().map(|v| format!("{v:.1}%")).collect()
    };
    let mut percent_rows: Vec<(String, Vec<String>)> = stage
        .percentages
        .rows
        .iter()
        .map(|row| (row.label.clone(), percent(&row.values)))
        .collect();
    percent_rows.push((
        Category::SelfReport.average_label().to_string(),
        percent(&stage.percentages.averages.self_report),
    ));
    percent_rows.push((
        Category::Biometric.average_label().to_string(),
        percent(&stage.percentages.averages.biometric),
    ));
    percent_rows.push((
        "Compensation".to_string(),
        stage
            .compensation
            .weekly
            .iter()
            .map(|amount| format!("${amount}"))
            .collect(),
    ));

    let mut out = String::new();
    let _ = writeln!(out, "{}", stage.title);
    let _ = writeln!(out, "Raw counts");
    write_grid(&mut out, labels, &count_rows);
    let _ = writeln!(out, "Completion");
    write_grid(&mut out, labels, &percent_rows);
    let _ = writeln!(
        out,
        "Total compensation for this stage: ${}",
        stage.compensation.total
    );
    out
}

fn write_grid(out: &mut String, headers: &[String], rows: &[(String, Vec<String>)]) {
    let label_width = rows.iter().map(|(label, _)| label.len()).max().unwrap_or(0);
    let cell_width = headers
        .iter()
        .map(String::len)
        .chain(rows.iter().flat_map(|(_, cells)| cells.iter().map(String::len)))
        .max()
        .unwrap_or(0);

    let _ = write!(out, "{:label_width$}", "");
    for header in headers {
        let _ = write!(out, "  {header:>cell_width$}");
    }
    out.push('\n');

    for (label, cells) in rows {
        let _ = write!(out, "{label:<label_width$}");
        for cell in cells {
            let _ = write!(out, "  {cell:>cell_width$}");
        }
        out.push('\n');
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compensation::CompensationPolicy;
    use crate::normalizer::PercentageNormalizer;
    use crate::types::{
        Activity, ActivityWeeklySeries, AnchorMode, ComplianceMatrix, RingVendor, WeekAnchor,
    };
    use chrono::NaiveDate;

    fn stage() -> StageReport {
        let mut counts = ComplianceMatrix::new(vec!["W9".to_string(), "W10".to_string()]);
        counts.insert(Activity::SymptomCheckIn, ActivityWeeklySeries::new(9, vec![7, 3]));
        counts.insert(Activity::DailyQuestions, ActivityWeeklySeries::new(9, vec![7, 0]));
        counts.insert(Activity::PeriodicQuestionnaire, ActivityWeeklySeries::new(9, vec![1, 0]));
        counts.insert(Activity::UltrahumanRingWear, ActivityWeeklySeries::new(9, vec![7, 0]));
        counts.insert(Activity::Weight, ActivityWeeklySeries::new(9, vec![1, 0]));
        counts.insert(Activity::BloodPressure, ActivityWeeklySeries::new(9, vec![2, 0]));
        let percentages = PercentageNormalizer::normalize(&counts).unwrap();
        let compensation = CompensationPolicy::default().calculate(&percentages.averages);

        StageReport {
            label: "Prenatal Weeks 9-10".to_string(),
            title: "Prenatal Weeks 9-10 Weekly Compliance".to_string(),
            mode: AnchorMode::Gestational,
            anchor: WeekAnchor {
                mode: AnchorMode::Gestational,
                date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            },
            first_week: 9,
            last_week: 10,
            counts,
            percentages,
            compensation,
        }
    }

    fn report() -> ParticipantReport {
        let mut participant = Participant::new("BB-0001");
        participant.ring_vendor = RingVendor::Ultrahuman;
        ReportEncoder::new().assemble(
            &participant,
            vec![
                StageOutcome::Completed(stage()),
                StageOutcome::Failed {
                    label: "Postpartum Weeks 1-6".to_string(),
                    error: "Missing anchor data".to_string(),
                },
            ],
        )
    }

    #[test]
    fn test_assemble_metadata() {
        let first = report();
        assert_eq!(first.producer.name, PRODUCER_NAME);
        assert_eq!(first.producer.version, VERSION);
        assert!(Uuid::parse_str(&first.report_id).is_ok());
        assert_ne!(first.report_id, report().report_id);
    }

    #[test]
    fn test_encode_to_json() {
        let encoder = ReportEncoder::new();
        let json = encoder.encode_to_json(&report(), false).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["participant_id"], "BB-0001");
        assert_eq!(value["ring_vendor"], "ultrahuman");
        assert_eq!(value["stages"][0]["status"], "completed");
        assert_eq!(value["stages"][0]["compensation"]["total"], 7);
        assert_eq!(value["stages"][1]["status"], "failed");

        let pretty = encoder.encode_to_json(&report(), true).unwrap();
        assert!(pretty.contains('\n'));
    }

    #[test]
    fn test_render_stage() {
        let text = render_stage(&stage());
        assert!(text.starts_with("Prenatal Weeks 9-10 Weekly Compliance\n"));
        assert!(text.contains("UH - Smart ring wear (~19h/day)"));
        assert!(text.contains("42.9%"));
        assert!(text.contains("Self Report Average"));
        assert!(text.contains("Biometrics Average"));
        assert!(text.contains("$7"));
        assert!(text.ends_with("Total compensation for this stage: $7\n"));
    }

    #[test]
    fn test_render_table_includes_failures() {
        let text = ReportEncoder::new().render_table(&report());
        assert!(text.starts_with("Participant BB-0001 (ring: uh)"));
        assert!(text.contains("Postpartum Weeks 1-6: failed: Missing anchor data"));
    }
}
