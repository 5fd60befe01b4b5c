//! End-to-end stage reports over an in-memory warehouse.

use chrono::{Duration, NaiveDate};
use pretty_assertions::assert_eq;
use std::fs;
use std::sync::Arc;

use participation_compliance::adapters::{BloodPressureCounting, SharedSource};
use participation_compliance::source::{Row, Value};
use participation_compliance::{
    Activity, AnchorMode, ComplianceMatrixBuilder, ComplianceReporter, JsonDirectory,
    MemorySource, StageOutcome, StageReport, StageRequest, TableDirectory, TableName,
};

const DIRECTORY: &str = r#"{
    "participants": [
        {
            "participantIdentifier": "BB-0001",
            "customFields": {"edd_final": "2024-10-07", "ring_vendor": "oura"}
        },
        {
            "participantIdentifier": "BB-0002",
            "customFields": {
                "edd_final": "2024-10-07",
                "delivery_date": "2024-10-01",
                "postpartum_days": 30
            }
        }
    ]
}"#;

/// Day `offset` of gestational week `week` for a due date of 2024-10-07
fn gestational_day(week: u32, offset: i64) -> NaiveDate {
    let anchor = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    anchor + Duration::days(7 * (i64::from(week) - 1) + offset)
}

fn at(day: NaiveDate, time: &str) -> String {
    format!("{day} {time}")
}

fn submit(source: &mut MemorySource, key: &str, survey: &str, answers: &[&str], ts: &str) {
    source.insert(
        TableName::SurveyResults,
        Row::new().with("surveyresultkey", key).with("surveyname", survey),
    );
    for answer in answers {
        source.insert(
            TableName::SurveyQuestionResults,
            Row::new()
                .with("participantidentifier", "BB-0001")
                .with("surveyresultkey", key)
                .with("resultidentifier", *answer)
                .with("startdate", ts),
        );
    }
}

fn device_row(pid: &str, ts: String) -> Row {
    Row::new()
        .with("participantidentifier", pid)
        .with("inserteddate", ts)
}

/// Weeks 9-13 meet both thresholds, weeks 14-16 only self-report, 17-19 nothing.
fn prenatal_fixture() -> MemorySource {
    let mut source = MemorySource::new();
    let pid = "BB-0001";

    for week in 9..=16 {
        for offset in 0..7 {
            source.insert(
                TableName::ProjectDeviceData,
                device_row(pid, at(gestational_day(week, offset), "08:00:00")),
            );
        }
        submit(
            &mut source,
            &format!("ema-{week}"),
            "EMA AM",
            &["q1", "q2", "q3", "q4", "q5", "q6"],
            &at(gestational_day(week, 0), "15:00:00"),
        );
        submit(
            &mut source,
            &format!("mmos-{week}"),
            "mMOS (Weekly)",
            &["q1"],
            &at(gestational_day(week, 1), "19:00:00"),
        );
    }

    for week in 9..=13 {
        for offset in 0..7 {
            source.insert(
                TableName::OuraDailyActivity,
                Row::new()
                    .with("participantidentifier", pid)
                    .with("timestamp", gestational_day(week, offset))
                    .with("nonweartime", Value::Int(0)),
            );
        }
        for offset in [0, 3] {
            source.insert(
                TableName::HealthKitSamples,
                Row::new()
                    .with("participantidentifier", pid)
                    .with("type", "Weight")
                    .with("startdate", at(gestational_day(week, offset), "15:00:00")),
            );
        }
        for offset in [0, 2] {
            source.insert(
                TableName::OmronBloodPressure,
                Row::new()
                    .with("participantidentifier", pid)
                    .with("datetimelocal", at(gestational_day(week, offset), "08:00:00"))
                    .with("datetime", Value::Null)
                    .with("inserteddate", Value::Null),
            );
        }
    }

    for week in 14..=16 {
        source.insert(
            TableName::GoogleFitSamples,
            Row::new()
                .with("participantidentifier", pid)
                .with("type", "Weight")
                .with("windowstart", at(gestational_day(week, 4), "15:00:00")),
        );
    }

    // EPDS only counts in week 28; the attachment scale belongs to week 20
    submit(
        &mut source,
        "epds-27",
        "Edinburgh Postnatal Depression Scale (EPDS)",
        &["q1"],
        &at(gestational_day(27, 2), "19:00:00"),
    );
    submit(
        &mut source,
        "epds-28",
        "Edinburgh Postnatal Depression Scale (EPDS)",
        &["q1"],
        &at(gestational_day(28, 2), "19:00:00"),
    );
    submit(
        &mut source,
        "maas-28",
        "Maternal Antenatal Attachment Scale",
        &["q1"],
        &at(gestational_day(28, 3), "19:00:00"),
    );

    source
}

fn reporter(source: MemorySource) -> ComplianceReporter {
    let shared: SharedSource = Arc::new(source);
    let builder = ComplianceMatrixBuilder::new(shared, None, BloodPressureCounting::Union);
    let directory = JsonDirectory::from_json(DIRECTORY).unwrap();
    ComplianceReporter::new(Box::new(directory), builder)
}

fn completed(outcome: &StageOutcome) -> &StageReport {
    match outcome {
        StageOutcome::Completed(report) => report,
        StageOutcome::Failed { label, error } => panic!("{label} failed: {error}"),
    }
}

#[test]
fn test_prenatal_stage_compensation() {
    let reporter = reporter(prenatal_fixture());
    let participant = reporter.participant("BB-0001").unwrap();
    let stage = &StageRequest::standard_stages()[0];
    let report = reporter.generate_stage(&participant, stage).unwrap();

    let mut symptoms = vec![7; 8];
    symptoms.extend([0; 3]);
    assert_eq!(
        report.counts.get(Activity::SymptomCheckIn).unwrap().values,
        symptoms
    );

    let mut ring = vec![7; 5];
    ring.extend([0; 6]);
    assert_eq!(report.counts.get(Activity::OuraRingWear).unwrap().values, ring);
    assert!(report.counts.get(Activity::UltrahumanRingWear).is_none());

    let mut weight = vec![2; 5];
    weight.extend([1; 3]);
    weight.extend([0; 3]);
    assert_eq!(report.counts.get(Activity::Weight).unwrap().values, weight);

    let mut weekly = vec![7; 5];
    weekly.extend([3; 3]);
    weekly.extend([0; 3]);
    assert_eq!(report.compensation.weekly, weekly);
    assert_eq!(report.compensation.total, 44);

    let self_report = report.percentages.averages.self_report[0];
    assert!((self_report - 71.428_571).abs() < 1e-3);
    assert!((report.percentages.averages.biometric[5] - 50.0 / 3.0).abs() < 1e-9);
}

#[test]
fn test_exception_survey_counts_only_in_its_week() {
    let reporter = reporter(prenatal_fixture());
    let participant = reporter.participant("BB-0001").unwrap();
    let stage = &StageRequest::standard_stages()[1];
    let report = reporter.generate_stage(&participant, stage).unwrap();

    let mut expected = vec![0; 11];
    expected[8] = 1;
    assert_eq!(
        report.counts.get(Activity::PeriodicQuestionnaire).unwrap().values,
        expected
    );
    assert_eq!(report.compensation.total, 0);
}

#[test]
fn test_full_report_uses_fallback_stage() {
    let reporter = reporter(prenatal_fixture());
    let report = reporter
        .generate_report("BB-0001", &StageRequest::standard_stages())
        .unwrap();

    assert_eq!(report.stages.len(), 4);
    let fallback = completed(&report.stages[3]);
    assert_eq!(fallback.mode, AnchorMode::Gestational);
    assert_eq!(fallback.counts.week_labels.first().unwrap(), "W41");
    assert_eq!(fallback.counts.week_labels.last().unwrap(), "W46");
    assert_eq!(report.total_compensation(), 44);
}

#[test]
fn test_postpartum_weeks_after_period_are_zero() {
    let mut source = MemorySource::new();
    for ts in [
        "2024-10-02 08:00:00",
        "2024-10-30 08:00:00",
        "2024-11-01 08:00:00",
        "2024-11-06 08:00:00",
    ] {
        source.insert(TableName::ProjectDeviceData, device_row("BB-0002", ts.to_string()));
    }

    let reporter = reporter(source);
    let report = reporter
        .generate_report("BB-0002", &StageRequest::standard_stages()[3..])
        .unwrap();
    let stage = completed(&report.stages[0]);

    assert_eq!(stage.mode, AnchorMode::Postpartum);
    assert_eq!(
        stage.counts.week_labels,
        vec!["PP W1", "PP W2", "PP W3", "PP W4", "PP W5", "PP W6"]
    );
    assert_eq!(
        stage.counts.get(Activity::SymptomCheckIn).unwrap().values,
        vec![1, 0, 0, 0, 1, 0]
    );
    assert_eq!(
        stage.title,
        "Postpartum Weeks 1-6 Weekly Compliance (from delivery 2024-10-01)"
    );
}

#[test]
fn test_reports_from_csv_exports() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("allparticipants.csv"),
        "ParticipantIdentifier,CustomFields\n\
         BB-0100,\"{\"\"edd_final\"\":\"\"2024-10-07\"\"}\"\n",
    )
    .unwrap();
    let week9 = gestational_day(9, 0);
    fs::write(
        dir.path().join("projectdevicedata.csv"),
        format!(
            "participantidentifier,inserteddate\n\
             BB-0100,{}\n\
             BB-0100,{}\n\
             BB-0100,{}\n\
             BB-0101,{}\n",
            at(week9, "08:00:00"),
            at(week9 + Duration::days(1), "08:00:00"),
            at(week9 + Duration::days(1), "20:00:00"),
            at(week9 + Duration::days(2), "08:00:00"),
        ),
    )
    .unwrap();

    let source: SharedSource = Arc::new(MemorySource::from_csv_dir(dir.path()).unwrap());
    let directory = TableDirectory::new(source.clone());
    let builder = ComplianceMatrixBuilder::new(source, None, BloodPressureCounting::Union);
    let reporter = ComplianceReporter::new(Box::new(directory), builder);

    assert_eq!(reporter.list_participants(None).unwrap(), vec!["BB-0100"]);

    let stage = StageRequest::new("Prenatal Weeks 9-10", 9, 10, AnchorMode::Gestational).unwrap();
    let report = reporter.generate_report("BB-0100", &[stage]).unwrap();
    let stage = completed(&report.stages[0]);

    assert_eq!(
        stage.counts.get(Activity::SymptomCheckIn).unwrap().values,
        vec![2, 0]
    );
    assert_eq!(
        stage.counts.get(Activity::UltrahumanRingWear).unwrap().values,
        vec![0, 0]
    );
}
