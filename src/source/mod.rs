//! Analytical query source
//!
//! Adapters describe what they need as a structured [`Query`] against one of
//! the study's named tables. Participant identifiers and dates are always bound
//! as parameters; [`Query::to_sql`] renders placeholder SQL for text backends.

mod memory;

pub use memory::MemorySource;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ComplianceError;

/// Tables the compliance engine reads from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableName {
    AllParticipants,
    ProjectDeviceData,
    SurveyResults,
    SurveyQuestionResults,
    OuraDailyActivity,
    UltrahumanTemp,
    OmronBloodPressure,
    GoogleFitSamples,
    HealthKitSamples,
}

impl TableName {
    pub const ALL: [TableName; 9] = [
        TableName::AllParticipants,
        TableName::ProjectDeviceData,
        TableName::SurveyResults,
        TableName::SurveyQuestionResults,
        TableName::OuraDailyActivity,
        TableName::UltrahumanTemp,
        TableName::OmronBloodPressure,
        TableName::GoogleFitSamples,
        TableName::HealthKitSamples,
    ];

    /// Warehouse table name
    pub fn as_str(&self) -> &'static str {
        match self {
            TableName::AllParticipants => "allparticipants",
            TableName::ProjectDeviceData => "projectdevicedata",
            TableName::SurveyResults => "surveyresults",
            TableName::SurveyQuestionResults => "surveyquestionresults",
            TableName::OuraDailyActivity => "ouradailyactivity",
            TableName::UltrahumanTemp => "temp",
            TableName::OmronBloodPressure => "omronbloodpressure",
            TableName::GoogleFitSamples => "googlefitsamples",
            TableName::HealthKitSamples => "healthkitv2samples",
        }
    }

    /// Columns the engine relies on
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            TableName::AllParticipants => &["participantidentifier", "customfields"],
            TableName::ProjectDeviceData => &["participantidentifier", "inserteddate"],
            TableName::SurveyResults => &["surveyresultkey", "surveyname"],
            TableName::SurveyQuestionResults => &[
                "participantidentifier",
                "surveyresultkey",
                "resultidentifier",
                "startdate",
            ],
            TableName::OuraDailyActivity => &["participantidentifier", "timestamp", "nonweartime"],
            TableName::UltrahumanTemp => &[
                "pid",
                "object_day_start_timestamp_iso8601_tz",
                "object_values_timestamp",
            ],
            TableName::OmronBloodPressure => &[
                "participantidentifier",
                "datetimelocal",
                "datetime",
                "inserteddate",
            ],
            TableName::GoogleFitSamples => &["participantidentifier", "type", "windowstart"],
            TableName::HealthKitSamples => &["participantidentifier", "type", "startdate"],
        }
    }
}

/// A single cell value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
}

impl Value {
    pub fn text(value: impl Into<String>) -> Self {
        Value::Text(value.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Interpret the value as a wall-clock timestamp.
    ///
    /// ISO-8601 values with an offset keep their local wall time, so taking the
    /// date afterwards yields the day in the zone the value was recorded in.
    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            Value::Timestamp(ts) => Some(*ts),
            Value::Date(d) => d.and_hms_opt(0, 0, 0),
            Value::Text(s) => parse_timestamp(s),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        self.as_timestamp().map(|ts| ts.date())
    }

    /// Equality used by filters: text compares as text, everything else by value.
    fn matches(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => false,
            (Value::Text(a), Value::Text(b)) => a == b,
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x == y,
                _ => a == b,
            },
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<NaiveDate> for Value {
    fn from(value: NaiveDate) -> Self {
        Value::Date(value)
    }
}

fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    for format in [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(ts);
        }
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.naive_local());
    }
    if let Ok(ts) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f %z") {
        return Some(ts.naive_local());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Query predicate with bound parameters
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq {
        column: String,
        value: Value,
    },
    In {
        column: String,
        values: Vec<Value>,
    },
    NotNull {
        column: String,
    },
    /// Day of the first non-null column, shifted by `shift_hours`, lies in `[start, end]`
    DayBetween {
        columns: Vec<String>,
        shift_hours: i64,
        start: NaiveDate,
        end: NaiveDate,
    },
}

impl Filter {
    /// Check a row against this predicate.
    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Filter::Eq { column, value } => row.get(column).is_some_and(|v| v.matches(value)),
            Filter::In { column, values } => row
                .get(column)
                .is_some_and(|v| values.iter().any(|candidate| v.matches(candidate))),
            Filter::NotNull { column } => row.get(column).is_some_and(|v| !v.is_null()),
            Filter::DayBetween {
                columns,
                shift_hours,
                start,
                end,
            } => row
                .coalesce_timestamp(columns)
                .map(|ts| (ts + Duration::hours(*shift_hours)).date())
                .is_some_and(|day| day >= *start && day <= *end),
        }
    }

    fn columns(&self) -> Vec<&str> {
        match self {
            Filter::Eq { column, .. } | Filter::In { column, .. } | Filter::NotNull { column } => {
                vec![column.as_str()]
            }
            Filter::DayBetween { columns, .. } => columns.iter().map(String::as_str).collect(),
        }
    }
}

/// A parameterized query against one table
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub table: TableName,
    pub columns: Vec<String>,
    pub filters: Vec<Filter>,
}

impl Query {
    /// Select columns from a table; an empty column list selects the table's known columns.
    pub fn select(table: TableName, columns: &[&str]) -> Self {
        Self {
            table,
            columns: columns.iter().map(|c| c.to_string()).collect(),
            filters: Vec::new(),
        }
    }

    pub fn where_eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Eq {
            column: column.to_string(),
            value: value.into(),
        });
        self
    }

    pub fn where_in(mut self, column: &str, values: &[&str]) -> Self {
        self.filters.push(Filter::In {
            column: column.to_string(),
            values: values.iter().map(|v| Value::from(*v)).collect(),
        });
        self
    }

    pub fn where_not_null(mut self, column: &str) -> Self {
        self.filters.push(Filter::NotNull {
            column: column.to_string(),
        });
        self
    }

    pub fn where_day_between(
        mut self,
        columns: &[&str],
        shift_hours: i64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Self {
        self.filters.push(Filter::DayBetween {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            shift_hours,
            start,
            end,
        });
        self
    }

    /// Columns this query selects
    pub fn selected_columns(&self) -> Vec<&str> {
        if self.columns.is_empty() {
            self.table.columns().to_vec()
        } else {
            self.columns.iter().map(String::as_str).collect()
        }
    }

    /// Every column the query touches
    pub fn referenced_columns(&self) -> Vec<&str> {
        let mut columns = self.selected_columns();
        for filter in &self.filters {
            columns.extend(filter.columns());
        }
        columns.sort_unstable();
        columns.dedup();
        columns
    }

    /// Render placeholder SQL and its ordered parameters.
    pub fn to_sql(&self) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let mut clauses = Vec::new();

        for filter in &self.filters {
            match filter {
                Filter::Eq { column, value } => {
                    clauses.push(format!("{column} = ?"));
                    params.push(value.clone());
                }
                Filter::In { column, values } => {
                    let marks = vec!["?"; values.len()].join(", ");
                    clauses.push(format!("{column} IN ({marks})"));
                    params.extend(values.iter().cloned());
                }
                Filter::NotNull { column } => clauses.push(format!("{column} IS NOT NULL")),
                Filter::DayBetween {
                    columns,
                    shift_hours,
                    start,
                    end,
                } => {
                    let expr = if columns.len() == 1 {
                        columns[0].clone()
                    } else {
                        format!("COALESCE({})", columns.join(", "))
                    };
                    clauses.push(format!(
                        "CAST(date_add('hour', ?, {expr}) AS date) BETWEEN ? AND ?"
                    ));
                    params.push(Value::Int(*shift_hours));
                    params.push(Value::Date(*start));
                    params.push(Value::Date(*end));
                }
            }
        }

        let mut sql = format!(
            "SELECT {} FROM {}",
            self.selected_columns().join(", "),
            self.table.as_str()
        );
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        (sql, params)
    }
}

/// A result row keyed by column name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Row {
    cells: BTreeMap<String, Value>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style cell setter.
    pub fn with(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.cells.insert(column.to_string(), value.into());
        self
    }

    pub fn set(&mut self, column: &str, value: Value) {
        self.cells.insert(column.to_string(), value);
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.cells.get(column)
    }

    pub fn text(&self, column: &str) -> Option<&str> {
        self.get(column).and_then(Value::as_str)
    }

    pub fn f64(&self, column: &str) -> Option<f64> {
        self.get(column).and_then(Value::as_f64)
    }

    pub fn timestamp(&self, column: &str) -> Option<NaiveDateTime> {
        self.get(column).and_then(Value::as_timestamp)
    }

    /// Timestamp of the first non-null column, like SQL `COALESCE`.
    ///
    /// An unparsable first value yields `None`; later columns are not consulted.
    pub fn coalesce_timestamp<S: AsRef<str>>(&self, columns: &[S]) -> Option<NaiveDateTime> {
        columns
            .iter()
            .filter_map(|c| self.get(c.as_ref()))
            .find(|v| !v.is_null())
            .and_then(Value::as_timestamp)
    }

    /// Keep only the given columns
    pub fn project(&self, columns: &[&str]) -> Row {
        let cells = columns
            .iter()
            .map(|c| {
                let value = self.cells.get(*c).cloned().unwrap_or(Value::Null);
                (c.to_string(), value)
            })
            .collect();
        Row { cells }
    }
}

/// One query result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl Table {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Synchronous request/response access to the study's analytical tables
pub trait TabularSource {
    /// Run one query and return its full result
    fn execute(&self, query: &Query) -> Result<Table, ComplianceError>;
}

impl<T: TabularSource + ?Sized> TabularSource for &T {
    fn execute(&self, query: &Query) -> Result<Table, ComplianceError> {
        (**self).execute(query)
    }
}

impl<T: TabularSource + ?Sized> TabularSource for std::sync::Arc<T> {
    fn execute(&self, query: &Query) -> Result<Table, ComplianceError> {
        (**self).execute(query)
    }
}
