//! In-memory table source, loadable from CSV exports

use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

use super::{Query, Row, Table, TableName, TabularSource, Value};
use crate::error::ComplianceError;

/// Table source holding every study table in memory.
///
/// All known tables exist from construction on, so a table without rows reads
/// as "no data" rather than as a failure.
#[derive(Debug, Clone)]
pub struct MemorySource {
    tables: HashMap<TableName, Vec<Row>>,
}

impl Default for MemorySource {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySource {
    pub fn new() -> Self {
        let tables = TableName::ALL
            .iter()
            .map(|table| (*table, Vec::new()))
            .collect();
        Self { tables }
    }

    /// Append one row to a table.
    pub fn insert(&mut self, table: TableName, row: Row) {
        self.tables.entry(table).or_default().push(row);
    }

    /// Builder-style variant of [`MemorySource::insert`].
    pub fn with_row(mut self, table: TableName, row: Row) -> Self {
        self.insert(table, row);
        self
    }

    /// Number of rows held for a table
    pub fn row_count(&self, table: TableName) -> usize {
        self.tables.get(&table).map_or(0, Vec::len)
    }

    /// Load `<table>.csv` files from a directory.
    ///
    /// Files that are absent leave their table empty. Empty cells load as nulls.
    pub fn from_csv_dir(dir: impl AsRef<Path>) -> Result<Self, ComplianceError> {
        let dir = dir.as_ref();
        let mut source = Self::new();

        for table in TableName::ALL {
            let path = dir.join(format!("{}.csv", table.as_str()));
            if !path.exists() {
                warn!(table = table.as_str(), path = %path.display(), "table export not found");
                continue;
            }
            let rows = read_csv_rows(&path)?;
            debug!(table = table.as_str(), rows = rows.len(), "loaded table export");
            source.tables.insert(table, rows);
        }

        Ok(source)
    }
}

fn read_csv_rows(path: &Path) -> Result<Vec<Row>, ComplianceError> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_ascii_lowercase())
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let mut row = Row::new();
        for (header, cell) in headers.iter().zip(record.iter()) {
            let value = if cell.trim().is_empty() {
                Value::Null
            } else {
                Value::text(cell)
            };
            row.set(header, value);
        }
        rows.push(row);
    }
    Ok(rows)
}

impl TabularSource for MemorySource {
    fn execute(&self, query: &Query) -> Result<Table, ComplianceError> {
        let known = query.table.columns();
        if let Some(unknown) = query
            .referenced_columns()
            .into_iter()
            .find(|column| !known.contains(column))
        {
            return Err(ComplianceError::query_failure(
                query.table.as_str(),
                format!("unknown column {unknown}"),
            ));
        }

        let columns = query.selected_columns();
        let rows = self
            .tables
            .get(&query.table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| query.filters.iter().all(|f| f.matches(row)))
                    .map(|row| row.project(&columns))
                    .collect()
            })
            .unwrap_or_default();

        Ok(Table {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::fs;
    use tempfile::TempDir;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_filters_and_projection() {
        let source = MemorySource::new()
            .with_row(
                TableName::HealthKitSamples,
                Row::new()
                    .with("participantidentifier", "p1")
                    .with("type", "Weight")
                    .with("startdate", "2024-01-03 10:00:00"),
            )
            .with_row(
                TableName::HealthKitSamples,
                Row::new()
                    .with("participantidentifier", "p1")
                    .with("type", "HeartRate")
                    .with("startdate", "2024-01-03 10:00:00"),
            )
            .with_row(
                TableName::HealthKitSamples,
                Row::new()
                    .with("participantidentifier", "p2")
                    .with("type", "Weight")
                    .with("startdate", "2024-01-03 10:00:00"),
            );

        let query = Query::select(TableName::HealthKitSamples, &["startdate"])
            .where_eq("participantidentifier", "p1")
            .where_in("type", &["Weight"])
            .where_day_between(&["startdate"], -7, date(2024, 1, 1), date(2024, 1, 7));

        let table = source.execute(&query).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.columns, vec!["startdate".to_string()]);
        assert!(table.rows[0].get("type").is_none());
    }

    #[test]
    fn test_unknown_column_is_a_query_failure() {
        let source = MemorySource::new();
        let query = Query::select(TableName::ProjectDeviceData, &["nope"]);
        let err = source.execute(&query).unwrap_err();
        assert!(matches!(err, ComplianceError::SourceQueryFailure { .. }));
    }

    #[test]
    fn test_empty_table_returns_no_rows() {
        let source = MemorySource::new();
        let query = Query::select(TableName::OuraDailyActivity, &[])
            .where_eq("participantidentifier", "p1");
        assert!(source.execute(&query).unwrap().is_empty());
    }

    #[test]
    fn test_load_csv_dir() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("projectdevicedata.csv"),
            "ParticipantIdentifier,InsertedDate\np1,2024-01-02 12:00:00\np1,\np2,2024-01-03 08:00:00\n",
        )
        .unwrap();

        let source = MemorySource::from_csv_dir(dir.path()).unwrap();
        assert_eq!(source.row_count(TableName::ProjectDeviceData), 3);
        assert_eq!(source.row_count(TableName::SurveyResults), 0);

        let query = Query::select(TableName::ProjectDeviceData, &["inserteddate"])
            .where_eq("participantidentifier", "p1")
            .where_not_null("inserteddate");
        assert_eq!(source.execute(&query).unwrap().len(), 1);
    }
}
