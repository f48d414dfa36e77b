use chrono::NaiveDate;
use std::fmt;

/// One parsed CSV row. Unique per (station_id, date).
#[derive(Debug, Clone, PartialEq)]
pub struct DailyRecord {
    pub station_id: String,
    pub date: NaiveDate,
    /// Millimetres; `None` when the source left the value blank.
    pub rainfall: Option<f64>,
}

/// Rainfall summed over a calendar month. Unique per (station_id, year, month).
#[derive(Debug, Clone, PartialEq)]
pub struct MonthlyRecord {
    pub station_id: String,
    pub year: i32,
    pub month: i32,
    pub rainfall: f64,
}

/// Rainfall summed over a calendar year. Unique per (station_id, year).
#[derive(Debug, Clone, PartialEq)]
pub struct YearlyRecord {
    pub station_id: String,
    pub year: i32,
    pub rainfall: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableKind {
    Daily,
    Monthly,
    Yearly,
}

impl TableKind {
    pub fn table_name(self) -> &'static str {
        match self {
            TableKind::Daily => "rainfall_data_daily",
            TableKind::Monthly => "rainfall_data_monthly",
            TableKind::Yearly => "rainfall_data_yearly",
        }
    }

    pub(crate) fn columns(self) -> &'static str {
        match self {
            TableKind::Daily => "station_id, date, rainfall",
            TableKind::Monthly => "station_id, year, month, rainfall",
            TableKind::Yearly => "station_id, year, rainfall",
        }
    }

    /// The table's uniqueness constraint.
    pub(crate) fn conflict_target(self) -> &'static str {
        match self {
            TableKind::Daily => "station_id, date",
            TableKind::Monthly => "station_id, year, month",
            TableKind::Yearly => "station_id, year",
        }
    }
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table_name())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpsertResult {
    pub table: TableKind,
    /// Distinct keys written after collapsing duplicates.
    pub rows_written: usize,
    pub batches: usize,
    /// Postgres reports inserts and conflict updates together.
    pub total_rows_affected: u64,
}

impl UpsertResult {
    pub fn empty(table: TableKind) -> Self {
        Self {
            table,
            rows_written: 0,
            batches: 0,
            total_rows_affected: 0,
        }
    }
}
