use crate::db::models::DailyRecord;
use crate::error::{AppError, Result};
use chrono::NaiveDate;
use csv::StringRecord;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::io::{Read, Seek};
use std::path::Path;
use tracing::{debug, warn};
use zip::ZipArchive;

/// Extension of the tabular member inside a station archive.
pub const DATA_EXTENSION: &str = ".csv";

/// Default failure threshold - fail if more than 10% of rows fail to parse
const DEFAULT_FAILURE_THRESHOLD: f64 = 0.10;

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y"];

const MISSING_MARKERS: [&str; 4] = ["", "na", "nan", "null"];

#[derive(Debug, Clone, Default)]
pub struct ParseStats {
    pub total_rows: usize,
    pub parsed_successfully: usize,
    pub parse_failures: usize,
    pub missing_rainfall: usize,
    pub duplicate_dates: usize,
    pub failure_rate: f64,
}

impl ParseStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finalize(&mut self) {
        self.failure_rate = if self.total_rows > 0 {
            self.parse_failures as f64 / self.total_rows as f64
        } else {
            0.0
        };
    }

    pub fn exceeds_threshold(&self, threshold: f64) -> bool {
        self.failure_rate > threshold
    }
}

/// Derive the station identifier from an archive path.
///
/// `001006_rainfall.zip` yields `001006`. A name without `_` yields its stem.
pub fn station_id_from_path(path: &Path) -> Result<String> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| {
            AppError::InvalidData(format!("Archive path has no file name: {}", path.display()))
        })?;

    let station_id = stem.split('_').next().unwrap_or(stem).trim();
    if station_id.is_empty() {
        return Err(AppError::InvalidData(format!(
            "Cannot derive station id from {}",
            path.display()
        )));
    }

    Ok(station_id.to_string())
}

/// Where the date of a row comes from.
#[derive(Debug, Clone, Copy)]
enum DateColumns {
    Single(usize),
    Parts { year: usize, month: usize, day: usize },
}

#[derive(Debug, Clone, Copy)]
struct ColumnMapping {
    date: DateColumns,
    rainfall: usize,
}

impl ColumnMapping {
    fn analyze(headers: &StringRecord) -> Result<Self> {
        let normalized: Vec<String> = headers.iter().map(|h| h.trim().to_lowercase()).collect();
        let find = |name: &str| normalized.iter().position(|h| h == name);

        let date = match find("date") {
            Some(idx) => DateColumns::Single(idx),
            None => match (find("year"), find("month"), find("day")) {
                (Some(year), Some(month), Some(day)) => DateColumns::Parts { year, month, day },
                _ => {
                    return Err(AppError::Parse(format!(
                        "No date column in header: {:?}",
                        normalized
                    )))
                }
            },
        };

        let rainfall = find("rainfall_mm")
            .or_else(|| find("rainfall"))
            .or_else(|| normalized.iter().position(|h| h.starts_with("rainfall amount")))
            .ok_or_else(|| {
                AppError::Parse(format!("No rainfall column in header: {:?}", normalized))
            })?;

        Ok(Self { date, rainfall })
    }
}

pub struct Parser;

impl Parser {
    /// Index of the first member, in archive order, ending in `.csv`.
    pub fn find_data_member<R: Read + Seek>(
        archive: &mut ZipArchive<R>,
        archive_name: &str,
    ) -> Result<usize> {
        for idx in 0..archive.len() {
            let member = archive.by_index(idx)?;
            if member.is_file() && member.name().to_lowercase().ends_with(DATA_EXTENSION) {
                debug!("Using member {} of {}", member.name(), archive_name);
                return Ok(idx);
            }
        }

        Err(AppError::MissingMember {
            archive: archive_name.to_string(),
            extension: DATA_EXTENSION.to_string(),
        })
    }

    /// Parse the station's data member straight out of an open archive.
    pub fn parse_archive<R: Read + Seek>(
        archive: &mut ZipArchive<R>,
        archive_name: &str,
        station_id: &str,
    ) -> Result<(Vec<DailyRecord>, ParseStats)> {
        let idx = Self::find_data_member(archive, archive_name)?;
        let member = archive.by_index(idx)?;
        Self::parse_csv(member, station_id)
    }

    /// Parse CSV content into daily records with parse statistics
    pub fn parse_csv<R: Read>(reader: R, station_id: &str) -> Result<(Vec<DailyRecord>, ParseStats)> {
        Self::parse_csv_with_threshold(reader, station_id, DEFAULT_FAILURE_THRESHOLD)
    }

    /// Parse CSV content with a custom failure threshold
    pub fn parse_csv_with_threshold<R: Read>(
        reader: R,
        station_id: &str,
        failure_threshold: f64,
    ) -> Result<(Vec<DailyRecord>, ParseStats)> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = csv_reader.headers()?.clone();
        let mapping = ColumnMapping::analyze(&headers)?;

        let mut records: Vec<DailyRecord> = Vec::new();
        let mut positions: HashMap<NaiveDate, usize> = HashMap::new();
        let mut stats = ParseStats::new();

        for (row_num, result) in csv_reader.records().enumerate() {
            // A broken stream (bad checksum, truncated deflate data) taints
            // every row read so far.
            let row = match result {
                Err(e) if matches!(e.kind(), csv::ErrorKind::Io(_)) => {
                    return Err(AppError::Extraction(format!(
                        "Failed to read data for station {} at row {}: {}",
                        station_id,
                        row_num + 2,
                        e
                    )));
                }
                other => other,
            };

            stats.total_rows += 1;

            let parsed = row
                .map_err(AppError::from)
                .and_then(|row| Self::parse_row(&row, &mapping, station_id));

            match parsed {
                Ok(record) => {
                    stats.parsed_successfully += 1;
                    if record.rainfall.is_none() {
                        stats.missing_rainfall += 1;
                    }
                    match positions.entry(record.date) {
                        Entry::Occupied(slot) => {
                            stats.duplicate_dates += 1;
                            records[*slot.get()] = record;
                        }
                        Entry::Vacant(slot) => {
                            slot.insert(records.len());
                            records.push(record);
                        }
                    }
                }
                Err(e) => {
                    stats.parse_failures += 1;
                    warn!(
                        "Failed to parse row {} for station {} (failure {}/{}): {}",
                        row_num + 2,
                        station_id,
                        stats.parse_failures,
                        stats.total_rows,
                        e
                    );
                }
            }
        }

        stats.finalize();

        if stats.exceeds_threshold(failure_threshold) {
            return Err(AppError::Parse(format!(
                "Parse failure rate {:.1}% exceeds threshold {:.1}%: {} failures out of {} rows",
                stats.failure_rate * 100.0,
                failure_threshold * 100.0,
                stats.parse_failures,
                stats.total_rows
            )));
        }

        if records.is_empty() && stats.total_rows > 0 {
            return Err(AppError::Parse(
                "No rows successfully parsed from non-empty file".to_string(),
            ));
        }

        if stats.duplicate_dates > 0 {
            warn!(
                "Station {}: {} duplicate dates, kept the last row for each",
                station_id, stats.duplicate_dates
            );
        }

        Ok((records, stats))
    }

    fn parse_row(row: &StringRecord, mapping: &ColumnMapping, station_id: &str) -> Result<DailyRecord> {
        let date = match mapping.date {
            DateColumns::Single(idx) => parse_date(field(row, idx)?)?,
            DateColumns::Parts { year, month, day } => {
                date_from_parts(field(row, year)?, field(row, month)?, field(row, day)?)?
            }
        };

        let rainfall = parse_rainfall(row.get(mapping.rainfall).unwrap_or(""))?;

        Ok(DailyRecord {
            station_id: station_id.to_string(),
            date,
            rainfall,
        })
    }
}

fn field(row: &StringRecord, idx: usize) -> Result<&str> {
    row.get(idx)
        .ok_or_else(|| AppError::Parse(format!("Row has no column {}", idx + 1)))
}

/// Normalize a date cell into a calendar date. A trailing time is dropped.
fn parse_date(s: &str) -> Result<NaiveDate> {
    let date_part = s.split([' ', 'T']).next().unwrap_or(s);

    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(date_part, format).ok())
        .ok_or_else(|| AppError::Parse(format!("Unrecognized date '{}'", s)))
}

fn date_from_parts(year: &str, month: &str, day: &str) -> Result<NaiveDate> {
    let parse = |label: &str, value: &str| {
        value
            .parse::<u32>()
            .map_err(|e| AppError::Parse(format!("Failed to parse {} '{}': {}", label, value, e)))
    };

    let year = parse("year", year)?;
    let month = parse("month", month)?;
    let day = parse("day", day)?;

    NaiveDate::from_ymd_opt(year as i32, month, day).ok_or_else(|| {
        AppError::Parse(format!(
            "Invalid date combination: year={}, month={}, day={}",
            year, month, day
        ))
    })
}

fn parse_rainfall(s: &str) -> Result<Option<f64>> {
    if MISSING_MARKERS.contains(&s.to_lowercase().as_str()) {
        return Ok(None);
    }

    let value = s
        .parse::<f64>()
        .map_err(|e| AppError::Parse(format!("Failed to parse rainfall '{}': {}", s, e)))?;

    if !value.is_finite() {
        return Err(AppError::Parse(format!("Rainfall '{}' is not finite", s)));
    }

    Ok(Some(value))
}
