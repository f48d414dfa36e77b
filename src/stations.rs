//! Bureau of Meteorology station listing (`stations.txt`) parser.
//!
//! Each data line is whitespace separated:
//!
//! ```text
//!    1006 01   WYNDHAM AERO            1951 ..   -15.5100  128.1503 GPS   WA     3.8     4.3   95214
//! ```
//!
//! The station name has a variable number of words, so columns after it are
//! located relative to the first four-digit year token.

use crate::error::{AppError, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

/// Placeholder values the listing uses for "not recorded".
const MISSING_MARKERS: [&str; 2] = ["..", "....."];

/// Number of columns that follow the station name.
const TRAILING_FIELDS: usize = 9;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StationMetadata {
    pub district: String,
    pub name: String,
    pub start_year: i32,
    pub end_year: Option<i32>,
    pub latitude: f64,
    pub longitude: f64,
    pub source: Option<String>,
    pub state: String,
    pub height: Option<f64>,
    pub bar_height: Option<f64>,
    pub wmo: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct StationList {
    /// Keyed by six-digit station id, matching archive file names.
    pub stations: BTreeMap<String, StationMetadata>,
    pub skipped_lines: usize,
}

/// Parse a station listing. Lines that are not station rows (title, column
/// headings, copyright footer) are skipped.
pub fn parse_station_list(content: &str) -> StationList {
    let mut list = StationList::default();

    for (line_num, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }

        match parse_line(line) {
            Ok((station_id, metadata)) => {
                list.stations.insert(station_id, metadata);
            }
            Err(e) => {
                list.skipped_lines += 1;
                debug!("Skipping station line {}: {}", line_num + 1, e);
            }
        }
    }

    list
}

pub fn load_station_list(path: &Path) -> Result<StationList> {
    let content = std::fs::read_to_string(path)?;
    let list = parse_station_list(&content);
    info!(
        "Parsed {} stations from {} ({} other lines skipped)",
        list.stations.len(),
        path.display(),
        list.skipped_lines
    );
    Ok(list)
}

/// Zero-pad a numeric station number to the six digits used in archive names.
pub fn normalize_station_id(raw: &str) -> Option<String> {
    if raw.is_empty() || !raw.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(format!("{:0>6}", raw))
}

fn parse_line(line: &str) -> Result<(String, StationMetadata)> {
    let fields: Vec<&str> = line.split_whitespace().collect();

    let station_id = fields
        .first()
        .and_then(|f| normalize_station_id(f))
        .ok_or_else(|| AppError::Parse("Line does not start with a station number".to_string()))?;

    let district = fields
        .get(1)
        .ok_or_else(|| AppError::Parse("Missing district".to_string()))?
        .to_string();

    let year_idx = (2..fields.len())
        .find(|&i| is_year(fields[i]))
        .ok_or_else(|| AppError::Parse("No start year column".to_string()))?;

    if fields.len() < year_idx + TRAILING_FIELDS {
        return Err(AppError::Parse(format!(
            "Expected {} fields after the name, got {}",
            TRAILING_FIELDS,
            fields.len() - year_idx
        )));
    }

    let rest = &fields[year_idx..];

    let metadata = StationMetadata {
        district,
        name: fields[2..year_idx].join(" "),
        start_year: parse_number(rest[0], "start year")?,
        end_year: optional(rest[1])
            .map(|v| parse_number(v, "end year"))
            .transpose()?,
        latitude: parse_number(rest[2], "latitude")?,
        longitude: parse_number(rest[3], "longitude")?,
        source: optional(rest[4]).map(str::to_string),
        state: rest[5].to_string(),
        height: optional(rest[6])
            .map(|v| parse_number(v, "height"))
            .transpose()?,
        bar_height: optional(rest[7])
            .map(|v| parse_number(v, "barometer height"))
            .transpose()?,
        wmo: optional(rest[8]).map(str::to_string),
    };

    Ok((station_id, metadata))
}

fn is_year(s: &str) -> bool {
    s.len() == 4 && s.chars().all(|c| c.is_ascii_digit())
}

fn optional(s: &str) -> Option<&str> {
    if MISSING_MARKERS.contains(&s) {
        None
    } else {
        Some(s)
    }
}

fn parse_number<T: std::str::FromStr>(s: &str, label: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    s.parse::<T>()
        .map_err(|e| AppError::Parse(format!("Failed to parse {} '{}': {}", label, s, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
Bureau of Meteorology product IDCJMC0014.                                     Produced: 03 Mar 2025

Site    Dist Site name                                Start   End     Lat       Lon      Source         STA Height (m)  Bar_ht    WMO
------- ---- ---------------------------------------- ------- ------- -------- --------- -------------- --- ---------- -------- -------
   1006 01   WYNDHAM AERO                             1951    ..      -15.5100  128.1503 GPS            WA        3.8      4.3   95214
   1007 01   TROUGHTON ISLAND                         1956    2019    -13.7542  126.1485 .....          WA        6.0       ..   94102
  66062 66   SYDNEY (OBSERVATORY HILL)                1858    ..      -33.8607  151.2050 GPS            NSW      39.0     41.2   94768

There are 3 stations in this list.
Copyright Commonwealth of Australia 2025, Bureau of Meteorology (ABN 92 637 533 532)
";

    #[test]
    fn test_parse_station_list() {
        let list = parse_station_list(SAMPLE);

        assert_eq!(list.stations.len(), 3);

        let wyndham = &list.stations["001006"];
        assert_eq!(wyndham.district, "01");
        assert_eq!(wyndham.name, "WYNDHAM AERO");
        assert_eq!(wyndham.start_year, 1951);
        assert_eq!(wyndham.end_year, None);
        assert_eq!(wyndham.latitude, -15.51);
        assert_eq!(wyndham.longitude, 128.1503);
        assert_eq!(wyndham.source.as_deref(), Some("GPS"));
        assert_eq!(wyndham.state, "WA");
        assert_eq!(wyndham.height, Some(3.8));
        assert_eq!(wyndham.bar_height, Some(4.3));
        assert_eq!(wyndham.wmo.as_deref(), Some("95214"));
    }

    #[test]
    fn test_missing_markers_become_none() {
        let list = parse_station_list(SAMPLE);

        let troughton = &list.stations["001007"];
        assert_eq!(troughton.end_year, Some(2019));
        assert_eq!(troughton.source, None);
        assert_eq!(troughton.bar_height, None);
    }

    #[test]
    fn test_multi_word_name_with_punctuation() {
        let list = parse_station_list(SAMPLE);
        assert_eq!(list.stations["066062"].name, "SYDNEY (OBSERVATORY HILL)");
        assert_eq!(list.stations["066062"].state, "NSW");
    }

    #[test]
    fn test_header_and_footer_lines_skipped() {
        let list = parse_station_list(SAMPLE);
        assert_eq!(list.skipped_lines, 5);
    }

    #[test]
    fn test_normalize_station_id() {
        assert_eq!(normalize_station_id("1006"), Some("001006".to_string()));
        assert_eq!(normalize_station_id("066062"), Some("066062".to_string()));
        assert_eq!(normalize_station_id("Site"), None);
    }

    #[test]
    fn test_serializes_to_json() {
        let list = parse_station_list(SAMPLE);
        let json = serde_json::to_value(&list.stations).unwrap();
        assert_eq!(json["001006"]["name"], "WYNDHAM AERO");
        assert!(json["001006"]["end_year"].is_null());
    }
}
