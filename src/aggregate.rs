//! Monthly and yearly rainfall totals derived from daily records.
//!
//! Missing daily values contribute nothing to a total. A period whose days are
//! all missing still produces a record, with a total of 0.0.

use crate::db::models::{DailyRecord, MonthlyRecord, YearlyRecord};
use chrono::Datelike;
use std::collections::BTreeMap;

/// Sum rainfall per (station, year, month).
pub fn monthly(daily: &[DailyRecord]) -> Vec<MonthlyRecord> {
    let mut totals: BTreeMap<(&str, i32, u32), f64> = BTreeMap::new();

    for record in daily {
        let key = (
            record.station_id.as_str(),
            record.date.year(),
            record.date.month(),
        );
        *totals.entry(key).or_insert(0.0) += record.rainfall.unwrap_or(0.0);
    }

    totals
        .into_iter()
        .map(|((station_id, year, month), rainfall)| MonthlyRecord {
            station_id: station_id.to_string(),
            year,
            month: month as i32,
            rainfall,
        })
        .collect()
}

/// Sum rainfall per (station, year).
pub fn yearly(daily: &[DailyRecord]) -> Vec<YearlyRecord> {
    let mut totals: BTreeMap<(&str, i32), f64> = BTreeMap::new();

    for record in daily {
        let key = (record.station_id.as_str(), record.date.year());
        *totals.entry(key).or_insert(0.0) += record.rainfall.unwrap_or(0.0);
    }

    totals
        .into_iter()
        .map(|((station_id, year), rainfall)| YearlyRecord {
            station_id: station_id.to_string(),
            year,
            rainfall,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn daily(station: &str, y: i32, m: u32, d: u32, rainfall: Option<f64>) -> DailyRecord {
        DailyRecord {
            station_id: station.to_string(),
            date: NaiveDate::from_ymd_opt(y, m, d).unwrap(),
            rainfall,
        }
    }

    #[test]
    fn test_monthly_and_yearly_totals() {
        let records = vec![
            daily("001006", 2024, 1, 1, Some(5.0)),
            daily("001006", 2024, 1, 2, Some(0.0)),
            daily("001006", 2024, 2, 1, Some(3.0)),
        ];

        let mut months = monthly(&records);
        months.sort_by_key(|m| m.month);
        assert_eq!(
            months,
            vec![
                MonthlyRecord {
                    station_id: "001006".to_string(),
                    year: 2024,
                    month: 1,
                    rainfall: 5.0,
                },
                MonthlyRecord {
                    station_id: "001006".to_string(),
                    year: 2024,
                    month: 2,
                    rainfall: 3.0,
                },
            ]
        );

        assert_eq!(
            yearly(&records),
            vec![YearlyRecord {
                station_id: "001006".to_string(),
                year: 2024,
                rainfall: 8.0,
            }]
        );
    }

    #[test]
    fn test_missing_values_do_not_propagate() {
        let records = vec![
            daily("001006", 2024, 3, 1, Some(2.5)),
            daily("001006", 2024, 3, 2, None),
            daily("001006", 2024, 3, 3, Some(1.5)),
        ];

        let months = monthly(&records);
        assert_eq!(months.len(), 1);
        assert_eq!(months[0].rainfall, 4.0);
    }

    #[test]
    fn test_all_missing_month_is_zero() {
        let records = vec![
            daily("001006", 2024, 4, 1, None),
            daily("001006", 2024, 4, 2, None),
            daily("001006", 2024, 5, 1, Some(6.0)),
        ];

        let months = monthly(&records);
        let april = months.iter().find(|m| m.month == 4).unwrap();
        assert_eq!(april.rainfall, 0.0);

        assert_eq!(yearly(&records)[0].rainfall, 6.0);
    }

    #[test]
    fn test_groups_by_station_and_year() {
        let records = vec![
            daily("001006", 2023, 12, 31, Some(1.0)),
            daily("001006", 2024, 1, 1, Some(2.0)),
            daily("009021", 2024, 1, 1, Some(4.0)),
        ];

        let months = monthly(&records);
        assert_eq!(months.len(), 3);

        let years = yearly(&records);
        assert_eq!(years.len(), 3);
        let total: f64 = years.iter().map(|y| y.rainfall).sum();
        assert_eq!(total, 7.0);
    }

    #[test]
    fn test_monthly_sums_match_daily_sums() {
        let records: Vec<DailyRecord> = (1..=28)
            .map(|d| {
                let rainfall = if d % 5 == 0 { None } else { Some(d as f64 * 0.5) };
                daily("001006", 2024, 2, d, rainfall)
            })
            .collect();

        let expected: f64 = records.iter().filter_map(|r| r.rainfall).sum();
        let months = monthly(&records);

        assert_eq!(months.len(), 1);
        assert!((months[0].rainfall - expected).abs() < 1e-9);
    }

    #[test]
    fn test_empty_input() {
        assert!(monthly(&[]).is_empty());
        assert!(yearly(&[]).is_empty());
    }
}
