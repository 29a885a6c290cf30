//! Deterministic feature engineering for raw transaction batches.
//!
//! Transforms a raw record set into model-ready features in three ordered
//! steps: per-file missing-value imputation, great-circle distance between
//! the cardholder and the merchant, and calendar features derived from the
//! transaction timestamp. Pure, no I/O; row count and order are preserved.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Timelike, Utc};
use tracing::debug;

use crate::error::PipelineError;
use crate::frame::{Column, Frame};

/// Columns every raw record set must carry.
pub const REQUIRED_COLUMNS: [&str; 5] = [
    "transaction_time",
    "lat",
    "lon",
    "merchant_lat",
    "merchant_lon",
];

/// Earth mean radius in kilometers.
const EARTH_RADIUS_KM: f64 = 6371.0088;

/// Timestamp shapes accepted in `transaction_time` (naive, taken as UTC).
const TIMESTAMP_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
];

/// Transform a raw record set into a model-ready feature set.
pub fn preprocess(mut frame: Frame) -> Result<Frame, PipelineError> {
    for column in REQUIRED_COLUMNS {
        if !frame.has_column(column) {
            return Err(PipelineError::MissingColumn {
                column: column.to_string(),
            });
        }
    }

    fill_missing(&mut frame);
    add_distance_feature(&mut frame)?;
    add_time_features(&mut frame)?;

    debug!(
        rows = frame.nrows(),
        features = frame.ncols(),
        "preprocessing finished"
    );
    Ok(frame)
}

/// Impute missing values in place from this file's own statistics: the
/// median for numeric columns, the most frequent value for text columns
/// (ties broken by the smallest value). Columns with no observed values are
/// left untouched.
fn fill_missing(frame: &mut Frame) {
    for (_, column) in frame.columns_mut() {
        match column {
            Column::Float(values) => {
                if let Some(median) = median(values) {
                    for value in values.iter_mut() {
                        if value.is_nan() {
                            *value = median;
                        }
                    }
                }
            }
            Column::Text(values) => {
                if let Some(mode) = mode(values) {
                    for value in values.iter_mut() {
                        if value.is_none() {
                            *value = Some(mode.clone());
                        }
                    }
                }
            }
        }
    }
}

/// Median of the finite values; the mean of the two middle values for even
/// counts. `None` when nothing is observed.
fn median(values: &[f64]) -> Option<f64> {
    let mut observed: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if observed.is_empty() {
        return None;
    }
    observed.sort_by(|a, b| a.total_cmp(b));
    let mid = observed.len() / 2;
    if observed.len() % 2 == 0 {
        Some((observed[mid - 1] + observed[mid]) / 2.0)
    } else {
        Some(observed[mid])
    }
}

/// Most frequent observed value; ties go to the smallest value in the
/// column's natural ordering.
fn mode(values: &[Option<String>]) -> Option<String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for value in values.iter().flatten() {
        *counts.entry(value.as_str()).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(value, _)| value.to_string())
}

/// Replace the four coordinate columns with a `distance` column holding the
/// haversine great-circle kilometers between cardholder and merchant.
fn add_distance_feature(frame: &mut Frame) -> Result<(), PipelineError> {
    let lat = take_numeric(frame, "lat")?;
    let lon = take_numeric(frame, "lon")?;
    let merchant_lat = take_numeric(frame, "merchant_lat")?;
    let merchant_lon = take_numeric(frame, "merchant_lon")?;

    let distance: Vec<f64> = (0..lat.len())
        .map(|i| haversine_km(lat[i], lon[i], merchant_lat[i], merchant_lon[i]))
        .collect();
    frame.push_column("distance", Column::Float(distance));
    Ok(())
}

fn take_numeric(frame: &mut Frame, name: &str) -> Result<Vec<f64>, PipelineError> {
    match frame.remove_column(name) {
        Some(Column::Float(values)) => Ok(values),
        Some(Column::Text(_)) => Err(PipelineError::NonNumericColumn {
            column: name.to_string(),
        }),
        None => Err(PipelineError::MissingColumn {
            column: name.to_string(),
        }),
    }
}

fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let half_dlat = (lat2 - lat1).to_radians() / 2.0;
    let half_dlon = (lon2 - lon1).to_radians() / 2.0;
    let a = half_dlat.sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * half_dlon.sin().powi(2);
    // sqrt can overshoot 1.0 at antipodes
    2.0 * EARTH_RADIUS_KM * a.sqrt().min(1.0).asin()
}

/// Replace `transaction_time` with calendar features: hour, minute,
/// day-of-week (Monday = 0), day-of-month, month, weekend flag, and whole
/// seconds since the Unix epoch (sub-second remainder truncated).
fn add_time_features(frame: &mut Frame) -> Result<(), PipelineError> {
    let timestamps = take_timestamps(frame)?;

    let nrows = timestamps.len();
    let mut hour = Vec::with_capacity(nrows);
    let mut minute = Vec::with_capacity(nrows);
    let mut dow = Vec::with_capacity(nrows);
    let mut day = Vec::with_capacity(nrows);
    let mut month = Vec::with_capacity(nrows);
    let mut weekend = Vec::with_capacity(nrows);
    let mut unix = Vec::with_capacity(nrows);

    for timestamp in timestamps {
        let days_from_monday = timestamp.weekday().num_days_from_monday();
        hour.push(f64::from(timestamp.hour()));
        minute.push(f64::from(timestamp.minute()));
        dow.push(f64::from(days_from_monday));
        day.push(f64::from(timestamp.day()));
        month.push(f64::from(timestamp.month()));
        weekend.push(if days_from_monday >= 5 { 1.0 } else { 0.0 });
        unix.push(timestamp.timestamp() as f64);
    }

    frame.push_column("tx_hour", Column::Float(hour));
    frame.push_column("tx_minute", Column::Float(minute));
    frame.push_column("tx_dow", Column::Float(dow));
    frame.push_column("tx_day", Column::Float(day));
    frame.push_column("tx_month", Column::Float(month));
    frame.push_column("is_weekend", Column::Float(weekend));
    frame.push_column("tx_unix", Column::Float(unix));
    Ok(())
}

fn take_timestamps(frame: &mut Frame) -> Result<Vec<DateTime<Utc>>, PipelineError> {
    match frame.remove_column("transaction_time") {
        Some(Column::Text(values)) => values
            .iter()
            .enumerate()
            .map(|(row, value)| {
                let raw = value.as_deref().unwrap_or("");
                parse_timestamp(raw).ok_or_else(|| PipelineError::Timestamp {
                    row,
                    value: raw.to_string(),
                })
            })
            .collect(),
        // A numeric column is taken as epoch seconds.
        Some(Column::Float(values)) => values
            .iter()
            .enumerate()
            .map(|(row, &value)| {
                DateTime::from_timestamp(value as i64, 0).ok_or_else(|| {
                    PipelineError::Timestamp {
                        row,
                        value: value.to_string(),
                    }
                })
            })
            .collect(),
        None => Err(PipelineError::MissingColumn {
            column: "transaction_time".to_string(),
        }),
    }
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(value) {
        return Some(timestamp.with_timezone(&Utc));
    }
    for format in TIMESTAMP_FORMATS {
        if let Ok(timestamp) = NaiveDateTime::parse_from_str(value, format) {
            return Some(timestamp.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn frame_from(csv: &str) -> Frame {
        Frame::from_csv_reader(Cursor::new(csv.to_string())).unwrap()
    }

    const WELL_FORMED: &str = "\
transaction_time,lat,lon,merchant_lat,merchant_lon,amount,merchant_type
2024-03-11 10:30:00,55.75,37.61,55.75,37.61,120.5,grocery
2024-03-16 22:05:10,59.93,30.33,59.95,30.40,,online
2024-03-17 08:15:45,40.71,-74.00,40.73,-73.99,310.0,grocery
";

    #[test]
    fn preserves_row_count_and_order() {
        let features = preprocess(frame_from(WELL_FORMED)).unwrap();
        assert_eq!(features.nrows(), 3);

        // passthrough column keeps its row order
        match features.column("merchant_type").unwrap() {
            Column::Text(values) => {
                assert_eq!(values[0].as_deref(), Some("grocery"));
                assert_eq!(values[1].as_deref(), Some("online"));
            }
            Column::Float(_) => panic!("merchant_type should be text"),
        }
    }

    #[test]
    fn drops_source_columns_and_adds_derived_ones() {
        let features = preprocess(frame_from(WELL_FORMED)).unwrap();

        for dropped in REQUIRED_COLUMNS {
            assert!(!features.has_column(dropped), "{dropped} should be dropped");
        }
        for added in [
            "distance",
            "tx_hour",
            "tx_minute",
            "tx_dow",
            "tx_day",
            "tx_month",
            "is_weekend",
            "tx_unix",
        ] {
            assert!(features.has_column(added), "{added} should be derived");
        }
    }

    #[test]
    fn missing_required_column_is_an_error() {
        let frame = frame_from("transaction_time,lat,lon,merchant_lat\n");
        match preprocess(frame) {
            Err(PipelineError::MissingColumn { column }) => {
                assert_eq!(column, "merchant_lon");
            }
            other => panic!("expected MissingColumn, got {other:?}"),
        }
    }

    #[test]
    fn text_coordinates_are_an_error() {
        let frame = frame_from(
            "transaction_time,lat,lon,merchant_lat,merchant_lon\n\
             2024-03-11 10:30:00,north,37.61,55.75,37.61\n",
        );
        match preprocess(frame) {
            Err(PipelineError::NonNumericColumn { column }) => assert_eq!(column, "lat"),
            other => panic!("expected NonNumericColumn, got {other:?}"),
        }
    }

    #[test]
    fn unparseable_timestamp_is_an_error_with_the_row() {
        let frame = frame_from(
            "transaction_time,lat,lon,merchant_lat,merchant_lon\n\
             2024-03-11 10:30:00,55.75,37.61,55.75,37.61\n\
             not-a-time,55.75,37.61,55.75,37.61\n",
        );
        match preprocess(frame) {
            Err(PipelineError::Timestamp { row, value }) => {
                assert_eq!(row, 1);
                assert_eq!(value, "not-a-time");
            }
            other => panic!("expected Timestamp, got {other:?}"),
        }
    }

    #[test]
    fn median_imputation_fills_numeric_gaps() {
        assert_eq!(median(&[1.0, 3.0, f64::NAN]), Some(2.0));
        assert_eq!(median(&[1.0, 2.0, 3.0, 4.0]), Some(2.5));
        assert_eq!(median(&[f64::NAN, f64::NAN]), None);

        let features = preprocess(frame_from(WELL_FORMED)).unwrap();
        match features.column("amount").unwrap() {
            Column::Float(values) => {
                // median of [120.5, 310.0]
                assert_eq!(values[1], 215.25);
            }
            Column::Text(_) => panic!("amount should be numeric"),
        }
    }

    #[test]
    fn mode_imputation_fills_text_gaps_with_ties_to_the_smallest() {
        let observed = vec![
            Some("a".to_string()),
            Some("a".to_string()),
            Some("b".to_string()),
            None,
        ];
        assert_eq!(mode(&observed), Some("a".to_string()));

        let tied = vec![Some("b".to_string()), Some("a".to_string()), None];
        assert_eq!(mode(&tied), Some("a".to_string()));

        assert_eq!(mode(&[None, None]), None);
    }

    #[test]
    fn distance_is_zero_for_identical_coordinates() {
        let features = preprocess(frame_from(WELL_FORMED)).unwrap();
        match features.column("distance").unwrap() {
            Column::Float(values) => {
                assert_eq!(values[0], 0.0);
                assert!(values[1] > 0.0);
            }
            Column::Text(_) => panic!("distance should be numeric"),
        }
    }

    #[test]
    fn distance_approaches_the_antipodal_maximum() {
        let half_circumference = std::f64::consts::PI * EARTH_RADIUS_KM;
        let antipodal = haversine_km(0.0, 0.0, 0.0, 180.0);
        assert!((antipodal - half_circumference).abs() < 1.0);
        assert!((antipodal - 20_015.0).abs() < 1.0);
    }

    #[test]
    fn weekend_flag_follows_day_of_week() {
        let features = preprocess(frame_from(WELL_FORMED)).unwrap();
        let (dow, weekend) = match (
            features.column("tx_dow").unwrap(),
            features.column("is_weekend").unwrap(),
        ) {
            (Column::Float(dow), Column::Float(weekend)) => (dow.clone(), weekend.clone()),
            _ => panic!("time features should be numeric"),
        };

        // 2024-03-11 is a Monday, 2024-03-16 a Saturday, 2024-03-17 a Sunday
        assert_eq!(dow, vec![0.0, 5.0, 6.0]);
        assert_eq!(weekend, vec![0.0, 1.0, 1.0]);
    }

    #[test]
    fn unix_seconds_truncate_the_subsecond_remainder() {
        let frame = frame_from(
            "transaction_time,lat,lon,merchant_lat,merchant_lon\n\
             1970-01-01 00:00:18.900,0,0,0,0\n",
        );
        let features = preprocess(frame).unwrap();
        match features.column("tx_unix").unwrap() {
            Column::Float(values) => assert_eq!(values[0], 18.0),
            Column::Text(_) => panic!("tx_unix should be numeric"),
        }
    }

    #[test]
    fn accepts_rfc3339_and_date_only_timestamps() {
        assert!(parse_timestamp("2024-03-11T10:30:00Z").is_some());
        assert!(parse_timestamp("2024-03-11T10:30:00+03:00").is_some());
        assert!(parse_timestamp("2024-03-11").is_some());
        assert!(parse_timestamp("11/03/2024").is_none());
    }

    #[test]
    fn zero_row_file_preprocesses_cleanly() {
        let frame = frame_from("transaction_time,lat,lon,merchant_lat,merchant_lon,amount\n");
        let features = preprocess(frame).unwrap();
        assert_eq!(features.nrows(), 0);
        assert!(features.has_column("distance"));
        assert!(features.has_column("tx_unix"));
    }
}
