//! Building records from tabular input and checking them before ingestion.

use crate::error::{FeatureStoreError, Result};
use crate::model::{FeatureDefinition, FeatureRecord, FeatureType, FeatureValue, Value};
use chrono::DateTime;
use std::io::Read;
use std::path::Path;

/// Pairs every row with the feature names, keeping every cell as a string.
pub fn records_from_rows<S: AsRef<str>>(
    feature_names: &[S],
    rows: &[Vec<String>],
) -> Result<Vec<FeatureRecord>> {
    rows.iter()
        .enumerate()
        .map(|(i, row)| {
            if row.len() != feature_names.len() {
                return Err(FeatureStoreError::malformed_record(format!(
                    "row has {} values but {} feature names were given",
                    row.len(),
                    feature_names.len()
                ))
                .at_record(i));
            }
            Ok(feature_names
                .iter()
                .zip(row)
                .map(|(name, value)| FeatureValue::new(name.as_ref(), value.as_str()))
                .collect())
        })
        .collect()
}

pub fn records_from_csv_path(
    path: impl AsRef<Path>,
    definitions: Option<&[FeatureDefinition]>,
) -> Result<Vec<FeatureRecord>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(csv_error)?;
    records_from_csv_reader(&mut rdr, definitions)
}

/// Reads a headed CSV. With definitions, the listed columns are picked (in any
/// order) and typed; without, every column becomes a string feature.
pub fn records_from_csv_reader<R: Read>(
    rdr: &mut csv::Reader<R>,
    definitions: Option<&[FeatureDefinition]>,
) -> Result<Vec<FeatureRecord>> {
    let headers = rdr.headers().map_err(csv_error)?.clone();

    let columns: Vec<(usize, &str, Option<&FeatureDefinition>)> = match definitions {
        Some(definitions) => definitions
            .iter()
            .map(|definition| {
                headers
                    .iter()
                    .position(|h| h == definition.name)
                    .map(|idx| (idx, definition.name.as_str(), Some(definition)))
                    .ok_or_else(|| {
                        FeatureStoreError::malformed_record(format!(
                            "missing column '{}', headers={:?}",
                            definition.name,
                            headers.iter().collect::<Vec<_>>()
                        ))
                    })
            })
            .collect::<Result<_>>()?,
        None => headers
            .iter()
            .enumerate()
            .map(|(idx, name)| (idx, name, None))
            .collect(),
    };

    let mut records = Vec::new();
    for (row_idx, row) in rdr.records().enumerate() {
        let row = row.map_err(|e| csv_error(e).at_record(row_idx))?;
        let record = columns
            .iter()
            .map(|(idx, name, definition)| {
                let raw = row.get(*idx).unwrap_or("");
                let value = match definition {
                    Some(definition) => Value::parse(raw, definition.feature_type)
                        .map_err(|e| e.at_record(row_idx))?,
                    None => Value::from(raw),
                };
                Ok(FeatureValue::new(*name, value))
            })
            .collect::<Result<FeatureRecord>>()?;
        records.push(record);
    }
    Ok(records)
}

fn csv_error(err: csv::Error) -> FeatureStoreError {
    FeatureStoreError::malformed_record(format!("invalid CSV input: {}", err))
}

/// Rejects a record lacking its identifier or event time, or whose event time
/// the service would not accept. Without a declared `event_time_type` both
/// encodings the service takes are allowed.
pub fn validate_record(
    record: &FeatureRecord,
    record_identifier_feature_name: &str,
    event_time_feature_name: &str,
    event_time_type: Option<FeatureType>,
) -> Result<()> {
    match record.get(record_identifier_feature_name).map(|v| v.value()) {
        None => {
            return Err(FeatureStoreError::malformed_record(format!(
                "missing record identifier feature '{}'",
                record_identifier_feature_name
            )));
        }
        Some(Value::String(s)) if s.is_empty() => {
            return Err(FeatureStoreError::malformed_record(format!(
                "record identifier feature '{}' is empty",
                record_identifier_feature_name
            )));
        }
        Some(_) => {}
    }
    let event_time = record
        .get(event_time_feature_name)
        .ok_or_else(|| {
            FeatureStoreError::malformed_record(format!(
                "missing event time feature '{}'",
                event_time_feature_name
            ))
        })?
        .value();
    let valid_event_time = match (event_time_type, event_time) {
        (Some(FeatureType::String), Value::String(s)) => is_timestamp(s),
        (Some(FeatureType::String), _) => false,
        (Some(_), Value::String(s)) => is_epoch_seconds(s),
        (None, Value::String(s)) => is_timestamp(s) || is_epoch_seconds(s),
        (_, Value::Integral(i)) => *i >= 0,
        (_, Value::Fractional(f)) => f.is_finite() && *f >= 0.0,
    };
    if !valid_event_time {
        let expected = match event_time_type {
            Some(FeatureType::String) => "an ISO-8601 timestamp",
            Some(_) => "non-negative epoch seconds",
            None => "an ISO-8601 timestamp or non-negative epoch seconds",
        };
        return Err(FeatureStoreError::malformed_record(format!(
            "event time feature '{}' has value '{}', expected {}",
            event_time_feature_name, event_time, expected
        )));
    }
    Ok(())
}

fn is_timestamp(value: &str) -> bool {
    DateTime::parse_from_rfc3339(value).is_ok()
}

fn is_epoch_seconds(value: &str) -> bool {
    value
        .trim()
        .parse::<f64>()
        .is_ok_and(|secs| secs.is_finite() && secs >= 0.0)
}
