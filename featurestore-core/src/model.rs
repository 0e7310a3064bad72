use crate::error::{FeatureStoreError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

const MAX_NAME_LENGTH: usize = 64;
const MAX_DESCRIPTION_LENGTH: usize = 128;
const MAX_FEATURE_DEFINITIONS: usize = 2500;
const RESERVED_FEATURE_NAMES: [&str; 3] = ["is_deleted", "write_time", "api_invocation_time"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureType {
    String,
    Integral,
    Fractional,
}

impl Display for FeatureType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            FeatureType::String => write!(f, "String"),
            FeatureType::Integral => write!(f, "Integral"),
            FeatureType::Fractional => write!(f, "Fractional"),
        }
    }
}

impl FromStr for FeatureType {
    type Err = FeatureStoreError;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "string" | "str" => Ok(FeatureType::String),
            "integral" | "int" | "integer" | "long" => Ok(FeatureType::Integral),
            "fractional" | "float" | "double" => Ok(FeatureType::Fractional),
            other => Err(FeatureStoreError::invalid_definition(format!(
                "unknown feature type '{}', expected one of: string, integral, fractional",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeatureDefinition {
    pub name: String,
    pub feature_type: FeatureType,
}

impl FeatureDefinition {
    pub fn new(name: impl Into<String>, feature_type: FeatureType) -> Self {
        Self {
            name: name.into(),
            feature_type,
        }
    }
}

/// Parses `name:type`, e.g. `EventTime:string`.
impl FromStr for FeatureDefinition {
    type Err = FeatureStoreError;

    fn from_str(value: &str) -> Result<Self> {
        let (name, feature_type) = value.rsplit_once(':').ok_or_else(|| {
            FeatureStoreError::invalid_definition(format!(
                "feature definition '{}' must look like NAME:TYPE",
                value
            ))
        })?;
        Ok(Self::new(name.trim(), feature_type.trim().parse()?))
    }
}

impl Display for FeatureDefinition {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.feature_type)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Integral(i64),
    Fractional(f64),
    String(String),
}

impl Value {
    pub fn feature_type(&self) -> FeatureType {
        match self {
            Value::String(_) => FeatureType::String,
            Value::Integral(_) => FeatureType::Integral,
            Value::Fractional(_) => FeatureType::Fractional,
        }
    }

    /// Parses a raw cell according to the declared feature type.
    pub fn parse(raw: &str, feature_type: FeatureType) -> Result<Self> {
        match feature_type {
            FeatureType::String => Ok(Value::String(raw.to_owned())),
            FeatureType::Integral => raw.trim().parse::<i64>().map(Value::Integral).map_err(|e| {
                FeatureStoreError::malformed_record(format!(
                    "cannot parse '{}' as integral: {}",
                    raw, e
                ))
            }),
            FeatureType::Fractional => {
                raw.trim().parse::<f64>().map(Value::Fractional).map_err(|e| {
                    FeatureStoreError::malformed_record(format!(
                        "cannot parse '{}' as fractional: {}",
                        raw, e
                    ))
                })
            }
        }
    }
}

/// The remote service takes every value as a string.
impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{}", s),
            Value::Integral(i) => write!(f, "{}", i),
            Value::Fractional(d) => write!(f, "{}", d),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integral(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Fractional(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureValue {
    name: String,
    value: Value,
}

impl FeatureValue {
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn feature_type(&self) -> FeatureType {
        self.value.feature_type()
    }
}

/// One row to ingest. Values keep the order they were built in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureRecord {
    values: Vec<FeatureValue>,
}

impl FeatureRecord {
    pub fn new(values: Vec<FeatureValue>) -> Self {
        Self { values }
    }

    pub fn get(&self, feature_name: &str) -> Option<&FeatureValue> {
        self.values.iter().find(|v| v.name == feature_name)
    }

    pub fn values(&self) -> &[FeatureValue] {
        &self.values
    }

    pub fn iter(&self) -> impl Iterator<Item = &FeatureValue> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Size of the names and string-encoded values sent in a put-record call.
    pub fn payload_len(&self) -> usize {
        self.values
            .iter()
            .map(|v| v.name.len() + v.value.to_string().len())
            .sum()
    }
}

impl FromIterator<FeatureValue> for FeatureRecord {
    fn from_iter<T: IntoIterator<Item = FeatureValue>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a FeatureRecord {
    type Item = &'a FeatureValue;
    type IntoIter = std::slice::Iter<'a, FeatureValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureGroupSpec {
    pub name: String,
    pub description: Option<String>,
    pub record_identifier_feature_name: String,
    pub event_time_feature_name: String,
    pub feature_definitions: Vec<FeatureDefinition>,
    pub online_store_enabled: bool,
    pub offline_store_s3_uri: Option<String>,
    pub role_arn: Option<String>,
}

impl FeatureGroupSpec {
    pub fn new(
        name: impl Into<String>,
        record_identifier_feature_name: impl Into<String>,
        event_time_feature_name: impl Into<String>,
        feature_definitions: Vec<FeatureDefinition>,
    ) -> Self {
        Self {
            name: name.into(),
            description: None,
            record_identifier_feature_name: record_identifier_feature_name.into(),
            event_time_feature_name: event_time_feature_name.into(),
            feature_definitions,
            online_store_enabled: true,
            offline_store_s3_uri: None,
            role_arn: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_online_store(mut self, enabled: bool) -> Self {
        self.online_store_enabled = enabled;
        self
    }

    pub fn with_offline_store(mut self, s3_uri: impl Into<String>) -> Self {
        self.offline_store_s3_uri = Some(s3_uri.into());
        self
    }

    pub fn with_role_arn(mut self, role_arn: impl Into<String>) -> Self {
        self.role_arn = Some(role_arn.into());
        self
    }

    pub fn feature_definition(&self, name: &str) -> Option<&FeatureDefinition> {
        self.feature_definitions.iter().find(|d| d.name == name)
    }

    /// Checks the constraints the remote service enforces on create, so a bad
    /// definition never leaves the process.
    pub fn validate(&self) -> Result<()> {
        validate_name("feature group name", &self.name)?;
        if let Some(description) = &self.description
            && description.chars().count() > MAX_DESCRIPTION_LENGTH
        {
            return Err(FeatureStoreError::invalid_definition(format!(
                "description must be at most {} characters",
                MAX_DESCRIPTION_LENGTH
            )));
        }
        if self.feature_definitions.is_empty() {
            return Err(FeatureStoreError::invalid_definition(
                "at least one feature definition is required",
            ));
        }
        if self.feature_definitions.len() > MAX_FEATURE_DEFINITIONS {
            return Err(FeatureStoreError::invalid_definition(format!(
                "at most {} feature definitions are allowed, got {}",
                MAX_FEATURE_DEFINITIONS,
                self.feature_definitions.len()
            )));
        }
        let mut seen = rustc_hash::FxHashSet::default();
        for definition in &self.feature_definitions {
            validate_name("feature name", &definition.name)?;
            let lowered = definition.name.to_ascii_lowercase();
            if RESERVED_FEATURE_NAMES.contains(&lowered.as_str()) {
                return Err(FeatureStoreError::invalid_definition(format!(
                    "feature name '{}' is reserved",
                    definition.name
                )));
            }
            if !seen.insert(lowered) {
                return Err(FeatureStoreError::invalid_definition(format!(
                    "duplicate feature name '{}'",
                    definition.name
                )));
            }
        }
        if self
            .feature_definition(&self.record_identifier_feature_name)
            .is_none()
        {
            return Err(FeatureStoreError::invalid_definition(format!(
                "record identifier feature '{}' is not among the feature definitions",
                self.record_identifier_feature_name
            )));
        }
        if self.offline_store_s3_uri.is_some() && self.role_arn.is_none() {
            return Err(FeatureStoreError::invalid_definition(
                "an offline store requires a role ARN the service can assume to write to S3",
            ));
        }
        match self.feature_definition(&self.event_time_feature_name) {
            None => Err(FeatureStoreError::invalid_definition(format!(
                "event time feature '{}' is not among the feature definitions",
                self.event_time_feature_name
            ))),
            Some(definition) if definition.feature_type == FeatureType::Integral => {
                Err(FeatureStoreError::invalid_definition(format!(
                    "event time feature '{}' must be String or Fractional",
                    definition.name
                )))
            }
            Some(_) => Ok(()),
        }
    }
}

fn validate_name(kind: &str, name: &str) -> Result<()> {
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    let alnum_ends = name.starts_with(|c: char| c.is_ascii_alphanumeric())
        && name.ends_with(|c: char| c.is_ascii_alphanumeric());
    if name.is_empty() || name.len() > MAX_NAME_LENGTH || !valid_chars || !alnum_ends {
        return Err(FeatureStoreError::invalid_definition(format!(
            "{} '{}' must be 1-{} characters of [A-Za-z0-9_-], starting and ending with a letter or digit",
            kind, name, MAX_NAME_LENGTH
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureGroupDescription {
    pub name: String,
    pub arn: String,
    pub creation_time: DateTime<Utc>,
    pub feature_definitions: Vec<FeatureDefinition>,
    pub record_identifier_feature_name: String,
    pub event_time_feature_name: String,
    pub role_arn: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub online_store_enabled: bool,
    pub offline_store_s3_uri: Option<String>,
}

/// Outcome of a create call. A duplicate name resolves to the existing group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreatedFeatureGroup {
    Created(String),
    AlreadyExists(String),
}

impl CreatedFeatureGroup {
    pub fn arn(&self) -> &str {
        match self {
            CreatedFeatureGroup::Created(arn) | CreatedFeatureGroup::AlreadyExists(arn) => arn,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, CreatedFeatureGroup::AlreadyExists(_))
    }
}
