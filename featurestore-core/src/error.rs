use std::fmt::{self, Display, Formatter};
use std::time::Duration;

pub type Result<T, E = FeatureStoreError> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq)]
pub enum FeatureStoreError {
    /// A feature group with this name already exists.
    AlreadyExists { name: String },
    NotFound { name: String },
    /// Record rejected client-side, before any remote call.
    MalformedRecord { index: Option<usize>, reason: String },
    InvalidDefinition { reason: String },
    Remote {
        operation: &'static str,
        message: String,
        retryable: bool,
    },
    Timeout {
        operation: &'static str,
        after: Duration,
    },
    Cancelled,
    Unsupported { operation: &'static str },
}

impl FeatureStoreError {
    pub fn already_exists(name: impl Into<String>) -> Self {
        Self::AlreadyExists { name: name.into() }
    }

    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    pub fn malformed_record(reason: impl Into<String>) -> Self {
        Self::MalformedRecord {
            index: None,
            reason: reason.into(),
        }
    }

    pub fn invalid_definition(reason: impl Into<String>) -> Self {
        Self::InvalidDefinition {
            reason: reason.into(),
        }
    }

    pub fn remote(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Remote {
            operation,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn retryable(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Remote {
            operation,
            message: message.into(),
            retryable: true,
        }
    }

    /// Attaches the position of the offending record within a submission.
    pub fn at_record(self, index: usize) -> Self {
        match self {
            Self::MalformedRecord { reason, .. } => Self::MalformedRecord {
                index: Some(index),
                reason,
            },
            other => other,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Remote { retryable, .. } => *retryable,
            Self::Timeout { .. } => true,
            _ => false,
        }
    }
}

impl Display for FeatureStoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyExists { name } => write!(f, "Feature group '{}' already exists", name),
            Self::NotFound { name } => write!(f, "Feature group '{}' not found", name),
            Self::MalformedRecord {
                index: Some(index),
                reason,
            } => write!(f, "Malformed record at index {}: {}", index, reason),
            Self::MalformedRecord {
                index: None,
                reason,
            } => write!(f, "Malformed record: {}", reason),
            Self::InvalidDefinition { reason } => {
                write!(f, "Invalid feature group definition: {}", reason)
            }
            Self::Remote {
                operation,
                message,
                retryable,
            } => {
                if *retryable {
                    write!(f, "{} failed (retryable): {}", operation, message)
                } else {
                    write!(f, "{} failed: {}", operation, message)
                }
            }
            Self::Timeout { operation, after } => {
                write!(f, "{} timed out after {:?}", operation, after)
            }
            Self::Cancelled => write!(f, "Operation cancelled"),
            Self::Unsupported { operation } => {
                write!(f, "{} is not supported by this backend", operation)
            }
        }
    }
}

impl std::error::Error for FeatureStoreError {}
