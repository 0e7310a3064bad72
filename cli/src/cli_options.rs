use clap::{Parser, Subcommand, ValueEnum};
use featurestore_core::model::FeatureDefinition;
use std::num::NonZeroUsize;
use std::path::PathBuf;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum Backend {
    Sagemaker,
    Memory,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl From<LogLevel> for tracing::Level {
    fn from(value: LogLevel) -> Self {
        match value {
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warning => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Critical => tracing::Level::ERROR,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Create a feature group, or report the existing one when the name is taken
    Create {
        #[arg(short = 'n', long = "name")]
        name: String,
        #[arg(short = 'd', long = "description", default_value = None)]
        description: Option<String>,
        /// Feature holding the record identifier
        #[arg(long = "record-id")]
        record_id: String,
        /// Feature holding the event time
        #[arg(long = "event-time")]
        event_time: String,
        /// Feature definition as NAME:TYPE, TYPE being string, integral or fractional. Repeatable
        #[arg(short = 'f', long = "feature", required = true)]
        features: Vec<FeatureDefinition>,
        /// Enable the online store (the configured default otherwise)
        #[arg(long = "online", overrides_with = "no_online")]
        online: bool,
        /// Disable the online store
        #[arg(long = "no-online")]
        no_online: bool,
    },
    /// Print a feature group's metadata to the log
    Describe { name: String },
    /// Print a feature group's metadata as JSON
    Get { name: String },
    /// Delete a feature group
    Delete { name: String },
    /// Put every row of a CSV file into one or more feature groups
    Ingest {
        /// Target feature group. Repeatable
        #[arg(short = 'n', long = "name", required = true)]
        names: Vec<String>,
        /// Event time feature; the one each group declares when omitted
        #[arg(long = "event-time", default_value = None)]
        event_time: Option<String>,
        /// Record identifier feature; the one each group declares when omitted
        #[arg(long = "record-id", default_value = None)]
        record_id: Option<String>,
        #[arg(long = "csv")]
        csv: PathBuf,
        /// Types for the CSV columns as NAME:TYPE. Without them every value is a string
        #[arg(short = 'f', long = "feature")]
        features: Vec<FeatureDefinition>,
        /// Number of concurrent put-record calls
        #[arg(short = 'w', long = "workers", default_value = None)]
        workers: Option<NonZeroUsize>,
    },
    /// Read one record from the online store
    GetRecord {
        name: String,
        record_id: String,
        /// Only return this feature. Repeatable
        #[arg(short = 'f', long = "feature")]
        features: Vec<String>,
    },
    /// List objects written to a feature group's offline store
    OfflineObjects {
        name: String,
        #[arg(short = 'l', long = "limit", default_value_t = 100)]
        limit: usize,
    },
    /// Create a group, ingest sample records, read them back and delete the group
    Demo {
        #[arg(short = 'n', long = "name", default_value = "transactions-demo")]
        name: String,
        #[arg(short = 'r', long = "records", default_value_t = 10)]
        records: usize,
        #[arg(short = 'w', long = "workers", default_value = None)]
        workers: Option<NonZeroUsize>,
    },
}

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct CliOptions {
    /// Path to the YAML configuration.
    /// Can also be set via the FEATURESTORE_CONFIG environment variable
    #[arg(short = 'c', long = "config", default_value = None)]
    pub config: Option<PathBuf>,
    /// The logging level. Case-insensitive.
    #[arg(
        value_enum,
        long = "log-level",
        ignore_case = true,
        default_value = "info"
    )]
    pub log_level: LogLevel,
    /// Override the configured backend
    #[arg(value_enum, short = 'b', long = "backend", default_value = None)]
    pub backend: Option<Backend>,
    #[arg(short = 'r', long = "region", default_value = None)]
    pub region: Option<String>,
    /// IAM role the service assumes to write the offline store
    #[arg(long = "role-arn", default_value = None)]
    pub role_arn: Option<String>,
    /// S3 location of the offline store, s3://bucket/prefix
    #[arg(long = "offline-store-uri", default_value = None)]
    pub offline_store_uri: Option<String>,
    #[command(subcommand)]
    pub command: CliCommand,
}
