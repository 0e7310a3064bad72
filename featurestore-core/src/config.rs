use crate::ingest::{DEFAULT_WORKERS, IngestOptions};
use crate::offline::S3Location;
use crate::retry::RetryPolicy;
use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::time::Duration;

pub const DEFAULT_MEMORY_REGION: &str = "us-west-2";
pub const DEFAULT_MEMORY_ACCOUNT_ID: &str = "000000000000";

/// Endpoint overrides, e.g. for LocalStack.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    #[serde(default)]
    pub sagemaker: Option<String>,
    #[serde(default)]
    pub runtime: Option<String>,
    #[serde(default)]
    pub s3: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendConfig {
    Sagemaker {
        #[serde(default)]
        region: Option<String>,
        #[serde(default)]
        endpoints: EndpointConfig,
    },
    Memory {
        #[serde(default = "default_memory_region")]
        region: String,
        #[serde(default = "default_memory_account_id")]
        account_id: String,
        #[serde(default)]
        max_record_bytes: Option<usize>,
    },
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::Sagemaker {
            region: None,
            endpoints: EndpointConfig::default(),
        }
    }
}

impl BackendConfig {
    pub fn memory() -> Self {
        BackendConfig::Memory {
            region: default_memory_region(),
            account_id: default_memory_account_id(),
            max_record_bytes: None,
        }
    }
}

fn default_memory_region() -> String {
    DEFAULT_MEMORY_REGION.to_string()
}

fn default_memory_account_id() -> String {
    DEFAULT_MEMORY_ACCOUNT_ID.to_string()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OfflineStoreConfig {
    pub s3_uri: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OnlineStoreConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for OnlineStoreConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_call_timeout_seconds")]
    pub call_timeout_seconds: Option<u64>,
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            call_timeout_seconds: default_call_timeout_seconds(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

fn default_workers() -> usize {
    DEFAULT_WORKERS.get()
}

fn default_call_timeout_seconds() -> Option<u64> {
    Some(30)
}

fn default_max_retries() -> usize {
    3
}

fn default_initial_backoff_ms() -> u64 {
    100
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

impl IngestConfig {
    pub fn workers(&self) -> Result<NonZeroUsize> {
        NonZeroUsize::new(self.workers).ok_or_else(|| anyhow!("ingest.workers must be at least 1"))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.initial_backoff_ms),
            Duration::from_millis(self.max_backoff_ms),
            2.0,
        )
    }

    pub fn to_options(&self) -> Result<IngestOptions> {
        Ok(IngestOptions::new(self.workers()?)
            .with_call_timeout(self.call_timeout_seconds.map(Duration::from_secs))
            .with_retry_policy(self.retry_policy()))
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub role_arn: Option<String>,
    #[serde(default)]
    pub offline_store: Option<OfflineStoreConfig>,
    #[serde(default)]
    pub online_store: OnlineStoreConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

impl StoreConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Err(anyhow!("Empty configuration file"));
        }
        let config: StoreConfig = serde_saphyr::from_str(yaml).map_err(|err| anyhow!(err))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.ingest.workers()?;
        if self.ingest.max_backoff_ms < self.ingest.initial_backoff_ms {
            return Err(anyhow!(
                "ingest.max_backoff_ms must not be lower than ingest.initial_backoff_ms"
            ));
        }
        if let Some(offline_store) = &self.offline_store {
            S3Location::parse(&offline_store.s3_uri)?;
        }
        Ok(())
    }

    pub fn offline_store_uri(&self) -> Option<&str> {
        self.offline_store.as_ref().map(|o| o.s3_uri.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;

    fn read_test_config(name: &str) -> Result<StoreConfig> {
        let project_dir = env!("CARGO_MANIFEST_DIR");
        let config_path = format!("{}/test_data/{}", project_dir, name);
        let yaml_str = fs::read_to_string(config_path)?;
        StoreConfig::from_yaml_str(&yaml_str)
    }

    #[test]
    fn parse_config_sagemaker() -> Result<()> {
        let config = read_test_config("sagemaker.yaml")?;
        let expected_backend = BackendConfig::Sagemaker {
            region: Some("us-west-2".to_string()),
            endpoints: EndpointConfig {
                sagemaker: None,
                runtime: Some("http://localhost:4566".to_string()),
                s3: None,
            },
        };
        assert_eq!(config.backend, expected_backend);
        assert_eq!(
            config.role_arn.as_deref(),
            Some("arn:aws:iam::123456789012:role/FeatureStoreRole")
        );
        assert_eq!(
            config.offline_store_uri(),
            Some("s3://feature-store-bucket/sagemaker-featurestore")
        );
        assert!(config.online_store.enabled);
        assert_eq!(config.ingest.workers, 8);
        assert_eq!(config.ingest.max_retries, 5);
        assert_eq!(config.ingest.call_timeout_seconds, Some(30));
        Ok(())
    }

    #[test]
    fn parse_config_memory() -> Result<()> {
        let config = read_test_config("memory.yaml")?;
        let expected_backend = BackendConfig::Memory {
            region: "eu-west-1".to_string(),
            account_id: DEFAULT_MEMORY_ACCOUNT_ID.to_string(),
            max_record_bytes: Some(1024),
        };
        assert_eq!(config.backend, expected_backend);
        assert!(!config.online_store.enabled);
        assert_eq!(config.offline_store, None);
        assert_eq!(config.ingest, IngestConfig::default());
        Ok(())
    }

    #[test]
    fn empty_config_is_rejected() {
        assert!(StoreConfig::from_yaml_str("  \n").is_err());
    }

    #[test]
    fn zero_workers_is_rejected() {
        let yaml = "backend:\n  type: memory\ningest:\n  workers: 0\n";
        assert!(StoreConfig::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn offline_store_must_be_s3() {
        let yaml = "offline_store:\n  s3_uri: gs://bucket/prefix\n";
        assert!(StoreConfig::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn ingest_options_from_config() -> Result<()> {
        let options = IngestConfig::default().to_options()?;
        assert_eq!(options.workers, DEFAULT_WORKERS);
        assert_eq!(options.call_timeout, Some(Duration::from_secs(30)));
        assert_eq!(options.retry_policy.max_retries, 3);
        Ok(())
    }
}
