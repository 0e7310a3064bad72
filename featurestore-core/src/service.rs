//! The boundary to the remote feature store.

pub mod memory;
pub mod sagemaker;

use crate::config::{BackendConfig, StoreConfig};
use crate::error::{FeatureStoreError, Result};
use crate::model::{FeatureGroupDescription, FeatureGroupSpec, FeatureRecord};
use crate::offline::OfflineObject;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// The remote operations, one request/response each. Implementations report
/// a name conflict on create as [`FeatureStoreError::AlreadyExists`] and a
/// missing group as [`FeatureStoreError::NotFound`]; recovery policy lives in
/// [`crate::feature_store::FeatureStore`].
#[async_trait]
pub trait FeatureStoreService: Send + Sync + 'static {
    /// Returns the ARN of the new group.
    async fn create_feature_group(&self, spec: &FeatureGroupSpec) -> Result<String>;

    async fn describe_feature_group(&self, name: &str) -> Result<FeatureGroupDescription>;

    async fn delete_feature_group(&self, name: &str) -> Result<()>;

    async fn put_record(&self, group_name: &str, record: &FeatureRecord) -> Result<()>;

    /// An empty `feature_names` asks for every feature.
    async fn get_record(
        &self,
        group_name: &str,
        record_identifier: &str,
        feature_names: &[String],
    ) -> Result<Option<FeatureRecord>>;

    async fn list_offline_objects(
        &self,
        _group: &FeatureGroupDescription,
        _limit: usize,
    ) -> Result<Vec<OfflineObject>> {
        Err(FeatureStoreError::Unsupported {
            operation: "ListOfflineObjects",
        })
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

pub async fn get_feature_store_service(config: &StoreConfig) -> Result<Arc<dyn FeatureStoreService>> {
    match &config.backend {
        BackendConfig::Sagemaker { region, endpoints } => {
            debug!("Create SageMaker feature store clients, region: {:?}", region);
            sagemaker::SageMakerFeatureStore::from_config(region.clone(), endpoints)
                .await
                .map(|store| Arc::new(store) as Arc<dyn FeatureStoreService>)
        }
        BackendConfig::Memory {
            region,
            account_id,
            max_record_bytes,
        } => {
            debug!("Create in-memory feature store for account {}", account_id);
            let mut store = memory::InMemoryFeatureStore::new(region.clone(), account_id.clone());
            if let Some(max_record_bytes) = max_record_bytes {
                store = store.with_max_record_bytes(*max_record_bytes);
            }
            Ok(Arc::new(store))
        }
    }
}
