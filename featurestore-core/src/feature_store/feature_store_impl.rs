use crate::config::StoreConfig;
use crate::error::Result;
use crate::ingest::{self, IngestOptions, IngestReport, IngestTarget};
use crate::model::{CreatedFeatureGroup, FeatureGroupDescription, FeatureGroupSpec, FeatureRecord};
use crate::offline::OfflineObject;
use crate::service::{FeatureStoreService, get_feature_store_service};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct FeatureStore {
    service: Arc<dyn FeatureStoreService>,
}

impl FeatureStore {
    pub fn new(service: Arc<dyn FeatureStoreService>) -> Self {
        Self { service }
    }

    pub async fn from_config(config: &StoreConfig) -> Result<Self> {
        get_feature_store_service(config).await.map(Self::new)
    }

    /// Creates the group, or returns the existing group's ARN when the name is taken.
    pub async fn create_feature_group(&self, spec: &FeatureGroupSpec) -> Result<CreatedFeatureGroup> {
        spec.validate()?;
        match self.service.create_feature_group(spec).await {
            Ok(arn) => {
                info!("Created feature group {}: {}", spec.name, arn);
                Ok(CreatedFeatureGroup::Created(arn))
            }
            Err(err) if err.is_conflict() => {
                warn!(
                    "Feature group {} is a duplicate, looking up the existing group",
                    spec.name
                );
                let existing = self.service.describe_feature_group(&spec.name).await?;
                Ok(CreatedFeatureGroup::AlreadyExists(existing.arn))
            }
            Err(err) => Err(err),
        }
    }

    pub async fn describe_feature_group(&self, name: &str) -> Result<FeatureGroupDescription> {
        let description = self.service.describe_feature_group(name).await?;
        info!("Feature group name: {}", description.name);
        info!("Feature group ARN: {}", description.arn);
        info!("Creation time: {}", description.creation_time);
        if let Some(status) = &description.status {
            info!("Status: {}", status);
        }
        info!(
            "Record identifier: {}, event time: {}",
            description.record_identifier_feature_name, description.event_time_feature_name
        );
        for definition in &description.feature_definitions {
            info!("Feature definition: {}", definition);
        }
        info!("Online store enabled: {}", description.online_store_enabled);
        if let Some(uri) = &description.offline_store_s3_uri {
            info!("Offline store location: {}", uri);
        }
        if let Some(role_arn) = &description.role_arn {
            info!("Role ARN: {}", role_arn);
        }
        Ok(description)
    }

    pub async fn get_feature_group(&self, name: &str) -> Result<FeatureGroupDescription> {
        self.service.describe_feature_group(name).await
    }

    pub async fn delete_feature_group(&self, name: &str) -> Result<()> {
        self.service.delete_feature_group(name).await?;
        info!("Deleted feature group {}", name);
        Ok(())
    }

    pub async fn get_record(
        &self,
        group_name: &str,
        record_identifier: &str,
        feature_names: &[String],
    ) -> Result<Option<FeatureRecord>> {
        let record = self
            .service
            .get_record(group_name, record_identifier, feature_names)
            .await?;
        if record.is_none() {
            debug!("No record {} in feature group {}", record_identifier, group_name);
        }
        Ok(record)
    }

    /// Targets carrying the identifier and event-time names each group declares.
    pub async fn ingest_targets(&self, group_names: &[String]) -> Result<Vec<IngestTarget>> {
        let mut targets = Vec::with_capacity(group_names.len());
        for name in group_names {
            let description = self.service.describe_feature_group(name).await?;
            let mut target = IngestTarget::new(
                &description.name,
                &description.record_identifier_feature_name,
                &description.event_time_feature_name,
            );
            if let Some(definition) = description
                .feature_definitions
                .iter()
                .find(|d| d.name == description.event_time_feature_name)
            {
                target = target.with_event_time_type(definition.feature_type);
            }
            targets.push(target);
        }
        Ok(targets)
    }

    pub async fn ingest(
        &self,
        records: Vec<FeatureRecord>,
        targets: &[IngestTarget],
        options: &IngestOptions,
    ) -> Result<IngestReport> {
        ingest::batch_ingest(Arc::clone(&self.service), records, targets, options).await
    }

    pub async fn list_offline_objects(
        &self,
        group_name: &str,
        limit: usize,
    ) -> Result<Vec<OfflineObject>> {
        let description = self.service.describe_feature_group(group_name).await?;
        self.service.list_offline_objects(&description, limit).await
    }

    pub async fn shutdown(self) -> Result<()> {
        debug!("Shutting down feature store clients");
        self.service.shutdown().await
    }
}
