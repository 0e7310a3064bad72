//! In-process stand-in for the remote service. Mirrors the remote semantics
//! that matter to callers (conflicts, not-found, payload limits, record
//! validation) and counts put-record calls.

use crate::error::{FeatureStoreError, Result};
use crate::model::{FeatureGroupDescription, FeatureGroupSpec, FeatureRecord};
use crate::service::FeatureStoreService;
use async_trait::async_trait;
use chrono::Utc;
use rustc_hash::FxHashMap as HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

struct StoredGroup {
    description: FeatureGroupDescription,
    records: HashMap<String, FeatureRecord>,
}

pub struct InMemoryFeatureStore {
    region: String,
    account_id: String,
    max_record_bytes: Option<usize>,
    call_delay: Option<Duration>,
    groups: RwLock<HashMap<String, StoredGroup>>,
    put_record_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    transient_failures: AtomicUsize,
}

/// Keeps the in-flight gauge right when a call is dropped mid-flight.
struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl InMemoryFeatureStore {
    pub fn new(region: impl Into<String>, account_id: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            account_id: account_id.into(),
            max_record_bytes: None,
            call_delay: None,
            groups: RwLock::new(HashMap::default()),
            put_record_calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            transient_failures: AtomicUsize::new(0),
        }
    }

    /// Put-record calls whose payload exceeds the limit fail with a validation error.
    pub fn with_max_record_bytes(mut self, max_record_bytes: usize) -> Self {
        self.max_record_bytes = Some(max_record_bytes);
        self
    }

    /// Simulated network latency for every put-record call.
    pub fn with_call_delay(mut self, delay: Duration) -> Self {
        self.call_delay = Some(delay);
        self
    }

    /// The next `count` put-record calls fail with a retryable error.
    pub fn fail_next_puts(&self, count: usize) {
        self.transient_failures.store(count, Ordering::SeqCst);
    }

    pub fn put_record_calls(&self) -> usize {
        self.put_record_calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn record_count(&self, group_name: &str) -> usize {
        self.groups
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(group_name)
            .map(|group| group.records.len())
            .unwrap_or(0)
    }

    fn arn(&self, group_name: &str) -> String {
        format!(
            "arn:aws:sagemaker:{}:{}:feature-group/{}",
            self.region,
            self.account_id,
            group_name.to_ascii_lowercase()
        )
    }

    fn check_record(
        &self,
        description: &FeatureGroupDescription,
        record: &FeatureRecord,
    ) -> Result<String> {
        let validation_error = |reason: String| {
            FeatureStoreError::remote("PutRecord", format!("ValidationError: {}", reason))
        };
        if let Some(max_record_bytes) = self.max_record_bytes {
            let payload_len = record.payload_len();
            if payload_len > max_record_bytes {
                return Err(validation_error(format!(
                    "record payload of {} bytes exceeds the limit of {} bytes",
                    payload_len, max_record_bytes
                )));
            }
        }
        for value in record {
            if !description
                .feature_definitions
                .iter()
                .any(|d| d.name == value.name())
            {
                return Err(validation_error(format!(
                    "feature '{}' is not defined in feature group '{}'",
                    value.name(),
                    description.name
                )));
            }
        }
        if record.get(&description.event_time_feature_name).is_none() {
            return Err(validation_error(format!(
                "missing event time feature '{}'",
                description.event_time_feature_name
            )));
        }
        record
            .get(&description.record_identifier_feature_name)
            .map(|v| v.value().to_string())
            .ok_or_else(|| {
                validation_error(format!(
                    "missing record identifier feature '{}'",
                    description.record_identifier_feature_name
                ))
            })
    }
}

#[async_trait]
impl FeatureStoreService for InMemoryFeatureStore {
    async fn create_feature_group(&self, spec: &FeatureGroupSpec) -> Result<String> {
        let mut groups = self.groups.write().unwrap_or_else(PoisonError::into_inner);
        if groups.contains_key(&spec.name) {
            return Err(FeatureStoreError::already_exists(&spec.name));
        }
        let created = Utc::now();
        let arn = self.arn(&spec.name);
        let offline_store_s3_uri = spec.offline_store_s3_uri.as_ref().map(|uri| {
            format!(
                "{}/{}/sagemaker/{}/offline-store/{}-{}/data",
                uri.trim_end_matches('/'),
                self.account_id,
                self.region,
                spec.name,
                created.timestamp()
            )
        });
        let description = FeatureGroupDescription {
            name: spec.name.clone(),
            arn: arn.clone(),
            creation_time: created,
            feature_definitions: spec.feature_definitions.clone(),
            record_identifier_feature_name: spec.record_identifier_feature_name.clone(),
            event_time_feature_name: spec.event_time_feature_name.clone(),
            role_arn: spec.role_arn.clone(),
            description: spec.description.clone(),
            status: Some("Created".to_string()),
            online_store_enabled: spec.online_store_enabled,
            offline_store_s3_uri,
        };
        groups.insert(
            spec.name.clone(),
            StoredGroup {
                description,
                records: HashMap::default(),
            },
        );
        Ok(arn)
    }

    async fn describe_feature_group(&self, name: &str) -> Result<FeatureGroupDescription> {
        self.groups
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(|group| group.description.clone())
            .ok_or_else(|| FeatureStoreError::not_found(name))
    }

    async fn delete_feature_group(&self, name: &str) -> Result<()> {
        self.groups
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| FeatureStoreError::not_found(name))
    }

    async fn put_record(&self, group_name: &str, record: &FeatureRecord) -> Result<()> {
        self.put_record_calls.fetch_add(1, Ordering::SeqCst);
        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlightGuard(&self.in_flight);
        self.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);

        if let Some(delay) = self.call_delay {
            tokio::time::sleep(delay).await;
        }
        let failed_transiently = self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed_transiently {
            return Err(FeatureStoreError::retryable(
                "PutRecord",
                "ServiceUnavailable: service is temporarily unavailable",
            ));
        }

        let mut groups = self.groups.write().unwrap_or_else(PoisonError::into_inner);
        let group = groups
            .get_mut(group_name)
            .ok_or_else(|| FeatureStoreError::not_found(group_name))?;
        let record_id = self.check_record(&group.description, record)?;
        group.records.insert(record_id, record.clone());
        Ok(())
    }

    async fn get_record(
        &self,
        group_name: &str,
        record_identifier: &str,
        feature_names: &[String],
    ) -> Result<Option<FeatureRecord>> {
        let groups = self.groups.read().unwrap_or_else(PoisonError::into_inner);
        let group = groups
            .get(group_name)
            .ok_or_else(|| FeatureStoreError::not_found(group_name))?;
        Ok(group.records.get(record_identifier).map(|record| {
            if feature_names.is_empty() {
                record.clone()
            } else {
                record
                    .iter()
                    .filter(|v| feature_names.iter().any(|name| name == v.name()))
                    .cloned()
                    .collect()
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FeatureDefinition, FeatureType, FeatureValue};
    use anyhow::Result;

    fn orders_spec() -> FeatureGroupSpec {
        FeatureGroupSpec::new(
            "orders-v1",
            "orderId",
            "ts",
            vec![
                FeatureDefinition::new("orderId", FeatureType::String),
                FeatureDefinition::new("ts", FeatureType::String),
            ],
        )
        .with_offline_store("s3://bucket/prefix/")
        .with_role_arn("arn:aws:iam::123456789012:role/FeatureStoreRole")
    }

    fn order(id: &str) -> FeatureRecord {
        FeatureRecord::new(vec![
            FeatureValue::new("orderId", id),
            FeatureValue::new("ts", "2024-01-01T00:00:00Z"),
        ])
    }

    #[tokio::test]
    async fn create_conflicts_on_existing_name() -> Result<()> {
        let store = InMemoryFeatureStore::new("us-west-2", "123456789012");
        let arn = store.create_feature_group(&orders_spec()).await?;
        assert_eq!(
            arn,
            "arn:aws:sagemaker:us-west-2:123456789012:feature-group/orders-v1"
        );
        let err = store.create_feature_group(&orders_spec()).await.unwrap_err();
        assert!(err.is_conflict());

        let description = store.describe_feature_group("orders-v1").await?;
        let offline = description.offline_store_s3_uri.unwrap_or_default();
        assert!(offline.starts_with(
            "s3://bucket/prefix/123456789012/sagemaker/us-west-2/offline-store/orders-v1-"
        ));
        Ok(())
    }

    #[tokio::test]
    async fn put_and_get_record() -> Result<()> {
        let store = InMemoryFeatureStore::new("us-west-2", "123456789012");
        store.create_feature_group(&orders_spec()).await?;
        store.put_record("orders-v1", &order("o-1")).await?;
        assert_eq!(store.put_record_calls(), 1);
        assert_eq!(store.record_count("orders-v1"), 1);

        let record = store.get_record("orders-v1", "o-1", &[]).await?;
        assert_eq!(record, Some(order("o-1")));

        let projected = store
            .get_record("orders-v1", "o-1", &["ts".to_string()])
            .await?
            .unwrap_or_default();
        assert_eq!(projected.len(), 1);
        assert!(projected.get("ts").is_some());

        assert_eq!(store.get_record("orders-v1", "o-2", &[]).await?, None);
        assert!(
            store
                .get_record("customers", "o-1", &[])
                .await
                .unwrap_err()
                .is_not_found()
        );
        Ok(())
    }

    #[tokio::test]
    async fn put_rejects_oversized_and_undefined_features() -> Result<()> {
        let store = InMemoryFeatureStore::new("us-west-2", "123456789012").with_max_record_bytes(40);
        store.create_feature_group(&orders_spec()).await?;

        let oversized = FeatureRecord::new(vec![
            FeatureValue::new("orderId", "o".repeat(64)),
            FeatureValue::new("ts", "2024-01-01T00:00:00Z"),
        ]);
        assert!(store.put_record("orders-v1", &oversized).await.is_err());

        let undefined = FeatureRecord::new(vec![
            FeatureValue::new("orderId", "o-1"),
            FeatureValue::new("ts", "2024-01-01T00:00:00Z"),
            FeatureValue::new("color", "red"),
        ]);
        assert!(store.put_record("orders-v1", &undefined).await.is_err());
        assert_eq!(store.record_count("orders-v1"), 0);
        assert_eq!(store.put_record_calls(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn delete_missing_group_is_not_found() -> Result<()> {
        let store = InMemoryFeatureStore::new("us-west-2", "123456789012");
        store.create_feature_group(&orders_spec()).await?;
        store.delete_feature_group("orders-v1").await?;
        let err = store.delete_feature_group("orders-v1").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(
            store
                .describe_feature_group("orders-v1")
                .await
                .unwrap_err()
                .is_not_found()
        );
        Ok(())
    }

    #[tokio::test]
    async fn transient_failures_are_retryable() -> Result<()> {
        let store = InMemoryFeatureStore::new("us-west-2", "123456789012");
        store.create_feature_group(&orders_spec()).await?;
        store.fail_next_puts(1);
        let err = store.put_record("orders-v1", &order("o-1")).await.unwrap_err();
        assert!(err.is_retryable());
        store.put_record("orders-v1", &order("o-1")).await?;
        assert_eq!(store.record_count("orders-v1"), 1);
        Ok(())
    }
}
