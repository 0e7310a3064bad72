//! Bounded-concurrency submission of records to one or more feature groups.
//!
//! Records are split into contiguous partitions, one per worker task. Each
//! worker puts its records one at a time, for every target group in order,
//! and keeps going after a failed call. The submission returns once every
//! worker has finished.

use crate::error::{FeatureStoreError, Result};
use crate::model::{FeatureRecord, FeatureType};
use crate::records::validate_record;
use crate::retry::{RetryPolicy, retry_with_backoff};
use crate::service::FeatureStoreService;
use std::num::NonZeroUsize;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_WORKERS: NonZeroUsize = NonZeroUsize::MIN.saturating_add(3);

/// A feature group receiving the records, with the fields every record must carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestTarget {
    pub group_name: String,
    pub record_identifier_feature_name: String,
    pub event_time_feature_name: String,
    /// Declared type of the event time feature, when known.
    pub event_time_type: Option<FeatureType>,
}

impl IngestTarget {
    pub fn new(
        group_name: impl Into<String>,
        record_identifier_feature_name: impl Into<String>,
        event_time_feature_name: impl Into<String>,
    ) -> Self {
        Self {
            group_name: group_name.into(),
            record_identifier_feature_name: record_identifier_feature_name.into(),
            event_time_feature_name: event_time_feature_name.into(),
            event_time_type: None,
        }
    }

    pub fn with_event_time_type(mut self, feature_type: FeatureType) -> Self {
        self.event_time_type = Some(feature_type);
        self
    }
}

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub workers: NonZeroUsize,
    /// Limit for a single put-record call, retries excluded.
    pub call_timeout: Option<Duration>,
    pub retry_policy: RetryPolicy,
    pub cancellation: CancellationToken,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self::new(DEFAULT_WORKERS)
    }
}

impl IngestOptions {
    pub fn new(workers: NonZeroUsize) -> Self {
        Self {
            workers,
            call_timeout: None,
            retry_policy: RetryPolicy::none(),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_call_timeout(mut self, call_timeout: Option<Duration>) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IngestFailure {
    pub record_index: usize,
    pub group_name: String,
    pub error: FeatureStoreError,
}

/// Counts are in put-record calls: one per record and target group.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failures: Vec<IngestFailure>,
    /// Calls never made because the submission was cancelled.
    pub skipped: usize,
    /// Workers that panicked or were aborted; their outcome is unknown.
    pub failed_workers: usize,
}

impl IngestReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.skipped == 0 && self.failed_workers == 0
    }

    fn merge(&mut self, other: IngestReport) {
        self.attempted += other.attempted;
        self.succeeded += other.succeeded;
        self.failures.extend(other.failures);
        self.skipped += other.skipped;
        self.failed_workers += other.failed_workers;
    }
}

/// Contiguous ranges over `len` items; the first `len % workers` ranges hold
/// one extra item. Never returns an empty range.
fn partition(len: usize, workers: NonZeroUsize) -> Vec<Range<usize>> {
    let workers = workers.get().min(len);
    if workers == 0 {
        return Vec::new();
    }
    let base = len / workers;
    let extra = len % workers;
    let mut start = 0;
    (0..workers)
        .map(|i| {
            let size = base + usize::from(i < extra);
            let range = start..start + size;
            start += size;
            range
        })
        .collect()
}

async fn put_with_policy(
    service: &dyn FeatureStoreService,
    group_name: &str,
    record: &FeatureRecord,
    call_timeout: Option<Duration>,
    retry_policy: &RetryPolicy,
    cancellation: &CancellationToken,
) -> Result<()> {
    let call = retry_with_backoff(retry_policy, || async move {
        let Some(after) = call_timeout else {
            return service.put_record(group_name, record).await;
        };
        tokio::time::timeout(after, service.put_record(group_name, record))
            .await
            .unwrap_or(Err(FeatureStoreError::Timeout {
                operation: "PutRecord",
                after,
            }))
    });
    tokio::select! {
        result = call => result,
        _ = cancellation.cancelled() => Err(FeatureStoreError::Cancelled),
    }
}

struct Worker {
    id: usize,
    service: Arc<dyn FeatureStoreService>,
    records: Arc<[FeatureRecord]>,
    range: Range<usize>,
    targets: Arc<[IngestTarget]>,
    call_timeout: Option<Duration>,
    retry_policy: RetryPolicy,
    cancellation: CancellationToken,
}

impl Worker {
    async fn run(self) -> IngestReport {
        let mut report = IngestReport::default();
        let total_calls = self.range.len() * self.targets.len();
        debug!(
            "Worker {} starts on records {}..{}",
            self.id, self.range.start, self.range.end
        );
        for record_index in self.range.clone() {
            let record = &self.records[record_index];
            for target in self.targets.iter() {
                if self.cancellation.is_cancelled() {
                    report.skipped = total_calls - report.attempted;
                    debug!("Worker {} cancelled, {} calls skipped", self.id, report.skipped);
                    return report;
                }
                report.attempted += 1;
                let result = put_with_policy(
                    self.service.as_ref(),
                    &target.group_name,
                    record,
                    self.call_timeout,
                    &self.retry_policy,
                    &self.cancellation,
                )
                .await;
                match result {
                    Ok(()) => report.succeeded += 1,
                    Err(error) => {
                        warn!(
                            "Failed to put record {} into feature group {}: {}",
                            record_index, target.group_name, error
                        );
                        let cancelled = matches!(error, FeatureStoreError::Cancelled);
                        report.failures.push(IngestFailure {
                            record_index,
                            group_name: target.group_name.clone(),
                            error,
                        });
                        if cancelled {
                            report.skipped = total_calls - report.attempted;
                            return report;
                        }
                    }
                }
            }
        }
        debug!(
            "Worker {} done, {}/{} calls succeeded",
            self.id, report.succeeded, report.attempted
        );
        report
    }
}

/// Puts every record into every target group using at most
/// `options.workers` concurrent calls.
///
/// All records are validated first; a malformed record rejects the whole
/// submission before any call is made. Afterwards individual failures are
/// collected in the returned report and never stop the other workers.
pub async fn batch_ingest(
    service: Arc<dyn FeatureStoreService>,
    records: Vec<FeatureRecord>,
    targets: &[IngestTarget],
    options: &IngestOptions,
) -> Result<IngestReport> {
    if targets.is_empty() {
        return Err(FeatureStoreError::invalid_definition(
            "at least one target feature group is required",
        ));
    }
    for (index, record) in records.iter().enumerate() {
        for target in targets {
            validate_record(
                record,
                &target.record_identifier_feature_name,
                &target.event_time_feature_name,
                target.event_time_type,
            )
            .map_err(|e| e.at_record(index))?;
        }
    }
    if records.is_empty() {
        debug!("No records to ingest");
        return Ok(IngestReport::default());
    }

    let ranges = partition(records.len(), options.workers);
    info!(
        "Ingesting {} records into {} feature group(s) with {} workers",
        records.len(),
        targets.len(),
        ranges.len()
    );
    let records: Arc<[FeatureRecord]> = records.into();
    let targets: Arc<[IngestTarget]> = targets.to_vec().into();

    let mut join_set: JoinSet<IngestReport> = JoinSet::new();
    for (id, range) in ranges.into_iter().enumerate() {
        let worker = Worker {
            id,
            service: Arc::clone(&service),
            records: Arc::clone(&records),
            range,
            targets: Arc::clone(&targets),
            call_timeout: options.call_timeout,
            retry_policy: options.retry_policy.clone(),
            cancellation: options.cancellation.clone(),
        };
        join_set.spawn(worker.run());
    }

    let mut report = IngestReport::default();
    while let Some(res) = join_set.join_next().await {
        match res {
            Ok(worker_report) => report.merge(worker_report),
            Err(e) => {
                warn!("Ingest worker did not finish: {:?}", e);
                report.failed_workers += 1;
            }
        }
    }
    info!(
        "Ingestion finished: {} succeeded, {} failed, {} skipped",
        report.succeeded,
        report.failures.len(),
        report.skipped
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FeatureDefinition, FeatureGroupSpec, FeatureValue};
    use crate::records::records_from_rows;
    use crate::service::memory::InMemoryFeatureStore;
    use anyhow::Result;

    async fn store_with_groups(
        store: InMemoryFeatureStore,
        groups: &[&str],
    ) -> Result<Arc<InMemoryFeatureStore>> {
        for group in groups {
            let spec = FeatureGroupSpec::new(
                *group,
                "orderId",
                "ts",
                vec![
                    FeatureDefinition::new("orderId", FeatureType::String),
                    FeatureDefinition::new("ts", FeatureType::String),
                    FeatureDefinition::new("amount", FeatureType::Fractional),
                ],
            );
            store.create_feature_group(&spec).await?;
        }
        Ok(Arc::new(store))
    }

    async fn orders_store() -> Result<Arc<InMemoryFeatureStore>> {
        store_with_groups(
            InMemoryFeatureStore::new("us-west-2", "123456789012"),
            &["orders-v1"],
        )
        .await
    }

    fn orders(count: usize) -> Vec<FeatureRecord> {
        (0..count)
            .map(|i| {
                FeatureRecord::new(vec![
                    FeatureValue::new("orderId", format!("o-{}", i)),
                    FeatureValue::new("ts", "2024-01-01T00:00:00Z"),
                    FeatureValue::new("amount", i as f64 * 1.5),
                ])
            })
            .collect()
    }

    fn orders_target() -> Vec<IngestTarget> {
        vec![IngestTarget::new("orders-v1", "orderId", "ts")]
    }

    fn workers(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap_or(NonZeroUsize::MIN)
    }

    fn fast_retries(max_retries: usize) -> RetryPolicy {
        RetryPolicy::new(
            max_retries,
            Duration::from_millis(1),
            Duration::from_millis(5),
            2.0,
        )
    }

    #[test]
    fn partition_is_contiguous_and_even() {
        assert_eq!(partition(10, workers(4)), vec![0..3, 3..6, 6..8, 8..10]);
        assert_eq!(partition(3, workers(8)), vec![0..1, 1..2, 2..3]);
        assert_eq!(partition(8, workers(2)), vec![0..4, 4..8]);
        assert!(partition(0, workers(4)).is_empty());
    }

    #[tokio::test]
    async fn one_call_per_record_regardless_of_workers() -> Result<()> {
        for n in [1, 2, 4, 7, 10, 32] {
            let store = orders_store().await?;
            let report = batch_ingest(
                store.clone(),
                orders(10),
                &orders_target(),
                &IngestOptions::new(workers(n)),
            )
            .await?;
            assert_eq!(store.put_record_calls(), 10, "workers = {}", n);
            assert_eq!(report.attempted, 10);
            assert_eq!(report.succeeded, 10);
            assert!(report.is_complete());
            assert_eq!(store.record_count("orders-v1"), 10);
        }
        Ok(())
    }

    #[tokio::test]
    async fn each_record_goes_to_every_target() -> Result<()> {
        let store = store_with_groups(
            InMemoryFeatureStore::new("us-west-2", "123456789012"),
            &["orders-v1", "orders-v2"],
        )
        .await?;
        let targets = vec![
            IngestTarget::new("orders-v1", "orderId", "ts"),
            IngestTarget::new("orders-v2", "orderId", "ts"),
        ];
        let report = batch_ingest(store.clone(), orders(3), &targets, &IngestOptions::default()).await?;
        assert_eq!(store.put_record_calls(), 6);
        assert_eq!(report.succeeded, 6);
        assert_eq!(store.record_count("orders-v2"), 3);
        Ok(())
    }

    #[tokio::test]
    async fn empty_input_is_a_no_op() -> Result<()> {
        let store = orders_store().await?;
        let report =
            batch_ingest(store.clone(), Vec::new(), &orders_target(), &IngestOptions::default()).await?;
        assert_eq!(report, IngestReport::default());
        assert_eq!(store.put_record_calls(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn in_flight_calls_bounded_by_workers() -> Result<()> {
        let store = store_with_groups(
            InMemoryFeatureStore::new("us-west-2", "123456789012")
                .with_call_delay(Duration::from_millis(5)),
            &["orders-v1"],
        )
        .await?;
        let report = batch_ingest(
            store.clone(),
            orders(20),
            &orders_target(),
            &IngestOptions::new(workers(3)),
        )
        .await?;
        assert_eq!(report.succeeded, 20);
        assert!(store.max_in_flight() <= 3);
        assert!(store.max_in_flight() >= 1);
        Ok(())
    }

    #[tokio::test]
    async fn oversized_record_fails_alone() -> Result<()> {
        let store = store_with_groups(
            InMemoryFeatureStore::new("us-west-2", "123456789012").with_max_record_bytes(64),
            &["orders-v1"],
        )
        .await?;
        let mut records = orders(5);
        records[2] = FeatureRecord::new(vec![
            FeatureValue::new("orderId", "o".repeat(128)),
            FeatureValue::new("ts", "2024-01-01T00:00:00Z"),
        ]);
        let report = batch_ingest(
            store.clone(),
            records,
            &orders_target(),
            &IngestOptions::new(workers(2)),
        )
        .await?;
        assert_eq!(store.put_record_calls(), 5);
        assert_eq!(report.succeeded, 4);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].record_index, 2);
        assert_eq!(report.failures[0].group_name, "orders-v1");
        assert!(!report.is_complete());
        Ok(())
    }

    #[tokio::test]
    async fn missing_event_time_rejected_before_any_call() -> Result<()> {
        let store = orders_store().await?;
        let mut records = orders(3);
        records[1] = FeatureRecord::new(vec![FeatureValue::new("orderId", "o-1")]);
        let err = batch_ingest(store.clone(), records, &orders_target(), &IngestOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FeatureStoreError::MalformedRecord { index: Some(1), .. }
        ));
        assert_eq!(store.put_record_calls(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn missing_record_identifier_rejected_before_any_call() -> Result<()> {
        let store = orders_store().await?;
        let records = vec![FeatureRecord::new(vec![FeatureValue::new(
            "ts",
            "2024-01-01T00:00:00Z",
        )])];
        let err = batch_ingest(store.clone(), records, &orders_target(), &IngestOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FeatureStoreError::MalformedRecord { index: Some(0), .. }
        ));
        assert_eq!(store.put_record_calls(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn epoch_seconds_string_event_time_is_accepted() -> Result<()> {
        let store = Arc::new(InMemoryFeatureStore::new("us-west-2", "123456789012"));
        let spec = FeatureGroupSpec::new(
            "clicks-v1",
            "orderId",
            "ts",
            vec![
                FeatureDefinition::new("orderId", FeatureType::String),
                FeatureDefinition::new("ts", FeatureType::Fractional),
            ],
        );
        store.create_feature_group(&spec).await?;
        let rows = vec![
            vec!["o-1".to_string(), "1700000000.5".to_string()],
            vec!["o-2".to_string(), "1700000001".to_string()],
        ];
        let records = records_from_rows(&["orderId", "ts"], &rows)?;
        let targets = vec![
            IngestTarget::new("clicks-v1", "orderId", "ts")
                .with_event_time_type(FeatureType::Fractional),
        ];
        let report = batch_ingest(store.clone(), records, &targets, &IngestOptions::default()).await?;
        assert!(report.is_complete());
        assert_eq!(report.succeeded, 2);
        assert_eq!(store.put_record_calls(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn no_targets_is_rejected() -> Result<()> {
        let store = orders_store().await?;
        let result = batch_ingest(store.clone(), orders(1), &[], &IngestOptions::default()).await;
        assert!(matches!(result, Err(FeatureStoreError::InvalidDefinition { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn cancelled_before_start_skips_everything() -> Result<()> {
        let store = orders_store().await?;
        let cancellation = CancellationToken::new();
        cancellation.cancel();
        let options = IngestOptions::new(workers(4)).with_cancellation(cancellation);
        let report = batch_ingest(store.clone(), orders(10), &orders_target(), &options).await?;
        assert_eq!(store.put_record_calls(), 0);
        assert_eq!(report.attempted, 0);
        assert_eq!(report.skipped, 10);
        Ok(())
    }

    #[tokio::test]
    async fn cancellation_abandons_in_flight_calls() -> Result<()> {
        let store = store_with_groups(
            InMemoryFeatureStore::new("us-west-2", "123456789012")
                .with_call_delay(Duration::from_millis(500)),
            &["orders-v1"],
        )
        .await?;
        let cancellation = CancellationToken::new();
        let canceller = cancellation.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });
        let options = IngestOptions::new(workers(2)).with_cancellation(cancellation);
        let report = batch_ingest(store.clone(), orders(4), &orders_target(), &options).await?;
        assert_eq!(report.attempted, 2);
        assert_eq!(report.succeeded, 0);
        assert_eq!(report.skipped, 2);
        assert!(
            report
                .failures
                .iter()
                .all(|f| f.error == FeatureStoreError::Cancelled)
        );
        assert_eq!(store.record_count("orders-v1"), 0);
        Ok(())
    }

    #[tokio::test]
    async fn retryable_failures_are_retried() -> Result<()> {
        let store = orders_store().await?;
        store.fail_next_puts(2);
        let options = IngestOptions::new(workers(1)).with_retry_policy(fast_retries(3));
        let report = batch_ingest(store.clone(), orders(5), &orders_target(), &options).await?;
        assert!(report.is_complete());
        assert_eq!(report.succeeded, 5);
        assert_eq!(store.put_record_calls(), 7);
        Ok(())
    }

    #[tokio::test]
    async fn no_retry_by_default() -> Result<()> {
        let store = orders_store().await?;
        store.fail_next_puts(1);
        let report = batch_ingest(
            store.clone(),
            orders(5),
            &orders_target(),
            &IngestOptions::new(workers(1)),
        )
        .await?;
        assert_eq!(store.put_record_calls(), 5);
        assert_eq!(report.succeeded, 4);
        assert_eq!(report.failures[0].record_index, 0);
        assert!(report.failures[0].error.is_retryable());
        Ok(())
    }

    #[tokio::test]
    async fn slow_call_times_out() -> Result<()> {
        let store = store_with_groups(
            InMemoryFeatureStore::new("us-west-2", "123456789012")
                .with_call_delay(Duration::from_millis(200)),
            &["orders-v1"],
        )
        .await?;
        let options =
            IngestOptions::new(workers(2)).with_call_timeout(Some(Duration::from_millis(10)));
        let report = batch_ingest(store.clone(), orders(2), &orders_target(), &options).await?;
        assert_eq!(report.failures.len(), 2);
        assert!(
            report
                .failures
                .iter()
                .all(|f| matches!(f.error, FeatureStoreError::Timeout { .. }))
        );
        Ok(())
    }
}
