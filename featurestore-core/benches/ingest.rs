use std::num::NonZeroUsize;
use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use featurestore_core::ingest::{IngestOptions, IngestTarget, batch_ingest};
use featurestore_core::model::{
    FeatureDefinition, FeatureGroupSpec, FeatureRecord, FeatureType, FeatureValue,
};
use featurestore_core::service::FeatureStoreService;
use featurestore_core::service::memory::InMemoryFeatureStore;
use tokio::runtime::Runtime;

const RECORDS: usize = 1_000;

fn sample_records() -> Vec<FeatureRecord> {
    (0..RECORDS)
        .map(|i| {
            FeatureRecord::new(vec![
                FeatureValue::new("orderId", format!("o-{}", i)),
                FeatureValue::new("ts", "2024-03-01T12:00:00Z"),
                FeatureValue::new("amount", i as f64 * 0.25),
            ])
        })
        .collect()
}

fn bench_ingest(c: &mut Criterion) {
    let runtime = Runtime::new().expect("failed to create tokio runtime");
    let service: Arc<dyn FeatureStoreService> =
        Arc::new(InMemoryFeatureStore::new("us-west-2", "123456789012"));
    let spec = FeatureGroupSpec::new(
        "orders-v1",
        "orderId",
        "ts",
        vec![
            FeatureDefinition::new("orderId", FeatureType::String),
            FeatureDefinition::new("ts", FeatureType::String),
            FeatureDefinition::new("amount", FeatureType::Fractional),
        ],
    );
    runtime
        .block_on(service.create_feature_group(&spec))
        .expect("failed to create feature group");
    let targets = vec![IngestTarget::new("orders-v1", "orderId", "ts")];
    let records = sample_records();

    let mut group = c.benchmark_group("batch_ingest");
    for workers in [1, 4, 16] {
        let options = IngestOptions::new(NonZeroUsize::new(workers).expect("non-zero workers"));
        group.bench_with_input(BenchmarkId::from_parameter(workers), &options, |b, options| {
            b.to_async(&runtime).iter(|| {
                let service = service.clone();
                let records = records.clone();
                let targets = targets.clone();
                async move {
                    let report = batch_ingest(service, records, &targets, options)
                        .await
                        .expect("ingestion failed");
                    criterion::black_box(report);
                }
            });
        });
    }
    group.finish();
}

criterion_group!(ingest_benches, bench_ingest);
criterion_main!(ingest_benches);
