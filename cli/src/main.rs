use crate::cli_options::{Backend, CliCommand, CliOptions};
use anyhow::{Context, Result, anyhow};
use chrono::{SecondsFormat, Utc};
use clap::Parser;
use featurestore_core::FeatureStore;
use featurestore_core::config::{BackendConfig, OfflineStoreConfig, StoreConfig};
use featurestore_core::ingest::{IngestReport, IngestTarget};
use featurestore_core::model::{
    FeatureDefinition, FeatureGroupSpec, FeatureRecord, FeatureType, FeatureValue,
};
use featurestore_core::records::records_from_csv_path;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod cli_options;

const FEATURESTORE_CONFIG_ENV_VAR: &str = "FEATURESTORE_CONFIG";
const DEFAULT_CONFIG_FILE_NAME: &str = "featurestore.yaml";

#[tokio::main]
async fn main() -> Result<()> {
    let CliOptions {
        config,
        log_level,
        backend,
        region,
        role_arn,
        offline_store_uri,
        command,
    } = CliOptions::parse();

    tracing_subscriber::registry()
        .with(
            EnvFilter::builder()
                .with_default_directive(tracing::Level::from(log_level).into())
                .from_env_lossy(),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut store_config = load_config(config)?;
    apply_overrides(&mut store_config, backend, region, role_arn, offline_store_uri);
    store_config.validate()?;

    let feature_store = FeatureStore::from_config(&store_config).await?;
    let result = run(&feature_store, &store_config, command).await;
    feature_store.shutdown().await?;
    result
}

fn load_config(path: Option<PathBuf>) -> Result<StoreConfig> {
    let explicit = path.or_else(|| {
        std::env::var(FEATURESTORE_CONFIG_ENV_VAR)
            .ok()
            .map(PathBuf::from)
    });
    let config_path = match explicit {
        Some(path) => path,
        None if Path::new(DEFAULT_CONFIG_FILE_NAME).exists() => {
            PathBuf::from(DEFAULT_CONFIG_FILE_NAME)
        }
        None => {
            tracing::debug!("No configuration file found, using defaults");
            return Ok(StoreConfig::default());
        }
    };
    tracing::debug!("Loading configuration from {}", config_path.display());
    let yaml_str = fs::read_to_string(&config_path)
        .with_context(|| format!("Failed to read {}", config_path.display()))?;
    StoreConfig::from_yaml_str(&yaml_str)
}

fn apply_overrides(
    config: &mut StoreConfig,
    backend: Option<Backend>,
    region: Option<String>,
    role_arn: Option<String>,
    offline_store_uri: Option<String>,
) {
    match backend {
        Some(Backend::Memory) if !matches!(config.backend, BackendConfig::Memory { .. }) => {
            config.backend = BackendConfig::memory()
        }
        Some(Backend::Sagemaker) if !matches!(config.backend, BackendConfig::Sagemaker { .. }) => {
            config.backend = BackendConfig::default()
        }
        _ => {}
    }
    if let Some(new_region) = region {
        match &mut config.backend {
            BackendConfig::Sagemaker { region, .. } => *region = Some(new_region),
            BackendConfig::Memory { region, .. } => *region = new_region,
        }
    }
    if role_arn.is_some() {
        config.role_arn = role_arn;
    }
    if let Some(s3_uri) = offline_store_uri {
        config.offline_store = Some(OfflineStoreConfig { s3_uri });
    }
}

/// Cancels `token` on Ctrl+C. Abort the handle once the guarded work is done.
fn spawn_ctrl_c_cancellation(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl+C, cancelling ingestion...");
            token.cancel();
        }
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn check_report(report: &IngestReport) -> Result<()> {
    tracing::info!(
        "Ingested {} of {} put-record calls, {} skipped",
        report.succeeded,
        report.attempted,
        report.skipped
    );
    if report.is_complete() {
        return Ok(());
    }
    for failure in &report.failures {
        tracing::error!(
            "Record {} into {}: {}",
            failure.record_index,
            failure.group_name,
            failure.error
        );
    }
    Err(anyhow!(
        "Ingestion incomplete: {} failed, {} skipped, {} workers lost",
        report.failures.len(),
        report.skipped,
        report.failed_workers
    ))
}

fn group_spec(
    config: &StoreConfig,
    name: String,
    record_id: String,
    event_time: String,
    features: Vec<FeatureDefinition>,
) -> FeatureGroupSpec {
    let mut spec = FeatureGroupSpec::new(name, record_id, event_time, features)
        .with_online_store(config.online_store.enabled);
    if let Some(s3_uri) = config.offline_store_uri() {
        spec = spec.with_offline_store(s3_uri);
    }
    if let Some(role_arn) = &config.role_arn {
        spec = spec.with_role_arn(role_arn);
    }
    spec
}

fn demo_records(count: usize) -> Vec<FeatureRecord> {
    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    (0..count)
        .map(|i| {
            FeatureRecord::new(vec![
                FeatureValue::new("TransactionID", format!("txn-{:05}", i)),
                FeatureValue::new("EventTime", now.clone()),
                FeatureValue::new("Amount", 10.0 + i as f64 * 2.5),
            ])
        })
        .collect()
}

/// Targets for `names`, with the declared identifier and event-time features
/// replaced by the ones given on the command line.
async fn resolve_targets(
    store: &FeatureStore,
    names: &[String],
    record_id: Option<String>,
    event_time: Option<String>,
) -> Result<Vec<IngestTarget>> {
    if let (Some(record_id), Some(event_time)) = (&record_id, &event_time) {
        return Ok(names
            .iter()
            .map(|name| IngestTarget::new(name, record_id, event_time))
            .collect());
    }
    let mut targets = store.ingest_targets(names).await?;
    for target in &mut targets {
        if let Some(record_id) = &record_id {
            target.record_identifier_feature_name = record_id.clone();
        }
        if let Some(event_time) = &event_time {
            target.event_time_feature_name = event_time.clone();
            target.event_time_type = None;
        }
    }
    Ok(targets)
}

async fn run(store: &FeatureStore, config: &StoreConfig, command: CliCommand) -> Result<()> {
    match command {
        CliCommand::Create {
            name,
            description,
            record_id,
            event_time,
            features,
            online,
            no_online,
        } => {
            let mut spec = group_spec(config, name, record_id, event_time, features);
            if online || no_online {
                spec = spec.with_online_store(online);
            }
            if let Some(description) = description {
                spec = spec.with_description(description);
            }
            let created = store.create_feature_group(&spec).await?;
            if created.is_duplicate() {
                println!("{} (already exists)", created.arn());
            } else {
                println!("{}", created.arn());
            }
        }
        CliCommand::Describe { name } => {
            store.describe_feature_group(&name).await?;
        }
        CliCommand::Get { name } => {
            print_json(&store.get_feature_group(&name).await?)?;
        }
        CliCommand::Delete { name } => {
            store.delete_feature_group(&name).await?;
        }
        CliCommand::Ingest {
            names,
            event_time,
            record_id,
            csv,
            features,
            workers,
        } => {
            let targets = resolve_targets(store, &names, record_id, event_time).await?;
            let definitions = (!features.is_empty()).then_some(features.as_slice());
            let records = records_from_csv_path(&csv, definitions)?;

            let mut options = config.ingest.to_options()?;
            if let Some(workers) = workers {
                options.workers = workers;
            }
            let ctrl_c = spawn_ctrl_c_cancellation(options.cancellation.clone());
            let report = store.ingest(records, &targets, &options).await;
            ctrl_c.abort();
            check_report(&report?)?;
        }
        CliCommand::GetRecord {
            name,
            record_id,
            features,
        } => match store.get_record(&name, &record_id, &features).await? {
            Some(record) => print_json(&record)?,
            None => return Err(anyhow!("No record {} in feature group {}", record_id, name)),
        },
        CliCommand::OfflineObjects { name, limit } => {
            print_json(&store.list_offline_objects(&name, limit).await?)?;
        }
        CliCommand::Demo {
            name,
            records,
            workers,
        } => {
            let spec = group_spec(
                config,
                name.clone(),
                "TransactionID".to_string(),
                "EventTime".to_string(),
                vec![
                    FeatureDefinition::new("TransactionID", FeatureType::String),
                    FeatureDefinition::new("EventTime", FeatureType::String),
                    FeatureDefinition::new("Amount", FeatureType::Fractional),
                ],
            )
            .with_description("Sample transactions");
            let created = store.create_feature_group(&spec).await?;
            tracing::info!("Feature group ARN: {}", created.arn());
            store.describe_feature_group(&name).await?;

            let targets = store.ingest_targets(std::slice::from_ref(&name)).await?;
            let mut options = config.ingest.to_options()?;
            if let Some(workers) = workers {
                options.workers = workers;
            }
            let ctrl_c = spawn_ctrl_c_cancellation(options.cancellation.clone());
            let report = store.ingest(demo_records(records), &targets, &options).await;
            ctrl_c.abort();
            check_report(&report?)?;

            print_json(&store.get_feature_group(&name).await?)?;
            if records > 0 {
                let record = store.get_record(&name, "txn-00000", &[]).await?;
                print_json(&record)?;
            }
            store.delete_feature_group(&name).await?;
        }
    }
    Ok(())
}
