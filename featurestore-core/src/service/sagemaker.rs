use crate::config::EndpointConfig;
use crate::error::{FeatureStoreError, Result};
use crate::model::{
    FeatureDefinition, FeatureGroupDescription, FeatureGroupSpec, FeatureRecord, FeatureType,
    FeatureValue,
};
use crate::offline::{self, OfflineObject, S3Location};
use crate::service::FeatureStoreService;
use async_trait::async_trait;
use aws_sdk_sagemaker::config::Region;
use aws_sdk_sagemaker::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_sagemaker::operation::create_feature_group::CreateFeatureGroupError;
use aws_sdk_sagemaker::operation::delete_feature_group::DeleteFeatureGroupError;
use aws_sdk_sagemaker::operation::describe_feature_group::{
    DescribeFeatureGroupError, DescribeFeatureGroupOutput,
};
use aws_sdk_sagemaker::primitives::DateTime as SdkDateTime;
use aws_sdk_sagemaker::types as sm;
use aws_sdk_sagemakerfeaturestoreruntime::operation::get_record::GetRecordError;
use aws_sdk_sagemakerfeaturestoreruntime::operation::put_record::PutRecordError;
use aws_sdk_sagemakerfeaturestoreruntime::types as rt;
use chrono::{DateTime, Utc};
use std::fmt::Debug;
use tracing::debug;

const RETRYABLE_ERROR_CODES: [&str; 7] = [
    "ThrottlingException",
    "Throttling",
    "SlowDown",
    "ServiceUnavailable",
    "InternalFailure",
    "InternalServerError",
    "RequestTimeout",
];

/// Members the service marks required come back as plain references, the
/// rest as `Option`. Both read the same through this.
trait Member<'a, T: ?Sized> {
    fn member(self) -> Option<&'a T>;
}

impl<'a, T: ?Sized> Member<'a, T> for &'a T {
    fn member(self) -> Option<&'a T> {
        Some(self)
    }
}

impl<'a, T: ?Sized> Member<'a, T> for Option<&'a T> {
    fn member(self) -> Option<&'a T> {
        self
    }
}

/// Clients for the SageMaker control plane, the feature store runtime and S3.
/// They hold no connections of their own to close; dropping the store
/// releases them.
pub struct SageMakerFeatureStore {
    sagemaker: aws_sdk_sagemaker::Client,
    runtime: aws_sdk_sagemakerfeaturestoreruntime::Client,
    s3: aws_sdk_s3::Client,
}

impl SageMakerFeatureStore {
    pub fn new(
        sagemaker: aws_sdk_sagemaker::Client,
        runtime: aws_sdk_sagemakerfeaturestoreruntime::Client,
        s3: aws_sdk_s3::Client,
    ) -> Self {
        Self {
            sagemaker,
            runtime,
            s3,
        }
    }

    pub async fn from_config(region: Option<String>, endpoints: &EndpointConfig) -> Result<Self> {
        for endpoint in [&endpoints.sagemaker, &endpoints.runtime, &endpoints.s3]
            .into_iter()
            .flatten()
        {
            url::Url::parse(endpoint).map_err(|e| {
                FeatureStoreError::invalid_definition(format!(
                    "invalid endpoint URL '{}': {}",
                    endpoint, e
                ))
            })?;
        }

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(Region::new(region));
        }
        let shared_config = loader.load().await;

        let mut sagemaker_config = aws_sdk_sagemaker::config::Builder::from(&shared_config);
        if let Some(url) = &endpoints.sagemaker {
            sagemaker_config = sagemaker_config.endpoint_url(url);
        }
        let mut runtime_config =
            aws_sdk_sagemakerfeaturestoreruntime::config::Builder::from(&shared_config);
        if let Some(url) = &endpoints.runtime {
            runtime_config = runtime_config.endpoint_url(url);
        }
        let mut s3_config = aws_sdk_s3::config::Builder::from(&shared_config);
        if let Some(url) = &endpoints.s3 {
            s3_config = s3_config.endpoint_url(url).force_path_style(true);
        }

        Ok(Self::new(
            aws_sdk_sagemaker::Client::from_conf(sagemaker_config.build()),
            aws_sdk_sagemakerfeaturestoreruntime::Client::from_conf(runtime_config.build()),
            aws_sdk_s3::Client::from_conf(s3_config.build()),
        ))
    }

    async fn describe_page(
        &self,
        name: &str,
        next_token: Option<String>,
    ) -> Result<DescribeFeatureGroupOutput> {
        self.sagemaker
            .describe_feature_group()
            .feature_group_name(name)
            .set_next_token(next_token)
            .send()
            .await
            .map_err(|err| describe_failure(name, &err))
    }
}

pub(crate) fn sdk_failure<E, R>(operation: &'static str, err: &SdkError<E, R>) -> FeatureStoreError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: Debug,
{
    let retryable = match err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => true,
        SdkError::ServiceError(service_err) => service_err
            .err()
            .code()
            .is_some_and(|code| RETRYABLE_ERROR_CODES.contains(&code)),
        _ => false,
    };
    let message = DisplayErrorContext(err).to_string();
    if retryable {
        FeatureStoreError::retryable(operation, message)
    } else {
        FeatureStoreError::remote(operation, message)
    }
}

fn create_failure<R: Debug>(
    name: &str,
    err: &SdkError<CreateFeatureGroupError, R>,
) -> FeatureStoreError {
    match err.as_service_error() {
        Some(e) if e.is_resource_in_use() => FeatureStoreError::already_exists(name),
        _ => sdk_failure("CreateFeatureGroup", err),
    }
}

fn describe_failure<R: Debug>(
    name: &str,
    err: &SdkError<DescribeFeatureGroupError, R>,
) -> FeatureStoreError {
    match err.as_service_error() {
        Some(e) if e.is_resource_not_found() => FeatureStoreError::not_found(name),
        _ => sdk_failure("DescribeFeatureGroup", err),
    }
}

fn delete_failure<R: Debug>(
    name: &str,
    err: &SdkError<DeleteFeatureGroupError, R>,
) -> FeatureStoreError {
    match err.as_service_error() {
        Some(e) if e.is_resource_not_found() => FeatureStoreError::not_found(name),
        _ => sdk_failure("DeleteFeatureGroup", err),
    }
}

fn get_record_failure<R: Debug>(
    group_name: &str,
    err: &SdkError<GetRecordError, R>,
) -> FeatureStoreError {
    match err.as_service_error() {
        Some(e) if e.is_resource_not_found() => FeatureStoreError::not_found(group_name),
        _ => sdk_failure("GetRecord", err),
    }
}

/// PutRecord models no not-found error. A missing group comes back as an
/// unmodeled ResourceNotFound or as a ValidationError naming the group.
fn put_failure<R: Debug>(group_name: &str, err: &SdkError<PutRecordError, R>) -> FeatureStoreError {
    let missing_group = err.as_service_error().is_some_and(|e| match e.code() {
        Some("ResourceNotFound") => true,
        Some("ValidationError") => e.message().is_some_and(|message| {
            let message = message.to_lowercase();
            message.contains("not found") || message.contains("can't find")
        }),
        _ => false,
    });
    if missing_group {
        FeatureStoreError::not_found(group_name)
    } else {
        sdk_failure("PutRecord", err)
    }
}

/// Continuation token for the next page of feature definitions, if any.
fn next_page(token: Option<&str>) -> Option<String> {
    token.filter(|token| !token.is_empty()).map(str::to_owned)
}

fn to_sdk_feature_type(feature_type: FeatureType) -> sm::FeatureType {
    match feature_type {
        FeatureType::String => sm::FeatureType::String,
        FeatureType::Integral => sm::FeatureType::Integral,
        FeatureType::Fractional => sm::FeatureType::Fractional,
    }
}

fn from_sdk_definition(definition: &sm::FeatureDefinition) -> Option<FeatureDefinition> {
    let feature_type = match definition.feature_type().member()? {
        sm::FeatureType::String => FeatureType::String,
        sm::FeatureType::Integral => FeatureType::Integral,
        sm::FeatureType::Fractional => FeatureType::Fractional,
        other => {
            debug!("Skip feature definition with unknown type {:?}", other);
            return None;
        }
    };
    let name = definition.feature_name().member()?;
    Some(FeatureDefinition::new(name, feature_type))
}

fn to_chrono(ts: &SdkDateTime) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(ts.secs(), ts.subsec_nanos())
}

fn owned(value: Option<&str>) -> String {
    value.map(str::to_owned).unwrap_or_default()
}

#[async_trait]
impl FeatureStoreService for SageMakerFeatureStore {
    async fn create_feature_group(&self, spec: &FeatureGroupSpec) -> Result<String> {
        let feature_definitions = spec
            .feature_definitions
            .iter()
            .map(|definition| {
                sm::FeatureDefinition::builder()
                    .feature_name(&definition.name)
                    .feature_type(to_sdk_feature_type(definition.feature_type))
                    .build()
            })
            .collect();
        let online_store_config = sm::OnlineStoreConfig::builder()
            .enable_online_store(spec.online_store_enabled)
            .build();

        let mut request = self
            .sagemaker
            .create_feature_group()
            .feature_group_name(&spec.name)
            .record_identifier_feature_name(&spec.record_identifier_feature_name)
            .event_time_feature_name(&spec.event_time_feature_name)
            .set_feature_definitions(Some(feature_definitions))
            .online_store_config(online_store_config)
            .set_description(spec.description.clone())
            .set_role_arn(spec.role_arn.clone());
        if let Some(s3_uri) = &spec.offline_store_s3_uri {
            let s3_storage_config = sm::S3StorageConfig::builder().s3_uri(s3_uri).build();
            let offline_store_config = sm::OfflineStoreConfig::builder()
                .s3_storage_config(s3_storage_config)
                .build();
            request = request.offline_store_config(offline_store_config);
        }

        match request.send().await {
            Ok(output) => output
                .feature_group_arn()
                .member()
                .map(str::to_owned)
                .ok_or_else(|| {
                    FeatureStoreError::remote(
                        "CreateFeatureGroup",
                        "response did not include a feature group ARN",
                    )
                }),
            Err(err) => Err(create_failure(&spec.name, &err)),
        }
    }

    async fn describe_feature_group(&self, name: &str) -> Result<FeatureGroupDescription> {
        let output = self.describe_page(name, None).await?;
        let mut feature_definitions: Vec<FeatureDefinition> = output
            .feature_definitions()
            .iter()
            .filter_map(from_sdk_definition)
            .collect();
        let mut next_token = next_page(output.next_token().member());
        while let Some(token) = next_token.take() {
            let page = self.describe_page(name, Some(token)).await?;
            debug!(
                "Read {} more feature definitions of {}",
                page.feature_definitions().len(),
                name
            );
            feature_definitions.extend(
                page.feature_definitions()
                    .iter()
                    .filter_map(from_sdk_definition),
            );
            next_token = next_page(page.next_token().member());
        }

        let offline_store_s3_uri = output
            .offline_store_config()
            .and_then(|config| config.s3_storage_config().member())
            .and_then(|s3| s3.resolved_output_s3_uri().or(s3.s3_uri().member()))
            .map(str::to_owned);
        Ok(FeatureGroupDescription {
            name: output
                .feature_group_name()
                .member()
                .unwrap_or(name)
                .to_string(),
            arn: owned(output.feature_group_arn().member()),
            creation_time: output
                .creation_time()
                .member()
                .and_then(to_chrono)
                .unwrap_or_default(),
            feature_definitions,
            record_identifier_feature_name: owned(output.record_identifier_feature_name().member()),
            event_time_feature_name: owned(output.event_time_feature_name().member()),
            role_arn: output.role_arn().member().map(str::to_owned),
            description: output.description().member().map(str::to_owned),
            status: output
                .feature_group_status()
                .map(|status| status.as_str().to_string()),
            online_store_enabled: output
                .online_store_config()
                .and_then(|config| config.enable_online_store())
                .unwrap_or(false),
            offline_store_s3_uri,
        })
    }

    async fn delete_feature_group(&self, name: &str) -> Result<()> {
        match self
            .sagemaker
            .delete_feature_group()
            .feature_group_name(name)
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(err) => Err(delete_failure(name, &err)),
        }
    }

    async fn put_record(&self, group_name: &str, record: &FeatureRecord) -> Result<()> {
        let values = record
            .iter()
            .map(|value| {
                rt::FeatureValue::builder()
                    .feature_name(value.name())
                    .value_as_string(value.value().to_string())
                    .build()
            })
            .collect();
        match self
            .runtime
            .put_record()
            .feature_group_name(group_name)
            .set_record(Some(values))
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(err) => Err(put_failure(group_name, &err)),
        }
    }

    /// Values come back as strings; the service does not echo feature types.
    async fn get_record(
        &self,
        group_name: &str,
        record_identifier: &str,
        feature_names: &[String],
    ) -> Result<Option<FeatureRecord>> {
        let feature_names = (!feature_names.is_empty()).then(|| feature_names.to_vec());
        let output = match self
            .runtime
            .get_record()
            .feature_group_name(group_name)
            .record_identifier_value_as_string(record_identifier)
            .set_feature_names(feature_names)
            .send()
            .await
        {
            Ok(output) => output,
            Err(err) => return Err(get_record_failure(group_name, &err)),
        };
        if output.record().is_empty() {
            return Ok(None);
        }
        let record = output
            .record()
            .iter()
            .filter_map(|value| {
                let name = value.feature_name().member()?;
                let raw = value.value_as_string().member()?;
                Some(FeatureValue::new(name, raw))
            })
            .collect();
        Ok(Some(record))
    }

    async fn list_offline_objects(
        &self,
        group: &FeatureGroupDescription,
        limit: usize,
    ) -> Result<Vec<OfflineObject>> {
        let s3_uri = group.offline_store_s3_uri.as_deref().ok_or_else(|| {
            FeatureStoreError::invalid_definition(format!(
                "feature group '{}' has no offline store",
                group.name
            ))
        })?;
        let location = S3Location::parse(s3_uri)?;
        offline::list_objects(&self.s3, &location, limit).await
    }
}
