//! Offline store location handling and object listing.

use crate::error::{FeatureStoreError, Result};
use crate::service::sagemaker::sdk_failure;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::operation::list_objects_v2::ListObjectsV2Error;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::{self, Display, Formatter};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Location {
    pub bucket: String,
    pub prefix: String,
}

impl S3Location {
    pub fn parse(s3_url: &str) -> Result<Self> {
        let invalid = |reason: &str| {
            FeatureStoreError::invalid_definition(format!(
                "invalid offline store location '{}': {}",
                s3_url, reason
            ))
        };
        let url = url::Url::parse(s3_url).map_err(|e| invalid(&e.to_string()))?;
        if url.scheme() != "s3" {
            return Err(invalid("expected the s3:// scheme"));
        }
        let bucket = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| invalid("missing bucket"))?
            .to_string();
        let prefix = url.path().trim_start_matches('/').to_string();
        Ok(Self { bucket, prefix })
    }
}

impl Display for S3Location {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.prefix.is_empty() {
            write!(f, "s3://{}", self.bucket)
        } else {
            write!(f, "s3://{}/{}", self.bucket, self.prefix)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OfflineObject {
    pub key: String,
    pub size: i64,
    pub last_modified: Option<DateTime<Utc>>,
}

fn list_failure<R: std::fmt::Debug>(err: &SdkError<ListObjectsV2Error, R>) -> FeatureStoreError {
    sdk_failure("ListObjectsV2", err)
}

pub(crate) async fn list_objects(
    client: &aws_sdk_s3::Client,
    location: &S3Location,
    limit: usize,
) -> Result<Vec<OfflineObject>> {
    let mut objects = Vec::new();
    let mut continuation_token: Option<String> = None;
    while objects.len() < limit {
        let page_size = (limit - objects.len()).min(1000) as i32;
        let page = client
            .list_objects_v2()
            .bucket(&location.bucket)
            .prefix(&location.prefix)
            .max_keys(page_size)
            .set_continuation_token(continuation_token.take())
            .send()
            .await
            .map_err(|e| list_failure(&e))?;
        debug!(
            "Listed {} objects under {}",
            page.contents().len(),
            location
        );
        objects.extend(page.contents().iter().filter_map(|object| {
            Some(OfflineObject {
                key: object.key()?.to_string(),
                size: object.size().unwrap_or_default(),
                last_modified: object
                    .last_modified()
                    .and_then(|ts| DateTime::<Utc>::from_timestamp(ts.secs(), ts.subsec_nanos())),
            })
        }));
        match page.next_continuation_token() {
            Some(token) if page.is_truncated().unwrap_or(false) => {
                continuation_token = Some(token.to_string())
            }
            _ => break,
        }
    }
    objects.truncate(limit);
    Ok(objects)
}
