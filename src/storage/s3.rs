//! Native AWS S3 SDK backend
//!
//! Server-side copies through the AWS SDK with connection pooling. Supports
//! S3-compatible endpoints (MinIO, Wasabi, GCS interoperability, etc.).
//! Retries are left to the engine's retry policy, so the SDK's own retry
//! layer is disabled.

use super::{ListPage, ObjectDescriptor, ObjectMeta, ObjectStore, StorageResult};
use crate::error::{StorageError, StorageErrorKind};
use async_trait::async_trait;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use chrono::{DateTime, Utc};

/// Configuration for the native S3 backend.
#[derive(Debug, Clone)]
pub struct NativeS3Config {
    /// AWS region (e.g., "us-east-1")
    pub region: String,
    /// Custom endpoint URL for S3-compatible services (MinIO, Wasabi)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for some S3-compatible services)
    pub force_path_style: bool,
    /// Access key ID (optional, falls back to AWS credential chain)
    pub access_key_id: Option<String>,
    /// Secret access key (optional, falls back to AWS credential chain)
    pub secret_access_key: Option<String>,
    /// Report single-part ETags as checksums for verification
    pub compare_etags: bool,
}

impl Default for NativeS3Config {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            endpoint_url: None,
            force_path_style: false,
            access_key_id: None,
            secret_access_key: None,
            compare_etags: false,
        }
    }
}

impl NativeS3Config {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        Self {
            region: std::env::var("AWS_REGION")
                .or_else(|_| std::env::var("AWS_DEFAULT_REGION"))
                .unwrap_or_else(|_| "us-east-1".to_string()),
            endpoint_url: std::env::var("AWS_ENDPOINT_URL").ok(),
            force_path_style: env_flag("S3_PATH_STYLE"),
            access_key_id: std::env::var("AWS_ACCESS_KEY_ID").ok(),
            secret_access_key: std::env::var("AWS_SECRET_ACCESS_KEY").ok(),
            compare_etags: env_flag("S3_COMPARE_ETAGS"),
        }
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false)
}

/// Tagged checksum for a single-part ETag
///
/// Multipart ETags (`<md5>-<parts>`) change when the object is copied, so
/// they yield `None`.
fn etag_checksum(etag: Option<&str>) -> Option<String> {
    let etag = etag?.trim_matches('"');
    if etag.is_empty() || etag.contains('-') {
        return None;
    }
    Some(format!("etag:{}", etag))
}

/// S3 [`ObjectStore`]
pub struct S3Store {
    client: aws_sdk_s3::Client,
    config: NativeS3Config,
}

impl S3Store {
    /// Create a new S3 backend from configuration.
    pub async fn new(config: NativeS3Config) -> Self {
        let mut aws_config_builder = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .retry_config(aws_config::retry::RetryConfig::disabled());

        if let Some(ref endpoint) = config.endpoint_url {
            aws_config_builder = aws_config_builder.endpoint_url(endpoint);
        }

        if let (Some(ref key_id), Some(ref secret)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            let creds = aws_credential_types::Credentials::new(
                key_id,
                secret,
                None,
                None,
                "objarchive-static",
            );
            aws_config_builder = aws_config_builder.credentials_provider(creds);
        }

        let aws_config = aws_config_builder.load().await;

        let mut s3_config = aws_sdk_s3::config::Builder::from(&aws_config);
        if config.force_path_style {
            s3_config = s3_config.force_path_style(true);
        }

        Self {
            client: aws_sdk_s3::Client::from_conf(s3_config.build()),
            config,
        }
    }

    fn etag_checksum(&self, etag: Option<&str>) -> Option<String> {
        if self.config.compare_etags {
            etag_checksum(etag)
        } else {
            None
        }
    }
}

fn classify<E>(operation: &str, err: SdkError<E, HttpResponse>) -> StorageError
where
    E: std::error::Error + 'static,
{
    let kind = match &err {
        SdkError::TimeoutError(_) => StorageErrorKind::Timeout,
        SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => StorageErrorKind::Network,
        SdkError::ServiceError(context) => {
            StorageErrorKind::from_http_status(context.raw().status().as_u16())
        }
        SdkError::ConstructionFailure(_) => StorageErrorKind::InvalidRequest,
        _ => StorageErrorKind::Other,
    };
    StorageError::new(
        kind,
        format!("S3 {} failed: {}", operation, DisplayErrorContext(&err)),
    )
}

fn to_chrono(time: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(time.secs(), time.subsec_nanos())
}

/// Percent-encode a key for the `x-amz-copy-source` header, keeping `/`.
fn encode_copy_source(bucket: &str, key: &str) -> String {
    let mut encoded = String::with_capacity(bucket.len() + key.len() + 1);
    encoded.push_str(bucket);
    encoded.push('/');
    for byte in key.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("%{:02X}", byte)),
        }
    }
    encoded
}

#[async_trait]
impl ObjectStore for S3Store {
    fn name(&self) -> &str {
        "s3"
    }

    async fn list_page(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        token: Option<String>,
    ) -> StorageResult<ListPage> {
        let output = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .set_prefix(prefix.filter(|p| !p.is_empty()).map(str::to_string))
            .set_continuation_token(token)
            .send()
            .await
            .map_err(|e| classify("list_objects_v2", e))?;

        let objects = output
            .contents()
            .iter()
            .filter_map(|object| {
                let key = object.key()?.to_string();
                Some(ObjectDescriptor {
                    key,
                    size: object.size().unwrap_or(0).max(0) as u64,
                    last_modified: object.last_modified().and_then(to_chrono),
                    storage_class: object.storage_class().map(|c| c.as_str().to_string()),
                    checksum: self.etag_checksum(object.e_tag()),
                })
            })
            .collect();

        let next_token = if output.is_truncated().unwrap_or(false) {
            output.next_continuation_token().map(str::to_string)
        } else {
            None
        };

        Ok(ListPage {
            objects,
            next_token,
        })
    }

    async fn head(&self, bucket: &str, key: &str) -> StorageResult<Option<ObjectMeta>> {
        let result = self.client.head_object().bucket(bucket).key(key).send().await;

        match result {
            Ok(output) => Ok(Some(ObjectMeta {
                size: output.content_length().unwrap_or(0).max(0) as u64,
                checksum: self.etag_checksum(output.e_tag()),
                storage_class: output.storage_class().map(|c| c.as_str().to_string()),
            })),
            Err(err) => {
                if err.as_service_error().map(|e| e.is_not_found()).unwrap_or(false) {
                    return Ok(None);
                }
                let err = classify("head_object", err);
                if err.kind == StorageErrorKind::NotFound {
                    Ok(None)
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> StorageResult<()> {
        self.client
            .copy_object()
            .copy_source(encode_copy_source(src_bucket, src_key))
            .bucket(dst_bucket)
            .key(dst_key)
            .send()
            .await
            .map_err(|e| classify("copy_object", e))?;
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify("delete_object", e))?;
        Ok(())
    }
}
