//! Native S3 store (feature `s3-native`)
//!
//! Wraps the async AWS SDK behind a blocking facade: the store owns a
//! small tokio runtime and each trait call is a `block_on`. The worker
//! pool stays plain OS threads; only the SDK boundary is async.

use std::sync::Arc;

use aws_config::meta::region::RegionProviderChain;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as AwsS3Client;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::runtime::Runtime;

use super::{ObjectEntry, ObjectInfo, ObjectStore, StoreError, StoreResult};

/// Connection settings for an S3-compatible endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct S3Options {
    /// Bucket name
    pub bucket: String,

    /// AWS region (falls back to the provider chain)
    #[serde(default)]
    pub region: Option<String>,

    /// Custom endpoint URL (MinIO, Ceph RGW, LocalStack)
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Explicit credentials (falls back to the provider chain)
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,

    /// Path-style addressing, required for most self-hosted stores
    #[serde(default)]
    pub force_path_style: bool,
}

/// S3-compatible bucket client
pub struct S3Store {
    client: AwsS3Client,
    runtime: Arc<Runtime>,
    bucket: String,
    name: String,
}

impl S3Store {
    /// Connect to a bucket with the given options
    pub fn new(options: S3Options, name: impl Into<String>) -> StoreResult<Self> {
        if options.bucket.is_empty() {
            return Err(StoreError::Invalid("empty bucket name".to_string()));
        }

        let runtime = Runtime::new()
            .map_err(|e| StoreError::Unavailable(format!("tokio runtime: {}", e)))?;

        let client = runtime.block_on(Self::build_client(&options));

        Ok(Self {
            client,
            runtime: Arc::new(runtime),
            bucket: options.bucket,
            name: name.into(),
        })
    }

    async fn build_client(options: &S3Options) -> AwsS3Client {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());

        let region_provider = if let Some(region) = &options.region {
            RegionProviderChain::first_try(Region::new(region.clone()))
        } else {
            RegionProviderChain::default_provider()
        };
        loader = loader.region(region_provider);

        if let (Some(access_key), Some(secret_key)) = (&options.access_key, &options.secret_key) {
            loader = loader.credentials_provider(Credentials::new(
                access_key,
                secret_key,
                None,
                None,
                "exodus-explicit",
            ));
        }

        let aws_config = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&aws_config);
        if let Some(endpoint) = &options.endpoint {
            builder = builder.endpoint_url(endpoint);
        }
        if options.force_path_style {
            builder = builder.force_path_style(true);
        }

        AwsS3Client::from_conf(builder.build())
    }

    fn classify<E: std::fmt::Debug>(key: &str, err: E) -> StoreError {
        let text = format!("{:?}", err);
        if text.contains("NoSuchKey") || text.contains("NotFound") || text.contains("404") {
            StoreError::NotFound {
                key: key.to_string(),
            }
        } else if text.contains("AccessDenied") || text.contains("403") {
            StoreError::PermissionDenied(text)
        } else {
            StoreError::Unavailable(text)
        }
    }
}

impl ObjectStore for S3Store {
    fn list(&self, prefix: &str) -> StoreResult<Vec<ObjectEntry>> {
        self.runtime.block_on(async {
            let mut entries = Vec::new();
            let mut continuation: Option<String> = None;

            loop {
                let mut request = self
                    .client
                    .list_objects_v2()
                    .bucket(&self.bucket)
                    .prefix(prefix);
                if let Some(token) = &continuation {
                    request = request.continuation_token(token);
                }

                let response = request
                    .send()
                    .await
                    .map_err(|e| Self::classify(prefix, e))?;

                for object in response.contents() {
                    let Some(key) = object.key() else { continue };
                    let last_modified = object
                        .last_modified()
                        .and_then(|t| DateTime::<Utc>::from_timestamp(t.secs(), 0));
                    entries.push(ObjectEntry {
                        key: key.to_string(),
                        size: object.size().unwrap_or(0) as u64,
                        last_modified,
                    });
                }

                match response.next_continuation_token() {
                    Some(token) => continuation = Some(token.to_string()),
                    None => break,
                }
            }

            entries.sort_by(|a, b| a.key.cmp(&b.key));
            Ok(entries)
        })
    }

    fn get(&self, key: &str) -> StoreResult<Vec<u8>> {
        self.runtime.block_on(async {
            let response = self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| Self::classify(key, e))?;

            let body = response
                .body
                .collect()
                .await
                .map_err(|e| StoreError::Unavailable(format!("body read: {}", e)))?;
            Ok(body.into_bytes().to_vec())
        })
    }

    fn get_range(&self, key: &str, offset: u64, len: u64) -> StoreResult<Vec<u8>> {
        if len == 0 {
            return Ok(Vec::new());
        }
        let range = format!("bytes={}-{}", offset, offset + len - 1);

        self.runtime.block_on(async {
            let response = self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(key)
                .range(range)
                .send()
                .await
                .map_err(|e| Self::classify(key, e))?;

            let body = response
                .body
                .collect()
                .await
                .map_err(|e| StoreError::Unavailable(format!("body read: {}", e)))?;
            Ok(body.into_bytes().to_vec())
        })
    }

    fn put(&self, key: &str, data: &[u8]) -> StoreResult<()> {
        self.runtime.block_on(async {
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(key)
                .body(ByteStream::from(data.to_vec()))
                .send()
                .await
                .map_err(|e| Self::classify(key, e))?;
            Ok(())
        })
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        self.runtime.block_on(async {
            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| Self::classify(key, e))?;
            Ok(())
        })
    }

    fn info(&self, key: &str) -> StoreResult<ObjectInfo> {
        self.runtime.block_on(async {
            let response = self
                .client
                .head_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| Self::classify(key, e))?;

            Ok(ObjectInfo {
                size: response.content_length().unwrap_or(0) as u64,
                etag: response.e_tag().map(|t| t.trim_matches('"').to_string()),
            })
        })
    }

    fn copy(&self, src_key: &str, dst_key: &str) -> StoreResult<()> {
        let source = format!("{}/{}", self.bucket, src_key);
        self.runtime.block_on(async {
            self.client
                .copy_object()
                .bucket(&self.bucket)
                .copy_source(source)
                .key(dst_key)
                .send()
                .await
                .map_err(|e| Self::classify(src_key, e))?;
            Ok(())
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}
