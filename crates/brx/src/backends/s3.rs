// ai
//! 🪣☁️ S3 object store: the real buckets, on the real internet, with real invoices.
//!
//! 🎬 COLD OPEN: EXT. TWO AWS REGIONS, A THOUSAND MILES APART. NIGHT.
//!
//! One client per region. Each call below is exactly one SDK request (or, for the
//! two listings, a paged series of them). No retries live here: the SDK has its own
//! standard retry policy for transport hiccups, and everything above that is the
//! replicator's business.
//!
//! 🧠 Knowledge graph:
//! - whole-object reads: `GetObject` → `ByteStream::collect()` → `Bytes`
//! - ranged reads: `GetObject` + `Range: bytes=a-b` → `into_async_read()` → `tokio::io::copy` → temp file
//! - part uploads: `ByteStream::from_path()` straight off the temp file, so the part
//!   never has to fit in memory twice

use std::ops::Range;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart as SdkCompletedPart};
use bytes::Bytes;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tracing::trace;

use crate::backends::{
    CompletedPart, FetchedObject, MultipartUploadRef, ObjectMetadata, ObjectPage, ObjectStore,
    ObjectSummary, load_aws_config,
};

/// 🔧 How to reach one region's S3.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct S3StoreConfig {
    /// 🌎 The region the client signs for.
    pub region: String,
    /// 🧪 Custom endpoint (LocalStack, MinIO). `None` = the real AWS endpoint.
    #[serde(default)]
    pub endpoint_url: Option<String>,
    /// 🛣️ `http://host/bucket/key` instead of `http://bucket.host/key`. MinIO wants this.
    #[serde(default)]
    pub force_path_style: bool,
}

impl S3StoreConfig {
    pub fn for_region(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            endpoint_url: None,
            force_path_style: false,
        }
    }
}

/// 🪣 [`ObjectStore`] over `aws_sdk_s3::Client`. Cheap to clone; the SDK client is an `Arc` inside.
#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
}

impl S3ObjectStore {
    /// 🚀 Build a client for one region from the ambient credential chain.
    pub async fn new(config: &S3StoreConfig) -> Self {
        let the_aws_config = load_aws_config(&config.region, config.endpoint_url.as_deref()).await;
        let the_s3_config = aws_sdk_s3::config::Builder::from(&the_aws_config)
            .force_path_style(config.force_path_style)
            .build();
        Self {
            client: aws_sdk_s3::Client::from_conf(the_s3_config),
        }
    }

    pub fn from_client(client: aws_sdk_s3::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn list_objects(&self, bucket: &str, continuation: Option<String>) -> Result<ObjectPage> {
        let the_response = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .set_continuation_token(continuation)
            .send()
            .await
            .context(format!(
                "💀 ListObjectsV2 failed for s3://{bucket}. The bucket is either missing, \
                 forbidden, or in a region we didn't sign for."
            ))?;

        let objects = the_response
            .contents()
            .iter()
            .filter_map(|object| {
                object.key().map(|key| ObjectSummary {
                    key: key.to_string(),
                    size: object.size().unwrap_or(0),
                })
            })
            .collect();
        // 🔖 S3 only hands out a continuation token when the listing was truncated,
        // but we double-check anyway. Trust, but verify.
        let next_token = if the_response.is_truncated().unwrap_or(false) {
            the_response.next_continuation_token().map(str::to_string)
        } else {
            None
        };
        Ok(ObjectPage {
            objects,
            next_token,
        })
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectMetadata> {
        let the_head = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .context(format!(
                "💀 HEAD failed for s3://{bucket}/{key}. The object ghosted us between \
                 the listing and now."
            ))?;
        Ok(ObjectMetadata {
            content_length: the_head.content_length().unwrap_or(0),
            content_type: the_head.content_type().map(str::to_string),
            user_metadata: the_head.metadata().cloned().unwrap_or_default(),
        })
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<FetchedObject> {
        let the_response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .context(format!("💀 GetObject failed for s3://{bucket}/{key}."))?;
        let metadata = ObjectMetadata {
            content_length: the_response.content_length().unwrap_or(0),
            content_type: the_response.content_type().map(str::to_string),
            user_metadata: the_response.metadata().cloned().unwrap_or_default(),
        };
        let body = the_response
            .body
            .collect()
            .await
            .context(format!(
                "💀 The body of s3://{bucket}/{key} stopped arriving halfway through."
            ))?
            .into_bytes();
        Ok(FetchedObject { body, metadata })
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        metadata: &ObjectMetadata,
    ) -> Result<()> {
        let the_len = body.len() as i64;
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_length(the_len)
            .set_content_type(metadata.content_type.clone())
            .set_metadata(Some(metadata.user_metadata.clone()))
            .body(ByteStream::from(body))
            .send()
            .await
            .context(format!("💀 PutObject failed for s3://{bucket}/{key} ({the_len} bytes)."))?;
        Ok(())
    }

    async fn download_range(
        &self,
        bucket: &str,
        key: &str,
        range: Range<u64>,
        dest: &Path,
    ) -> Result<u64> {
        let mut the_file = tokio::fs::File::create(dest)
            .await
            .context(format!("💀 Could not create range buffer '{}'", dest.display()))?;
        if range.is_empty() {
            return Ok(0);
        }

        // 📏 HTTP ranges are inclusive on both ends. Rust ranges are not. Off-by-one, we meet again.
        let the_range_header = format!("bytes={}-{}", range.start, range.end - 1);
        let the_response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .range(&the_range_header)
            .send()
            .await
            .context(format!(
                "💀 Ranged GetObject ({the_range_header}) failed for s3://{bucket}/{key}."
            ))?;

        let mut the_reader = the_response.body.into_async_read();
        let the_written = tokio::io::copy(&mut the_reader, &mut the_file)
            .await
            .context(format!(
                "💀 Streaming {the_range_header} of s3://{bucket}/{key} into '{}' failed.",
                dest.display()
            ))?;
        the_file
            .flush()
            .await
            .context("💀 Could not flush the range buffer")?;
        trace!("📥 {the_written} bytes of s3://{bucket}/{key} landed in {}", dest.display());
        Ok(the_written)
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        metadata: &ObjectMetadata,
    ) -> Result<String> {
        let the_response = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .set_content_type(metadata.content_type.clone())
            .set_metadata(Some(metadata.user_metadata.clone()))
            .send()
            .await
            .context(format!("💀 CreateMultipartUpload failed for s3://{bucket}/{key}."))?;
        the_response
            .upload_id()
            .map(str::to_string)
            .context(format!(
                "💀 S3 opened a multipart upload for s3://{bucket}/{key} and forgot to tell us its id."
            ))
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        src: &Path,
    ) -> Result<String> {
        let the_body = ByteStream::from_path(src)
            .await
            .context(format!("💀 Could not open part buffer '{}'", src.display()))?;
        let the_response = self
            .client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(the_body)
            .send()
            .await
            .context(format!(
                "💀 UploadPart #{part_number} failed for s3://{bucket}/{key} (upload {upload_id})."
            ))?;
        the_response.e_tag().map(str::to_string).context(format!(
            "💀 Part #{part_number} of s3://{bucket}/{key} uploaded without an ETag. Can't complete without it."
        ))
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<()> {
        let the_parts = parts
            .iter()
            .map(|part| {
                SdkCompletedPart::builder()
                    .part_number(part.part_number)
                    .e_tag(&part.e_tag)
                    .build()
            })
            .collect();
        self.client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(the_parts))
                    .build(),
            )
            .send()
            .await
            .context(format!(
                "💀 CompleteMultipartUpload failed for s3://{bucket}/{key} ({} parts, upload {upload_id}).",
                parts.len()
            ))?;
        Ok(())
    }

    async fn list_multipart_uploads(&self, bucket: &str) -> Result<Vec<MultipartUploadRef>> {
        let mut the_uploads = Vec::new();
        let mut the_key_marker: Option<String> = None;
        let mut the_upload_id_marker: Option<String> = None;
        loop {
            let the_response = self
                .client
                .list_multipart_uploads()
                .bucket(bucket)
                .set_key_marker(the_key_marker.take())
                .set_upload_id_marker(the_upload_id_marker.take())
                .send()
                .await
                .context(format!("💀 ListMultipartUploads failed for s3://{bucket}."))?;

            the_uploads.extend(the_response.uploads().iter().filter_map(|upload| {
                match (upload.key(), upload.upload_id()) {
                    (Some(key), Some(upload_id)) => Some(MultipartUploadRef {
                        key: key.to_string(),
                        upload_id: upload_id.to_string(),
                    }),
                    _ => None,
                }
            }));

            if !the_response.is_truncated().unwrap_or(false) {
                break;
            }
            the_key_marker = the_response.next_key_marker().map(str::to_string);
            the_upload_id_marker = the_response.next_upload_id_marker().map(str::to_string);
            if the_key_marker.is_none() && the_upload_id_marker.is_none() {
                // -- 🧯 truncated but no markers: S3 is having a day. stop before we loop forever.
                break;
            }
        }
        Ok(the_uploads)
    }

    async fn abort_multipart_upload(&self, bucket: &str, key: &str, upload_id: &str) -> Result<()> {
        self.client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .context(format!(
                "💀 AbortMultipartUpload failed for s3://{bucket}/{key} (upload {upload_id})."
            ))?;
        Ok(())
    }
}
