//! 🔌 Backends — where the real object I/O happens.
//!
//! 🪣 One trait, [`ObjectStore`], describes everything the scanner and the replicator
//! are allowed to ask of a bucket: list it, peek at an object, fetch it whole or by
//! byte range, write it whole or in numbered parts, and clean up abandoned multipart
//! sessions. Two implementations live underneath: an in-memory store for tests and
//! local runs, and the real thing on top of the AWS S3 SDK.
//!
//! 🎭 [`ObjectStoreBackend`] is the casting agency. Callers hold the enum and never
//! learn (or care) whether the bytes are in RAM or on another continent.
//!
//! 🦆 The duck is here because every file must have one. This is law.

use std::collections::HashMap;
use std::ops::Range;
use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;

pub mod in_mem;
pub mod s3;

pub use in_mem::{InMemoryObjectStore, StoreCall, StoreFault};
pub use s3::{S3ObjectStore, S3StoreConfig};

/// 📋 One entry of a bucket listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub size: i64,
}

/// 📄 One page of a bucket listing plus the bookmark for the next one.
/// `next_token == None` means that was the last page. Go home.
#[derive(Debug, Clone, Default)]
pub struct ObjectPage {
    pub objects: Vec<ObjectSummary>,
    pub next_token: Option<String>,
}

/// 🏷️ The metadata that rides along with an object.
///
/// `content_length` is authoritative. The size in the stream payload is what the
/// scanner saw; this is what the bucket says *right now*.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectMetadata {
    pub content_length: i64,
    pub content_type: Option<String>,
    pub user_metadata: HashMap<String, String>,
}

/// 📦 A whole object, bytes and all. Only for objects small enough to hold in memory.
#[derive(Debug, Clone)]
pub struct FetchedObject {
    pub body: Bytes,
    pub metadata: ObjectMetadata,
}

/// 🧩 A committed part of a multipart session: its number and the tag the target gave back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: i32,
    pub e_tag: String,
}

/// 🧟 A multipart session the target bucket still considers open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartUploadRef {
    pub key: String,
    pub upload_id: String,
}

/// 🪣 Everything brx may ask of a bucket.
///
/// # Contract
/// - Every method is a single remote call (or a paged series of them) with no retries
///   of its own. The replicator decides what a failure means.
/// - `download_range` writes exactly the requested half-open byte range to `dest`,
///   truncating whatever was there, and returns the number of bytes written.
/// - `upload_part` uploads the entire file at `src` as one part.
/// - `list_multipart_uploads` pages exhaustively.
#[async_trait]
pub trait ObjectStore: std::fmt::Debug + Send + Sync {
    async fn list_objects(&self, bucket: &str, continuation: Option<String>) -> Result<ObjectPage>;

    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectMetadata>;

    async fn get_object(&self, bucket: &str, key: &str) -> Result<FetchedObject>;

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        metadata: &ObjectMetadata,
    ) -> Result<()>;

    async fn download_range(
        &self,
        bucket: &str,
        key: &str,
        range: Range<u64>,
        dest: &Path,
    ) -> Result<u64>;

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        metadata: &ObjectMetadata,
    ) -> Result<String>;

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        src: &Path,
    ) -> Result<String>;

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<()>;

    async fn list_multipart_uploads(&self, bucket: &str) -> Result<Vec<MultipartUploadRef>>;

    async fn abort_multipart_upload(&self, bucket: &str, key: &str, upload_id: &str) -> Result<()>;
}

/// 🎭 The many faces of an object store. A universal remote for buckets.
///
/// Ancient proverb: "He who hardcodes the backend, replicates only once."
#[derive(Debug, Clone)]
pub enum ObjectStoreBackend {
    InMemory(InMemoryObjectStore),
    S3(S3ObjectStore),
}

#[async_trait]
impl ObjectStore for ObjectStoreBackend {
    async fn list_objects(&self, bucket: &str, continuation: Option<String>) -> Result<ObjectPage> {
        match self {
            ObjectStoreBackend::InMemory(store) => store.list_objects(bucket, continuation).await,
            ObjectStoreBackend::S3(store) => store.list_objects(bucket, continuation).await,
        }
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectMetadata> {
        match self {
            ObjectStoreBackend::InMemory(store) => store.head_object(bucket, key).await,
            ObjectStoreBackend::S3(store) => store.head_object(bucket, key).await,
        }
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<FetchedObject> {
        match self {
            ObjectStoreBackend::InMemory(store) => store.get_object(bucket, key).await,
            ObjectStoreBackend::S3(store) => store.get_object(bucket, key).await,
        }
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        metadata: &ObjectMetadata,
    ) -> Result<()> {
        match self {
            ObjectStoreBackend::InMemory(store) => store.put_object(bucket, key, body, metadata).await,
            ObjectStoreBackend::S3(store) => store.put_object(bucket, key, body, metadata).await,
        }
    }

    async fn download_range(
        &self,
        bucket: &str,
        key: &str,
        range: Range<u64>,
        dest: &Path,
    ) -> Result<u64> {
        match self {
            ObjectStoreBackend::InMemory(store) => store.download_range(bucket, key, range, dest).await,
            ObjectStoreBackend::S3(store) => store.download_range(bucket, key, range, dest).await,
        }
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        metadata: &ObjectMetadata,
    ) -> Result<String> {
        match self {
            ObjectStoreBackend::InMemory(store) => {
                store.create_multipart_upload(bucket, key, metadata).await
            }
            ObjectStoreBackend::S3(store) => store.create_multipart_upload(bucket, key, metadata).await,
        }
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        src: &Path,
    ) -> Result<String> {
        match self {
            ObjectStoreBackend::InMemory(store) => {
                store.upload_part(bucket, key, upload_id, part_number, src).await
            }
            ObjectStoreBackend::S3(store) => {
                store.upload_part(bucket, key, upload_id, part_number, src).await
            }
        }
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<()> {
        match self {
            ObjectStoreBackend::InMemory(store) => {
                store.complete_multipart_upload(bucket, key, upload_id, parts).await
            }
            ObjectStoreBackend::S3(store) => {
                store.complete_multipart_upload(bucket, key, upload_id, parts).await
            }
        }
    }

    async fn list_multipart_uploads(&self, bucket: &str) -> Result<Vec<MultipartUploadRef>> {
        match self {
            ObjectStoreBackend::InMemory(store) => store.list_multipart_uploads(bucket).await,
            ObjectStoreBackend::S3(store) => store.list_multipart_uploads(bucket).await,
        }
    }

    async fn abort_multipart_upload(&self, bucket: &str, key: &str, upload_id: &str) -> Result<()> {
        match self {
            ObjectStoreBackend::InMemory(store) => {
                store.abort_multipart_upload(bucket, key, upload_id).await
            }
            ObjectStoreBackend::S3(store) => store.abort_multipart_upload(bucket, key, upload_id).await,
        }
    }
}

/// ☁️ Load the shared AWS config for one region, optionally pointed at a custom endpoint
/// (LocalStack, MinIO, a VPC endpoint, or that one staging box under someone's desk).
///
/// Credentials come from the usual chain: env vars, then `~/.aws/config`, then the
/// instance role, then hope.
pub(crate) async fn load_aws_config(
    region: &str,
    endpoint_url: Option<&str>,
) -> aws_config::SdkConfig {
    let mut the_loader =
        aws_config::from_env().region(aws_config::Region::new(region.to_string()));
    if let Some(the_endpoint) = endpoint_url {
        the_loader = the_loader.endpoint_url(the_endpoint);
    }
    the_loader.load().await
}
