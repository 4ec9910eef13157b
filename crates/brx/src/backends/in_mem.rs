//! # Previously, on brx...
//!
//! 🎬 The buckets were far away. The tests were impatient. Somebody had to build a
//! bucket so simple it lives entirely in RAM, gone the moment you blink.
//!
//! That somebody was this module.
//!
//! [`InMemoryObjectStore`] is a whole little object-storage service behind an
//! `Arc<Mutex<...>>`: buckets, objects, metadata, multipart sessions, part tags,
//! and (because tests need to watch things go wrong on purpose) a call log plus
//! one-shot fault injection. Clone it and every clone sees the same buckets, which
//! is how the source and the target can be "two regions" in the same test.
//!
//! ⚠️ This is NOT for production. This is for tests and `brx run` demos. If you're
//! deploying this to prod, please also deploy a therapist.

use std::collections::{BTreeMap, HashMap};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex;

use crate::backends::{
    CompletedPart, FetchedObject, MultipartUploadRef, ObjectMetadata, ObjectPage, ObjectStore,
    ObjectSummary,
};

/// 📒 Every remote call the store has served, in order. Tests read this like a
/// flight recorder after the crash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    ListObjects { bucket: String },
    HeadObject { bucket: String, key: String },
    GetObject { bucket: String, key: String },
    PutObject { bucket: String, key: String },
    DownloadRange { bucket: String, key: String, range: Range<u64> },
    CreateMultipartUpload { bucket: String, key: String },
    UploadPart { bucket: String, key: String, part_number: i32, len: u64 },
    CompleteMultipartUpload { bucket: String, key: String, parts: usize },
    ListMultipartUploads { bucket: String },
    AbortMultipartUpload { bucket: String, key: String, upload_id: String },
}

impl StoreCall {
    /// 🚚 Does this call move object bytes (or open a session to move them)?
    pub fn is_transfer(&self) -> bool {
        matches!(
            self,
            StoreCall::GetObject { .. }
                | StoreCall::PutObject { .. }
                | StoreCall::DownloadRange { .. }
                | StoreCall::CreateMultipartUpload { .. }
                | StoreCall::UploadPart { .. }
                | StoreCall::CompleteMultipartUpload { .. }
        )
    }
}

/// 💣 A one-shot failure, armed by a test and disarmed the moment it fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreFault {
    /// Fail the n-th `download_range` call (1-based, counted from when the fault was armed).
    DownloadRange { call: usize },
    /// Fail the upload of this part number.
    UploadPart { part_number: i32 },
    /// Fail the n-th `list_objects` page request (1-based).
    ListObjects { page: usize },
    /// Fail `put_object` for this key.
    PutObject { key: String },
}

#[derive(Debug, Clone)]
struct StoredObject {
    // 👻 None = "listing-only": the object shows up in listings with its size, but
    // any attempt to read it fails. Lets tests talk about 2 TiB objects without
    // allocating 2 TiB. The allocator sends its thanks.
    body: Option<Bytes>,
    metadata: ObjectMetadata,
}

#[derive(Debug, Clone)]
struct OpenUpload {
    bucket: String,
    key: String,
    metadata: ObjectMetadata,
    parts: BTreeMap<i32, (Bytes, String)>,
}

#[derive(Debug)]
struct ArmedFault {
    fault: StoreFault,
    // 🔢 calls of the matching kind seen since arming
    seen: usize,
}

#[derive(Debug)]
struct StoreState {
    buckets: BTreeMap<String, BTreeMap<String, StoredObject>>,
    uploads: BTreeMap<String, OpenUpload>,
    next_upload_id: u64,
    calls: Vec<StoreCall>,
    faults: Vec<ArmedFault>,
    page_size: usize,
    // 🐌 added to every call that touches object bytes
    latency: Duration,
}

impl Default for StoreState {
    fn default() -> Self {
        Self {
            buckets: BTreeMap::new(),
            uploads: BTreeMap::new(),
            next_upload_id: 1,
            calls: Vec::new(),
            faults: Vec::new(),
            // 📄 same page size S3 uses. tests shrink it to exercise pagination.
            page_size: 1000,
            latency: Duration::ZERO,
        }
    }
}

impl StoreState {
    /// 💣 Bump counters for faults of this kind and fire (and disarm) the first one that matches.
    fn trip(&mut self, matches: impl Fn(&StoreFault, usize) -> Option<bool>) -> bool {
        let mut fired = None;
        for (idx, armed) in self.faults.iter_mut().enumerate() {
            // -- None = fault is for a different kind of call, leave its counter alone
            let seen_next = armed.seen + 1;
            if let Some(hit) = matches(&armed.fault, seen_next) {
                armed.seen = seen_next;
                if hit && fired.is_none() {
                    fired = Some(idx);
                }
            }
        }
        match fired {
            Some(idx) => {
                self.faults.remove(idx);
                true
            }
            None => false,
        }
    }

    fn object(&self, bucket: &str, key: &str) -> Result<&StoredObject> {
        self.buckets
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .with_context(|| format!("💀 NoSuchKey: '{bucket}/{key}'. We looked under every byte."))
    }
}

fn e_tag_for(body: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    body.hash(&mut hasher);
    format!("\"{:016x}\"", hasher.finish())
}

/// 🧠 A bucket service that fits in your pocket (and your RAM).
#[derive(Debug, Clone, Default)]
pub struct InMemoryObjectStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 📄 Shrink listing pages so tests can watch pagination actually paginate.
    pub async fn set_page_size(&self, page_size: usize) {
        self.state.lock().await.page_size = page_size.max(1);
    }

    pub async fn insert_object(&self, bucket: &str, key: &str, body: impl Into<Bytes>) {
        self.insert_object_with_metadata(bucket, key, body, ObjectMetadata::default())
            .await;
    }

    pub async fn insert_object_with_metadata(
        &self,
        bucket: &str,
        key: &str,
        body: impl Into<Bytes>,
        mut metadata: ObjectMetadata,
    ) {
        let body = body.into();
        metadata.content_length = body.len() as i64;
        self.state
            .lock()
            .await
            .buckets
            .entry(bucket.to_string())
            .or_default()
            .insert(
                key.to_string(),
                StoredObject {
                    body: Some(body),
                    metadata,
                },
            );
    }

    /// 👻 Register an object that appears in listings with `size` bytes but can never be read.
    pub async fn insert_listing_only(&self, bucket: &str, key: &str, size: i64) {
        self.state
            .lock()
            .await
            .buckets
            .entry(bucket.to_string())
            .or_default()
            .insert(
                key.to_string(),
                StoredObject {
                    body: None,
                    metadata: ObjectMetadata {
                        content_length: size,
                        ..ObjectMetadata::default()
                    },
                },
            );
    }

    pub async fn object_bytes(&self, bucket: &str, key: &str) -> Option<Bytes> {
        let state = self.state.lock().await;
        state
            .buckets
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .and_then(|object| object.body.clone())
    }

    pub async fn object_metadata(&self, bucket: &str, key: &str) -> Option<ObjectMetadata> {
        let state = self.state.lock().await;
        state
            .buckets
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .map(|object| object.metadata.clone())
    }

    pub async fn keys(&self, bucket: &str) -> Vec<String> {
        let state = self.state.lock().await;
        state
            .buckets
            .get(bucket)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// 🧟 Multipart sessions still open against `bucket`.
    pub async fn open_uploads(&self, bucket: &str) -> Vec<MultipartUploadRef> {
        let state = self.state.lock().await;
        state
            .uploads
            .iter()
            .filter(|(_, upload)| upload.bucket == bucket)
            .map(|(upload_id, upload)| MultipartUploadRef {
                key: upload.key.clone(),
                upload_id: upload_id.clone(),
            })
            .collect()
    }

    pub async fn calls(&self) -> Vec<StoreCall> {
        self.state.lock().await.calls.clone()
    }

    /// 🐌 Make every byte-moving call (and every HEAD) take at least this long.
    pub async fn set_latency(&self, latency: Duration) {
        self.state.lock().await.latency = latency;
    }

    async fn lag(&self) {
        let the_latency = self.state.lock().await.latency;
        if !the_latency.is_zero() {
            tokio::time::sleep(the_latency).await;
        }
    }

    pub async fn arm_fault(&self, fault: StoreFault) {
        self.state
            .lock()
            .await
            .faults
            .push(ArmedFault { fault, seen: 0 });
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn list_objects(&self, bucket: &str, continuation: Option<String>) -> Result<ObjectPage> {
        let mut state = self.state.lock().await;
        state.calls.push(StoreCall::ListObjects {
            bucket: bucket.to_string(),
        });
        let tripped = state.trip(|fault, seen| match fault {
            StoreFault::ListObjects { page } => Some(*page == seen),
            _ => None,
        });
        if tripped {
            anyhow::bail!("💀 InternalError while listing '{bucket}' (injected). The bucket blinked.");
        }

        let objects = state
            .buckets
            .get(bucket)
            .with_context(|| format!("💀 NoSuchBucket: '{bucket}'. It's not hiding. It's just not there."))?;
        // 🔖 continuation token = the last key of the previous page. keys are sorted, so
        // "everything strictly after it" is the next page.
        let remaining: Vec<ObjectSummary> = objects
            .iter()
            .filter(|(key, _)| continuation.as_deref().is_none_or(|after| key.as_str() > after))
            .map(|(key, object)| ObjectSummary {
                key: key.clone(),
                size: object.metadata.content_length,
            })
            .collect();

        let page_size = state.page_size;
        let truncated = remaining.len() > page_size;
        let page: Vec<ObjectSummary> = remaining.into_iter().take(page_size).collect();
        let next_token = if truncated {
            page.last().map(|summary| summary.key.clone())
        } else {
            None
        };
        Ok(ObjectPage {
            objects: page,
            next_token,
        })
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectMetadata> {
        self.lag().await;
        let mut state = self.state.lock().await;
        state.calls.push(StoreCall::HeadObject {
            bucket: bucket.to_string(),
            key: key.to_string(),
        });
        Ok(state.object(bucket, key)?.metadata.clone())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<FetchedObject> {
        self.lag().await;
        let mut state = self.state.lock().await;
        state.calls.push(StoreCall::GetObject {
            bucket: bucket.to_string(),
            key: key.to_string(),
        });
        let object = state.object(bucket, key)?;
        let body = object
            .body
            .clone()
            .with_context(|| format!("💀 '{bucket}/{key}' is listing-only. There are no bytes to give."))?;
        Ok(FetchedObject {
            body,
            metadata: object.metadata.clone(),
        })
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        metadata: &ObjectMetadata,
    ) -> Result<()> {
        self.lag().await;
        let mut state = self.state.lock().await;
        state.calls.push(StoreCall::PutObject {
            bucket: bucket.to_string(),
            key: key.to_string(),
        });
        let tripped = state.trip(|fault, _| match fault {
            StoreFault::PutObject { key: faulty } => Some(faulty == key),
            _ => None,
        });
        if tripped {
            anyhow::bail!("💀 SlowDown on put '{bucket}/{key}' (injected). The target is not in the mood.");
        }
        let mut metadata = metadata.clone();
        metadata.content_length = body.len() as i64;
        state
            .buckets
            .entry(bucket.to_string())
            .or_default()
            .insert(
                key.to_string(),
                StoredObject {
                    body: Some(body),
                    metadata,
                },
            );
        Ok(())
    }

    async fn download_range(
        &self,
        bucket: &str,
        key: &str,
        range: Range<u64>,
        dest: &Path,
    ) -> Result<u64> {
        self.lag().await;
        let slice = {
            let mut state = self.state.lock().await;
            state.calls.push(StoreCall::DownloadRange {
                bucket: bucket.to_string(),
                key: key.to_string(),
                range: range.clone(),
            });
            let tripped = state.trip(|fault, seen| match fault {
                StoreFault::DownloadRange { call } => Some(*call == seen),
                _ => None,
            });
            if tripped {
                anyhow::bail!(
                    "💀 Connection reset while downloading {:?} of '{bucket}/{key}' (injected).",
                    range
                );
            }
            let object = state.object(bucket, key)?;
            let body = object
                .body
                .as_ref()
                .with_context(|| format!("💀 '{bucket}/{key}' is listing-only. No ranges for you."))?;
            let len = body.len() as u64;
            if range.start > len || range.start > range.end {
                anyhow::bail!("💀 InvalidRange {:?} for '{bucket}/{key}' ({len} bytes).", range);
            }
            let end = range.end.min(len);
            body.slice(range.start as usize..end as usize)
        };

        tokio::fs::write(dest, &slice)
            .await
            .with_context(|| format!("💀 Could not write range buffer '{}'", dest.display()))?;
        Ok(slice.len() as u64)
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        metadata: &ObjectMetadata,
    ) -> Result<String> {
        let mut state = self.state.lock().await;
        state.calls.push(StoreCall::CreateMultipartUpload {
            bucket: bucket.to_string(),
            key: key.to_string(),
        });
        let upload_id = format!("upload-{:06}", state.next_upload_id);
        state.next_upload_id += 1;
        state.uploads.insert(
            upload_id.clone(),
            OpenUpload {
                bucket: bucket.to_string(),
                key: key.to_string(),
                metadata: metadata.clone(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        src: &Path,
    ) -> Result<String> {
        self.lag().await;
        let body = Bytes::from(
            tokio::fs::read(src)
                .await
                .with_context(|| format!("💀 Could not read part buffer '{}'", src.display()))?,
        );

        let mut state = self.state.lock().await;
        state.calls.push(StoreCall::UploadPart {
            bucket: bucket.to_string(),
            key: key.to_string(),
            part_number,
            len: body.len() as u64,
        });
        let tripped = state.trip(|fault, _| match fault {
            StoreFault::UploadPart { part_number: faulty } => Some(*faulty == part_number),
            _ => None,
        });
        if tripped {
            anyhow::bail!("💀 RequestTimeout uploading part {part_number} of '{bucket}/{key}' (injected).");
        }
        let upload = state
            .uploads
            .get_mut(upload_id)
            .with_context(|| format!("💀 NoSuchUpload: '{upload_id}'. Somebody aborted it. Maybe us."))?;
        let e_tag = e_tag_for(&body);
        upload.parts.insert(part_number, (body, e_tag.clone()));
        Ok(e_tag)
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        state.calls.push(StoreCall::CompleteMultipartUpload {
            bucket: bucket.to_string(),
            key: key.to_string(),
            parts: parts.len(),
        });
        let upload = state
            .uploads
            .get(upload_id)
            .with_context(|| format!("💀 NoSuchUpload: '{upload_id}'. Can't finish what doesn't exist."))?
            .clone();
        if parts.is_empty() {
            anyhow::bail!("💀 MalformedXML: a multipart upload needs at least one part.");
        }

        // 🧩 S3's rule: parts listed in ascending order, every tag must match what we handed out.
        let mut assembled = Vec::new();
        let mut previous = 0;
        for part in parts {
            if part.part_number <= previous {
                anyhow::bail!("💀 InvalidPartOrder: part {} after part {previous}.", part.part_number);
            }
            previous = part.part_number;
            let (body, e_tag) = upload
                .parts
                .get(&part.part_number)
                .with_context(|| format!("💀 InvalidPart: part {} was never uploaded.", part.part_number))?;
            if *e_tag != part.e_tag {
                anyhow::bail!("💀 InvalidPart: e-tag mismatch on part {}.", part.part_number);
            }
            assembled.extend_from_slice(body);
        }

        let mut metadata = upload.metadata.clone();
        metadata.content_length = assembled.len() as i64;
        state.uploads.remove(upload_id);
        state
            .buckets
            .entry(upload.bucket.clone())
            .or_default()
            .insert(
                upload.key.clone(),
                StoredObject {
                    body: Some(Bytes::from(assembled)),
                    metadata,
                },
            );
        Ok(())
    }

    async fn list_multipart_uploads(&self, bucket: &str) -> Result<Vec<MultipartUploadRef>> {
        {
            let mut state = self.state.lock().await;
            state.calls.push(StoreCall::ListMultipartUploads {
                bucket: bucket.to_string(),
            });
        }
        Ok(self.open_uploads(bucket).await)
    }

    async fn abort_multipart_upload(&self, bucket: &str, key: &str, upload_id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.calls.push(StoreCall::AbortMultipartUpload {
            bucket: bucket.to_string(),
            key: key.to_string(),
            upload_id: upload_id.to_string(),
        });
        // 🗑️ S3 treats aborting an already-gone upload as NoSuchUpload. We do too.
        state
            .uploads
            .remove(upload_id)
            .map(|_| ())
            .with_context(|| format!("💀 NoSuchUpload: '{upload_id}' was already gone."))
    }
}
