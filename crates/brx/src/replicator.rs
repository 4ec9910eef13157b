// ai
//! 📦 The file replicator: one object in, one object out, and never an error thrown at
//! the caller.
//!
//! 🎬 COLD OPEN — INT. A SHARD CONSUMER — IT HANDS OVER A DESCRIPTOR AND WALKS AWAY.
//!
//! The replicator picks a strategy by size:
//!
//! | size                    | strategy                                   |
//! |-------------------------|--------------------------------------------|
//! | `< 100 MiB`             | fetch the whole thing, write the whole thing |
//! | `100 MiB ..< 1 TiB`     | multipart, one temp-file-sized chunk at a time |
//! | `>= 1 TiB`              | skip, with a warning and zero transfer calls |
//!
//! 🧠 Knowledge graph:
//! - chunked copies stream each range to a scoped [`tempfile::NamedTempFile`] and upload it
//!   from disk, so peak memory is one SDK buffer, not one chunk.
//! - any failure once a multipart session is open sweeps EVERY open session on the
//!   target bucket (ours and anyone else's), then reports. Single job per target bucket,
//!   or this gets rude.
//! - failures are reported through the orchestration signal (when there is a token) and
//!   the logs. The caller only ever gets a [`CopyOutcome`], which is for accounting.

use std::fmt;
use std::path::PathBuf;

use anyhow::Context;
use tracing::{debug, error, info, warn};

use crate::backends::{CompletedPart, ObjectStore, ObjectStoreBackend};
use crate::common::{HUNDRED_MIB, ObjectDescriptor, ONE_TIB, SharedJob, TEN_MIB};
use crate::progress::ReplicationStats;
use crate::signal::TaskSignal;

pub mod chunk_plan;

pub use chunk_plan::{ChunkPlan, PlannedChunk, chunk_size_for};

// 🧱 S3 refuses to assemble more parts than this, whatever the plan says
const MAX_S3_PARTS: i32 = 10_000;

/// 📐 The size thresholds that route an object to a strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicatorLimits {
    /// Below this: in-memory copy.
    pub in_memory_below: u64,
    /// At or above this: skipped.
    pub skip_at_or_above: u64,
    /// Smallest multipart chunk.
    pub min_chunk_size: u64,
    /// Most parts a plan may have.
    pub max_parts: u64,
}

impl Default for ReplicatorLimits {
    fn default() -> Self {
        Self {
            in_memory_below: HUNDRED_MIB as u64,
            skip_at_or_above: ONE_TIB as u64,
            min_chunk_size: TEN_MIB as u64,
            max_parts: 1000,
        }
    }
}

/// 🚦 Which road an object takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStrategy {
    InMemory,
    Chunked,
    Skip,
}

impl TransferStrategy {
    pub fn for_size(size: u64, limits: &ReplicatorLimits) -> Self {
        if size >= limits.skip_at_or_above {
            TransferStrategy::Skip
        } else if size >= limits.in_memory_below {
            TransferStrategy::Chunked
        } else {
            TransferStrategy::InMemory
        }
    }
}

/// 🧾 What happened to one object. Accounting only; failures were already reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyOutcome {
    InMemory { bytes: u64 },
    Multipart { parts: u32, bytes: u64 },
    Skipped,
    Failed,
}

/// 🏷️ Where in a copy things went wrong. Becomes the `error` of a failure report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStage {
    Fetch,
    Store,
    Inspect,
    TempFile,
    OpenSession,
    DownloadRange,
    UploadPart,
    Finalize,
}

impl TransferStage {
    pub fn error_kind(&self) -> &'static str {
        match self {
            TransferStage::Fetch => "GetObjectFailed",
            TransferStage::Store => "PutObjectFailed",
            TransferStage::Inspect => "HeadObjectFailed",
            TransferStage::TempFile => "TempFileFailed",
            TransferStage::OpenSession => "CreateMultipartUploadFailed",
            TransferStage::DownloadRange => "RangeDownloadFailed",
            TransferStage::UploadPart => "UploadPartFailed",
            TransferStage::Finalize => "CompleteMultipartUploadFailed",
        }
    }
}

impl fmt::Display for TransferStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.error_kind())
    }
}

#[derive(Debug)]
struct StageFailure {
    stage: TransferStage,
    error: anyhow::Error,
}

trait AtStage<T> {
    fn at(self, stage: TransferStage) -> Result<T, StageFailure>;
}

impl<T> AtStage<T> for anyhow::Result<T> {
    fn at(self, stage: TransferStage) -> Result<T, StageFailure> {
        self.map_err(|error| StageFailure { stage, error })
    }
}

/// 🧩 A multipart upload in flight. Owned by exactly one chunked copy.
#[derive(Debug)]
struct MultipartSession {
    upload_id: String,
    target_key: String,
    parts: Vec<CompletedPart>,
    bytes_transferred: u64,
    chunk_size: u64,
}

/// 📦 Copies one object from the job's source bucket to its target bucket.
///
/// Cheap to clone; the shard consumer hands a clone to every spawned copy.
#[derive(Debug, Clone)]
pub struct FileReplicator {
    source: ObjectStoreBackend,
    target: ObjectStoreBackend,
    job: SharedJob,
    signal: TaskSignal,
    limits: ReplicatorLimits,
    temp_dir: Option<PathBuf>,
    stats: ReplicationStats,
}

impl FileReplicator {
    pub fn new(
        source: ObjectStoreBackend,
        target: ObjectStoreBackend,
        job: SharedJob,
        signal: TaskSignal,
        stats: ReplicationStats,
    ) -> Self {
        Self {
            source,
            target,
            job,
            signal,
            limits: ReplicatorLimits::default(),
            temp_dir: None,
            stats,
        }
    }

    pub fn with_limits(mut self, limits: ReplicatorLimits) -> Self {
        self.limits = limits;
        self
    }

    /// 📁 Where chunk buffers go. `None` = the OS temp dir.
    pub fn with_temp_dir(mut self, temp_dir: Option<PathBuf>) -> Self {
        self.temp_dir = temp_dir;
        self
    }

    /// 🚚 Copy one object. Never fails from the caller's point of view.
    pub async fn copy(&self, descriptor: &ObjectDescriptor) -> CopyOutcome {
        let the_size = u64::try_from(descriptor.size).unwrap_or(0);
        let the_outcome = match TransferStrategy::for_size(the_size, &self.limits) {
            TransferStrategy::Skip => {
                warn!(
                    "🐘 Skipping '{}': {} bytes is at or past the {} byte limit",
                    descriptor.key, the_size, self.limits.skip_at_or_above
                );
                CopyOutcome::Skipped
            }
            TransferStrategy::InMemory => match self.copy_in_memory(&descriptor.key).await {
                Ok(outcome) => outcome,
                Err(failure) => self.fail(&descriptor.key, failure).await,
            },
            TransferStrategy::Chunked => self.copy_chunked(&descriptor.key).await,
        };

        match &the_outcome {
            CopyOutcome::InMemory { bytes } => self.stats.record_in_memory(*bytes),
            CopyOutcome::Multipart { parts, bytes } => {
                self.stats.record_multipart(u64::from(*parts), *bytes)
            }
            CopyOutcome::Skipped => self.stats.record_skipped(),
            CopyOutcome::Failed => self.stats.record_failed(),
        }
        the_outcome
    }

    async fn copy_in_memory(&self, key: &str) -> Result<CopyOutcome, StageFailure> {
        let the_object = self
            .source
            .get_object(&self.job.source_bucket, key)
            .await
            .at(TransferStage::Fetch)?;
        let the_bytes = the_object.body.len() as u64;
        self.target
            .put_object(&self.job.target_bucket, key, the_object.body, &the_object.metadata)
            .await
            .at(TransferStage::Store)?;
        debug!("📦 '{key}' copied in memory ({the_bytes} bytes)");
        Ok(CopyOutcome::InMemory { bytes: the_bytes })
    }

    async fn copy_chunked(&self, key: &str) -> CopyOutcome {
        // 🔍 authoritative length and metadata come from the source, right now
        let the_metadata = match self
            .source
            .head_object(&self.job.source_bucket, key)
            .await
            .at(TransferStage::Inspect)
        {
            Ok(metadata) => metadata,
            Err(failure) => return self.fail(key, failure).await,
        };
        let the_len = u64::try_from(the_metadata.content_length).unwrap_or(0);
        if the_len == 0 {
            // -- 🫥 it shrank to nothing since the scan. a zero-part upload is not a thing.
            info!("🫥 '{key}' is empty now; copying it in memory instead");
            return match self.copy_in_memory(key).await {
                Ok(outcome) => outcome,
                Err(failure) => self.fail(key, failure).await,
            };
        }

        let the_buffer = match self.chunk_buffer() {
            Ok(buffer) => buffer,
            Err(failure) => return self.fail(key, failure).await,
        };

        let the_upload_id = match self
            .target
            .create_multipart_upload(&self.job.target_bucket, key, &the_metadata)
            .await
            .at(TransferStage::OpenSession)
        {
            Ok(upload_id) => upload_id,
            Err(failure) => return self.fail(key, failure).await,
        };

        let the_plan = ChunkPlan::new(the_len, &self.limits);
        let mut the_session = MultipartSession {
            upload_id: the_upload_id,
            target_key: key.to_string(),
            parts: Vec::with_capacity(the_plan.part_count() as usize),
            bytes_transferred: 0,
            chunk_size: the_plan.chunk_size(),
        };
        info!(
            "🧩 '{key}': {the_len} bytes in ~{} parts of {} bytes (upload {})",
            the_plan.part_count(),
            the_session.chunk_size,
            the_session.upload_id
        );

        let the_result = self
            .transfer_parts(key, &the_plan, &mut the_session, the_buffer.path())
            .await;
        // 🧹 release the buffer before anything else happens, success or not
        if let Err(err) = the_buffer.close() {
            warn!("🧹 Could not remove chunk buffer for '{key}': {err}");
        }

        match the_result {
            Ok(()) => CopyOutcome::Multipart {
                parts: the_session.parts.len() as u32,
                bytes: the_session.bytes_transferred,
            },
            Err(failure) => {
                error!(
                    "💀 Chunked copy of '{key}' died after {} part(s), {} bytes. Sweeping open uploads.",
                    the_session.parts.len(),
                    the_session.bytes_transferred
                );
                self.sweep_open_uploads().await;
                self.fail(key, failure).await
            }
        }
    }

    async fn transfer_parts(
        &self,
        key: &str,
        plan: &ChunkPlan,
        session: &mut MultipartSession,
        buffer: &std::path::Path,
    ) -> Result<(), StageFailure> {
        let mut the_offset = 0;
        while let Some(the_range) = plan.range_at(the_offset) {
            let the_part_number = session.parts.len() as i32 + 1;
            if the_part_number > MAX_S3_PARTS {
                return Err(anyhow::anyhow!(
                    "💀 '{key}' would need more than {MAX_S3_PARTS} parts. The source keeps short-changing our ranges."
                ))
                .at(TransferStage::DownloadRange);
            }

            let the_written = self
                .source
                .download_range(&self.job.source_bucket, key, the_range.clone(), buffer)
                .await
                .at(TransferStage::DownloadRange)?;
            if the_written == 0 {
                return Err(anyhow::anyhow!(
                    "💀 Range {:?} of '{key}' came back empty. The object shrank under us.",
                    the_range
                ))
                .at(TransferStage::DownloadRange);
            }

            let the_e_tag = self
                .target
                .upload_part(
                    &self.job.target_bucket,
                    &session.target_key,
                    &session.upload_id,
                    the_part_number,
                    buffer,
                )
                .await
                .at(TransferStage::UploadPart)?;
            session.parts.push(CompletedPart {
                part_number: the_part_number,
                e_tag: the_e_tag,
            });
            session.bytes_transferred += the_written;
            // -- 📏 advance by what actually arrived, not by what we asked for
            the_offset += the_written;
        }

        self.target
            .complete_multipart_upload(
                &self.job.target_bucket,
                &session.target_key,
                &session.upload_id,
                &session.parts,
            )
            .await
            .at(TransferStage::Finalize)?;
        info!(
            "✅ '{key}' assembled from {} parts ({} bytes)",
            session.parts.len(),
            session.bytes_transferred
        );
        Ok(())
    }

    fn chunk_buffer(&self) -> Result<tempfile::NamedTempFile, StageFailure> {
        let mut the_builder = tempfile::Builder::new();
        the_builder.prefix("brx-chunk-");
        let the_buffer = match &self.temp_dir {
            Some(dir) => the_builder.tempfile_in(dir),
            None => the_builder.tempfile(),
        };
        the_buffer
            .context("💀 Could not create a chunk buffer on local disk")
            .at(TransferStage::TempFile)
    }

    /// 🧹 Abort every multipart session still open on the target bucket.
    async fn sweep_open_uploads(&self) {
        let the_uploads = match self
            .target
            .list_multipart_uploads(&self.job.target_bucket)
            .await
        {
            Ok(uploads) => uploads,
            Err(err) => {
                error!("🧹 Could not list open uploads on '{}': {err:#}", self.job.target_bucket);
                return;
            }
        };
        for upload in the_uploads {
            match self
                .target
                .abort_multipart_upload(&self.job.target_bucket, &upload.key, &upload.upload_id)
                .await
            {
                Ok(()) => debug!("🧹 Aborted upload {} of '{}'", upload.upload_id, upload.key),
                Err(err) => warn!(
                    "🧹 Could not abort upload {} of '{}': {err:#}",
                    upload.upload_id, upload.key
                ),
            }
        }
    }

    /// 📣 Log and report a failed copy. Always yields [`CopyOutcome::Failed`].
    async fn fail(&self, key: &str, failure: StageFailure) -> CopyOutcome {
        let the_cause = format!(
            "s3://{}/{key} -> s3://{}/{key}: {:#}",
            self.job.source_bucket, self.job.target_bucket, failure.error
        );
        error!("💀 {}: {the_cause}", failure.stage);
        if let Err(err) = self
            .signal
            .report_failure(failure.stage.error_kind(), &the_cause)
            .await
        {
            warn!("📣 Could not report the failure of '{key}': {err}");
        }
        CopyOutcome::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    use bytes::Bytes;

    use crate::backends::{InMemoryObjectStore, ObjectMetadata, StoreCall, StoreFault};
    use crate::common::ReplicationJob;
    use crate::signal::{RecordingSignal, SignalBackend, SignalCall};

    const SRC: &str = "src-bucket";
    const DST: &str = "dst-bucket";

    /// 📐 Same routing rules, thresholds shrunk so tests move kilobytes, not gigabytes.
    fn tiny_limits() -> ReplicatorLimits {
        ReplicatorLimits {
            in_memory_below: 1000,
            skip_at_or_above: ONE_TIB as u64,
            min_chunk_size: 100,
            max_parts: 1000,
        }
    }

    struct Rig {
        source: InMemoryObjectStore,
        target: InMemoryObjectStore,
        recorder: RecordingSignal,
        temp: tempfile::TempDir,
        stats: ReplicationStats,
        replicator: FileReplicator,
    }

    fn rig(token: Option<&str>) -> Rig {
        let source = InMemoryObjectStore::new();
        let target = InMemoryObjectStore::new();
        let recorder = RecordingSignal::new();
        let temp = tempfile::tempdir().expect("tempdir");
        let stats = ReplicationStats::new();
        let job = Arc::new(ReplicationJob {
            source_bucket: SRC.into(),
            source_region: "us-east-1".into(),
            target_bucket: DST.into(),
            target_region: "eu-west-1".into(),
            task_token: token.map(str::to_string),
        });
        let replicator = FileReplicator::new(
            ObjectStoreBackend::InMemory(source.clone()),
            ObjectStoreBackend::InMemory(target.clone()),
            job.clone(),
            TaskSignal::new(
                SignalBackend::Recording(recorder.clone()),
                job.task_token.clone(),
            ),
            stats.clone(),
        )
        .with_limits(tiny_limits())
        .with_temp_dir(Some(temp.path().to_path_buf()));
        Rig {
            source,
            target,
            recorder,
            temp,
            stats,
            replicator,
        }
    }

    fn patterned(len: usize) -> Bytes {
        Bytes::from((0..len).map(|i| (i % 251) as u8).collect::<Vec<u8>>())
    }

    fn temp_dir_is_empty(rig: &Rig) -> bool {
        std::fs::read_dir(rig.temp.path())
            .expect("read temp dir")
            .next()
            .is_none()
    }

    #[test]
    fn the_one_where_the_boundaries_are_exact() {
        let limits = ReplicatorLimits::default();
        let hundred = HUNDRED_MIB as u64;
        let tib = ONE_TIB as u64;
        assert_eq!(TransferStrategy::for_size(0, &limits), TransferStrategy::InMemory);
        assert_eq!(TransferStrategy::for_size(hundred - 1, &limits), TransferStrategy::InMemory);
        assert_eq!(TransferStrategy::for_size(hundred, &limits), TransferStrategy::Chunked);
        assert_eq!(TransferStrategy::for_size(tib - 1, &limits), TransferStrategy::Chunked);
        assert_eq!(TransferStrategy::for_size(tib, &limits), TransferStrategy::Skip);
        assert_eq!(TransferStrategy::for_size(2 * tib, &limits), TransferStrategy::Skip);
    }

    #[tokio::test]
    async fn the_one_where_a_small_object_crosses_in_one_piece_with_its_metadata() {
        let rig = rig(None);
        let metadata = ObjectMetadata {
            content_length: 0,
            content_type: Some("image/jpeg".into()),
            user_metadata: HashMap::from([("owner".to_string(), "cat".to_string())]),
        };
        rig.source
            .insert_object_with_metadata(SRC, "cat.jpg", patterned(500), metadata.clone())
            .await;

        let outcome = rig.replicator.copy(&ObjectDescriptor::new("cat.jpg", 500)).await;

        assert_eq!(outcome, CopyOutcome::InMemory { bytes: 500 });
        assert_eq!(rig.target.object_bytes(DST, "cat.jpg").await, Some(patterned(500)));
        let copied = rig.target.object_metadata(DST, "cat.jpg").await.expect("metadata");
        let original = rig.source.object_metadata(SRC, "cat.jpg").await.expect("metadata");
        assert_eq!(copied, original);
        assert_eq!(copied.content_type.as_deref(), Some("image/jpeg"));
        assert_eq!(rig.stats.snapshot().copied_in_memory, 1);
    }

    #[tokio::test]
    async fn the_one_where_a_big_object_goes_part_by_part() {
        let rig = rig(Some("tok"));
        rig.source.insert_object(SRC, "big.bin", patterned(2550)).await;

        let outcome = rig.replicator.copy(&ObjectDescriptor::new("big.bin", 2550)).await;

        assert_eq!(outcome, CopyOutcome::Multipart { parts: 26, bytes: 2550 });
        assert_eq!(rig.target.object_bytes(DST, "big.bin").await, Some(patterned(2550)));
        let part_numbers: Vec<i32> = rig
            .target
            .calls()
            .await
            .into_iter()
            .filter_map(|call| match call {
                StoreCall::UploadPart { part_number, .. } => Some(part_number),
                _ => None,
            })
            .collect();
        assert_eq!(part_numbers, (1..=26).collect::<Vec<_>>());
        assert!(rig.target.open_uploads(DST).await.is_empty());
        assert!(rig.recorder.calls().await.is_empty());
        assert!(temp_dir_is_empty(&rig));
    }

    #[tokio::test]
    async fn the_one_where_a_giant_is_skipped_without_touching_anything() {
        let rig = rig(Some("tok"));
        rig.source
            .insert_listing_only(SRC, "giant.iso", 2 * ONE_TIB)
            .await;

        let outcome = rig
            .replicator
            .copy(&ObjectDescriptor::new("giant.iso", 2 * ONE_TIB))
            .await;

        assert_eq!(outcome, CopyOutcome::Skipped);
        assert!(rig.source.calls().await.iter().all(|call| !call.is_transfer()));
        assert!(rig.target.calls().await.is_empty());
        assert_eq!(rig.stats.snapshot().skipped, 1);
    }

    #[tokio::test]
    async fn the_one_where_chunk_three_dies_and_every_open_upload_goes_with_it() {
        let rig = rig(Some("tok"));
        rig.source.insert_object(SRC, "big.bin", patterned(2550)).await;
        // 🧟 somebody else's abandoned session on the same target
        let stranger = rig
            .target
            .create_multipart_upload(DST, "other.bin", &ObjectMetadata::default())
            .await
            .expect("stranger upload");
        rig.source.arm_fault(StoreFault::DownloadRange { call: 3 }).await;

        let outcome = rig.replicator.copy(&ObjectDescriptor::new("big.bin", 2550)).await;

        assert_eq!(outcome, CopyOutcome::Failed);
        assert!(rig.target.open_uploads(DST).await.is_empty());
        assert!(rig.target.calls().await.contains(&StoreCall::AbortMultipartUpload {
            bucket: DST.into(),
            key: "other.bin".into(),
            upload_id: stranger,
        }));
        assert_eq!(rig.target.object_bytes(DST, "big.bin").await, None);
        assert!(temp_dir_is_empty(&rig));

        let failures = rig.recorder.failures().await;
        assert_eq!(failures.len(), 1);
        match &failures[0] {
            SignalCall::Failure { token, error, cause } => {
                assert_eq!(token, "tok");
                assert_eq!(error, "RangeDownloadFailed");
                assert!(cause.contains("big.bin"));
            }
            other => panic!("unexpected call {other:?}"),
        }
        assert_eq!(rig.stats.snapshot().failed, 1);
    }

    #[tokio::test]
    async fn the_one_where_a_failed_part_upload_is_swept_but_nobody_is_told() {
        let rig = rig(None);
        rig.source.insert_object(SRC, "big.bin", patterned(1500)).await;
        rig.target.arm_fault(StoreFault::UploadPart { part_number: 2 }).await;

        let outcome = rig.replicator.copy(&ObjectDescriptor::new("big.bin", 1500)).await;

        assert_eq!(outcome, CopyOutcome::Failed);
        assert!(rig.target.open_uploads(DST).await.is_empty());
        assert!(rig.recorder.calls().await.is_empty());
        assert!(temp_dir_is_empty(&rig));
    }

    #[tokio::test]
    async fn the_one_where_the_object_vanished_before_we_got_there() {
        let rig = rig(Some("tok"));

        let outcome = rig.replicator.copy(&ObjectDescriptor::new("gone.bin", 5000)).await;

        assert_eq!(outcome, CopyOutcome::Failed);
        // 🚫 no session was ever opened, so no sweep either
        assert!(!rig
            .target
            .calls()
            .await
            .iter()
            .any(|call| matches!(call, StoreCall::ListMultipartUploads { .. })));
        let failures = rig.recorder.failures().await;
        assert_eq!(failures.len(), 1);
        assert!(matches!(&failures[0], SignalCall::Failure { error, .. } if error == "HeadObjectFailed"));
    }

    #[tokio::test]
    async fn the_one_where_a_big_object_shrank_to_nothing() {
        let rig = rig(None);
        rig.source.insert_object(SRC, "was-big.bin", Bytes::new()).await;

        let outcome = rig
            .replicator
            .copy(&ObjectDescriptor::new("was-big.bin", 5000))
            .await;

        assert_eq!(outcome, CopyOutcome::InMemory { bytes: 0 });
        assert_eq!(rig.target.object_bytes(DST, "was-big.bin").await, Some(Bytes::new()));
        assert!(rig.target.open_uploads(DST).await.is_empty());
    }
}
