//! 🌊 Stream transport: the ordered, partitioned, at-least-once pipe between the scanner
//! and the shard consumers.
//!
//! 🎬 *[a record enters the stream. it does not know which shard it will land in.]*
//! *[neither do we. that's what the hash is for.]*
//!
//! The core of brx only ever talks to the seams declared here:
//! - [`StreamProducer`]: put a record, flush everything durably.
//! - [`ShardSource`] + [`ShardReader`]: enumerate shards, read one shard in order.
//! - [`LeaseStore`]: who owns which shard, and how far they got.
//! - [`RecordProcessor`] + [`Checkpointer`]: the callbacks the [`StreamWorker`] drives,
//!   one processor per leased shard.
//!
//! Two transports live underneath, dispatched through enums the same way
//! [`crate::backends::ObjectStoreBackend`] does it: an in-memory stream for tests
//! and single-process runs, and Kinesis + DynamoDB for the real thing.

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::time::Duration;

use crate::errors::CheckpointError;

pub mod dynamo_leases;
pub mod in_mem;
pub mod kinesis;
pub mod worker;

pub use dynamo_leases::DynamoLeaseStore;
pub use in_mem::{InMemoryLeaseStore, InMemoryShardReader, InMemoryStream};
pub use kinesis::{KinesisProducer, KinesisShardReader, KinesisShardSource, KinesisStreamConfig};
pub use worker::{StreamWorker, StreamWorkerConfig, WorkerControl, WorkerHandle};

/// 🏁 Checkpoint value meaning "this shard was read to its very end". A lease holding
/// it is never picked up again.
pub const SHARD_END_CHECKPOINT: &str = "SHARD_END";

/// 🔑 Longest partition key Kinesis accepts, counted in characters.
pub const MAX_PARTITION_KEY_CHARS: usize = 256;
const PARTITION_KEY_PREFIX_CHARS: usize = MAX_PARTITION_KEY_CHARS - 16;

/// 🔑 Partition key for an object key. Keys that fit are used as-is. Longer ones (S3 allows
/// 1024 bytes) keep their first 240 characters and get a hash of the whole key appended,
/// so two long keys sharing a prefix still land on different shards.
pub fn partition_key_for(object_key: &str) -> String {
    if object_key.chars().count() <= MAX_PARTITION_KEY_CHARS {
        return object_key.to_string();
    }
    let mut hasher = DefaultHasher::new();
    object_key.hash(&mut hasher);
    let the_prefix: String = object_key.chars().take(PARTITION_KEY_PREFIX_CHARS).collect();
    format!("{the_prefix}{:016x}", hasher.finish())
}

/// 📨 One record as it came off a shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRecord {
    pub sequence_number: String,
    pub partition_key: String,
    pub data: Bytes,
}

/// 🚪 Why a record processor is being shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// 🏁 The shard was closed and fully read.
    ShardEnd,
    /// 🙋 The worker is stopping gracefully.
    Requested,
    /// 🧟 The lease moved to another worker. Whatever we write now would be a lie.
    Zombie,
}

/// 📍 Where to start reading a shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShardPosition {
    /// The oldest record still retained.
    TrimHorizon,
    /// Right after this sequence number.
    After(String),
}

impl ShardPosition {
    pub fn from_checkpoint(checkpoint: Option<String>) -> Self {
        match checkpoint {
            Some(sequence_number) => ShardPosition::After(sequence_number),
            None => ShardPosition::TrimHorizon,
        }
    }
}

/// 🎟️ A lease we just won.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub shard_id: String,
    pub checkpoint: Option<String>,
}

// ============================================================
//  📤 producing
// ============================================================

/// 📤 Put records on the stream.
///
/// `put_record` may buffer. `flush` returns only once every record handed over so far
/// is durably accepted by the transport.
#[async_trait]
pub trait StreamProducer: std::fmt::Debug + Send {
    async fn put_record(&mut self, partition_key: &str, data: Bytes) -> Result<()>;
    async fn flush(&mut self) -> Result<()>;
}

#[derive(Debug)]
pub enum ProducerBackend {
    InMemory(InMemoryStream),
    Kinesis(KinesisProducer),
}

#[async_trait]
impl StreamProducer for ProducerBackend {
    async fn put_record(&mut self, partition_key: &str, data: Bytes) -> Result<()> {
        match self {
            ProducerBackend::InMemory(stream) => stream.put_record(partition_key, data).await,
            ProducerBackend::Kinesis(producer) => producer.put_record(partition_key, data).await,
        }
    }

    async fn flush(&mut self) -> Result<()> {
        match self {
            ProducerBackend::InMemory(stream) => stream.flush().await,
            ProducerBackend::Kinesis(producer) => producer.flush().await,
        }
    }
}

// ============================================================
//  📥 consuming
// ============================================================

/// 🗺️ Knows the shards of one stream and how to open a reader on each.
#[async_trait]
pub trait ShardSource: std::fmt::Debug + Send + Sync {
    async fn list_shards(&self) -> Result<Vec<String>>;
    async fn open_shard(&self, shard_id: &str, position: ShardPosition) -> Result<ShardReaderBackend>;
}

/// 📖 Reads one shard, in order.
///
/// `Ok(Some(vec![]))` = nothing new yet, poll again later.
/// `Ok(None)` = the shard is closed and fully read.
#[async_trait]
pub trait ShardReader: std::fmt::Debug + Send {
    async fn next_batch(&mut self) -> Result<Option<Vec<StreamRecord>>>;
}

#[derive(Debug, Clone)]
pub enum ShardSourceBackend {
    InMemory(InMemoryStream),
    Kinesis(KinesisShardSource),
}

#[async_trait]
impl ShardSource for ShardSourceBackend {
    async fn list_shards(&self) -> Result<Vec<String>> {
        match self {
            ShardSourceBackend::InMemory(stream) => stream.list_shards().await,
            ShardSourceBackend::Kinesis(source) => source.list_shards().await,
        }
    }

    async fn open_shard(&self, shard_id: &str, position: ShardPosition) -> Result<ShardReaderBackend> {
        match self {
            ShardSourceBackend::InMemory(stream) => stream.open_shard(shard_id, position).await,
            ShardSourceBackend::Kinesis(source) => source.open_shard(shard_id, position).await,
        }
    }
}

#[derive(Debug)]
pub enum ShardReaderBackend {
    InMemory(InMemoryShardReader),
    Kinesis(KinesisShardReader),
}

#[async_trait]
impl ShardReader for ShardReaderBackend {
    async fn next_batch(&mut self) -> Result<Option<Vec<StreamRecord>>> {
        match self {
            ShardReaderBackend::InMemory(reader) => reader.next_batch().await,
            ShardReaderBackend::Kinesis(reader) => reader.next_batch().await,
        }
    }
}

// ============================================================
//  🎟️ leases & checkpoints
// ============================================================

/// 🎟️ Per-shard ownership plus the durable checkpoint.
///
/// # Contract
/// - `try_acquire` returns `Ok(None)` if someone else holds an unexpired lease or the
///   shard is already checkpointed at [`SHARD_END_CHECKPOINT`].
/// - `renew` and `checkpoint` fail with [`CheckpointError::LeaseLost`] once `owner` no
///   longer holds the lease.
#[async_trait]
pub trait LeaseStore: std::fmt::Debug + Send + Sync {
    async fn try_acquire(
        &self,
        shard_id: &str,
        owner: &str,
        lease_duration: Duration,
    ) -> Result<Option<Lease>>;

    async fn renew(
        &self,
        shard_id: &str,
        owner: &str,
        lease_duration: Duration,
    ) -> Result<(), CheckpointError>;

    async fn checkpoint(
        &self,
        shard_id: &str,
        owner: &str,
        sequence_number: &str,
    ) -> Result<(), CheckpointError>;

    async fn release(&self, shard_id: &str, owner: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
pub enum LeaseStoreBackend {
    InMemory(InMemoryLeaseStore),
    DynamoDb(DynamoLeaseStore),
}

#[async_trait]
impl LeaseStore for LeaseStoreBackend {
    async fn try_acquire(
        &self,
        shard_id: &str,
        owner: &str,
        lease_duration: Duration,
    ) -> Result<Option<Lease>> {
        match self {
            LeaseStoreBackend::InMemory(store) => store.try_acquire(shard_id, owner, lease_duration).await,
            LeaseStoreBackend::DynamoDb(store) => store.try_acquire(shard_id, owner, lease_duration).await,
        }
    }

    async fn renew(
        &self,
        shard_id: &str,
        owner: &str,
        lease_duration: Duration,
    ) -> Result<(), CheckpointError> {
        match self {
            LeaseStoreBackend::InMemory(store) => store.renew(shard_id, owner, lease_duration).await,
            LeaseStoreBackend::DynamoDb(store) => store.renew(shard_id, owner, lease_duration).await,
        }
    }

    async fn checkpoint(
        &self,
        shard_id: &str,
        owner: &str,
        sequence_number: &str,
    ) -> Result<(), CheckpointError> {
        match self {
            LeaseStoreBackend::InMemory(store) => store.checkpoint(shard_id, owner, sequence_number).await,
            LeaseStoreBackend::DynamoDb(store) => store.checkpoint(shard_id, owner, sequence_number).await,
        }
    }

    async fn release(&self, shard_id: &str, owner: &str) -> Result<()> {
        match self {
            LeaseStoreBackend::InMemory(store) => store.release(shard_id, owner).await,
            LeaseStoreBackend::DynamoDb(store) => store.release(shard_id, owner).await,
        }
    }
}

// ============================================================
//  🧠 processing callbacks
// ============================================================

/// 💾 Persist "everything up to the last delivered record is done" for one shard.
#[async_trait]
pub trait Checkpointer: Send + Sync {
    async fn checkpoint(&self) -> Result<(), CheckpointError>;
}

/// 🧠 Per-shard callbacks. One instance per leased shard, driven sequentially by the
/// worker: `initialize` once, `process_records` per batch, `shutdown` once.
#[async_trait]
pub trait RecordProcessor: Send {
    async fn initialize(&mut self, shard_id: &str);
    async fn process_records(&mut self, records: Vec<StreamRecord>, checkpointer: &dyn Checkpointer);
    async fn shutdown(&mut self, reason: ShutdownReason, checkpointer: &dyn Checkpointer);
}

/// 🏭 Builds a fresh [`RecordProcessor`] for every shard the worker leases.
pub trait RecordProcessorFactory: Send + Sync + 'static {
    type Processor: RecordProcessor + 'static;

    fn create_processor(&self) -> Self::Processor;
}
