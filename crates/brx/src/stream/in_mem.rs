//! 🧠 An in-memory partitioned stream and lease table.
//!
//! 🎬 *[a whiteboard. N columns. each column is a shard. records are sticky notes.]*
//!
//! Records are routed to shards by hashing the partition key, get monotonically
//! increasing zero-padded sequence numbers (so string order == arrival order), and stay
//! put forever. `close()` seals every shard; readers then drain and report shard end.
//!
//! The lease table keeps owner, expiry and checkpoint per shard, and can be told to
//! throttle the next N checkpoint writes or to "lose" a lease to another worker, which
//! is how tests poke at the unhappy paths.

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::errors::CheckpointError;
use crate::stream::{
    Lease, LeaseStore, MAX_PARTITION_KEY_CHARS, SHARD_END_CHECKPOINT, ShardPosition, ShardReader,
    ShardReaderBackend, ShardSource, StreamProducer, StreamRecord,
};

// 📦 matches the Kinesis GetRecords default so both transports hand out similar batches
const DEFAULT_BATCH_LIMIT: usize = 1000;

#[derive(Debug, Default)]
struct ShardLog {
    records: Vec<StreamRecord>,
    closed: bool,
}

#[derive(Debug)]
struct StreamState {
    shards: Vec<ShardLog>,
    next_sequence: u64,
    batch_limit: usize,
}

/// 🌊 A stream that lives and dies with the process.
#[derive(Debug, Clone)]
pub struct InMemoryStream {
    state: Arc<Mutex<StreamState>>,
}

fn shard_id_for(index: usize) -> String {
    format!("shardId-{index:012}")
}

fn shard_index_of(shard_id: &str) -> Option<usize> {
    shard_id.strip_prefix("shardId-")?.parse().ok()
}

impl InMemoryStream {
    pub fn new(shard_count: usize) -> Self {
        let shard_count = shard_count.max(1);
        Self {
            state: Arc::new(Mutex::new(StreamState {
                shards: (0..shard_count).map(|_| ShardLog::default()).collect(),
                next_sequence: 1,
                batch_limit: DEFAULT_BATCH_LIMIT,
            })),
        }
    }

    /// 📦 Cap how many records one `next_batch` hands out.
    pub async fn set_batch_limit(&self, batch_limit: usize) {
        self.state.lock().await.batch_limit = batch_limit.max(1);
    }

    /// 🔒 Seal every shard. Readers drain what's left and then see shard end.
    pub async fn close(&self) {
        for shard in self.state.lock().await.shards.iter_mut() {
            shard.closed = true;
        }
    }

    /// 🔍 Everything ever written to a shard, in order.
    pub async fn records(&self, shard_id: &str) -> Vec<StreamRecord> {
        let state = self.state.lock().await;
        shard_index_of(shard_id)
            .and_then(|index| state.shards.get(index))
            .map(|shard| shard.records.clone())
            .unwrap_or_default()
    }

    pub async fn total_records(&self) -> usize {
        let state = self.state.lock().await;
        state.shards.iter().map(|shard| shard.records.len()).sum()
    }

    /// 🧪 Append a record straight onto a shard, skipping the partitioner.
    pub async fn append_to_shard(&self, shard_id: &str, data: Bytes) -> Result<String> {
        let mut state = self.state.lock().await;
        let index = shard_index_of(shard_id)
            .filter(|index| *index < state.shards.len())
            .with_context(|| format!("💀 No shard called '{shard_id}' on this whiteboard."))?;
        Ok(Self::append(&mut state, index, shard_id.to_string(), data))
    }

    fn append(state: &mut StreamState, index: usize, partition_key: String, data: Bytes) -> String {
        let sequence_number = format!("{:020}", state.next_sequence);
        state.next_sequence += 1;
        state.shards[index].records.push(StreamRecord {
            sequence_number: sequence_number.clone(),
            partition_key,
            data,
        });
        sequence_number
    }
}

#[async_trait]
impl StreamProducer for InMemoryStream {
    async fn put_record(&mut self, partition_key: &str, data: Bytes) -> Result<()> {
        // -- same limit Kinesis enforces, so tests catch oversized keys too
        if partition_key.chars().count() > MAX_PARTITION_KEY_CHARS {
            anyhow::bail!(
                "💀 Partition key is longer than {MAX_PARTITION_KEY_CHARS} characters. Kinesis would say no, so we do too."
            );
        }
        let mut state = self.state.lock().await;
        let mut hasher = DefaultHasher::new();
        partition_key.hash(&mut hasher);
        let index = (hasher.finish() % state.shards.len() as u64) as usize;
        if state.shards[index].closed {
            anyhow::bail!("💀 Shard {} is closed. No new sticky notes allowed.", shard_id_for(index));
        }
        Self::append(&mut state, index, partition_key.to_string(), data);
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        // -- ✅ every put is already "durable", for a very RAM-shaped definition of durable
        Ok(())
    }
}

#[async_trait]
impl ShardSource for InMemoryStream {
    async fn list_shards(&self) -> Result<Vec<String>> {
        let state = self.state.lock().await;
        Ok((0..state.shards.len()).map(shard_id_for).collect())
    }

    async fn open_shard(&self, shard_id: &str, position: ShardPosition) -> Result<ShardReaderBackend> {
        let state = self.state.lock().await;
        let index = shard_index_of(shard_id)
            .filter(|index| *index < state.shards.len())
            .with_context(|| format!("💀 No shard called '{shard_id}' on this whiteboard."))?;
        let next = match position {
            ShardPosition::TrimHorizon => 0,
            ShardPosition::After(sequence_number) => state.shards[index]
                .records
                .iter()
                .take_while(|record| record.sequence_number <= sequence_number)
                .count(),
        };
        Ok(ShardReaderBackend::InMemory(InMemoryShardReader {
            stream: self.clone(),
            index,
            next,
        }))
    }
}

/// 📖 A cursor over one in-memory shard.
#[derive(Debug)]
pub struct InMemoryShardReader {
    stream: InMemoryStream,
    index: usize,
    next: usize,
}

#[async_trait]
impl ShardReader for InMemoryShardReader {
    async fn next_batch(&mut self) -> Result<Option<Vec<StreamRecord>>> {
        let state = self.stream.state.lock().await;
        let shard = &state.shards[self.index];
        if self.next >= shard.records.len() {
            return Ok(if shard.closed { None } else { Some(Vec::new()) });
        }
        let end = (self.next + state.batch_limit).min(shard.records.len());
        let batch = shard.records[self.next..end].to_vec();
        self.next = end;
        Ok(Some(batch))
    }
}

// ============================================================
//  🎟️ lease table
// ============================================================

#[derive(Debug, Clone)]
struct LeaseRow {
    owner: Option<String>,
    expires_at: Instant,
    checkpoint: Option<String>,
}

#[derive(Debug, Default)]
struct LeaseState {
    rows: HashMap<String, LeaseRow>,
    throttles_remaining: usize,
    checkpoint_attempts: usize,
}

/// 🎟️ A lease table in a `HashMap`. Shares state across clones.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLeaseStore {
    state: Arc<Mutex<LeaseState>>,
}

impl InMemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 🐢 The next `count` checkpoint writes fail with `Throttled`.
    pub async fn inject_throttles(&self, count: usize) {
        self.state.lock().await.throttles_remaining = count;
    }

    /// 🔢 Checkpoint writes attempted so far, throttled ones included.
    pub async fn checkpoint_attempts(&self) -> usize {
        self.state.lock().await.checkpoint_attempts
    }

    pub async fn checkpoint_of(&self, shard_id: &str) -> Option<String> {
        let state = self.state.lock().await;
        state.rows.get(shard_id).and_then(|row| row.checkpoint.clone())
    }

    pub async fn owner_of(&self, shard_id: &str) -> Option<String> {
        let state = self.state.lock().await;
        state.rows.get(shard_id).and_then(|row| row.owner.clone())
    }

    /// 🦹 Hand the lease to somebody else, as if another worker stole it.
    pub async fn steal(&self, shard_id: &str, thief: &str) {
        let mut state = self.state.lock().await;
        let row = state.rows.entry(shard_id.to_string()).or_insert(LeaseRow {
            owner: None,
            expires_at: Instant::now(),
            checkpoint: None,
        });
        row.owner = Some(thief.to_string());
        row.expires_at = Instant::now() + Duration::from_secs(3600);
    }

    fn held_by<'a>(
        state: &'a mut LeaseState,
        shard_id: &str,
        owner: &str,
    ) -> Result<&'a mut LeaseRow, CheckpointError> {
        match state.rows.get_mut(shard_id) {
            Some(row) if row.owner.as_deref() == Some(owner) => Ok(row),
            _ => Err(CheckpointError::LeaseLost(shard_id.to_string())),
        }
    }
}

#[async_trait]
impl LeaseStore for InMemoryLeaseStore {
    async fn try_acquire(
        &self,
        shard_id: &str,
        owner: &str,
        lease_duration: Duration,
    ) -> Result<Option<Lease>> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let row = state.rows.entry(shard_id.to_string()).or_insert(LeaseRow {
            owner: None,
            expires_at: now,
            checkpoint: None,
        });
        if row.checkpoint.as_deref() == Some(SHARD_END_CHECKPOINT) {
            return Ok(None);
        }
        let held_by_someone_else = row
            .owner
            .as_deref()
            .is_some_and(|current| current != owner && row.expires_at > now);
        if held_by_someone_else {
            return Ok(None);
        }
        row.owner = Some(owner.to_string());
        row.expires_at = now + lease_duration;
        Ok(Some(Lease {
            shard_id: shard_id.to_string(),
            checkpoint: row.checkpoint.clone(),
        }))
    }

    async fn renew(
        &self,
        shard_id: &str,
        owner: &str,
        lease_duration: Duration,
    ) -> Result<(), CheckpointError> {
        let mut state = self.state.lock().await;
        let row = Self::held_by(&mut state, shard_id, owner)?;
        row.expires_at = Instant::now() + lease_duration;
        Ok(())
    }

    async fn checkpoint(
        &self,
        shard_id: &str,
        owner: &str,
        sequence_number: &str,
    ) -> Result<(), CheckpointError> {
        let mut state = self.state.lock().await;
        state.checkpoint_attempts += 1;
        if state.throttles_remaining > 0 {
            state.throttles_remaining -= 1;
            return Err(CheckpointError::Throttled(format!(
                "lease table is busy, shard '{shard_id}'"
            )));
        }
        let row = Self::held_by(&mut state, shard_id, owner)?;
        // 📈 never move backwards. a stale checkpoint from a slow retry is a no-op.
        let is_forward = match row.checkpoint.as_deref() {
            Some(SHARD_END_CHECKPOINT) => false,
            Some(current) => sequence_number == SHARD_END_CHECKPOINT || sequence_number > current,
            None => true,
        };
        if is_forward {
            row.checkpoint = Some(sequence_number.to_string());
        }
        Ok(())
    }

    async fn release(&self, shard_id: &str, owner: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(row) = state.rows.get_mut(shard_id) {
            if row.owner.as_deref() == Some(owner) {
                row.owner = None;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn the_one_where_the_same_key_always_lands_on_the_same_shard() {
        let mut stream = InMemoryStream::new(4);
        for _ in 0..3 {
            stream
                .put_record("photos/cat.jpg", Bytes::from_static(b"{}"))
                .await
                .expect("put");
        }
        let mut holders = 0;
        for shard_id in stream.list_shards().await.expect("shards") {
            let records = stream.records(&shard_id).await;
            if !records.is_empty() {
                holders += 1;
                assert_eq!(records.len(), 3);
                assert!(records.windows(2).all(|w| w[0].sequence_number < w[1].sequence_number));
            }
        }
        assert_eq!(holders, 1);
    }

    #[tokio::test]
    async fn the_one_where_a_reader_resumes_after_its_checkpoint_and_sees_the_end() {
        let stream = InMemoryStream::new(1);
        let shard = shard_id_for(0);
        let first = stream
            .append_to_shard(&shard, Bytes::from_static(b"a"))
            .await
            .expect("append");
        stream
            .append_to_shard(&shard, Bytes::from_static(b"b"))
            .await
            .expect("append");

        let mut reader = stream
            .open_shard(&shard, ShardPosition::After(first))
            .await
            .expect("open");
        let batch = reader.next_batch().await.expect("read").expect("open shard");
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].data, Bytes::from_static(b"b"));
        assert_eq!(reader.next_batch().await.expect("read"), Some(Vec::new()));

        stream.close().await;
        assert_eq!(reader.next_batch().await.expect("read"), None);
    }

    #[tokio::test]
    async fn the_one_where_leases_cannot_be_double_booked() {
        let leases = InMemoryLeaseStore::new();
        let ttl = Duration::from_secs(60);
        assert!(leases.try_acquire("s-0", "w1", ttl).await.expect("acquire").is_some());
        assert!(leases.try_acquire("s-0", "w2", ttl).await.expect("acquire").is_none());

        leases.checkpoint("s-0", "w1", "0005").await.expect("checkpoint");
        leases.checkpoint("s-0", "w1", "0003").await.expect("stale checkpoint is a no-op");
        assert_eq!(leases.checkpoint_of("s-0").await.as_deref(), Some("0005"));

        leases.steal("s-0", "w2").await;
        assert_eq!(
            leases.checkpoint("s-0", "w1", "0006").await,
            Err(CheckpointError::LeaseLost("s-0".into()))
        );
    }

    #[tokio::test]
    async fn the_one_where_finished_shards_stay_finished() {
        let leases = InMemoryLeaseStore::new();
        let ttl = Duration::from_secs(60);
        leases.try_acquire("s-0", "w1", ttl).await.expect("acquire");
        leases
            .checkpoint("s-0", "w1", SHARD_END_CHECKPOINT)
            .await
            .expect("checkpoint");
        leases.release("s-0", "w1").await.expect("release");
        assert!(leases.try_acquire("s-0", "w2", ttl).await.expect("acquire").is_none());
    }
}
