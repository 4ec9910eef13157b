//! 🧑‍🏭 The shard consumer: one per leased shard, decodes records, copies objects,
//! checkpoints now and then, and notices when the scanner says "that's all, folks".
//!
//! 🎬 *[INT. SHARD 0007. a batch of records arrives. each one is a sticky note with a]*
//! *[key and a size. one of them says DRPS3-FinalMarker. the consumer raises an eyebrow.]*
//!
//! 🧠 Knowledge graph:
//! - states: `Initialized` → `Processing` → (`ShuttingDown`) → `Terminated`
//! - malformed record → counted, logged, dropped. Retrying a decode is just hoping harder.
//! - terminal marker → ask the [`LifecycleCoordinator`] to stop the worker, ONCE per
//!   consumer, then keep going with the rest of the batch.
//! - every other record → [`FileReplicator::copy`], run as its own task so a panic inside
//!   the copy is a retryable fault instead of a dead shard. The task is aborted if the
//!   consumer is dropped mid-copy (forced stop), so no copy outlives its shard.
//! - after each batch, if the checkpoint interval has elapsed (the first batch always
//!   qualifies): checkpoint, then heartbeat, retrying throttles only.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinError;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::common::{AbortOnDrop, ObjectDescriptor};
use crate::errors::{CheckpointError, SignalError};
use crate::lifecycle::LifecycleCoordinator;
use crate::progress::ReplicationStats;
use crate::replicator::{CopyOutcome, FileReplicator};
use crate::retry::RetryPolicy;
use crate::signal::TaskSignal;
use crate::stream::{Checkpointer, RecordProcessor, RecordProcessorFactory, ShutdownReason, StreamRecord};

/// 🔧 Timings for one consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerSettings {
    pub checkpoint_interval: Duration,
    pub checkpoint_retry: RetryPolicy,
    pub record_retry: RetryPolicy,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            checkpoint_interval: Duration::from_secs(60),
            checkpoint_retry: RetryPolicy::new(10, Duration::from_millis(3)),
            record_retry: RetryPolicy::new(10, Duration::from_secs(3)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Initialized,
    Processing,
    ShuttingDown,
    Terminated,
}

/// 🧯 One failed checkpoint attempt: either the store or the heartbeat said no.
#[derive(Debug, Clone, PartialEq, Eq)]
enum CheckpointFault {
    Store(CheckpointError),
    Signal(SignalError),
}

impl CheckpointFault {
    fn is_throttle(&self) -> bool {
        matches!(
            self,
            CheckpointFault::Store(CheckpointError::Throttled(_))
                | CheckpointFault::Signal(SignalError::Throttled(_))
        )
    }
}

impl fmt::Display for CheckpointFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckpointFault::Store(err) => write!(f, "{err}"),
            CheckpointFault::Signal(err) => write!(f, "{err}"),
        }
    }
}

/// 🧑‍🏭 Processes one shard. Never shared, never reused.
#[derive(Debug)]
pub struct ShardConsumer {
    shard_id: String,
    state: ConsumerState,
    replicator: FileReplicator,
    signal: TaskSignal,
    lifecycle: LifecycleCoordinator,
    settings: ConsumerSettings,
    stats: ReplicationStats,
    shutdown_requested: bool,
    last_checkpoint: Option<Instant>,
}

impl ShardConsumer {
    pub fn new(
        replicator: FileReplicator,
        signal: TaskSignal,
        lifecycle: LifecycleCoordinator,
        settings: ConsumerSettings,
        stats: ReplicationStats,
    ) -> Self {
        Self {
            shard_id: String::new(),
            state: ConsumerState::Initialized,
            replicator,
            signal,
            lifecycle,
            settings,
            stats,
            shutdown_requested: false,
            last_checkpoint: None,
        }
    }

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    fn request_shutdown_once(&mut self, why: &str) {
        if self.shutdown_requested {
            debug!("🔁 [{}] {why}, but shutdown was already requested", self.shard_id);
            return;
        }
        self.shutdown_requested = true;
        info!("🏁 [{}] {why}: asking the worker to shut down", self.shard_id);
        // -- 🚀 fire and forget. the coordinator owns the rest of this story.
        drop(self.lifecycle.request_shutdown());
    }

    /// 🔁 Copy one object, retrying only if the copy task itself blew up.
    async fn replicate(&self, descriptor: ObjectDescriptor) {
        let the_key = descriptor.key.clone();
        let the_result = self
            .settings
            .record_retry
            .run(
                &format!("copy of '{the_key}'"),
                |_| {
                    let replicator = self.replicator.clone();
                    let descriptor = descriptor.clone();
                    async move {
                        let the_copy = tokio::spawn(async move { replicator.copy(&descriptor).await });
                        // -- a forced stop drops this future; the copy must go down with it
                        let _abort_on_drop = AbortOnDrop::new(the_copy.abort_handle());
                        the_copy.await
                    }
                },
                |join_err: &JoinError| join_err.is_panic(),
            )
            .await;
        match the_result {
            Ok(CopyOutcome::Failed) => warn!("📦 [{}] '{the_key}' was not copied", self.shard_id),
            Ok(outcome) => debug!("📦 [{}] '{the_key}': {outcome:?}", self.shard_id),
            Err(join_err) => {
                error!("💀 [{}] copy of '{the_key}' kept crashing: {join_err}", self.shard_id);
                self.stats.record_failed();
            }
        }
    }

    fn checkpoint_due(&self) -> bool {
        self.last_checkpoint
            .is_none_or(|at| at.elapsed() >= self.settings.checkpoint_interval)
    }

    /// 💾 Checkpoint, then heartbeat, as one retried unit.
    async fn checkpoint(&mut self, checkpointer: &dyn Checkpointer) {
        let the_signal = &self.signal;
        let the_result = self
            .settings
            .checkpoint_retry
            .run(
                &format!("checkpoint of {}", self.shard_id),
                |_| async move {
                    checkpointer.checkpoint().await.map_err(CheckpointFault::Store)?;
                    the_signal.heartbeat().await.map_err(CheckpointFault::Signal)
                },
                CheckpointFault::is_throttle,
            )
            .await;
        self.last_checkpoint = Some(Instant::now());

        match the_result {
            Ok(()) => debug!("💾 [{}] checkpointed", self.shard_id),
            Err(CheckpointFault::Store(CheckpointError::LeaseLost(_))) => {
                // -- 🧟 someone else owns the shard now. the worker will notice and retire us.
                info!("🧟 [{}] lease is gone; not checkpointing", self.shard_id);
            }
            Err(CheckpointFault::Signal(SignalError::Expired(reason))) => {
                warn!("⏰ [{}] orchestrator forgot about us: {reason}", self.shard_id);
                self.request_shutdown_once("orchestration task expired");
            }
            Err(fault) if fault.is_throttle() => {
                warn!("🐢 [{}] still throttled after all retries; will try next interval", self.shard_id);
            }
            Err(fault) => error!("💀 [{}] checkpoint abandoned until next interval: {fault}", self.shard_id),
        }
    }
}

#[async_trait]
impl RecordProcessor for ShardConsumer {
    async fn initialize(&mut self, shard_id: &str) {
        self.shard_id = shard_id.to_string();
        self.state = ConsumerState::Processing;
        info!("🧑‍🏭 [{shard_id}] consumer ready");
    }

    async fn process_records(&mut self, records: Vec<StreamRecord>, checkpointer: &dyn Checkpointer) {
        debug!("📨 [{}] batch of {} record(s)", self.shard_id, records.len());
        for record in records {
            let descriptor = match ObjectDescriptor::decode(&record.data) {
                Ok(descriptor) => descriptor,
                Err(err) => {
                    warn!(
                        "🗑️ [{}] dropping malformed record {}: {err:#}",
                        self.shard_id, record.sequence_number
                    );
                    self.stats.record_malformed();
                    continue;
                }
            };
            if descriptor.is_terminal() {
                self.request_shutdown_once("final marker reached");
                continue;
            }
            self.replicate(descriptor).await;
        }

        if self.checkpoint_due() {
            self.checkpoint(checkpointer).await;
        }
    }

    async fn shutdown(&mut self, reason: ShutdownReason, checkpointer: &dyn Checkpointer) {
        self.state = ConsumerState::ShuttingDown;
        match reason {
            ShutdownReason::ShardEnd | ShutdownReason::Requested => {
                info!("🏁 [{}] shutting down ({reason:?}); final checkpoint", self.shard_id);
                self.checkpoint(checkpointer).await;
            }
            ShutdownReason::Zombie => {
                info!("🧟 [{}] shutting down as a zombie; hands off the checkpoint", self.shard_id);
            }
        }
        self.state = ConsumerState::Terminated;
    }
}

/// 🏭 Hands every leased shard its own [`ShardConsumer`].
#[derive(Debug, Clone)]
pub struct ShardConsumerFactory {
    replicator: FileReplicator,
    signal: TaskSignal,
    lifecycle: LifecycleCoordinator,
    settings: ConsumerSettings,
    stats: ReplicationStats,
}

impl ShardConsumerFactory {
    pub fn new(
        replicator: FileReplicator,
        signal: TaskSignal,
        lifecycle: LifecycleCoordinator,
        settings: ConsumerSettings,
        stats: ReplicationStats,
    ) -> Self {
        Self {
            replicator,
            signal,
            lifecycle,
            settings,
            stats,
        }
    }
}

impl RecordProcessorFactory for ShardConsumerFactory {
    type Processor = ShardConsumer;

    fn create_processor(&self) -> ShardConsumer {
        ShardConsumer::new(
            self.replicator.clone(),
            self.signal.clone(),
            self.lifecycle.clone(),
            self.settings,
            self.stats.clone(),
        )
    }
}
