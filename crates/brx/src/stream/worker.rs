//! 🧵 The stream worker: leases shards, runs one processor per shard, and knows how to stop.
//!
//! 🎬 *[a foreman with a clipboard. each shard gets exactly one laborer.]*
//! *[the laborer works the shard front to back. no skipping ahead. no sharing.]*
//!
//! 🧠 Knowledge graph:
//! - the main loop lists shards, tries to lease the ones it isn't already working, and
//!   spawns a task per lease into a `JoinSet`. It re-lists every `shard_refresh_interval`.
//! - a shard task is strictly sequential: fetch batch → `process_records` → fetch again.
//!   Nothing is fetched while records (or a checkpoint) are still in flight.
//! - the lease is renewed by a sidecar task on its own timer, so a batch can take as long
//!   as it likes. A lost lease ends the shard task as a zombie after the current batch.
//! - graceful stop: no new leases; each shard task finishes its current batch, calls
//!   `shutdown(Requested)`, releases its lease. When every task is done the worker
//!   resolves every waiter handed out by [`WorkerHandle::start_graceful_shutdown`].
//! - forced stop: `JoinSet::abort_all()`. Mid-copy or not, everybody goes home now.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, info, warn};

use crate::common::AbortOnDrop;
use crate::errors::CheckpointError;
use crate::stream::{
    Checkpointer, LeaseStore, LeaseStoreBackend, RecordProcessor, RecordProcessorFactory,
    SHARD_END_CHECKPOINT, ShardPosition, ShardReader, ShardSource, ShardSourceBackend,
    ShutdownReason,
};

/// 🔧 Knobs for the shard-leasing loop.
#[derive(Debug, Clone)]
pub struct StreamWorkerConfig {
    pub worker_id: String,
    /// 😴 Pause after an empty `next_batch`.
    pub poll_interval: Duration,
    pub lease_duration: Duration,
    /// 🗺️ How often to look for new (or newly free) shards.
    pub shard_refresh_interval: Duration,
}

impl StreamWorkerConfig {
    /// 🪪 `brx-worker-<host>-<uuid>`: unique even when two workers share a host.
    pub fn generate_worker_id() -> String {
        let the_host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        format!("brx-worker-{the_host}-{}", uuid::Uuid::new_v4())
    }
}

/// 🛑 The two buttons on the side of a running worker.
pub trait WorkerControl: std::fmt::Debug + Send + Sync {
    /// 🙋 Ask for a graceful stop. Returns a fresh one-shot that resolves once the worker
    /// has fully stopped (immediately, if it already has). Never blocks.
    fn start_graceful_shutdown(&self) -> oneshot::Receiver<()>;

    /// 🔌 Pull the plug.
    fn shutdown_now(&self);
}

#[derive(Debug, Default)]
struct Completion {
    finished: bool,
    waiters: Vec<oneshot::Sender<()>>,
}

#[derive(Debug)]
struct HandleInner {
    graceful: watch::Sender<bool>,
    force: watch::Sender<bool>,
    completion: Mutex<Completion>,
}

/// 🎛️ A cloneable remote control for one [`StreamWorker`]. Exists before the worker
/// starts, so record processors can be handed a way to stop the very worker running them.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    inner: Arc<HandleInner>,
}

impl Default for WorkerHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerHandle {
    pub fn new() -> Self {
        let (graceful, _) = watch::channel(false);
        let (force, _) = watch::channel(false);
        Self {
            inner: Arc::new(HandleInner {
                graceful,
                force,
                completion: Mutex::new(Completion::default()),
            }),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.lock_completion().finished
    }

    fn lock_completion(&self) -> std::sync::MutexGuard<'_, Completion> {
        self.inner
            .completion
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// 🏁 The worker is fully stopped: wake every waiter, and every future waiter too.
    pub(crate) fn mark_finished(&self) {
        let mut completion = self.lock_completion();
        completion.finished = true;
        for waiter in completion.waiters.drain(..) {
            // -- 🤷 a waiter that stopped listening doesn't need to hear about it
            let _ = waiter.send(());
        }
    }

    fn subscribe_graceful(&self) -> watch::Receiver<bool> {
        self.inner.graceful.subscribe()
    }

    fn subscribe_force(&self) -> watch::Receiver<bool> {
        self.inner.force.subscribe()
    }
}

impl WorkerControl for WorkerHandle {
    fn start_graceful_shutdown(&self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        {
            let mut completion = self.lock_completion();
            if completion.finished {
                let _ = tx.send(());
            } else {
                completion.waiters.push(tx);
            }
        }
        self.inner.graceful.send_replace(true);
        rx
    }

    fn shutdown_now(&self) {
        self.inner.graceful.send_replace(true);
        self.inner.force.send_replace(true);
    }
}

/// 💾 Checkpoints one shard at "the last record handed to the processor".
#[derive(Debug)]
pub(crate) struct ShardCheckpointer {
    shard_id: String,
    owner: String,
    leases: LeaseStoreBackend,
    position: Mutex<Option<String>>,
}

impl ShardCheckpointer {
    fn new(shard_id: &str, owner: &str, leases: LeaseStoreBackend) -> Self {
        Self {
            shard_id: shard_id.to_string(),
            owner: owner.to_string(),
            leases,
            position: Mutex::new(None),
        }
    }

    fn advance_to(&self, sequence_number: &str) {
        *self.position.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(sequence_number.to_string());
    }
}

#[async_trait]
impl Checkpointer for ShardCheckpointer {
    async fn checkpoint(&self) -> Result<(), CheckpointError> {
        let the_position = self
            .position
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match the_position {
            Some(sequence_number) => {
                self.leases
                    .checkpoint(&self.shard_id, &self.owner, &sequence_number)
                    .await
            }
            // -- 🤷 nothing delivered yet, nothing to persist
            None => Ok(()),
        }
    }
}

/// 🧵 Leases shards and drives a [`RecordProcessor`] over each one.
#[derive(Debug)]
pub struct StreamWorker<F> {
    config: StreamWorkerConfig,
    source: ShardSourceBackend,
    leases: LeaseStoreBackend,
    factory: Arc<F>,
    handle: WorkerHandle,
}

impl<F: RecordProcessorFactory> StreamWorker<F> {
    pub fn new(
        config: StreamWorkerConfig,
        source: ShardSourceBackend,
        leases: LeaseStoreBackend,
        factory: F,
        handle: WorkerHandle,
    ) -> Self {
        Self {
            config,
            source,
            leases,
            factory: Arc::new(factory),
            handle,
        }
    }

    pub fn handle(&self) -> WorkerHandle {
        self.handle.clone()
    }

    /// 🚀 Run until stopped. Waiters on the handle are resolved on every exit path.
    pub async fn run(self) -> Result<()> {
        let the_handle = self.handle.clone();
        let the_result = self.run_inner().await;
        the_handle.mark_finished();
        the_result
    }

    async fn run_inner(self) -> Result<()> {
        info!("🧵 Stream worker {} reporting for duty", self.config.worker_id);
        let mut graceful = self.handle.subscribe_graceful();
        let mut force = self.handle.subscribe_force();
        let mut shards: JoinSet<String> = JoinSet::new();
        let mut active: HashSet<String> = HashSet::new();

        loop {
            if *force.borrow_and_update() {
                break;
            }
            let is_stopping = *graceful.borrow_and_update();
            if is_stopping && active.is_empty() {
                break;
            }
            if !is_stopping {
                self.lease_new_shards(&mut shards, &mut active).await;
            }

            tokio::select! {
                _ = graceful.changed() => {}
                _ = force.changed() => {}
                Some(joined) = shards.join_next(), if !shards.is_empty() => {
                    match joined {
                        Ok(shard_id) => {
                            debug!("🏁 Shard task for {shard_id} is done");
                            active.remove(&shard_id);
                        }
                        // -- panics are caught inside the task, so only cancellation lands here
                        Err(join_err) => debug!("🪦 Shard task cancelled: {join_err}"),
                    }
                }
                _ = tokio::time::sleep(self.config.shard_refresh_interval) => {}
            }
        }

        if *force.borrow() {
            warn!("🔌 Forced stop: aborting {} shard task(s)", shards.len());
            shards.abort_all();
        }
        while shards.join_next().await.is_some() {}
        info!("👋 Stream worker {} clocked out", self.config.worker_id);
        Ok(())
    }

    async fn lease_new_shards(&self, shards: &mut JoinSet<String>, active: &mut HashSet<String>) {
        let the_shard_ids = match self.source.list_shards().await {
            Ok(ids) => ids,
            Err(err) => {
                warn!("🗺️ Could not list shards, will try again: {err:#}");
                return;
            }
        };
        for shard_id in the_shard_ids {
            if active.contains(&shard_id) {
                continue;
            }
            let the_lease = self
                .leases
                .try_acquire(&shard_id, &self.config.worker_id, self.config.lease_duration)
                .await;
            match the_lease {
                Ok(Some(lease)) => {
                    info!("🎟️ Leased {shard_id}, resuming after {:?}", lease.checkpoint);
                    active.insert(shard_id.clone());
                    let the_task = ShardTask {
                        shard_id: shard_id.clone(),
                        position: ShardPosition::from_checkpoint(lease.checkpoint),
                        config: self.config.clone(),
                        source: self.source.clone(),
                        leases: self.leases.clone(),
                        processor: self.factory.create_processor(),
                        graceful: self.handle.subscribe_graceful(),
                    };
                    let the_shard_id = shard_id;
                    shards.spawn(async move {
                        match AssertUnwindSafe(the_task.run()).catch_unwind().await {
                            Ok(shard_id) => shard_id,
                            Err(_) => {
                                error!("💀 Shard task for {the_shard_id} panicked. The lease will expire and be retaken.");
                                the_shard_id
                            }
                        }
                    });
                }
                Ok(None) => {}
                Err(err) => warn!("🎟️ Lease attempt on {shard_id} failed: {err:#}"),
            }
        }
    }
}

/// 👷 Everything one shard task owns.
struct ShardTask<P> {
    shard_id: String,
    position: ShardPosition,
    config: StreamWorkerConfig,
    source: ShardSourceBackend,
    leases: LeaseStoreBackend,
    processor: P,
    graceful: watch::Receiver<bool>,
}

impl<P: RecordProcessor> ShardTask<P> {
    /// Returns the shard id so the main loop knows which slot opened up.
    async fn run(mut self) -> String {
        let the_checkpointer =
            ShardCheckpointer::new(&self.shard_id, &self.config.worker_id, self.leases.clone());
        let the_reason = match self.work(&the_checkpointer).await {
            Ok(reason) => reason,
            Err(err) => {
                error!("💀 Shard {} stopped reading: {err:#}", self.shard_id);
                ShutdownReason::Requested
            }
        };
        if the_reason == ShutdownReason::ShardEnd {
            the_checkpointer.advance_to(SHARD_END_CHECKPOINT);
        }
        self.processor.shutdown(the_reason, &the_checkpointer).await;

        if the_reason != ShutdownReason::Zombie {
            if let Err(err) = self.leases.release(&self.shard_id, &self.config.worker_id).await {
                warn!("🎟️ Could not release lease on {}: {err:#}", self.shard_id);
            }
        }
        self.shard_id
    }

    async fn work(&mut self, checkpointer: &ShardCheckpointer) -> Result<ShutdownReason> {
        self.processor.initialize(&self.shard_id).await;
        let mut the_reader = self
            .source
            .open_shard(&self.shard_id, self.position.clone())
            .await
            .context(format!("💀 Could not open shard {}", self.shard_id))?;
        // -- dropped (and aborted) on every way out of here, before the lease is released
        let (_lease_keeper, mut lost) = LeaseKeeper::spawn(
            self.shard_id.clone(),
            self.config.worker_id.clone(),
            self.leases.clone(),
            self.config.lease_duration,
        );

        loop {
            if *lost.borrow_and_update() {
                warn!("🧟 Lost the lease on {}. Standing down.", self.shard_id);
                return Ok(ShutdownReason::Zombie);
            }
            if *self.graceful.borrow_and_update() {
                return Ok(ShutdownReason::Requested);
            }

            match the_reader.next_batch().await {
                Ok(Some(records)) if !records.is_empty() => {
                    if let Some(last) = records.last() {
                        checkpointer.advance_to(&last.sequence_number);
                    }
                    self.processor.process_records(records, checkpointer).await;
                }
                Ok(Some(_)) => self.idle(&mut lost).await,
                Ok(None) => return Ok(ShutdownReason::ShardEnd),
                Err(err) => {
                    warn!("📖 Reading {} failed, will retry: {err:#}", self.shard_id);
                    self.idle(&mut lost).await;
                }
            }
        }
    }

    /// 😴 Wait one poll interval, or less if someone asks us to stop.
    async fn idle(&mut self, lost: &mut watch::Receiver<bool>) {
        tokio::select! {
            _ = tokio::time::sleep(self.config.poll_interval) => {}
            _ = self.graceful.changed() => {}
            _ = lost.changed() => {}
        }
    }
}

/// 🎟️ Renews one shard's lease every third of its duration, on its own task, so a batch
/// that runs for hours never lets the lease lapse under it. Flips `lost` and quits the
/// moment the store says somebody else owns the shard.
struct LeaseKeeper {
    _task: AbortOnDrop,
}

impl LeaseKeeper {
    fn spawn(
        shard_id: String,
        owner: String,
        leases: LeaseStoreBackend,
        lease_duration: Duration,
    ) -> (Self, watch::Receiver<bool>) {
        let (lost_tx, lost_rx) = watch::channel(false);
        let the_renew_every = (lease_duration / 3).max(Duration::from_millis(1));
        let the_task = tokio::spawn(async move {
            let mut the_ticker = interval_at(Instant::now() + the_renew_every, the_renew_every);
            the_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                the_ticker.tick().await;
                match leases.renew(&shard_id, &owner, lease_duration).await {
                    Ok(()) => debug!("🎟️ Renewed lease on {shard_id}"),
                    Err(CheckpointError::LeaseLost(_)) => {
                        lost_tx.send_replace(true);
                        return;
                    }
                    Err(err) => warn!("🎟️ Lease renewal on {shard_id} hiccuped: {err}"),
                }
            }
        });
        let the_keeper = Self {
            _task: AbortOnDrop::new(the_task.abort_handle()),
        };
        (the_keeper, lost_rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{InMemoryLeaseStore, InMemoryStream, StreamRecord};
    use bytes::Bytes;

    #[derive(Debug, Default, Clone)]
    struct Journal {
        events: Arc<Mutex<Vec<String>>>,
    }

    impl Journal {
        fn push(&self, event: String) {
            self.events.lock().expect("journal").push(event);
        }

        fn events(&self) -> Vec<String> {
            self.events.lock().expect("journal").clone()
        }
    }

    struct JournalingProcessor {
        journal: Journal,
        stop_on: Option<(Vec<u8>, WorkerHandle)>,
    }

    #[async_trait]
    impl RecordProcessor for JournalingProcessor {
        async fn initialize(&mut self, shard_id: &str) {
            self.journal.push(format!("init {shard_id}"));
        }

        async fn process_records(&mut self, records: Vec<StreamRecord>, checkpointer: &dyn Checkpointer) {
            for record in records {
                self.journal
                    .push(format!("record {}", String::from_utf8_lossy(&record.data)));
                if let Some((trigger, handle)) = &self.stop_on {
                    if record.data.as_ref() == trigger.as_slice() {
                        let _ = handle.start_graceful_shutdown();
                    }
                }
            }
            checkpointer.checkpoint().await.expect("checkpoint");
        }

        async fn shutdown(&mut self, reason: ShutdownReason, checkpointer: &dyn Checkpointer) {
            self.journal.push(format!("shutdown {reason:?}"));
            if reason != ShutdownReason::Zombie {
                checkpointer.checkpoint().await.expect("final checkpoint");
            }
        }
    }

    struct JournalingFactory {
        journal: Journal,
        stop_on: Option<(Vec<u8>, WorkerHandle)>,
    }

    impl RecordProcessorFactory for JournalingFactory {
        type Processor = JournalingProcessor;

        fn create_processor(&self) -> JournalingProcessor {
            JournalingProcessor {
                journal: self.journal.clone(),
                stop_on: self.stop_on.clone(),
            }
        }
    }

    fn quick_config() -> StreamWorkerConfig {
        StreamWorkerConfig {
            worker_id: "w-test".into(),
            poll_interval: Duration::from_millis(5),
            lease_duration: Duration::from_secs(60),
            shard_refresh_interval: Duration::from_millis(20),
        }
    }

    #[tokio::test]
    async fn the_one_where_a_closed_shard_is_read_to_the_end_and_checkpointed() {
        let stream = InMemoryStream::new(1);
        for n in 0..3 {
            stream
                .append_to_shard("shardId-000000000000", Bytes::from(format!("r{n}")))
                .await
                .expect("append");
        }
        stream.close().await;
        let leases = InMemoryLeaseStore::new();
        let journal = Journal::default();
        let handle = WorkerHandle::new();
        let worker = StreamWorker::new(
            quick_config(),
            ShardSourceBackend::InMemory(stream),
            LeaseStoreBackend::InMemory(leases.clone()),
            JournalingFactory {
                journal: journal.clone(),
                stop_on: None,
            },
            handle.clone(),
        );
        let running = tokio::spawn(worker.run());

        // 🔁 the shard ends on its own; then ask the worker to stop
        tokio::time::timeout(Duration::from_secs(5), async {
            while !journal.events().contains(&"shutdown ShardEnd".to_string()) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("shard end observed");
        let done = handle.start_graceful_shutdown();
        tokio::time::timeout(Duration::from_secs(5), done)
            .await
            .expect("stopped in time")
            .expect("completion signal");
        running.await.expect("join").expect("worker ok");

        assert_eq!(
            journal.events(),
            vec!["init shardId-000000000000", "record r0", "record r1", "record r2", "shutdown ShardEnd"]
        );
        assert_eq!(
            leases.checkpoint_of("shardId-000000000000").await.as_deref(),
            Some(SHARD_END_CHECKPOINT)
        );
        assert!(handle.is_finished());
    }

    #[tokio::test]
    async fn the_one_where_a_processor_stops_its_own_worker() {
        let stream = InMemoryStream::new(1);
        for payload in ["a", "stop", "b"] {
            stream
                .append_to_shard("shardId-000000000000", Bytes::from(payload))
                .await
                .expect("append");
        }
        let leases = InMemoryLeaseStore::new();
        let journal = Journal::default();
        let handle = WorkerHandle::new();
        let worker = StreamWorker::new(
            quick_config(),
            ShardSourceBackend::InMemory(stream),
            LeaseStoreBackend::InMemory(leases.clone()),
            JournalingFactory {
                journal: journal.clone(),
                stop_on: Some((b"stop".to_vec(), handle.clone())),
            },
            handle.clone(),
        );

        tokio::time::timeout(Duration::from_secs(5), worker.run())
            .await
            .expect("worker stops by itself")
            .expect("worker ok");

        let events = journal.events();
        // ✅ the rest of the batch still ran, then the graceful shutdown checkpointed
        assert!(events.contains(&"record b".to_string()));
        assert_eq!(events.last().map(String::as_str), Some("shutdown Requested"));
        assert!(leases.checkpoint_of("shardId-000000000000").await.is_some());
        assert_eq!(leases.owner_of("shardId-000000000000").await, None);
    }

    #[tokio::test]
    async fn the_one_where_a_stolen_lease_turns_the_processor_into_a_zombie() {
        let stream = InMemoryStream::new(1);
        let leases = InMemoryLeaseStore::new();
        let journal = Journal::default();
        let handle = WorkerHandle::new();
        let mut config = quick_config();
        // ⏱️ renew every 10ms so the theft is noticed quickly
        config.lease_duration = Duration::from_millis(30);
        let worker = StreamWorker::new(
            config,
            ShardSourceBackend::InMemory(stream),
            LeaseStoreBackend::InMemory(leases.clone()),
            JournalingFactory {
                journal: journal.clone(),
                stop_on: None,
            },
            handle.clone(),
        );
        let running = tokio::spawn(worker.run());

        tokio::time::timeout(Duration::from_secs(5), async {
            while leases.owner_of("shardId-000000000000").await.is_none() {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("leased");
        leases.steal("shardId-000000000000", "w-other").await;

        tokio::time::timeout(Duration::from_secs(5), async {
            while !journal.events().contains(&"shutdown Zombie".to_string()) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("zombie shutdown observed");

        handle.shutdown_now();
        running.await.expect("join").expect("worker ok");
        assert_eq!(leases.owner_of("shardId-000000000000").await.as_deref(), Some("w-other"));
    }

    /// 🐌 Takes its sweet time over every batch, like a chunked copy of a huge object.
    struct DawdlingProcessor {
        batch_time: Duration,
        journal: Journal,
    }

    #[async_trait]
    impl RecordProcessor for DawdlingProcessor {
        async fn initialize(&mut self, _shard_id: &str) {}

        async fn process_records(&mut self, records: Vec<StreamRecord>, _checkpointer: &dyn Checkpointer) {
            self.journal.push(format!("batch of {}", records.len()));
            tokio::time::sleep(self.batch_time).await;
            self.journal.push("batch done".to_string());
        }

        async fn shutdown(&mut self, reason: ShutdownReason, _checkpointer: &dyn Checkpointer) {
            self.journal.push(format!("shutdown {reason:?}"));
        }
    }

    struct DawdlingFactory {
        batch_time: Duration,
        journal: Journal,
    }

    impl RecordProcessorFactory for DawdlingFactory {
        type Processor = DawdlingProcessor;

        fn create_processor(&self) -> DawdlingProcessor {
            DawdlingProcessor {
                batch_time: self.batch_time,
                journal: self.journal.clone(),
            }
        }
    }

    #[tokio::test]
    async fn the_one_where_a_long_batch_keeps_its_lease_the_whole_time() {
        let stream = InMemoryStream::new(1);
        stream
            .append_to_shard("shardId-000000000000", Bytes::from("huge.bin"))
            .await
            .expect("append");
        let leases = InMemoryLeaseStore::new();
        let journal = Journal::default();
        let handle = WorkerHandle::new();
        let mut config = quick_config();
        // ⏱️ the batch outlives the lease several times over
        config.worker_id = "w-a".into();
        config.lease_duration = Duration::from_millis(60);
        let worker = StreamWorker::new(
            config,
            ShardSourceBackend::InMemory(stream),
            LeaseStoreBackend::InMemory(leases.clone()),
            DawdlingFactory {
                batch_time: Duration::from_millis(400),
                journal: journal.clone(),
            },
            handle.clone(),
        );
        let running = tokio::spawn(worker.run());

        tokio::time::timeout(Duration::from_secs(5), async {
            while !journal.events().contains(&"batch of 1".to_string()) {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("batch started");
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(!journal.events().contains(&"batch done".to_string()));
        let the_rival = leases
            .try_acquire("shardId-000000000000", "w-b", Duration::from_millis(60))
            .await
            .expect("lease store answers");
        assert!(the_rival.is_none(), "a second worker took a shard that was mid-batch");
        assert_eq!(leases.owner_of("shardId-000000000000").await.as_deref(), Some("w-a"));

        let done = handle.start_graceful_shutdown();
        tokio::time::timeout(Duration::from_secs(5), done)
            .await
            .expect("stopped in time")
            .expect("completion signal");
        running.await.expect("join").expect("worker ok");
        assert_eq!(journal.events().last().map(String::as_str), Some("shutdown Requested"));
    }

    #[tokio::test]
    async fn the_one_where_late_waiters_hear_the_news_immediately() {
        let handle = WorkerHandle::new();
        handle.mark_finished();
        tokio::time::timeout(Duration::from_millis(100), handle.start_graceful_shutdown())
            .await
            .expect("resolved immediately")
            .expect("sent");
    }
}
