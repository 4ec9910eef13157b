//! 🎬 *[camera pans across a dimly lit server room]*
//! 🎬 "In a world where buckets must cross oceans..."
//! 🎬 "One supervisor dared to wire them all."
//! 🎬 *[record scratch]* 🦆
//!
//! 📦 The Supervisor module — part middle manager, part switchboard operator.
//! Every backend, every worker, every consumer gets built here, by explicit factory
//! functions that take config structs and nothing else. No globals. No registries.
//! If you want to know where something came from, it came from here.
//!
//! ⚠️ DO NOT MAKE THIS PUB EVER
//! 💀 WORKERS ARE SUPERVISORS PRIVATE LITTLE MINIONS WHOM THE WORLD FORGOT ABOUT

mod scanner;
mod workers;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::app_config::{AppConfig, JobConfig, RuntimeConfig, StreamConfig};
use crate::backends::{ObjectStoreBackend, S3ObjectStore, S3StoreConfig, load_aws_config};
use crate::common::SharedJob;
use crate::consumer::ShardConsumerFactory;
use crate::lifecycle::LifecycleCoordinator;
use crate::progress::{ReplicationStats, StatsSnapshot, render_summary};
use crate::replicator::{FileReplicator, ReplicatorLimits};
use crate::signal::{RecordingSignal, SignalBackend, StepFunctionsSignal, TaskSignal};
use crate::stream::{
    DynamoLeaseStore, InMemoryLeaseStore, InMemoryStream, KinesisProducer, KinesisShardSource,
    LeaseStoreBackend, ProducerBackend, ShardSourceBackend, StreamWorker, StreamWorkerConfig,
    WorkerControl, WorkerHandle, kinesis,
};
use scanner::Scanner;

/// 🎛️ What this process is here to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// 🔭 List the source bucket onto the stream, then exit.
    Scan,
    /// 🧑‍🏭 Consume the stream until the final marker (or an expired task) stops us.
    Replicate,
    /// 🎪 Both, in one process.
    All,
}

// ============================================================
//  🏭 factories
// ============================================================

/// 🪣 One S3-backed object store.
pub(crate) async fn new_object_store(config: &S3StoreConfig) -> ObjectStoreBackend {
    ObjectStoreBackend::S3(S3ObjectStore::new(config).await)
}

/// 📣 The orchestration signal for this job. No token means nothing will ever be sent,
/// so no Step Functions client gets built either.
pub(crate) async fn new_task_signal(job: &JobConfig) -> TaskSignal {
    let the_backend = match &job.task_token {
        Some(_) => SignalBackend::StepFunctions(StepFunctionsSignal::new(job.orchestration_region()).await),
        None => SignalBackend::Recording(RecordingSignal::new()),
    };
    TaskSignal::new(the_backend, job.task_token.clone())
}

/// 🌊 Producer, shard source, and lease store of one stream, built together.
#[derive(Debug)]
pub(crate) struct Transport {
    pub(crate) producer: ProducerBackend,
    pub(crate) shards: ShardSourceBackend,
    pub(crate) leases: LeaseStoreBackend,
}

impl Transport {
    pub(crate) fn in_memory(stream: InMemoryStream) -> Self {
        Self {
            producer: ProducerBackend::InMemory(stream.clone()),
            shards: ShardSourceBackend::InMemory(stream),
            leases: LeaseStoreBackend::InMemory(InMemoryLeaseStore::new()),
        }
    }
}

pub(crate) async fn new_transport(stream: &StreamConfig, job: &JobConfig) -> Transport {
    match stream {
        StreamConfig::InMemory(config) => Transport::in_memory(InMemoryStream::new(config.shard_count)),
        StreamConfig::Kinesis(config) => {
            let the_kinesis = kinesis::kinesis_client(config, &job.source_region).await;
            let the_region = config.region.as_deref().unwrap_or(&job.source_region);
            let the_dynamo_config = load_aws_config(the_region, config.endpoint_url.as_deref()).await;
            let the_dynamo = aws_sdk_dynamodb::Client::new(&the_dynamo_config);
            Transport {
                producer: ProducerBackend::Kinesis(KinesisProducer::new(
                    the_kinesis.clone(),
                    config.stream_name.as_str(),
                )),
                shards: ShardSourceBackend::Kinesis(KinesisShardSource::new(
                    the_kinesis,
                    config.stream_name.as_str(),
                    config.batch_limit,
                )),
                leases: LeaseStoreBackend::DynamoDb(DynamoLeaseStore::new(
                    the_dynamo,
                    config.lease_table_name(),
                )),
            }
        }
    }
}

// ============================================================
//  🧩 the assembled pipeline
// ============================================================

/// 🧩 Everything one job needs, already built. The factories above make one from config;
/// tests make one from in-memory parts.
#[derive(Debug)]
pub(crate) struct Pipeline {
    job: SharedJob,
    runtime: RuntimeConfig,
    source: ObjectStoreBackend,
    target: ObjectStoreBackend,
    transport: Transport,
    signal: TaskSignal,
    limits: ReplicatorLimits,
}

/// 🏃 A stream worker that is already running.
struct RunningWorker {
    handle: WorkerHandle,
    task: JoinHandle<Result<()>>,
    stats: ReplicationStats,
    started: Instant,
}

impl Pipeline {
    pub(crate) fn new(
        job: SharedJob,
        runtime: RuntimeConfig,
        source: ObjectStoreBackend,
        target: ObjectStoreBackend,
        transport: Transport,
        signal: TaskSignal,
    ) -> Self {
        Self {
            job,
            runtime,
            source,
            target,
            transport,
            signal,
            limits: ReplicatorLimits::default(),
        }
    }

    pub(crate) fn with_limits(mut self, limits: ReplicatorLimits) -> Self {
        self.limits = limits;
        self
    }

    /// 🔭 Scan only.
    pub(crate) async fn scan(self) -> Result<u64> {
        Scanner::new(
            self.source,
            self.transport.producer,
            self.job.source_bucket.as_str(),
            self.runtime.queue_capacity,
        )
        .scan()
        .await
    }

    /// 🧑‍🏭 Replicate until stopped, then report the job outcome exactly once.
    pub(crate) async fn replicate(self) -> Result<StatsSnapshot> {
        let the_worker = self.launch_worker();
        let the_result = Self::join_worker(the_worker.task).await;
        Self::finish(&self.signal, the_result, &the_worker.stats, the_worker.started).await
    }

    /// 🎪 Scan and replicate side by side. A failed scan stops the worker gracefully and
    /// fails the job: without the final marker nothing would ever tell it to stop.
    pub(crate) async fn run_all(self) -> Result<StatsSnapshot> {
        let the_worker = self.launch_worker();
        let the_scanner = Scanner::new(
            self.source,
            self.transport.producer,
            self.job.source_bucket.as_str(),
            self.runtime.queue_capacity,
        );

        let the_result = match the_scanner.scan().await {
            Ok(_) => Self::join_worker(the_worker.task).await,
            Err(scan_err) => {
                error!("💀 Scan failed; stopping the worker: {scan_err:#}");
                drop(the_worker.handle.start_graceful_shutdown());
                if let Err(worker_err) = Self::join_worker(the_worker.task).await {
                    warn!("🧵 Worker also failed while stopping: {worker_err:#}");
                }
                Err(scan_err)
            }
        };
        Self::finish(&self.signal, the_result, &the_worker.stats, the_worker.started).await
    }

    fn launch_worker(&self) -> RunningWorker {
        let the_stats = ReplicationStats::new();
        let the_handle = WorkerHandle::new();
        let the_lifecycle = LifecycleCoordinator::new(
            Arc::new(the_handle.clone()),
            self.runtime.shutdown_ceiling(),
        );
        let the_replicator = FileReplicator::new(
            self.source.clone(),
            self.target.clone(),
            self.job.clone(),
            self.signal.clone(),
            the_stats.clone(),
        )
        .with_limits(self.limits)
        .with_temp_dir(self.runtime.temp_dir.clone());
        let the_factory = ShardConsumerFactory::new(
            the_replicator,
            self.signal.clone(),
            the_lifecycle,
            self.runtime.consumer_settings(),
            the_stats.clone(),
        );
        let the_worker = StreamWorker::new(
            self.runtime
                .worker_config(StreamWorkerConfig::generate_worker_id()),
            self.transport.shards.clone(),
            self.transport.leases.clone(),
            the_factory,
            the_handle.clone(),
        );
        info!(
            "🧑‍🏭 Replicating s3://{} ({}) → s3://{} ({})",
            self.job.source_bucket, self.job.source_region, self.job.target_bucket, self.job.target_region
        );
        RunningWorker {
            handle: the_handle,
            task: tokio::spawn(the_worker.run()),
            stats: the_stats,
            started: Instant::now(),
        }
    }

    async fn join_worker(task: JoinHandle<Result<()>>) -> Result<()> {
        task.await
            .context("💀 The stream worker panicked. Nobody saw it coming. Everybody should have.")?
    }

    /// 🏁 One report per job: success if the worker stopped normally, failure otherwise.
    async fn finish(
        signal: &TaskSignal,
        result: Result<()>,
        stats: &ReplicationStats,
        started: Instant,
    ) -> Result<StatsSnapshot> {
        let the_snapshot = stats.snapshot();
        info!("📊 Replication summary\n{}", render_summary(&the_snapshot, started.elapsed()));
        match result {
            Ok(()) => {
                if let Err(err) = signal.report_success("{}").await {
                    warn!("📣 Could not report job success: {err}");
                }
                Ok(the_snapshot)
            }
            Err(err) => {
                if let Err(signal_err) = signal.report_failure("ReplicationFailed", &format!("{err:#}")).await {
                    warn!("📣 Could not report job failure: {signal_err}");
                }
                Err(err)
            }
        }
    }
}

// ============================================================
//  🧑‍💼 the supervisor
// ============================================================

/// 📦 The Supervisor: turns an [`AppConfig`] into a [`Pipeline`] and runs it.
pub(crate) struct Supervisor {
    app_config: AppConfig,
}

impl Supervisor {
    pub(crate) fn new(app_config: AppConfig) -> Self {
        Self { app_config }
    }

    pub(crate) async fn build_pipeline(&self) -> Pipeline {
        let job = &self.app_config.job;
        Pipeline::new(
            job.to_job(),
            self.app_config.runtime.clone(),
            new_object_store(&job.source_store()).await,
            new_object_store(&job.target_store()).await,
            new_transport(&self.app_config.stream, job).await,
            new_task_signal(job).await,
        )
    }

    pub(crate) async fn run(&self, mode: RunMode) -> Result<()> {
        let is_in_memory = matches!(self.app_config.stream, StreamConfig::InMemory(_));
        if is_in_memory && mode != RunMode::All {
            anyhow::bail!(
                "💀 The in-memory stream lives and dies with one process, so `{mode:?}` alone can't use it. \
                 Configure [stream.Kinesis] or use `run`."
            );
        }

        let the_pipeline = self.build_pipeline().await;
        match mode {
            RunMode::Scan => {
                let the_count = the_pipeline.scan().await.context("💀 Scan failed")?;
                info!("🔭 {the_count} object(s) queued for replication");
            }
            RunMode::Replicate => {
                the_pipeline.replicate().await.context("💀 Replication failed")?;
            }
            RunMode::All => {
                the_pipeline.run_all().await.context("💀 Scan + replication failed")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{InMemoryObjectStore, ObjectMetadata};
    use crate::common::{ONE_GIB, ReplicationJob};
    use crate::signal::SignalCall;
    use std::collections::HashMap;
    use std::time::Duration;

    const SRC: &str = "src";
    const DST: &str = "dst";

    // 📐 every threshold divided by 1024: 100 KiB in memory, 10 KiB chunks, 1 GiB skip
    fn scaled_limits() -> ReplicatorLimits {
        ReplicatorLimits {
            in_memory_below: 100 * 1024,
            skip_at_or_above: ONE_GIB as u64,
            min_chunk_size: 10 * 1024,
            max_parts: 1000,
        }
    }

    fn quick_runtime() -> RuntimeConfig {
        RuntimeConfig {
            poll_interval_ms: 5,
            shard_refresh_secs: 1,
            shutdown_ceiling_secs: 30,
            ..RuntimeConfig::default()
        }
    }

    fn patterned(len: usize, seed: u8) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8 ^ seed).collect()
    }

    struct World {
        source: InMemoryObjectStore,
        target: InMemoryObjectStore,
        recorder: RecordingSignal,
    }

    impl World {
        async fn new() -> Self {
            let source = InMemoryObjectStore::new();
            source
                .insert_object_with_metadata(
                    SRC,
                    "small/10kb.bin",
                    patterned(10 * 1024, 7),
                    ObjectMetadata {
                        content_type: Some("application/octet-stream".into()),
                        user_metadata: HashMap::from([("owner".to_string(), "ops".to_string())]),
                        ..ObjectMetadata::default()
                    },
                )
                .await;
            source.insert_object(SRC, "medium/250kb.bin", patterned(250 * 1024, 42)).await;
            // 🐘 2 TB, listing-only: it exists in the listing and nowhere else
            source.insert_listing_only(SRC, "huge/2tb.bin", 2_000_000_000_000).await;
            Self {
                source,
                target: InMemoryObjectStore::new(),
                recorder: RecordingSignal::new(),
            }
        }

        fn pipeline(&self, token: Option<&str>) -> Pipeline {
            let job = Arc::new(ReplicationJob {
                source_bucket: SRC.into(),
                source_region: "us-east-1".into(),
                target_bucket: DST.into(),
                target_region: "eu-west-1".into(),
                task_token: token.map(str::to_string),
            });
            let signal = TaskSignal::new(SignalBackend::Recording(self.recorder.clone()), job.task_token.clone());
            Pipeline::new(
                job,
                quick_runtime(),
                ObjectStoreBackend::InMemory(self.source.clone()),
                ObjectStoreBackend::InMemory(self.target.clone()),
                Transport::in_memory(InMemoryStream::new(1)),
                signal,
            )
            .with_limits(scaled_limits())
        }

        async fn assert_replicated(&self) {
            for key in ["small/10kb.bin", "medium/250kb.bin"] {
                assert_eq!(
                    self.target.object_bytes(DST, key).await,
                    self.source.object_bytes(SRC, key).await,
                    "{key} should be byte-identical"
                );
            }
            assert!(self.target.object_bytes(DST, "huge/2tb.bin").await.is_none());
            assert_eq!(self.target.keys(DST).await, vec!["medium/250kb.bin", "small/10kb.bin"]);
            assert!(self.target.open_uploads(DST).await.is_empty());
        }
    }

    #[tokio::test]
    async fn the_one_where_small_medium_and_huge_walk_into_a_bucket() {
        let world = World::new().await;

        let snapshot = tokio::time::timeout(Duration::from_secs(30), world.pipeline(Some("tok")).run_all())
            .await
            .expect("the pipeline should stop on its own")
            .expect("the job should succeed");

        world.assert_replicated().await;
        assert_eq!(snapshot.copied_in_memory, 1);
        assert_eq!(snapshot.copied_multipart, 1);
        assert_eq!(snapshot.parts_uploaded, 25);
        assert_eq!(snapshot.skipped, 1);
        assert_eq!(snapshot.failed, 0);
        assert_eq!(
            world.target.object_metadata(DST, "small/10kb.bin").await.and_then(|m| m.content_type),
            Some("application/octet-stream".to_string())
        );
        assert_eq!(world.recorder.successes().await, 1);
        assert!(world.recorder.failures().await.is_empty());
    }

    #[tokio::test]
    async fn the_one_where_running_it_twice_changes_nothing() {
        let world = World::new().await;
        for _ in 0..2 {
            tokio::time::timeout(Duration::from_secs(30), world.pipeline(None).run_all())
                .await
                .expect("the pipeline should stop on its own")
                .expect("the job should succeed");
            world.assert_replicated().await;
        }
        // 🤐 no token, no reports
        assert!(world.recorder.calls().await.is_empty());
    }

    #[tokio::test]
    async fn the_one_where_a_broken_listing_fails_the_job_once() {
        let world = World::new().await;
        world
            .source
            .arm_fault(crate::backends::StoreFault::ListObjects { page: 1 })
            .await;

        let result = tokio::time::timeout(Duration::from_secs(30), world.pipeline(Some("tok")).run_all())
            .await
            .expect("the pipeline should stop on its own");

        assert!(result.is_err());
        let failures = world.recorder.failures().await;
        assert!(
            matches!(failures.as_slice(), [SignalCall::Failure { error, .. }] if error == "ReplicationFailed"),
            "{failures:?}"
        );
        assert_eq!(world.recorder.successes().await, 0);
        assert!(world.target.keys(DST).await.is_empty());
    }

    #[tokio::test]
    async fn the_one_where_scan_and_replicate_split_across_the_same_stream() {
        let world = World::new().await;
        let stream = InMemoryStream::new(1);
        let leases = InMemoryLeaseStore::new();
        let split = |world: &World| {
            let mut pipeline = world.pipeline(None);
            pipeline.transport = Transport {
                producer: ProducerBackend::InMemory(stream.clone()),
                shards: ShardSourceBackend::InMemory(stream.clone()),
                leases: LeaseStoreBackend::InMemory(leases.clone()),
            };
            pipeline
        };

        let scanned = split(&world).scan().await.expect("scan");
        assert_eq!(scanned, 3);
        tokio::time::timeout(Duration::from_secs(30), split(&world).replicate())
            .await
            .expect("the worker should stop on the marker")
            .expect("replicate");

        world.assert_replicated().await;
        assert!(leases.checkpoint_of("shardId-000000000000").await.is_some());
    }

    #[tokio::test]
    async fn the_one_where_the_in_memory_stream_refuses_to_be_split() {
        let app_config: AppConfig = toml::from_str(
            r#"
            [job]
            source_bucket = "a"
            source_region = "us-east-1"
            target_bucket = "b"
            target_region = "us-west-2"
            "#,
        )
        .expect("toml");
        let err = Supervisor::new(app_config)
            .run(RunMode::Scan)
            .await
            .expect_err("in-memory scan alone makes no sense");
        assert!(err.to_string().contains("in-memory stream"));
    }
}
