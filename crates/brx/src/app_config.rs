//! 🔧 App Configuration — the sacred TOML-to-struct pipeline.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the fridge.
//! In the junk drawer. Nothing." — every developer at 3am 🦆
//!
//! 🏗️ Powered by Figment, because manually parsing env vars is a form of
//! self-harm that even the borrow checker wouldn't approve of.
//!
//! ```toml
//! [job]
//! source_bucket = "photos-us"
//! source_region = "us-east-1"
//! target_bucket = "photos-eu"
//! target_region = "eu-west-1"
//!
//! [stream.Kinesis]
//! stream_name = "photos-replication"
//!
//! [runtime]
//! checkpoint_interval_secs = 60
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
// 🚀 tracing::info — because println! in production is a cry for help.
use tracing::info;

use crate::backends::S3StoreConfig;
use crate::common::{ReplicationJob, SharedJob};
use crate::consumer::ConsumerSettings;
use crate::retry::RetryPolicy;
use crate::stream::{KinesisStreamConfig, StreamWorkerConfig};

/// 📦 The AppConfig: one struct to rule them all, one struct to find them,
/// one struct to bring them all, and in the Figment bind them.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// 🪣 What to copy, from where, to where.
    pub job: JobConfig,
    /// 🌊 The pipe between the scanner and the consumers.
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default, alias = "runtime_config")]
    pub runtime: RuntimeConfig,
}

/// 🪣 The replication job, as written by a human (or an orchestrator pretending to be one).
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct JobConfig {
    pub source_bucket: String,
    pub source_region: String,
    pub target_bucket: String,
    pub target_region: String,
    /// 🎫 Step Functions task token. Absent = nobody to report to.
    #[serde(default)]
    pub task_token: Option<String>,
    /// 🌎 Region of the orchestrator. Defaults to the source region.
    #[serde(default)]
    pub orchestration_region: Option<String>,
    /// 🧪 S3-compatible endpoint for both buckets (LocalStack, MinIO).
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default)]
    pub force_path_style: bool,
}

impl JobConfig {
    pub fn to_job(&self) -> SharedJob {
        Arc::new(ReplicationJob {
            source_bucket: self.source_bucket.clone(),
            source_region: self.source_region.clone(),
            target_bucket: self.target_bucket.clone(),
            target_region: self.target_region.clone(),
            task_token: self.task_token.clone(),
        })
    }

    pub fn source_store(&self) -> S3StoreConfig {
        self.store_config(&self.source_region)
    }

    pub fn target_store(&self) -> S3StoreConfig {
        self.store_config(&self.target_region)
    }

    pub fn orchestration_region(&self) -> &str {
        self.orchestration_region
            .as_deref()
            .unwrap_or(&self.source_region)
    }

    fn store_config(&self, region: &str) -> S3StoreConfig {
        S3StoreConfig {
            region: region.to_string(),
            endpoint_url: self.endpoint_url.clone(),
            force_path_style: self.force_path_style,
        }
    }
}

/// 🌊 Which stream transport to use. Externally tagged: `[stream.Kinesis]` or `[stream.InMemory]`.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub enum StreamConfig {
    Kinesis(KinesisStreamConfig),
    /// 🧠 Single-process only. Good for `brx run` and tests, useless across processes.
    InMemory(InMemoryStreamConfig),
}

impl Default for StreamConfig {
    fn default() -> Self {
        StreamConfig::InMemory(InMemoryStreamConfig::default())
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct InMemoryStreamConfig {
    #[serde(default = "default_shard_count")]
    pub shard_count: usize,
}

impl Default for InMemoryStreamConfig {
    fn default() -> Self {
        Self {
            shard_count: default_shard_count(),
        }
    }
}

fn default_shard_count() -> usize {
    1
}

/// ⏱️ Every timing and size knob of a run. All of them have defaults; most people
/// should never touch any of them.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct RuntimeConfig {
    /// 📬 Pages buffered between the list worker and the publish worker.
    #[serde(alias = "channel_size")]
    pub queue_capacity: usize,
    #[serde(alias = "checkpoint_interval")]
    pub checkpoint_interval_secs: u64,
    pub checkpoint_attempts: u32,
    pub checkpoint_retry_delay_ms: u64,
    #[serde(alias = "record_retries")]
    pub record_attempts: u32,
    pub record_retry_delay_secs: u64,
    /// 🚪 How long a graceful shutdown may take before the plug is pulled.
    #[serde(alias = "shutdown_timeout_secs")]
    pub shutdown_ceiling_secs: u64,
    pub poll_interval_ms: u64,
    pub lease_duration_secs: u64,
    pub shard_refresh_secs: u64,
    /// 📁 Where chunk buffers go. Absent = the OS temp dir.
    pub temp_dir: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10,
            checkpoint_interval_secs: 60,
            checkpoint_attempts: 10,
            checkpoint_retry_delay_ms: 3,
            record_attempts: 10,
            record_retry_delay_secs: 3,
            shutdown_ceiling_secs: 86_400,
            poll_interval_ms: 1_000,
            lease_duration_secs: 60,
            shard_refresh_secs: 30,
            temp_dir: None,
        }
    }
}

impl RuntimeConfig {
    pub fn consumer_settings(&self) -> ConsumerSettings {
        ConsumerSettings {
            checkpoint_interval: Duration::from_secs(self.checkpoint_interval_secs),
            checkpoint_retry: RetryPolicy::new(
                self.checkpoint_attempts,
                Duration::from_millis(self.checkpoint_retry_delay_ms),
            ),
            record_retry: RetryPolicy::new(
                self.record_attempts,
                Duration::from_secs(self.record_retry_delay_secs),
            ),
        }
    }

    pub fn shutdown_ceiling(&self) -> Duration {
        Duration::from_secs(self.shutdown_ceiling_secs)
    }

    pub fn worker_config(&self, worker_id: String) -> StreamWorkerConfig {
        StreamWorkerConfig {
            worker_id,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            lease_duration: Duration::from_secs(self.lease_duration_secs),
            shard_refresh_interval: Duration::from_secs(self.shard_refresh_secs),
        }
    }
}

/// 🚀 Load the config — from a file, from env vars, or from the sheer power of hoping.
///
/// 🔧 Merges environment variables (`BRX_*`, nested keys split on `__`, so
/// `BRX_JOB__TASK_TOKEN` lands in `job.task_token`) with an optional TOML file.
/// TOML wins on conflicts.
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {:#?}",
        config_file_name.unwrap_or(Path::new(""))
    );

    let config = Figment::new().merge(Env::prefixed("BRX_").split("__"));
    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    // 💬 Build a context message that will actually TELL you what went wrong.
    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables (BRX_*). \
             The file exists in our hearts, but apparently not on disk.",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (BRX_*). \
                 No file was provided — this one's all on the environment. Classic."
            .to_string(),
    };

    config.extract().context(context_msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_test_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .prefix("brx_app_config_")
            .suffix(".toml")
            .tempfile()
            .expect("💀 Failed to make a temp config. The filesystem said 'new phone who dis'.");
        file.write_all(contents.as_bytes())
            .expect("💀 Failed to write test config.");
        file
    }

    const JOB: &str = r#"
        [job]
        source_bucket = "photos-us"
        source_region = "us-east-1"
        target_bucket = "photos-eu"
        target_region = "eu-west-1"
    "#;

    #[test]
    fn the_one_where_a_kinesis_job_parses_with_all_the_trimmings() {
        let file = write_test_config(&format!(
            r#"{JOB}
            task_token = "tok-123"
            endpoint_url = "http://localhost:4566"
            force_path_style = true

            [stream.Kinesis]
            stream_name = "photos-replication"
            batch_limit = 250

            [runtime]
            checkpoint_interval_secs = 30
            shutdown_ceiling_secs = 600
            temp_dir = "/scratch"
            "#
        ));

        let app_config = load_config(Some(file.path())).expect("💀 config should parse");

        let job = app_config.job.to_job();
        assert_eq!(job.task_token.as_deref(), Some("tok-123"));
        assert_eq!(app_config.job.orchestration_region(), "us-east-1");
        let target = app_config.job.target_store();
        assert_eq!(target.region, "eu-west-1");
        assert_eq!(target.endpoint_url.as_deref(), Some("http://localhost:4566"));
        assert!(target.force_path_style);

        match &app_config.stream {
            StreamConfig::Kinesis(kinesis) => {
                assert_eq!(kinesis.stream_name, "photos-replication");
                assert_eq!(kinesis.batch_limit, 250);
                assert_eq!(kinesis.lease_table_name(), "DRPS3-KinesisApp-photos-replication");
            }
            honestly_who_knows => panic!("💀 Expected a Kinesis stream, got {honestly_who_knows:?}"),
        }

        let settings = app_config.runtime.consumer_settings();
        assert_eq!(settings.checkpoint_interval, Duration::from_secs(30));
        assert_eq!(settings.checkpoint_retry.attempts, 10);
        assert_eq!(app_config.runtime.shutdown_ceiling(), Duration::from_secs(600));
        assert_eq!(app_config.runtime.temp_dir, Some(PathBuf::from("/scratch")));
    }

    #[test]
    fn the_one_where_runtime_defaults_show_up_uninvited_but_helpful() {
        let file = write_test_config(JOB);
        let app_config: AppConfig = Figment::new()
            .merge(Toml::file(file.path()))
            .extract()
            .expect("💀 Defaults should fill every gap");

        assert_eq!(app_config.runtime, RuntimeConfig::default());
        assert_eq!(app_config.stream, StreamConfig::InMemory(InMemoryStreamConfig { shard_count: 1 }));
        let settings = app_config.runtime.consumer_settings();
        assert_eq!(settings, ConsumerSettings::default());
        assert_eq!(app_config.runtime.shutdown_ceiling(), Duration::from_secs(86_400));
    }

    #[test]
    fn the_one_where_runtime_accepts_its_former_stage_names() {
        let file = write_test_config(&format!(
            r#"{JOB}
            [runtime_config]
            channel_size = 12
            record_retries = 4
            shutdown_timeout_secs = 5
            "#
        ));

        let app_config = load_config(Some(file.path())).expect("💀 Aliases should parse");
        assert_eq!(app_config.runtime.queue_capacity, 12);
        assert_eq!(app_config.runtime.record_attempts, 4);
        assert_eq!(app_config.runtime.shutdown_ceiling_secs, 5);
    }

    #[test]
    fn the_one_where_the_stream_section_stands_on_its_own() {
        let stream: StreamConfig = toml::from_str("[InMemory]\nshard_count = 4\n").expect("toml");
        assert_eq!(stream, StreamConfig::InMemory(InMemoryStreamConfig { shard_count: 4 }));
    }

    #[test]
    fn the_one_where_a_missing_bucket_is_a_loud_error() {
        let file = write_test_config("[job]\nsource_bucket = \"only-half-a-job\"\n");
        let err = Figment::new()
            .merge(Toml::file(file.path()))
            .extract::<AppConfig>()
            .expect_err("a job without a target is not a job");
        assert!(err.to_string().contains("missing field"));
    }
}
