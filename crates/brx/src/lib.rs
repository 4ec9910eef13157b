//! 🪣 brx — a streaming bucket replicator.
//!
//! A scanner lists the source bucket onto a partitioned stream. One shard consumer per
//! leased shard copies each listed object to the target bucket, in memory or in
//! multipart chunks depending on its size. A final marker on the stream tells the
//! consumers to wrap up.

pub mod app_config;
pub mod backends;
pub mod common;
pub mod consumer;
pub mod errors;
pub mod lifecycle;
pub mod progress;
pub mod replicator;
pub mod retry;
pub mod signal;
pub mod stream;
mod supervisors;

use anyhow::{Context, Result};

use crate::app_config::AppConfig;
use crate::supervisors::Supervisor;

pub use crate::supervisors::RunMode;

/// 🚀 Run one job to completion, in the given mode.
pub async fn run(app_config: AppConfig, mode: RunMode) -> Result<()> {
    Supervisor::new(app_config)
        .run(mode)
        .await
        .context(format!("💀 brx {mode:?} did not finish cleanly"))
}
