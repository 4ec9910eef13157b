//! 🏷️ The error kinds somebody actually branches on.
//!
//! Everything else in brx is an `anyhow::Error` with a sad little context string
//! attached. These two enums exist because the shard consumer has to decide, per
//! failure, whether to retry, give up, walk away quietly, or pull the fire alarm.

use thiserror::Error;

/// 💾 What can go wrong when writing a checkpoint (or renewing a lease).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CheckpointError {
    /// 🐢 The store is busy. Wait a beat and try again.
    #[error("checkpoint store throttled the request: {0}")]
    Throttled(String),
    /// 👻 Somebody else owns this shard now. Our work here is done.
    #[error("lease for shard '{0}' is no longer held by this worker")]
    LeaseLost(String),
    /// 🏚️ The store itself is broken (missing table, bad schema, ...). Retrying won't fix it.
    #[error("checkpoint store is in an invalid state: {0}")]
    InvalidState(String),
}

/// 📣 What can go wrong when talking to the orchestrator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignalError {
    /// ⏰ The orchestrator no longer recognizes our task token. The job was cancelled
    /// or timed out from the outside.
    #[error("orchestration task is gone: {0}")]
    Expired(String),
    /// 🐢 Orchestrator is rate-limiting us.
    #[error("orchestration signal throttled: {0}")]
    Throttled(String),
    /// 💀 Anything else.
    #[error("orchestration signal failed: {0}")]
    Other(String),
}
