// ai
//! 📦 Common data structures — the building blocks of brx
//!
//! 🎬 COLD OPEN — INT. TWO DATA CENTERS, ONE OCEAN APART — 3:47 AM
//!
//! A bucket in one region holds eleven million objects. A bucket in another
//! region holds none. Between them: a stream, a handful of shard consumers,
//! and a JSON payload so small it could fit on a sticky note. `{"key": ..., "size": ...}`.
//! That's it. That's the whole message. Everything else is plumbing.
//!
//! 🦆
//!
//! This module defines the humble yet load-bearing structs that ferry object
//! identities from the scanner to the replicator. They don't carry bytes. They
//! carry *the idea of bytes*. The replicator fetches the real thing.

use std::sync::Arc;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tokio::task::AbortHandle;

// -- 📏 one mebibyte. the rest of the unit ladder climbs from here.
pub const ONE_MIB: i64 = 1024 * 1024;
pub const TEN_MIB: i64 = 10 * ONE_MIB;
pub const HUNDRED_MIB: i64 = 100 * ONE_MIB;
pub const ONE_GIB: i64 = 1024 * ONE_MIB;
pub const ONE_TIB: i64 = 1024 * ONE_GIB;

/// 🏁 The reserved key of the terminal marker. Paired with [`TERMINAL_SIZE`] it means
/// "the scanner is done, there is nothing after me". Kept byte-for-byte stable because
/// producers and consumers from different builds may share one stream.
pub const TERMINAL_KEY: &str = "DRPS3-FinalMarker";

/// 🏁 The reserved size of the terminal marker. No real object is -1 bytes long.
/// (We checked. Physics was unavailable for comment.)
pub const TERMINAL_SIZE: i64 = -1;

/// 🎯 One object, as the stream sees it: a name and a size. Nothing else.
///
/// The terminal marker is just a descriptor with the sentinel pair
/// (`TERMINAL_KEY`, `TERMINAL_SIZE`). `is_terminal()` is derived, never stored,
/// so a real object that happens to be named `DRPS3-FinalMarker` still replicates
/// as long as it has a real size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectDescriptor {
    pub key: String,
    pub size: i64,
}

impl ObjectDescriptor {
    pub fn new(key: impl Into<String>, size: i64) -> Self {
        Self {
            key: key.into(),
            size,
        }
    }

    /// 🏁 The one descriptor to end them all.
    pub fn terminal() -> Self {
        Self::new(TERMINAL_KEY, TERMINAL_SIZE)
    }

    pub fn is_terminal(&self) -> bool {
        self.key == TERMINAL_KEY && self.size == TERMINAL_SIZE
    }

    /// 📡 Serialize into the stream payload. `{"key":"...","size":123}`. Riveting stuff.
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        serde_json::to_vec(self).context(format!(
            "💀 Could not serialize the descriptor for '{}'. It's two fields. TWO. And yet.",
            self.key
        ))
    }

    /// 🔍 Decode a stream payload back into a descriptor.
    ///
    /// Rejects non-UTF-8, non-JSON, missing fields, and non-terminal descriptors with a
    /// negative size. Every one of those is a malformed record: retrying the decode will
    /// produce the exact same disappointment, so callers drop and move on.
    pub fn decode(payload: &[u8]) -> anyhow::Result<Self> {
        let descriptor: ObjectDescriptor = serde_json::from_slice(payload)
            .context("💀 Stream payload is not a descriptor. It's not even trying to be one.")?;
        if !descriptor.is_terminal() && descriptor.size < 0 {
            anyhow::bail!(
                "💀 Descriptor for '{}' claims a size of {} bytes. Negative bytes. Bold.",
                descriptor.key,
                descriptor.size
            );
        }
        Ok(descriptor)
    }
}

/// 🪣 One replication job: where the bytes live, where they're going, and
/// (optionally) who to tell about it.
///
/// Built once, wrapped in an `Arc`, and shared read-only with the scanner and every
/// shard consumer. Nobody mutates it after construction. Nobody would dare.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationJob {
    pub source_bucket: String,
    pub source_region: String,
    pub target_bucket: String,
    pub target_region: String,
    /// 🎫 Opaque orchestration handle. `None` means nobody is listening, and every
    /// heartbeat/success/failure call quietly becomes a no-op.
    pub task_token: Option<String>,
}

pub type SharedJob = Arc<ReplicationJob>;

/// 🪢 Ties a spawned task to the scope awaiting it. Dropping a `JoinHandle` only
/// detaches the task; dropping this aborts it.
#[derive(Debug)]
pub(crate) struct AbortOnDrop(AbortHandle);

impl AbortOnDrop {
    pub(crate) fn new(handle: AbortHandle) -> Self {
        Self(handle)
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        // -- no-op for a task that already finished
        self.0.abort();
    }
}
