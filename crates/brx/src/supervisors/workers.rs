//! 🧵 Workers: the scanner's two minions. One pages through the bucket, the other
//! shoves what it finds onto the stream. A bounded channel sits between them so a
//! fast lister can't bury a slow stream under a mountain of pages.
//!
//! 🚀 This module is like a factory floor, except instead of hard hats
//! we wear `#[derive(Debug)]` and instead of OSHA violations
//! we have borrow checker violations. 🦆

// 🎉 anyhowwwww.... it's useful! Like duct tape for error handling.
use anyhow::Result;
use tokio::task::JoinHandle;

mod list_worker;
mod publish_worker;
pub(in crate::supervisors) use list_worker::ListWorker;
pub(in crate::supervisors) use publish_worker::{PublishReport, PublishWorker};

/// 🏗️ A background worker, that does work. duh.
///
/// 🎯 The trait that all workers must implement, like a social contract
/// but enforced by the compiler instead of polite society. `Output` is whatever the
/// worker hands back once its channel runs dry.
pub(in crate::supervisors) trait Worker {
    type Output: Send + 'static;

    /// 🚀 Start the worker. Returns a JoinHandle because we trust
    /// but verify. Mostly verify. Okay, we don't trust at all.
    fn start(self) -> JoinHandle<Result<Self::Output>>;
}
