//! 🚪 The lifecycle coordinator: "please stop" with a deadline.
//!
//! 🎬 *[a shard consumer finds the final marker. it cannot stop the worker itself:]*
//! *[it IS the worker, or at least one of its hands. so it calls a coordinator.]*
//!
//! Every [`LifecycleCoordinator::request_shutdown`] call spawns its own little task:
//! ask the worker for a graceful stop, get a fresh one-shot back, and race it against a
//! ceiling. Graceful wins → done. Ceiling wins (or the one-shot is dropped) → pull the
//! plug with `shutdown_now()`. The caller never waits for any of it.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::stream::WorkerControl;

/// 🏁 How a shutdown request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownVerdict {
    Graceful,
    Forced,
}

/// 🚪 Turns "please stop" into "stopped, one way or another".
#[derive(Debug, Clone)]
pub struct LifecycleCoordinator {
    worker: Arc<dyn WorkerControl>,
    ceiling: Duration,
}

impl LifecycleCoordinator {
    pub fn new(worker: Arc<dyn WorkerControl>, ceiling: Duration) -> Self {
        Self { worker, ceiling }
    }

    /// 🙋 Start a bounded graceful shutdown in the background. Returns immediately.
    ///
    /// The handle is only for callers that want to know how it went; dropping it is fine.
    pub fn request_shutdown(&self) -> JoinHandle<ShutdownVerdict> {
        let the_worker = self.worker.clone();
        let the_ceiling = self.ceiling;
        tokio::spawn(async move {
            let the_done = the_worker.start_graceful_shutdown();
            match tokio::time::timeout(the_ceiling, the_done).await {
                Ok(Ok(())) => {
                    info!("🚪 Worker stopped gracefully");
                    ShutdownVerdict::Graceful
                }
                Ok(Err(_)) => {
                    warn!("🚪 Lost track of the graceful shutdown; forcing it");
                    the_worker.shutdown_now();
                    ShutdownVerdict::Forced
                }
                Err(_) => {
                    warn!("⏰ Graceful shutdown blew through {:?}; forcing it", the_ceiling);
                    the_worker.shutdown_now();
                    ShutdownVerdict::Forced
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    #[derive(Debug, Clone, Copy)]
    enum Behaviour {
        StopsPromptly,
        Hangs,
        LosesTheSignal,
    }

    #[derive(Debug)]
    struct FakeWorker {
        behaviour: Behaviour,
        graceful_requests: AtomicUsize,
        forced: AtomicBool,
        parked: Mutex<Vec<oneshot::Sender<()>>>,
    }

    impl FakeWorker {
        fn new(behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                behaviour,
                graceful_requests: AtomicUsize::new(0),
                forced: AtomicBool::new(false),
                parked: Mutex::new(Vec::new()),
            })
        }
    }

    impl WorkerControl for FakeWorker {
        fn start_graceful_shutdown(&self) -> oneshot::Receiver<()> {
            self.graceful_requests.fetch_add(1, Ordering::SeqCst);
            let (tx, rx) = oneshot::channel();
            match self.behaviour {
                Behaviour::StopsPromptly => tx.send(()).expect("receiver alive"),
                Behaviour::Hangs => self.parked.lock().expect("parked").push(tx),
                Behaviour::LosesTheSignal => drop(tx),
            }
            rx
        }

        fn shutdown_now(&self) {
            self.forced.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_the_worker_stops_politely() {
        let worker = FakeWorker::new(Behaviour::StopsPromptly);
        let coordinator = LifecycleCoordinator::new(worker.clone(), Duration::from_secs(86_400));
        let verdict = coordinator.request_shutdown().await.expect("join");
        assert_eq!(verdict, ShutdownVerdict::Graceful);
        assert!(!worker.forced.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_the_ceiling_is_reached_and_the_plug_is_pulled() {
        let worker = FakeWorker::new(Behaviour::Hangs);
        let coordinator = LifecycleCoordinator::new(worker.clone(), Duration::from_secs(86_400));
        let verdict = coordinator.request_shutdown().await.expect("join");
        assert_eq!(verdict, ShutdownVerdict::Forced);
        assert!(worker.forced.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_a_dropped_signal_also_forces_the_stop() {
        let worker = FakeWorker::new(Behaviour::LosesTheSignal);
        let coordinator = LifecycleCoordinator::new(worker.clone(), Duration::from_secs(60));
        let verdict = coordinator.request_shutdown().await.expect("join");
        assert_eq!(verdict, ShutdownVerdict::Forced);
        assert!(worker.forced.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_every_request_gets_its_own_signal() {
        let worker = FakeWorker::new(Behaviour::StopsPromptly);
        let coordinator = LifecycleCoordinator::new(worker.clone(), Duration::from_secs(60));
        let first = coordinator.request_shutdown();
        let second = coordinator.request_shutdown();
        assert_eq!(first.await.expect("join"), ShutdownVerdict::Graceful);
        assert_eq!(second.await.expect("join"), ShutdownVerdict::Graceful);
        assert_eq!(worker.graceful_requests.load(Ordering::SeqCst), 2);
    }
}
