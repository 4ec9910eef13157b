//! 📼 A signal that writes everything down and can be told to misbehave.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::errors::SignalError;
use crate::signal::OrchestrationSignal;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalCall {
    Heartbeat { token: String },
    Success { token: String, output: String },
    Failure { token: String, error: String, cause: String },
}

#[derive(Debug, Default)]
struct RecorderState {
    calls: Vec<SignalCall>,
    heartbeat_throttles: usize,
    expired: bool,
}

/// 📼 Records every call. Shares state across clones.
#[derive(Debug, Clone, Default)]
pub struct RecordingSignal {
    state: Arc<Mutex<RecorderState>>,
}

impl RecordingSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn calls(&self) -> Vec<SignalCall> {
        self.state.lock().await.calls.clone()
    }

    pub async fn failures(&self) -> Vec<SignalCall> {
        self.calls()
            .await
            .into_iter()
            .filter(|call| matches!(call, SignalCall::Failure { .. }))
            .collect()
    }

    pub async fn successes(&self) -> usize {
        self.calls()
            .await
            .iter()
            .filter(|call| matches!(call, SignalCall::Success { .. }))
            .count()
    }

    /// 🐢 The next `count` heartbeats are throttled.
    pub async fn throttle_heartbeats(&self, count: usize) {
        self.state.lock().await.heartbeat_throttles = count;
    }

    /// ⏰ From now on, the orchestrator has forgotten about this task.
    pub async fn expire(&self) {
        self.state.lock().await.expired = true;
    }
}

#[async_trait]
impl OrchestrationSignal for RecordingSignal {
    async fn heartbeat(&self, token: &str) -> Result<(), SignalError> {
        let mut state = self.state.lock().await;
        state.calls.push(SignalCall::Heartbeat {
            token: token.to_string(),
        });
        if state.expired {
            return Err(SignalError::Expired(format!("task '{token}' timed out")));
        }
        if state.heartbeat_throttles > 0 {
            state.heartbeat_throttles -= 1;
            return Err(SignalError::Throttled("rate exceeded".into()));
        }
        Ok(())
    }

    async fn report_success(&self, token: &str, output: &str) -> Result<(), SignalError> {
        self.state.lock().await.calls.push(SignalCall::Success {
            token: token.to_string(),
            output: output.to_string(),
        });
        Ok(())
    }

    async fn report_failure(&self, token: &str, error: &str, cause: &str) -> Result<(), SignalError> {
        self.state.lock().await.calls.push(SignalCall::Failure {
            token: token.to_string(),
            error: error.to_string(),
            cause: cause.to_string(),
        });
        Ok(())
    }
}
