//! 📣 The orchestration signal: how brx tells whoever launched it "still alive",
//! "all done", or "that went badly".
//!
//! Everything is addressed by an opaque task token. No token, no calls: [`TaskSignal`]
//! turns every method into a quiet `Ok(())` when the job was started by a human at a
//! terminal instead of by an orchestrator.

use async_trait::async_trait;
use tracing::debug;

use crate::errors::SignalError;

pub mod in_mem;
pub mod step_functions;

pub use in_mem::{RecordingSignal, SignalCall};
pub use step_functions::StepFunctionsSignal;

// 📏 what the orchestrator will accept before it starts rejecting us
pub const MAX_ERROR_CHARS: usize = 256;
pub const MAX_CAUSE_CHARS: usize = 32_768;

/// 📣 The three things brx ever says to an orchestrator.
#[async_trait]
pub trait OrchestrationSignal: std::fmt::Debug + Send + Sync {
    async fn heartbeat(&self, token: &str) -> Result<(), SignalError>;
    async fn report_success(&self, token: &str, output: &str) -> Result<(), SignalError>;
    async fn report_failure(&self, token: &str, error: &str, cause: &str) -> Result<(), SignalError>;
}

#[derive(Debug, Clone)]
pub enum SignalBackend {
    Recording(RecordingSignal),
    StepFunctions(StepFunctionsSignal),
}

#[async_trait]
impl OrchestrationSignal for SignalBackend {
    async fn heartbeat(&self, token: &str) -> Result<(), SignalError> {
        match self {
            SignalBackend::Recording(signal) => signal.heartbeat(token).await,
            SignalBackend::StepFunctions(signal) => signal.heartbeat(token).await,
        }
    }

    async fn report_success(&self, token: &str, output: &str) -> Result<(), SignalError> {
        match self {
            SignalBackend::Recording(signal) => signal.report_success(token, output).await,
            SignalBackend::StepFunctions(signal) => signal.report_success(token, output).await,
        }
    }

    async fn report_failure(&self, token: &str, error: &str, cause: &str) -> Result<(), SignalError> {
        match self {
            SignalBackend::Recording(signal) => signal.report_failure(token, error, cause).await,
            SignalBackend::StepFunctions(signal) => signal.report_failure(token, error, cause).await,
        }
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// 🎫 A signal backend bound to this job's (optional) task token.
#[derive(Debug, Clone)]
pub struct TaskSignal {
    backend: SignalBackend,
    token: Option<String>,
}

impl TaskSignal {
    pub fn new(backend: SignalBackend, token: Option<String>) -> Self {
        Self { backend, token }
    }

    pub async fn heartbeat(&self) -> Result<(), SignalError> {
        match &self.token {
            Some(token) => self.backend.heartbeat(token).await,
            None => Ok(()),
        }
    }

    pub async fn report_success(&self, output: &str) -> Result<(), SignalError> {
        match &self.token {
            Some(token) => self.backend.report_success(token, output).await,
            None => {
                debug!("📣 No task token; nobody to tell about the success");
                Ok(())
            }
        }
    }

    /// 💀 `error` is a short kind name, `cause` the long story. Both are cut to what the
    /// orchestrator accepts.
    pub async fn report_failure(&self, error: &str, cause: &str) -> Result<(), SignalError> {
        match &self.token {
            Some(token) => {
                self.backend
                    .report_failure(
                        token,
                        &truncate_chars(error, MAX_ERROR_CHARS),
                        &truncate_chars(cause, MAX_CAUSE_CHARS),
                    )
                    .await
            }
            None => {
                debug!("📣 No task token; failure stays in the logs: {error}: {cause}");
                Ok(())
            }
        }
    }
}
