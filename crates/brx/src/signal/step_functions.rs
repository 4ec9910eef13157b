// ai
//! 📣☁️ Step Functions as the orchestrator: `SendTaskHeartbeat`, `SendTaskSuccess`,
//! `SendTaskFailure`, all keyed by the activity/callback task token.
//!
//! 🧠 Knowledge graph: `TaskTimedOut` and `TaskDoesNotExist` both mean the state
//! machine has moved on without us, so they map to [`SignalError::Expired`] and the
//! consumer pulls the shutdown cord.

use async_trait::async_trait;
use aws_sdk_sfn::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};

use crate::backends::load_aws_config;
use crate::errors::SignalError;
use crate::signal::OrchestrationSignal;

fn classify<E, R>(err: SdkError<E, R>) -> SignalError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let the_message = format!("{}", DisplayErrorContext(&err));
    let the_code = err.as_service_error().and_then(|service_err| service_err.code());
    match the_code {
        Some("TaskTimedOut") | Some("TaskDoesNotExist") => SignalError::Expired(the_message),
        Some("ThrottlingException") | Some("TooManyRequestsException") => {
            SignalError::Throttled(the_message)
        }
        _ => SignalError::Other(the_message),
    }
}

/// 📣 [`OrchestrationSignal`] over `aws_sdk_sfn::Client`.
#[derive(Debug, Clone)]
pub struct StepFunctionsSignal {
    client: aws_sdk_sfn::Client,
}

impl StepFunctionsSignal {
    pub async fn new(region: &str) -> Self {
        let the_aws_config = load_aws_config(region, None).await;
        Self {
            client: aws_sdk_sfn::Client::new(&the_aws_config),
        }
    }

    pub fn from_client(client: aws_sdk_sfn::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl OrchestrationSignal for StepFunctionsSignal {
    async fn heartbeat(&self, token: &str) -> Result<(), SignalError> {
        self.client
            .send_task_heartbeat()
            .task_token(token)
            .send()
            .await
            .map(|_| ())
            .map_err(classify)
    }

    async fn report_success(&self, token: &str, output: &str) -> Result<(), SignalError> {
        self.client
            .send_task_success()
            .task_token(token)
            .output(output)
            .send()
            .await
            .map(|_| ())
            .map_err(classify)
    }

    async fn report_failure(&self, token: &str, error: &str, cause: &str) -> Result<(), SignalError> {
        self.client
            .send_task_failure()
            .task_token(token)
            .error(error)
            .cause(cause)
            .send()
            .await
            .map(|_| ())
            .map_err(classify)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_sfn::error::ErrorMetadata;
    use aws_sdk_sfn::operation::send_task_heartbeat::SendTaskHeartbeatError;
    use aws_sdk_sfn::operation::send_task_success::SendTaskSuccessError;
    use aws_sdk_sfn::types::error::{TaskDoesNotExist, TaskTimedOut};

    fn meta(code: &str) -> ErrorMetadata {
        ErrorMetadata::builder().code(code).message("from the state machine").build()
    }

    #[test]
    fn the_one_where_a_timed_out_or_vanished_task_is_expired() {
        let the_timed_out = SdkError::service_error(
            SendTaskHeartbeatError::TaskTimedOut(TaskTimedOut::builder().meta(meta("TaskTimedOut")).build()),
            (),
        );
        assert!(matches!(classify(the_timed_out), SignalError::Expired(_)));

        let the_vanished = SdkError::service_error(
            SendTaskSuccessError::TaskDoesNotExist(
                TaskDoesNotExist::builder().meta(meta("TaskDoesNotExist")).build(),
            ),
            (),
        );
        assert!(matches!(classify(the_vanished), SignalError::Expired(_)));
    }

    #[test]
    fn the_one_where_rate_limits_are_throttles_and_the_rest_is_other() {
        let the_throttle = SdkError::service_error(SendTaskHeartbeatError::generic(meta("ThrottlingException")), ());
        assert!(matches!(classify(the_throttle), SignalError::Throttled(_)));

        let the_bad_token = SdkError::service_error(SendTaskHeartbeatError::generic(meta("InvalidToken")), ());
        assert!(matches!(classify(the_bad_token), SignalError::Other(_)));

        let the_timeout: SdkError<SendTaskHeartbeatError, ()> = SdkError::timeout_error("read timed out");
        assert!(matches!(classify(the_timeout), SignalError::Other(_)));
    }
}
