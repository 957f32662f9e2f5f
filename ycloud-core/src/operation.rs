//! Operation - Long-running operation handles and the waiter that polls them
//!
//! Mutating control-plane calls return an [`Operation`] instead of the final
//! object. [`OperationWaiter`] polls the operation service at a bounded interval
//! until the operation is done, the deadline passes, or the caller cancels.

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

use crate::error::{ApiCode, ApiError};

/// Error payload of a failed operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationError {
    /// gRPC status code
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<serde_json::Value>,
}

/// Server-side handle of an asynchronous call
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<OperationError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<serde_json::Value>,
}

/// Observed status of an operation
#[derive(Debug, Clone, PartialEq)]
pub enum OperationStatus {
    /// Still running; keep polling
    Pending,
    /// Finished successfully with the given payload
    Done(serde_json::Value),
    /// Finished with a server-reported error
    Failed(OperationError),
}

impl Operation {
    pub fn pending(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn completed(id: impl Into<String>, response: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            done: true,
            response: Some(response),
            ..Default::default()
        }
    }

    pub fn failed(id: impl Into<String>, code: ApiCode, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            done: true,
            error: Some(OperationError {
                code: grpc_code(code),
                message: message.into(),
                details: Vec::new(),
            }),
            ..Default::default()
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn status(&self) -> OperationStatus {
        if !self.done {
            return OperationStatus::Pending;
        }
        match &self.error {
            Some(err) => OperationStatus::Failed(err.clone()),
            None => OperationStatus::Done(
                self.response.clone().unwrap_or(serde_json::Value::Null),
            ),
        }
    }

    /// String field of the operation metadata (e.g. `clusterId`, `keyId`)
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get(key))
            .and_then(|v| v.as_str())
    }
}

fn grpc_code(code: ApiCode) -> i32 {
    match code {
        ApiCode::Cancelled => 1,
        ApiCode::Unknown => 2,
        ApiCode::InvalidArgument => 3,
        ApiCode::DeadlineExceeded => 4,
        ApiCode::NotFound => 5,
        ApiCode::AlreadyExists => 6,
        ApiCode::PermissionDenied => 7,
        ApiCode::ResourceExhausted => 8,
        ApiCode::FailedPrecondition => 9,
        ApiCode::Aborted => 10,
        ApiCode::OutOfRange => 11,
        ApiCode::Unimplemented => 12,
        ApiCode::Internal => 13,
        ApiCode::Unavailable => 14,
        ApiCode::DataLoss => 15,
        ApiCode::Unauthenticated => 16,
    }
}

/// Status endpoint for operations
#[async_trait]
pub trait OperationService: Send + Sync {
    async fn get(&self, operation_id: &str) -> Result<Operation, ApiError>;
}

/// Polling parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOptions {
    pub poll_interval: Duration,
    pub timeout: Duration,
    /// Consecutive transient poll failures tolerated before giving up
    pub max_poll_retries: u32,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            timeout: Duration::from_secs(20 * 60),
            max_poll_retries: 3,
        }
    }
}

/// Terminal failure of a wait
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WaitError {
    /// The operation finished with an error reported by the server
    #[error("operation {operation_id} failed: {message}")]
    Failed {
        operation_id: String,
        code: ApiCode,
        message: String,
    },

    #[error("timed out after {timeout:?} waiting for operation {operation_id}")]
    TimedOut {
        operation_id: String,
        timeout: Duration,
    },

    #[error("wait for operation {operation_id} was cancelled")]
    Cancelled { operation_id: String },

    /// Polling itself kept failing
    #[error("failed to poll operation {operation_id}: {source}")]
    Poll {
        operation_id: String,
        #[source]
        source: ApiError,
    },
}

impl WaitError {
    pub fn operation_id(&self) -> &str {
        match self {
            WaitError::Failed { operation_id, .. }
            | WaitError::TimedOut { operation_id, .. }
            | WaitError::Cancelled { operation_id }
            | WaitError::Poll { operation_id, .. } => operation_id,
        }
    }

    /// Whether the operation's outcome on the server is unknown
    ///
    /// Only a server-reported failure is conclusive; after a timeout,
    /// cancellation or poll failure the operation may still complete.
    pub fn outcome_unknown(&self) -> bool {
        !matches!(self, WaitError::Failed { .. })
    }
}

/// Polls an operation until it reaches a terminal state
pub struct OperationWaiter<'a> {
    service: &'a dyn OperationService,
    options: WaitOptions,
}

impl<'a> OperationWaiter<'a> {
    pub fn new(service: &'a dyn OperationService, options: WaitOptions) -> Self {
        Self { service, options }
    }

    /// Wait for `operation` and return its success payload
    ///
    /// Never polls after the deadline. Cancellation interrupts both the sleep
    /// between polls and a poll in flight. The server-side operation is left
    /// running when the wait is abandoned.
    pub async fn wait(
        &self,
        operation: Operation,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, WaitError> {
        let deadline = Instant::now() + self.options.timeout;
        let operation_id = operation.id.clone();
        let mut current = operation;
        let mut failures = 0u32;

        loop {
            match current.status() {
                OperationStatus::Done(payload) => {
                    info!("operation {} done", operation_id);
                    return Ok(payload);
                }
                OperationStatus::Failed(err) => {
                    return Err(WaitError::Failed {
                        operation_id,
                        code: ApiCode::from_grpc(err.code),
                        message: err.message,
                    });
                }
                OperationStatus::Pending => {}
            }

            if cancel.is_cancelled() {
                return Err(WaitError::Cancelled { operation_id });
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(self.timed_out(operation_id));
            }
            let wake = (now + self.options.poll_interval).min(deadline);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(WaitError::Cancelled { operation_id }),
                _ = sleep_until(wake) => {}
            }

            if Instant::now() >= deadline {
                return Err(self.timed_out(operation_id));
            }

            debug!("polling operation {}", operation_id);
            let polled = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(WaitError::Cancelled { operation_id }),
                _ = sleep_until(deadline) => return Err(self.timed_out(operation_id)),
                polled = self.service.get(&operation_id) => polled,
            };

            match polled {
                Ok(op) => {
                    failures = 0;
                    current = op;
                }
                Err(e) if e.is_transient() && failures < self.options.max_poll_retries => {
                    failures += 1;
                    warn!(
                        "transient error polling operation {} (attempt {}/{}): {}",
                        operation_id, failures, self.options.max_poll_retries, e
                    );
                }
                Err(source) => {
                    return Err(WaitError::Poll {
                        operation_id,
                        source,
                    });
                }
            }
        }
    }

    fn timed_out(&self, operation_id: String) -> WaitError {
        WaitError::TimedOut {
            operation_id,
            timeout: self.options.timeout,
        }
    }
}
