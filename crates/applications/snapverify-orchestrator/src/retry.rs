//! Bounded retry around the cluster gateway
//!
//! | Outcome of one attempt       | Action                                  |
//! |------------------------------|-----------------------------------------|
//! | 2xx                          | return response                         |
//! | 4xx                          | log at debug, return response           |
//! | other status                 | `OperationFailed`, no retry             |
//! | transport timeout            | retry, up to [`MAX_ATTEMPTS`] in total  |
//! | other transport error        | `OperationFailed`, no retry             |

use crate::error::{Result, TransportError, VerifyError};
use crate::gateway::{ApiRequest, ApiResponse, ClusterGateway};
use std::sync::Arc;
use tracing::{debug, warn};

/// Total attempts for a request that keeps timing out
pub const MAX_ATTEMPTS: u32 = 3;

/// Wraps a [`ClusterGateway`] with the retry and status policy
#[derive(Clone)]
pub struct RetryingCaller {
    gateway: Arc<dyn ClusterGateway>,
    max_attempts: u32,
}

impl RetryingCaller {
    /// Create a caller with the default attempt ceiling
    pub fn new(gateway: Arc<dyn ClusterGateway>) -> Self {
        Self {
            gateway,
            max_attempts: MAX_ATTEMPTS,
        }
    }

    /// Execute a request under the retry policy
    ///
    /// Returns `Ok` for 2xx and 4xx responses; callers decide what a 4xx
    /// means for them.
    pub async fn call(&self, request: ApiRequest) -> Result<ApiResponse> {
        let mut attempt = 0;

        loop {
            attempt += 1;

            match self.gateway.send(&request).await {
                Ok(response) if response.is_success() => return Ok(response),
                Ok(response) if response.is_client_error() => {
                    debug!(
                        method = %request.method,
                        target = %request.path,
                        status = response.status,
                        params = %request.describe_parameters(),
                        body = %response.body,
                        "Cluster request rejected"
                    );
                    return Ok(response);
                }
                Ok(response) => {
                    return Err(operation_failed(
                        &request,
                        Some(response.status),
                        body_text(&response),
                    ));
                }
                Err(TransportError::Timeout) if attempt < self.max_attempts => {
                    warn!(
                        request = %request,
                        attempt,
                        max_attempts = self.max_attempts,
                        "Cluster request timed out, retrying"
                    );
                }
                Err(e) => return Err(operation_failed(&request, None, e.to_string())),
            }
        }
    }
}

fn operation_failed(request: &ApiRequest, status: Option<u16>, body: String) -> VerifyError {
    VerifyError::OperationFailed {
        method: request.method.to_string(),
        target: request.path.clone(),
        parameters: request.describe_parameters(),
        status,
        body,
    }
}

fn body_text(response: &ApiResponse) -> String {
    match response.body {
        serde_json::Value::String(ref s) => s.clone(),
        ref other => other.to_string(),
    }
}
