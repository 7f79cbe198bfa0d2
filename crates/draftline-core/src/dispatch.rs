use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio::time::timeout;

use crate::capabilities::{BackendRequest, BackendTransport};
use crate::models::{
    AiMode, AvailabilityState, BackendTarget, CoreError, HybridPreference, LatencyClass, ModeConfig,
};
use crate::monitor::ServiceMonitor;

pub type DispatchResult<T> = Result<T, CoreError>;

/// Pure routing decision. Given the same mode and availability readings this
/// returns the same backend every call.
pub fn select_backend(state: AvailabilityState, config: &ModeConfig) -> BackendTarget {
    match config.mode {
        AiMode::Local => BackendTarget::Local,
        AiMode::Remote => BackendTarget::Remote,
        AiMode::Hybrid => {
            if !state.online || state.latency_class == LatencyClass::Slow {
                // Degraded connectivity: stay local when possible, otherwise
                // fall through to remote as a best-effort attempt.
                if state.local_available {
                    BackendTarget::Local
                } else {
                    BackendTarget::Remote
                }
            } else if !state.remote_available {
                BackendTarget::Local
            } else if !state.local_available {
                BackendTarget::Remote
            } else {
                match config.hybrid_preference {
                    HybridPreference::PreferRemote => BackendTarget::Remote,
                    HybridPreference::PreferLocal => BackendTarget::Local,
                }
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DispatchResponse {
    pub success: bool,
    pub data: Option<Value>,
    pub error: Option<String>,
    /// Backend actually attempted, also on failure; callers use it to decide
    /// whether to queue the work for later retry.
    pub source: BackendTarget,
    pub elapsed_ms: u64,
}

/// Chooses a backend and performs exactly one attempt. Never retries and
/// never queues; deferred work is the task queue's job.
#[derive(Clone)]
pub struct ModeDispatcher {
    transport: Arc<dyn BackendTransport>,
    monitor: ServiceMonitor,
}

impl ModeDispatcher {
    pub fn new(transport: Arc<dyn BackendTransport>, monitor: ServiceMonitor) -> Self {
        Self { transport, monitor }
    }

    pub fn effective_backend(&self, config: &ModeConfig) -> BackendTarget {
        select_backend(self.monitor.current(), config)
    }

    pub async fn dispatch(&self, request: BackendRequest, config: &ModeConfig) -> DispatchResponse {
        let target = self.effective_backend(config);
        let started = Instant::now();

        let outcome = timeout(config.timeout(), self.transport.call(target, request)).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Err(_) => DispatchResponse {
                success: false,
                data: None,
                error: Some(format!(
                    "request to {} backend timed out after {}ms",
                    target.as_str(),
                    config.timeout_ms
                )),
                source: target,
                elapsed_ms,
            },
            Ok(Err(error)) => DispatchResponse {
                success: false,
                data: None,
                error: Some(error.message),
                source: target,
                elapsed_ms,
            },
            Ok(Ok(reply)) if reply.ok => DispatchResponse {
                success: true,
                data: reply.data,
                error: None,
                source: target,
                elapsed_ms,
            },
            Ok(Ok(reply)) => DispatchResponse {
                success: false,
                data: None,
                error: Some(
                    reply
                        .error_code
                        .unwrap_or_else(|| format!("backend replied with http status {:?}", reply.http_status)),
                ),
                source: target,
                elapsed_ms,
            },
        }
    }
}
