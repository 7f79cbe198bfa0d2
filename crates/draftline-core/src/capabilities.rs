//! Host-supplied primitives. The original client leaned on browser globals
//! (`navigator.onLine`, `fetch`, DOM downloads); here each of those becomes
//! an injected trait so the core stays host-agnostic and testable.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde_json::Value;

use crate::models::{BackendTarget, CoreError};

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

pub type CapabilityResult<T> = Result<T, CoreError>;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ProbeTarget {
    /// Host network reachability, the platform primitive.
    Network,
    LocalBackend,
    RemoteBackend,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ProbeReading {
    pub reachable: bool,
    pub latency: Duration,
}

/// Lightweight health checks. One probe per call; callers own retry policy.
pub trait NetworkProbe: Send + Sync {
    fn probe(&self, target: ProbeTarget) -> BoxFuture<CapabilityResult<ProbeReading>>;
}

/// A generic HTTP-style request against either backend.
#[derive(Clone, Debug, PartialEq)]
pub struct BackendRequest {
    pub path: String,
    pub body: Value,
}

impl BackendRequest {
    pub fn new(path: impl Into<String>, body: Value) -> Self {
        Self {
            path: path.into(),
            body,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BackendReply {
    pub ok: bool,
    pub data: Option<Value>,
    pub error_code: Option<String>,
    pub http_status: Option<u16>,
}

/// Outbound call primitive supplied by host networking code.
pub trait BackendTransport: Send + Sync {
    fn call(
        &self,
        target: BackendTarget,
        request: BackendRequest,
    ) -> BoxFuture<CapabilityResult<BackendReply>>;
}

/// Read/write access to the entities that own task results, provided by the
/// surrounding application.
pub trait EntityStore: Send + Sync {
    fn get_entity(&self, id: &str) -> CapabilityResult<Option<Value>>;

    fn save_entity(&self, id: &str, entity: Value) -> CapabilityResult<()>;
}

/// Client-side save/download hook for rendered export artifacts.
pub trait ArtifactSink: Send + Sync {
    fn deliver(&self, file_name: &str, content: &[u8]) -> CapabilityResult<()>;
}
