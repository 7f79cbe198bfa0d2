use serde::{Deserialize, Serialize};

use crate::models::{AiMode, HybridPreference};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendTarget {
    Local,
    Remote,
}

impl BackendTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum LatencyClass {
    Fast,
    Slow,
    Offline,
}

/// One refresh's view of network and backend health. Never partially
/// updated: the monitor replaces the whole record atomically.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AvailabilityState {
    pub online: bool,
    pub latency_class: LatencyClass,
    pub local_available: bool,
    pub remote_available: bool,
}

impl AvailabilityState {
    pub fn offline() -> Self {
        Self {
            online: false,
            latency_class: LatencyClass::Offline,
            local_available: false,
            remote_available: false,
        }
    }
}

/// Routing summary for dashboards and status badges.
#[derive(Clone, Debug, PartialEq)]
pub struct ServiceStatus {
    pub mode: AiMode,
    pub provider: String,
    pub hybrid_preference: HybridPreference,
    pub local_available: bool,
    pub remote_available: bool,
    pub network_online: bool,
    pub effective_backend: BackendTarget,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SyncStatus {
    pub pending_count: usize,
    pub failed_count: usize,
    pub last_sync_unix: Option<i64>,
    pub auto_sync_enabled: bool,
}
