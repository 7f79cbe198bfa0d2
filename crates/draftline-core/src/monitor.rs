use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::timeout;

use crate::capabilities::{NetworkProbe, ProbeReading, ProbeTarget};
use crate::models::{AvailabilityState, LatencyClass, ModeConfig};

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);
pub const FAST_LATENCY_THRESHOLD: Duration = Duration::from_millis(500);

/// Recomputes network and backend availability on demand. Owns no timers;
/// the caller schedules refreshes so that multiple handles never race
/// duplicate probe schedules.
#[derive(Clone)]
pub struct ServiceMonitor {
    probe: Arc<dyn NetworkProbe>,
    state_tx: Arc<watch::Sender<AvailabilityState>>,
    probe_timeout: Duration,
}

impl ServiceMonitor {
    pub fn new(probe: Arc<dyn NetworkProbe>) -> Self {
        Self::with_probe_timeout(probe, DEFAULT_PROBE_TIMEOUT)
    }

    pub fn with_probe_timeout(probe: Arc<dyn NetworkProbe>, probe_timeout: Duration) -> Self {
        let (state_tx, _) = watch::channel(AvailabilityState::offline());
        Self {
            probe,
            state_tx: Arc::new(state_tx),
            probe_timeout,
        }
    }

    /// Latest published state. Starts fully offline until the first refresh.
    pub fn current(&self) -> AvailabilityState {
        *self.state_tx.borrow()
    }

    /// Change notifications for availability transitions.
    pub fn subscribe(&self) -> watch::Receiver<AvailabilityState> {
        self.state_tx.subscribe()
    }

    /// One probe attempt per target, then an atomic replacement of the whole
    /// availability record. No internal retries.
    pub async fn refresh(&self, config: &ModeConfig) -> AvailabilityState {
        let next = self.compute_state(config).await;
        self.state_tx.send_replace(next);
        next
    }

    async fn compute_state(&self, config: &ModeConfig) -> AvailabilityState {
        let Some(network) = self.single_probe(ProbeTarget::Network).await else {
            return AvailabilityState::offline();
        };
        if !network.reachable {
            return AvailabilityState::offline();
        }

        let (local_available, latency_class) = match self.single_probe(ProbeTarget::LocalBackend).await {
            Some(reading) if reading.reachable => {
                let class = if reading.latency < FAST_LATENCY_THRESHOLD {
                    LatencyClass::Fast
                } else {
                    LatencyClass::Slow
                };
                (true, class)
            }
            _ => (false, LatencyClass::Offline),
        };

        let remote_available = if config.has_credentials() {
            matches!(
                self.single_probe(ProbeTarget::RemoteBackend).await,
                Some(reading) if reading.reachable
            )
        } else {
            false
        };

        AvailabilityState {
            online: true,
            latency_class,
            local_available,
            remote_available,
        }
    }

    async fn single_probe(&self, target: ProbeTarget) -> Option<ProbeReading> {
        match timeout(self.probe_timeout, self.probe.probe(target)).await {
            Ok(Ok(reading)) => Some(reading),
            Ok(Err(error)) => {
                tracing::debug!(probe_target = ?target, kind = ?error.kind, error = %error.message, "probe failed");
                None
            }
            Err(_) => {
                tracing::debug!(probe_target = ?target, timeout_ms = self.probe_timeout.as_millis() as u64, "probe timed out");
                None
            }
        }
    }
}
