//! Top-level handle tying the monitor, dispatcher, store, and queue
//! together. Hosts construct one `ClientRuntime` per client session and
//! route every UI-facing call through it.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;

use crate::capabilities::{
    ArtifactSink, BackendRequest, BackendTransport, EntityStore, NetworkProbe,
};
use crate::dispatch::{DispatchResponse, ModeDispatcher};
use crate::models::{
    AiMode, CoreError, CoreErrorKind, ModeConfig, ServiceStatus, SyncStatus, TaskId, TaskKind,
};
use crate::monitor::ServiceMonitor;
use crate::persistence::{DurableStore, KeyValueBackend, Namespace, StoreConfig};
use crate::queue::{
    DrainSummary, ExecutorContext, QueueConfig, SharedModeConfig, TaskExecutor, TaskQueue,
    default_executors,
};

pub type RuntimeResult<T> = Result<T, CoreError>;

const MODE_CONFIG_KEY: &str = "ai_mode_config";
const BACKUP_KEY: &str = "latest";

pub const DEFAULT_MONITOR_REFRESH_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_AUTO_DRAIN_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Host-supplied primitives the runtime cannot provide itself.
pub struct RuntimeCapabilities {
    pub probe: Arc<dyn NetworkProbe>,
    pub transport: Arc<dyn BackendTransport>,
    pub entities: Arc<dyn EntityStore>,
    pub artifacts: Arc<dyn ArtifactSink>,
}

#[derive(Clone, Copy, Debug)]
pub struct RuntimeConfig {
    pub store: StoreConfig,
    pub queue: QueueConfig,
    pub monitor_refresh_interval: Duration,
    pub auto_drain_interval: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            queue: QueueConfig::default(),
            monitor_refresh_interval: DEFAULT_MONITOR_REFRESH_INTERVAL,
            auto_drain_interval: DEFAULT_AUTO_DRAIN_INTERVAL,
        }
    }
}

pub struct ClientRuntime {
    store: Arc<DurableStore>,
    monitor: ServiceMonitor,
    dispatcher: ModeDispatcher,
    queue: TaskQueue,
    config: SharedModeConfig,
    background: Vec<JoinHandle<()>>,
}

impl ClientRuntime {
    pub async fn new(
        backend: Box<dyn KeyValueBackend>,
        capabilities: RuntimeCapabilities,
        config: RuntimeConfig,
    ) -> Self {
        Self::with_executors(backend, capabilities, config, default_executors()).await
    }

    /// Variant for hosts that register additional or replacement task
    /// executors.
    pub async fn with_executors(
        backend: Box<dyn KeyValueBackend>,
        capabilities: RuntimeCapabilities,
        config: RuntimeConfig,
        executors: Vec<Arc<dyn TaskExecutor>>,
    ) -> Self {
        let store = Arc::new(DurableStore::new(backend, config.store));

        startup_sweep(store.clone()).await;
        let mode_config = load_mode_config(store.clone()).await;
        let shared_config: SharedModeConfig = Arc::new(RwLock::new(mode_config.clone()));

        let monitor = ServiceMonitor::new(capabilities.probe);
        monitor.refresh(&mode_config).await;

        let dispatcher = ModeDispatcher::new(capabilities.transport.clone(), monitor.clone());
        let ctx = ExecutorContext {
            dispatcher: dispatcher.clone(),
            transport: capabilities.transport,
            entities: capabilities.entities,
            artifacts: capabilities.artifacts,
            config: shared_config.clone(),
        };

        let queue = TaskQueue::new(
            store.clone(),
            monitor.clone(),
            ctx,
            executors,
            config.queue,
        )
        .await;

        let background = vec![
            spawn_monitor_refresh(
                monitor.clone(),
                shared_config.clone(),
                config.monitor_refresh_interval,
            ),
            spawn_online_watcher(monitor.clone(), queue.clone()),
            spawn_auto_drain(monitor.clone(), queue.clone(), config.auto_drain_interval),
        ];

        Self {
            store,
            monitor,
            dispatcher,
            queue,
            config: shared_config,
            background,
        }
    }

    pub fn mode_config(&self) -> RuntimeResult<ModeConfig> {
        read_config(&self.config)
    }

    pub fn status(&self) -> RuntimeResult<ServiceStatus> {
        let config = read_config(&self.config)?;
        let state = self.monitor.current();
        Ok(ServiceStatus {
            mode: config.mode,
            provider: config.provider.clone(),
            hybrid_preference: config.hybrid_preference,
            local_available: state.local_available,
            remote_available: state.remote_available,
            network_online: state.online,
            effective_backend: self.dispatcher.effective_backend(&config),
        })
    }

    pub async fn sync_status(&self) -> SyncStatus {
        self.queue.sync_status().await
    }

    /// Immediate, single-attempt dispatch along the current mode routing.
    pub async fn dispatch(&self, request: BackendRequest) -> RuntimeResult<DispatchResponse> {
        let config = read_config(&self.config)?;
        Ok(self.dispatcher.dispatch(request, &config).await)
    }

    /// Defers work through the durable queue.
    pub async fn submit(
        &self,
        kind: TaskKind,
        payload: Value,
        entity_id: Option<String>,
    ) -> RuntimeResult<TaskId> {
        self.queue.enqueue(kind, payload, entity_id, None).await
    }

    pub async fn manual_sync(&self) -> RuntimeResult<DrainSummary> {
        self.queue.manual_sync().await
    }

    pub async fn retry_failed(&self) -> RuntimeResult<usize> {
        self.queue.retry_failed().await
    }

    pub async fn clear_failed(&self) -> RuntimeResult<usize> {
        self.queue.clear_failed().await
    }

    pub fn set_auto_sync(&self, enabled: bool) {
        self.queue.set_auto_sync(enabled);
    }

    /// The only mutation path for the persisted mode configuration. Persists
    /// first, then publishes to in-flight readers, then re-probes since
    /// credentials and mode affect availability.
    pub async fn save_config(&self, new_config: ModeConfig) -> RuntimeResult<()> {
        let raw = serde_json::to_string(&new_config).map_err(|error| {
            CoreError::new(
                CoreErrorKind::Internal,
                format!("failed to serialize mode config: {error}"),
            )
        })?;

        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.put(Namespace::Settings, MODE_CONFIG_KEY, &raw))
            .await
            .map_err(|join_error| {
                CoreError::new(
                    CoreErrorKind::Internal,
                    format!("config persistence join failure: {join_error}"),
                )
            })??;

        {
            let mut config = self.config.write().map_err(|_| {
                CoreError::new(CoreErrorKind::Internal, "mode config lock was poisoned")
            })?;
            *config = new_config.clone();
        }

        tracing::debug!(mode = new_config.mode.as_str(), provider = %new_config.provider, "mode config saved");
        self.monitor.refresh(&new_config).await;
        Ok(())
    }

    pub async fn switch_mode(&self, mode: AiMode) -> RuntimeResult<()> {
        let mut config = read_config(&self.config)?;
        config.mode = mode;
        self.save_config(config).await
    }

    pub async fn refresh_availability(&self) -> RuntimeResult<ServiceStatus> {
        let config = read_config(&self.config)?;
        self.monitor.refresh(&config).await;
        self.status()
    }

    /// Snapshots every namespace except the backup slot into the backup slot.
    pub async fn create_backup(&self) -> RuntimeResult<()> {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || {
            let blob = store.snapshot()?;
            store.put(Namespace::Backup, BACKUP_KEY, &blob)
        })
        .await
        .map_err(|join_error| {
            CoreError::new(
                CoreErrorKind::Internal,
                format!("backup join failure: {join_error}"),
            )
        })??;
        Ok(())
    }

    /// Restores the most recent backup. Fails without touching current state
    /// when no backup exists or the stored blob is corrupt.
    pub async fn restore_backup(&self) -> RuntimeResult<()> {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || {
            let Some(blob) = store.get(Namespace::Backup, BACKUP_KEY)? else {
                return Err(CoreError::new(
                    CoreErrorKind::NotFound,
                    "no backup available to restore",
                ));
            };
            store.restore(&blob)
        })
        .await
        .map_err(|join_error| {
            CoreError::new(
                CoreErrorKind::Internal,
                format!("restore join failure: {join_error}"),
            )
        })??;

        // Persisted config may have changed underneath us.
        let restored = load_mode_config(self.store.clone()).await;
        if let Ok(mut config) = self.config.write() {
            *config = restored.clone();
        }
        self.monitor.refresh(&restored).await;
        Ok(())
    }

    pub fn store(&self) -> Arc<DurableStore> {
        self.store.clone()
    }

    /// Stops background timers and flushes the queue snapshot.
    pub async fn close(self) {
        for handle in &self.background {
            handle.abort();
        }
        self.queue.persist_now().await;
    }
}

fn read_config(config: &SharedModeConfig) -> RuntimeResult<ModeConfig> {
    config
        .read()
        .map(|config| config.clone())
        .map_err(|_| CoreError::new(CoreErrorKind::Internal, "mode config lock was poisoned"))
}

async fn startup_sweep(store: Arc<DurableStore>) {
    let swept = tokio::task::spawn_blocking(move || store.sweep_expired()).await;
    match swept {
        Ok(Ok(removed)) if removed > 0 => {
            tracing::debug!(removed, "startup cache sweep removed expired entries");
        }
        Ok(Ok(_)) => {}
        Ok(Err(error)) => {
            tracing::warn!(kind = ?error.kind, error = %error.message, "startup cache sweep failed");
        }
        Err(join_error) => {
            tracing::warn!(%join_error, "startup cache sweep join failure");
        }
    }
}

async fn load_mode_config(store: Arc<DurableStore>) -> ModeConfig {
    let loaded = {
        let store = store.clone();
        tokio::task::spawn_blocking(move || store.get(Namespace::Settings, MODE_CONFIG_KEY)).await
    };

    match loaded {
        Ok(Ok(Some(raw))) => match serde_json::from_str(&raw) {
            Ok(config) => return config,
            Err(error) => {
                tracing::warn!(%error, "persisted mode config is unreadable; using defaults");
            }
        },
        Ok(Ok(None)) => {}
        Ok(Err(error)) => {
            tracing::warn!(kind = ?error.kind, error = %error.message, "failed to load mode config; using defaults");
        }
        Err(join_error) => {
            tracing::warn!(%join_error, "mode config load join failure; using defaults");
        }
    }

    let config = ModeConfig::default();
    if let Ok(raw) = serde_json::to_string(&config) {
        let persisted = tokio::task::spawn_blocking(move || {
            store.put(Namespace::Settings, MODE_CONFIG_KEY, &raw)
        })
        .await;
        if let Ok(Err(error)) = persisted {
            tracing::warn!(kind = ?error.kind, error = %error.message, "failed to persist default mode config");
        }
    }
    config
}

fn spawn_monitor_refresh(
    monitor: ServiceMonitor,
    config: SharedModeConfig,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let snapshot = match config.read() {
                Ok(config) => config.clone(),
                Err(_) => continue,
            };
            monitor.refresh(&snapshot).await;
        }
    })
}

/// Drains the queue once whenever availability transitions offline to online.
fn spawn_online_watcher(monitor: ServiceMonitor, queue: TaskQueue) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut rx = monitor.subscribe();
        let mut was_online = rx.borrow().online;
        while rx.changed().await.is_ok() {
            let online = rx.borrow().online;
            if online && !was_online {
                tracing::debug!("connectivity restored; draining deferred tasks");
                let _ = queue.drain().await;
            }
            was_online = online;
        }
    })
}

fn spawn_auto_drain(
    monitor: ServiceMonitor,
    queue: TaskQueue,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if !queue.auto_sync_enabled() || !monitor.current().online {
                continue;
            }
            if queue.is_empty().await {
                continue;
            }
            let _ = queue.drain().await;
        }
    })
}

/// Installs the process-wide tracing subscriber; safe to call more than once.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
