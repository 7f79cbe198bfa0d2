use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};

use draftline_core::capabilities::{
    ArtifactSink, BackendReply, BackendRequest, BackendTransport, BoxFuture, CapabilityResult,
    EntityStore, NetworkProbe, ProbeReading, ProbeTarget,
};
use draftline_core::models::{
    AiMode, BackendTarget, CoreError, CoreErrorKind, ModeConfig, TaskKind,
};
use draftline_core::persistence::{InMemoryBackend, Namespace};
use draftline_core::runtime::{ClientRuntime, RuntimeCapabilities, RuntimeConfig};

struct TogglingProbe {
    online: AtomicBool,
}

impl TogglingProbe {
    fn new(online: bool) -> Arc<Self> {
        Arc::new(Self {
            online: AtomicBool::new(online),
        })
    }
}

impl NetworkProbe for TogglingProbe {
    fn probe(&self, _target: ProbeTarget) -> BoxFuture<CapabilityResult<ProbeReading>> {
        let online = self.online.load(Ordering::SeqCst);
        Box::pin(async move {
            if online {
                Ok(ProbeReading {
                    reachable: true,
                    latency: Duration::from_millis(25),
                })
            } else {
                Err(CoreError::new(
                    CoreErrorKind::NetworkUnavailable,
                    "network down",
                ))
            }
        })
    }
}

struct OkTransport {
    reply_data: Value,
    paths: Mutex<Vec<(BackendTarget, String)>>,
}

impl OkTransport {
    fn new(reply_data: Value) -> Arc<Self> {
        Arc::new(Self {
            reply_data,
            paths: Mutex::new(Vec::new()),
        })
    }
}

impl BackendTransport for OkTransport {
    fn call(
        &self,
        target: BackendTarget,
        request: BackendRequest,
    ) -> BoxFuture<CapabilityResult<BackendReply>> {
        self.paths.lock().unwrap().push((target, request.path));
        let data = self.reply_data.clone();
        Box::pin(async move {
            Ok(BackendReply {
                ok: true,
                data: Some(data),
                error_code: None,
                http_status: Some(200),
            })
        })
    }
}

#[derive(Default)]
struct MapEntityStore {
    entities: Mutex<HashMap<String, Value>>,
}

impl MapEntityStore {
    fn seeded(id: &str, entity: Value) -> Arc<Self> {
        let store = Self::default();
        store.entities.lock().unwrap().insert(id.to_string(), entity);
        Arc::new(store)
    }

    fn get(&self, id: &str) -> Option<Value> {
        self.entities.lock().unwrap().get(id).cloned()
    }
}

impl EntityStore for MapEntityStore {
    fn get_entity(&self, id: &str) -> CapabilityResult<Option<Value>> {
        Ok(self.get(id))
    }

    fn save_entity(&self, id: &str, entity: Value) -> CapabilityResult<()> {
        self.entities.lock().unwrap().insert(id.to_string(), entity);
        Ok(())
    }
}

#[derive(Default)]
struct RecordingSink {
    files: Mutex<Vec<(String, Vec<u8>)>>,
}

impl RecordingSink {
    fn has(&self, file_name: &str) -> bool {
        self.files
            .lock()
            .unwrap()
            .iter()
            .any(|(name, _)| name == file_name)
    }
}

impl ArtifactSink for RecordingSink {
    fn deliver(&self, file_name: &str, content: &[u8]) -> CapabilityResult<()> {
        self.files
            .lock()
            .unwrap()
            .push((file_name.to_string(), content.to_vec()));
        Ok(())
    }
}

struct Fixture {
    backend: Arc<InMemoryBackend>,
    probe: Arc<TogglingProbe>,
    entities: Arc<MapEntityStore>,
    artifacts: Arc<RecordingSink>,
}

impl Fixture {
    fn new(online: bool) -> Self {
        Self {
            backend: Arc::new(InMemoryBackend::new()),
            probe: TogglingProbe::new(online),
            entities: MapEntityStore::seeded("e1", json!({"title": "Doc"})),
            artifacts: Arc::new(RecordingSink::default()),
        }
    }

    async fn runtime(&self) -> ClientRuntime {
        self.runtime_with(OkTransport::new(json!({"reply": "ok"}))).await
    }

    async fn runtime_with(&self, transport: Arc<OkTransport>) -> ClientRuntime {
        ClientRuntime::new(
            Box::new(self.backend.clone()),
            RuntimeCapabilities {
                probe: self.probe.clone(),
                transport,
                entities: self.entities.clone(),
                artifacts: self.artifacts.clone(),
            },
            RuntimeConfig::default(),
        )
        .await
    }
}

async fn wait_until(description: &str, condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {description}");
}

#[tokio::test]
async fn boots_with_defaults_and_persists_them() {
    let fixture = Fixture::new(false);
    let runtime = fixture.runtime().await;

    let status = runtime.status().unwrap();
    assert_eq!(status.mode, AiMode::Hybrid);
    assert_eq!(status.provider, "deepseek");
    assert!(!status.network_online);
    // Offline with no confirmed local backend, hybrid falls back to remote
    // as the best-effort attempt.
    assert_eq!(status.effective_backend, BackendTarget::Remote);

    let persisted = runtime
        .store()
        .get(Namespace::Settings, "ai_mode_config")
        .unwrap();
    assert!(persisted.is_some());
    runtime.close().await;
}

#[tokio::test]
async fn mode_switch_survives_restart() {
    let fixture = Fixture::new(false);
    let runtime = fixture.runtime().await;
    runtime.switch_mode(AiMode::Local).await.unwrap();
    runtime.close().await;

    let reopened = fixture.runtime().await;
    assert_eq!(reopened.status().unwrap().mode, AiMode::Local);
    reopened.close().await;
}

#[tokio::test]
async fn saving_credentials_enables_remote_routing() {
    let fixture = Fixture::new(true);
    let runtime = fixture.runtime().await;
    assert_eq!(
        runtime.status().unwrap().effective_backend,
        BackendTarget::Local
    );

    let config = ModeConfig {
        api_key: Some("secret".to_string()),
        ..runtime.mode_config().unwrap()
    };
    runtime.save_config(config).await.unwrap();

    let status = runtime.status().unwrap();
    assert!(status.remote_available);
    assert_eq!(status.effective_backend, BackendTarget::Remote);
    runtime.close().await;
}

#[tokio::test]
async fn submitted_ai_request_merges_response_into_entity() {
    let fixture = Fixture::new(true);
    let transport = OkTransport::new(json!({"content": "summary text"}));
    let runtime = fixture.runtime_with(transport).await;

    runtime
        .submit(
            TaskKind::AiRequest,
            json!({"messages": [{"role": "user", "content": "summarize"}]}),
            Some("e1".to_string()),
        )
        .await
        .unwrap();

    let entities = fixture.entities.clone();
    wait_until("entity gains analysis field", move || {
        entities
            .get("e1")
            .is_some_and(|entity| entity.get("analysis").is_some())
    })
    .await;

    let entity = fixture.entities.get("e1").unwrap();
    assert_eq!(entity["analysis"], json!({"content": "summary text"}));
    assert_eq!(entity["title"], "Doc");
    runtime.close().await;
}

#[tokio::test]
async fn submitted_export_delivers_named_artifact() {
    let fixture = Fixture::new(true);
    let runtime = fixture.runtime().await;

    runtime
        .submit(
            TaskKind::Export,
            json!({"format": "pdf"}),
            Some("e1".to_string()),
        )
        .await
        .unwrap();

    let artifacts = fixture.artifacts.clone();
    wait_until("export artifact delivered", move || artifacts.has("e1.pdf")).await;
    runtime.close().await;
}

#[tokio::test]
async fn offline_submissions_flush_through_manual_sync() {
    let fixture = Fixture::new(false);
    let runtime = fixture.runtime().await;

    runtime
        .submit(TaskKind::DataSync, json!({"snapshot": {}}), None)
        .await
        .unwrap();
    assert_eq!(runtime.sync_status().await.pending_count, 1);

    fixture.probe.online.store(true, Ordering::SeqCst);
    runtime.refresh_availability().await.unwrap();
    runtime.manual_sync().await.unwrap();

    // The online-transition watcher may race the manual drain; either way
    // the queue must end up flushed and timestamped.
    for _ in 0..200 {
        if runtime.sync_status().await.pending_count == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let status = runtime.sync_status().await;
    assert_eq!(status.pending_count, 0);
    assert_eq!(status.failed_count, 0);
    assert!(status.last_sync_unix.is_some());
    runtime.close().await;
}

#[tokio::test]
async fn dispatch_uses_current_mode_routing() {
    let fixture = Fixture::new(true);
    let runtime = fixture.runtime().await;

    let response = runtime
        .dispatch(BackendRequest::new("/ai/chat", json!({"messages": []})))
        .await
        .unwrap();
    assert!(response.success);
    // No credentials configured, so hybrid routes locally.
    assert_eq!(response.source, BackendTarget::Local);
    runtime.close().await;
}

#[tokio::test]
async fn backup_and_restore_round_trip() {
    let fixture = Fixture::new(false);
    let runtime = fixture.runtime().await;
    let store = runtime.store();

    store.put(Namespace::Projects, "p1", "original").unwrap();
    runtime.create_backup().await.unwrap();

    store.put(Namespace::Projects, "p1", "mutated").unwrap();
    store.put(Namespace::Projects, "p2", "extra").unwrap();

    runtime.restore_backup().await.unwrap();
    assert_eq!(
        store.get(Namespace::Projects, "p1").unwrap().as_deref(),
        Some("original")
    );
    assert_eq!(store.get(Namespace::Projects, "p2").unwrap(), None);
    runtime.close().await;
}

#[tokio::test]
async fn restore_without_backup_fails_cleanly() {
    let fixture = Fixture::new(false);
    let runtime = fixture.runtime().await;
    runtime.store().put(Namespace::Projects, "p1", "doc").unwrap();

    let error = runtime.restore_backup().await.unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::NotFound);
    assert!(
        runtime
            .store()
            .get(Namespace::Projects, "p1")
            .unwrap()
            .is_some()
    );
    runtime.close().await;
}

#[tokio::test]
async fn auto_sync_flag_is_reflected_in_sync_status() {
    let fixture = Fixture::new(false);
    let runtime = fixture.runtime().await;

    assert!(runtime.sync_status().await.auto_sync_enabled);
    runtime.set_auto_sync(false);
    assert!(!runtime.sync_status().await.auto_sync_enabled);
    runtime.close().await;
}

#[tokio::test]
async fn pending_work_survives_restart() {
    let fixture = Fixture::new(false);
    let runtime = fixture.runtime().await;
    runtime
        .submit(TaskKind::DataSync, json!({"snapshot": {}}), None)
        .await
        .unwrap();
    runtime.close().await;

    let reopened = fixture.runtime().await;
    assert_eq!(reopened.sync_status().await.pending_count, 1);
    reopened.close().await;
}
