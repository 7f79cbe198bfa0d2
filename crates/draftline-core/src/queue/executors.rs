//! One executor per task kind. The registry keeps new kinds additive: the
//! drain loop only ever looks a kind up, it never matches on it.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};
use tokio::time::timeout;

use crate::capabilities::{
    ArtifactSink, BackendRequest, BackendTransport, BoxFuture, EntityStore,
};
use crate::dispatch::ModeDispatcher;
use crate::models::{BackendTarget, CoreError, CoreErrorKind, ModeConfig, Task, TaskKind};

pub type ExecutorResult = Result<(), CoreError>;
pub type ExecutorFuture = BoxFuture<ExecutorResult>;

/// Shared handle to the persisted mode configuration; the runtime mutates it
/// through the save-configuration path only.
pub type SharedModeConfig = Arc<RwLock<ModeConfig>>;

#[derive(Clone)]
pub struct ExecutorContext {
    pub dispatcher: ModeDispatcher,
    pub transport: Arc<dyn BackendTransport>,
    pub entities: Arc<dyn EntityStore>,
    pub artifacts: Arc<dyn ArtifactSink>,
    pub config: SharedModeConfig,
}

impl ExecutorContext {
    fn current_config(&self) -> Result<ModeConfig, CoreError> {
        self.config
            .read()
            .map(|config| config.clone())
            .map_err(|_| CoreError::new(CoreErrorKind::Internal, "mode config lock was poisoned"))
    }
}

pub trait TaskExecutor: Send + Sync {
    fn kind(&self) -> TaskKind;

    fn execute(&self, task: &Task, ctx: &ExecutorContext) -> ExecutorFuture;
}

/// The built-in executor set, one per kind.
pub fn default_executors() -> Vec<Arc<dyn TaskExecutor>> {
    vec![
        Arc::new(AiRequestExecutor),
        Arc::new(FileUploadExecutor),
        Arc::new(DataSyncExecutor),
        Arc::new(ExportExecutor),
    ]
}

fn validation_error(kind: TaskKind, error: serde_json::Error) -> CoreError {
    CoreError::new(
        CoreErrorKind::Validation,
        format!("malformed {} payload: {error}", kind.as_str()),
    )
    .with_task(kind)
}

/// Bounded direct transport call for the non-AI kinds; the dispatcher is
/// reserved for requests that should follow mode routing.
async fn call_local(
    ctx: &ExecutorContext,
    request: BackendRequest,
    call_timeout: Duration,
    kind: TaskKind,
) -> Result<Value, CoreError> {
    let reply = timeout(call_timeout, ctx.transport.call(BackendTarget::Local, request))
        .await
        .map_err(|_| {
            CoreError::new(
                CoreErrorKind::Timeout,
                format!("{} call timed out", kind.as_str()),
            )
            .with_backend(BackendTarget::Local)
            .with_task(kind)
        })?
        .map_err(|error| error.attributed(Some(BackendTarget::Local), Some(kind)))?;

    if !reply.ok {
        return Err(CoreError::new(
            CoreErrorKind::BackendUnavailable,
            reply
                .error_code
                .unwrap_or_else(|| format!("backend replied with http status {:?}", reply.http_status)),
        )
        .with_backend(BackendTarget::Local)
        .with_task(kind));
    }

    Ok(reply.data.unwrap_or(Value::Null))
}

// --- AI request ---

fn default_merge_field() -> String {
    "analysis".to_string()
}

#[derive(Deserialize)]
struct AiRequestPayload {
    messages: Vec<Value>,
    #[serde(default)]
    temperature: Option<f32>,
    #[serde(default)]
    max_tokens: Option<u32>,
    /// Entity field that receives the response on success.
    #[serde(default = "default_merge_field")]
    merge_field: String,
}

pub struct AiRequestExecutor;

impl TaskExecutor for AiRequestExecutor {
    fn kind(&self) -> TaskKind {
        TaskKind::AiRequest
    }

    fn execute(&self, task: &Task, ctx: &ExecutorContext) -> ExecutorFuture {
        let payload = task.payload.clone();
        let entity_id = task.entity_id.clone();
        let ctx = ctx.clone();

        Box::pin(async move {
            let payload: AiRequestPayload = serde_json::from_value(payload)
                .map_err(|error| validation_error(TaskKind::AiRequest, error))?;
            let config = ctx.current_config()?;

            let body = json!({
                "model": config.model,
                "messages": payload.messages,
                "temperature": payload.temperature.unwrap_or(config.temperature),
                "max_tokens": payload.max_tokens.unwrap_or(config.max_tokens),
            });

            let response = ctx
                .dispatcher
                .dispatch(BackendRequest::new("/ai/chat", body), &config)
                .await;
            if !response.success {
                return Err(CoreError::new(
                    CoreErrorKind::BackendUnavailable,
                    response
                        .error
                        .unwrap_or_else(|| "ai request failed".to_string()),
                )
                .with_backend(response.source)
                .with_task(TaskKind::AiRequest));
            }

            if let Some(entity_id) = entity_id
                && let Some(mut entity) = ctx.entities.get_entity(&entity_id)?
            {
                entity[payload.merge_field.as_str()] = response.data.unwrap_or(Value::Null);
                ctx.entities.save_entity(&entity_id, entity)?;
            }

            Ok(())
        })
    }
}

// --- File upload ---

#[derive(Deserialize)]
struct FileUploadPayload {
    file_ref: String,
    destination: String,
    #[serde(default)]
    file_name: Option<String>,
}

pub struct FileUploadExecutor;

impl TaskExecutor for FileUploadExecutor {
    fn kind(&self) -> TaskKind {
        TaskKind::FileUpload
    }

    fn execute(&self, task: &Task, ctx: &ExecutorContext) -> ExecutorFuture {
        let payload = task.payload.clone();
        let entity_id = task.entity_id.clone();
        let ctx = ctx.clone();

        Box::pin(async move {
            let payload: FileUploadPayload = serde_json::from_value(payload)
                .map_err(|error| validation_error(TaskKind::FileUpload, error))?;
            let config = ctx.current_config()?;

            let body = json!({
                "file": payload.file_ref,
                "file_name": payload.file_name,
            });
            let uploaded = call_local(
                &ctx,
                BackendRequest::new(payload.destination, body),
                config.timeout(),
                TaskKind::FileUpload,
            )
            .await?;

            if let Some(entity_id) = entity_id
                && let Some(mut entity) = ctx.entities.get_entity(&entity_id)?
            {
                match entity.get_mut("materials").and_then(Value::as_array_mut) {
                    Some(materials) => materials.push(uploaded),
                    None => {
                        entity["materials"] = Value::Array(vec![uploaded]);
                    }
                }
                ctx.entities.save_entity(&entity_id, entity)?;
            }

            Ok(())
        })
    }
}

// --- Data sync ---

fn default_sync_path() -> String {
    "/projects/sync".to_string()
}

#[derive(Deserialize)]
struct DataSyncPayload {
    snapshot: Value,
    #[serde(default = "default_sync_path")]
    path: String,
}

pub struct DataSyncExecutor;

impl TaskExecutor for DataSyncExecutor {
    fn kind(&self) -> TaskKind {
        TaskKind::DataSync
    }

    fn execute(&self, task: &Task, ctx: &ExecutorContext) -> ExecutorFuture {
        let payload = task.payload.clone();
        let ctx = ctx.clone();

        Box::pin(async move {
            let payload: DataSyncPayload = serde_json::from_value(payload)
                .map_err(|error| validation_error(TaskKind::DataSync, error))?;
            let config = ctx.current_config()?;

            // Push the full snapshot; success leaves local state untouched.
            call_local(
                &ctx,
                BackendRequest::new(payload.path, payload.snapshot),
                config.timeout(),
                TaskKind::DataSync,
            )
            .await?;

            Ok(())
        })
    }
}

// --- Export ---

#[derive(Deserialize)]
struct ExportPayload {
    format: String,
    #[serde(default)]
    options: Value,
}

pub struct ExportExecutor;

impl TaskExecutor for ExportExecutor {
    fn kind(&self) -> TaskKind {
        TaskKind::Export
    }

    fn execute(&self, task: &Task, ctx: &ExecutorContext) -> ExecutorFuture {
        let payload = task.payload.clone();
        let entity_id = task.entity_id.clone();
        let ctx = ctx.clone();

        Box::pin(async move {
            let payload: ExportPayload = serde_json::from_value(payload)
                .map_err(|error| validation_error(TaskKind::Export, error))?;
            let config = ctx.current_config()?;

            let body = json!({
                "entity_id": entity_id,
                "format": payload.format,
                "options": payload.options,
            });
            let artifact = call_local(
                &ctx,
                BackendRequest::new("/export", body),
                config.timeout(),
                TaskKind::Export,
            )
            .await?;

            let stem = entity_id.as_deref().unwrap_or("export");
            let file_name = format!("{stem}.{}", payload.format);
            let content = match &artifact {
                Value::String(text) => text.clone().into_bytes(),
                other => serde_json::to_vec(other).map_err(|error| {
                    CoreError::new(
                        CoreErrorKind::Internal,
                        format!("failed to encode export artifact: {error}"),
                    )
                    .with_task(TaskKind::Export)
                })?,
            };

            ctx.artifacts.deliver(&file_name, &content)?;
            Ok(())
        })
    }
}
