use crate::models::{BackendTarget, TaskKind};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum CoreErrorKind {
    NetworkUnavailable,
    BackendUnavailable,
    Timeout,
    StoreFull,
    Io,
    Validation,
    RetryExhausted,
    Corrupt,
    NotFound,
    Internal,
}

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct CoreError {
    pub backend: Option<BackendTarget>,
    pub task: Option<TaskKind>,
    pub kind: CoreErrorKind,
    pub message: String,
}

impl CoreError {
    pub fn new(kind: CoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            backend: None,
            task: None,
            kind,
            message: message.into(),
        }
    }

    pub fn with_backend(mut self, backend: BackendTarget) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_task(mut self, task: TaskKind) -> Self {
        self.task = Some(task);
        self
    }

    /// Fills attribution fields that the error site left empty, keeping
    /// whatever more specific attribution was already recorded.
    pub fn attributed(mut self, backend: Option<BackendTarget>, task: Option<TaskKind>) -> Self {
        self.backend = self.backend.or(backend);
        self.task = self.task.or(task);
        self
    }
}
