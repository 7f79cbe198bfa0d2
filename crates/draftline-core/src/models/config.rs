use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiMode {
    Local,
    Remote,
    Hybrid,
}

impl AiMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
            Self::Hybrid => "hybrid",
        }
    }
}

/// Tie-break for hybrid mode when both backends are healthy. The original
/// application hardcoded "prefer remote"; here it is configuration.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HybridPreference {
    PreferRemote,
    PreferLocal,
}

/// Persisted dispatch configuration. Mutated only through the runtime's
/// save-configuration path; read on every outbound request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModeConfig {
    pub mode: AiMode,
    pub provider: String,
    pub api_key: Option<String>,
    pub endpoint: Option<String>,
    pub model: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_ms: u64,
    #[serde(default = "default_hybrid_preference")]
    pub hybrid_preference: HybridPreference,
}

fn default_hybrid_preference() -> HybridPreference {
    HybridPreference::PreferRemote
}

impl Default for ModeConfig {
    fn default() -> Self {
        Self {
            mode: AiMode::Hybrid,
            provider: "deepseek".to_string(),
            api_key: None,
            endpoint: None,
            model: Some("deepseek-chat".to_string()),
            temperature: 0.7,
            max_tokens: 2000,
            timeout_ms: 30_000,
            hybrid_preference: HybridPreference::PreferRemote,
        }
    }
}

impl ModeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Remote probing and dispatch require configured credentials.
    pub fn has_credentials(&self) -> bool {
        self.api_key.as_deref().is_some_and(|key| !key.is_empty())
    }
}
