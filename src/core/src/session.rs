use serde::{Deserialize, Serialize};

use crate::config::RelayConfig;
use crate::harness::{MemoryScope, ProviderOptions, RunOptions, ThinkingOptions};

/// Tool-permission posture for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PermissionMode {
    #[serde(rename = "default")]
    Default,
    #[serde(rename = "acceptEdits")]
    AcceptEdits,
    #[serde(rename = "bypassPermissions")]
    BypassPermissions,
}

impl PermissionMode {
    /// The harness approval flag is boolean; accept-edits only
    /// auto-accepts edit tools, so non-edit calls still need approval.
    pub fn requires_tool_approval(self) -> bool {
        !matches!(self, Self::BypassPermissions)
    }
}

/// Last-known run configuration for a session. Created on the first
/// `ensure_runtime` call, mutated when a send changes model or
/// permissions, cleared on unrecoverable run failure and at stop.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub cwd: String,
    pub model_id: String,
    pub permission_mode: PermissionMode,
    pub thinking_enabled: bool,
}

impl SessionContext {
    pub fn from_config(config: &RelayConfig, cwd: Option<&str>) -> Self {
        Self {
            cwd: cwd.unwrap_or(&config.chat.default_cwd).to_string(),
            model_id: config.chat.default_model.clone(),
            permission_mode: PermissionMode::Default,
            thinking_enabled: false,
        }
    }

    /// Ordered connection parameters forwarded to the harness. Optional
    /// entries appear only when applicable: auth headers when non-empty,
    /// thinking only when enabled.
    pub fn request_entries(&self, config: &RelayConfig) -> Vec<(String, String)> {
        let mut entries = vec![
            ("modelId".to_string(), self.model_id.clone()),
            ("cwd".to_string(), self.cwd.clone()),
            ("apiUrl".to_string(), config.api.url.clone()),
        ];
        if !config.api.auth_headers.is_empty() {
            if let Ok(headers) = serde_json::to_string(&config.api.auth_headers) {
                entries.push(("authHeaders".to_string(), headers));
            }
        }
        if self.thinking_enabled {
            entries.push(("thinkingEnabled".to_string(), "true".to_string()));
        }
        entries
    }

    pub fn run_options(&self, config: &RelayConfig, session_id: &str) -> RunOptions {
        RunOptions {
            max_steps: config.chat.max_steps,
            memory: MemoryScope {
                thread: session_id.to_string(),
                resource: session_id.to_string(),
            },
            require_tool_approval: self.permission_mode.requires_tool_approval(),
            provider_options: self.thinking_enabled.then(|| ProviderOptions {
                thinking: ThinkingOptions {
                    budget_tokens: config.chat.thinking_budget_tokens,
                },
            }),
            request_entries: self.request_entries(config),
        }
    }
}
