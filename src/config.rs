//! Global configuration parsing, validation, and credential loading.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::process::EnvPolicy;
use crate::{AppError, Result};

/// Keychain service under which credentials are stored.
pub const KEYRING_SERVICE: &str = "agent-switchboard";

/// Environment variable carrying the repository-hosting token to the tool server.
pub const GITHUB_TOKEN_ENV: &str = "GITHUB_TOKEN";
/// Environment variable carrying the memory-service key to the tool server.
pub const MEMORY_API_KEY_ENV: &str = "MEMORY_API_KEY";
/// Environment variable carrying the memory-service base URL to the tool server.
pub const MEMORY_BASE_URL_ENV: &str = "MEMORY_BASE_URL";

/// How to launch the tool server.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ToolServerConfig {
    /// Executable (e.g. `node`).
    pub command: String,
    /// Arguments (e.g. the server script path).
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment for the server.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Working directory for the server.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Wait after launch before checking liveness, in milliseconds.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    /// Deadline for each tool call, in seconds.
    #[serde(default = "default_call_timeout_seconds")]
    pub call_timeout_seconds: u64,
}

fn default_settle_ms() -> u64 {
    1000
}

fn default_call_timeout_seconds() -> u64 {
    30
}

/// How to launch agent processes.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AgentConfig {
    /// Agent executable.
    pub command: String,
    /// Arguments placed before the per-spawn flags.
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory for agents.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Tools granted when a spawn request names none.
    #[serde(default)]
    pub default_tools: Vec<String>,
    /// Strip the inherited environment down to an allowlist.
    #[serde(default)]
    pub isolate_env: bool,
    /// Extra variables passed through when `isolate_env` is set.
    #[serde(default)]
    pub env_passthrough: Vec<String>,
}

impl AgentConfig {
    /// Environment policy derived from `isolate_env` / `env_passthrough`.
    #[must_use]
    pub fn env_policy(&self) -> EnvPolicy {
        if self.isolate_env {
            EnvPolicy::Isolated(self.env_passthrough.clone())
        } else {
            EnvPolicy::Inherit
        }
    }
}

/// Memory-service settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct MemoryConfig {
    /// Owner id under which execution history is recorded.
    #[serde(default = "default_owner_id")]
    pub owner_id: String,
    /// Base URL of the memory service, forwarded to the tool server.
    #[serde(default)]
    pub base_url: Option<String>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            owner_id: default_owner_id(),
            base_url: None,
        }
    }
}

fn default_owner_id() -> String {
    "agent-switchboard".into()
}

/// Secrets forwarded to the tool server (populated at runtime).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Repository-hosting access token.
    pub github_token: Option<String>,
    /// Memory-service access key.
    pub memory_api_key: Option<String>,
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Tool-server launch settings.
    pub tool_server: ToolServerConfig,
    /// Agent launch settings.
    pub agent: AgentConfig,
    /// Memory-service settings.
    #[serde(default)]
    pub memory: MemoryConfig,
    /// Secrets loaded from the keychain or environment, never from TOML.
    #[serde(skip)]
    pub credentials: Credentials,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and validate it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load tool-server credentials from OS keychain with env-var fallback.
    ///
    /// Missing credentials are logged and left unset; the tools that need
    /// them fail on their own when called.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the keychain lookup task panics.
    pub async fn load_credentials(&mut self) -> Result<()> {
        self.credentials.github_token = load_credential("github_token", GITHUB_TOKEN_ENV).await?;
        self.credentials.memory_api_key =
            load_credential("memory_api_key", MEMORY_API_KEY_ENV).await?;
        Ok(())
    }

    /// Environment entries that carry credentials and the memory base URL
    /// to the tool server. Unset values are omitted.
    #[must_use]
    pub fn credential_env(&self) -> Vec<(String, String)> {
        [
            (GITHUB_TOKEN_ENV, self.credentials.github_token.as_ref()),
            (MEMORY_API_KEY_ENV, self.credentials.memory_api_key.as_ref()),
            (MEMORY_BASE_URL_ENV, self.memory.base_url.as_ref()),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.map(|v| (key.to_owned(), v.clone())))
        .collect()
    }

    fn validate(&mut self) -> Result<()> {
        if self.tool_server.command.trim().is_empty() {
            return Err(AppError::Config(
                "tool_server.command must not be empty".into(),
            ));
        }

        if self.agent.command.trim().is_empty() {
            return Err(AppError::Config("agent.command must not be empty".into()));
        }

        if self.tool_server.call_timeout_seconds == 0 {
            return Err(AppError::Config(
                "tool_server.call_timeout_seconds must be greater than zero".into(),
            ));
        }

        if self.memory.owner_id.trim().is_empty() {
            return Err(AppError::Config("memory.owner_id must not be empty".into()));
        }

        if let Some(dir) = &self.agent.working_dir {
            let canonical = dir
                .canonicalize()
                .map_err(|err| AppError::Config(format!("agent.working_dir invalid: {err}")))?;
            self.agent.working_dir = Some(canonical);
        }

        Ok(())
    }
}

/// Load a single credential from OS keychain with env-var fallback.
async fn load_credential(keyring_key: &str, env_key: &str) -> Result<Option<String>> {
    let key = keyring_key.to_owned();

    // keyring is synchronous I/O.
    let keychain_result = tokio::task::spawn_blocking(move || {
        keyring::Entry::new(KEYRING_SERVICE, &key).and_then(|entry| entry.get_password())
    })
    .await
    .map_err(|err| AppError::Config(format!("keychain task panicked: {err}")))?;

    match keychain_result {
        Ok(value) if !value.is_empty() => return Ok(Some(value)),
        Ok(_) => {
            warn!(key = keyring_key, "keychain entry is empty, trying env var");
        }
        Err(err) => {
            debug!(key = keyring_key, ?err, "keychain lookup failed, trying env var");
        }
    }

    match env::var(env_key) {
        Ok(value) if !value.is_empty() => Ok(Some(value)),
        _ => {
            warn!(
                key = keyring_key,
                env = env_key,
                "credential not found in keychain or environment"
            );
            Ok(None)
        }
    }
}
