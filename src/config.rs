use crate::error::{ProxyError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Environment variable holding the bearer token clients must present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token_env: Option<String>,
    pub backend: BackendConfig,
    #[serde(default)]
    pub deployments: DeploymentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub base_url: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Client model aliases and the backend deployments they resolve to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeploymentConfig {
    #[serde(default)]
    pub aliases: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    /// Deployment targeted by Chat Completions clients translated to the Responses API.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub responses: Option<String>,
}

fn default_port() -> u16 {
    8082
}

fn default_api_key_env() -> String {
    "AZURE_OPENAI_API_KEY".to_string()
}

fn default_timeout_secs() -> u64 {
    300
}

impl DeploymentConfig {
    /// Resolve a client model string to the backend deployment id.
    ///
    /// Lookup order: exact alias, then the configured default. Unknown model
    /// strings are never forwarded as deployment names.
    ///
    /// # Errors
    /// Returns `ProxyError::Config` when nothing matches and no default is configured.
    pub fn resolve(&self, model: &str) -> Result<String> {
        if let Some(deployment) = self.aliases.get(model) {
            return Ok(deployment.clone());
        }

        self.default
            .as_deref()
            .filter(|d| !d.trim().is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                ProxyError::config(format!(
                    "No deployment alias for model '{model}' and no default deployment configured"
                ))
            })
    }

    /// The deployment used for Responses API requests.
    ///
    /// # Errors
    /// Returns `ProxyError::Config` when `deployments.responses` is unset.
    pub fn responses_deployment(&self) -> Result<&str> {
        self.responses
            .as_deref()
            .filter(|d| !d.trim().is_empty())
            .ok_or_else(|| ProxyError::config("Missing deployments.responses"))
    }
}

impl ProxyConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProxyError::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Search standard locations for a config file.
    /// Priority: CLI arg > CWD > XDG config > home dir
    pub fn find_and_load(explicit_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit_path {
            return Self::load(path);
        }

        let candidates = config_search_paths();
        for candidate in &candidates {
            if candidate.exists() {
                tracing::info!(path = %candidate.display(), "Loading config");
                return Self::load(candidate);
            }
        }

        Err(ProxyError::config(format!(
            "No config file found. Searched: {}",
            candidates
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )))
    }

    /// Resolve the backend API key from the configured environment variable
    pub fn resolve_api_key(&self) -> Result<String> {
        std::env::var(&self.backend.api_key_env).map_err(|_| {
            ProxyError::config(format!(
                "Environment variable '{}' not set. Set it with your Azure OpenAI API key.",
                self.backend.api_key_env
            ))
        })
    }

    /// The bearer token clients must present, if auth is enabled.
    pub fn resolve_auth_token(&self) -> Option<String> {
        self.auth_token_env
            .as_ref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|t| !t.trim().is_empty())
    }

    /// Full URL for a backend operation such as `chat/completions` or `responses`.
    pub fn endpoint_url(&self, operation: &str) -> String {
        let base = self.backend.base_url.trim_end_matches('/');
        match self.backend.api_version {
            Some(ref version) => format!("{base}/{operation}?api-version={version}"),
            None => format!("{base}/{operation}"),
        }
    }
}

pub fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // CWD
    paths.push(PathBuf::from("claude-azure-proxy.toml"));

    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        paths.push(
            PathBuf::from(xdg)
                .join("claude-azure-proxy")
                .join("config.toml"),
        );
    }
    if let Some(home) = home_dir() {
        paths.push(
            home.join(".config")
                .join("claude-azure-proxy")
                .join("config.toml"),
        );
        paths.push(home.join(".claude-azure-proxy.toml"));
    }

    paths
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
