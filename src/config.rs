use crate::error::{BridgeError, Result};
use crate::providers::{ProviderKind, ProviderPreset};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const APP_NAME: &str = "llm-bridge";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    pub provider: ProviderConfig,
    /// Client-facing model name → upstream model name.
    #[serde(default)]
    pub models: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Key given inline; takes precedence over `api_key_env`.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    /// Wire protocol of the upstream, for providers without a preset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<ProviderKind>,
}

fn default_port() -> u16 {
    4222
}

fn default_api_key_env() -> String {
    "API_KEY".to_string()
}

impl ProviderConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: None,
            api_key_env: default_api_key_env(),
            api_key: None,
            format: None,
        }
    }
}

impl BridgeConfig {
    pub fn new(provider: ProviderConfig) -> Self {
        Self {
            port: default_port(),
            provider,
            models: BTreeMap::new(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BridgeError::config(format!("Failed to read config file {}: {}", path.display(), e))
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

        Err(BridgeError::config(format!(
            "No config file found. Searched: {}",
            candidates
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )))
    }

    /// Apply a `--provider` override, taking the preset's key variable too.
    pub fn override_provider(&mut self, name: &str) {
        self.provider.name = name.to_string();
        if let Some(preset) = ProviderPreset::from_name(name) {
            self.provider.api_key_env = preset.default_api_key_env.to_string();
        }
    }

    pub fn effective_base_url(&self) -> Result<String> {
        if let Some(ref url) = self.provider.base_url {
            return Ok(url.trim_end_matches('/').to_string());
        }

        let preset = ProviderPreset::from_name(&self.provider.name).ok_or_else(|| {
            BridgeError::config(format!(
                "Unknown provider '{}' and no base_url configured. Known providers: {}",
                self.provider.name,
                known_presets()
            ))
        })?;

        Ok(preset.base_url.to_string())
    }

    pub fn resolve_api_key(&self) -> Result<String> {
        if let Some(ref key) = self.provider.api_key {
            return Ok(key.clone());
        }
        std::env::var(&self.provider.api_key_env).map_err(|_| {
            BridgeError::config(format!(
                "Environment variable '{}' not set. Set it with your provider API key.",
                self.provider.api_key_env
            ))
        })
    }

    /// Wire protocol the upstream speaks: explicit `format`, else the preset's.
    pub fn backend_kind(&self) -> Result<ProviderKind> {
        if let Some(kind) = self.provider.format {
            return Ok(kind);
        }
        ProviderPreset::from_name(&self.provider.name)
            .map(|p| p.kind)
            .ok_or_else(|| {
                BridgeError::config(format!(
                    "Cannot tell which protocol provider '{}' speaks; set provider.format",
                    self.provider.name
                ))
            })
    }

    /// Upstream model for a client model name; unmapped names pass through.
    pub fn map_model<'a>(&'a self, model: &'a str) -> &'a str {
        self.models.get(model).map_or(model, String::as_str)
    }
}

fn known_presets() -> String {
    ProviderPreset::all()
        .iter()
        .map(|p| p.name)
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    paths.push(PathBuf::from(format!("{APP_NAME}.toml")));

    if cfg!(target_os = "macos") {
        if let Some(home) = home_dir() {
            paths.push(
                home.join("Library")
                    .join("Application Support")
                    .join(APP_NAME)
                    .join("config.toml"),
            );
        }
    } else {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            paths.push(PathBuf::from(xdg).join(APP_NAME).join("config.toml"));
        }
        if let Some(home) = home_dir() {
            paths.push(home.join(".config").join(APP_NAME).join("config.toml"));
        }
    }

    if let Some(home) = home_dir() {
        paths.push(home.join(format!(".{APP_NAME}.toml")));
    }

    paths
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
