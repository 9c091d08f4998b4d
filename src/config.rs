use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::backend::CredentialStore;
use crate::prompt::PromptPolicy;

// ── Config file ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Completion API credential. `ApiKey` is accepted for configs migrated
    /// from the editor-extension era.
    #[serde(default, alias = "ApiKey")]
    pub api_key: String,
    /// Backend model selector. `ChatGPT` aliases to the chat-tuned backend id;
    /// anything else is passed through verbatim. Legacy key name: `models`.
    #[serde(default = "default_model", alias = "models")]
    pub model: String,
    /// OpenAI-compatible endpoint URL
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Conversation replay policy: `full` replays the whole thread,
    /// `lean` sends only the new question.
    #[serde(default)]
    pub prompt_policy: PromptPolicy,
    /// Cap on reply length, in tokens
    #[serde(default = "default_max_reply_tokens")]
    pub max_reply_tokens: u32,
    /// Show turn timestamps in the thread pane
    #[serde(default)]
    pub show_timestamps: bool,
}

fn default_model() -> String {
    "ChatGPT".to_string()
}

fn default_endpoint() -> String {
    "https://api.openai.com".to_string()
}

fn default_max_reply_tokens() -> u32 {
    1000
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_model(),
            endpoint: default_endpoint(),
            prompt_policy: PromptPolicy::default(),
            max_reply_tokens: default_max_reply_tokens(),
            show_timestamps: false,
        }
    }
}

impl ConfigFile {
    /// Load from disk, or return a default config if the file doesn't exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file at {}", path.display()))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let raw = toml::to_string(self)?;
        fs::write(path, raw)
            .with_context(|| format!("Failed to write config file at {}", path.display()))
    }

    /// Write a starter config file to disk (only if it doesn't exist).
    pub fn write_default_if_missing() -> Result<PathBuf> {
        let path = config_path();
        if path.exists() {
            return Ok(path);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, DEFAULT_CONFIG_TOML)?;
        Ok(path)
    }
}

// ── Resolved runtime config (after merging file + CLI overrides) ──────────────

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key: String,
    pub prompt_policy: PromptPolicy,
    pub max_reply_tokens: u32,
    pub show_timestamps: bool,
}

impl ResolvedConfig {
    /// Merge config file with CLI overrides.
    /// Priority: CLI args > env vars (handled by clap) > config file > built-in defaults
    pub fn resolve(
        file: &ConfigFile,
        endpoint_override: Option<&str>,
        model_override: Option<&str>,
        api_key_override: Option<&str>,
        policy_override: Option<PromptPolicy>,
        timestamps_override: bool,
    ) -> Self {
        Self {
            endpoint: endpoint_override
                .map(str::to_string)
                .unwrap_or_else(|| file.endpoint.clone()),
            model: model_override
                .map(str::to_string)
                .unwrap_or_else(|| file.model.clone()),
            api_key: api_key_override
                .map(str::to_string)
                .unwrap_or_else(|| file.api_key.clone()),
            prompt_policy: policy_override.unwrap_or(file.prompt_policy),
            max_reply_tokens: file.max_reply_tokens,
            show_timestamps: timestamps_override || file.show_timestamps,
        }
    }
}

// ── Credential store (user scope) ─────────────────────────────────────────────

/// Persists an accepted key back into the user-scope config file, so the next
/// run starts validated.
pub struct UserScopeStore {
    file: ConfigFile,
    path: PathBuf,
}

impl UserScopeStore {
    pub fn new(file: ConfigFile) -> Self {
        Self { file, path: config_path() }
    }

    #[cfg(test)]
    fn at(file: ConfigFile, path: PathBuf) -> Self {
        Self { file, path }
    }
}

impl CredentialStore for UserScopeStore {
    fn get(&self) -> Option<String> {
        if self.file.api_key.is_empty() {
            None
        } else {
            Some(self.file.api_key.clone())
        }
    }

    fn set(&mut self, key: &str) -> Result<()> {
        self.file.api_key = key.to_string();
        self.file.save_to(&self.path)
    }
}

// ── Paths ─────────────────────────────────────────────────────────────────────

pub fn config_path() -> PathBuf {
    dirs_config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("marginalia")
        .join("config.toml")
}

fn dirs_config_dir() -> Option<PathBuf> {
    // XDG_CONFIG_HOME or ~/.config on Linux/macOS
    std::env::var("XDG_CONFIG_HOME")
        .ok()
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join(".config"))
        })
}

// ── Default config template written on first run ──────────────────────────────

const DEFAULT_CONFIG_TOML: &str = r#"# marginalia configuration
# Run `marginalia --init` to regenerate this file.

# Completion API key. Leave empty to be prompted on first use.
api_key = ""

# Backend model selector. "ChatGPT" picks the chat-tuned completion backend;
# any other value is passed through to the API verbatim.
model = "ChatGPT"

# OpenAI-compatible endpoint
endpoint = "https://api.openai.com"

# Conversation replay policy per request:
#   "full" — replay every prior turn of the thread (best answers)
#   "lean" — send only the new question (fewest tokens)
prompt_policy = "full"

# Cap on reply length, in tokens
max_reply_tokens = 1000

# Show turn timestamps in the thread pane
show_timestamps = false
"#;

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_falls_back_to_defaults() {
        let cfg: ConfigFile = toml::from_str("").unwrap();
        assert_eq!(cfg.model, "ChatGPT");
        assert_eq!(cfg.endpoint, "https://api.openai.com");
        assert_eq!(cfg.prompt_policy, PromptPolicy::Full);
        assert_eq!(cfg.max_reply_tokens, 1000);
        assert!(cfg.api_key.is_empty());
    }

    #[test]
    fn legacy_key_names_are_accepted() {
        let cfg: ConfigFile = toml::from_str(
            r#"
            ApiKey = "sk-legacy"
            models = "text-davinci-003"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.api_key, "sk-legacy");
        assert_eq!(cfg.model, "text-davinci-003");
    }

    #[test]
    fn prompt_policy_parses_both_variants() {
        let lean: ConfigFile = toml::from_str(r#"prompt_policy = "lean""#).unwrap();
        assert_eq!(lean.prompt_policy, PromptPolicy::Lean);
        let full: ConfigFile = toml::from_str(r#"prompt_policy = "full""#).unwrap();
        assert_eq!(full.prompt_policy, PromptPolicy::Full);
    }

    #[test]
    fn cli_overrides_beat_the_config_file() {
        let file: ConfigFile = toml::from_str(
            r#"
            api_key = "sk-file"
            model = "ChatGPT"
            "#,
        )
        .unwrap();
        let resolved = ResolvedConfig::resolve(
            &file,
            Some("http://localhost:8080"),
            Some("text-davinci-003"),
            None,
            Some(PromptPolicy::Lean),
            false,
        );
        assert_eq!(resolved.endpoint, "http://localhost:8080");
        assert_eq!(resolved.model, "text-davinci-003");
        assert_eq!(resolved.api_key, "sk-file");
        assert_eq!(resolved.prompt_policy, PromptPolicy::Lean);
    }

    #[test]
    fn user_scope_store_persists_the_accepted_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut store = UserScopeStore::at(ConfigFile::default(), path.clone());

        assert!(store.get().is_none());
        store.set("sk-fresh").unwrap();
        assert_eq!(store.get().as_deref(), Some("sk-fresh"));

        let reloaded = ConfigFile::load_from(&path).unwrap();
        assert_eq!(reloaded.api_key, "sk-fresh");
    }
}
