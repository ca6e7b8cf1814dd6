//! Settings loading with multi-source merging, plus the credential sanity
//! rule applied at load time.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::diagnostics::DEFAULT_CAPACITY;
use crate::sandbox::Sandbox;

pub const DEFAULT_CHAT_PATH: &str = "/v1/chat/completions";
pub const DEFAULT_SEARCH_ENDPOINT: &str = "https://www.googleapis.com/customsearch/v1";
pub const DEFAULT_MAX_LOOPS: usize = 6;
pub const ENV_PREFIX: &str = "TOOL_AGENT_";
const PROJECT_CONFIG: &str = "tool-agent.toml";

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a command-line LLM agent with web_search, \
proxy_call, and run_code tools. Decide when to use them. Keep responses concise and mention \
the tool when helpful.";

// Whitespace, HTTP status lines, leading JSON/log brackets, level words used
// as a log prefix (`ERROR:`, `[warn]`) and timestamps. Bare level words inside
// a dash-separated token are fine.
static PASTED_LOG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(\s|HTTP/\d|^[\[{<]|\b(error|warn|warning|info|debug|exception|traceback)[:\]]|\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2})",
    )
    .expect("credential pattern is valid")
});

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("Please set Base URL, API Key, and Model.")]
    MissingClientSettings,

    #[error("{field} looks like pasted log output rather than a credential")]
    SuspiciousCredential { field: &'static str },
}

/// Reject values that are obviously not a credential, such as a copied
/// error log or an HTTP response pasted into the key field.
pub fn validate_credential(field: &'static str, value: &str) -> Result<(), ConfigError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(());
    }
    if PASTED_LOG.is_match(value) {
        return Err(ConfigError::SuspiciousCredential { field });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub base_url: String,
    pub chat_path: String,
    pub api_key: String,
    pub model: String,
    /// Whether the provider accepts `tools` / `tool_choice`.
    pub tools_enabled: bool,
    pub search_api_key: String,
    pub search_cx: String,
    pub search_endpoint: String,
    pub proxy_endpoint: String,
    pub max_loops: usize,
    pub system_prompt: String,
    pub sandbox_program: String,
    /// Empty means the runtime defaults; for `node` that includes the
    /// permission model.
    pub sandbox_args: Vec<String>,
    pub diagnostics_capacity: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".to_string(),
            chat_path: DEFAULT_CHAT_PATH.to_string(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            tools_enabled: true,
            search_api_key: String::new(),
            search_cx: String::new(),
            search_endpoint: DEFAULT_SEARCH_ENDPOINT.to_string(),
            proxy_endpoint: String::new(),
            max_loops: DEFAULT_MAX_LOOPS,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            sandbox_program: "node".to_string(),
            sandbox_args: Vec::new(),
            diagnostics_capacity: DEFAULT_CAPACITY,
        }
    }
}

/// The three settings every model call needs.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub base_url: String,
    pub chat_path: String,
    pub api_key: String,
    pub model: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchSettings {
    pub api_key: String,
    pub cx: String,
    pub endpoint: String,
}

impl Settings {
    /// Load configuration from all sources.
    ///
    /// Priority (highest to lowest):
    /// 1. `TOOL_AGENT_*` environment variables
    /// 2. Explicit config path (if provided)
    /// 3. Project root: `./tool-agent.toml`
    /// 4. Global: `<config_dir>/tool-agent/config.toml`
    /// 5. Default values
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let settings: Settings = Self::figment(explicit).extract().map_err(Box::new)?;
        settings.normalized().validated()
    }

    /// Load from a single file on top of the defaults, ignoring the
    /// environment and the discovered config files.
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let settings: Settings = Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .extract()
            .map_err(Box::new)?;
        settings.normalized().validated()
    }

    pub fn figment(explicit: Option<&Path>) -> Figment {
        let mut figment = Figment::new().merge(Serialized::defaults(Settings::default()));

        if let Some(global) = Self::global_config_path() {
            if global.exists() {
                figment = figment.merge(Toml::file(global));
            }
        }

        let project = PathBuf::from(PROJECT_CONFIG);
        if project.exists() {
            figment = figment.merge(Toml::file(project));
        }

        if let Some(path) = explicit {
            figment = figment.merge(Toml::file(path));
        }

        figment.merge(Env::prefixed(ENV_PREFIX))
    }

    pub fn global_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("tool-agent").join("config.toml"))
    }

    pub fn normalized(mut self) -> Self {
        self.base_url = self.base_url.trim().trim_end_matches('/').to_string();
        self.api_key = self.api_key.trim().to_string();
        self.model = self.model.trim().to_string();
        self.search_api_key = self.search_api_key.trim().to_string();
        self.search_cx = self.search_cx.trim().to_string();
        self.proxy_endpoint = self.proxy_endpoint.trim().to_string();
        if self.chat_path.trim().is_empty() {
            self.chat_path = DEFAULT_CHAT_PATH.to_string();
        }
        self.max_loops = self.max_loops.max(1);
        self
    }

    pub fn validated(self) -> Result<Self, ConfigError> {
        validate_credential("api_key", &self.api_key)?;
        validate_credential("search_api_key", &self.search_api_key)?;
        validate_credential("search_cx", &self.search_cx)?;
        Ok(self)
    }

    pub fn client_config(&self) -> Result<ClientConfig, ConfigError> {
        if self.base_url.is_empty() || self.api_key.is_empty() || self.model.is_empty() {
            return Err(ConfigError::MissingClientSettings);
        }
        Ok(ClientConfig {
            base_url: self.base_url.clone(),
            chat_path: self.chat_path.clone(),
            api_key: self.api_key.clone(),
            model: self.model.clone(),
        })
    }

    pub fn sandbox(&self) -> Sandbox {
        if self.sandbox_program == "node" && self.sandbox_args.is_empty() {
            Sandbox::node()
        } else {
            Sandbox::new(self.sandbox_program.clone(), self.sandbox_args.clone())
        }
    }

    pub fn search(&self) -> SearchSettings {
        SearchSettings {
            api_key: self.search_api_key.clone(),
            cx: self.search_cx.clone(),
            endpoint: self.search_endpoint.clone(),
        }
    }
}
