use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub lark: LarkConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub trigger: TriggerConfig,
    #[serde(default)]
    pub general: GeneralConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LarkConfig {
    #[serde(default)]
    pub app_id: String,
    #[serde(default)]
    pub app_secret: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Upper bound for every outbound call to the platform
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_webhook_path")]
    pub webhook_path: String,
    /// Bodies larger than this are acknowledged without being processed
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TriggerConfig {
    /// Also require an @-mention before replying
    #[serde(default)]
    pub mention_required: bool,
    /// The bot's own open_id. When unset, any mention satisfies `mention_required`.
    #[serde(default)]
    pub bot_open_id: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct GeneralConfig {
    /// Log raw inbound payloads
    #[serde(default)]
    pub debug_verbose: bool,
}

fn default_base_url() -> String {
    "https://open.larksuite.com/open-apis".to_string()
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_service_name() -> String {
    "fikabot".to_string()
}

fn default_webhook_path() -> String {
    "/lark".to_string()
}

fn default_max_body_bytes() -> usize {
    2 * 1024 * 1024
}

impl Default for LarkConfig {
    fn default() -> Self {
        Self {
            app_id: String::new(),
            app_secret: String::new(),
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            service_name: default_service_name(),
            webhook_path: default_webhook_path(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(value.trim(), "1" | "true" | "TRUE" | "True")
}

impl Config {
    /// Load the TOML file at `path` (a missing file means all defaults),
    /// then apply overrides from the process environment.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::parse(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Config::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Invalid config TOML")
    }

    /// Apply environment-style overrides. `lookup` maps a variable name to its value.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("LARK_APP_ID") {
            self.lark.app_id = v.trim().to_string();
        }
        if let Some(v) = lookup("LARK_APP_SECRET") {
            self.lark.app_secret = v.trim().to_string();
        }
        if let Some(v) = lookup("LARK_BASE_URL") {
            self.lark.base_url = v.trim().to_string();
        }
        if let Some(v) = lookup("LARK_BOT_OPEN_ID") {
            let id = v.trim();
            self.trigger.bot_open_id = (!id.is_empty()).then(|| id.to_string());
        }
        if let Some(v) = lookup("DEBUG_VERBOSE") {
            self.general.debug_verbose = v.trim() == "1";
        }
        if let Some(v) = lookup("FIKA_MENTION_REQUIRED") {
            self.trigger.mention_required = is_truthy(&v);
        }
        if let Some(port) = lookup("PORT").and_then(|v| v.trim().parse().ok()) {
            self.server.port = port;
        }
    }

    /// Both app id and secret are set.
    pub fn has_credentials(&self) -> bool {
        !self.lark.app_id.is_empty() && !self.lark.app_secret.is_empty()
    }
}
