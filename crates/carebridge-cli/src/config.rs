use anyhow::Context;
use carebridge_audit::{AuditConfig, HttpSinkConfig, JsonlSinkConfig};
use carebridge_egress::UnifiedClientConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CarebridgeConfig {
    #[serde(default)]
    pub client: UnifiedClientConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub audit: AuditConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Static bearer token for backend-to-backend calls
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_token: Option<String>,

    /// HMAC secret used by `issue-token`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_secret: Option<String>,

    /// Refresh endpoint; a path is resolved against the client base URL's origin
    #[serde(default = "default_refresh_url")]
    pub refresh_url: String,

    /// Session file backing the token guard
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

fn default_refresh_url() -> String {
    "/api/auth/refresh".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            service_token: None,
            signing_secret: None,
            refresh_url: default_refresh_url(),
            session_file: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl CarebridgeConfig {
    /// Load from YAML, or TOML when the file ends in `.toml`
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let config = if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            toml::from_str(&contents)
                .with_context(|| format!("Invalid TOML in {}", path.display()))?
        } else {
            serde_yaml::from_str(&contents)
                .with_context(|| format!("Invalid YAML in {}", path.display()))?
        };

        Ok(config)
    }

    /// Merge process environment variables (env vars take precedence)
    pub fn merge_env(&mut self) -> Vec<String> {
        self.merge_env_from(|key| std::env::var(key).ok())
    }

    /// Merge variables resolved by `lookup`, returning a warning per rejected value
    pub fn merge_env_from<F>(&mut self, lookup: F) -> Vec<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut warnings = Vec::new();
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(val) = var("CAREBRIDGE_BASE_URL") {
            self.client.base_url = val;
        }
        if let Some(val) = var("ZOHO_PROXY_PREFIX") {
            self.client.zoho_proxy_prefix = val;
        }
        if let Some(val) = var("CATALYST_PROXY_PREFIX") {
            self.client.catalyst_proxy_prefix = val;
        }
        if let Some(val) = var("CATALYST_FUNCTION_URL") {
            self.client.catalyst_function_url = Some(val);
        }

        if let Some(val) = var("CAREBRIDGE_TIMEOUT_MS") {
            match val.parse::<u64>() {
                Ok(ms) if ms > 0 => self.client.default_timeout_ms = ms,
                _ => warnings.push(format!("Invalid CAREBRIDGE_TIMEOUT_MS '{}', using default", val)),
            }
        }
        if let Some(val) = var("CAREBRIDGE_RETRIES") {
            match val.parse::<u32>() {
                Ok(retries) => self.client.default_retries = retries,
                Err(_) => warnings.push(format!("Invalid CAREBRIDGE_RETRIES '{}', using default", val)),
            }
        }

        if let Some(val) = var("SERVICE_API_TOKEN") {
            self.auth.service_token = Some(val);
        }
        if let Some(val) = var("SESSION_SIGNING_SECRET") {
            self.auth.signing_secret = Some(val);
        }
        if let Some(val) = var("CAREBRIDGE_REFRESH_URL") {
            self.auth.refresh_url = val;
        }

        if let Some(val) = var("CAREBRIDGE_AUDIT_DIR") {
            self.audit.jsonl = Some(JsonlSinkConfig {
                directory: PathBuf::from(val),
            });
        }
        if let Some(val) = var("CAREBRIDGE_AUDIT_ENDPOINT") {
            self.audit.http = Some(HttpSinkConfig::new(val));
        }

        if let Some(val) = var("CAREBRIDGE_LOG_LEVEL") {
            self.logging.level = val;
        }

        warnings
    }
}
