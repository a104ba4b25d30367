// ABOUTME: YAML configuration for OAuth client settings and API endpoints
// ABOUTME: Resolves client credentials with CLI flag → config file → env var precedence

use crate::{Error, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CLIENT_ID_ENV: &str = "QBO_CLIENT_ID";
pub const CLIENT_SECRET_ENV: &str = "QBO_CLIENT_SECRET";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Sandbox,
    Production,
}

impl Environment {
    pub fn api_base(self) -> &'static str {
        match self {
            Environment::Sandbox => "https://sandbox-quickbooks.api.intuit.com",
            Environment::Production => "https://quickbooks.api.intuit.com",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub redirect_uri: String,
    pub scope: String,
    pub authorization_url: String,
    pub token_url: String,
    pub environment: Environment,
    pub api_base: Option<String>,
    pub minor_version: u32,
    pub realm_id: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_base_ms: u64,
    pub utc_offset_minutes: i32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            client_id: None,
            client_secret: None,
            redirect_uri: "http://localhost:5000/callback".into(),
            scope: "com.intuit.quickbooks.accounting".into(),
            authorization_url: "https://appcenter.intuit.com/connect/oauth2".into(),
            token_url: "https://oauth.platform.intuit.com/oauth2/v1/tokens/bearer".into(),
            environment: Environment::Sandbox,
            api_base: None,
            minor_version: 70,
            realm_id: None,
            timeout_secs: 30,
            max_retries: 3,
            retry_base_ms: 500,
            utc_offset_minutes: 0,
        }
    }
}

/// Client id/secret pair registered with the remote developer portal.
#[derive(Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

impl Config {
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "qbo-sync").map(|dirs| dirs.config_dir().join("config.yaml"))
    }

    /// Loads the config file. An explicit path must exist; the default
    /// location falls back to built-in defaults when absent.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let (path, required) = match explicit {
            Some(p) => (Some(p.to_path_buf()), true),
            None => (Self::default_path(), false),
        };

        let Some(path) = path else {
            return Ok(Config::default());
        };

        if !path.exists() {
            if required {
                return Err(Error::Config(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Config::default());
        }

        let content = fs::read_to_string(&path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| Error::Config(format!("invalid config file: {}", e)))
    }

    pub fn api_base(&self) -> String {
        self.api_base
            .clone()
            .unwrap_or_else(|| self.environment.api_base().to_string())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn client_credentials(
        &self,
        cli_id: Option<String>,
        cli_secret: Option<String>,
    ) -> Result<ClientCredentials> {
        let client_id = resolve_setting(cli_id, self.client_id.clone(), CLIENT_ID_ENV)
            .ok_or_else(|| {
                Error::Config(format!(
                    "No client id found. Provide via --client-id, config file, or {} env var",
                    CLIENT_ID_ENV
                ))
            })?;
        let client_secret =
            resolve_setting(cli_secret, self.client_secret.clone(), CLIENT_SECRET_ENV)
                .ok_or_else(|| {
                    Error::Config(format!(
                        "No client secret found. Provide via --client-secret, config file, or {} env var",
                        CLIENT_SECRET_ENV
                    ))
                })?;

        Ok(ClientCredentials {
            client_id,
            client_secret,
        })
    }
}

fn resolve_setting(cli: Option<String>, file: Option<String>, env_key: &str) -> Option<String> {
    // 1. CLI flag
    if let Some(v) = cli.filter(|v| !v.is_empty()) {
        return Some(v);
    }

    // 2. Config file
    if let Some(v) = file.filter(|v| !v.is_empty()) {
        return Some(v);
    }

    // 3. Environment variable
    env::var(env_key).ok().filter(|v| !v.is_empty())
}
