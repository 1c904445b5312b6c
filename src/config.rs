//! Configuration manager for the gateway.
//!
//! Non-secret settings come from `config.yaml`. Credentials are expected in
//! the environment and override whatever the file contains.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::FromRef;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::AppState;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const DEFAULT_NAME: &str = "Discord Bot API";
const DEFAULT_ADDRESS: &str = "0.0.0.0:8787";
const DEFAULT_API_URL: &str = "https://discord.com/api";
const DEFAULT_TIMEOUT: u64 = 30;
const DEFAULT_STATE_TTL: u64 = 60 * 10; // 10 minutes.
/// Channel receiving messages when `/send` omits `channelId`.
pub const DEFAULT_CHANNEL_ID: &str = "1440630516389904467";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Name displayed on `GET /`.
    pub name: String,
    /// Listening address, `host:port`.
    pub address: String,
    /// Inbound request timeout, in seconds.
    pub timeout: u64,
    /// Whether `GET /env` is routed.
    pub expose_env: bool,
    /// Related to Discord API and application credentials.
    pub discord: Discord,
    /// Related to OAuth2 CSRF state handling.
    pub state: State,
    /// Related to metrics.
    pub telemetry: Telemetry,
    #[serde(skip)]
    path: PathBuf,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_owned(),
            address: DEFAULT_ADDRESS.to_owned(),
            timeout: DEFAULT_TIMEOUT,
            expose_env: true,
            discord: Discord::default(),
            state: State::default(),
            telemetry: Telemetry::default(),
            path: PathBuf::default(),
        }
    }
}

/// Discord configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Discord {
    /// Base URL of the REST API, without version.
    pub api_url: String,
    /// Fallback channel for `POST /send`.
    pub default_channel_id: String,
    #[serde(skip_serializing)]
    pub bot_token: Option<String>,
    pub client_id: Option<String>,
    #[serde(skip_serializing)]
    pub client_secret: Option<String>,
    /// OAuth2 callback registered on the Discord application.
    pub redirect_uri: Option<String>,
}

impl Default for Discord {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_owned(),
            default_channel_id: DEFAULT_CHANNEL_ID.to_owned(),
            bot_token: None,
            client_id: None,
            client_secret: None,
            redirect_uri: None,
        }
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

impl Discord {
    /// Bot token, if set and not empty.
    pub fn bot_token(&self) -> Option<&str> {
        present(&self.bot_token)
    }

    pub fn client_id(&self) -> Option<&str> {
        present(&self.client_id)
    }

    pub fn client_secret(&self) -> Option<&str> {
        present(&self.client_secret)
    }

    pub fn redirect_uri(&self) -> Option<&str> {
        present(&self.redirect_uri)
    }
}

/// Where issued OAuth2 states are remembered.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// Raw state in the cookie.
    #[default]
    Cookie,
    /// HMAC-signed state with expiry in the cookie.
    Signed,
    /// Server-side map, one-time use.
    Memory,
}

/// OAuth2 state configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct State {
    pub store: StoreKind,
    /// Lifetime of an issued state, in seconds.
    /// Ignored by the `cookie` store.
    pub ttl: u64,
    /// Signing secret for the `signed` store.
    #[serde(skip_serializing)]
    pub secret: Option<String>,
}

impl Default for State {
    fn default() -> Self {
        Self {
            store: StoreKind::default(),
            ttl: DEFAULT_STATE_TTL,
            secret: None,
        }
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Telemetry {
    /// Install the Prometheus recorder and route `GET /metrics`.
    pub metrics: bool,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self { metrics: true }
    }
}

impl FromRef<AppState> for Arc<Configuration> {
    fn from_ref(state: &AppState) -> Arc<Configuration> {
        Arc::clone(&state.config)
    }
}

impl Configuration {
    pub fn path(mut self, path: PathBuf) -> Self {
        self.path = path;
        self
    }

    /// Normalizes a URL string by ensuring it starts with a valid scheme
    /// (`http` or `https`).
    fn normalize_url(url: &str) -> Result<String, url::ParseError> {
        let url_with_scheme =
            if url.starts_with("http://") || url.starts_with("https://") {
                url.to_string()
            } else {
                format!("https://{url}")
            };

        let parsed_url = Url::parse(&url_with_scheme)?;
        Ok(parsed_url.to_string())
    }

    /// Reads the `config.yaml` file from the specified path or the default
    /// location.
    pub fn read(self) -> Result<Self, url::ParseError> {
        let file_path = if self.path.is_file() {
            self.path.clone()
        } else {
            Path::new(DEFAULT_CONFIG_PATH).to_path_buf()
        };

        let mut config = match File::open(&file_path) {
            Ok(file) => match serde_yaml::from_reader(file) {
                Ok(config) => config,
                Err(err) => {
                    tracing::error!(error = %err, "`config.yaml` file is invalid");
                    Self::default()
                },
            },
            Err(err) => {
                tracing::warn!(error = %err, "`config.yaml` file not found, using defaults");
                Self::default()
            },
        };

        config.discord.api_url = Self::normalize_url(&config.discord.api_url)?;
        Ok(config)
    }

    /// Apply environment overrides.
    /// `lookup` is usually `|key| std::env::var(key).ok()`.
    pub fn with_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|value| !value.is_empty());

        if let Some(token) = var("DISCORD_BOT_TOKEN") {
            self.discord.bot_token = Some(token);
        }
        if let Some(client_id) = var("CLIENT_ID") {
            self.discord.client_id = Some(client_id);
        }
        if let Some(client_secret) = var("CLIENT_SECRET") {
            self.discord.client_secret = Some(client_secret);
        }
        if let Some(redirect) = var("REDIRECT") {
            self.discord.redirect_uri = Some(redirect);
        }
        if let Some(secret) = var("STATE_SECRET") {
            self.state.secret = Some(secret);
        }
        if let Some(port) = var("PORT").and_then(|p| p.parse::<u16>().ok()) {
            let host = self
                .address
                .rsplit_once(':')
                .map(|(host, _)| host)
                .unwrap_or(&self.address);
            self.address = format!("{host}:{port}");
        }

        self
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_env_overrides_credentials() {
        let config = Configuration::default().with_env(env(&[
            ("DISCORD_BOT_TOKEN", "bot"),
            ("CLIENT_ID", "123"),
            ("CLIENT_SECRET", "secret"),
            ("REDIRECT", "http://localhost:8787/discord/redirect"),
            ("PORT", "3000"),
        ]));

        assert_eq!(config.discord.bot_token(), Some("bot"));
        assert_eq!(config.discord.client_id(), Some("123"));
        assert_eq!(config.discord.client_secret(), Some("secret"));
        assert_eq!(
            config.discord.redirect_uri(),
            Some("http://localhost:8787/discord/redirect")
        );
        assert_eq!(config.address, "0.0.0.0:3000");
    }

    #[test]
    fn test_empty_values_are_missing() {
        let mut config = Configuration::default().with_env(env(&[("DISCORD_BOT_TOKEN", "")]));
        assert_eq!(config.discord.bot_token, None);

        config.discord.client_id = Some(String::new());
        assert_eq!(config.discord.client_id(), None);
    }

    #[test]
    fn test_secrets_are_not_serialized() {
        let config = Configuration::default().with_env(env(&[
            ("DISCORD_BOT_TOKEN", "bot"),
            ("CLIENT_SECRET", "secret"),
            ("STATE_SECRET", "state"),
        ]));

        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(!yaml.contains("bot_token"));
        assert!(!yaml.contains("client_secret"));
        assert!(!yaml.contains("secret: state"));
    }

    #[test]
    fn test_partial_yaml() {
        let config: Configuration = serde_yaml::from_str(
            "name: Relay\nstate:\n  store: memory\ndiscord:\n  default_channel_id: \"42\"\n",
        )
        .unwrap();

        assert_eq!(config.name, "Relay");
        assert_eq!(config.state.store, StoreKind::Memory);
        assert_eq!(config.state.ttl, DEFAULT_STATE_TTL);
        assert_eq!(config.discord.default_channel_id, "42");
        assert_eq!(config.discord.api_url, DEFAULT_API_URL);
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(
            Configuration::normalize_url("discord.com/api").unwrap(),
            "https://discord.com/api"
        );
        assert_eq!(
            Configuration::normalize_url("http://127.0.0.1:8080").unwrap(),
            "http://127.0.0.1:8080/"
        );
    }
}
