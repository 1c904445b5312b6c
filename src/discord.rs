//! Discord REST API client.

use reqwest::{Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use url::Url;

use crate::error::{Result, ServerError, Upstream};

const API_VERSION: &str = "v10";
const USER_AGENT: &str = concat!(
    "DiscordBot (",
    env!("CARGO_PKG_HOMEPAGE"),
    ", ",
    env!("CARGO_PKG_VERSION"),
    ")"
);
/// Scopes requested on authorization.
pub const SCOPES: [&str; 3] = ["identify", "email", "guilds"];

#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    #[error("invalid Discord API URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("`{0}` cannot be used as Discord API base URL")]
    Base(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Token returned by `POST /oauth2/token`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub scope: String,
}

/// Profile returned by `GET /users/@me`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub username: String,
    pub discriminator: String,
    /// Only with the `email` scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    /// Any other field, e.g. `global_name` or `locale`.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// OAuth2 application credentials.
#[derive(Debug, Clone, Copy)]
pub struct Credentials<'a> {
    pub client_id: &'a str,
    pub client_secret: &'a str,
    pub redirect_uri: &'a str,
}

/// Thin client over the few Discord endpoints used by the gateway.
#[derive(Debug, Clone)]
pub struct DiscordClient {
    http: reqwest::Client,
    api_url: Url,
}

fn record(endpoint: &'static str, status: StatusCode) {
    metrics::counter!(
        "discord_requests_total",
        "endpoint" => endpoint,
        "status" => status.as_u16().to_string()
    )
    .increment(1);
}

/// Turn a non-success response into an error carrying its status and body.
async fn rejection(kind: Upstream, response: Response) -> ServerError {
    let status = response.status().as_u16();
    match response.json::<Value>().await {
        Ok(details) => ServerError::Upstream {
            kind,
            status,
            details,
            channel_id: None,
        },
        Err(err) => ServerError::Http(err),
    }
}

impl DiscordClient {
    /// Create a new [`DiscordClient`] against `api_url`, e.g.
    /// `https://discord.com/api`.
    pub fn new(api_url: &str) -> std::result::Result<Self, ClientError> {
        let api_url = Url::parse(api_url)?;
        if api_url.cannot_be_a_base() {
            return Err(ClientError::Base(api_url.to_string()));
        }

        let http = reqwest::Client::builder().user_agent(USER_AGENT).build()?;

        Ok(Self { http, api_url })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.api_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Discord consent page URL.
    pub fn authorize_url(&self, client_id: &str, redirect_uri: &str, state: &str) -> Url {
        let mut url = self.endpoint(&["oauth2", "authorize"]);
        url.query_pairs_mut()
            .append_pair("client_id", client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", &SCOPES.join(" "))
            .append_pair("state", state);
        url
    }

    /// Post `message` on `channel_id` as the bot.
    /// The response is returned untouched, whatever its status.
    pub async fn send_message(
        &self,
        channel_id: &str,
        message: &str,
        bot_token: &str,
    ) -> std::result::Result<Response, reqwest::Error> {
        let response = self
            .http
            .post(self.endpoint(&[API_VERSION, "channels", channel_id, "messages"]))
            .header(reqwest::header::AUTHORIZATION, format!("Bot {bot_token}"))
            .json(&json!({ "content": message }))
            .send()
            .await?;

        record("channels/messages", response.status());
        Ok(response)
    }

    /// Exchange an authorization `code` for an access token.
    pub async fn exchange_code(
        &self,
        credentials: Credentials<'_>,
        code: &str,
    ) -> Result<TokenResponse> {
        let response = self
            .http
            .post(self.endpoint(&["oauth2", "token"]))
            .form(&[
                ("client_id", credentials.client_id),
                ("client_secret", credentials.client_secret),
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", credentials.redirect_uri),
            ])
            .send()
            .await?;

        record("oauth2/token", response.status());
        if !response.status().is_success() {
            return Err(rejection(Upstream::TokenExchange, response).await);
        }

        Ok(response.json::<TokenResponse>().await?)
    }

    /// Fetch the profile owning `access_token`.
    pub async fn current_user(&self, access_token: &str) -> Result<UserProfile> {
        let response = self
            .http
            .get(self.endpoint(&[API_VERSION, "users", "@me"]))
            .bearer_auth(access_token)
            .send()
            .await?;

        record("users/@me", response.status());
        if !response.status().is_success() {
            return Err(rejection(Upstream::ProfileFetch, response).await);
        }

        Ok(response.json::<UserProfile>().await?)
    }
}
