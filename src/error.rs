//! Error handler for the gateway.

use axum::Json;
use axum::extract::rejection::QueryRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use validator::ValidationErrors;

use crate::oauth_state::StateError;

pub type Result<T> = std::result::Result<T, ServerError>;

/// Discord endpoint which answered with a non-success status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upstream {
    SendMessage,
    TokenExchange,
    ProfileFetch,
}

impl Upstream {
    fn title(self, status: u16) -> &'static str {
        match (self, status) {
            (Upstream::SendMessage, 401) => {
                "Unauthorized: Discord Bot Token is invalid or not set correctly."
            },
            (Upstream::SendMessage, 403) => {
                "Forbidden: Bot doesn't have permission to send messages to this channel."
            },
            (Upstream::SendMessage, 404) => "Channel not found: Invalid channel ID.",
            (Upstream::SendMessage, _) => "Failed to send message to Discord",
            (Upstream::TokenExchange, _) => "Failed to exchange code for token",
            (Upstream::ProfileFetch, _) => "Failed to fetch user information",
        }
    }
}

/// Hints returned alongside a rejected message.
fn troubleshooting(status: u16, channel_id: &str) -> Vec<String> {
    match status {
        401 => vec![
            "Check your DISCORD_BOT_TOKEN environment variable".into(),
            "Verify the token is correct in Discord Developer Portal".into(),
            "Make sure the token hasn't been regenerated".into(),
        ],
        403 => vec![
            format!("Verify the bot is invited to the server (channel ID: {channel_id})"),
            "Check bot permissions: 'Send Messages' and 'View Channels'".into(),
            "Verify channel permissions allow the bot to send messages".into(),
            "Make sure the bot role has access to the channel".into(),
            "Check if the channel is a text channel (not voice or category)".into(),
        ],
        404 => vec![
            format!("Verify the channel ID is correct: {channel_id}"),
            "Make sure developer mode is enabled to copy channel ID".into(),
            "Check if the channel exists and is accessible".into(),
        ],
        _ => Vec::new(),
    }
}

/// Enum representing server-side errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("{0}")]
    Config(&'static str),

    #[error("channelId and message are required")]
    Validation(#[from] ValidationErrors),

    #[error("Missing code or state parameter")]
    MissingParameters,

    #[error("Invalid query parameters")]
    Query(#[from] QueryRejection),

    #[error("OAuth2 authentication failed")]
    Provider(String),

    #[error("Invalid state parameter")]
    InvalidState,

    #[error("{}", kind.title(*status))]
    Upstream {
        kind: Upstream,
        status: u16,
        details: Value,
        channel_id: Option<String>,
    },

    #[error("Failed to generate OAuth2 URL")]
    AuthorizeUrl(#[from] StateError),

    #[error("request to Discord failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("internal server error, {details}")]
    Internal {
        details: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// JSON body of every error response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseError {
    #[serde(skip)]
    status: StatusCode,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    channel_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    troubleshooting: Option<Vec<String>>,
}

impl ResponseError {
    /// Update error status code.
    pub fn status(mut self, code: StatusCode) -> Self {
        self.status = code;
        self
    }

    /// Update `error` field.
    pub fn error(mut self, error: &str) -> Self {
        self.error = error.into();
        self
    }

    /// Add detailed error.
    pub fn details(mut self, details: impl Into<Value>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Mirror upstream status and channel of a rejected message.
    pub fn channel(mut self, status_code: u16, channel_id: String) -> Self {
        self.troubleshooting = Some(troubleshooting(status_code, &channel_id));
        self.status_code = Some(status_code);
        self.channel_id = Some(channel_id);
        self
    }

    /// Automatically add field errors as details.
    pub fn errors(self, errors: &ValidationErrors) -> Self {
        let errors = parse_validation_errors(errors);
        match serde_json::to_value(errors) {
            Ok(details) => self.details(details),
            Err(_) => self,
        }
    }
}

impl Default for ResponseError {
    fn default() -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            error: "Internal server error".to_owned(),
            details: None,
            status_code: None,
            channel_id: None,
            troubleshooting: None,
        }
    }
}

impl IntoResponse for ResponseError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

#[derive(Debug, Serialize)]
struct FieldError {
    field: String,
    message: String,
}

fn parse_validation_errors(errors: &ValidationErrors) -> Vec<FieldError> {
    let mut errors: Vec<FieldError> = errors
        .field_errors()
        .iter()
        .flat_map(|(field, issues)| {
            issues.iter().map(move |issue| FieldError {
                field: field.to_string(),
                message: issue.to_string(),
            })
        })
        .collect();
    errors.sort_by(|a, b| a.field.cmp(&b.field));
    errors
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let response = ResponseError::default()
            .error(&self.to_string())
            .status(StatusCode::BAD_REQUEST);

        let response = match self {
            ServerError::Config(message) => {
                tracing::error!(error = message, "missing configuration");
                response.status(StatusCode::INTERNAL_SERVER_ERROR)
            },

            ServerError::Validation(ref errors) => response.errors(errors),

            ServerError::Provider(error) => response.details(error),

            ServerError::Query(rejection) => response.details(rejection.body_text()),

            ServerError::Upstream {
                kind,
                status,
                details,
                channel_id,
            } => {
                let response = response
                    .status(
                        StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY),
                    )
                    .details(details);
                match (kind, channel_id) {
                    (Upstream::SendMessage, Some(channel_id)) => {
                        response.channel(status, channel_id)
                    },
                    _ => response,
                }
            },

            ServerError::AuthorizeUrl(err) => {
                tracing::error!(error = %err, "cannot issue oauth2 state");
                response
                    .status(StatusCode::INTERNAL_SERVER_ERROR)
                    .details(err.to_string())
            },

            ServerError::Http(err) => {
                tracing::error!(error = %err, "server returned 500 status");
                ResponseError::default().details(err.to_string())
            },

            ServerError::Internal { details, source } => {
                tracing::error!(source = ?source, %details, "server returned 500 status");
                ResponseError::default().details(details)
            },

            ServerError::MissingParameters | ServerError::InvalidState => response,
        };

        response.into_response()
    }
}
