//! Debug view of the configured bot token.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};

use crate::config::Configuration;

const PREFIX_LENGTH: usize = 10;
const NOT_SET: &str = "not set";

#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub token_configured: bool,
    pub token_length: usize,
    pub token_prefix: String,
}

/// Handler exposing token presence, length and prefix. Never the full token.
pub async fn handler(State(config): State<Arc<Configuration>>) -> Json<Response> {
    let token = config.discord.bot_token();

    Json(Response {
        token_configured: token.is_some(),
        token_length: token.map(str::len).unwrap_or_default(),
        token_prefix: match token {
            Some(token) => {
                let prefix: String = token.chars().take(PREFIX_LENGTH).collect();
                format!("{prefix}...")
            },
            None => NOT_SET.to_owned(),
        },
    })
}
