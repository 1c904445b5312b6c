//! Capability listing.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};

use crate::config::Configuration;

#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub message: String,
    pub version: String,
    pub endpoints: BTreeMap<String, String>,
    pub token_configured: bool,
}

/// Handler listing available routes.
pub async fn handler(State(config): State<Arc<Configuration>>) -> Json<Response> {
    let mut endpoints = BTreeMap::from([
        (
            "POST /send".to_owned(),
            "Send a message to Discord channel".to_owned(),
        ),
        (
            "GET /auth/discord".to_owned(),
            "Start Discord OAuth2 authentication".to_owned(),
        ),
        (
            "GET /auth/discord/callback".to_owned(),
            "Discord OAuth2 callback".to_owned(),
        ),
    ]);
    if config.expose_env {
        endpoints.insert(
            "GET /env".to_owned(),
            "Check environment variables (debug)".to_owned(),
        );
    }

    Json(Response {
        message: config.name.clone(),
        version: env!("CARGO_PKG_VERSION").to_owned(),
        endpoints,
        token_configured: config.discord.bot_token().is_some(),
    })
}
