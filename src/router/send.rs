use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use validator::Validate;

use crate::AppState;
use crate::error::{Result, ServerError, Upstream};

/// Accept snowflakes as strings or numbers.
/// An explicit `null` is kept empty so it is not replaced by the default
/// channel.
fn channel_id<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(id) => Ok(Some(id)),
        Value::Number(id) => Ok(Some(id.to_string())),
        Value::Null => Ok(Some(String::new())),
        other => Err(serde::de::Error::custom(format!(
            "invalid channelId `{other}`, expected a string or a number"
        ))),
    }
}

#[derive(Debug, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Body {
    #[serde(default, deserialize_with = "channel_id")]
    #[validate(
        required(message = "channelId is required."),
        length(min = 1, message = "channelId must not be empty.")
    )]
    pub channel_id: Option<String>,
    #[validate(
        required(message = "message is required."),
        length(min = 1, message = "message must not be empty.")
    )]
    pub message: Option<String>,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
    pub message: String,
    /// Message created by Discord.
    pub data: Value,
}

/// Handler relaying a message to a Discord channel.
pub async fn handler(State(state): State<AppState>, body: Bytes) -> Result<Json<Response>> {
    let Some(bot_token) = state.config.discord.bot_token() else {
        return Err(ServerError::Config("DISCORD_BOT_TOKEN is not configured"));
    };

    let mut body: Body =
        serde_json::from_slice(&body).map_err(|err| ServerError::Internal {
            details: err.to_string(),
            source: Some(Box::new(err)),
        })?;
    body.channel_id
        .get_or_insert_with(|| state.config.discord.default_channel_id.clone());
    body.validate()?;

    let channel_id = body.channel_id.unwrap_or_default();
    let message = body.message.unwrap_or_default();

    let response = state
        .discord
        .send_message(&channel_id, &message, bot_token)
        .await?;
    let status = response.status();
    let data = response.json::<Value>().await?;

    if !status.is_success() {
        tracing::warn!(
            channel_id = %channel_id,
            status = status.as_u16(),
            "discord rejected message"
        );
        return Err(ServerError::Upstream {
            kind: Upstream::SendMessage,
            status: status.as_u16(),
            details: data,
            channel_id: Some(channel_id),
        });
    }

    tracing::info!(channel_id = %channel_id, "message sent");
    Ok(Json(Response {
        success: true,
        message: "Message sent successfully".to_owned(),
        data,
    }))
}
