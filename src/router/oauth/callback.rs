use axum::Json;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::Cookie;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::discord::{Credentials, TokenResponse, UserProfile};
use crate::error::{Result, ServerError};
use crate::oauth_state::STATE_COOKIE;

/// Query sent back by Discord.
#[derive(Debug, Default, Deserialize)]
pub struct Params {
    pub code: Option<String>,
    pub state: Option<String>,
    /// Set when the user denied access.
    pub error: Option<String>,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
    pub message: String,
    pub user: UserProfile,
    // TODO: return a session instead of Discord's access token once a
    // session layer exists.
    pub token: TokenResponse,
}

fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Handler completing the flow: checks state, exchanges the code and fetches
/// the user.
pub async fn handler(
    State(state): State<AppState>,
    jar: CookieJar,
    query: std::result::Result<Query<Params>, QueryRejection>,
) -> Result<(CookieJar, Json<Response>)> {
    let Query(params) = query?;

    if let Some(error) = present(params.error) {
        tracing::warn!(%error, "discord returned an oauth2 error");
        return Err(ServerError::Provider(error));
    }

    let (Some(code), Some(csrf)) = (present(params.code), present(params.state))
    else {
        return Err(ServerError::MissingParameters);
    };

    let cookie = jar.get(STATE_COOKIE).map(|cookie| cookie.value());
    if !state.states.verify(cookie, &csrf) {
        tracing::warn!(has_cookie = cookie.is_some(), "oauth2 state mismatch");
        return Err(ServerError::InvalidState);
    }

    let discord = &state.config.discord;
    let (Some(client_id), Some(client_secret), Some(redirect_uri)) = (
        discord.client_id(),
        discord.client_secret(),
        discord.redirect_uri(),
    ) else {
        return Err(ServerError::Config("OAuth2 credentials are not configured"));
    };
    let credentials = Credentials {
        client_id,
        client_secret,
        redirect_uri,
    };

    let token = state.discord.exchange_code(credentials, &code).await?;
    let user = state.discord.current_user(&token.access_token).await?;

    tracing::info!(user_id = %user.id, "user authenticated with discord");

    Ok((
        jar.remove(Cookie::build(STATE_COOKIE).path("/")),
        Json(Response {
            success: true,
            message: "Authentication successful".to_owned(),
            user,
            token,
        }),
    ))
}

/// Alias of [`handler`] for applications registered with
/// `/discord/redirect` as redirect URI.
pub async fn redirect(
    state: State<AppState>,
    jar: CookieJar,
    query: std::result::Result<Query<Params>, QueryRejection>,
) -> Result<(CookieJar, Json<Response>)> {
    handler(state, jar, query).await
}
