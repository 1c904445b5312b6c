use axum::extract::State;
use axum::http::{HeaderName, StatusCode, header};
use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};

use crate::AppState;
use crate::error::{Result, ServerError};
use crate::oauth_state::STATE_COOKIE;

/// Handler sending the user to the Discord consent page.
pub async fn handler(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<(StatusCode, CookieJar, [(HeaderName, String); 1])> {
    let discord = &state.config.discord;
    let (Some(client_id), Some(redirect_uri)) =
        (discord.client_id(), discord.redirect_uri())
    else {
        return Err(ServerError::Config("CLIENT_ID or REDIRECT is not configured"));
    };

    let issued = state.states.issue()?;
    let url = state
        .discord
        .authorize_url(client_id, redirect_uri, &issued.state);

    // Session cookie, no expiry.
    let cookie = Cookie::build((STATE_COOKIE, issued.cookie))
        .http_only(true)
        .same_site(SameSite::Lax)
        .path("/");

    Ok((
        StatusCode::FOUND,
        jar.add(cookie),
        [(header::LOCATION, url.to_string())],
    ))
}

#[cfg(test)]
pub(super) mod tests {
    use super::*;
    use crate::*;
    use url::Url;

    /// Start a flow, returning the `state` sent to Discord and the cookie
    /// set on the browser.
    pub async fn authorize(app: Router) -> (String, Cookie<'static>) {
        let response =
            make_request(app, Method::GET, "/auth/discord", None, String::default())
                .await;
        assert_eq!(response.status(), StatusCode::FOUND);

        let location = response.headers()[header::LOCATION].to_str().unwrap();
        let location = Url::parse(location).unwrap();
        let state = location
            .query_pairs()
            .find(|(key, _)| key == "state")
            .map(|(_, value)| value.into_owned())
            .unwrap();

        let cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
        let cookie = Cookie::parse(cookie.to_owned()).unwrap();

        (state, cookie)
    }

    #[tokio::test]
    async fn test_authorize_handler() {
        let app = app(router::state(router::config("https://discord.com/api")));

        let response = make_request(
            app.clone(),
            Method::GET,
            "/auth/discord",
            None,
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FOUND);
        let location = response.headers()[header::LOCATION].to_str().unwrap();
        assert!(location.starts_with("https://discord.com/api/oauth2/authorize?"));
        assert!(location.contains("client_id=client-id"));
        assert!(location.contains("response_type=code"));
        assert!(location.contains("scope=identify+email+guilds"));

        let (state, cookie) = authorize(app).await;
        assert_eq!(cookie.name(), STATE_COOKIE);
        assert_eq!(cookie.value(), state);
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.expires(), None);
        assert_eq!(cookie.max_age(), None);
    }

    #[tokio::test]
    async fn test_states_differ() {
        let app = app(router::state(router::config("https://discord.com/api")));

        let (first, _) = authorize(app.clone()).await;
        let (second, _) = authorize(app).await;
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_signed_state_cookie() {
        let mut config = router::config("https://discord.com/api");
        config.state.store = config::StoreKind::Signed;
        config.state.secret = Some("secret".into());
        let app = app(router::state(config));

        let (state, cookie) = authorize(app).await;
        assert_ne!(cookie.value(), state);
        assert!(cookie.value().starts_with(&format!("{state}.")));
    }

    #[tokio::test]
    async fn test_state_ttl_out_of_range() {
        use http_body_util::BodyExt;

        let mut config = router::config("https://discord.com/api");
        config.state.store = config::StoreKind::Memory;
        config.state.ttl = u64::MAX;
        let app = app(router::state(config));

        let response =
            make_request(app, Method::GET, "/auth/discord", None, String::default())
                .await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.headers().get(header::SET_COOKIE).is_none());

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["error"], "Failed to generate OAuth2 URL");
    }

    #[tokio::test]
    async fn test_authorize_without_configuration() {
        let mut config = router::config("https://discord.com/api");
        config.discord.redirect_uri = None;
        let app = app(router::state(config));

        let response =
            make_request(app, Method::GET, "/auth/discord", None, String::default())
                .await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.headers().get(header::SET_COOKIE).is_none());
    }
}
