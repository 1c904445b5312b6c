//! HTTP handlers.
pub mod env;
pub mod index;
pub mod oauth;
pub mod send;

/// Configuration pointing every Discord call to `api_url`, with all
/// credentials set.
#[cfg(test)]
pub fn config(api_url: &str) -> crate::config::Configuration {
    let mut config = crate::config::Configuration::default();
    config.discord.api_url = api_url.to_owned();
    config.discord.bot_token = Some("bot-token".into());
    config.discord.client_id = Some("client-id".into());
    config.discord.client_secret = Some("client-secret".into());
    config.discord.redirect_uri =
        Some("http://localhost:8787/auth/discord/callback".into());
    config
}

/// MUST NEVER be used in production.
#[cfg(test)]
pub fn state(config: crate::config::Configuration) -> crate::AppState {
    use std::sync::Arc;

    crate::AppState {
        discord: crate::discord::DiscordClient::new(&config.discord.api_url)
            .unwrap(),
        states: crate::oauth_state::from_config(&config.state).unwrap(),
        config: Arc::new(config),
        metrics: None,
    }
}
