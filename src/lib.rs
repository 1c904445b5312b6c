//! Discord gateway relays messages to Discord channels and signs users in
//! with Discord OAuth2.
#![forbid(unsafe_code)]

pub mod config;
pub mod discord;
pub mod error;
pub mod oauth_state;
mod router;
pub mod telemetry;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::http::{HeaderName, Method, StatusCode, header};
use axum::routing::{get, post};
use axum::{Router, middleware as AxumMiddleware};
use metrics_exporter_prometheus::PrometheusHandle;
use tower::ServiceBuilder;
use tower_http::LatencyUnit;
use tower_http::cors::{Any, CorsLayer};
use tower_http::sensitive_headers::{
    SetSensitiveRequestHeadersLayer, SetSensitiveResponseHeadersLayer,
};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{
    DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer,
};

use crate::discord::DiscordClient;
use crate::oauth_state::StateStore;

/// MUST NEVER be used in production.
#[cfg(test)]
pub async fn make_request(
    app: Router,
    method: Method,
    path: &str,
    cookie: Option<&str>,
    body: String,
) -> axum::http::Response<axum::body::Body> {
    use axum::extract::Request;
    use tower::util::ServiceExt;

    dbg!(&method, path, cookie, &body);

    let mut request = Request::builder()
        .method(method)
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(cookie) = cookie {
        request = request.header(header::COOKIE, cookie);
    }

    app.oneshot(request.body(axum::body::Body::from(body)).unwrap())
        .await
        .unwrap()
}

/// State sharing between routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<config::Configuration>,
    pub discord: DiscordClient,
    pub states: Arc<dyn StateStore>,
    pub metrics: Option<PrometheusHandle>,
}

/// Headers hidden from traces.
const SENSITIVE_HEADERS: [HeaderName; 3] =
    [header::AUTHORIZATION, header::COOKIE, header::SET_COOKIE];

/// Create router.
pub fn app(state: AppState) -> Router {
    let middleware = ServiceBuilder::new()
        // Mark sensitive request headers before they reach the trace span.
        .layer(SetSensitiveRequestHeadersLayer::new(SENSITIVE_HEADERS))
        // Add high level tracing/logging to all requests.
        .layer(
            TraceLayer::new_for_http()
                .on_body_chunk(|chunk: &Bytes, latency: Duration, _span: &tracing::Span| {
                    tracing::trace!(size_bytes = chunk.len(), latency = ?latency, "sending body chunk")
                })
                .make_span_with(DefaultMakeSpan::new().include_headers(true).level(tracing::Level::INFO))
                .on_request(DefaultOnRequest::new())
                .on_response(DefaultOnResponse::new().include_headers(true).latency_unit(LatencyUnit::Micros)),
        )
        // Same for response headers, before the trace layer logs them.
        .layer(SetSensitiveResponseHeadersLayer::new(SENSITIVE_HEADERS))
        // Set a timeout.
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(state.config.timeout),
        ))
        // Add CORS preflight support.
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers(Any),
        );

    let mut routes = Router::new()
        // `GET /` goes to `index`.
        .route("/", get(router::index::handler))
        // `POST /send` goes to `send`.
        .route("/send", post(router::send::handler))
        .route("/auth/discord", get(router::oauth::authorize::handler))
        .route("/auth/discord/callback", get(router::oauth::callback::handler))
        // Redirect URI registered on some Discord applications.
        .route("/discord/redirect", get(router::oauth::callback::redirect));

    if state.config.expose_env {
        routes = routes.route("/env", get(router::env::handler));
    }
    if state.metrics.is_some() {
        routes = routes.route("/metrics", get(telemetry::render));
    }

    routes
        .with_state(state)
        .route_layer(AxumMiddleware::from_fn(telemetry::track))
        .layer(middleware)
}

/// Initialize the application state.
pub async fn initialize_state() -> Result<AppState, Box<dyn std::error::Error>> {
    // read configuration file, then let environment override secrets.
    let path = std::env::var("CONFIG_PATH").unwrap_or_default();
    let config = config::Configuration::default()
        .path(path.into())
        .read()?
        .with_env(|key| std::env::var(key).ok());

    if config.discord.bot_token().is_none() {
        tracing::warn!("`DISCORD_BOT_TOKEN` is not set, `POST /send` will fail");
    }
    if config.discord.client_id().is_none() || config.discord.redirect_uri().is_none() {
        tracing::warn!("`CLIENT_ID` or `REDIRECT` is not set, OAuth2 login will fail");
    }

    let discord = DiscordClient::new(&config.discord.api_url)?;
    let states = oauth_state::from_config(&config.state)?;

    let metrics = if config.telemetry.metrics {
        Some(telemetry::setup_metrics_recorder()?)
    } else {
        None
    };

    Ok(AppState {
        config: Arc::new(config),
        discord,
        states,
        metrics,
    })
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Clone, Default)]
    struct Logs(Arc<Mutex<Vec<u8>>>);

    impl Write for Logs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_cookies_are_not_logged() {
        let logs = Logs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let mut config = router::config("https://discord.com/api");
        config.state.store = config::StoreKind::Signed;
        config.state.secret = Some("secret".into());
        let app = app(router::state(config));

        let response = make_request(
            app,
            Method::GET,
            "/auth/discord",
            Some("oauth_state=very-secret-state"),
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FOUND);
        let set_cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
        // Signature part of the signed cookie never leaves the response.
        let (_, signature) = set_cookie
            .split(';')
            .next()
            .and_then(|cookie| cookie.rsplit_once('.'))
            .unwrap();

        let logs = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(logs.contains("\"cookie\": Sensitive"));
        assert!(logs.contains("\"set-cookie\": Sensitive"));
        assert!(!logs.contains("very-secret-state"));
        assert!(!logs.contains(signature));
    }
}
