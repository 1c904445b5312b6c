use discord_gateway::{app, initialize_state, telemetry};
use opentelemetry::global;
use tokio::net::TcpListener;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "cannot listen for shutdown signal");
    }
    tracing::info!("shutting down");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // OTLP exporters are only enabled with an endpoint.
    let endpoint = std::env::var("OTLP_ENDPOINT")
        .ok()
        .filter(|endpoint| !endpoint.is_empty());

    let otel_logs = endpoint
        .as_deref()
        .map(telemetry::setup_logging)
        .transpose()?;
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(fmt::layer())
        .with(otel_logs)
        .init();

    let tracer = endpoint.as_deref().map(telemetry::setup_tracer).transpose()?;
    if let Some(ref provider) = tracer {
        global::set_tracer_provider(provider.clone());
    }

    let state = initialize_state().await?;
    let address = state.config.address.clone();

    let listener = TcpListener::bind(&address).await?;
    tracing::info!(%address, "server started");

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(provider) = tracer {
        if let Err(err) = provider.shutdown() {
            tracing::error!(error = %err, "failed to flush traces");
        }
    }

    Ok(())
}
