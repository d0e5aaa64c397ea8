use std::net::SocketAddr;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tintype::{api, Config, ProviderGateway, StripeCheckout};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tintype=info"));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let config = Config::from_env()?;
    if !config.has_cookie_secret() {
        tracing::warn!("COOKIE_SECRET not set; entitlement cookies reset on restart");
    }

    let gateway = ProviderGateway::from_config(&config);
    if gateway.is_empty() {
        tracing::warn!("no generation provider configured; restoration requests will fail");
    }

    let checkout = config.stripe_secret_key().map(StripeCheckout::new);
    if checkout.is_none() {
        tracing::warn!("STRIPE_SECRET_KEY not set; purchases disabled");
    }

    let port = config.port();
    let state = api::AppState::new(config, gateway, checkout);
    let app = api::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
