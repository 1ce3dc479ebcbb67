use tracing::info;

use qihang_chat::config::Config;
use qihang_chat::routes;
use qihang_chat::service::transcoder::CompletionRelay;
use qihang_chat::upstream::UpstreamChatClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present (development convenience)
    dotenvy::dotenv().ok();

    // Initialise tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "qihang_chat=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // ── Dependency wiring ─────────────────────────────────────────────────────
    let upstream = UpstreamChatClient::new(&config.upstream_base_url, config.upstream_timeout)?;
    info!(
        "Relaying to {} (timeout {:?})",
        upstream.base_url(),
        config.upstream_timeout
    );
    let app = routes::router(CompletionRelay::new(upstream));

    // ── Listen ────────────────────────────────────────────────────────────────
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on http://{addr}/");

    axum::serve(listener, app).await?;
    Ok(())
}
