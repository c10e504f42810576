use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gymtap::{
    config::{Config, TagSource},
    routes,
    state::AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    tracing::info!("✅ Configuration loaded successfully");

    let state = AppState::new(&config).await?;
    tracing::info!("✅ AppState initialized");

    if config.tag_source == TagSource::Simulated {
        let reader = Arc::clone(&state.reader);
        let sessions = state.sessions.clone();
        tokio::spawn(async move {
            let on_tag = Box::new(move |raw: Vec<u8>| sessions.ingest(raw));
            if let Err(e) = reader.listen(on_tag).await {
                tracing::error!("❌ Simulated tag reader stopped: {}", e);
            }
        });
        tracing::info!(
            "✅ Simulated tag on {} (tap every {:?})",
            config.simulated_machine_id,
            config.simulated_tap_interval
        );
    }

    let app = routes::build_router(state);

    tracing::info!("🚀 Server listening on http://{}", config.bind_addr);
    tracing::info!("✅ All systems operational");

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
