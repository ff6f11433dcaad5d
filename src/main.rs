//! Mafia Back binary entrypoint wiring the game directories, the phase controllers,
//! the autonomous participants and the REST/WebSocket surface.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mafia_back::{
    config::AppConfig,
    routes,
    services::{game_loader, generation::GenerationService},
    state::{AppState, SharedState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let games_root = config.games_root.clone();
    let generator = build_generator(&config);
    let app_state = AppState::new(config);

    let loaded = game_loader::load_all(&app_state, &games_root)
        .await
        .with_context(|| format!("reading games root `{}`", games_root.display()))?;
    if loaded == 0 {
        warn!(games_root = %games_root.display(), "no game loaded");
    }
    for game in app_state.games() {
        game_loader::launch(app_state.clone(), game.clone(), generator.clone())
            .await
            .with_context(|| format!("starting game `{}`", game.id()))?;
    }

    let app = build_router(app_state);

    let port = env::var("PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8000);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Generation backend for autonomous participants, when one is configured.
#[cfg(feature = "together-llm")]
fn build_generator(config: &AppConfig) -> Option<Arc<dyn GenerationService>> {
    use mafia_back::{config::GENERATION_API_KEY_ENV, services::together::TogetherClient};

    let api_key = env::var(GENERATION_API_KEY_ENV)
        .ok()
        .filter(|key| !key.is_empty());
    let Some(api_key) = api_key else {
        warn!(
            env = GENERATION_API_KEY_ENV,
            "generation API key not set; autonomous participants disabled"
        );
        return None;
    };
    match TogetherClient::new(config.generation.clone(), api_key) {
        Ok(client) => {
            info!(model = %config.generation.model, "generation backend ready");
            Some(Arc::new(client))
        }
        Err(err) => {
            warn!(error = %err, "failed to build generation client");
            None
        }
    }
}

#[cfg(not(feature = "together-llm"))]
fn build_generator(_config: &AppConfig) -> Option<Arc<dyn GenerationService>> {
    warn!("built without a generation backend; autonomous participants disabled");
    None
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
