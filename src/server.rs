//! HTTP server wiring for the audiomark service.
//!
//! Builds the axum router over an injected catalog and serves it.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tracing::info;

use crate::config::Config;
use crate::error::Result;
use crate::matching::MatchEngine;
use crate::persistance::Catalog;
use crate::routes;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<dyn Catalog>,
    pub engine: MatchEngine,
    pub auto_analysis_bytes: usize,
}

impl AppState {
    pub fn new(catalog: Arc<dyn Catalog>, config: &Config) -> Self {
        Self {
            catalog,
            engine: config.match_engine(),
            auto_analysis_bytes: config.auto_analysis_bytes,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "healthy" }))
        .route("/fingerprint", post(routes::fingerprint))
        .route("/songs", get(routes::list_songs).post(routes::upload_song))
        .route("/songs/regenerate", post(routes::regenerate_catalog))
        .route(
            "/songs/{id}",
            get(routes::get_song)
                .put(routes::update_song)
                .delete(routes::delete_song),
        )
        .route("/songs/{id}/audio", get(routes::song_audio))
        .route("/songs/{id}/regenerate", post(routes::regenerate_song))
        .route("/search", post(routes::search))
        .route("/ws/identify", get(routes::identify_socket))
        .with_state(state)
}

/// Bind `config.bind` and serve until the process is stopped.
pub async fn serve(catalog: Arc<dyn Catalog>, config: &Config) -> Result<()> {
    let listener = TcpListener::bind(&config.bind).await?;
    info!(addr = %config.bind, "listening");

    axum::serve(listener, router(AppState::new(catalog, config))).await?;
    Ok(())
}
