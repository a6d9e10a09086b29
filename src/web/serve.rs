use std::net::SocketAddr;

use axum::extract::State;
use axum::http::{HeaderValue, Method};
use axum::{http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use log::{error, info};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

use shardcraft_lib::web::dto::WorldStatus;

use crate::shard::manager::LocalShardManager;

fn router(manager: LocalShardManager) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET])
        .allow_origin(HeaderValue::from_static("http://127.0.0.1:8000"));

    Router::new()
        .route("/", get(|| async { "shardcraft" }))
        .route("/shards", get(shards))
        .with_state(manager)
        .layer(cors)
}

/// Serves shard status on `port` until the listener fails.
pub(crate) async fn init(manager: LocalShardManager, port: u16) {
    info!("Starting up web server on port {port}...");
    let listener = match TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], port))).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Could not bind status port {port}: {e}");
            return;
        }
    };
    if let Err(e) = axum::serve(listener, router(manager).into_make_service()).await {
        error!("Web server stopped: {e}");
    }
}

async fn shards(State(manager): State<LocalShardManager>) -> impl IntoResponse {
    let shards = manager.status().await;
    (StatusCode::OK, Json(WorldStatus { shards }))
}
