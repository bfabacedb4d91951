// Read-only HTTP admin API
//
// Mirrors the management surface the chat client consumes: exchange listing
// and bindings-by-source. Both endpoints require basic auth. The broker is
// single-vhost; the vhost path segment is accepted but not multiplexed on.

use crate::broker::engine::Engine;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Serialize;
use std::sync::Arc;
use tokio::net::TcpListener;

#[derive(Clone)]
struct AdminState {
    engine: Arc<Engine>,
    /// Precomputed `Basic <credentials>` header value.
    authorization: String,
}

#[derive(Debug, Serialize)]
struct ExchangeRow {
    name: String,
}

#[derive(Debug, Serialize)]
struct BindingRow {
    destination: String,
    routing_key: String,
}

/// Build the admin router for an engine.
pub fn router(engine: Arc<Engine>, user: &str, password: &str) -> Router {
    let state = AdminState {
        engine,
        authorization: format!("Basic {}", STANDARD.encode(format!("{user}:{password}"))),
    };
    Router::new()
        .route("/api/exchanges/:vhost", get(list_exchanges))
        .route(
            "/api/exchanges/:vhost/:exchange/bindings/source",
            get(bindings_by_source),
        )
        .with_state(state)
}

/// Serve the admin API until the task is dropped.
pub async fn serve(listener: TcpListener, router: Router) -> anyhow::Result<()> {
    axum::serve(listener, router).await?;
    Ok(())
}

fn authorized(state: &AdminState, headers: &HeaderMap) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v == state.authorization)
        .unwrap_or(false)
}

async fn list_exchanges(
    State(state): State<AdminState>,
    Path(_vhost): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !authorized(&state, &headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let rows: Vec<ExchangeRow> = state
        .engine
        .exchange_names()
        .into_iter()
        .map(|name| ExchangeRow { name })
        .collect();
    Json(rows).into_response()
}

async fn bindings_by_source(
    State(state): State<AdminState>,
    Path((_vhost, exchange)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    if !authorized(&state, &headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    match state.engine.bindings_by_source(&exchange) {
        Some(bindings) => {
            let rows: Vec<BindingRow> = bindings
                .into_iter()
                .map(|(destination, routing_key)| BindingRow {
                    destination,
                    routing_key,
                })
                .collect();
            Json(rows).into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
