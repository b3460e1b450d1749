/// Operator HTTP surface
///
/// `GET /status` reports this operator as up; `POST /check_node` runs the
/// responder against another node.

use crate::probe::unix_now;
use crate::responder::AttestationResponder;
use crate::transport::{CheckNodeRequest, CheckNodeResponse};
use attestation::LivenessClaim;
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

pub fn router(responder: Arc<AttestationResponder>) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/check_node", post(check_node))
        .with_state(responder)
}

async fn status(State(responder): State<Arc<AttestationResponder>>) -> Json<LivenessClaim> {
    Json(LivenessClaim::up(
        responder.operator_id().to_string(),
        unix_now(),
    ))
}

async fn check_node(
    State(responder): State<Arc<AttestationResponder>>,
    Json(request): Json<CheckNodeRequest>,
) -> Result<Json<CheckNodeResponse>, (StatusCode, Json<Value>)> {
    match responder
        .check_node(&request.node_url, request.claim.as_ref())
        .await
    {
        Ok(partial) => Ok(Json(CheckNodeResponse::from(partial))),
        Err(e) => {
            error!("check_node for {} failed: {}", request.node_url, e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            ))
        }
    }
}

/// Serve `app` until `shutdown` flips
pub async fn serve(
    listener: TcpListener,
    app: Router,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    info!("Operator HTTP server listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await
}
