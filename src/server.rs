/***************************************************************************************************
HTTP/JSON RPC surface (§4.5). Grounded in the teacher's overall "one process per node, one
handler per message kind" shape, bound here to `axum` since the teacher had no network layer of
its own to generalize from; route naming follows the message taxonomy of §4.4 directly.
***************************************************************************************************/

use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use log::info;
use serde::{Deserialize, Serialize};

use crate::consensus::{MaliciousMode, StatusSnapshot};
use crate::error::NodeError;
use crate::messages::{CommitMessage, PrePrepareMessage, PrepareMessage};
use crate::node::Node;

/// Builds the full router for a node. `State<Node>` is cheap to clone (two `Arc`s), so every
/// handler gets its own owned copy.
pub fn build_router(node: Node) -> Router {
    Router::new()
        .route("/client/submit", post(client_submit))
        .route("/consensus/pre-prepare", post(consensus_pre_prepare))
        .route("/consensus/prepare", post(consensus_prepare))
        .route("/consensus/commit", post(consensus_commit))
        .route("/chain", get(get_chain))
        .route("/status", get(get_status))
        .route("/test/malicious-mode", post(set_malicious_mode))
        .with_state(node)
}

#[derive(Debug, Deserialize)]
struct ClientSubmitRequest {
    data: String,
}

#[derive(Debug, Serialize)]
struct ClientSubmitResponse {
    block_height: u64,
    block_hash: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl IntoResponse for NodeError {
    fn into_response(self) -> Response {
        let status = match self {
            NodeError::NotPrimary { .. } => StatusCode::CONFLICT,
            NodeError::InvalidBlock(_) => StatusCode::BAD_REQUEST,
            NodeError::ViewMismatch { .. } => StatusCode::BAD_REQUEST,
            NodeError::Equivocation { .. } => StatusCode::CONFLICT,
            NodeError::TransportFailure(_) => StatusCode::BAD_GATEWAY,
        };
        let body = ErrorBody {
            code: self.code(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

async fn client_submit(
    State(node): State<Node>,
    Json(req): Json<ClientSubmitRequest>,
) -> Result<Json<ClientSubmitResponse>, NodeError> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    let block = node.submit_client_block(req.data, now).await?;
    info!(target: "node", "accepted client block at height {}", block.block_height);
    Ok(Json(ClientSubmitResponse {
        block_height: block.block_height,
        block_hash: block.block_hash,
    }))
}

async fn consensus_pre_prepare(State(node): State<Node>, Json(msg): Json<PrePrepareMessage>) -> StatusCode {
    node.handle_pre_prepare(msg).await;
    StatusCode::ACCEPTED
}

async fn consensus_prepare(State(node): State<Node>, Json(msg): Json<PrepareMessage>) -> StatusCode {
    node.handle_prepare(msg).await;
    StatusCode::ACCEPTED
}

async fn consensus_commit(State(node): State<Node>, Json(msg): Json<CommitMessage>) -> StatusCode {
    node.handle_commit(msg).await;
    StatusCode::ACCEPTED
}

async fn get_chain(State(node): State<Node>) -> impl IntoResponse {
    Json(node.chain_blocks())
}

async fn get_status(State(node): State<Node>) -> Json<StatusSnapshot> {
    Json(node.status())
}

#[derive(Debug, Deserialize)]
struct SetMaliciousModeRequest {
    mode: String,
}

async fn set_malicious_mode(
    State(node): State<Node>,
    Json(req): Json<SetMaliciousModeRequest>,
) -> Result<StatusCode, (StatusCode, Json<ErrorBody>)> {
    let mode: MaliciousMode = req.mode.parse().map_err(|err: String| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorBody {
                code: "INVALID_MALICIOUS_MODE",
                message: err,
            }),
        )
    })?;
    node.set_malicious_mode(mode);
    Ok(StatusCode::OK)
}
