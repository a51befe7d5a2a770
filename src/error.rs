/***************************************************************************************************
Error taxonomy surfaced to RPC callers (§7). Validation errors on inbound consensus messages are
logged and dropped by the caller, never propagated as a failed RPC; only `ClientSubmitBlock`
returns one of these synchronously.
***************************************************************************************************/

use thiserror::Error;

/// Errors the consensus engine and node facade can produce.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// A client submitted a block to a non-primary node.
    #[error("not the primary; primary is {primary_id}")]
    NotPrimary {
        /// id of the current primary, so the caller can retry there.
        primary_id: String,
    },

    /// Hash mismatch, wrong parent, or non-contiguous height.
    #[error("invalid block: {0}")]
    InvalidBlock(String),

    /// A message's `view` differs from this node's `view_number`.
    #[error("view mismatch: expected {expected}, got {got}")]
    ViewMismatch {
        /// this node's current view.
        expected: u64,
        /// the view carried by the inbound message.
        got: u64,
    },

    /// A second, distinct pre-prepare arrived for an already-occupied sequence number.
    #[error("equivocation: sequence {seq} already has a different proposal")]
    Equivocation {
        /// the sequence number that was equivocated on.
        seq: u64,
    },

    /// An outbound send to a peer failed or timed out. Logged, never propagated to a caller.
    #[error("transport failure: {0}")]
    TransportFailure(String),
}

impl NodeError {
    /// The stable taxonomy label used in RPC error bodies (§7), distinct from `Display`, which
    /// is meant for logs and carries extra context.
    pub fn code(&self) -> &'static str {
        match self {
            NodeError::NotPrimary { .. } => "NOT_PRIMARY",
            NodeError::InvalidBlock(_) => "INVALID_BLOCK",
            NodeError::ViewMismatch { .. } => "VIEW_MISMATCH",
            NodeError::Equivocation { .. } => "EQUIVOCATION",
            NodeError::TransportFailure(_) => "TRANSPORT_FAILURE",
        }
    }
}
