/***************************************************************************************************
Wire messages. Grounded in the teacher's `pbft::messages` module (`PBFTMessage` enum plus
`PrePrepareMessage`/`PrepareMessage`/`CommitMessage` structs); reshaped to carry a `Block` instead
of a `ClientRequest { operation: u32 }`, and a `digest: String` on `Prepare`/`Commit` rather than
re-sending the whole request, per §4.3.
***************************************************************************************************/

use serde::{Deserialize, Serialize};

use crate::block::Block;

/// Broadcast by the primary after accepting a client submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrePrepareMessage {
    /// the view the proposal was made under.
    pub view: u64,
    /// the slot assigned by the primary.
    pub seq: u64,
    /// the proposed block.
    pub block: Block,
    /// the id of the node that sent this message (the primary).
    pub sender_id: String,
}

/// Broadcast by every node once it accepts a pre-prepare.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareMessage {
    /// the view carried over from the pre-prepare.
    pub view: u64,
    /// the slot this vote is for.
    pub seq: u64,
    /// digest of the block being prepared.
    pub digest: String,
    /// the id of the node casting this vote.
    pub sender_id: String,
}

/// Broadcast by every node once its prepare quorum is satisfied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitMessage {
    /// the view carried over from the pre-prepare.
    pub view: u64,
    /// the slot this vote is for.
    pub seq: u64,
    /// digest of the block being committed.
    pub digest: String,
    /// the id of the node casting this vote.
    pub sender_id: String,
}

/// Everything a node can broadcast or send to a single peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum WireMessage {
    /// see `PrePrepareMessage`.
    PrePrepare(PrePrepareMessage),
    /// see `PrepareMessage`.
    Prepare(PrepareMessage),
    /// see `CommitMessage`.
    Commit(CommitMessage),
}
