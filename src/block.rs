/***************************************************************************************************
Block & Chain Store: an in-memory, append-only blockchain with genesis.
***************************************************************************************************/

use serde::{Deserialize, Serialize};

use crate::digest::hash_block;
use crate::error::NodeError;

/// The unit replicated by the protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Non-negative height; strictly increases by 1 along the chain.
    pub block_height: u64,
    /// Digest of the parent block; empty for genesis.
    pub previous_hash: String,
    /// Digest of this block; `H(data ‖ previous_hash ‖ block_height)`.
    pub block_hash: String,
    /// Producer's wall clock. Informational only, never validated.
    pub timestamp: i64,
    /// Opaque payload.
    pub data: String,
    /// View under which this block was proposed.
    pub view_number: u64,
    /// Monotonic slot assigned by the primary.
    pub sequence_number: u64,
}

impl Block {
    /// Builds a block and fills in `block_hash`. Does not validate against any chain; callers
    /// that need that should go through `verify_block`.
    pub fn make(
        data: String,
        previous_hash: String,
        height: u64,
        view: u64,
        sequence_number: u64,
        timestamp: i64,
    ) -> Block {
        let block_hash = hash_block(&data, &previous_hash, height);
        Block {
            block_height: height,
            previous_hash,
            block_hash,
            timestamp,
            data,
            view_number: view,
            sequence_number,
        }
    }

    /// The fixed genesis block every node constructs identically at startup.
    pub fn genesis() -> Block {
        Block::make("genesis".to_string(), String::new(), 0, 0, 0, 0)
    }
}

/// Recomputes `H` and checks it matches `block.block_hash`, and that `block` extends `tip`
/// (parent hash and contiguous height).
pub fn verify_block(block: &Block, tip: &Block) -> Result<(), NodeError> {
    let expected_hash = hash_block(&block.data, &block.previous_hash, block.block_height);
    if expected_hash != block.block_hash {
        return Err(NodeError::InvalidBlock(format!(
            "block_hash mismatch: expected {}, got {}",
            expected_hash, block.block_hash
        )));
    }
    if block.previous_hash != tip.block_hash {
        return Err(NodeError::InvalidBlock(format!(
            "previous_hash {} does not match tip hash {}",
            block.previous_hash, tip.block_hash
        )));
    }
    if block.block_height != tip.block_height + 1 {
        return Err(NodeError::InvalidBlock(format!(
            "non-contiguous height: expected {}, got {}",
            tip.block_height + 1,
            block.block_height
        )));
    }
    Ok(())
}

/// Ordered, append-only sequence of committed blocks, starting with genesis.
#[derive(Debug, Clone)]
pub struct Blockchain {
    blocks: Vec<Block>,
}

impl Blockchain {
    /// A fresh chain containing only genesis.
    pub fn new() -> Blockchain {
        Blockchain {
            blocks: vec![Block::genesis()],
        }
    }

    /// The last committed block. Never empty: genesis is always present.
    pub fn tip(&self) -> &Block {
        self.blocks.last().expect("blockchain always contains genesis")
    }

    /// Number of blocks including genesis.
    pub fn height(&self) -> u64 {
        self.blocks.last().map(|b| b.block_height).unwrap_or(0)
    }

    /// Appends `block`, trusting the caller already ran `verify_block` against the committed
    /// tip (or the effective tip, for pipelined proposals) at the time it was accepted.
    pub fn append(&mut self, block: Block) {
        self.blocks.push(block);
    }

    /// Read-only view of the whole chain, in height order.
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }
}

impl Default for Blockchain {
    fn default() -> Self {
        Blockchain::new()
    }
}
