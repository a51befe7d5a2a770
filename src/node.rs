/***************************************************************************************************
Node Facade: wires a `ConsensusEngine` to a `PeerTransport`. Grounded in the teacher's
`Simulation` (which owned the `Arc<Mutex<Node>>` handles and drove `handle_broadcast`), narrowed
to a single node's lock-mutate-unlock-then-broadcast cycle (§5): every RPC handler takes the lock
synchronously, runs the protocol step, drops the lock, and only then awaits the transport so a
slow peer can never stall another request into this node.
***************************************************************************************************/

use std::sync::{Arc, Mutex};

use log::warn;

use crate::block::Block;
use crate::consensus::{ConsensusEngine, MaliciousMode, StatusSnapshot};
use crate::error::NodeError;
use crate::messages::{CommitMessage, PrePrepareMessage, PrepareMessage, WireMessage};
use crate::transport::PeerTransport;

/// The live replica: consensus state plus the means to reach its peers. Cloning a `Node` clones
/// the `Arc`/`Arc`, so every clone shares the same lock and the same transport.
#[derive(Clone)]
pub struct Node {
    engine: Arc<Mutex<ConsensusEngine>>,
    transport: Arc<dyn PeerTransport>,
}

impl Node {
    /// Builds a node around an already-constructed engine and transport.
    pub fn new(engine: ConsensusEngine, transport: Arc<dyn PeerTransport>) -> Node {
        Node {
            engine: Arc::new(Mutex::new(engine)),
            transport,
        }
    }

    /// `GetStatus`.
    pub fn status(&self) -> StatusSnapshot {
        self.engine.lock().expect("consensus lock poisoned").status()
    }

    /// `GetBlockchain`.
    pub fn chain_blocks(&self) -> Vec<Block> {
        self.engine.lock().expect("consensus lock poisoned").chain_blocks()
    }

    /// `SetMaliciousMode`.
    pub fn set_malicious_mode(&self, mode: MaliciousMode) {
        self.engine
            .lock()
            .expect("consensus lock poisoned")
            .set_malicious_mode(mode);
    }

    /// `ClientSubmitBlock`: accepts the data, runs it through the engine, and broadcasts
    /// whatever the engine decided to emit. Returns the accepted block so the caller can report
    /// its height/hash back to the client.
    pub async fn submit_client_block(&self, data: String, now: i64) -> Result<Block, NodeError> {
        let (block, outbound, peers) = {
            let mut engine = self.engine.lock().expect("consensus lock poisoned");
            let (block, outbound) = engine.submit_client_block(data, now)?;
            (block, outbound, engine.peers().to_vec())
        };
        self.broadcast_all(&peers, outbound).await;
        Ok(block)
    }

    /// `Consensus.PrePrepare`. Validation failures are logged and swallowed: a Byzantine or
    /// malformed pre-prepare is not this RPC's caller's fault to see as a failure (§7).
    pub async fn handle_pre_prepare(&self, msg: PrePrepareMessage) {
        let (outbound, peers) = {
            let mut engine = self.engine.lock().expect("consensus lock poisoned");
            match engine.handle_pre_prepare(msg) {
                Ok(outbound) => (outbound, engine.peers().to_vec()),
                Err(err) => {
                    warn!(target: "node", "rejected pre-prepare: {}", err);
                    return;
                }
            }
        };
        self.broadcast_all(&peers, outbound).await;
    }

    /// `Consensus.Prepare`.
    pub async fn handle_prepare(&self, msg: PrepareMessage) {
        let (outbound, peers) = {
            let mut engine = self.engine.lock().expect("consensus lock poisoned");
            match engine.handle_prepare(msg) {
                Ok(outbound) => (outbound, engine.peers().to_vec()),
                Err(err) => {
                    warn!(target: "node", "rejected prepare: {}", err);
                    return;
                }
            }
        };
        self.broadcast_all(&peers, outbound).await;
    }

    /// `Consensus.Commit`.
    pub async fn handle_commit(&self, msg: CommitMessage) {
        let outbound = {
            let mut engine = self.engine.lock().expect("consensus lock poisoned");
            match engine.handle_commit(msg) {
                Ok(outbound) => outbound,
                Err(err) => {
                    warn!(target: "node", "rejected commit: {}", err);
                    return;
                }
            }
        };
        debug_assert!(outbound.is_empty(), "commit handling never produces further broadcasts");
    }

    async fn broadcast_all(&self, peers: &[String], outbound: Vec<WireMessage>) {
        for msg in outbound {
            self.transport.broadcast(peers, msg).await;
        }
    }
}
