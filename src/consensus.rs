/***************************************************************************************************
Consensus Engine: the three-phase state machine, one instance per node, driven reactively by
the RPC handlers in `node.rs`. Grounded in the teacher's `node::pbft::state::ReplicaState`
(primary/backup role, `curr_primary`/`is_primary`, `handle_message` dispatch, `2 * self.f + 1`
quorum checks) but generalized from a single linear `Vec<LogEntry>` indexed by `seq - 1` (which
the teacher itself flags with a `TODO` as unsafe under reordering) to the `MessageLog` map keyed
by `(seq, digest)`, plus an explicit `pending`/`ready_to_apply` split so commits that arrive out
of sequence order stall instead of panicking on an uninitialized index.
***************************************************************************************************/

use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::block::{verify_block, Block, Blockchain};
use crate::digest::corrupt_digest;
use crate::error::NodeError;
use crate::message_log::MessageLog;
use crate::messages::{CommitMessage, PrePrepareMessage, PrepareMessage, WireMessage};

/// Runtime-toggleable fault-injection behavior (§4.6). Only affects outbound production; the
/// acceptance logic for inbound messages never consults this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaliciousMode {
    /// Default: follow the protocol faithfully.
    Honest,
    /// Drop every outbound consensus message (pre-prepare/prepare/commit). Models omission.
    Silent,
    /// Substitute a deterministic but incorrect digest into outbound Prepare/Commit messages.
    /// Models equivocation/corruption.
    WrongHash,
}

impl Default for MaliciousMode {
    fn default() -> Self {
        MaliciousMode::Honest
    }
}

impl FromStr for MaliciousMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "honest" => Ok(MaliciousMode::Honest),
            "silent" => Ok(MaliciousMode::Silent),
            "wrong_hash" => Ok(MaliciousMode::WrongHash),
            other => Err(format!("unknown malicious mode '{}'", other)),
        }
    }
}

/// Snapshot returned by `GetStatus`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    /// this node's id.
    pub node_id: String,
    /// the (fixed, view-change-less) view this node operates under.
    pub view: u64,
    /// whether this node is the primary for `view`.
    pub is_primary: bool,
    /// number of blocks in the committed chain, including genesis.
    pub chain_height: u64,
    /// current fault-injection mode.
    pub malicious_mode: MaliciousMode,
}

/// One replica's full consensus state: role, view, the committed chain, the slots currently
/// under consensus, and the quorum tallies backing them.
#[derive(Debug)]
pub struct ConsensusEngine {
    node_id: String,
    is_primary: bool,
    primary_id: String,
    peers: Vec<String>,
    view_number: u64,
    quorum: usize,
    chain: Blockchain,
    /// Blocks currently under consensus, keyed by sequence number (== intended height).
    pending: HashMap<u64, Block>,
    log: MessageLog,
    /// Sequence numbers whose commit quorum was reached but that are waiting for every lower
    /// sequence number to apply first (§4.3 ordering policy).
    ready_to_apply: HashSet<u64>,
    malicious_mode: MaliciousMode,
}

impl ConsensusEngine {
    /// Builds a fresh engine at genesis. `quorum` is `2f + 1` for the configured `f`.
    pub fn new(
        node_id: String,
        is_primary: bool,
        primary_id: String,
        peers: Vec<String>,
        view_number: u64,
        quorum: usize,
    ) -> ConsensusEngine {
        ConsensusEngine {
            node_id,
            is_primary,
            primary_id,
            peers,
            view_number,
            quorum,
            chain: Blockchain::new(),
            pending: HashMap::new(),
            log: MessageLog::new(),
            ready_to_apply: HashSet::new(),
            malicious_mode: MaliciousMode::default(),
        }
    }

    /// Read-only snapshot for `GetStatus`.
    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            node_id: self.node_id.clone(),
            view: self.view_number,
            is_primary: self.is_primary,
            chain_height: self.chain.tip().block_height,
            malicious_mode: self.malicious_mode,
        }
    }

    /// Full committed chain, for `GetBlockchain`.
    pub fn chain_blocks(&self) -> Vec<Block> {
        self.chain.blocks().to_vec()
    }

    /// The peer ids this node broadcasts to (everyone except itself).
    pub fn peers(&self) -> &[String] {
        &self.peers
    }

    /// Swaps the fault-injection mode. Never touches acceptance logic.
    pub fn set_malicious_mode(&mut self, mode: MaliciousMode) {
        self.malicious_mode = mode;
    }

    /// The highest block this node knows about, whether committed or still pending under
    /// consensus. Using this (rather than only the committed tip) as the reference point for
    /// both `verify_block` and new proposals lets the primary pipeline more than one in-flight
    /// sequence number per view without waiting for earlier ones to finish committing.
    fn effective_tip(&self) -> &Block {
        let mut candidate = self.chain.tip();
        loop {
            match self.pending.get(&(candidate.block_height + 1)) {
                Some(next) => candidate = next,
                None => break,
            }
        }
        candidate
    }

    /// *Primary only.* Accepts a client submission: assigns the next sequence number, builds
    /// the block, records its own pre-prepare, and returns the wire messages to broadcast.
    pub fn submit_client_block(
        &mut self,
        data: String,
        now: i64,
    ) -> Result<(Block, Vec<WireMessage>), NodeError> {
        if !self.is_primary {
            return Err(NodeError::NotPrimary {
                primary_id: self.primary_id.clone(),
            });
        }

        let (previous_hash, height) = {
            let tip = self.effective_tip();
            (tip.block_hash.clone(), tip.block_height + 1)
        };
        let seq = height;
        let block = Block::make(data, previous_hash, height, self.view_number, seq, now);

        self.log
            .record_pre_prepare(seq, block.clone())
            .expect("a sequence number this primary just derived from its own tip cannot already be occupied");
        self.pending.insert(seq, block.clone());

        let mut out = self.emit_if_not_silent(WireMessage::PrePrepare(PrePrepareMessage {
            view: self.view_number,
            seq,
            block: block.clone(),
            sender_id: self.node_id.clone(),
        }));
        out.extend(self.enter_prepare_phase(seq, &block));
        Ok((block, out))
    }

    /// Handles an inbound `PrePrepare`. Returns the messages to broadcast in response, or an
    /// error the caller should log and drop (never fail the peer's RPC on).
    pub fn handle_pre_prepare(&mut self, msg: PrePrepareMessage) -> Result<Vec<WireMessage>, NodeError> {
        if msg.view != self.view_number {
            return Err(NodeError::ViewMismatch {
                expected: self.view_number,
                got: msg.view,
            });
        }

        if let Some(existing) = self.log.pre_prepared_block(msg.seq) {
            if existing.block_hash == msg.block.block_hash {
                debug!(target: "consensus", "duplicate pre-prepare for seq {}, ignoring", msg.seq);
                return Ok(Vec::new());
            }
            return Err(NodeError::Equivocation { seq: msg.seq });
        }

        verify_block(&msg.block, self.effective_tip())?;

        self.log.record_pre_prepare(msg.seq, msg.block.clone())?;
        self.pending.insert(msg.seq, msg.block.clone());

        Ok(self.enter_prepare_phase(msg.seq, &msg.block))
    }

    /// Handles an inbound `Prepare`. Votes are recorded even before a matching pre-prepare has
    /// been seen; the quorum predicate itself requires the digest to match once one arrives.
    pub fn handle_prepare(&mut self, msg: PrepareMessage) -> Result<Vec<WireMessage>, NodeError> {
        if msg.view != self.view_number {
            return Err(NodeError::ViewMismatch {
                expected: self.view_number,
                got: msg.view,
            });
        }
        self.log.record_prepare(msg.seq, &msg.digest, &msg.sender_id);
        Ok(self.after_recording_prepare(msg.seq, &msg.digest))
    }

    /// Handles an inbound `Commit`.
    pub fn handle_commit(&mut self, msg: CommitMessage) -> Result<Vec<WireMessage>, NodeError> {
        if msg.view != self.view_number {
            return Err(NodeError::ViewMismatch {
                expected: self.view_number,
                got: msg.view,
            });
        }
        self.log.record_commit(msg.seq, &msg.digest, &msg.sender_id);
        self.after_recording_commit(msg.seq, &msg.digest);
        Ok(Vec::new())
    }

    /// PRE_PREPARED -> emit Prepare, recording this node's own vote alongside it.
    fn enter_prepare_phase(&mut self, seq: u64, block: &Block) -> Vec<WireMessage> {
        let digest = block.block_hash.clone();
        self.log.record_prepare(seq, &digest, &self.node_id);

        let mut out = self.emit_if_not_silent(WireMessage::Prepare(PrepareMessage {
            view: self.view_number,
            seq,
            digest: self.outbound_digest(&digest),
            sender_id: self.node_id.clone(),
        }));
        out.extend(self.after_recording_prepare(seq, &digest));
        out
    }

    /// Checks whether the prepare quorum was just reached and, the first time it is, emits
    /// Commit. `digest` here is always the *real* digest this replica accepted, regardless of
    /// `malicious_mode` — that flag only corrupts what goes out on the wire.
    fn after_recording_prepare(&mut self, seq: u64, digest: &str) -> Vec<WireMessage> {
        if self.log.prepared(seq, digest, self.quorum) && self.log.mark_prepared_seen(seq, digest) {
            debug!(target: "consensus", "node {} prepared seq {} digest {}", self.node_id, seq, digest);
            self.enter_commit_phase(seq, digest)
        } else {
            Vec::new()
        }
    }

    /// PREPARED -> emit Commit, recording this node's own vote alongside it.
    fn enter_commit_phase(&mut self, seq: u64, digest: &str) -> Vec<WireMessage> {
        self.log.record_commit(seq, digest, &self.node_id);

        let out = self.emit_if_not_silent(WireMessage::Commit(CommitMessage {
            view: self.view_number,
            seq,
            digest: self.outbound_digest(digest),
            sender_id: self.node_id.clone(),
        }));
        self.after_recording_commit(seq, digest);
        // Commit never triggers any further broadcast on its own; `out` already holds exactly
        // the Commit message itself, or nothing under `silent`.
        out
    }

    /// Checks whether the commit quorum was just reached and, the first time it is, marks the
    /// slot ready and drains whatever contiguous prefix of sequence numbers can now apply.
    fn after_recording_commit(&mut self, seq: u64, digest: &str) {
        if self.log.committed_local(seq, digest, self.quorum) && self.log.mark_committed_seen(seq, digest) {
            debug!(target: "consensus", "node {} committed-local seq {} digest {}", self.node_id, seq, digest);
            self.ready_to_apply.insert(seq);
            self.drain_ready();
        }
    }

    /// Applies every committed, ready sequence number in strictly increasing order, starting
    /// from the next expected height. Stalls (and simply returns) if the next slot in line
    /// hasn't reached `committed_local` yet — covering reordered commit delivery.
    fn drain_ready(&mut self) {
        loop {
            let next = self.chain.tip().block_height + 1;
            if !self.ready_to_apply.remove(&next) {
                break;
            }
            match self.pending.remove(&next) {
                Some(block) => {
                    self.chain.append(block);
                }
                None => {
                    warn!(target: "consensus", "seq {} was ready to apply but had no pending block", next);
                    break;
                }
            }
        }
    }

    /// Wraps `msg` in a one-element `Vec` unless `malicious_mode` is `Silent`, in which case
    /// the message is dropped before it is ever produced (omission).
    fn emit_if_not_silent(&self, msg: WireMessage) -> Vec<WireMessage> {
        if matches!(self.malicious_mode, MaliciousMode::Silent) {
            Vec::new()
        } else {
            vec![msg]
        }
    }

    /// The digest to put on the wire for an outbound Prepare/Commit: the real one, unless
    /// `malicious_mode` is `WrongHash`.
    fn outbound_digest(&self, real_digest: &str) -> String {
        match self.malicious_mode {
            MaliciousMode::WrongHash => corrupt_digest(real_digest),
            _ => real_digest.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(id: &str, is_primary: bool, peers: &[&str]) -> ConsensusEngine {
        ConsensusEngine::new(
            id.to_string(),
            is_primary,
            "n1".to_string(),
            peers.iter().map(|s| s.to_string()).collect(),
            1,
            3,
        )
    }

    fn quintuple() -> Vec<ConsensusEngine> {
        let ids = ["n1", "n2", "n3", "n4", "n5"];
        ids.iter()
            .map(|id| {
                let peers: Vec<&str> = ids.iter().filter(|p| **p != *id).cloned().collect();
                engine(id, *id == "n1", &peers)
            })
            .collect()
    }

    /// Feeds every outbound message produced so far to every other node, draining until no node
    /// produces anything new. Mirrors a synchronous, reliable broadcast network.
    fn run_to_quiescence(nodes: &mut Vec<ConsensusEngine>, mut pending: Vec<(String, WireMessage)>) {
        while let Some((from, msg)) = pending.pop() {
            for node in nodes.iter_mut() {
                if node_id(node) == from {
                    continue;
                }
                let out = deliver(node, msg.clone());
                for m in out {
                    pending.push((node_id(node), m));
                }
            }
        }
    }

    fn node_id(n: &ConsensusEngine) -> String {
        n.node_id.clone()
    }

    fn deliver(node: &mut ConsensusEngine, msg: WireMessage) -> Vec<WireMessage> {
        match msg {
            WireMessage::PrePrepare(m) => node.handle_pre_prepare(m).unwrap_or_default(),
            WireMessage::Prepare(m) => node.handle_prepare(m).unwrap_or_default(),
            WireMessage::Commit(m) => node.handle_commit(m).unwrap_or_default(),
        }
    }

    #[test]
    fn non_primary_rejects_client_submission() {
        let mut replica = engine("n2", false, &["n1", "n3", "n4", "n5"]);
        let err = replica.submit_client_block("hello".into(), 0).unwrap_err();
        assert_eq!(
            err,
            NodeError::NotPrimary {
                primary_id: "n1".to_string()
            }
        );
    }

    #[test]
    fn happy_path_all_five_nodes_commit_the_same_block() {
        let mut nodes = quintuple();
        let (block, out) = nodes[0].submit_client_block("hello".into(), 0).unwrap();
        assert_eq!(block.block_height, 1);

        let pending: Vec<(String, WireMessage)> = out.into_iter().map(|m| ("n1".to_string(), m)).collect();
        run_to_quiescence(&mut nodes, pending);

        for node in &nodes {
            assert_eq!(node.chain.tip().block_height, 1);
            assert_eq!(node.chain.blocks()[1].data, "hello");
            assert_eq!(node.chain.blocks()[1].block_hash, block.block_hash);
        }
    }

    #[test]
    fn silent_node_contributes_nothing_but_still_listens() {
        // A single silent node among four honest ones: the honest four alone already reach
        // quorum (Q=3), so consensus completes for them regardless of node 3. Silence only
        // suppresses node 3's own outbound traffic (§4.6) — its inbound acceptance logic is
        // untouched, so it still independently satisfies its own local quorum once enough
        // honest peers broadcast, and ends up caught up rather than stuck.
        let mut nodes = quintuple();
        nodes[2].set_malicious_mode(MaliciousMode::Silent); // n3

        let (_, out) = nodes[0].submit_client_block("x".into(), 0).unwrap();
        let pending: Vec<(String, WireMessage)> = out.into_iter().map(|m| ("n1".to_string(), m)).collect();
        run_to_quiescence(&mut nodes, pending);

        for (i, node) in nodes.iter().enumerate() {
            assert_eq!(node.chain.tip().block_height, 1, "node {} should have committed", i);
        }
    }

    #[test]
    fn wrong_hash_node_cannot_pull_honest_nodes_off_the_real_digest() {
        let mut nodes = quintuple();
        nodes[1].set_malicious_mode(MaliciousMode::WrongHash); // n2

        let (block, out) = nodes[0].submit_client_block("y".into(), 0).unwrap();
        let pending: Vec<(String, WireMessage)> = out.into_iter().map(|m| ("n1".to_string(), m)).collect();
        run_to_quiescence(&mut nodes, pending);

        for (i, node) in nodes.iter().enumerate() {
            if i != 1 {
                assert_eq!(node.chain.tip().block_height, 1);
                assert_eq!(node.chain.blocks()[1].block_hash, block.block_hash);
            }
        }
    }

    #[test]
    fn two_byzantine_nodes_stay_at_the_safety_boundary() {
        let mut nodes = quintuple();
        nodes[1].set_malicious_mode(MaliciousMode::Silent); // n2
        nodes[2].set_malicious_mode(MaliciousMode::WrongHash); // n3

        let (_, out) = nodes[0].submit_client_block("z".into(), 0).unwrap();
        let pending: Vec<(String, WireMessage)> = out.into_iter().map(|m| ("n1".to_string(), m)).collect();
        run_to_quiescence(&mut nodes, pending);

        // honest = {n1, n4, n5} = 3 = quorum: still commits.
        for i in [0usize, 3, 4] {
            assert_eq!(nodes[i].chain.tip().block_height, 1);
        }
    }

    #[test]
    fn three_byzantine_nodes_breaks_liveness() {
        let mut nodes = quintuple();
        nodes[1].set_malicious_mode(MaliciousMode::Silent); // n2
        nodes[2].set_malicious_mode(MaliciousMode::WrongHash); // n3
        nodes[3].set_malicious_mode(MaliciousMode::Silent); // n4

        let (_, out) = nodes[0].submit_client_block("w".into(), 0).unwrap();
        let pending: Vec<(String, WireMessage)> = out.into_iter().map(|m| ("n1".to_string(), m)).collect();
        run_to_quiescence(&mut nodes, pending);

        // honest = {n1, n5} = 2 < quorum(3): no one commits.
        assert_eq!(nodes[0].chain.tip().block_height, 0);
        assert_eq!(nodes[4].chain.tip().block_height, 0);
    }

    #[test]
    fn second_distinct_pre_prepare_is_rejected_as_equivocation() {
        let mut replica = engine("n2", false, &["n1", "n3", "n4", "n5"]);
        let genesis_hash = replica.chain.tip().block_hash.clone();
        let first = Block::make("a".into(), genesis_hash.clone(), 1, 1, 1, 0);
        let second = Block::make("b".into(), genesis_hash, 1, 1, 1, 0);

        replica
            .handle_pre_prepare(PrePrepareMessage {
                view: 1,
                seq: 1,
                block: first.clone(),
                sender_id: "n1".into(),
            })
            .unwrap();

        let err = replica
            .handle_pre_prepare(PrePrepareMessage {
                view: 1,
                seq: 1,
                block: second,
                sender_id: "n1".into(),
            })
            .unwrap_err();

        assert_eq!(err, NodeError::Equivocation { seq: 1 });
        assert_eq!(replica.pending.get(&1).unwrap().data, "a");
    }

    #[test]
    fn view_mismatch_is_rejected() {
        let mut replica = engine("n2", false, &["n1", "n3", "n4", "n5"]);
        let genesis_hash = replica.chain.tip().block_hash.clone();
        let block = Block::make("a".into(), genesis_hash, 1, 7, 1, 0);
        let err = replica
            .handle_pre_prepare(PrePrepareMessage {
                view: 7,
                seq: 1,
                block,
                sender_id: "n1".into(),
            })
            .unwrap_err();
        assert_eq!(
            err,
            NodeError::ViewMismatch {
                expected: 1,
                got: 7
            }
        );
    }

    #[test]
    fn redelivering_messages_is_idempotent() {
        let mut nodes = quintuple();
        let (_, out) = nodes[0].submit_client_block("hello".into(), 0).unwrap();
        let pending: Vec<(String, WireMessage)> = out.clone().into_iter().map(|m| ("n1".to_string(), m)).collect();
        run_to_quiescence(&mut nodes, pending);

        let height_before: Vec<u64> = nodes.iter().map(|n| n.chain.tip().block_height).collect();

        // redeliver the exact same pre-prepare/prepare/commit traffic a second time
        let pending_again: Vec<(String, WireMessage)> = out.into_iter().map(|m| ("n1".to_string(), m)).collect();
        run_to_quiescence(&mut nodes, pending_again);

        let height_after: Vec<u64> = nodes.iter().map(|n| n.chain.tip().block_height).collect();
        assert_eq!(height_before, height_after);
    }

    #[test]
    fn commit_for_later_seq_stalls_until_earlier_seq_applies() {
        let mut node = engine("n2", false, &["n1", "n3", "n4", "n5"]);
        let genesis_hash = node.chain.tip().block_hash.clone();

        let block1 = Block::make("first".into(), genesis_hash, 1, 1, 1, 0);
        let block2 = Block::make("second".into(), block1.block_hash.clone(), 2, 1, 2, 0);

        // both pre-prepares arrive, in order
        node.handle_pre_prepare(PrePrepareMessage { view: 1, seq: 1, block: block1.clone(), sender_id: "n1".into() }).unwrap();
        node.handle_pre_prepare(PrePrepareMessage { view: 1, seq: 2, block: block2.clone(), sender_id: "n1".into() }).unwrap();

        // commit quorum for seq 2 arrives before seq 1's
        for sender in ["n1", "n3", "n4"] {
            node.handle_commit(CommitMessage { view: 1, seq: 2, digest: block2.block_hash.clone(), sender_id: sender.into() }).unwrap();
        }
        assert_eq!(node.chain.tip().block_height, 0, "seq 2 must not apply before seq 1");

        for sender in ["n1", "n3", "n4"] {
            node.handle_commit(CommitMessage { view: 1, seq: 1, digest: block1.block_hash.clone(), sender_id: sender.into() }).unwrap();
        }
        // now both should have drained in order
        assert_eq!(node.chain.tip().block_height, 2);
        assert_eq!(node.chain.blocks()[1].data, "first");
        assert_eq!(node.chain.blocks()[2].data, "second");
    }
}
