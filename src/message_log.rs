/***************************************************************************************************
Message Log: per-sequence tallies of pre-prepare/prepare/commit, keyed by (seq, digest) so that
a Byzantine sender voting multiple digests for the same slot can never contribute to more than
one quorum. Grounded in the teacher's `node::pbft::state::LogEntry` (a single struct per slot
holding `prepare_quorum`/`commit_quorum` `HashSet`s plus `prepared`/`committed_local` flags); this
is the same bookkeeping, reshaped into maps keyed explicitly by the matching digest so the
`(seq, digest)` quorum separation described in §4.2 is structural rather than incidental.
***************************************************************************************************/

use std::collections::{HashMap, HashSet};

use crate::block::Block;
use crate::error::NodeError;

/// Per-sequence tallies. Entries for a slot are retained for the life of the process (garbage
/// collection is a non-goal).
#[derive(Debug, Default)]
pub struct MessageLog {
    pre_prepare: HashMap<u64, Block>,
    prepare: HashMap<(u64, String), HashSet<String>>,
    commit: HashMap<(u64, String), HashSet<String>>,
    prepared_seen: HashSet<(u64, String)>,
    committed_seen: HashSet<(u64, String)>,
}

impl MessageLog {
    /// A fresh, empty log.
    pub fn new() -> MessageLog {
        MessageLog::default()
    }

    /// The block the primary proposed for `seq`, if one was accepted.
    pub fn pre_prepared_block(&self, seq: u64) -> Option<&Block> {
        self.pre_prepare.get(&seq)
    }

    /// Stores `block` iff no entry exists yet for `seq`. A second, distinct proposal for an
    /// already-occupied `seq` is rejected as an equivocation and leaves the first proposal
    /// untouched.
    pub fn record_pre_prepare(&mut self, seq: u64, block: Block) -> Result<(), NodeError> {
        match self.pre_prepare.get(&seq) {
            None => {
                self.pre_prepare.insert(seq, block);
                Ok(())
            }
            Some(existing) if existing.block_hash == block.block_hash => Ok(()),
            Some(_) => Err(NodeError::Equivocation { seq }),
        }
    }

    /// Adds `sender` to the prepare tally for `(seq, digest)`. Duplicates are no-ops. Returns
    /// `true` the first time this sender is recorded for this key (useful only for callers
    /// that want to short-circuit; quorum checks always re-derive from the set size).
    pub fn record_prepare(&mut self, seq: u64, digest: &str, sender: &str) -> bool {
        self.prepare
            .entry((seq, digest.to_string()))
            .or_insert_with(HashSet::new)
            .insert(sender.to_string())
    }

    /// Same semantics as `record_prepare`, for the commit phase.
    pub fn record_commit(&mut self, seq: u64, digest: &str, sender: &str) -> bool {
        self.commit
            .entry((seq, digest.to_string()))
            .or_insert_with(HashSet::new)
            .insert(sender.to_string())
    }

    /// True iff at least `quorum` distinct senders have prepared `(seq, digest)` *and* the
    /// pre-prepare recorded for `seq` carries the same digest. A vote count alone is not
    /// sufficient: it must agree with the one proposal this replica actually accepted.
    pub fn prepared(&self, seq: u64, digest: &str, quorum: usize) -> bool {
        let votes = self.prepare.get(&(seq, digest.to_string())).map_or(0, |s| s.len());
        let matches_pre_prepare = self
            .pre_prepare
            .get(&seq)
            .map_or(false, |b| b.block_hash == digest);
        votes >= quorum && matches_pre_prepare
    }

    /// True iff at least `quorum` distinct senders have committed `(seq, digest)`.
    pub fn committed_local(&self, seq: u64, digest: &str, quorum: usize) -> bool {
        self.commit.get(&(seq, digest.to_string())).map_or(0, |s| s.len()) >= quorum
    }

    /// Marks `(seq, digest)` as having already triggered the one-time "emit Commit" transition.
    /// Returns `true` the first time (i.e. the caller should act), `false` on every subsequent
    /// call — this is the idempotency guard backing `prepared_seen`.
    pub fn mark_prepared_seen(&mut self, seq: u64, digest: &str) -> bool {
        self.prepared_seen.insert((seq, digest.to_string()))
    }

    /// Same idempotency guard for the one-time "apply to chain" transition (`committed_seen`).
    pub fn mark_committed_seen(&mut self, seq: u64, digest: &str) -> bool {
        self.committed_seen.insert((seq, digest.to_string()))
    }
}
