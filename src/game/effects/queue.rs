use std::collections::{HashSet, VecDeque};

use super::context::{EffectContext, TriggerCondition};
use super::spec::{Effect, EffectId};

/// The effect a replacement stood in for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replaced {
    pub effect_id: EffectId,
    pub key: String,
}

#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub seq: u64,
    pub effect: Effect,
    pub context: EffectContext,
    pub enqueued_at_ms: u64,
    /// Trigger condition fired just before this entry resolves.
    pub announce: Option<TriggerCondition>,
    /// Set when a replacement was substituted for the submitted effect.
    pub replaces: Option<Replaced>,
}

/// Refused enqueue: the chain already holds the maximum number of effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainFull {
    pub limit: usize,
}

/// Pending effects of the current chain, resolved strictly in enqueue
/// order. Cancelled entries stay in place and are skipped when they come up.
#[derive(Debug, Default)]
pub struct EffectQueue {
    entries: VecDeque<QueueEntry>,
    cancelled: HashSet<u64>,
    next_seq: u64,
    chain_len: usize,
    max_chain: usize,
}

impl EffectQueue {
    pub fn new(max_chain: usize) -> Self {
        Self {
            max_chain,
            ..Self::default()
        }
    }

    pub fn set_max_chain(&mut self, max_chain: usize) {
        self.max_chain = max_chain;
    }

    pub fn max_chain(&self) -> usize {
        self.max_chain
    }

    pub fn push(
        &mut self,
        effect: Effect,
        mut context: EffectContext,
        now_ms: u64,
        announce: Option<TriggerCondition>,
        replaces: Option<Replaced>,
    ) -> Result<u64, ChainFull> {
        if self.chain_len >= self.max_chain {
            return Err(ChainFull {
                limit: self.max_chain,
            });
        }
        self.next_seq += 1;
        self.chain_len += 1;
        context.chain_position = self.chain_len;
        let seq = self.next_seq;
        self.entries.push_back(QueueEntry {
            seq,
            effect,
            context,
            enqueued_at_ms: now_ms,
            announce,
            replaces,
        });
        Ok(seq)
    }

    /// Next live entry. Cancelled entries are consumed silently.
    pub fn pop(&mut self) -> Option<QueueEntry> {
        while let Some(entry) = self.entries.pop_front() {
            if self.cancelled.remove(&entry.seq) {
                continue;
            }
            return Some(entry);
        }
        None
    }

    pub fn cancel(&mut self, seq: u64) -> bool {
        let queued = self.entries.iter().any(|entry| entry.seq == seq);
        queued && self.cancelled.insert(seq)
    }

    /// Marks every queued entry cancelled and returns their sequence numbers.
    pub fn cancel_all(&mut self) -> Vec<u64> {
        let seqs: Vec<u64> = self
            .entries
            .iter()
            .map(|entry| entry.seq)
            .filter(|seq| !self.cancelled.contains(seq))
            .collect();
        self.cancelled.extend(seqs.iter().copied());
        seqs
    }

    pub fn is_cancelled(&self, seq: u64) -> bool {
        self.cancelled.contains(&seq)
    }

    /// Entries still in the queue, cancelled ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing live is left to resolve.
    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|entry| self.cancelled.contains(&entry.seq))
    }

    pub fn chain_len(&self) -> usize {
        self.chain_len
    }

    /// Starts a new chain once the previous one has fully drained.
    pub fn reset_chain(&mut self) {
        let cancelled = std::mem::take(&mut self.cancelled);
        self.entries.retain(|entry| !cancelled.contains(&entry.seq));
        self.chain_len = 0;
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.cancelled.clear();
        self.chain_len = 0;
    }

    /// Live entries in resolution order.
    pub fn pending(&self) -> Vec<&QueueEntry> {
        self.entries
            .iter()
            .filter(|entry| !self.cancelled.contains(&entry.seq))
            .collect()
    }
}
