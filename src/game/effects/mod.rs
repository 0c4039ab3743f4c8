//! Effect resolution: a bounded, cancellable queue drained one entry at a
//! time, with trigger, replacement and continuous-effect registries layered
//! over it.
//!
//! The engine never lets an effect failure escape. Every entry ends as an
//! [`EffectResult`]; internal errors are additionally reported through
//! [`GameEvent::ErrorReported`].

pub mod context;
pub mod damage;
pub mod queue;
pub mod result;
pub mod spec;

use std::collections::{BTreeMap, HashMap};

use log::{debug, error, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;

pub use context::{EffectContext, EffectScope, TriggerCondition};
pub use damage::{DamageBreakdown, DamageInput, DamageModifier};
pub use queue::{ChainFull, EffectQueue, QueueEntry, Replaced};
pub use result::{EffectResult, EffectResultKind};
pub use spec::{
    CardFilter, DamageSource, DiscardSource, Effect, EffectCategory, EffectId, EffectSpec, TargetCategory,
    TargetContract,
};

use super::error::{EffectError, SessionError};
use super::events::{EventSink, GameEvent};
use super::state::{CardId, EnergyType, GameState, PlayerId, StatusCondition, TargetRef};

const DEFAULT_MAX_CHAIN_LENGTH: usize = 20;
const DEFAULT_EFFECT_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_COOLDOWN_MS: u64 = 100;
const DEFAULT_PACING_PERCENT: u64 = 100;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    pub max_chain_length: usize,
    /// Queued entries older than this when they come up are cancelled.
    /// Zero disables the check.
    pub effect_timeout_ms: u64,
    pub cooldown_ms: u64,
    /// Pacing delay as a percentage of an effect's declared duration.
    pub pacing_percent: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_chain_length: DEFAULT_MAX_CHAIN_LENGTH,
            effect_timeout_ms: DEFAULT_EFFECT_TIMEOUT_MS,
            cooldown_ms: DEFAULT_COOLDOWN_MS,
            pacing_percent: DEFAULT_PACING_PERCENT,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TriggerEffect {
    pub id: EffectId,
    pub condition: TriggerCondition,
    pub effect: Effect,
    /// Only events concerning this player fire the trigger.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<PlayerId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReplacementEffect {
    pub id: EffectId,
    pub intercepts: EffectCategory,
    pub replacement: Effect,
    /// Only intercept effects aimed at this player.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protects: Option<PlayerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_uses: Option<u32>,
}

impl ReplacementEffect {
    pub fn new(intercepts: EffectCategory, replacement: Effect) -> Self {
        Self {
            id: 0,
            intercepts,
            replacement,
            protects: None,
            remaining_uses: None,
        }
    }

    pub fn protecting(mut self, player: PlayerId) -> Self {
        self.protects = Some(player);
        self
    }

    pub fn with_uses(mut self, uses: u32) -> Self {
        self.remaining_uses = Some(uses);
        self
    }

    pub fn with_priority(mut self, priority: i8) -> Self {
        self.replacement.priority = priority;
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ContinuousKind {
    Protection { instance: CardId },
    DamageBonus { player: PlayerId, amount: i32 },
    DamageReduction { instance: CardId, amount: i32 },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum Expiry {
    /// Expires once `TurnState::turns_taken` reaches the value.
    UntilTurnsTaken { turns_taken: u32 },
    /// Expires after this many polls.
    Ticks { remaining: u32 },
    Permanent,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContinuousEffect {
    pub id: EffectId,
    pub source: EffectId,
    pub owner: PlayerId,
    pub kind: ContinuousKind,
    pub expiry: Expiry,
}

impl ContinuousEffect {
    fn is_expired(&self, state: &GameState) -> bool {
        match self.expiry {
            Expiry::UntilTurnsTaken { turns_taken } => state.turn.turns_taken >= turns_taken,
            Expiry::Ticks { remaining } => remaining == 0,
            Expiry::Permanent => false,
        }
    }
}

/// Something that happened on the board which trigger effects may react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerEvent {
    pub condition: TriggerCondition,
    /// Player the event concerns: the one who played, was damaged, and so on.
    pub player: PlayerId,
    pub target: Option<TargetRef>,
    pub source_card: Option<CardId>,
}

impl TriggerEvent {
    pub fn new(condition: TriggerCondition, player: PlayerId) -> Self {
        Self {
            condition,
            player,
            target: None,
            source_card: None,
        }
    }

    pub fn with_target(mut self, target: TargetRef) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_source_card(mut self, card_id: CardId) -> Self {
        self.source_card = Some(card_id);
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EffectStatistics {
    pub submitted: u64,
    pub executed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub replaced: u64,
    pub blocked: u64,
    pub triggered: u64,
    pub total_damage: i64,
}

/// Result of handing an effect to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    Queued(u64),
    Rejected(EffectResult),
}

/// One advance of the stepped scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerStep {
    Idle,
    Waiting { remaining_ms: u64 },
    Processed {
        seq: u64,
        result: EffectResult,
        pacing_ms: u64,
    },
}

/// What applying an effect produced, before the engine publishes anything.
#[derive(Debug, Default)]
struct Applied {
    result: Option<EffectResult>,
    continuous: Vec<(ContinuousKind, Expiry)>,
    triggers: Vec<TriggerEvent>,
    events: Vec<GameEvent>,
}

impl Applied {
    fn new(result: EffectResult) -> Self {
        Self {
            result: Some(result),
            ..Self::default()
        }
    }
}

pub struct EffectEngine {
    config: EngineConfig,
    queue: EffectQueue,
    library: BTreeMap<EffectId, Effect>,
    triggers: Vec<TriggerEffect>,
    replacements: Vec<ReplacementEffect>,
    continuous: Vec<ContinuousEffect>,
    modifiers: Vec<(u32, DamageModifier)>,
    cooldowns: HashMap<String, u64>,
    clock_ms: u64,
    ready_at_ms: u64,
    next_hook: EffectId,
    stats: EffectStatistics,
}

impl Default for EffectEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl std::fmt::Debug for EffectEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectEngine")
            .field("config", &self.config)
            .field("queued", &self.queue.len())
            .field("library", &self.library.len())
            .field("triggers", &self.triggers.len())
            .field("replacements", &self.replacements.len())
            .field("continuous", &self.continuous.len())
            .field("modifiers", &self.modifiers.len())
            .field("cooldowns", &self.cooldowns.len())
            .finish()
    }
}

impl EffectEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            queue: EffectQueue::new(config.max_chain_length),
            config,
            library: BTreeMap::new(),
            triggers: Vec::new(),
            replacements: Vec::new(),
            continuous: Vec::new(),
            modifiers: Vec::new(),
            cooldowns: HashMap::new(),
            clock_ms: 0,
            ready_at_ms: 0,
            next_hook: 1,
            stats: EffectStatistics::default(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Configuration is frozen while anything is queued.
    pub fn set_config(&mut self, config: EngineConfig) -> Result<(), SessionError> {
        if !self.is_idle() {
            return Err(SessionError::ResolutionInProgress);
        }
        self.queue.set_max_chain(config.max_chain_length);
        self.config = config;
        Ok(())
    }

    pub fn set_clock(&mut self, now_ms: u64) {
        self.clock_ms = self.clock_ms.max(now_ms);
    }

    pub fn clock_ms(&self) -> u64 {
        self.clock_ms
    }

    pub fn is_idle(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn pending(&self) -> Vec<&QueueEntry> {
        self.queue.pending()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn statistics(&self) -> &EffectStatistics {
        &self.stats
    }

    /// Clears runtime state: queue, cooldowns, continuous effects, pacing
    /// and statistics. Registered effects and hooks survive.
    pub fn reset(&mut self) {
        self.queue.clear();
        self.cooldowns.clear();
        self.continuous.clear();
        self.clock_ms = 0;
        self.ready_at_ms = 0;
        self.stats = EffectStatistics::default();
    }

    /// Drops every trigger, replacement and damage modifier.
    pub fn clear_hooks(&mut self) {
        self.triggers.clear();
        self.replacements.clear();
        self.modifiers.clear();
    }

    pub fn clear_cooldowns(&mut self) {
        self.cooldowns.clear();
    }

    fn next_hook_id(&mut self) -> EffectId {
        let id = self.next_hook;
        self.next_hook = self.next_hook.wrapping_add(1).max(1);
        id
    }

    // ---- registration -------------------------------------------------

    pub fn register_effect(&mut self, effect: Effect) -> Option<Effect> {
        self.library.insert(effect.id, effect)
    }

    pub fn unregister_effect(&mut self, id: EffectId) -> Option<Effect> {
        self.library.remove(&id)
    }

    pub fn effect(&self, id: EffectId) -> Option<&Effect> {
        self.library.get(&id)
    }

    pub fn register_trigger(
        &mut self,
        condition: TriggerCondition,
        effect: Effect,
        owner: Option<PlayerId>,
    ) -> EffectId {
        let id = self.next_hook_id();
        self.triggers.push(TriggerEffect {
            id,
            condition,
            effect,
            owner,
        });
        id
    }

    pub fn unregister_trigger(&mut self, id: EffectId) -> bool {
        let before = self.triggers.len();
        self.triggers.retain(|trigger| trigger.id != id);
        self.triggers.len() != before
    }

    pub fn triggers(&self) -> &[TriggerEffect] {
        &self.triggers
    }

    pub fn register_replacement(&mut self, mut replacement: ReplacementEffect) -> EffectId {
        let id = self.next_hook_id();
        replacement.id = id;
        self.replacements.push(replacement);
        id
    }

    pub fn unregister_replacement(&mut self, id: EffectId) -> bool {
        let before = self.replacements.len();
        self.replacements.retain(|replacement| replacement.id != id);
        self.replacements.len() != before
    }

    pub fn replacements(&self) -> &[ReplacementEffect] {
        &self.replacements
    }

    pub fn add_damage_modifier(&mut self, modifier: impl Fn(&DamageInput, i32) -> i32 + 'static) -> u32 {
        let id = self.next_hook_id();
        self.modifiers.push((id, Box::new(modifier)));
        id
    }

    pub fn remove_damage_modifier(&mut self, id: u32) -> bool {
        let before = self.modifiers.len();
        self.modifiers.retain(|(modifier_id, _)| *modifier_id != id);
        self.modifiers.len() != before
    }

    pub fn add_continuous(
        &mut self,
        source: EffectId,
        owner: PlayerId,
        kind: ContinuousKind,
        expiry: Expiry,
    ) -> EffectId {
        let id = self.next_hook_id();
        self.continuous.push(ContinuousEffect {
            id,
            source,
            owner,
            kind,
            expiry,
        });
        id
    }

    pub fn continuous(&self) -> &[ContinuousEffect] {
        &self.continuous
    }

    /// Counts down tick-based continuous effects and prunes everything that
    /// has expired.
    pub fn poll_continuous(&mut self, state: &GameState, sink: &mut dyn EventSink) -> usize {
        for effect in &mut self.continuous {
            if let Expiry::Ticks { remaining } = &mut effect.expiry {
                *remaining = remaining.saturating_sub(1);
            }
        }
        self.prune_continuous(state, sink)
    }

    /// Prunes expired continuous effects without advancing tick counters.
    pub fn prune_continuous(&mut self, state: &GameState, sink: &mut dyn EventSink) -> usize {
        let mut expired = Vec::new();
        self.continuous.retain(|effect| {
            if effect.is_expired(state) {
                expired.push(effect.id);
                false
            } else {
                true
            }
        });
        for effect_id in &expired {
            debug!("continuous effect {effect_id} expired");
            sink.publish(GameEvent::EffectExpired { effect_id: *effect_id });
        }
        expired.len()
    }

    /// Drops continuous effects attached to a Pokemon that left play.
    pub fn forget_instance(&mut self, instance: CardId) {
        self.continuous.retain(|effect| match effect.kind {
            ContinuousKind::Protection { instance: id } | ContinuousKind::DamageReduction { instance: id, .. } => {
                id != instance
            }
            ContinuousKind::DamageBonus { .. } => true,
        });
    }

    fn is_protected(&self, instance: CardId) -> bool {
        self.continuous
            .iter()
            .any(|effect| effect.kind == ContinuousKind::Protection { instance })
    }

    fn damage_bonus(&self, player: PlayerId) -> i32 {
        self.continuous
            .iter()
            .filter_map(|effect| match effect.kind {
                ContinuousKind::DamageBonus { player: owner, amount } if owner == player => Some(amount),
                _ => None,
            })
            .sum()
    }

    fn damage_reduction(&self, instance: CardId) -> i32 {
        self.continuous
            .iter()
            .filter_map(|effect| match effect.kind {
                ContinuousKind::DamageReduction { instance: id, amount } if id == instance => Some(amount),
                _ => None,
            })
            .sum()
    }

    pub fn is_on_cooldown(&self, key: &str) -> bool {
        self.cooldowns
            .get(key)
            .is_some_and(|until| self.clock_ms < *until)
    }

    // ---- submission ---------------------------------------------------

    /// Runs `effect` to completion together with everything it spawns and
    /// returns its own result.
    pub fn execute(
        &mut self,
        effect: Effect,
        context: EffectContext,
        state: &mut GameState,
        sink: &mut dyn EventSink,
    ) -> EffectResult {
        let effect_id = effect.id;
        match self.submit(effect, context, None, state, sink) {
            Submission::Rejected(result) => result,
            Submission::Queued(seq) => self
                .drain(state, sink)
                .into_iter()
                .find(|(processed, _)| *processed == seq)
                .map(|(_, result)| result)
                .unwrap_or_else(|| EffectResult::cancelled(effect_id, "effect was cancelled before it resolved")),
        }
    }

    /// Executes a registered effect by id.
    pub fn execute_registered(
        &mut self,
        id: EffectId,
        context: EffectContext,
        state: &mut GameState,
        sink: &mut dyn EventSink,
    ) -> EffectResult {
        match self.library.get(&id).cloned() {
            Some(effect) => self.execute(effect, context, state, sink),
            None => EffectResult::failed(id, format!("effect {id} is not registered")),
        }
    }

    /// Queues `effect` after the cooldown and replacement checks. `announce`
    /// names the trigger condition fired when the entry comes up.
    pub fn submit(
        &mut self,
        effect: Effect,
        context: EffectContext,
        announce: Option<TriggerCondition>,
        state: &GameState,
        sink: &mut dyn EventSink,
    ) -> Submission {
        self.stats.submitted += 1;
        if let Some(rejected) = self.gate_cooldown(&effect, None, sink) {
            return Submission::Rejected(rejected);
        }
        match self.enqueue(effect, context, announce, state, sink) {
            Ok(seq) => Submission::Queued(seq),
            Err(result) => Submission::Rejected(result),
        }
    }

    /// `Some(Failed)` when the effect's key is still cooling down.
    fn gate_cooldown(&mut self, effect: &Effect, entry: Option<u64>, sink: &mut dyn EventSink) -> Option<EffectResult> {
        if !self.is_on_cooldown(&effect.key) {
            return None;
        }
        debug!("effect {} ({}) rejected: on cooldown", effect.id, effect.key);
        self.stats.cancelled += 1;
        sink.publish(GameEvent::EffectCancelled {
            entry,
            effect_id: effect.id,
            reason: "on cooldown".into(),
        });
        Some(EffectResult::failed(effect.id, format!("{} is on cooldown", effect.name)))
    }

    fn enqueue(
        &mut self,
        effect: Effect,
        mut context: EffectContext,
        announce: Option<TriggerCondition>,
        state: &GameState,
        sink: &mut dyn EventSink,
    ) -> Result<u64, EffectResult> {
        let original_id = effect.id;
        let (effect, replaces) = match self.find_replacement(&effect, &context, state) {
            Some(index) => {
                let replacement = &mut self.replacements[index];
                if let Some(uses) = replacement.remaining_uses.as_mut() {
                    *uses = uses.saturating_sub(1);
                }
                let substitute = replacement.replacement.clone();
                let exhausted = replacement.remaining_uses == Some(0);
                let replacement_id = replacement.id;
                if exhausted {
                    self.replacements.remove(index);
                }
                debug!("effect {original_id} replaced by {}", substitute.id);
                sink.publish(GameEvent::EffectReplaced {
                    effect_id: original_id,
                    replacement_id,
                });
                context.replaced = true;
                let replaced = Replaced {
                    effect_id: original_id,
                    key: effect.key,
                };
                (substitute, Some(replaced))
            }
            None => (effect, None),
        };

        let effect_id = effect.id;
        let name = effect.name.clone();
        match self.queue.push(effect, context, self.clock_ms, announce, replaces) {
            Ok(seq) => {
                sink.publish(GameEvent::EffectQueued {
                    entry: seq,
                    effect_id,
                    name,
                });
                Ok(seq)
            }
            Err(ChainFull { limit }) => {
                warn!("effect {effect_id} refused: chain limit {limit} reached");
                self.stats.cancelled += 1;
                sink.publish(GameEvent::EffectCancelled {
                    entry: None,
                    effect_id,
                    reason: format!("chain limit of {limit} reached"),
                });
                Err(EffectResult::cancelled(
                    effect_id,
                    format!("effect chain limit of {limit} reached"),
                ))
            }
        }
    }

    /// Highest-priority eligible replacement whose trial run on a copy of
    /// the state succeeds. Ties go to the earliest registration.
    fn find_replacement(&self, effect: &Effect, context: &EffectContext, state: &GameState) -> Option<usize> {
        if context.replaced {
            return None;
        }
        let aimed_at = affected_player(effect, context);
        let mut candidates: Vec<usize> = self
            .replacements
            .iter()
            .enumerate()
            .filter(|(_, replacement)| {
                replacement.intercepts == effect.category()
                    && replacement.remaining_uses != Some(0)
                    && replacement
                        .protects
                        .map_or(true, |player| aimed_at == Some(player))
            })
            .map(|(index, _)| index)
            .collect();
        candidates.sort_by_key(|index| std::cmp::Reverse(self.replacements[*index].replacement.priority));

        candidates.into_iter().find(|index| {
            let replacement = &self.replacements[*index].replacement;
            let mut trial_state = state.clone();
            let mut trial_context = context.clone();
            trial_context.replaced = true;
            self.can_execute(replacement, &trial_context, &trial_state).is_ok()
                && self
                    .apply(replacement, &mut trial_context, &mut trial_state)
                    .is_ok_and(|applied| applied.result.as_ref().is_some_and(EffectResult::is_success))
        })
    }

    /// Fires every trigger registered for the event's condition, in
    /// registration order. Returns how many were queued.
    pub fn fire(&mut self, event: TriggerEvent, state: &GameState, sink: &mut dyn EventSink) -> usize {
        self.fire_from(event, None, state, sink)
    }

    /// As [`fire`](Self::fire), linking each queued trigger to the entry
    /// that caused it.
    fn fire_from(
        &mut self,
        event: TriggerEvent,
        parent: Option<u64>,
        state: &GameState,
        sink: &mut dyn EventSink,
    ) -> usize {
        let matching: Vec<TriggerEffect> = self
            .triggers
            .iter()
            .filter(|trigger| {
                trigger.condition == event.condition && trigger.owner.map_or(true, |owner| owner == event.player)
            })
            .cloned()
            .collect();

        let mut queued = 0;
        for trigger in matching {
            let source_player = trigger.owner.unwrap_or(event.player);
            let mut context = EffectContext::new(source_player, state.opponent_of(source_player))
                .with_origin(event.condition);
            context.target = event.target;
            context.source_card = event.source_card;
            context.parent = parent;
            sink.publish(GameEvent::TriggerFired {
                condition: event.condition,
                effect_id: trigger.effect.id,
            });
            self.stats.triggered += 1;
            if self.gate_cooldown(&trigger.effect, None, sink).is_some() {
                continue;
            }
            if self.enqueue(trigger.effect, context, None, state, sink).is_ok() {
                queued += 1;
            }
        }
        queued
    }

    pub fn cancel(&mut self, seq: u64, reason: &str, sink: &mut dyn EventSink) -> bool {
        let effect_id = self
            .queue
            .pending()
            .into_iter()
            .find(|entry| entry.seq == seq)
            .map(|entry| entry.effect.id);
        let Some(effect_id) = effect_id else {
            return false;
        };
        if !self.queue.cancel(seq) {
            return false;
        }
        self.stats.cancelled += 1;
        sink.publish(GameEvent::EffectCancelled {
            entry: Some(seq),
            effect_id,
            reason: reason.to_string(),
        });
        true
    }

    /// Cancels everything still queued. Used when a game ends mid-chain.
    pub fn cancel_all(&mut self, reason: &str, sink: &mut dyn EventSink) -> usize {
        let pending: Vec<(u64, EffectId)> = self
            .queue
            .pending()
            .into_iter()
            .map(|entry| (entry.seq, entry.effect.id))
            .collect();
        self.queue.cancel_all();
        for (seq, effect_id) in &pending {
            self.stats.cancelled += 1;
            sink.publish(GameEvent::EffectCancelled {
                entry: Some(*seq),
                effect_id: *effect_id,
                reason: reason.to_string(),
            });
        }
        self.finish_chain(sink);
        pending.len()
    }

    // ---- scheduling ---------------------------------------------------

    /// Resolves every queued entry back to back, ignoring pacing.
    pub fn drain(&mut self, state: &mut GameState, sink: &mut dyn EventSink) -> Vec<(u64, EffectResult)> {
        let mut results = Vec::new();
        while let Some(entry) = self.queue.pop() {
            let seq = entry.seq;
            let result = self.process(entry, state, sink);
            results.push((seq, result));
        }
        self.finish_chain(sink);
        results
    }

    /// Advances the stepped scheduler by at most one entry.
    pub fn step(&mut self, state: &mut GameState, sink: &mut dyn EventSink) -> SchedulerStep {
        if self.queue.is_empty() {
            self.finish_chain(sink);
            return SchedulerStep::Idle;
        }
        if self.clock_ms < self.ready_at_ms {
            return SchedulerStep::Waiting {
                remaining_ms: self.ready_at_ms - self.clock_ms,
            };
        }
        let Some(entry) = self.queue.pop() else {
            self.finish_chain(sink);
            return SchedulerStep::Idle;
        };
        let seq = entry.seq;
        let result = self.process(entry, state, sink);
        let pacing_ms = self.ready_at_ms.saturating_sub(self.clock_ms);
        if self.queue.is_empty() {
            self.finish_chain(sink);
        }
        SchedulerStep::Processed {
            seq,
            result,
            pacing_ms,
        }
    }

    /// Milliseconds until the scheduler may process its next entry.
    pub fn pacing_remaining_ms(&self) -> u64 {
        self.ready_at_ms.saturating_sub(self.clock_ms)
    }

    fn finish_chain(&mut self, sink: &mut dyn EventSink) {
        let effects = self.queue.chain_len();
        if effects == 0 || !self.queue.is_empty() {
            return;
        }
        self.queue.reset_chain();
        sink.publish(GameEvent::ChainCompleted { effects });
    }

    fn process(&mut self, entry: QueueEntry, state: &mut GameState, sink: &mut dyn EventSink) -> EffectResult {
        let QueueEntry {
            seq,
            effect,
            mut context,
            enqueued_at_ms,
            announce,
            replaces,
        } = entry;

        let age = self.clock_ms.saturating_sub(enqueued_at_ms);
        if self.config.effect_timeout_ms > 0 && age > self.config.effect_timeout_ms {
            warn!("effect {} timed out after {age}ms in the queue", effect.id);
            self.stats.cancelled += 1;
            sink.publish(GameEvent::EffectCancelled {
                entry: Some(seq),
                effect_id: effect.id,
                reason: "timed out".into(),
            });
            return EffectResult::cancelled(effect.id, format!("{} timed out after {age}ms", effect.name));
        }

        // Triggered entries can share a key with one that resolved after
        // they were queued.
        if context.origin.is_some() {
            if let Some(rejected) = self.gate_cooldown(&effect, Some(seq), sink) {
                return rejected;
            }
        }

        if let Some(condition) = announce {
            let mut event = TriggerEvent::new(condition, context.source_player);
            event.target = context.target;
            event.source_card = context.source_card;
            self.fire_from(event, Some(seq), state, sink);
        }

        let mut result = match self.can_execute(&effect, &context, state) {
            Err(err) => self.failure(&effect, err, sink),
            Ok(()) => match self.apply(&effect, &mut context, state) {
                Ok(applied) => {
                    context.executed = true;
                    let Applied {
                        result,
                        continuous,
                        triggers,
                        events,
                    } = applied;
                    for event in events {
                        sink.publish(event);
                    }
                    for (kind, expiry) in continuous {
                        self.add_continuous(effect.id, context.source_player, kind, expiry);
                    }
                    for trigger in triggers {
                        self.fire_from(trigger, Some(seq), state, sink);
                    }
                    result.unwrap_or_else(|| EffectResult::failed(effect.id, "effect produced no result"))
                }
                Err(err) => self.failure(&effect, err, sink),
            },
        };

        let until = self.clock_ms.saturating_add(self.config.cooldown_ms);
        if let Some(original) = replaces {
            result = EffectResult::replaced(original.effect_id, result);
            self.stats.replaced += 1;
            // Both keys cool down: the one that was submitted and the one that ran.
            self.cooldowns.insert(original.key, until);
        }
        match result.kind {
            EffectResultKind::Failed => self.stats.failed += 1,
            EffectResultKind::Blocked => self.stats.blocked += 1,
            EffectResultKind::Cancelled => self.stats.cancelled += 1,
            _ => self.stats.executed += 1,
        }
        let dealt = result.damage_total();
        self.stats.total_damage += i64::from(dealt);
        if dealt > 0 {
            if let Some(player) = state.player_mut(context.source_player) {
                player.stats.damage_dealt += i64::from(dealt);
            }
        }

        self.cooldowns.insert(effect.key.clone(), until);
        state.touch();

        sink.publish(GameEvent::EffectExecuted {
            entry: seq,
            effect_id: effect.id,
            result: result.kind,
            value: result.value,
        });
        let pacing_ms = effect.duration_ms.saturating_mul(self.config.pacing_percent) / 100;
        self.ready_at_ms = self.clock_ms.saturating_add(pacing_ms);
        sink.publish(GameEvent::EffectCompleted {
            entry: seq,
            effect_id: effect.id,
            pacing_ms,
        });
        debug!(
            "effect {} ({}) resolved as {:?}, value {}",
            effect.id, effect.name, result.kind, result.value
        );
        result
    }

    fn failure(&self, effect: &Effect, err: EffectError, sink: &mut dyn EventSink) -> EffectResult {
        if err.is_internal() {
            error!("effect {} ({}) failed internally: {err}", effect.id, effect.name);
            sink.publish(GameEvent::ErrorReported {
                source: format!("effect:{}", effect.name),
                detail: err.to_string(),
            });
        } else {
            warn!("effect {} ({}) failed: {err}", effect.id, effect.name);
        }
        EffectResult::failed(effect.id, err.to_string())
    }

    // ---- resolution ---------------------------------------------------

    /// Precondition check shared by the queue and replacement trials.
    pub fn can_execute(&self, effect: &Effect, context: &EffectContext, state: &GameState) -> Result<(), EffectError> {
        let lenient = context.origin.is_some() || context.replaced;
        self.check(effect, context, state, lenient)
    }

    fn check(&self, effect: &Effect, context: &EffectContext, state: &GameState, lenient: bool) -> Result<(), EffectError> {
        let targets = resolve_targets(effect, context, state, lenient)?;
        let player = effect.target.player_target(context).unwrap_or(context.source_player);
        match &effect.spec {
            EffectSpec::Draw { .. } => {
                let owner = state.player(player).ok_or(EffectError::UnknownPlayer { player_id: player })?;
                if owner.deck.is_empty() {
                    return Err(EffectError::EmptyDeck { player_id: player });
                }
            }
            EffectSpec::Search { .. } => {
                state.player(player).ok_or(EffectError::UnknownPlayer { player_id: player })?;
            }
            EffectSpec::Discard { from, .. } => {
                let owner = state.player(player).ok_or(EffectError::UnknownPlayer { player_id: player })?;
                let empty = match from {
                    DiscardSource::Hand => owner.hand.is_empty(),
                    DiscardSource::AttachedEnergy => targets
                        .iter()
                        .chain(context.target.iter())
                        .filter_map(|target| state.pokemon(*target))
                        .all(|pokemon| pokemon.attached.is_empty()),
                };
                if empty {
                    return Err(EffectError::NothingToDiscard);
                }
            }
            EffectSpec::DamageBonus { .. } => {
                state.player(player).ok_or(EffectError::UnknownPlayer { player_id: player })?;
            }
            EffectSpec::Composite { effects } if effects.is_empty() => {
                return Err(EffectError::Internal(format!(
                    "composite effect {} has no parts",
                    effect.id
                )));
            }
            EffectSpec::Composite { effects } => {
                let runnable = effects.iter().any(|spec| {
                    let child = Effect::new(effect.id, effect.name.clone(), spec.clone());
                    self.check(&child, context, state, true).is_ok()
                });
                if !runnable {
                    return Err(EffectError::InvalidTarget);
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn apply(&self, effect: &Effect, context: &mut EffectContext, state: &mut GameState) -> Result<Applied, EffectError> {
        let lenient = context.origin.is_some() || context.replaced;
        self.apply_with(effect, context, state, lenient)
    }

    fn apply_with(
        &self,
        effect: &Effect,
        context: &mut EffectContext,
        state: &mut GameState,
        lenient: bool,
    ) -> Result<Applied, EffectError> {
        let targets = resolve_targets(effect, context, state, lenient)?;
        if !targets.is_empty() {
            context.targets = targets.clone();
        }
        let id = effect.id;
        let player = effect.target.player_target(context).unwrap_or(context.source_player);
        let turns = |base: u32| context.duration_turns.unwrap_or(base);

        match &effect.spec {
            EffectSpec::Damage {
                amount,
                energy_type,
                source,
                inflicts,
            } => {
                let base = context.power.unwrap_or(*amount);
                self.apply_damage(id, base, *energy_type, *source, *inflicts, context, &targets, state)
            }
            EffectSpec::Heal { amount } => {
                let mut healed = Vec::new();
                for target in &targets {
                    let pokemon = state.pokemon_mut(*target).ok_or(EffectError::InvalidTarget)?;
                    let before = pokemon.damage;
                    pokemon.damage = (pokemon.damage - (*amount).max(0)).max(0);
                    healed.push((*target, before - pokemon.damage));
                }
                let total: i32 = healed.iter().map(|(_, amount)| amount).sum();
                Ok(Applied::new(
                    EffectResult::success(id, total)
                        .with_affected(targets.clone())
                        .with_undo(json!({ "kind": "heal", "healed": healed })),
                ))
            }
            EffectSpec::Draw { count } => {
                let owner = state
                    .player_mut(player)
                    .ok_or(EffectError::UnknownPlayer { player_id: player })?;
                let available = (*count).min(owner.deck.len());
                let drawn = owner.draw(available);
                let mut applied = Applied::new(partial_if_short(
                    EffectResult::success(id, drawn.len() as i32),
                    drawn.len(),
                    *count,
                ));
                applied.events.push(GameEvent::CardsDrawn {
                    player_id: player,
                    count: drawn.len(),
                });
                Ok(applied)
            }
            EffectSpec::Search { filter, count } => {
                let owner = state
                    .player_mut(player)
                    .ok_or(EffectError::UnknownPlayer { player_id: player })?;
                let mut found = Vec::new();
                // Search from the top of the deck, which is the end of the vector.
                let mut index = owner.deck.len();
                while index > 0 && found.len() < *count {
                    index -= 1;
                    if filter.matches(&owner.deck[index]) {
                        found.push(owner.deck.remove(index));
                    }
                }
                let ids: Vec<CardId> = found.iter().map(|card| card.id).collect();
                owner.hand.extend(found);
                Ok(Applied::new(
                    partial_if_short(EffectResult::success(id, ids.len() as i32), ids.len(), *count)
                        .with_undo(json!({ "kind": "search", "cards": ids })),
                ))
            }
            EffectSpec::Discard { count, from } => match from {
                DiscardSource::Hand => {
                    let owner = state
                        .player_mut(player)
                        .ok_or(EffectError::UnknownPlayer { player_id: player })?;
                    let keep = owner.hand.len().saturating_sub(*count);
                    let discarded = owner.hand.split_off(keep);
                    let ids: Vec<CardId> = discarded.iter().map(|card| card.id).collect();
                    owner.discard.extend(discarded);
                    Ok(Applied::new(
                        partial_if_short(EffectResult::success(id, ids.len() as i32), ids.len(), *count)
                            .with_undo(json!({ "kind": "discard", "cards": ids })),
                    ))
                }
                DiscardSource::AttachedEnergy => {
                    let target = targets
                        .first()
                        .copied()
                        .or(context.target)
                        .ok_or(EffectError::TargetCount { required: 1, found: 0 })?;
                    let removed = state
                        .pokemon_mut(target)
                        .ok_or(EffectError::InvalidTarget)?
                        .detach_energy(*count);
                    let removed_count = removed.len();
                    if let Some(owner) = state.player_mut(target.player) {
                        owner
                            .discard
                            .extend(removed.into_iter().filter_map(|energy| energy.card));
                    }
                    Ok(Applied::new(
                        partial_if_short(
                            EffectResult::success(id, removed_count as i32),
                            removed_count,
                            *count,
                        )
                        .with_affected(vec![target]),
                    ))
                }
            },
            EffectSpec::ApplyStatus { status } => {
                let mut applied = Applied::new(EffectResult::success(id, 0).with_affected(targets.clone()));
                for target in &targets {
                    apply_status(*target, *status, state, &mut applied.events)?;
                }
                Ok(applied)
            }
            EffectSpec::CureStatus => {
                for target in &targets {
                    state
                        .pokemon_mut(*target)
                        .ok_or(EffectError::InvalidTarget)?
                        .cure_all();
                }
                Ok(Applied::new(EffectResult::success(id, 0).with_affected(targets.clone())))
            }
            EffectSpec::Protect { turns: base } => {
                let until = expiry_after(state, turns(*base));
                let mut applied = Applied::new(EffectResult::success(id, turns(*base) as i32).with_affected(targets.clone()));
                for target in &targets {
                    let instance = state.pokemon(*target).ok_or(EffectError::InvalidTarget)?.instance;
                    applied
                        .continuous
                        .push((ContinuousKind::Protection { instance }, until));
                }
                Ok(applied)
            }
            EffectSpec::DamageBonus { amount, turns: base } => {
                let mut applied = Applied::new(EffectResult::success(id, *amount));
                applied.continuous.push((
                    ContinuousKind::DamageBonus {
                        player,
                        amount: *amount,
                    },
                    expiry_after(state, turns(*base)),
                ));
                Ok(applied)
            }
            EffectSpec::DamageReduction { amount, turns: base } => {
                let until = expiry_after(state, turns(*base));
                let mut applied = Applied::new(EffectResult::success(id, *amount).with_affected(targets.clone()));
                for target in &targets {
                    let instance = state.pokemon(*target).ok_or(EffectError::InvalidTarget)?.instance;
                    applied.continuous.push((
                        ContinuousKind::DamageReduction {
                            instance,
                            amount: *amount,
                        },
                        until,
                    ));
                }
                Ok(applied)
            }
            EffectSpec::Composite { effects } => {
                let mut combined = Applied::default();
                let mut outcome = EffectResult::success(id, 0);
                let mut succeeded = 0usize;
                for spec in effects {
                    let child = Effect::new(id, effect.name.clone(), spec.clone());
                    let mut child_context = context.clone();
                    child_context.targets.clear();
                    let child_result = match self.check(&child, &child_context, state, true) {
                        Ok(()) => match self.apply_with(&child, &mut child_context, state, true) {
                            Ok(applied) => {
                                combined.continuous.extend(applied.continuous);
                                combined.triggers.extend(applied.triggers);
                                combined.events.extend(applied.events);
                                applied
                                    .result
                                    .unwrap_or_else(|| EffectResult::failed(id, "effect produced no result"))
                            }
                            Err(err) if err.is_internal() => return Err(err),
                            Err(err) => EffectResult::failed(id, err.to_string()),
                        },
                        Err(err) if err.is_internal() => return Err(err),
                        Err(err) => EffectResult::failed(id, err.to_string()),
                    };
                    if child_result.is_success() {
                        succeeded += 1;
                    }
                    outcome.value += child_result.value;
                    for target in &child_result.affected {
                        if !outcome.affected.contains(target) {
                            outcome.affected.push(*target);
                        }
                    }
                    outcome.secondary.push(child_result);
                }
                outcome.kind = if succeeded == effects.len() {
                    EffectResultKind::Success
                } else if succeeded > 0 {
                    EffectResultKind::Partial
                } else {
                    EffectResultKind::Failed
                };
                combined.result = Some(outcome);
                Ok(combined)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_damage(
        &self,
        id: EffectId,
        base: i32,
        energy_type: Option<EnergyType>,
        source: DamageSource,
        inflicts: Option<StatusCondition>,
        context: &EffectContext,
        targets: &[TargetRef],
        state: &mut GameState,
    ) -> Result<Applied, EffectError> {
        let combat = state.ruleset.combat;
        let mut applied = Applied::default();
        let mut total = 0;
        let mut blocked = 0usize;
        let mut knocked_out = Vec::new();
        let mut dealt = Vec::new();
        let mut statuses = Vec::new();

        for target in targets {
            let defender = state.pokemon(*target).ok_or(EffectError::InvalidTarget)?;
            let instance = defender.instance;
            if source == DamageSource::Attack && self.is_protected(instance) {
                debug!("damage to {instance} blocked by protection");
                blocked += 1;
                continue;
            }
            let input = DamageInput {
                base,
                energy_type,
                source,
                attacker: context.source_player,
                defender: *target,
            };
            let (bonus, reduction) = match source {
                DamageSource::Attack => (self.damage_bonus(context.source_player), self.damage_reduction(instance)),
                DamageSource::Status => (0, 0),
            };
            let breakdown = damage::calculate(&input, &defender.card, &combat, &self.modifiers, bonus, reduction);

            let pokemon = state.pokemon_mut(*target).ok_or(EffectError::InvalidTarget)?;
            pokemon.damage = pokemon.damage.saturating_add(breakdown.amount);
            let down = pokemon.is_knocked_out();
            if down {
                knocked_out.push(instance);
            }
            total += breakdown.amount;
            dealt.push((*target, breakdown.amount));
            applied.events.push(GameEvent::DamageDealt {
                target: *target,
                amount: breakdown.amount,
                knocked_out: down,
            });
            if breakdown.amount > 0 {
                let mut event = TriggerEvent::new(TriggerCondition::OnDamage, target.player).with_target(*target);
                event.source_card = context.source_card;
                applied.triggers.push(event);
            }
            if let Some(status) = inflicts {
                if !down {
                    statuses.push((*target, status));
                }
            }
        }

        if blocked > 0 && blocked == targets.len() {
            applied.result = Some(EffectResult::blocked(id, "damage prevented by a protection effect"));
            return Ok(applied);
        }

        let mut result = EffectResult::success(id, total)
            .with_affected(dealt.iter().map(|(target, _)| *target).collect())
            .as_damage(knocked_out)
            .with_undo(json!({ "kind": "damage", "dealt": dealt }));
        if blocked > 0 {
            result.kind = EffectResultKind::Partial;
        }
        for (target, status) in statuses {
            apply_status(target, status, state, &mut applied.events)?;
            result = result.with_secondary(EffectResult::success(id, 0).with_affected(vec![target]));
        }
        applied.result = Some(result);
        Ok(applied)
    }
}

fn apply_status(
    target: TargetRef,
    status: StatusCondition,
    state: &mut GameState,
    events: &mut Vec<GameEvent>,
) -> Result<(), EffectError> {
    state
        .pokemon_mut(target)
        .ok_or(EffectError::InvalidTarget)?
        .apply_status(status);
    events.push(GameEvent::StatusApplied { target, status });
    Ok(())
}

fn partial_if_short(mut result: EffectResult, done: usize, wanted: usize) -> EffectResult {
    if done > 0 && done < wanted {
        result.kind = EffectResultKind::Partial;
    }
    result
}

/// Expiry covering `turns` full rounds of the table from now.
fn expiry_after(state: &GameState, turns: u32) -> Expiry {
    let seats = state.turn.order.len().max(state.players.len()).max(1) as u32;
    Expiry::UntilTurnsTaken {
        turns_taken: state.turn.turns_taken + turns.max(1) * seats,
    }
}

/// Player an effect is aimed at, for replacement matching.
fn affected_player(effect: &Effect, context: &EffectContext) -> Option<PlayerId> {
    if let Some(target) = context.target.or_else(|| context.targets.first().copied()) {
        return Some(target.player);
    }
    match effect.target.category {
        TargetCategory::SelfActive | TargetCategory::OwnPokemon | TargetCategory::SourcePlayer => {
            Some(context.source_player)
        }
        TargetCategory::OpponentActive | TargetCategory::OpponentPokemon | TargetCategory::OpponentPlayer => {
            context.opponent
        }
        TargetCategory::AnyPokemon | TargetCategory::None => None,
    }
}

/// Targets an effect will hit. Strict resolution rejects any explicit target
/// the contract does not accept; lenient resolution drops them instead.
/// Single-active contracts fall back to the obvious Pokemon when no usable
/// target was supplied.
fn resolve_targets(
    effect: &Effect,
    context: &EffectContext,
    state: &GameState,
    lenient: bool,
) -> Result<Vec<TargetRef>, EffectError> {
    let contract = effect.target;
    if !contract.category.targets_pokemon() {
        return Ok(Vec::new());
    }
    let explicit = context.all_targets();
    let spread = match context.scope {
        EffectScope::Single | EffectScope::Multiple => None,
        EffectScope::All => Some(contract.candidates(context, state)),
        EffectScope::Area => explicit
            .first()
            .copied()
            .or_else(|| default_target(&contract, context))
            .filter(|centre| contract.is_valid_target(*centre, context, state))
            .map(|centre| {
                let mut area = vec![centre];
                area.extend(in_play(state).filter(|target| target.player == centre.player && *target != centre));
                area
            }),
        EffectScope::Global => Some(in_play(state).collect()),
    };
    if let Some(targets) = spread {
        // Spread effects ignore the contract's maximum.
        if targets.len() < contract.required {
            return Err(EffectError::TargetCount {
                required: contract.required,
                found: targets.len(),
            });
        }
        return Ok(targets);
    }

    let mut targets: Vec<TargetRef> = if lenient {
        explicit
            .into_iter()
            .filter(|target| contract.is_valid_target(*target, context, state))
            .collect()
    } else {
        if explicit
            .iter()
            .any(|target| !contract.is_valid_target(*target, context, state))
        {
            return Err(EffectError::InvalidTarget);
        }
        explicit
    };

    if targets.is_empty() {
        let fallback = default_target(&contract, context);
        if let Some(target) = fallback.filter(|target| contract.is_valid_target(*target, context, state)) {
            targets.push(target);
        }
    }

    if contract.max > 0 && targets.len() > contract.max {
        return Err(EffectError::TargetCount {
            required: contract.max,
            found: targets.len(),
        });
    }
    if targets.len() < contract.required {
        return Err(EffectError::TargetCount {
            required: contract.required,
            found: targets.len(),
        });
    }
    Ok(targets)
}

fn default_target(contract: &TargetContract, context: &EffectContext) -> Option<TargetRef> {
    match contract.category {
        TargetCategory::SelfActive => Some(TargetRef::active(context.source_player)),
        TargetCategory::OpponentActive => context.opponent.map(TargetRef::active),
        _ => None,
    }
}

/// Every Pokemon still standing, seat order then active before bench.
fn in_play(state: &GameState) -> impl Iterator<Item = TargetRef> + '_ {
    state.players.iter().flat_map(|player| {
        player
            .in_play()
            .filter(|(_, pokemon)| !pokemon.is_knocked_out())
            .map(move |(slot, _)| TargetRef {
                player: player.id,
                slot,
            })
    })
}
