//! One running game: the rule variant, validation pipeline, effect engine
//! and turn machine wired around a single `GameState`.
//!
//! Everything here is single-threaded and synchronous. The host drives time
//! through [`GameSession::tick`]; every other entry point runs to completion
//! before it returns.

use std::collections::HashSet;

use log::{debug, info, warn};
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::action::{ActionKind, ActionOutcome, ActionPayload, ActionResult, GameAction};
use super::config::{self, ResolutionMode, SessionConfig};
use super::effects::{
    ContinuousEffect, DamageSource, Effect, EffectContext, EffectEngine, EffectId, EffectResult,
    EffectSpec, EffectStatistics, ReplacementEffect, SchedulerStep, Submission, TargetCategory,
    TargetContract, TriggerCondition, TriggerEvent,
};
use super::error::{RuleError, SessionError};
use super::events::{EventBuffer, EventSink, GameEvent};
use super::rules::{variant_for, Format, RuleHooks, RuleSet};
use super::state::{
    Card, CardCategory, CardId, EnergyType, GameOutcome, GameState, GameStatus, Player, PlayerId,
    PlayerStatistics, PokemonInPlay, Slot, StatusCondition, TargetRef, TurnFlags, VictoryReason,
};
use super::turn::{ActionRecord, Phase, TimerExpiry, TurnEndReason, TurnManager};
use super::validation::{ValidationPipeline, ValidationStatistics, Validator, ValidatorId, ValidatorScope};

const POISON_DAMAGE: i32 = 10;
const BURN_DAMAGE: i32 = 20;

/// A seat at the table and the deck it brings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerSetup {
    pub id: PlayerId,
    pub deck: Vec<Card>,
}

impl PlayerSetup {
    pub fn new(id: PlayerId, deck: Vec<Card>) -> Self {
        Self { id, deck }
    }
}

/// What an executed action asks the session to do afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FollowUp {
    None,
    EndTurn(TurnEndReason),
    Forfeit,
}

/// What one call to [`GameSession::tick`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub elapsed_ms: u64,
    pub expired: Option<TimerExpiry>,
    pub step: SchedulerStep,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PokemonView {
    pub instance: CardId,
    pub name: String,
    pub hp: i32,
    pub damage: i32,
    pub energy: Vec<EnergyType>,
    pub statuses: Vec<StatusCondition>,
}

impl From<&PokemonInPlay> for PokemonView {
    fn from(pokemon: &PokemonInPlay) -> Self {
        Self {
            instance: pokemon.instance,
            name: pokemon.card.name.clone(),
            hp: pokemon.card.hp,
            damage: pokemon.damage,
            energy: pokemon.energy_types(),
            statuses: pokemon.statuses.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerView {
    pub id: PlayerId,
    pub hand: Vec<CardId>,
    pub deck_size: usize,
    pub discard_size: usize,
    pub prizes_remaining: usize,
    pub points: u8,
    pub active: Option<PokemonView>,
    pub bench: Vec<PokemonView>,
    pub energy_budget: u8,
    pub next_energy: Option<EnergyType>,
    pub time_bank_ms: Option<u64>,
    pub flags: TurnFlags,
}

impl From<&Player> for PlayerView {
    fn from(player: &Player) -> Self {
        Self {
            id: player.id,
            hand: player.hand.iter().map(|card| card.id).collect(),
            deck_size: player.deck.len(),
            discard_size: player.discard.len(),
            prizes_remaining: player.prizes.len(),
            points: player.points,
            active: player.active.as_ref().map(PokemonView::from),
            bench: player.bench.iter().map(PokemonView::from).collect(),
            energy_budget: player.energy_budget,
            next_energy: player.next_energy,
            time_bank_ms: player.time_bank_ms,
            flags: player.flags.clone(),
        }
    }
}

/// Read model handed to presentation layers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub format: Format,
    pub status: GameStatus,
    pub outcome: Option<GameOutcome>,
    pub turn_number: u32,
    pub turns_taken: u32,
    pub current_player: PlayerId,
    pub phase: Phase,
    pub elapsed_ms: u64,
    pub revision: u64,
    pub players: Vec<PlayerView>,
    pub continuous_effects: Vec<ContinuousEffect>,
    pub pending_effects: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionStatistics {
    pub players: Vec<PlayerStatistics>,
    pub effects: EffectStatistics,
    pub validation: ValidationStatistics,
}

#[derive(Serialize)]
struct DebugDump<'a> {
    snapshot: SessionSnapshot,
    config: &'a SessionConfig,
    profile: &'a str,
    resolution_mode: ResolutionMode,
    queue_len: usize,
    cache_len: usize,
    triggers: usize,
    replacements: usize,
    buffered_events: usize,
    turn_elapsed_ms: u64,
    phase_elapsed_ms: u64,
    logged_actions: usize,
    pending_turn_end: Option<TurnEndReason>,
    statistics: SessionStatistics,
}

fn seeded(seed: Option<u64>) -> SmallRng {
    seed.map_or_else(SmallRng::from_entropy, SmallRng::seed_from_u64)
}

pub struct GameSession {
    rules: Box<dyn RuleHooks>,
    config: SessionConfig,
    state: GameState,
    turns: TurnManager,
    effects: EffectEngine,
    pipeline: ValidationPipeline,
    events: EventBuffer,
    rng: SmallRng,
    last_tick_ms: Option<u64>,
    pending_turn_end: Option<TurnEndReason>,
}

impl std::fmt::Debug for GameSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameSession")
            .field("format", &self.rules.ruleset().format)
            .field("status", &self.state.status)
            .field("turn", &self.state.turn)
            .field("effects", &self.effects)
            .field("events", &self.events)
            .finish()
    }
}

impl GameSession {
    /// Session for `format` with the default configuration.
    pub fn new(format: Format) -> Self {
        let config = SessionConfig::default();
        let profile = config::ValidationProfile::default();
        Self::from_parts(variant_for(format), config, profile)
    }

    pub fn with_config(format: Format, config: SessionConfig) -> Result<Self, SessionError> {
        Self::with_rules(variant_for(format), config)
    }

    /// Session driven by a caller-supplied rule variant.
    pub fn with_rules(rules: Box<dyn RuleHooks>, config: SessionConfig) -> Result<Self, SessionError> {
        let profile = config.check()?;
        Ok(Self::from_parts(rules, config, profile))
    }

    fn from_parts(rules: Box<dyn RuleHooks>, config: SessionConfig, profile: config::ValidationProfile) -> Self {
        let effects = EffectEngine::new(config.engine());
        let turns = TurnManager::new(config.turn());
        let state = GameState::new(Vec::new(), rules.ruleset().clone());
        let rng = seeded(config.seed);
        Self {
            rules,
            config,
            state,
            turns,
            effects,
            pipeline: ValidationPipeline::new(profile),
            events: EventBuffer::default(),
            rng,
            last_tick_ms: None,
            pending_turn_end: None,
        }
    }

    // ---- configuration ------------------------------------------------

    /// Replaces the whole configuration. Refused while a game is running.
    pub fn configure(&mut self, config: SessionConfig) -> Result<(), SessionError> {
        if self.state.is_running() {
            return Err(SessionError::GameInProgress);
        }
        let profile = config.check()?;
        self.effects.set_config(config.engine())?;
        self.turns.set_config(config.turn());
        self.pipeline.set_profile(profile);
        self.config = config;
        Ok(())
    }

    /// Switches the validation profile. Takes effect for the next action;
    /// refused while effects are still resolving.
    pub fn set_validation_profile(&mut self, id: &str) -> Result<(), SessionError> {
        if !self.effects.is_idle() {
            return Err(SessionError::ResolutionInProgress);
        }
        let profile = config::profile(id)?;
        info!("validation profile switched to {}", profile.name);
        self.config.validation_profile = profile.name.clone();
        self.pipeline.set_profile(profile);
        Ok(())
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn ruleset(&self) -> &RuleSet {
        self.rules.ruleset()
    }

    pub fn format(&self) -> Format {
        self.rules.ruleset().format
    }

    // ---- accessors ----------------------------------------------------

    pub fn state(&self) -> &GameState {
        &self.state
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    pub fn outcome(&self) -> Option<&GameOutcome> {
        self.state.outcome.as_ref()
    }

    pub fn effects(&self) -> &EffectEngine {
        &self.effects
    }

    pub fn effects_mut(&mut self) -> &mut EffectEngine {
        &mut self.effects
    }

    pub fn validation(&self) -> &ValidationPipeline {
        &self.pipeline
    }

    pub fn validation_mut(&mut self) -> &mut ValidationPipeline {
        &mut self.pipeline
    }

    pub fn turn_manager(&self) -> &TurnManager {
        &self.turns
    }

    pub fn events(&self) -> &[GameEvent] {
        self.events.events()
    }

    pub fn drain_events(&mut self) -> Vec<GameEvent> {
        self.events.drain()
    }

    pub fn set_listener(&mut self, listener: impl FnMut(&GameEvent) + 'static) {
        self.events.set_listener(listener);
    }

    // ---- registration -------------------------------------------------

    pub fn register_effect(&mut self, effect: Effect) -> Option<Effect> {
        self.effects.register_effect(effect)
    }

    pub fn unregister_effect(&mut self, id: EffectId) -> Option<Effect> {
        self.effects.unregister_effect(id)
    }

    pub fn register_trigger(&mut self, condition: TriggerCondition, effect: Effect, owner: Option<PlayerId>) -> EffectId {
        self.effects.register_trigger(condition, effect, owner)
    }

    pub fn register_replacement(&mut self, replacement: ReplacementEffect) -> EffectId {
        self.effects.register_replacement(replacement)
    }

    pub fn register_validator(&mut self, scope: ValidatorScope, validator: Validator) -> ValidatorId {
        self.pipeline.register(scope, validator)
    }

    pub fn unregister_validator(&mut self, id: ValidatorId) -> bool {
        self.pipeline.unregister(id)
    }

    /// Runs a registered effect outside of any action, e.g. from a scripted
    /// scenario.
    pub fn execute_effect(&mut self, id: EffectId, context: EffectContext) -> EffectResult {
        let result = self
            .effects
            .execute_registered(id, context, &mut self.state, &mut self.events);
        let mut outcome = ActionOutcome::default();
        self.process_knockouts(&mut outcome);
        self.check_victory();
        result
    }

    // ---- lifecycle ----------------------------------------------------

    /// Shuffles, deals and places the opening Pokemon, decides who goes
    /// first and starts the first turn.
    pub fn start_game(&mut self, setups: Vec<PlayerSetup>) -> Result<(), SessionError> {
        if self.state.is_running() {
            return Err(SessionError::GameInProgress);
        }
        if setups.len() < 2 {
            return Err(SessionError::NotEnoughPlayers { count: setups.len() });
        }
        let ruleset = self.rules.ruleset().clone();
        let mut seats = HashSet::new();
        let mut card_ids = HashSet::new();
        for setup in &setups {
            if !seats.insert(setup.id) {
                return Err(SessionError::DuplicatePlayer { player_id: setup.id });
            }
            if setup.deck.len() != ruleset.deck_size {
                return Err(SessionError::InvalidDeck {
                    player_id: setup.id,
                    reason: format!("expected {} cards, got {}", ruleset.deck_size, setup.deck.len()),
                });
            }
            if let Some(card) = setup.deck.iter().find(|card| !card_ids.insert(card.id)) {
                return Err(SessionError::InvalidDeck {
                    player_id: setup.id,
                    reason: format!("card id {} is used more than once", card.id),
                });
            }
            if !setup.deck.iter().any(|card| card.category == CardCategory::Basic) {
                return Err(SessionError::NoBasicPokemon { player_id: setup.id });
            }
        }
        if let Some(first) = self.config.first_player {
            if !seats.contains(&first) {
                return Err(SessionError::InvalidConfig(format!("first player {first} is not seated")));
            }
        }

        self.rng = seeded(self.config.seed);
        self.effects.reset();
        self.pipeline.flush();
        self.pipeline.reset_statistics();
        self.turns.reset();
        self.last_tick_ms = None;
        self.pending_turn_end = None;

        let order: Vec<PlayerId> = setups.iter().map(|setup| setup.id).collect();
        let players = setups
            .into_iter()
            .map(|setup| deal(setup, &ruleset, &mut self.rng))
            .collect();
        self.state = GameState::new(players, ruleset);
        self.state.status = GameStatus::Running;

        let first = match self.config.first_player {
            Some(first) => first,
            None => order.choose(&mut self.rng).copied().unwrap_or_default(),
        };
        self.turns.begin(&mut self.state.turn, order.clone(), first);
        self.rules
            .on_game_started(&mut self.state, &mut self.rng, &mut self.events);
        info!(
            "{:?} game started with players {:?}, player {first} goes first",
            self.state.ruleset.format, order
        );
        self.events.publish(GameEvent::GameStarted {
            format: self.state.ruleset.format,
            players: order,
            first_player: first,
        });
        self.state.touch();
        self.begin_turn();
        Ok(())
    }

    /// Ends the game. Effective at most once; later calls return false.
    pub fn end_game(&mut self, winner: Option<PlayerId>, reason: VictoryReason) -> bool {
        self.finish(GameOutcome { winner, reason })
    }

    fn finish(&mut self, outcome: GameOutcome) -> bool {
        if !self.state.is_running() {
            return false;
        }
        let cancelled = self.effects.cancel_all("game over", &mut self.events);
        self.state.status = GameStatus::Finished;
        self.state.outcome = Some(outcome.clone());
        self.state.touch();
        self.pending_turn_end = None;
        self.rules.on_game_finished(&self.state, &outcome);
        info!(
            "game over: winner {:?} ({:?}), {cancelled} pending effect(s) cancelled",
            outcome.winner, outcome.reason
        );
        let statistics = self.state.players.iter().map(|player| player.stats.clone()).collect();
        self.events.publish(GameEvent::GameEnded {
            winner: outcome.winner,
            reason: outcome.reason,
            statistics,
        });
        self.effects.clear_hooks();
        self.effects.clear_cooldowns();
        self.pipeline.flush();
        true
    }

    fn check_victory(&mut self) -> bool {
        if !self.state.is_running() {
            return false;
        }
        match self.rules.check_victory(&self.state) {
            Some(outcome) => self.finish(outcome),
            None => false,
        }
    }

    // ---- actions ------------------------------------------------------

    /// Validates and executes one action. Never panics on bad input: every
    /// refusal comes back as a failed `ActionResult` with a message.
    pub fn submit_action(&mut self, action: GameAction) -> ActionResult {
        let kind = action.kind();
        let verdict = self.pipeline.validate(&action, &self.state, &mut self.events);
        if !verdict.is_valid {
            let reason = verdict
                .error_message
                .unwrap_or_else(|| "action rejected".to_string());
            return self.block(&action, reason);
        }

        let busy = self.pending_turn_end.is_some() || !self.effects.is_idle();
        let gate = if busy && kind != ActionKind::Surrender {
            Err(RuleError::ResolutionPending)
        } else {
            self.rules.validate(&action, &self.state)
        };
        if let Err(violation) = gate {
            return self.block(&action, violation.to_string());
        }
        self.events.publish(GameEvent::ActionValidated {
            action_id: action.id,
            kind,
            warnings: verdict.warnings.clone(),
        });

        let first_event = self.events.len();
        let executed = match self.rules.execute(&action, &mut self.state, &mut self.events) {
            Some(result) => result.map(|outcome| (outcome, FollowUp::None)),
            None => self.execute(&action),
        };
        let (mut outcome, follow_up) = match executed {
            Ok(done) => done,
            Err(violation) => {
                warn!("action {} ({kind:?}) failed: {violation}", action.id);
                self.record(&action, false);
                self.events.publish(GameEvent::ActionCancelled {
                    action_id: action.id,
                    player_id: action.player_id,
                    reason: violation.to_string(),
                });
                return ActionResult::failure(violation.to_string());
            }
        };

        if let ActionPayload::AttachEnergy { target, .. } = action.payload {
            let target = TargetRef {
                player: action.player_id,
                slot: target,
            };
            self.fire(TriggerEvent::new(TriggerCondition::OnEnergyAttached, action.player_id).with_target(target));
        }
        for result in self.settle() {
            outcome.absorb(result);
        }
        self.process_knockouts(&mut outcome);
        outcome.cards_drawn = self.events.events()[first_event..]
            .iter()
            .filter_map(|event| match event {
                GameEvent::CardsDrawn { player_id, count } if *player_id == action.player_id => Some(*count),
                _ => None,
            })
            .sum();
        outcome.pending_effects = self.effects.pending().len();

        if let Some(player) = self.state.player_mut(action.player_id) {
            player.stats.actions += 1;
        }
        self.record(&action, true);
        self.state.touch();
        self.events.publish(GameEvent::ActionExecuted {
            action_id: action.id,
            player_id: action.player_id,
            kind,
        });
        debug!("action {} ({kind:?}) executed: {:?}", action.id, outcome);

        if !self.check_victory() {
            match follow_up {
                FollowUp::None => {}
                FollowUp::EndTurn(reason) => self.request_turn_end(reason),
                FollowUp::Forfeit => {
                    let winner = self.state.opponent_of(action.player_id);
                    self.end_game(winner, VictoryReason::Surrender);
                }
            }
        }
        ActionResult::success(outcome, verdict.warnings)
    }

    fn block(&mut self, action: &GameAction, reason: String) -> ActionResult {
        debug!("action {} blocked: {reason}", action.id);
        self.record(action, false);
        self.events.publish(GameEvent::ActionBlocked {
            action_id: action.id,
            player_id: action.player_id,
            kind: action.kind(),
            reason: reason.clone(),
        });
        ActionResult::failure(reason)
    }

    fn record(&mut self, action: &GameAction, success: bool) {
        self.turns.record_action(ActionRecord {
            action_id: action.id,
            player_id: action.player_id,
            kind: action.kind(),
            timestamp_ms: action.timestamp_ms,
            success,
        });
    }

    fn execute(&mut self, action: &GameAction) -> Result<(ActionOutcome, FollowUp), RuleError> {
        let player_id = action.player_id;
        match action.payload {
            ActionPayload::PlayCard { card_id, target } => {
                self.play_card(player_id, card_id, target).map(|outcome| (outcome, FollowUp::None))
            }
            ActionPayload::AttachEnergy { .. } => Err(RuleError::WrongEnergySource {
                expected: "the format's energy rule".into(),
            }),
            ActionPayload::UseAttack { attack_index } => self
                .use_attack(player_id, attack_index)
                .map(|outcome| (outcome, FollowUp::EndTurn(TurnEndReason::AttackResolved))),
            ActionPayload::Retreat { bench_index } => {
                self.retreat(player_id, bench_index).map(|outcome| (outcome, FollowUp::None))
            }
            ActionPayload::Evolution { card_id, target } => {
                self.evolve(player_id, card_id, target).map(|outcome| (outcome, FollowUp::None))
            }
            ActionPayload::UseAbility { slot, target } => {
                self.use_ability(player_id, slot, target).map(|outcome| (outcome, FollowUp::None))
            }
            ActionPayload::PromoteActive { bench_index } => {
                self.promote(player_id, bench_index).map(|outcome| (outcome, FollowUp::None))
            }
            ActionPayload::EndTurn => Ok((
                ActionOutcome::default(),
                FollowUp::EndTurn(TurnEndReason::Voluntary),
            )),
            ActionPayload::Surrender => Ok((ActionOutcome::default(), FollowUp::Forfeit)),
        }
    }

    fn player_mut(&mut self, player_id: PlayerId) -> Result<&mut Player, RuleError> {
        self.state
            .player_mut(player_id)
            .ok_or(RuleError::UnknownPlayer { player_id })
    }

    fn play_card(
        &mut self,
        player_id: PlayerId,
        card_id: CardId,
        target: Option<TargetRef>,
    ) -> Result<ActionOutcome, RuleError> {
        let turn = self.state.turn.turns_taken;
        let bench_size = self.state.ruleset.bench_size;
        let opponent = self.state.opponent_of(player_id);
        let player = self.player_mut(player_id)?;
        let card = player
            .take_from_hand(card_id)
            .ok_or(RuleError::CardNotInHand { card_id })?;

        match card.category {
            CardCategory::Basic => {
                if player.bench.len() >= bench_size {
                    player.hand.push(card);
                    return Err(RuleError::BenchFull { limit: bench_size });
                }
                player.bench.push(PokemonInPlay::new(card, turn));
                player.stats.cards_played += 1;
                let slot = Slot::Bench(player.bench.len() - 1);
                self.fire(
                    TriggerEvent::new(TriggerCondition::OnPlay, player_id)
                        .with_target(TargetRef { player: player_id, slot })
                        .with_source_card(card_id),
                );
                Ok(ActionOutcome::default())
            }
            CardCategory::Item | CardCategory::Supporter => {
                if card.category == CardCategory::Supporter {
                    player.flags.supporter_played = true;
                }
                player.stats.cards_played += 1;
                let name = card.name.clone();
                let specs = card.effects.clone();
                player.discard.push(card);
                debug!("player {player_id} played {name}");

                let mut outcome = ActionOutcome::default();
                if specs.is_empty() {
                    self.fire(TriggerEvent::new(TriggerCondition::OnPlay, player_id).with_source_card(card_id));
                }
                for (index, spec) in specs.into_iter().enumerate() {
                    let effect = Effect::new(card_id, name.clone(), spec).with_key(format!("card:{card_id}:{index}"));
                    let mut context = EffectContext::new(player_id, opponent).with_source_card(card_id);
                    if let Some(target) = target {
                        context = context.with_target(target);
                    }
                    let announce = (index == 0).then_some(TriggerCondition::OnPlay);
                    if let Submission::Rejected(result) =
                        self.effects
                            .submit(effect, context, announce, &self.state, &mut self.events)
                    {
                        outcome.absorb(result);
                    }
                }
                Ok(outcome)
            }
            CardCategory::Stage1 | CardCategory::Stage2 | CardCategory::Energy => {
                player.hand.push(card);
                Err(RuleError::WrongCardCategory { card_id })
            }
        }
    }

    fn use_attack(&mut self, player_id: PlayerId, attack_index: usize) -> Result<ActionOutcome, RuleError> {
        let opponent = self.state.opponent_of(player_id).ok_or(RuleError::NoDefender)?;
        let (instance, energy_type, attack) = {
            let attacker = self
                .player_mut(player_id)?
                .active
                .as_ref()
                .ok_or(RuleError::NoActivePokemon)?;
            let attack = attacker
                .card
                .attacks
                .get(attack_index)
                .cloned()
                .ok_or(RuleError::InvalidAttackIndex { index: attack_index })?;
            (attacker.instance, attacker.card.energy_type, attack)
        };
        self.turns
            .advance_to(&mut self.state.turn, Phase::Battle, &mut self.events);
        if let Some(player) = self.state.player_mut(player_id) {
            player.flags.attacked = true;
            player.stats.attacks_used += 1;
        }
        info!("player {player_id} attacks with {}", attack.name);

        let mut specs = Vec::new();
        match (attack.damage, attack.inflicts) {
            (0, Some(status)) => specs.push(EffectSpec::ApplyStatus { status }),
            (0, None) => {}
            (amount, inflicts) => specs.push(EffectSpec::Damage {
                amount,
                energy_type: Some(energy_type),
                source: DamageSource::Attack,
                inflicts,
            }),
        }
        specs.extend(attack.effects.iter().cloned());
        if specs.is_empty() {
            self.fire(TriggerEvent::new(TriggerCondition::OnAttack, player_id).with_source_card(instance));
        }

        let mut outcome = ActionOutcome::default();
        for (index, spec) in specs.into_iter().enumerate() {
            let effect = Effect::new(instance, attack.name.clone(), spec)
                .with_key(format!("attack:{instance}:{attack_index}:{index}"));
            let context = EffectContext::new(player_id, Some(opponent)).with_source_card(instance);
            let announce = (index == 0).then_some(TriggerCondition::OnAttack);
            if let Submission::Rejected(result) =
                self.effects
                    .submit(effect, context, announce, &self.state, &mut self.events)
            {
                outcome.absorb(result);
            }
        }
        Ok(outcome)
    }

    fn retreat(&mut self, player_id: PlayerId, bench_index: usize) -> Result<ActionOutcome, RuleError> {
        let player = self.player_mut(player_id)?;
        if bench_index >= player.bench.len() {
            return Err(RuleError::EmptyBenchSlot { index: bench_index });
        }
        let mut retreating = player.active.take().ok_or(RuleError::NoActivePokemon)?;
        let paid = retreating.detach_energy(usize::from(retreating.card.retreat_cost));
        player
            .discard
            .extend(paid.into_iter().filter_map(|energy| energy.card));
        retreating.cure_all();
        let retreated = retreating.instance;
        let promoted = std::mem::replace(&mut player.bench[bench_index], retreating);
        let promoted_instance = promoted.instance;
        player.active = Some(promoted);
        player.flags.retreated = true;
        debug!("player {player_id} retreated {retreated} for {promoted_instance}");

        self.effects.forget_instance(retreated);
        self.fire(
            TriggerEvent::new(TriggerCondition::OnRetreat, player_id)
                .with_target(TargetRef::active(player_id))
                .with_source_card(retreated),
        );
        Ok(ActionOutcome::default())
    }

    fn evolve(&mut self, player_id: PlayerId, card_id: CardId, target: Slot) -> Result<ActionOutcome, RuleError> {
        let turn = self.state.turn.turns_taken;
        let player = self.player_mut(player_id)?;
        let card = player
            .take_from_hand(card_id)
            .ok_or(RuleError::CardNotInHand { card_id })?;
        let Some(pokemon) = player.pokemon_mut(target) else {
            player.hand.push(card);
            return Err(RuleError::InvalidSlot);
        };
        let name = card.name.clone();
        pokemon.evolve(card, turn);
        player.stats.cards_played += 1;
        debug!("player {player_id} evolved into {name}");

        self.fire(
            TriggerEvent::new(TriggerCondition::OnEvolution, player_id)
                .with_target(TargetRef {
                    player: player_id,
                    slot: target,
                })
                .with_source_card(card_id),
        );
        Ok(ActionOutcome::default())
    }

    fn use_ability(
        &mut self,
        player_id: PlayerId,
        slot: Slot,
        target: Option<TargetRef>,
    ) -> Result<ActionOutcome, RuleError> {
        let turn = self.state.turn.turns_taken;
        let opponent = self.state.opponent_of(player_id);
        let (instance, ability) = {
            let pokemon = self
                .player_mut(player_id)?
                .pokemon_mut(slot)
                .ok_or(RuleError::InvalidSlot)?;
            let ability = pokemon.card.ability.clone().ok_or(RuleError::NoAbility)?;
            pokemon.ability_used_turn = Some(turn);
            (pokemon.instance, ability)
        };
        debug!("player {player_id} uses {}", ability.name);

        let mut outcome = ActionOutcome::default();
        for (index, spec) in ability.effects.into_iter().enumerate() {
            let effect =
                Effect::new(instance, ability.name.clone(), spec).with_key(format!("ability:{instance}:{index}"));
            let mut context = EffectContext::new(player_id, opponent).with_source_card(instance);
            if let Some(target) = target {
                context = context.with_target(target);
            }
            if let Submission::Rejected(result) =
                self.effects
                    .submit(effect, context, None, &self.state, &mut self.events)
            {
                outcome.absorb(result);
            }
        }
        Ok(outcome)
    }

    fn promote(&mut self, player_id: PlayerId, bench_index: usize) -> Result<ActionOutcome, RuleError> {
        let player = self.player_mut(player_id)?;
        if player.active.is_some() {
            return Err(RuleError::NothingToPromote);
        }
        if bench_index >= player.bench.len() {
            return Err(RuleError::EmptyBenchSlot { index: bench_index });
        }
        let pokemon = player.bench.remove(bench_index);
        info!("player {player_id} promoted {} to the active spot", pokemon.card.name);
        player.active = Some(pokemon);
        Ok(ActionOutcome::default())
    }

    // ---- effects and knock-outs ---------------------------------------

    fn fire(&mut self, event: TriggerEvent) -> usize {
        self.effects.fire(event, &self.state, &mut self.events)
    }

    /// Resolves whatever is queued when the session runs in immediate mode.
    fn settle(&mut self) -> Vec<EffectResult> {
        match self.config.resolution_mode {
            ResolutionMode::Immediate => self.drain_now(),
            ResolutionMode::Stepped => Vec::new(),
        }
    }

    fn drain_now(&mut self) -> Vec<EffectResult> {
        self.effects
            .drain(&mut self.state, &mut self.events)
            .into_iter()
            .map(|(_, result)| result)
            .collect()
    }

    /// Moves every knocked-out Pokemon to the discard pile and pays out
    /// prizes or points. Repeats while knock-out triggers knock out more.
    fn process_knockouts(&mut self, outcome: &mut ActionOutcome) {
        loop {
            let mut downed = Vec::new();
            for player in &mut self.state.players {
                if player.active.as_ref().is_some_and(PokemonInPlay::is_knocked_out) {
                    if let Some(pokemon) = player.active.take() {
                        downed.push((player.id, pokemon));
                    }
                }
                let mut index = player.bench.len();
                while index > 0 {
                    index -= 1;
                    if player.bench[index].is_knocked_out() {
                        downed.push((player.id, player.bench.remove(index)));
                    }
                }
            }
            if downed.is_empty() {
                break;
            }

            let mut owners = Vec::new();
            for (owner, pokemon) in downed {
                let instance = pokemon.instance;
                let value = pokemon.card.knockout_value();
                info!("player {owner}'s {} was knocked out", pokemon.card.name);
                self.effects.forget_instance(instance);
                if let Some(player) = self.state.player_mut(owner) {
                    player.discard.extend(pokemon.into_cards());
                }
                self.events.publish(GameEvent::KnockedOut {
                    player_id: owner,
                    card_id: instance,
                });
                outcome.knocked_out.push(instance);
                if let Some(awardee) = self.awardee(owner) {
                    self.award(awardee, value, outcome);
                }
                self.fire(TriggerEvent::new(TriggerCondition::OnKnockOut, owner).with_source_card(instance));
                if !owners.contains(&owner) {
                    owners.push(owner);
                }
            }
            for owner in owners {
                if self.state.player(owner).is_some_and(Player::needs_promotion) {
                    self.events.publish(GameEvent::PromotionRequired { player_id: owner });
                }
            }
            self.state.touch();
            for result in self.settle() {
                outcome.absorb(result);
            }
        }
    }

    /// Player credited for knocking out one of `owner`'s Pokemon.
    fn awardee(&self, owner: PlayerId) -> Option<PlayerId> {
        let current = self.state.current_player();
        if current != owner {
            Some(current)
        } else {
            self.state.opponent_of(owner)
        }
    }

    fn award(&mut self, awardee: PlayerId, value: u8, outcome: &mut ActionOutcome) {
        let uses_prizes = self.state.ruleset.uses_prizes();
        let Some(player) = self.state.player_mut(awardee) else {
            return;
        };
        player.stats.knockouts += 1;
        if uses_prizes {
            let count = usize::from(value).min(player.prizes.len());
            let split = player.prizes.len() - count;
            let taken = player.prizes.split_off(split);
            player.hand.extend(taken);
            player.stats.prizes_taken += count as u32;
            outcome.prizes_taken += count;
            self.events.publish(GameEvent::PrizesTaken {
                player_id: awardee,
                count,
            });
        } else {
            player.points = player.points.saturating_add(value);
            player.stats.points_scored += u32::from(value);
            let total = player.points;
            outcome.points_scored = outcome.points_scored.saturating_add(value);
            self.events.publish(GameEvent::PointsScored {
                player_id: awardee,
                points: value,
                total,
            });
        }
    }

    // ---- turns --------------------------------------------------------

    fn begin_turn(&mut self) {
        self.turns.start_turn(&mut self.state.turn, &mut self.events);
        let current = self.state.current_player();
        if let Some(player) = self.state.player_mut(current) {
            player.reset_turn_flags();
            let drawn = player.draw(1);
            if drawn.is_empty() {
                warn!("player {current} could not draw at the start of the turn");
            } else {
                self.events.publish(GameEvent::CardsDrawn {
                    player_id: current,
                    count: drawn.len(),
                });
            }
        }
        self.rules
            .on_turn_started(&mut self.state, &mut self.rng, &mut self.events);
        self.fire(TriggerEvent::new(TriggerCondition::OnTurnStart, current));
        self.turns
            .advance_to(&mut self.state.turn, Phase::Main, &mut self.events);
        self.state.touch();

        let mut outcome = ActionOutcome::default();
        for result in self.settle() {
            outcome.absorb(result);
        }
        self.process_knockouts(&mut outcome);
        self.check_victory();
    }

    /// Ends the turn now, or once the effect queue has drained.
    fn request_turn_end(&mut self, reason: TurnEndReason) {
        if self.effects.is_idle() {
            self.end_turn(reason);
        } else {
            debug!("turn end ({reason:?}) deferred until effects resolve");
            self.pending_turn_end = Some(reason);
        }
    }

    fn end_turn(&mut self, reason: TurnEndReason) {
        if !self.state.is_running() {
            return;
        }
        self.pending_turn_end = None;
        let current = self.state.current_player();
        self.fire(TriggerEvent::new(TriggerCondition::OnTurnEnd, current));
        let mut outcome = ActionOutcome::default();
        for result in self.drain_now() {
            outcome.absorb(result);
        }
        if self.state.ruleset.status_checkup {
            self.checkup(current);
        }
        self.process_knockouts(&mut outcome);
        if self.check_victory() {
            return;
        }

        self.turns
            .end_turn(&mut self.state.turn, reason, &mut self.events);
        if let Some(player) = self.state.player_mut(current) {
            player.reset_turn_flags();
        }
        self.effects.poll_continuous(&self.state, &mut self.events);
        self.effects.clear_cooldowns();
        self.state.touch();
        self.begin_turn();
    }

    /// Between-turns resolution of special conditions on active Pokemon.
    fn checkup(&mut self, ending: PlayerId) {
        let actives: Vec<(TargetRef, CardId, Vec<StatusCondition>)> = self
            .state
            .players
            .iter()
            .filter_map(|player| {
                let pokemon = player.active.as_ref()?;
                Some((TargetRef::active(player.id), pokemon.instance, pokemon.statuses.clone()))
            })
            .collect();

        for (target, instance, statuses) in actives {
            if statuses.contains(&StatusCondition::Poisoned) {
                self.status_damage(target, instance, "Poison", POISON_DAMAGE);
            }
            if statuses.contains(&StatusCondition::Burned) {
                self.status_damage(target, instance, "Burn", BURN_DAMAGE);
                if self.rng.gen_bool(0.5) {
                    self.cure(target, StatusCondition::Burned);
                }
            }
            if statuses.contains(&StatusCondition::Asleep) && self.rng.gen_bool(0.5) {
                self.cure(target, StatusCondition::Asleep);
            }
            if statuses.contains(&StatusCondition::Paralyzed) && target.player == ending {
                self.cure(target, StatusCondition::Paralyzed);
            }
        }
    }

    fn status_damage(&mut self, target: TargetRef, instance: CardId, name: &str, amount: i32) {
        let effect = Effect::new(
            instance,
            name,
            EffectSpec::Damage {
                amount,
                energy_type: None,
                source: DamageSource::Status,
                inflicts: None,
            },
        )
        .with_target(TargetContract::single(TargetCategory::AnyPokemon))
        .with_key(format!("checkup:{name}:{instance}"));
        let credited = self.state.opponent_of(target.player).unwrap_or(target.player);
        let context = EffectContext::new(credited, Some(target.player)).with_target(target);
        let result = self
            .effects
            .execute(effect, context, &mut self.state, &mut self.events);
        debug!("{name} checkup on {instance}: {:?} {}", result.kind, result.value);
    }

    fn cure(&mut self, target: TargetRef, status: StatusCondition) {
        if let Some(pokemon) = self.state.pokemon_mut(target) {
            pokemon.cure(status);
            debug!("{} recovered from {status:?}", pokemon.card.name);
        }
    }

    /// Moves to the next phase; completing the terminal phase ends the turn.
    pub fn advance_phase(&mut self) -> Result<Option<Phase>, RuleError> {
        self.ensure_idle()?;
        match self
            .turns
            .advance_phase(&mut self.state.turn, &mut self.events)
        {
            Some(phase) => Ok(Some(phase)),
            None => {
                self.end_turn(TurnEndReason::Voluntary);
                Ok(None)
            }
        }
    }

    pub fn skip_phase(&mut self) -> Result<Option<Phase>, RuleError> {
        self.ensure_idle()?;
        let skipped = self.turns.skip_phase(&mut self.state.turn, &mut self.events)?;
        if skipped.is_none() {
            self.end_turn(TurnEndReason::Voluntary);
        }
        Ok(skipped)
    }

    fn ensure_idle(&self) -> Result<(), RuleError> {
        match self.state.status {
            GameStatus::NotStarted => Err(RuleError::GameNotStarted),
            GameStatus::Finished => Err(RuleError::GameFinished),
            GameStatus::Running if !self.effects.is_idle() || self.pending_turn_end.is_some() => {
                Err(RuleError::ResolutionPending)
            }
            GameStatus::Running => Ok(()),
        }
    }

    // ---- clock --------------------------------------------------------

    /// Advances the game clock to the host's `now_ms`. The first call only
    /// sets the baseline. Runs turn and phase timers, the Pocket time bank,
    /// one step of the stepped scheduler and any deferred turn end.
    ///
    /// Every call must read the same monotonic host clock. A reading behind
    /// the last one counts as no time passing.
    pub fn tick(&mut self, now_ms: u64) -> TickReport {
        let elapsed_ms = self
            .last_tick_ms
            .map_or(0, |last| now_ms.saturating_sub(last));
        self.last_tick_ms = Some(self.last_tick_ms.map_or(now_ms, |last| last.max(now_ms)));
        let mut report = TickReport {
            elapsed_ms,
            expired: None,
            step: SchedulerStep::Idle,
        };
        if !self.state.is_running() {
            return report;
        }

        self.state.elapsed_ms = self.state.elapsed_ms.saturating_add(elapsed_ms);
        self.effects.set_clock(self.state.elapsed_ms);
        let current = self.state.current_player();
        if let Some(bank) = self
            .state
            .player_mut(current)
            .and_then(|player| player.time_bank_ms.as_mut())
        {
            *bank = bank.saturating_sub(elapsed_ms);
        }

        report.expired = self.turns.tick(elapsed_ms, &self.state.turn);
        match report.expired {
            Some(TimerExpiry::Turn) => {
                warn!("turn time limit reached for player {current}");
                self.request_turn_end(TurnEndReason::TimedOut);
            }
            Some(TimerExpiry::Phase(phase)) => {
                warn!("{phase:?} phase timed out");
                self.events.publish(GameEvent::PhaseTimedOut { phase });
                if self.effects.is_idle()
                    && self
                        .turns
                        .advance_phase(&mut self.state.turn, &mut self.events)
                        .is_none()
                {
                    self.request_turn_end(TurnEndReason::TimedOut);
                }
            }
            None => {}
        }

        if self.config.resolution_mode == ResolutionMode::Stepped && self.state.is_running() {
            report.step = self.effects.step(&mut self.state, &mut self.events);
            if matches!(report.step, SchedulerStep::Processed { .. }) {
                let mut outcome = ActionOutcome::default();
                self.process_knockouts(&mut outcome);
            }
        }
        if self.state.is_running() && self.effects.is_idle() {
            if let Some(reason) = self.pending_turn_end.take() {
                self.end_turn(reason);
            }
        }
        self.check_victory();
        report
    }

    // ---- read model ---------------------------------------------------

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            format: self.state.ruleset.format,
            status: self.state.status,
            outcome: self.state.outcome.clone(),
            turn_number: self.state.turn.turn_number,
            turns_taken: self.state.turn.turns_taken,
            current_player: self.state.turn.current_player,
            phase: self.state.turn.phase,
            elapsed_ms: self.state.elapsed_ms,
            revision: self.state.revision,
            players: self.state.players.iter().map(PlayerView::from).collect(),
            continuous_effects: self.effects.continuous().to_vec(),
            pending_effects: self.effects.pending().len(),
        }
    }

    pub fn statistics(&self) -> SessionStatistics {
        SessionStatistics {
            players: self.state.players.iter().map(|player| player.stats.clone()).collect(),
            effects: self.effects.statistics().clone(),
            validation: self.pipeline.statistics().clone(),
        }
    }

    /// Pretty JSON of the snapshot plus internal sizes; queue and cache
    /// contents are left out.
    pub fn debug_dump(&self) -> String {
        let dump = DebugDump {
            snapshot: self.snapshot(),
            config: &self.config,
            profile: &self.pipeline.profile().name,
            resolution_mode: self.config.resolution_mode,
            queue_len: self.effects.queue_len(),
            cache_len: self.pipeline.cache_len(),
            triggers: self.effects.triggers().len(),
            replacements: self.effects.replacements().len(),
            buffered_events: self.events.len(),
            turn_elapsed_ms: self.turns.turn_elapsed_ms(),
            phase_elapsed_ms: self.turns.phase_elapsed_ms(),
            logged_actions: self.turns.current_log().len(),
            pending_turn_end: self.pending_turn_end,
            statistics: self.statistics(),
        };
        serde_json::to_string_pretty(&dump).unwrap_or_else(|err| format!("{{\"error\": \"{err}\"}}"))
    }
}

/// Shuffles the deck, deals an opening hand with at least one Basic,
/// places the active Pokemon and sets prize cards aside.
fn deal(setup: PlayerSetup, ruleset: &RuleSet, rng: &mut SmallRng) -> Player {
    let mut player = Player::new(setup.id, setup.deck);
    player.deck.shuffle(rng);

    let mut mulligans = 0u8;
    loop {
        player.draw(ruleset.hand_size);
        if player.hand.iter().any(|card| card.category == CardCategory::Basic) {
            break;
        }
        if mulligans >= ruleset.max_mulligans {
            // Out of mulligans: take the first Basic straight from the deck.
            if let Some(index) = player
                .deck
                .iter()
                .position(|card| card.category == CardCategory::Basic)
            {
                let basic = player.deck.remove(index);
                player.hand.push(basic);
            }
            break;
        }
        mulligans += 1;
        player.deck.append(&mut player.hand);
        player.deck.shuffle(rng);
    }
    if mulligans > 0 {
        debug!("player {} took {mulligans} mulligan(s)", player.id);
    }

    if let Some(index) = player
        .hand
        .iter()
        .position(|card| card.category == CardCategory::Basic)
    {
        let basic = player.hand.remove(index);
        player.active = Some(PokemonInPlay::new(basic, 0));
    }
    let prizes = usize::from(ruleset.prize_count).min(player.deck.len());
    let split = player.deck.len() - prizes;
    player.prizes = player.deck.split_off(split);
    player
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::catalog::{self, sample_deck};

    fn session(format: Format) -> GameSession {
        let config = SessionConfig::default().with_seed(7).with_first_player(0);
        let mut session = GameSession::with_config(format, config).expect("valid config");
        session
            .start_game(vec![
                PlayerSetup::new(0, sample_deck(format, 1)),
                PlayerSetup::new(1, sample_deck(format, 1_001)),
            ])
            .expect("game starts");
        session
    }

    #[test]
    fn start_game_deals_and_places_an_active_pokemon() {
        let session = session(Format::Classic);
        let state = session.state();
        assert!(state.is_running());
        assert_eq!(state.current_player(), 0);
        assert_eq!(state.turn.phase, Phase::Main);
        for player in &state.players {
            assert!(player.active.is_some());
            assert_eq!(player.prizes.len(), 6);
        }
        // Player 0 drew for the turn on top of the opening hand.
        let opening = state.players[1].hand.len();
        assert_eq!(state.players[0].hand.len(), opening + 1);
        assert_eq!(state.integrity_check(), Ok(()));
    }

    #[test]
    fn start_game_rejects_bad_setups() {
        let mut session = GameSession::new(Format::Pocket);
        assert_eq!(
            session.start_game(vec![PlayerSetup::new(0, sample_deck(Format::Pocket, 1))]),
            Err(SessionError::NotEnoughPlayers { count: 1 })
        );
        assert_eq!(
            session.start_game(vec![
                PlayerSetup::new(0, sample_deck(Format::Pocket, 1)),
                PlayerSetup::new(0, sample_deck(Format::Pocket, 100)),
            ]),
            Err(SessionError::DuplicatePlayer { player_id: 0 })
        );
        assert!(matches!(
            session.start_game(vec![
                PlayerSetup::new(0, sample_deck(Format::Pocket, 1)),
                PlayerSetup::new(1, sample_deck(Format::Classic, 100)),
            ]),
            Err(SessionError::InvalidDeck { player_id: 1, .. })
        ));
        assert!(!session.is_running());
    }

    #[test]
    fn configure_is_refused_mid_game() {
        let mut session = session(Format::Pocket);
        assert_eq!(
            session.configure(SessionConfig::default()),
            Err(SessionError::GameInProgress)
        );
        assert_eq!(
            session.set_validation_profile("nope"),
            Err(SessionError::UnknownProfile("nope".into()))
        );
        assert_eq!(session.set_validation_profile("RELAXED"), Ok(()));
        assert_eq!(session.validation().profile().name, "relaxed");
    }

    #[test]
    fn end_turn_rotates_and_draws() {
        let mut session = session(Format::Pocket);
        let hand_before = session.state().players[1].hand.len();
        let result = session.submit_action(GameAction::new(1, 0, 0, ActionPayload::EndTurn));
        assert!(result.success, "{:?}", result.error_message);
        assert_eq!(session.state().current_player(), 1);
        assert_eq!(session.state().turn.turns_taken, 1);
        assert_eq!(session.state().players[1].hand.len(), hand_before + 1);
        // Pocket fills the energy zone from the second turn on.
        assert_eq!(session.state().players[1].energy_budget, 1);
    }

    #[test]
    fn surrender_ends_the_game_once() {
        let mut session = session(Format::Classic);
        session.drain_events();
        let result = session.submit_action(GameAction::new(1, 1, 0, ActionPayload::Surrender));
        assert!(result.success);
        assert_eq!(
            session.outcome(),
            Some(&GameOutcome {
                winner: Some(0),
                reason: VictoryReason::Surrender,
            })
        );
        assert!(!session.end_game(Some(1), VictoryReason::Error));
        let ended = session
            .drain_events()
            .into_iter()
            .filter(|event| matches!(event, GameEvent::GameEnded { .. }))
            .count();
        assert_eq!(ended, 1);
    }

    #[test]
    fn debug_dump_reports_sizes() {
        let session = session(Format::Pocket);
        let dump: serde_json::Value = serde_json::from_str(&session.debug_dump()).expect("valid json");
        assert_eq!(dump["queue_len"], 0);
        assert_eq!(dump["profile"], "strict");
        assert_eq!(dump["snapshot"]["players"].as_array().map(Vec::len), Some(2));
    }

    fn end_turn(session: &mut GameSession, id: u64) {
        let player = session.state().current_player();
        let result = session.submit_action(GameAction::new(id, player, 0, ActionPayload::EndTurn));
        assert!(result.success, "{:?}", result.error_message);
    }

    #[test]
    fn knockout_takes_a_prize_and_asks_for_promotion() {
        let mut session = session(Format::Classic);
        end_turn(&mut session, 1);
        end_turn(&mut session, 2);
        assert_eq!(session.state().current_player(), 0);

        let mut attacker = PokemonInPlay::new(catalog::charmander(5_000), 0);
        attacker.attached.push(crate::game::state::AttachedEnergy {
            energy_type: EnergyType::Fire,
            card: None,
        });
        let mut defender = PokemonInPlay::new(catalog::bulbasaur(6_000), 0);
        defender.damage = 10;
        session.state.players[0].active = Some(attacker);
        session.state.players[1].active = Some(defender);
        session.state.players[1].bench = vec![PokemonInPlay::new(catalog::squirtle(6_001), 0)];
        let hand_before = session.state.players[0].hand.len();
        session.drain_events();

        let result = session.submit_action(GameAction::new(3, 0, 0, ActionPayload::UseAttack { attack_index: 0 }));
        assert!(result.success, "{:?}", result.error_message);
        // Ember 30, doubled by Bulbasaur's Fire weakness.
        assert_eq!(result.data.damage_dealt, 60);
        assert_eq!(result.data.knocked_out, vec![6_000]);
        assert_eq!(result.data.prizes_taken, 1);
        assert_eq!(session.state().players[0].prizes.len(), 5);
        assert_eq!(session.state().players[0].hand.len(), hand_before + 1);
        assert!(session.state().players[1].active.is_none());

        let events = session.drain_events();
        assert!(events
            .iter()
            .any(|event| matches!(event, GameEvent::PromotionRequired { player_id: 1 })));
        assert!(events.iter().any(|event| matches!(
            event,
            GameEvent::TurnEnded {
                reason: TurnEndReason::AttackResolved,
                ..
            }
        )));

        // Player 1 must promote before doing anything else.
        assert_eq!(session.state().current_player(), 1);
        let blocked = session.submit_action(GameAction::new(4, 1, 0, ActionPayload::EndTurn));
        assert!(!blocked.success);
        let promoted = session.submit_action(GameAction::new(5, 1, 0, ActionPayload::PromoteActive { bench_index: 0 }));
        assert!(promoted.success, "{:?}", promoted.error_message);
        assert_eq!(
            session.state().players[1].active.as_ref().map(|pokemon| pokemon.instance),
            Some(6_001)
        );
    }

    #[test]
    fn poison_deals_checkup_damage_between_turns() {
        let mut session = session(Format::Classic);
        if let Some(active) = session.state.players[1].active.as_mut() {
            active.damage = 0;
            active.apply_status(StatusCondition::Poisoned);
        }
        end_turn(&mut session, 1);
        let active = session.state().players[1].active.as_ref().expect("active pokemon");
        assert_eq!(active.damage, POISON_DAMAGE);
        assert!(active.has_status(StatusCondition::Poisoned));
    }

    #[test]
    fn turn_time_limit_ends_the_turn() {
        let config = SessionConfig {
            turn_time_limit_ms: Some(1_000),
            ..SessionConfig::default().with_seed(3).with_first_player(0)
        };
        let mut session = GameSession::with_config(Format::Pocket, config).expect("valid config");
        session
            .start_game(vec![
                PlayerSetup::new(0, sample_deck(Format::Pocket, 1)),
                PlayerSetup::new(1, sample_deck(Format::Pocket, 101)),
            ])
            .expect("game starts");

        assert_eq!(session.tick(10_000).elapsed_ms, 0);
        assert_eq!(session.tick(10_400).expired, None);
        assert_eq!(session.tick(11_100).expired, Some(TimerExpiry::Turn));
        assert_eq!(session.state().current_player(), 1);
        assert!(session.events().iter().any(|event| matches!(
            event,
            GameEvent::TurnEnded {
                player_id: 0,
                reason: TurnEndReason::TimedOut,
                ..
            }
        )));
    }

    #[test]
    fn clock_readings_behind_the_last_tick_add_no_time() {
        let config = SessionConfig {
            turn_time_limit_ms: Some(1_000),
            ..SessionConfig::default().with_seed(3).with_first_player(0)
        };
        let mut session = GameSession::with_config(Format::Pocket, config).expect("valid config");
        session
            .start_game(vec![
                PlayerSetup::new(0, sample_deck(Format::Pocket, 1)),
                PlayerSetup::new(1, sample_deck(Format::Pocket, 101)),
            ])
            .expect("game starts");

        session.tick(5_000);
        assert_eq!(session.tick(4_000).elapsed_ms, 0);
        assert_eq!(session.tick(5_600).elapsed_ms, 600);
        assert_eq!(session.state().elapsed_ms, 600);
        assert_eq!(session.state().current_player(), 0);
    }

    #[test]
    fn stepped_mode_defers_resolution_to_tick() {
        let config = SessionConfig::default()
            .with_seed(11)
            .with_first_player(0)
            .with_resolution_mode(ResolutionMode::Stepped);
        let mut session = GameSession::with_config(Format::Pocket, config).expect("valid config");
        session
            .start_game(vec![
                PlayerSetup::new(0, sample_deck(Format::Pocket, 1)),
                PlayerSetup::new(1, sample_deck(Format::Pocket, 101)),
            ])
            .expect("game starts");
        let mut attacker = PokemonInPlay::new(catalog::charmander(5_000), 0);
        attacker.attached.push(crate::game::state::AttachedEnergy {
            energy_type: EnergyType::Fire,
            card: None,
        });
        session.state.players[0].active = Some(attacker);

        let result = session.submit_action(GameAction::new(1, 0, 0, ActionPayload::UseAttack { attack_index: 0 }));
        assert!(result.success, "{:?}", result.error_message);
        assert_eq!(result.data.pending_effects, 1);
        assert_eq!(result.data.damage_dealt, 0);

        let early = session.submit_action(GameAction::new(2, 0, 0, ActionPayload::EndTurn));
        assert_eq!(early.error_message, Some(RuleError::ResolutionPending.to_string()));

        let report = session.tick(0);
        assert!(matches!(report.step, SchedulerStep::Processed { .. }));
        assert!(session.effects().is_idle());
        assert_eq!(session.state().current_player(), 1);
    }
}
