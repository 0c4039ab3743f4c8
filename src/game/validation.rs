//! Action validation pipeline.
//!
//! A submitted action passes through these stages in order and stops at the
//! first rejection:
//!
//! 1. Basic requirements: the game is running, the player is seated and the
//!    timestamp is neither ahead of the game clock nor stale.
//! 2. Turn ownership, including a pending promotion that blocks everyone.
//! 3. Per-kind validators (all must pass).
//! 4. Phase-keyed validators.
//! 5. Dynamic validators, when the active profile enables them.
//! 6. Custom validators keyed by kind or kind + player, then free predicates.
//!
//! Accepted actions collect advisory warnings from the non-blocking checks.
//! Verdicts are memoized by a fingerprint of the action and the parts of the
//! state that decide legality; the stale check runs before the cache is
//! consulted so cached verdicts never outlive their action.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::hash::{Hash, Hasher};

use log::{debug, error};
use serde::{Deserialize, Serialize};

use super::action::{ActionKind, ActionPayload, GameAction, ValidationResult};
use super::config::ValidationProfile;
use super::error::{RuleError, ValidationError};
use super::events::{EventSink, GameEvent};
use super::rules::EnergyRule;
use super::state::{CardCategory, GameState, Player, PlayerId};
use super::turn::Phase;

pub type Validator = Box<dyn Fn(&GameAction, &GameState) -> Result<(), ValidationError>>;
/// Non-blocking check; `Some` carries the warning text.
pub type WarningCheck = Box<dyn Fn(&GameAction, &GameState) -> Option<String>>;
pub type ValidatorId = u32;

/// Key of a custom validator. `player: None` applies to every player.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CustomKey {
    pub kind: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player: Option<PlayerId>,
}

impl CustomKey {
    pub fn kind(kind: ActionKind) -> Self {
        Self { kind, player: None }
    }

    pub fn player(kind: ActionKind, player: PlayerId) -> Self {
        Self {
            kind,
            player: Some(player),
        }
    }

    fn applies_to(&self, action: &GameAction) -> bool {
        self.kind == action.kind() && self.player.map_or(true, |player| player == action.player_id)
    }
}

/// Where a caller-supplied validator is plugged into the chain.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ValidatorScope {
    Kind { kind: ActionKind },
    Phase { phase: Phase },
    Dynamic,
    Custom { key: CustomKey },
    Predicate,
}

#[derive(Debug, Clone)]
struct CachedVerdict {
    result: ValidationResult,
    stored_at_ms: u64,
}

/// Size-bounded verdict memo with TTL expiry and oldest-first eviction.
#[derive(Debug, Clone, Default)]
pub struct ValidationCache {
    entries: HashMap<u64, CachedVerdict>,
    order: VecDeque<u64>,
    ttl_ms: u64,
    capacity: usize,
}

impl ValidationCache {
    pub fn new(ttl_ms: u64, capacity: usize) -> Self {
        Self {
            ttl_ms,
            capacity,
            ..Self::default()
        }
    }

    pub fn get(&mut self, fingerprint: u64, now_ms: u64) -> Option<ValidationResult> {
        let expired = {
            let cached = self.entries.get(&fingerprint)?;
            now_ms.saturating_sub(cached.stored_at_ms) > self.ttl_ms
        };
        if expired {
            self.entries.remove(&fingerprint);
            self.order.retain(|key| *key != fingerprint);
            return None;
        }
        self.entries.get(&fingerprint).map(|cached| cached.result.clone())
    }

    pub fn insert(&mut self, fingerprint: u64, result: ValidationResult, now_ms: u64) {
        if self.capacity == 0 {
            return;
        }
        let verdict = CachedVerdict {
            result,
            stored_at_ms: now_ms,
        };
        if self.entries.insert(fingerprint, verdict).is_some() {
            return;
        }
        self.order.push_back(fingerprint);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }

    pub fn flush(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationStatistics {
    pub validated: u64,
    pub rejected: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub internal_errors: u64,
}

pub struct ValidationPipeline {
    profile: ValidationProfile,
    kind_validators: BTreeMap<ActionKind, Vec<(ValidatorId, Validator)>>,
    phase_validators: BTreeMap<Phase, Vec<(ValidatorId, Validator)>>,
    dynamic_validators: Vec<(ValidatorId, Validator)>,
    custom_validators: Vec<(ValidatorId, CustomKey, Validator)>,
    predicates: Vec<(ValidatorId, Validator)>,
    warnings: Vec<(ValidatorId, WarningCheck)>,
    cache: ValidationCache,
    next_id: ValidatorId,
    stats: ValidationStatistics,
}

impl Default for ValidationPipeline {
    fn default() -> Self {
        Self::new(ValidationProfile::default())
    }
}

impl std::fmt::Debug for ValidationPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationPipeline")
            .field("profile", &self.profile.name)
            .field("kind_validators", &self.kind_validators.values().map(Vec::len).sum::<usize>())
            .field("phase_validators", &self.phase_validators.values().map(Vec::len).sum::<usize>())
            .field("dynamic_validators", &self.dynamic_validators.len())
            .field("custom_validators", &self.custom_validators.len())
            .field("predicates", &self.predicates.len())
            .field("warnings", &self.warnings.len())
            .field("cached", &self.cache.len())
            .finish()
    }
}

impl ValidationPipeline {
    /// Pipeline with the built-in validators and warnings registered.
    pub fn new(profile: ValidationProfile) -> Self {
        let mut pipeline = Self::empty(profile);
        pipeline.register_builtins();
        pipeline
    }

    /// Pipeline with nothing registered beyond the fixed stages.
    pub fn empty(profile: ValidationProfile) -> Self {
        Self {
            cache: ValidationCache::new(profile.cache_ttl_ms, profile.cache_capacity),
            profile,
            kind_validators: BTreeMap::new(),
            phase_validators: BTreeMap::new(),
            dynamic_validators: Vec::new(),
            custom_validators: Vec::new(),
            predicates: Vec::new(),
            warnings: Vec::new(),
            next_id: 1,
            stats: ValidationStatistics::default(),
        }
    }

    fn register_builtins(&mut self) {
        self.register_kind(ActionKind::PlayCard, rule(check_play_card));
        self.register_kind(ActionKind::AttachEnergy, rule(check_attach_energy));
        self.register_kind(ActionKind::UseAttack, rule(check_attack));
        self.register_kind(ActionKind::Retreat, rule(check_retreat));
        self.register_kind(ActionKind::Evolution, rule(check_evolution));
        self.register_kind(ActionKind::UseAbility, rule(check_ability));
        self.register_kind(ActionKind::PromoteActive, rule(check_promotion));

        self.register_phase(Phase::Draw, phase_allows(&[]));
        self.register_phase(Phase::Battle, phase_allows(&[ActionKind::UseAttack, ActionKind::EndTurn]));
        self.register_phase(Phase::End, phase_allows(&[ActionKind::EndTurn]));

        self.register_dynamic(Box::new(|_: &GameAction, state: &GameState| {
            state.integrity_check().map_err(|error| {
                ValidationError::Internal(format!("{}", RuleError::IntegrityViolation { error }))
            })
        }));

        self.register_warning(Box::new(warn_unused_attack));
        self.register_warning(Box::new(warn_surplus_energy));
        self.register_warning(Box::new(warn_healthy_retreat));
    }

    fn next_id(&mut self) -> ValidatorId {
        let id = self.next_id;
        self.next_id += 1;
        // New rules can change any verdict.
        self.cache.flush();
        id
    }

    pub fn register(&mut self, scope: ValidatorScope, validator: Validator) -> ValidatorId {
        match scope {
            ValidatorScope::Kind { kind } => self.register_kind(kind, validator),
            ValidatorScope::Phase { phase } => self.register_phase(phase, validator),
            ValidatorScope::Dynamic => self.register_dynamic(validator),
            ValidatorScope::Custom { key } => self.register_custom(key, validator),
            ValidatorScope::Predicate => self.register_predicate(validator),
        }
    }

    pub fn register_kind(&mut self, kind: ActionKind, validator: Validator) -> ValidatorId {
        let id = self.next_id();
        self.kind_validators.entry(kind).or_default().push((id, validator));
        id
    }

    pub fn register_phase(&mut self, phase: Phase, validator: Validator) -> ValidatorId {
        let id = self.next_id();
        self.phase_validators.entry(phase).or_default().push((id, validator));
        id
    }

    pub fn register_dynamic(&mut self, validator: Validator) -> ValidatorId {
        let id = self.next_id();
        self.dynamic_validators.push((id, validator));
        id
    }

    pub fn register_custom(&mut self, key: CustomKey, validator: Validator) -> ValidatorId {
        let id = self.next_id();
        self.custom_validators.push((id, key, validator));
        id
    }

    pub fn register_predicate(&mut self, validator: Validator) -> ValidatorId {
        let id = self.next_id();
        self.predicates.push((id, validator));
        id
    }

    pub fn register_warning(&mut self, check: WarningCheck) -> ValidatorId {
        let id = self.next_id();
        self.warnings.push((id, check));
        id
    }

    pub fn unregister(&mut self, id: ValidatorId) -> bool {
        let mut removed = false;
        for validators in self
            .kind_validators
            .values_mut()
            .chain(self.phase_validators.values_mut())
        {
            let before = validators.len();
            validators.retain(|(existing, _)| *existing != id);
            removed |= validators.len() != before;
        }
        for validators in [&mut self.dynamic_validators, &mut self.predicates] {
            let before = validators.len();
            validators.retain(|(existing, _)| *existing != id);
            removed |= validators.len() != before;
        }
        let before = self.custom_validators.len();
        self.custom_validators.retain(|(existing, _, _)| *existing != id);
        removed |= self.custom_validators.len() != before;
        let before = self.warnings.len();
        self.warnings.retain(|(existing, _)| *existing != id);
        removed |= self.warnings.len() != before;

        if removed {
            self.cache.flush();
        }
        removed
    }

    pub fn profile(&self) -> &ValidationProfile {
        &self.profile
    }

    pub fn set_profile(&mut self, profile: ValidationProfile) {
        self.cache = ValidationCache::new(profile.cache_ttl_ms, profile.cache_capacity);
        self.profile = profile;
    }

    pub fn flush(&mut self) {
        self.cache.flush();
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub fn statistics(&self) -> &ValidationStatistics {
        &self.stats
    }

    pub fn reset_statistics(&mut self) {
        self.stats = ValidationStatistics::default();
    }

    /// Decides whether `action` is legal in `state`. Never panics on bad
    /// input; internal failures become a rejected verdict plus an
    /// `ErrorReported` event.
    pub fn validate(&mut self, action: &GameAction, state: &GameState, sink: &mut dyn EventSink) -> ValidationResult {
        self.stats.validated += 1;
        if let Err(violation) = self.check_basic(action, state) {
            self.stats.rejected += 1;
            return ValidationResult::rejected(violation);
        }

        let now = state.elapsed_ms;
        let fingerprint = fingerprint(action, state);
        if self.profile.enable_caching {
            if let Some(cached) = self.cache.get(fingerprint, now) {
                self.stats.cache_hits += 1;
                if !cached.is_valid {
                    self.stats.rejected += 1;
                }
                return cached;
            }
            self.stats.cache_misses += 1;
        }

        let result = match self.run_chain(action, state) {
            Ok(()) => {
                let warnings = if self.profile.emit_warnings {
                    self.warnings
                        .iter()
                        .filter_map(|(_, check)| check(action, state))
                        .collect()
                } else {
                    Vec::new()
                };
                ValidationResult::valid().with_warnings(warnings)
            }
            Err(ValidationError::Violation(violation)) => {
                if self.profile.verbose {
                    debug!("action {} rejected: {violation}", action.id);
                }
                ValidationResult::rejected(violation)
            }
            Err(ValidationError::Internal(detail)) => {
                self.stats.rejected += 1;
                self.stats.internal_errors += 1;
                error!("validation of action {} failed internally: {detail}", action.id);
                sink.publish(GameEvent::ErrorReported {
                    source: format!("validation:{:?}", action.kind()),
                    detail: detail.clone(),
                });
                // Internal failures are not memoized.
                return ValidationResult::internal(detail);
            }
        };

        if !result.is_valid {
            self.stats.rejected += 1;
        }
        if self.profile.enable_caching {
            self.cache.insert(fingerprint, result.clone(), now);
        }
        result
    }

    fn check_basic(&self, action: &GameAction, state: &GameState) -> Result<(), RuleError> {
        if state.is_finished() {
            return Err(RuleError::GameFinished);
        }
        if !state.is_running() {
            return Err(RuleError::GameNotStarted);
        }
        if state.player(action.player_id).is_none() {
            return Err(RuleError::UnknownPlayer {
                player_id: action.player_id,
            });
        }
        // A zero timestamp means the host does not track submission time.
        if action.timestamp_ms == 0 {
            return Ok(());
        }
        let clock_ms = state.elapsed_ms;
        if action.timestamp_ms > clock_ms {
            return Err(RuleError::MalformedTimestamp {
                timestamp_ms: action.timestamp_ms,
                clock_ms,
            });
        }
        let age_ms = clock_ms - action.timestamp_ms;
        let limit_ms = self.profile.max_action_age_ms;
        if limit_ms > 0 && age_ms > limit_ms {
            return Err(RuleError::StaleAction { age_ms, limit_ms });
        }
        Ok(())
    }

    /// Turn ownership and pending promotion are checked before the per-kind
    /// and phase validators, so an out-of-turn action always reports whose
    /// turn it is rather than a rule it would also break.
    fn run_chain(&self, action: &GameAction, state: &GameState) -> Result<(), ValidationError> {
        check_turn_ownership(action, state)?;

        let kind = action.kind();
        for (_, validator) in self.kind_validators.get(&kind).into_iter().flatten() {
            validator(action, state)?;
        }
        for (_, validator) in self.phase_validators.get(&state.turn.phase).into_iter().flatten() {
            validator(action, state)?;
        }
        if self.profile.enable_dynamic {
            for (_, validator) in &self.dynamic_validators {
                validator(action, state)?;
            }
        }
        for (_, key, validator) in &self.custom_validators {
            if key.applies_to(action) {
                validator(action, state)?;
            }
        }
        for (_, validator) in &self.predicates {
            validator(action, state)?;
        }
        Ok(())
    }
}

/// Fingerprint of everything a verdict depends on. The action id and the
/// submission time are left out so identical requests share a verdict.
fn fingerprint(action: &GameAction, state: &GameState) -> u64 {
    let mut hasher = DefaultHasher::new();
    action.player_id.hash(&mut hasher);
    action.payload.hash(&mut hasher);
    state.revision.hash(&mut hasher);
    state.turn.phase.hash(&mut hasher);
    state.turn.current_player.hash(&mut hasher);
    state.turn.turns_taken.hash(&mut hasher);
    hasher.finish()
}

fn rule(check: fn(&GameAction, &GameState) -> Result<(), RuleError>) -> Validator {
    Box::new(move |action: &GameAction, state: &GameState| check(action, state).map_err(ValidationError::from))
}

/// Phase validator admitting `allowed` plus the kinds that are legal at any
/// time.
fn phase_allows(allowed: &'static [ActionKind]) -> Validator {
    Box::new(move |action: &GameAction, state: &GameState| {
        let kind = action.kind();
        if kind.bypasses_turn_order() || allowed.contains(&kind) {
            Ok(())
        } else {
            Err(RuleError::InvalidPhase {
                kind,
                phase: state.turn.phase,
            }
            .into())
        }
    })
}

fn acting_player<'a>(action: &GameAction, state: &'a GameState) -> Result<&'a Player, RuleError> {
    state.player(action.player_id).ok_or(RuleError::UnknownPlayer {
        player_id: action.player_id,
    })
}

fn check_turn_ownership(action: &GameAction, state: &GameState) -> Result<(), RuleError> {
    let kind = action.kind();
    if kind == ActionKind::Surrender {
        return Ok(());
    }
    if let Some(pending) = state.pending_promotion() {
        if kind != ActionKind::PromoteActive {
            return Err(RuleError::PromotionPending { player_id: pending });
        }
    }
    if !kind.bypasses_turn_order() && action.player_id != state.current_player() {
        return Err(RuleError::NotPlayerTurn {
            player_id: action.player_id,
            current: state.current_player(),
        });
    }
    Ok(())
}

fn check_play_card(action: &GameAction, state: &GameState) -> Result<(), RuleError> {
    let ActionPayload::PlayCard { card_id, target } = &action.payload else {
        return Ok(());
    };
    let player = acting_player(action, state)?;
    let card = player
        .hand_card(*card_id)
        .ok_or(RuleError::CardNotInHand { card_id: *card_id })?;
    match card.category {
        CardCategory::Basic => {
            if player.bench.len() >= state.ruleset.bench_size {
                return Err(RuleError::BenchFull {
                    limit: state.ruleset.bench_size,
                });
            }
        }
        CardCategory::Stage1 | CardCategory::Stage2 | CardCategory::Energy => {
            return Err(RuleError::WrongCardCategory { card_id: *card_id });
        }
        CardCategory::Supporter => {
            if player.flags.supporter_played {
                return Err(RuleError::SupporterAlreadyPlayed);
            }
        }
        CardCategory::Item => {}
    }
    if let Some(target) = target {
        if state.pokemon(*target).is_none() {
            return Err(RuleError::InvalidTarget);
        }
    }
    Ok(())
}

fn check_attach_energy(action: &GameAction, state: &GameState) -> Result<(), RuleError> {
    let ActionPayload::AttachEnergy { card_id, target } = &action.payload else {
        return Ok(());
    };
    let player = acting_player(action, state)?;
    if player.pokemon(*target).is_none() {
        return Err(RuleError::InvalidSlot);
    }
    if let Some(card_id) = card_id {
        let card = player
            .hand_card(*card_id)
            .ok_or(RuleError::CardNotInHand { card_id: *card_id })?;
        if card.category != CardCategory::Energy {
            return Err(RuleError::WrongCardCategory { card_id: *card_id });
        }
    }
    if matches!(state.ruleset.energy, EnergyRule::Attachment { .. }) && player.flags.energy_attached {
        return Err(RuleError::EnergyAlreadyAttached);
    }
    Ok(())
}

fn check_attack(action: &GameAction, state: &GameState) -> Result<(), RuleError> {
    let ActionPayload::UseAttack { attack_index } = &action.payload else {
        return Ok(());
    };
    let player = acting_player(action, state)?;
    let attacker = player.active.as_ref().ok_or(RuleError::NoActivePokemon)?;
    let defender = state
        .opponent_of(player.id)
        .and_then(|opponent| state.player(opponent))
        .and_then(|opponent| opponent.active.as_ref());
    if defender.is_none() {
        return Err(RuleError::NoDefender);
    }
    let attack = attacker
        .card
        .attacks
        .get(*attack_index)
        .ok_or(RuleError::InvalidAttackIndex { index: *attack_index })?;
    if let Some(status) = attacker.disabling_status() {
        return Err(RuleError::StatusPrevents { status });
    }
    if !attacker.can_pay(&attack.cost) {
        return Err(RuleError::InsufficientEnergy {
            required: attack.cost.clone(),
            attached: attacker.energy_types(),
        });
    }
    Ok(())
}

fn check_retreat(action: &GameAction, state: &GameState) -> Result<(), RuleError> {
    let ActionPayload::Retreat { bench_index } = &action.payload else {
        return Ok(());
    };
    let player = acting_player(action, state)?;
    let active = player.active.as_ref().ok_or(RuleError::NoActivePokemon)?;
    if player.flags.retreated {
        return Err(RuleError::AlreadyRetreated);
    }
    if player.bench.get(*bench_index).is_none() {
        return Err(RuleError::EmptyBenchSlot { index: *bench_index });
    }
    if let Some(status) = active.disabling_status() {
        return Err(RuleError::StatusPrevents { status });
    }
    let required = active.card.retreat_cost;
    if active.attached.len() < usize::from(required) {
        return Err(RuleError::RetreatCostUnpaid {
            required,
            attached: active.attached.len(),
        });
    }
    Ok(())
}

fn check_evolution(action: &GameAction, state: &GameState) -> Result<(), RuleError> {
    let ActionPayload::Evolution { card_id, target } = &action.payload else {
        return Ok(());
    };
    let player = acting_player(action, state)?;
    let card = player
        .hand_card(*card_id)
        .ok_or(RuleError::CardNotInHand { card_id: *card_id })?;
    if !card.category.is_evolution() {
        return Err(RuleError::WrongCardCategory { card_id: *card_id });
    }
    let pokemon = player.pokemon(*target).ok_or(RuleError::InvalidSlot)?;
    if card.evolves_from.as_deref() != Some(pokemon.card.name.as_str()) {
        return Err(RuleError::EvolutionMismatch {
            card_name: card.name.clone(),
            target_name: pokemon.card.name.clone(),
        });
    }
    if state.turn.is_first_turn_of(player.id) {
        return Err(RuleError::FirstTurnRestriction);
    }
    if pokemon.turn_placed == state.turn.turns_taken {
        return Err(RuleError::EvolvedThisTurn);
    }
    Ok(())
}

fn check_ability(action: &GameAction, state: &GameState) -> Result<(), RuleError> {
    let ActionPayload::UseAbility { slot, target } = &action.payload else {
        return Ok(());
    };
    let player = acting_player(action, state)?;
    let pokemon = player.pokemon(*slot).ok_or(RuleError::InvalidSlot)?;
    if pokemon.card.ability.is_none() {
        return Err(RuleError::NoAbility);
    }
    if pokemon.ability_used_turn == Some(state.turn.turns_taken) {
        return Err(RuleError::AbilityAlreadyUsed);
    }
    if let Some(target) = target {
        if state.pokemon(*target).is_none() {
            return Err(RuleError::InvalidTarget);
        }
    }
    Ok(())
}

fn check_promotion(action: &GameAction, state: &GameState) -> Result<(), RuleError> {
    let ActionPayload::PromoteActive { bench_index } = &action.payload else {
        return Ok(());
    };
    let player = acting_player(action, state)?;
    if player.active.is_some() {
        return Err(RuleError::NothingToPromote);
    }
    if player.bench.get(*bench_index).is_none() {
        return Err(RuleError::EmptyBenchSlot { index: *bench_index });
    }
    Ok(())
}

fn warn_unused_attack(action: &GameAction, state: &GameState) -> Option<String> {
    if action.kind() != ActionKind::EndTurn {
        return None;
    }
    if !state.ruleset.first_turn_attack && state.turn.is_first_turn() {
        return None;
    }
    let player = state.player(action.player_id)?;
    let active = player.active.as_ref()?;
    if player.flags.attacked || active.disabling_status().is_some() {
        return None;
    }
    active
        .card
        .attacks
        .iter()
        .find(|attack| active.can_pay(&attack.cost))
        .map(|attack| format!("ending the turn without using {}", attack.name))
}

fn warn_surplus_energy(action: &GameAction, state: &GameState) -> Option<String> {
    let ActionPayload::AttachEnergy { target, .. } = &action.payload else {
        return None;
    };
    let pokemon = state.player(action.player_id)?.pokemon(*target)?;
    let needed = pokemon.card.max_attack_cost();
    (pokemon.attached.len() >= needed).then(|| {
        format!(
            "{} already has enough energy for every attack ({needed})",
            pokemon.card.name
        )
    })
}

fn warn_healthy_retreat(action: &GameAction, state: &GameState) -> Option<String> {
    if action.kind() != ActionKind::Retreat {
        return None;
    }
    let player = state.player(action.player_id)?;
    let active = player.active.as_ref()?;
    let bench_damaged = player.bench.iter().any(|pokemon| pokemon.damage > 0);
    (active.damage == 0 && bench_damaged).then(|| {
        format!(
            "retreating an undamaged {} while benched Pokemon are damaged",
            active.card.name
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::config::ValidationProfile;
    use crate::game::events::EventBuffer;
    use crate::game::rules::RuleSet;
    use crate::game::state::{Attack, Card, EnergyType, GameStatus, PokemonInPlay, Slot};

    fn running_state() -> GameState {
        let players = (0..2u8)
            .map(|id| {
                let base = u32::from(id) * 100;
                let mut player = Player::new(id, Vec::new());
                let mut active = PokemonInPlay::new(
                    Card::pokemon(base + 1, "Charmander", EnergyType::Fire, 60)
                        .with_attack(Attack::new("Ember", vec![EnergyType::Fire], 30)),
                    0,
                );
                active.attached.push(crate::game::state::AttachedEnergy {
                    energy_type: EnergyType::Fire,
                    card: None,
                });
                player.active = Some(active);
                player.bench.push(PokemonInPlay::new(
                    Card::pokemon(base + 2, "Vulpix", EnergyType::Fire, 50),
                    0,
                ));
                player.hand.push(Card::energy(base + 3, EnergyType::Fire));
                player
            })
            .collect();
        let mut state = GameState::new(players, RuleSet::classic());
        state.status = GameStatus::Running;
        state.turn.order = vec![0, 1];
        state.turn.current_player = 0;
        state.turn.turns_taken = 2;
        state.turn.phase = Phase::Main;
        state
    }

    fn action(player_id: PlayerId, payload: ActionPayload) -> GameAction {
        GameAction::new(1, player_id, 0, payload)
    }

    #[test]
    fn attack_out_of_turn_reports_turn_ownership() {
        let mut pipeline = ValidationPipeline::default();
        let state = running_state();
        let mut sink = EventBuffer::default();
        let result = pipeline.validate(&action(1, ActionPayload::UseAttack { attack_index: 0 }), &state, &mut sink);
        assert!(!result.is_valid);
        assert!(matches!(result.violation, Some(RuleError::NotPlayerTurn { player_id: 1, current: 0 })));
        assert!(result
            .error_message
            .as_deref()
            .is_some_and(|message| message.contains("not player 1's turn")));
    }

    #[test]
    fn cached_and_uncached_verdicts_agree() {
        let state = running_state();
        let mut sink = EventBuffer::default();
        let mut cached = ValidationPipeline::new(ValidationProfile::strict());
        let mut uncached = ValidationPipeline::new(ValidationProfile::debug());
        let actions = [
            action(0, ActionPayload::UseAttack { attack_index: 0 }),
            action(0, ActionPayload::UseAttack { attack_index: 3 }),
            action(0, ActionPayload::Retreat { bench_index: 0 }),
            action(1, ActionPayload::EndTurn),
        ];
        for action in &actions {
            let first = cached.validate(action, &state, &mut sink);
            let second = cached.validate(action, &state, &mut sink);
            let fresh = uncached.validate(action, &state, &mut sink);
            assert_eq!(first, second);
            assert_eq!(first.is_valid, fresh.is_valid);
            assert_eq!(first.violation, fresh.violation);
        }
        assert_eq!(cached.statistics().cache_hits, actions.len() as u64);
    }

    #[test]
    fn registering_a_validator_flushes_cached_verdicts() {
        let state = running_state();
        let mut sink = EventBuffer::default();
        let mut pipeline = ValidationPipeline::new(ValidationProfile::strict());
        let end = action(0, ActionPayload::EndTurn);

        assert!(pipeline.validate(&end, &state, &mut sink).is_valid);
        assert!(pipeline.validate(&end, &state, &mut sink).is_valid);
        assert_eq!(pipeline.statistics().cache_hits, 1);
        assert_eq!(pipeline.cache_len(), 1);

        let house_rule = pipeline.register_custom(
            CustomKey::kind(ActionKind::EndTurn),
            Box::new(|_: &GameAction, _: &GameState| {
                Err(ValidationError::Violation(RuleError::Custom {
                    message: "end turn is disabled".into(),
                }))
            }),
        );
        assert_eq!(pipeline.cache_len(), 0);
        let misses = pipeline.statistics().cache_misses;
        let rejected = pipeline.validate(&end, &state, &mut sink);
        assert_eq!(pipeline.statistics().cache_misses, misses + 1);
        assert_eq!(pipeline.statistics().cache_hits, 1);
        assert!(!rejected.is_valid);
        assert_eq!(rejected.error_message.as_deref(), Some("end turn is disabled"));

        assert!(pipeline.unregister(house_rule));
        assert!(pipeline.validate(&end, &state, &mut sink).is_valid);
    }

    #[test]
    fn switching_profile_drops_the_cache() {
        let state = running_state();
        let mut sink = EventBuffer::default();
        let mut pipeline = ValidationPipeline::new(ValidationProfile::strict());
        pipeline.validate(&action(0, ActionPayload::EndTurn), &state, &mut sink);
        assert_eq!(pipeline.cache_len(), 1);
        pipeline.set_profile(ValidationProfile::relaxed());
        assert_eq!(pipeline.cache_len(), 0);
    }

    #[test]
    fn state_change_invalidates_cached_verdict() {
        let mut state = running_state();
        let mut sink = EventBuffer::default();
        let mut pipeline = ValidationPipeline::default();
        let attach = action(
            0,
            ActionPayload::AttachEnergy {
                card_id: Some(3),
                target: Slot::Active,
            },
        );
        assert!(pipeline.validate(&attach, &state, &mut sink).is_valid);
        state.players[0].flags.energy_attached = true;
        state.touch();
        let again = pipeline.validate(&attach, &state, &mut sink);
        assert_eq!(again.violation, Some(RuleError::EnergyAlreadyAttached));
    }

    #[test]
    fn stale_actions_are_rejected_before_the_cache() {
        let mut state = running_state();
        let mut sink = EventBuffer::default();
        let mut pipeline = ValidationPipeline::default();
        let mut end = action(0, ActionPayload::EndTurn);
        end.timestamp_ms = 1;
        state.elapsed_ms = 10;
        assert!(pipeline.validate(&end, &state, &mut sink).is_valid);
        state.elapsed_ms = 10_000;
        let stale = pipeline.validate(&end, &state, &mut sink);
        assert!(matches!(stale.violation, Some(RuleError::StaleAction { .. })));
        end.timestamp_ms = 20_000;
        let ahead = pipeline.validate(&end, &state, &mut sink);
        assert!(matches!(ahead.violation, Some(RuleError::MalformedTimestamp { .. })));
    }

    #[test]
    fn battle_phase_only_allows_attacks_and_ending() {
        let mut state = running_state();
        state.turn.phase = Phase::Battle;
        let mut sink = EventBuffer::default();
        let mut pipeline = ValidationPipeline::default();
        let retreat = pipeline.validate(&action(0, ActionPayload::Retreat { bench_index: 0 }), &state, &mut sink);
        assert!(matches!(retreat.violation, Some(RuleError::InvalidPhase { .. })));
        assert!(pipeline
            .validate(&action(0, ActionPayload::UseAttack { attack_index: 0 }), &state, &mut sink)
            .is_valid);
    }

    #[test]
    fn internal_errors_are_reported_and_not_cached() {
        let state = running_state();
        let mut sink = EventBuffer::default();
        let mut pipeline = ValidationPipeline::default();
        pipeline.register_predicate(Box::new(|_, _| Err(ValidationError::Internal("lookup table missing".into()))));
        let end = action(0, ActionPayload::EndTurn);
        let result = pipeline.validate(&end, &state, &mut sink);
        assert!(!result.is_valid);
        assert!(result.violation.is_none());
        assert_eq!(pipeline.cache_len(), 0);
        assert!(sink
            .events()
            .iter()
            .any(|event| matches!(event, GameEvent::ErrorReported { .. })));
        assert_eq!(pipeline.statistics().internal_errors, 1);
    }

    #[test]
    fn custom_validators_match_kind_and_player() {
        let state = running_state();
        let mut sink = EventBuffer::default();
        let mut pipeline = ValidationPipeline::default();
        let id = pipeline.register_custom(
            CustomKey::player(ActionKind::EndTurn, 0),
            Box::new(|_, _| {
                Err(RuleError::Custom {
                    message: "tournament rule: no passing".into(),
                }
                .into())
            }),
        );
        let end = action(0, ActionPayload::EndTurn);
        assert_eq!(
            pipeline.validate(&end, &state, &mut sink).error_message.as_deref(),
            Some("tournament rule: no passing")
        );
        assert!(pipeline.unregister(id));
        assert!(pipeline.validate(&end, &state, &mut sink).is_valid);
    }

    #[test]
    fn warnings_flag_unused_attacks_and_surplus_energy() {
        let state = running_state();
        let mut sink = EventBuffer::default();
        let mut pipeline = ValidationPipeline::default();
        let end = pipeline.validate(&action(0, ActionPayload::EndTurn), &state, &mut sink);
        assert!(end.is_valid);
        assert_eq!(end.warnings.len(), 1);
        let attach = pipeline.validate(
            &action(
                0,
                ActionPayload::AttachEnergy {
                    card_id: Some(3),
                    target: Slot::Active,
                },
            ),
            &state,
            &mut sink,
        );
        assert!(attach.is_valid);
        assert!(attach.warnings[0].contains("enough energy"));

        let mut quiet = ValidationPipeline::new(ValidationProfile::relaxed());
        assert!(quiet
            .validate(&action(0, ActionPayload::EndTurn), &state, &mut sink)
            .warnings
            .is_empty());
    }

    #[test]
    fn cache_evicts_oldest_first() {
        let mut cache = ValidationCache::new(1_000, 2);
        cache.insert(1, ValidationResult::valid(), 0);
        cache.insert(2, ValidationResult::valid(), 0);
        cache.insert(3, ValidationResult::valid(), 0);
        assert!(cache.get(1, 0).is_none());
        assert!(cache.get(3, 0).is_some());
        assert!(cache.get(2, 1_001).is_none());
        assert_eq!(cache.len(), 1);
    }
}
