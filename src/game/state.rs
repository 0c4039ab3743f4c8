use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::effects::EffectSpec;
use super::rules::RuleSet;
use super::turn::TurnState;

/// Globally unique card identifier.
pub type CardId = u32;
/// Player identifier.
pub type PlayerId = u8;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EnergyType {
    Grass,
    Fire,
    Water,
    Lightning,
    Psychic,
    Fighting,
    Darkness,
    Metal,
    Dragon,
    Colorless,
}

impl Default for EnergyType {
    fn default() -> Self {
        EnergyType::Colorless
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CardCategory {
    Basic,
    Stage1,
    Stage2,
    Item,
    Supporter,
    Energy,
}

impl CardCategory {
    pub fn is_pokemon(self) -> bool {
        matches!(self, CardCategory::Basic | CardCategory::Stage1 | CardCategory::Stage2)
    }

    pub fn is_evolution(self) -> bool {
        matches!(self, CardCategory::Stage1 | CardCategory::Stage2)
    }

    pub fn is_trainer(self) -> bool {
        matches!(self, CardCategory::Item | CardCategory::Supporter)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StatusCondition {
    Poisoned,
    Burned,
    Asleep,
    Paralyzed,
    Confused,
}

impl StatusCondition {
    /// Asleep, Paralyzed and Confused replace each other; Poisoned and Burned stack.
    pub fn is_exclusive(self) -> bool {
        matches!(
            self,
            StatusCondition::Asleep | StatusCondition::Paralyzed | StatusCondition::Confused
        )
    }

    /// Conditions that stop a Pokemon from attacking or retreating.
    pub fn is_disabling(self) -> bool {
        matches!(self, StatusCondition::Asleep | StatusCondition::Paralyzed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attack {
    pub name: String,
    #[serde(default)]
    pub cost: Vec<EnergyType>,
    #[serde(default)]
    pub damage: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inflicts: Option<StatusCondition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub effects: Vec<EffectSpec>,
}

impl Attack {
    pub fn new(name: impl Into<String>, cost: Vec<EnergyType>, damage: i32) -> Self {
        Self {
            name: name.into(),
            cost,
            damage,
            inflicts: None,
            effects: Vec::new(),
        }
    }

    pub fn inflicting(mut self, status: StatusCondition) -> Self {
        self.inflicts = Some(status);
        self
    }

    pub fn with_effect(mut self, effect: EffectSpec) -> Self {
        self.effects.push(effect);
        self
    }
}

/// Activated ability, usable once per turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ability {
    pub name: String,
    pub effects: Vec<EffectSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Card {
    pub id: CardId,
    pub name: String,
    pub category: CardCategory,
    #[serde(default)]
    pub hp: i32,
    #[serde(default)]
    pub energy_type: EnergyType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weakness: Option<EnergyType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resistance: Option<EnergyType>,
    #[serde(default)]
    pub retreat_cost: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evolves_from: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attacks: Vec<Attack>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ability: Option<Ability>,
    /// Effects of Item and Supporter cards.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub effects: Vec<EffectSpec>,
    #[serde(default)]
    pub ex: bool,
}

impl Card {
    fn blank(id: CardId, name: impl Into<String>, category: CardCategory) -> Self {
        Self {
            id,
            name: name.into(),
            category,
            hp: 0,
            energy_type: EnergyType::Colorless,
            weakness: None,
            resistance: None,
            retreat_cost: 0,
            evolves_from: None,
            attacks: Vec::new(),
            ability: None,
            effects: Vec::new(),
            ex: false,
        }
    }

    pub fn pokemon(
        id: CardId,
        name: impl Into<String>,
        energy_type: EnergyType,
        hp: i32,
    ) -> Self {
        Self {
            hp,
            energy_type,
            retreat_cost: 1,
            ..Self::blank(id, name, CardCategory::Basic)
        }
    }

    pub fn evolution(
        id: CardId,
        name: impl Into<String>,
        category: CardCategory,
        evolves_from: impl Into<String>,
        energy_type: EnergyType,
        hp: i32,
    ) -> Self {
        Self {
            hp,
            energy_type,
            retreat_cost: 1,
            evolves_from: Some(evolves_from.into()),
            ..Self::blank(id, name, category)
        }
    }

    pub fn energy(id: CardId, energy_type: EnergyType) -> Self {
        Self {
            energy_type,
            ..Self::blank(id, format!("{energy_type:?} Energy"), CardCategory::Energy)
        }
    }

    pub fn trainer(
        id: CardId,
        name: impl Into<String>,
        category: CardCategory,
        effects: Vec<EffectSpec>,
    ) -> Self {
        Self {
            effects,
            ..Self::blank(id, name, category)
        }
    }

    pub fn with_weakness(mut self, weakness: EnergyType) -> Self {
        self.weakness = Some(weakness);
        self
    }

    pub fn with_resistance(mut self, resistance: EnergyType) -> Self {
        self.resistance = Some(resistance);
        self
    }

    pub fn with_retreat_cost(mut self, cost: u8) -> Self {
        self.retreat_cost = cost;
        self
    }

    pub fn with_attack(mut self, attack: Attack) -> Self {
        self.attacks.push(attack);
        self
    }

    pub fn with_ability(mut self, ability: Ability) -> Self {
        self.ability = Some(ability);
        self
    }

    pub fn as_ex(mut self) -> Self {
        self.ex = true;
        self
    }

    /// Prize cards or points the opponent receives for knocking this card out.
    pub fn knockout_value(&self) -> u8 {
        if self.ex {
            2
        } else {
            1
        }
    }

    /// Energy needed to pay for the most expensive attack.
    pub fn max_attack_cost(&self) -> usize {
        self.attacks
            .iter()
            .map(|attack| attack.cost.len())
            .max()
            .unwrap_or(0)
    }
}

/// Checks whether `attached` pays for `cost`; Colorless is paid by any type.
pub fn energy_satisfies(cost: &[EnergyType], attached: &[EnergyType]) -> bool {
    let mut pool = attached.to_vec();
    let mut colorless = 0usize;
    for needed in cost {
        if *needed == EnergyType::Colorless {
            colorless += 1;
            continue;
        }
        match pool.iter().position(|energy| energy == needed) {
            Some(index) => {
                pool.swap_remove(index);
            }
            None => return false,
        }
    }
    pool.len() >= colorless
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttachedEnergy {
    pub energy_type: EnergyType,
    /// The energy card, when the energy came from the hand.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card: Option<Card>,
}

/// A Pokemon on the active spot or the bench.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PokemonInPlay {
    /// Id of the Basic card this Pokemon started as; stable across evolution.
    pub instance: CardId,
    pub card: Card,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evolution_stack: Vec<Card>,
    #[serde(default)]
    pub damage: i32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attached: Vec<AttachedEnergy>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub statuses: Vec<StatusCondition>,
    /// Value of `TurnState::turns_taken` when placed or last evolved.
    #[serde(default)]
    pub turn_placed: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ability_used_turn: Option<u32>,
}

impl PokemonInPlay {
    pub fn new(card: Card, turn_placed: u32) -> Self {
        Self {
            instance: card.id,
            card,
            evolution_stack: Vec::new(),
            damage: 0,
            attached: Vec::new(),
            statuses: Vec::new(),
            turn_placed,
            ability_used_turn: None,
        }
    }

    pub fn remaining_hp(&self) -> i32 {
        (self.card.hp - self.damage).max(0)
    }

    pub fn is_knocked_out(&self) -> bool {
        self.damage >= self.card.hp
    }

    pub fn energy_types(&self) -> Vec<EnergyType> {
        self.attached.iter().map(|energy| energy.energy_type).collect()
    }

    pub fn can_pay(&self, cost: &[EnergyType]) -> bool {
        energy_satisfies(cost, &self.energy_types())
    }

    pub fn has_status(&self, status: StatusCondition) -> bool {
        self.statuses.contains(&status)
    }

    pub fn disabling_status(&self) -> Option<StatusCondition> {
        self.statuses.iter().copied().find(|status| status.is_disabling())
    }

    pub fn apply_status(&mut self, status: StatusCondition) {
        if status.is_exclusive() {
            self.statuses.retain(|existing| !existing.is_exclusive());
        }
        if !self.statuses.contains(&status) {
            self.statuses.push(status);
        }
    }

    pub fn cure(&mut self, status: StatusCondition) {
        self.statuses.retain(|existing| *existing != status);
    }

    pub fn cure_all(&mut self) {
        self.statuses.clear();
    }

    pub fn evolve(&mut self, card: Card, turn: u32) {
        let previous = std::mem::replace(&mut self.card, card);
        self.evolution_stack.push(previous);
        self.turn_placed = turn;
        self.cure_all();
    }

    /// Removes up to `count` energy, newest first.
    pub fn detach_energy(&mut self, count: usize) -> Vec<AttachedEnergy> {
        let keep = self.attached.len().saturating_sub(count);
        self.attached.split_off(keep)
    }

    /// Every card that goes to the discard pile when this Pokemon leaves play.
    pub fn into_cards(self) -> Vec<Card> {
        let mut cards = self.evolution_stack;
        cards.push(self.card);
        cards.extend(self.attached.into_iter().filter_map(|energy| energy.card));
        cards
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Slot {
    Active,
    Bench(usize),
}

/// A Pokemon position on the board.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TargetRef {
    pub player: PlayerId,
    pub slot: Slot,
}

impl TargetRef {
    pub fn active(player: PlayerId) -> Self {
        Self {
            player,
            slot: Slot::Active,
        }
    }

    pub fn bench(player: PlayerId, index: usize) -> Self {
        Self {
            player,
            slot: Slot::Bench(index),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TurnFlags {
    pub energy_attached: bool,
    pub supporter_played: bool,
    pub retreated: bool,
    pub attacked: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerStatistics {
    pub player_id: PlayerId,
    pub actions: u32,
    pub cards_played: u32,
    pub energy_attached: u32,
    pub attacks_used: u32,
    pub damage_dealt: i64,
    pub knockouts: u32,
    pub prizes_taken: u32,
    pub points_scored: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Player {
    pub id: PlayerId,
    #[serde(default)]
    pub deck: Vec<Card>,
    #[serde(default)]
    pub hand: Vec<Card>,
    #[serde(default)]
    pub discard: Vec<Card>,
    #[serde(default)]
    pub prizes: Vec<Card>,
    #[serde(default)]
    pub active: Option<PokemonInPlay>,
    #[serde(default)]
    pub bench: Vec<PokemonInPlay>,
    #[serde(default)]
    pub points: u8,
    /// Pocket energy zone: energy available to attach this game.
    #[serde(default)]
    pub energy_budget: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_energy: Option<EnergyType>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub energy_types: Vec<EnergyType>,
    #[serde(default)]
    pub flags: TurnFlags,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_bank_ms: Option<u64>,
    #[serde(default)]
    pub decked_out: bool,
    #[serde(default)]
    pub stats: PlayerStatistics,
}

impl Player {
    pub fn new(id: PlayerId, deck: Vec<Card>) -> Self {
        Self {
            id,
            deck,
            hand: Vec::new(),
            discard: Vec::new(),
            prizes: Vec::new(),
            active: None,
            bench: Vec::new(),
            points: 0,
            energy_budget: 0,
            next_energy: None,
            energy_types: Vec::new(),
            flags: TurnFlags::default(),
            time_bank_ms: None,
            decked_out: false,
            stats: PlayerStatistics {
                player_id: id,
                ..PlayerStatistics::default()
            },
        }
    }

    pub fn hand_index(&self, card_id: CardId) -> Option<usize> {
        self.hand.iter().position(|card| card.id == card_id)
    }

    pub fn hand_card(&self, card_id: CardId) -> Option<&Card> {
        self.hand.iter().find(|card| card.id == card_id)
    }

    pub fn take_from_hand(&mut self, card_id: CardId) -> Option<Card> {
        let index = self.hand_index(card_id)?;
        Some(self.hand.remove(index))
    }

    /// Draws up to `count` cards from the top of the deck. Asking for more
    /// cards than the deck holds marks the player as decked out.
    pub fn draw(&mut self, count: usize) -> Vec<CardId> {
        let mut drawn = Vec::with_capacity(count);
        for _ in 0..count {
            match self.deck.pop() {
                Some(card) => {
                    drawn.push(card.id);
                    self.hand.push(card);
                }
                None => {
                    self.decked_out = true;
                    break;
                }
            }
        }
        drawn
    }

    pub fn pokemon(&self, slot: Slot) -> Option<&PokemonInPlay> {
        match slot {
            Slot::Active => self.active.as_ref(),
            Slot::Bench(index) => self.bench.get(index),
        }
    }

    pub fn pokemon_mut(&mut self, slot: Slot) -> Option<&mut PokemonInPlay> {
        match slot {
            Slot::Active => self.active.as_mut(),
            Slot::Bench(index) => self.bench.get_mut(index),
        }
    }

    pub fn slot_of(&self, instance: CardId) -> Option<Slot> {
        if self
            .active
            .as_ref()
            .is_some_and(|pokemon| pokemon.instance == instance)
        {
            return Some(Slot::Active);
        }
        self.bench
            .iter()
            .position(|pokemon| pokemon.instance == instance)
            .map(Slot::Bench)
    }

    pub fn in_play(&self) -> impl Iterator<Item = (Slot, &PokemonInPlay)> {
        self.active
            .iter()
            .map(|pokemon| (Slot::Active, pokemon))
            .chain(
                self.bench
                    .iter()
                    .enumerate()
                    .map(|(index, pokemon)| (Slot::Bench(index), pokemon)),
            )
    }

    pub fn has_pokemon_in_play(&self) -> bool {
        self.active.is_some() || !self.bench.is_empty()
    }

    pub fn needs_promotion(&self) -> bool {
        self.active.is_none() && !self.bench.is_empty()
    }

    pub fn reset_turn_flags(&mut self) {
        self.flags = TurnFlags::default();
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum GameStatus {
    NotStarted,
    Running,
    Finished,
}

impl Default for GameStatus {
    fn default() -> Self {
        GameStatus::NotStarted
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum VictoryReason {
    PrizesExhausted,
    DeckOut,
    PointTarget,
    NoPokemonInPlay,
    TimeLimit,
    Surrender,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GameOutcome {
    /// `None` for a draw.
    pub winner: Option<PlayerId>,
    pub reason: VictoryReason,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum IntegrityError {
    UnknownCurrentPlayer { player_id: PlayerId },
    DuplicateCardId { card_id: CardId },
    NegativeDamage { card_id: CardId, damage: i32 },
    BenchOverflow { player_id: PlayerId, size: usize },
}

/// Board state of one game.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GameState {
    #[serde(default)]
    pub players: Vec<Player>,
    #[serde(default)]
    pub turn: TurnState,
    #[serde(default)]
    pub ruleset: RuleSet,
    #[serde(default)]
    pub status: GameStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<GameOutcome>,
    /// Wall-clock time the game has been running, driven by the host tick.
    #[serde(default)]
    pub elapsed_ms: u64,
    /// Bumped on every mutation that can change an action's legality.
    #[serde(default)]
    pub revision: u64,
}

impl GameState {
    pub fn new(players: Vec<Player>, ruleset: RuleSet) -> Self {
        Self {
            players,
            ruleset,
            ..Self::default()
        }
    }

    pub fn touch(&mut self) {
        self.revision = self.revision.wrapping_add(1);
    }

    pub fn is_running(&self) -> bool {
        self.status == GameStatus::Running
    }

    pub fn is_finished(&self) -> bool {
        self.status == GameStatus::Finished
    }

    pub fn current_player(&self) -> PlayerId {
        self.turn.current_player
    }

    pub fn player(&self, id: PlayerId) -> Option<&Player> {
        self.players.iter().find(|player| player.id == id)
    }

    pub fn player_mut(&mut self, id: PlayerId) -> Option<&mut Player> {
        self.players.iter_mut().find(|player| player.id == id)
    }

    pub fn opponent_of(&self, player_id: PlayerId) -> Option<PlayerId> {
        self.players
            .iter()
            .find(|player| player.id != player_id)
            .map(|player| player.id)
    }

    pub fn pokemon(&self, target: TargetRef) -> Option<&PokemonInPlay> {
        self.player(target.player)?.pokemon(target.slot)
    }

    pub fn pokemon_mut(&mut self, target: TargetRef) -> Option<&mut PokemonInPlay> {
        self.player_mut(target.player)?.pokemon_mut(target.slot)
    }

    pub fn locate(&self, instance: CardId) -> Option<TargetRef> {
        self.players.iter().find_map(|player| {
            player
                .slot_of(instance)
                .map(|slot| TargetRef { player: player.id, slot })
        })
    }

    /// First player who must promote before anything else can happen.
    pub fn pending_promotion(&self) -> Option<PlayerId> {
        self.players
            .iter()
            .find(|player| player.needs_promotion())
            .map(|player| player.id)
    }

    pub fn integrity_check(&self) -> Result<(), IntegrityError> {
        if self.is_running() && self.player(self.turn.current_player).is_none() {
            return Err(IntegrityError::UnknownCurrentPlayer {
                player_id: self.turn.current_player,
            });
        }

        let mut seen = HashSet::new();
        for player in &self.players {
            if player.bench.len() > self.ruleset.bench_size {
                return Err(IntegrityError::BenchOverflow {
                    player_id: player.id,
                    size: player.bench.len(),
                });
            }
            for (_, pokemon) in player.in_play() {
                if pokemon.damage < 0 {
                    return Err(IntegrityError::NegativeDamage {
                        card_id: pokemon.instance,
                        damage: pokemon.damage,
                    });
                }
            }
            let in_play_cards = player
                .in_play()
                .flat_map(|(_, pokemon)| {
                    pokemon
                        .evolution_stack
                        .iter()
                        .chain(std::iter::once(&pokemon.card))
                        .chain(pokemon.attached.iter().filter_map(|energy| energy.card.as_ref()))
                })
                .collect::<Vec<_>>();
            for card in player
                .hand
                .iter()
                .chain(player.deck.iter())
                .chain(player.discard.iter())
                .chain(player.prizes.iter())
                .chain(in_play_cards)
            {
                if !seen.insert(card.id) {
                    return Err(IntegrityError::DuplicateCardId { card_id: card.id });
                }
            }
        }

        Ok(())
    }
}
