use serde::{Deserialize, Serialize};

use super::context::EffectContext;
use crate::game::state::{Card, CardCategory, EnergyType, GameState, PlayerId, Slot, StatusCondition, TargetRef};

/// Identifier of a registered effect or hook.
pub type EffectId = u32;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DamageSource {
    Attack,
    /// Between-turn damage from Poisoned or Burned; ignores weakness and resistance.
    Status,
}

impl Default for DamageSource {
    fn default() -> Self {
        DamageSource::Attack
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DiscardSource {
    Hand,
    AttachedEnergy,
}

impl Default for DiscardSource {
    fn default() -> Self {
        DiscardSource::Hand
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct CardFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<CardCategory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub energy_type: Option<EnergyType>,
}

impl CardFilter {
    pub fn matches(&self, card: &Card) -> bool {
        self.category.map_or(true, |category| card.category == category)
            && self.energy_type.map_or(true, |energy| card.energy_type == energy)
    }
}

/// What an effect does, with exactly the fields that kind needs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "type")]
pub enum EffectSpec {
    Damage {
        amount: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        energy_type: Option<EnergyType>,
        #[serde(default)]
        source: DamageSource,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        inflicts: Option<StatusCondition>,
    },
    Heal {
        amount: i32,
    },
    Draw {
        count: usize,
    },
    Search {
        #[serde(default)]
        filter: CardFilter,
        count: usize,
    },
    Discard {
        count: usize,
        #[serde(default)]
        from: DiscardSource,
    },
    ApplyStatus {
        status: StatusCondition,
    },
    CureStatus,
    Protect {
        turns: u32,
    },
    DamageBonus {
        amount: i32,
        turns: u32,
    },
    DamageReduction {
        amount: i32,
        turns: u32,
    },
    Composite {
        effects: Vec<EffectSpec>,
    },
}

/// Coarse grouping replacement effects register against.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EffectCategory {
    Damage,
    Heal,
    Draw,
    Search,
    Discard,
    Status,
    Continuous,
    Composite,
}

impl EffectSpec {
    pub fn damage(amount: i32) -> Self {
        EffectSpec::Damage {
            amount,
            energy_type: None,
            source: DamageSource::Attack,
            inflicts: None,
        }
    }

    pub fn category(&self) -> EffectCategory {
        match self {
            EffectSpec::Damage { .. } => EffectCategory::Damage,
            EffectSpec::Heal { .. } => EffectCategory::Heal,
            EffectSpec::Draw { .. } => EffectCategory::Draw,
            EffectSpec::Search { .. } => EffectCategory::Search,
            EffectSpec::Discard { .. } => EffectCategory::Discard,
            EffectSpec::ApplyStatus { .. } | EffectSpec::CureStatus => EffectCategory::Status,
            EffectSpec::Protect { .. }
            | EffectSpec::DamageBonus { .. }
            | EffectSpec::DamageReduction { .. } => EffectCategory::Continuous,
            EffectSpec::Composite { .. } => EffectCategory::Composite,
        }
    }

    /// Target contract an effect built from this spec gets unless told otherwise.
    pub fn default_target(&self) -> TargetContract {
        match self {
            EffectSpec::Damage { .. } | EffectSpec::ApplyStatus { .. } => {
                TargetContract::single(TargetCategory::OpponentActive)
            }
            EffectSpec::Heal { .. } | EffectSpec::CureStatus | EffectSpec::Protect { .. } => {
                TargetContract::single(TargetCategory::SelfActive)
            }
            EffectSpec::DamageReduction { .. } => TargetContract::single(TargetCategory::SelfActive),
            EffectSpec::Draw { .. }
            | EffectSpec::Search { .. }
            | EffectSpec::Discard { .. }
            | EffectSpec::DamageBonus { .. } => TargetContract::player(TargetCategory::SourcePlayer),
            EffectSpec::Composite { .. } => TargetContract::none(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TargetCategory {
    None,
    SelfActive,
    OpponentActive,
    OwnPokemon,
    OpponentPokemon,
    AnyPokemon,
    SourcePlayer,
    OpponentPlayer,
}

impl TargetCategory {
    pub fn targets_pokemon(self) -> bool {
        !matches!(
            self,
            TargetCategory::None | TargetCategory::SourcePlayer | TargetCategory::OpponentPlayer
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TargetContract {
    pub category: TargetCategory,
    pub required: usize,
    pub max: usize,
}

impl TargetContract {
    pub fn none() -> Self {
        Self {
            category: TargetCategory::None,
            required: 0,
            max: 0,
        }
    }

    pub fn single(category: TargetCategory) -> Self {
        Self {
            category,
            required: 1,
            max: 1,
        }
    }

    pub fn player(category: TargetCategory) -> Self {
        Self {
            category,
            required: 0,
            max: 0,
        }
    }

    pub fn up_to(category: TargetCategory, max: usize) -> Self {
        Self {
            category,
            required: 1,
            max,
        }
    }

    /// Whether `target` belongs to this contract's category and can still be
    /// affected. Knocked-out Pokemon are never valid targets.
    pub fn is_valid_target(&self, target: TargetRef, ctx: &EffectContext, state: &GameState) -> bool {
        let owner_ok = match self.category {
            TargetCategory::None | TargetCategory::SourcePlayer | TargetCategory::OpponentPlayer => false,
            TargetCategory::SelfActive => {
                target.player == ctx.source_player && target.slot == Slot::Active
            }
            TargetCategory::OpponentActive => {
                Some(target.player) == ctx.opponent && target.slot == Slot::Active
            }
            TargetCategory::OwnPokemon => target.player == ctx.source_player,
            TargetCategory::OpponentPokemon => Some(target.player) == ctx.opponent,
            TargetCategory::AnyPokemon => true,
        };
        owner_ok
            && state
                .pokemon(target)
                .is_some_and(|pokemon| !pokemon.is_knocked_out())
    }

    /// Candidates on the board this contract accepts.
    pub fn candidates(&self, ctx: &EffectContext, state: &GameState) -> Vec<TargetRef> {
        state
            .players
            .iter()
            .flat_map(|player| {
                player.in_play().map(move |(slot, _)| TargetRef {
                    player: player.id,
                    slot,
                })
            })
            .filter(|target| self.is_valid_target(*target, ctx, state))
            .collect()
    }

    /// Player an effect with a player-level contract applies to.
    pub fn player_target(&self, ctx: &EffectContext) -> Option<PlayerId> {
        match self.category {
            TargetCategory::SourcePlayer => Some(ctx.source_player),
            TargetCategory::OpponentPlayer => ctx.opponent,
            _ => ctx.target.map(|target| target.player),
        }
    }
}

/// A registered unit of card logic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Effect {
    pub id: EffectId,
    /// Cooldown key; effects sharing a key share a cooldown.
    pub key: String,
    pub name: String,
    pub spec: EffectSpec,
    /// Ranks this effect when it competes with other replacements. The
    /// queue itself ignores it.
    #[serde(default)]
    pub priority: i8,
    /// Presentation duration in abstract units; scales the pacing delay.
    #[serde(default)]
    pub duration_ms: u64,
    pub target: TargetContract,
}

impl Effect {
    pub fn new(id: EffectId, name: impl Into<String>, spec: EffectSpec) -> Self {
        let name = name.into();
        Self {
            id,
            key: name.clone(),
            target: spec.default_target(),
            name,
            spec,
            priority: 0,
            duration_ms: 0,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn with_priority(mut self, priority: i8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn with_target(mut self, target: TargetContract) -> Self {
        self.target = target;
        self
    }

    pub fn category(&self) -> EffectCategory {
        self.spec.category()
    }
}
