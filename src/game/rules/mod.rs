//! Format constants and the hook interface concrete rule variants implement.
//!
//! The shared session is format-agnostic: everything that differs between
//! Classic and Pocket is either a constant in [`RuleSet`] or one of the
//! [`RuleHooks`] methods.

pub mod classic;
pub mod pocket;

use rand::rngs::SmallRng;
use serde::{Deserialize, Serialize};

use super::action::{ActionOutcome, GameAction};
use super::error::RuleError;
use super::events::EventSink;
use super::state::{GameOutcome, GameState, PlayerId, VictoryReason};

pub use classic::ClassicRules;
pub use pocket::PocketRules;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Format {
    Classic,
    Pocket,
}

impl std::str::FromStr for Format {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "classic" | "standard" => Ok(Format::Classic),
            "pocket" => Ok(Format::Pocket),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum EnergyRule {
    /// Energy cards attached from the hand, `per_turn` at most.
    Attachment { per_turn: u8 },
    /// Energy generated into a zone each turn; no energy cards involved.
    Zone {
        per_turn: u8,
        skip_first_turn: bool,
        cap: u8,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "value")]
pub enum WeaknessRule {
    Multiplier(i32),
    Flat(i32),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CombatRules {
    pub weakness: WeaknessRule,
    /// Flat reduction; `None` when the format has no resistance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resistance: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuleSet {
    pub format: Format,
    pub deck_size: usize,
    pub hand_size: usize,
    pub prize_count: u8,
    pub points_to_win: u8,
    pub bench_size: usize,
    pub energy: EnergyRule,
    pub combat: CombatRules,
    /// Poison/burn/sleep/paralysis resolution between turns.
    pub status_checkup: bool,
    /// Whether the player going first may attack on the first turn.
    pub first_turn_attack: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_time_limit_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_bank_ms: Option<u64>,
    pub max_mulligans: u8,
}

impl Default for RuleSet {
    fn default() -> Self {
        RuleSet::classic()
    }
}

impl RuleSet {
    pub fn classic() -> Self {
        Self {
            format: Format::Classic,
            deck_size: 60,
            hand_size: 7,
            prize_count: 6,
            points_to_win: 0,
            bench_size: 5,
            energy: EnergyRule::Attachment { per_turn: 1 },
            combat: CombatRules {
                weakness: WeaknessRule::Multiplier(2),
                resistance: Some(30),
            },
            status_checkup: true,
            first_turn_attack: false,
            game_time_limit_ms: None,
            time_bank_ms: None,
            max_mulligans: 10,
        }
    }

    pub fn pocket() -> Self {
        Self {
            format: Format::Pocket,
            deck_size: 20,
            hand_size: 3,
            prize_count: 0,
            points_to_win: 3,
            bench_size: 3,
            energy: EnergyRule::Zone {
                per_turn: 1,
                skip_first_turn: true,
                cap: 1,
            },
            combat: CombatRules {
                weakness: WeaknessRule::Flat(20),
                resistance: None,
            },
            status_checkup: false,
            first_turn_attack: true,
            game_time_limit_ms: None,
            time_bank_ms: None,
            max_mulligans: 10,
        }
    }

    pub fn with_time_limit(mut self, game_limit_ms: u64, time_bank_ms: Option<u64>) -> Self {
        self.game_time_limit_ms = Some(game_limit_ms);
        self.time_bank_ms = time_bank_ms;
        self
    }

    pub fn without_status_checkup(mut self) -> Self {
        self.status_checkup = false;
        self
    }

    pub fn uses_prizes(&self) -> bool {
        self.prize_count > 0
    }
}

/// Capabilities a concrete format plugs into the shared session.
pub trait RuleHooks {
    fn ruleset(&self) -> &RuleSet;

    fn on_game_started(&mut self, state: &mut GameState, rng: &mut SmallRng, sink: &mut dyn EventSink);

    fn on_game_finished(&mut self, state: &GameState, outcome: &GameOutcome);

    /// Format-specific legality, consulted after the shared pipeline accepts.
    fn validate(&self, action: &GameAction, state: &GameState) -> Result<(), RuleError>;

    /// Executes actions whose effect differs per format. `None` hands the
    /// action back to the shared machine.
    fn execute(
        &mut self,
        action: &GameAction,
        state: &mut GameState,
        sink: &mut dyn EventSink,
    ) -> Option<Result<ActionOutcome, RuleError>>;

    fn check_victory(&self, state: &GameState) -> Option<GameOutcome>;

    fn on_turn_started(&mut self, _state: &mut GameState, _rng: &mut SmallRng, _sink: &mut dyn EventSink) {}
}

/// Builds the hook object for a format with its default constants.
pub fn variant_for(format: Format) -> Box<dyn RuleHooks> {
    match format {
        Format::Classic => Box::new(ClassicRules::new()),
        Format::Pocket => Box::new(PocketRules::new()),
    }
}

/// Outcome when exactly one player meets `lost`; a draw when all of them do.
fn single_loser(
    state: &GameState,
    reason: VictoryReason,
    lost: impl Fn(&super::state::Player) -> bool,
) -> Option<GameOutcome> {
    let losers: Vec<PlayerId> = state
        .players
        .iter()
        .filter(|player| lost(player))
        .map(|player| player.id)
        .collect();
    match losers.as_slice() {
        [] => None,
        [loser] => Some(GameOutcome {
            winner: state.opponent_of(*loser),
            reason,
        }),
        _ if losers.len() == state.players.len() => Some(GameOutcome {
            winner: None,
            reason,
        }),
        _ => state
            .players
            .iter()
            .find(|player| !losers.contains(&player.id))
            .map(|player| GameOutcome {
                winner: Some(player.id),
                reason,
            }),
    }
}

/// Outcome when exactly one player meets `won`; ties go to the higher score.
fn single_winner(
    state: &GameState,
    reason: VictoryReason,
    won: impl Fn(&super::state::Player) -> bool,
) -> Option<GameOutcome> {
    let winners: Vec<&super::state::Player> = state.players.iter().filter(|player| won(player)).collect();
    match winners.as_slice() {
        [] => None,
        [winner] => Some(GameOutcome {
            winner: Some(winner.id),
            reason,
        }),
        _ => Some(GameOutcome {
            winner: leader_by_points(state),
            reason,
        }),
    }
}

/// Player with strictly the most points, or `None` on a tie.
pub(crate) fn leader_by_points(state: &GameState) -> Option<PlayerId> {
    let best = state.players.iter().map(|player| player.points).max()?;
    let mut leaders = state.players.iter().filter(|player| player.points == best);
    let leader = leaders.next()?;
    if leaders.next().is_some() {
        None
    } else {
        Some(leader.id)
    }
}

/// Loss conditions shared by every format.
pub(crate) fn shared_victory(state: &GameState) -> Option<GameOutcome> {
    single_loser(state, VictoryReason::NoPokemonInPlay, |player| {
        !player.has_pokemon_in_play()
    })
    .or_else(|| single_loser(state, VictoryReason::DeckOut, |player| player.decked_out))
}
