use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::state::{CardId, EnergyType, IntegrityError, PlayerId, StatusCondition};
use super::turn::Phase;
use super::action::ActionKind;

/// Expected, data-driven rule violations. Never raised as panics; surfaced
/// through `ValidationResult` with the `Display` text as the message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[serde(tag = "type")]
pub enum RuleError {
    #[error("the game has not started")]
    GameNotStarted,
    #[error("the game is already finished")]
    GameFinished,
    #[error("player {player_id} is not part of this game")]
    UnknownPlayer { player_id: PlayerId },
    #[error("it is not player {player_id}'s turn (current player is {current})")]
    NotPlayerTurn { player_id: PlayerId, current: PlayerId },
    #[error("{kind:?} is not allowed during the {phase:?} phase")]
    InvalidPhase { kind: ActionKind, phase: Phase },
    #[error("action timestamp {timestamp_ms} is ahead of the game clock ({clock_ms})")]
    MalformedTimestamp { timestamp_ms: u64, clock_ms: u64 },
    #[error("action is stale: {age_ms}ms old, limit is {limit_ms}ms")]
    StaleAction { age_ms: u64, limit_ms: u64 },
    #[error("effects from an earlier action are still resolving")]
    ResolutionPending,
    #[error("player {player_id} must promote a benched Pokemon first")]
    PromotionPending { player_id: PlayerId },
    #[error("card {card_id} is not in hand")]
    CardNotInHand { card_id: CardId },
    #[error("card {card_id} cannot be used with this action")]
    WrongCardCategory { card_id: CardId },
    #[error("the bench is full ({limit} Pokemon)")]
    BenchFull { limit: usize },
    #[error("no Pokemon in that slot")]
    InvalidSlot,
    #[error("invalid target")]
    InvalidTarget,
    #[error("a Supporter was already played this turn")]
    SupporterAlreadyPlayed,
    #[error("energy was already attached this turn")]
    EnergyAlreadyAttached,
    #[error("no energy is available in the energy zone")]
    NoEnergyAvailable,
    #[error("energy must come from {expected}")]
    WrongEnergySource { expected: String },
    #[error("that is not allowed on the first turn of the game")]
    FirstTurnRestriction,
    #[error("no active Pokemon")]
    NoActivePokemon,
    #[error("the opponent has no active Pokemon to attack")]
    NoDefender,
    #[error("attack index {index} does not exist")]
    InvalidAttackIndex { index: usize },
    #[error("not enough energy: attack needs {required:?}, attached {attached:?}")]
    InsufficientEnergy {
        required: Vec<EnergyType>,
        attached: Vec<EnergyType>,
    },
    #[error("the active Pokemon is {status:?}")]
    StatusPrevents { status: StatusCondition },
    #[error("already retreated this turn")]
    AlreadyRetreated,
    #[error("retreat costs {required} energy, {attached} attached")]
    RetreatCostUnpaid { required: u8, attached: usize },
    #[error("bench slot {index} is empty")]
    EmptyBenchSlot { index: usize },
    #[error("{card_name} does not evolve from {target_name}")]
    EvolutionMismatch {
        card_name: String,
        target_name: String,
    },
    #[error("that Pokemon was played or evolved this turn")]
    EvolvedThisTurn,
    #[error("that Pokemon has no ability")]
    NoAbility,
    #[error("that ability was already used this turn")]
    AbilityAlreadyUsed,
    #[error("an active Pokemon is already in play")]
    NothingToPromote,
    #[error("{message}")]
    Custom { message: String },
    #[error("game state integrity violated: {error:?}")]
    IntegrityViolation { error: IntegrityError },
}

/// Outcome of a single validator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error(transparent)]
    Violation(#[from] RuleError),
    #[error("internal validation error: {0}")]
    Internal(String),
}

/// Failures while resolving a single effect. Converted to a failed
/// `EffectResult` at the engine boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EffectError {
    #[error("effect needs {required} target(s) but {found} were supplied")]
    TargetCount { required: usize, found: usize },
    #[error("target is not legal for this effect")]
    InvalidTarget,
    #[error("player {player_id} has no cards left in the deck")]
    EmptyDeck { player_id: PlayerId },
    #[error("nothing to discard")]
    NothingToDiscard,
    #[error("player {player_id} is not part of this game")]
    UnknownPlayer { player_id: PlayerId },
    #[error("internal effect error: {0}")]
    Internal(String),
}

impl EffectError {
    pub fn is_internal(&self) -> bool {
        matches!(self, EffectError::Internal(_))
    }
}

/// Misuse of the session lifecycle or configuration surface.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("a game is already in progress")]
    GameInProgress,
    #[error("effects are still resolving")]
    ResolutionInProgress,
    #[error("a game needs at least two players, got {count}")]
    NotEnoughPlayers { count: usize },
    #[error("player id {player_id} appears more than once")]
    DuplicatePlayer { player_id: PlayerId },
    #[error("deck of player {player_id} is invalid: {reason}")]
    InvalidDeck { player_id: PlayerId, reason: String },
    #[error("deck of player {player_id} contains no Basic Pokemon")]
    NoBasicPokemon { player_id: PlayerId },
    #[error("unknown validation profile `{0}`")]
    UnknownProfile(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("no game is running")]
    NotRunning,
}
