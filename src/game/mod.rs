//! Game core: board state, action validation, effect resolution, turn flow
//! and the per-format rule variants, tied together by `GameSession`.

pub mod action;
pub mod catalog;
pub mod config;
pub mod effects;
pub mod error;
pub mod events;
pub mod rules;
pub mod session;
pub mod state;
pub mod turn;
pub mod validation;

pub use action::{
    ActionKind,
    ActionOutcome,
    ActionPayload,
    ActionResult,
    GameAction,
    ValidationResult,
};
pub use config::{ResolutionMode, SessionConfig, ValidationProfile};
pub use effects::{
    ContinuousEffect,
    Effect,
    EffectCategory,
    EffectContext,
    EffectEngine,
    EffectId,
    EffectResult,
    EffectResultKind,
    EffectSpec,
    EngineConfig,
    ReplacementEffect,
    SchedulerStep,
    TargetCategory,
    TargetContract,
    TriggerCondition,
    TriggerEvent,
};
pub use error::{EffectError, RuleError, SessionError, ValidationError};
pub use events::{EventBuffer, EventSink, GameEvent};
pub use rules::{ClassicRules, Format, PocketRules, RuleHooks, RuleSet};
pub use session::{GameSession, PlayerSetup, SessionSnapshot, SessionStatistics, TickReport};
pub use state::{
    Ability,
    Attack,
    Card,
    CardCategory,
    CardId,
    EnergyType,
    GameOutcome,
    GameState,
    GameStatus,
    IntegrityError,
    Player,
    PlayerId,
    PokemonInPlay,
    Slot,
    StatusCondition,
    TargetRef,
    VictoryReason,
};
pub use turn::{Phase, PhaseConfig, TurnConfig, TurnEndReason, TurnManager};
pub use validation::{CustomKey, ValidationPipeline, Validator, ValidatorId, ValidatorScope};
