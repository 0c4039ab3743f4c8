//! Turn and phase bookkeeping: whose turn it is, which phase is running,
//! the turn/phase timers and the per-turn action log.

use std::collections::{BTreeMap, VecDeque};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::action::ActionKind;
use super::error::RuleError;
use super::events::{EventSink, GameEvent};
use super::state::PlayerId;

const DEFAULT_MAX_LOGGED_ACTIONS: usize = 64;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
    Draw,
    Main,
    Battle,
    End,
}

impl Default for Phase {
    fn default() -> Self {
        Phase::Draw
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PhaseConfig {
    pub phase: Phase,
    #[serde(default = "default_mandatory")]
    pub mandatory: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_limit_ms: Option<u64>,
}

fn default_mandatory() -> bool {
    true
}

impl PhaseConfig {
    pub fn mandatory(phase: Phase) -> Self {
        Self {
            phase,
            mandatory: true,
            time_limit_ms: None,
        }
    }

    pub fn skippable(phase: Phase) -> Self {
        Self {
            phase,
            mandatory: false,
            time_limit_ms: None,
        }
    }

    pub fn with_time_limit(mut self, limit_ms: u64) -> Self {
        self.time_limit_ms = Some(limit_ms);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TurnConfig {
    pub phases: Vec<PhaseConfig>,
    pub turn_time_limit_ms: Option<u64>,
    pub max_logged_actions: usize,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            phases: vec![
                PhaseConfig::mandatory(Phase::Draw),
                PhaseConfig::mandatory(Phase::Main),
                PhaseConfig::skippable(Phase::Battle),
                PhaseConfig::mandatory(Phase::End),
            ],
            turn_time_limit_ms: None,
            max_logged_actions: DEFAULT_MAX_LOGGED_ACTIONS,
        }
    }
}

impl TurnConfig {
    /// A phase list must be non-empty and must not repeat a phase.
    pub fn is_well_formed(&self) -> bool {
        let mut phases: Vec<Phase> = self.phases.iter().map(|config| config.phase).collect();
        let len = phases.len();
        phases.sort();
        phases.dedup();
        len > 0 && phases.len() == len
    }

    pub fn contains(&self, phase: Phase) -> bool {
        self.phases.iter().any(|config| config.phase == phase)
    }
}

/// Serializable turn position, embedded in `GameState`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TurnState {
    #[serde(default)]
    pub order: Vec<PlayerId>,
    #[serde(default)]
    pub current_index: usize,
    pub current_player: PlayerId,
    /// Full rotations completed plus one.
    pub turn_number: u32,
    /// Individual turns finished so far this game.
    #[serde(default)]
    pub turns_taken: u32,
    #[serde(default)]
    pub phase: Phase,
    #[serde(default)]
    pub phase_index: usize,
}

impl TurnState {
    /// True during the very first turn of the game.
    pub fn is_first_turn(&self) -> bool {
        self.turns_taken == 0
    }

    /// True until `player` has finished a turn of their own.
    pub fn is_first_turn_of(&self, player: PlayerId) -> bool {
        let seat = self
            .order
            .iter()
            .position(|id| *id == player)
            .unwrap_or_default() as u32;
        self.turns_taken <= seat
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TurnEndReason {
    Voluntary,
    AttackResolved,
    TimedOut,
    GameOver,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerExpiry {
    Turn,
    Phase(Phase),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionRecord {
    pub action_id: u64,
    pub player_id: PlayerId,
    pub kind: ActionKind,
    pub timestamp_ms: u64,
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TurnLog {
    pub player_id: PlayerId,
    pub turn_index: u32,
    pub actions: Vec<ActionRecord>,
    /// Records evicted because the log was full.
    pub dropped: usize,
    pub end_reason: TurnEndReason,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Timers {
    turn_elapsed_ms: u64,
    phase_elapsed_ms: u64,
}

#[derive(Debug, Clone, Default)]
pub struct TurnManager {
    config: TurnConfig,
    timers: Timers,
    log: VecDeque<ActionRecord>,
    dropped: usize,
    history: BTreeMap<u32, Vec<TurnLog>>,
}

impl TurnManager {
    pub fn new(config: TurnConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &TurnConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: TurnConfig) {
        self.config = config;
    }

    pub fn reset(&mut self) {
        self.timers = Timers::default();
        self.log.clear();
        self.dropped = 0;
        self.history.clear();
    }

    /// Fixes the seating order with `first` in seat zero.
    pub fn begin(&mut self, turn: &mut TurnState, mut order: Vec<PlayerId>, first: PlayerId) {
        if let Some(seat) = order.iter().position(|id| *id == first) {
            order.rotate_left(seat);
        }
        turn.current_player = order.first().copied().unwrap_or(first);
        turn.order = order;
        turn.current_index = 0;
        turn.turn_number = 1;
        turn.turns_taken = 0;
        turn.phase_index = 0;
        turn.phase = self.phase_at(0);
    }

    fn phase_at(&self, index: usize) -> Phase {
        self.config
            .phases
            .get(index)
            .map(|config| config.phase)
            .unwrap_or_default()
    }

    fn phase_config(&self, index: usize) -> Option<&PhaseConfig> {
        self.config.phases.get(index)
    }

    pub fn start_turn(&mut self, turn: &mut TurnState, sink: &mut dyn EventSink) {
        self.timers = Timers::default();
        self.log.clear();
        self.dropped = 0;
        turn.phase_index = 0;
        turn.phase = self.phase_at(0);
        info!(
            "turn {} started for player {}",
            turn.turn_number, turn.current_player
        );
        sink.publish(GameEvent::TurnStarted {
            player_id: turn.current_player,
            turn_number: turn.turn_number,
        });
        sink.publish(GameEvent::PhaseStarted { phase: turn.phase });
    }

    /// Moves to the next configured phase. Returns `None` when the terminal
    /// phase has completed and the turn must end.
    pub fn advance_phase(&mut self, turn: &mut TurnState, sink: &mut dyn EventSink) -> Option<Phase> {
        let next = turn.phase_index + 1;
        if next >= self.config.phases.len() {
            return None;
        }
        sink.publish(GameEvent::PhaseEnded { phase: turn.phase });
        turn.phase_index = next;
        turn.phase = self.phase_at(next);
        self.timers.phase_elapsed_ms = 0;
        debug!("phase advanced to {:?}", turn.phase);
        sink.publish(GameEvent::PhaseStarted { phase: turn.phase });
        Some(turn.phase)
    }

    /// Skips the current phase if it is not mandatory.
    pub fn skip_phase(
        &mut self,
        turn: &mut TurnState,
        sink: &mut dyn EventSink,
    ) -> Result<Option<Phase>, RuleError> {
        let mandatory = self
            .phase_config(turn.phase_index)
            .map(|config| config.mandatory)
            .unwrap_or(true);
        if mandatory {
            return Err(RuleError::Custom {
                message: format!("the {:?} phase cannot be skipped", turn.phase),
            });
        }
        let next = turn.phase_index + 1;
        if next >= self.config.phases.len() {
            return Ok(None);
        }
        sink.publish(GameEvent::PhaseSkipped { phase: turn.phase });
        turn.phase_index = next;
        turn.phase = self.phase_at(next);
        self.timers.phase_elapsed_ms = 0;
        sink.publish(GameEvent::PhaseStarted { phase: turn.phase });
        Ok(Some(turn.phase))
    }

    /// Advances until `target` is the current phase. Skippable phases in
    /// between are reported as skipped, mandatory ones as ended. Returns false
    /// when `target` is not ahead of the current phase.
    pub fn advance_to(
        &mut self,
        turn: &mut TurnState,
        target: Phase,
        sink: &mut dyn EventSink,
    ) -> bool {
        let Some(target_index) = self
            .config
            .phases
            .iter()
            .position(|config| config.phase == target)
        else {
            return false;
        };
        if target_index < turn.phase_index {
            return false;
        }
        while turn.phase_index < target_index {
            let skippable = self
                .phase_config(turn.phase_index)
                .is_some_and(|config| !config.mandatory);
            let advanced = if skippable {
                self.skip_phase(turn, sink).ok().flatten()
            } else {
                self.advance_phase(turn, sink)
            };
            if advanced.is_none() {
                return false;
            }
        }
        true
    }

    /// Closes the current turn: archives its log under the turn number and
    /// rotates to the next player. `turn_number` grows only when the seat
    /// index wraps back to zero.
    pub fn end_turn(
        &mut self,
        turn: &mut TurnState,
        reason: TurnEndReason,
        sink: &mut dyn EventSink,
    ) -> TurnLog {
        sink.publish(GameEvent::PhaseEnded { phase: turn.phase });
        sink.publish(GameEvent::TurnEnded {
            player_id: turn.current_player,
            turn_number: turn.turn_number,
            reason,
        });
        info!(
            "turn {} of player {} ended ({:?})",
            turn.turn_number, turn.current_player, reason
        );

        let record = TurnLog {
            player_id: turn.current_player,
            turn_index: turn.turns_taken,
            actions: Vec::from(std::mem::take(&mut self.log)),
            dropped: std::mem::take(&mut self.dropped),
            end_reason: reason,
        };
        self.history
            .entry(turn.turn_number)
            .or_default()
            .push(record.clone());

        let seats = turn.order.len().max(1);
        turn.current_index = (turn.current_index + 1) % seats;
        if turn.current_index == 0 {
            turn.turn_number += 1;
        }
        turn.turns_taken += 1;
        if let Some(next) = turn.order.get(turn.current_index) {
            turn.current_player = *next;
        }
        turn.phase_index = 0;
        turn.phase = self.phase_at(0);
        self.timers = Timers::default();
        record
    }

    /// Accumulates wall-clock time. A turn expiry wins over a phase expiry.
    pub fn tick(&mut self, elapsed_ms: u64, turn: &TurnState) -> Option<TimerExpiry> {
        self.timers.turn_elapsed_ms = self.timers.turn_elapsed_ms.saturating_add(elapsed_ms);
        self.timers.phase_elapsed_ms = self.timers.phase_elapsed_ms.saturating_add(elapsed_ms);

        if let Some(limit) = self.config.turn_time_limit_ms {
            if self.timers.turn_elapsed_ms >= limit {
                return Some(TimerExpiry::Turn);
            }
        }
        let phase_limit = self
            .phase_config(turn.phase_index)
            .and_then(|config| config.time_limit_ms);
        if let Some(limit) = phase_limit {
            if self.timers.phase_elapsed_ms >= limit {
                self.timers.phase_elapsed_ms = 0;
                return Some(TimerExpiry::Phase(turn.phase));
            }
        }
        None
    }

    pub fn record_action(&mut self, record: ActionRecord) {
        if self.config.max_logged_actions == 0 {
            self.dropped += 1;
            return;
        }
        if self.log.len() >= self.config.max_logged_actions {
            self.log.pop_front();
            self.dropped += 1;
        }
        self.log.push_back(record);
    }

    /// Actions recorded so far this turn, oldest first.
    pub fn current_log(&self) -> &VecDeque<ActionRecord> {
        &self.log
    }

    pub fn history(&self) -> &BTreeMap<u32, Vec<TurnLog>> {
        &self.history
    }

    pub fn turn_elapsed_ms(&self) -> u64 {
        self.timers.turn_elapsed_ms
    }

    pub fn phase_elapsed_ms(&self) -> u64 {
        self.timers.phase_elapsed_ms
    }
}
