use serde::{Deserialize, Serialize};

use super::action::ActionKind;
use super::effects::{EffectId, EffectResultKind, TriggerCondition};
use super::rules::Format;
use super::state::{CardId, PlayerId, PlayerStatistics, StatusCondition, TargetRef, VictoryReason};
use super::turn::{Phase, TurnEndReason};

/// Outbound notifications. Fire-and-forget: nothing is acknowledged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum GameEvent {
    GameStarted {
        format: Format,
        players: Vec<PlayerId>,
        first_player: PlayerId,
    },
    TurnStarted {
        player_id: PlayerId,
        turn_number: u32,
    },
    TurnEnded {
        player_id: PlayerId,
        turn_number: u32,
        reason: TurnEndReason,
    },
    PhaseStarted {
        phase: Phase,
    },
    PhaseEnded {
        phase: Phase,
    },
    PhaseSkipped {
        phase: Phase,
    },
    PhaseTimedOut {
        phase: Phase,
    },
    ActionValidated {
        action_id: u64,
        kind: ActionKind,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        warnings: Vec<String>,
    },
    ActionExecuted {
        action_id: u64,
        player_id: PlayerId,
        kind: ActionKind,
    },
    ActionBlocked {
        action_id: u64,
        player_id: PlayerId,
        kind: ActionKind,
        reason: String,
    },
    ActionCancelled {
        action_id: u64,
        player_id: PlayerId,
        reason: String,
    },
    CardsDrawn {
        player_id: PlayerId,
        count: usize,
    },
    EffectQueued {
        entry: u64,
        effect_id: EffectId,
        name: String,
    },
    EffectReplaced {
        effect_id: EffectId,
        replacement_id: EffectId,
    },
    EffectExecuted {
        entry: u64,
        effect_id: EffectId,
        result: EffectResultKind,
        value: i32,
    },
    EffectCompleted {
        entry: u64,
        effect_id: EffectId,
        pacing_ms: u64,
    },
    EffectCancelled {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        entry: Option<u64>,
        effect_id: EffectId,
        reason: String,
    },
    EffectExpired {
        effect_id: EffectId,
    },
    TriggerFired {
        condition: TriggerCondition,
        effect_id: EffectId,
    },
    ChainCompleted {
        effects: usize,
    },
    DamageDealt {
        target: TargetRef,
        amount: i32,
        knocked_out: bool,
    },
    StatusApplied {
        target: TargetRef,
        status: StatusCondition,
    },
    KnockedOut {
        player_id: PlayerId,
        card_id: CardId,
    },
    PrizesTaken {
        player_id: PlayerId,
        count: usize,
    },
    PointsScored {
        player_id: PlayerId,
        points: u8,
        total: u8,
    },
    PromotionRequired {
        player_id: PlayerId,
    },
    /// Internal errors caught at a validation or effect boundary. Kept apart
    /// from ordinary rule violations.
    ErrorReported {
        source: String,
        detail: String,
    },
    GameEnded {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        winner: Option<PlayerId>,
        reason: VictoryReason,
        statistics: Vec<PlayerStatistics>,
    },
}

/// Destination for outbound notifications.
pub trait EventSink {
    fn publish(&mut self, event: GameEvent);
}

type Listener = Box<dyn FnMut(&GameEvent)>;

/// Buffers events until the host drains them; an optional listener sees
/// each event as it is published.
#[derive(Default)]
pub struct EventBuffer {
    events: Vec<GameEvent>,
    listener: Option<Listener>,
}

impl EventBuffer {
    pub fn with_listener(listener: impl FnMut(&GameEvent) + 'static) -> Self {
        Self {
            events: Vec::new(),
            listener: Some(Box::new(listener)),
        }
    }

    pub fn set_listener(&mut self, listener: impl FnMut(&GameEvent) + 'static) {
        self.listener = Some(Box::new(listener));
    }

    pub fn events(&self) -> &[GameEvent] {
        &self.events
    }

    pub fn drain(&mut self) -> Vec<GameEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl EventSink for EventBuffer {
    fn publish(&mut self, event: GameEvent) {
        if let Some(listener) = self.listener.as_mut() {
            listener(&event);
        }
        self.events.push(event);
    }
}

impl std::fmt::Debug for EventBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBuffer")
            .field("events", &self.events.len())
            .field("listener", &self.listener.is_some())
            .finish()
    }
}
