use serde::{Deserialize, Serialize};

use super::effects::EffectResult;
use super::error::RuleError;
use super::state::{CardId, PlayerId, Slot, TargetRef};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ActionKind {
    PlayCard,
    AttachEnergy,
    UseAttack,
    Retreat,
    Evolution,
    UseAbility,
    PromoteActive,
    EndTurn,
    Surrender,
}

impl ActionKind {
    pub const ALL: [ActionKind; 9] = [
        ActionKind::PlayCard,
        ActionKind::AttachEnergy,
        ActionKind::UseAttack,
        ActionKind::Retreat,
        ActionKind::Evolution,
        ActionKind::UseAbility,
        ActionKind::PromoteActive,
        ActionKind::EndTurn,
        ActionKind::Surrender,
    ];

    /// Kinds a player may submit outside their own turn.
    pub fn bypasses_turn_order(self) -> bool {
        matches!(self, ActionKind::PromoteActive | ActionKind::Surrender)
    }
}

/// Per-kind payload carrying exactly the fields that kind needs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "type")]
pub enum ActionPayload {
    PlayCard {
        card_id: CardId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<TargetRef>,
    },
    /// `card_id` names an energy card in hand; `None` draws from the energy zone.
    AttachEnergy {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        card_id: Option<CardId>,
        target: Slot,
    },
    UseAttack {
        attack_index: usize,
    },
    Retreat {
        bench_index: usize,
    },
    Evolution {
        card_id: CardId,
        target: Slot,
    },
    UseAbility {
        slot: Slot,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<TargetRef>,
    },
    PromoteActive {
        bench_index: usize,
    },
    EndTurn,
    Surrender,
}

impl ActionPayload {
    pub fn kind(&self) -> ActionKind {
        match self {
            ActionPayload::PlayCard { .. } => ActionKind::PlayCard,
            ActionPayload::AttachEnergy { .. } => ActionKind::AttachEnergy,
            ActionPayload::UseAttack { .. } => ActionKind::UseAttack,
            ActionPayload::Retreat { .. } => ActionKind::Retreat,
            ActionPayload::Evolution { .. } => ActionKind::Evolution,
            ActionPayload::UseAbility { .. } => ActionKind::UseAbility,
            ActionPayload::PromoteActive { .. } => ActionKind::PromoteActive,
            ActionPayload::EndTurn => ActionKind::EndTurn,
            ActionPayload::Surrender => ActionKind::Surrender,
        }
    }
}

/// An immutable request from the input layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct GameAction {
    pub id: u64,
    pub player_id: PlayerId,
    #[serde(default)]
    pub timestamp_ms: u64,
    pub payload: ActionPayload,
}

impl GameAction {
    pub fn new(id: u64, player_id: PlayerId, timestamp_ms: u64, payload: ActionPayload) -> Self {
        Self {
            id,
            player_id,
            timestamp_ms,
            payload,
        }
    }

    pub fn kind(&self) -> ActionKind {
        self.payload.kind()
    }
}

/// Verdict of the validation pipeline. An invalid result always carries a
/// non-empty message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationResult {
    pub is_valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub violation: Option<RuleError>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            error_message: None,
            violation: None,
            warnings: Vec::new(),
        }
    }

    pub fn rejected(error: RuleError) -> Self {
        let mut message = error.to_string();
        if message.is_empty() {
            message = format!("{error:?}");
        }
        Self {
            is_valid: false,
            error_message: Some(message),
            violation: Some(error),
            warnings: Vec::new(),
        }
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        let detail = detail.into();
        let message = if detail.is_empty() {
            "internal validation error".to_string()
        } else {
            format!("internal validation error: {detail}")
        };
        Self {
            is_valid: false,
            error_message: Some(message),
            violation: None,
            warnings: Vec::new(),
        }
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }
}

/// Structured consequences of an executed action.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionOutcome {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub knocked_out: Vec<CardId>,
    #[serde(default)]
    pub points_scored: u8,
    #[serde(default)]
    pub prizes_taken: usize,
    #[serde(default)]
    pub damage_dealt: i32,
    #[serde(default)]
    pub cards_drawn: usize,
    /// Effects still waiting in the scheduler (stepped resolution only).
    #[serde(default)]
    pub pending_effects: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub effects: Vec<EffectResult>,
}

impl ActionOutcome {
    pub fn knocked_out_any(&self) -> bool {
        !self.knocked_out.is_empty()
    }

    pub fn absorb(&mut self, result: EffectResult) {
        self.damage_dealt += result.damage_total();
        self.effects.push(result);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub data: ActionOutcome,
}

impl ActionResult {
    pub fn success(data: ActionOutcome, warnings: Vec<String>) -> Self {
        Self {
            success: true,
            error_message: None,
            warnings,
            data,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: Some(message.into()),
            warnings: Vec::new(),
            data: ActionOutcome::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_results_always_carry_a_message() {
        for error in [
            RuleError::NoActivePokemon,
            RuleError::Custom {
                message: String::new(),
            },
        ] {
            let result = ValidationResult::rejected(error);
            assert!(!result.is_valid);
            assert!(result
                .error_message
                .as_deref()
                .is_some_and(|message| !message.is_empty()));
        }
    }

    #[test]
    fn payload_round_trips_through_tagged_json() {
        let action = GameAction::new(
            7,
            1,
            1_000,
            ActionPayload::AttachEnergy {
                card_id: None,
                target: Slot::Bench(2),
            },
        );
        let json = serde_json::to_string(&action).expect("serialize");
        assert!(json.contains("\"type\":\"AttachEnergy\""));
        let back: GameAction = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, action);
        assert_eq!(back.kind(), ActionKind::AttachEnergy);
    }
}
