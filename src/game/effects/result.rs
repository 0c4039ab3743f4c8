use serde::{Deserialize, Serialize};

use super::spec::EffectId;
use crate::game::state::{CardId, TargetRef};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EffectResultKind {
    Success,
    Failed,
    Cancelled,
    Replaced,
    /// Stopped by a protection effect; callers skip secondary effects.
    Blocked,
    Partial,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EffectResult {
    pub kind: EffectResultKind,
    pub effect_id: EffectId,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default)]
    pub value: i32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub affected: Vec<TargetRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secondary: Vec<EffectResult>,
    /// Opaque data a host can use to roll the effect back.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub undo: Option<serde_json::Value>,
    #[serde(default)]
    pub is_damage: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub knocked_out: Vec<CardId>,
}

impl EffectResult {
    fn with_kind(kind: EffectResultKind, effect_id: EffectId, message: impl Into<String>) -> Self {
        Self {
            kind,
            effect_id,
            message: message.into(),
            value: 0,
            affected: Vec::new(),
            secondary: Vec::new(),
            undo: None,
            is_damage: false,
            knocked_out: Vec::new(),
        }
    }

    pub fn success(effect_id: EffectId, value: i32) -> Self {
        Self {
            value,
            ..Self::with_kind(EffectResultKind::Success, effect_id, "")
        }
    }

    pub fn failed(effect_id: EffectId, message: impl Into<String>) -> Self {
        Self::with_kind(EffectResultKind::Failed, effect_id, message)
    }

    pub fn cancelled(effect_id: EffectId, message: impl Into<String>) -> Self {
        Self::with_kind(EffectResultKind::Cancelled, effect_id, message)
    }

    pub fn blocked(effect_id: EffectId, message: impl Into<String>) -> Self {
        Self::with_kind(EffectResultKind::Blocked, effect_id, message)
    }

    /// Wraps the result of the replacement that ran instead of `original`.
    pub fn replaced(original: EffectId, replacement: EffectResult) -> Self {
        Self {
            value: replacement.value,
            affected: replacement.affected.clone(),
            secondary: vec![replacement],
            ..Self::with_kind(
                EffectResultKind::Replaced,
                original,
                format!("effect {original} was replaced"),
            )
        }
    }

    pub fn with_affected(mut self, affected: Vec<TargetRef>) -> Self {
        self.affected = affected;
        self
    }

    pub fn with_secondary(mut self, secondary: EffectResult) -> Self {
        self.secondary.push(secondary);
        self
    }

    pub fn with_undo(mut self, undo: serde_json::Value) -> Self {
        self.undo = Some(undo);
        self
    }

    pub fn as_damage(mut self, knocked_out: Vec<CardId>) -> Self {
        self.is_damage = true;
        self.knocked_out = knocked_out;
        self
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self.kind,
            EffectResultKind::Success | EffectResultKind::Replaced | EffectResultKind::Partial
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self.kind,
            EffectResultKind::Failed | EffectResultKind::Blocked | EffectResultKind::Cancelled
        )
    }

    /// Damage dealt by this result and everything nested under it.
    pub fn damage_total(&self) -> i32 {
        let own = if self.is_damage { self.value } else { 0 };
        own + self.secondary.iter().map(EffectResult::damage_total).sum::<i32>()
    }

    /// Knock-outs reported by this result and everything nested under it.
    pub fn all_knocked_out(&self) -> Vec<CardId> {
        let mut all = self.knocked_out.clone();
        for secondary in &self.secondary {
            for card_id in secondary.all_knocked_out() {
                if !all.contains(&card_id) {
                    all.push(card_id);
                }
            }
        }
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn damage_total_includes_nested_results() {
        let inner = EffectResult::success(2, 30).as_damage(vec![5]);
        let outer = EffectResult::success(1, 20).as_damage(Vec::new()).with_secondary(inner);
        assert_eq!(outer.damage_total(), 50);
        assert_eq!(outer.all_knocked_out(), vec![5]);

        let replaced = EffectResult::replaced(1, EffectResult::success(3, 10).as_damage(Vec::new()));
        assert_eq!(replaced.kind, EffectResultKind::Replaced);
        assert_eq!(replaced.damage_total(), 10);
    }
}
