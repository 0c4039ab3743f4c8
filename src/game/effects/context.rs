use serde::{Deserialize, Serialize};

use crate::game::state::{CardId, PlayerId, TargetRef};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TriggerCondition {
    OnPlay,
    OnAttack,
    OnDamage,
    OnKnockOut,
    OnEvolution,
    OnTurnStart,
    OnTurnEnd,
    OnRetreat,
    OnEnergyAttached,
}

/// How far an effect reaches. `Single` and `Multiple` hit the explicit
/// targets; the rest are resolved against the board when the effect runs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EffectScope {
    Single,
    Multiple,
    /// Every Pokemon the target contract accepts.
    All,
    /// The primary target and the rest of its owner's Pokemon.
    Area,
    /// Every Pokemon in play on both sides.
    Global,
}

impl Default for EffectScope {
    fn default() -> Self {
        EffectScope::Single
    }
}

/// Per-invocation state of one effect. Cloned when a replacement has to be
/// tried without touching the real invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EffectContext {
    /// Condition that caused this invocation, when it came from a trigger.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<TriggerCondition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_card: Option<CardId>,
    pub source_player: PlayerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opponent: Option<PlayerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<TargetRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<TargetRef>,
    #[serde(default)]
    pub scope: EffectScope,
    /// Overrides the effect's base amount when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_turns: Option<u32>,
    #[serde(default)]
    pub executed: bool,
    #[serde(default)]
    pub cancelled: bool,
    #[serde(default)]
    pub replaced: bool,
    #[serde(default)]
    pub chain_position: usize,
    /// Queue entry whose resolution fired this one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<u64>,
}

impl EffectContext {
    pub fn new(source_player: PlayerId, opponent: Option<PlayerId>) -> Self {
        Self {
            source_player,
            opponent,
            ..Self::default()
        }
    }

    pub fn with_source_card(mut self, card_id: CardId) -> Self {
        self.source_card = Some(card_id);
        self
    }

    pub fn with_target(mut self, target: TargetRef) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_targets(mut self, targets: Vec<TargetRef>) -> Self {
        self.scope = if targets.len() > 1 {
            EffectScope::Multiple
        } else {
            EffectScope::Single
        };
        self.target = targets.first().copied();
        self.targets = targets;
        self
    }

    pub fn with_scope(mut self, scope: EffectScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_power(mut self, power: i32) -> Self {
        self.power = Some(power);
        self
    }

    pub fn with_origin(mut self, origin: TriggerCondition) -> Self {
        self.origin = Some(origin);
        self
    }

    /// Every explicit target, primary first, without duplicates.
    pub fn all_targets(&self) -> Vec<TargetRef> {
        let mut all: Vec<TargetRef> = self.target.iter().copied().collect();
        for target in &self.targets {
            if !all.contains(target) {
                all.push(*target);
            }
        }
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn targets_are_deduplicated_primary_first() {
        let ctx = EffectContext::new(0, Some(1))
            .with_target(TargetRef::bench(1, 0))
            .with_targets(vec![TargetRef::active(1), TargetRef::bench(1, 0)]);
        assert_eq!(ctx.scope, EffectScope::Multiple);
        assert_eq!(ctx.all_targets(), vec![TargetRef::active(1), TargetRef::bench(1, 0)]);
    }

    #[test]
    fn context_parses_from_json_with_defaults() {
        let ctx: EffectContext =
            serde_json::from_str(r#"{"source_player": 0, "opponent": 1, "scope": "Area"}"#).expect("valid json");
        assert_eq!(ctx.scope, EffectScope::Area);
        assert_eq!(ctx.parent, None);
        assert!(ctx.all_targets().is_empty());
    }
}
