//! Damage arithmetic: weakness, resistance, pluggable modifiers and the
//! continuous bonus/reduction layer. Pure functions over plain values so the
//! engine and the property tests share the same code.

use serde::{Deserialize, Serialize};

use super::spec::DamageSource;
use crate::game::rules::{CombatRules, WeaknessRule};
use crate::game::state::{Card, EnergyType, PlayerId, TargetRef};

/// What a modifier gets to look at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DamageInput {
    pub base: i32,
    pub energy_type: Option<EnergyType>,
    pub source: DamageSource,
    pub attacker: PlayerId,
    pub defender: TargetRef,
}

/// Adjusts the running amount; applied in registration order.
pub type DamageModifier = Box<dyn Fn(&DamageInput, i32) -> i32>;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DamageBreakdown {
    pub base: i32,
    pub weakness_applied: bool,
    pub resistance_applied: bool,
    pub after_type: i32,
    pub after_modifiers: i32,
    pub bonus: i32,
    pub reduction: i32,
    pub amount: i32,
}

pub fn apply_weakness(amount: i32, rule: WeaknessRule) -> i32 {
    match rule {
        WeaknessRule::Multiplier(factor) => amount.saturating_mul(factor.max(1)),
        WeaknessRule::Flat(bonus) => amount.saturating_add(bonus.max(0)),
    }
}

pub fn apply_resistance(amount: i32, reduction: i32) -> i32 {
    amount.saturating_sub(reduction.max(0)).max(0)
}

/// Runs the full damage pipeline against `defender`. The result is never
/// negative. Status damage skips every adjustment.
pub fn calculate(
    input: &DamageInput,
    defender: &Card,
    combat: &CombatRules,
    modifiers: &[(u32, DamageModifier)],
    bonus: i32,
    reduction: i32,
) -> DamageBreakdown {
    let base = input.base.max(0);
    let mut breakdown = DamageBreakdown {
        base,
        after_type: base,
        after_modifiers: base,
        amount: base,
        ..DamageBreakdown::default()
    };
    if input.source == DamageSource::Status {
        return breakdown;
    }

    let mut amount = base;
    if let Some(energy_type) = input.energy_type {
        if defender.weakness == Some(energy_type) {
            amount = apply_weakness(amount, combat.weakness);
            breakdown.weakness_applied = true;
        }
        if let Some(resistance) = combat.resistance {
            if defender.resistance == Some(energy_type) {
                amount = apply_resistance(amount, resistance);
                breakdown.resistance_applied = true;
            }
        }
    }
    breakdown.after_type = amount;

    for (_, modifier) in modifiers {
        amount = modifier(input, amount);
    }
    breakdown.after_modifiers = amount;

    breakdown.bonus = bonus.max(0);
    breakdown.reduction = reduction.max(0);
    amount = amount
        .saturating_add(breakdown.bonus)
        .saturating_sub(breakdown.reduction);
    breakdown.amount = amount.max(0);
    breakdown
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::rules::RuleSet;

    fn input(base: i32, energy_type: EnergyType) -> DamageInput {
        DamageInput {
            base,
            energy_type: Some(energy_type),
            source: DamageSource::Attack,
            attacker: 0,
            defender: TargetRef::active(1),
        }
    }

    fn modifier(f: impl Fn(&DamageInput, i32) -> i32 + 'static) -> DamageModifier {
        Box::new(f)
    }

    fn grass_defender() -> Card {
        Card::pokemon(1, "Bulbasaur", EnergyType::Grass, 70)
            .with_weakness(EnergyType::Fire)
            .with_resistance(EnergyType::Water)
    }

    #[test]
    fn classic_weakness_doubles() {
        let breakdown = calculate(
            &input(50, EnergyType::Fire),
            &grass_defender(),
            &RuleSet::classic().combat,
            &[],
            0,
            0,
        );
        assert!(breakdown.weakness_applied);
        assert_eq!(breakdown.amount, 100);
    }

    #[test]
    fn pocket_weakness_adds_twenty_and_ignores_resistance() {
        let combat = RuleSet::pocket().combat;
        let weak = calculate(&input(50, EnergyType::Fire), &grass_defender(), &combat, &[], 0, 0);
        assert_eq!(weak.amount, 70);
        let resisted = calculate(&input(50, EnergyType::Water), &grass_defender(), &combat, &[], 0, 0);
        assert!(!resisted.resistance_applied);
        assert_eq!(resisted.amount, 50);
    }

    #[test]
    fn resistance_clamps_at_zero() {
        let breakdown = calculate(
            &input(20, EnergyType::Water),
            &grass_defender(),
            &RuleSet::classic().combat,
            &[],
            0,
            0,
        );
        assert!(breakdown.resistance_applied);
        assert_eq!(breakdown.amount, 0);
    }

    #[test]
    fn modifiers_run_in_order_and_result_is_floored() {
        let modifiers: Vec<(u32, DamageModifier)> = vec![
            (1, modifier(|_, amount| amount + 10)),
            (2, modifier(|_, amount| amount * 3)),
            (3, modifier(|_, amount| amount - 1_000)),
        ];
        let breakdown = calculate(
            &input(10, EnergyType::Colorless),
            &grass_defender(),
            &RuleSet::classic().combat,
            &modifiers[..2],
            0,
            0,
        );
        assert_eq!(breakdown.amount, 60);
        let floored = calculate(
            &input(10, EnergyType::Colorless),
            &grass_defender(),
            &RuleSet::classic().combat,
            &modifiers,
            0,
            0,
        );
        assert_eq!(floored.amount, 0);
    }

    #[test]
    fn status_damage_ignores_type_and_reduction() {
        let mut status = input(20, EnergyType::Fire);
        status.source = DamageSource::Status;
        let breakdown = calculate(&status, &grass_defender(), &RuleSet::classic().combat, &[], 0, 30);
        assert!(!breakdown.weakness_applied);
        assert_eq!(breakdown.amount, 20);
    }
}
