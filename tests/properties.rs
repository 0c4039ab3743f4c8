use proptest::prelude::*;

use tcg_rules::game::catalog::sample_deck;
use tcg_rules::game::config::profile;
use tcg_rules::game::effects::damage::{self, DamageInput, DamageModifier};
use tcg_rules::game::effects::{DamageSource, EffectEngine, EngineConfig, Submission};
use tcg_rules::game::rules::CombatRules;
use tcg_rules::game::{
    ActionPayload, Card, Effect, EffectContext, EffectSpec, EnergyType, EventBuffer, Format, GameAction, GameSession,
    PlayerId, PlayerSetup, RuleSet, SessionConfig, Slot, TargetRef, ValidationPipeline,
};

const NO_MODIFIERS: &[(u32, DamageModifier)] = &[];

fn combat(format: Format) -> CombatRules {
    match format {
        Format::Classic => RuleSet::classic().combat,
        Format::Pocket => RuleSet::pocket().combat,
    }
}

fn format_strategy() -> impl Strategy<Value = Format> {
    prop_oneof![Just(Format::Classic), Just(Format::Pocket)]
}

fn fire_hit(base: i32) -> DamageInput {
    DamageInput {
        base,
        energy_type: Some(EnergyType::Fire),
        source: DamageSource::Attack,
        attacker: 0,
        defender: TargetRef::active(1),
    }
}

fn started(format: Format, players: u8, seed: u64) -> GameSession {
    let config = SessionConfig::default().with_seed(seed).with_first_player(0);
    let mut session = GameSession::with_config(format, config).expect("valid config");
    let setups = (0..players)
        .map(|id| PlayerSetup::new(id, sample_deck(format, u32::from(id) * 1_000 + 1)))
        .collect();
    session.start_game(setups).expect("game starts");
    session
}

fn payload_strategy() -> impl Strategy<Value = ActionPayload> {
    let card = 0u32..2_200;
    let slot = prop_oneof![Just(Slot::Active), (0usize..6).prop_map(Slot::Bench)];
    prop_oneof![
        card.clone().prop_map(|card_id| ActionPayload::PlayCard { card_id, target: None }),
        (proptest::option::of(card.clone()), slot.clone())
            .prop_map(|(card_id, target)| ActionPayload::AttachEnergy { card_id, target }),
        (0usize..3).prop_map(|attack_index| ActionPayload::UseAttack { attack_index }),
        (0usize..6).prop_map(|bench_index| ActionPayload::Retreat { bench_index }),
        (card, slot.clone()).prop_map(|(card_id, target)| ActionPayload::Evolution { card_id, target }),
        slot.prop_map(|slot| ActionPayload::UseAbility { slot, target: None }),
        (0usize..6).prop_map(|bench_index| ActionPayload::PromoteActive { bench_index }),
        Just(ActionPayload::EndTurn),
        Just(ActionPayload::Surrender),
    ]
}

proptest! {
    #[test]
    fn damage_is_never_negative(
        format in format_strategy(),
        base in -100i32..400,
        weak in any::<bool>(),
        resistant in any::<bool>(),
        bonus in -20i32..60,
        reduction in -20i32..300,
    ) {
        let mut defender = Card::pokemon(2, "Target", EnergyType::Colorless, 100);
        if weak {
            defender = defender.with_weakness(EnergyType::Fire);
        }
        if resistant {
            defender = defender.with_resistance(EnergyType::Fire);
        }
        let breakdown = damage::calculate(&fire_hit(base), &defender, &combat(format), NO_MODIFIERS, bonus, reduction);
        prop_assert!(breakdown.amount >= 0);
    }

    #[test]
    fn weakness_never_lowers_and_resistance_never_raises_damage(
        format in format_strategy(),
        base in 0i32..400,
        bonus in 0i32..60,
        reduction in 0i32..100,
    ) {
        let rules = combat(format);
        let plain = Card::pokemon(2, "Target", EnergyType::Colorless, 100);
        let weak = plain.clone().with_weakness(EnergyType::Fire);
        let resistant = plain.clone().with_resistance(EnergyType::Fire);

        let plain_amount = damage::calculate(&fire_hit(base), &plain, &rules, NO_MODIFIERS, bonus, reduction).amount;
        let weak_amount = damage::calculate(&fire_hit(base), &weak, &rules, NO_MODIFIERS, bonus, reduction).amount;
        let resisted_amount =
            damage::calculate(&fire_hit(base), &resistant, &rules, NO_MODIFIERS, bonus, reduction).amount;

        prop_assert!(weak_amount >= plain_amount);
        prop_assert!(resisted_amount <= plain_amount);
    }

    #[test]
    fn queue_never_exceeds_the_chain_limit(limit in 1usize..12, submissions in 0u32..30) {
        let mut engine = EffectEngine::new(EngineConfig {
            max_chain_length: limit,
            ..EngineConfig::default()
        });
        let session = started(Format::Pocket, 2, 1);
        let state = session.state().clone();
        let mut sink = EventBuffer::default();

        let mut queued = 0usize;
        for n in 0..submissions {
            let effect = Effect::new(n, format!("Draw {n}"), EffectSpec::Draw { count: 1 });
            if let Submission::Queued(_) = engine.submit(effect, EffectContext::new(0, Some(1)), None, &state, &mut sink) {
                queued += 1;
            }
            prop_assert!(engine.queue_len() <= limit);
        }
        prop_assert_eq!(queued, (submissions as usize).min(limit));
    }

    #[test]
    fn validation_is_deterministic_with_and_without_cache(
        format in format_strategy(),
        seed in 0u64..1_000,
        player in 0u8..3,
        payload in payload_strategy(),
    ) {
        let session = started(format, 2, seed);
        let state = session.state().clone();
        let action = GameAction::new(1, player, 0, payload);
        let mut sink = EventBuffer::default();

        let mut cached = ValidationPipeline::new(profile("strict").expect("built-in profile"));
        let mut uncached = ValidationPipeline::new(profile("debug").expect("built-in profile"));
        let first = cached.validate(&action, &state, &mut sink);
        let second = cached.validate(&action, &state, &mut sink);
        let fresh = uncached.validate(&action, &state, &mut sink);

        prop_assert_eq!(&first, &second);
        prop_assert_eq!(first.is_valid, fresh.is_valid);
        prop_assert_eq!(&first.error_message, &fresh.error_message);
        if !first.is_valid {
            prop_assert!(first.error_message.as_deref().is_some_and(|message| !message.is_empty()));
        }
    }

    #[test]
    fn a_full_rotation_returns_to_the_first_player(players in 2u8..5, seed in 0u64..500) {
        let mut session = started(Format::Pocket, players, seed);
        let first: PlayerId = session.state().current_player();
        let turn_number = session.state().turn.turn_number;

        for id in 0..u64::from(players) {
            let current = session.state().current_player();
            let result = session.submit_action(GameAction::new(id + 1, current, 0, ActionPayload::EndTurn));
            prop_assert!(result.success, "{:?}", result.error_message);
        }

        prop_assert_eq!(session.state().current_player(), first);
        prop_assert_eq!(session.state().turn.turn_number, turn_number + 1);
    }
}
