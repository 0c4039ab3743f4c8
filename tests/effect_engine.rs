use tcg_rules::game::effects::{DamageSource, EffectEngine, EngineConfig, Submission};
use tcg_rules::game::{
    Card, Effect, EffectContext, EffectResultKind, EffectSpec, EnergyType, EventBuffer, GameEvent, GameState,
    Player, PokemonInPlay, RuleSet, StatusCondition,
};

fn board(ruleset: RuleSet, defender: Card) -> GameState {
    let mut attacker = Player::new(0, (1..=10).map(|id| Card::energy(id, EnergyType::Fire)).collect());
    attacker.active = Some(PokemonInPlay::new(
        Card::pokemon(50, "Charmander", EnergyType::Fire, 60),
        0,
    ));
    let mut target = Player::new(1, (101..=110).map(|id| Card::energy(id, EnergyType::Grass)).collect());
    target.active = Some(PokemonInPlay::new(defender, 0));
    let mut state = GameState::new(vec![attacker, target], ruleset);
    state.turn.order = vec![0, 1];
    state
}

fn fire_attack(amount: i32) -> Effect {
    Effect::new(
        7,
        "Flamethrower",
        EffectSpec::Damage {
            amount,
            energy_type: Some(EnergyType::Fire),
            source: DamageSource::Attack,
            inflicts: None,
        },
    )
}

fn defender_damage(state: &GameState) -> Option<i32> {
    state.players[1].active.as_ref().map(|pokemon| pokemon.damage)
}

#[test]
fn classic_weakness_doubles_fifty_to_a_hundred() {
    let bulbasaur = Card::pokemon(150, "Bulbasaur", EnergyType::Grass, 120).with_weakness(EnergyType::Fire);
    let mut state = board(RuleSet::classic(), bulbasaur);
    let mut engine = EffectEngine::default();
    let mut sink = EventBuffer::default();

    let result = engine.execute(fire_attack(50), EffectContext::new(0, Some(1)), &mut state, &mut sink);
    assert_eq!(result.kind, EffectResultKind::Success);
    assert_eq!(result.damage_total(), 100);
    assert_eq!(defender_damage(&state), Some(100));
}

#[test]
fn pocket_weakness_adds_twenty() {
    let bulbasaur = Card::pokemon(150, "Bulbasaur", EnergyType::Grass, 120).with_weakness(EnergyType::Fire);
    let mut state = board(RuleSet::pocket(), bulbasaur);
    let mut engine = EffectEngine::default();
    let mut sink = EventBuffer::default();

    let result = engine.execute(fire_attack(50), EffectContext::new(0, Some(1)), &mut state, &mut sink);
    assert_eq!(result.damage_total(), 70);
    assert_eq!(defender_damage(&state), Some(70));
}

#[test]
fn pocket_ignores_resistance_and_classic_applies_it() {
    let squirtle = || Card::pokemon(150, "Squirtle", EnergyType::Water, 120).with_resistance(EnergyType::Fire);

    let mut pocket = board(RuleSet::pocket(), squirtle());
    let mut engine = EffectEngine::default();
    let mut sink = EventBuffer::default();
    engine.execute(fire_attack(50), EffectContext::new(0, Some(1)), &mut pocket, &mut sink);
    assert_eq!(defender_damage(&pocket), Some(50));

    let mut classic = board(RuleSet::classic(), squirtle());
    let mut engine = EffectEngine::default();
    engine.execute(fire_attack(50), EffectContext::new(0, Some(1)), &mut classic, &mut sink);
    assert_eq!(defender_damage(&classic), Some(20));
}

#[test]
fn resistance_never_pushes_damage_below_zero() {
    let steelix = Card::pokemon(150, "Steelix", EnergyType::Metal, 120).with_resistance(EnergyType::Fire);
    let mut state = board(RuleSet::classic(), steelix);
    let mut engine = EffectEngine::default();
    let mut sink = EventBuffer::default();

    let result = engine.execute(fire_attack(10), EffectContext::new(0, Some(1)), &mut state, &mut sink);
    assert_eq!(result.damage_total(), 0);
    assert_eq!(defender_damage(&state), Some(0));
}

#[test]
fn lethal_damage_is_reported_as_a_knockout() {
    let weedle = Card::pokemon(150, "Weedle", EnergyType::Grass, 50).with_weakness(EnergyType::Fire);
    let mut state = board(RuleSet::classic(), weedle);
    let mut engine = EffectEngine::default();
    let mut sink = EventBuffer::default();

    let result = engine.execute(fire_attack(30), EffectContext::new(0, Some(1)), &mut state, &mut sink);
    assert_eq!(result.all_knocked_out(), vec![150]);
    assert!(sink.events().iter().any(|event| matches!(
        event,
        GameEvent::DamageDealt {
            amount: 60,
            knocked_out: true,
            ..
        }
    )));
}

#[test]
fn chain_limit_refuses_and_cancels_overflow() {
    let config = EngineConfig {
        max_chain_length: 3,
        ..EngineConfig::default()
    };
    let mut engine = EffectEngine::new(config);
    let state = board(RuleSet::classic(), Card::pokemon(150, "Snorlax", EnergyType::Colorless, 150));
    let mut sink = EventBuffer::default();

    let submissions: Vec<Submission> = (0..5)
        .map(|n| {
            let effect = Effect::new(n, format!("Draw {n}"), EffectSpec::Draw { count: 1 });
            engine.submit(effect, EffectContext::new(0, Some(1)), None, &state, &mut sink)
        })
        .collect();

    let queued = submissions
        .iter()
        .filter(|submission| matches!(submission, Submission::Queued(_)))
        .count();
    assert_eq!(queued, 3);
    assert_eq!(engine.queue_len(), 3);
    for submission in &submissions[3..] {
        match submission {
            Submission::Rejected(result) => assert_eq!(result.kind, EffectResultKind::Cancelled),
            Submission::Queued(seq) => panic!("entry {seq} queued past the chain limit"),
        }
    }
    assert_eq!(engine.statistics().cancelled, 2);
}

#[test]
fn status_infliction_rides_on_attack_damage() {
    let rattata = Card::pokemon(150, "Rattata", EnergyType::Colorless, 120);
    let mut state = board(RuleSet::classic(), rattata);
    let mut engine = EffectEngine::default();
    let mut sink = EventBuffer::default();
    let effect = Effect::new(
        8,
        "Poison Sting",
        EffectSpec::Damage {
            amount: 10,
            energy_type: Some(EnergyType::Grass),
            source: DamageSource::Attack,
            inflicts: Some(StatusCondition::Poisoned),
        },
    );

    engine.execute(effect, EffectContext::new(0, Some(1)), &mut state, &mut sink);
    let defender = state.players[1].active.as_ref().expect("defender in play");
    assert_eq!(defender.damage, 10);
    assert!(defender.has_status(StatusCondition::Poisoned));
}
