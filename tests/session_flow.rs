use tcg_rules::game::catalog::sample_deck;
use tcg_rules::game::{
    ActionPayload, ActionResult, Attack, Card, CardId, Effect, EffectCategory, EffectContext, EffectResultKind,
    EffectSpec, EnergyType, Format, GameAction, GameEvent, GameSession, GameStatus, PlayerId, PlayerSetup,
    ReplacementEffect, SessionConfig, VictoryReason,
};

struct Table {
    session: GameSession,
    next_id: u64,
}

impl Table {
    fn new(format: Format, decks: [Vec<Card>; 2]) -> Self {
        let config = SessionConfig::default().with_seed(42).with_first_player(0);
        let mut session = GameSession::with_config(format, config).expect("valid config");
        let [first, second] = decks;
        session
            .start_game(vec![PlayerSetup::new(0, first), PlayerSetup::new(1, second)])
            .expect("game starts");
        Self { session, next_id: 1 }
    }

    fn sample(format: Format) -> Self {
        Self::new(format, [sample_deck(format, 1), sample_deck(format, 1_001)])
    }

    fn act(&mut self, player: PlayerId, payload: ActionPayload) -> ActionResult {
        self.next_id += 1;
        self.session
            .submit_action(GameAction::new(self.next_id, player, 0, payload))
    }

    fn ok(&mut self, player: PlayerId, payload: ActionPayload) -> ActionResult {
        let result = self.act(player, payload.clone());
        assert!(result.success, "{payload:?} failed: {:?}", result.error_message);
        result
    }

    fn hand(&self, player: PlayerId) -> Vec<CardId> {
        self.session
            .state()
            .player(player)
            .map(|player| player.hand.iter().map(|card| card.id).collect())
            .unwrap_or_default()
    }

    fn game_ended_events(&self) -> usize {
        self.session
            .events()
            .iter()
            .filter(|event| matches!(event, GameEvent::GameEnded { .. }))
            .count()
    }
}

/// Twenty 60 HP Basics whose free attack deals 60.
fn brawlers(first_id: CardId) -> Vec<Card> {
    (0..20)
        .map(|offset| {
            Card::pokemon(first_id + offset, "Brawler", EnergyType::Colorless, 60)
                .with_attack(Attack::new("Slam", Vec::new(), 60))
        })
        .collect()
}

#[test]
fn out_of_turn_attack_is_rejected_with_turn_message() {
    let mut table = Table::sample(Format::Classic);
    assert_eq!(table.session.state().current_player(), 0);

    let result = table.act(1, ActionPayload::UseAttack { attack_index: 0 });
    assert!(!result.success);
    let message = result.error_message.expect("rejection carries a message");
    assert!(message.contains("not player 1's turn"), "{message}");
    assert!(table
        .session
        .events()
        .iter()
        .any(|event| matches!(event, GameEvent::ActionBlocked { player_id: 1, .. })));
}

#[test]
fn two_end_turns_complete_one_rotation() {
    let mut table = Table::sample(Format::Pocket);
    let turn_number = table.session.state().turn.turn_number;

    table.ok(0, ActionPayload::EndTurn);
    assert_eq!(table.session.state().current_player(), 1);
    assert_eq!(table.session.state().turn.turn_number, turn_number);

    table.ok(1, ActionPayload::EndTurn);
    assert_eq!(table.session.state().current_player(), 0);
    assert_eq!(table.session.state().turn.turn_number, turn_number + 1);
    assert_eq!(table.session.turn_manager().history().len(), 1);
}

#[test]
fn pocket_points_victory_ends_the_game_once() {
    let mut table = Table::new(Format::Pocket, [brawlers(1), brawlers(101)]);

    table.ok(0, ActionPayload::EndTurn);
    for card_id in table.hand(1).into_iter().take(2) {
        table.ok(1, ActionPayload::PlayCard { card_id, target: None });
    }
    table.ok(1, ActionPayload::EndTurn);

    for expected in 1..=3u8 {
        let result = table.ok(0, ActionPayload::UseAttack { attack_index: 0 });
        assert_eq!(result.data.points_scored, 1);
        assert_eq!(table.session.state().players[0].points, expected);
        if expected < 3 {
            table.ok(1, ActionPayload::PromoteActive { bench_index: 0 });
            table.ok(1, ActionPayload::EndTurn);
        }
    }

    assert_eq!(table.session.state().status, GameStatus::Finished);
    let outcome = table.session.outcome().expect("game has an outcome");
    assert_eq!(outcome.winner, Some(0));
    assert_eq!(outcome.reason, VictoryReason::PointTarget);
    assert_eq!(table.game_ended_events(), 1);

    // Nothing after the end produces another game-end notification.
    assert!(!table.session.end_game(Some(1), VictoryReason::PointTarget));
    let late = table.act(0, ActionPayload::UseAttack { attack_index: 0 });
    assert!(!late.success);
    assert_eq!(table.game_ended_events(), 1);
}

#[test]
fn knocking_out_the_last_pokemon_wins() {
    let mut table = Table::new(Format::Pocket, [brawlers(1), brawlers(101)]);
    table.ok(0, ActionPayload::UseAttack { attack_index: 0 });
    let outcome = table.session.outcome().expect("game has an outcome");
    assert_eq!(outcome.winner, Some(0));
    assert_eq!(outcome.reason, VictoryReason::NoPokemonInPlay);
}

#[test]
fn repeated_effect_inside_cooldown_fails_without_side_effects() {
    let mut table = Table::sample(Format::Pocket);
    table
        .session
        .register_effect(Effect::new(42, "Research", EffectSpec::Draw { count: 2 }));
    let hand = table.hand(0).len();

    let first = table.session.execute_effect(42, EffectContext::new(0, Some(1)));
    assert_eq!(first.kind, EffectResultKind::Success);
    assert_eq!(table.hand(0).len(), hand + 2);
    let revision = table.session.state().revision;

    let second = table.session.execute_effect(42, EffectContext::new(0, Some(1)));
    assert_eq!(second.kind, EffectResultKind::Failed);
    assert_eq!(table.hand(0).len(), hand + 2);
    assert_eq!(table.session.state().revision, revision);
}

#[test]
fn replacement_swallows_attack_damage_exactly_once() {
    let mut table = Table::new(Format::Pocket, [brawlers(1), brawlers(101)]);
    table.session.register_replacement(
        ReplacementEffect::new(
            EffectCategory::Damage,
            Effect::new(900, "Cushion", EffectSpec::damage(10)),
        )
        .protecting(1)
        .with_uses(1),
    );

    let result = table.ok(0, ActionPayload::UseAttack { attack_index: 0 });
    assert_eq!(result.data.damage_dealt, 10);
    assert!(result.data.knocked_out.is_empty());
    assert_eq!(
        table.session.state().players[1]
            .active
            .as_ref()
            .map(|pokemon| pokemon.damage),
        Some(10)
    );
    let events = table.session.events();
    let replaced = events
        .iter()
        .filter(|event| matches!(event, GameEvent::EffectReplaced { .. }))
        .count();
    let dealt = events
        .iter()
        .filter(|event| matches!(event, GameEvent::DamageDealt { .. }))
        .count();
    assert_eq!(replaced, 1);
    assert_eq!(dealt, 1);
    assert!(table.session.effects().replacements().is_empty());
}

#[test]
fn bench_accepts_basics_up_to_the_format_limit() {
    let mut table = Table::new(Format::Pocket, [brawlers(1), brawlers(101)]);
    let limit = table.session.ruleset().bench_size;
    let hand = table.hand(0);
    for card_id in hand.iter().copied().take(limit) {
        table.ok(0, ActionPayload::PlayCard { card_id, target: None });
    }
    if let Some(extra) = hand.get(limit).copied() {
        let result = table.act(0, ActionPayload::PlayCard { card_id: extra, target: None });
        assert!(!result.success);
    }
    assert!(table.session.state().players[0].bench.len() <= limit);
}

#[test]
fn surrender_is_accepted_out_of_turn() {
    let mut table = Table::sample(Format::Classic);
    table.ok(1, ActionPayload::Surrender);
    let outcome = table.session.outcome().expect("game has an outcome");
    assert_eq!(outcome.winner, Some(0));
    assert_eq!(outcome.reason, VictoryReason::Surrender);
    assert_eq!(table.game_ended_events(), 1);
}

#[test]
fn configuration_is_frozen_while_running() {
    let mut table = Table::sample(Format::Classic);
    assert!(table.session.configure(SessionConfig::default()).is_err());
    assert!(table.session.end_game(None, VictoryReason::TimeLimit));
    assert!(table.session.configure(SessionConfig::default()).is_ok());
}
