use log::{debug, info};
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;

use super::{leader_by_points, shared_victory, single_loser, single_winner, EnergyRule, RuleHooks, RuleSet};
use crate::game::action::{ActionOutcome, ActionPayload, GameAction};
use crate::game::error::RuleError;
use crate::game::events::EventSink;
use crate::game::state::{AttachedEnergy, EnergyType, GameOutcome, GameState, Player, VictoryReason};

/// 20-card format: points instead of prizes and an energy zone that fills
/// once per turn.
#[derive(Debug, Clone)]
pub struct PocketRules {
    ruleset: RuleSet,
}

impl Default for PocketRules {
    fn default() -> Self {
        Self::new()
    }
}

impl PocketRules {
    pub fn new() -> Self {
        Self::with_ruleset(RuleSet::pocket())
    }

    pub fn with_ruleset(ruleset: RuleSet) -> Self {
        Self { ruleset }
    }

    fn zone(&self) -> Option<(u8, bool, u8)> {
        match self.ruleset.energy {
            EnergyRule::Zone {
                per_turn,
                skip_first_turn,
                cap,
            } => Some((per_turn, skip_first_turn, cap)),
            EnergyRule::Attachment { .. } => None,
        }
    }
}

/// Energy types the zone can generate: the types of the Pokemon in the deck.
fn zone_types(player: &Player) -> Vec<EnergyType> {
    let mut types: Vec<EnergyType> = player
        .deck
        .iter()
        .chain(player.hand.iter())
        .chain(player.active.iter().map(|pokemon| &pokemon.card))
        .chain(player.bench.iter().map(|pokemon| &pokemon.card))
        .filter(|card| card.category.is_pokemon() && card.energy_type != EnergyType::Colorless)
        .map(|card| card.energy_type)
        .collect();
    types.sort();
    types.dedup();
    if types.is_empty() {
        types.push(EnergyType::Colorless);
    }
    types
}

impl RuleHooks for PocketRules {
    fn ruleset(&self) -> &RuleSet {
        &self.ruleset
    }

    fn on_game_started(&mut self, state: &mut GameState, rng: &mut SmallRng, _sink: &mut dyn EventSink) {
        let time_bank = self.ruleset.time_bank_ms;
        for player in &mut state.players {
            player.energy_types = zone_types(player);
            player.energy_budget = 0;
            player.next_energy = player.energy_types.choose(rng).copied();
            player.time_bank_ms = time_bank;
        }
        info!(
            "pocket game started: {} players, {} points to win",
            state.players.len(),
            self.ruleset.points_to_win
        );
    }

    fn on_game_finished(&mut self, state: &GameState, outcome: &GameOutcome) {
        let points: Vec<u8> = state.players.iter().map(|player| player.points).collect();
        info!(
            "pocket game finished: {:?} ({:?}), points {:?}",
            outcome.winner, outcome.reason, points
        );
    }

    fn on_turn_started(&mut self, state: &mut GameState, rng: &mut SmallRng, _sink: &mut dyn EventSink) {
        let Some((per_turn, skip_first_turn, cap)) = self.zone() else {
            return;
        };
        if skip_first_turn && state.turn.is_first_turn() {
            debug!("energy zone skipped on the first turn");
            return;
        }
        let current = state.current_player();
        if let Some(player) = state.player_mut(current) {
            player.energy_budget = player.energy_budget.saturating_add(per_turn).min(cap);
            if player.next_energy.is_none() {
                player.next_energy = player.energy_types.choose(rng).copied();
            }
            debug!(
                "player {} energy zone holds {} ({:?})",
                current, player.energy_budget, player.next_energy
            );
        }
    }

    fn validate(&self, action: &GameAction, state: &GameState) -> Result<(), RuleError> {
        let ActionPayload::AttachEnergy { card_id, .. } = &action.payload else {
            return Ok(());
        };
        if card_id.is_some() {
            return Err(RuleError::WrongEnergySource {
                expected: "the energy zone".into(),
            });
        }
        let Some((_, skip_first_turn, _)) = self.zone() else {
            return Err(RuleError::NoEnergyAvailable);
        };
        if skip_first_turn && state.turn.is_first_turn() {
            return Err(RuleError::FirstTurnRestriction);
        }
        let player = state
            .player(action.player_id)
            .ok_or(RuleError::UnknownPlayer {
                player_id: action.player_id,
            })?;
        if player.energy_budget == 0 {
            return Err(RuleError::NoEnergyAvailable);
        }
        Ok(())
    }

    fn execute(
        &mut self,
        action: &GameAction,
        state: &mut GameState,
        _sink: &mut dyn EventSink,
    ) -> Option<Result<ActionOutcome, RuleError>> {
        let ActionPayload::AttachEnergy { card_id: None, target } = action.payload else {
            return None;
        };
        let player_id = action.player_id;
        let Some(player) = state.player_mut(player_id) else {
            return Some(Err(RuleError::UnknownPlayer { player_id }));
        };
        if player.energy_budget == 0 {
            return Some(Err(RuleError::NoEnergyAvailable));
        }
        if player.pokemon(target).is_none() {
            return Some(Err(RuleError::InvalidSlot));
        }
        let energy_type = player.next_energy.take().unwrap_or(EnergyType::Colorless);
        if let Some(pokemon) = player.pokemon_mut(target) {
            pokemon.attached.push(AttachedEnergy {
                energy_type,
                card: None,
            });
        }
        player.energy_budget -= 1;
        player.flags.energy_attached = true;
        player.stats.energy_attached += 1;
        state.touch();
        Some(Ok(ActionOutcome::default()))
    }

    fn check_victory(&self, state: &GameState) -> Option<GameOutcome> {
        let target = self.ruleset.points_to_win;
        if target > 0 {
            let reached = single_winner(state, VictoryReason::PointTarget, |player| player.points >= target);
            if reached.is_some() {
                return reached;
            }
        }
        if let Some(outcome) = shared_victory(state) {
            return Some(outcome);
        }
        if let Some(limit) = self.ruleset.game_time_limit_ms {
            if state.elapsed_ms >= limit {
                return Some(GameOutcome {
                    winner: leader_by_points(state),
                    reason: VictoryReason::TimeLimit,
                });
            }
        }
        single_loser(state, VictoryReason::TimeLimit, |player| player.time_bank_ms == Some(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::events::EventBuffer;
    use crate::game::state::{Card, PokemonInPlay, Slot};
    use rand::SeedableRng;

    fn board() -> GameState {
        let mut state = GameState::new(
            vec![
                Player::new(0, vec![Card::pokemon(5, "Pikachu", EnergyType::Lightning, 60)]),
                Player::new(1, vec![Card::pokemon(6, "Squirtle", EnergyType::Water, 60)]),
            ],
            RuleSet::pocket(),
        );
        for player in &mut state.players {
            let id = player.id as u32 + 1;
            player.active = Some(PokemonInPlay::new(Card::pokemon(id, "Eevee", EnergyType::Colorless, 60), 0));
        }
        state.turn.order = vec![0, 1];
        state
    }

    fn attach_from_zone() -> GameAction {
        GameAction::new(
            1,
            0,
            0,
            ActionPayload::AttachEnergy {
                card_id: None,
                target: Slot::Active,
            },
        )
    }

    #[test]
    fn zone_is_empty_on_the_first_turn() {
        let mut rules = PocketRules::new();
        let mut state = board();
        let mut rng = SmallRng::seed_from_u64(7);
        let mut sink = EventBuffer::default();
        rules.on_game_started(&mut state, &mut rng, &mut sink);
        rules.on_turn_started(&mut state, &mut rng, &mut sink);
        assert_eq!(state.players[0].energy_budget, 0);
        assert_eq!(
            rules.validate(&attach_from_zone(), &state),
            Err(RuleError::FirstTurnRestriction)
        );
    }

    #[test]
    fn zone_energy_is_attached_and_capped() {
        let mut rules = PocketRules::new();
        let mut state = board();
        let mut rng = SmallRng::seed_from_u64(7);
        let mut sink = EventBuffer::default();
        rules.on_game_started(&mut state, &mut rng, &mut sink);
        assert_eq!(state.players[0].energy_types, vec![EnergyType::Lightning]);

        state.turn.turns_taken = 2;
        rules.on_turn_started(&mut state, &mut rng, &mut sink);
        rules.on_turn_started(&mut state, &mut rng, &mut sink);
        assert_eq!(state.players[0].energy_budget, 1);

        assert_eq!(rules.validate(&attach_from_zone(), &state), Ok(()));
        let outcome = rules.execute(&attach_from_zone(), &mut state, &mut sink);
        assert!(matches!(outcome, Some(Ok(_))));
        let attached = state.players[0]
            .active
            .as_ref()
            .map(|pokemon| pokemon.energy_types())
            .unwrap_or_default();
        assert_eq!(attached, vec![EnergyType::Lightning]);
        assert_eq!(
            rules.validate(&attach_from_zone(), &state),
            Err(RuleError::NoEnergyAvailable)
        );
    }

    #[test]
    fn energy_cards_are_not_attachable() {
        let rules = PocketRules::new();
        let state = board();
        let action = GameAction::new(
            1,
            0,
            0,
            ActionPayload::AttachEnergy {
                card_id: Some(9),
                target: Slot::Active,
            },
        );
        assert!(matches!(
            rules.validate(&action, &state),
            Err(RuleError::WrongEnergySource { .. })
        ));
    }

    #[test]
    fn three_points_win() {
        let rules = PocketRules::new();
        let mut state = board();
        state.players[1].points = 3;
        let outcome = rules.check_victory(&state).expect("point target reached");
        assert_eq!(outcome.winner, Some(1));
        assert_eq!(outcome.reason, VictoryReason::PointTarget);
    }

    #[test]
    fn time_limit_goes_to_the_higher_score() {
        let rules = PocketRules::with_ruleset(RuleSet::pocket().with_time_limit(60_000, None));
        let mut state = board();
        state.players[0].points = 2;
        state.players[1].points = 1;
        state.elapsed_ms = 60_000;
        let outcome = rules.check_victory(&state).expect("time limit");
        assert_eq!(outcome.winner, Some(0));
        assert_eq!(outcome.reason, VictoryReason::TimeLimit);

        state.players[1].points = 2;
        let tied = rules.check_victory(&state).expect("time limit");
        assert_eq!(tied.winner, None);
    }

    #[test]
    fn empty_time_bank_loses() {
        let rules = PocketRules::new();
        let mut state = board();
        state.players[0].time_bank_ms = Some(0);
        state.players[1].time_bank_ms = Some(1_000);
        let outcome = rules.check_victory(&state).expect("time bank exhausted");
        assert_eq!(outcome.winner, Some(1));
        assert_eq!(outcome.reason, VictoryReason::TimeLimit);
    }
}
