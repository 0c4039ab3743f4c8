use log::info;
use rand::rngs::SmallRng;

use super::{shared_victory, single_loser, EnergyRule, RuleHooks, RuleSet};
use crate::game::action::{ActionOutcome, ActionPayload, GameAction};
use crate::game::error::RuleError;
use crate::game::events::EventSink;
use crate::game::state::{
    AttachedEnergy, CardCategory, CardId, GameOutcome, GameState, PlayerId, Slot, VictoryReason,
};

/// 60-card format: prize cards, one energy card per turn, ×2 weakness and
/// flat resistance.
#[derive(Debug, Clone)]
pub struct ClassicRules {
    ruleset: RuleSet,
}

impl Default for ClassicRules {
    fn default() -> Self {
        Self::new()
    }
}

impl ClassicRules {
    pub fn new() -> Self {
        Self::with_ruleset(RuleSet::classic())
    }

    pub fn with_ruleset(ruleset: RuleSet) -> Self {
        Self { ruleset }
    }

    fn attach_limit(&self) -> u8 {
        match self.ruleset.energy {
            EnergyRule::Attachment { per_turn } => per_turn,
            EnergyRule::Zone { .. } => 0,
        }
    }
}

impl RuleHooks for ClassicRules {
    fn ruleset(&self) -> &RuleSet {
        &self.ruleset
    }

    fn on_game_started(&mut self, state: &mut GameState, _rng: &mut SmallRng, _sink: &mut dyn EventSink) {
        info!(
            "classic game started: {} players, {} prize cards each",
            state.players.len(),
            self.ruleset.prize_count
        );
    }

    fn on_game_finished(&mut self, state: &GameState, outcome: &GameOutcome) {
        let remaining: Vec<usize> = state.players.iter().map(|player| player.prizes.len()).collect();
        info!(
            "classic game finished: {:?} ({:?}), prizes remaining {:?}",
            outcome.winner, outcome.reason, remaining
        );
    }

    fn validate(&self, action: &GameAction, state: &GameState) -> Result<(), RuleError> {
        let player = state
            .player(action.player_id)
            .ok_or(RuleError::UnknownPlayer {
                player_id: action.player_id,
            })?;
        match &action.payload {
            ActionPayload::AttachEnergy { card_id, .. } => {
                if card_id.is_none() {
                    return Err(RuleError::WrongEnergySource {
                        expected: "an energy card in hand".into(),
                    });
                }
                if self.attach_limit() == 0 || player.flags.energy_attached {
                    return Err(RuleError::EnergyAlreadyAttached);
                }
                Ok(())
            }
            ActionPayload::UseAttack { .. } => {
                if !self.ruleset.first_turn_attack && state.turn.is_first_turn() {
                    return Err(RuleError::FirstTurnRestriction);
                }
                Ok(())
            }
            ActionPayload::PlayCard { card_id, .. } => {
                let supporter = player
                    .hand_card(*card_id)
                    .is_some_and(|card| card.category == CardCategory::Supporter);
                if supporter && state.turn.is_first_turn() {
                    return Err(RuleError::FirstTurnRestriction);
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn execute(
        &mut self,
        action: &GameAction,
        state: &mut GameState,
        _sink: &mut dyn EventSink,
    ) -> Option<Result<ActionOutcome, RuleError>> {
        let ActionPayload::AttachEnergy {
            card_id: Some(card_id),
            target,
        } = action.payload
        else {
            return None;
        };

        let result = attach_from_hand(state, action.player_id, card_id, target);
        if result.is_ok() {
            state.touch();
        }
        Some(result)
    }

    fn check_victory(&self, state: &GameState) -> Option<GameOutcome> {
        if self.ruleset.uses_prizes() {
            let exhausted = super::single_winner(state, VictoryReason::PrizesExhausted, |player| {
                player.prizes.is_empty() && player.stats.prizes_taken > 0
            });
            if exhausted.is_some() {
                return exhausted;
            }
        }
        shared_victory(state).or_else(|| {
            // Time-limited Classic games fall back to remaining prizes.
            let limit = self.ruleset.game_time_limit_ms?;
            if state.elapsed_ms < limit {
                return None;
            }
            let fewest = state.players.iter().map(|player| player.prizes.len()).min()?;
            single_loser(state, VictoryReason::TimeLimit, |player| player.prizes.len() > fewest)
                .or(Some(GameOutcome {
                    winner: None,
                    reason: VictoryReason::TimeLimit,
                }))
        })
    }
}

fn attach_from_hand(
    state: &mut GameState,
    player_id: PlayerId,
    card_id: CardId,
    target: Slot,
) -> Result<ActionOutcome, RuleError> {
    let player = state
        .player_mut(player_id)
        .ok_or(RuleError::UnknownPlayer { player_id })?;
    if player.pokemon(target).is_none() {
        return Err(RuleError::InvalidSlot);
    }
    let card = player
        .take_from_hand(card_id)
        .ok_or(RuleError::CardNotInHand { card_id })?;
    let energy_type = card.energy_type;
    if let Some(pokemon) = player.pokemon_mut(target) {
        pokemon.attached.push(AttachedEnergy {
            energy_type,
            card: Some(card),
        });
    }
    player.flags.energy_attached = true;
    player.stats.energy_attached += 1;
    Ok(ActionOutcome::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::events::EventBuffer;
    use crate::game::state::{Card, EnergyType, Player, PokemonInPlay};

    fn state_with_energy_in_hand() -> GameState {
        let mut player = Player::new(0, Vec::new());
        player.active = Some(PokemonInPlay::new(Card::pokemon(1, "Charmander", EnergyType::Fire, 60), 0));
        player.hand.push(Card::energy(2, EnergyType::Fire));
        player.hand.push(Card::energy(3, EnergyType::Fire));
        let mut opponent = Player::new(1, Vec::new());
        opponent.active = Some(PokemonInPlay::new(Card::pokemon(10, "Bulbasaur", EnergyType::Grass, 70), 0));
        let mut state = GameState::new(vec![player, opponent], RuleSet::classic());
        state.turn.order = vec![0, 1];
        state.turn.turns_taken = 2;
        state
    }

    fn attach(card_id: Option<u32>) -> GameAction {
        GameAction::new(
            1,
            0,
            0,
            ActionPayload::AttachEnergy {
                card_id,
                target: Slot::Active,
            },
        )
    }

    #[test]
    fn one_energy_card_per_turn() {
        let mut rules = ClassicRules::new();
        let mut state = state_with_energy_in_hand();
        let mut sink = EventBuffer::default();

        assert_eq!(rules.validate(&attach(Some(2)), &state), Ok(()));
        let outcome = rules.execute(&attach(Some(2)), &mut state, &mut sink);
        assert!(matches!(outcome, Some(Ok(_))));
        assert_eq!(
            state.players[0].active.as_ref().map(|pokemon| pokemon.attached.len()),
            Some(1)
        );
        assert_eq!(
            rules.validate(&attach(Some(3)), &state),
            Err(RuleError::EnergyAlreadyAttached)
        );
    }

    #[test]
    fn energy_zone_attachment_is_rejected() {
        let rules = ClassicRules::new();
        let state = state_with_energy_in_hand();
        assert!(matches!(
            rules.validate(&attach(None), &state),
            Err(RuleError::WrongEnergySource { .. })
        ));
    }

    #[test]
    fn first_player_cannot_attack_on_turn_one() {
        let rules = ClassicRules::new();
        let mut state = state_with_energy_in_hand();
        state.turn.turns_taken = 0;
        let attack = GameAction::new(2, 0, 0, ActionPayload::UseAttack { attack_index: 0 });
        assert_eq!(rules.validate(&attack, &state), Err(RuleError::FirstTurnRestriction));
    }

    #[test]
    fn taking_the_last_prize_wins() {
        let rules = ClassicRules::new();
        let mut state = state_with_energy_in_hand();
        state.players[0].stats.prizes_taken = 6;
        state.players[1].prizes.push(Card::energy(50, EnergyType::Water));
        let outcome = rules.check_victory(&state).expect("prizes exhausted");
        assert_eq!(outcome.winner, Some(0));
        assert_eq!(outcome.reason, VictoryReason::PrizesExhausted);
    }
}
