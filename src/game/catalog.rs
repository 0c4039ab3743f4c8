//! Built-in sample cards and ready-made decks, mainly for front-end
//! debugging and tests.

use super::effects::{CardFilter, EffectSpec};
use super::rules::Format;
use super::state::{Ability, Attack, Card, CardCategory, CardId, EnergyType, StatusCondition};

use EnergyType::{Colorless, Fighting, Fire, Grass, Lightning, Metal, Water};

pub fn charmander(id: CardId) -> Card {
    Card::pokemon(id, "Charmander", Fire, 60)
        .with_weakness(Water)
        .with_attack(Attack::new("Ember", vec![Fire], 30))
}

pub fn charmeleon(id: CardId) -> Card {
    Card::evolution(id, "Charmeleon", CardCategory::Stage1, "Charmander", Fire, 90)
        .with_weakness(Water)
        .with_retreat_cost(2)
        .with_attack(Attack::new("Flare", vec![Fire, Colorless], 50).inflicting(StatusCondition::Burned))
}

pub fn bulbasaur(id: CardId) -> Card {
    Card::pokemon(id, "Bulbasaur", Grass, 70)
        .with_weakness(Fire)
        .with_attack(Attack::new("Poison Powder", vec![Grass], 10).inflicting(StatusCondition::Poisoned))
}

pub fn squirtle(id: CardId) -> Card {
    Card::pokemon(id, "Squirtle", Water, 60)
        .with_weakness(Lightning)
        .with_attack(Attack::new("Water Gun", vec![Water, Colorless], 30))
}

pub fn pikachu(id: CardId) -> Card {
    Card::pokemon(id, "Pikachu", Lightning, 60)
        .with_weakness(Fighting)
        .with_resistance(Metal)
        .with_attack(
            Attack::new("Thunder Shock", vec![Lightning], 10).inflicting(StatusCondition::Paralyzed),
        )
        .with_attack(Attack::new("Quick Attack", vec![Lightning, Colorless], 40))
}

pub fn pikachu_ex(id: CardId) -> Card {
    Card::pokemon(id, "Pikachu ex", Lightning, 120)
        .with_weakness(Fighting)
        .as_ex()
        .with_attack(Attack::new("Circle Circuit", vec![Lightning, Lightning], 90))
}

pub fn chansey(id: CardId) -> Card {
    Card::pokemon(id, "Chansey", Colorless, 120)
        .with_weakness(Fighting)
        .with_retreat_cost(3)
        .with_ability(Ability {
            name: "Soft-Boiled".into(),
            effects: vec![EffectSpec::Heal { amount: 20 }],
        })
        .with_attack(Attack::new("Gentle Slap", vec![Colorless, Colorless, Colorless], 60))
}

pub fn potion(id: CardId) -> Card {
    Card::trainer(id, "Potion", CardCategory::Item, vec![EffectSpec::Heal { amount: 30 }])
}

pub fn poke_ball(id: CardId) -> Card {
    Card::trainer(
        id,
        "Poke Ball",
        CardCategory::Item,
        vec![EffectSpec::Search {
            filter: CardFilter {
                category: Some(CardCategory::Basic),
                energy_type: None,
            },
            count: 1,
        }],
    )
}

pub fn plus_power(id: CardId) -> Card {
    Card::trainer(id, "Plus Power", CardCategory::Item, vec![EffectSpec::DamageBonus { amount: 10, turns: 1 }])
}

pub fn defender(id: CardId) -> Card {
    Card::trainer(
        id,
        "Defender",
        CardCategory::Item,
        vec![EffectSpec::DamageReduction { amount: 20, turns: 1 }],
    )
}

pub fn professors_research(id: CardId) -> Card {
    Card::trainer(id, "Professor's Research", CardCategory::Supporter, vec![EffectSpec::Draw { count: 2 }])
}

pub fn full_heal(id: CardId) -> Card {
    Card::trainer(id, "Full Heal", CardCategory::Item, vec![EffectSpec::CureStatus])
}

type Template = fn(CardId) -> Card;

fn build(recipe: &[(Template, usize)], first_id: CardId) -> Vec<Card> {
    let mut next = first_id;
    let mut deck = Vec::new();
    for (template, copies) in recipe {
        for _ in 0..*copies {
            deck.push(template(next));
            next += 1;
        }
    }
    deck
}

fn fire_energy(id: CardId) -> Card {
    Card::energy(id, Fire)
}

fn lightning_energy(id: CardId) -> Card {
    Card::energy(id, Lightning)
}

fn grass_energy(id: CardId) -> Card {
    Card::energy(id, Grass)
}

fn water_energy(id: CardId) -> Card {
    Card::energy(id, Water)
}

/// A legal deck for `format` with ids `first_id..first_id + size`.
pub fn sample_deck(format: Format, first_id: CardId) -> Vec<Card> {
    match format {
        Format::Classic => build(
            &[
                (charmander, 4),
                (charmeleon, 3),
                (pikachu, 4),
                (bulbasaur, 4),
                (squirtle, 3),
                (chansey, 1),
                (potion, 4),
                (professors_research, 4),
                (poke_ball, 4),
                (defender, 2),
                (plus_power, 2),
                (full_heal, 2),
                (fire_energy, 10),
                (lightning_energy, 5),
                (grass_energy, 4),
                (water_energy, 4),
            ],
            first_id,
        ),
        Format::Pocket => build(
            &[
                (charmander, 2),
                (charmeleon, 2),
                (pikachu_ex, 2),
                (pikachu, 2),
                (bulbasaur, 2),
                (chansey, 1),
                (potion, 2),
                (professors_research, 2),
                (poke_ball, 2),
                (plus_power, 1),
                (defender, 1),
                (full_heal, 1),
            ],
            first_id,
        ),
    }
}
