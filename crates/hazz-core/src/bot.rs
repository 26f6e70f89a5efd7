//! Decision strategies for automated players.
//!
//! Every strategy is a function of the player's own [`RoundView`]; none of
//! them sees more than a remote client would. Three are provided:
//! - Random: any playable card, otherwise draw
//! - Frequency: the playable card whose rank and suit are most common in hand
//! - Table: a lookup table of action values keyed by an observation,
//!   falling back to Frequency for observations it has never seen

use crate::actions::GameAction;
use crate::card::{Card, Rank, Suit};
use crate::player::most_common_suit;
use crate::view::RoundView;
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Largest action index a policy table scores (hand positions plus draw)
pub const TABLE_ACTIONS: usize = 25;

/// Strategy variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Random,
    Frequency,
    Table,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown strategy: {0}")]
pub struct ParseStrategyError(String);

impl FromStr for StrategyKind {
    type Err = ParseStrategyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "random" => Ok(StrategyKind::Random),
            "frequency" | "heuristic" => Ok(StrategyKind::Frequency),
            "table" | "qtable" => Ok(StrategyKind::Table),
            other => Err(ParseStrategyError(other.to_string())),
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StrategyKind::Random => "random",
            StrategyKind::Frequency => "frequency",
            StrategyKind::Table => "table",
        };
        f.write_str(name)
    }
}

/// Something that can play a seat
pub trait Strategy: Send {
    fn kind(&self) -> StrategyKind;

    /// Pick a draw or a play for the current turn
    fn choose_action(&mut self, view: &RoundView) -> GameAction;

    /// Name the active suit after playing a Seven
    fn choose_suit(&mut self, view: &RoundView) -> Suit {
        most_common_suit(view.my_hand()).unwrap_or(view.active_suit)
    }
}

/// Build a boxed strategy of the given kind. `Table` without a table
/// behaves like `Frequency`.
pub fn build_strategy(
    kind: StrategyKind,
    seed: Option<u64>,
    table: Option<PolicyTable>,
) -> Box<dyn Strategy> {
    match kind {
        StrategyKind::Random => Box::new(match seed {
            Some(seed) => RandomStrategy::with_seed(seed),
            None => RandomStrategy::new(),
        }),
        StrategyKind::Frequency => Box::new(FrequencyStrategy),
        StrategyKind::Table => Box::new(TableStrategy::new(table.unwrap_or_default())),
    }
}

/// Plays a random playable card, draws when there is none
pub struct RandomStrategy {
    rng: StdRng,
}

impl RandomStrategy {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for RandomStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl Strategy for RandomStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Random
    }

    fn choose_action(&mut self, view: &RoundView) -> GameAction {
        match view.valid_card_indices.choose(&mut self.rng) {
            Some(&card_index) => GameAction::Play { card_index },
            None => GameAction::Draw,
        }
    }

    fn choose_suit(&mut self, _view: &RoundView) -> Suit {
        Suit::ALL.choose(&mut self.rng).copied().unwrap_or(Suit::Coins)
    }
}

/// Plays the card whose rank and suit show up most often in hand
#[derive(Debug, Clone, Copy, Default)]
pub struct FrequencyStrategy;

impl FrequencyStrategy {
    fn score(hand: &[Card], card: Card) -> usize {
        hand.iter().filter(|c| c.rank == card.rank).count()
            + hand.iter().filter(|c| c.suit == card.suit).count()
    }
}

impl Strategy for FrequencyStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Frequency
    }

    fn choose_action(&mut self, view: &RoundView) -> GameAction {
        let hand = view.my_hand();
        view.valid_card_indices
            .iter()
            .copied()
            .filter(|&i| i < hand.len())
            // Ties go to the lowest index.
            .max_by(|&a, &b| {
                Self::score(hand, hand[a])
                    .cmp(&Self::score(hand, hand[b]))
                    .then(b.cmp(&a))
            })
            .map(|card_index| GameAction::Play { card_index })
            .unwrap_or(GameAction::Draw)
    }
}

/// Action values per observation, as produced by offline training
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyTable {
    pub entries: HashMap<String, Vec<f32>>,
}

impl PolicyTable {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Key summarizing what a player sees: rank counts in hand, top card,
    /// penalty (capped at 10) and the first opponent's hand size (capped).
    pub fn observation_key(view: &RoundView) -> String {
        let mut rank_counts = vec![0usize; Rank::ALL.len()];
        for card in view.my_hand() {
            rank_counts[card.rank.ordinal()] += 1;
        }
        let counts: Vec<String> = rank_counts.iter().map(|n| n.to_string()).collect();

        let (top_rank, top_suit) = view
            .top_card
            .map(|c| (c.rank.ordinal(), c.suit.index()))
            .unwrap_or((0, 0));

        let opponent = view
            .opponents()
            .next()
            .map(|(_, &n)| n.min(TABLE_ACTIONS))
            .unwrap_or(0);

        format!(
            "{}|{}|{}|{}|{}",
            counts.join(","),
            top_rank,
            top_suit,
            view.penalty.min(10),
            opponent
        )
    }
}

/// Greedy lookup in a [`PolicyTable`]
pub struct TableStrategy {
    table: PolicyTable,
    fallback: FrequencyStrategy,
}

impl TableStrategy {
    pub fn new(table: PolicyTable) -> Self {
        Self {
            table,
            fallback: FrequencyStrategy,
        }
    }
}

impl Strategy for TableStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Table
    }

    fn choose_action(&mut self, view: &RoundView) -> GameAction {
        let key = PolicyTable::observation_key(view);
        let values = match self.table.entries.get(&key) {
            Some(values) => values,
            None => return self.fallback.choose_action(view),
        };

        // Action index == hand size means draw.
        let draw_index = view.my_hand().len();
        let value_of = |i: usize| values.get(i).copied().unwrap_or(f32::NEG_INFINITY);

        let best = view
            .valid_card_indices
            .iter()
            .copied()
            .chain(std::iter::once(draw_index))
            .max_by(|&a, &b| value_of(a).total_cmp(&value_of(b)).then(b.cmp(&a)));

        match best {
            Some(i) if i < draw_index => GameAction::Play { card_index: i },
            _ => GameAction::Draw,
        }
    }
}
