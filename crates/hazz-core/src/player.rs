//! Per-player round state.

use crate::card::{Card, Suit};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Endpoint identity of a player. Identities are unique within a session.
pub type PlayerId = String;

/// A seat in the round rotation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerState {
    pub id: PlayerId,
    /// Hand in index order; `card_index` in a play action addresses this
    pub hand: Vec<Card>,
    /// Removed from the round without finishing (e.g. disconnected)
    pub eliminated: bool,
}

impl PlayerState {
    pub fn new(id: impl Into<PlayerId>) -> Self {
        Self {
            id: id.into(),
            hand: Vec::new(),
            eliminated: false,
        }
    }

    /// Still taking turns this round
    pub fn is_active(&self) -> bool {
        !self.eliminated && !self.hand.is_empty()
    }

    /// Emptied their hand
    pub fn is_finished(&self) -> bool {
        !self.eliminated && self.hand.is_empty()
    }

    pub fn hand_size(&self) -> usize {
        self.hand.len()
    }
}

/// The suit that appears most often among `cards`, lowest suit on ties.
pub fn most_common_suit(cards: &[Card]) -> Option<Suit> {
    let mut counts: HashMap<Suit, usize> = HashMap::new();
    for card in cards {
        *counts.entry(card.suit).or_insert(0) += 1;
    }

    Suit::ALL
        .into_iter()
        .filter(|s| counts.contains_key(s))
        .max_by(|a, b| counts[a].cmp(&counts[b]).then(b.cmp(a)))
}
