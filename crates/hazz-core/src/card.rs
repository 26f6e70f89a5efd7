//! Card identity for the 40-card Spanish deck.
//!
//! Suits and ranks travel over the wire as their plain integer values
//! (suit `0..=3`, rank `1..=7 | 10..=12`), so both enums convert to and
//! from `u8` and serialize through that conversion.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Number of distinct cards in a full deck
pub const DECK_SIZE: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CardError {
    #[error("Invalid suit: {0}")]
    InvalidSuit(u8),

    #[error("Invalid rank: {0}")]
    InvalidRank(u8),
}

/// The four suits of the Spanish deck
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Suit {
    Coins,
    Cups,
    Swords,
    Clubs,
}

impl Suit {
    pub const ALL: [Suit; 4] = [Suit::Coins, Suit::Cups, Suit::Swords, Suit::Clubs];

    pub fn index(self) -> u8 {
        match self {
            Suit::Coins => 0,
            Suit::Cups => 1,
            Suit::Swords => 2,
            Suit::Clubs => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Suit::Coins => "Coins",
            Suit::Cups => "Cups",
            Suit::Swords => "Swords",
            Suit::Clubs => "Clubs",
        }
    }
}

impl TryFrom<u8> for Suit {
    type Error = CardError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Suit::ALL
            .get(value as usize)
            .copied()
            .ok_or(CardError::InvalidSuit(value))
    }
}

impl From<Suit> for u8 {
    fn from(suit: Suit) -> u8 {
        suit.index()
    }
}

impl fmt::Display for Suit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Card ranks. There are no 8s or 9s in this deck.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Rank {
    /// Skips the next player
    Ace,
    /// Adds two cards to the penalty stack
    Two,
    Three,
    Four,
    Five,
    Six,
    /// Lets the player choose the active suit
    Seven,
    Jack,
    Knight,
    King,
}

impl Rank {
    pub const ALL: [Rank; 10] = [
        Rank::Ace,
        Rank::Two,
        Rank::Three,
        Rank::Four,
        Rank::Five,
        Rank::Six,
        Rank::Seven,
        Rank::Jack,
        Rank::Knight,
        Rank::King,
    ];

    pub fn value(self) -> u8 {
        match self {
            Rank::Ace => 1,
            Rank::Two => 2,
            Rank::Three => 3,
            Rank::Four => 4,
            Rank::Five => 5,
            Rank::Six => 6,
            Rank::Seven => 7,
            Rank::Jack => 10,
            Rank::Knight => 11,
            Rank::King => 12,
        }
    }

    /// Position of this rank in [`Rank::ALL`]
    pub fn ordinal(self) -> usize {
        Rank::ALL.iter().position(|&r| r == self).unwrap_or(0)
    }

    /// Whether this rank carries a side effect when played
    pub fn is_special(self) -> bool {
        matches!(self, Rank::Ace | Rank::Two | Rank::Seven)
    }

    pub fn name(self) -> &'static str {
        match self {
            Rank::Ace => "Ace",
            Rank::Two => "Two",
            Rank::Three => "Three",
            Rank::Four => "Four",
            Rank::Five => "Five",
            Rank::Six => "Six",
            Rank::Seven => "Seven",
            Rank::Jack => "Jack",
            Rank::Knight => "Knight",
            Rank::King => "King",
        }
    }
}

impl TryFrom<u8> for Rank {
    type Error = CardError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Rank::ALL
            .iter()
            .copied()
            .find(|r| r.value() == value)
            .ok_or(CardError::InvalidRank(value))
    }
}

impl From<Rank> for u8 {
    fn from(rank: Rank) -> u8 {
        rank.value()
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single card. Equality is by (suit, rank).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Card {
    pub suit: Suit,
    pub rank: Rank,
}

impl Card {
    pub const fn new(suit: Suit, rank: Rank) -> Self {
        Self { suit, rank }
    }

    /// The canonical 40-card set, suit-major.
    pub fn full_set() -> Vec<Card> {
        let mut cards = Vec::with_capacity(DECK_SIZE);
        for suit in Suit::ALL {
            for rank in Rank::ALL {
                cards.push(Card::new(suit, rank));
            }
        }
        cards
    }
}

impl fmt::Display for Card {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} of {}", self.rank, self.suit)
    }
}
