//! Draw and discard piles.
//!
//! Both piles are stored bottom-first, so the top card of either pile is
//! the last element. The deck owns its random source; seeding it makes a
//! whole round reproducible.

use crate::card::Card;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Result of a draw request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Drawn {
    /// Cards handed out, in draw order
    pub cards: Vec<Card>,
    /// Cards moved from the discard pile during this draw (0 if no recycle happened)
    pub recycled: usize,
}

impl Drawn {
    /// Whether fewer cards were available than requested
    pub fn is_short(&self, requested: usize) -> bool {
        self.cards.len() < requested
    }
}

#[derive(Debug, Clone)]
pub struct Deck {
    draw_pile: Vec<Card>,
    discard_pile: Vec<Card>,
    rng: StdRng,
}

impl Deck {
    /// Build the full 40-card set and shuffle it into the draw pile.
    pub fn new(mut rng: StdRng) -> Self {
        let mut draw_pile = Card::full_set();
        draw_pile.shuffle(&mut rng);
        Self {
            draw_pile,
            discard_pile: Vec::new(),
            rng,
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self::new(StdRng::seed_from_u64(seed))
    }

    /// Build a deck from explicit piles (both bottom-first). Used to set up
    /// exact scenarios.
    pub fn from_piles(draw_pile: Vec<Card>, discard_pile: Vec<Card>, rng: StdRng) -> Self {
        Self {
            draw_pile,
            discard_pile,
            rng,
        }
    }

    pub fn draw_pile_len(&self) -> usize {
        self.draw_pile.len()
    }

    pub fn discard_pile_len(&self) -> usize {
        self.discard_pile.len()
    }

    /// The visible top of the discard pile
    pub fn top(&self) -> Option<Card> {
        self.discard_pile.last().copied()
    }

    /// Every card held by the deck, draw pile first.
    pub fn cards(&self) -> impl Iterator<Item = &Card> {
        self.draw_pile.iter().chain(self.discard_pile.iter())
    }

    /// Remove up to `n` cards from the top of the draw pile, recycling the
    /// discard pile first if the draw pile runs short. Never fails: when
    /// not enough cards exist anywhere the result is truncated.
    pub fn draw(&mut self, n: usize) -> Drawn {
        let mut drawn = Drawn::default();
        if self.draw_pile.len() < n {
            drawn.recycled = self.recycle();
        }

        let take = n.min(self.draw_pile.len());
        let split_at = self.draw_pile.len() - take;
        drawn.cards = self.draw_pile.split_off(split_at);
        drawn.cards.reverse();
        drawn
    }

    /// Move every discard except the visible top into the draw pile and
    /// shuffle them in. Returns how many cards moved.
    pub fn recycle(&mut self) -> usize {
        if self.discard_pile.len() < 2 {
            return 0;
        }

        let top_index = self.discard_pile.len() - 1;
        let mut buried: Vec<Card> = self.discard_pile.drain(..top_index).collect();
        let moved = buried.len();

        // Recycled cards go underneath whatever is still in the draw pile.
        buried.shuffle(&mut self.rng);
        buried.append(&mut self.draw_pile);
        self.draw_pile = buried;

        moved
    }

    /// Put a card on top of the discard pile, burying the previous top.
    pub fn play(&mut self, card: Card) {
        self.discard_pile.push(card);
    }

    /// Flip the opening card of a round onto the discard pile. A special
    /// card (Ace, Two, Seven) goes back into the pile, which is reshuffled
    /// before flipping again. If only special cards are left, the first
    /// flip stands.
    pub fn flip_opening(&mut self) -> Option<Card> {
        let has_plain = self.draw_pile.iter().any(|c| !c.rank.is_special());

        loop {
            let card = self.draw_pile.pop()?;
            if !has_plain || !card.rank.is_special() {
                self.discard_pile.push(card);
                return Some(card);
            }
            self.draw_pile.push(card);
            self.draw_pile.shuffle(&mut self.rng);
        }
    }

    /// Place cards at the bottom of the draw pile.
    pub fn return_to_bottom(&mut self, cards: Vec<Card>) {
        self.draw_pile.splice(0..0, cards);
    }

    /// Shuffle an arbitrary slice with the deck's random source.
    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        items.shuffle(&mut self.rng);
    }
}
