//! Core round state machine.
//!
//! This module contains `RoundState` and all rule enforcement for a single
//! round: playability, the penalty stack, skips, suit choice, finishing and
//! turn advancement. A rejected action never touches the state; every check
//! runs before the first mutation.

use crate::actions::{GameAction, GameEvent};
use crate::card::{Card, Rank, Suit, DECK_SIZE};
use crate::deck::Deck;
use crate::player::{PlayerId, PlayerState};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// Cards dealt to each player when a round opens
pub const DEFAULT_HAND_SIZE: usize = 4;

/// Turns after which a round is called void
pub const DEFAULT_TURN_LIMIT: u32 = 300;

/// Cards added to the penalty stack by each Two
pub const PENALTY_PER_TWO: u32 = 2;

pub const MIN_PLAYERS: usize = 2;

/// Per-round tunables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundConfig {
    pub hand_size: usize,
    pub turn_limit: u32,
}

impl Default for RoundConfig {
    fn default() -> Self {
        Self {
            hand_size: DEFAULT_HAND_SIZE,
            turn_limit: DEFAULT_TURN_LIMIT,
        }
    }
}

/// Cards still held by a player when a round was cut off
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandCount {
    pub player: PlayerId,
    pub cards: usize,
}

/// How a round ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RoundOutcome {
    /// Played out. The last entry of `finish_order` is the loser.
    /// Eliminated players do not appear.
    Finished { finish_order: Vec<PlayerId> },

    /// Cut off at the turn limit
    Void {
        /// Players who emptied their hands before the cutoff
        finish_order: Vec<PlayerId>,
        /// Players still holding cards, in rotation order
        remaining: Vec<HandCount>,
        /// Players removed from the round, most recent first
        eliminated: Vec<PlayerId>,
    },
}

impl RoundOutcome {
    pub fn finish_order(&self) -> &[PlayerId] {
        match self {
            RoundOutcome::Finished { finish_order } | RoundOutcome::Void { finish_order, .. } => {
                finish_order
            }
        }
    }

    pub fn is_void(&self) -> bool {
        matches!(self, RoundOutcome::Void { .. })
    }

    pub fn winner(&self) -> Option<&str> {
        match self {
            RoundOutcome::Finished { finish_order } => finish_order.first().map(String::as_str),
            RoundOutcome::Void { .. } => None,
        }
    }

    pub fn loser(&self) -> Option<&str> {
        match self {
            RoundOutcome::Finished { finish_order } => finish_order.last().map(String::as_str),
            RoundOutcome::Void { .. } => None,
        }
    }
}

/// Round phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum RoundPhase {
    /// The current player must draw or play
    AwaitingAction,

    /// A Seven was played; only its player may act, and only to name a suit
    AwaitingSuitChoice { player: PlayerId },

    /// Round is over
    Complete { outcome: RoundOutcome },
}

/// Reasons an action is rejected
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum GameError {
    #[error("Not your turn")]
    NotYourTurn,

    #[error("A penalty of {penalty} cards is pending: play a Two or draw")]
    MustPlayPenaltyCardOrDraw { penalty: u32 },

    #[error("{card} matches neither the top card's rank nor the active suit")]
    CardNotPlayable { card: Card },

    #[error("Card index {index} is out of range for a hand of {hand_size}")]
    InvalidCardIndex { index: usize, hand_size: usize },

    #[error("Choose a suit for your Seven first")]
    SuitChoicePending,

    #[error("No suit choice is pending")]
    NoSuitChoicePending,

    #[error("The round is over")]
    RoundOver,

    #[error("Player is not active in this round")]
    NotInRound,
}

impl GameError {
    /// Stable wire code
    pub fn code(&self) -> &'static str {
        match self {
            GameError::NotYourTurn => "not_your_turn",
            GameError::MustPlayPenaltyCardOrDraw { .. } => "must_play_penalty_card_or_draw",
            GameError::CardNotPlayable { .. } => "card_not_playable",
            GameError::InvalidCardIndex { .. } => "invalid_card_index",
            GameError::SuitChoicePending => "suit_choice_pending",
            GameError::NoSuitChoicePending => "no_suit_choice_pending",
            GameError::RoundOver => "round_over",
            GameError::NotInRound => "not_in_round",
        }
    }
}

/// Errors opening a round
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SetupError {
    #[error("Need at least 2 players, got {0}")]
    TooFewPlayers(usize),

    #[error("{players} players with {hand_size} cards each do not fit in the deck")]
    TooManyPlayers { players: usize, hand_size: usize },

    #[error("Duplicate player: {0}")]
    DuplicatePlayer(PlayerId),
}

/// The complete state of one round
#[derive(Debug, Clone)]
pub struct RoundState {
    /// Round number within the session (starts at 1)
    round: u32,
    deck: Deck,
    /// Seats in rotation order
    players: Vec<PlayerState>,
    /// Suit plays are matched against
    active_suit: Suit,
    /// Cards the current player must draw unless they play a Two
    penalty: u32,
    /// Seat whose turn it is
    current: usize,
    turn_count: u32,
    turn_limit: u32,
    finish_order: Vec<PlayerId>,
    /// Removed players, in removal order
    eliminated: Vec<PlayerId>,
    phase: RoundPhase,
    opening_card: Option<Card>,
    /// Cards in play this round; fixed for the life of the round
    card_total: usize,
}

impl RoundState {
    /// Open a round: shuffle the rotation, deal, and flip the opening card.
    pub fn start(
        round: u32,
        players: Vec<PlayerId>,
        config: &RoundConfig,
        rng: StdRng,
    ) -> Result<Self, SetupError> {
        if players.len() < MIN_PLAYERS {
            return Err(SetupError::TooFewPlayers(players.len()));
        }

        let mut seen = HashSet::new();
        for id in &players {
            if !seen.insert(id.as_str()) {
                return Err(SetupError::DuplicatePlayer(id.clone()));
            }
        }

        let too_many = SetupError::TooManyPlayers {
            players: players.len(),
            hand_size: config.hand_size,
        };
        if players.len() * config.hand_size >= DECK_SIZE {
            return Err(too_many);
        }

        let mut deck = Deck::new(rng);
        let mut order = players;
        deck.shuffle(&mut order);

        let mut seats: Vec<PlayerState> = order.into_iter().map(PlayerState::new).collect();
        for _ in 0..config.hand_size {
            for seat in seats.iter_mut() {
                seat.hand.extend(deck.draw(1).cards);
            }
        }

        let opening = deck.flip_opening().ok_or(too_many)?;

        Ok(Self {
            round,
            deck,
            players: seats,
            active_suit: opening.suit,
            penalty: 0,
            current: 0,
            turn_count: 0,
            turn_limit: config.turn_limit,
            finish_order: Vec::new(),
            eliminated: Vec::new(),
            phase: RoundPhase::AwaitingAction,
            opening_card: Some(opening),
            card_total: DECK_SIZE,
        })
    }

    /// Assemble a round from an explicit layout. The first seat is to act.
    /// The active suit follows the top of the discard pile.
    pub fn from_parts(round: u32, players: Vec<PlayerState>, deck: Deck, turn_limit: u32) -> Self {
        let top = deck.top();
        let card_total =
            deck.cards().count() + players.iter().map(|p| p.hand.len()).sum::<usize>();

        Self {
            round,
            active_suit: top.map(|c| c.suit).unwrap_or(Suit::Coins),
            deck,
            players,
            penalty: 0,
            current: 0,
            turn_count: 0,
            turn_limit,
            finish_order: Vec::new(),
            eliminated: Vec::new(),
            phase: RoundPhase::AwaitingAction,
            opening_card: top,
            card_total,
        }
    }

    // ==================== Queries ====================

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn phase(&self) -> &RoundPhase {
        &self.phase
    }

    pub fn players(&self) -> &[PlayerState] {
        &self.players
    }

    pub fn player(&self, id: &str) -> Option<&PlayerState> {
        self.players.iter().find(|p| p.id == id)
    }

    /// Whether `id` holds a seat in this round (finished or not)
    pub fn has_player(&self, id: &str) -> bool {
        self.player(id).is_some()
    }

    pub fn current_player(&self) -> &str {
        &self.players[self.current].id
    }

    /// The only identity whose next message can change the round
    pub fn required_sender(&self) -> Option<&str> {
        match &self.phase {
            RoundPhase::AwaitingAction => Some(self.current_player()),
            RoundPhase::AwaitingSuitChoice { player } => Some(player.as_str()),
            RoundPhase::Complete { .. } => None,
        }
    }

    pub fn top_card(&self) -> Option<Card> {
        self.deck.top()
    }

    pub fn active_suit(&self) -> Suit {
        self.active_suit
    }

    pub fn penalty(&self) -> u32 {
        self.penalty
    }

    pub fn turn_count(&self) -> u32 {
        self.turn_count
    }

    pub fn finish_order(&self) -> &[PlayerId] {
        &self.finish_order
    }

    pub fn deck(&self) -> &Deck {
        &self.deck
    }

    pub fn turn_order(&self) -> Vec<PlayerId> {
        self.players.iter().map(|p| p.id.clone()).collect()
    }

    pub fn active_players(&self) -> Vec<PlayerId> {
        self.players
            .iter()
            .filter(|p| p.is_active())
            .map(|p| p.id.clone())
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.phase, RoundPhase::Complete { .. })
    }

    pub fn outcome(&self) -> Option<&RoundOutcome> {
        match &self.phase {
            RoundPhase::Complete { outcome } => Some(outcome),
            _ => None,
        }
    }

    /// The event announcing this round to the table
    pub fn opening_event(&self) -> Option<GameEvent> {
        self.opening_card.map(|opening_card| GameEvent::RoundStarted {
            round: self.round,
            turn_order: self.turn_order(),
            opening_card,
        })
    }

    /// Whether `card` could be played right now
    pub fn is_playable(&self, card: Card) -> bool {
        if self.penalty > 0 {
            return card.rank == Rank::Two;
        }
        match self.deck.top() {
            Some(top) => card.rank == top.rank || card.suit == self.active_suit,
            None => true,
        }
    }

    /// Indices of `player`'s hand that are playable right now
    pub fn valid_card_indices(&self, player: &str) -> Vec<usize> {
        if !matches!(self.phase, RoundPhase::AwaitingAction) {
            return Vec::new();
        }
        self.player(player)
            .map(|p| {
                p.hand
                    .iter()
                    .enumerate()
                    .filter(|(_, c)| self.is_playable(**c))
                    .map(|(i, _)| i)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every card is accounted for exactly once across the piles and hands.
    pub fn check_conservation(&self) -> bool {
        let all: Vec<Card> = self
            .deck
            .cards()
            .copied()
            .chain(self.players.iter().flat_map(|p| p.hand.iter().copied()))
            .collect();
        let unique: HashSet<Card> = all.iter().copied().collect();
        all.len() == self.card_total && unique.len() == all.len()
    }

    // ==================== Actions ====================

    /// Apply an action from `player`
    pub fn apply_action(
        &mut self,
        player: &str,
        action: GameAction,
    ) -> Result<Vec<GameEvent>, GameError> {
        let chooser = match &self.phase {
            RoundPhase::Complete { .. } => return Err(GameError::RoundOver),
            RoundPhase::AwaitingSuitChoice { player: chooser } => Some(chooser.clone()),
            RoundPhase::AwaitingAction => None,
        };

        if let Some(chooser) = chooser {
            if player != chooser {
                return Err(GameError::NotYourTurn);
            }
            let events = match action {
                GameAction::ChooseSuit { suit } => self.choose_suit(chooser, suit),
                _ => return Err(GameError::SuitChoicePending),
            };
            self.debug_check_conservation();
            return Ok(events);
        }

        if player != self.current_player() {
            return Err(GameError::NotYourTurn);
        }

        let events = match action {
            GameAction::Draw => self.draw_for_current(),
            GameAction::Play { card_index } => {
                self.validate_play(card_index)?;
                self.play_from_current(card_index)
            }
            GameAction::ChooseSuit { .. } => return Err(GameError::NoSuitChoicePending),
        };

        self.debug_check_conservation();
        Ok(events)
    }

    /// Take `player` out of the round. Their hand goes to the bottom of the
    /// draw pile and the turn moves on if it was theirs.
    pub fn eliminate(&mut self, player: &str) -> Result<Vec<GameEvent>, GameError> {
        if self.is_complete() {
            return Err(GameError::RoundOver);
        }

        let seat = self
            .players
            .iter()
            .position(|p| p.id == player && p.is_active())
            .ok_or(GameError::NotInRound)?;

        let hand = std::mem::take(&mut self.players[seat].hand);
        self.players[seat].eliminated = true;
        self.deck.return_to_bottom(hand);
        self.eliminated.push(player.to_string());

        let mut events = vec![GameEvent::PlayerEliminated {
            player: player.to_string(),
        }];

        if matches!(&self.phase, RoundPhase::AwaitingSuitChoice { player: p } if p == player) {
            self.phase = RoundPhase::AwaitingAction;
        }

        if self.active_count() <= 1 {
            events.extend(self.complete_finished());
        } else if seat == self.current {
            self.current = self.next_active_after(seat);
        }

        self.debug_check_conservation();
        Ok(events)
    }

    // ==================== Helper Methods ====================

    fn validate_play(&self, card_index: usize) -> Result<(), GameError> {
        let hand = &self.players[self.current].hand;
        let card = *hand.get(card_index).ok_or(GameError::InvalidCardIndex {
            index: card_index,
            hand_size: hand.len(),
        })?;

        if self.penalty > 0 {
            if card.rank != Rank::Two {
                return Err(GameError::MustPlayPenaltyCardOrDraw {
                    penalty: self.penalty,
                });
            }
            return Ok(());
        }

        if !self.is_playable(card) {
            return Err(GameError::CardNotPlayable { card });
        }

        Ok(())
    }

    fn draw_for_current(&mut self) -> Vec<GameEvent> {
        let under_penalty = self.penalty > 0;
        let requested = if under_penalty {
            self.penalty as usize
        } else {
            1
        };

        let drawn = self.deck.draw(requested);
        let mut events = Vec::new();
        if drawn.recycled > 0 {
            events.push(GameEvent::PileRecycled {
                cards: drawn.recycled,
            });
        }

        let seat = &mut self.players[self.current];
        seat.hand.extend(drawn.cards.iter().copied());
        events.push(GameEvent::CardsDrawn {
            player: seat.id.clone(),
            count: drawn.cards.len(),
            penalty: under_penalty,
            cards: Some(drawn.cards),
        });

        self.penalty = 0;
        events.extend(self.end_turn(false));
        events
    }

    fn play_from_current(&mut self, card_index: usize) -> Vec<GameEvent> {
        let seat = &mut self.players[self.current];
        let card = seat.hand.remove(card_index);
        let player = seat.id.clone();
        let cards_left = seat.hand.len();

        self.deck.play(card);
        self.active_suit = card.suit;

        let mut events = vec![GameEvent::CardPlayed {
            player: player.clone(),
            card,
            cards_left,
        }];

        if cards_left == 0 {
            self.finish_order.push(player.clone());
            events.push(GameEvent::PlayerFinished {
                player: player.clone(),
                position: self.finish_order.len(),
            });
        }

        match card.rank {
            Rank::Two => {
                self.penalty += PENALTY_PER_TWO;
                events.push(GameEvent::PenaltyStacked {
                    total: self.penalty,
                });
                events.extend(self.end_turn(false));
            }
            // A Seven that empties the hand keeps its own suit.
            Rank::Seven if cards_left > 0 => {
                self.phase = RoundPhase::AwaitingSuitChoice {
                    player: player.clone(),
                };
                events.push(GameEvent::SuitChoiceRequired { player });
            }
            Rank::Ace => events.extend(self.end_turn(true)),
            _ => events.extend(self.end_turn(false)),
        }

        events
    }

    fn choose_suit(&mut self, player: PlayerId, suit: Suit) -> Vec<GameEvent> {
        self.active_suit = suit;
        self.phase = RoundPhase::AwaitingAction;

        let mut events = vec![GameEvent::SuitChosen { player, suit }];
        events.extend(self.end_turn(false));
        events
    }

    /// Close the current turn and hand it to the next eligible seat,
    /// jumping one extra seat on a skip.
    fn end_turn(&mut self, skip: bool) -> Vec<GameEvent> {
        self.turn_count += 1;

        if self.active_count() <= 1 {
            return self.complete_finished();
        }

        let mut events = Vec::new();
        let mut next = self.next_active_after(self.current);
        if skip {
            events.push(GameEvent::PlayerSkipped {
                player: self.players[next].id.clone(),
            });
            next = self.next_active_after(next);
        }
        self.current = next;

        if self.turn_count >= self.turn_limit {
            events.extend(self.complete_void());
        }

        events
    }

    fn active_count(&self) -> usize {
        self.players.iter().filter(|p| p.is_active()).count()
    }

    fn next_active_after(&self, seat: usize) -> usize {
        let n = self.players.len();
        (1..=n)
            .map(|step| (seat + step) % n)
            .find(|&s| self.players[s].is_active())
            .unwrap_or(seat)
    }

    fn complete_finished(&mut self) -> Vec<GameEvent> {
        // Eliminated players are not ranked; the last one standing loses.
        if let Some(last) = self.players.iter().find(|p| p.is_active()) {
            self.finish_order.push(last.id.clone());
        }

        self.complete(RoundOutcome::Finished {
            finish_order: self.finish_order.clone(),
        })
    }

    fn complete_void(&mut self) -> Vec<GameEvent> {
        let remaining = self
            .players
            .iter()
            .filter(|p| p.is_active())
            .map(|p| HandCount {
                player: p.id.clone(),
                cards: p.hand_size(),
            })
            .collect();

        self.complete(RoundOutcome::Void {
            finish_order: self.finish_order.clone(),
            remaining,
            eliminated: self.eliminated.iter().rev().cloned().collect(),
        })
    }

    fn complete(&mut self, outcome: RoundOutcome) -> Vec<GameEvent> {
        self.phase = RoundPhase::Complete {
            outcome: outcome.clone(),
        };
        vec![GameEvent::RoundEnded {
            outcome,
            turns: self.turn_count,
        }]
    }

    fn debug_check_conservation(&self) {
        debug_assert!(
            self.check_conservation(),
            "card conservation violated in round {}",
            self.round
        );
    }
}
