//! Hazz2 - a shedding card game engine for the 40-card Spanish deck
//!
//! This crate provides the authoritative game logic, including:
//! - Card identity and the draw/discard piles with recycling
//! - The round state machine with full rule enforcement
//! - Per-recipient projections of a round
//! - Session bookkeeping across rounds
//! - Decision strategies for automated players
//!
//! # Architecture
//!
//! The engine is synchronous and free of I/O. A round owns its deck and a
//! seeded random source, so a given seed replays the same deal, the same
//! opening card and the same recycles. The coordinator that drives rounds
//! over the network lives in the `hazz-server` crate.
//!
//! # Modules
//!
//! - [`card`]: Suits, ranks and cards
//! - [`deck`]: Draw and discard piles
//! - [`game`]: Round state machine
//! - [`view`]: What each recipient may see
//! - [`session`]: Results and standings across rounds
//! - [`bot`]: Automated decision strategies

pub mod actions;
pub mod bot;
pub mod card;
pub mod deck;
pub mod game;
pub mod player;
pub mod session;
pub mod view;

// Re-export commonly used types
pub use actions::{GameAction, GameEvent};
pub use bot::{build_strategy, PolicyTable, Strategy, StrategyKind};
pub use card::{Card, CardError, Rank, Suit, DECK_SIZE};
pub use deck::{Deck, Drawn};
pub use game::{
    GameError, HandCount, RoundConfig, RoundOutcome, RoundPhase, RoundState, SetupError,
    DEFAULT_HAND_SIZE, DEFAULT_TURN_LIMIT, PENALTY_PER_TWO,
};
pub use player::{PlayerId, PlayerState};
pub use session::{RoundRecord, SessionReport, SessionTracker, Standing, VoidRoundPolicy};
pub use view::{RoundView, Viewer};
