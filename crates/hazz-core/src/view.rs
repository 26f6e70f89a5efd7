//! What each recipient is allowed to see of a round.
//!
//! A player sees their own hand and everyone's hand size; a spectator sees
//! hand sizes only. Views are computed on demand from the single
//! `RoundState`, never stored.

use crate::card::{Card, Suit};
use crate::game::{RoundPhase, RoundState};
use crate::player::PlayerId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Who a view is being built for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Viewer<'a> {
    Player(&'a str),
    Spectator,
}

impl<'a> Viewer<'a> {
    pub fn identity(&self) -> Option<&'a str> {
        match self {
            Viewer::Player(id) => Some(id),
            Viewer::Spectator => None,
        }
    }
}

/// A projection of the round for one recipient
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundView {
    pub round: u32,
    /// Identity this view was built for; `None` for spectators
    pub viewer: Option<PlayerId>,
    /// The viewer's own hand. Absent for spectators.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hand: Option<Vec<Card>>,
    /// Playable positions in `hand` right now
    pub valid_card_indices: Vec<usize>,
    pub hand_sizes: BTreeMap<PlayerId, usize>,
    pub top_card: Option<Card>,
    pub active_suit: Suit,
    pub penalty: u32,
    pub deck_size: usize,
    pub current_player: PlayerId,
    pub turn_order: Vec<PlayerId>,
    pub active_players: Vec<PlayerId>,
    pub finish_order: Vec<PlayerId>,
    pub turn_count: u32,
    /// Set while a Seven waits for its suit
    pub awaiting_suit_choice: Option<PlayerId>,
    pub complete: bool,
}

impl RoundView {
    pub fn project(state: &RoundState, viewer: Viewer<'_>) -> Self {
        let seat = viewer.identity().and_then(|id| state.player(id));

        let awaiting_suit_choice = match state.phase() {
            RoundPhase::AwaitingSuitChoice { player } => Some(player.clone()),
            _ => None,
        };

        Self {
            round: state.round(),
            viewer: seat.map(|p| p.id.clone()),
            hand: seat.map(|p| p.hand.clone()),
            valid_card_indices: seat
                .map(|p| state.valid_card_indices(&p.id))
                .unwrap_or_default(),
            hand_sizes: state
                .players()
                .iter()
                .map(|p| (p.id.clone(), p.hand_size()))
                .collect(),
            top_card: state.top_card(),
            active_suit: state.active_suit(),
            penalty: state.penalty(),
            deck_size: state.deck().draw_pile_len(),
            current_player: state.current_player().to_string(),
            turn_order: state.turn_order(),
            active_players: state.active_players(),
            finish_order: state.finish_order().to_vec(),
            turn_count: state.turn_count(),
            awaiting_suit_choice,
            complete: state.is_complete(),
        }
    }

    /// The viewer's hand, empty for spectators
    pub fn my_hand(&self) -> &[Card] {
        self.hand.as_deref().unwrap_or(&[])
    }

    pub fn is_my_turn(&self) -> bool {
        !self.complete && self.viewer.as_deref() == Some(self.current_player.as_str())
    }

    /// Hand sizes of everyone except the viewer
    pub fn opponents(&self) -> impl Iterator<Item = (&PlayerId, &usize)> {
        let me = self.viewer.clone();
        self.hand_sizes
            .iter()
            .filter(move |(id, _)| Some(*id) != me.as_ref())
    }
}
