//! Actions players submit and the events the engine reports back.

use crate::card::{Card, Suit};
use crate::game::RoundOutcome;
use crate::player::PlayerId;
use serde::{Deserialize, Serialize};

/// Everything a player can ask the engine to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum GameAction {
    /// Draw one card, or the whole penalty stack if one is pending
    Draw,
    /// Play the card at this position of the acting player's hand
    Play { card_index: usize },
    /// Resolve a Seven by naming the new active suit
    ChooseSuit { suit: Suit },
}

/// Something that happened as a result of an action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GameEvent {
    /// A round opened with this rotation and flipped card
    RoundStarted {
        round: u32,
        turn_order: Vec<PlayerId>,
        opening_card: Card,
    },

    CardPlayed {
        player: PlayerId,
        card: Card,
        cards_left: usize,
    },

    /// Cards were drawn. `cards` is only present in the drawer's own view.
    CardsDrawn {
        player: PlayerId,
        count: usize,
        /// The draw resolved a penalty stack
        penalty: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cards: Option<Vec<Card>>,
    },

    /// The discard pile was shuffled back into the draw pile
    PileRecycled { cards: usize },

    /// A Two raised the penalty stack
    PenaltyStacked { total: u32 },

    /// An Ace skipped this player's turn
    PlayerSkipped { player: PlayerId },

    /// A Seven was played and the round waits for the suit
    SuitChoiceRequired { player: PlayerId },

    SuitChosen { player: PlayerId, suit: Suit },

    /// A player emptied their hand
    PlayerFinished { player: PlayerId, position: usize },

    /// A player was removed from the round
    PlayerEliminated { player: PlayerId },

    RoundEnded { outcome: RoundOutcome, turns: u32 },
}

impl GameEvent {
    /// The event as `viewer` may see it. Drawn cards are private to the
    /// drawer; everything else is public.
    pub fn redacted_for(&self, viewer: Option<&str>) -> GameEvent {
        match self {
            GameEvent::CardsDrawn {
                player,
                count,
                penalty,
                ..
            } if viewer != Some(player.as_str()) => {
                GameEvent::CardsDrawn {
                    player: player.clone(),
                    count: *count,
                    penalty: *penalty,
                    cards: None,
                }
            }
            other => other.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::Rank;

    #[test]
    fn test_action_wire_format() {
        let draw: GameAction = serde_json::from_str(r#"{"action":"draw"}"#).unwrap();
        assert_eq!(draw, GameAction::Draw);

        let play: GameAction =
            serde_json::from_str(r#"{"action":"play","card_index":3}"#).unwrap();
        assert_eq!(play, GameAction::Play { card_index: 3 });
    }

    #[test]
    fn test_drawn_cards_hidden_from_others() {
        let event = GameEvent::CardsDrawn {
            player: "qagent".into(),
            count: 1,
            penalty: false,
            cards: Some(vec![Card::new(Suit::Cups, Rank::Five)]),
        };

        assert_eq!(event.redacted_for(Some("qagent")), event);

        match event.redacted_for(Some("human")) {
            GameEvent::CardsDrawn { cards, count, .. } => {
                assert_eq!(cards, None);
                assert_eq!(count, 1);
            }
            other => panic!("unexpected event {:?}", other),
        }

        let json = serde_json::to_value(event.redacted_for(None)).unwrap();
        assert!(json.get("cards").is_none());
    }
}
