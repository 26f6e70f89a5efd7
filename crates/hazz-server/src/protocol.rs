//! Wire protocol: JSON envelopes exchanged between endpoints and the
//! coordinator.
//!
//! Every frame is one envelope with a `performative`, a `sender`, a
//! `recipient` (an identity or `"*"`) and a `payload` object.

use hazz_core::{GameAction, GameError, GameEvent, PlayerId, RoundView, SessionReport, Suit};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// Identity the coordinator sends from and is addressed by
pub const COORDINATOR: &str = "coordinator";

/// Recipient meaning every registered endpoint
pub const BROADCAST: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Performative {
    Subscribe,
    Confirm,
    Command,
    Request,
    Action,
    SuitChoice,
    Inform,
    Reject,
}

impl Performative {
    fn parse(name: &str) -> Option<Self> {
        serde_json::from_value(Value::String(name.to_string())).ok()
    }
}

/// Messages that are logged and dropped without touching any state
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(#[from] serde_json::Error),

    #[error("Unknown performative: {0}")]
    UnknownPerformative(String),

    #[error("Endpoints may not send {0:?}")]
    UnexpectedPerformative(Performative),

    #[error("Payload of {performative:?} must be an object")]
    PayloadNotObject { performative: Performative },

    #[error("Malformed {performative:?} payload: {source}")]
    MalformedPayload {
        performative: Performative,
        source: serde_json::Error,
    },

    #[error("Connection is bound to {bound}, message claims to be from {claimed}")]
    SenderMismatch { bound: PlayerId, claimed: PlayerId },

    #[error("First message on a connection must be a subscribe")]
    NotSubscribed,
}

/// An inbound envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub performative: Performative,
    pub sender: PlayerId,
    #[serde(default = "default_recipient")]
    pub recipient: String,
    #[serde(default)]
    pub payload: Value,
}

fn default_recipient() -> String {
    COORDINATOR.to_string()
}

impl Envelope {
    pub fn new(performative: Performative, sender: impl Into<PlayerId>, payload: Value) -> Self {
        Self {
            performative,
            sender: sender.into(),
            recipient: default_recipient(),
            payload,
        }
    }

    /// Parse a text frame, telling unknown performatives apart from
    /// otherwise malformed JSON.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text)?;
        if let Some(name) = value.get("performative").and_then(Value::as_str) {
            if Performative::parse(name).is_none() {
                return Err(ProtocolError::UnknownPerformative(name.to_string()));
            }
        }
        Ok(serde_json::from_value(value)?)
    }

    /// The envelope a player sends to submit `action`
    pub fn from_game_action(sender: impl Into<PlayerId>, action: GameAction) -> Self {
        match action {
            GameAction::Draw => Self::new(Performative::Action, sender, json!({"action": "draw"})),
            GameAction::Play { card_index } => Self::new(
                Performative::Action,
                sender,
                json!({"action": "play", "card_index": card_index}),
            ),
            GameAction::ChooseSuit { suit } => Self::new(
                Performative::SuitChoice,
                sender,
                json!({"suit": suit.index()}),
            ),
        }
    }
}

/// What an endpoint registers as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Player,
    Spectator,
}

/// Session control issued by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    Start,
    Watch {
        #[serde(default = "default_watch_rounds")]
        rounds: u32,
    },
    Stop,
}

fn default_watch_rounds() -> u32 {
    1
}

#[derive(Debug, Default, Deserialize)]
struct SubscribePayload {
    #[serde(default)]
    role: Option<Role>,
}

/// Raw `action` payload. Unknown action names and missing indices are
/// turn-level rejections, not protocol errors, so both are kept loose here.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ActionPayload {
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub card_index: Option<i64>,
}

impl ActionPayload {
    pub fn into_game_action(self) -> Result<GameAction, RejectReason> {
        match self.action.as_deref() {
            Some("draw") => Ok(GameAction::Draw),
            Some("play") => {
                let index = self.card_index.ok_or(RejectReason::MissingCardIndex)?;
                let card_index =
                    usize::try_from(index).map_err(|_| RejectReason::InvalidCardIndex(index))?;
                Ok(GameAction::Play { card_index })
            }
            other => Err(RejectReason::UnknownAction(
                other.unwrap_or_default().to_string(),
            )),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SuitPayload {
    suit: i64,
}

/// Turn a wire suit number into a suit
pub fn suit_from_wire(suit: i64) -> Result<Suit, RejectReason> {
    u8::try_from(suit)
        .ok()
        .and_then(|v| Suit::try_from(v).ok())
        .ok_or(RejectReason::InvalidSuit(suit))
}

/// A decoded inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    Subscribe { role: Option<Role> },
    Command(Command),
    Action(ActionPayload),
    SuitChoice { suit: i64 },
}

impl ClientMessage {
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, ProtocolError> {
        let performative = envelope.performative;
        let payload = &envelope.payload;

        match performative {
            Performative::Subscribe => {
                if payload.is_null() {
                    return Ok(ClientMessage::Subscribe { role: None });
                }
                let p: SubscribePayload = decode(performative, payload)?;
                Ok(ClientMessage::Subscribe { role: p.role })
            }
            Performative::Command => decode(performative, payload).map(ClientMessage::Command),
            Performative::Action => decode(performative, payload).map(ClientMessage::Action),
            Performative::SuitChoice => {
                let p: SuitPayload = decode(performative, payload)?;
                Ok(ClientMessage::SuitChoice { suit: p.suit })
            }
            other => Err(ProtocolError::UnexpectedPerformative(other)),
        }
    }
}

fn decode<T: for<'de> Deserialize<'de>>(
    performative: Performative,
    payload: &Value,
) -> Result<T, ProtocolError> {
    if !payload.is_object() {
        return Err(ProtocolError::PayloadNotObject { performative });
    }
    T::deserialize(payload).map_err(|source| ProtocolError::MalformedPayload {
        performative,
        source,
    })
}

/// Why an inbound message was refused. Sent back to the sender only.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error(transparent)]
    Game(#[from] GameError),

    #[error("Unknown action: {0:?}")]
    UnknownAction(String),

    #[error("A play needs a card_index")]
    MissingCardIndex,

    #[error("Card index {0} is out of range")]
    InvalidCardIndex(i64),

    #[error("Suit must be between 0 and 3, got {0}")]
    InvalidSuit(i64),

    #[error("Only the controller may issue commands")]
    NotController,

    #[error("No round is in progress")]
    NoRoundInProgress,
}

impl RejectReason {
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::Game(e) => e.code(),
            RejectReason::UnknownAction(_) => "unknown_action",
            RejectReason::MissingCardIndex => "missing_card_index",
            RejectReason::InvalidCardIndex(_) => "invalid_card_index",
            RejectReason::InvalidSuit(_) => "invalid_suit",
            RejectReason::NotController => "not_controller",
            RejectReason::NoRoundInProgress => "no_round_in_progress",
        }
    }
}

/// Payload of a `request`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "request", rename_all = "snake_case")]
pub enum RequestPayload {
    /// Draw or play
    Action { view: RoundView },
    /// Name the suit for the Seven just played
    SuitChoice { view: RoundView },
}

/// Payload of an `inform`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InformPayload {
    /// The round as this recipient may see it, plus what just happened
    State {
        view: RoundView,
        last_move: Vec<GameEvent>,
    },

    RoundOver {
        round: u32,
        finish_order: Vec<PlayerId>,
        loser: Option<PlayerId>,
        turns: u32,
        void: bool,
    },

    SessionReport { report: SessionReport },

    Info { message: String },
}

/// Messages sent from the coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "performative", content = "payload", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Registration acknowledged
    Confirm { role: Role },

    Request(RequestPayload),

    Inform(InformPayload),

    Reject { code: String, reason: String },
}

impl ServerMessage {
    pub fn reject(reason: &RejectReason) -> Self {
        ServerMessage::Reject {
            code: reason.code().to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        ServerMessage::Inform(InformPayload::Info {
            message: message.into(),
        })
    }
}

/// An outbound envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerEnvelope {
    pub sender: String,
    pub recipient: String,
    #[serde(flatten)]
    pub message: ServerMessage,
}

impl ServerEnvelope {
    pub fn to(recipient: impl Into<String>, message: ServerMessage) -> Self {
        Self {
            sender: COORDINATOR.to_string(),
            recipient: recipient.into(),
            message,
        }
    }

    pub fn broadcast(message: ServerMessage) -> Self {
        Self::to(BROADCAST, message)
    }

    pub fn is_broadcast(&self) -> bool {
        self.recipient == BROADCAST
    }
}
