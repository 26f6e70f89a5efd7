//! In-process bot seats.
//!
//! A local bot is an ordinary participant: it gets an endpoint like a
//! WebSocket client does, subscribes with an envelope and answers requests
//! through the same inbound queue.

use crate::config::ServerConfig;
use crate::coordinator::Inbound;
use crate::protocol::{
    Envelope, InformPayload, Performative, RequestPayload, Role, ServerEnvelope, ServerMessage,
};
use crate::server::ServerState;
use anyhow::Context;
use hazz_core::{build_strategy, GameAction, PlayerId, PolicyTable, Strategy};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Subscribe every configured local bot and spawn its task.
pub fn spawn_local_bots(config: &ServerConfig, state: &Arc<ServerState>) -> anyhow::Result<()> {
    if config.local_bots.is_empty() {
        return Ok(());
    }

    let table = match &config.policy_table {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("reading policy table {}", path.display()))?;
            let table = PolicyTable::from_json(&json)
                .with_context(|| format!("parsing policy table {}", path.display()))?;
            info!(entries = table.len(), "Loaded policy table");
            Some(table)
        }
        None => None,
    };

    for (i, bot) in config.local_bots.iter().enumerate() {
        let seed = config.session.seed.map(|s| s.wrapping_add(i as u64 + 1));
        let strategy = build_strategy(bot.strategy, seed, table.clone());

        let (tx, rx) = mpsc::unbounded_channel();
        state.bind(&bot.identity, Uuid::new_v4(), tx);
        state.submit(Inbound::Message(Envelope::new(
            Performative::Subscribe,
            bot.identity.clone(),
            json!({ "role": Role::Player }),
        )));

        info!(player = %bot.identity, strategy = %bot.strategy, "Local bot seated");
        tokio::spawn(run_bot(
            bot.identity.clone(),
            strategy,
            rx,
            Arc::clone(state),
        ));
    }
    Ok(())
}

/// Answer requests until the session report arrives.
async fn run_bot(
    identity: PlayerId,
    mut strategy: Box<dyn Strategy>,
    mut inbox: mpsc::UnboundedReceiver<ServerEnvelope>,
    state: Arc<ServerState>,
) {
    while let Some(envelope) = inbox.recv().await {
        if let Some(reply) = respond(&identity, strategy.as_mut(), &envelope.message) {
            state.submit(Inbound::Message(reply));
        }
        if let ServerMessage::Inform(InformPayload::SessionReport { .. }) = envelope.message {
            break;
        }
    }
    debug!(player = %identity, "Local bot finished");
}

fn respond(
    identity: &str,
    strategy: &mut dyn Strategy,
    message: &ServerMessage,
) -> Option<Envelope> {
    let action = match message {
        ServerMessage::Request(RequestPayload::Action { view }) => strategy.choose_action(view),
        ServerMessage::Request(RequestPayload::SuitChoice { view }) => GameAction::ChooseSuit {
            suit: strategy.choose_suit(view),
        },
        ServerMessage::Reject { code, reason } => {
            warn!(player = %identity, code = %code, "Local bot move rejected: {}", reason);
            return None;
        }
        _ => return None,
    };
    Some(Envelope::from_game_action(identity, action))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ClientMessage;
    use hazz_core::bot::FrequencyStrategy;
    use hazz_core::{RoundConfig, RoundState, RoundView, Viewer};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn view_for_current() -> (RoundState, RoundView) {
        let round = RoundState::start(
            1,
            vec!["bot".into(), "other".into()],
            &RoundConfig::default(),
            StdRng::seed_from_u64(5),
        )
        .unwrap();
        let current = round.current_player().to_string();
        let view = RoundView::project(&round, Viewer::Player(&current));
        (round, view)
    }

    #[test]
    fn test_bot_answers_action_request() {
        let (round, view) = view_for_current();
        let current = round.current_player().to_string();
        let mut strategy = FrequencyStrategy;

        let request = ServerMessage::Request(RequestPayload::Action { view });
        let reply = respond(&current, &mut strategy, &request).unwrap();

        assert_eq!(reply.sender, current);
        assert_eq!(reply.performative, Performative::Action);
        let ClientMessage::Action(payload) = ClientMessage::from_envelope(&reply).unwrap() else {
            panic!("expected an action payload");
        };
        let mut round = round;
        round
            .apply_action(&current, payload.into_game_action().unwrap())
            .unwrap();
    }

    #[test]
    fn test_bot_answers_suit_request() {
        let (_, view) = view_for_current();
        let mut strategy = FrequencyStrategy;

        let request = ServerMessage::Request(RequestPayload::SuitChoice { view });
        let reply = respond("bot", &mut strategy, &request).unwrap();

        assert_eq!(reply.performative, Performative::SuitChoice);
        assert!(matches!(
            ClientMessage::from_envelope(&reply).unwrap(),
            ClientMessage::SuitChoice { suit } if (0..4).contains(&suit)
        ));
    }

    #[test]
    fn test_bot_ignores_informs() {
        let mut strategy = FrequencyStrategy;
        assert!(respond("bot", &mut strategy, &ServerMessage::info("hello")).is_none());
    }
}
