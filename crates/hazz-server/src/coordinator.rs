//! The coordinator: owner of the session and the round in play.
//!
//! It is a synchronous state machine. The transport feeds it one
//! [`Inbound`] at a time from a single queue and delivers whatever
//! envelopes it returns; it never performs I/O itself. Rejections are
//! addressed to the offending sender only, and the current player is asked
//! again so an invalid attempt never costs a turn.

use crate::config::SessionConfig;
use crate::protocol::{
    suit_from_wire, ClientMessage, Command, Envelope, InformPayload, RejectReason,
    RequestPayload, Role, ServerEnvelope, ServerMessage, BROADCAST, COORDINATOR,
};
use hazz_core::{
    GameAction, GameError, GameEvent, PlayerId, RoundPhase, RoundState, RoundView,
    SessionReport, SessionTracker, Viewer,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Everything the coordinator reacts to
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Message(Envelope),
    /// The transport lost the connection bound to `identity`
    Disconnected { identity: PlayerId },
}

/// Top-level session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Active,
    /// Terminal; every further message is dropped
    Stopped,
}

/// State of the current round slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundStatus {
    WaitingForPlayers,
    InProgress,
    /// The last round ended and the next one could not start yet
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Play,
    Spectate { remaining: u32 },
}

pub struct Coordinator {
    config: SessionConfig,
    /// Registered endpoints
    registry: BTreeMap<PlayerId, Role>,
    phase: SessionPhase,
    mode: Mode,
    /// Identities dealt into each round of the current run
    participants: Vec<PlayerId>,
    round: Option<RoundState>,
    tracker: SessionTracker,
}

impl Coordinator {
    pub fn new(config: SessionConfig) -> Self {
        let tracker = SessionTracker::new(config.void_policy);
        Self {
            config,
            registry: BTreeMap::new(),
            phase: SessionPhase::Idle,
            mode: Mode::Play,
            participants: Vec::new(),
            round: None,
            tracker,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn is_stopped(&self) -> bool {
        self.phase == SessionPhase::Stopped
    }

    pub fn status(&self) -> RoundStatus {
        match &self.round {
            None => RoundStatus::WaitingForPlayers,
            Some(round) if round.is_complete() => RoundStatus::Complete,
            Some(_) => RoundStatus::InProgress,
        }
    }

    pub fn round(&self) -> Option<&RoundState> {
        self.round.as_ref()
    }

    pub fn role_of(&self, identity: &str) -> Option<Role> {
        self.registry.get(identity).copied()
    }

    pub fn report(&self) -> SessionReport {
        self.tracker.report()
    }

    /// Process one inbound message and return the envelopes to deliver.
    pub fn handle(&mut self, inbound: Inbound) -> Vec<ServerEnvelope> {
        if self.is_stopped() {
            debug!("Session stopped, dropping {:?}", inbound);
            return Vec::new();
        }

        match inbound {
            Inbound::Message(envelope) => self.handle_envelope(envelope),
            Inbound::Disconnected { identity } => self.handle_disconnect(&identity),
        }
    }

    // ==================== Inbound ====================

    fn handle_envelope(&mut self, envelope: Envelope) -> Vec<ServerEnvelope> {
        if envelope.recipient != COORDINATOR && envelope.recipient != BROADCAST {
            warn!(
                sender = %envelope.sender,
                recipient = %envelope.recipient,
                "Dropping message not addressed to the coordinator"
            );
            return Vec::new();
        }

        let message = match ClientMessage::from_envelope(&envelope) {
            Ok(message) => message,
            Err(e) => {
                warn!(sender = %envelope.sender, reason = %e, "Dropping malformed message");
                return Vec::new();
            }
        };

        let sender = envelope.sender;
        if !matches!(message, ClientMessage::Subscribe { .. })
            && !self.registry.contains_key(&sender)
        {
            warn!(sender = %sender, "Dropping message from unregistered endpoint");
            return Vec::new();
        }

        match message {
            ClientMessage::Subscribe { role } => self.subscribe(sender, role),
            ClientMessage::Command(command) => self.command(&sender, command),
            ClientMessage::Action(payload) => {
                let action = payload.into_game_action();
                self.submit(&sender, action)
            }
            ClientMessage::SuitChoice { suit } => {
                let action = suit_from_wire(suit).map(|suit| GameAction::ChooseSuit { suit });
                self.submit(&sender, action)
            }
        }
    }

    fn subscribe(&mut self, identity: PlayerId, requested: Option<Role>) -> Vec<ServerEnvelope> {
        // An active seat in the round in play cannot be given up by
        // resubscribing.
        let seated = self.round.as_ref().is_some_and(|round| {
            !round.is_complete()
                && round
                    .player(&identity)
                    .is_some_and(|player| player.is_active())
        });

        let role = if seated {
            if requested == Some(Role::Spectator) {
                warn!(player = %identity, "Seated player cannot switch to spectator mid-round");
            }
            Role::Player
        } else if self.config.players.contains(&identity) {
            requested.unwrap_or(Role::Player)
        } else {
            Role::Spectator
        };

        info!(player = %identity, ?role, "Endpoint registered");
        self.registry.insert(identity.clone(), role);

        let mut out = vec![ServerEnvelope::to(
            identity.clone(),
            ServerMessage::Confirm { role },
        )];

        // Late joiners catch up on the round in play.
        if let Some(round) = self.round.as_ref().filter(|r| !r.is_complete()) {
            out.push(self.state_for(round, &identity, &[]));
            if round.required_sender() == Some(identity.as_str()) {
                out.extend(self.prompt());
            }
        }
        out
    }

    fn command(&mut self, sender: &str, command: Command) -> Vec<ServerEnvelope> {
        if sender != self.config.controller {
            warn!(player = %sender, ?command, "Command from a non-controller");
            return vec![reject(sender, &RejectReason::NotController)];
        }

        match command {
            Command::Start => self.start(),
            Command::Watch { rounds } => self.watch(rounds),
            Command::Stop => self.stop(),
        }
    }

    fn start(&mut self) -> Vec<ServerEnvelope> {
        if self.status() == RoundStatus::InProgress {
            return vec![self.info_to_controller("A round is already in progress")];
        }

        let missing = self.missing_players(&self.config.players);
        if !missing.is_empty() {
            return vec![self.info_to_controller(waiting_for(&missing))];
        }

        self.phase = SessionPhase::Active;
        self.mode = Mode::Play;
        self.participants = self.config.players.clone();
        info!(players = ?self.participants, "Session started");

        self.start_round()
    }

    fn watch(&mut self, rounds: u32) -> Vec<ServerEnvelope> {
        if self.status() == RoundStatus::InProgress {
            return vec![self.info_to_controller("A round is already in progress")];
        }
        if rounds == 0 {
            return vec![self.info_to_controller("Nothing to watch: rounds must be at least 1")];
        }

        let bots: Vec<PlayerId> = self
            .config
            .players
            .iter()
            .filter(|id| **id != self.config.controller)
            .cloned()
            .collect();
        if bots.len() < 2 {
            return vec![
                self.info_to_controller("Spectating needs at least two automated players"),
            ];
        }

        let missing = self.missing_players(&bots);
        if !missing.is_empty() {
            return vec![self.info_to_controller(waiting_for(&missing))];
        }

        self.phase = SessionPhase::Active;
        self.mode = Mode::Spectate { remaining: rounds };
        self.participants = bots;
        info!(rounds, players = ?self.participants, "Spectating started");

        self.start_round()
    }

    fn stop(&mut self) -> Vec<ServerEnvelope> {
        if let Some(round) = self.round.take().filter(|r| !r.is_complete()) {
            info!(round = round.round(), "Abandoning round in progress");
        }
        self.phase = SessionPhase::Stopped;

        let report = self.tracker.report();
        info!(
            "Session stopped after {} round(s)\n{}",
            report.total_rounds, report
        );

        vec![ServerEnvelope::broadcast(ServerMessage::Inform(
            InformPayload::SessionReport { report },
        ))]
    }

    /// Apply a move from `sender`. Only the required sender gets past the
    /// first check; everyone else is turned away without touching the round.
    fn submit(
        &mut self,
        sender: &str,
        action: Result<GameAction, RejectReason>,
    ) -> Vec<ServerEnvelope> {
        let Some(round) = self.round.as_mut().filter(|r| !r.is_complete()) else {
            return vec![reject(sender, &RejectReason::NoRoundInProgress)];
        };

        if round.required_sender() != Some(sender) {
            debug!(player = %sender, "Out-of-turn message rejected");
            return vec![reject(sender, &RejectReason::Game(GameError::NotYourTurn))];
        }

        let number = round.round();
        let result = action.and_then(|action| {
            round
                .apply_action(sender, action)
                .map_err(RejectReason::from)
        });

        match result {
            Ok(events) => {
                debug!(player = %sender, round = number, ?events, "Action applied");
                let mut out = self.broadcast_state(&events);
                if self.status() == RoundStatus::Complete {
                    out.extend(self.finish_round());
                } else {
                    out.extend(self.prompt());
                }
                out
            }
            Err(reason) => {
                info!(
                    player = %sender,
                    round = number,
                    code = reason.code(),
                    reason = %reason,
                    "Action rejected"
                );
                let mut out = vec![reject(sender, &reason)];
                out.extend(self.prompt());
                out
            }
        }
    }

    fn handle_disconnect(&mut self, identity: &str) -> Vec<ServerEnvelope> {
        if self.registry.remove(identity).is_none() {
            return Vec::new();
        }
        info!(player = %identity, "Endpoint disconnected");

        let Some(round) = self.round.as_mut().filter(|r| !r.is_complete()) else {
            return Vec::new();
        };

        let was_required = round.required_sender() == Some(identity);
        let events = match round.eliminate(identity) {
            Ok(events) => events,
            // Not seated, or already finished.
            Err(_) => return Vec::new(),
        };
        info!(player = %identity, round = round.round(), "Player eliminated");

        let mut out = self.broadcast_state(&events);
        if self.status() == RoundStatus::Complete {
            out.extend(self.finish_round());
        } else if was_required {
            out.extend(self.prompt());
        }
        out
    }

    // ==================== Rounds ====================

    fn start_round(&mut self) -> Vec<ServerEnvelope> {
        let number = self.tracker.rounds_played() as u32 + 1;
        let rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(u64::from(number))),
            None => StdRng::from_entropy(),
        };

        let round = match RoundState::start(
            number,
            self.participants.clone(),
            &self.config.round,
            rng,
        ) {
            Ok(round) => round,
            Err(e) => {
                warn!(round = number, reason = %e, "Could not start round");
                return vec![self.info_to_controller(format!("Could not start round: {}", e))];
            }
        };

        for id in round.turn_order() {
            self.tracker.register_player(&id);
        }
        info!(
            round = number,
            order = ?round.turn_order(),
            opening = ?round.top_card(),
            "Round started"
        );

        let opening: Vec<GameEvent> = round.opening_event().into_iter().collect();
        self.round = Some(round);

        let mut out = self.broadcast_state(&opening);
        out.extend(self.prompt());
        out
    }

    /// Record the completed round, announce it, then continue: the next
    /// round starts at once unless spectating has run out or a participant
    /// has gone missing.
    fn finish_round(&mut self) -> Vec<ServerEnvelope> {
        let Some((outcome, turns)) = self
            .round
            .as_ref()
            .and_then(|r| r.outcome().cloned().map(|o| (o, r.turn_count())))
        else {
            return Vec::new();
        };

        let record = self.tracker.record_round(&outcome, turns).clone();
        info!(
            round = record.round,
            turns,
            void = record.void,
            order = ?record.finish_order,
            "Round complete"
        );

        let mut out = vec![ServerEnvelope::broadcast(ServerMessage::Inform(
            InformPayload::RoundOver {
                round: record.round,
                loser: record.loser().map(String::from),
                finish_order: record.finish_order,
                turns,
                void: record.void,
            },
        ))];

        if let Mode::Spectate { remaining } = self.mode {
            let remaining = remaining.saturating_sub(1);
            if remaining == 0 {
                info!("Spectating finished");
                self.mode = Mode::Play;
                self.round = None;
                out.push(self.info_to_controller("Spectating finished"));
                return out;
            }
            self.mode = Mode::Spectate { remaining };
        }

        let missing = self.missing_players(&self.participants);
        if !missing.is_empty() {
            info!(missing = ?missing, "Not continuing: participants missing");
            out.push(self.info_to_controller(waiting_for(&missing)));
            return out;
        }

        out.extend(self.start_round());
        out
    }

    // ==================== Outbound ====================

    /// The round as `identity` may see it. Only registered players seated
    /// in the round see a hand.
    fn state_for(
        &self,
        round: &RoundState,
        identity: &str,
        events: &[GameEvent],
    ) -> ServerEnvelope {
        let viewer = match self.registry.get(identity) {
            Some(Role::Player) if round.has_player(identity) => Viewer::Player(identity),
            _ => Viewer::Spectator,
        };

        let last_move = events
            .iter()
            .map(|e| e.redacted_for(viewer.identity()))
            .collect();

        ServerEnvelope::to(
            identity,
            ServerMessage::Inform(InformPayload::State {
                view: RoundView::project(round, viewer),
                last_move,
            }),
        )
    }

    fn broadcast_state(&self, events: &[GameEvent]) -> Vec<ServerEnvelope> {
        let Some(round) = &self.round else {
            return Vec::new();
        };
        self.registry
            .keys()
            .map(|identity| self.state_for(round, identity, events))
            .collect()
    }

    /// Ask the required sender for its next move.
    fn prompt(&self) -> Option<ServerEnvelope> {
        let round = self.round.as_ref()?;
        let player = round.required_sender()?;
        let view = RoundView::project(round, Viewer::Player(player));

        let request = match round.phase() {
            RoundPhase::AwaitingSuitChoice { .. } => RequestPayload::SuitChoice { view },
            _ => RequestPayload::Action { view },
        };
        Some(ServerEnvelope::to(player, ServerMessage::Request(request)))
    }

    fn info_to_controller(&self, message: impl Into<String>) -> ServerEnvelope {
        ServerEnvelope::to(self.config.controller.clone(), ServerMessage::info(message))
    }

    /// Identities in `ids` not currently registered as players
    fn missing_players(&self, ids: &[PlayerId]) -> Vec<PlayerId> {
        ids.iter()
            .filter(|id| self.registry.get(*id) != Some(&Role::Player))
            .cloned()
            .collect()
    }
}

fn reject(recipient: &str, reason: &RejectReason) -> ServerEnvelope {
    ServerEnvelope::to(recipient, ServerMessage::reject(reason))
}

fn waiting_for(missing: &[PlayerId]) -> String {
    format!("Waiting for players: {}", missing.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Performative;
    use hazz_core::bot::FrequencyStrategy;
    use hazz_core::{Strategy, Suit};
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    const PLAYERS: [&str; 3] = ["human", "qagent", "randomagent"];

    fn coordinator() -> Coordinator {
        Coordinator::new(SessionConfig {
            seed: Some(7),
            ..SessionConfig::default()
        })
    }

    fn send(
        c: &mut Coordinator,
        performative: Performative,
        sender: &str,
        payload: Value,
    ) -> Vec<ServerEnvelope> {
        c.handle(Inbound::Message(Envelope::new(performative, sender, payload)))
    }

    fn command(c: &mut Coordinator, payload: Value) -> Vec<ServerEnvelope> {
        send(c, Performative::Command, "human", payload)
    }

    fn subscribe_all(c: &mut Coordinator) {
        for id in PLAYERS {
            send(c, Performative::Subscribe, id, Value::Null);
        }
    }

    fn started() -> (Coordinator, Vec<ServerEnvelope>) {
        let mut c = coordinator();
        subscribe_all(&mut c);
        let out = command(&mut c, json!({"command": "start"}));
        (c, out)
    }

    fn request_in(out: &[ServerEnvelope]) -> Option<(String, RequestPayload)> {
        out.iter().find_map(|e| match &e.message {
            ServerMessage::Request(r) => Some((e.recipient.clone(), r.clone())),
            _ => None,
        })
    }

    fn requests(out: &[ServerEnvelope]) -> usize {
        out.iter()
            .filter(|e| matches!(e.message, ServerMessage::Request(_)))
            .count()
    }

    fn reject_code(env: &ServerEnvelope) -> Option<&str> {
        match &env.message {
            ServerMessage::Reject { code, .. } => Some(code),
            _ => None,
        }
    }

    fn info_message(env: &ServerEnvelope) -> Option<&str> {
        match &env.message {
            ServerMessage::Inform(InformPayload::Info { message }) => Some(message),
            _ => None,
        }
    }

    /// Answer each request with the frequency strategy until `done` holds.
    fn play_until(
        c: &mut Coordinator,
        mut out: Vec<ServerEnvelope>,
        mut done: impl FnMut(&Coordinator, &[ServerEnvelope]) -> bool,
    ) -> Vec<ServerEnvelope> {
        let mut strategy = FrequencyStrategy;
        for _ in 0..100_000 {
            if done(c, &out) {
                return out;
            }
            let (player, request) = request_in(&out).expect("someone is always asked to move");
            let action = match request {
                RequestPayload::Action { view } => strategy.choose_action(&view),
                RequestPayload::SuitChoice { view } => GameAction::ChooseSuit {
                    suit: strategy.choose_suit(&view),
                },
            };
            out = c.handle(Inbound::Message(Envelope::from_game_action(player, action)));
        }
        panic!("session never reached the expected point");
    }

    #[test]
    fn test_subscribe_confirms_role() {
        let mut c = coordinator();

        let out = send(&mut c, Performative::Subscribe, "human", Value::Null);
        assert_eq!(
            out,
            vec![ServerEnvelope::to("human", ServerMessage::Confirm { role: Role::Player })]
        );

        let out = send(&mut c, Performative::Subscribe, "guest", json!({"role": "player"}));
        assert_eq!(
            out[0].message,
            ServerMessage::Confirm {
                role: Role::Spectator
            }
        );

        send(&mut c, Performative::Subscribe, "qagent", json!({"role": "spectator"}));
        assert_eq!(c.role_of("qagent"), Some(Role::Spectator));
    }

    #[test]
    fn test_start_waits_for_all_players() {
        let mut c = coordinator();
        send(&mut c, Performative::Subscribe, "human", Value::Null);

        let out = command(&mut c, json!({"command": "start"}));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].recipient, "human");
        assert_eq!(
            info_message(&out[0]),
            Some("Waiting for players: qagent, randomagent")
        );
        assert_eq!(c.phase(), SessionPhase::Idle);
        assert_eq!(c.status(), RoundStatus::WaitingForPlayers);
    }

    #[test]
    fn test_only_controller_may_command() {
        let mut c = coordinator();
        subscribe_all(&mut c);

        let out = send(&mut c, Performative::Command, "qagent", json!({"command": "start"}));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].recipient, "qagent");
        assert_eq!(reject_code(&out[0]), Some("not_controller"));
        assert_eq!(c.status(), RoundStatus::WaitingForPlayers);
    }

    #[test]
    fn test_start_broadcasts_state_and_requests_current_player() {
        let (c, out) = started();
        let round = c.round().unwrap();

        assert_eq!(c.phase(), SessionPhase::Active);
        assert_eq!(c.status(), RoundStatus::InProgress);
        assert_eq!(requests(&out), 1);

        let (player, request) = request_in(&out).unwrap();
        assert_eq!(player, round.current_player());
        assert!(matches!(request, RequestPayload::Action { .. }));

        for id in PLAYERS {
            let state = out
                .iter()
                .find_map(|e| match &e.message {
                    ServerMessage::Inform(InformPayload::State { view, last_move })
                        if e.recipient == id =>
                    {
                        Some((view, last_move))
                    }
                    _ => None,
                })
                .unwrap();
            assert_eq!(state.0.my_hand(), round.player(id).unwrap().hand.as_slice());
            assert!(matches!(
                state.1.as_slice(),
                [GameEvent::RoundStarted { round: 1, .. }]
            ));
        }
    }

    #[test]
    fn test_out_of_turn_action_is_rejected_without_reprompt() {
        let (mut c, _) = started();
        let round = c.round().unwrap();
        let current = round.current_player().to_string();
        let intruder = PLAYERS.iter().find(|id| **id != current).unwrap();
        let hand_before = round.player(intruder).unwrap().hand.clone();

        let out = send(&mut c, Performative::Action, intruder, json!({"action": "draw"}));

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].recipient, *intruder);
        assert_eq!(reject_code(&out[0]), Some("not_your_turn"));

        let round = c.round().unwrap();
        assert_eq!(round.current_player(), current);
        assert_eq!(round.turn_count(), 0);
        assert_eq!(round.player(intruder).unwrap().hand, hand_before);
    }

    #[test]
    fn test_invalid_moves_are_rejected_and_reprompted() {
        let (mut c, _) = started();
        let current = c.round().unwrap().current_player().to_string();

        for (payload, code) in [
            (json!({"action": "play", "card_index": 99}), "invalid_card_index"),
            (json!({"action": "play"}), "missing_card_index"),
            (json!({"action": "pass"}), "unknown_action"),
        ] {
            let out = send(&mut c, Performative::Action, &current, payload);
            assert_eq!(out.len(), 2);
            assert_eq!(out[0].recipient, current);
            assert_eq!(reject_code(&out[0]), Some(code));

            let (player, request) = request_in(&out).unwrap();
            assert_eq!(player, current);
            assert!(matches!(request, RequestPayload::Action { .. }));
        }

        assert_eq!(c.round().unwrap().turn_count(), 0);
    }

    #[test]
    fn test_suit_choice_sets_active_suit_and_resumes_rotation() {
        let (mut c, out) = started();
        let out = play_until(&mut c, out, |_, out| {
            matches!(request_in(out), Some((_, RequestPayload::SuitChoice { .. })))
        });
        let (chooser, _) = request_in(&out).unwrap();

        // Out-of-range suits are refused and the choice is asked again.
        let out = send(&mut c, Performative::SuitChoice, &chooser, json!({"suit": 9}));
        assert_eq!(reject_code(&out[0]), Some("invalid_suit"));
        assert!(matches!(
            request_in(&out),
            Some((ref p, RequestPayload::SuitChoice { .. })) if *p == chooser
        ));

        let out = send(&mut c, Performative::SuitChoice, &chooser, json!({"suit": 2}));
        let state = out
            .iter()
            .find_map(|e| match &e.message {
                ServerMessage::Inform(InformPayload::State { view, last_move })
                    if e.recipient == chooser =>
                {
                    Some((view.clone(), last_move.clone()))
                }
                _ => None,
            })
            .unwrap();
        assert_eq!(state.0.active_suit, Suit::Swords);
        assert!(state.1.contains(&GameEvent::SuitChosen {
            player: chooser.clone(),
            suit: Suit::Swords
        }));

        let (next, request) = request_in(&out).unwrap();
        assert_ne!(next, chooser);
        assert!(matches!(request, RequestPayload::Action { .. }));
    }

    #[test]
    fn test_drawn_cards_are_private() {
        let (mut c, _) = started();
        let current = c.round().unwrap().current_player().to_string();

        let out = send(&mut c, Performative::Action, &current, json!({"action": "draw"}));
        for env in &out {
            if let ServerMessage::Inform(InformPayload::State { last_move, .. }) = &env.message {
                let cards = last_move.iter().find_map(|e| match e {
                    GameEvent::CardsDrawn { cards, .. } => Some(cards.clone()),
                    _ => None,
                });
                assert_eq!(cards.unwrap().is_some(), env.recipient == current);
            }
        }
    }

    #[test]
    fn test_rounds_continue_until_stopped() {
        let (mut c, out) = started();
        let out = play_until(&mut c, out, |c, _| c.report().total_rounds == 2);

        let round_over = out
            .iter()
            .find(|e| {
                matches!(
                    e.message,
                    ServerMessage::Inform(InformPayload::RoundOver { round: 2, .. })
                )
            })
            .unwrap();
        assert!(round_over.is_broadcast());

        // The third round is already under way.
        assert_eq!(c.round().unwrap().round(), 3);
        assert_eq!(c.status(), RoundStatus::InProgress);
        assert_eq!(requests(&out), 1);
    }

    #[test]
    fn test_stop_mid_round_reports_completed_rounds() {
        let (mut c, out) = started();
        play_until(&mut c, out, |c, _| c.report().total_rounds == 2);

        let out = command(&mut c, json!({"command": "stop"}));
        assert_eq!(out.len(), 1);
        assert!(out[0].is_broadcast());

        let ServerMessage::Inform(InformPayload::SessionReport { report }) = &out[0].message
        else {
            panic!("expected a session report");
        };
        assert_eq!(report.total_rounds, 2);
        assert_eq!(report.rounds.len(), 2);

        let scored = report.rounds.iter().filter(|r| r.scored).count() as u32;
        assert_eq!(report.standings.iter().map(|s| s.wins).sum::<u32>(), scored);
        assert_eq!(report.standings.iter().map(|s| s.losses).sum::<u32>(), scored);

        assert!(c.is_stopped());
        assert!(c.round().is_none());
        assert!(command(&mut c, json!({"command": "start"})).is_empty());
    }

    #[test]
    fn test_stop_while_idle_gives_empty_report() {
        let mut c = coordinator();
        send(&mut c, Performative::Subscribe, "human", Value::Null);

        let out = command(&mut c, json!({"command": "stop"}));
        let ServerMessage::Inform(InformPayload::SessionReport { report }) = &out[0].message
        else {
            panic!("expected a session report");
        };
        assert_eq!(report.total_rounds, 0);
        assert_eq!(c.phase(), SessionPhase::Stopped);
    }

    #[test]
    fn test_spectating_counts_down_completed_rounds() {
        let mut c = coordinator();
        subscribe_all(&mut c);

        let out = command(&mut c, json!({"command": "watch", "rounds": 2}));
        let round = c.round().unwrap();
        assert!(!round.has_player("human"));
        assert_eq!(round.players().len(), 2);

        let out = play_until(&mut c, out, |c, out| {
            for env in out.iter().filter(|e| e.recipient == "human") {
                match &env.message {
                    ServerMessage::Request(_) => panic!("the spectator was asked to move"),
                    ServerMessage::Inform(InformPayload::State { view, .. }) => {
                        assert_eq!(view.hand, None)
                    }
                    _ => {}
                }
            }
            c.status() == RoundStatus::WaitingForPlayers
        });

        assert_eq!(c.report().total_rounds, 2);
        assert_eq!(c.phase(), SessionPhase::Active);
        assert!(out
            .iter()
            .any(|e| e.recipient == "human" && info_message(e) == Some("Spectating finished")));
        assert_eq!(requests(&out), 0);

        // A normal session can follow.
        let out = command(&mut c, json!({"command": "start"}));
        assert_eq!(requests(&out), 1);
        assert!(c.round().unwrap().has_player("human"));
    }

    #[test]
    fn test_watch_needs_two_bots() {
        let mut c = Coordinator::new(SessionConfig {
            players: vec!["human".into(), "qagent".into()],
            ..SessionConfig::default()
        });
        send(&mut c, Performative::Subscribe, "human", Value::Null);
        send(&mut c, Performative::Subscribe, "qagent", Value::Null);

        let out = command(&mut c, json!({"command": "watch", "rounds": 1}));
        assert_eq!(
            info_message(&out[0]),
            Some("Spectating needs at least two automated players")
        );
        assert_eq!(c.status(), RoundStatus::WaitingForPlayers);
    }

    #[test]
    fn test_start_while_running_is_refused() {
        let (mut c, _) = started();
        let out = command(&mut c, json!({"command": "start"}));
        assert_eq!(
            info_message(&out[0]),
            Some("A round is already in progress")
        );
        assert_eq!(c.round().unwrap().round(), 1);
    }

    #[test]
    fn test_disconnect_eliminates_current_player() {
        let (mut c, _) = started();
        let current = c.round().unwrap().current_player().to_string();

        let out = c.handle(Inbound::Disconnected {
            identity: current.clone(),
        });

        let round = c.round().unwrap();
        assert!(round.player(&current).unwrap().eliminated);
        assert!(round.check_conservation());
        assert_eq!(c.role_of(&current), None);

        // Two players remain, so the round goes on with the next one.
        let (next, _) = request_in(&out).unwrap();
        assert_ne!(next, current);
        assert!(out.iter().all(|e| e.recipient != current));
        assert!(out.iter().any(|e| matches!(
            &e.message,
            ServerMessage::Inform(InformPayload::State { last_move, .. })
                if last_move.contains(&GameEvent::PlayerEliminated { player: current.clone() })
        )));
    }

    #[test]
    fn test_malformed_and_unregistered_messages_are_dropped() {
        let (mut c, _) = started();
        let current = c.round().unwrap().current_player().to_string();

        assert!(send(&mut c, Performative::Action, &current, json!([1])).is_empty());
        let out = send(&mut c, Performative::Action, "stranger", json!({"action": "draw"}));
        assert!(out.is_empty());
        assert!(send(&mut c, Performative::Inform, &current, Value::Null).is_empty());

        let mut env = Envelope::new(
            Performative::Action,
            current.clone(),
            json!({"action": "draw"}),
        );
        env.recipient = "qagent".into();
        assert!(c.handle(Inbound::Message(env)).is_empty());

        assert_eq!(c.round().unwrap().turn_count(), 0);
    }

    #[test]
    fn test_late_subscriber_catches_up() {
        let (mut c, _) = started();

        let out = send(&mut c, Performative::Subscribe, "guest", Value::Null);
        assert_eq!(out.len(), 2);
        assert!(matches!(
            &out[1].message,
            ServerMessage::Inform(InformPayload::State { view, .. }) if view.hand.is_none()
        ));
    }

    #[test]
    fn test_seated_player_keeps_seat_on_resubscribe() {
        let (mut c, _) = started();
        let current = c.round().unwrap().current_player().to_string();

        let out = send(
            &mut c,
            Performative::Subscribe,
            &current,
            json!({"role": "spectator"}),
        );

        assert_eq!(out[0].message, ServerMessage::Confirm { role: Role::Player });
        assert_eq!(c.role_of(&current), Some(Role::Player));
        assert!(matches!(
            &out[1].message,
            ServerMessage::Inform(InformPayload::State { view, .. }) if view.hand.is_some()
        ));
        assert_eq!(request_in(&out).map(|(to, _)| to), Some(current.clone()));

        // Nobody is missing, so the next round still starts on its own.
        play_until(&mut c, out, |c, _| c.report().total_rounds >= 1);
        assert_eq!(c.status(), RoundStatus::InProgress);
        assert_eq!(c.round().unwrap().round(), 2);
    }
}
