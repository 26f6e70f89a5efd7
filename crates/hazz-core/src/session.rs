//! Cross-round bookkeeping: per-round results and win/loss standings.

use crate::game::RoundOutcome;
use crate::player::PlayerId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// How rounds cut off by the turn limit are scored
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoidRoundPolicy {
    /// Listed in the report, left out of the standings
    #[default]
    Exclude,
    /// Remaining players are ranked by cards held (fewest first) and the
    /// round counts toward the standings
    RankByCardsHeld,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown void round policy: {0}")]
pub struct ParsePolicyError(String);

impl FromStr for VoidRoundPolicy {
    type Err = ParsePolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exclude" => Ok(VoidRoundPolicy::Exclude),
            "rank_by_cards" | "rank_by_cards_held" => Ok(VoidRoundPolicy::RankByCardsHeld),
            other => Err(ParsePolicyError(other.to_string())),
        }
    }
}

/// The result of one completed round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundRecord {
    pub round: u32,
    pub finish_order: Vec<PlayerId>,
    pub turns: u32,
    /// Cut off at the turn limit
    pub void: bool,
    /// Whether this round contributed a win and a loss to the standings
    pub scored: bool,
}

impl RoundRecord {
    pub fn winner(&self) -> Option<&str> {
        self.scored
            .then(|| self.finish_order.first().map(String::as_str))
            .flatten()
    }

    pub fn loser(&self) -> Option<&str> {
        self.scored
            .then(|| self.finish_order.last().map(String::as_str))
            .flatten()
    }
}

/// One row of the standings table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Standing {
    pub player: PlayerId,
    pub wins: u32,
    pub losses: u32,
}

/// Everything known about the session so far
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionReport {
    pub total_rounds: usize,
    pub rounds: Vec<RoundRecord>,
    /// Most wins first, ties broken by identity
    pub standings: Vec<Standing>,
}

impl fmt::Display for SessionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "GAME SESSION REPORT")?;
        writeln!(f, "Total rounds played: {}", self.total_rounds)?;
        writeln!(f)?;
        writeln!(f, "Results per round:")?;
        for r in &self.rounds {
            let marker = if r.void { " [void]" } else { "" };
            writeln!(
                f,
                "  Round {:2}: {}  ({} turns){}",
                r.round,
                r.finish_order.join(" > "),
                r.turns,
                marker
            )?;
        }
        writeln!(f)?;
        writeln!(f, "Overall standings:")?;
        for s in &self.standings {
            writeln!(
                f,
                "  {:15}: {} win(s), {} loss(es)",
                s.player, s.wins, s.losses
            )?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Tally {
    wins: u32,
    losses: u32,
}

/// Accumulates round results across a session
#[derive(Debug, Clone, Default)]
pub struct SessionTracker {
    policy: VoidRoundPolicy,
    rounds: Vec<RoundRecord>,
    tallies: BTreeMap<PlayerId, Tally>,
}

impl SessionTracker {
    pub fn new(policy: VoidRoundPolicy) -> Self {
        Self {
            policy,
            rounds: Vec::new(),
            tallies: BTreeMap::new(),
        }
    }

    /// Make sure `player` shows up in the standings even without results
    pub fn register_player(&mut self, player: &str) {
        self.tallies.entry(player.to_string()).or_default();
    }

    pub fn rounds_played(&self) -> usize {
        self.rounds.len()
    }

    /// Record a finished round and update the standings.
    pub fn record_round(&mut self, outcome: &RoundOutcome, turns: u32) -> &RoundRecord {
        let (finish_order, void, scored) = match outcome {
            // A round decided only by eliminations has nobody to rank against.
            RoundOutcome::Finished { finish_order } => {
                (finish_order.clone(), false, finish_order.len() >= 2)
            }
            RoundOutcome::Void {
                finish_order,
                remaining,
                ..
            } => match self.policy {
                VoidRoundPolicy::Exclude => (finish_order.clone(), true, false),
                VoidRoundPolicy::RankByCardsHeld => {
                    let mut by_cards = remaining.clone();
                    // Stable: equal hands keep rotation order.
                    by_cards.sort_by_key(|h| h.cards);

                    let mut order = finish_order.clone();
                    order.extend(by_cards.into_iter().map(|h| h.player));
                    let scored = order.len() >= 2;
                    (order, true, scored)
                }
            },
        };

        for player in &finish_order {
            self.register_player(player);
        }

        let record = RoundRecord {
            round: self.rounds.len() as u32 + 1,
            finish_order,
            turns,
            void,
            scored,
        };

        if let Some(winner) = record.winner() {
            if let Some(t) = self.tallies.get_mut(winner) {
                t.wins += 1;
            }
        }
        if let Some(loser) = record.loser() {
            if let Some(t) = self.tallies.get_mut(loser) {
                t.losses += 1;
            }
        }

        self.rounds.push(record);
        &self.rounds[self.rounds.len() - 1]
    }

    pub fn standings(&self) -> Vec<Standing> {
        let mut standings: Vec<Standing> = self
            .tallies
            .iter()
            .map(|(player, t)| Standing {
                player: player.clone(),
                wins: t.wins,
                losses: t.losses,
            })
            .collect();
        standings.sort_by(|a, b| b.wins.cmp(&a.wins).then_with(|| a.player.cmp(&b.player)));
        standings
    }

    pub fn report(&self) -> SessionReport {
        SessionReport {
            total_rounds: self.rounds.len(),
            rounds: self.rounds.clone(),
            standings: self.standings(),
        }
    }
}
