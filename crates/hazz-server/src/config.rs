//! Server configuration read from the environment.

use hazz_core::{PlayerId, RoundConfig, StrategyKind, VoidRoundPolicy};
use hazz_core::{DEFAULT_HAND_SIZE, DEFAULT_TURN_LIMIT};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_PLAYERS: &str = "human,qagent,randomagent";
const DEFAULT_CONTROLLER: &str = "human";
const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 500;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value:?} ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("At least 2 players are required, got {0}")]
    TooFewPlayers(usize),

    #[error("Duplicate player identity: {0}")]
    DuplicatePlayer(PlayerId),

    #[error("Local bot {0} is not one of the configured players")]
    UnknownBot(PlayerId),
}

/// A seat played by an in-process strategy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalBot {
    pub identity: PlayerId,
    pub strategy: StrategyKind,
}

/// Everything the coordinator needs to run a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Expected player identities
    pub players: Vec<PlayerId>,
    /// Identity allowed to issue commands
    pub controller: PlayerId,
    pub seed: Option<u64>,
    pub round: RoundConfig,
    pub void_policy: VoidRoundPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            players: split_list(DEFAULT_PLAYERS),
            controller: DEFAULT_CONTROLLER.to_string(),
            seed: None,
            round: RoundConfig::default(),
            void_policy: VoidRoundPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub session: SessionConfig,
    pub local_bots: Vec<LocalBot>,
    pub policy_table: Option<PathBuf>,
    pub shutdown_grace: Duration,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build a config from any variable source. Unset variables take
    /// their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        let addr: SocketAddr =
            parse_var("SERVER_ADDR", get("SERVER_ADDR"), DEFAULT_ADDR.parse().ok())?;

        let players = split_list(&get("HAZZ_PLAYERS").unwrap_or_else(|| DEFAULT_PLAYERS.into()));
        if players.len() < 2 {
            return Err(ConfigError::TooFewPlayers(players.len()));
        }
        for (i, id) in players.iter().enumerate() {
            if players[..i].contains(id) {
                return Err(ConfigError::DuplicatePlayer(id.clone()));
            }
        }

        let controller = get("HAZZ_CONTROLLER")
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|| DEFAULT_CONTROLLER.into());

        let seed = match get("HAZZ_SEED") {
            Some(value) => Some(parse_var::<u64>("HAZZ_SEED", Some(value), None)?),
            None => None,
        };

        let hand_size: usize =
            parse_var("HAZZ_HAND_SIZE", get("HAZZ_HAND_SIZE"), Some(DEFAULT_HAND_SIZE))?;
        if hand_size == 0 {
            return Err(invalid("HAZZ_HAND_SIZE", "0", "must be at least 1"));
        }

        let turn_limit: u32 =
            parse_var("HAZZ_TURN_LIMIT", get("HAZZ_TURN_LIMIT"), Some(DEFAULT_TURN_LIMIT))?;
        if turn_limit == 0 {
            return Err(invalid("HAZZ_TURN_LIMIT", "0", "must be at least 1"));
        }

        let void_policy = parse_var(
            "HAZZ_VOID_POLICY",
            get("HAZZ_VOID_POLICY"),
            Some(VoidRoundPolicy::default()),
        )?;

        let local_bots = match get("HAZZ_LOCAL_BOTS") {
            Some(list) => parse_bots(&list, &players)?,
            None => Vec::new(),
        };

        let grace_ms: u64 = parse_var(
            "HAZZ_SHUTDOWN_GRACE_MS",
            get("HAZZ_SHUTDOWN_GRACE_MS"),
            Some(DEFAULT_SHUTDOWN_GRACE_MS),
        )?;

        Ok(Self {
            addr,
            session: SessionConfig {
                players,
                controller,
                seed,
                round: RoundConfig {
                    hand_size,
                    turn_limit,
                },
                void_policy,
            },
            local_bots,
            policy_table: get("HAZZ_POLICY_TABLE").map(PathBuf::from),
            shutdown_grace: Duration::from_millis(grace_ms),
        })
    }
}

fn invalid(var: &'static str, value: &str, reason: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Parse `value` if present, otherwise fall back to `default`. A missing
/// value with no default is an error.
fn parse_var<T>(
    var: &'static str,
    value: Option<String>,
    default: Option<T>,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: ToString,
{
    match (value, default) {
        (Some(value), _) => value
            .trim()
            .parse()
            .map_err(|e: T::Err| invalid(var, &value, e)),
        (None, Some(default)) => Ok(default),
        (None, None) => Err(invalid(var, "", "missing")),
    }
}

fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_bots(list: &str, players: &[PlayerId]) -> Result<Vec<LocalBot>, ConfigError> {
    split_list(list)
        .into_iter()
        .map(|entry| {
            let (identity, strategy) = entry
                .split_once(':')
                .ok_or_else(|| invalid("HAZZ_LOCAL_BOTS", &entry, "expected identity:strategy"))?;
            let strategy: StrategyKind = strategy
                .trim()
                .parse()
                .map_err(|e| invalid("HAZZ_LOCAL_BOTS", &entry, e))?;

            let identity = identity.trim().to_string();
            if !players.contains(&identity) {
                return Err(ConfigError::UnknownBot(identity));
            }
            Ok(LocalBot { identity, strategy })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<ServerConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|var| vars.get(var).cloned())
    }

    #[test]
    fn test_defaults() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.addr, "0.0.0.0:8080".parse::<SocketAddr>().unwrap());
        assert_eq!(cfg.session, SessionConfig::default());
        assert_eq!(
            cfg.session.players,
            vec!["human", "qagent", "randomagent"]
        );
        assert!(cfg.local_bots.is_empty());
        assert_eq!(cfg.shutdown_grace, Duration::from_millis(500));
    }

    #[test]
    fn test_overrides() {
        let cfg = config(&[
            ("HAZZ_PLAYERS", "alice, bob ,carol"),
            ("HAZZ_CONTROLLER", "alice"),
            ("HAZZ_SEED", "42"),
            ("HAZZ_HAND_SIZE", "5"),
            ("HAZZ_TURN_LIMIT", "100"),
            ("HAZZ_VOID_POLICY", "rank_by_cards"),
            ("HAZZ_LOCAL_BOTS", "bob:random,carol:heuristic"),
        ])
        .unwrap();

        assert_eq!(cfg.session.players, vec!["alice", "bob", "carol"]);
        assert_eq!(cfg.session.controller, "alice");
        assert_eq!(cfg.session.seed, Some(42));
        assert_eq!(cfg.session.round.hand_size, 5);
        assert_eq!(cfg.session.round.turn_limit, 100);
        assert_eq!(cfg.session.void_policy, VoidRoundPolicy::RankByCardsHeld);
        assert_eq!(
            cfg.local_bots,
            vec![
                LocalBot {
                    identity: "bob".into(),
                    strategy: StrategyKind::Random
                },
                LocalBot {
                    identity: "carol".into(),
                    strategy: StrategyKind::Frequency
                },
            ]
        );
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            config(&[("HAZZ_SEED", "abc")]),
            Err(ConfigError::Invalid { var: "HAZZ_SEED", .. })
        ));
        assert!(matches!(
            config(&[("HAZZ_HAND_SIZE", "0")]),
            Err(ConfigError::Invalid { .. })
        ));
        assert!(matches!(
            config(&[("HAZZ_PLAYERS", "solo")]),
            Err(ConfigError::TooFewPlayers(1))
        ));
        assert!(matches!(
            config(&[("HAZZ_PLAYERS", "a,b,a")]),
            Err(ConfigError::DuplicatePlayer(_))
        ));
        assert!(matches!(
            config(&[("HAZZ_LOCAL_BOTS", "stranger:random")]),
            Err(ConfigError::UnknownBot(_))
        ));
        assert!(matches!(
            config(&[("HAZZ_LOCAL_BOTS", "qagent")]),
            Err(ConfigError::Invalid { .. })
        ));
        assert!(matches!(
            config(&[("SERVER_ADDR", "nowhere")]),
            Err(ConfigError::Invalid { .. })
        ));
    }
}
