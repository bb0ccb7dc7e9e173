use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;

use crate::error::ConfigError;
use crate::signaling::challenge::{ChallengeConfig, DEFAULT_CHALLENGE_TTL, DEFAULT_DIFFICULTY};
use crate::signaling::registry::{RegistryConfig, DEFAULT_GRACE_PERIOD, DEFAULT_ID_ATTEMPTS};

pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:4173";
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 64 * 1024;

#[derive(Debug, Parser)]
#[command(
    name = "duolink",
    version,
    about = "Signaling relay for two-peer encrypted rooms"
)]
pub struct Args {
    /// Address to bind the HTTP/WebSocket listener to.
    #[arg(long, env = "DUOLINK_LISTEN_ADDR", default_value = DEFAULT_LISTEN_ADDR)]
    pub listen_addr: String,

    /// Seconds an issued challenge stays valid.
    #[arg(long, env = "DUOLINK_CHALLENGE_TTL_SECS", default_value_t = DEFAULT_CHALLENGE_TTL.as_secs())]
    pub challenge_ttl_secs: u64,

    /// Leading zero hex digits required in a challenge hash.
    #[arg(long, env = "DUOLINK_CHALLENGE_DIFFICULTY", default_value_t = DEFAULT_DIFFICULTY)]
    pub challenge_difficulty: u32,

    /// Seconds an empty room is kept before it is deleted.
    #[arg(long, env = "DUOLINK_ROOM_GRACE_SECS", default_value_t = DEFAULT_GRACE_PERIOD.as_secs())]
    pub room_grace_secs: u64,

    /// Largest accepted control frame.
    #[arg(long, env = "DUOLINK_MAX_MESSAGE_BYTES", default_value_t = DEFAULT_MAX_MESSAGE_BYTES)]
    pub max_message_bytes: usize,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long, env = "DUOLINK_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

/// Validated server settings.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub challenge_ttl: Duration,
    pub challenge_difficulty: u32,
    pub room_grace: Duration,
    pub max_message_bytes: usize,
}

impl ServerConfig {
    pub fn challenge_config(&self) -> ChallengeConfig {
        ChallengeConfig {
            ttl: self.challenge_ttl,
            difficulty: self.challenge_difficulty,
        }
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            grace_period: self.room_grace,
            id_attempts: DEFAULT_ID_ATTEMPTS,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 4173)),
            challenge_ttl: DEFAULT_CHALLENGE_TTL,
            challenge_difficulty: DEFAULT_DIFFICULTY,
            room_grace: DEFAULT_GRACE_PERIOD,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }
}

impl TryFrom<Args> for ServerConfig {
    type Error = ConfigError;

    fn try_from(args: Args) -> Result<Self, Self::Error> {
        let listen_addr: SocketAddr = args
            .listen_addr
            .parse()
            .map_err(|e| ConfigError::ListenAddr(args.listen_addr.clone(), e))?;
        if !(1..=16).contains(&args.challenge_difficulty) {
            return Err(ConfigError::Difficulty(args.challenge_difficulty));
        }
        if args.challenge_ttl_secs == 0 {
            return Err(ConfigError::ZeroDuration("challenge-ttl-secs"));
        }
        if args.room_grace_secs == 0 {
            return Err(ConfigError::ZeroDuration("room-grace-secs"));
        }

        Ok(ServerConfig {
            listen_addr,
            challenge_ttl: Duration::from_secs(args.challenge_ttl_secs),
            challenge_difficulty: args.challenge_difficulty,
            room_grace: Duration::from_secs(args.room_grace_secs),
            max_message_bytes: args.max_message_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["duolink"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = ServerConfig::try_from(parse(&["--listen-addr", "127.0.0.1:0"])).unwrap();
        assert_eq!(config.challenge_ttl, Duration::from_secs(90));
        assert_eq!(config.challenge_difficulty, 3);
        assert_eq!(config.room_grace, Duration::from_secs(60));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            ServerConfig::try_from(parse(&["--listen-addr", "nowhere"])),
            Err(ConfigError::ListenAddr(..))
        ));
        assert!(matches!(
            ServerConfig::try_from(parse(&[
                "--listen-addr",
                "127.0.0.1:0",
                "--challenge-difficulty",
                "40"
            ])),
            Err(ConfigError::Difficulty(40))
        ));
        assert!(matches!(
            ServerConfig::try_from(parse(&[
                "--listen-addr",
                "127.0.0.1:0",
                "--room-grace-secs",
                "0"
            ])),
            Err(ConfigError::ZeroDuration(_))
        ));
    }
}
