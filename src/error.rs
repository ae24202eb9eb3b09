use std::path::PathBuf;
use thiserror::Error;

/// Expected, player-facing outcomes of a teleport operation.
///
/// None of these are fatal; the calling command turns them into a message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TeleportError {
    #[error("nothing to teleport to")]
    NotFound,
    #[error("a teleport is already in progress")]
    Busy,
    #[error("cannot send a teleport request to yourself")]
    SelfRequest,
    #[error("a request to that player is already pending")]
    AlreadyPending,
    #[error("the teleport request has expired")]
    Expired,
    #[error("no safe location found after {attempts} attempts")]
    SearchFailed { attempts: usize },
    #[error("command on cooldown for {remaining_seconds}s")]
    OnCooldown { remaining_seconds: u64 },
    #[error("current position is unknown or invalid")]
    InvalidOrigin,
    #[error("player '{0}' is not online")]
    UnknownPlayer(String),
    #[error("player is no longer online")]
    PlayerOffline,
    #[error("destination does not exist")]
    UnknownDestination,
    #[error(transparent)]
    Host(#[from] HostError),
}

/// Failures reported by the host simulation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("player is offline")]
    PlayerOffline,
    #[error("unknown world '{0}'")]
    UnknownWorld(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("player document io failed for {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("player document parse failed for {}: {source}", path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("player document id mismatch: expected {expected}, got {found}")]
    IdMismatch { expected: String, found: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0}")]
    Usage(String),
    #[error("config read failed for {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("config parse failed for {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("command missing name")]
    MissingName,
    #[error("/{command} requires a {argument}")]
    MissingArgument {
        command: &'static str,
        argument: &'static str,
    },
}

/// Startup failures surfaced by [`crate::run`].
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("logging init failed: {0}")]
    Logging(String),
    #[error("console io failed: {0}")]
    Console(#[from] std::io::Error),
}
