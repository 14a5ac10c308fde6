//! Error types for launching, probing and replicating server instances

use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use redis::RedisError;
use thiserror::Error;

/// Failure to bring up a server process
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("Failed to open output log {}: {source}", path.display())]
    Log {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to spawn {}: {source}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The server exited during the grace period because its port was taken
    #[error("Port {port} is already in use")]
    PortInUse { port: u16 },

    #[error("Server on port {port} exited during startup with {status}")]
    EarlyExit {
        port: u16,
        status: ExitStatus,
        /// Tail of the server's output log
        output: String,
    },

    #[error("Failed waiting on server process for port {port}: {source}")]
    Wait {
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("Exit watcher for port {port} went away")]
    WatcherLost { port: u16 },
}

impl LaunchError {
    /// Whether retrying on a different port may succeed
    pub fn is_port_in_use(&self) -> bool {
        matches!(self, Self::PortInUse { .. })
    }
}

/// Readiness polling ran out of time
#[derive(Debug, Error)]
#[error("Port {port} not ready after {waited:?}: {source}")]
pub struct TimeoutError {
    pub port: u16,
    pub waited: Duration,
    /// Last connection error observed while polling
    #[source]
    pub source: io::Error,
}

impl TimeoutError {
    pub fn is_connection_refused(&self) -> bool {
        self.source.kind() == io::ErrorKind::ConnectionRefused
    }
}

/// The OS refused to terminate a process
#[derive(Debug, Error)]
#[error("Failed to kill process {pid}: {source}")]
pub struct KillError {
    pub pid: u32,
    #[source]
    pub source: io::Error,
}

/// Talking to a running instance failed
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Failed to connect to {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: RedisError,
    },

    #[error("{command} failed: {source}")]
    Command {
        command: String,
        #[source]
        source: RedisError,
    },
}

/// A replica join failed; the new replica has been stopped
#[derive(Debug, Error)]
pub enum ReplicationError {
    #[error("Failed to launch replica: {0}")]
    Launch(#[from] LaunchError),

    #[error("Replica never became ready: {0}")]
    NotReady(#[from] TimeoutError),

    #[error("Replica on port {port} rejected the replicate directive: {source}")]
    Directive {
        port: u16,
        #[source]
        source: ProtocolError,
    },

    #[error("Failed to query status of replica on port {port}: {source}")]
    Status {
        port: u16,
        #[source]
        source: ProtocolError,
    },

    #[error(
        "Replica on port {port} did not sync after {attempts} attempts (link status: {})",
        last_link_status.as_deref().unwrap_or("unknown")
    )]
    Timeout {
        port: u16,
        attempts: u32,
        last_link_status: Option<String>,
    },
}

impl ReplicationError {
    /// Port of the replica that was created and then stopped, if any
    pub fn replica_port(&self) -> Option<u16> {
        match self {
            Self::Launch(_) => None,
            Self::NotReady(e) => Some(e.port),
            Self::Directive { port, .. }
            | Self::Status { port, .. }
            | Self::Timeout { port, .. } => Some(*port),
        }
    }
}

/// Configuration could not be loaded
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}
