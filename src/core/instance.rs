//! Instance management - One disposable server bound to one port

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use super::error::KillError;
use super::process::{LaunchArgs, ProcessHandle};
use super::settings::SupervisorConfig;

/// Host the supervisor uses to reach its instances
pub const INSTANCE_HOST: &str = "127.0.0.1";

/// Unique identifier for an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub Uuid);

impl InstanceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status of an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceStatus {
    /// Not launched yet
    Pending,
    /// Process survived startup and has not been stopped
    Running,
    /// Process has been killed and reaped
    Stopped,
}

impl InstanceStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Stopped => "Stopped",
        }
    }
}

/// Scratch files of one instance.
///
/// The data file and output log carry the creation time in nanoseconds so
/// instances created concurrently, even on the same port, never share them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScratchFiles {
    /// Server working directory (`--dir`)
    pub working_dir: PathBuf,
    /// `<dir>/<prefix>.<port>.pid`
    pub pid_file: PathBuf,
    /// `dump.<port>.<nanos>.rdb`, relative to the working directory
    pub data_file: String,
    /// `<dir>/<prefix>.<port>.<nanos>.log`
    pub log_file: PathBuf,
}

impl ScratchFiles {
    pub fn new(config: &SupervisorConfig, port: u16, created_at: DateTime<Utc>) -> Self {
        let nanos = created_at.timestamp_nanos_opt().unwrap_or_default();
        let dir = &config.scratch_dir;
        Self {
            working_dir: dir.clone(),
            pid_file: dir.join(format!("{}.{}.pid", config.file_prefix, port)),
            data_file: format!("dump.{}.{}.rdb", port, nanos),
            log_file: dir.join(format!("{}.{}.{}.log", config.file_prefix, port, nanos)),
        }
    }
}

/// A disposable server process.
///
/// The instance exclusively owns its process. Dropping it stops the process.
#[derive(Debug)]
pub struct Instance {
    id: InstanceId,
    port: u16,
    status: InstanceStatus,
    process: Option<ProcessHandle>,
    created_at: DateTime<Utc>,
    scratch: ScratchFiles,
    reap_timeout: Duration,
}

impl Instance {
    pub(crate) fn new(config: &SupervisorConfig, port: u16) -> Self {
        let created_at = Utc::now();
        Self {
            id: InstanceId::new(),
            port,
            status: InstanceStatus::Pending,
            process: None,
            created_at,
            scratch: ScratchFiles::new(config, port, created_at),
            reap_timeout: config.reap_timeout(),
        }
    }

    /// Arguments that start the server on this instance's port and scratch files
    pub(crate) fn launch_args(&self, config: &SupervisorConfig) -> LaunchArgs {
        LaunchArgs::new(&config.binary_path, self.port, &self.scratch.log_file)
            .with_arguments(vec![
                "--port".to_string(),
                self.port.to_string(),
                "--pidfile".to_string(),
                self.scratch.pid_file.display().to_string(),
                "--dir".to_string(),
                self.scratch.working_dir.display().to_string(),
                "--dbfilename".to_string(),
                self.scratch.data_file.clone(),
            ])
            .with_working_directory(&self.scratch.working_dir)
    }

    /// Mark instance as running with its freshly started process
    pub(crate) fn mark_running(&mut self, process: ProcessHandle) {
        debug_assert_eq!(self.status, InstanceStatus::Pending);
        self.process = Some(process);
        self.status = InstanceStatus::Running;
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn host(&self) -> &'static str {
        INSTANCE_HOST
    }

    /// `host:port` of the instance
    pub fn address(&self) -> String {
        format!("{}:{}", INSTANCE_HOST, self.port)
    }

    pub fn status(&self) -> InstanceStatus {
        self.status
    }

    pub fn is_running(&self) -> bool {
        self.status == InstanceStatus::Running
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().map(ProcessHandle::pid)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn scratch_files(&self) -> &ScratchFiles {
        &self.scratch
    }

    pub fn log_file(&self) -> &Path {
        &self.scratch.log_file
    }

    /// Stop the server: kill it and wait for it to be reaped.
    ///
    /// Stopping an instance that holds no process does nothing. If the kill
    /// fails the process handle is kept, so a later `stop` (or the drop)
    /// tries again.
    pub fn stop(&mut self) -> Result<(), KillError> {
        if self.status == InstanceStatus::Running {
            self.status = InstanceStatus::Stopped;
        }

        let Some(process) = self.process.as_mut() else {
            return Ok(());
        };

        info!("Stopping instance {} on port {}", self.id, self.port);
        process.kill()?;
        process.reap(self.reap_timeout);
        self.process = None;
        Ok(())
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Failed to stop instance on port {}: {}", self.port, e);
        }
    }
}
