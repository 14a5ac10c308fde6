//! Process management - Spawning, watching and killing one server process

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::error::{KillError, LaunchError};
use crate::platform;

/// Lines of server output kept in an early-exit error
const OUTPUT_TAIL_LINES: usize = 20;

/// What to run and where its output goes
#[derive(Debug, Clone)]
pub struct LaunchArgs {
    /// Path to the executable
    pub program: PathBuf,
    /// Command line arguments
    pub arguments: Vec<String>,
    /// Working directory of the child
    pub working_directory: Option<PathBuf>,
    /// File receiving the child's stdout and stderr
    pub log_path: PathBuf,
    /// Port the server is told to listen on
    pub port: u16,
}

impl LaunchArgs {
    pub fn new(program: impl Into<PathBuf>, port: u16, log_path: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            arguments: Vec::new(),
            working_directory: None,
            log_path: log_path.into(),
            port,
        }
    }

    pub fn with_arguments(mut self, args: Vec<String>) -> Self {
        self.arguments = args;
        self
    }

    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }
}

/// Exclusive owner of one running child process.
///
/// The child itself lives on a watcher thread that blocks in `wait()` and
/// hands the exit status back through a one-slot channel. The watcher never
/// blocks on send, so it finishes even if nobody reads the result.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: u32,
    port: u16,
    exit_rx: Receiver<io::Result<ExitStatus>>,
    exit_status: Option<ExitStatus>,
    log_path: PathBuf,
}

impl ProcessHandle {
    /// Spawn the process and give it `grace` to fail.
    ///
    /// An exit before the grace period elapses is reported as a launch error;
    /// otherwise the process is assumed to be up.
    pub fn start(args: &LaunchArgs, grace: Duration) -> Result<Self, LaunchError> {
        info!("start args: {:?} {:?}", args.program, args.arguments);

        let log = File::create(&args.log_path).map_err(|source| LaunchError::Log {
            path: args.log_path.clone(),
            source,
        })?;
        let log_err = log.try_clone().map_err(|source| LaunchError::Log {
            path: args.log_path.clone(),
            source,
        })?;

        let mut cmd = Command::new(&args.program);
        cmd.args(&args.arguments);
        if let Some(ref dir) = args.working_directory {
            cmd.current_dir(dir);
        }
        platform::detach(&mut cmd);

        let mut child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .spawn()
            .map_err(|source| LaunchError::Spawn {
                program: args.program.clone(),
                source,
            })?;

        let pid = child.id();
        let port = args.port;
        debug!("Spawned process with PID {} for port {}", pid, port);

        let (exit_tx, exit_rx) = mpsc::sync_channel(1);
        let watcher = thread::Builder::new()
            .name(format!("exit-watch-{}", port))
            .spawn(move || {
                let result = child.wait();
                // Nobody listening is fine: the slot is only read on early exit or reap
                let _ = exit_tx.try_send(result);
            });

        if let Err(e) = watcher {
            // The child was moved into the closure and dropped with it; kill it by PID
            error!("Failed to start exit watcher for PID {}: {}", pid, e);
            if let Err(kill_err) = platform::kill_process_tree(pid) {
                warn!("Failed to kill unwatched PID {}: {}", pid, kill_err);
            }
            return Err(LaunchError::Wait { port, source: e });
        }

        match exit_rx.recv_timeout(grace) {
            Ok(Ok(status)) => {
                let output = read_output_tail(&args.log_path);
                error!(
                    "Server on port {} exited during startup with {}",
                    port, status
                );
                if mentions_address_in_use(&output) {
                    Err(LaunchError::PortInUse { port })
                } else {
                    Err(LaunchError::EarlyExit {
                        port,
                        status,
                        output,
                    })
                }
            }
            Ok(Err(source)) => {
                error!("Error waiting for process {}: {}", pid, source);
                if let Err(kill_err) = platform::kill_process_tree(pid) {
                    warn!("Failed to kill unwatched PID {}: {}", pid, kill_err);
                }
                Err(LaunchError::Wait { port, source })
            }
            Err(RecvTimeoutError::Disconnected) => Err(LaunchError::WatcherLost { port }),
            Err(RecvTimeoutError::Timeout) => {
                info!("Server on port {} survived startup (PID {})", port, pid);
                Ok(Self {
                    pid,
                    port,
                    exit_rx,
                    exit_status: None,
                    log_path: args.log_path.clone(),
                })
            }
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Exit status, once the watcher has reported it
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status
    }

    /// Whether the process has not been observed to exit
    pub fn is_alive(&mut self) -> bool {
        self.poll_exit();
        self.exit_status.is_none() && platform::is_process_running(self.pid)
    }

    /// Force kill the process (and its group).
    ///
    /// A process that has already exited counts as killed.
    pub fn kill(&mut self) -> Result<(), KillError> {
        if self.poll_exit() {
            debug!("PID {} already exited, nothing to kill", self.pid);
            return Ok(());
        }

        match platform::kill_process_tree(self.pid) {
            Ok(()) => Ok(()),
            Err(e) if platform::is_already_gone(&e) => {
                debug!("PID {} was already gone", self.pid);
                Ok(())
            }
            Err(source) => Err(KillError {
                pid: self.pid,
                source,
            }),
        }
    }

    /// Wait up to `timeout` for the watcher to collect the exit status.
    ///
    /// Best effort: failures are logged and otherwise ignored.
    pub fn reap(&mut self, timeout: Duration) {
        if self.exit_status.is_some() {
            return;
        }

        match self.exit_rx.recv_timeout(timeout) {
            Ok(Ok(status)) => {
                debug!("PID {} reaped with {}", self.pid, status);
                self.exit_status = Some(status);
            }
            Ok(Err(e)) => warn!("Failed to reap PID {}: {}", self.pid, e),
            Err(RecvTimeoutError::Timeout) => {
                warn!("PID {} not reaped after {:?}", self.pid, timeout)
            }
            Err(RecvTimeoutError::Disconnected) => {
                warn!("Exit watcher for PID {} went away", self.pid)
            }
        }
    }

    /// Pick up an exit status the watcher may have posted. Returns true once exited.
    fn poll_exit(&mut self) -> bool {
        if self.exit_status.is_some() {
            return true;
        }

        match self.exit_rx.try_recv() {
            Ok(Ok(status)) => {
                self.exit_status = Some(status);
                true
            }
            Ok(Err(e)) => {
                warn!("Error waiting for PID {}: {}", self.pid, e);
                false
            }
            Err(TryRecvError::Empty) => false,
            Err(TryRecvError::Disconnected) => false,
        }
    }
}

fn read_output_tail(path: &Path) -> String {
    match std::fs::read_to_string(path) {
        Ok(contents) => {
            let lines: Vec<&str> = contents.lines().collect();
            let start = lines.len().saturating_sub(OUTPUT_TAIL_LINES);
            lines[start..].join("\n")
        }
        Err(e) => {
            warn!("Failed to read server output {}: {}", path.display(), e);
            String::new()
        }
    }
}

fn mentions_address_in_use(output: &str) -> bool {
    output
        .to_ascii_lowercase()
        .contains("address already in use")
}
