//! Instance manager - Port allocation, readiness, status and replica joins

use std::collections::HashMap;
use std::io;
use std::net::TcpStream;
use std::ops::RangeInclusive;
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use redis::{Arg, Cmd, Connection, FromRedisValue, RedisError};
use rand::{Rng, SeedableRng};
use tracing::{debug, error, info, warn};

use super::error::{LaunchError, ProtocolError, ReplicationError, TimeoutError};
use super::instance::{Instance, INSTANCE_HOST};
use super::process::ProcessHandle;
use super::settings::SupervisorConfig;
use super::status::{parse_status, LINK_UP, MASTER_LINK_STATUS};

/// Ports drawn for random allocation
pub const PORT_RANGE: RangeInclusive<u16> = 1025..=65535;

/// Host dialled by readiness polling
const READY_HOST: &str = "localhost";

/// Launches instances and orchestrates them.
///
/// Holds no per-instance state; any number of instances may be created
/// from one manager, concurrently from several threads.
pub struct InstanceManager {
    config: SupervisorConfig,
    rng: Mutex<StdRng>,
}

impl InstanceManager {
    pub fn new(config: SupervisorConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Manager whose port sequence is reproducible
    pub fn with_seed(config: SupervisorConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(mut config: SupervisorConfig, rng: StdRng) -> Self {
        config.validate();
        Self {
            config,
            rng: Mutex::new(rng),
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Launch an instance on `port`. No retry.
    pub fn create_on_port(&self, port: u16) -> Result<Instance, LaunchError> {
        let mut instance = Instance::new(&self.config, port);
        let args = instance.launch_args(&self.config);

        let process = ProcessHandle::start(&args, self.config.launch_grace())?;
        instance.mark_running(process);

        info!("Instance {} running on port {}", instance.id(), port);
        Ok(instance)
    }

    /// Launch an instance on a random port, retrying on failure.
    ///
    /// Returns the last launch error once `port_retries` ports have failed.
    pub fn create_on_random_port(&self) -> Result<Instance, LaunchError> {
        let retries = self.config.port_retries;
        let mut attempt = 1;

        loop {
            let port = self.next_port();
            debug!("Trying port {} (attempt {}/{})", port, attempt, retries);

            match self.create_on_port(port) {
                Ok(instance) => return Ok(instance),
                Err(e) if attempt >= retries => {
                    error!("Could not start disposable server: {}", e);
                    return Err(e);
                }
                Err(e) => warn!("Could not start server on port {}: {}", port, e),
            }
            attempt += 1;
        }
    }

    fn next_port(&self) -> u16 {
        self.rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .gen_range(PORT_RANGE)
    }

    /// Block until the instance accepts TCP connections or `timeout` elapses
    pub fn wait_ready(&self, instance: &Instance, timeout: Duration) -> Result<(), TimeoutError> {
        wait_for_port(instance.port(), timeout, self.config.ready_poll_interval())
    }

    /// Run one command against the instance over a fresh connection
    pub fn execute<T: FromRedisValue>(
        &self,
        instance: &Instance,
        cmd: &Cmd,
    ) -> Result<T, ProtocolError> {
        let mut conn = connect(instance.host(), instance.port(), self.config.io_timeout())?;
        run(cmd, &mut conn)
    }

    /// Query and parse the instance's `INFO` block
    pub fn status(&self, instance: &Instance) -> Result<HashMap<String, String>, ProtocolError> {
        query_status(instance.host(), instance.port(), self.config.io_timeout())
    }

    /// Start a new instance replicating from `master` and wait for it to sync.
    ///
    /// On any failure after the replica was launched, the replica is stopped
    /// before the error is returned.
    pub fn attach_as_replica(&self, master: &Instance) -> Result<Instance, ReplicationError> {
        let replica = self.create_on_random_port()?;
        let port = replica.port();
        info!(
            "Attaching replica on port {} to master {}",
            port,
            master.address()
        );

        if let Err(e) = self.wait_ready(&replica, self.config.replica_ready_timeout()) {
            abandon(replica);
            return Err(e.into());
        }

        let mut directive = redis::cmd("SLAVEOF");
        directive.arg(master.host()).arg(master.port());
        if let Err(source) = self.execute::<()>(&replica, &directive) {
            abandon(replica);
            return Err(ReplicationError::Directive { port, source });
        }

        let attempts = self.config.replica_poll_attempts;
        let mut last_link_status = None;
        for attempt in 1..=attempts {
            let status = match self.status(&replica) {
                Ok(status) => status,
                Err(source) => {
                    abandon(replica);
                    return Err(ReplicationError::Status { port, source });
                }
            };

            let link = status.get(MASTER_LINK_STATUS).cloned();
            if link.as_deref() == Some(LINK_UP) {
                info!("Replica on port {} synced after {} polls", port, attempt);
                return Ok(replica);
            }

            debug!(
                "Replica on port {} link status {:?} (poll {}/{})",
                port, link, attempt, attempts
            );
            last_link_status = link;
            if attempt < attempts {
                thread::sleep(self.config.replica_poll_interval());
            }
        }

        abandon(replica);
        Err(ReplicationError::Timeout {
            port,
            attempts,
            last_link_status,
        })
    }
}

impl Default for InstanceManager {
    fn default() -> Self {
        Self::new(SupervisorConfig::default().with_env_overrides())
    }
}

/// Stop a replica whose join failed
fn abandon(mut replica: Instance) {
    warn!("Stopping replica on port {} after failed join", replica.port());
    if let Err(e) = replica.stop() {
        error!("Failed to stop replica on port {}: {}", replica.port(), e);
    }
}

/// Poll `localhost:port` until a TCP connection succeeds.
///
/// At least one connection is attempted, even with a zero timeout. On timeout
/// the last connection error is returned.
pub fn wait_for_port(port: u16, timeout: Duration, interval: Duration) -> Result<(), TimeoutError> {
    let started = Instant::now();
    // `None` when the timeout overflows `Instant`: wait without a deadline
    let deadline = started.checked_add(timeout);

    loop {
        let err = match TcpStream::connect((READY_HOST, port)) {
            Ok(conn) => {
                drop(conn);
                return Ok(());
            }
            Err(e) => e,
        };

        let now = Instant::now();
        let pause = match deadline {
            Some(deadline) if now >= deadline => {
                return Err(TimeoutError {
                    port,
                    waited: now - started,
                    source: err,
                });
            }
            Some(deadline) => interval.min(deadline - now),
            None => interval,
        };

        debug!("Could not connect to port {}, waiting {:?}", port, pause);
        thread::sleep(pause);
    }
}

/// Query and parse the `INFO` block of the server at `host:port`
pub fn query_status(
    host: &str,
    port: u16,
    io_timeout: Duration,
) -> Result<HashMap<String, String>, ProtocolError> {
    let mut conn = connect(host, port, io_timeout)?;
    let info: String = run(&redis::cmd("INFO"), &mut conn)?;
    Ok(parse_status(&info))
}

fn connect(host: &str, port: u16, io_timeout: Duration) -> Result<Connection, ProtocolError> {
    let connect_err = |source: RedisError| ProtocolError::Connect {
        host: host.to_string(),
        port,
        source,
    };

    let client = redis::Client::open((host, port)).map_err(connect_err)?;
    let conn = client
        .get_connection_with_timeout(io_timeout)
        .map_err(connect_err)?;
    conn.set_read_timeout(Some(io_timeout)).map_err(connect_err)?;
    conn.set_write_timeout(Some(io_timeout)).map_err(connect_err)?;
    Ok(conn)
}

fn run<T: FromRedisValue>(cmd: &Cmd, conn: &mut Connection) -> Result<T, ProtocolError> {
    cmd.query(conn).map_err(|source| ProtocolError::Command {
        command: command_name(cmd),
        source,
    })
}

fn command_name(cmd: &Cmd) -> String {
    match cmd.args_iter().next() {
        Some(Arg::Simple(name)) => String::from_utf8_lossy(name).into_owned(),
        _ => "command".to_string(),
    }
}

/// Whether nothing accepts connections on `port` any more
pub fn is_port_closed(port: u16) -> bool {
    match TcpStream::connect((INSTANCE_HOST, port)) {
        Ok(_) => false,
        Err(e) => e.kind() == io::ErrorKind::ConnectionRefused,
    }
}
