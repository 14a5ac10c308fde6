//! Core module - Instances, their processes, and the manager that launches them

mod error;
mod instance;
mod manager;
mod process;
pub mod settings;
pub mod status;

pub use error::{
    ConfigError, KillError, LaunchError, ProtocolError, ReplicationError, TimeoutError,
};
pub use instance::{Instance, InstanceId, InstanceStatus, ScratchFiles, INSTANCE_HOST};
pub use manager::{is_port_closed, query_status, wait_for_port, InstanceManager, PORT_RANGE};
pub use process::{LaunchArgs, ProcessHandle};
pub use settings::SupervisorConfig;
