//! Disposable server instances for tests
//!
//! Launches short-lived `redis-server` processes on random ports, waits for
//! them to accept connections, and tears them down again. An instance can be
//! attached as a replica of another one.
//!
//! ```no_run
//! use std::time::Duration;
//! use disposable_server::core::InstanceManager;
//!
//! let manager = InstanceManager::default();
//!
//! // Dropping the instance stops the server, but stopping explicitly reports errors
//! let mut server = manager.create_on_random_port().expect("no free port");
//! manager
//!     .wait_ready(&server, Duration::from_millis(50))
//!     .expect("server not listening");
//!
//! let reply: String = manager
//!     .execute(&server, redis::cmd("SET").arg("foo").arg("bar"))
//!     .unwrap();
//! assert_eq!(reply, "OK");
//!
//! server.stop().unwrap();
//! ```

pub mod core;
pub mod platform;

/// Application name constant
pub const APP_NAME: &str = "disposable-server";

/// Application version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
