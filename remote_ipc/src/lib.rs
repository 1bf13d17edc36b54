//! # Remote IPC
//!
//! Synchronous remote calls over a duplex message [`Channel`](ipc::Channel).
//!
//! ## Philosophy
//!
//! - **Symmetric**: Both sides of a connection can call and serve at once
//! - **Never hang**: Every call returns a value, a remote error, a timeout, or
//!   [`RemoteIpcError::ConnectionStopped`]
//! - **Errors are data**: Remote failures cross the channel as
//!   [`RemoteException`] envelopes, never as live error values
//! - **Explicit dispatch**: Functions are called by name; typed wrappers are
//!   generated with [`remote_interface!`]
//!
//! ## Core Concepts
//!
//! - [`IpcConnection`]: call dispatcher, reception loop, and lifecycle
//! - [`Target`]: what a peer may invoke; [`MethodTable`] builds one from closures
//! - [`Scheduler`]: optional hook deciding where target functions run
//! - [`ConnectionConfig`]: timeouts, poll intervals, worker pool size
//!
//! ## Example
//!
//! ```
//! use remote_ipc::{IpcConnection, MethodTable};
//! use serde_json::json;
//!
//! let (left, right) = ipc::duplex();
//! let server = IpcConnection::new(left);
//! let client = IpcConnection::new(right);
//!
//! server
//!     .register_target(MethodTable::new().method("double", |n: i64| Ok(n * 2)))
//!     .unwrap();
//! let _server_loop = server.spawn().unwrap();
//! let _client_loop = client.spawn().unwrap();
//!
//! assert_eq!(client.call("double", json!(21), None).unwrap(), json!(42));
//! client.stop_connection();
//! ```

pub mod config;
pub mod connection;
pub mod control;
pub mod envelope;
pub mod error;
pub mod pending;
pub mod proxy;
pub mod target;
pub mod worker;

pub use config::ConnectionConfig;
pub use connection::{ConnectionBuilder, IpcConnection};
pub use control::ConnectionPhase;
pub use envelope::{CallOutcome, RemoteException};
pub use error::{RemoteExecutionError, RemoteIpcError, Result};
pub use proxy::RemoteProxy;
pub use target::{InlineScheduler, InvocationResult, Job, MethodTable, Scheduler, Target, TargetError};

pub use ipc;
