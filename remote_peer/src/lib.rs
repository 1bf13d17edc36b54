//! # Remote Peer
//!
//! Two-process demo of the remote-call layer.
//!
//! ## Philosophy
//!
//! - **Same binary, two roles**: The parent re-executes itself as the child
//! - **Stdio is the channel**: Frames travel over the child's stdin and stdout
//! - **Logs go to stderr**: Stdout belongs to the channel
//!
//! ## Flow
//!
//! The parent:
//! - Spawns the child with piped stdio
//! - Waits for the child's target and readiness handshakes
//! - Calls `double`, `add` and `echo`, then stops the connection
//!
//! The child:
//! - Registers the calculator target and announces readiness
//! - Serves until the parent stops the connection

pub mod runtime;

pub use runtime::{
    calculator, drive, serve, CalculatorClient, PeerConfig, PeerError, PeerReport, PeerRole,
    PeerRuntime,
};
