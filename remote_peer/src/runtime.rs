//! # Peer Runtime
//!
//! Parent and child halves of the two-process demo.

use ipc::{Channel, StreamChannel};
use remote_ipc::{
    remote_interface, ConnectionConfig, IpcConnection, MethodTable, RemoteIpcError, TargetError,
};
use serde_json::Value;
use std::env;
use std::io;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::Duration;
use thiserror::Error;

/// Peer runtime error types
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("Connection error: {0}")]
    Connection(#[from] RemoteIpcError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Child process failed: {0}")]
    ChildFailed(String),
}

/// Which side of the demo this process plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRole {
    /// Spawns the child and calls into it
    Parent,
    /// Serves calls over stdin/stdout
    Child,
}

/// Peer runtime configuration
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// Role of this process
    pub role: PeerRole,
    /// Number the parent asks the child to double
    pub value: i64,
    /// Timeout for each call the parent makes
    pub call_timeout: Option<Duration>,
    /// Bound on the startup handshakes
    pub handshake_timeout: Duration,
    /// Config file handed through to the child
    pub config_path: Option<PathBuf>,
    /// Connection tunables
    pub connection: ConnectionConfig,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            role: PeerRole::Parent,
            value: 21,
            call_timeout: Some(Duration::from_secs(5)),
            handshake_timeout: Duration::from_secs(10),
            config_path: None,
            connection: ConnectionConfig::default(),
        }
    }
}

remote_interface! {
    /// Client side of the calculator served by the child
    pub struct CalculatorClient {
        fn double(n: i64) -> i64;
        fn add(x: i64, y: i64) -> i64;
        fn echo(value: Value) -> Value;
    }
}

/// The target the child serves
pub fn calculator() -> MethodTable {
    MethodTable::new()
        .method("double", |n: i64| {
            n.checked_mul(2)
                .ok_or_else(|| TargetError::custom("Overflow", format!("{} * 2 overflows", n)))
        })
        .method("add", |(x, y): (i64, i64)| {
            x.checked_add(y)
                .ok_or_else(|| TargetError::custom("Overflow", format!("{} + {} overflows", x, y)))
        })
        .raw_method("echo", Ok)
}

/// What the parent got back from the child
#[derive(Debug, Clone, PartialEq)]
pub struct PeerReport {
    pub doubled: i64,
    pub sum: i64,
    pub echoed: Value,
}

/// Serves [`calculator`] on `connection` until the peer stops it
pub fn serve<C: Channel + 'static>(connection: &IpcConnection<C>) -> Result<(), PeerError> {
    connection.register_target(calculator())?;
    let reception = connection.spawn()?;
    connection.notify_ready()?;
    tracing::info!(connection = %connection.id(), "serving calculator");

    match reception.join() {
        Ok(result) => result?,
        Err(_) => return Err(PeerError::ChildFailed("reception loop panicked".to_string())),
    }
    tracing::info!(connection = %connection.id(), "peer stopped the connection");
    Ok(())
}

/// Waits for the serving peer, makes the demo calls, then stops both sides
pub fn drive<C: Channel + 'static>(
    connection: &IpcConnection<C>,
    config: &PeerConfig,
) -> Result<PeerReport, PeerError> {
    let reception = connection.spawn()?;

    let outcome = exchange(connection, config);
    connection.stop_connection();

    if let Ok(result) = reception.join() {
        if let Err(err) = result {
            tracing::warn!(error = %err, "reception loop ended with an error");
        }
    }
    outcome
}

fn exchange<C: Channel + 'static>(
    connection: &IpcConnection<C>,
    config: &PeerConfig,
) -> Result<PeerReport, PeerError> {
    connection.wait_for_remote_target_set(Some(config.handshake_timeout))?;
    connection.wait_for_remote_ready(Some(config.handshake_timeout))?;
    tracing::info!(connection = %connection.id(), "child is ready");

    let mut client = CalculatorClient::new(connection);
    if let Some(timeout) = config.call_timeout {
        client = client.with_timeout(timeout);
    }

    let doubled = client.double(config.value)?;
    let sum = client.add(config.value, doubled)?;
    let echoed = client.echo(serde_json::json!({
        "value": config.value,
        "doubled": doubled,
        "tags": ["parent", "child"],
    }))?;

    Ok(PeerReport {
        doubled,
        sum,
        echoed,
    })
}

/// Peer process runtime
pub struct PeerRuntime {
    config: PeerConfig,
}

impl PeerRuntime {
    pub fn new(config: PeerConfig) -> Self {
        Self { config }
    }

    /// Runs the configured role to completion
    pub fn run(&self) -> Result<Option<PeerReport>, PeerError> {
        match self.config.role {
            PeerRole::Parent => self.run_parent().map(Some),
            PeerRole::Child => self.run_child().map(|()| None),
        }
    }

    fn run_child(&self) -> Result<(), PeerError> {
        let channel = StreamChannel::new(io::stdin(), io::stdout())?;
        let connection = self.build(channel)?;
        serve(&connection)
    }

    fn run_parent(&self) -> Result<PeerReport, PeerError> {
        let mut child = self.spawn_child()?;
        let (stdout, stdin) = match (child.stdout.take(), child.stdin.take()) {
            (Some(stdout), Some(stdin)) => (stdout, stdin),
            _ => {
                let _ = child.kill();
                return Err(PeerError::ChildFailed("child stdio not piped".to_string()));
            }
        };

        let connection = self.build(StreamChannel::new(stdout, stdin)?)?;
        let report = drive(&connection, &self.config);

        let status = child.wait()?;
        tracing::info!(%status, "child exited");
        let report = report?;
        if !status.success() {
            return Err(PeerError::ChildFailed(status.to_string()));
        }
        Ok(report)
    }

    fn spawn_child(&self) -> Result<Child, PeerError> {
        let mut command = Command::new(env::current_exe()?);
        command.args(["--role", "child"]);
        if let Some(path) = &self.config.config_path {
            command.arg("--config").arg(path);
        }
        let child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;
        tracing::info!(pid = child.id(), "spawned child");
        Ok(child)
    }

    fn build<C: Channel + 'static>(&self, channel: C) -> Result<IpcConnection<C>, PeerError> {
        Ok(IpcConnection::builder(channel)
            .config(self.config.connection.clone())
            .build()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use remote_ipc::{ConnectionPhase, Target};
    use serde_json::json;
    use std::thread;

    fn fast() -> PeerConfig {
        PeerConfig {
            connection: ConnectionConfig::default()
                .with_stop_ack_timeout(Duration::from_millis(300))
                .with_recv_poll_interval(Duration::from_millis(10))
                .with_poll_interval(Duration::from_millis(5)),
            ..PeerConfig::default()
        }
    }

    #[test]
    fn test_calculator_target() {
        let target = calculator();
        assert_eq!(target.invoke("double", json!(21)).unwrap(), json!(42));
        assert_eq!(target.invoke("add", json!([2, 3])).unwrap(), json!(5));
        assert!(target.invoke("double", json!(i64::MAX)).is_err());
    }

    #[test]
    fn test_drive_and_serve_in_process() {
        let config = fast();
        let (left, right) = ipc::duplex();
        let server = IpcConnection::builder(left)
            .config(config.connection.clone())
            .build()
            .unwrap();
        let client = IpcConnection::builder(right)
            .config(config.connection.clone())
            .build()
            .unwrap();

        let serving = {
            let server = server.clone();
            thread::spawn(move || serve(&server))
        };

        let report = drive(&client, &config).unwrap();
        assert_eq!(report.doubled, 42);
        assert_eq!(report.sum, 63);
        assert_eq!(report.echoed["tags"], json!(["parent", "child"]));

        serving.join().unwrap().unwrap();
        assert_eq!(server.phase(), ConnectionPhase::Stopped);
        assert_eq!(client.phase(), ConnectionPhase::Stopped);
    }

    #[test]
    fn test_drive_reports_remote_errors() {
        let mut config = fast();
        config.value = i64::MAX;
        let (left, right) = ipc::duplex();
        let server = IpcConnection::builder(left)
            .config(config.connection.clone())
            .build()
            .unwrap();
        let client = IpcConnection::builder(right)
            .config(config.connection.clone())
            .build()
            .unwrap();

        let serving = {
            let server = server.clone();
            thread::spawn(move || serve(&server))
        };

        let err = drive(&client, &config).unwrap_err();
        match err {
            PeerError::Connection(err) => assert!(err.remote().unwrap().is("Overflow")),
            other => panic!("unexpected error: {}", other),
        }
        serving.join().unwrap().unwrap();
    }
}
