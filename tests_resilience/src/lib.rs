//! Resilience Test Utilities
//!
//! Shared fixtures for the connection-level integration tests.
//!
//! ## Test Philosophy
//!
//! - **No silent hangs**: Every call ends with a value, a remote error, a timeout, or a stop
//! - **Both directions**: Peers call and serve at the same time
//! - **Faults are first-class**: Disconnects, late responses, and panics are exercised directly
//! - **Bounded**: Every wait in a test has a deadline

use ipc::{duplex, MemoryChannel};
use parking_lot::{Condvar, Mutex};
use remote_ipc::{
    ConnectionConfig, InvocationResult, IpcConnection, Job, MethodTable, RemoteException, Result,
    Scheduler, TargetError,
};
use serde_json::Value;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Once};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

static TRACING: Once = Once::new();

/// Installs a test-friendly tracing subscriber, once per test binary
///
/// Honors `RUST_LOG`; silent by default.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("off")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Configuration with short intervals so stop paths finish quickly
pub fn fast_config() -> ConnectionConfig {
    ConnectionConfig::default()
        .with_stop_ack_timeout(Duration::from_millis(300))
        .with_recv_poll_interval(Duration::from_millis(10))
        .with_poll_interval(Duration::from_millis(5))
}

/// Builds a connection over an in-process channel end
pub fn connection(channel: MemoryChannel) -> IpcConnection<MemoryChannel> {
    IpcConnection::builder(channel)
        .config(fast_config())
        .build()
        .expect("fast config is valid")
}

/// Two connected, not yet running, connections
pub fn connected_pair() -> (IpcConnection<MemoryChannel>, IpcConnection<MemoryChannel>) {
    init_tracing();
    let (left, right) = duplex();
    (connection(left), connection(right))
}

/// A running connection pair with handles on both reception loops
pub struct PeerPair {
    pub left: IpcConnection<MemoryChannel>,
    pub right: IpcConnection<MemoryChannel>,
    left_loop: Option<JoinHandle<Result<()>>>,
    right_loop: Option<JoinHandle<Result<()>>>,
}

impl PeerPair {
    /// Starts both reception loops; `left` serves [`sample_target`]
    pub fn start() -> Self {
        Self::start_with(sample_target())
    }

    /// Starts both reception loops; `left` serves `target`
    pub fn start_with(target: MethodTable) -> Self {
        let (left, right) = connected_pair();
        left.register_target(target).expect("fresh connection");
        let left_loop = left.spawn().expect("left loop starts");
        let right_loop = right.spawn().expect("right loop starts");
        Self {
            left,
            right,
            left_loop: Some(left_loop),
            right_loop: Some(right_loop),
        }
    }

    /// Stops from the left side and waits for both loops to exit cleanly
    pub fn shutdown(mut self) {
        self.left.stop_connection();
        self.join();
    }

    /// Waits for both loops to exit cleanly
    pub fn join(&mut self) {
        for handle in [self.left_loop.take(), self.right_loop.take()]
            .into_iter()
            .flatten()
        {
            handle
                .join()
                .expect("reception loop panicked")
                .expect("reception loop failed");
        }
    }
}

/// A latch that blocks callers until opened
#[derive(Default)]
pub struct Gate {
    open: Mutex<bool>,
    opened: Condvar,
}

impl Gate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn open(&self) {
        *self.open.lock() = true;
        self.opened.notify_all();
    }

    /// Blocks until opened or `timeout` elapses; returns whether it opened
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut open = self.open.lock();
        while !*open {
            if self.opened.wait_until(&mut open, deadline).timed_out() {
                return *open;
            }
        }
        true
    }
}

/// Target exercised by most tests
///
/// - `double(n)`: `n * 2`
/// - `echo(x)`: `x` unchanged
/// - `sleep(ms)`: sleeps, then returns `ms`
/// - `fail(message)`: raises `TestFailure` with `message`
/// - `explode()`: panics
pub fn sample_target() -> MethodTable {
    MethodTable::new()
        .method("double", |n: i64| Ok(n * 2))
        .raw_method("echo", Ok)
        .method("sleep", |ms: u64| {
            thread::sleep(Duration::from_millis(ms));
            Ok(ms)
        })
        .method("fail", |message: String| -> std::result::Result<(), TargetError> {
            Err(TargetError::custom("TestFailure", message))
        })
        .method("explode", |_: ()| -> std::result::Result<(), TargetError> {
            panic!("target exploded")
        })
}

/// Target whose `block` function waits on `gate` and counts completions
pub fn gated_target(gate: Arc<Gate>, completed: Arc<AtomicUsize>) -> MethodTable {
    sample_target().method("block", move |_: ()| {
        gate.wait(Duration::from_secs(30));
        completed.fetch_add(1, Ordering::SeqCst);
        Ok(Value::Null)
    })
}

type Submission = (String, Job, mpsc::Sender<InvocationResult>);

/// Scheduler running every job on one dedicated executor thread
///
/// Records the functions it was asked to run. A panicking job is reported
/// back as a `Panic` error and the executor keeps going.
pub struct ExecutorScheduler {
    jobs: Mutex<mpsc::Sender<Submission>>,
    seen: Arc<Mutex<Vec<String>>>,
}

impl ExecutorScheduler {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel::<Submission>();
        thread::Builder::new()
            .name("test-executor".to_string())
            .spawn(move || {
                for (function, job, reply) in rx {
                    let result = panic::catch_unwind(AssertUnwindSafe(job)).unwrap_or_else(|payload| {
                        Err(RemoteException::from_panic(&function, payload.as_ref()).into())
                    });
                    let _ = reply.send(result);
                }
            })
            .expect("executor thread starts");
        Self {
            jobs: Mutex::new(tx),
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Shared log of scheduled function names
    pub fn seen(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.seen)
    }
}

impl Default for ExecutorScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for ExecutorScheduler {
    fn execute(&self, function: &str, job: Job) -> InvocationResult {
        self.seen.lock().push(function.to_string());
        let (reply_tx, reply_rx) = mpsc::channel();
        self.jobs
            .lock()
            .send((function.to_string(), job, reply_tx))
            .map_err(|_| TargetError::custom("SchedulerGone", "executor thread exited"))?;
        reply_rx
            .recv()
            .map_err(|_| TargetError::custom("SchedulerGone", "executor dropped the job"))?
    }
}

/// Polls `condition` until true or `timeout` elapses
pub fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}
