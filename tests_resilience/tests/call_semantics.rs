//! Call Semantics Tests
//!
//! Validates what a caller gets back from `call()`: the remote value, the
//! remote exception as data, or a stop. Nothing else.

use remote_ipc::envelope::{FUNCTION_NOT_FOUND, INVALID_ARGUMENTS, NO_TARGET_REGISTERED, PANIC};
use remote_ipc::{IpcConnection, RemoteIpcError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tests_resilience::{
    connected_pair, connection, sample_target, ExecutorScheduler, PeerPair,
};

/// Test: The canonical double / missing / stop scenario
///
/// This validates that:
/// 1. A registered function returns its value to the caller
/// 2. An unknown function raises a remote lookup failure
/// 3. After the serving side stops, calls from either side raise ConnectionStopped
#[test]
fn test_double_missing_stop_scenario() {
    let mut pair = PeerPair::start();

    let doubled = pair
        .right
        .call("double", json!(21), None)
        .expect("double succeeds");
    assert_eq!(doubled, json!(42));

    let err = pair
        .right
        .call("missing", json!(1), None)
        .expect_err("missing function must fail");
    let remote = err.remote().expect("failure is a remote exception");
    assert!(remote.is(FUNCTION_NOT_FOUND));
    assert!(remote.message.contains("missing"));

    pair.left.stop_connection();
    pair.join();

    for side in [&pair.left, &pair.right] {
        let err = side.call("double", json!(1), None).unwrap_err();
        assert!(err.is_connection_stopped(), "unexpected error: {}", err);
    }
}

/// Test: Echo returns representative values unchanged
#[test]
fn test_echo_roundtrip_values() {
    let pair = PeerPair::start();

    let values = [
        json!(null),
        json!(""),
        json!([]),
        json!({}),
        json!(0),
        json!(-17.25),
        json!("snowman ☃ and emoji 🦀"),
        json!({"nested": {"list": [1, [2, [3, []]]], "flag": true}, "empty": {}}),
        json!([null, {"a": null}, [], ""]),
    ];

    for value in values {
        let echoed = pair
            .right
            .call("echo", value.clone(), None)
            .expect("echo succeeds");
        assert_eq!(echoed, value);
    }

    pair.shutdown();
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Order {
    id: u32,
    items: Vec<String>,
    note: Option<String>,
}

/// Test: Typed calls serialize arguments and decode results
#[test]
fn test_typed_echo_struct() {
    let pair = PeerPair::start();
    let order = Order {
        id: 7,
        items: vec!["tea".to_string(), "scone".to_string()],
        note: None,
    };

    let echoed: Order = pair
        .right
        .call_typed("echo", &order, None)
        .expect("typed echo succeeds");
    assert_eq!(echoed, order);

    // A result that does not decode as the requested type is a codec error.
    let err = pair
        .right
        .call_typed::<_, Order>("double", &4, None)
        .unwrap_err();
    assert!(matches!(err, RemoteIpcError::Codec(_)));

    pair.shutdown();
}

/// Test: Remote failures arrive as data
///
/// This validates that:
/// 1. A raised error keeps its type name and message
/// 2. Undecodable arguments are reported, not crashed on
/// 3. A panicking function is converted, and the peer keeps serving
#[test]
fn test_remote_failures_are_enveloped() {
    let pair = PeerPair::start();

    let err = pair
        .right
        .call("fail", json!("quota exceeded"), None)
        .unwrap_err();
    let remote = err.remote().expect("remote exception");
    assert!(remote.is("TestFailure"));
    assert_eq!(remote.message, "quota exceeded");
    assert_eq!(err.to_string(), "remote TestFailure: quota exceeded");

    let err = pair
        .right
        .call("double", json!("not a number"), None)
        .unwrap_err();
    assert!(err.remote().expect("remote exception").is(INVALID_ARGUMENTS));

    let err = pair.right.call("explode", Value::Null, None).unwrap_err();
    let remote = err.remote().expect("remote exception");
    assert!(remote.is(PANIC));
    assert!(remote.message.contains("target exploded"));

    // The worker that caught the panic is still serving.
    assert_eq!(pair.right.call("double", json!(5), None).unwrap(), json!(10));

    pair.shutdown();
}

/// Test: A request reaching a side without a target gets a NoTargetRegistered envelope
#[test]
fn test_call_without_remote_target() {
    let (left, right) = connected_pair();
    let _left_loop = left.spawn().unwrap();
    let _right_loop = right.spawn().unwrap();

    let err = right.call("double", json!(1), None).unwrap_err();
    assert!(err.is_no_target());
    assert!(err.remote().unwrap().is(NO_TARGET_REGISTERED));

    left.stop_connection();
}

/// Test: Both sides call each other concurrently
///
/// Every call returns the value of its own invocation, regardless of
/// interleaving on the shared channel.
#[test]
fn test_interleaved_calls_both_directions() {
    let (left, right) = connected_pair();
    left.register_target(sample_target()).unwrap();
    right.register_target(sample_target()).unwrap();
    let left_loop = left.spawn().unwrap();
    let right_loop = right.spawn().unwrap();

    let mut workers = Vec::new();
    for caller in [left.clone(), right.clone()] {
        for offset in 0..4i64 {
            let caller = caller.clone();
            workers.push(thread::spawn(move || {
                for n in 0..25i64 {
                    let input = offset * 1000 + n;
                    let result = caller
                        .call("double", json!(input), Some(Duration::from_secs(10)))
                        .expect("call succeeds");
                    assert_eq!(result, json!(input * 2));
                }
            }));
        }
    }
    for worker in workers {
        worker.join().expect("caller thread panicked");
    }

    assert_eq!(left.pending_calls(), 0);
    assert_eq!(right.pending_calls(), 0);

    right.stop_connection();
    left_loop.join().unwrap().unwrap();
    right_loop.join().unwrap().unwrap();
}

/// Test: Responses may complete out of order
///
/// A slow call does not hold back a fast one issued after it.
#[test]
fn test_slow_call_does_not_block_fast_call() {
    let pair = PeerPair::start();

    let slow = {
        let right = pair.right.clone();
        thread::spawn(move || right.call("sleep", json!(400), None))
    };
    thread::sleep(Duration::from_millis(50));

    let started = Instant::now();
    assert_eq!(pair.right.call("double", json!(3), None).unwrap(), json!(6));
    assert!(started.elapsed() < Duration::from_millis(300));

    assert_eq!(slow.join().unwrap().unwrap(), json!(400));
    pair.shutdown();
}

/// Test: An injected scheduler runs every user invocation
#[test]
fn test_scheduler_runs_invocations() {
    let (left_end, right_end) = ipc::duplex();
    let scheduler = ExecutorScheduler::new();
    let seen = scheduler.seen();
    let left = IpcConnection::builder(left_end)
        .config(tests_resilience::fast_config())
        .scheduler(scheduler)
        .build()
        .unwrap();
    let right = connection(right_end);

    left.register_target(sample_target()).unwrap();
    let _left_loop = left.spawn().unwrap();
    let _right_loop = right.spawn().unwrap();

    assert_eq!(right.call("double", json!(8), None).unwrap(), json!(16));
    assert!(right.call("explode", Value::Null, None).is_err());
    assert_eq!(right.call("echo", json!("x"), None).unwrap(), json!("x"));

    // Control requests never reach the scheduler.
    right.notify_ready().unwrap();
    assert_eq!(*seen.lock(), vec!["double", "explode", "echo"]);

    right.stop_connection();
}

/// Test: A target can be shared between connections
#[test]
fn test_shared_target_serves_two_connections() {
    let target: Arc<dyn remote_ipc::Target> = Arc::new(sample_target());

    let (a, b) = connected_pair();
    let (c, d) = connected_pair();
    a.register_shared_target(Arc::clone(&target)).unwrap();
    c.register_shared_target(target).unwrap();
    for conn in [&a, &b, &c, &d] {
        let _ = conn.spawn().unwrap();
    }

    assert_eq!(b.call("double", json!(1), None).unwrap(), json!(2));
    assert_eq!(d.call("double", json!(2), None).unwrap(), json!(4));

    a.stop_connection();
    c.stop_connection();
}
