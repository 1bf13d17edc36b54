//! Nested Call Tests
//!
//! Validates that a target calling back over its own connection keeps making
//! progress when every worker and queue slot is taken.

use ipc::{duplex, MemoryChannel};
use remote_ipc::{IpcConnection, MethodTable, TargetError};
use serde_json::json;
use std::thread;
use std::time::{Duration, Instant};
use tests_resilience::{fast_config, init_tracing};

const CALLERS: i64 = 3;

fn tiny_pool(channel: MemoryChannel) -> IpcConnection<MemoryChannel> {
    IpcConnection::builder(channel)
        .config(fast_config().with_max_workers(1).with_worker_queue_depth(1))
        .build()
        .expect("Failed to build connection")
}

/// Test: Callbacks into the caller complete with a single worker and queue slot
///
/// This validates that:
/// 1. A full worker queue never stalls the reception loop
/// 2. Responses to nested calls are still read while workers are busy
/// 3. Every outer call returns its value well before the nested timeout
#[test]
fn test_nested_callbacks_with_saturated_pool() {
    init_tracing();
    let (left, right) = duplex();
    let caller = tiny_pool(left);
    let server = tiny_pool(right);

    caller
        .register_target(MethodTable::new().method("g", |n: i64| {
            thread::sleep(Duration::from_millis(50));
            Ok(n)
        }))
        .expect("Failed to register caller target");

    let callback = server.clone();
    server
        .register_target(MethodTable::new().method("f", move |n: i64| {
            callback
                .call_typed::<_, i64>("g", &n, Some(Duration::from_secs(4)))
                .map_err(|err| TargetError::custom("Nested", err.to_string()))
        }))
        .expect("Failed to register server target");

    let caller_loop = caller.spawn().expect("Failed to spawn caller loop");
    let server_loop = server.spawn().expect("Failed to spawn server loop");

    let started = Instant::now();
    let calls: Vec<_> = (1..=CALLERS)
        .map(|n| {
            let caller = caller.clone();
            thread::spawn(move || caller.call("f", json!(n), Some(Duration::from_secs(8))))
        })
        .collect();

    let results: Vec<_> = calls
        .into_iter()
        .map(|call| call.join().expect("caller thread panicked"))
        .collect();
    for (n, result) in (1..=CALLERS).zip(results) {
        assert_eq!(result.expect("nested call succeeds"), json!(n));
    }
    assert!(
        started.elapsed() < Duration::from_secs(3),
        "nested calls stalled: {:?}",
        started.elapsed()
    );

    caller.stop_connection();
    caller_loop.join().unwrap().unwrap();
    server_loop.join().unwrap().unwrap();
}
