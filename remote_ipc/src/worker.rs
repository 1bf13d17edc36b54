//! Bounded worker pool serving incoming requests

use parking_lot::Mutex;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// A request-serving task
pub type Task = Box<dyn FnOnce() + Send>;

/// A task the pool would not take
pub enum Rejected {
    /// Every worker is busy and the queue is at capacity
    Full(Task),
    /// The pool has been shut down
    ShutDown(Task),
}

/// Fixed set of named threads fed through a bounded queue
///
/// `submit` never blocks. A full queue hands the task back so the caller can
/// run it elsewhere; see [`spawn_overflow`].
pub struct WorkerPool {
    queue: Mutex<Option<SyncSender<Task>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    size: usize,
}

impl WorkerPool {
    /// Spawns `size` workers sharing a queue of `depth` tasks
    pub fn new(size: usize, depth: usize) -> io::Result<Self> {
        let (tx, rx) = mpsc::sync_channel::<Task>(depth);
        let rx = Arc::new(Mutex::new(rx));

        let mut workers = Vec::with_capacity(size);
        for index in 0..size {
            let rx = Arc::clone(&rx);
            let handle = thread::Builder::new()
                .name(format!("remote-ipc-worker-{}", index))
                .spawn(move || worker_loop(&rx))?;
            workers.push(handle);
        }

        Ok(Self {
            queue: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
            size,
        })
    }

    /// Number of worker threads
    pub fn size(&self) -> usize {
        self.size
    }

    /// Queues a task without waiting for room
    pub fn submit(&self, task: Task) -> Result<(), Rejected> {
        let queue = self.queue.lock().clone();
        match queue {
            Some(tx) => tx.try_send(task).map_err(|err| match err {
                TrySendError::Full(task) => Rejected::Full(task),
                TrySendError::Disconnected(task) => Rejected::ShutDown(task),
            }),
            None => Err(Rejected::ShutDown(task)),
        }
    }

    /// Stops accepting tasks; queued tasks still run
    pub fn shutdown(&self) {
        self.queue.lock().take();
    }

    /// Shuts down and waits for every worker to finish
    ///
    /// Must not be called from a worker thread.
    pub fn join(&self) {
        self.shutdown();
        let workers = std::mem::take(&mut *self.workers.lock());
        for handle in workers {
            if handle.join().is_err() {
                tracing::warn!("remote-ipc worker exited abnormally");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Runs a task on a fresh detached thread
///
/// Used for requests that arrive while every worker is busy, so a target
/// calling back over the same connection cannot starve the pool.
pub fn spawn_overflow(task: Task) -> io::Result<()> {
    thread::Builder::new()
        .name("remote-ipc-overflow".to_string())
        .spawn(move || run_task(task))?;
    Ok(())
}

fn run_task(task: Task) {
    if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
        tracing::warn!("remote-ipc task panicked");
    }
}

fn worker_loop(queue: &Mutex<Receiver<Task>>) {
    loop {
        // Hold the lock only while waiting for the next task.
        let task = queue.lock().recv();
        match task {
            Ok(task) => run_task(task),
            Err(_) => break,
        }
    }
}
