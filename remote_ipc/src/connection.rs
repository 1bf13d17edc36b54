//! The connection: call dispatcher, reception loop, and lifecycle coordinator

use crate::config::ConnectionConfig;
use crate::control::{
    self, ConnectionPhase, Lifecycle, READINESS_NOTIFICATION, STOP_CONNECTION,
    TARGET_REGISTRATION_CHECK,
};
use crate::envelope::{CallOutcome, RemoteException, OVERLOADED};
use crate::error::{RemoteExecutionError, RemoteIpcError, Result};
use crate::pending::{PendingCalls, PendingError};
use crate::proxy::RemoteProxy;
use crate::target::{invoke_guarded, Scheduler, Target};
use crate::worker::{self, Rejected, Task, WorkerPool};
use core_types::{ConnectionId, Tag, TagAllocator};
use ipc::{Channel, ChannelError, Message, MessageKind, MessagePayload};
use lifecycle::{poll_until, Deadline, PollError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::convert::Infallible;
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// One side of a synchronous remote-call connection
///
/// Cloning yields another handle to the same connection; the reception loop
/// keeps the shared state alive until it exits.
pub struct IpcConnection<C: Channel> {
    inner: Arc<Inner<C>>,
}

impl<C: Channel> Clone for IpcConnection<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Channel> fmt::Debug for IpcConnection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IpcConnection")
            .field("id", &self.inner.id)
            .field("phase", &self.inner.lifecycle.phase())
            .field("pending_calls", &self.inner.pending.len())
            .finish()
    }
}

/// Configures a connection before it is created
pub struct ConnectionBuilder<C> {
    channel: C,
    config: ConnectionConfig,
    scheduler: Option<Arc<dyn Scheduler>>,
}

impl<C: Channel + 'static> ConnectionBuilder<C> {
    pub fn config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    /// Routes every target invocation through `scheduler`
    pub fn scheduler(mut self, scheduler: impl Scheduler) -> Self {
        self.scheduler = Some(Arc::new(scheduler));
        self
    }

    /// Validates the configuration and creates the connection
    pub fn build(self) -> Result<IpcConnection<C>> {
        self.config.validate()?;
        Ok(IpcConnection::from_parts(self.channel, self.config, self.scheduler))
    }
}

impl<C: Channel + 'static> IpcConnection<C> {
    /// Creates a connection with the default configuration
    pub fn new(channel: C) -> Self {
        Self::from_parts(channel, ConnectionConfig::default(), None)
    }

    fn from_parts(
        channel: C,
        config: ConnectionConfig,
        scheduler: Option<Arc<dyn Scheduler>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: ConnectionId::new(),
                channel,
                config,
                tags: TagAllocator::new(),
                pending: PendingCalls::new(),
                lifecycle: Lifecycle::new(),
                target: OnceLock::new(),
                scheduler,
            }),
        }
    }

    /// Starts configuring a connection over `channel`
    pub fn builder(channel: C) -> ConnectionBuilder<C> {
        ConnectionBuilder {
            channel,
            config: ConnectionConfig::default(),
            scheduler: None,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.inner.lifecycle.phase()
    }

    /// True until a stop has been requested by either side
    pub fn is_running(&self) -> bool {
        self.phase().is_running()
    }

    /// Number of calls waiting for a response
    pub fn pending_calls(&self) -> usize {
        self.inner.pending.len()
    }

    /// Makes `target` invocable by the peer; allowed once per connection
    pub fn register_target(&self, target: impl Target) -> Result<()> {
        self.register_shared_target(Arc::new(target))
    }

    /// Like [`register_target`](Self::register_target) for an already shared target
    pub fn register_shared_target(&self, target: Arc<dyn Target>) -> Result<()> {
        self.inner
            .target
            .set(target)
            .map_err(|_| RemoteIpcError::TargetAlreadyRegistered)?;
        tracing::debug!(connection = %self.inner.id, "target registered");
        Ok(())
    }

    /// Checks if a target was registered on this side
    pub fn has_target(&self) -> bool {
        self.inner.target.get().is_some()
    }

    /// Invokes `function` on the peer's target and waits for the result
    ///
    /// Without a `timeout` the configured default applies; with neither the
    /// call waits until answered or until the connection stops. A timed-out
    /// call is abandoned locally; the remote execution carries on.
    pub fn call(&self, function: &str, args: Value, timeout: Option<Duration>) -> Result<Value> {
        if control::is_control(function) {
            return Err(RemoteIpcError::ReservedFunction(function.to_string()));
        }
        let timeout = timeout.or(self.inner.config.default_call_timeout);
        self.inner.round_trip(function, args, timeout)
    }

    /// [`call`](Self::call) with typed arguments and result
    pub fn call_typed<A, R>(&self, function: &str, args: &A, timeout: Option<Duration>) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let args = serde_json::to_value(args)?;
        let value = self.call(function, args, timeout)?;
        Ok(serde_json::from_value(value)?)
    }

    /// A typed calling facade over this connection
    pub fn proxy(&self) -> RemoteProxy<C> {
        RemoteProxy::new(self.clone())
    }

    /// Runs the reception loop on the calling thread until the connection stops
    ///
    /// A channel closed by the peer ends the loop like a stop does. Other
    /// channel failures also end it, and are returned.
    pub fn run(&self) -> Result<()> {
        self.inner.lifecycle.start()?;
        self.inner.receive_loop()
    }

    /// Runs the reception loop on a dedicated thread
    ///
    /// The connection is `Running` when this returns.
    pub fn spawn(&self) -> Result<JoinHandle<Result<()>>> {
        self.inner.lifecycle.start()?;
        let inner = Arc::clone(&self.inner);
        thread::Builder::new()
            .name("remote-ipc-recv".to_string())
            .spawn(move || inner.receive_loop())
            .map_err(|err| {
                self.inner.finish();
                RemoteIpcError::Spawn(err)
            })
    }

    /// Tells the peer this side is ready to serve
    pub fn notify_ready(&self) -> Result<()> {
        let timeout = self.inner.config.default_call_timeout;
        self.inner
            .round_trip(READINESS_NOTIFICATION, Value::Null, timeout)
            .map(drop)
    }

    /// Whether the peer has announced readiness
    pub fn is_remote_ready(&self) -> bool {
        self.inner.lifecycle.is_remote_ready()
    }

    /// Waits for the peer's readiness notification
    ///
    /// Polls a local flag; no message is exchanged.
    pub fn wait_for_remote_ready(&self, timeout: Option<Duration>) -> Result<()> {
        let lifecycle = &self.inner.lifecycle;
        let polled = poll_until(
            Deadline::from_timeout(timeout),
            self.inner.config.poll_interval,
            || {
                if lifecycle.is_remote_ready() {
                    Ok(Some(()))
                } else if !lifecycle.phase().is_running() {
                    Err(RemoteIpcError::ConnectionStopped)
                } else {
                    Ok(None)
                }
            },
        );
        polled.map_err(|err| timed_out(err, "wait_for_remote_ready", timeout))
    }

    /// Waits until the peer has registered a target
    ///
    /// Asks the peer on every poll; each question is bounded by what is left
    /// of `timeout`.
    pub fn wait_for_remote_target_set(&self, timeout: Option<Duration>) -> Result<()> {
        let deadline = Deadline::from_timeout(timeout);
        let poll_interval = self.inner.config.poll_interval;
        let polled = poll_until(deadline, poll_interval, || {
            let probe_timeout =
                deadline.map(|d| d.remaining().unwrap_or_default().max(poll_interval));
            match self
                .inner
                .round_trip(TARGET_REGISTRATION_CHECK, Value::Null, probe_timeout)
            {
                Ok(Value::Bool(true)) => Ok(Some(())),
                Ok(_) => Ok(None),
                Err(err) if err.is_timeout() => Ok(None),
                Err(err) => Err(err),
            }
        });
        polled.map_err(|err| timed_out(err, "wait_for_remote_target_set", timeout))
    }

    /// Stops both sides of the connection
    ///
    /// Idempotent and safe to call from both peers at once. A peer that does
    /// not acknowledge within `stop_ack_timeout` is assumed gone. Returns once
    /// this side is `Stopped`, or after a bounded wait for the reception loop.
    pub fn stop_connection(&self) {
        let inner = &self.inner;
        match inner.lifecycle.phase() {
            ConnectionPhase::Running => {
                let acked = inner.round_trip(
                    STOP_CONNECTION,
                    Value::Null,
                    Some(inner.config.stop_ack_timeout),
                );
                match acked {
                    Ok(_) => tracing::debug!(connection = %inner.id, "peer acknowledged stop"),
                    Err(err) => tracing::debug!(
                        connection = %inner.id,
                        error = %err,
                        "stop not acknowledged, assuming peer is gone"
                    ),
                }
                inner.lifecycle.begin_stop();
            }
            ConnectionPhase::Created => {
                // No loop will read an acknowledgement; tell the peer and finish here.
                let tag = inner.tags.next_tag();
                let request = Message::request(tag, STOP_CONNECTION, MessagePayload::empty());
                if let Err(err) = inner.channel.send(request) {
                    tracing::debug!(
                        connection = %inner.id,
                        error = %err,
                        "stop request not delivered"
                    );
                }
                if inner.lifecycle.begin_stop().is_some() {
                    inner.finish();
                }
            }
            ConnectionPhase::Stopping | ConnectionPhase::Stopped => {}
        }
        inner.wait_stopped();
    }
}

fn timed_out(
    err: PollError<RemoteIpcError>,
    operation: &str,
    timeout: Option<Duration>,
) -> RemoteIpcError {
    match err {
        PollError::TimedOut => RemoteIpcError::Timeout {
            operation: operation.to_string(),
            timeout: timeout.unwrap_or_default(),
        },
        PollError::Aborted(err) => err,
    }
}

struct Inner<C> {
    id: ConnectionId,
    channel: C,
    config: ConnectionConfig,
    tags: TagAllocator,
    pending: PendingCalls,
    lifecycle: Lifecycle,
    target: OnceLock<Arc<dyn Target>>,
    scheduler: Option<Arc<dyn Scheduler>>,
}

impl<C: Channel + 'static> Inner<C> {
    /// Sends a request and waits for its response
    fn round_trip(&self, function: &str, args: Value, timeout: Option<Duration>) -> Result<Value> {
        if !self.lifecycle.phase().is_running() {
            return Err(RemoteIpcError::ConnectionStopped);
        }

        let tag = self.tags.next_tag();
        let pending = self.pending.register(tag)?;
        self.channel
            .send(Message::request(tag, function, MessagePayload::from_value(args)))?;
        tracing::trace!(connection = %self.id, %tag, function, "request sent");

        match pending.wait(timeout) {
            // Results that land while the connection winds down are not honored.
            Ok(_) if function != STOP_CONNECTION && !self.lifecycle.phase().is_running() => {
                Err(RemoteIpcError::ConnectionStopped)
            }
            Ok(outcome) => outcome
                .into_result()
                .map_err(|exception| RemoteExecutionError::from(exception).into()),
            Err(PendingError::TimedOut) => Err(RemoteIpcError::Timeout {
                operation: function.to_string(),
                timeout: timeout.unwrap_or_default(),
            }),
            Err(PendingError::Released) => Err(RemoteIpcError::ConnectionStopped),
        }
    }

    fn receive_loop(self: &Arc<Self>) -> Result<()> {
        tracing::debug!(connection = %self.id, "reception loop started");

        let pool = match WorkerPool::new(self.config.max_workers, self.config.worker_queue_depth) {
            Ok(pool) => pool,
            Err(err) => {
                self.finish();
                return Err(RemoteIpcError::Spawn(err));
            }
        };

        let result = loop {
            if self.lifecycle.phase() != ConnectionPhase::Running {
                break Ok(());
            }
            match self.channel.recv_timeout(self.config.recv_poll_interval) {
                Ok(Some(message)) => self.route(&pool, message),
                Ok(None) => {}
                Err(ChannelError::Closed) => {
                    tracing::debug!(connection = %self.id, "channel closed by peer");
                    break Ok(());
                }
                Err(err) => {
                    tracing::warn!(connection = %self.id, error = %err, "channel failed");
                    break Err(RemoteIpcError::from(err));
                }
            }
        };

        pool.shutdown();
        self.finish();
        result
    }

    fn route(self: &Arc<Self>, pool: &WorkerPool, message: Message) {
        match message.kind {
            MessageKind::Request if control::is_control(&message.function) => {
                self.handle_control(message)
            }
            MessageKind::Request => {
                let tag = message.tag;
                let function = message.function.clone();
                let inner = Arc::clone(self);
                let task: Task = Box::new(move || inner.serve(message));
                match pool.submit(task) {
                    Ok(()) => {}
                    Err(Rejected::Full(task)) => {
                        tracing::debug!(
                            connection = %self.id,
                            %tag,
                            function = %function,
                            "workers busy, serving on an overflow thread"
                        );
                        if let Err(err) = worker::spawn_overflow(task) {
                            tracing::warn!(
                                connection = %self.id,
                                %tag,
                                error = %err,
                                "cannot spawn overflow thread"
                            );
                            let exception = RemoteException::new(
                                OVERLOADED,
                                format!("cannot schedule `{}`: {}", function, err),
                            );
                            self.reply(tag, &function, CallOutcome::Raised(exception));
                        }
                    }
                    Err(Rejected::ShutDown(task)) => task(),
                }
            }
            MessageKind::Response => self.handle_response(message),
        }
    }

    fn handle_control(&self, message: Message) {
        tracing::debug!(
            connection = %self.id,
            tag = %message.tag,
            function = %message.function,
            "control request"
        );
        let outcome = match message.function.as_str() {
            STOP_CONNECTION => {
                self.lifecycle.begin_stop();
                CallOutcome::Return(Value::Null)
            }
            TARGET_REGISTRATION_CHECK => {
                CallOutcome::Return(Value::Bool(self.target.get().is_some()))
            }
            READINESS_NOTIFICATION => {
                self.lifecycle.mark_remote_ready();
                CallOutcome::Return(Value::Null)
            }
            _ => return,
        };
        self.reply(message.tag, &message.function, outcome);
    }

    fn handle_response(&self, message: Message) {
        if message.function == STOP_CONNECTION && self.lifecycle.begin_stop().is_some() {
            tracing::debug!(connection = %self.id, "stop acknowledged; stopping");
        }
        let outcome = CallOutcome::from_payload(&message.payload);
        if !self.pending.resolve(message.tag, outcome) {
            tracing::debug!(
                connection = %self.id,
                tag = %message.tag,
                function = %message.function,
                "discarding response with no waiting caller"
            );
        }
    }

    /// Runs on a worker: invokes the target and answers the request
    fn serve(&self, message: Message) {
        let Message {
            tag,
            function,
            payload,
            ..
        } = message;
        let outcome = match self.target.get() {
            Some(target) => {
                invoke_guarded(target, self.scheduler.as_ref(), &function, payload.into_value())
            }
            None => CallOutcome::Raised(RemoteException::no_target(&function)),
        };
        self.reply(tag, &function, outcome);
    }

    /// Sends a response
    ///
    /// A response the channel refuses, such as an oversized frame, is replaced
    /// by a small execution-failure envelope so the caller is still answered.
    fn reply(&self, tag: Tag, function: &str, outcome: CallOutcome) {
        let response = Message::response(tag, function, outcome.into_payload());
        let err = match self.channel.send(response) {
            Ok(()) => return,
            Err(ChannelError::Closed) => {
                tracing::debug!(
                    connection = %self.id,
                    %tag,
                    function,
                    "response not delivered, channel closed"
                );
                return;
            }
            Err(err) => err,
        };

        tracing::warn!(
            connection = %self.id,
            %tag,
            function,
            error = %err,
            "response rejected by channel, sending failure instead"
        );
        let exception = RemoteException::execution_failed("ChannelError", &err.to_string());
        let fallback = Message::response(tag, function, CallOutcome::Raised(exception).into_payload());
        if let Err(err) = self.channel.send(fallback) {
            tracing::debug!(
                connection = %self.id,
                %tag,
                function,
                error = %err,
                "response not delivered"
            );
        }
    }

    /// Releases the channel and every waiting caller, then marks `Stopped`
    fn finish(&self) {
        self.lifecycle.begin_stop();
        self.channel.close();
        let released = self.pending.close_and_drain();
        self.lifecycle.finish();
        tracing::info!(connection = %self.id, released, "connection stopped");
    }

    fn wait_stopped(&self) {
        let bound = self.config.stop_ack_timeout + self.config.recv_poll_interval * 2;
        let stopped: std::result::Result<(), PollError<Infallible>> =
            poll_until(Some(Deadline::after(bound)), self.config.poll_interval, || {
                Ok((self.lifecycle.phase() == ConnectionPhase::Stopped).then_some(()))
            });
        if stopped.is_err() {
            tracing::warn!(connection = %self.id, "reception loop did not exit in time");
        }
    }
}
