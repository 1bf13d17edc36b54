//! Targets: the objects whose functions a peer may invoke

use crate::envelope::{CallOutcome, RemoteException, FUNCTION_NOT_FOUND, INVALID_ARGUMENTS};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::error::Error;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;

/// Result of invoking one target function
pub type InvocationResult = Result<Value, TargetError>;

/// A unit of work handed to a [`Scheduler`]
pub type Job = Box<dyn FnOnce() -> InvocationResult + Send>;

/// Failure raised by a target function
#[derive(Debug, Error)]
pub enum TargetError {
    #[error("no function named `{0}`")]
    FunctionNotFound(String),

    #[error("invalid arguments for `{function}`: {reason}")]
    InvalidArguments { function: String, reason: String },

    #[error("{0}")]
    Failed(RemoteException),
}

impl TargetError {
    /// Wraps an arbitrary error raised by a target function
    pub fn failed<E: Error + 'static>(err: E) -> Self {
        TargetError::Failed(RemoteException::from_error(&err))
    }

    /// An error with an explicit type name and message
    pub fn custom(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        TargetError::Failed(RemoteException::new(type_name, message))
    }

    /// Flattens into a transmissible envelope
    pub fn into_exception(self) -> RemoteException {
        match self {
            TargetError::FunctionNotFound(name) => {
                RemoteException::new(FUNCTION_NOT_FOUND, format!("no function named `{}`", name))
            }
            TargetError::InvalidArguments { function, reason } => RemoteException::new(
                INVALID_ARGUMENTS,
                format!("invalid arguments for `{}`: {}", function, reason),
            ),
            TargetError::Failed(exception) => exception,
        }
    }
}

impl From<RemoteException> for TargetError {
    fn from(exception: RemoteException) -> Self {
        TargetError::Failed(exception)
    }
}

/// An object whose functions are invocable by name over a connection
pub trait Target: Send + Sync + 'static {
    /// Invokes `function` with the request's arguments
    fn invoke(&self, function: &str, args: Value) -> InvocationResult;
}

impl<F> Target for F
where
    F: Fn(&str, Value) -> InvocationResult + Send + Sync + 'static,
{
    fn invoke(&self, function: &str, args: Value) -> InvocationResult {
        self(function, args)
    }
}

type Method = Box<dyn Fn(Value) -> InvocationResult + Send + Sync>;

/// A target assembled from named functions
///
/// ```
/// use remote_ipc::{MethodTable, Target};
/// use serde_json::json;
///
/// let table = MethodTable::new().method("double", |n: i64| Ok(n * 2));
/// assert_eq!(table.invoke("double", json!(21)).unwrap(), json!(42));
/// ```
#[derive(Default)]
pub struct MethodTable {
    methods: HashMap<String, Method>,
}

impl MethodTable {
    /// Creates an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a function with typed arguments and result
    ///
    /// Arguments are decoded from the request payload; a decode failure is
    /// reported as [`TargetError::InvalidArguments`]. Registering a name twice
    /// replaces the earlier function.
    pub fn method<A, R, F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        A: DeserializeOwned,
        R: Serialize,
        F: Fn(A) -> Result<R, TargetError> + Send + Sync + 'static,
    {
        let name = name.into();
        let function = name.clone();
        let method: Method = Box::new(move |args| {
            let args: A =
                serde_json::from_value(args).map_err(|err| TargetError::InvalidArguments {
                    function: function.clone(),
                    reason: err.to_string(),
                })?;
            let result = f(args)?;
            serde_json::to_value(result).map_err(TargetError::failed)
        });
        self.methods.insert(name, method);
        self
    }

    /// Adds a function working on raw JSON values
    pub fn raw_method<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value) -> InvocationResult + Send + Sync + 'static,
    {
        self.methods.insert(name.into(), Box::new(f));
        self
    }

    /// Checks if a function is registered
    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Registered function names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Target for MethodTable {
    fn invoke(&self, function: &str, args: Value) -> InvocationResult {
        match self.methods.get(function) {
            Some(method) => method(args),
            None => Err(TargetError::FunctionNotFound(function.to_string())),
        }
    }
}

/// Executes target invocations on behalf of the connection
///
/// The connection hands over a ready-to-run job and blocks its worker until
/// the scheduler returns the job's result.
pub trait Scheduler: Send + Sync + 'static {
    fn execute(&self, function: &str, job: Job) -> InvocationResult;
}

/// Runs every job immediately on the calling worker
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineScheduler;

impl Scheduler for InlineScheduler {
    fn execute(&self, _function: &str, job: Job) -> InvocationResult {
        job()
    }
}

/// Invokes `function` on `target`, turning every failure into an outcome
///
/// Errors and panics never escape: both come back as a raised envelope.
pub(crate) fn invoke_guarded(
    target: &Arc<dyn Target>,
    scheduler: Option<&Arc<dyn Scheduler>>,
    function: &str,
    args: Value,
) -> CallOutcome {
    let job: Job = {
        let target = Arc::clone(target);
        let function = function.to_string();
        Box::new(move || target.invoke(&function, args))
    };

    let result = panic::catch_unwind(AssertUnwindSafe(|| match scheduler {
        Some(scheduler) => scheduler.execute(function, job),
        None => job(),
    }));

    match result {
        Ok(Ok(value)) => CallOutcome::Return(value),
        Ok(Err(err)) => CallOutcome::Raised(err.into_exception()),
        Err(payload) => {
            tracing::warn!(function, "target function panicked");
            CallOutcome::Raised(RemoteException::from_panic(function, payload.as_ref()))
        }
    }
}
