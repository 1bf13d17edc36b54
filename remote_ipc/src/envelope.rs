//! Remote exception envelopes and call outcomes
//!
//! A failure raised while serving a request never crosses the channel as a
//! live error value. It is flattened into a [`RemoteException`]: the
//! original type name, the rendered message, and an opaque JSON blob with
//! whatever diagnostics could be captured (source chain, backtrace, or
//! structured details).

use ipc::MessagePayload;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error;
use std::fmt;

/// Type name used when a requested function does not exist on the target
pub const FUNCTION_NOT_FOUND: &str = "FunctionNotFound";
/// Type name used when call arguments cannot be decoded
pub const INVALID_ARGUMENTS: &str = "InvalidArguments";
/// Type name used when a request reaches a connection without a target
pub const NO_TARGET_REGISTERED: &str = "NoTargetRegisteredError";
/// Type name used when a target function panicked
pub const PANIC: &str = "Panic";
/// Type name of the generic fallback envelope
pub const EXECUTION_FAILED: &str = "RemoteExecutionFailed";
/// Type name used when a response payload could not be decoded
pub const MALFORMED_RESPONSE: &str = "MalformedResponse";
/// Type name used when a request could not be scheduled at all
pub const OVERLOADED: &str = "Overloaded";

/// Transmissible representation of an error raised on the remote side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteException {
    /// Name of the original error type
    pub type_name: String,
    /// Rendered error message
    pub message: String,
    /// Opaque diagnostic blob
    #[serde(default)]
    pub traceback: Option<Value>,
}

impl RemoteException {
    /// Creates an envelope with no diagnostics attached
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            message: message.into(),
            traceback: None,
        }
    }

    /// Captures a concrete error
    ///
    /// The type name comes from `E`, the traceback holds the `source()`
    /// chain and, when enabled through `RUST_BACKTRACE`, a backtrace of the
    /// capture point.
    pub fn from_error<E: Error + 'static>(err: &E) -> Self {
        Self::capture(short_type_name(std::any::type_name::<E>()), err)
    }

    /// Captures a type-erased error under an explicit type name
    pub fn capture(type_name: impl Into<String>, err: &(dyn Error + 'static)) -> Self {
        let mut causes = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }

        let backtrace = Backtrace::capture();
        let mut traceback = json!({ "causes": causes });
        if backtrace.status() == BacktraceStatus::Captured {
            traceback["backtrace"] = Value::String(backtrace.to_string());
        }

        Self {
            type_name: type_name.into(),
            message: err.to_string(),
            traceback: Some(traceback),
        }
    }

    /// Attaches structured details as the traceback blob
    ///
    /// If the details cannot be serialized the whole envelope degrades to a
    /// [`EXECUTION_FAILED`] envelope carrying the original type name and
    /// message as plain strings.
    pub fn with_details<T: Serialize + ?Sized>(self, details: &T) -> Self {
        match serde_json::to_value(details) {
            Ok(blob) => Self {
                traceback: Some(blob),
                ..self
            },
            Err(err) => {
                tracing::debug!(
                    type_name = %self.type_name,
                    error = %err,
                    "exception details are not serializable"
                );
                Self::execution_failed(&self.type_name, &self.message)
            }
        }
    }

    /// The generic fallback envelope
    pub fn execution_failed(original_type: &str, original_message: &str) -> Self {
        Self {
            type_name: EXECUTION_FAILED.to_string(),
            message: format!("{}: {}", original_type, original_message),
            traceback: Some(json!({
                "original_type": original_type,
                "original_message": original_message,
            })),
        }
    }

    /// Envelope sent back when a request arrives before any target is registered
    pub fn no_target(function: &str) -> Self {
        Self::new(
            NO_TARGET_REGISTERED,
            format!("cannot invoke `{}`: no target registered", function),
        )
    }

    /// Envelope for a caught panic
    pub fn from_panic(function: &str, payload: &(dyn Any + Send)) -> Self {
        let detail = if let Some(text) = payload.downcast_ref::<&str>() {
            (*text).to_string()
        } else if let Some(text) = payload.downcast_ref::<String>() {
            text.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::new(PANIC, format!("`{}` panicked: {}", function, detail))
    }

    /// Checks the original type name
    pub fn is(&self, type_name: &str) -> bool {
        self.type_name == type_name
    }
}

impl fmt::Display for RemoteException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.type_name, self.message)
    }
}

/// What a response carries: a return value or a raised exception
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    Return(Value),
    Raised(RemoteException),
}

impl CallOutcome {
    /// Encodes the outcome as a response payload
    pub fn into_payload(self) -> MessagePayload {
        match MessagePayload::new(&self) {
            Ok(payload) => payload,
            Err(err) => {
                let fallback =
                    CallOutcome::Raised(RemoteException::execution_failed("SerializationError", &err.to_string()));
                MessagePayload::new(&fallback).unwrap_or_default()
            }
        }
    }

    /// Decodes a response payload
    ///
    /// An undecodable payload becomes a [`MALFORMED_RESPONSE`] exception so
    /// the waiting caller still gets an answer.
    pub fn from_payload(payload: &MessagePayload) -> Self {
        payload.deserialize().unwrap_or_else(|err| {
            CallOutcome::Raised(RemoteException::new(
                MALFORMED_RESPONSE,
                format!("undecodable response payload: {}", err),
            ))
        })
    }

    /// Splits into the return value or the exception
    pub fn into_result(self) -> Result<Value, RemoteException> {
        match self {
            CallOutcome::Return(value) => Ok(value),
            CallOutcome::Raised(exception) => Err(exception),
        }
    }
}

fn short_type_name(full: &str) -> String {
    let split = full.find('<').unwrap_or(full.len());
    let (path, generics) = full.split_at(split);
    let base = path.rsplit("::").next().unwrap_or(path);
    format!("{}{}", base, generics)
}
