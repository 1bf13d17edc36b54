//! Typed calling facades
//!
//! Remote functions are reached through explicit `call(name, args)`;
//! [`remote_interface!`](crate::remote_interface) writes the forwarding
//! methods for a known set of functions.

use crate::connection::IpcConnection;
use crate::error::Result;
use ipc::Channel;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

/// Typed calls over a connection, with an optional per-proxy timeout
pub struct RemoteProxy<C: Channel> {
    connection: IpcConnection<C>,
    timeout: Option<Duration>,
}

impl<C: Channel> Clone for RemoteProxy<C> {
    fn clone(&self) -> Self {
        Self {
            connection: self.connection.clone(),
            timeout: self.timeout,
        }
    }
}

impl<C: Channel + 'static> RemoteProxy<C> {
    pub fn new(connection: IpcConnection<C>) -> Self {
        Self {
            connection,
            timeout: None,
        }
    }

    /// Applies `timeout` to every call made through this proxy
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn connection(&self) -> &IpcConnection<C> {
        &self.connection
    }

    /// Calls `function` with `args`, decoding the result as `R`
    pub fn call<A, R>(&self, function: &str, args: &A) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.connection.call_typed(function, args, self.timeout)
    }
}

/// Declares a client type with one typed method per remote function
///
/// A method with a single argument sends that argument as the payload; no
/// arguments send `null`; several are sent as a JSON array.
///
/// ```
/// use remote_ipc::remote_interface;
///
/// remote_interface! {
///     /// Client of the calculator peer
///     pub struct Calculator {
///         fn double(n: i64) -> i64;
///         fn add(x: i64, y: i64) -> i64;
///         fn reset() -> ();
///     }
/// }
/// ```
#[macro_export]
macro_rules! remote_interface {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$fn_meta:meta])*
                fn $function:ident ( $($arg:ident : $ty:ty),* $(,)? ) -> $ret:ty;
            )*
        }
    ) => {
        $(#[$meta])*
        $vis struct $name<C: $crate::ipc::Channel> {
            proxy: $crate::RemoteProxy<C>,
        }

        impl<C: $crate::ipc::Channel + 'static> $name<C> {
            pub fn new(connection: &$crate::IpcConnection<C>) -> Self {
                Self {
                    proxy: connection.proxy(),
                }
            }

            pub fn with_timeout(self, timeout: ::std::time::Duration) -> Self {
                Self {
                    proxy: self.proxy.with_timeout(timeout),
                }
            }

            $(
                $(#[$fn_meta])*
                pub fn $function(&self $(, $arg: $ty)*) -> $crate::Result<$ret> {
                    self.proxy
                        .call(stringify!($function), $crate::__remote_args!($($arg),*))
                }
            )*
        }
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __remote_args {
    () => {
        &()
    };
    ($only:ident) => {
        &$only
    };
    ($($arg:ident),+) => {
        &($($arg,)+)
    };
}
