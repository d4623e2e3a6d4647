//! Customized unified error type.

use std::error;
use std::fmt;
use std::io;

/// Customized error type for Partkeeper.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct KeeperError(pub(crate) String);

impl KeeperError {
    pub fn msg(msg: impl ToString) -> Self {
        KeeperError(msg.to_string())
    }
}

impl fmt::Display for KeeperError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0) // do not display literal quotes
    }
}

impl error::Error for KeeperError {}

// Helper macro for saving boiler-plate `impl From<X>`s for transparent
// conversion from various common error types to `KeeperError`.
macro_rules! impl_from_error {
    ($error:ty) => {
        impl From<$error> for KeeperError {
            fn from(e: $error) -> Self {
                // just store the source error's string representation
                KeeperError(e.to_string())
            }
        }
    };
}

// Helper macro for saving boiler-plate `impl From<X<T>>`s for transparent
// conversion from various common generic error types to `KeeperError`.
macro_rules! impl_from_error_generic {
    ($error:ty) => {
        impl<T> From<$error> for KeeperError {
            fn from(e: $error) -> KeeperError {
                KeeperError::msg(e.to_string())
            }
        }
    };
}

impl_from_error!(io::Error);
impl_from_error!(rmp_serde::encode::Error);
impl_from_error!(rmp_serde::decode::Error);
impl_from_error!(toml::de::Error);
impl_from_error!(tokio::task::JoinError);
impl_from_error!(tokio::sync::watch::error::RecvError);

impl_from_error_generic!(tokio::sync::watch::error::SendError<T>);
