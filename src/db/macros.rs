//! Adapter dispatch macros.
//!
//! [`ConfiguredAdapter`](crate::db::ConfiguredAdapter) wraps one of the
//! bundled backends; the macro below expands a call into one match arm per
//! variant so every arm stays readable.

use std::fmt;
use std::str::FromStr;

/// Connection backend selected at configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum AdapterKind {
    /// One dedicated connection
    #[default]
    Connection,
    /// Connections checked out from a pool
    Pool,
}

impl fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection => write!(f, "connection"),
            Self::Pool => write!(f, "pool"),
        }
    }
}

impl FromStr for AdapterKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "connection" | "dedicated" => Ok(Self::Connection),
            "pool" | "pooled" => Ok(Self::Pool),
            other => Err(format!(
                "Unknown adapter '{}'. Expected 'connection' or 'pool'",
                other
            )),
        }
    }
}

/// Macro for generating adapter dispatch match arms.
///
/// # Example
///
/// ```ignore
/// impl_adapter_dispatch!(self, a => a.checkout(work).await)
/// ```
#[macro_export]
macro_rules! impl_adapter_dispatch {
    ($adapter:expr, $a:ident => $body:expr) => {
        match $adapter {
            $crate::db::ConfiguredAdapter::Connection($a) => $body,
            $crate::db::ConfiguredAdapter::Pool($a) => $body,
        }
    };
}

pub use impl_adapter_dispatch;
