//! Dispatcher configuration.

use serde::Deserialize;

/// Limits applied by a [`Dispatcher`](crate::Dispatcher).
///
/// Deserializable so it can sit inside an application's own config file:
///
/// ```toml
/// [http]
/// max_forwards = 4
/// body_limit = 1048576
/// ```
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Forwards allowed per request before it is answered with 508.
    pub max_forwards: usize,
    /// Body limit in bytes for accessors called without an explicit one.
    /// `None` means unlimited.
    pub body_limit: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self { max_forwards: 8, body_limit: None }
    }
}
