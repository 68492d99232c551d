//! Common types for cache operations

use std::time::Duration;

/// Expiry requested for a write
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Timeout {
    /// The client's configured default
    #[default]
    Default,
    /// Never expire
    Never,
    /// Expire after this many seconds; zero or negative has special meaning on `set`
    Seconds(f64),
}

impl From<u64> for Timeout {
    fn from(secs: u64) -> Self {
        Self::Seconds(secs as f64)
    }
}

impl From<i64> for Timeout {
    fn from(secs: i64) -> Self {
        Self::Seconds(secs as f64)
    }
}

impl From<i32> for Timeout {
    fn from(secs: i32) -> Self {
        Self::Seconds(f64::from(secs))
    }
}

impl From<f64> for Timeout {
    fn from(secs: f64) -> Self {
        Self::Seconds(secs)
    }
}

impl From<Duration> for Timeout {
    fn from(duration: Duration) -> Self {
        Self::Seconds(duration.as_secs_f64())
    }
}

impl From<Option<u64>> for Timeout {
    /// `None` means never expire
    fn from(secs: Option<u64>) -> Self {
        secs.map_or(Self::Never, Self::from)
    }
}

/// What a write should do after resolving its [`Timeout`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Expiry {
    /// Store with this many seconds to live
    After(u64),
    /// Store without expiry
    Never,
    /// Do not store; delete the key instead
    Delete,
}

impl Timeout {
    /// Resolve against the client default
    ///
    /// Positive values are truncated to whole seconds and never below one.
    /// Zero, negative or NaN deletes the key, unless the write is `NX`, where
    /// it means no expiry.
    pub(crate) fn resolve(self, default: Option<u64>, nx: bool) -> Expiry {
        let secs = match self {
            Self::Default => return default.map_or(Expiry::Never, Expiry::After),
            Self::Never => return Expiry::Never,
            Self::Seconds(secs) => secs,
        };

        if secs > 0.0 {
            // saturating float-to-int cast; (0, 1) is clamped up to one second
            Expiry::After((secs as u64).max(1))
        } else if nx {
            Expiry::Never
        } else {
            Expiry::Delete
        }
    }
}

/// Options for [`CacheClient::set_with`](crate::CacheClient::set_with)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SetOptions {
    pub timeout: Timeout,
    pub version: Option<u64>,
    /// Only write if the key does not exist
    pub nx: bool,
    /// Only write if the key already exists
    pub xx: bool,
}

impl SetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout(mut self, timeout: impl Into<Timeout>) -> Self {
        self.timeout = timeout.into();
        self
    }

    pub fn version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }

    pub fn nx(mut self) -> Self {
        self.nx = true;
        self
    }

    pub fn xx(mut self) -> Self {
        self.xx = true;
        self
    }
}
