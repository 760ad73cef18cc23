use thiserror::Error;

/// Failure classes for the live source.
///
/// The scheduler branches on these: a `TransientRead` is logged and the cycle
/// moves on, `ConnectionLost` is fatal for the source and stops the engine.
#[derive(Debug, Error)]
pub enum SourceError {
    /// A single failed read below the reconnect threshold.
    #[error("transient read failure ({consecutive} consecutive)")]
    TransientRead { consecutive: u32 },

    /// Reconnect attempts exhausted. Fatal for this source.
    #[error("connection lost after {attempts} reconnect attempts")]
    ConnectionLost { attempts: u32 },

    /// The stream opened but never delivered enough usable frames.
    #[error("probe validation failed ({successes} of {attempted} reads ok)")]
    ProbeFailed { successes: u32, attempted: u32 },

    /// Operation requires an open, validated connection.
    #[error("source is not connected")]
    NotConnected,

    /// Shutdown was requested while waiting out a backoff sleep.
    #[error("reconnect aborted by shutdown")]
    Aborted,

    /// Error surfaced by the underlying camera adapter.
    #[error(transparent)]
    Adapter(#[from] anyhow::Error),
}
