//! Error taxonomy: invalid input vs. I/O vs. control-flow sentinels.

use std::time::Duration;

/// Errors returned by [`crate::decode`] and by tag callbacks.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The input bytes contradict the container's grammar: magic mismatch,
    /// impossible lengths, unsupported type codes, out-of-bounds offsets.
    #[error("invalid format: {0}")]
    InvalidFormat(String),

    /// The caller supplied unusable options (no reader, `ImageFormat::Auto`).
    #[error("{0}")]
    InvalidOptions(&'static str),

    /// The configured wall-clock timeout expired before the walker finished.
    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    /// An error from the underlying reader, propagated as-is.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Returned from a tag callback to stop the walk. [`crate::decode`]
    /// treats it as successful early termination; it is never surfaced.
    #[error("stop walking")]
    StopWalking,

    /// Internal sentinel used by the stream reader and the IPTC block loop
    /// to unwind without an error condition. Normalized to success before
    /// `decode` returns.
    #[doc(hidden)]
    #[error("stop")]
    Stop,
}

impl Error {
    pub(crate) fn invalid_format(msg: impl Into<String>) -> Error {
        Error::InvalidFormat(msg.into())
    }

    /// True for the sentinels that terminate a walk without failing it.
    pub(crate) fn is_stop(&self) -> bool {
        matches!(self, Error::Stop | Error::StopWalking)
    }

    /// True when a sub-decoder ran out of input: the internal stop sentinel
    /// or an unexpected-EOF read. Used by the recovery boundaries that keep
    /// one truncated source from aborting the others.
    pub(crate) fn is_truncation(&self) -> bool {
        match self {
            Error::Stop => true,
            Error::Io(e) => e.kind() == std::io::ErrorKind::UnexpectedEof,
            _ => false,
        }
    }
}
