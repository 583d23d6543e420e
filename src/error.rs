//! Error types for the Raft core.
//!
//! Three kinds an event handler can return, classified by how the node
//! loop must handle them: protocol errors (dropped, logged), transport
//! errors (dropped, logged, left to heartbeats to recover), and
//! persistence errors (fatal — the loop wraps these as `Fatal` and
//! aborts). Executor failures never take this path: they're a
//! `Result<String, String>` value the client sees, not an `Error`.

use thiserror::Error;

/// Top-level error type for the Raft core.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed envelope or unknown RPC type. Dropped by the caller, not
    /// fatal.
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// Failure to persist hard state or the log durably. This is fatal:
    /// the node must abort rather than proceed on state it could not
    /// make durable.
    #[error("persistence error: {message}")]
    Persistence { message: String },

    /// Failure sending on the peer transport. Invisible to the rest of the
    /// core; callers log and move on, relying on heartbeats to recover.
    #[error("transport error sending to {peer}: {message}")]
    Transport { peer: String, message: String },

    /// A condition that should never occur outside of a corrupted
    /// persistent store or a non-deterministic executor. Carries a
    /// correlation id so an operator can find the abort in logs.
    #[error("fatal error [{correlation_id}]: {message}")]
    Fatal {
        message: String,
        correlation_id: String,
    },
}

impl Error {
    pub fn protocol(message: impl Into<String>) -> Self {
        Error::Protocol {
            message: message.into(),
        }
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Error::Persistence {
            message: message.into(),
        }
    }

    pub fn transport(peer: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Transport {
            peer: peer.into(),
            message: message.into(),
        }
    }

    /// Wrap a fatal condition with a fresh correlation id.
    pub fn fatal(message: impl Into<String>) -> Self {
        Error::Fatal {
            message: message.into(),
            correlation_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

/// Result type alias used throughout the core.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_errors_carry_distinct_correlation_ids() {
        let a = Error::fatal("disk corruption");
        let b = Error::fatal("disk corruption");
        let (Error::Fatal { correlation_id: ca, .. }, Error::Fatal { correlation_id: cb, .. }) =
            (&a, &b)
        else {
            unreachable!()
        };
        assert_ne!(ca, cb);
    }
}
