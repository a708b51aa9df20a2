//! Session error types.

use crate::driver::SessionState;
use crate::transport::TransportError;
use thiserror::Error;
use ussd_wire::ReassemblyError;

/// Errors that end a session. None of them are retried by the driver.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Another session holds the running flag
    #[error("a session is already running")]
    SessionBusy,

    /// The platform cannot place USSD calls right now
    #[error("USSD capability unavailable")]
    CapabilityUnavailable,

    /// Dial code is empty
    #[error("dial code is empty")]
    EmptyDialCode,

    /// A chunk reply carried no token and strict envelopes are enabled
    #[error("reply carries no token: {reply:?}")]
    MalformedEnvelope {
        /// The raw reply
        reply: String,
    },

    /// A reply did not carry the keyword the current state waits for
    #[error("unexpected reply in {state}: {reply:?}")]
    UnexpectedReply {
        /// State the reply arrived in
        state: SessionState,
        /// The raw reply
        reply: String,
    },

    /// The session ended before any token was captured
    #[error("session ended in {state} with nothing captured")]
    UnexpectedTermination {
        /// State the session was in when it ended
        state: SessionState,
    },

    /// No reply arrived within the turn timeout, after all retries
    #[error("no reply in {state} after {attempts} attempts")]
    TurnTimeout {
        /// State the turn was waiting in
        state: SessionState,
        /// Number of times the input was sent
        attempts: u32,
    },

    /// The session was cancelled by the host
    #[error("session cancelled")]
    Cancelled,

    /// The session already ended; it cannot end or receive replies again
    #[error("session already ended")]
    AlreadyEnded,

    /// The transport failed
    #[error("transport error: {0}")]
    Transport(TransportError),

    /// The captured tokens did not reassemble
    #[error("reassembly failed: {0}")]
    Reassembly(#[from] ReassemblyError),
}

impl From<TransportError> for SessionError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Unavailable => SessionError::CapabilityUnavailable,
            other => SessionError::Transport(other),
        }
    }
}
