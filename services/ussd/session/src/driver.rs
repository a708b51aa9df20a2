//! The session automaton.
//!
//! [`SessionDriver`] does no I/O. The caller feeds it the transport's two signals, a reply
//! to the last input ([`SessionDriver::on_reply`]) and the end of the session
//! ([`SessionDriver::on_session_ended`]), and sends whatever [`Turn`] it returns.
//!
//! ```text
//! Idle --dial--> AwaitingDomainPrompt --"Enter App domain"/target--> DomainAcknowledged
//!      --"DOMAIN SET"/FETCH--> Fetching --"PACKETS READY"/SEND PACKETS--> ReceivingChunks
//!      --chunk/SEND NEXT PACKETS--> ReceivingChunks --"ALL PACKETS SENT"/END SESSION--> Completed
//! ```
//!
//! Only the first reply after dialing must match its keyword. From `DomainAcknowledged`
//! on, any reply that is not the keyword the state expects is taken as a chunk, whatever
//! it says: its token (if any) is captured, `SEND NEXT PACKETS` goes out and the state
//! stays put. An unexpected server message is therefore absorbed like a packet and will
//! surface later as a reassembly failure, if at all.

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::keywords::ProtocolKeyword;
use serde::Serialize;
use std::fmt;
use tracing::{debug, info, trace, warn};
use ussd_wire::{extract_token, Document, Reassembler};

/// Sent after the domain is acknowledged
pub const FETCH: &str = "FETCH";
/// Sent when the server has packets ready
pub const SEND_PACKETS: &str = "SEND PACKETS";
/// Sent after each chunk
pub const SEND_NEXT_PACKETS: &str = "SEND NEXT PACKETS";
/// Sent after the last chunk
pub const END_SESSION: &str = "END SESSION";

/// Session states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SessionState {
    /// Not started
    Idle,
    /// Dialed, waiting for the domain prompt
    AwaitingDomainPrompt,
    /// Target address sent
    DomainAcknowledged,
    /// Fetch requested
    Fetching,
    /// Pulling packets
    ReceivingChunks,
    /// All packets received (or transfer reassembled)
    Completed,
    /// Session failed
    Failed,
}

impl SessionState {
    /// Whether no further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "Idle",
            SessionState::AwaitingDomainPrompt => "AwaitingDomainPrompt",
            SessionState::DomainAcknowledged => "DomainAcknowledged",
            SessionState::Fetching => "Fetching",
            SessionState::ReceivingChunks => "ReceivingChunks",
            SessionState::Completed => "Completed",
            SessionState::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// What the caller should do after feeding a reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Turn {
    /// Send this input and await the reply
    Send(String),
    /// Send nothing; wait for the session to end
    Wait,
}

/// Drives one USSD session
#[derive(Debug)]
pub struct SessionDriver {
    config: SessionConfig,
    state: SessionState,
    captured: Vec<String>,
    ended: bool,
}

impl SessionDriver {
    /// Create an idle driver
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            state: SessionState::Idle,
            captured: Vec::new(),
            ended: false,
        }
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Tokens captured so far, in arrival order
    pub fn captured(&self) -> &[String] {
        &self.captured
    }

    /// Whether the session has ended (reassembled, failed at end, or aborted)
    pub fn has_ended(&self) -> bool {
        self.ended
    }

    /// Configuration in use
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Start the session and return the dial code to place.
    ///
    /// Fails without any transition if the driver is not idle or the dial code is empty.
    pub fn start(&mut self) -> Result<String, SessionError> {
        if self.state != SessionState::Idle {
            return Err(SessionError::SessionBusy);
        }
        let dial_code = self.config.dial_code.trim();
        if dial_code.is_empty() {
            return Err(SessionError::EmptyDialCode);
        }

        let dial_code = dial_code.to_string();
        self.transition(SessionState::AwaitingDomainPrompt);
        Ok(dial_code)
    }

    /// Feed the reply to the last input
    pub fn on_reply(&mut self, reply: &str) -> Result<Turn, SessionError> {
        if self.ended {
            return Err(SessionError::AlreadyEnded);
        }

        let keyword = self.config.keywords.classify(reply);
        match (self.state, keyword) {
            (SessionState::Idle, _) => Err(SessionError::UnexpectedReply {
                state: SessionState::Idle,
                reply: reply.to_string(),
            }),
            (SessionState::AwaitingDomainPrompt, Some(ProtocolKeyword::DomainPrompt)) => {
                let target = self.config.target_address.clone();
                self.transition(SessionState::DomainAcknowledged);
                Ok(Turn::Send(target))
            }
            (SessionState::DomainAcknowledged, Some(ProtocolKeyword::DomainSet)) => {
                self.transition(SessionState::Fetching);
                Ok(Turn::Send(FETCH.to_string()))
            }
            (SessionState::Fetching, Some(ProtocolKeyword::PacketsReady)) => {
                self.transition(SessionState::ReceivingChunks);
                Ok(Turn::Send(SEND_PACKETS.to_string()))
            }
            (SessionState::ReceivingChunks, Some(ProtocolKeyword::AllPacketsSent)) => {
                info!(
                    "Server finished sending, {} tokens captured",
                    self.captured.len()
                );
                self.transition(SessionState::Completed);
                Ok(Turn::Send(END_SESSION.to_string()))
            }
            (SessionState::AwaitingDomainPrompt, _) => {
                warn!("No domain prompt after dialing: {:?}", reply);
                self.fail();
                Err(SessionError::UnexpectedReply {
                    state: SessionState::AwaitingDomainPrompt,
                    reply: reply.to_string(),
                })
            }
            (SessionState::DomainAcknowledged | SessionState::Fetching, _) => {
                debug!(
                    "Reply in {} is not the expected keyword, taking it as a chunk",
                    self.state
                );
                self.absorb_chunk(reply)?;
                Ok(Turn::Send(SEND_NEXT_PACKETS.to_string()))
            }
            (SessionState::ReceivingChunks, _) => {
                self.absorb_chunk(reply)?;
                Ok(Turn::Send(SEND_NEXT_PACKETS.to_string()))
            }
            (SessionState::Completed, _) => {
                debug!("Ignoring reply after completion: {:?}", reply);
                Ok(Turn::Wait)
            }
            (SessionState::Failed, _) => Err(SessionError::AlreadyEnded),
        }
    }

    /// Handle the end-of-session signal and reassemble the captured tokens.
    ///
    /// Runs reassembly at most once. With nothing captured the session fails with
    /// [`SessionError::UnexpectedTermination`].
    pub fn on_session_ended(&mut self, final_text: &str) -> Result<Document, SessionError> {
        if self.ended {
            return Err(SessionError::AlreadyEnded);
        }
        self.ended = true;

        let state = self.state;
        if state == SessionState::ReceivingChunks
            && self.config.keywords.classify(final_text) != Some(ProtocolKeyword::AllPacketsSent)
        {
            if let Some(token) = extract_token(final_text) {
                trace!("Captured token from final message");
                self.captured.push(token.to_string());
            }
        }

        if self.captured.is_empty() {
            warn!("Session ended in {} with nothing captured", state);
            self.fail();
            return Err(SessionError::UnexpectedTermination { state });
        }

        let tokens = std::mem::take(&mut self.captured);
        debug!("Session ended in {}, reassembling {} tokens", state, tokens.len());

        match Reassembler::new(self.config.reassembly_options()).reassemble(&tokens) {
            Ok(document) => {
                self.transition(SessionState::Completed);
                Ok(document)
            }
            Err(e) => {
                warn!("Reassembly of {} tokens failed: {}", tokens.len(), e);
                self.fail();
                Err(e.into())
            }
        }
    }

    /// Abort mid-flight: discard captured tokens, never reassemble
    pub fn abort(&mut self) {
        if !self.ended {
            debug!(
                "Aborting session in {}, discarding {} tokens",
                self.state,
                self.captured.len()
            );
        }
        self.ended = true;
        self.fail();
    }

    fn absorb_chunk(&mut self, reply: &str) -> Result<(), SessionError> {
        match extract_token(reply) {
            Some(token) => {
                self.captured.push(token.to_string());
                trace!("Captured token #{} ({} chars)", self.captured.len(), token.len());
                Ok(())
            }
            None if self.config.strict_envelope => {
                warn!("Chunk reply carries no token: {:?}", reply);
                self.fail();
                Err(SessionError::MalformedEnvelope {
                    reply: reply.to_string(),
                })
            }
            None => {
                warn!("Absorbing chunk reply with no token: {:?}", reply);
                Ok(())
            }
        }
    }

    fn fail(&mut self) {
        self.captured.clear();
        self.transition(SessionState::Failed);
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            debug!("Session state {} -> {}", self.state, next);
            self.state = next;
        }
    }
}
