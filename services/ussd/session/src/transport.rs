//! USSD transport capability.
//!
//! The platform places the call and reads replies; the session only sees the
//! [`UssdTransport`] trait. [`ScriptedTransport`] replays a fixed conversation and is what
//! tests and the `replay` command run against.

use async_trait::async_trait;
use std::collections::VecDeque;
use thiserror::Error;
use tracing::{debug, trace};

/// Transport failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The platform cannot place USSD calls
    #[error("USSD capability unavailable")]
    Unavailable,

    /// The transport has no more events to deliver
    #[error("transport closed")]
    Closed,

    /// Platform-reported failure (carrier error code, rejected request)
    #[error("platform failure: {0}")]
    Platform(String),
}

/// A signal from the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Reply to the last input; the session continues
    Reply(String),
    /// The session is over; carries the last message shown
    SessionEnded(String),
}

/// Places a USSD call and exchanges its menu inputs
#[async_trait]
pub trait UssdTransport: Send {
    /// Whether the platform can place USSD calls right now
    fn is_available(&self) -> bool;

    /// Dial the code that opens the session
    async fn dial(&mut self, code: &str) -> Result<(), TransportError>;

    /// Send one menu input
    async fn send(&mut self, input: &str) -> Result<(), TransportError>;

    /// Wait for the next reply or the end of the session
    async fn next_event(&mut self) -> Result<TransportEvent, TransportError>;

    /// Tear down the call; the transport delivers nothing afterwards
    async fn cancel(&mut self);
}

/// One scripted step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptStep {
    /// Deliver a reply
    Reply(String),
    /// End the session with this final message
    Ended(String),
    /// Lose this reply; the next event never arrives
    Silence,
}

/// Transport that replays a fixed list of steps and records what was sent
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    steps: VecDeque<ScriptStep>,
    dialed: Vec<String>,
    sent: Vec<String>,
    unavailable: bool,
    cancelled: bool,
}

impl ScriptedTransport {
    /// Create a transport that replays `steps` in order
    pub fn new(steps: impl IntoIterator<Item = ScriptStep>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
            ..Default::default()
        }
    }

    /// A transport whose platform cannot place calls
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Default::default()
        }
    }

    /// Codes dialed, including re-dials after a timeout
    pub fn dialed(&self) -> &[String] {
        &self.dialed
    }

    /// Inputs sent after dialing, in order
    pub fn sent(&self) -> &[String] {
        &self.sent
    }

    /// Steps not yet consumed
    pub fn remaining(&self) -> usize {
        self.steps.len()
    }

    /// Whether [`UssdTransport::cancel`] was called
    pub fn was_cancelled(&self) -> bool {
        self.cancelled
    }
}

#[async_trait]
impl UssdTransport for ScriptedTransport {
    fn is_available(&self) -> bool {
        !self.unavailable
    }

    async fn dial(&mut self, code: &str) -> Result<(), TransportError> {
        if self.unavailable {
            return Err(TransportError::Unavailable);
        }
        trace!("Scripted dial {}", code);
        self.dialed.push(code.to_string());
        Ok(())
    }

    async fn send(&mut self, input: &str) -> Result<(), TransportError> {
        if self.cancelled {
            return Err(TransportError::Closed);
        }
        trace!("Scripted send {:?}", input);
        self.sent.push(input.to_string());
        Ok(())
    }

    async fn next_event(&mut self) -> Result<TransportEvent, TransportError> {
        if self.cancelled {
            return Err(TransportError::Closed);
        }
        match self.steps.pop_front() {
            Some(ScriptStep::Reply(text)) => Ok(TransportEvent::Reply(text)),
            Some(ScriptStep::Ended(text)) => Ok(TransportEvent::SessionEnded(text)),
            Some(ScriptStep::Silence) => {
                debug!("Scripted silence, reply lost");
                std::future::pending().await
            }
            None => Err(TransportError::Closed),
        }
    }

    async fn cancel(&mut self) {
        self.cancelled = true;
        self.steps.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_replay_order() {
        let mut t = ScriptedTransport::new(vec![
            ScriptStep::Reply("one".to_string()),
            ScriptStep::Ended("bye".to_string()),
        ]);
        t.dial("*1#").await.unwrap();
        assert_eq!(t.next_event().await.unwrap(), TransportEvent::Reply("one".to_string()));
        t.send("two").await.unwrap();
        assert_eq!(
            t.next_event().await.unwrap(),
            TransportEvent::SessionEnded("bye".to_string())
        );
        assert_eq!(t.next_event().await, Err(TransportError::Closed));
        assert_eq!(t.dialed(), ["*1#".to_string()]);
        assert_eq!(t.sent(), ["two".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_never_resolves() {
        let mut t = ScriptedTransport::new(vec![ScriptStep::Silence]);
        let waited =
            tokio::time::timeout(std::time::Duration::from_secs(5), t.next_event()).await;
        assert!(waited.is_err());
        assert_eq!(t.remaining(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_and_cancel() {
        let mut t = ScriptedTransport::unavailable();
        assert!(!t.is_available());
        assert_eq!(t.dial("*1#").await, Err(TransportError::Unavailable));

        let mut t = ScriptedTransport::new(vec![ScriptStep::Reply("x".to_string())]);
        t.cancel().await;
        assert!(t.was_cancelled());
        assert_eq!(t.next_event().await, Err(TransportError::Closed));
    }
}
