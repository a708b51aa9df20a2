//! Async session runner.
//!
//! Owns a transport and runs one [`SessionDriver`] per call to [`SessionRunner::run`]:
//! acquire the running flag, dismiss stray dialogs, dial, then loop turn by turn until
//! the transport signals the end of the session.
//!
//! Each turn waits at most `turn_timeout` for the transport. A lost reply re-sends the same
//! input up to `max_turn_retries` times before the session fails with
//! [`SessionError::TurnTimeout`]. Whatever the failure, the transport is cancelled, the
//! captured tokens are dropped and the running flag is released.

use crate::config::SessionConfig;
use crate::dismiss::{dismiss_stray_dialog, DialogDismisser, DismissCriteria};
use crate::driver::{SessionDriver, SessionState, Turn};
use crate::error::SessionError;
use crate::slot::SessionSlot;
use crate::transport::{TransportEvent, UssdTransport};
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, info_span, warn, Instrument};
use ussd_wire::Document;
use uuid::Uuid;

/// Progress events published while a session runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The driver changed state
    StateChanged {
        /// Previous state
        from: SessionState,
        /// New state
        to: SessionState,
    },
    /// A chunk reply yielded a token
    TokenCaptured {
        /// Tokens captured so far
        count: usize,
    },
    /// A chunk reply carried no token and was skipped
    ReplyAbsorbed,
    /// The transfer was reassembled
    Completed {
        /// Document size in bytes
        bytes: usize,
    },
    /// The session failed
    Failed {
        /// Display form of the error
        reason: String,
    },
}

/// The input a turn is waiting on, kept for re-sending after a timeout
enum Request {
    Dial(String),
    Send(String),
}

/// Host cancellation. A dropped sender never cancels.
struct CancelSignal {
    rx: Option<oneshot::Receiver<()>>,
}

impl CancelSignal {
    async fn fired(&mut self) {
        if let Some(rx) = self.rx.as_mut() {
            if rx.await.is_ok() {
                return;
            }
            self.rx = None;
        }
        std::future::pending::<()>().await
    }
}

/// Runs sessions over a transport
pub struct SessionRunner<T> {
    config: SessionConfig,
    slot: SessionSlot,
    transport: T,
    dismisser: Option<Box<dyn DialogDismisser>>,
    dismiss_criteria: DismissCriteria,
    events: Option<mpsc::Sender<SessionEvent>>,
}

impl<T: UssdTransport> SessionRunner<T> {
    /// Create a runner; `slot` is shared with every other runner in the process
    pub fn new(config: SessionConfig, slot: SessionSlot, transport: T) -> Self {
        Self {
            config,
            slot,
            transport,
            dismisser: None,
            dismiss_criteria: DismissCriteria::default(),
            events: None,
        }
    }

    /// Dismiss stray dialogs with this capability before each dial
    pub fn with_dismisser(mut self, dismisser: Box<dyn DialogDismisser>) -> Self {
        self.dismisser = Some(dismisser);
        self
    }

    /// Override the dismissal criteria
    pub fn with_dismiss_criteria(mut self, criteria: DismissCriteria) -> Self {
        self.dismiss_criteria = criteria;
        self
    }

    /// Publish progress events on this channel
    pub fn with_events(mut self, events: mpsc::Sender<SessionEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// The transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Consume the runner, returning the transport
    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Run one session to completion
    pub async fn run(&mut self) -> Result<Document, SessionError> {
        self.run_inner(CancelSignal { rx: None }).await
    }

    /// Run one session, aborting when `cancel` fires
    pub async fn run_with_cancel(
        &mut self,
        cancel: oneshot::Receiver<()>,
    ) -> Result<Document, SessionError> {
        self.run_inner(CancelSignal { rx: Some(cancel) }).await
    }

    async fn run_inner(&mut self, mut cancel: CancelSignal) -> Result<Document, SessionError> {
        let _permit = self.slot.try_acquire()?;

        if !self.transport.is_available() {
            warn!("USSD capability unavailable, not dialing");
            return Err(SessionError::CapabilityUnavailable);
        }

        if self.config.dial_code.trim().is_empty() {
            warn!("No dial code configured, not dialing");
            return Err(SessionError::EmptyDialCode);
        }

        let session_id = Uuid::new_v4();
        let span = info_span!("ussd_session", %session_id, target = %self.config.target_address);

        async {
            info!("Starting USSD session");
            let mut driver = SessionDriver::new(self.config.clone());

            let result = self.drive(&mut driver, &mut cancel).await;
            match &result {
                Ok(document) => {
                    info!(
                        "Session completed: {} packets, {} bytes",
                        document.packet_count,
                        document.bytes.len()
                    );
                    self.emit(SessionEvent::Completed {
                        bytes: document.bytes.len(),
                    });
                }
                Err(e) => {
                    warn!("Session failed in {}: {}", driver.state(), e);
                    let before = driver.state();
                    driver.abort();
                    self.transport.cancel().await;
                    self.emit_transition(before, driver.state());
                    self.emit(SessionEvent::Failed {
                        reason: e.to_string(),
                    });
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn drive(
        &mut self,
        driver: &mut SessionDriver,
        cancel: &mut CancelSignal,
    ) -> Result<Document, SessionError> {
        self.dismiss_stray_dialog();

        let dial_code = driver.start()?;
        self.transport.dial(&dial_code).await?;
        self.emit_transition(SessionState::Idle, driver.state());
        let mut request = Request::Dial(dial_code);

        loop {
            match self.next_event(driver.state(), &request, cancel).await? {
                TransportEvent::Reply(reply) => {
                    let before = driver.state();
                    let captured = driver.captured().len();
                    let turn = driver.on_reply(&reply);
                    self.emit_transition(before, driver.state());
                    let turn = turn?;

                    if driver.state() == before && absorbs_chunks(before) {
                        let count = driver.captured().len();
                        let event = if count > captured {
                            SessionEvent::TokenCaptured { count }
                        } else {
                            SessionEvent::ReplyAbsorbed
                        };
                        self.emit(event);
                    }

                    if let Turn::Send(input) = turn {
                        self.transport.send(&input).await?;
                        request = Request::Send(input);
                    }
                }
                TransportEvent::SessionEnded(final_text) => {
                    debug!("Transport ended the session in {}", driver.state());
                    let before = driver.state();
                    let result = driver.on_session_ended(&final_text);
                    self.emit_transition(before, driver.state());
                    return result;
                }
            }
        }
    }

    /// Await the next transport event, re-sending `request` after each timeout
    async fn next_event(
        &mut self,
        state: SessionState,
        request: &Request,
        cancel: &mut CancelSignal,
    ) -> Result<TransportEvent, SessionError> {
        let turn_timeout: Duration = self.config.turn_timeout();
        let mut attempts: u32 = 1;

        loop {
            let waited = tokio::select! {
                biased;
                _ = cancel.fired() => {
                    info!("Session cancelled by host in {}", state);
                    return Err(SessionError::Cancelled);
                }
                waited = tokio::time::timeout(turn_timeout, self.transport.next_event()) => waited,
            };

            match waited {
                Ok(event) => return Ok(event?),
                Err(_) if attempts <= self.config.max_turn_retries => {
                    warn!(
                        "No reply in {} after {:?}, re-sending (attempt {})",
                        state,
                        turn_timeout,
                        attempts + 1
                    );
                    match request {
                        Request::Dial(code) => self.transport.dial(code).await?,
                        Request::Send(input) => self.transport.send(input).await?,
                    }
                    attempts += 1;
                }
                Err(_) => return Err(SessionError::TurnTimeout { state, attempts }),
            }
        }
    }

    fn dismiss_stray_dialog(&mut self) {
        if let Some(dismisser) = self.dismisser.as_mut() {
            if dismiss_stray_dialog(dismisser.as_mut(), &self.dismiss_criteria).is_none() {
                debug!("No stray dialog to dismiss");
            }
        }
    }

    fn emit_transition(&self, from: SessionState, to: SessionState) {
        if from != to {
            self.emit(SessionEvent::StateChanged { from, to });
        }
    }

    /// Publish without waiting; events are dropped while the channel is full
    fn emit(&self, event: SessionEvent) {
        if let Some(tx) = &self.events {
            match tx.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(event)) => {
                    debug!("Session event channel full, dropping {:?}", event);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("Session event receiver dropped");
                }
            }
        }
    }
}

/// States in which a reply that stays in the same state is a chunk turn
fn absorbs_chunks(state: SessionState) -> bool {
    matches!(
        state,
        SessionState::DomainAcknowledged | SessionState::Fetching | SessionState::ReceivingChunks
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dismiss::DismissHandle;
    use crate::transport::{ScriptStep, ScriptedTransport};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use ussd_wire::{wrap_envelope, Packetizer};

    /// One stray "OK" dialog; counts presses
    struct OneDialog {
        present: bool,
        pressed: Arc<AtomicUsize>,
    }

    impl OneDialog {
        fn new() -> (Self, Arc<AtomicUsize>) {
            let pressed = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    present: true,
                    pressed: pressed.clone(),
                },
                pressed,
            )
        }
    }

    impl DialogDismisser for OneDialog {
        fn find_dismiss_target(&self, criteria: &DismissCriteria) -> Option<DismissHandle> {
            (self.present && criteria.labels.iter().any(|l| l == "OK")).then(|| DismissHandle {
                id: 7,
                label: "OK".to_string(),
            })
        }

        fn activate(&mut self, _handle: DismissHandle) -> bool {
            self.present = false;
            self.pressed.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    fn config() -> SessionConfig {
        SessionConfig {
            dial_code: "*384*1#".to_string(),
            target_address: "example.org".to_string(),
            ..Default::default()
        }
    }

    fn reply(text: &str) -> ScriptStep {
        ScriptStep::Reply(text.to_string())
    }

    fn transfer_script(doc: &[u8]) -> Vec<ScriptStep> {
        let mut steps = vec![
            reply("Enter App domain"),
            reply("DOMAIN SET"),
            reply("PACKETS READY"),
        ];
        let tokens = Packetizer::new(16).packetize(doc).unwrap();
        steps.extend(
            tokens
                .iter()
                .enumerate()
                .map(|(i, t)| ScriptStep::Reply(wrap_envelope(t, i))),
        );
        steps.push(reply("ALL PACKETS SENT"));
        steps.push(ScriptStep::Ended("Goodbye".to_string()));
        steps
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_reply_is_resent() {
        let mut steps = transfer_script(b"retry me");
        steps.insert(1, ScriptStep::Silence);

        let transport = ScriptedTransport::new(steps);
        let mut runner = SessionRunner::new(config(), SessionSlot::new(), transport);
        let doc = runner.run().await.unwrap();
        assert_eq!(doc.text, "retry me");

        // The target address went out twice: once, then again after the timeout.
        let sent = runner.transport().sent();
        assert_eq!(sent[0], "example.org");
        assert_eq!(sent[1], "example.org");
        assert_eq!(sent[2], "FETCH");
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted() {
        let slot = SessionSlot::new();
        let transport = ScriptedTransport::new(vec![
            ScriptStep::Silence,
            ScriptStep::Silence,
            ScriptStep::Silence,
        ]);
        let mut runner = SessionRunner::new(config(), slot.clone(), transport);

        assert_eq!(
            runner.run().await,
            Err(SessionError::TurnTimeout {
                state: SessionState::AwaitingDomainPrompt,
                attempts: 3
            })
        );
        assert_eq!(runner.transport().dialed().len(), 3);
        assert!(runner.transport().was_cancelled());
        assert!(!slot.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_mid_flight() {
        let slot = SessionSlot::new();
        let transport = ScriptedTransport::new(vec![
            reply("Enter App domain"),
            reply("DOMAIN SET"),
            reply("PACKETS READY"),
            reply("[dG9rZW4=, 1]"),
            ScriptStep::Silence,
        ]);
        let (tx, rx) = mpsc::channel(32);
        let mut runner =
            SessionRunner::new(config(), slot.clone(), transport).with_events(tx);

        let (cancel_tx, cancel_rx) = oneshot::channel();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            let _ = cancel_tx.send(());
        });

        assert_eq!(runner.run_with_cancel(cancel_rx).await, Err(SessionError::Cancelled));
        assert!(runner.transport().was_cancelled());
        assert!(!slot.is_running());

        drop(runner);
        let events = collect(rx).await;
        assert!(events.contains(&SessionEvent::TokenCaptured { count: 1 }));
        assert!(events.contains(&SessionEvent::StateChanged {
            from: SessionState::ReceivingChunks,
            to: SessionState::Failed
        }));
        assert_eq!(
            events.last(),
            Some(&SessionEvent::Failed {
                reason: "session cancelled".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_dropped_cancel_sender_is_not_cancel() {
        let transport = ScriptedTransport::new(transfer_script(b"keep going"));
        let mut runner = SessionRunner::new(config(), SessionSlot::new(), transport);

        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
        drop(cancel_tx);
        let doc = runner.run_with_cancel(cancel_rx).await.unwrap();
        assert_eq!(doc.text, "keep going");
    }

    #[tokio::test]
    async fn test_unavailable_capability() {
        let slot = SessionSlot::new();
        let mut runner =
            SessionRunner::new(config(), slot.clone(), ScriptedTransport::unavailable());
        assert_eq!(runner.run().await, Err(SessionError::CapabilityUnavailable));
        assert!(runner.transport().dialed().is_empty());
        assert!(!slot.is_running());
    }

    #[tokio::test]
    async fn test_empty_dial_code_never_dials() {
        let config = SessionConfig {
            dial_code: "  ".to_string(),
            ..config()
        };
        let (dialog, pressed) = OneDialog::new();
        let (tx, rx) = mpsc::channel(8);
        let slot = SessionSlot::new();
        let mut runner = SessionRunner::new(
            config,
            slot.clone(),
            ScriptedTransport::new(transfer_script(b"x")),
        )
        .with_dismisser(Box::new(dialog))
        .with_events(tx);

        assert_eq!(runner.run().await, Err(SessionError::EmptyDialCode));
        assert!(runner.transport().dialed().is_empty());
        assert!(!runner.transport().was_cancelled());
        assert_eq!(pressed.load(Ordering::SeqCst), 0);
        assert!(!slot.is_running());

        drop(runner);
        assert!(collect(rx).await.is_empty());
    }

    #[tokio::test]
    async fn test_dismisser_runs_before_dial() {
        let (dialog, pressed) = OneDialog::new();
        let transport = ScriptedTransport::new(transfer_script(b"after dismiss"));
        let mut runner = SessionRunner::new(config(), SessionSlot::new(), transport)
            .with_dismisser(Box::new(dialog));
        assert_eq!(runner.run().await.unwrap().text, "after dismiss");
        assert_eq!(pressed.load(Ordering::SeqCst), 1);
    }

    fn long_document() -> Vec<u8> {
        (0..4000u32)
            .flat_map(|i| i.wrapping_mul(2_654_435_761).to_le_bytes())
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_unread_events_do_not_stall_session() {
        let doc = long_document();
        let steps = transfer_script(&doc);
        assert!(steps.len() > 100);

        let (tx, rx) = mpsc::channel(4);
        let transport = ScriptedTransport::new(steps);
        let mut runner =
            SessionRunner::new(config(), SessionSlot::new(), transport).with_events(tx);

        let outcome = tokio::time::timeout(Duration::from_secs(600), runner.run()).await;
        assert_eq!(outcome.unwrap().unwrap().bytes.as_ref(), doc.as_slice());

        // Only the first few events fit; the rest were dropped.
        drop(runner);
        assert_eq!(collect(rx).await.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_with_unread_events() {
        let mut steps = transfer_script(&long_document());
        steps.truncate(steps.len() - 2);
        steps.push(ScriptStep::Silence);

        let (tx, _rx) = mpsc::channel(4);
        let slot = SessionSlot::new();
        let transport = ScriptedTransport::new(steps);
        let mut runner = SessionRunner::new(config(), slot.clone(), transport).with_events(tx);

        let (cancel_tx, cancel_rx) = oneshot::channel();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            let _ = cancel_tx.send(());
        });

        let run = runner.run_with_cancel(cancel_rx);
        let outcome = tokio::time::timeout(Duration::from_secs(600), run).await;
        assert_eq!(outcome.unwrap(), Err(SessionError::Cancelled));
        assert!(runner.transport().was_cancelled());
        assert!(!slot.is_running());
    }

    #[tokio::test]
    async fn test_absorbed_reply_before_packets_ready_is_counted() {
        let tokens = Packetizer::default().packetize(b"early bird").unwrap();
        assert_eq!(tokens.len(), 1);
        let steps = vec![
            reply("Enter App domain"),
            reply("DOMAIN SET"),
            ScriptStep::Reply(wrap_envelope(&tokens[0], 0)),
            reply("PACKETS READY"),
            reply("ALL PACKETS SENT"),
            ScriptStep::Ended("bye".to_string()),
        ];

        let (tx, rx) = mpsc::channel(32);
        let transport = ScriptedTransport::new(steps);
        let mut runner =
            SessionRunner::new(config(), SessionSlot::new(), transport).with_events(tx);
        assert_eq!(runner.run().await.unwrap().text, "early bird");
        assert_eq!(
            runner.transport().sent(),
            ["example.org", "FETCH", "SEND NEXT PACKETS", "SEND PACKETS", "END SESSION"]
        );

        drop(runner);
        assert!(collect(rx).await.contains(&SessionEvent::TokenCaptured { count: 1 }));
    }

    async fn collect(mut rx: mpsc::Receiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }
}
