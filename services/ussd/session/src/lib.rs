//! Turn-by-turn USSD session driving for the USSD tunnel.
//!
//! A transfer is one USSD session: dial, announce the target, ask the server to fetch,
//! then pull packets one reply at a time until the server says everything was sent.
//! The captured tokens are handed to [`ussd_wire::Reassembler`] when the session ends.
//!
//! ## Features
//!
//! - **Session Driver**: sans-IO state machine, one call per transport signal
//! - **Session Slot**: the single running flag, acquired atomically, released on drop
//! - **Transport**: async capability trait plus a scripted implementation for replays
//! - **Dialog Dismissal**: capability for clearing stray system dialogs before dialing
//! - **Runner**: async turn loop with per-turn timeout, capped retry, cancellation and events
//!
//! ## Example
//!
//! ```rust,no_run
//! use ussd_session::{ScriptStep, ScriptedTransport, SessionConfig, SessionRunner, SessionSlot};
//!
//! # async fn example() -> Result<(), ussd_session::SessionError> {
//! let config = SessionConfig {
//!     dial_code: "*384*1#".to_string(),
//!     target_address: "example.org".to_string(),
//!     ..Default::default()
//! };
//!
//! let transport = ScriptedTransport::new(vec![
//!     ScriptStep::Reply("Enter App domain".to_string()),
//!     ScriptStep::Reply("DOMAIN SET".to_string()),
//!     // ...
//! ]);
//!
//! let mut runner = SessionRunner::new(config, SessionSlot::new(), transport);
//! let document = runner.run().await?;
//! println!("{}", document.text);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod dismiss;
pub mod driver;
pub mod error;
pub mod keywords;
pub mod runner;
pub mod slot;
pub mod transport;

// Re-export main types
pub use config::SessionConfig;
pub use dismiss::{dismiss_stray_dialog, DialogDismisser, DismissCriteria, DismissHandle};
pub use driver::{SessionDriver, SessionState, Turn};
pub use error::SessionError;
pub use keywords::{KeywordCategory, KeywordTable, ProtocolKeyword, ProtocolKeywords};
pub use runner::{SessionEvent, SessionRunner};
pub use slot::{SessionPermit, SessionSlot};
pub use transport::{ScriptStep, ScriptedTransport, TransportError, TransportEvent, UssdTransport};
