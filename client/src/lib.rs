//! ASH Client - session side of the ASH secure messenger.
//!
//! `ash-core` owns the math; this crate owns everything around it:
//!
//! - [`ceremony`]: finalizing a QR ceremony into an installed conversation
//! - [`pad_manager`]: durable, crash-safe pad consumption
//! - [`store`] / [`state`]: vault-backed records and the duplicate filter
//! - [`relay`]: the untrusted store-and-forward server's client
//! - [`session`]: the per-conversation orchestrator (commands in, events
//!   out)
//!
//! Platform services are capability ports ([`ports`]); production wiring
//! injects the keychain and HTTP stacks, tests inject fakes and drive the
//! same headless API the UI uses.
//!
//! # Example: open a session and send a message
//!
//! ```no_run
//! use std::sync::Arc;
//! use ash_client::config::ClientConfig;
//! use ash_client::ports::MemoryVault;
//! use ash_client::relay::HttpRelay;
//! use ash_client::session::{Dependencies, Session};
//!
//! # async fn demo() -> ash_client::Result<()> {
//! let deps = Dependencies {
//!     vault: Arc::new(MemoryVault::new()),
//!     relay: Arc::new(HttpRelay::new()),
//!     config: ClientConfig::from_env(),
//! };
//!
//! let session = Session::open(deps, "2f9c01ab44e2d6707b1f0a9c33d501e8").await?;
//! let mut events = session.subscribe();
//! session.send_text("hello").await?;
//! # let _ = events.recv().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod ceremony;
pub mod config;
pub mod error;
pub mod pad_manager;
pub mod ports;
pub mod relay;
pub mod session;
pub mod state;
pub mod store;

pub use ceremony::{PendingSession, ScanSession};
pub use config::ClientConfig;
pub use error::{Error, Result};
pub use pad_manager::PadManager;
pub use ports::{MemoryVault, SecureVault};
pub use session::{Dependencies, Session, SessionEvent, SessionHandle, SessionState};
pub use state::{Conversation, DeliveryStatus, Direction, Message};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
