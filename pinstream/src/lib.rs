//! PinStream -- fingerprint-authenticated secure session establishment over byte streams.
//!
//! A [`Session`] drives a handshake over a [`transport::Transport`] and trusts the
//! peer only if its leaf certificate digest matches a value obtained out of band:
//! - **Stream** mode: ordered byte transport, no retransmission timer
//! - **Datagram** mode: lossy packets, flights retransmitted on timeout
//!
//! Sessions are single-threaded and driven by a [`scheduler::EventLoop`]; timer
//! expiry is delivered as an event, never as a callback into the session.

pub mod adapter;
pub mod config;
pub mod engine;
pub mod error;
pub mod scheduler;
pub mod session;
pub mod timer;
pub mod transport;
pub mod trust;

// Re-export key public types at crate root.
pub use adapter::{drive, EventSink, SessionAdapter, SessionHandler};
pub use config::SessionConfig;
pub use engine::{CryptoEngine, CryptoEngineContext, StepOutcome};
pub use error::{ConfigError, DigestError, ExportError, PinStreamError, Result, StartError};
pub use scheduler::{Event, EventLoop, LoopHandle, Scheduler, SessionToken};
pub use session::{Session, SessionEvent, SessionState};
pub use transport::{StreamEvent, StreamResult, StreamState, Transport, TransportMode};
pub use trust::PeerTrust;
