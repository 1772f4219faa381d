//! Transport stream contract: the byte-level channel a session runs over.

pub mod memory;

use serde::{Deserialize, Serialize};

/// Record-layer semantics selected for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Ordered, reliable byte stream. Reads may return partial records.
    #[default]
    Stream,
    /// Unreliable packets. Each read returns one whole datagram.
    Datagram,
}

/// Result of a single read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamResult {
    Success(usize),
    WouldBlock,
    EndOfStream,
    /// Transport-defined error code, opaque to the session.
    Error(i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Closed,
    Opening,
    Open,
}

/// Readiness notifications delivered through the event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEvent {
    Opened,
    Readable,
    Writable,
    /// Stream closed; 0 for an orderly close.
    Closed(i32),
}

/// A non-blocking byte transport.
///
/// Implementations never block; readiness changes are announced as
/// [`StreamEvent`]s posted for the owning session's token.
pub trait Transport {
    fn state(&self) -> StreamState;
    fn read(&mut self, buf: &mut [u8]) -> StreamResult;
    fn write(&mut self, data: &[u8]) -> StreamResult;
    fn close(&mut self);
}
