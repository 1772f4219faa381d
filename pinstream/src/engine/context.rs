//! Process-level crypto engine context.

use std::cell::Cell;

use rand::rngs::OsRng;
use rand::RngCore;
use tracing::debug;

use crate::error::{PinStreamError, Result};

use super::{CryptoEngine, PinEngine};

/// Explicit crypto initialization, created once by the process entry point.
///
/// Every session's engine is created from a context; dropping or calling
/// [`CryptoEngineContext::teardown`] ends the lifecycle. Engines already
/// handed out own their state and outlive the context.
#[derive(Debug)]
pub struct CryptoEngineContext {
    engines_created: Cell<u64>,
}

impl CryptoEngineContext {
    /// Check that the OS entropy source is usable before any handshake relies on it.
    pub fn initialize() -> Result<Self> {
        let mut sample = [0u8; 32];
        OsRng
            .try_fill_bytes(&mut sample)
            .map_err(|e| PinStreamError::EngineInit(format!("entropy source unavailable: {e}")))?;
        debug!("crypto engine context initialized");
        Ok(Self {
            engines_created: Cell::new(0),
        })
    }

    /// A fresh engine for one session.
    pub fn create_engine(&self) -> Box<dyn CryptoEngine> {
        self.engines_created.set(self.engines_created.get() + 1);
        Box::new(PinEngine::new())
    }

    pub fn engines_created(&self) -> u64 {
        self.engines_created.get()
    }

    pub fn teardown(self) {
        debug!(engines = self.engines_created.get(), "crypto engine context torn down");
    }
}
