//! Session configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use pintrust::{CipherSuite, CryptoOptions, ProtocolVersion};

use crate::error::{ConfigError, Result};
use crate::transport::TransportMode;

/// Defaults applied to a new [`crate::Session`]; per-session setters override them until `start()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub mode: TransportMode,
    /// Highest protocol version offered.
    pub max_protocol_version: ProtocolVersion,
    /// Require the peer to be verified by digest before the session opens;
    /// as server, also request and require a client certificate.
    pub client_auth_enabled: bool,
    /// First retransmission delay in datagram mode.
    pub initial_retransmission_timeout_ms: u64,
    /// Backoff ceiling.
    pub max_retransmission_timeout_ms: u64,
    pub crypto_options: CryptoOptions,
    /// Record protection suites in preference order.
    pub cipher_suites: Vec<CipherSuite>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mode: TransportMode::Stream,
            max_protocol_version: ProtocolVersion::Tls12,
            client_auth_enabled: true,
            initial_retransmission_timeout_ms: 50,
            max_retransmission_timeout_ms: 60_000,
            crypto_options: CryptoOptions::default(),
            cipher_suites: CipherSuite::ALL.to_vec(),
        }
    }
}

impl SessionConfig {
    /// Parse from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: SessionConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.initial_retransmission_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "initial_retransmission_timeout_ms must be positive".into(),
            ));
        }
        if self.initial_retransmission_timeout_ms > self.max_retransmission_timeout_ms {
            return Err(ConfigError::Invalid(
                "initial retransmission timeout exceeds the maximum".into(),
            ));
        }
        if self.cipher_suites.is_empty() {
            return Err(ConfigError::Invalid("cipher_suites must not be empty".into()));
        }
        Ok(())
    }

    pub fn initial_retransmission_timeout(&self) -> Duration {
        Duration::from_millis(self.initial_retransmission_timeout_ms)
    }

    pub fn max_retransmission_timeout(&self) -> Duration {
        Duration::from_millis(self.max_retransmission_timeout_ms)
    }
}
