// Per-role handshake state.

/// Where a [`super::Handshake`] is in its message exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Created, `start` not yet called.
    Idle,

    // ── Client ──────────────────────────────────────────────────────────
    AwaitServerHello,
    AwaitServerCertificate { certificate_requested: bool },
    AwaitServerCertificateVerify { certificate_requested: bool },
    AwaitServerFinished { certificate_requested: bool },

    // ── Server ──────────────────────────────────────────────────────────
    AwaitClientHello,
    AwaitClientCertificate,
    AwaitClientCertificateVerify,
    AwaitClientFinished,

    /// Both Finished messages verified (server) or sent (client).
    Complete,
}

impl HandshakeState {
    /// Human-readable label for the current state (used in error messages).
    pub fn label(&self) -> &'static str {
        match self {
            HandshakeState::Idle => "Idle",
            HandshakeState::AwaitServerHello => "AwaitServerHello",
            HandshakeState::AwaitServerCertificate { .. } => "AwaitServerCertificate",
            HandshakeState::AwaitServerCertificateVerify { .. } => "AwaitServerCertificateVerify",
            HandshakeState::AwaitServerFinished { .. } => "AwaitServerFinished",
            HandshakeState::AwaitClientHello => "AwaitClientHello",
            HandshakeState::AwaitClientCertificate => "AwaitClientCertificate",
            HandshakeState::AwaitClientCertificateVerify => "AwaitClientCertificateVerify",
            HandshakeState::AwaitClientFinished => "AwaitClientFinished",
            HandshakeState::Complete => "Complete",
        }
    }
}
