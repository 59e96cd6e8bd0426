//! Simulated security-upgrade handshake.
//!
//! A handshake is a strict two-round exchange of [`HandshakeToken`]s: the
//! initiator's token goes out, the responder answers with its own, and each
//! side verifies the token it received against its own [`SecurityContext`].
//! No cryptography happens here. The outcome is whatever the context's
//! verification predicate says.
//!
//! # Invariants
//!
//! - A side only marks its token sent once it is ready to send: the initiator
//!   is ready at creation, the responder only after seeing the peer's token.
//! - Verification runs only on the completion leg, i.e. after this side has
//!   sent its own token.

use std::fmt;

use bytes::Bytes;

/// Capability pair used by the simulated handshake.
///
/// The simulator never inspects the credential. It only carries it to the
/// peer and asks the peer's context whether it is acceptable.
pub trait SecurityContext {
    /// Credential this side presents to its peer.
    fn credential_token(&self) -> Bytes;

    /// Whether the peer's credential is acceptable.
    fn verify_peer(&self, peer_token: &[u8]) -> bool;
}

/// Context that accepts exactly the peers presenting the same secret.
///
/// Two sides built from the same secret verify each other; different secrets
/// fail on both sides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedSecretContext {
    secret: Bytes,
}

impl SharedSecretContext {
    /// Create a context around `secret`.
    pub fn new(secret: impl Into<Bytes>) -> Self {
        Self { secret: secret.into() }
    }
}

impl SecurityContext for SharedSecretContext {
    fn credential_token(&self) -> Bytes {
        self.secret.clone()
    }

    fn verify_peer(&self, peer_token: &[u8]) -> bool {
        self.secret.as_ref() == peer_token
    }
}

/// Handshake traffic carried in place of payload bytes.
///
/// Never valid application data: receivers distinguish it by type, not by
/// content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeToken {
    credential: Bytes,
}

impl HandshakeToken {
    /// Credential presented by the sending side.
    pub fn credential(&self) -> &Bytes {
        &self.credential
    }
}

/// Where a pending negotiation currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    /// Initiator that has not yet handed its token to the pump.
    Created,
    /// Responder waiting for the initiator's token.
    AwaitingPeerToken,
    /// Responder that saw the initiator's token and may now answer.
    ReadyToRespond,
    /// Token handed to the pump; waiting for the completion leg.
    Sent,
}

/// How the most recent handshake on a transport finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// Verification succeeded and withheld writes were released.
    Resolved,
    /// Verification failed and the connection is being torn down.
    Failed,
}

/// One in-flight handshake exchange.
pub struct HandshakeNegotiation {
    context: Box<dyn SecurityContext>,
    /// True if this side sends its token first.
    connect_state: bool,
    sent: bool,
    ready_to_send: bool,
}

impl HandshakeNegotiation {
    /// Start a negotiation. `initiator` decides who speaks first.
    pub fn new(context: Box<dyn SecurityContext>, initiator: bool) -> Self {
        Self { context, connect_state: initiator, sent: false, ready_to_send: initiator }
    }

    /// True if this side sends its token first.
    pub fn is_initiator(&self) -> bool {
        self.connect_state
    }

    /// True once this side's token has been handed to the pump.
    pub fn is_sent(&self) -> bool {
        self.sent
    }

    /// True once this side may send its token.
    pub fn is_ready_to_send(&self) -> bool {
        self.ready_to_send
    }

    /// Current phase, derived from the flags.
    pub fn phase(&self) -> HandshakePhase {
        match (self.sent, self.ready_to_send, self.connect_state) {
            (true, ..) => HandshakePhase::Sent,
            (false, true, true) => HandshakePhase::Created,
            (false, true, false) => HandshakePhase::ReadyToRespond,
            (false, false, _) => HandshakePhase::AwaitingPeerToken,
        }
    }

    /// Claim this side's token for sending, if it is allowed to speak.
    ///
    /// Repeated polls while ready yield the token again; the exchange
    /// completes when both tokens cross in the same pump round.
    pub(crate) fn poll_token(&mut self) -> Option<HandshakeToken> {
        if !self.ready_to_send {
            return None;
        }
        self.sent = true;
        Some(HandshakeToken { credential: self.context.credential_token() })
    }

    /// Initial leg: the peer spoke first, so this side may now answer.
    pub(crate) fn observe_peer_token(&mut self) {
        self.ready_to_send = true;
    }

    /// Completion leg: check the peer's credential against our context.
    pub(crate) fn verify(&self, peer: &HandshakeToken) -> bool {
        self.context.verify_peer(&peer.credential)
    }
}

impl fmt::Debug for HandshakeNegotiation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandshakeNegotiation")
            .field("connect_state", &self.connect_state)
            .field("sent", &self.sent)
            .field("ready_to_send", &self.ready_to_send)
            .finish_non_exhaustive()
    }
}
