//! Simulator error types.
//!
//! Two families live here. [`SimError`] is a contract violation: the test or
//! the protocol under test drove the link into a state the simulator refuses
//! to guess about. [`DisconnectReason`] is ordinary data handed to an
//! endpoint's `connection_lost`, including the simulated security failure.

use thiserror::Error;

/// Contract violations raised by the simulator.
///
/// None of these are recoverable. They indicate a bug in the test setup or
/// in the protocol under test, and callers are expected to fail loudly.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimError {
    /// A handshake token arrived at a transport with no pending handshake.
    #[error("{transport} received a handshake token without a pending handshake")]
    UnexpectedHandshakeToken {
        /// Diagnostic label of the receiving transport.
        transport: String,
    },

    /// `start_tls` was called while a handshake was still in flight.
    #[error("{transport} already has a handshake in flight")]
    HandshakeAlreadyPending {
        /// Diagnostic label of the transport.
        transport: String,
    },

    /// `flush` hit its round cap without reaching quiescence.
    #[error("link did not reach quiescence after {rounds} pump rounds")]
    Saturated {
        /// Number of rounds that were attempted.
        rounds: usize,
    },
}

/// Why a connection was lost, as reported to the endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum DisconnectReason {
    /// Orderly close.
    #[error("connection done")]
    ConnectionDone,

    /// Abrupt close requested with `abort_connection`.
    #[error("connection aborted")]
    ConnectionAborted,

    /// The simulated security handshake failed or was interrupted.
    #[error("security negotiation failed")]
    SecurityNegotiation,
}

impl DisconnectReason {
    /// Returns true for an orderly close.
    pub fn is_clean(self) -> bool {
        matches!(self, Self::ConnectionDone)
    }
}
