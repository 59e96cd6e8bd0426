//! In-memory simulated link between two protocol endpoints.
//!
//! `linksim` wires a client and a server [`Protocol`] together over a pair of
//! [`SimTransport`]s and moves data between them only when asked. There are
//! no sockets, no timers and no event loop: every operation runs to
//! completion, so a fixed sequence of writes and pump calls always yields the
//! same callbacks in the same order.
//!
//! # Architecture
//!
//! ```text
//! client ──write──▶ SimTransport<C> ──┐          ┌── SimTransport<S> ◀──write── server
//!                                     ▼          ▼
//!                                  Pump::pump_once (drain, deliver, disconnect)
//!                                     │          │
//! client ◀─data_received/lost─────────┘          └─────────data_received/lost─▶ server
//! ```
//!
//! - [`SimTransport`]: per-endpoint buffers, handshake state, disconnect
//!   bookkeeping.
//! - [`HandshakeNegotiation`]: simulated STARTTLS-style exchange with a
//!   verification step and failure path.
//! - [`Pump`]: one round of bilateral transfer; [`Pump::flush`] repeats to
//!   quiescence.
//! - [`connect`]: attaches both endpoints and returns a ready pump.
//!
//! # Example
//!
//! ```rust
//! use linksim::{LinkConfig, RecordingProtocol, SerialCounter, SimTransport, connect};
//!
//! # fn main() -> Result<(), linksim::SimError> {
//! let mut serials = SerialCounter::new();
//! let server_io = SimTransport::server(&mut serials);
//! let client_io = SimTransport::client(&mut serials);
//!
//! let server = RecordingProtocol::new().with_greeting("hello");
//! let mut pump =
//!     connect(server, server_io, RecordingProtocol::new(), client_io, LinkConfig::default())?;
//!
//! assert_eq!(pump.client().received_bytes(), "hello");
//! pump.client_transport_mut().lose_connection();
//! pump.flush()?;
//! assert!(!pump.server().is_connected());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod buffer;
pub mod error;
pub mod handshake;
mod protocol;
pub mod pump;
mod recorder;
pub mod script;
pub mod transport;

pub use buffer::ChunkQueue;
pub use error::{DisconnectReason, SimError};
pub use handshake::{
    HandshakeNegotiation, HandshakeOutcome, HandshakePhase, HandshakeToken, SecurityContext,
    SharedSecretContext,
};
pub use protocol::{Producer, Protocol};
pub use pump::{DEFAULT_MAX_FLUSH_ROUNDS, LinkConfig, Pump, PumpConfig, connect};
pub use recorder::{ProtocolEvent, RecordingProtocol};
pub use script::LinkOp;
pub use transport::{Payload, Role, SerialCounter, SimAddress, SimTransport, TransportMode};
