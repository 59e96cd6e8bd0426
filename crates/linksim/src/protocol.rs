//! Capabilities the simulator needs from the code under test.

use bytes::Bytes;

use crate::{error::DisconnectReason, transport::SimTransport};

/// An endpoint attached to one side of a simulated link.
///
/// Callbacks run synchronously from inside the pump. The endpoint receives
/// its own transport by reference so it can write, start a handshake or
/// close the connection in response.
pub trait Protocol {
    /// The transport is attached. Called once, before any other callback.
    fn connection_established(&mut self, transport: &mut SimTransport);

    /// Application bytes from the peer, in delivery order.
    fn data_received(&mut self, transport: &mut SimTransport, data: Bytes);

    /// The connection is gone. Called at most once per transport.
    fn connection_lost(&mut self, reason: DisconnectReason);
}

/// Pull-based source of writes registered on a transport.
///
/// The transport resumes a registered producer once per pump round. A
/// non-streaming producer is also primed once at registration.
pub trait Producer {
    /// Produce more data, typically by writing to `transport`.
    ///
    /// The producer may unregister itself, or register a replacement, from
    /// inside this call.
    fn resume_producing(&mut self, transport: &mut SimTransport);
}
