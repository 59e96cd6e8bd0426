//! Simulated duplex transport.
//!
//! Each endpoint gets one [`SimTransport`]. Writes are buffered until the
//! pump drains them and hands them to the peer's input path. While a
//! handshake is pending, writes go to a separate withheld buffer that is only
//! released once the handshake resolves successfully.
//!
//! # Disconnect bookkeeping
//!
//! - `disconnecting`: teardown was requested by either side.
//! - `disconnected`: the pump has propagated this side's teardown to the peer.
//! - `disconnection_reported`: `connection_lost` was delivered to this side's
//!   own endpoint. Input arriving afterwards is discarded.

use std::{fmt, net::SocketAddr};

use arbitrary::Arbitrary;
use bytes::{Bytes, BytesMut};

use crate::{
    buffer::ChunkQueue,
    error::{DisconnectReason, SimError},
    handshake::{HandshakeNegotiation, HandshakeOutcome, HandshakeToken, SecurityContext},
    protocol::{Producer, Protocol},
};

/// Which side of the connection a transport sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Arbitrary)]
pub enum Role {
    /// The connecting side.
    Client,
    /// The accepting side.
    Server,
}

impl Role {
    fn tag(self) -> char {
        match self {
            Self::Client => 'C',
            Self::Server => 'S',
        }
    }
}

/// Host or peer address reported by a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SimAddress {
    /// No address was supplied.
    #[default]
    Unspecified,
    /// A concrete socket address.
    Socket(SocketAddr),
}

impl From<SocketAddr> for SimAddress {
    fn from(addr: SocketAddr) -> Self {
        Self::Socket(addr)
    }
}

/// Whether the channel has been upgraded by a successful handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportMode {
    /// No security layer.
    #[default]
    Plain,
    /// A handshake resolved successfully on this side.
    Secured,
}

/// Source of transport serial numbers.
///
/// Serials are diagnostic only. Thread one counter through the construction
/// of every transport that should share a numbering.
#[derive(Debug, Clone, Default)]
pub struct SerialCounter {
    next: u64,
}

impl SerialCounter {
    /// Counter starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter whose first serial is `first`.
    pub fn starting_at(first: u64) -> Self {
        Self { next: first }
    }

    /// Hand out the next serial.
    pub fn next_serial(&mut self) -> u64 {
        let serial = self.next;
        self.next += 1;
        serial
    }
}

/// What the pump moves across the link in one direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Application bytes.
    Data(Bytes),
    /// A handshake token standing in for the security negotiation.
    Handshake(HandshakeToken),
}

impl Payload {
    /// True for handshake traffic.
    pub fn is_handshake(&self) -> bool {
        matches!(self, Self::Handshake(_))
    }
}

/// Handshake in flight plus the writes withheld until it resolves.
#[derive(Debug)]
struct PendingHandshake {
    negotiation: HandshakeNegotiation,
    withheld: ChunkQueue,
}

/// One endpoint's side of a simulated link.
pub struct SimTransport {
    role: Role,
    serial: u64,
    host_address: SimAddress,
    peer_address: SimAddress,

    outbound: ChunkQueue,
    handshake: Option<PendingHandshake>,
    mode: TransportMode,
    last_handshake: Option<HandshakeOutcome>,

    disconnecting: bool,
    disconnected: bool,
    disconnection_reported: bool,
    /// Explicit reason; `None` falls back to the abort/done default.
    disconnect_reason: Option<DisconnectReason>,
    aborting: bool,

    producer: Option<Box<dyn Producer>>,
    streaming_producer: bool,
    /// Bumped on every (un)registration, so a producer that swaps itself out
    /// during `resume_producing` is not put back afterwards.
    producer_epoch: u64,
}

impl SimTransport {
    /// Create a transport with an explicit serial.
    pub fn new(role: Role, serial: u64) -> Self {
        Self {
            role,
            serial,
            host_address: SimAddress::Unspecified,
            peer_address: SimAddress::Unspecified,
            outbound: ChunkQueue::new(),
            handshake: None,
            mode: TransportMode::Plain,
            last_handshake: None,
            disconnecting: false,
            disconnected: false,
            disconnection_reported: false,
            disconnect_reason: None,
            aborting: false,
            producer: None,
            streaming_producer: false,
            producer_epoch: 0,
        }
    }

    /// Create the connecting side's transport.
    pub fn client(serials: &mut SerialCounter) -> Self {
        Self::new(Role::Client, serials.next_serial())
    }

    /// Create the accepting side's transport.
    pub fn server(serials: &mut SerialCounter) -> Self {
        Self::new(Role::Server, serials.next_serial())
    }

    /// Override the host address.
    #[must_use]
    pub fn with_host_address(mut self, addr: impl Into<SimAddress>) -> Self {
        self.host_address = addr.into();
        self
    }

    /// Override the peer address.
    #[must_use]
    pub fn with_peer_address(mut self, addr: impl Into<SimAddress>) -> Self {
        self.peer_address = addr.into();
        self
    }

    /// Side of the connection.
    pub fn role(&self) -> Role {
        self.role
    }

    /// True on the accepting side.
    pub fn is_server(&self) -> bool {
        self.role == Role::Server
    }

    /// Diagnostic serial number.
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Address of this side.
    pub fn host_address(&self) -> SimAddress {
        self.host_address
    }

    /// Address of the other side.
    pub fn peer_address(&self) -> SimAddress {
        self.peer_address
    }

    /// Label identifying this transport to the logging system.
    pub fn log_prefix(&self) -> &'static str {
        "linksim"
    }

    /// Plain or secured.
    pub fn mode(&self) -> TransportMode {
        self.mode
    }

    /// True once a handshake has resolved successfully.
    pub fn is_secured(&self) -> bool {
        self.mode == TransportMode::Secured
    }

    /// The handshake in flight, if any.
    pub fn handshake(&self) -> Option<&HandshakeNegotiation> {
        self.handshake.as_ref().map(|pending| &pending.negotiation)
    }

    /// How the most recent handshake finished, if one has.
    pub fn handshake_outcome(&self) -> Option<HandshakeOutcome> {
        self.last_handshake
    }

    /// Bytes waiting to be drained by the pump.
    pub fn pending_bytes(&self) -> usize {
        self.outbound.byte_len()
    }

    /// Bytes withheld until the pending handshake resolves.
    pub fn withheld_bytes(&self) -> usize {
        self.handshake.as_ref().map_or(0, |pending| pending.withheld.byte_len())
    }

    /// Teardown has been requested.
    pub fn is_disconnecting(&self) -> bool {
        self.disconnecting
    }

    /// The teardown has been propagated to the peer.
    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }

    /// `connection_lost` has been delivered to this side's endpoint.
    pub fn is_disconnection_reported(&self) -> bool {
        self.disconnection_reported
    }

    /// Teardown is abrupt rather than graceful.
    pub fn is_aborting(&self) -> bool {
        self.aborting
    }

    /// Reason this transport reports when the connection goes away.
    pub fn disconnect_reason(&self) -> DisconnectReason {
        match self.disconnect_reason {
            Some(reason) => reason,
            None if self.aborting => DisconnectReason::ConnectionAborted,
            None => DisconnectReason::ConnectionDone,
        }
    }

    /// Record an explicit reason, overriding the default.
    pub fn set_disconnect_reason(&mut self, reason: DisconnectReason) {
        self.disconnect_reason = Some(reason);
    }

    /// True while a producer is registered.
    pub fn has_producer(&self) -> bool {
        self.producer.is_some()
    }

    /// True if the registered producer is push-based.
    pub fn is_streaming_producer(&self) -> bool {
        self.streaming_producer
    }

    /// Queue bytes for the peer.
    ///
    /// While a handshake is pending the bytes are withheld until it resolves.
    pub fn write(&mut self, data: &[u8]) {
        self.write_bytes(Bytes::copy_from_slice(data));
    }

    /// Queue several chunks as a single write.
    pub fn write_sequence<I, B>(&mut self, chunks: I)
    where
        I: IntoIterator<Item = B>,
        B: AsRef<[u8]>,
    {
        let mut joined = BytesMut::new();
        for chunk in chunks {
            joined.extend_from_slice(chunk.as_ref());
        }
        self.write_bytes(joined.freeze());
    }

    fn write_bytes(&mut self, data: Bytes) {
        match self.handshake.as_mut() {
            Some(pending) => pending.withheld.push(data),
            None => self.outbound.push(data),
        }
    }

    /// Register a producer to be resumed once per pump round.
    ///
    /// A non-streaming producer is resumed once immediately.
    pub fn register_producer(&mut self, producer: Box<dyn Producer>, streaming: bool) {
        self.producer = Some(producer);
        self.streaming_producer = streaming;
        self.producer_epoch += 1;
        if !streaming {
            self.service_producer();
        }
    }

    /// Drop the registered producer.
    pub fn unregister_producer(&mut self) {
        self.producer = None;
        self.producer_epoch += 1;
    }

    /// Unregister the producer and close gracefully.
    pub fn stop_consuming(&mut self) {
        self.unregister_producer();
        self.lose_connection();
    }

    /// Request graceful teardown.
    ///
    /// Only sets a flag. The peer learns about it on a later pump round.
    pub fn lose_connection(&mut self) {
        if !self.disconnecting {
            tracing::debug!(transport = %self, "disconnect requested");
        }
        self.disconnecting = true;
    }

    /// Request abrupt teardown.
    pub fn abort_connection(&mut self) {
        self.aborting = true;
        self.lose_connection();
    }

    /// Begin a handshake in the default role for this side.
    ///
    /// The connecting side initiates and the accepting side responds.
    pub fn start_tls(&mut self, context: Box<dyn SecurityContext>) -> Result<(), SimError> {
        self.start_tls_with_role(context, true)
    }

    /// Begin a handshake, optionally swapping the default roles.
    ///
    /// With `act_as_normal_role == false` a server initiates and a client
    /// responds.
    pub fn start_tls_with_role(
        &mut self,
        context: Box<dyn SecurityContext>,
        act_as_normal_role: bool,
    ) -> Result<(), SimError> {
        if self.handshake.is_some() {
            return Err(SimError::HandshakeAlreadyPending { transport: self.to_string() });
        }

        let initiator = self.is_server() ^ act_as_normal_role;
        tracing::debug!(transport = %self, initiator, "handshake started");

        self.handshake = Some(PendingHandshake {
            negotiation: HandshakeNegotiation::new(context, initiator),
            withheld: ChunkQueue::new(),
        });
        Ok(())
    }

    /// Drain what should cross the link next.
    ///
    /// Buffered bytes always win over a pending handshake token. The token is
    /// only offered once this side is allowed to speak.
    pub fn take_outbound(&mut self) -> Option<Payload> {
        if let Some(data) = self.outbound.drain_concat() {
            return Some(Payload::Data(data));
        }

        let pending = self.handshake.as_mut()?;
        pending.negotiation.poll_token().map(Payload::Handshake)
    }

    fn is_tearing_down_after_failed_handshake(&self) -> bool {
        self.disconnecting && self.last_handshake == Some(HandshakeOutcome::Failed)
    }

    /// Input path: something arrived from the peer.
    ///
    /// Everything is discarded once this side has reported its disconnection.
    /// Data is also discarded while this side tears down after failing its
    /// own handshake verification. A peer that resolved may already have
    /// released its withheld writes.
    pub fn deliver_incoming<P>(&mut self, protocol: &mut P, payload: Payload) -> Result<(), SimError>
    where
        P: Protocol + ?Sized,
    {
        if self.disconnection_reported {
            tracing::trace!(transport = %self, "dropping input after disconnect");
            return Ok(());
        }

        match payload {
            Payload::Data(data) if self.is_tearing_down_after_failed_handshake() => {
                tracing::trace!(
                    transport = %self,
                    bytes = data.len(),
                    "dropping data after failed handshake"
                );
            },
            Payload::Data(data) => protocol.data_received(self, data),
            Payload::Handshake(token) => self.receive_token(&token)?,
        }
        Ok(())
    }

    fn receive_token(&mut self, token: &HandshakeToken) -> Result<(), SimError> {
        let Some(pending) = self.handshake.as_mut() else {
            return Err(SimError::UnexpectedHandshakeToken { transport: self.to_string() });
        };

        if !pending.negotiation.is_sent() {
            pending.negotiation.observe_peer_token();
            return Ok(());
        }

        let Some(PendingHandshake { negotiation, mut withheld }) = self.handshake.take() else {
            return Ok(());
        };

        if negotiation.verify(token) {
            tracing::debug!(transport = %self, "handshake resolved");
            self.mode = TransportMode::Secured;
            self.last_handshake = Some(HandshakeOutcome::Resolved);
            for chunk in withheld.drain() {
                self.write_bytes(chunk);
            }
        } else {
            tracing::debug!(
                transport = %self,
                withheld = withheld.byte_len(),
                "handshake verification failed"
            );
            self.last_handshake = Some(HandshakeOutcome::Failed);
            self.disconnect_reason = Some(DisconnectReason::SecurityNegotiation);
            self.abort_connection();
        }
        Ok(())
    }

    /// Deliver closure to this side's endpoint, exactly once.
    ///
    /// A handshake still in flight turns the reason into a security failure.
    pub fn report_disconnect<P>(&mut self, protocol: &mut P)
    where
        P: Protocol + ?Sized,
    {
        if self.disconnection_reported {
            return;
        }
        self.disconnecting = true;

        let reason = if self.handshake.take().is_some() {
            DisconnectReason::SecurityNegotiation
        } else {
            self.disconnect_reason()
        };

        self.disconnection_reported = true;
        tracing::debug!(transport = %self, %reason, "connection lost");
        protocol.connection_lost(reason);
    }

    pub(crate) fn mark_disconnected(&mut self) {
        self.disconnected = true;
    }

    /// Adopt the peer's reason if this side neither recorded a reason nor
    /// asked to close on its own.
    pub(crate) fn inherit_reason(&mut self, peer: &Self) {
        if self.disconnect_reason.is_none() && !self.disconnecting {
            self.disconnect_reason = Some(peer.disconnect_reason());
        }
    }

    /// Idle-time producer servicing, run once per pump round.
    pub(crate) fn check_producer(&mut self) {
        if self.producer.is_some() {
            self.service_producer();
        }
    }

    fn service_producer(&mut self) {
        let Some(mut producer) = self.producer.take() else {
            return;
        };
        let epoch = self.producer_epoch;
        producer.resume_producing(self);
        if self.producer_epoch == epoch {
            self.producer = Some(producer);
        }
    }
}

impl fmt::Display for SimTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SimTransport<{},{}>", self.role.tag(), self.serial)
    }
}

impl fmt::Debug for SimTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimTransport")
            .field("role", &self.role)
            .field("serial", &self.serial)
            .field("mode", &self.mode)
            .field("pending_bytes", &self.outbound.byte_len())
            .field("handshake", &self.handshake)
            .field("disconnecting", &self.disconnecting)
            .field("disconnected", &self.disconnected)
            .field("disconnection_reported", &self.disconnection_reported)
            .field("has_producer", &self.producer.is_some())
            .finish_non_exhaustive()
    }
}
