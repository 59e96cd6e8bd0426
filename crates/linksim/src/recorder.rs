//! Reference endpoint that records every callback.
//!
//! Serves as the oracle side of link tests: whatever the pump delivered shows
//! up in [`RecordingProtocol::events`] in delivery order.

use bytes::{Bytes, BytesMut};

use crate::{error::DisconnectReason, protocol::Protocol, transport::SimTransport};

/// One observed callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolEvent {
    /// `connection_established`, with the transport's diagnostic label.
    Established {
        /// Label of the attached transport.
        transport: String,
    },
    /// `data_received`.
    Data(Bytes),
    /// `connection_lost`.
    Lost(DisconnectReason),
}

/// Endpoint that records callbacks and can optionally greet or echo.
#[derive(Debug, Clone, Default)]
pub struct RecordingProtocol {
    greeting: Option<Bytes>,
    echo: bool,
    events: Vec<ProtocolEvent>,
}

impl RecordingProtocol {
    /// Silent recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Write `greeting` as soon as the connection is established.
    #[must_use]
    pub fn with_greeting(mut self, greeting: impl Into<Bytes>) -> Self {
        self.greeting = Some(greeting.into());
        self
    }

    /// Write every received chunk straight back.
    #[must_use]
    pub fn echoing(mut self) -> Self {
        self.echo = true;
        self
    }

    /// Every callback so far.
    pub fn events(&self) -> &[ProtocolEvent] {
        &self.events
    }

    /// Chunks passed to `data_received`, one entry per call.
    pub fn received(&self) -> Vec<Bytes> {
        self.events
            .iter()
            .filter_map(|event| match event {
                ProtocolEvent::Data(data) => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    /// All received bytes, concatenated.
    pub fn received_bytes(&self) -> Bytes {
        let mut out = BytesMut::new();
        for chunk in self.received() {
            out.extend_from_slice(&chunk);
        }
        out.freeze()
    }

    /// Reasons passed to `connection_lost`.
    pub fn lost_reasons(&self) -> Vec<DisconnectReason> {
        self.events
            .iter()
            .filter_map(|event| match event {
                ProtocolEvent::Lost(reason) => Some(*reason),
                _ => None,
            })
            .collect()
    }

    /// Established and not yet lost.
    pub fn is_connected(&self) -> bool {
        let established =
            self.events.iter().any(|e| matches!(e, ProtocolEvent::Established { .. }));
        established && self.lost_reasons().is_empty()
    }
}

impl Protocol for RecordingProtocol {
    fn connection_established(&mut self, transport: &mut SimTransport) {
        self.events.push(ProtocolEvent::Established { transport: transport.to_string() });
        if let Some(greeting) = &self.greeting {
            transport.write(greeting);
        }
    }

    fn data_received(&mut self, transport: &mut SimTransport, data: Bytes) {
        if self.echo {
            transport.write(&data);
        }
        self.events.push(ProtocolEvent::Data(data));
    }

    fn connection_lost(&mut self, reason: DisconnectReason) {
        self.events.push(ProtocolEvent::Lost(reason));
    }
}
