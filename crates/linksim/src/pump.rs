//! Pump: moves buffered output across the link, one round at a time.
//!
//! A round drains both transports, services their producers, delivers what
//! was drained to the opposite side and, only if nothing moved, propagates at
//! most one pending disconnect. Data always reaches the peer before the peer
//! is told the connection is gone.
//!
//! # Invariants
//!
//! - Within a round, client output is delivered before server output.
//! - Disconnects are checked server first, then client, one per round.
//! - Each transport's teardown is propagated to the peer at most once.

use crate::{error::SimError, protocol::Protocol, transport::SimTransport};

/// Default cap on rounds per [`Pump::flush`].
pub const DEFAULT_MAX_FLUSH_ROUNDS: usize = 1000;

/// Pump configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PumpConfig {
    /// Rounds after which `flush` gives up and reports saturation.
    pub max_flush_rounds: usize,
    /// Log every round and transfer at `debug` instead of `trace`.
    pub debug: bool,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self { max_flush_rounds: DEFAULT_MAX_FLUSH_ROUNDS, debug: false }
    }
}

/// Link setup configuration for [`connect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkConfig {
    /// Flush once before handing the pump back.
    pub auto_flush: bool,
    /// Configuration of the returned pump.
    pub pump: PumpConfig,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self { auto_flush: true, pump: PumpConfig::default() }
    }
}

macro_rules! traffic {
    ($debug:expr, $($arg:tt)+) => {
        if $debug {
            tracing::debug!($($arg)+);
        } else {
            tracing::trace!($($arg)+);
        }
    };
}

/// In-memory connection between a client and a server endpoint.
///
/// Owns both endpoints and their transports. Nothing happens unless
/// [`pump_once`](Self::pump_once) or [`flush`](Self::flush) is called.
#[derive(Debug)]
pub struct Pump<C, S> {
    client: C,
    server: S,
    client_io: SimTransport,
    server_io: SimTransport,
    config: PumpConfig,
}

impl<C: Protocol, S: Protocol> Pump<C, S> {
    /// Create a pump over an already established pair.
    ///
    /// Use [`connect`] unless the endpoints were attached by hand.
    pub fn new(
        client: C,
        server: S,
        client_io: SimTransport,
        server_io: SimTransport,
        config: PumpConfig,
    ) -> Self {
        Self { client, server, client_io, server_io, config }
    }

    /// The client endpoint.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// The client endpoint, mutably.
    pub fn client_mut(&mut self) -> &mut C {
        &mut self.client
    }

    /// The server endpoint.
    pub fn server(&self) -> &S {
        &self.server
    }

    /// The server endpoint, mutably.
    pub fn server_mut(&mut self) -> &mut S {
        &mut self.server
    }

    /// The client's transport.
    pub fn client_transport(&self) -> &SimTransport {
        &self.client_io
    }

    /// The client's transport, mutably.
    pub fn client_transport_mut(&mut self) -> &mut SimTransport {
        &mut self.client_io
    }

    /// The server's transport.
    pub fn server_transport(&self) -> &SimTransport {
        &self.server_io
    }

    /// The server's transport, mutably.
    pub fn server_transport_mut(&mut self) -> &mut SimTransport {
        &mut self.server_io
    }

    /// Run `f` with the client endpoint and its transport.
    pub fn with_client<R>(&mut self, f: impl FnOnce(&mut C, &mut SimTransport) -> R) -> R {
        f(&mut self.client, &mut self.client_io)
    }

    /// Run `f` with the server endpoint and its transport.
    pub fn with_server<R>(&mut self, f: impl FnOnce(&mut S, &mut SimTransport) -> R) -> R {
        f(&mut self.server, &mut self.server_io)
    }

    /// Active configuration.
    pub fn config(&self) -> PumpConfig {
        self.config
    }

    /// Toggle traffic logging at `debug`.
    pub fn set_debug(&mut self, debug: bool) {
        self.config.debug = debug;
    }

    /// Consume the pump, returning `(client, server)`.
    pub fn into_endpoints(self) -> (C, S) {
        (self.client, self.server)
    }

    /// One bilateral transfer attempt.
    ///
    /// Returns `true` if data moved or a disconnect was delivered.
    pub fn pump_once(&mut self) -> Result<bool, SimError> {
        let debug = self.config.debug;
        traffic!(debug, client = %self.client_io, server = %self.server_io, "pump round");

        let server_out = self.server_io.take_outbound();
        let client_out = self.client_io.take_outbound();
        self.client_io.check_producer();
        self.server_io.check_producer();

        let moved = client_out.is_some() || server_out.is_some();

        if let Some(payload) = client_out {
            traffic!(debug, ?payload, "C -> S");
            self.server_io.deliver_incoming(&mut self.server, payload)?;
        }
        if let Some(payload) = server_out {
            traffic!(debug, ?payload, "S -> C");
            self.client_io.deliver_incoming(&mut self.client, payload)?;
        }
        if moved {
            return Ok(true);
        }

        if self.server_io.is_disconnecting() && !self.server_io.is_disconnected() {
            traffic!(debug, reason = %self.server_io.disconnect_reason(), "S closed, notifying C");
            self.server_io.mark_disconnected();
            self.client_io.inherit_reason(&self.server_io);
            self.client_io.report_disconnect(&mut self.client);
            return Ok(true);
        }
        if self.client_io.is_disconnecting() && !self.client_io.is_disconnected() {
            traffic!(debug, reason = %self.client_io.disconnect_reason(), "C closed, notifying S");
            self.client_io.mark_disconnected();
            self.server_io.inherit_reason(&self.client_io);
            self.server_io.report_disconnect(&mut self.server);
            return Ok(true);
        }

        Ok(false)
    }

    /// Pump until a round makes no progress.
    ///
    /// Returns whether any round made progress. Fails with
    /// [`SimError::Saturated`] if the link is still busy after
    /// `max_flush_rounds` rounds.
    pub fn flush(&mut self) -> Result<bool, SimError> {
        let mut progressed = false;
        for _ in 0..self.config.max_flush_rounds {
            if !self.pump_once()? {
                return Ok(progressed);
            }
            progressed = true;
        }

        tracing::warn!(
            client = %self.client_io,
            server = %self.server_io,
            rounds = self.config.max_flush_rounds,
            "link saturated"
        );
        Err(SimError::Saturated { rounds: self.config.max_flush_rounds })
    }
}

/// Attach both endpoints to their transports and return a pump over them.
///
/// The server is established before the client. With `auto_flush` set, any
/// connection preamble has already crossed the link when this returns.
pub fn connect<S, C>(
    mut server: S,
    mut server_transport: SimTransport,
    mut client: C,
    mut client_transport: SimTransport,
    config: LinkConfig,
) -> Result<Pump<C, S>, SimError>
where
    S: Protocol,
    C: Protocol,
{
    server.connection_established(&mut server_transport);
    client.connection_established(&mut client_transport);

    let mut pump = Pump::new(client, server, client_transport, server_transport, config.pump);
    if config.auto_flush {
        pump.flush()?;
    }
    Ok(pump)
}
