//! Operation scripts for driving a link.
//!
//! Operations are small and composable so proptest and the fuzzer can explore
//! interleavings of writes, teardown and pumping. Replaying the same script
//! against the same endpoints always produces the same callbacks.

use arbitrary::Arbitrary;

use crate::{
    error::SimError,
    handshake::SharedSecretContext,
    protocol::Protocol,
    pump::Pump,
    transport::{Role, SimTransport},
};

/// One step of a link script.
#[derive(Debug, Clone, PartialEq, Eq, Arbitrary)]
pub enum LinkOp {
    /// Write bytes on one side.
    Write {
        /// Side performing the write.
        side: Role,
        /// Bytes to write.
        data: Vec<u8>,
    },

    /// Begin a handshake on one side.
    ///
    /// Both sides using the same `secret` verify each other.
    StartTls {
        /// Side starting the handshake.
        side: Role,
        /// Single-byte shared secret.
        secret: u8,
        /// `false` swaps initiator and responder for this side.
        normal_role: bool,
    },

    /// Graceful close on one side.
    LoseConnection {
        /// Side closing.
        side: Role,
    },

    /// Abrupt close on one side.
    AbortConnection {
        /// Side closing.
        side: Role,
    },

    /// Run a single pump round.
    PumpOnce,

    /// Pump to quiescence.
    Flush,
}

impl LinkOp {
    /// True for operations that move data between the sides.
    pub fn is_pump(&self) -> bool {
        matches!(self, Self::PumpOnce | Self::Flush)
    }
}

impl<C: Protocol, S: Protocol> Pump<C, S> {
    /// The transport on `side`.
    pub fn transport_mut(&mut self, side: Role) -> &mut SimTransport {
        match side {
            Role::Client => self.client_transport_mut(),
            Role::Server => self.server_transport_mut(),
        }
    }

    /// Apply one operation.
    ///
    /// Returns whether the link made progress. Only pump operations can.
    pub fn apply(&mut self, op: &LinkOp) -> Result<bool, SimError> {
        match op {
            LinkOp::Write { side, data } => {
                self.transport_mut(*side).write(data);
                Ok(false)
            },
            LinkOp::StartTls { side, secret, normal_role } => {
                let context = Box::new(SharedSecretContext::new(vec![*secret]));
                self.transport_mut(*side).start_tls_with_role(context, *normal_role)?;
                Ok(false)
            },
            LinkOp::LoseConnection { side } => {
                self.transport_mut(*side).lose_connection();
                Ok(false)
            },
            LinkOp::AbortConnection { side } => {
                self.transport_mut(*side).abort_connection();
                Ok(false)
            },
            LinkOp::PumpOnce => self.pump_once(),
            LinkOp::Flush => self.flush(),
        }
    }

    /// Apply every operation in order, stopping at the first violation.
    pub fn apply_all<'a>(&mut self, ops: impl IntoIterator<Item = &'a LinkOp>) -> Result<(), SimError> {
        for op in ops {
            self.apply(op)?;
        }
        Ok(())
    }
}
