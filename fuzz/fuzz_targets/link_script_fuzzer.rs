//! Fuzz target for the simulated link.
//!
//! Drives a pair of recording endpoints with arbitrary operation scripts,
//! including handshakes in any role combination and teardown at any point.
//!
//! # Invariants
//!
//! - `connection_lost` reaches each endpoint at most once
//! - Nothing is delivered to an endpoint after its connection was lost
//! - A side whose handshake failed never releases withheld bytes
//! - Contract violations surface as `SimError`, NEVER as a panic

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use linksim::{
    connect, HandshakeOutcome, LinkConfig, LinkOp, ProtocolEvent, Pump, PumpConfig,
    RecordingProtocol, SerialCounter, SimTransport,
};

#[derive(Debug, Arbitrary)]
struct FuzzInput {
    client_greeting: Vec<u8>,
    server_greeting: Vec<u8>,
    ops: Vec<LinkOp>,
}

type RecordingPump = Pump<RecordingProtocol, RecordingProtocol>;

fn lost_at_most_once(protocol: &RecordingProtocol) {
    let events = protocol.events();
    let lost = events.iter().filter(|e| matches!(e, ProtocolEvent::Lost(_))).count();
    assert!(lost <= 1, "connection_lost delivered {lost} times");

    if let Some(pos) = events.iter().position(|e| matches!(e, ProtocolEvent::Lost(_))) {
        assert_eq!(pos, events.len() - 1, "event after connection_lost");
    }
}

fn check(pump: &RecordingPump) {
    lost_at_most_once(pump.client());
    lost_at_most_once(pump.server());

    for io in [pump.client_transport(), pump.server_transport()] {
        if io.handshake_outcome() == Some(HandshakeOutcome::Failed) {
            assert!(io.is_aborting());
            assert!(io.is_disconnecting());
        }
    }
}

fuzz_target!(|input: FuzzInput| {
    let mut serials = SerialCounter::new();
    let server_io = SimTransport::server(&mut serials);
    let client_io = SimTransport::client(&mut serials);
    let config = LinkConfig {
        auto_flush: true,
        pump: PumpConfig { max_flush_rounds: 64, debug: false },
    };

    let client = RecordingProtocol::new().with_greeting(input.client_greeting);
    let server = RecordingProtocol::new().with_greeting(input.server_greeting);

    let Ok(mut pump) = connect(server, server_io, client, client_io, config) else {
        return;
    };

    for op in input.ops.iter().take(256) {
        if pump.apply(op).is_err() {
            // Usage error: the link is in an undefined state from here on
            break;
        }
        check(&pump);
    }
});
