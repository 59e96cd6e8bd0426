//! Simulated security-upgrade handshake across a link.
//!
//! Covers the success path, verification failure, role reversal, stalls and
//! the contract violations. Bytes written while a handshake is pending must
//! never cross before it resolves, and never cross at all if it fails.

use bytes::Bytes;
use linksim::{
    DisconnectReason, HandshakeNegotiation, HandshakeOutcome, HandshakePhase, LinkConfig, Payload,
    Protocol, Pump, RecordingProtocol, SecurityContext, SerialCounter, SharedSecretContext,
    SimError, SimTransport, TransportMode, connect,
};

fn pair() -> Pump<RecordingProtocol, RecordingProtocol> {
    let mut serials = SerialCounter::new();
    let server_io = SimTransport::server(&mut serials);
    let client_io = SimTransport::client(&mut serials);
    connect(
        RecordingProtocol::new(),
        server_io,
        RecordingProtocol::new(),
        client_io,
        LinkConfig::default(),
    )
    .expect("link settles")
}

fn secret(value: &'static str) -> Box<dyn SecurityContext> {
    Box::new(SharedSecretContext::new(value))
}

/// Context with a fixed verification answer.
struct FixedVerdict(bool);

impl SecurityContext for FixedVerdict {
    fn credential_token(&self) -> Bytes {
        Bytes::from_static(b"fixed")
    }

    fn verify_peer(&self, _peer_token: &[u8]) -> bool {
        self.0
    }
}

fn start_both<C: Protocol, S: Protocol>(
    pump: &mut Pump<C, S>,
    client: Box<dyn SecurityContext>,
    server: Box<dyn SecurityContext>,
) {
    pump.client_transport_mut().start_tls(client).expect("no handshake pending");
    pump.server_transport_mut().start_tls(server).expect("no handshake pending");
}

#[test]
fn matching_contexts_secure_both_sides() {
    let mut pump = pair();
    start_both(&mut pump, secret("k"), secret("k"));

    assert!(pump.flush().expect("link settles"));

    for io in [pump.client_transport(), pump.server_transport()] {
        assert_eq!(io.mode(), TransportMode::Secured);
        assert_eq!(io.handshake_outcome(), Some(HandshakeOutcome::Resolved));
        assert!(io.handshake().is_none());
    }
    assert!(pump.client().is_connected());
    assert!(pump.server().is_connected());
}

#[test]
fn handshake_resolves_within_four_rounds() {
    let mut pump = pair();
    start_both(&mut pump, secret("k"), secret("k"));

    let mut rounds = 0;
    while pump.client_transport().handshake().is_some()
        || pump.server_transport().handshake().is_some()
    {
        assert!(rounds < 4, "handshake still pending after {rounds} rounds");
        pump.pump_once().expect("round succeeds");
        rounds += 1;
    }
    assert_eq!(rounds, 2);
}

#[test]
fn default_roles_client_initiates() {
    let mut pump = pair();
    start_both(&mut pump, secret("k"), secret("k"));

    let client = pump.client_transport().handshake().map(HandshakeNegotiation::phase);
    let server = pump.server_transport().handshake().map(HandshakeNegotiation::phase);
    assert_eq!(client, Some(HandshakePhase::Created));
    assert_eq!(server, Some(HandshakePhase::AwaitingPeerToken));
    assert_eq!(pump.client_transport().handshake().map(|h| h.is_ready_to_send()), Some(true));
    assert_eq!(pump.server_transport().handshake().map(|h| h.is_ready_to_send()), Some(false));

    // Round 1: client's token lets the server answer
    assert!(pump.pump_once().expect("round succeeds"));
    let client = pump.client_transport().handshake().map(HandshakeNegotiation::phase);
    let server = pump.server_transport().handshake().map(HandshakeNegotiation::phase);
    assert_eq!(client, Some(HandshakePhase::Sent));
    assert_eq!(server, Some(HandshakePhase::ReadyToRespond));
    assert_eq!(pump.server_transport().handshake().map(|h| h.is_ready_to_send()), Some(true));

    // Round 2: tokens cross and both sides verify
    assert!(pump.pump_once().expect("round succeeds"));
    assert!(pump.client_transport().is_secured());
    assert!(pump.server_transport().is_secured());
}

#[test]
fn reversed_roles_server_initiates() {
    let mut pump = pair();
    pump.client_transport_mut().start_tls_with_role(secret("k"), false).expect("no handshake");
    pump.server_transport_mut().start_tls_with_role(secret("k"), false).expect("no handshake");

    assert_eq!(pump.client_transport().handshake().map(|h| h.is_initiator()), Some(false));
    assert_eq!(pump.server_transport().handshake().map(|h| h.is_initiator()), Some(true));

    pump.flush().expect("link settles");
    assert!(pump.client_transport().is_secured());
    assert!(pump.server_transport().is_secured());
}

#[test]
fn two_initiators_resolve_in_one_round() {
    let mut pump = pair();
    pump.client_transport_mut().start_tls(secret("k")).expect("no handshake");
    pump.server_transport_mut().start_tls_with_role(secret("k"), false).expect("no handshake");

    assert!(pump.pump_once().expect("round succeeds"));
    assert!(pump.client_transport().is_secured());
    assert!(pump.server_transport().is_secured());
}

#[test]
fn writes_during_handshake_cross_only_after_resolution() {
    let mut pump = pair();
    start_both(&mut pump, secret("k"), secret("k"));
    pump.client_transport_mut().write(b"client-1 ");
    pump.client_transport_mut().write(b"client-2");
    pump.server_transport_mut().write(b"server-1");

    assert_eq!(pump.client_transport().withheld_bytes(), 17);
    assert_eq!(pump.server_transport().withheld_bytes(), 8);

    // Two rounds of token exchange, nothing delivered yet
    pump.pump_once().expect("round succeeds");
    pump.pump_once().expect("round succeeds");
    assert!(pump.client().received().is_empty());
    assert!(pump.server().received().is_empty());
    assert_eq!(pump.client_transport().pending_bytes(), 17);

    pump.flush().expect("link settles");
    assert_eq!(pump.server().received(), vec![Bytes::from_static(b"client-1 client-2")]);
    assert_eq!(pump.client().received(), vec![Bytes::from_static(b"server-1")]);
}

#[test]
fn bytes_queued_before_start_tls_go_first() {
    let mut pump = pair();
    pump.client_transport_mut().write(b"plain");
    start_both(&mut pump, secret("k"), secret("k"));
    pump.client_transport_mut().write(b"secured");

    pump.flush().expect("link settles");

    assert_eq!(
        pump.server().received(),
        vec![Bytes::from_static(b"plain"), Bytes::from_static(b"secured")]
    );
}

#[test]
fn failed_verification_disconnects_both_sides_once() {
    let mut pump = pair();
    start_both(&mut pump, secret("alpha"), secret("beta"));
    pump.client_transport_mut().write(b"never delivered");
    pump.server_transport_mut().write(b"also never delivered");

    assert!(pump.flush().expect("link settles"));

    assert_eq!(pump.client().lost_reasons(), vec![DisconnectReason::SecurityNegotiation]);
    assert_eq!(pump.server().lost_reasons(), vec![DisconnectReason::SecurityNegotiation]);
    assert!(pump.client().received().is_empty());
    assert!(pump.server().received().is_empty());

    for io in [pump.client_transport(), pump.server_transport()] {
        assert_eq!(io.mode(), TransportMode::Plain);
        assert_eq!(io.handshake_outcome(), Some(HandshakeOutcome::Failed));
        assert!(io.is_aborting());
    }

    assert!(!pump.flush().expect("quiescent"));
}

#[test]
fn one_sided_failure_reaches_the_peer_as_security_failure() {
    let mut pump = pair();
    start_both(&mut pump, Box::new(FixedVerdict(false)), Box::new(FixedVerdict(true)));
    pump.client_transport_mut().write(b"client secret");

    pump.flush().expect("link settles");

    assert_eq!(pump.client_transport().handshake_outcome(), Some(HandshakeOutcome::Failed));
    assert_eq!(pump.server_transport().handshake_outcome(), Some(HandshakeOutcome::Resolved));
    assert!(pump.server().received().is_empty());
    assert_eq!(pump.client().lost_reasons(), vec![DisconnectReason::SecurityNegotiation]);
    assert_eq!(pump.server().lost_reasons(), vec![DisconnectReason::SecurityNegotiation]);
}

#[test]
fn resolving_side_never_reaches_a_peer_that_failed() {
    let mut pump = pair();
    start_both(&mut pump, Box::new(FixedVerdict(false)), Box::new(FixedVerdict(true)));
    pump.server_transport_mut().write(b"written during the handshake");

    pump.flush().expect("link settles");

    // The server resolved and released its withheld bytes, but the client
    // already failed and is tearing down
    assert_eq!(pump.server_transport().handshake_outcome(), Some(HandshakeOutcome::Resolved));
    assert_eq!(pump.client_transport().handshake_outcome(), Some(HandshakeOutcome::Failed));
    assert!(pump.client().received().is_empty());
    assert_eq!(pump.client().lost_reasons(), vec![DisconnectReason::SecurityNegotiation]);
    assert_eq!(pump.server().lost_reasons(), vec![DisconnectReason::SecurityNegotiation]);
}

#[test]
fn two_responders_stall_until_closed() {
    let mut pump = pair();
    pump.client_transport_mut().start_tls_with_role(secret("k"), false).expect("no handshake");
    pump.server_transport_mut().start_tls(secret("k")).expect("no handshake");

    // Nobody may speak first
    assert!(!pump.flush().expect("link settles"));
    assert!(pump.client_transport().handshake().is_some());
    assert!(pump.server_transport().handshake().is_some());

    pump.client_transport_mut().lose_connection();
    pump.flush().expect("link settles");

    assert_eq!(pump.client().lost_reasons(), vec![DisconnectReason::SecurityNegotiation]);
    assert_eq!(pump.server().lost_reasons(), vec![DisconnectReason::SecurityNegotiation]);
}

#[test]
fn token_without_pending_handshake_is_fatal() {
    let mut pump = pair();
    pump.client_transport_mut().start_tls(secret("k")).expect("no handshake");

    let err = pump.flush().unwrap_err();
    assert_eq!(err, SimError::UnexpectedHandshakeToken { transport: "SimTransport<S,0>".into() });
}

#[test]
fn token_carries_the_context_credential() {
    let mut io = SimTransport::client(&mut SerialCounter::new());
    io.start_tls(secret("credential")).expect("no handshake pending");

    let payload = io.take_outbound();
    assert!(
        matches!(&payload, Some(Payload::Handshake(token)) if token.credential() == "credential"),
        "expected the credential token, got {payload:?}"
    );
}

#[test]
fn restarting_a_pending_handshake_is_rejected() {
    let mut pump = pair();
    pump.server_transport_mut().start_tls(secret("k")).expect("no handshake");

    let err = pump.server_transport_mut().start_tls(secret("k")).unwrap_err();
    assert_eq!(err, SimError::HandshakeAlreadyPending { transport: "SimTransport<S,0>".into() });
}

const STARTTLS: &[u8] = b"STARTTLS\r\n";
const GO_AHEAD: &[u8] = b"220 go ahead\r\n";
const EHLO: &[u8] = b"EHLO secure\r\n";

/// Server half of an in-band upgrade: acknowledge, then negotiate.
#[derive(Default)]
struct UpgradeServer {
    received: Vec<Bytes>,
    lost: Option<DisconnectReason>,
}

impl Protocol for UpgradeServer {
    fn connection_established(&mut self, _transport: &mut SimTransport) {}

    fn data_received(&mut self, transport: &mut SimTransport, data: Bytes) {
        if data == STARTTLS {
            transport.write(GO_AHEAD);
            transport.start_tls(secret("upgrade")).expect("no handshake pending");
        }
        self.received.push(data);
    }

    fn connection_lost(&mut self, reason: DisconnectReason) {
        self.lost = Some(reason);
    }
}

/// Client half: ask for the upgrade, negotiate on acknowledgement and keep
/// talking as if the channel were already secured.
#[derive(Default)]
struct UpgradeClient {
    upgraded: bool,
}

impl Protocol for UpgradeClient {
    fn connection_established(&mut self, transport: &mut SimTransport) {
        transport.write(STARTTLS);
    }

    fn data_received(&mut self, transport: &mut SimTransport, data: Bytes) {
        if data == GO_AHEAD {
            transport.start_tls(secret("upgrade")).expect("no handshake pending");
            transport.write(EHLO);
            self.upgraded = true;
        }
    }

    fn connection_lost(&mut self, _reason: DisconnectReason) {}
}

#[test]
fn in_band_upgrade_flow() {
    let mut serials = SerialCounter::new();
    let server_io = SimTransport::server(&mut serials);
    let client_io = SimTransport::client(&mut serials);

    let pump = connect(
        UpgradeServer::default(),
        server_io,
        UpgradeClient::default(),
        client_io,
        LinkConfig::default(),
    )
    .expect("link settles");

    assert!(pump.client().upgraded);
    assert!(pump.client_transport().is_secured());
    assert!(pump.server_transport().is_secured());
    assert_eq!(
        pump.server().received,
        vec![Bytes::from_static(STARTTLS), Bytes::from_static(EHLO)]
    );
    assert_eq!(pump.server().lost, None);
}
