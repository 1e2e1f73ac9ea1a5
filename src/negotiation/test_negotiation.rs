use rand::rngs::OsRng;
use rand::{self, RngCore};

use error::Error;
use negotiation::catalog::{standard_catalog, Catalog, Pattern};
use negotiation::{compose_initiator_handshake, parse_handshake, Strategy};
use packet::{Packet, UINT16_SIZE};
use field::MESSAGE_TYPE_CUSTOM_CERT;
use tcp_communication::generate_keypair;

// an rng whose every byte is fixed, for pinning the random strategy
struct FixedRng(u8);

impl RngCore for FixedRng {
    fn next_u32(&mut self) -> u32 {
        self.0 as u32
    }

    fn next_u64(&mut self) -> u64 {
        self.0 as u64
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for byte in dest {
            *byte = self.0;
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

fn cert_payload() -> Vec<u8> {
    let mut block = Packet::new();
    block.add_field(br#"{owner:"alice@client.com"}"#, MESSAGE_TYPE_CUSTOM_CERT);
    block.data
}

#[test]
fn prologues_agree_for_xx_only() {
    let keys = generate_keypair().unwrap();
    let server = generate_keypair().unwrap();
    let catalog = standard_catalog();

    let (wire, prologue, states) =
        compose_initiator_handshake(&catalog, &keys.private, None, &[], None).unwrap();
    assert_eq!(states.len(), 4);
    assert_eq!(prologue[0], 4);

    let selected = parse_handshake(
        &catalog,
        &server.private,
        &wire,
        Strategy::ByPriority,
        None,
        &mut OsRng,
    )
    .unwrap();
    assert_eq!(selected.prologue, prologue);
}

#[test]
fn prologues_agree_with_ik_offers() {
    let keys = generate_keypair().unwrap();
    let server = generate_keypair().unwrap();
    let catalog = standard_catalog();

    let (wire, prologue, states) = compose_initiator_handshake(
        &catalog,
        &keys.private,
        Some(&server.public),
        &cert_payload(),
        None,
    )
    .unwrap();
    assert_eq!(states.len(), 8);
    assert_eq!(prologue[0], 8);
    // XX offers first on the wire, IK behind them
    assert!(states[0].config.name.starts_with("Noise_XX_"));
    assert!(states[4].config.name.starts_with("Noise_IK_"));

    let selected = parse_handshake(
        &catalog,
        &server.private,
        &wire,
        Strategy::ByPriority,
        None,
        &mut OsRng,
    )
    .unwrap();
    assert_eq!(selected.prologue, prologue);
}

#[test]
fn priority_prefers_the_accelerated_pattern() {
    let keys = generate_keypair().unwrap();
    let server = generate_keypair().unwrap();
    let catalog = standard_catalog();

    let (wire, _, states) = compose_initiator_handshake(
        &catalog,
        &keys.private,
        Some(&server.public),
        &cert_payload(),
        None,
    )
    .unwrap();

    let selected = parse_handshake(
        &catalog,
        &server.private,
        &wire,
        Strategy::ByPriority,
        None,
        &mut OsRng,
    )
    .unwrap();
    assert_eq!(selected.config.pattern, Pattern::IK);
    // the index addresses the initiator's state list directly
    assert_eq!(
        states[selected.index as usize].config.name,
        selected.config.name
    );
    // the payload rode the IK first message
    assert!(!selected.payload.is_empty());
}

#[test]
fn random_selection_follows_the_rng() {
    let keys = generate_keypair().unwrap();
    let server = generate_keypair().unwrap();
    let catalog = standard_catalog();

    let (wire, _, states) =
        compose_initiator_handshake(&catalog, &keys.private, None, &[], None).unwrap();
    let offers = states.len() as u8;

    for &byte in &[0u8, 1, 2, 3, 5, 200] {
        let selected = parse_handshake(
            &catalog,
            &server.private,
            &wire,
            Strategy::Random,
            None,
            &mut FixedRng(byte),
        )
        .unwrap();
        assert_eq!(selected.index, byte % offers);
    }
}

#[test]
fn fixed_selection_and_bounds() {
    let keys = generate_keypair().unwrap();
    let server = generate_keypair().unwrap();
    let catalog = standard_catalog();

    let (wire, _, _) =
        compose_initiator_handshake(&catalog, &keys.private, None, &[], None).unwrap();

    let selected = parse_handshake(
        &catalog,
        &server.private,
        &wire,
        Strategy::Index(2),
        None,
        &mut OsRng,
    )
    .unwrap();
    assert_eq!(selected.index, 2);

    match parse_handshake(
        &catalog,
        &server.private,
        &wire,
        Strategy::Index(99),
        None,
        &mut OsRng,
    ) {
        Err(Error::Negotiation(msg)) => assert_eq!(msg, "message index out of bounds"),
        other => panic!("unexpected: {:?}", other.map(|_| ())),
    }
}

#[test]
fn downgrade_is_rejected() {
    let keys = generate_keypair().unwrap();
    let server = generate_keypair().unwrap();
    let client_catalog = Catalog::with_suites(&["Noise_XX_25519_AESGCM_SHA256"]).unwrap();
    let server_catalog = Catalog::with_suites(&["Noise_XX_25519_ChaChaPoly_SHA256"]).unwrap();

    let (wire, _, _) =
        compose_initiator_handshake(&client_catalog, &keys.private, None, &[], None).unwrap();

    match parse_handshake(
        &server_catalog,
        &server.private,
        &wire,
        Strategy::ByPriority,
        None,
        &mut OsRng,
    ) {
        Err(Error::Negotiation(msg)) => assert_eq!(msg, "no supported protocols found"),
        other => panic!("unexpected: {:?}", other.map(|_| ())),
    }
}

#[test]
fn unknown_offers_stay_in_the_prologue() {
    let keys = generate_keypair().unwrap();
    let server = generate_keypair().unwrap();
    let client_catalog = Catalog::with_suites(&[
        "Noise_XX_25519_AESGCM_SHA256",
        "Noise_XX_25519_ChaChaPoly_SHA256",
    ])
    .unwrap();
    // the responder only knows the second offer
    let server_catalog = Catalog::with_suites(&["Noise_XX_25519_ChaChaPoly_SHA256"]).unwrap();

    let (wire, prologue, _) =
        compose_initiator_handshake(&client_catalog, &keys.private, None, &[], None).unwrap();

    let selected = parse_handshake(
        &server_catalog,
        &server.private,
        &wire,
        Strategy::ByPriority,
        None,
        &mut OsRng,
    )
    .unwrap();
    // the index still counts the unknown offer ahead of it
    assert_eq!(selected.index, 1);
    assert_eq!(selected.prologue, prologue);
}

#[test]
fn oversized_offer_lists_are_rejected() {
    let server = generate_keypair().unwrap();
    let mut wire = Vec::new();
    for _ in 0..256 {
        wire.push(1); // name length
        wire.push(b'x'); // an unknown name
        wire.extend_from_slice(&[0, 1, 0]); // one byte of body
    }

    match parse_handshake(
        &standard_catalog(),
        &server.private,
        &wire,
        Strategy::ByPriority,
        None,
        &mut OsRng,
    ) {
        Err(Error::Negotiation(msg)) => assert_eq!(msg, "too many messages"),
        other => panic!("unexpected: {:?}", other.map(|_| ())),
    }
}

#[test]
fn malformed_offers_are_rejected() {
    let server = generate_keypair().unwrap();
    let catalog = standard_catalog();

    // a zero-length name
    let wire = [0u8, 0, 1, 0];
    match parse_handshake(&catalog, &server.private, &wire, Strategy::ByPriority, None, &mut OsRng) {
        Err(Error::Wire(msg)) => assert_eq!(msg, "zero length messages are not supported"),
        other => panic!("unexpected: {:?}", other.map(|_| ())),
    }

    // a name length pointing past the end
    let wire = [200u8, b'a'];
    match parse_handshake(&catalog, &server.private, &wire, Strategy::ByPriority, None, &mut OsRng) {
        Err(Error::Wire(msg)) => assert_eq!(msg, "invalid length"),
        other => panic!("unexpected: {:?}", other.map(|_| ())),
    }
}

#[test]
fn ik_requires_a_curve25519_key() {
    let keys = generate_keypair().unwrap();
    match compose_initiator_handshake(
        &standard_catalog(),
        &keys.private,
        Some(&[0u8; 16]),
        &[],
        None,
    ) {
        Err(Error::Negotiation(msg)) => {
            assert_eq!(msg, "only 32 byte curve25519 public keys are supported")
        }
        other => panic!("unexpected: {:?}", other.map(|_| ())),
    }
}

#[test]
fn catalog_rejects_foreign_patterns() {
    match Catalog::with_suites(&["Noise_NN_25519_AESGCM_SHA256"]) {
        Err(Error::Negotiation(msg)) => assert_eq!(msg, "only XX and IK patterns are supported"),
        other => panic!("unexpected: {:?}", other.map(|_| ())),
    }

    match Catalog::with_suites(&["not a noise name"]) {
        Err(Error::Negotiation(msg)) => assert_eq!(msg, "unsupported protocol name"),
        other => panic!("unexpected: {:?}", other.map(|_| ())),
    }

    match Catalog::with_suites(&[
        "Noise_XX_25519_AESGCM_SHA256",
        "Noise_XX_25519_AESGCM_SHA256",
    ]) {
        Err(Error::Negotiation(msg)) => assert_eq!(msg, "duplicate protocol name"),
        other => panic!("unexpected: {:?}", other.map(|_| ())),
    }
}

#[test]
fn offers_fit_one_record() {
    let keys = generate_keypair().unwrap();
    let server = generate_keypair().unwrap();

    let (wire, _, _) = compose_initiator_handshake(
        &standard_catalog(),
        &keys.private,
        Some(&server.public),
        &cert_payload(),
        None,
    )
    .unwrap();
    assert!(wire.len() <= 65535 - UINT16_SIZE);
}
