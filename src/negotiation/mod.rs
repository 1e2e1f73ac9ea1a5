pub mod catalog;

#[cfg(test)]
mod test_negotiation;

use byteorder::{BigEndian, ByteOrder};
use rand::RngCore;
use snow::{Builder, HandshakeState};

use error::Error;
use packet::{MAX_PAYLOAD_SIZE, UINT16_SIZE};
use self::catalog::{Catalog, HandshakeConfig, Pattern};

// Curve25519 public keys are 32 bytes on the wire.
const DH_LEN: usize = 32;

/// How the responder chooses among the initiator's offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// The first offer matching the responder's own priority order.
    ByPriority,
    /// Uniformly at random among the offers the responder recognizes.
    Random,
    /// The k-th recognized offer; negotiation fails when out of range.
    Index(usize),
}

/// One entry of the initiator's offer list, aligned with its position on
/// the wire so the responder's index byte addresses it directly.
pub struct InitiatorSuite {
    pub config: HandshakeConfig,
    pub state: HandshakeState,
}

/// The responder's pick: the consumed first message's payload, the live
/// handshake, the chosen suite, the re-derived prologue, and the wire
/// index echoed back to the peer.
pub struct SelectedHandshake {
    pub payload: Vec<u8>,
    pub state: HandshakeState,
    pub config: HandshakeConfig,
    pub prologue: Vec<u8>,
    pub index: u8,
}

/// compose_initiator_handshake builds the initiator's first record: one
/// fresh Noise first message per suite the catalog allows, all bound to a
/// shared prologue describing the whole offer list. The states come back
/// in wire order.
pub fn compose_initiator_handshake(
    catalog: &Catalog,
    local_priv: &[u8],
    remote_pub: Option<&[u8]>,
    payload: &[u8],
    ephemeral: Option<&[u8]>,
) -> Result<(Vec<u8>, Vec<u8>, Vec<InitiatorSuite>), Error> {
    if let Some(rs) = remote_pub {
        if rs.len() != DH_LEN {
            return Err(Error::Negotiation(
                "only 32 byte curve25519 public keys are supported",
            ));
        }
    }

    let mut used_patterns = vec![Pattern::XX];
    let mut prologue = Vec::with_capacity(1024);
    prologue.push(catalog.offer_count(Pattern::XX) as u8);
    prologue.extend_from_slice(catalog.prologue_fragment(Pattern::XX));

    // IK joins the offer only when the responder's static key is known
    if remote_pub.is_some() {
        let total = catalog.offer_count(Pattern::XX) + catalog.offer_count(Pattern::IK);
        if total > 255 {
            return Err(Error::Negotiation(
                "too many sub-messages for a single message",
            ));
        }
        used_patterns.push(Pattern::IK);
        prologue.extend_from_slice(catalog.prologue_fragment(Pattern::IK));
        prologue[0] = total as u8;
    }

    let mut res: Vec<u8> = Vec::with_capacity(2048);
    let mut states = Vec::with_capacity(prologue[0] as usize);

    for &pattern in &used_patterns {
        for config in catalog.suites(pattern) {
            // the suite's name, then its first message behind a 16-bit
            // length
            res.push(config.name_length);
            res.extend_from_slice(config.name.as_bytes());

            let mut builder = Builder::new(config.params.clone())
                .local_private_key(local_priv)
                .prologue(&prologue);
            if config.use_remote_static {
                if let Some(rs) = remote_pub {
                    builder = builder.remote_public_key(rs);
                }
            }
            if let Some(e) = ephemeral {
                builder = builder.fixed_ephemeral_key_for_testing_only(e);
            }
            let mut state = builder.build_initiator().map_err(Error::Noise)?;

            let message_payload: &[u8] = if config.pattern.first_message_carries_static() {
                payload
            } else {
                &[]
            };
            let mut message = vec![0u8; payload.len() + 128];
            let n = state
                .write_message(message_payload, &mut message)
                .map_err(Error::Noise)?;

            if res.len() + UINT16_SIZE + n > MAX_PAYLOAD_SIZE - UINT16_SIZE {
                return Err(Error::Negotiation("message is too big"));
            }
            let mut length = [0u8; UINT16_SIZE];
            BigEndian::write_u16(&mut length, n as u16);
            res.extend_from_slice(&length);
            res.extend_from_slice(&message[..n]);

            states.push(InitiatorSuite {
                config: config.clone(),
                state: state,
            });
        }
    }

    Ok((res, prologue, states))
}

struct Offer<'a> {
    config: &'a HandshakeConfig,
    body: &'a [u8],
    wire_index: u8,
}

/// parse_handshake walks the initiator's offer list, re-deriving the
/// prologue as it goes, selects one suite per the strategy, and consumes
/// the chosen first message. Offers with unknown names stay in the
/// prologue (both sides must hash the same bytes) but cannot be selected.
/// The index reported back is the offer's position on the wire.
pub fn parse_handshake(
    catalog: &Catalog,
    local_priv: &[u8],
    handshake: &[u8],
    strategy: Strategy,
    ephemeral: Option<&[u8]>,
    rng: &mut dyn RngCore,
) -> Result<SelectedHandshake, Error> {
    let mut prologue: Vec<u8> = Vec::with_capacity(1024);
    prologue.push(0);
    let mut offers: Vec<Offer> = Vec::with_capacity(16);

    let mut rest = handshake;
    while !rest.is_empty() {
        if prologue[0] == 255 {
            return Err(Error::Negotiation("too many messages"));
        }

        let (after_name, name) = read_chunk(rest, LenSize::One)?;
        prologue.push(name.len() as u8);
        prologue.extend_from_slice(name);
        let (after_body, body) = read_chunk(after_name, LenSize::Two)?;
        rest = after_body;

        if let Some(config) = catalog.lookup(name) {
            offers.push(Offer {
                config: config,
                body: body,
                wire_index: prologue[0],
            });
        }
        prologue[0] += 1;
    }

    let chosen: &Offer = match strategy {
        Strategy::ByPriority => {
            let mut found = None;
            'search: for &pattern in catalog.pattern_priority() {
                for key in catalog.suite_keys(pattern) {
                    if let Some(offer) = offers.iter().find(|o| o.config.name_key == *key) {
                        found = Some(offer);
                        break 'search;
                    }
                }
            }
            match found {
                Some(offer) => offer,
                None => return Err(Error::Negotiation("no supported protocols found")),
            }
        }
        Strategy::Random => {
            if offers.is_empty() {
                return Err(Error::Negotiation("no supported protocols found"));
            }
            let mut byte = [0u8; 1];
            rng.fill_bytes(&mut byte);
            &offers[byte[0] as usize % offers.len()]
        }
        Strategy::Index(k) => {
            if k >= offers.len() {
                return Err(Error::Negotiation("message index out of bounds"));
            }
            &offers[k]
        }
    };

    let mut builder = Builder::new(chosen.config.params.clone())
        .local_private_key(local_priv)
        .prologue(&prologue);
    if let Some(e) = ephemeral {
        builder = builder.fixed_ephemeral_key_for_testing_only(e);
    }
    let mut state = builder.build_responder().map_err(Error::Noise)?;

    let mut payload = vec![0u8; chosen.body.len()];
    let n = state
        .read_message(chosen.body, &mut payload)
        .map_err(Error::Noise)?;
    payload.truncate(n);

    debug!("negotiated {} (offer {})", chosen.config.name, chosen.wire_index);

    Ok(SelectedHandshake {
        payload: payload,
        state: state,
        config: chosen.config.clone(),
        prologue: prologue,
        index: chosen.wire_index,
    })
}

enum LenSize {
    One,
    Two,
}

// The offer list carries 1-byte lengths for names and 2-byte lengths for
// handshake bodies.
fn read_chunk(data: &[u8], size: LenSize) -> Result<(&[u8], &[u8]), Error> {
    let header = match size {
        LenSize::One => 1,
        LenSize::Two => UINT16_SIZE,
    };
    if data.len() < header {
        return Err(Error::Wire("buffer too small"));
    }
    let msg_len = match size {
        LenSize::One => data[0] as usize,
        LenSize::Two => BigEndian::read_u16(data) as usize,
    };
    if msg_len == 0 {
        return Err(Error::Wire("zero length messages are not supported"));
    }
    if data.len() < msg_len + header {
        return Err(Error::Wire("invalid length"));
    }
    Ok((&data[msg_len + header..], &data[header..msg_len + header]))
}
