use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder};
use sha2::{Digest, Sha256};
use snow::params::{DHChoice, HandshakePattern, NoiseParams};

use error::Error;

/// Handshake patterns this transport negotiates over. XX authenticates
/// both sides from nothing; IK saves a round trip when the initiator
/// already holds the responder's static key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pattern {
    XX,
    IK,
}

impl Pattern {
    /// Whether the pattern's first message already transmits the
    /// initiator's static key, and so can carry the handshake payload.
    pub fn first_message_carries_static(&self) -> bool {
        match self {
            &Pattern::XX => false,
            &Pattern::IK => true,
        }
    }

    /// Whether the initiator must know the responder's static key up
    /// front.
    pub fn requires_remote_static(&self) -> bool {
        match self {
            &Pattern::XX => false,
            &Pattern::IK => true,
        }
    }
}

/// One negotiable suite: a pattern plus concrete DH, cipher and hash
/// choices, addressed on the wire by its canonical protocol name.
#[derive(Clone)]
pub struct HandshakeConfig {
    pub name: &'static str,
    pub name_key: u64,
    pub name_length: u8,
    pub pattern: Pattern,
    pub params: NoiseParams,
    pub use_remote_static: bool,
}

impl fmt::Debug for HandshakeConfig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "HandshakeConfig {{ {} }}", self.name)
    }
}

/// hash_key maps a protocol name to its stable 64-bit catalog key.
pub fn hash_key(name: &[u8]) -> u64 {
    let digest = Sha256::digest(name);
    BigEndian::read_u64(&digest[..8])
}

/// The registry of suites an endpoint offers or accepts: the configs
/// themselves, the responder's preference orders, and the precomputed
/// per-pattern prologue fragments. Immutable once built, shared by `Arc`.
#[derive(Clone)]
pub struct Catalog {
    configs: HashMap<u64, HandshakeConfig>,
    pattern_priority: Vec<Pattern>,
    cipher_priority: HashMap<Pattern, Vec<u64>>,
    prologues: HashMap<Pattern, Vec<u8>>,
}

impl Catalog {
    /// Builds a catalog from canonical suite names such as
    /// `"Noise_XX_25519_AESGCM_SHA256"`. Name order within a pattern is
    /// the responder's preference order.
    pub fn with_suites(names: &[&'static str]) -> Result<Catalog, Error> {
        let mut configs = HashMap::new();
        let mut cipher_priority: HashMap<Pattern, Vec<u64>> = HashMap::new();

        for &name in names {
            let params: NoiseParams = match name.parse() {
                Ok(params) => params,
                Err(_) => return Err(Error::Negotiation("unsupported protocol name")),
            };
            let pattern = match params.handshake.pattern {
                HandshakePattern::XX => Pattern::XX,
                HandshakePattern::IK => Pattern::IK,
                _ => return Err(Error::Negotiation("only XX and IK patterns are supported")),
            };
            if params.dh != DHChoice::Curve25519 {
                return Err(Error::Negotiation("only curve25519 suites are supported"));
            }
            if name.len() > 255 {
                return Err(Error::Negotiation("protocol name is too long"));
            }

            let key = hash_key(name.as_bytes());
            let previous = configs.insert(
                key,
                HandshakeConfig {
                    name: name,
                    name_key: key,
                    name_length: name.len() as u8,
                    pattern: pattern,
                    params: params,
                    use_remote_static: pattern.requires_remote_static(),
                },
            );
            if previous.is_some() {
                return Err(Error::Negotiation("duplicate protocol name"));
            }
            cipher_priority
                .entry(pattern)
                .or_insert_with(Vec::new)
                .push(key);
        }

        let total: usize = cipher_priority.values().map(Vec::len).sum();
        if total > 255 {
            return Err(Error::Negotiation("too many sub-messages for a single message"));
        }

        let mut prologues = HashMap::new();
        for (&pattern, keys) in &cipher_priority {
            let mut fragment = Vec::new();
            for key in keys {
                let config = &configs[key];
                fragment.push(config.name_length);
                fragment.extend_from_slice(config.name.as_bytes());
            }
            prologues.insert(pattern, fragment);
        }

        Ok(Catalog {
            configs: configs,
            // the responder prefers the accelerated pattern when the
            // initiator managed to offer it
            pattern_priority: vec![Pattern::IK, Pattern::XX],
            cipher_priority: cipher_priority,
            prologues: prologues,
        })
    }

    pub fn lookup(&self, name: &[u8]) -> Option<&HandshakeConfig> {
        self.configs.get(&hash_key(name))
    }

    /// Suites of a pattern, most preferred first.
    pub fn suites(&self, pattern: Pattern) -> Vec<&HandshakeConfig> {
        match self.cipher_priority.get(&pattern) {
            Some(keys) => keys.iter().map(|key| &self.configs[key]).collect(),
            None => Vec::new(),
        }
    }

    pub fn suite_keys(&self, pattern: Pattern) -> &[u64] {
        self.cipher_priority
            .get(&pattern)
            .map_or(&[][..], Vec::as_slice)
    }

    pub fn offer_count(&self, pattern: Pattern) -> usize {
        self.cipher_priority.get(&pattern).map_or(0, Vec::len)
    }

    /// The pattern's contribution to the prologue: each suite's
    /// length-prefixed name, in preference order.
    pub fn prologue_fragment(&self, pattern: Pattern) -> &[u8] {
        self.prologues.get(&pattern).map_or(&[][..], Vec::as_slice)
    }

    pub fn pattern_priority(&self) -> &[Pattern] {
        &self.pattern_priority
    }
}

/// The suites every endpoint ships with. Within a pattern the order is
/// the responder's preference: AES-GCM ahead of ChaCha20-Poly1305,
/// SHA-256 ahead of BLAKE2b, Curve25519 throughout.
pub static STANDARD_SUITES: &'static [&'static str] = &[
    "Noise_XX_25519_AESGCM_SHA256",
    "Noise_XX_25519_AESGCM_BLAKE2b",
    "Noise_XX_25519_ChaChaPoly_SHA256",
    "Noise_XX_25519_ChaChaPoly_BLAKE2b",
    "Noise_IK_25519_AESGCM_SHA256",
    "Noise_IK_25519_AESGCM_BLAKE2b",
    "Noise_IK_25519_ChaChaPoly_SHA256",
    "Noise_IK_25519_ChaChaPoly_BLAKE2b",
];

lazy_static! {
    static ref STANDARD: Arc<Catalog> = Arc::new(
        Catalog::with_suites(STANDARD_SUITES).expect("the built-in catalog must be well formed")
    );
}

/// The process-wide catalog used when a connection does not override it.
pub fn standard_catalog() -> Arc<Catalog> {
    STANDARD.clone()
}
