use std::{error, fmt, io};

use snow;

/// Everything that can go wrong on a connection. Wire and negotiation
/// violations carry the fixed message the protocol defines for them.
#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    Noise(snow::Error),
    Wire(&'static str),
    Negotiation(&'static str),
    Verify(String),
    Closed,
}

impl error::Error for Error {
    fn cause(&self) -> Option<&dyn error::Error> {
        use self::Error::*;

        match self {
            &Io(ref e) => Some(e),
            &Noise(ref e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use self::Error::*;

        match self {
            &Io(ref e) => write!(f, "io error: {}", e),
            &Noise(ref e) => write!(f, "noise error: {}", e),
            &Wire(msg) => write!(f, "{}", msg),
            &Negotiation(msg) => write!(f, "{}", msg),
            &Verify(ref msg) => write!(f, "verification failed: {}", msg),
            &Closed => write!(f, "use of closed connection"),
        }
    }
}

// A latched error is handed back on every subsequent call on the failed
// direction, so the enum must be duplicable even though `io::Error` is not.
impl Clone for Error {
    fn clone(&self) -> Self {
        use self::Error::*;

        match self {
            &Io(ref e) => Io(io::Error::new(e.kind(), e.to_string())),
            &Noise(ref e) => Noise(clone_snow_error(e)),
            &Wire(msg) => Wire(msg),
            &Negotiation(msg) => Negotiation(msg),
            &Verify(ref msg) => Verify(msg.clone()),
            &Closed => Closed,
        }
    }
}

// `snow::Error` is `#[non_exhaustive]` and does not implement `Clone`, so we
// rebuild an equivalent value variant-by-variant (its sub-enums carry no
// data of their own, so this is a faithful copy, not a reinterpretation).
fn clone_snow_error(e: &snow::Error) -> snow::Error {
    use snow::error::{InitStage, PatternProblem, Prerequisite, StateProblem};
    use snow::Error::*;

    match e {
        Pattern(p) => Pattern(match p {
            PatternProblem::TooFewParameters => PatternProblem::TooFewParameters,
            PatternProblem::UnsupportedHandshakeType => PatternProblem::UnsupportedHandshakeType,
            PatternProblem::UnsupportedBaseType => PatternProblem::UnsupportedBaseType,
            PatternProblem::UnsupportedHashType => PatternProblem::UnsupportedHashType,
            PatternProblem::UnsupportedDhType => PatternProblem::UnsupportedDhType,
            PatternProblem::UnsupportedCipherType => PatternProblem::UnsupportedCipherType,
            PatternProblem::InvalidPsk => PatternProblem::InvalidPsk,
            PatternProblem::UnsupportedModifier => PatternProblem::UnsupportedModifier,
            #[cfg(feature = "hfs")]
            PatternProblem::UnsupportedKemType => PatternProblem::UnsupportedKemType,
        }),
        Init(s) => Init(match s {
            InitStage::ValidateKeyLengths => InitStage::ValidateKeyLengths,
            InitStage::ValidatePskLengths => InitStage::ValidatePskLengths,
            InitStage::ValidateCipherTypes => InitStage::ValidateCipherTypes,
            InitStage::GetRngImpl => InitStage::GetRngImpl,
            InitStage::GetDhImpl => InitStage::GetDhImpl,
            InitStage::GetCipherImpl => InitStage::GetCipherImpl,
            InitStage::GetHashImpl => InitStage::GetHashImpl,
            #[cfg(feature = "hfs")]
            InitStage::GetKemImpl => InitStage::GetKemImpl,
            InitStage::ValidatePskPosition => InitStage::ValidatePskPosition,
        }),
        Prereq(p) => Prereq(match p {
            Prerequisite::LocalPrivateKey => Prerequisite::LocalPrivateKey,
            Prerequisite::RemotePublicKey => Prerequisite::RemotePublicKey,
        }),
        State(s) => State(match s {
            StateProblem::MissingKeyMaterial => StateProblem::MissingKeyMaterial,
            StateProblem::MissingPsk => StateProblem::MissingPsk,
            StateProblem::NotTurnToWrite => StateProblem::NotTurnToWrite,
            StateProblem::NotTurnToRead => StateProblem::NotTurnToRead,
            StateProblem::HandshakeNotFinished => StateProblem::HandshakeNotFinished,
            StateProblem::HandshakeAlreadyFinished => StateProblem::HandshakeAlreadyFinished,
            StateProblem::OneWay => StateProblem::OneWay,
            StateProblem::StatelessTransportMode => StateProblem::StatelessTransportMode,
            StateProblem::Exhausted => StateProblem::Exhausted,
        }),
        Input => Input,
        Dh => Dh,
        Decrypt => Decrypt,
        #[cfg(feature = "hfs")]
        Kem => Kem,
        _ => Decrypt,
    }
}

impl Error {
    /// Transport errors that merely signal "try again" (timeouts and
    /// interrupted calls) must not poison the half-connection.
    pub fn is_temporary(&self) -> bool {
        match self {
            &Error::Io(ref e) => match e.kind() {
                io::ErrorKind::WouldBlock
                | io::ErrorKind::Interrupted
                | io::ErrorKind::TimedOut => true,
                _ => false,
            },
            _ => false,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<snow::Error> for Error {
    fn from(e: snow::Error) -> Self {
        Error::Noise(e)
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> io::Error {
        let kind = match e {
            Error::Io(e) => return e,
            Error::Noise(_) | Error::Wire(_) => io::ErrorKind::InvalidData,
            Error::Closed => io::ErrorKind::NotConnected,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, e.to_string())
    }
}
