use std::fmt;
use std::sync::Arc;

use snow::StatelessTransportState;

use error::Error;

/// `CipherState` is one direction's share of the session a completed
/// handshake produced: the transport keys (held jointly with the opposite
/// direction) plus this direction's monotonically advancing nonce.
///
/// The engine session is nonce-explicit and takes `&self`, which is what
/// lets the inbound and outbound halves run concurrently without a lock
/// between them.
pub struct CipherState {
    session: Arc<StatelessTransportState>,
    nonce: u64,
}

impl fmt::Debug for CipherState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "CipherState {{ nonce: {} }}", self.nonce)
    }
}

impl CipherState {
    pub fn new(session: Arc<StatelessTransportState>) -> Self {
        CipherState {
            session: session,
            nonce: 0,
        }
    }

    /// encrypt seals `plain_text` into `cipher_text`, which must hold the
    /// plaintext plus the 16 byte MAC, and advances the nonce.
    pub fn encrypt(&mut self, plain_text: &[u8], cipher_text: &mut [u8]) -> Result<usize, Error> {
        let n = self
            .session
            .write_message(self.nonce, plain_text, cipher_text)
            .map_err(Error::Noise)?;
        self.nonce += 1;
        Ok(n)
    }

    /// decrypt opens `cipher_text` into `plain_text`. A failed MAC check
    /// leaves the nonce untouched and surfaces the engine's error.
    pub fn decrypt(&mut self, cipher_text: &[u8], plain_text: &mut [u8]) -> Result<usize, Error> {
        let n = self
            .session
            .read_message(self.nonce, cipher_text, plain_text)
            .map_err(Error::Noise)?;
        self.nonce += 1;
        Ok(n)
    }
}
