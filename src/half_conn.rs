use byteorder::{BigEndian, ByteOrder};

use cipher_state::CipherState;
use error::Error;
use packet::{Packet, MAC_SIZE, MAX_PAYLOAD_SIZE, UINT16_SIZE};

/// `HalfConn` is one direction of a connection: the cipher once the
/// handshake installed it, the latched error, the padding target, and the
/// block free list.
pub struct HalfConn {
    cipher: Option<CipherState>,
    err: Option<Error>,
    free: Vec<Packet>,
    padding: u16,
    scratch: Vec<u8>,
}

impl HalfConn {
    pub fn new() -> Self {
        HalfConn {
            cipher: None,
            err: None,
            free: Vec::new(),
            padding: 0,
            scratch: Vec::new(),
        }
    }

    pub fn has_cipher(&self) -> bool {
        self.cipher.is_some()
    }

    pub fn padding(&self) -> u16 {
        self.padding
    }

    /// install_cipher arms the direction after a completed handshake. The
    /// cipher is never cleared again.
    pub fn install_cipher(&mut self, cipher: CipherState, padding: u16) {
        self.cipher = Some(cipher);
        self.padding = padding;
    }

    pub fn error(&self) -> Option<Error> {
        self.err.clone()
    }

    /// set_error latches a fatal error; every later operation on this
    /// direction reports it.
    pub fn set_error(&mut self, err: &Error) {
        self.err = Some(err.clone());
    }

    /// encrypt_if_needed finalizes a record in place: AEAD plus length
    /// prefix once the cipher is installed, a plain length prefix during
    /// the handshake. Only this crate assembles records, so an oversized
    /// one aborts.
    pub fn encrypt_if_needed(&mut self, block: &mut Packet) -> Result<(), Error> {
        if let Some(ref mut cipher) = self.cipher {
            let payload_size = block.len() - UINT16_SIZE + MAC_SIZE;
            if payload_size > MAX_PAYLOAD_SIZE {
                panic!("data is too big to be sent");
            }

            self.scratch.resize(payload_size, 0);
            let n = cipher.encrypt(&block.data[UINT16_SIZE..], &mut self.scratch)?;
            block.resize(UINT16_SIZE + n);
            block.data[UINT16_SIZE..].copy_from_slice(&self.scratch[..n]);
            BigEndian::write_u16(&mut block.data[..UINT16_SIZE], payload_size as u16);
        } else {
            if block.len() > MAX_PAYLOAD_SIZE - UINT16_SIZE {
                panic!("data is too big to be sent");
            }
            let len = (block.len() - UINT16_SIZE) as u16;
            BigEndian::write_u16(&mut block.data[..UINT16_SIZE], len);
        }
        Ok(())
    }

    /// decrypt_if_needed validates a complete record and hands back a
    /// free-list block holding its payload in the clear. The caller has
    /// already matched the record length against the body; a mismatch
    /// here is a framing bug, not a peer failure.
    pub fn decrypt_if_needed(&mut self, block: &Packet) -> Result<Packet, Error> {
        if block.len() < UINT16_SIZE * 3 {
            return Err(Error::Wire("packet is too small"));
        }

        let record_len = BigEndian::read_u16(&block.data) as usize;
        if record_len != block.len() - UINT16_SIZE {
            panic!("invalid payload size");
        }

        let mut out = self.new_block();
        out.resize(block.len() - UINT16_SIZE);
        let res = {
            let payload = &block.data[UINT16_SIZE..];
            match self.cipher {
                Some(ref mut cipher) => cipher.decrypt(payload, &mut out.data),
                None => {
                    out.data.copy_from_slice(payload);
                    Ok(payload.len())
                }
            }
        };
        match res {
            Ok(n) => {
                out.resize(n);
                Ok(out)
            }
            Err(e) => {
                self.free_block(out);
                Err(e)
            }
        }
    }

    /// new_block grabs a packet from the free list, or allocates one.
    pub fn new_block(&mut self) -> Packet {
        match self.free.pop() {
            Some(mut b) => {
                b.data.clear();
                b.off = 0;
                b
            }
            None => Packet::new(),
        }
    }

    /// free_block returns a packet to the free list. Each direction keeps
    /// only a block or two alive at a time, so the list is never trimmed.
    pub fn free_block(&mut self, block: Packet) {
        self.free.push(block);
    }

    /// split_block cuts a block after the first n bytes, keeping the head
    /// in place and moving the remainder into a free-list block.
    pub fn split_block(&mut self, mut block: Packet, n: usize) -> (Packet, Option<Packet>) {
        if block.len() <= n {
            return (block, None);
        }
        let mut tail = self.new_block();
        tail.resize(block.len() - n);
        tail.data.copy_from_slice(&block.data[n..]);
        block.data.truncate(n);
        (block, Some(tail))
    }
}
