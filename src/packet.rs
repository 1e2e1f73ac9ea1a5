use std::{cmp, io};

use byteorder::{BigEndian, ByteOrder};

use error::Error;
use field::MESSAGE_TYPE_PADDING;
use stream::ByteStream;

// UINT16_SIZE is the number of bytes used to prefix encode the length
// of a record payload.
pub const UINT16_SIZE: usize = 2;

// MSG_HEADER_SIZE is the size of the length and type prefix every
// sub-message inside a record carries.
pub const MSG_HEADER_SIZE: usize = 4;

// MAC_SIZE is the length in bytes of the tags generated by GCM and
// poly1305.
pub const MAC_SIZE: usize = 16;

// MAX_PAYLOAD_SIZE is the largest record payload the 16-bit length
// prefix can describe.
pub const MAX_PAYLOAD_SIZE: usize = 65535;

/// A `Packet` is a simple data buffer with a read cursor. Blocks are
/// recycled through the per-direction free lists, so the buffer keeps its
/// capacity across records.
pub struct Packet {
    pub data: Vec<u8>,
    pub off: usize,
}

impl Packet {
    pub fn new() -> Self {
        Packet {
            data: Vec::new(),
            off: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// resize sets the logical length to n bytes, growing if necessary.
    /// Fresh bytes are zeroed, recycled capacity included.
    pub fn resize(&mut self, n: usize) {
        if n > self.data.capacity() {
            self.reserve(n);
        }
        self.data.resize(n, 0);
    }

    /// reserve makes sure the packet holds a capacity of at least n bytes,
    /// doubling from a 1024 byte floor.
    pub fn reserve(&mut self, n: usize) {
        if self.data.capacity() >= n {
            return;
        }
        let mut m = self.data.capacity();
        if m == 0 {
            m = 1024;
        }
        while m < n {
            m *= 2;
        }
        let additional = m - self.data.len();
        self.data.reserve_exact(additional);
    }

    /// read_until reads from the stream into the tail of the buffer until
    /// it holds at least n bytes. The stream ending early is an
    /// unexpected EOF.
    pub fn read_until<S: ByteStream + ?Sized>(&mut self, stream: &S, n: usize) -> Result<(), Error> {
        if self.data.len() >= n {
            return Ok(());
        }

        self.reserve(n);
        while self.data.len() < n {
            let len = self.data.len();
            let cap = self.data.capacity();
            self.data.resize(cap, 0);
            match stream.recv(&mut self.data[len..]) {
                Ok(0) => {
                    self.data.truncate(len);
                    return Err(Error::Io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "unexpected end of stream",
                    )));
                }
                Ok(m) => self.data.truncate(len + m),
                Err(e) => {
                    self.data.truncate(len);
                    return Err(Error::Io(e));
                }
            }
        }
        Ok(())
    }

    /// read_into copies buffered bytes at the cursor into dst and advances
    /// the cursor.
    pub fn read_into(&mut self, dst: &mut [u8]) -> usize {
        let n = cmp::min(dst.len(), self.data.len() - self.off);
        dst[..n].copy_from_slice(&self.data[self.off..self.off + n]);
        self.off += n;
        n
    }

    /// add_field appends a (length, type, bytes) sub-message. Only this
    /// crate assembles records, so outgrowing the 16-bit limit is a bug.
    pub fn add_field(&mut self, data: &[u8], kind: u16) {
        self.reserve(self.data.len() + data.len() + MSG_HEADER_SIZE);
        let mut header = [0; MSG_HEADER_SIZE];
        BigEndian::write_u16(&mut header[..UINT16_SIZE], (data.len() + UINT16_SIZE) as u16);
        BigEndian::write_u16(&mut header[UINT16_SIZE..], kind);
        self.data.extend_from_slice(&header);
        self.data.extend_from_slice(data);

        if self.data.len() > MAX_PAYLOAD_SIZE {
            panic!("packet is too big");
        }
    }

    /// add_padding appends a padding field sized so that the encrypted
    /// record's payload length comes out a multiple of the padding unit.
    /// A zero unit disables padding entirely.
    pub fn add_padding(&mut self, padding: u16) {
        if padding == 0 {
            return;
        }

        // what the payload will measure once the padding header and the
        // MAC are in, minus the record length prefix
        let payload_size = self.data.len() - UINT16_SIZE + MSG_HEADER_SIZE + MAC_SIZE;
        if payload_size > MAX_PAYLOAD_SIZE {
            panic!("no space left for padding");
        }

        let padding_size = padding as usize - payload_size % padding as usize;
        let before = self.data.len();
        self.resize(before + MSG_HEADER_SIZE + padding_size);
        BigEndian::write_u16(
            &mut self.data[before..],
            (padding_size + UINT16_SIZE) as u16,
        );
        BigEndian::write_u16(&mut self.data[before + UINT16_SIZE..], MESSAGE_TYPE_PADDING);
    }
}
