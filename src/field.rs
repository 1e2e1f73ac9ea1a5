use byteorder::{BigEndian, ByteOrder};

use error::Error;
use packet::{MSG_HEADER_SIZE, UINT16_SIZE};

pub const MESSAGE_TYPE_PADDING: u16 = 0;
pub const MESSAGE_TYPE_DATA: u16 = 1;
pub const MESSAGE_TYPE_MAX_PACKET_SIZE: u16 = 2;
pub const MESSAGE_TYPE_CUSTOM_CERT: u16 = 1024;
pub const MESSAGE_TYPE_SIGNATURE: u16 = 1025;

/// A tagged sub-message carried inside an encrypted record or a handshake
/// payload. Unknown kinds pass through parsing untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub kind: u16,
    pub data: Vec<u8>,
}

// Walks the raw fields of a payload without copying them out. The record
// read path uses this to pick the data field; `parse_message_fields` is
// the owned version handed to callers.
pub struct FieldIter<'a> {
    payload: &'a [u8],
    off: usize,
    failed: bool,
}

impl<'a> FieldIter<'a> {
    pub fn new(payload: &'a [u8]) -> Self {
        FieldIter {
            payload: payload,
            off: 0,
            failed: false,
        }
    }
}

impl<'a> Iterator for FieldIter<'a> {
    type Item = Result<(u16, &'a [u8]), Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.payload.len() - self.off < MSG_HEADER_SIZE {
            return None;
        }
        let msg_len = BigEndian::read_u16(&self.payload[self.off..]) as usize;
        // msg_len covers the two type bytes plus the data
        if msg_len < UINT16_SIZE || self.off + UINT16_SIZE + msg_len > self.payload.len() {
            self.failed = true;
            return Some(Err(Error::Wire("invalid size")));
        }
        let kind = BigEndian::read_u16(&self.payload[self.off + UINT16_SIZE..]);
        let data = &self.payload[self.off + MSG_HEADER_SIZE..self.off + UINT16_SIZE + msg_len];
        self.off += UINT16_SIZE + msg_len;
        Some(Ok((kind, data)))
    }
}

/// parse_message_fields decodes every sub-message of a payload. An empty
/// payload holds no fields; trailing bytes shorter than a field header are
/// ignored.
pub fn parse_message_fields(payload: &[u8]) -> Result<Vec<Field>, Error> {
    if payload.is_empty() {
        return Ok(Vec::new());
    }
    if payload.len() < MSG_HEADER_SIZE {
        return Err(Error::Wire("payload too small"));
    }

    let mut fields = Vec::with_capacity(1);
    for item in FieldIter::new(payload) {
        let (kind, data) = item?;
        fields.push(Field {
            kind: kind,
            data: data.to_vec(),
        });
    }
    Ok(fields)
}
