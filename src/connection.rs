use std::{cmp, fmt, io};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use byteorder::{BigEndian, ByteOrder};
use hex;
use rand::rngs::OsRng;
use snow::{HandshakeState, Keypair};

use cipher_state::CipherState;
use error::Error;
use field::{parse_message_fields, Field, FieldIter, MESSAGE_TYPE_DATA};
use half_conn::HalfConn;
use negotiation::catalog::{standard_catalog, Catalog};
use negotiation::{compose_initiator_handshake, parse_handshake, InitiatorSuite, Strategy};
use packet::{Packet, MAC_SIZE, MAX_PAYLOAD_SIZE, MSG_HEADER_SIZE, UINT16_SIZE};
use stream::ByteStream;

/// Inspects the peer's static key together with the decoded payload
/// fields of the handshake message that delivered it. Returning an error
/// aborts the handshake.
pub type VerifyCallback = Arc<dyn Fn(&[u8], &[Field]) -> Result<(), Error> + Send + Sync>;

/// Everything an endpoint needs to stand up connections: its static
/// keypair plus the knobs shared by both roles.
pub struct Config {
    pub local_static: Keypair,
    pub remote_public: Option<Vec<u8>>,
    pub payload: Vec<Field>,
    pub verify: Option<VerifyCallback>,
    pub strategy: Strategy,
    pub padding: u16,
    pub catalog: Arc<Catalog>,
}

impl Config {
    pub fn new(local_static: Keypair) -> Self {
        Config {
            local_static: local_static,
            remote_public: None,
            payload: Vec::new(),
            verify: None,
            strategy: Strategy::ByPriority,
            padding: 0,
            catalog: standard_catalog(),
        }
    }

    /// The responder's static key; enables the accelerated IK offers.
    pub fn remote_public(mut self, key: Vec<u8>) -> Self {
        self.remote_public = Some(key);
        self
    }

    /// A field to embed in the handshake payload (certificates,
    /// signatures, application extensions).
    pub fn payload_field(mut self, field: Field) -> Self {
        self.payload.push(field);
        self
    }

    pub fn verify(mut self, callback: VerifyCallback) -> Self {
        self.verify = Some(callback);
        self
    }

    /// How this endpoint picks a suite when it is the responder.
    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Pad encrypted records up to a multiple of this many bytes.
    pub fn padding(mut self, padding: u16) -> Self {
        self.padding = padding;
        self
    }

    pub fn catalog(mut self, catalog: Arc<Catalog>) -> Self {
        self.catalog = catalog;
        self
    }
}

impl Clone for Config {
    fn clone(&self) -> Self {
        Config {
            local_static: Keypair {
                private: self.local_static.private.clone(),
                public: self.local_static.public.clone(),
            },
            remote_public: self.remote_public.clone(),
            payload: self.payload.clone(),
            verify: self.verify.clone(),
            strategy: self.strategy,
            padding: self.padding,
            catalog: self.catalog.clone(),
        }
    }
}

struct Inbound {
    half: HalfConn,
    input: Option<Packet>,
    raw_input: Option<Packet>,
}

struct Outbound {
    half: HalfConn,
}

struct HandshakeFlags {
    complete: bool,
    err: Option<Error>,
    // a worker committed to running the handshake; everyone else waits on
    // the condvar instead of piling onto the inbound lock
    in_flight: bool,
    channel_binding: Option<Vec<u8>>,
    remote_static: Option<Vec<u8>>,
}

/// A secure framed connection over a reliable byte stream. The handshake
/// runs once, lazily, on the first read or write; afterwards application
/// bytes travel in length-prefixed AEAD records. One reader and one
/// writer may use the connection concurrently, and `close` may race both.
pub struct Conn<S> {
    stream: S,
    local_static: Keypair,
    peer_key: Option<Vec<u8>>,
    is_client: bool,
    padding: u16,
    payload: Vec<Field>,
    verify: Option<VerifyCallback>,
    strategy: Strategy,
    catalog: Arc<Catalog>,

    inbound: Mutex<Inbound>,
    outbound: Mutex<Outbound>,
    flags: Mutex<HandshakeFlags>,
    handshake_cond: Condvar,

    // low bit: close was called; remaining bits: writers in flight, times
    // two
    active_call: AtomicU32,
}

impl<S> fmt::Debug for Conn<S> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Conn {{ role: {}, local_static: {} }}",
            if self.is_client { "client" } else { "server" },
            hex::encode(&self.local_static.public),
        )
    }
}

impl<S: ByteStream> Conn<S> {
    /// Wraps a dialed stream into the initiator side of a connection.
    pub fn client(stream: S, config: Config) -> Conn<S> {
        Conn::new(stream, config, true)
    }

    /// Wraps an accepted stream into the responder side of a connection.
    pub fn server(stream: S, config: Config) -> Conn<S> {
        Conn::new(stream, config, false)
    }

    fn new(stream: S, config: Config, is_client: bool) -> Conn<S> {
        Conn {
            stream: stream,
            local_static: config.local_static,
            peer_key: config.remote_public,
            is_client: is_client,
            padding: config.padding,
            payload: config.payload,
            verify: config.verify,
            strategy: config.strategy,
            catalog: config.catalog,
            inbound: Mutex::new(Inbound {
                half: HalfConn::new(),
                input: None,
                raw_input: None,
            }),
            outbound: Mutex::new(Outbound {
                half: HalfConn::new(),
            }),
            flags: Mutex::new(HandshakeFlags {
                complete: false,
                err: None,
                in_flight: false,
                channel_binding: None,
                remote_static: None,
            }),
            handshake_cond: Condvar::new(),
            active_call: AtomicU32::new(0),
        }
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    /// Runs the role-appropriate handshake if it has not run yet. Most
    /// callers never invoke this: the first read or write does.
    pub fn handshake(&self) -> Result<(), Error> {
        // `complete` and the latched handshake error live under the flags
        // mutex. The handshake itself also needs the inbound lock, and
        // taking that while holding the flags mutex would deadlock against
        // a read blocked on the socket. So a worker first claims the run
        // under the flags mutex, drops it, locks inbound, then relocks.
        {
            let mut flags = self.flags.lock().unwrap();
            loop {
                if let Some(ref e) = flags.err {
                    return Err(e.clone());
                }
                if flags.complete {
                    return Ok(());
                }
                if !flags.in_flight {
                    break;
                }
                flags = self.handshake_cond.wait(flags).unwrap();
            }
            flags.in_flight = true;
        }

        let mut inbound = self.inbound.lock().unwrap();
        let mut flags = self.flags.lock().unwrap();

        let result: Result<(Vec<u8>, Option<Vec<u8>>), Error> = if self.is_client {
            self.run_client_handshake(&mut inbound)
        } else {
            self.run_server_handshake(&mut inbound)
        };

        flags.in_flight = false;
        self.handshake_cond.notify_all();
        match result {
            Ok((binding, remote_static)) => {
                flags.complete = true;
                flags.channel_binding = Some(binding);
                flags.remote_static = remote_static;
                Ok(())
            }
            Err(e) => {
                flags.err = Some(e.clone());
                Err(e)
            }
        }
    }

    /// Reads decrypted application bytes. A zero-length buffer still
    /// drives the handshake.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize, Error> {
        self.handshake()?;
        if buf.is_empty() {
            return Ok(0);
        }

        let mut inbound = self.inbound.lock().unwrap();
        if inbound.input.is_none() && inbound.half.error().is_none() {
            self.read_packet(&mut inbound)?;
        }
        if let Some(e) = inbound.half.error() {
            return Err(e);
        }

        let mut n = 0;
        if let Some(mut input) = inbound.input.take() {
            n = input.read_into(buf);
            if input.off >= input.len() {
                inbound.half.free_block(input);
            } else {
                inbound.input = Some(input);
            }
        }

        // if bytes of the next record already sit in the raw buffer,
        // decode them now so the next read does not block on the socket
        if n != 0 && inbound.input.is_none() {
            let buffered = inbound.raw_input.as_ref().map_or(0, |raw| raw.len());
            if buffered > 0 {
                // a failure here latches; the next call surfaces it
                let _ = self.read_packet(&mut inbound);
            }
        }

        Ok(n)
    }

    /// Encrypts and writes application bytes, splitting them across
    /// records as needed. Runs the handshake first if it has not run.
    pub fn write(&self, buf: &[u8]) -> Result<usize, Error> {
        // interlock with close: the low bit of active_call is the closed
        // flag, the remaining bits count writers
        loop {
            let x = self.active_call.load(Ordering::SeqCst);
            if x & 1 != 0 {
                return Err(Error::Closed);
            }
            if self
                .active_call
                .compare_exchange(x, x + 2, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                break;
            }
        }
        let res = self.write_inner(buf);
        self.active_call.fetch_sub(2, Ordering::SeqCst);
        res
    }

    fn write_inner(&self, buf: &[u8]) -> Result<usize, Error> {
        self.handshake()?;

        let mut outbound = self.outbound.lock().unwrap();
        if let Some(e) = outbound.half.error() {
            return Err(e);
        }
        match self.write_packet_locked(&mut outbound, buf) {
            Ok(n) => Ok(n),
            Err(e) => {
                if !e.is_temporary() {
                    outbound.half.set_error(&e);
                }
                Err(e)
            }
        }
    }

    /// Closes the underlying stream. Blocked reads and writes fail, and
    /// later writes return the closed error without touching the stream.
    pub fn close(&self) -> Result<(), Error> {
        loop {
            let x = self.active_call.load(Ordering::SeqCst);
            if x & 1 != 0 {
                return Err(Error::Closed);
            }
            if self
                .active_call
                .compare_exchange(x, x | 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                // writers still in flight fail on their next stream call;
                // the protocol has no shutdown message to send them after
                break;
            }
        }
        self.stream.close().map_err(Error::Io)
    }

    /// A fingerprint of the completed handshake, identical on both ends
    /// and usable for layered authentication.
    pub fn channel_binding(&self) -> Result<Vec<u8>, Error> {
        self.handshake()?;
        let flags = self.flags.lock().unwrap();
        Ok(flags.channel_binding.clone().unwrap_or_default())
    }

    /// The peer's authenticated static public key. Runs the handshake if
    /// it has not run yet.
    pub fn remote_static(&self) -> Result<Vec<u8>, Error> {
        self.handshake()?;
        let flags = self.flags.lock().unwrap();
        Ok(flags.remote_static.clone().unwrap_or_default())
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.stream.set_read_timeout(timeout)
    }

    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.stream.set_write_timeout(timeout)
    }

    /// Applies one deadline to both directions.
    pub fn set_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.stream.set_read_timeout(timeout)?;
        self.stream.set_write_timeout(timeout)
    }

    // reads one record into a fresh input block. The caller holds the
    // inbound lock and has consumed any previous input.
    fn read_packet(&self, inbound: &mut Inbound) -> Result<(), Error> {
        let mut block = match inbound.raw_input.take() {
            Some(b) => b,
            None => inbound.half.new_block(),
        };

        if let Err(e) = block.read_until(&self.stream, UINT16_SIZE) {
            inbound.raw_input = Some(block);
            if !e.is_temporary() {
                inbound.half.set_error(&e);
            }
            return Err(e);
        }
        let record_len = BigEndian::read_u16(&block.data) as usize;
        if let Err(e) = block.read_until(&self.stream, UINT16_SIZE + record_len) {
            inbound.raw_input = Some(block);
            if !e.is_temporary() {
                inbound.half.set_error(&e);
            }
            return Err(e);
        }

        let (record, rest) = inbound.half.split_block(block, UINT16_SIZE + record_len);
        inbound.raw_input = rest;

        let plain = match inbound.half.decrypt_if_needed(&record) {
            Ok(plain) => plain,
            Err(e) => {
                inbound.half.free_block(record);
                inbound.half.set_error(&e);
                return Err(e);
            }
        };
        inbound.half.free_block(record);

        let input = if inbound.half.has_cipher() {
            // transport records carry tagged fields; the first data field
            // becomes the application's input and the rest are dropped
            let mut input = inbound.half.new_block();
            let mut failure = None;
            for item in FieldIter::new(&plain.data) {
                match item {
                    Ok((kind, data)) => {
                        if kind == MESSAGE_TYPE_DATA {
                            input.resize(data.len());
                            input.data.copy_from_slice(data);
                            break;
                        }
                    }
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
            }
            inbound.half.free_block(plain);
            if let Some(e) = failure {
                inbound.half.free_block(input);
                inbound.half.set_error(&e);
                return Err(e);
            }
            input
        } else {
            plain
        };

        inbound.input = Some(input);
        Ok(())
    }

    // writes handshake records; the outbound lock is taken per record
    fn write_packet(&self, data: &[u8]) -> Result<usize, Error> {
        let mut outbound = self.outbound.lock().unwrap();
        self.write_packet_locked(&mut outbound, data)
    }

    fn write_packet_locked(&self, outbound: &mut Outbound, data: &[u8]) -> Result<usize, Error> {
        let mut written = 0;
        let mut rest = data;
        while !rest.is_empty() {
            let mut block = outbound.half.new_block();
            block.resize(UINT16_SIZE);

            let m;
            if outbound.half.has_cipher() {
                m = cmp::min(rest.len(), self.max_payload_for_write(&outbound.half));
                block.add_field(&rest[..m], MESSAGE_TYPE_DATA);
                let padding = outbound.half.padding();
                if padding > 0 {
                    block.add_padding(padding);
                }
            } else {
                // handshake messages are sized by the negotiator and fit a
                // single record
                m = rest.len();
                block.resize(UINT16_SIZE + m);
                block.data[UINT16_SIZE..].copy_from_slice(rest);
            }

            let res = outbound
                .half
                .encrypt_if_needed(&mut block)
                .and_then(|()| self.stream.send(&block.data).map_err(Error::Io));
            outbound.half.free_block(block);
            res?;

            written += m;
            rest = &rest[m..];
        }
        Ok(written)
    }

    // room left for application bytes in one record
    fn max_payload_for_write(&self, half: &HalfConn) -> usize {
        let mut res = MAX_PAYLOAD_SIZE - UINT16_SIZE - MAC_SIZE - MSG_HEADER_SIZE;
        if half.padding() > 0 {
            // a second header plus the worst-case fill
            res -= MSG_HEADER_SIZE + half.padding() as usize;
        }
        res
    }

    fn run_client_handshake(
        &self,
        inbound: &mut Inbound,
    ) -> Result<(Vec<u8>, Option<Vec<u8>>), Error> {
        let mut payload_block = Packet::new();
        for field in &self.payload {
            payload_block.add_field(&field.data, field.kind);
        }

        let (offer, _prologue, mut suites) = compose_initiator_handshake(
            &self.catalog,
            &self.local_static.private,
            self.peer_key.as_ref().map(|key| key.as_slice()),
            &payload_block.data,
            None,
        )?;
        debug!("offering {} suites", suites.len());
        self.write_packet(&offer)?;

        let response = self.read_handshake_record(inbound)?;
        if response.len() < MAC_SIZE {
            return Err(Error::Wire("message is too small"));
        }
        let index = response[0] as usize;
        if index >= suites.len() {
            return Err(Error::Negotiation("message index out of bounds"));
        }
        let InitiatorSuite {
            config: config,
            state: mut state,
        } = suites.remove(index);
        debug!("responder selected {} (offer {})", config.name, index);

        let mut offset = 1;
        if config.use_remote_static {
            // the second byte is reserved for XX fallback signaling
            if response[1] != 0 {
                return Err(Error::Negotiation("only pure IK is supported"));
            }
            offset = 2;
        }

        let mut payload = vec![0u8; response.len()];
        let n = state
            .read_message(&response[offset..], &mut payload)
            .map_err(Error::Noise)?;
        payload.truncate(n);

        let peer = state
            .get_remote_static()
            .map(|key| key.to_vec())
            .unwrap_or_default();
        self.process_payload(&peer, &payload)?;

        while !state.is_handshake_finished() {
            // the message that transmits our static key carries our
            // payload fields; a suite that took the remote static up
            // front already sent them in the offer
            let own_payload: &[u8] = if config.use_remote_static {
                &[]
            } else {
                &payload_block.data
            };
            let mut message = vec![0u8; payload_block.data.len() + 128];
            let n = state
                .write_message(own_payload, &mut message)
                .map_err(Error::Noise)?;
            self.write_packet(&message[..n])?;
            if state.is_handshake_finished() {
                break;
            }

            let next = self.read_handshake_record(inbound)?;
            let mut buf = vec![0u8; next.len()];
            state.read_message(&next, &mut buf).map_err(Error::Noise)?;
        }

        self.finish_handshake(inbound, state)
    }

    fn run_server_handshake(
        &self,
        inbound: &mut Inbound,
    ) -> Result<(Vec<u8>, Option<Vec<u8>>), Error> {
        let offer = self.read_handshake_record(inbound)?;

        let selected = parse_handshake(
            &self.catalog,
            &self.local_static.private,
            &offer,
            self.strategy,
            None,
            &mut OsRng,
        )?;
        let payload = selected.payload;
        let mut state = selected.state;
        let index = selected.index;
        let answering_ik = state.get_remote_static().is_some();

        {
            let peer = state
                .get_remote_static()
                .map(|key| key.to_vec())
                .unwrap_or_default();
            self.process_payload(&peer, &payload)?;
        }

        let mut payload_block = Packet::new();
        for field in &self.payload {
            payload_block.add_field(&field.data, field.kind);
        }

        // both XX and IK encrypt the responder's first payload, so the
        // certificate fields ride along immediately
        let mut response = Vec::with_capacity(payload_block.data.len() + 256);
        response.push(index);
        if answering_ik {
            // reserved for a future XX fallback signal
            response.push(0);
        }
        let mut message = vec![0u8; payload_block.data.len() + 128];
        let n = state
            .write_message(&payload_block.data, &mut message)
            .map_err(Error::Noise)?;
        response.extend_from_slice(&message[..n]);
        self.write_packet(&response)?;

        while !state.is_handshake_finished() {
            let next = self.read_handshake_record(inbound)?;
            let mut buf = vec![0u8; next.len()];
            let n = state.read_message(&next, &mut buf).map_err(Error::Noise)?;
            buf.truncate(n);
            let peer = state
                .get_remote_static()
                .map(|key| key.to_vec())
                .unwrap_or_default();
            self.process_payload(&peer, &buf)?;
            if state.is_handshake_finished() {
                break;
            }

            let n = state.write_message(&[], &mut message).map_err(Error::Noise)?;
            self.write_packet(&message[..n])?;
        }

        self.finish_handshake(inbound, state)
    }

    // one record during the handshake phase, body only
    fn read_handshake_record(&self, inbound: &mut Inbound) -> Result<Vec<u8>, Error> {
        self.read_packet(inbound)?;
        match inbound.input.take() {
            Some(block) => {
                let message = block.data[block.off..].to_vec();
                inbound.half.free_block(block);
                Ok(message)
            }
            None => Err(Error::Wire("message is too small")),
        }
    }

    // consumes the finished handshake and arms both directions
    fn finish_handshake(
        &self,
        inbound: &mut Inbound,
        state: HandshakeState,
    ) -> Result<(Vec<u8>, Option<Vec<u8>>), Error> {
        let binding = state.get_handshake_hash().to_vec();
        let remote_static = state.get_remote_static().map(|key| key.to_vec());
        let session = Arc::new(state.into_stateless_transport_mode().map_err(Error::Noise)?);

        inbound
            .half
            .install_cipher(CipherState::new(session.clone()), self.padding);
        let mut outbound = self.outbound.lock().unwrap();
        outbound
            .half
            .install_cipher(CipherState::new(session), self.padding);
        trace!("handshake complete");
        Ok((binding, remote_static))
    }

    fn process_payload(&self, peer_static: &[u8], payload: &[u8]) -> Result<(), Error> {
        if payload.is_empty() {
            return Ok(());
        }
        if let Some(ref verify) = self.verify {
            let fields = parse_message_fields(payload)?;
            verify(peer_static, &fields)?;
        }
        Ok(())
    }
}

impl<S: ByteStream> io::Read for Conn<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Conn::read(self, buf).map_err(io::Error::from)
    }
}

impl<'a, S: ByteStream> io::Read for &'a Conn<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Conn::read(*self, buf).map_err(io::Error::from)
    }
}

impl<S: ByteStream> io::Write for Conn<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Conn::write(self, buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a, S: ByteStream> io::Write for &'a Conn<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Conn::write(*self, buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
