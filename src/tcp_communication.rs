use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};

use snow::params::NoiseParams;
use snow::{Builder, Keypair};

use connection::{Config, Conn};
use error::Error;

/// generate_keypair produces a fresh Curve25519 static keypair with the
/// engine's generator.
pub fn generate_keypair() -> Result<Keypair, Error> {
    let params: NoiseParams = "Noise_XX_25519_AESGCM_SHA256"
        .parse()
        .map_err(Error::Noise)?;
    Builder::new(params).generate_keypair().map_err(Error::Noise)
}

/// A listener wrapping accepted TCP streams into responder connections.
/// Accepting performs no I/O beyond the TCP accept; the handshake runs on
/// each connection's first read or write.
pub struct Listener {
    inner: TcpListener,
    config: Config,
}

impl Listener {
    pub fn bind<A: ToSocketAddrs>(addr: A, config: Config) -> Result<Listener, Error> {
        let inner = TcpListener::bind(addr).map_err(Error::Io)?;
        Ok(Listener {
            inner: inner,
            config: config,
        })
    }

    pub fn accept(&self) -> Result<(Conn<TcpStream>, SocketAddr), Error> {
        let (stream, addr) = self.inner.accept().map_err(Error::Io)?;
        Ok((Conn::server(stream, self.config.clone()), addr))
    }

    /// An iterator over accepted connections, like
    /// `TcpListener::incoming`.
    pub fn incoming(&self) -> Incoming {
        Incoming { listener: self }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

pub struct Incoming<'a> {
    listener: &'a Listener,
}

impl<'a> Iterator for Incoming<'a> {
    type Item = Result<Conn<TcpStream>, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.listener.accept().map(|(conn, _addr)| conn))
    }
}

impl Conn<TcpStream> {
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.get_ref().local_addr()
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.get_ref().peer_addr()
    }
}

/// dial connects to the address and wraps the stream into an initiator
/// connection. No handshake happens here; the first read or write runs it.
pub fn dial<A: ToSocketAddrs>(addr: A, config: Config) -> Result<Conn<TcpStream>, Error> {
    let stream = TcpStream::connect(addr).map_err(Error::Io)?;
    Ok(Conn::client(stream, config))
}
