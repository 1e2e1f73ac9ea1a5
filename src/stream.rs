use std::io;
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

/// The reliable ordered byte stream a connection runs over. Every method
/// takes `&self` so that one reader, one writer and a close may touch the
/// stream at the same time, the way `TcpStream` allows through its
/// `&TcpStream` io impls.
pub trait ByteStream: Send + Sync {
    /// Blocking read; 0 means the peer ended the stream.
    fn recv(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Blocking write of the whole buffer.
    fn send(&self, buf: &[u8]) -> io::Result<()>;

    /// Tears the stream down; blocked recv and send calls fail.
    fn close(&self) -> io::Result<()>;

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;

    fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;
}

impl ByteStream for TcpStream {
    fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut stream = self;
        stream.read(buf)
    }

    fn send(&self, buf: &[u8]) -> io::Result<()> {
        let mut stream = self;
        stream.write_all(buf)
    }

    fn close(&self) -> io::Result<()> {
        self.shutdown(Shutdown::Both)
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }

    fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_write_timeout(self, timeout)
    }
}
