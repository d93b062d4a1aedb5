//! TCP Port
//!
//! Carries a channel over a serial-to-TCP bridge (ser2net, modem TCP mux).

use std::io::{self, Read};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::error::Result;

use super::{is_poll_timeout, ReadPort};

/// Receiving half of a TCP-bridged serial port
pub struct TcpPort {
    stream: TcpStream,

    /// Peer address for logging
    peer_addr: String,
}

impl TcpPort {
    /// Connect and split into a bounded reader and a writer
    ///
    /// The read half uses `poll` as its read timeout so the channel read loop
    /// can observe shutdown between reads.
    pub fn connect<A: ToSocketAddrs>(addr: A, poll: Duration) -> Result<(Self, TcpStream)> {
        let stream = TcpStream::connect(addr)?;
        Self::from_stream(stream, poll)
    }

    /// Split an already connected stream
    pub fn from_stream(stream: TcpStream, poll: Duration) -> Result<(Self, TcpStream)> {
        let peer_addr = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        // Command lines are tiny; don't let Nagle hold them back
        stream.set_nodelay(true)?;

        let read_stream = stream.try_clone()?;
        read_stream.set_read_timeout(Some(poll))?;

        tracing::debug!("Connected to {}", peer_addr);

        Ok((
            Self {
                stream: read_stream,
                peer_addr,
            },
            stream,
        ))
    }

    /// Get the peer address string
    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }
}

impl Read for TcpPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl ReadPort for TcpPort {
    /// Peek under the read timeout; an idle link costs one poll interval
    ///
    /// Both halves share one socket, so the blocking mode is never touched
    /// here: a concurrent write on the other half stays blocking.
    fn bytes_available(&mut self) -> io::Result<usize> {
        let mut scratch = [0u8; 1024];
        match self.stream.peek(&mut scratch) {
            Ok(n) => Ok(n),
            Err(ref e) if is_poll_timeout(e) => Ok(0),
            Err(e) => Err(e),
        }
    }
}
