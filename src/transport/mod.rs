//! Transport Module
//!
//! Line framing on top of a byte-oriented serial transport.
//!
//! ## Responsibilities
//! - Turn a raw byte stream into CRLF-terminated lines and `"> "` prompts
//! - Frame outgoing commands (`\r`) and payloads (`0x1A`)
//! - Keep every blocking read bounded so shutdown is observed promptly
//!
//! Opening the physical port and configuring baud rate are the caller's job;
//! anything implementing [`ReadPort`] and [`std::io::Write`] can carry a channel.

mod reader;
mod writer;
mod tcp;
mod loopback;

pub use reader::{LineReader, ReadOutcome};
pub use writer::LineWriter;
pub use tcp::TcpPort;
pub use loopback::{LoopbackHandle, LoopbackPort, LoopbackReader, LoopbackWriter};

use std::io::{self, Cursor, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// The receiving half of a byte transport
///
/// Implementations must bound blocking reads: when no byte arrives within the
/// port's poll interval, `read` returns `WouldBlock` or `TimedOut` instead of
/// blocking forever.
pub trait ReadPort: Read + Send + 'static {
    /// Number of bytes that can be read right now
    ///
    /// May wait up to the port's poll interval, never longer.
    fn bytes_available(&mut self) -> io::Result<usize>;
}

impl<T> ReadPort for Cursor<T>
where
    T: AsRef<[u8]> + Send + 'static,
{
    fn bytes_available(&mut self) -> io::Result<usize> {
        let len = self.get_ref().as_ref().len() as u64;
        Ok(len.saturating_sub(self.position()) as usize)
    }
}

impl ReadPort for Box<dyn ReadPort> {
    fn bytes_available(&mut self) -> io::Result<usize> {
        (**self).bytes_available()
    }
}

/// Cooperative cancellation flag shared between a reader and its owner
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Clear the flag so the token can guard a new read loop
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Whether an I/O error only means "nothing arrived within the poll interval"
pub(crate) fn is_poll_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}
