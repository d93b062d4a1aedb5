//! Loopback Port
//!
//! In-memory duplex transport that stands in for a modem. The host side
//! gets a [`LoopbackReader`] and [`LoopbackWriter`]; the device side is
//! driven through a [`LoopbackHandle`].

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::ReadPort;

/// Shared loopback state
#[derive(Default)]
struct State {
    /// Device -> host bytes not yet read
    inbound: VecDeque<u8>,

    /// Host -> device bytes, in write order
    outbound: Vec<u8>,

    /// Position in `outbound` after the last matched `wait_for_written`
    match_cursor: usize,

    /// Largest chunk a single host read returns (0 = unlimited)
    max_chunk: usize,

    closed: bool,
}

struct Shared {
    state: Mutex<State>,
    inbound_ready: Condvar,
    outbound_ready: Condvar,
}

/// Constructor for a connected loopback triple
pub struct LoopbackPort;

impl LoopbackPort {
    /// Create a loopback whose host reads give up after `poll`
    pub fn new(poll: Duration) -> (LoopbackReader, LoopbackWriter, LoopbackHandle) {
        let shared = Arc::new(Shared {
            state: Mutex::new(State::default()),
            inbound_ready: Condvar::new(),
            outbound_ready: Condvar::new(),
        });

        (
            LoopbackReader {
                shared: Arc::clone(&shared),
                poll,
            },
            LoopbackWriter {
                shared: Arc::clone(&shared),
            },
            LoopbackHandle { shared },
        )
    }
}

/// Host-side receiving half
pub struct LoopbackReader {
    shared: Arc<Shared>,
    poll: Duration,
}

impl Read for LoopbackReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.shared.state.lock();

        if state.inbound.is_empty() && !state.closed {
            self.shared.inbound_ready.wait_for(&mut state, self.poll);
        }

        if state.inbound.is_empty() {
            if state.closed {
                return Ok(0);
            }
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data within poll interval"));
        }

        let mut limit = buf.len().min(state.inbound.len());
        if state.max_chunk > 0 {
            limit = limit.min(state.max_chunk);
        }
        for (slot, byte) in buf.iter_mut().zip(state.inbound.drain(..limit)) {
            *slot = byte;
        }
        Ok(limit)
    }
}

impl ReadPort for LoopbackReader {
    fn bytes_available(&mut self) -> io::Result<usize> {
        Ok(self.shared.state.lock().inbound.len())
    }
}

/// Host-side sending half
pub struct LoopbackWriter {
    shared: Arc<Shared>,
}

impl Write for LoopbackWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.shared.state.lock();
        if state.closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "loopback closed"));
        }
        state.outbound.extend_from_slice(buf);
        self.shared.outbound_ready.notify_all();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Device-side control of a loopback
#[derive(Clone)]
pub struct LoopbackHandle {
    shared: Arc<Shared>,
}

impl LoopbackHandle {
    /// Queue bytes for the host to read
    pub fn feed(&self, bytes: &[u8]) {
        let mut state = self.shared.state.lock();
        state.inbound.extend(bytes.iter().copied());
        self.shared.inbound_ready.notify_all();
    }

    /// Queue `line` followed by CRLF
    pub fn feed_line(&self, line: &str) {
        let mut bytes = Vec::with_capacity(line.len() + 2);
        bytes.extend_from_slice(line.as_bytes());
        bytes.extend_from_slice(b"\r\n");
        self.feed(&bytes);
    }

    /// Limit how many bytes a single host read may return (0 = unlimited)
    pub fn set_max_chunk(&self, max_chunk: usize) {
        self.shared.state.lock().max_chunk = max_chunk;
    }

    /// Everything the host has written so far
    pub fn written(&self) -> Vec<u8> {
        self.shared.state.lock().outbound.clone()
    }

    /// Bytes queued for the host but not yet read
    pub fn unread(&self) -> usize {
        self.shared.state.lock().inbound.len()
    }

    /// Wait until the host writes `needle` after the previous match
    pub fn wait_for_written(&self, needle: &[u8], timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.shared.state.lock();

        loop {
            let start = state.match_cursor;
            if let Some(pos) = find(&state.outbound[start..], needle) {
                state.match_cursor = start + pos + needle.len();
                return true;
            }
            match deadline {
                Some(deadline) if Instant::now() >= deadline => return false,
                Some(deadline) => {
                    self.shared.outbound_ready.wait_until(&mut state, deadline);
                }
                None => self.shared.outbound_ready.wait(&mut state),
            }
        }
    }

    /// Close the stream: pending host reads see end-of-stream
    pub fn close(&self) {
        let mut state = self.shared.state.lock();
        state.closed = true;
        self.shared.inbound_ready.notify_all();
        self.shared.outbound_ready.notify_all();
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}
