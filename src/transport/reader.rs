//! Line Reader
//!
//! Splits an incoming byte stream into lines.
//!
//! ## Framing
//! - `\r\n` ends a line; the terminator is stripped
//! - `"> "` ends a prompt; the accumulated bytes are returned with the prompt
//!
//! Bytes are consumed one at a time from an internal buffer, so devices that
//! deliver a single byte per read and devices that deliver whole responses
//! per read produce identical lines.

use std::io::Read;
use std::time::Instant;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{AtError, Result};
use crate::protocol::{LINE_TERMINATOR, PROMPT};

use super::{is_poll_timeout, CancelToken, ReadPort};

/// Size of a single transport read
const READ_CHUNK_SIZE: usize = 256;

/// Upper bound on drain rounds in `clear` (a chatty device never goes quiet)
const MAX_CLEAR_ROUNDS: usize = 64;

/// Outcome of a single line read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A complete line (terminator stripped) or prompt (kept as-is)
    Line(Bytes),

    /// The poll interval elapsed; any partial line is kept for the next call
    Pending,

    /// The underlying stream was closed
    Eof,

    /// The cancellation token fired before a line completed
    Cancelled,
}

/// Reads CRLF-terminated lines and prompts from a [`ReadPort`]
pub struct LineReader<R: ReadPort = Box<dyn ReadPort>> {
    /// Underlying byte source
    port: R,

    /// Bytes read from the port but not yet framed
    pending: BytesMut,

    /// The line being accumulated
    line: BytesMut,
}

impl<R: ReadPort> LineReader<R> {
    /// Wrap a port
    pub fn new(port: R) -> Self {
        Self {
            port,
            pending: BytesMut::with_capacity(READ_CHUNK_SIZE),
            line: BytesMut::with_capacity(READ_CHUNK_SIZE),
        }
    }

    /// Read towards the next line until one completes or the port goes quiet
    ///
    /// Returns `Pending` when the port reports that nothing arrived within its
    /// poll interval, so a caller can re-check its own deadlines and release
    /// any lock it holds around the reader.
    pub fn poll_line(&mut self, cancel: &CancelToken) -> Result<ReadOutcome> {
        loop {
            if cancel.is_cancelled() {
                return Ok(ReadOutcome::Cancelled);
            }

            if self.pending.is_empty() {
                match self.fill() {
                    Ok(0) => {
                        if !self.line.is_empty() {
                            tracing::debug!(
                                "Stream closed with {} unterminated bytes",
                                self.line.len()
                            );
                            self.line.clear();
                        }
                        return Ok(ReadOutcome::Eof);
                    }
                    Ok(_) => {}
                    Err(ref e) if is_poll_timeout(e) => return Ok(ReadOutcome::Pending),
                    Err(e) => return Err(e.into()),
                }
            }

            if let Some(line) = self.frame_pending() {
                return Ok(ReadOutcome::Line(line));
            }
        }
    }

    /// Block until a line completes, the stream ends, or `cancel` fires
    pub fn read_line(&mut self, cancel: &CancelToken) -> Result<ReadOutcome> {
        loop {
            match self.poll_line(cancel)? {
                ReadOutcome::Pending => continue,
                outcome => return Ok(outcome),
            }
        }
    }

    /// Read exactly `count` bytes with no line framing
    ///
    /// Bytes of an unfinished line and already buffered bytes are served
    /// first. Fails with `Timeout` once `deadline` passes; `None` waits
    /// until the bytes arrive or the stream ends.
    pub fn read_exact_bytes(
        &mut self,
        count: usize,
        deadline: impl Into<Option<Instant>>,
    ) -> Result<Bytes> {
        let deadline = deadline.into();
        let mut out = BytesMut::with_capacity(count);

        let from_line = count.min(self.line.len());
        out.extend_from_slice(&self.line.split_to(from_line));

        while out.len() < count {
            if !self.pending.is_empty() {
                let take = (count - out.len()).min(self.pending.len());
                out.extend_from_slice(&self.pending.split_to(take));
                continue;
            }

            if deadline.map_or(false, |d| Instant::now() >= d) {
                return Err(AtError::Timeout);
            }

            match self.fill() {
                Ok(0) => return Err(AtError::ChannelClosed),
                Ok(_) => {}
                Err(ref e) if is_poll_timeout(e) => {}
                Err(e) => return Err(e.into()),
            }
        }

        Ok(out.freeze())
    }

    /// Bytes readable right now: buffered plus what the port reports
    pub fn available_count(&mut self) -> Result<usize> {
        Ok(self.pending.len() + self.port.bytes_available()?)
    }

    /// Best-effort discard of all buffered and immediately available input
    ///
    /// Returns the number of bytes dropped.
    pub fn clear(&mut self) -> Result<usize> {
        let mut dropped = self.pending.len() + self.line.len();
        self.pending.clear();
        self.line.clear();

        let mut scratch = [0u8; READ_CHUNK_SIZE];
        for _ in 0..MAX_CLEAR_ROUNDS {
            let available = self.port.bytes_available()?;
            if available == 0 {
                break;
            }
            let want = available.min(scratch.len());
            match self.port.read(&mut scratch[..want]) {
                Ok(0) => break,
                Ok(n) => dropped += n,
                Err(ref e) if is_poll_timeout(e) => break,
                Err(e) => return Err(e.into()),
            }
        }

        if dropped > 0 {
            tracing::debug!("Discarded {} stale bytes", dropped);
        }
        Ok(dropped)
    }

    /// Access the underlying port
    pub fn get_ref(&self) -> &R {
        &self.port
    }

    /// Read one chunk from the port into `pending`
    fn fill(&mut self) -> std::io::Result<usize> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        let n = self.port.read(&mut chunk)?;
        self.pending.put_slice(&chunk[..n]);
        Ok(n)
    }

    /// Move bytes from `pending` into `line` until a terminator completes it
    fn frame_pending(&mut self) -> Option<Bytes> {
        while self.pending.has_remaining() {
            self.line.put_u8(self.pending.get_u8());

            if self.line.ends_with(LINE_TERMINATOR) {
                let mut line = self.line.split();
                line.truncate(line.len() - LINE_TERMINATOR.len());
                return Some(line.freeze());
            }

            if self.line.ends_with(PROMPT) {
                return Some(self.line.split().freeze());
            }
        }
        None
    }
}
