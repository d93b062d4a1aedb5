//! Line Writer
//!
//! Frames outgoing commands and payloads.

use std::io::{BufWriter, Write};

use crate::error::Result;
use crate::protocol::{COMMAND_TERMINATOR, PAYLOAD_TERMINATOR};

/// Writes commands, payloads and raw bytes to the transport
pub struct LineWriter<W: Write = Box<dyn Write + Send>> {
    /// Transport writer (buffered, flushed after every frame)
    writer: BufWriter<W>,
}

impl<W: Write> LineWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
        }
    }

    /// Write `text` followed by a single `\r`
    pub fn write_command(&mut self, text: &str) -> Result<()> {
        self.writer.write_all(text.as_bytes())?;
        self.writer.write_all(&[COMMAND_TERMINATOR])?;
        self.writer.flush()?;
        Ok(())
    }

    /// Write a raw payload followed by the `0x1A` terminator
    pub fn write_payload_and_terminator(&mut self, payload: &[u8]) -> Result<()> {
        self.writer.write_all(payload)?;
        self.writer.write_all(&[PAYLOAD_TERMINATOR])?;
        self.writer.flush()?;
        Ok(())
    }

    /// Write bytes verbatim with no framing
    pub fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_all(bytes)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Access the underlying writer
    pub fn get_ref(&self) -> &W {
        self.writer.get_ref()
    }
}
