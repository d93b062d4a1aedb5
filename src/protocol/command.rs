//! Command definitions
//!
//! Describes one AT command as issued by a driver.

use std::time::Duration;

use bytes::Bytes;

/// How intermediate lines are accepted while a command is outstanding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// No intermediate lines; everything before the final line is unsolicited
    NoResult,

    /// One intermediate line starting with a decimal digit
    Numeric,

    /// One intermediate line starting with the command's prefix
    SingleLine,

    /// Any number of intermediate lines starting with the command's prefix
    MultiLine,

    /// Any number of intermediate lines, unfiltered
    MultiLineNoPrefix,

    /// Commands with a device-specific terminator; classified as `NoResult`
    CustomEndOfLine,
}

impl Classification {
    /// Whether a successful response must carry at least one intermediate line
    pub fn requires_intermediate(&self) -> bool {
        matches!(self, Classification::Numeric | Classification::SingleLine)
    }
}

/// An AT command, immutable once issued
#[derive(Debug, Clone)]
pub struct Command {
    classification: Classification,
    text: String,
    prefix: Option<String>,
    payload: Option<Bytes>,
    timeout: Duration,
}

impl Command {
    /// Create a command with no prefix and no payload
    pub fn new(text: impl Into<String>, classification: Classification, timeout: Duration) -> Self {
        Self {
            classification,
            text: text.into(),
            prefix: None,
            payload: None,
            timeout,
        }
    }

    /// Expect intermediate lines to start with `prefix`
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Upload `payload` once the device sends its prompt
    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    pub fn classification(&self) -> Classification {
        self.classification
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    pub fn payload(&self) -> Option<&Bytes> {
        self.payload.as_ref()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}
