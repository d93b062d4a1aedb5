//! Response definitions
//!
//! The aggregated result of one command.

use super::{try_parse_error, ErrorCode, CLOSED_FINAL_LINE, TIMEOUT_FINAL_LINE};

/// How a command completed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// A final success line was received
    Ok,

    /// A final error line was received (or a required intermediate was missing)
    Error,

    /// No final line arrived before the command's deadline
    Timeout,

    /// The channel closed while the command was outstanding
    Closed,
}

/// Response to one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Completion status
    pub status: Status,

    /// Intermediate lines in arrival order
    pub lines: Vec<String>,

    /// The final line, or a sentinel for timeout/closed
    pub final_line: String,
}

impl Response {
    /// An empty response awaiting lines
    pub(crate) fn pending() -> Self {
        Self {
            status: Status::Error,
            lines: Vec::new(),
            final_line: String::new(),
        }
    }

    /// Create a TIMEOUT response keeping any lines already collected
    pub fn timeout(lines: Vec<String>) -> Self {
        Self {
            status: Status::Timeout,
            lines,
            final_line: TIMEOUT_FINAL_LINE.to_string(),
        }
    }

    /// Create a CLOSED response keeping any lines already collected
    pub fn closed(lines: Vec<String>) -> Self {
        Self {
            status: Status::Closed,
            lines,
            final_line: CLOSED_FINAL_LINE.to_string(),
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Ok
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// The first intermediate line (the result of single-line commands)
    pub fn first_line(&self) -> Option<&str> {
        self.lines.first().map(String::as_str)
    }

    pub fn final_line(&self) -> &str {
        &self.final_line
    }

    /// Structured `+CME ERROR` / `+CMS ERROR` code, if the final line has one
    pub fn error_code(&self) -> Option<ErrorCode> {
        match self.status {
            Status::Error => try_parse_error(&self.final_line),
            _ => None,
        }
    }

    /// Downgrade a success that lacks the intermediate line its mode requires
    pub(crate) fn require_intermediate(mut self) -> Self {
        if self.status == Status::Ok && self.lines.is_empty() {
            tracing::debug!(final_line = %self.final_line, "Success without intermediate line, downgrading");
            self.status = Status::Error;
        }
        self
    }
}
