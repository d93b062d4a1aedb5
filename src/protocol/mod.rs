//! Protocol Module
//!
//! The AT command/response model and its wire vocabulary.
//!
//! ## Wire Format
//!
//! ```text
//! host  -> device   AT+CSQ\r
//! device -> host    +CSQ: 10,99\r\n      intermediate
//!                   OK\r\n               final
//!
//! host  -> device   AT+CMGS=25\r
//! device -> host    "> "                 prompt (no CRLF)
//! host  -> device   <payload> 0x1A
//! device -> host    +CMGS: 12\r\n
//!                   OK\r\n
//! ```
//!
//! ### Final Responses (prefix match)
//! - Success: `OK`, `CONNECT`
//! - Error: `ERROR`, `+CMS ERROR:`, `+CME ERROR:`, `NO CARRIER`, `NO ANSWER`, `NO DIALTONE`
//!
//! ### Two-Line Unsolicited Notifications (prefix match)
//! - `+CMT:`, `+CDS:`, `+CBM:` (header line followed by a payload line)

mod command;
mod response;
mod error_code;
mod classify;

pub use command::{Classification, Command};
pub use response::{Response, Status};
pub use error_code::{try_parse_error, ErrorCategory, ErrorCode};
pub use classify::{accepts_intermediate, final_kind, is_prompt, is_two_line_unsolicited, FinalKind};

/// Terminator appended to every command line
pub const COMMAND_TERMINATOR: u8 = b'\r';

/// Terminator of every response line
pub const LINE_TERMINATOR: &[u8] = b"\r\n";

/// Data-mode prompt sent by the device when it is ready for a payload
pub const PROMPT: &[u8] = b"> ";

/// Terminator appended after a payload upload (Ctrl-Z)
pub const PAYLOAD_TERMINATOR: u8 = 0x1A;

/// Final responses that complete a command successfully
pub const FINAL_SUCCESS: &[&str] = &["OK", "CONNECT"];

/// Final responses that complete a command with an error
pub const FINAL_ERROR: &[&str] = &[
    "ERROR",
    "+CMS ERROR:",
    "+CME ERROR:",
    "NO CARRIER",
    "NO ANSWER",
    "NO DIALTONE",
];

/// Notifications whose header line is followed by one payload line
pub const TWO_LINE_UNSOLICITED: &[&str] = &["+CMT:", "+CDS:", "+CBM:"];

/// Final line reported when a command got no final response in time
pub const TIMEOUT_FINAL_LINE: &str = "TIMEOUT";

/// Final line reported when the channel closed under a waiting command
pub const CLOSED_FINAL_LINE: &str = "CHANNEL CLOSED";
