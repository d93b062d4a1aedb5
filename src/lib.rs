//! # atchannel
//!
//! A half-duplex AT command/response engine for cellular and GNSS modems:
//! - Line framing with CRLF lines and `"> "` data prompts
//! - One command in flight, correlated with its intermediate and final lines
//! - Prompt-driven payload uploads (SMS PDUs, file data) terminated by Ctrl-Z
//! - Unsolicited notifications fanned out on a dedicated dispatcher thread
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Driver callers                            │
//! │        send / send_expect_* / send_with_payload              │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ one at a time (send_lock)
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                     AtChannel                                │
//! │      active slot  ◀── read loop thread ──▶ EventSink         │
//! └──────────┬───────────────────────────────────┬──────────────┘
//!            │                                   │
//!            ▼                                   ▼
//!   ┌─────────────────┐                 ┌─────────────────┐
//!   │   LineWriter    │                 │   LineReader    │
//!   │  (\r, 0x1A)     │                 │ (\r\n, "> ")    │
//!   └────────┬────────┘                 └────────┬────────┘
//!            └──────────────┬────────────────────┘
//!                           ▼
//!                  serial / TCP transport
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use atchannel::{AtChannel, ChannelConfig};
//!
//! let channel = AtChannel::connect_tcp("127.0.0.1:2000", ChannelConfig::default())?;
//! channel.start()?;
//!
//! let csq = channel.send_expect_single_line("AT+CSQ", "+CSQ:")?;
//! if let Some(line) = csq.first_line() {
//!     println!("signal: {}", line);
//! }
//! # Ok::<(), atchannel::AtError>(())
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod transport;
pub mod protocol;
pub mod events;
pub mod stats;
pub mod channel;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{AtError, Result};
pub use config::ChannelConfig;
pub use channel::{AtChannel, ChannelState};
pub use events::UnsolicitedEvent;
pub use protocol::{Classification, Command, ErrorCategory, ErrorCode, Response, Status};
pub use stats::ChannelStats;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of atchannel
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
