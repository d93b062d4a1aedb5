//! Channel counters
//!
//! Lock-free counters updated by callers, the read loop and the dispatcher.

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of a channel's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub commands_sent: u64,
    pub commands_succeeded: u64,
    pub commands_failed: u64,
    pub commands_timed_out: u64,
    pub unsolicited_dispatched: u64,
    pub unsolicited_dropped: u64,
    pub malformed_lines: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub commands_sent: AtomicU64,
    pub commands_succeeded: AtomicU64,
    pub commands_failed: AtomicU64,
    pub commands_timed_out: AtomicU64,
    pub unsolicited_dispatched: AtomicU64,
    pub unsolicited_dropped: AtomicU64,
    pub malformed_lines: AtomicU64,
}

impl Counters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ChannelStats {
        ChannelStats {
            commands_sent: self.commands_sent.load(Ordering::Relaxed),
            commands_succeeded: self.commands_succeeded.load(Ordering::Relaxed),
            commands_failed: self.commands_failed.load(Ordering::Relaxed),
            commands_timed_out: self.commands_timed_out.load(Ordering::Relaxed),
            unsolicited_dispatched: self.unsolicited_dispatched.load(Ordering::Relaxed),
            unsolicited_dropped: self.unsolicited_dropped.load(Ordering::Relaxed),
            malformed_lines: self.malformed_lines.load(Ordering::Relaxed),
        }
    }
}
