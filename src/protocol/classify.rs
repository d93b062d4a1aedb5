//! Line classification
//!
//! Pure predicates the channel read loop applies to every received line.

use super::{Classification, Command, FINAL_ERROR, FINAL_SUCCESS, PROMPT, TWO_LINE_UNSOLICITED};

/// Kind of final response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalKind {
    Success,
    Error,
}

/// Whether a framed line is exactly the data-mode prompt
pub fn is_prompt(line: &[u8]) -> bool {
    line == PROMPT
}

/// Classify a line as a final response, if it is one
pub fn final_kind(line: &str) -> Option<FinalKind> {
    if FINAL_SUCCESS.iter().any(|marker| line.starts_with(marker)) {
        Some(FinalKind::Success)
    } else if FINAL_ERROR.iter().any(|marker| line.starts_with(marker)) {
        Some(FinalKind::Error)
    } else {
        None
    }
}

/// Whether a line is the header of a two-line unsolicited notification
pub fn is_two_line_unsolicited(line: &str) -> bool {
    TWO_LINE_UNSOLICITED
        .iter()
        .any(|marker| line.starts_with(marker))
}

/// Whether `command` accepts `line` as its next intermediate line
///
/// `accepted` is the number of intermediate lines collected so far. A missing
/// prefix on a prefixed mode matches every line.
pub fn accepts_intermediate(command: &Command, accepted: usize, line: &str) -> bool {
    let has_prefix = || command.prefix().map_or(true, |p| line.starts_with(p));

    match command.classification() {
        Classification::NoResult | Classification::CustomEndOfLine => false,
        Classification::Numeric => {
            accepted == 0 && line.bytes().next().map_or(false, |b| b.is_ascii_digit())
        }
        Classification::SingleLine => accepted == 0 && has_prefix(),
        Classification::MultiLine => has_prefix(),
        Classification::MultiLineNoPrefix => true,
    }
}
