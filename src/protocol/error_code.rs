//! Structured error codes carried by `+CME ERROR:` and `+CMS ERROR:` lines

use std::fmt;

const CME_ERROR_PREFIX: &str = "+CME ERROR:";
const CMS_ERROR_PREFIX: &str = "+CMS ERROR:";

/// Error family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Mobile equipment error (`+CME ERROR:`)
    Equipment,

    /// Message service error (`+CMS ERROR:`)
    MessageService,
}

/// A parsed final-response error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode {
    pub category: ErrorCategory,
    pub code: u32,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.category {
            ErrorCategory::Equipment => write!(f, "{} {}", CME_ERROR_PREFIX, self.code),
            ErrorCategory::MessageService => write!(f, "{} {}", CMS_ERROR_PREFIX, self.code),
        }
    }
}

/// Parse a final error line into a category and code
///
/// Plain `ERROR`, `NO CARRIER`, verbose (textual) CME errors and anything
/// else without a numeric code yield `None`.
pub fn try_parse_error(line: &str) -> Option<ErrorCode> {
    let (category, rest) = if let Some(rest) = line.strip_prefix(CME_ERROR_PREFIX) {
        (ErrorCategory::Equipment, rest)
    } else if let Some(rest) = line.strip_prefix(CMS_ERROR_PREFIX) {
        (ErrorCategory::MessageService, rest)
    } else {
        return None;
    };

    let digits = rest.trim();
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    digits.parse().ok().map(|code| ErrorCode { category, code })
}
