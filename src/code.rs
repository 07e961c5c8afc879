//! Entry code grammar: `<base>-<n>`.
//!
//! The base may itself contain `-` (`L9R3-0711`); the sequence suffix is always
//! the part after the rightmost separator and is a plain positive integer.

use crate::error::{Error, Result};

pub const SEPARATOR: char = '-';

/// Longest accepted base code, leaving room for the suffix in a 50 character key.
pub const MAX_BASE_LEN: usize = 40;

/// Checks a user supplied base code and returns it trimmed.
pub fn validate_base(raw: &str) -> Result<&str> {
    let base = raw.trim();

    if base.is_empty() {
        return Err(Error::InvalidInput("base code is required".to_string()));
    }
    if base.chars().count() > MAX_BASE_LEN {
        return Err(Error::InvalidInput(format!(
            "base code is longer than {} characters",
            MAX_BASE_LEN
        )));
    }
    if base.chars().any(char::is_control) {
        return Err(Error::InvalidInput(
            "base code contains control characters".to_string(),
        ));
    }
    // "X-" would yield "X--1", whose base no longer reads back unambiguously.
    if base.ends_with(SEPARATOR) {
        return Err(Error::InvalidInput(format!(
            "base code may not end with '{}'",
            SEPARATOR
        )));
    }

    Ok(base)
}

pub fn format_code(base: &str, n: u64) -> String {
    format!("{}{}{}", base, SEPARATOR, n)
}

/// Pattern prefix shared by every code of `base`.
pub fn prefix_of(base: &str) -> String {
    format!("{}{}", base, SEPARATOR)
}

/// Returns the sequence suffix of `code` if it belongs to `base`.
///
/// Only canonical positive decimals count: `X-01` and `X-0` are not codes
/// the allocator would ever produce, so they do not occupy a slot.
pub fn parse_suffix(base: &str, code: &str) -> Option<u64> {
    let rest = code.strip_prefix(base)?.strip_prefix(SEPARATOR)?;
    if rest.is_empty() || rest.starts_with('0') || !rest.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    rest.parse().ok()
}

/// Recovers the base code by stripping the last `-n` suffix.
pub fn base_of(code: &str) -> Option<&str> {
    let (base, _) = code.rsplit_once(SEPARATOR)?;
    if base.is_empty() || parse_suffix(base, code).is_none() {
        return None;
    }
    Some(base)
}
