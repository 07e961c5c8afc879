//! Sequence suffix allocation.
//!
//! The next code for a base is the lowest free slot counting up from 1, so
//! deleting `X-1` out of `X-1, X-2` hands `X-1` out again. Allocation reads the
//! existing codes and decides; it does not reserve anything. Two callers
//! allocating the same base at once can both get the same code, and the loser's
//! insert fails with `DuplicateKey`.

use std::collections::HashSet;
use tracing::debug;

use crate::code::{format_code, parse_suffix, validate_base};
use crate::db::Store;
use crate::error::Result;

/// Lowest positive suffix not used by any of `codes` under `base`.
/// Codes that do not parse as `base-<n>` are ignored.
pub fn next_suffix<I, S>(base: &str, codes: I) -> u64
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let taken: HashSet<u64> = codes
        .into_iter()
        .filter_map(|code| parse_suffix(base, code.as_ref()))
        .collect();

    let mut n = 1;
    while taken.contains(&n) {
        n += 1;
    }
    n
}

/// Picks the next free code for `base` from what is currently stored.
#[tracing::instrument(name = "Allocating entry code", skip(store))]
pub async fn allocate(store: &dyn Store, base: &str) -> Result<String> {
    let base = validate_base(base)?;
    let existing = store.find_codes_by_prefix(base).await?;
    let n = next_suffix(base, &existing);
    debug!(existing = existing.len(), suffix = n, "Picked suffix");

    Ok(format_code(base, n))
}
