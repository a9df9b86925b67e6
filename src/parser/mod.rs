//! Parse the user input.

mod expense;

pub use expense::parse_expense_message;

use crate::error::InputError;
use crate::validator::is_valid_handle;

/// Extract the settle targets from a reply like `@alice @bob`.
///
/// Tokens that do not look like mentions are ignored; handles come back
/// lowercased. It is an error if no mention is found at all.
pub fn parse_settle_targets(s: &str) -> Result<Vec<String>, InputError> {
    let targets: Vec<_> = s
        .split_whitespace()
        .filter_map(|token| {
            let handle = token.strip_prefix('@')?;
            if is_valid_handle(handle) {
                Some(handle.to_lowercase())
            } else {
                None
            }
        })
        .collect();
    if targets.is_empty() {
        Err(InputError::settle_targets_not_provided())
    } else {
        Ok(targets)
    }
}

/// Split an on-behalf reply into the payer handle (first line, `@payer`)
/// and the expense message that follows.
pub fn parse_on_behalf(s: &str) -> Result<(String, &str), InputError> {
    let (first, rest) = s
        .trim_start()
        .split_once('\n')
        .ok_or_else(InputError::payer_not_provided)?;
    let handle = first
        .trim()
        .strip_prefix('@')
        .filter(|handle| is_valid_handle(handle))
        .ok_or_else(InputError::payer_not_provided)?;
    Ok((handle.to_lowercase(), rest))
}
