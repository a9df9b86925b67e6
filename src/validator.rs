//! Functions that check the validity of a parsed expense.
//!
//! These run after the parsing phase, against the member roster of the
//! group the expense belongs to, and execute checks that are not easily
//! done by the parser.

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use crate::error::InputError;
use crate::formatter::format_amount;
use crate::types::{Amount, ParsedExpense, User, MAX_AMOUNT};

/// Tagged participants resolved against the member roster, partitioned
/// into explicit shares and implicit remainder owers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SplitAssignment {
    pub explicit: Vec<(Uuid, Amount)>,
    pub implicit: Vec<Uuid>,
}

/// Check that a string has the shape of a platform handle: non-empty,
/// only alphanumeric characters and underscores.
pub fn is_valid_handle(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_alphanumeric() || c == '_')
}

/// Some sanity checks on the expense that was submitted.
///
/// List of checks, in order:
/// - the total amount is positive and below the ceiling
/// - every explicit share is positive and below the ceiling
/// - every tagged handle resolves to a member of the group
/// - no handle is tagged more than once
/// - the explicit shares do not add up to more than the total
///
/// On success the tags come back resolved to user ids, partitioned into
/// explicit shares and implicit remainder owers.
pub fn validate_expense(
    expense: &ParsedExpense,
    members: &HashMap<String, User>,
) -> Result<SplitAssignment, InputError> {
    total_in_range(expense)?;
    shares_in_range(expense)?;
    let resolved = tags_resolve(expense, members)?;
    no_duplicate_tags(expense)?;
    tagged_within_total(expense)?;

    let mut assignment = SplitAssignment::default();
    for (user_uuid, amount) in resolved {
        match amount {
            Some(amount) => assignment.explicit.push((user_uuid, amount)),
            None => assignment.implicit.push(user_uuid),
        }
    }
    Ok(assignment)
}

fn amount_in_range(amount: Amount) -> Result<(), InputError> {
    if amount <= 0 {
        Err(InputError::invalid_amount(format_amount(amount)))
    } else if amount >= MAX_AMOUNT {
        Err(InputError::amount_too_large(format_amount(amount)))
    } else {
        Ok(())
    }
}

fn total_in_range(expense: &ParsedExpense) -> Result<(), InputError> {
    amount_in_range(expense.amount)
}

fn shares_in_range(expense: &ParsedExpense) -> Result<(), InputError> {
    for tag in &expense.tags {
        if let Some(amount) = tag.amount {
            amount_in_range(amount)?;
        }
    }
    Ok(())
}

fn tags_resolve(
    expense: &ParsedExpense,
    members: &HashMap<String, User>,
) -> Result<Vec<(Uuid, Option<Amount>)>, InputError> {
    expense
        .tags
        .iter()
        .map(|tag| match members.get(&tag.handle) {
            Some(user) => Ok((user.uuid, tag.amount)),
            None => Err(InputError::member_not_found(tag.handle.clone())),
        })
        .collect()
}

fn no_duplicate_tags(expense: &ParsedExpense) -> Result<(), InputError> {
    // A HashSet returns false upon insertion if the handle is present.
    let mut seen = HashSet::new();
    for tag in &expense.tags {
        if !seen.insert(&tag.handle) {
            return Err(InputError::duplicate_tag(tag.handle.clone()));
        }
    }
    Ok(())
}

fn tagged_within_total(expense: &ParsedExpense) -> Result<(), InputError> {
    let tagged: Amount = expense.tags.iter().filter_map(|tag| tag.amount).sum();
    if tagged > expense.amount {
        Err(InputError::tagged_amount_exceeds_total(
            format_amount(tagged),
            format_amount(expense.amount),
        ))
    } else {
        Ok(())
    }
}
