//! Produce the strings that are sent as bot messages.
//! The formatting consists in basic MarkdownV2, emojis and composing
//! the actual output string; amounts are rendered with two decimals.

use std::collections::HashMap;

use teloxide::utils::markdown::{bold, escape};
use uuid::Uuid;

use crate::types::{Amount, SavedExpense, SavedSettlement, Transfer, User};

const AMOUNT_TO_FLOAT_DIVISOR: f64 = 100.0;
const DATE_FORMAT: &str = "%d %B %Y";

/// Rendered name for users that are referenced but no longer resolvable.
pub const DELETED_USER: &str = "deleted_user";

pub fn format_amount(amount: Amount) -> String {
    format!("{:.2}", amount as f64 / AMOUNT_TO_FLOAT_DIVISOR)
}

pub fn display_name(members: &HashMap<Uuid, User>, user_uuid: Uuid) -> &str {
    members
        .get(&user_uuid)
        .map(|user| user.username.as_str())
        .unwrap_or(DELETED_USER)
}

/// The expense history, grouped under one 📅 header per calendar day.
/// The output is MarkdownV2.
pub fn format_expense_list(expenses: &[SavedExpense], members: &HashMap<Uuid, User>) -> String {
    if expenses.is_empty() {
        return escape("There are no expenses recorded in this group.");
    }

    let mut result = String::new();
    let mut current_date = String::new();
    for expense in expenses {
        push_date_header(&mut result, &mut current_date, expense.created_at);
        result += &format_expense(expense, members);
        result.push('\n');
    }
    result
}

fn format_expense(expense: &SavedExpense, members: &HashMap<Uuid, User>) -> String {
    let payer = display_name(members, expense.paid_by);
    let mut result = format!(
        "{}: {} {}",
        escape(&expense.description),
        bold(&escape(&format!("${}", format_amount(expense.amount)))),
        escape(&format!("(Paid by {payer})")),
    );
    for split in &expense.splits {
        let ower = display_name(members, split.user_uuid);
        result += &escape(&format!(
            "\n  • {ower} owes ${}",
            format_amount(split.amount)
        ));
    }
    result
}

/// The settlement history, grouped like the expense history. The output
/// is MarkdownV2.
pub fn format_settlement_list(
    settlements: &[SavedSettlement],
    members: &HashMap<Uuid, User>,
) -> String {
    if settlements.is_empty() {
        return escape("There are no settlements recorded in this group.");
    }

    let mut result = String::new();
    let mut current_date = String::new();
    for settlement in settlements {
        push_date_header(&mut result, &mut current_date, settlement.created_at);
        result += &escape(&format!(
            "  • {} paid ${} to {}\n",
            display_name(members, settlement.from_user),
            format_amount(settlement.amount),
            display_name(members, settlement.to_user)
        ));
    }
    result
}

fn push_date_header(
    result: &mut String,
    current_date: &mut String,
    created_at: chrono::DateTime<chrono::Utc>,
) {
    let date = created_at.format(DATE_FORMAT).to_string();
    if date != *current_date {
        if !current_date.is_empty() {
            result.push('\n');
        }
        *result += &format!("📅 {}\n", bold(&escape(&date)));
        *current_date = date;
    }
}

/// The simplified transfers as plain text, one per line.
pub fn format_debts(transfers: &[Transfer], members: &HashMap<Uuid, User>) -> String {
    if transfers.is_empty() {
        return "All debts have been settled!".to_string();
    }
    transfers
        .iter()
        .map(|transfer| {
            format!(
                "{} owes {} ${}",
                display_name(members, transfer.debtor),
                display_name(members, transfer.creditor),
                format_amount(transfer.amount)
            )
        })
        .fold(String::new(), |a, b| a + &b + "\n")
}

/// Like [`format_debts`], but with @-mentions so the platform notifies
/// both parties. Used by the reminder notices.
pub fn format_debts_with_mentions(
    transfers: &[Transfer],
    members: &HashMap<Uuid, User>,
) -> String {
    if transfers.is_empty() {
        return "All debts have been settled!".to_string();
    }
    transfers
        .iter()
        .map(|transfer| {
            format!(
                "@{} owes @{} ${}",
                display_name(members, transfer.debtor),
                display_name(members, transfer.creditor),
                format_amount(transfer.amount)
            )
        })
        .fold(String::new(), |a, b| a + &b + "\n")
}

pub fn format_simple_list<T: AsRef<str>>(elements: &[T]) -> String {
    elements
        .iter()
        .map(|e| format!("- {}", e.as_ref()))
        .fold(String::new(), |a, b| a + &b + "\n")
}
