//! Domain types shared by the parser, the ledger and the store.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Monetary amounts are integer minor units (cents).
pub type Amount = i64;

/// Ceiling on any single amount. The product bound is on the decimal
/// amount (10^8), so in minor units the limit is 10^10.
pub const MAX_AMOUNT: Amount = 100_000_000 * 100;

/// Currency assigned to users created on first interaction.
pub const DEFAULT_CURRENCY: &str = "SGD";

/// A chat-platform account known to the bot.
///
/// Users are never deleted: a reference whose user record is gone renders
/// as a placeholder instead.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User {
    pub uuid: Uuid,
    pub platform_id: i64,
    pub username: String,
    pub currency: String,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(platform_id: i64, username: &str, created_at: DateTime<Utc>) -> User {
        User {
            uuid: Uuid::new_v4(),
            platform_id,
            username: username.to_string(),
            currency: DEFAULT_CURRENCY.to_string(),
            created_at,
        }
    }
}

/// An expense-sharing group, bound one-to-one to a chat.
#[derive(Clone, Debug)]
pub struct Group {
    pub group_id: Uuid,
    pub name: String,
    pub created_by: Uuid,
    pub chat_id: i64,
    pub reminders: bool,
    /// Message the reminder task edits in place, once one has been sent.
    pub notice_message_id: Option<i32>,
    pub created_at: DateTime<Utc>,
}

impl Group {
    pub fn new(name: &str, created_by: Uuid, chat_id: i64, created_at: DateTime<Utc>) -> Group {
        Group {
            group_id: Uuid::new_v4(),
            name: name.to_string(),
            created_by,
            chat_id,
            reminders: false,
            notice_message_id: None,
            created_at,
        }
    }
}

/// A tagged participant in an expense message: `@handle` alone marks an
/// implicit ower, `@handle 8` an explicit share.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedTag {
    pub handle: String,
    pub amount: Option<Amount>,
}

impl ParsedTag {
    pub fn new(handle: &str, amount: Option<Amount>) -> ParsedTag {
        ParsedTag {
            handle: handle.to_string(),
            amount,
        }
    }
}

/// An expense message as parsed, before any validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedExpense {
    pub description: String,
    pub amount: Amount,
    pub tags: Vec<ParsedTag>,
}

impl ParsedExpense {
    pub fn new(description: String, amount: Amount, tags: Vec<ParsedTag>) -> ParsedExpense {
        ParsedExpense {
            description,
            amount,
            tags,
        }
    }
}

/// One ower's share of an expense. The payer never has a split row: their
/// absorbed part of the remainder stays implicit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExpenseSplit {
    pub user_uuid: Uuid,
    pub amount: Amount,
}

impl ExpenseSplit {
    pub fn new(user_uuid: Uuid, amount: Amount) -> ExpenseSplit {
        ExpenseSplit { user_uuid, amount }
    }
}

/// An expense ready to be persisted.
#[derive(Clone, Debug)]
pub struct ExpenseDraft {
    pub paid_by: Uuid,
    pub amount: Amount,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// An expense as stored, with its splits attached.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SavedExpense {
    pub id: i64,
    pub paid_by: Uuid,
    pub amount: Amount,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub splits: Vec<ExpenseSplit>,
}

/// One direction of a pairwise balance: how much `user_uuid` owes
/// `opp_user_uuid`. Every stored pair has a mirror row with the amount
/// negated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DebtRow {
    pub user_uuid: Uuid,
    pub opp_user_uuid: Uuid,
    pub amount_owed: Amount,
}

/// A logical pair increment: `amount` is added to (ower, owed_to) and
/// subtracted from the mirror row, atomically.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DebtDelta {
    pub ower: Uuid,
    pub owed_to: Uuid,
    pub amount: Amount,
}

impl DebtDelta {
    pub fn new(ower: Uuid, owed_to: Uuid, amount: Amount) -> DebtDelta {
        DebtDelta {
            ower,
            owed_to,
            amount,
        }
    }
}

/// A settlement ready to be persisted.
#[derive(Clone, Debug)]
pub struct SettlementDraft {
    pub from_user: Uuid,
    pub to_user: Uuid,
    pub amount: Amount,
    pub created_at: DateTime<Utc>,
}

/// A settlement as stored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SavedSettlement {
    pub id: i64,
    pub from_user: Uuid,
    pub to_user: Uuid,
    pub amount: Amount,
    pub created_at: DateTime<Utc>,
}

/// One payment in the simplified settlement plan.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transfer {
    pub debtor: Uuid,
    pub creditor: Uuid,
    pub amount: Amount,
}

impl Transfer {
    pub fn new(debtor: Uuid, creditor: Uuid, amount: Amount) -> Transfer {
        Transfer {
            debtor,
            creditor,
            amount,
        }
    }
}
