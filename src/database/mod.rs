//! Contract with the ledger store.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    error::DatabaseError,
    types::{
        DebtDelta, DebtRow, ExpenseDraft, ExpenseSplit, Group, SavedExpense, SavedSettlement,
        SettlementDraft, User,
    },
};

pub type DatabaseResult<T> = Result<T, DatabaseError>;

pub mod sqlite;

/// This trait abstracts over the type of store.
///
/// The implementation could save the data in any suitable database or
/// even in memory. Methods that touch more than one table must apply all
/// of their writes in a single transaction.
pub trait Database {
    /// Get a user by their chat-platform account id.
    fn get_user(&self, platform_id: i64) -> DatabaseResult<Option<User>>;

    /// Insert a new user.
    fn save_user(&mut self, user: &User) -> DatabaseResult<()>;

    /// Update the display name of an existing user.
    fn update_username(&mut self, user_uuid: Uuid, username: &str) -> DatabaseResult<()>;

    /// Get the group bound to the given chat, if any.
    fn get_group_by_chat(&self, chat_id: i64) -> DatabaseResult<Option<Group>>;

    /// Insert a new group.
    fn save_group(&mut self, group: &Group) -> DatabaseResult<()>;

    /// Delete a group and everything it owns: memberships, expenses
    /// with their splits, debts and settlements.
    fn delete_group(&mut self, group_id: Uuid) -> DatabaseResult<()>;

    /// Get all groups that have reminders enabled.
    fn groups_with_reminders(&self) -> DatabaseResult<Vec<Group>>;

    /// Enable or disable reminders for a group.
    fn set_reminders(&mut self, group_id: Uuid, enabled: bool) -> DatabaseResult<()>;

    /// Remember the chat message the reminder task edits in place.
    fn set_notice_message(&mut self, group_id: Uuid, message_id: Option<i32>)
        -> DatabaseResult<()>;

    /// Get the members of a group.
    fn list_members(&self, group_id: Uuid) -> DatabaseResult<Vec<User>>;

    /// Check whether the user is a member of the group.
    fn is_member(&self, group_id: Uuid, user_uuid: Uuid) -> DatabaseResult<bool>;

    /// Insert a membership and materialize zero-valued debt rows in both
    /// directions against every user in *peers*.
    fn add_member(
        &mut self,
        group_id: Uuid,
        user_uuid: Uuid,
        joined_at: DateTime<Utc>,
        peers: &[Uuid],
    ) -> DatabaseResult<()>;

    /// Delete a membership together with every debt row that names the
    /// user, in either direction.
    fn remove_member(&mut self, group_id: Uuid, user_uuid: Uuid) -> DatabaseResult<()>;

    /// Get the pairwise debt table of a group, mirror rows included.
    fn list_debts(&self, group_id: Uuid) -> DatabaseResult<Vec<DebtRow>>;

    /// Apply a batch of pair increments: each delta adds its amount to
    /// the (ower, owed_to) row and the negated amount to the mirror row.
    /// Rows are created at zero on first touch.
    fn post_debts(&mut self, group_id: Uuid, deltas: &[DebtDelta]) -> DatabaseResult<()>;

    /// Insert an expense with its splits and apply the matching debt
    /// increments. Returns the id of the new expense.
    fn save_expense_with_splits(
        &mut self,
        group_id: Uuid,
        draft: &ExpenseDraft,
        splits: &[ExpenseSplit],
        deltas: &[DebtDelta],
    ) -> DatabaseResult<i64>;

    /// Get all expenses of a group in insertion order, splits attached.
    fn list_expenses(&self, group_id: Uuid) -> DatabaseResult<Vec<SavedExpense>>;

    /// Get the most recently inserted expense of a group, if any.
    fn latest_expense(&self, group_id: Uuid) -> DatabaseResult<Option<SavedExpense>>;

    /// Delete the expense with the given id together with its splits.
    fn delete_expense(&mut self, expense_id: i64) -> DatabaseResult<()>;

    /// Insert a settlement and apply the matching debt increment.
    /// Returns the id of the new settlement.
    fn save_settlement(
        &mut self,
        group_id: Uuid,
        draft: &SettlementDraft,
        delta: &DebtDelta,
    ) -> DatabaseResult<i64>;

    /// Get all settlements of a group in insertion order.
    fn list_settlements(&self, group_id: Uuid) -> DatabaseResult<Vec<SavedSettlement>>;

    /// Get the most recently inserted settlement of a group, if any.
    fn latest_settlement(&self, group_id: Uuid) -> DatabaseResult<Option<SavedSettlement>>;

    /// Delete the settlement with the given id.
    fn delete_settlement(&mut self, settlement_id: i64) -> DatabaseResult<()>;
}
