//! The implementation of the ledger store using Sqlite.

use std::path::Path;

use chrono::{DateTime, Utc};
use log::debug;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use tokio::task::block_in_place;
use uuid::Uuid;

use crate::{
    error::DatabaseError,
    types::{
        Amount, DebtDelta, DebtRow, ExpenseDraft, ExpenseSplit, Group, SavedExpense,
        SavedSettlement, SettlementDraft, User,
    },
};

use super::{Database, DatabaseResult};

mod schema;

pub struct SqliteDatabase {
    connection: Connection,
}

impl SqliteDatabase {
    pub fn new<P: AsRef<Path>>(path: P) -> DatabaseResult<SqliteDatabase> {
        block_in_place(|| {
            let connection = Connection::open(path)
                .map_err(|e| DatabaseError::new("cannot open database", e.into()))?;
            schema::create_all_tables(&connection)
                .map_err(|e| DatabaseError::new("cannot create tables", e))?;
            Ok(SqliteDatabase { connection })
        })
    }
}

impl Database for SqliteDatabase {
    fn get_user(&self, platform_id: i64) -> DatabaseResult<Option<User>> {
        let fn_impl = || {
            let user = self
                .connection
                .query_row(
                    "SELECT uuid, platform_id, username, currency, created_at FROM user
                     WHERE platform_id = :platform_id",
                    params![&platform_id],
                    map_user_row,
                )
                .optional()?;

            Ok(user)
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot get user", e)))
    }

    fn save_user(&mut self, user: &User) -> DatabaseResult<()> {
        let fn_impl = || {
            self.connection.execute(
                "INSERT INTO user (uuid, platform_id, username, currency, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    &user.uuid,
                    &user.platform_id,
                    &user.username,
                    &user.currency,
                    &user.created_at,
                ],
            )?;

            Ok(())
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot save user", e)))
    }

    fn update_username(&mut self, user_uuid: Uuid, username: &str) -> DatabaseResult<()> {
        let fn_impl = || {
            self.connection.execute(
                "UPDATE user SET username = ?2 WHERE uuid = ?1",
                params![&user_uuid, &username],
            )?;

            Ok(())
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot update username", e)))
    }

    fn get_group_by_chat(&self, chat_id: i64) -> DatabaseResult<Option<Group>> {
        let fn_impl = || {
            let group = self
                .connection
                .query_row(
                    "SELECT group_id, chat_id, name, created_by, reminders, notice_message_id,
                            created_at
                     FROM expense_group WHERE chat_id = :chat_id",
                    params![&chat_id],
                    map_group_row,
                )
                .optional()?;

            Ok(group)
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot get group", e)))
    }

    fn save_group(&mut self, group: &Group) -> DatabaseResult<()> {
        let fn_impl = || {
            self.connection.execute(
                "INSERT INTO expense_group
                     (group_id, chat_id, name, created_by, reminders, notice_message_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    &group.group_id,
                    &group.chat_id,
                    &group.name,
                    &group.created_by,
                    &group.reminders,
                    &group.notice_message_id,
                    &group.created_at,
                ],
            )?;

            Ok(())
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot save group", e)))
    }

    fn delete_group(&mut self, group_id: Uuid) -> DatabaseResult<()> {
        debug!("Deleting group. Group ID: {group_id}");
        let mut fn_impl = || {
            let tx = self.connection.transaction()?;

            tx.execute(
                "DELETE FROM expense_split WHERE expense_id IN
                     (SELECT id FROM expense WHERE group_id = ?1)",
                params![&group_id],
            )?;
            tx.execute("DELETE FROM expense WHERE group_id = ?1", params![&group_id])?;
            tx.execute(
                "DELETE FROM settlement WHERE group_id = ?1",
                params![&group_id],
            )?;
            tx.execute("DELETE FROM debt WHERE group_id = ?1", params![&group_id])?;
            tx.execute(
                "DELETE FROM group_member WHERE group_id = ?1",
                params![&group_id],
            )?;
            tx.execute(
                "DELETE FROM expense_group WHERE group_id = ?1",
                params![&group_id],
            )?;

            tx.commit()?;

            Ok(())
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot delete group", e)))
    }

    fn groups_with_reminders(&self) -> DatabaseResult<Vec<Group>> {
        let fn_impl = || {
            let mut stmt = self.connection.prepare_cached(
                "SELECT group_id, chat_id, name, created_by, reminders, notice_message_id,
                        created_at
                 FROM expense_group WHERE reminders = 1",
            )?;

            let group_iter = stmt.query_map((), map_group_row)?;

            let groups = group_iter.collect::<Result<_, _>>()?;
            Ok(groups)
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot get groups with reminders", e)))
    }

    fn set_reminders(&mut self, group_id: Uuid, enabled: bool) -> DatabaseResult<()> {
        let fn_impl = || {
            self.connection.execute(
                "UPDATE expense_group SET reminders = ?2 WHERE group_id = ?1",
                params![&group_id, &enabled],
            )?;

            Ok(())
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot set reminders", e)))
    }

    fn set_notice_message(
        &mut self,
        group_id: Uuid,
        message_id: Option<i32>,
    ) -> DatabaseResult<()> {
        let fn_impl = || {
            self.connection.execute(
                "UPDATE expense_group SET notice_message_id = ?2 WHERE group_id = ?1",
                params![&group_id, &message_id],
            )?;

            Ok(())
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot set notice message", e)))
    }

    fn list_members(&self, group_id: Uuid) -> DatabaseResult<Vec<User>> {
        let fn_impl = || {
            let mut stmt = self.connection.prepare_cached(
                "SELECT u.uuid, u.platform_id, u.username, u.currency, u.created_at
                 FROM group_member gm
                 INNER JOIN user u ON gm.user_uuid = u.uuid
                 WHERE gm.group_id = :group_id
                 ORDER BY gm.joined_at",
            )?;

            let member_iter = stmt.query_map(params![&group_id], map_user_row)?;

            let members = member_iter.collect::<Result<_, _>>()?;
            Ok(members)
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot get members", e)))
    }

    fn is_member(&self, group_id: Uuid, user_uuid: Uuid) -> DatabaseResult<bool> {
        let fn_impl = || {
            let membership: Option<i64> = self
                .connection
                .query_row(
                    "SELECT 1 FROM group_member
                     WHERE group_id = :group_id AND user_uuid = :user_uuid",
                    params![&group_id, &user_uuid],
                    |row| row.get(0),
                )
                .optional()?;

            Ok(membership.is_some())
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot check membership", e)))
    }

    fn add_member(
        &mut self,
        group_id: Uuid,
        user_uuid: Uuid,
        joined_at: DateTime<Utc>,
        peers: &[Uuid],
    ) -> DatabaseResult<()> {
        let mut fn_impl = || {
            let tx = self.connection.transaction()?;

            tx.execute(
                "INSERT INTO group_member (group_id, user_uuid, joined_at) VALUES (?1, ?2, ?3)",
                params![&group_id, &user_uuid, &joined_at],
            )?;

            {
                let mut insert_debt_stmt = tx.prepare_cached(
                    "INSERT OR IGNORE INTO debt (group_id, user_uuid, opp_user_uuid, amount_owed)
                     VALUES (?1, ?2, ?3, 0)",
                )?;
                for peer in peers {
                    insert_debt_stmt.execute(params![&group_id, &user_uuid, peer])?;
                    insert_debt_stmt.execute(params![&group_id, peer, &user_uuid])?;
                }
            }

            tx.commit()?;

            Ok(())
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot add member", e)))
    }

    fn remove_member(&mut self, group_id: Uuid, user_uuid: Uuid) -> DatabaseResult<()> {
        debug!("Removing member. Group ID: {group_id}. User UUID: {user_uuid}");
        let mut fn_impl = || {
            let tx = self.connection.transaction()?;

            tx.execute(
                "DELETE FROM group_member WHERE group_id = ?1 AND user_uuid = ?2",
                params![&group_id, &user_uuid],
            )?;
            tx.execute(
                "DELETE FROM debt
                 WHERE group_id = ?1 AND (user_uuid = ?2 OR opp_user_uuid = ?2)",
                params![&group_id, &user_uuid],
            )?;

            tx.commit()?;

            Ok(())
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot remove member", e)))
    }

    fn list_debts(&self, group_id: Uuid) -> DatabaseResult<Vec<DebtRow>> {
        let fn_impl = || {
            let mut stmt = self.connection.prepare_cached(
                "SELECT user_uuid, opp_user_uuid, amount_owed FROM debt
                 WHERE group_id = :group_id",
            )?;

            let debt_iter = stmt.query_map(params![&group_id], |row| {
                Ok(DebtRow {
                    user_uuid: row.get(0)?,
                    opp_user_uuid: row.get(1)?,
                    amount_owed: row.get(2)?,
                })
            })?;

            let debts = debt_iter.collect::<Result<_, _>>()?;
            Ok(debts)
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot get debts", e)))
    }

    fn post_debts(&mut self, group_id: Uuid, deltas: &[DebtDelta]) -> DatabaseResult<()> {
        let mut fn_impl = || {
            let tx = self.connection.transaction()?;
            apply_deltas(&tx, group_id, deltas)?;
            tx.commit()?;

            Ok(())
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot post debts", e)))
    }

    fn save_expense_with_splits(
        &mut self,
        group_id: Uuid,
        draft: &ExpenseDraft,
        splits: &[ExpenseSplit],
        deltas: &[DebtDelta],
    ) -> DatabaseResult<i64> {
        let mut fn_impl = || {
            let tx = self.connection.transaction()?;

            let expense_id: i64 = {
                let mut insert_expense_stmt = tx.prepare_cached(
                    "INSERT INTO expense (group_id, paid_by, amount, description, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5) RETURNING id",
                )?;

                insert_expense_stmt.query_row(
                    params![
                        &group_id,
                        &draft.paid_by,
                        &draft.amount,
                        &draft.description,
                        &draft.created_at,
                    ],
                    |row| row.get(0),
                )?
            };

            debug!("expense_id is {expense_id}");

            {
                let mut insert_split_stmt = tx.prepare_cached(
                    "INSERT INTO expense_split (expense_id, user_uuid, amount)
                     VALUES (?1, ?2, ?3)",
                )?;

                for split in splits {
                    insert_split_stmt.execute(params![
                        &expense_id,
                        &split.user_uuid,
                        &split.amount,
                    ])?;
                }
            }

            apply_deltas(&tx, group_id, deltas)?;

            tx.commit()?;

            Ok(expense_id)
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot save expense with splits", e)))
    }

    fn list_expenses(&self, group_id: Uuid) -> DatabaseResult<Vec<SavedExpense>> {
        let fn_impl = || {
            let mut stmt = self.connection.prepare_cached(
                "SELECT e.id, e.paid_by, e.amount, e.description, e.created_at,
                        s.user_uuid, s.amount
                 FROM expense e
                 LEFT JOIN expense_split s ON e.id = s.expense_id
                 WHERE e.group_id = :group_id
                 ORDER BY e.id",
            )?;

            let expense_iter = stmt.query_map(params![&group_id], |row| {
                Ok(ExpenseSplitQuery {
                    id: row.get(0)?,
                    e_paid_by: row.get(1)?,
                    e_amount: row.get(2)?,
                    e_description: row.get(3)?,
                    e_created_at: row.get(4)?,
                    s_user_uuid: row.get(5)?,
                    s_amount: row.get(6)?,
                })
            })?;

            let expenses: Result<Vec<_>, _> = expense_iter.collect();
            Ok(fold_expense_rows(expenses?))
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot get expenses", e)))
    }

    fn latest_expense(&self, group_id: Uuid) -> DatabaseResult<Option<SavedExpense>> {
        let fn_impl = || {
            let mut stmt = self.connection.prepare_cached(
                "SELECT e.id, e.paid_by, e.amount, e.description, e.created_at,
                        s.user_uuid, s.amount
                 FROM expense e
                 LEFT JOIN expense_split s ON e.id = s.expense_id
                 WHERE e.group_id = :group_id
                   AND e.id = (SELECT MAX(id) FROM expense WHERE group_id = :group_id)",
            )?;

            let expense_iter = stmt.query_map(params![&group_id], |row| {
                Ok(ExpenseSplitQuery {
                    id: row.get(0)?,
                    e_paid_by: row.get(1)?,
                    e_amount: row.get(2)?,
                    e_description: row.get(3)?,
                    e_created_at: row.get(4)?,
                    s_user_uuid: row.get(5)?,
                    s_amount: row.get(6)?,
                })
            })?;

            let expenses: Result<Vec<_>, _> = expense_iter.collect();
            Ok(fold_expense_rows(expenses?).pop())
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot get latest expense", e)))
    }

    fn delete_expense(&mut self, expense_id: i64) -> DatabaseResult<()> {
        debug!("Deleting expense. Expense ID: {expense_id}");
        let mut fn_impl = || {
            let tx = self.connection.transaction()?;

            tx.execute(
                "DELETE FROM expense_split WHERE expense_id = ?1",
                params![&expense_id],
            )?;
            tx.execute("DELETE FROM expense WHERE id = ?1", params![&expense_id])?;

            tx.commit()?;

            Ok(())
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot delete expense", e)))
    }

    fn save_settlement(
        &mut self,
        group_id: Uuid,
        draft: &SettlementDraft,
        delta: &DebtDelta,
    ) -> DatabaseResult<i64> {
        let mut fn_impl = || {
            let tx = self.connection.transaction()?;

            let settlement_id: i64 = {
                let mut insert_settlement_stmt = tx.prepare_cached(
                    "INSERT INTO settlement (group_id, from_user, to_user, amount, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5) RETURNING id",
                )?;

                insert_settlement_stmt.query_row(
                    params![
                        &group_id,
                        &draft.from_user,
                        &draft.to_user,
                        &draft.amount,
                        &draft.created_at,
                    ],
                    |row| row.get(0),
                )?
            };

            apply_deltas(&tx, group_id, std::slice::from_ref(delta))?;

            tx.commit()?;

            Ok(settlement_id)
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot save settlement", e)))
    }

    fn list_settlements(&self, group_id: Uuid) -> DatabaseResult<Vec<SavedSettlement>> {
        let fn_impl = || {
            let mut stmt = self.connection.prepare_cached(
                "SELECT id, from_user, to_user, amount, created_at FROM settlement
                 WHERE group_id = :group_id
                 ORDER BY id",
            )?;

            let settlement_iter = stmt.query_map(params![&group_id], map_settlement_row)?;

            let settlements = settlement_iter.collect::<Result<_, _>>()?;
            Ok(settlements)
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot get settlements", e)))
    }

    fn latest_settlement(&self, group_id: Uuid) -> DatabaseResult<Option<SavedSettlement>> {
        let fn_impl = || {
            let settlement = self
                .connection
                .query_row(
                    "SELECT id, from_user, to_user, amount, created_at FROM settlement
                     WHERE group_id = :group_id
                     ORDER BY id DESC LIMIT 1",
                    params![&group_id],
                    map_settlement_row,
                )
                .optional()?;

            Ok(settlement)
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot get latest settlement", e)))
    }

    fn delete_settlement(&mut self, settlement_id: i64) -> DatabaseResult<()> {
        debug!("Deleting settlement. Settlement ID: {settlement_id}");
        let fn_impl = || {
            self.connection.execute(
                "DELETE FROM settlement WHERE id = ?1",
                params![&settlement_id],
            )?;

            Ok(())
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot delete settlement", e)))
    }
}

/// Apply pair increments inside an open transaction: the amount goes to
/// the (ower, owed_to) row, the negated amount to the mirror row. Rows
/// are created at zero on first touch, so an increment never misses.
fn apply_deltas(tx: &Transaction<'_>, group_id: Uuid, deltas: &[DebtDelta]) -> anyhow::Result<()> {
    let mut upsert_debt_stmt = tx.prepare_cached(
        "INSERT INTO debt (group_id, user_uuid, opp_user_uuid, amount_owed)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(group_id, user_uuid, opp_user_uuid)
         DO UPDATE SET amount_owed = amount_owed + excluded.amount_owed",
    )?;

    for delta in deltas {
        let mirror = -delta.amount;
        upsert_debt_stmt.execute(params![&group_id, &delta.ower, &delta.owed_to, &delta.amount])?;
        upsert_debt_stmt.execute(params![&group_id, &delta.owed_to, &delta.ower, &mirror])?;
    }

    Ok(())
}

fn map_user_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        uuid: row.get(0)?,
        platform_id: row.get(1)?,
        username: row.get(2)?,
        currency: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn map_group_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Group> {
    Ok(Group {
        group_id: row.get(0)?,
        chat_id: row.get(1)?,
        name: row.get(2)?,
        created_by: row.get(3)?,
        reminders: row.get(4)?,
        notice_message_id: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn map_settlement_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SavedSettlement> {
    Ok(SavedSettlement {
        id: row.get(0)?,
        from_user: row.get(1)?,
        to_user: row.get(2)?,
        amount: row.get(3)?,
        created_at: row.get(4)?,
    })
}

/// Regroup the expense/split join rows into expenses. Rows arrive ordered
/// by expense id, so each expense's splits are contiguous and insertion
/// order is preserved.
fn fold_expense_rows(rows: Vec<ExpenseSplitQuery>) -> Vec<SavedExpense> {
    let mut result: Vec<SavedExpense> = vec![];
    for row in rows {
        if result.last().map(|e| e.id) != Some(row.id) {
            result.push(SavedExpense {
                id: row.id,
                paid_by: row.e_paid_by,
                amount: row.e_amount,
                description: row.e_description,
                created_at: row.e_created_at,
                splits: vec![],
            });
        }
        if let (Some(user_uuid), Some(amount)) = (row.s_user_uuid, row.s_amount) {
            result
                .last_mut()
                .expect("just pushed the expense")
                .splits
                .push(ExpenseSplit::new(user_uuid, amount));
        }
    }
    result
}

struct ExpenseSplitQuery {
    id: i64,
    e_paid_by: Uuid,
    e_amount: Amount,
    e_description: String,
    e_created_at: DateTime<Utc>,
    s_user_uuid: Option<Uuid>,
    s_amount: Option<Amount>,
}

fn map_error<T: AsRef<str>>(message: T, e: anyhow::Error) -> DatabaseError {
    DatabaseError::new(message, e)
}

#[cfg(test)]
mod tests {
    use tempdir::TempDir;

    use super::*;

    fn test_database() -> (TempDir, SqliteDatabase) {
        let dir = TempDir::new("divvy_test").expect("cannot create temp dir");
        let database =
            SqliteDatabase::new(dir.path().join("test.db")).expect("cannot open database");
        (dir, database)
    }

    fn make_user(platform_id: i64, username: &str) -> User {
        User::new(platform_id, username, Utc::now())
    }

    #[test]
    fn test_fold_expense_rows() {
        let payer = Uuid::new_v4();
        let ower = Uuid::new_v4();
        let now = Utc::now();
        let rows = vec![
            ExpenseSplitQuery {
                id: 1,
                e_paid_by: payer,
                e_amount: 2500,
                e_description: "Dinner".to_string(),
                e_created_at: now,
                s_user_uuid: Some(ower),
                s_amount: Some(800),
            },
            ExpenseSplitQuery {
                id: 1,
                e_paid_by: payer,
                e_amount: 2500,
                e_description: "Dinner".to_string(),
                e_created_at: now,
                s_user_uuid: Some(payer),
                s_amount: Some(700),
            },
            ExpenseSplitQuery {
                id: 2,
                e_paid_by: payer,
                e_amount: 4000,
                e_description: "Groceries".to_string(),
                e_created_at: now,
                s_user_uuid: None,
                s_amount: None,
            },
        ];

        let expenses = fold_expense_rows(rows);
        assert_eq!(expenses.len(), 2);
        assert_eq!(expenses[0].id, 1);
        assert_eq!(expenses[0].splits.len(), 2);
        assert_eq!(expenses[0].splits[0], ExpenseSplit::new(ower, 800));
        assert_eq!(expenses[1].id, 2);
        assert!(expenses[1].splits.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_user_roundtrip() {
        let (_dir, mut database) = test_database();

        let user = make_user(42, "alice");
        database.save_user(&user).expect("cannot save user");

        let loaded = database.get_user(42).expect("cannot get user");
        assert_eq!(loaded, Some(user.clone()));

        database
            .update_username(user.uuid, "alice_2")
            .expect("cannot update username");
        let loaded = database.get_user(42).expect("cannot get user").expect("user is gone");
        assert_eq!(loaded.username, "alice_2");

        assert_eq!(database.get_user(1).expect("cannot get user"), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_group_roundtrip_and_reminders() {
        let (_dir, mut database) = test_database();

        let creator = make_user(1, "alice");
        let group = Group::new("trip", creator.uuid, -100, Utc::now());
        database.save_group(&group).expect("cannot save group");

        let loaded = database
            .get_group_by_chat(-100)
            .expect("cannot get group")
            .expect("group is gone");
        assert_eq!(loaded.group_id, group.group_id);
        assert_eq!(loaded.name, "trip");
        assert!(!loaded.reminders);
        assert_eq!(loaded.notice_message_id, None);

        database
            .set_reminders(group.group_id, true)
            .expect("cannot set reminders");
        database
            .set_notice_message(group.group_id, Some(7))
            .expect("cannot set notice message");

        let with_reminders = database
            .groups_with_reminders()
            .expect("cannot get groups with reminders");
        assert_eq!(with_reminders.len(), 1);
        assert_eq!(with_reminders[0].group_id, group.group_id);
        assert_eq!(with_reminders[0].notice_message_id, Some(7));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_membership_materializes_zero_debts() {
        let (_dir, mut database) = test_database();

        let alice = make_user(1, "alice");
        let bob = make_user(2, "bob");
        database.save_user(&alice).expect("cannot save user");
        database.save_user(&bob).expect("cannot save user");

        let group = Group::new("trip", alice.uuid, -100, Utc::now());
        database.save_group(&group).expect("cannot save group");

        database
            .add_member(group.group_id, alice.uuid, Utc::now(), &[])
            .expect("cannot add member");
        database
            .add_member(group.group_id, bob.uuid, Utc::now(), &[alice.uuid])
            .expect("cannot add member");

        assert!(database
            .is_member(group.group_id, alice.uuid)
            .expect("cannot check membership"));
        assert!(database
            .is_member(group.group_id, bob.uuid)
            .expect("cannot check membership"));

        let members = database
            .list_members(group.group_id)
            .expect("cannot get members");
        assert_eq!(members.len(), 2);

        let debts = database.list_debts(group.group_id).expect("cannot get debts");
        assert_eq!(debts.len(), 2);
        assert!(debts.iter().all(|d| d.amount_owed == 0));

        database
            .remove_member(group.group_id, bob.uuid)
            .expect("cannot remove member");
        assert!(!database
            .is_member(group.group_id, bob.uuid)
            .expect("cannot check membership"));
        let debts = database.list_debts(group.group_id).expect("cannot get debts");
        assert!(debts.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_post_debts_updates_both_directions() {
        let (_dir, mut database) = test_database();

        let group_id = Uuid::new_v4();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        database
            .post_debts(group_id, &[DebtDelta::new(bob, alice, 800)])
            .expect("cannot post debts");
        database
            .post_debts(group_id, &[DebtDelta::new(bob, alice, 200)])
            .expect("cannot post debts");

        let debts = database.list_debts(group_id).expect("cannot get debts");
        assert_eq!(debts.len(), 2);
        let bob_row = debts.iter().find(|d| d.user_uuid == bob).expect("row is gone");
        let alice_row = debts.iter().find(|d| d.user_uuid == alice).expect("row is gone");
        assert_eq!(bob_row.amount_owed, 1000);
        assert_eq!(alice_row.amount_owed, -1000);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_expense_roundtrip() {
        let (_dir, mut database) = test_database();

        let group_id = Uuid::new_v4();
        let payer = Uuid::new_v4();
        let ower = Uuid::new_v4();

        let draft = ExpenseDraft {
            paid_by: payer,
            amount: 2500,
            description: "Dinner".to_string(),
            created_at: Utc::now(),
        };
        let splits = [ExpenseSplit::new(ower, 800)];
        let deltas = [DebtDelta::new(ower, payer, 800)];
        let first_id = database
            .save_expense_with_splits(group_id, &draft, &splits, &deltas)
            .expect("cannot save expense");

        let draft = ExpenseDraft {
            paid_by: payer,
            amount: 4000,
            description: "Groceries".to_string(),
            created_at: Utc::now(),
        };
        let second_id = database
            .save_expense_with_splits(group_id, &draft, &[], &[])
            .expect("cannot save expense");
        assert!(second_id > first_id);

        let expenses = database
            .list_expenses(group_id)
            .expect("cannot get expenses");
        assert_eq!(expenses.len(), 2);
        assert_eq!(expenses[0].description, "Dinner");
        assert_eq!(expenses[0].splits, vec![ExpenseSplit::new(ower, 800)]);
        assert_eq!(expenses[1].description, "Groceries");
        assert!(expenses[1].splits.is_empty());

        let latest = database
            .latest_expense(group_id)
            .expect("cannot get latest expense")
            .expect("there is no expense");
        assert_eq!(latest.id, second_id);

        database
            .delete_expense(second_id)
            .expect("cannot delete expense");
        let latest = database
            .latest_expense(group_id)
            .expect("cannot get latest expense")
            .expect("there is no expense");
        assert_eq!(latest.id, first_id);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_settlement_roundtrip() {
        let (_dir, mut database) = test_database();

        let group_id = Uuid::new_v4();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        database
            .post_debts(group_id, &[DebtDelta::new(bob, alice, 800)])
            .expect("cannot post debts");

        let draft = SettlementDraft {
            from_user: bob,
            to_user: alice,
            amount: 800,
            created_at: Utc::now(),
        };
        let settlement_id = database
            .save_settlement(group_id, &draft, &DebtDelta::new(bob, alice, -800))
            .expect("cannot save settlement");

        let debts = database.list_debts(group_id).expect("cannot get debts");
        assert!(debts.iter().all(|d| d.amount_owed == 0));

        let settlements = database
            .list_settlements(group_id)
            .expect("cannot get settlements");
        assert_eq!(settlements.len(), 1);
        assert_eq!(settlements[0].id, settlement_id);
        assert_eq!(settlements[0].amount, 800);

        let latest = database
            .latest_settlement(group_id)
            .expect("cannot get latest settlement")
            .expect("there is no settlement");
        assert_eq!(latest.id, settlement_id);

        database
            .delete_settlement(settlement_id)
            .expect("cannot delete settlement");
        assert_eq!(
            database
                .latest_settlement(group_id)
                .expect("cannot get latest settlement"),
            None
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_delete_group_cascades() {
        let (_dir, mut database) = test_database();

        let alice = make_user(1, "alice");
        let bob = make_user(2, "bob");
        database.save_user(&alice).expect("cannot save user");
        database.save_user(&bob).expect("cannot save user");

        let group = Group::new("trip", alice.uuid, -100, Utc::now());
        database.save_group(&group).expect("cannot save group");
        database
            .add_member(group.group_id, alice.uuid, Utc::now(), &[])
            .expect("cannot add member");
        database
            .add_member(group.group_id, bob.uuid, Utc::now(), &[alice.uuid])
            .expect("cannot add member");

        let draft = ExpenseDraft {
            paid_by: alice.uuid,
            amount: 2500,
            description: "Dinner".to_string(),
            created_at: Utc::now(),
        };
        database
            .save_expense_with_splits(
                group.group_id,
                &draft,
                &[ExpenseSplit::new(bob.uuid, 800)],
                &[DebtDelta::new(bob.uuid, alice.uuid, 800)],
            )
            .expect("cannot save expense");

        let draft = SettlementDraft {
            from_user: bob.uuid,
            to_user: alice.uuid,
            amount: 300,
            created_at: Utc::now(),
        };
        database
            .save_settlement(
                group.group_id,
                &draft,
                &DebtDelta::new(bob.uuid, alice.uuid, -300),
            )
            .expect("cannot save settlement");

        database
            .delete_group(group.group_id)
            .expect("cannot delete group");

        assert!(database
            .get_group_by_chat(-100)
            .expect("cannot get group")
            .is_none());
        assert!(database
            .list_members(group.group_id)
            .expect("cannot get members")
            .is_empty());
        assert!(database
            .list_debts(group.group_id)
            .expect("cannot get debts")
            .is_empty());
        assert!(database
            .list_expenses(group.group_id)
            .expect("cannot get expenses")
            .is_empty());
        assert!(database
            .list_settlements(group.group_id)
            .expect("cannot get settlements")
            .is_empty());

        // Users survive a group deletion.
        assert!(database.get_user(1).expect("cannot get user").is_some());
    }
}
