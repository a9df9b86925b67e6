//! The balance model: reversible operations that keep the debt table in
//! step with expenses, settlements and membership changes.
//!
//! Debt writes always reach the store as delta batches that update both
//! directions of a pair in one transaction, so the mirror invariant of
//! the debt table (each pair stored twice with opposite signs) cannot be
//! observed half-applied.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::database::Database;
use crate::error::LedgerError;
use crate::simplifier::{net_balances, simplify_debts};
use crate::types::{
    Amount, DebtDelta, ExpenseDraft, ExpenseSplit, Group, ParsedExpense, SavedExpense,
    SavedSettlement, SettlementDraft, User,
};
use crate::validator::SplitAssignment;

/// Compute the splits to persist for an expense: explicit shares as
/// tagged, plus an even fraction of the remainder for every implicit
/// ower. The payer absorbs one implicit share of the remainder too, but
/// that share is never persisted, so the payer appears in no split.
fn build_splits(payer: Uuid, amount: Amount, assignment: &SplitAssignment) -> Vec<ExpenseSplit> {
    let explicit_total: Amount = assignment.explicit.iter().map(|(_, share)| share).sum();
    let remainder = amount - explicit_total;

    let implicit: Vec<Uuid> = assignment
        .implicit
        .iter()
        .copied()
        .filter(|&user_uuid| user_uuid != payer)
        .collect();
    // Integer division: the truncated leftover stays with the payer.
    let share = remainder / (implicit.len() as Amount + 1);

    let mut splits: Vec<ExpenseSplit> = assignment
        .explicit
        .iter()
        .filter(|(user_uuid, _)| *user_uuid != payer)
        .map(|&(user_uuid, share)| ExpenseSplit::new(user_uuid, share))
        .collect();
    splits.extend(
        implicit
            .into_iter()
            .map(|user_uuid| ExpenseSplit::new(user_uuid, share)),
    );
    splits
}

/// Store a validated expense: one expense row, one split row per ower
/// and one debt increment per split toward the payer, all in one store
/// transaction. Returns the id of the new expense.
pub fn apply_expense<D: Database>(
    database: &mut D,
    group: &Group,
    payer: Uuid,
    parsed: &ParsedExpense,
    assignment: &SplitAssignment,
    created_at: DateTime<Utc>,
) -> anyhow::Result<i64> {
    let splits = build_splits(payer, parsed.amount, assignment);
    let deltas: Vec<DebtDelta> = splits
        .iter()
        .map(|split| DebtDelta::new(split.user_uuid, payer, split.amount))
        .collect();

    let draft = ExpenseDraft {
        paid_by: payer,
        amount: parsed.amount,
        description: parsed.description.clone(),
        created_at,
    };
    let expense_id = database.save_expense_with_splits(group.group_id, &draft, &splits, &deltas)?;
    Ok(expense_id)
}

/// The outstanding simplified balance from debtor to creditor, zero when
/// the simplified transfers contain no such pair.
pub fn outstanding_between<D: Database>(
    database: &D,
    group: &Group,
    debtor: Uuid,
    creditor: Uuid,
) -> anyhow::Result<Amount> {
    let debts = database.list_debts(group.group_id)?;
    let transfers = simplify_debts(&net_balances(&debts));
    let outstanding = transfers
        .iter()
        .find(|transfer| transfer.debtor == debtor && transfer.creditor == creditor)
        .map(|transfer| transfer.amount)
        .unwrap_or(0);
    Ok(outstanding)
}

/// Record that the debtor paid the creditor back. The amount must be
/// positive and covered by the outstanding simplified balance between
/// the two at call time. The settlement row and the debt decrement are
/// one store transaction.
pub fn record_settlement<D: Database>(
    database: &mut D,
    group: &Group,
    debtor: &User,
    creditor: &User,
    amount: Amount,
    created_at: DateTime<Utc>,
) -> anyhow::Result<i64> {
    let outstanding = outstanding_between(database, group, debtor.uuid, creditor.uuid)?;
    if amount <= 0 || amount > outstanding {
        return Err(LedgerError::invalid_settlement(&debtor.username, &creditor.username).into());
    }

    let draft = SettlementDraft {
        from_user: debtor.uuid,
        to_user: creditor.uuid,
        amount,
        created_at,
    };
    let delta = DebtDelta::new(debtor.uuid, creditor.uuid, -amount);
    let settlement_id = database.save_settlement(group.group_id, &draft, &delta)?;
    Ok(settlement_id)
}

/// Settle everything the debtor currently owes the creditor. Returns the
/// settled amount, or `None` when nothing is outstanding between the two.
pub fn settle_outstanding<D: Database>(
    database: &mut D,
    group: &Group,
    debtor: &User,
    creditor: &User,
    created_at: DateTime<Utc>,
) -> anyhow::Result<Option<Amount>> {
    let outstanding = outstanding_between(database, group, debtor.uuid, creditor.uuid)?;
    if outstanding <= 0 {
        return Ok(None);
    }
    record_settlement(database, group, debtor, creditor, outstanding, created_at)?;
    Ok(Some(outstanding))
}

/// Undo the most recent expense of the group: repost its splits with the
/// sign flipped, then delete the row together with its splits.
pub fn reverse_latest_expense<D: Database>(
    database: &mut D,
    group: &Group,
) -> anyhow::Result<SavedExpense> {
    let expense = database
        .latest_expense(group.group_id)?
        .ok_or(LedgerError::NothingToReverse("expense"))?;

    let deltas: Vec<DebtDelta> = expense
        .splits
        .iter()
        .map(|split| DebtDelta::new(split.user_uuid, expense.paid_by, -split.amount))
        .collect();
    database.post_debts(group.group_id, &deltas)?;
    database.delete_expense(expense.id)?;
    Ok(expense)
}

/// Undo the most recent settlement of the group: repost its transfer
/// with the sign flipped, then delete the row.
pub fn reverse_latest_settlement<D: Database>(
    database: &mut D,
    group: &Group,
) -> anyhow::Result<SavedSettlement> {
    let settlement = database
        .latest_settlement(group.group_id)?
        .ok_or(LedgerError::NothingToReverse("settlement"))?;

    let delta = DebtDelta::new(settlement.from_user, settlement.to_user, settlement.amount);
    database.post_debts(group.group_id, std::slice::from_ref(&delta))?;
    database.delete_settlement(settlement.id)?;
    Ok(settlement)
}

/// Add the user to the group, materializing zero debt rows against every
/// existing member. Returns `false` when the user was already a member.
pub fn add_member<D: Database>(
    database: &mut D,
    group: &Group,
    user: &User,
    joined_at: DateTime<Utc>,
) -> anyhow::Result<bool> {
    if database.is_member(group.group_id, user.uuid)? {
        return Ok(false);
    }
    let peers: Vec<Uuid> = database
        .list_members(group.group_id)?
        .iter()
        .map(|member| member.uuid)
        .collect();
    database.add_member(group.group_id, user.uuid, joined_at, &peers)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::Utc;
    use tempdir::TempDir;

    use super::*;
    use crate::database::sqlite::SqliteDatabase;
    use crate::parser::parse_expense_message;
    use crate::types::DebtRow;
    use crate::validator::validate_expense;

    struct Fixture {
        _dir: TempDir,
        database: SqliteDatabase,
        group: Group,
        users: HashMap<&'static str, User>,
    }

    fn fixture(names: &[&'static str]) -> Fixture {
        let dir = TempDir::new("divvy_test").expect("cannot create temp dir");
        let mut database =
            SqliteDatabase::new(dir.path().join("test.db")).expect("cannot open database");

        let mut users = HashMap::new();
        for (i, &name) in names.iter().enumerate() {
            let user = User::new(i as i64 + 1, name, Utc::now());
            database.save_user(&user).expect("cannot save user");
            users.insert(name, user);
        }

        let group = Group::new("trip", users[names[0]].uuid, -100, Utc::now());
        database.save_group(&group).expect("cannot save group");
        for &name in names {
            add_member(&mut database, &group, &users[name], Utc::now())
                .expect("cannot add member");
        }

        Fixture {
            _dir: dir,
            database,
            group,
            users,
        }
    }

    fn post_expense(fixture: &mut Fixture, payer: &str, text: &str) -> anyhow::Result<i64> {
        let parsed = parse_expense_message(text)?;
        let members: HashMap<String, User> = fixture
            .users
            .values()
            .map(|user| (user.username.clone(), user.clone()))
            .collect();
        let assignment = validate_expense(&parsed, &members)?;
        apply_expense(
            &mut fixture.database,
            &fixture.group,
            fixture.users[payer].uuid,
            &parsed,
            &assignment,
            Utc::now(),
        )
    }

    fn debt_between(fixture: &Fixture, ower: &str, owed_to: &str) -> Amount {
        let ower = fixture.users[ower].uuid;
        let owed_to = fixture.users[owed_to].uuid;
        fixture
            .database
            .list_debts(fixture.group.group_id)
            .expect("cannot get debts")
            .iter()
            .find(|d| d.user_uuid == ower && d.opp_user_uuid == owed_to)
            .map(|d| d.amount_owed)
            .unwrap_or(0)
    }

    fn debt_map(fixture: &Fixture) -> HashMap<(Uuid, Uuid), Amount> {
        fixture
            .database
            .list_debts(fixture.group.group_id)
            .expect("cannot get debts")
            .iter()
            .map(|d| ((d.user_uuid, d.opp_user_uuid), d.amount_owed))
            .collect()
    }

    fn assert_mirrored(debts: &[DebtRow]) {
        for debt in debts {
            let mirror = debts
                .iter()
                .find(|d| d.user_uuid == debt.opp_user_uuid && d.opp_user_uuid == debt.user_uuid)
                .expect("mirror row is missing");
            assert_eq!(mirror.amount_owed, -debt.amount_owed);
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_explicit_shares_become_debts_to_payer() {
        let mut fixture = fixture(&["payer", "jensen", "david"]);

        post_expense(&mut fixture, "payer", "Dinner\n25\n@jensen 8\n@david 7")
            .expect("cannot post expense");

        assert_eq!(debt_between(&fixture, "jensen", "payer"), 800);
        assert_eq!(debt_between(&fixture, "david", "payer"), 700);
        assert_eq!(debt_between(&fixture, "payer", "jensen"), -800);
        assert_eq!(debt_between(&fixture, "jensen", "david"), 0);

        let expenses = fixture
            .database
            .list_expenses(fixture.group.group_id)
            .expect("cannot get expenses");
        assert_eq!(expenses.len(), 1);
        assert_eq!(expenses[0].amount, 2500);
        assert_eq!(expenses[0].splits.len(), 2);

        let debts = fixture
            .database
            .list_debts(fixture.group.group_id)
            .expect("cannot get debts");
        assert_mirrored(&debts);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_implicit_remainder_split_three_ways() {
        let mut fixture = fixture(&["payer", "ben", "david"]);

        post_expense(&mut fixture, "payer", "Lunch\n12\n@ben\n@david")
            .expect("cannot post expense");

        // 12.00 over ben, david and the payer: 4.00 each, the payer's
        // share stays implicit.
        assert_eq!(debt_between(&fixture, "ben", "payer"), 400);
        assert_eq!(debt_between(&fixture, "david", "payer"), 400);

        let expense = fixture
            .database
            .latest_expense(fixture.group.group_id)
            .expect("cannot get latest expense")
            .expect("there is no expense");
        assert_eq!(expense.splits.len(), 2);
        assert!(expense.splits.iter().all(|s| s.amount == 400));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_mixed_explicit_and_implicit_shares() {
        let mut fixture = fixture(&["payer", "ben", "david"]);

        post_expense(&mut fixture, "payer", "Taxi\n20\n@ben 12\n@david")
            .expect("cannot post expense");

        // Remainder 8.00 is shared by david and the payer only.
        assert_eq!(debt_between(&fixture, "ben", "payer"), 1200);
        assert_eq!(debt_between(&fixture, "david", "payer"), 400);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_remainder_truncation() {
        let mut fixture = fixture(&["payer", "a", "b", "c"]);

        post_expense(&mut fixture, "payer", "Snacks\n1.01\n@a\n@b\n@c")
            .expect("cannot post expense");

        // 101 cents over four participants truncates to 25 each; the
        // leftover cent stays with the payer.
        assert_eq!(debt_between(&fixture, "a", "payer"), 25);
        assert_eq!(debt_between(&fixture, "b", "payer"), 25);
        assert_eq!(debt_between(&fixture, "c", "payer"), 25);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_tag_nobody_logs_expense_without_splits() {
        let mut fixture = fixture(&["payer", "ben"]);

        post_expense(&mut fixture, "payer", "Groceries\n40").expect("cannot post expense");

        let expense = fixture
            .database
            .latest_expense(fixture.group.group_id)
            .expect("cannot get latest expense")
            .expect("there is no expense");
        assert_eq!(expense.amount, 4000);
        assert!(expense.splits.is_empty());

        let debts = fixture
            .database
            .list_debts(fixture.group.group_id)
            .expect("cannot get debts");
        assert!(debts.iter().all(|d| d.amount_owed == 0));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_payer_self_tag_is_not_persisted() {
        let mut fixture = fixture(&["payer", "ben"]);

        post_expense(&mut fixture, "payer", "Dinner\n30\n@payer 10\n@ben")
            .expect("cannot post expense");

        // The payer's explicit 10.00 reduces the remainder but creates
        // no split; ben shares the remaining 20.00 with the payer.
        assert_eq!(debt_between(&fixture, "ben", "payer"), 1000);
        let expense = fixture
            .database
            .latest_expense(fixture.group.group_id)
            .expect("cannot get latest expense")
            .expect("there is no expense");
        assert_eq!(expense.splits.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_apply_then_reverse_restores_debts() {
        let mut fixture = fixture(&["payer", "jensen", "david"]);

        post_expense(&mut fixture, "payer", "Dinner\n25\n@jensen 8\n@david 7")
            .expect("cannot post expense");
        let before = debt_map(&fixture);

        post_expense(&mut fixture, "jensen", "Taxi\n9\n@payer 3\n@david 3")
            .expect("cannot post expense");
        assert_ne!(debt_map(&fixture), before);

        let reversed = reverse_latest_expense(&mut fixture.database, &fixture.group)
            .expect("cannot reverse expense");
        assert_eq!(reversed.description, "Taxi");

        assert_eq!(debt_map(&fixture), before);
        let expenses = fixture
            .database
            .list_expenses(fixture.group.group_id)
            .expect("cannot get expenses");
        assert_eq!(expenses.len(), 1);
        assert_eq!(expenses[0].description, "Dinner");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_reverse_with_no_history_fails() {
        let mut fixture = fixture(&["payer"]);

        let err = reverse_latest_expense(&mut fixture.database, &fixture.group).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LedgerError>(),
            Some(LedgerError::NothingToReverse(_))
        ));

        let err = reverse_latest_settlement(&mut fixture.database, &fixture.group).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LedgerError>(),
            Some(LedgerError::NothingToReverse(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_settling_exact_outstanding_zeroes_the_pair() {
        let mut fixture = fixture(&["payer", "jensen"]);
        post_expense(&mut fixture, "payer", "Dinner\n25\n@jensen 8")
            .expect("cannot post expense");

        let debtor = fixture.users["jensen"].clone();
        let creditor = fixture.users["payer"].clone();
        record_settlement(
            &mut fixture.database,
            &fixture.group,
            &debtor,
            &creditor,
            800,
            Utc::now(),
        )
        .expect("cannot record settlement");

        assert_eq!(debt_between(&fixture, "jensen", "payer"), 0);
        let debts = fixture
            .database
            .list_debts(fixture.group.group_id)
            .expect("cannot get debts");
        assert!(simplify_debts(&net_balances(&debts)).is_empty());

        let settlements = fixture
            .database
            .list_settlements(fixture.group.group_id)
            .expect("cannot get settlements");
        assert_eq!(settlements.len(), 1);
        assert_eq!(settlements[0].amount, 800);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_settling_more_than_outstanding_fails() {
        let mut fixture = fixture(&["payer", "jensen"]);
        post_expense(&mut fixture, "payer", "Dinner\n25\n@jensen 8")
            .expect("cannot post expense");
        let before = debt_map(&fixture);

        let debtor = fixture.users["jensen"].clone();
        let creditor = fixture.users["payer"].clone();
        let err = record_settlement(
            &mut fixture.database,
            &fixture.group,
            &debtor,
            &creditor,
            900,
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LedgerError>(),
            Some(LedgerError::InvalidSettlement { .. })
        ));

        assert_eq!(debt_map(&fixture), before);
        assert!(fixture
            .database
            .list_settlements(fixture.group.group_id)
            .expect("cannot get settlements")
            .is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_settle_outstanding_follows_simplified_transfers() {
        let mut fixture = fixture(&["a", "b", "c"]);

        // a owes b, b owes c; simplified this nets to a single a -> c.
        post_expense(&mut fixture, "b", "First\n10\n@a 10").expect("cannot post expense");
        post_expense(&mut fixture, "c", "Second\n10\n@b 10").expect("cannot post expense");

        let a = fixture.users["a"].clone();
        let b = fixture.users["b"].clone();
        let c = fixture.users["c"].clone();

        let settled = settle_outstanding(&mut fixture.database, &fixture.group, &a, &b, Utc::now())
            .expect("cannot settle");
        assert_eq!(settled, None);

        let settled = settle_outstanding(&mut fixture.database, &fixture.group, &a, &c, Utc::now())
            .expect("cannot settle");
        assert_eq!(settled, Some(1000));

        let debts = fixture
            .database
            .list_debts(fixture.group.group_id)
            .expect("cannot get debts");
        assert!(simplify_debts(&net_balances(&debts)).is_empty());

        // A second settlement finds nothing left.
        let settled = settle_outstanding(&mut fixture.database, &fixture.group, &a, &c, Utc::now())
            .expect("cannot settle");
        assert_eq!(settled, None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_reverse_latest_settlement_restores_debt() {
        let mut fixture = fixture(&["payer", "jensen"]);
        post_expense(&mut fixture, "payer", "Dinner\n25\n@jensen 8")
            .expect("cannot post expense");

        let debtor = fixture.users["jensen"].clone();
        let creditor = fixture.users["payer"].clone();
        settle_outstanding(
            &mut fixture.database,
            &fixture.group,
            &debtor,
            &creditor,
            Utc::now(),
        )
        .expect("cannot settle");
        assert_eq!(debt_between(&fixture, "jensen", "payer"), 0);

        let reversed = reverse_latest_settlement(&mut fixture.database, &fixture.group)
            .expect("cannot reverse settlement");
        assert_eq!(reversed.amount, 800);

        assert_eq!(debt_between(&fixture, "jensen", "payer"), 800);
        assert!(fixture
            .database
            .list_settlements(fixture.group.group_id)
            .expect("cannot get settlements")
            .is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_add_member_is_idempotent() {
        let mut fixture = fixture(&["payer", "jensen"]);

        let jensen = fixture.users["jensen"].clone();
        let added = add_member(&mut fixture.database, &fixture.group, &jensen, Utc::now())
            .expect("cannot add member");
        assert!(!added);

        let members = fixture
            .database
            .list_members(fixture.group.group_id)
            .expect("cannot get members");
        assert_eq!(members.len(), 2);
    }
}
