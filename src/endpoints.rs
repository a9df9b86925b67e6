//! Core implementation of bot handlers.
//!
//! This is split from `bot_commands` because these functions are the
//! largest subset of logic that can be tested without mocking Telegram
//! APIs: they take a chat id, the caller identity and payload strings,
//! and only touch the store.

use chrono::{DateTime, Utc};
use log::debug;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
    database::Database,
    error::{DatabaseError, InputError, LedgerError},
    formatter::{
        display_name, format_amount, format_debts, format_debts_with_mentions,
        format_expense_list, format_settlement_list, format_simple_list,
    },
    ledger,
    parser::{parse_expense_message, parse_on_behalf, parse_settle_targets},
    simplifier::{net_balances, simplify_debts},
    types::{Group, User},
    validator::validate_expense,
};

/// The reply that must be given to `/delete_group` before anything is
/// actually deleted.
pub const DELETE_CONFIRMATION: &str = "delete";

/// Identity of the user behind an incoming command, as reported by the
/// chat platform.
#[derive(Clone, Debug)]
pub struct Caller {
    pub platform_id: i64,
    pub username: String,
}

/// A rendered debt notice for one reminder-enabled group.
pub struct Reminder {
    pub group_id: Uuid,
    pub chat_id: i64,
    pub notice_message_id: Option<i32>,
    pub text: String,
}

pub async fn handle_create_group<D: Database>(
    chat_id: i64,
    caller: &Caller,
    group_name: &str,
    database: &Arc<Mutex<D>>,
    message_ts: DateTime<Utc>,
) -> anyhow::Result<String> {
    let group_name = group_name.trim();
    if group_name.is_empty() {
        return Err(InputError::group_name_not_provided().into());
    }

    if let Some(existing) = database.lock().await.get_group_by_chat(chat_id)? {
        return Err(LedgerError::GroupAlreadyExists(existing.name).into());
    }

    let creator = ensure_user(caller, database, message_ts).await?;
    debug!("Creating group named {group_name} in chat {chat_id}");

    let group = Group::new(group_name, creator.uuid, chat_id, message_ts);
    database.lock().await.save_group(&group)?;

    Ok(format!(
        "Group \"{group_name}\" created! Members can now /join_group."
    ))
}

pub async fn handle_join_group<D: Database>(
    chat_id: i64,
    caller: &Caller,
    database: &Arc<Mutex<D>>,
    message_ts: DateTime<Utc>,
) -> anyhow::Result<String> {
    let group = require_group(chat_id, database).await?;
    let user = ensure_user(caller, database, message_ts).await?;

    let added = ledger::add_member(&mut *database.lock().await, &group, &user, message_ts)?;
    if added {
        Ok(format!("{} joined the group!", user.username))
    } else {
        Ok("You are already in the group!".to_string())
    }
}

pub async fn handle_leave_group<D: Database>(
    chat_id: i64,
    caller: &Caller,
    database: &Arc<Mutex<D>>,
) -> anyhow::Result<String> {
    let group = require_group(chat_id, database).await?;
    let user = ensure_user(caller, database, Utc::now()).await?;

    if !database.lock().await.is_member(group.group_id, user.uuid)? {
        return Err(LedgerError::NotInGroup.into());
    }

    database
        .lock()
        .await
        .remove_member(group.group_id, user.uuid)?;

    Ok("You left the group. Outstanding balances involving you were cleared, not settled."
        .to_string())
}

pub async fn handle_delete_group<D: Database>(
    chat_id: i64,
    confirmation: &str,
    database: &Arc<Mutex<D>>,
) -> anyhow::Result<String> {
    let group = require_group(chat_id, database).await?;

    if !confirmation.trim().eq_ignore_ascii_case(DELETE_CONFIRMATION) {
        return Ok("Group was not deleted.".to_string());
    }

    database.lock().await.delete_group(group.group_id)?;
    Ok(format!("Group \"{}\" was deleted.", group.name))
}

pub async fn handle_view_users<D: Database>(
    chat_id: i64,
    database: &Arc<Mutex<D>>,
) -> anyhow::Result<String> {
    let group = require_group(chat_id, database).await?;
    let members = database.lock().await.list_members(group.group_id)?;
    if members.is_empty() {
        return Ok("There are no members in this group yet.".to_string());
    }

    let mut names: Vec<_> = members.into_iter().map(|user| user.username).collect();
    names.sort();
    Ok(format_simple_list(&names))
}

pub async fn handle_add_expense<D: Database>(
    chat_id: i64,
    caller: &Caller,
    message: &str,
    database: &Arc<Mutex<D>>,
    message_ts: DateTime<Utc>,
) -> anyhow::Result<String> {
    let group = require_group(chat_id, database).await?;
    let payer = ensure_user(caller, database, message_ts).await?;

    if !database.lock().await.is_member(group.group_id, payer.uuid)? {
        return Err(LedgerError::NotInGroup.into());
    }

    add_expense_for(&group, &payer, message, database, message_ts).await
}

pub async fn handle_add_expense_on_behalf<D: Database>(
    chat_id: i64,
    caller: &Caller,
    message: &str,
    database: &Arc<Mutex<D>>,
    message_ts: DateTime<Utc>,
) -> anyhow::Result<String> {
    let group = require_group(chat_id, database).await?;
    ensure_user(caller, database, message_ts).await?;

    let (payer_handle, expense_message) = parse_on_behalf(message)?;
    let members = member_index(&group, database).await?;
    let payer = members
        .get(&payer_handle)
        .cloned()
        .ok_or_else(|| InputError::member_not_found(payer_handle.clone()))?;

    add_expense_for(&group, &payer, expense_message, database, message_ts).await
}

async fn add_expense_for<D: Database>(
    group: &Group,
    payer: &User,
    message: &str,
    database: &Arc<Mutex<D>>,
    message_ts: DateTime<Utc>,
) -> anyhow::Result<String> {
    let expense = parse_expense_message(message)?;
    let members = member_index(group, database).await?;
    let assignment = validate_expense(&expense, &members)?;

    debug!("Recording expense in group {}", group.group_id);
    ledger::apply_expense(
        &mut *database.lock().await,
        group,
        payer.uuid,
        &expense,
        &assignment,
        message_ts,
    )?;

    Ok(format!(
        "Recorded \"{}\" for ${}, paid by {}.",
        expense.description,
        format_amount(expense.amount),
        payer.username
    ))
}

pub async fn handle_delete_latest_expense<D: Database>(
    chat_id: i64,
    database: &Arc<Mutex<D>>,
) -> anyhow::Result<String> {
    let group = require_group(chat_id, database).await?;
    let reversed = ledger::reverse_latest_expense(&mut *database.lock().await, &group)?;
    Ok(format!(
        "Deleted the latest expense: {} (${}).",
        reversed.description,
        format_amount(reversed.amount)
    ))
}

pub async fn handle_show_expenses<D: Database>(
    chat_id: i64,
    database: &Arc<Mutex<D>>,
) -> anyhow::Result<String> {
    let group = require_group(chat_id, database).await?;
    let expenses = database.lock().await.list_expenses(group.group_id)?;
    let members = member_directory(&group, database).await?;
    Ok(format_expense_list(&expenses, &members))
}

pub async fn handle_show_debts<D: Database>(
    chat_id: i64,
    database: &Arc<Mutex<D>>,
) -> anyhow::Result<String> {
    let group = require_group(chat_id, database).await?;
    let debts = database.lock().await.list_debts(group.group_id)?;
    if debts.is_empty() {
        return Ok("There are no recorded debts in this group.".to_string());
    }

    let transfers = simplify_debts(&net_balances(&debts));
    let members = member_directory(&group, database).await?;
    Ok(format_debts(&transfers, &members))
}

pub async fn handle_settle_debts<D: Database>(
    chat_id: i64,
    caller: &Caller,
    message: &str,
    database: &Arc<Mutex<D>>,
    message_ts: DateTime<Utc>,
) -> anyhow::Result<String> {
    let group = require_group(chat_id, database).await?;
    let debtor = ensure_user(caller, database, message_ts).await?;

    if !database.lock().await.is_member(group.group_id, debtor.uuid)? {
        return Err(LedgerError::NotInGroup.into());
    }

    let targets = parse_settle_targets(message)?;
    let members = member_index(&group, database).await?;
    // Every target must resolve before the first settlement is written.
    let creditors: Vec<User> = targets
        .iter()
        .map(|handle| {
            members
                .get(handle)
                .cloned()
                .ok_or_else(|| InputError::member_not_found(handle.clone()))
        })
        .collect::<Result<_, _>>()?;

    let mut lines = Vec::with_capacity(creditors.len());
    for creditor in &creditors {
        let settled = ledger::settle_outstanding(
            &mut *database.lock().await,
            &group,
            &debtor,
            creditor,
            message_ts,
        )?;
        match settled {
            Some(amount) => lines.push(format!(
                "{} paid ${} to {}.",
                debtor.username,
                format_amount(amount),
                creditor.username
            )),
            None => lines.push(format!(
                "No outstanding debt from {} to {}!",
                debtor.username, creditor.username
            )),
        }
    }

    Ok(lines.join("\n"))
}

pub async fn handle_delete_latest_settlement<D: Database>(
    chat_id: i64,
    database: &Arc<Mutex<D>>,
) -> anyhow::Result<String> {
    let group = require_group(chat_id, database).await?;
    let reversed = ledger::reverse_latest_settlement(&mut *database.lock().await, &group)?;

    let members = member_directory(&group, database).await?;
    Ok(format!(
        "Deleted the latest settlement: {} paid ${} to {}.",
        display_name(&members, reversed.from_user),
        format_amount(reversed.amount),
        display_name(&members, reversed.to_user)
    ))
}

pub async fn handle_show_settlements<D: Database>(
    chat_id: i64,
    database: &Arc<Mutex<D>>,
) -> anyhow::Result<String> {
    let group = require_group(chat_id, database).await?;
    let settlements = database.lock().await.list_settlements(group.group_id)?;
    let members = member_directory(&group, database).await?;
    Ok(format_settlement_list(&settlements, &members))
}

pub async fn handle_toggle_reminders<D: Database>(
    chat_id: i64,
    database: &Arc<Mutex<D>>,
) -> anyhow::Result<String> {
    let group = require_group(chat_id, database).await?;
    let enabled = !group.reminders;
    database
        .lock()
        .await
        .set_reminders(group.group_id, enabled)?;

    if enabled {
        Ok("Reminders are now ON for this group.".to_string())
    } else {
        Ok("Reminders are now OFF for this group.".to_string())
    }
}

/// Render the debt notice for every reminder-enabled group that still
/// has outstanding debts. Groups with nothing outstanding are skipped.
pub async fn compute_reminders<D: Database>(
    database: &Arc<Mutex<D>>,
) -> anyhow::Result<Vec<Reminder>> {
    let groups = database.lock().await.groups_with_reminders()?;

    let mut reminders = vec![];
    for group in groups {
        let debts = database.lock().await.list_debts(group.group_id)?;
        let transfers = simplify_debts(&net_balances(&debts));
        if transfers.is_empty() {
            continue;
        }

        let members = member_directory(&group, database).await?;
        let text = format!(
            "🔔 There are unsettled debts in this group!\n\n{}",
            format_debts_with_mentions(&transfers, &members)
        );
        reminders.push(Reminder {
            group_id: group.group_id,
            chat_id: group.chat_id,
            notice_message_id: group.notice_message_id,
            text,
        });
    }

    Ok(reminders)
}

async fn require_group<D: Database>(
    chat_id: i64,
    database: &Arc<Mutex<D>>,
) -> anyhow::Result<Group> {
    let group = database.lock().await.get_group_by_chat(chat_id)?;
    group.ok_or_else(|| LedgerError::NoGroupInChat.into())
}

/// Fetch the caller's user record, creating it on first interaction and
/// refreshing the username when the platform reports a new one.
async fn ensure_user<D: Database>(
    caller: &Caller,
    database: &Arc<Mutex<D>>,
    created_at: DateTime<Utc>,
) -> Result<User, DatabaseError> {
    let mut database = database.lock().await;
    match database.get_user(caller.platform_id)? {
        Some(mut user) => {
            if user.username != caller.username {
                database.update_username(user.uuid, &caller.username)?;
                user.username = caller.username.clone();
            }
            Ok(user)
        }
        None => {
            let user = User::new(caller.platform_id, &caller.username, created_at);
            database.save_user(&user)?;
            Ok(user)
        }
    }
}

/// The member roster keyed by lowercased username, for resolving tags.
async fn member_index<D: Database>(
    group: &Group,
    database: &Arc<Mutex<D>>,
) -> Result<HashMap<String, User>, DatabaseError> {
    let members = database.lock().await.list_members(group.group_id)?;
    Ok(members
        .into_iter()
        .map(|user| (user.username.to_lowercase(), user))
        .collect())
}

/// The member roster keyed by user id, for rendering.
async fn member_directory<D: Database>(
    group: &Group,
    database: &Arc<Mutex<D>>,
) -> Result<HashMap<Uuid, User>, DatabaseError> {
    let members = database.lock().await.list_members(group.group_id)?;
    Ok(members.into_iter().map(|user| (user.uuid, user)).collect())
}
