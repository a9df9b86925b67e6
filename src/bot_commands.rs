//! Definition of Telegram bot commands and handlers.
//!
//! Commands that need more input than fits on the command line (the
//! expense text, the group name, ...) move the dialogue into an
//! awaiting state and read the answer from the next message. Any
//! command aborts a pending conversation, and pending conversations
//! expire after a while.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use teloxide::{
    dispatching::{
        dialogue::{self, InMemStorage},
        UpdateHandler,
    },
    prelude::*,
    types::ParseMode,
    utils::command::BotCommands,
};
use tokio::sync::Mutex;

use crate::database::sqlite::SqliteDatabase;
use crate::endpoints::{self, Caller, DELETE_CONFIRMATION};
use crate::error::BotError;

const DIALOGUE_TTL_MINUTES: i64 = 15;

const WELCOME_MESSAGE: &str = "\
Hi! I split group expenses and keep track of who owes whom.
Use /create_group to bind a group to this chat, /join_group to enter it and \
/add_expense to record what you paid. /help lists every command.";

const GROUP_NAME_PROMPT: &str = "What should the group be called? Reply with a name.";

const EXPENSE_PROMPT: &str = "\
Reply with the expense, one item per line:
[expense name]
[expense amount]
@[username] [share (optional)]";

const ON_BEHALF_PROMPT: &str = "\
Reply with the payer on the first line, then the expense:
@[payer]
[expense name]
[expense amount]
@[username] [share (optional)]";

const SETTLE_PROMPT: &str = "Reply with the members you paid back, like: @username1 @username2";

const EXPIRED_MESSAGE: &str = "That conversation has expired. Send the command again to retry.";

#[derive(Clone, Default)]
pub enum State {
    #[default]
    Idle,
    AwaitingGroupName {
        since: DateTime<Utc>,
    },
    AwaitingExpenseText {
        on_behalf: bool,
        since: DateTime<Utc>,
    },
    AwaitingSettleTargets {
        since: DateTime<Utc>,
    },
    AwaitingDeleteConfirmation {
        since: DateTime<Utc>,
    },
}

#[derive(BotCommands, Clone)]
#[command(
    rename_rule = "snake_case",
    description = "This bot splits group expenses and keeps track of who owes whom. Supported commands:"
)]
enum Command {
    #[command(description = "say hello and explain the basics.")]
    Start,
    #[command(description = "show this message.")]
    Help,
    #[command(description = "create a group bound to this chat; format: /create_group name")]
    CreateGroup(String),
    #[command(description = "join the group of this chat.")]
    JoinGroup,
    #[command(description = "leave the group; your balances are cleared, not settled.")]
    LeaveGroup,
    #[command(description = "delete the group with its whole history; asks for confirmation.")]
    DeleteGroup(String),
    #[command(description = "list the members of the group.")]
    ViewUsers,
    #[command(description = "record an expense you paid.")]
    AddExpense(String),
    #[command(description = "record an expense paid by someone else; the first line tags the payer.")]
    AddExpenseOnBehalf(String),
    #[command(description = "delete the most recent expense.")]
    DeleteLatestExpense,
    #[command(description = "show all recorded expenses.")]
    ShowExpenses,
    #[command(description = "show who owes whom, simplified.")]
    ShowDebts,
    #[command(description = "settle everything you owe the tagged members; format: /settle_debt @username")]
    SettleDebt(String),
    #[command(description = "delete the most recent settlement.")]
    DeleteLatestSettlement,
    #[command(description = "show all recorded settlements.")]
    ShowSettlements,
    #[command(description = "toggle the periodic debt reminder for this group.")]
    ToggleReminders,
    #[command(description = "cancel the pending operation.")]
    Cancel,
}

type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

// We would like to take this as a parameter of dialogue_handler, but in Rust
// you cannot pass a type as a runtime parameter, so it is a type alias
// instead. If main registers a different store type in the dependency map,
// message handling will panic at runtime.
type DatabaseInUse = Arc<Mutex<SqliteDatabase>>;

type BotDialogue = Dialogue<State, InMemStorage<State>>;

pub fn dialogue_handler() -> UpdateHandler<Box<dyn std::error::Error + Send + Sync + 'static>> {
    use dptree::case;

    let message_handler = Update::filter_message()
        .branch(teloxide::filter_command::<Command, _>().endpoint(handle_command))
        .branch(case![State::AwaitingGroupName { since }].endpoint(receive_group_name))
        .branch(
            case![State::AwaitingExpenseText { on_behalf, since }].endpoint(receive_expense_text),
        )
        .branch(case![State::AwaitingSettleTargets { since }].endpoint(receive_settle_targets))
        .branch(
            case![State::AwaitingDeleteConfirmation { since }]
                .endpoint(receive_delete_confirmation),
        );

    dialogue::enter::<Update, InMemStorage<State>, State, _>().branch(message_handler)
}

async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    dialogue: BotDialogue,
    database: DatabaseInUse,
) -> HandlerResult {
    // Any command aborts a pending conversation.
    dialogue.update(State::Idle).await?;

    let result = match cmd {
        Command::Start => send(&bot, &msg, WELCOME_MESSAGE).await.map_err(Into::into),
        Command::Help => send(&bot, &msg, &Command::descriptions().to_string())
            .await
            .map_err(Into::into),
        Command::CreateGroup(name) => {
            if name.trim().is_empty() {
                start_awaiting(
                    &bot,
                    &msg,
                    &dialogue,
                    GROUP_NAME_PROMPT,
                    State::AwaitingGroupName { since: msg.date },
                )
                .await
            } else {
                run_create_group(&bot, &msg, &database, &name).await
            }
        }
        Command::JoinGroup => run_join_group(&bot, &msg, &database).await,
        Command::LeaveGroup => run_leave_group(&bot, &msg, &database).await,
        Command::DeleteGroup(confirmation) => {
            if confirmation.trim().is_empty() {
                let prompt = format!(
                    "This deletes the group with its whole history. \
                     Reply \"{DELETE_CONFIRMATION}\" to confirm."
                );
                start_awaiting(
                    &bot,
                    &msg,
                    &dialogue,
                    &prompt,
                    State::AwaitingDeleteConfirmation { since: msg.date },
                )
                .await
            } else {
                run_delete_group(&bot, &msg, &database, &confirmation).await
            }
        }
        Command::ViewUsers => run_view_users(&bot, &msg, &database).await,
        Command::AddExpense(text) => {
            if text.trim().is_empty() {
                start_awaiting(
                    &bot,
                    &msg,
                    &dialogue,
                    EXPENSE_PROMPT,
                    State::AwaitingExpenseText {
                        on_behalf: false,
                        since: msg.date,
                    },
                )
                .await
            } else {
                run_add_expense(&bot, &msg, &database, false, &text).await
            }
        }
        Command::AddExpenseOnBehalf(text) => {
            if text.trim().is_empty() {
                start_awaiting(
                    &bot,
                    &msg,
                    &dialogue,
                    ON_BEHALF_PROMPT,
                    State::AwaitingExpenseText {
                        on_behalf: true,
                        since: msg.date,
                    },
                )
                .await
            } else {
                run_add_expense(&bot, &msg, &database, true, &text).await
            }
        }
        Command::DeleteLatestExpense => run_delete_latest_expense(&bot, &msg, &database).await,
        Command::ShowExpenses => run_show_expenses(&bot, &msg, &database).await,
        Command::ShowDebts => run_show_debts(&bot, &msg, &database).await,
        Command::SettleDebt(targets) => {
            if targets.trim().is_empty() {
                start_awaiting(
                    &bot,
                    &msg,
                    &dialogue,
                    SETTLE_PROMPT,
                    State::AwaitingSettleTargets { since: msg.date },
                )
                .await
            } else {
                run_settle_debts(&bot, &msg, &database, &targets).await
            }
        }
        Command::DeleteLatestSettlement => {
            run_delete_latest_settlement(&bot, &msg, &database).await
        }
        Command::ShowSettlements => run_show_settlements(&bot, &msg, &database).await,
        Command::ToggleReminders => run_toggle_reminders(&bot, &msg, &database).await,
        Command::Cancel => send(&bot, &msg, "Operation cancelled.")
            .await
            .map_err(Into::into),
    };

    report_errors(&bot, &msg, result).await
}

async fn receive_group_name(
    bot: Bot,
    msg: Message,
    dialogue: BotDialogue,
    since: DateTime<Utc>,
    database: DatabaseInUse,
) -> HandlerResult {
    dialogue.exit().await?;
    if conversation_expired(&msg, since) {
        return send(&bot, &msg, EXPIRED_MESSAGE).await.map_err(Into::into);
    }

    let result: HandlerResult = async {
        let name = message_text(&msg)?.to_string();
        run_create_group(&bot, &msg, &database, &name).await
    }
    .await;
    report_errors(&bot, &msg, result).await
}

async fn receive_expense_text(
    bot: Bot,
    msg: Message,
    dialogue: BotDialogue,
    (on_behalf, since): (bool, DateTime<Utc>),
    database: DatabaseInUse,
) -> HandlerResult {
    dialogue.exit().await?;
    if conversation_expired(&msg, since) {
        return send(&bot, &msg, EXPIRED_MESSAGE).await.map_err(Into::into);
    }

    let result: HandlerResult = async {
        let text = message_text(&msg)?.to_string();
        run_add_expense(&bot, &msg, &database, on_behalf, &text).await
    }
    .await;
    report_errors(&bot, &msg, result).await
}

async fn receive_settle_targets(
    bot: Bot,
    msg: Message,
    dialogue: BotDialogue,
    since: DateTime<Utc>,
    database: DatabaseInUse,
) -> HandlerResult {
    dialogue.exit().await?;
    if conversation_expired(&msg, since) {
        return send(&bot, &msg, EXPIRED_MESSAGE).await.map_err(Into::into);
    }

    let result: HandlerResult = async {
        let targets = message_text(&msg)?.to_string();
        run_settle_debts(&bot, &msg, &database, &targets).await
    }
    .await;
    report_errors(&bot, &msg, result).await
}

async fn receive_delete_confirmation(
    bot: Bot,
    msg: Message,
    dialogue: BotDialogue,
    since: DateTime<Utc>,
    database: DatabaseInUse,
) -> HandlerResult {
    dialogue.exit().await?;
    if conversation_expired(&msg, since) {
        return send(&bot, &msg, EXPIRED_MESSAGE).await.map_err(Into::into);
    }

    let result: HandlerResult = async {
        let confirmation = message_text(&msg)?.to_string();
        run_delete_group(&bot, &msg, &database, &confirmation).await
    }
    .await;
    report_errors(&bot, &msg, result).await
}

async fn run_create_group(
    bot: &Bot,
    msg: &Message,
    database: &DatabaseInUse,
    name: &str,
) -> HandlerResult {
    let caller = caller_identity(msg)?;
    let reply =
        endpoints::handle_create_group(msg.chat.id.0, &caller, name, database, msg.date).await?;
    send(bot, msg, &reply).await?;
    Ok(())
}

async fn run_join_group(bot: &Bot, msg: &Message, database: &DatabaseInUse) -> HandlerResult {
    let caller = caller_identity(msg)?;
    let reply = endpoints::handle_join_group(msg.chat.id.0, &caller, database, msg.date).await?;
    send(bot, msg, &reply).await?;
    Ok(())
}

async fn run_leave_group(bot: &Bot, msg: &Message, database: &DatabaseInUse) -> HandlerResult {
    let caller = caller_identity(msg)?;
    let reply = endpoints::handle_leave_group(msg.chat.id.0, &caller, database).await?;
    send(bot, msg, &reply).await?;
    Ok(())
}

async fn run_delete_group(
    bot: &Bot,
    msg: &Message,
    database: &DatabaseInUse,
    confirmation: &str,
) -> HandlerResult {
    let reply = endpoints::handle_delete_group(msg.chat.id.0, confirmation, database).await?;
    send(bot, msg, &reply).await?;
    Ok(())
}

async fn run_view_users(bot: &Bot, msg: &Message, database: &DatabaseInUse) -> HandlerResult {
    let reply = endpoints::handle_view_users(msg.chat.id.0, database).await?;
    send(bot, msg, &reply).await?;
    Ok(())
}

async fn run_add_expense(
    bot: &Bot,
    msg: &Message,
    database: &DatabaseInUse,
    on_behalf: bool,
    text: &str,
) -> HandlerResult {
    let caller = caller_identity(msg)?;
    let reply = if on_behalf {
        endpoints::handle_add_expense_on_behalf(msg.chat.id.0, &caller, text, database, msg.date)
            .await?
    } else {
        endpoints::handle_add_expense(msg.chat.id.0, &caller, text, database, msg.date).await?
    };
    send(bot, msg, &reply).await?;
    Ok(())
}

async fn run_delete_latest_expense(
    bot: &Bot,
    msg: &Message,
    database: &DatabaseInUse,
) -> HandlerResult {
    let reply = endpoints::handle_delete_latest_expense(msg.chat.id.0, database).await?;
    send(bot, msg, &reply).await?;
    Ok(())
}

async fn run_show_expenses(bot: &Bot, msg: &Message, database: &DatabaseInUse) -> HandlerResult {
    let reply = endpoints::handle_show_expenses(msg.chat.id.0, database).await?;
    send_markdown(bot, msg, &reply).await?;
    Ok(())
}

async fn run_show_debts(bot: &Bot, msg: &Message, database: &DatabaseInUse) -> HandlerResult {
    let reply = endpoints::handle_show_debts(msg.chat.id.0, database).await?;
    send(bot, msg, &reply).await?;
    Ok(())
}

async fn run_settle_debts(
    bot: &Bot,
    msg: &Message,
    database: &DatabaseInUse,
    targets: &str,
) -> HandlerResult {
    let caller = caller_identity(msg)?;
    let reply =
        endpoints::handle_settle_debts(msg.chat.id.0, &caller, targets, database, msg.date)
            .await?;
    send(bot, msg, &reply).await?;
    Ok(())
}

async fn run_delete_latest_settlement(
    bot: &Bot,
    msg: &Message,
    database: &DatabaseInUse,
) -> HandlerResult {
    let reply = endpoints::handle_delete_latest_settlement(msg.chat.id.0, database).await?;
    send(bot, msg, &reply).await?;
    Ok(())
}

async fn run_show_settlements(
    bot: &Bot,
    msg: &Message,
    database: &DatabaseInUse,
) -> HandlerResult {
    let reply = endpoints::handle_show_settlements(msg.chat.id.0, database).await?;
    send_markdown(bot, msg, &reply).await?;
    Ok(())
}

async fn run_toggle_reminders(bot: &Bot, msg: &Message, database: &DatabaseInUse) -> HandlerResult {
    let reply = endpoints::handle_toggle_reminders(msg.chat.id.0, database).await?;
    send(bot, msg, &reply).await?;
    Ok(())
}

async fn start_awaiting(
    bot: &Bot,
    msg: &Message,
    dialogue: &BotDialogue,
    prompt: &str,
    state: State,
) -> HandlerResult {
    send(bot, msg, prompt).await?;
    dialogue.update(state).await?;
    Ok(())
}

/// Send the error back to the chat as the reply, then hand it to the
/// dispatcher for logging.
async fn report_errors(bot: &Bot, msg: &Message, result: HandlerResult) -> HandlerResult {
    if let Err(e) = &result {
        bot.send_message(msg.chat.id, format!("{e}"))
            .await
            .map_err(|e| BotError::telegram("cannot send error message", e))?;
    }
    result
}

fn conversation_expired(msg: &Message, since: DateTime<Utc>) -> bool {
    msg.date.signed_duration_since(since) > Duration::minutes(DIALOGUE_TTL_MINUTES)
}

fn caller_identity(msg: &Message) -> Result<Caller, BotError> {
    let user = msg.from().ok_or_else(|| {
        BotError::new(
            "message has no sender".to_string(),
            "cannot tell who sent this message".to_string(),
        )
    })?;
    let username = user
        .username
        .clone()
        .unwrap_or_else(|| user.first_name.clone());
    Ok(Caller {
        platform_id: user.id.0 as i64,
        username,
    })
}

fn message_text(msg: &Message) -> Result<&str, BotError> {
    msg.text().ok_or_else(|| {
        BotError::new(
            "message has no text".to_string(),
            "this message has no text to read".to_string(),
        )
    })
}

async fn send(bot: &Bot, msg: &Message, text: &str) -> Result<(), BotError> {
    bot.send_message(msg.chat.id, text)
        .await
        .map_err(|e| BotError::telegram("cannot send message", e))?;
    Ok(())
}

async fn send_markdown(bot: &Bot, msg: &Message, text: &str) -> Result<(), BotError> {
    bot.send_message(msg.chat.id, text)
        .parse_mode(ParseMode::MarkdownV2)
        .await
        .map_err(|e| BotError::telegram("cannot send message", e))?;
    Ok(())
}
