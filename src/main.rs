use std::sync::Arc;

use log::{error, info};
use log4rs::{
    append::rolling_file::{
        policy::compound::{
            roll::fixed_window::FixedWindowRoller, trigger::size::SizeTrigger, CompoundPolicy,
        },
        RollingFileAppender,
    },
    config::{Appender, Config, Root},
    encode::pattern::PatternEncoder,
};
use teloxide::dispatching::dialogue::InMemStorage;
use teloxide::prelude::*;
use teloxide::types::MessageId;
use tokio::{
    sync::Mutex,
    time::{interval, Duration},
};

mod bot_commands;
mod database;
mod endpoints;
mod error;
mod formatter;
mod ledger;
mod parser;
mod simplifier;
mod types;
mod validator;

use crate::bot_commands::{dialogue_handler, State};
use crate::database::sqlite::SqliteDatabase;
use crate::database::Database;

const DATABASE_PATH: &str = "divvy.db";
const REMINDER_INTERVAL_SECS: u64 = 24 * 60 * 60;

#[tokio::main]
async fn main() {
    init_log();

    info!("Initializing database...");
    let database = SqliteDatabase::new(DATABASE_PATH)
        .map_err(|e| error!("Cannot initialize database: {}", e))
        .expect("Cannot initialize database");

    let database = Arc::new(Mutex::new(database));

    info!("Starting expense bot...");

    let bot = Bot::from_env();

    spawn_reminder_task(bot.clone(), database.clone());

    Dispatcher::builder(bot, dialogue_handler())
        .dependencies(dptree::deps![InMemStorage::<State>::new(), database])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

/// Periodically push the rendered debt notice of every reminder-enabled
/// group to its chat. Failures are logged per group so one broken chat
/// does not silence the others.
fn spawn_reminder_task(bot: Bot, database: Arc<Mutex<SqliteDatabase>>) {
    tokio::spawn(async move {
        let mut interval = interval(Duration::from_secs(REMINDER_INTERVAL_SECS));

        loop {
            interval.tick().await;

            match endpoints::compute_reminders(&database).await {
                Ok(reminders) => {
                    for reminder in reminders {
                        if let Err(e) = deliver_reminder(&bot, &database, &reminder).await {
                            error!("Cannot deliver reminder to chat {}: {e}", reminder.chat_id);
                        }
                    }
                }
                Err(e) => error!("Cannot compute reminders: {e}"),
            }
        }
    });
}

/// Edit the previous notice message in place when one is on record,
/// otherwise send a fresh message and remember its id.
async fn deliver_reminder(
    bot: &Bot,
    database: &Arc<Mutex<SqliteDatabase>>,
    reminder: &endpoints::Reminder,
) -> anyhow::Result<()> {
    let chat_id = ChatId(reminder.chat_id);

    if let Some(message_id) = reminder.notice_message_id {
        let edited = bot
            .edit_message_text(chat_id, MessageId(message_id), reminder.text.as_str())
            .await;
        if edited.is_ok() {
            return Ok(());
        }
        // The stored notice may have been deleted by hand; fall through
        // and send a fresh one.
    }

    let sent = bot.send_message(chat_id, reminder.text.as_str()).await?;
    database
        .lock()
        .await
        .set_notice_message(reminder.group_id, Some(sent.id.0))?;
    Ok(())
}

fn init_log() {
    // Roll the log file when it exceeds 10 MB, keeping up to 2 backups.
    let size_trigger = SizeTrigger::new(10 * 1024 * 1024);

    let fixed_window_roller = FixedWindowRoller::builder()
        .build("log/divvy.{}.log", 2)
        .expect("[init log] Cannot create fixed window roller");

    let compound_policy =
        CompoundPolicy::new(Box::new(size_trigger), Box::new(fixed_window_roller));

    let rolling_file_appender = RollingFileAppender::builder()
        .encoder(Box::new(PatternEncoder::new("{d} - {l} - {m}{n}")))
        .build("log/divvy.log", Box::new(compound_policy))
        .expect("[init log] Cannot create rolling file appender");

    let config = Config::builder()
        .appender(Appender::builder().build("rolling_file", Box::new(rolling_file_appender)))
        .build(
            Root::builder()
                .appender("rolling_file")
                .build(log::LevelFilter::Info),
        )
        .expect("[init log] Cannot build config");

    log4rs::init_config(config).expect("[init log] Cannot init log4rs");
}
