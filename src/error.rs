use teloxide::RequestError;
use thiserror::Error;

/// Error for failures at the bot surface. The `message` is logged, the
/// `user_message` is what ends up in the chat.
#[derive(Error)]
#[error("An error occurred: {user_message}")]
pub struct BotError {
    message: String,
    user_message: String,
}

/// A problem with the text the user sent. The message is shown in the
/// chat as-is, so it names the offending token where possible.
#[derive(Error, Debug)]
pub enum InputError {
    #[error(
        "invalid expense format; reply with:\n\
             [expense name]\n[expense amount]\n@[username] [share (optional)]"
    )]
    InvalidExpenseFormat,

    #[error("the expense name cannot be empty")]
    DescriptionNotProvided,

    #[error("invalid amount `{0}`: expected a positive number like 25 or 25.50")]
    InvalidAmount(String),

    #[error("amount `{0}` is too large: amounts must stay below 100000000")]
    AmountTooLarge(String),

    #[error("`{0}` is not a member of this group")]
    MemberNotFound(String),

    #[error("`@{0}` is tagged more than once")]
    DuplicateTag(String),

    #[error("the tagged shares add up to {tagged}, which exceeds the expense total {total}")]
    TaggedAmountExceedsTotal { tagged: String, total: String },

    #[error("no members tagged; reply like: @username1 @username2")]
    SettleTargetsNotProvided,

    #[error("missing payer: the first line must tag the payer, like @username")]
    PayerNotProvided,

    #[error("missing group name; reply with a non-empty name")]
    GroupNameNotProvided,
}

impl InputError {
    pub fn invalid_expense_format() -> Self {
        InputError::InvalidExpenseFormat
    }

    pub fn description_not_provided() -> Self {
        InputError::DescriptionNotProvided
    }

    pub fn invalid_amount(amount: String) -> Self {
        InputError::InvalidAmount(amount)
    }

    pub fn amount_too_large(amount: String) -> Self {
        InputError::AmountTooLarge(amount)
    }

    pub fn member_not_found(handle: String) -> Self {
        InputError::MemberNotFound(handle)
    }

    pub fn duplicate_tag(handle: String) -> Self {
        InputError::DuplicateTag(handle)
    }

    pub fn tagged_amount_exceeds_total(tagged: String, total: String) -> Self {
        InputError::TaggedAmountExceedsTotal { tagged, total }
    }

    pub fn settle_targets_not_provided() -> Self {
        InputError::SettleTargetsNotProvided
    }

    pub fn payer_not_provided() -> Self {
        InputError::PayerNotProvided
    }

    pub fn group_name_not_provided() -> Self {
        InputError::GroupNameNotProvided
    }
}

/// A command that cannot proceed given the current ledger state.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("no group is bound to this chat yet; use /create_group first")]
    NoGroupInChat,

    #[error("the group `{0}` already exists in this chat; delete it before creating a new one")]
    GroupAlreadyExists(String),

    #[error("you are not in the group; use /join_group first")]
    NotInGroup,

    #[error("there is no {0} to delete in this group")]
    NothingToReverse(&'static str),

    #[error("no outstanding debt from {from} to {to} covers this settlement")]
    InvalidSettlement { from: String, to: String },
}

impl LedgerError {
    pub fn invalid_settlement(from: &str, to: &str) -> Self {
        LedgerError::InvalidSettlement {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

/// Error returned by the store. The cause keeps the underlying driver
/// error for the logs.
#[derive(Error, Debug)]
#[error("{message}: {cause}")]
pub struct DatabaseError {
    message: String,
    cause: anyhow::Error,
}

impl DatabaseError {
    pub fn new<T: AsRef<str>>(message: T, cause: anyhow::Error) -> Self {
        DatabaseError {
            message: message.as_ref().to_string(),
            cause,
        }
    }
}

impl BotError {
    pub fn new(message: String, user_message: String) -> Self {
        BotError {
            message,
            user_message,
        }
    }

    pub fn telegram(message: &str, e: RequestError) -> Self {
        let message = format!("{message}: {e}");
        let user_message =
            "cannot communicate with Telegram server, please try again later".to_string();
        BotError {
            message,
            user_message,
        }
    }
}

impl std::fmt::Debug for BotError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}
