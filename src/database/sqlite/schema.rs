const CREATE_USER_TABLE: &str = "CREATE TABLE IF NOT EXISTS user (
  uuid BLOB PRIMARY KEY,
  platform_id INTEGER NOT NULL UNIQUE,
  username TEXT NOT NULL,
  currency TEXT NOT NULL,
  created_at DATETIME NOT NULL
)";

const CREATE_GROUP_TABLE: &str = "CREATE TABLE IF NOT EXISTS expense_group (
  group_id BLOB PRIMARY KEY,
  chat_id INTEGER NOT NULL UNIQUE,
  name TEXT NOT NULL,
  created_by BLOB NOT NULL,
  reminders BOOL NOT NULL DEFAULT 0,
  notice_message_id INTEGER,
  created_at DATETIME NOT NULL
)";

const CREATE_GROUP_MEMBER_TABLE: &str = "CREATE TABLE IF NOT EXISTS group_member (
  group_id BLOB NOT NULL,
  user_uuid BLOB NOT NULL,
  joined_at DATETIME NOT NULL,
  UNIQUE(group_id, user_uuid)
)";

const CREATE_EXPENSE_TABLE: &str = "CREATE TABLE IF NOT EXISTS expense (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  group_id BLOB NOT NULL,
  paid_by BLOB NOT NULL,
  amount INTEGER NOT NULL,
  description TEXT NOT NULL,
  created_at DATETIME NOT NULL
)";

const CREATE_EXPENSE_SPLIT_TABLE: &str = "CREATE TABLE IF NOT EXISTS expense_split (
  expense_id INTEGER NOT NULL,
  user_uuid BLOB NOT NULL,
  amount INTEGER NOT NULL,
  UNIQUE(expense_id, user_uuid)
)";

const CREATE_DEBT_TABLE: &str = "CREATE TABLE IF NOT EXISTS debt (
  group_id BLOB NOT NULL,
  user_uuid BLOB NOT NULL,
  opp_user_uuid BLOB NOT NULL,
  amount_owed INTEGER NOT NULL DEFAULT 0,
  UNIQUE(group_id, user_uuid, opp_user_uuid)
)";

const CREATE_SETTLEMENT_TABLE: &str = "CREATE TABLE IF NOT EXISTS settlement (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  group_id BLOB NOT NULL,
  from_user BLOB NOT NULL,
  to_user BLOB NOT NULL,
  amount INTEGER NOT NULL,
  created_at DATETIME NOT NULL
)";

pub fn create_all_tables(connection: &rusqlite::Connection) -> anyhow::Result<()> {
    connection.execute(CREATE_USER_TABLE, ())?;
    connection.execute(CREATE_GROUP_TABLE, ())?;
    connection.execute(CREATE_GROUP_MEMBER_TABLE, ())?;
    connection.execute(CREATE_EXPENSE_TABLE, ())?;
    connection.execute(CREATE_EXPENSE_SPLIT_TABLE, ())?;
    connection.execute(CREATE_DEBT_TABLE, ())?;
    connection.execute(CREATE_SETTLEMENT_TABLE, ())?;
    Ok(())
}
