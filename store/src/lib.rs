use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    SqlitePool,
};
use std::{str::FromStr, time::Duration};

mod error;
pub use error::{Error, Result};

pub mod history;
pub mod members;
pub mod messages;
pub mod outreach;
pub mod schedule;
pub mod targets;

pub use schedule::Slot;

pub(crate) const DB_INSERT_CHUNK_SIZE: usize = 500;

/// Open the store, creating the database file and schema as needed.
///
/// The pool is capped at a single connection: sqlite allows one writer at a
/// time and the engines, the scheduler and the API all write, so statements
/// queue on the pool instead of surfacing busy errors.
pub async fn connect(url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(30));
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;
    migrate(&pool).await?;
    Ok(pool)
}

async fn migrate(pool: &SqlitePool) -> Result {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    schedule::seed_defaults(pool).await?;
    Ok(())
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS members (
        id INTEGER PRIMARY KEY,
        username TEXT NOT NULL,
        display_name TEXT,
        is_bot INTEGER NOT NULL DEFAULT 0,
        source_guild INTEGER,
        added_at TEXT NOT NULL,
        last_contact_at TEXT,
        last_contact_status TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_members_last_contact ON members(last_contact_at)",
    r#"
    CREATE TABLE IF NOT EXISTS outreach_log (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        job_id TEXT NOT NULL,
        member_id INTEGER NOT NULL,
        username TEXT NOT NULL,
        status TEXT NOT NULL,
        error TEXT,
        sent_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_outreach_job ON outreach_log(job_id)",
    "CREATE INDEX IF NOT EXISTS idx_outreach_sent_at ON outreach_log(sent_at)",
    r#"
    CREATE TABLE IF NOT EXISTS promo_targets (
        id INTEGER PRIMARY KEY,
        title TEXT,
        enabled INTEGER NOT NULL DEFAULT 1,
        added_at TEXT NOT NULL,
        last_sent_at TEXT,
        last_status TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS promo_messages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        body TEXT NOT NULL,
        enabled INTEGER NOT NULL DEFAULT 1,
        added_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS promo_schedule (
        slot TEXT PRIMARY KEY,
        hour INTEGER NOT NULL,
        minute INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS promo_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        day_key TEXT NOT NULL,
        slot TEXT NOT NULL,
        target_id INTEGER NOT NULL,
        message_id INTEGER,
        status TEXT NOT NULL,
        error TEXT,
        sent_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_promo_history_day_slot ON promo_history(day_key, slot)",
    // At most one delivered promo per target per slot per day, enforced by
    // the store itself rather than scheduler bookkeeping.
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_promo_history_sent_once
        ON promo_history(day_key, slot, target_id) WHERE status = 'sent'
    "#,
];

#[cfg(test)]
pub(crate) async fn test_pool() -> SqlitePool {
    connect("sqlite::memory:").await.expect("memory store")
}
