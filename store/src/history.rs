//! Durable promo dispatch history. One row per send attempt; the partial
//! unique index on (day_key, slot, target_id) where status = 'sent' is what
//! makes redelivery impossible across restarts.

use crate::{Result, Slot};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::collections::HashSet;

/// Outcome of one promo send attempt.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, serde::Serialize, serde::Deserialize,
)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PromoOutcome {
    Sent,
    Failed,
    FloodWait,
}

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct PromoRecord {
    pub id: i64,
    pub day_key: String,
    pub slot: Slot,
    pub target_id: i64,
    pub message_id: Option<i64>,
    pub status: PromoOutcome,
    pub error: Option<String>,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
pub struct NewRecord<'a> {
    pub day_key: &'a str,
    pub slot: Slot,
    pub target_id: i64,
    pub message_id: Option<i64>,
    pub status: PromoOutcome,
    pub error: Option<&'a str>,
    pub sent_at: DateTime<Utc>,
}

/// Append one attempt row. Returns whether a row was written; a duplicate
/// `sent` for the same (day, slot, target) is silently dropped by the
/// partial unique index and reported as `false`.
pub async fn append(pool: &SqlitePool, record: NewRecord<'_>) -> Result<bool> {
    let result = sqlx::query(
        r#"INSERT INTO promo_history (day_key, slot, target_id, message_id, status, error, sent_at)
           VALUES (?, ?, ?, ?, ?, ?, ?)
           ON CONFLICT DO NOTHING"#,
    )
    .bind(record.day_key)
    .bind(record.slot)
    .bind(record.target_id)
    .bind(record.message_id)
    .bind(record.status)
    .bind(record.error)
    .bind(record.sent_at)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Targets already attempted for a (day, slot). Flood-wait rows are audit
/// trail only; the target stays pending until a sent or failed row lands.
pub async fn attempted_target_ids(
    pool: &SqlitePool,
    day_key: &str,
    slot: Slot,
) -> Result<HashSet<i64>> {
    let ids = sqlx::query_scalar::<_, i64>(
        r#"SELECT DISTINCT target_id FROM promo_history
           WHERE day_key = ? AND slot = ? AND status != 'flood_wait'"#,
    )
    .bind(day_key)
    .bind(slot)
    .fetch_all(pool)
    .await?;
    Ok(ids.into_iter().collect())
}

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct SlotStat {
    pub slot: Slot,
    pub sent: i64,
    pub failed: i64,
    pub flood_wait: i64,
}

/// Per-slot outcome tallies for one day.
pub async fn slot_counts(pool: &SqlitePool, day_key: &str) -> Result<Vec<SlotStat>> {
    let stats = sqlx::query_as::<_, SlotStat>(
        r#"SELECT
               slot,
               SUM(status = 'sent') AS sent,
               SUM(status = 'failed') AS failed,
               SUM(status = 'flood_wait') AS flood_wait
           FROM promo_history
           WHERE day_key = ?
           GROUP BY slot
           ORDER BY slot ASC"#,
    )
    .bind(day_key)
    .fetch_all(pool)
    .await?;
    Ok(stats)
}

/// Most recent attempt rows for one day, newest first.
pub async fn for_day(pool: &SqlitePool, day_key: &str) -> Result<Vec<PromoRecord>> {
    let records = sqlx::query_as::<_, PromoRecord>(
        r#"SELECT id, day_key, slot, target_id, message_id, status, error, sent_at
           FROM promo_history
           WHERE day_key = ?
           ORDER BY id DESC"#,
    )
    .bind(day_key)
    .fetch_all(pool)
    .await?;
    Ok(records)
}
