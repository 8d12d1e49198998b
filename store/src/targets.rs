use crate::{history::PromoOutcome, Result};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

/// A promo target: a platform channel promos are posted to. Rows are never
/// hard-deleted by synchronization so their dispatch history stays
/// attributable; they are disabled instead.
#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct Target {
    pub id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub enabled: bool,
    pub added_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sent_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_status: Option<PromoOutcome>,
}

const FETCH_TARGET_QUERY: &str = r#"
    SELECT id, title, enabled, added_at, last_sent_at, last_status
    FROM promo_targets
"#;

pub async fn all(pool: &SqlitePool) -> Result<Vec<Target>> {
    let targets =
        sqlx::query_as::<_, Target>(&format!("{FETCH_TARGET_QUERY} ORDER BY added_at ASC, id ASC"))
            .fetch_all(pool)
            .await?;
    Ok(targets)
}

pub async fn enabled(pool: &SqlitePool) -> Result<Vec<Target>> {
    let targets = sqlx::query_as::<_, Target>(&format!(
        "{FETCH_TARGET_QUERY} WHERE enabled = 1 ORDER BY added_at ASC, id ASC"
    ))
    .fetch_all(pool)
    .await?;
    Ok(targets)
}

/// Add a target by hand. Re-adding a known channel refreshes its title and
/// re-enables it.
pub async fn add(pool: &SqlitePool, id: i64, title: Option<&str>) -> Result {
    sqlx::query(
        r#"INSERT INTO promo_targets (id, title, enabled, added_at)
           VALUES (?, ?, 1, ?)
           ON CONFLICT(id) DO UPDATE SET title = excluded.title, enabled = 1"#,
    )
    .bind(id)
    .bind(title)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn remove(pool: &SqlitePool, id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM promo_targets WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn set_enabled(pool: &SqlitePool, id: i64, enabled: bool) -> Result<bool> {
    let result = sqlx::query("UPDATE promo_targets SET enabled = ? WHERE id = ?")
        .bind(enabled)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Stamp a target after a delivered promo.
pub async fn mark_sent(pool: &SqlitePool, id: i64, at: DateTime<Utc>) -> Result {
    sqlx::query("UPDATE promo_targets SET last_sent_at = ?, last_status = 'sent' WHERE id = ?")
        .bind(at)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

#[derive(Debug, Default, Clone, Copy, serde::Serialize)]
pub struct ReconcileStats {
    pub inserted: u64,
    pub disabled: u64,
}

impl ReconcileStats {
    pub fn changed(&self) -> bool {
        self.inserted > 0 || self.disabled > 0
    }
}

/// Reconcile the catalog against the channel set observed on the platform.
/// Unknown channels are inserted enabled, known rows keep their flag, and
/// rows whose channel is gone are disabled. An unchanged observed set writes
/// nothing.
pub async fn reconcile(pool: &SqlitePool, observed: &[(i64, Option<String>)]) -> Result<ReconcileStats> {
    let mut tx = pool.begin().await?;
    let mut stats = ReconcileStats::default();

    if observed.is_empty() {
        let result = sqlx::query("UPDATE promo_targets SET enabled = 0 WHERE enabled = 1")
            .execute(&mut *tx)
            .await?;
        stats.disabled = result.rows_affected();
        tx.commit().await?;
        return Ok(stats);
    }

    let now = Utc::now();
    let result = sqlx::QueryBuilder::new("INSERT INTO promo_targets (id, title, enabled, added_at) ")
        .push_values(observed, |mut b, (id, title)| {
            b.push_bind(id).push_bind(title).push_bind(1).push_bind(now);
        })
        .push("ON CONFLICT(id) DO NOTHING")
        .build()
        .execute(&mut *tx)
        .await?;
    stats.inserted = result.rows_affected();

    let mut builder =
        sqlx::QueryBuilder::new("UPDATE promo_targets SET enabled = 0 WHERE enabled = 1 AND id NOT IN (");
    let mut separated = builder.separated(", ");
    for (id, _) in observed {
        separated.push_bind(id);
    }
    separated.push_unseparated(")");
    let result = builder.build().execute(&mut *tx).await?;
    stats.disabled = result.rows_affected();

    tx.commit().await?;
    Ok(stats)
}

#[derive(Debug, sqlx::FromRow, serde::Serialize)]
pub struct CatalogCounts {
    pub total: i64,
    pub enabled: i64,
}

pub async fn counts(pool: &SqlitePool) -> Result<CatalogCounts> {
    let counts = sqlx::query_as::<_, CatalogCounts>(
        "SELECT COUNT(*) AS total, COALESCE(SUM(enabled), 0) AS enabled FROM promo_targets",
    )
    .fetch_one(pool)
    .await?;
    Ok(counts)
}
