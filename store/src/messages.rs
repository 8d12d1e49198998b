use crate::Result;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

/// A promo text variant. Dispatch picks randomly among the enabled rows.
#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct PromoMessage {
    pub id: i64,
    pub body: String,
    pub enabled: bool,
    pub added_at: DateTime<Utc>,
}

pub async fn all(pool: &SqlitePool) -> Result<Vec<PromoMessage>> {
    let messages = sqlx::query_as::<_, PromoMessage>(
        "SELECT id, body, enabled, added_at FROM promo_messages ORDER BY id ASC",
    )
    .fetch_all(pool)
    .await?;
    Ok(messages)
}

pub async fn enabled(pool: &SqlitePool) -> Result<Vec<PromoMessage>> {
    let messages = sqlx::query_as::<_, PromoMessage>(
        "SELECT id, body, enabled, added_at FROM promo_messages WHERE enabled = 1 ORDER BY id ASC",
    )
    .fetch_all(pool)
    .await?;
    Ok(messages)
}

pub async fn add(pool: &SqlitePool, body: &str) -> Result<i64> {
    let result = sqlx::query("INSERT INTO promo_messages (body, enabled, added_at) VALUES (?, 1, ?)")
        .bind(body)
        .bind(Utc::now())
        .execute(pool)
        .await?;
    Ok(result.last_insert_rowid())
}

pub async fn remove(pool: &SqlitePool, id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM promo_messages WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn set_enabled(pool: &SqlitePool, id: i64, enabled: bool) -> Result<bool> {
    let result = sqlx::query("UPDATE promo_messages SET enabled = ? WHERE id = ?")
        .bind(enabled)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn counts(pool: &SqlitePool) -> Result<crate::targets::CatalogCounts> {
    let counts = sqlx::query_as::<_, crate::targets::CatalogCounts>(
        "SELECT COUNT(*) AS total, COALESCE(SUM(enabled), 0) AS enabled FROM promo_messages",
    )
    .fetch_one(pool)
    .await?;
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn catalog_round_trip() {
        let pool = crate::test_pool().await;
        let first = add(&pool, "Visit us tonight!").await.expect("add");
        let second = add(&pool, "Weekend special").await.expect("add");
        set_enabled(&pool, second, false).await.expect("disable");

        let live = enabled(&pool).await.expect("enabled");
        assert_eq!(1, live.len());
        assert_eq!(first, live[0].id);

        let counts = counts(&pool).await.expect("counts");
        assert_eq!(2, counts.total);
        assert_eq!(1, counts.enabled);

        assert!(remove(&pool, second).await.expect("remove"));
        assert_eq!(1, all(&pool).await.expect("all").len());
    }
}
