use crate::Result;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

/// Outcome of a delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, serde::Serialize, serde::Deserialize)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Failed,
}

/// Append-only per-recipient log row of a broadcast job.
#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct Attempt {
    pub id: i64,
    pub job_id: String,
    pub member_id: i64,
    pub username: String,
    pub status: DeliveryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub sent_at: DateTime<Utc>,
}

pub struct NewAttempt<'a> {
    pub job_id: &'a str,
    pub member_id: i64,
    pub username: &'a str,
    pub status: DeliveryStatus,
    pub error: Option<&'a str>,
    pub sent_at: DateTime<Utc>,
}

pub async fn append(pool: &SqlitePool, attempt: &NewAttempt<'_>) -> Result {
    sqlx::query(
        r#"INSERT INTO outreach_log (job_id, member_id, username, status, error, sent_at)
           VALUES (?, ?, ?, ?, ?, ?)"#,
    )
    .bind(attempt.job_id)
    .bind(attempt.member_id)
    .bind(attempt.username)
    .bind(attempt.status)
    .bind(attempt.error)
    .bind(attempt.sent_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// Page through one job's log, newest attempts first.
pub async fn for_job(
    pool: &SqlitePool,
    job_id: &str,
    offset: i64,
    limit: i64,
) -> Result<Vec<Attempt>> {
    let attempts = sqlx::query_as::<_, Attempt>(
        r#"SELECT id, job_id, member_id, username, status, error, sent_at
           FROM outreach_log
           WHERE job_id = ?
           ORDER BY id DESC
           LIMIT ? OFFSET ?"#,
    )
    .bind(job_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;
    Ok(attempts)
}

#[derive(Debug, sqlx::FromRow, serde::Serialize)]
pub struct DailyStat {
    pub day: String,
    pub total: i64,
    pub sent: i64,
    pub failed: i64,
}

/// Per-day delivery counts over the trailing window, newest day first.
pub async fn daily_stats(pool: &SqlitePool, days: i64) -> Result<Vec<DailyStat>> {
    let since = Utc::now() - chrono::Duration::days(days.max(0));
    let stats = sqlx::query_as::<_, DailyStat>(
        r#"SELECT
               substr(sent_at, 1, 10) AS day,
               COUNT(*) AS total,
               SUM(status = 'sent') AS sent,
               SUM(status = 'failed') AS failed
           FROM outreach_log
           WHERE sent_at >= ?
           GROUP BY day
           ORDER BY day DESC"#,
    )
    .bind(since)
    .fetch_all(pool)
    .await?;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn append_simple(pool: &SqlitePool, job_id: &str, member_id: i64, status: DeliveryStatus) {
        append(
            pool,
            &NewAttempt {
                job_id,
                member_id,
                username: "user",
                status,
                error: matches!(status, DeliveryStatus::Failed).then_some("blocked"),
                sent_at: Utc::now(),
            },
        )
        .await
        .expect("append");
    }

    #[tokio::test]
    async fn paging_is_newest_first() {
        let pool = crate::test_pool().await;
        for member_id in 1..=5 {
            append_simple(&pool, "job-a", member_id, DeliveryStatus::Sent).await;
        }
        append_simple(&pool, "job-b", 9, DeliveryStatus::Failed).await;

        let page = for_job(&pool, "job-a", 0, 2).await.expect("page");
        let ids: Vec<i64> = page.iter().map(|a| a.member_id).collect();
        assert_eq!(vec![5, 4], ids);

        let rest = for_job(&pool, "job-a", 2, 10).await.expect("rest");
        assert_eq!(3, rest.len());
    }

    #[tokio::test]
    async fn daily_stats_sums_outcomes() {
        let pool = crate::test_pool().await;
        append_simple(&pool, "job-a", 1, DeliveryStatus::Sent).await;
        append_simple(&pool, "job-a", 2, DeliveryStatus::Sent).await;
        append_simple(&pool, "job-a", 3, DeliveryStatus::Failed).await;

        let stats = daily_stats(&pool, 7).await.expect("stats");
        assert_eq!(1, stats.len());
        assert_eq!(3, stats[0].total);
        assert_eq!(2, stats[0].sent);
        assert_eq!(1, stats[0].failed);
    }
}
