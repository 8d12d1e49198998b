use crate::{outreach::DeliveryStatus, Error, Result, DB_INSERT_CHUNK_SIZE};
use chrono::{DateTime, Utc};
use futures::{stream, StreamExt, TryStreamExt};
use sqlx::{Sqlite, SqlitePool};
use std::collections::HashSet;

/// A membership row collected from the platform. `source_guild` records the
/// guild whose collection run first produced the row and is never
/// overwritten afterwards.
#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct Member {
    pub id: i64,
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub is_bot: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_guild: Option<i64>,
    pub added_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_contact_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_contact_status: Option<DeliveryStatus>,
}

pub const FETCH_MEMBER_QUERY: &str = r#"
    SELECT
        id,
        username,
        display_name,
        is_bot,
        source_guild,
        added_at,
        last_contact_at,
        last_contact_status
    FROM
        members
"#;

fn fetch_member_query<'builder>() -> sqlx::QueryBuilder<'builder, Sqlite> {
    sqlx::QueryBuilder::new(FETCH_MEMBER_QUERY)
}

/// The full identifier set, used to seed a collection run's novelty check.
pub async fn all_ids(pool: &SqlitePool) -> Result<HashSet<i64>> {
    let ids = sqlx::query_scalar::<_, i64>("SELECT id FROM members")
        .fetch_all(pool)
        .await?;
    Ok(ids.into_iter().collect())
}

pub async fn all(pool: &SqlitePool) -> Result<Vec<Member>> {
    let members = fetch_member_query()
        .push("ORDER BY added_at ASC, id ASC")
        .build_query_as::<Member>()
        .fetch_all(pool)
        .await?;
    Ok(members)
}

pub async fn recent(pool: &SqlitePool, limit: i64) -> Result<Vec<Member>> {
    let members = fetch_member_query()
        .push("ORDER BY added_at DESC, id DESC LIMIT ")
        .push_bind(limit)
        .build_query_as::<Member>()
        .fetch_all(pool)
        .await?;
    Ok(members)
}

/// Recipients eligible for a broadcast: members with no recorded outreach,
/// optionally scoped to one source guild, in collection order. Excluded
/// member categories are left in so the engine can count them as skipped.
pub async fn pending_recipients(
    pool: &SqlitePool,
    source_guild: Option<i64>,
    limit: Option<i64>,
) -> Result<Vec<Member>> {
    let mut builder = fetch_member_query();
    builder.push("WHERE last_contact_at IS NULL");
    if let Some(guild) = source_guild {
        builder.push(" AND source_guild = ").push_bind(guild);
    }
    builder.push(" ORDER BY added_at ASC, id ASC");
    if let Some(limit) = limit {
        builder.push(" LIMIT ").push_bind(limit);
    }
    let members = builder.build_query_as::<Member>().fetch_all(pool).await?;
    Ok(members)
}

/// Upsert a single collected member.
pub async fn upsert(pool: &SqlitePool, member: &Member) -> Result<u64> {
    upsert_many(pool, std::slice::from_ref(member)).await
}

/// Insert new members and refresh the display attributes of known ones.
/// Provenance, collection time and outreach stamps of existing rows are
/// preserved.
pub async fn upsert_many(pool: &SqlitePool, members: &[Member]) -> Result<u64> {
    if members.is_empty() {
        return Ok(0);
    }
    let affected: Vec<u64> = stream::iter(members)
        .chunks(DB_INSERT_CHUNK_SIZE)
        .map(Ok)
        .and_then(|chunk| async move {
            let result = sqlx::QueryBuilder::new(
                r#"INSERT INTO members (
                    id,
                    username,
                    display_name,
                    is_bot,
                    source_guild,
                    added_at
                ) "#,
            )
            .push_values(chunk, |mut b, member| {
                b.push_bind(member.id)
                    .push_bind(&member.username)
                    .push_bind(&member.display_name)
                    .push_bind(member.is_bot)
                    .push_bind(member.source_guild)
                    .push_bind(member.added_at);
            })
            .push(
                r#"ON CONFLICT(id) DO UPDATE SET
                username = excluded.username,
                display_name = excluded.display_name,
                is_bot = excluded.is_bot,
                source_guild = COALESCE(members.source_guild, excluded.source_guild)
            "#,
            )
            .build()
            .execute(pool)
            .await?;
            Ok::<u64, Error>(result.rows_affected())
        })
        .try_collect()
        .await?;
    Ok(affected.iter().sum())
}

/// Stamp a recipient's outreach outcome. At most one stamp per broadcast job
/// reaches any member because stamped members never match the pending
/// recipient filter again.
pub async fn mark_contact(
    pool: &SqlitePool,
    member_id: i64,
    status: DeliveryStatus,
    at: DateTime<Utc>,
) -> Result {
    sqlx::query("UPDATE members SET last_contact_at = ?, last_contact_status = ? WHERE id = ?")
        .bind(at)
        .bind(status)
        .bind(member_id)
        .execute(pool)
        .await?;
    Ok(())
}
