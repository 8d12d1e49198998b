use crate::{Error, Result};
use sqlx::SqlitePool;
use std::{fmt, str::FromStr};

/// The named recurring slots of a promo day.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type, serde::Serialize, serde::Deserialize,
)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Slot {
    Morning,
    Noon,
    Evening,
}

impl Slot {
    pub const ALL: [Slot; 3] = [Slot::Morning, Slot::Noon, Slot::Evening];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Morning => "morning",
            Self::Noon => "noon",
            Self::Evening => "evening",
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Slot {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "morning" => Ok(Self::Morning),
            "noon" => Ok(Self::Noon),
            "evening" => Ok(Self::Evening),
            other => Err(Error::UnknownSlot(other.to_string())),
        }
    }
}

/// Configured start time of one slot, in the scheduler's reference timezone.
#[derive(Debug, Clone, Copy, sqlx::FromRow, serde::Serialize)]
pub struct SlotTime {
    pub slot: Slot,
    pub hour: u32,
    pub minute: u32,
}

/// All configured slots in start-time order.
pub async fn all(pool: &SqlitePool) -> Result<Vec<SlotTime>> {
    let slots = sqlx::query_as::<_, SlotTime>(
        "SELECT slot, hour, minute FROM promo_schedule ORDER BY hour ASC, minute ASC",
    )
    .fetch_all(pool)
    .await?;
    Ok(slots)
}

pub async fn set(pool: &SqlitePool, slot: Slot, hour: u32, minute: u32) -> Result {
    sqlx::query(
        r#"INSERT INTO promo_schedule (slot, hour, minute)
           VALUES (?, ?, ?)
           ON CONFLICT(slot) DO UPDATE SET hour = excluded.hour, minute = excluded.minute"#,
    )
    .bind(slot)
    .bind(hour)
    .bind(minute)
    .execute(pool)
    .await?;
    Ok(())
}

const DEFAULT_TIMES: [(Slot, u32, u32); 3] = [
    (Slot::Morning, 9, 0),
    (Slot::Noon, 13, 0),
    (Slot::Evening, 18, 0),
];

/// Seed the default slot times without touching operator edits.
pub async fn seed_defaults(pool: &SqlitePool) -> Result {
    for (slot, hour, minute) in DEFAULT_TIMES {
        sqlx::query(
            "INSERT INTO promo_schedule (slot, hour, minute) VALUES (?, ?, ?) ON CONFLICT(slot) DO NOTHING",
        )
        .bind(slot)
        .bind(hour)
        .bind(minute)
        .execute(pool)
        .await?;
    }
    Ok(())
}
