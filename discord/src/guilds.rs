use crate::{snowflake, Client, Result};
use serde::{Deserialize, Serialize};

/// Resolve a guild id to its profile, including the approximate member
/// count the platform maintains for it.
pub async fn get(client: &Client, guild_id: u64) -> Result<Guild> {
    client
        .fetch(
            &format!("/guilds/{guild_id}"),
            &[("with_counts", "true")],
        )
        .await
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Guild {
    #[serde(with = "snowflake")]
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub approximate_member_count: Option<u64>,
}
