use crate::{snowflake, Client, Result, NO_QUERY};
use serde::{Deserialize, Serialize};

pub const CHANNEL_GUILD_TEXT: u8 = 0;
pub const CHANNEL_GUILD_ANNOUNCEMENT: u8 = 5;

/// List all channels of a guild. The endpoint is not paginated.
pub async fn for_guild(client: &Client, guild_id: u64) -> Result<Vec<Channel>> {
    client
        .fetch(&format!("/guilds/{guild_id}/channels"), NO_QUERY)
        .await
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    #[serde(with = "snowflake")]
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
    pub r#type: u8,
}

impl Channel {
    /// True for the channel kinds a message can be posted to directly.
    pub fn is_postable(&self) -> bool {
        matches!(self.r#type, CHANNEL_GUILD_TEXT | CHANNEL_GUILD_ANNOUNCEMENT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn voice_channels_are_not_postable() {
        let channels: Vec<Channel> = serde_json::from_str(
            r#"[
                {"id": "1", "name": "general", "type": 0},
                {"id": "2", "name": "town-hall", "type": 5},
                {"id": "3", "name": "voice", "type": 2}
            ]"#,
        )
        .expect("channels");
        let postable: Vec<u64> = channels
            .iter()
            .filter(|channel| channel.is_postable())
            .map(|channel| channel.id)
            .collect();
        assert_eq!(vec![1, 2], postable);
    }
}
