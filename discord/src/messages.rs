use crate::{snowflake, Client, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Post a message to a channel the bot can write to.
pub async fn send(client: &Client, channel_id: u64, content: &str) -> Result<Message> {
    client
        .post(
            &format!("/channels/{channel_id}/messages"),
            &SendMessage { content },
        )
        .await
}

/// Open (or reuse) the direct message channel with a user.
pub async fn create_dm(client: &Client, recipient_id: u64) -> Result<DmChannel> {
    client.post("/users/@me/channels", &CreateDm { recipient_id }).await
}

/// Send a direct message to a user.
pub async fn dm(client: &Client, recipient_id: u64, content: &str) -> Result<Message> {
    let channel = create_dm(client, recipient_id).await?;
    send(client, channel.id, content).await
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct CreateDm {
    #[serde(with = "snowflake")]
    recipient_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DmChannel {
    #[serde(with = "snowflake")]
    pub id: u64,
}

/// Receipt for a delivered message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(with = "snowflake")]
    pub id: u64,
    #[serde(with = "snowflake")]
    pub channel_id: u64,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}
