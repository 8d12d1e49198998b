use async_trait::async_trait;
use discord::{channels::Channel, guilds::Guild, members::GuildMember, messages::Message};

/// The platform calls the engines consume. The live client implements it by
/// delegation; tests script responses per method.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn guild(&self, guild_id: u64) -> discord::Result<Guild>;

    async fn guild_channels(&self, guild_id: u64) -> discord::Result<Vec<Channel>>;

    /// One page of members after the given id. The caller owns the cursor,
    /// so a failed fetch can be repeated at the same position.
    async fn members_after(
        &self,
        guild_id: u64,
        after: Option<u64>,
        limit: u16,
    ) -> discord::Result<Vec<GuildMember>>;

    async fn dm(&self, recipient_id: u64, text: &str) -> discord::Result<Message>;

    async fn post(&self, channel_id: u64, text: &str) -> discord::Result<Message>;
}

#[async_trait]
impl Messenger for discord::Client {
    async fn guild(&self, guild_id: u64) -> discord::Result<Guild> {
        discord::guilds::get(self, guild_id).await
    }

    async fn guild_channels(&self, guild_id: u64) -> discord::Result<Vec<Channel>> {
        discord::channels::for_guild(self, guild_id).await
    }

    async fn members_after(
        &self,
        guild_id: u64,
        after: Option<u64>,
        limit: u16,
    ) -> discord::Result<Vec<GuildMember>> {
        let query = discord::members::MembersQuery { limit, after };
        discord::members::list(self, guild_id, &query).await
    }

    async fn dm(&self, recipient_id: u64, text: &str) -> discord::Result<Message> {
        discord::messages::dm(self, recipient_id, text).await
    }

    async fn post(&self, channel_id: u64, text: &str) -> discord::Result<Message> {
        discord::messages::send(self, channel_id, text).await
    }
}

#[cfg(test)]
pub mod scripted {
    use super::*;
    use discord::members::User;
    use discord::{ApiErrorBody, RateLimitBody};
    use std::{collections::VecDeque, sync::Mutex};

    /// Scripted messenger for engine tests. Every call pops the next queued
    /// response for its method; an empty queue yields a default success.
    /// Calls are recorded so tests can assert on ordering and arguments.
    #[derive(Default)]
    pub struct ScriptedMessenger {
        pub guilds: Mutex<VecDeque<discord::Result<Guild>>>,
        pub channels: Mutex<VecDeque<discord::Result<Vec<Channel>>>>,
        pub pages: Mutex<VecDeque<discord::Result<Vec<GuildMember>>>>,
        pub dms: Mutex<VecDeque<discord::Result<Message>>>,
        pub posts: Mutex<VecDeque<discord::Result<Message>>>,
        pub page_cursors: Mutex<Vec<Option<u64>>>,
        pub dm_log: Mutex<Vec<(u64, String)>>,
        pub post_log: Mutex<Vec<(u64, String)>>,
    }

    impl ScriptedMessenger {
        pub fn queue_guild(&self, response: discord::Result<Guild>) {
            self.guilds.lock().unwrap().push_back(response);
        }

        pub fn queue_channels(&self, response: discord::Result<Vec<Channel>>) {
            self.channels.lock().unwrap().push_back(response);
        }

        pub fn queue_page(&self, response: discord::Result<Vec<GuildMember>>) {
            self.pages.lock().unwrap().push_back(response);
        }

        pub fn queue_dm(&self, response: discord::Result<Message>) {
            self.dms.lock().unwrap().push_back(response);
        }

        pub fn queue_post(&self, response: discord::Result<Message>) {
            self.posts.lock().unwrap().push_back(response);
        }

        pub fn dm_recipients(&self) -> Vec<u64> {
            self.dm_log.lock().unwrap().iter().map(|(id, _)| *id).collect()
        }

        pub fn post_channels(&self) -> Vec<u64> {
            self.post_log.lock().unwrap().iter().map(|(id, _)| *id).collect()
        }
    }

    #[async_trait]
    impl Messenger for ScriptedMessenger {
        async fn guild(&self, guild_id: u64) -> discord::Result<Guild> {
            self.guilds.lock().unwrap().pop_front().unwrap_or_else(|| {
                Ok(Guild {
                    id: guild_id,
                    name: format!("guild-{guild_id}"),
                    approximate_member_count: None,
                })
            })
        }

        async fn guild_channels(&self, _guild_id: u64) -> discord::Result<Vec<Channel>> {
            self.channels
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(vec![]))
        }

        async fn members_after(
            &self,
            _guild_id: u64,
            after: Option<u64>,
            _limit: u16,
        ) -> discord::Result<Vec<GuildMember>> {
            self.page_cursors.lock().unwrap().push(after);
            self.pages
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(vec![]))
        }

        async fn dm(&self, recipient_id: u64, text: &str) -> discord::Result<Message> {
            self.dm_log
                .lock()
                .unwrap()
                .push((recipient_id, text.to_string()));
            self.dms
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(receipt()))
        }

        async fn post(&self, channel_id: u64, text: &str) -> discord::Result<Message> {
            self.post_log
                .lock()
                .unwrap()
                .push((channel_id, text.to_string()));
            self.posts
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(receipt()))
        }
    }

    pub fn receipt() -> Message {
        Message {
            id: 1,
            channel_id: 1,
            timestamp: None,
        }
    }

    pub fn member(id: u64, username: &str, bot: bool) -> GuildMember {
        GuildMember {
            user: User {
                id,
                username: username.to_string(),
                global_name: None,
                bot,
            },
            nick: None,
            joined_at: None,
        }
    }

    pub fn rate_limited(secs: f64) -> discord::Error {
        discord::Error::rate_limited(RateLimitBody {
            message: "You are being rate limited.".to_string(),
            retry_after: secs,
            global: false,
        })
    }

    pub fn terminal() -> discord::Error {
        discord::Error::api(
            403,
            ApiErrorBody {
                code: 50007,
                message: "Cannot send messages to this user".to_string(),
            },
        )
    }
}
