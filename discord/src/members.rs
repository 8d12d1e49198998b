use crate::{snowflake, Client, Result, MEMBERS_PAGE_LIMIT};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fetch one page of guild members ordered by ascending user id.
///
/// The listing is keyset paginated: pass the highest user id already seen as
/// `after` to fetch the next page. The caller owns the cursor, so a failed
/// page fetch can be repeated at the same position.
pub async fn list(client: &Client, guild_id: u64, query: &MembersQuery) -> Result<Vec<GuildMember>> {
    client
        .fetch(&format!("/guilds/{guild_id}/members"), query)
        .await
}

#[derive(Debug, Clone, Serialize)]
pub struct MembersQuery {
    pub limit: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<u64>,
}

impl Default for MembersQuery {
    fn default() -> Self {
        Self {
            limit: MEMBERS_PAGE_LIMIT,
            after: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    #[serde(with = "snowflake")]
    pub id: u64,
    pub username: String,
    #[serde(default)]
    pub global_name: Option<String>,
    #[serde(default)]
    pub bot: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuildMember {
    pub user: User,
    #[serde(default)]
    pub nick: Option<String>,
    #[serde(default)]
    pub joined_at: Option<DateTime<Utc>>,
}

impl GuildMember {
    /// Preferred human readable name: guild nickname, then the account's
    /// display name.
    pub fn display_name(&self) -> Option<&str> {
        self.nick.as_deref().or(self.user.global_name.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_decodes_string_ids() {
        let member: GuildMember = serde_json::from_str(
            r#"{
                "user": {"id": "80351110224678912", "username": "nelly", "global_name": "Nelly"},
                "nick": "nels",
                "joined_at": "2021-05-31T19:15:39.954000+00:00"
            }"#,
        )
        .expect("member");
        assert_eq!(80351110224678912, member.user.id);
        assert!(!member.user.bot);
        assert_eq!(Some("nels"), member.display_name());
    }

    #[test]
    fn query_omits_unset_cursor() {
        let query = MembersQuery {
            limit: 100,
            after: None,
        };
        let value = serde_json::to_value(&query).expect("query");
        assert_eq!(serde_json::json!({"limit": 100}), value);
    }
}
