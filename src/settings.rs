use crate::Result;
use anyhow::{anyhow, Context};
use chrono::FixedOffset;
use config::{Config, Environment, File};
use serde::Deserialize;
use sqlx::SqlitePool;
use std::{net::SocketAddr, ops::RangeInclusive, path::Path, path::PathBuf, time::Duration};

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    #[serde(default = "default_log")]
    pub log: String,
    #[serde(default)]
    pub database: DatabaseSettings,
    pub discord: DiscordSettings,
    #[serde(default)]
    pub api: ApiSettings,
    #[serde(default)]
    pub collect: CollectSettings,
    #[serde(default)]
    pub jobs: JobSettings,
    #[serde(default)]
    pub broadcast: BroadcastSettings,
    #[serde(default)]
    pub promo: PromoSettings,
}

impl Settings {
    /// Settings are loaded from the file at the given path, with GUILDCAST__
    /// environment overrides applied on top.
    pub fn new(path: &Path) -> Result<Self> {
        let mut settings: Self = Config::builder()
            // Source settings file
            .add_source(File::with_name(path.to_str().expect("file name")).required(false))
            .add_source(Environment::with_prefix("GUILDCAST").separator("__"))
            .build()
            .and_then(|config| config.try_deserialize())?;
        settings.promo.normalize();
        Ok(settings)
    }
}

fn default_log() -> String {
    "guildcast=info,sqlx=warn".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseSettings {
    #[serde(default = "default_database_url")]
    pub url: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: default_database_url(),
        }
    }
}

impl DatabaseSettings {
    pub async fn connect(&self) -> Result<SqlitePool> {
        let pool = store::connect(&self.url).await.context("opening database")?;
        Ok(pool)
    }
}

fn default_database_url() -> String {
    "sqlite:guildcast.db".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct DiscordSettings {
    pub token: String,
}

impl DiscordSettings {
    pub fn client(&self) -> Result<discord::Client> {
        Ok(discord::client::from_bot_token(&self.token)?)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiSettings {
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

impl ApiSettings {
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen
            .parse()
            .with_context(|| format!("invalid listen address {}", self.listen))
    }
}

fn default_listen() -> String {
    "127.0.0.1:8200".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct CollectSettings {
    #[serde(default = "default_export_dir")]
    pub export_dir: PathBuf,
    /// Progress is flushed and a pause inserted every this many members.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_pause_secs")]
    pub chunk_pause_secs: f64,
}

impl Default for CollectSettings {
    fn default() -> Self {
        Self {
            export_dir: default_export_dir(),
            chunk_size: default_chunk_size(),
            chunk_pause_secs: default_chunk_pause_secs(),
        }
    }
}

impl CollectSettings {
    pub fn chunk_pause(&self) -> Duration {
        Duration::from_secs_f64(self.chunk_pause_secs.max(0.0))
    }
}

fn default_export_dir() -> PathBuf {
    PathBuf::from("exports")
}

fn default_chunk_size() -> usize {
    100
}

fn default_chunk_pause_secs() -> f64 {
    1.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct JobSettings {
    /// How long finished jobs stay visible to status polls.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            retention_secs: default_retention_secs(),
        }
    }
}

impl JobSettings {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

fn default_retention_secs() -> u64 {
    3600
}

#[derive(Debug, Deserialize, Clone)]
pub struct BroadcastSettings {
    /// Delay between consecutive sends, unless the submission overrides it.
    #[serde(default = "default_send_interval_secs")]
    pub interval_secs: f64,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_send_interval_secs(),
        }
    }
}

impl BroadcastSettings {
    pub fn interval(&self, override_secs: Option<f64>) -> Duration {
        Duration::from_secs_f64(override_secs.unwrap_or(self.interval_secs).max(0.0))
    }
}

fn default_send_interval_secs() -> f64 {
    1.5
}

#[derive(Debug, Deserialize, Clone)]
pub struct PromoSettings {
    #[serde(default = "default_poll_secs")]
    pub poll_secs: u64,
    #[serde(default = "default_min_delay_secs")]
    pub min_delay_secs: f64,
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: f64,
    /// Fixed offset from UTC used for day keys and slot windows.
    #[serde(default)]
    pub utc_offset_minutes: i32,
    #[serde(default = "default_flood_sleep_cap_secs")]
    pub flood_sleep_cap_secs: u64,
    /// Guild whose text channels seed the target catalog.
    #[serde(default)]
    pub source_guild: Option<u64>,
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,
}

impl Default for PromoSettings {
    fn default() -> Self {
        Self {
            poll_secs: default_poll_secs(),
            min_delay_secs: default_min_delay_secs(),
            max_delay_secs: default_max_delay_secs(),
            utc_offset_minutes: 0,
            flood_sleep_cap_secs: default_flood_sleep_cap_secs(),
            source_guild: None,
            sync_interval_secs: default_sync_interval_secs(),
        }
    }
}

impl PromoSettings {
    fn normalize(&mut self) {
        if self.max_delay_secs < self.min_delay_secs {
            self.max_delay_secs = self.min_delay_secs;
        }
    }

    pub fn poll(&self) -> Duration {
        Duration::from_secs(self.poll_secs.max(1))
    }

    pub fn delay_range(&self) -> RangeInclusive<f64> {
        self.min_delay_secs.max(0.0)..=self.max_delay_secs.max(0.0)
    }

    pub fn flood_cap(&self) -> Duration {
        Duration::from_secs(self.flood_sleep_cap_secs)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn offset(&self) -> Result<FixedOffset> {
        self.utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| anyhow!("utc_offset_minutes {} out of range", self.utc_offset_minutes))
    }
}

fn default_poll_secs() -> u64 {
    60
}

fn default_min_delay_secs() -> f64 {
    6.0
}

fn default_max_delay_secs() -> f64 {
    18.0
}

fn default_flood_sleep_cap_secs() -> u64 {
    120
}

fn default_sync_interval_secs() -> u64 {
    3600
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_range_is_normalized_upward() {
        let mut promo = PromoSettings {
            min_delay_secs: 10.0,
            max_delay_secs: 2.0,
            ..PromoSettings::default()
        };
        promo.normalize();
        assert_eq!(10.0..=10.0, promo.delay_range());
    }

    #[test]
    fn offset_rejects_out_of_range_minutes() {
        let promo = PromoSettings {
            utc_offset_minutes: 120,
            ..PromoSettings::default()
        };
        assert_eq!(2 * 3600, promo.offset().expect("offset").local_minus_utc());

        let bad = PromoSettings {
            utc_offset_minutes: 30_000,
            ..PromoSettings::default()
        };
        assert!(bad.offset().is_err());
    }
}
