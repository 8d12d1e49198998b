use crate::{cmd::print_json, promo, settings::Settings, Result};
use anyhow::bail;
use serde_json::json;

#[derive(Debug, clap::Args)]
pub struct Cmd {
    #[command(subcommand)]
    cmd: TargetCmd,
}

impl Cmd {
    pub async fn run(&self, settings: &Settings) -> Result {
        self.cmd.run(settings).await
    }
}

#[derive(Debug, clap::Subcommand)]
pub enum TargetCmd {
    List(List),
    Add(Add),
    Remove(Remove),
    Enable(Enable),
    Disable(Disable),
    Sync(Sync),
}

impl TargetCmd {
    pub async fn run(&self, settings: &Settings) -> Result {
        match self {
            Self::List(cmd) => cmd.run(settings).await,
            Self::Add(cmd) => cmd.run(settings).await,
            Self::Remove(cmd) => cmd.run(settings).await,
            Self::Enable(cmd) => cmd.run(settings).await,
            Self::Disable(cmd) => cmd.run(settings).await,
            Self::Sync(cmd) => cmd.run(settings).await,
        }
    }
}

/// List the promo target catalog
#[derive(Debug, clap::Args)]
pub struct List {}

impl List {
    pub async fn run(&self, settings: &Settings) -> Result {
        let db = settings.database.connect().await?;
        print_json(&store::targets::all(&db).await?)
    }
}

/// Add a channel to the promo target catalog
#[derive(Debug, clap::Args)]
pub struct Add {
    /// Channel id
    pub id: u64,
    /// Display title for the channel
    #[arg(long)]
    pub title: Option<String>,
}

impl Add {
    pub async fn run(&self, settings: &Settings) -> Result {
        let db = settings.database.connect().await?;
        store::targets::add(&db, self.id as i64, self.title.as_deref()).await?;
        print_json(&json!({ "id": self.id }))
    }
}

/// Remove a channel from the promo target catalog
#[derive(Debug, clap::Args)]
pub struct Remove {
    /// Channel id
    pub id: i64,
}

impl Remove {
    pub async fn run(&self, settings: &Settings) -> Result {
        let db = settings.database.connect().await?;
        if !store::targets::remove(&db, self.id).await? {
            bail!("no target {}", self.id);
        }
        print_json(&json!({ "removed": self.id }))
    }
}

/// Enable promo posting to a target
#[derive(Debug, clap::Args)]
pub struct Enable {
    /// Channel id
    pub id: i64,
}

impl Enable {
    pub async fn run(&self, settings: &Settings) -> Result {
        set_enabled(settings, self.id, true).await
    }
}

/// Disable promo posting to a target
#[derive(Debug, clap::Args)]
pub struct Disable {
    /// Channel id
    pub id: i64,
}

impl Disable {
    pub async fn run(&self, settings: &Settings) -> Result {
        set_enabled(settings, self.id, false).await
    }
}

async fn set_enabled(settings: &Settings, id: i64, enabled: bool) -> Result {
    let db = settings.database.connect().await?;
    if !store::targets::set_enabled(&db, id, enabled).await? {
        bail!("no target {id}");
    }
    print_json(&json!({ "id": id, "enabled": enabled }))
}

/// Reconcile the catalog against the source guild's channel list
#[derive(Debug, clap::Args)]
pub struct Sync {
    /// Guild to read channels from, defaults to the configured source guild
    #[arg(long)]
    pub guild: Option<u64>,
}

impl Sync {
    pub async fn run(&self, settings: &Settings) -> Result {
        let Some(guild) = self.guild.or(settings.promo.source_guild) else {
            bail!("no promo source guild configured");
        };
        let db = settings.database.connect().await?;
        let client = settings.discord.client()?;
        let stats = promo::sync_targets(&db, &client, guild).await?;
        print_json(&stats)
    }
}
