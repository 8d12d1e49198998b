use crate::{cmd::print_json, settings::Settings, Result};
use anyhow::bail;
use serde_json::json;

#[derive(Debug, clap::Args)]
pub struct Cmd {
    #[command(subcommand)]
    cmd: MessageCmd,
}

impl Cmd {
    pub async fn run(&self, settings: &Settings) -> Result {
        self.cmd.run(settings).await
    }
}

#[derive(Debug, clap::Subcommand)]
pub enum MessageCmd {
    List(List),
    Add(Add),
    Remove(Remove),
    Enable(Enable),
    Disable(Disable),
}

impl MessageCmd {
    pub async fn run(&self, settings: &Settings) -> Result {
        match self {
            Self::List(cmd) => cmd.run(settings).await,
            Self::Add(cmd) => cmd.run(settings).await,
            Self::Remove(cmd) => cmd.run(settings).await,
            Self::Enable(cmd) => cmd.run(settings).await,
            Self::Disable(cmd) => cmd.run(settings).await,
        }
    }
}

/// List the promo message variants
#[derive(Debug, clap::Args)]
pub struct List {}

impl List {
    pub async fn run(&self, settings: &Settings) -> Result {
        let db = settings.database.connect().await?;
        print_json(&store::messages::all(&db).await?)
    }
}

/// Add a promo message variant
#[derive(Debug, clap::Args)]
pub struct Add {
    /// Message text
    pub body: String,
}

impl Add {
    pub async fn run(&self, settings: &Settings) -> Result {
        let body = self.body.trim();
        if body.is_empty() {
            bail!("message body must not be empty");
        }
        let db = settings.database.connect().await?;
        let id = store::messages::add(&db, body).await?;
        print_json(&json!({ "id": id }))
    }
}

/// Remove a promo message variant
#[derive(Debug, clap::Args)]
pub struct Remove {
    /// Message id
    pub id: i64,
}

impl Remove {
    pub async fn run(&self, settings: &Settings) -> Result {
        let db = settings.database.connect().await?;
        if !store::messages::remove(&db, self.id).await? {
            bail!("no message {}", self.id);
        }
        print_json(&json!({ "removed": self.id }))
    }
}

/// Put a message variant back into rotation
#[derive(Debug, clap::Args)]
pub struct Enable {
    /// Message id
    pub id: i64,
}

impl Enable {
    pub async fn run(&self, settings: &Settings) -> Result {
        set_enabled(settings, self.id, true).await
    }
}

/// Take a message variant out of rotation
#[derive(Debug, clap::Args)]
pub struct Disable {
    /// Message id
    pub id: i64,
}

impl Disable {
    pub async fn run(&self, settings: &Settings) -> Result {
        set_enabled(settings, self.id, false).await
    }
}

async fn set_enabled(settings: &Settings, id: i64, enabled: bool) -> Result {
    let db = settings.database.connect().await?;
    if !store::messages::set_enabled(&db, id, enabled).await? {
        bail!("no message {id}");
    }
    print_json(&json!({ "id": id, "enabled": enabled }))
}
