use crate::{cmd::print_json, settings::Settings, Result};
use anyhow::bail;

#[derive(Debug, clap::Args)]
pub struct Cmd {
    #[command(subcommand)]
    cmd: ScheduleCmd,
}

impl Cmd {
    pub async fn run(&self, settings: &Settings) -> Result {
        self.cmd.run(settings).await
    }
}

#[derive(Debug, clap::Subcommand)]
pub enum ScheduleCmd {
    List(List),
    Set(Set),
}

impl ScheduleCmd {
    pub async fn run(&self, settings: &Settings) -> Result {
        match self {
            Self::List(cmd) => cmd.run(settings).await,
            Self::Set(cmd) => cmd.run(settings).await,
        }
    }
}

/// Show the daily slot schedule
#[derive(Debug, clap::Args)]
pub struct List {}

impl List {
    pub async fn run(&self, settings: &Settings) -> Result {
        let db = settings.database.connect().await?;
        print_json(&store::schedule::all(&db).await?)
    }
}

/// Move a slot to a new start time
#[derive(Debug, clap::Args)]
pub struct Set {
    /// Slot to move: morning, noon or evening
    pub slot: store::Slot,
    /// Hour of day in the reference timezone
    pub hour: u32,
    /// Minute of the hour
    pub minute: u32,
}

impl Set {
    pub async fn run(&self, settings: &Settings) -> Result {
        if self.hour > 23 || self.minute > 59 {
            bail!("hour must be 0-23 and minute 0-59");
        }
        let db = settings.database.connect().await?;
        store::schedule::set(&db, self.slot, self.hour, self.minute).await?;
        print_json(&store::schedule::all(&db).await?)
    }
}
