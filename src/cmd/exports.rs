use crate::{cmd::print_json, export, settings::Settings, Result};
use serde_json::json;

#[derive(Debug, clap::Args)]
pub struct Cmd {
    #[command(subcommand)]
    cmd: ExportCmd,
}

impl Cmd {
    pub async fn run(&self, settings: &Settings) -> Result {
        self.cmd.run(settings).await
    }
}

#[derive(Debug, clap::Subcommand)]
pub enum ExportCmd {
    List(List),
    Clear(Clear),
}

impl ExportCmd {
    pub async fn run(&self, settings: &Settings) -> Result {
        match self {
            Self::List(cmd) => cmd.run(settings).await,
            Self::Clear(cmd) => cmd.run(settings).await,
        }
    }
}

/// List export files, newest first
#[derive(Debug, clap::Args)]
pub struct List {}

impl List {
    pub async fn run(&self, settings: &Settings) -> Result {
        print_json(&export::list(settings.collect.export_dir.clone()).await?)
    }
}

/// Delete all export files
#[derive(Debug, clap::Args)]
pub struct Clear {}

impl Clear {
    pub async fn run(&self, settings: &Settings) -> Result {
        let removed = export::clear(settings.collect.export_dir.clone()).await?;
        print_json(&json!({ "removed": removed }))
    }
}
