use crate::{cmd::print_json, export, settings::Settings, Result};
use std::path::PathBuf;

#[derive(Debug, clap::Args)]
pub struct Cmd {
    #[command(subcommand)]
    cmd: MemberCmd,
}

impl Cmd {
    pub async fn run(&self, settings: &Settings) -> Result {
        self.cmd.run(settings).await
    }
}

#[derive(Debug, clap::Subcommand)]
pub enum MemberCmd {
    List(List),
    Export(Export),
}

impl MemberCmd {
    pub async fn run(&self, settings: &Settings) -> Result {
        match self {
            Self::List(cmd) => cmd.run(settings).await,
            Self::Export(cmd) => cmd.run(settings).await,
        }
    }
}

/// List the most recently collected members
#[derive(Debug, clap::Args)]
pub struct List {
    /// Number of members to list
    #[arg(long, default_value_t = 50)]
    pub limit: i64,
}

impl List {
    pub async fn run(&self, settings: &Settings) -> Result {
        let db = settings.database.connect().await?;
        let members = store::members::recent(&db, self.limit).await?;
        print_json(&members)
    }
}

/// Export every stored member to a csv file
#[derive(Debug, clap::Args)]
pub struct Export {
    /// Output file
    #[arg(long, default_value = "members.csv")]
    pub out: PathBuf,
}

impl Export {
    pub async fn run(&self, settings: &Settings) -> Result {
        let db = settings.database.connect().await?;
        let members = store::members::all(&db).await?;
        let rows: Vec<export::ExportRow> = members.iter().map(export::ExportRow::from).collect();
        export::write_csv(&self.out, &rows)?;
        print_json(&serde_json::json!({
            "file": self.out.display().to_string(),
            "rows": rows.len(),
        }))
    }
}
