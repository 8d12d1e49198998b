use clap::Parser;
use guildcast::{
    cmd::{exports, members, messages, schedule, serve, targets},
    settings::Settings,
    Result,
};
use std::{path::PathBuf, process};

#[derive(Debug, Parser)]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(name = env!("CARGO_BIN_NAME"))]
pub struct Cli {
    #[command(subcommand)]
    cmd: Cmd,

    /// Configuration file to use
    #[arg(short = 'c', default_value = "settings.toml")]
    config: PathBuf,
}

#[derive(Debug, clap::Subcommand)]
pub enum Cmd {
    Serve(serve::Cmd),
    Members(members::Cmd),
    Targets(targets::Cmd),
    Messages(messages::Cmd),
    Schedule(schedule::Cmd),
    Exports(exports::Cmd),
}

#[tokio::main]
async fn main() -> Result {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("error: {:?}", e);
        process::exit(1);
    }

    Ok(())
}

async fn run(cli: Cli) -> Result {
    let settings = Settings::new(&cli.config)?;

    tracing_subscriber::fmt()
        .with_env_filter(&settings.log)
        .init();

    match cli.cmd {
        Cmd::Serve(cmd) => cmd.run(&settings).await,
        Cmd::Members(cmd) => cmd.run(&settings).await,
        Cmd::Targets(cmd) => cmd.run(&settings).await,
        Cmd::Messages(cmd) => cmd.run(&settings).await,
        Cmd::Schedule(cmd) => cmd.run(&settings).await,
        Cmd::Exports(cmd) => cmd.run(&settings).await,
    }
}
