use crate::{server, settings::Settings, Result};

/// Run the API server and promo scheduler until interrupted
#[derive(Debug, clap::Args)]
pub struct Cmd {}

impl Cmd {
    pub async fn run(&self, settings: &Settings) -> Result {
        server::run(settings.clone()).await
    }
}
