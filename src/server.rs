use crate::{
    api::{self, ApiState},
    jobs::{broadcast::Broadcaster, collect::Collector, Registry},
    messenger::Messenger,
    promo::{PromoHandle, Scheduler},
    settings::Settings,
    Error, Result,
};
use std::sync::Arc;
use tokio_graceful_shutdown::{SubsystemBuilder, Toplevel};

pub async fn run(settings: Settings) -> Result {
    let addr = settings.api.listen_addr()?;
    let db = settings.database.connect().await?;
    let client: Arc<dyn Messenger> = Arc::new(settings.discord.client()?);
    let registry = Registry::new(settings.jobs.retention());
    let promo = PromoHandle::new();

    let collector = Collector::new(
        db.clone(),
        client.clone(),
        registry.clone(),
        settings.collect.clone(),
    );
    let broadcaster = Broadcaster::new(
        db.clone(),
        client.clone(),
        registry.clone(),
        settings.broadcast.clone(),
    );
    let scheduler = Scheduler::new(
        db.clone(),
        client.clone(),
        promo.clone(),
        settings.promo.clone(),
    )?;

    let state = ApiState {
        db,
        registry,
        collector,
        broadcaster,
        promo,
        client,
        source_guild: settings.promo.source_guild,
        promo_offset: settings.promo.offset()?,
        export_dir: settings.collect.export_dir.clone(),
    };

    Toplevel::new(move |top_level| async move {
        top_level.start(SubsystemBuilder::new("promo", {
            move |handle| scheduler.run(handle)
        }));
        top_level.start(SubsystemBuilder::new("api", {
            move |handle| api::subsystem(addr, state, handle)
        }));
    })
    .catch_signals()
    .handle_shutdown_requests(tokio::time::Duration::from_secs(5))
    .await
    .map_err(Error::from)
}
