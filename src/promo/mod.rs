use crate::{messenger::Messenger, settings::PromoSettings, Result};
use chrono::{FixedOffset, Utc};
use rand::Rng;
use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use store::{
    history::{NewRecord, PromoOutcome},
    Slot,
};
use tokio::sync::Notify;
use tokio_graceful_shutdown::SubsystemHandle;

pub mod slots;

/// Shared pause switch and wake signal for the scheduler. Starts paused;
/// nothing is posted until an operator resumes it.
pub struct PromoHandle {
    paused: AtomicBool,
    wake: Notify,
}

impl PromoHandle {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            paused: AtomicBool::new(true),
            wake: Notify::new(),
        })
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.wake.notify_one();
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Nudge the scheduler to run a tick ahead of its poll interval, for
    /// example after a catalog change.
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    async fn wait(&self, poll: Duration) {
        tokio::select! {
            _ = self.wake.notified() => {}
            _ = tokio::time::sleep(poll) => {}
        }
    }
}

/// Posts promo messages into the target channels on the configured slot
/// schedule. Durable history decides what is still owed for a slot, so a
/// restart or a missed wake never double-posts and never loses a slot that
/// opened while the process was down.
pub struct Scheduler {
    db: sqlx::SqlitePool,
    client: Arc<dyn Messenger>,
    handle: Arc<PromoHandle>,
    settings: PromoSettings,
    offset: FixedOffset,
    completed: HashSet<(String, Slot)>,
    last_sync: Option<Instant>,
}

impl Scheduler {
    pub fn new(
        db: sqlx::SqlitePool,
        client: Arc<dyn Messenger>,
        handle: Arc<PromoHandle>,
        settings: PromoSettings,
    ) -> Result<Self> {
        let offset = settings.offset()?;
        Ok(Self {
            db,
            client,
            handle,
            settings,
            offset,
            completed: HashSet::new(),
            last_sync: None,
        })
    }

    pub async fn run(mut self, subsys: SubsystemHandle) -> Result {
        tracing::info!(
            paused = self.handle.is_paused(),
            poll = self.settings.poll().as_secs(),
            "promo scheduler started"
        );
        loop {
            let handle = Arc::clone(&self.handle);
            let poll = self.settings.poll();
            tokio::select! {
                _ = subsys.on_shutdown_requested() => break,
                _ = async move { handle.wait(poll).await } => {
                    if let Err(err) = self.tick().await {
                        tracing::error!(?err, "promo tick failed");
                    }
                }
            }
        }
        tracing::info!("promo scheduler stopped");
        Ok(())
    }

    async fn tick(&mut self) -> Result {
        self.sync_targets_if_due().await;
        if self.handle.is_paused() {
            tracing::debug!("promo posting is paused");
            return Ok(());
        }

        let schedule = store::schedule::all(&self.db).await?;
        let now = Utc::now();
        let day = slots::day_key(now, self.offset);
        // Completion marks from previous days are stale by definition.
        self.completed.retain(|(key, _)| *key == day);

        for entry in slots::due(&schedule, now.with_timezone(&self.offset)) {
            if self.completed.contains(&(day.clone(), entry.slot)) {
                continue;
            }
            if self.handle.is_paused() {
                break;
            }
            self.dispatch(&day, entry.slot).await?;
        }
        Ok(())
    }

    /// One posting pass over the targets a slot still owes. The slot is
    /// marked complete only when the pass leaves nothing pending; a flood
    /// wait or a pause keeps it open for the next wake.
    async fn dispatch(&mut self, day: &str, slot: Slot) -> Result {
        let targets = store::targets::enabled(&self.db).await?;
        if targets.is_empty() {
            tracing::info!(%slot, "no enabled promo targets, skipping slot");
            return Ok(());
        }
        let messages = store::messages::enabled(&self.db).await?;
        if messages.is_empty() {
            tracing::warn!(%slot, "no enabled promo messages, skipping slot");
            return Ok(());
        }

        let attempted = store::history::attempted_target_ids(&self.db, day, slot).await?;
        let pending: Vec<_> = targets
            .into_iter()
            .filter(|target| !attempted.contains(&target.id))
            .collect();
        if pending.is_empty() {
            tracing::info!(%slot, day, "slot already covered");
            self.completed.insert((day.to_string(), slot));
            return Ok(());
        }

        tracing::info!(%slot, day, pending = pending.len(), "dispatching promo slot");
        let mut flood_hit = false;
        let mut paused_break = false;
        for target in &pending {
            if self.handle.is_paused() {
                paused_break = true;
                break;
            }

            let (index, delay_secs) = {
                let mut rng = rand::thread_rng();
                (
                    rng.gen_range(0..messages.len()),
                    rng.gen_range(self.settings.delay_range()),
                )
            };
            let message = &messages[index];

            match self.client.post(target.id as u64, &message.body).await {
                Ok(_) => {
                    let now = Utc::now();
                    let inserted = store::history::append(
                        &self.db,
                        NewRecord {
                            day_key: day,
                            slot,
                            target_id: target.id,
                            message_id: Some(message.id),
                            status: PromoOutcome::Sent,
                            error: None,
                            sent_at: now,
                        },
                    )
                    .await?;
                    if inserted {
                        store::targets::mark_sent(&self.db, target.id, now).await?;
                    }
                    tracing::info!(target = target.id, %slot, "promo posted");
                }
                Err(err) => match err.retry_after() {
                    Some(wait) => {
                        flood_hit = true;
                        let reason = err.to_string();
                        store::history::append(
                            &self.db,
                            NewRecord {
                                day_key: day,
                                slot,
                                target_id: target.id,
                                message_id: None,
                                status: PromoOutcome::FloodWait,
                                error: Some(&reason),
                                sent_at: Utc::now(),
                            },
                        )
                        .await?;
                        let sleep =
                            (wait + Duration::from_secs(1)).min(self.settings.flood_cap());
                        tracing::warn!(
                            target = target.id,
                            wait = wait.as_secs_f64(),
                            sleep = sleep.as_secs_f64(),
                            "rate limited while posting promo"
                        );
                        tokio::time::sleep(sleep).await;
                    }
                    None => {
                        let reason = err.to_string();
                        store::history::append(
                            &self.db,
                            NewRecord {
                                day_key: day,
                                slot,
                                target_id: target.id,
                                message_id: None,
                                status: PromoOutcome::Failed,
                                error: Some(&reason),
                                sent_at: Utc::now(),
                            },
                        )
                        .await?;
                        tracing::warn!(target = target.id, error = %reason, "promo post failed");
                    }
                },
            }

            tokio::time::sleep(Duration::from_secs_f64(delay_secs)).await;
        }

        if !flood_hit && !paused_break {
            self.completed.insert((day.to_string(), slot));
            tracing::info!(%slot, day, "promo slot completed");
        }
        Ok(())
    }

    async fn sync_targets_if_due(&mut self) {
        let Some(source_guild) = self.settings.source_guild else {
            return;
        };
        let due = self
            .last_sync
            .map_or(true, |at| at.elapsed() >= self.settings.sync_interval());
        if !due {
            return;
        }
        match sync_targets(&self.db, self.client.as_ref(), source_guild).await {
            Ok(stats) => {
                self.last_sync = Some(Instant::now());
                if stats.changed() {
                    tracing::info!(
                        inserted = stats.inserted,
                        disabled = stats.disabled,
                        "promo target catalog synchronized"
                    );
                }
            }
            Err(err) => tracing::warn!(?err, "promo target sync failed"),
        }
    }
}

/// Reconcile the target catalog against the postable channels of the source
/// guild. Channels that disappeared are disabled, never deleted.
pub async fn sync_targets(
    db: &sqlx::SqlitePool,
    client: &dyn Messenger,
    source_guild: u64,
) -> Result<store::targets::ReconcileStats> {
    let channels = client.guild_channels(source_guild).await?;
    let observed: Vec<(i64, Option<String>)> = channels
        .iter()
        .filter(|channel| channel.is_postable())
        .map(|channel| (channel.id as i64, channel.name.clone()))
        .collect();
    let stats = store::targets::reconcile(db, &observed).await?;
    Ok(stats)
}
