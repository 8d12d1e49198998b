use crate::{
    export,
    jobs::{JobDetail, JobId, JobRecord, Registry},
    messenger::Messenger,
    settings::CollectSettings,
    Result,
};
use chrono::Utc;
use discord::MEMBERS_PAGE_LIMIT;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Runs member collections. A single permit serializes runs process-wide;
/// a second submission queues behind the active run.
#[derive(Clone)]
pub struct Collector {
    db: sqlx::SqlitePool,
    client: Arc<dyn Messenger>,
    registry: Arc<Registry>,
    settings: CollectSettings,
    permit: Arc<Mutex<()>>,
}

impl Collector {
    pub fn new(
        db: sqlx::SqlitePool,
        client: Arc<dyn Messenger>,
        registry: Arc<Registry>,
        settings: CollectSettings,
    ) -> Self {
        Self {
            db,
            client,
            registry,
            settings,
            permit: Arc::new(Mutex::new(())),
        }
    }

    /// Submit a collection of the given guild. The returned record is the
    /// job's initial state; the run continues in a spawned task.
    pub async fn submit(&self, guild_id: u64) -> JobRecord {
        self.registry.evict_finished().await;
        let record = self.registry.create(JobDetail::collect(guild_id)).await;
        let job_id = record.id.clone();
        let collector = self.clone();
        tokio::spawn(async move {
            collector.run(&job_id, guild_id).await;
        });
        record
    }

    #[tracing::instrument(skip_all, fields(job = %job_id, guild = guild_id))]
    async fn run(&self, job_id: &JobId, guild_id: u64) {
        let _permit = self.permit.lock().await;
        if let Err(err) = self.execute(job_id, guild_id).await {
            tracing::error!(?err, "collection failed");
            self.registry
                .update(job_id, |record| record.fail(&err))
                .await;
        }
    }

    async fn execute(&self, job_id: &JobId, guild_id: u64) -> Result {
        let guild = match self.resolve(job_id, guild_id).await? {
            Some(guild) => guild,
            None => return self.finish_cancelled(job_id).await,
        };
        self.registry
            .update(job_id, |record| {
                if let JobDetail::Collect { guild_name, .. } = &mut record.detail {
                    *guild_name = Some(guild.name.clone());
                }
            })
            .await;
        tracing::info!(name = guild.name, "collection started");

        let mut known = store::members::all_ids(&self.db).await?;
        let mut novel: Vec<store::members::Member> = Vec::new();
        let mut processed: u64 = 0;
        let mut cursor: Option<u64> = None;
        let mut since_flush = 0usize;

        loop {
            let page = match self.fetch_page(job_id, guild_id, cursor).await? {
                Some(page) => page,
                None => return self.finish_cancelled(job_id).await,
            };
            if page.is_empty() {
                break;
            }
            let full_page = page.len() == MEMBERS_PAGE_LIMIT as usize;
            cursor = page.last().map(|member| member.user.id);

            for member in &page {
                if self.registry.cancel_requested(job_id).await {
                    self.flush_progress(job_id, processed, novel.len()).await;
                    return self.finish_cancelled(job_id).await;
                }
                processed += 1;
                if known.insert(member.user.id as i64) {
                    let row = to_member(member, guild_id);
                    store::members::upsert(&self.db, &row).await?;
                    novel.push(row);
                }
                since_flush += 1;
                if since_flush >= self.settings.chunk_size.max(1) {
                    since_flush = 0;
                    self.flush_progress(job_id, processed, novel.len()).await;
                    tokio::time::sleep(self.settings.chunk_pause()).await;
                }
            }

            if !full_page {
                break;
            }
        }

        let rows = novel.iter().map(export::ExportRow::from).collect();
        let path = export::write_members(
            self.settings.export_dir.clone(),
            guild.name.clone(),
            guild_id,
            rows,
        )
        .await?;

        let total = novel.len() as u64;
        self.registry
            .update(job_id, |record| {
                record.processed = processed;
                record.total = total;
                if let JobDetail::Collect { export_path, .. } = &mut record.detail {
                    *export_path = Some(path.display().to_string());
                }
                record.complete();
            })
            .await;
        tracing::info!(processed, novel = total, "collection completed");
        Ok(())
    }

    /// Resolve the guild profile, honoring mandated waits. `None` means a
    /// cancellation request arrived while waiting.
    async fn resolve(
        &self,
        job_id: &JobId,
        guild_id: u64,
    ) -> Result<Option<discord::guilds::Guild>> {
        loop {
            if self.registry.cancel_requested(job_id).await {
                return Ok(None);
            }
            match self.client.guild(guild_id).await {
                Ok(guild) => return Ok(Some(guild)),
                Err(err) => match err.retry_after() {
                    Some(wait) => {
                        tracing::info!(wait = wait.as_secs_f64(), "rate limited resolving guild");
                        tokio::time::sleep(wait).await;
                    }
                    None => return Err(err.into()),
                },
            }
        }
    }

    /// Fetch one member page at the current cursor. A mandated wait sleeps
    /// and re-fetches the same position; `None` means cancellation arrived
    /// during a wait.
    async fn fetch_page(
        &self,
        job_id: &JobId,
        guild_id: u64,
        cursor: Option<u64>,
    ) -> Result<Option<Vec<discord::members::GuildMember>>> {
        loop {
            match self
                .client
                .members_after(guild_id, cursor, MEMBERS_PAGE_LIMIT)
                .await
            {
                Ok(page) => return Ok(Some(page)),
                Err(err) => match err.retry_after() {
                    Some(wait) => {
                        tracing::info!(wait = wait.as_secs_f64(), "rate limited listing members");
                        tokio::time::sleep(wait).await;
                        if self.registry.cancel_requested(job_id).await {
                            return Ok(None);
                        }
                    }
                    None => return Err(err.into()),
                },
            }
        }
    }

    async fn flush_progress(&self, job_id: &JobId, processed: u64, novel: usize) {
        self.registry
            .update(job_id, |record| {
                record.processed = processed;
                record.total = novel as u64;
            })
            .await;
    }

    async fn finish_cancelled(&self, job_id: &JobId) -> Result {
        self.registry.update(job_id, |record| record.cancel()).await;
        tracing::info!("collection cancelled");
        Ok(())
    }
}

fn to_member(member: &discord::members::GuildMember, source_guild: u64) -> store::members::Member {
    store::members::Member {
        id: member.user.id as i64,
        username: member.user.username.clone(),
        display_name: member.display_name().map(str::to_string),
        is_bot: member.user.bot,
        source_guild: Some(source_guild as i64),
        added_at: Utc::now(),
        last_contact_at: None,
        last_contact_status: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{JobStatus, Registry};
    use crate::messenger::scripted::{member, rate_limited, terminal, ScriptedMessenger};
    use std::time::Duration;

    fn test_settings(export_dir: &std::path::Path) -> CollectSettings {
        CollectSettings {
            export_dir: export_dir.to_path_buf(),
            chunk_size: 50,
            chunk_pause_secs: 0.0,
        }
    }

    async fn harness(
        export_dir: &std::path::Path,
    ) -> (Collector, Arc<ScriptedMessenger>, Arc<Registry>, sqlx::SqlitePool) {
        let db = store::connect("sqlite::memory:").await.expect("store");
        let client = Arc::new(ScriptedMessenger::default());
        let registry = Registry::new(Duration::from_secs(3600));
        let collector = Collector::new(
            db.clone(),
            client.clone(),
            registry.clone(),
            test_settings(export_dir),
        );
        (collector, client, registry, db)
    }

    fn temp_dir() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("guildcast-collect-{}", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn only_novel_members_count_toward_total() {
        let dir = temp_dir();
        let (collector, client, registry, db) = harness(&dir).await;

        // 40 of the 250 enumerated members are already stored.
        let known: Vec<store::members::Member> = (1..=40)
            .map(|id| to_member(&member(id, &format!("known-{id}"), false), 99))
            .collect();
        store::members::upsert_many(&db, &known).await.expect("seed");

        let page: Vec<_> = (1..=250)
            .map(|id| member(id, &format!("user-{id}"), false))
            .collect();
        client.queue_page(Ok(page));

        let record = registry.create(JobDetail::collect(42)).await;
        collector.run(&record.id, 42).await;

        let record = registry.get(&record.id).await.expect("record");
        assert_eq!(JobStatus::Done, record.status);
        assert_eq!(250, record.processed);
        assert_eq!(210, record.total);

        let ids = store::members::all_ids(&db).await.expect("ids");
        assert_eq!(250, ids.len());

        let exports = export::list(dir.clone()).await.expect("exports");
        assert_eq!(1, exports.len());
        assert_eq!(210, exports[0].meta.as_ref().expect("meta").rows);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn mandated_wait_resumes_at_the_same_cursor() {
        let dir = temp_dir();
        let (collector, client, registry, _db) = harness(&dir).await;

        let full_page: Vec<_> = (1..=u64::from(MEMBERS_PAGE_LIMIT))
            .map(|id| member(id, &format!("user-{id}"), false))
            .collect();
        client.queue_page(Ok(full_page));
        client.queue_page(Err(rate_limited(0.01)));
        client.queue_page(Ok(vec![member(2000, "straggler", false)]));

        let record = registry.create(JobDetail::collect(42)).await;
        collector.run(&record.id, 42).await;

        let cursors = client.page_cursors.lock().unwrap().clone();
        assert_eq!(
            vec![
                None,
                Some(u64::from(MEMBERS_PAGE_LIMIT)),
                Some(u64::from(MEMBERS_PAGE_LIMIT))
            ],
            cursors
        );

        let record = registry.get(&record.id).await.expect("record");
        assert_eq!(JobStatus::Done, record.status);
        assert_eq!(u64::from(MEMBERS_PAGE_LIMIT) + 1, record.processed);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn terminal_error_fails_the_job_and_keeps_rows() {
        let dir = temp_dir();
        let (collector, client, registry, db) = harness(&dir).await;

        let full_page: Vec<_> = (1..=u64::from(MEMBERS_PAGE_LIMIT))
            .map(|id| member(id, &format!("user-{id}"), false))
            .collect();
        client.queue_page(Ok(full_page));
        client.queue_page(Err(terminal()));

        let record = registry.create(JobDetail::collect(42)).await;
        collector.run(&record.id, 42).await;

        let record = registry.get(&record.id).await.expect("record");
        assert_eq!(JobStatus::Error, record.status);
        assert!(record.error.is_some());

        // The first page landed before the failure.
        let ids = store::members::all_ids(&db).await.expect("ids");
        assert_eq!(usize::from(MEMBERS_PAGE_LIMIT), ids.len());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn cancel_mid_run_finalizes_and_keeps_partial_rows() {
        let dir = temp_dir();
        let (_collector, client, registry, db) = harness(&dir).await;
        let mut settings = test_settings(&dir);
        settings.chunk_size = 10;
        settings.chunk_pause_secs = 0.05;
        let collector = Collector::new(db.clone(), client.clone(), registry.clone(), settings);

        let page: Vec<_> = (1..=30)
            .map(|id| member(id, &format!("user-{id}"), false))
            .collect();
        client.queue_page(Ok(page));

        let record = registry.create(JobDetail::collect(42)).await;
        let job_id = record.id.clone();
        let runner = {
            let collector = collector.clone();
            let job_id = job_id.clone();
            tokio::spawn(async move { collector.run(&job_id, 42).await })
        };

        // Wait for the first chunk to flush, then request cancellation.
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(record) = registry.get(&job_id).await {
                    if record.processed >= 10 {
                        break;
                    }
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("progress");
        registry.request_cancel(&job_id).await;
        runner.await.expect("runner");

        let record = registry.get(&job_id).await.expect("record");
        assert_eq!(JobStatus::Cancelled, record.status);
        assert!(record.processed < 30);

        let ids = store::members::all_ids(&db).await.expect("ids");
        assert!(ids.len() >= 10);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
