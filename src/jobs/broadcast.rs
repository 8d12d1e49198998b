use crate::{
    jobs::{JobDetail, JobId, JobRecord, Registry},
    messenger::Messenger,
    settings::BroadcastSettings,
    Result,
};
use chrono::Utc;
use std::sync::Arc;
use store::{members::Member, outreach::DeliveryStatus};

#[derive(Debug, Clone)]
pub struct BroadcastRequest {
    pub text: String,
    pub limit: Option<i64>,
    pub source_guild: Option<u64>,
    pub interval_secs: Option<f64>,
}

/// Outcome of a submission attempt.
pub enum Submission {
    Started(JobRecord),
    /// The eager recipient snapshot came back empty.
    Empty,
}

enum SendOutcome {
    Delivered,
    Failed(String),
    CancelledDuringWait,
}

/// Runs rate-limited send-to-many jobs. The recipient list is computed once
/// at submission and fixed for the job's lifetime.
#[derive(Clone)]
pub struct Broadcaster {
    db: sqlx::SqlitePool,
    client: Arc<dyn Messenger>,
    registry: Arc<Registry>,
    settings: BroadcastSettings,
}

impl Broadcaster {
    pub fn new(
        db: sqlx::SqlitePool,
        client: Arc<dyn Messenger>,
        registry: Arc<Registry>,
        settings: BroadcastSettings,
    ) -> Self {
        Self {
            db,
            client,
            registry,
            settings,
        }
    }

    /// Snapshot the pending recipients and start the job, superseding any
    /// broadcast still running.
    pub async fn submit(&self, request: BroadcastRequest) -> Result<Submission> {
        self.registry.evict_finished().await;
        let recipients = store::members::pending_recipients(
            &self.db,
            request.source_guild.map(|id| id as i64),
            request.limit,
        )
        .await?;
        if recipients.is_empty() {
            return Ok(Submission::Empty);
        }

        let record = self
            .registry
            .begin_broadcast(
                JobDetail::broadcast(request.source_guild),
                recipients.len() as u64,
            )
            .await;
        let job_id = record.id.clone();
        let broadcaster = self.clone();
        tokio::spawn(async move {
            broadcaster.run(&job_id, recipients, request).await;
        });
        Ok(Submission::Started(record))
    }

    #[tracing::instrument(skip_all, fields(job = %job_id, recipients = recipients.len()))]
    async fn run(&self, job_id: &JobId, recipients: Vec<Member>, request: BroadcastRequest) {
        if let Err(err) = self.execute(job_id, recipients, request).await {
            tracing::error!(?err, "broadcast failed");
            self.registry
                .update(job_id, |record| record.fail(&err))
                .await;
        }
    }

    async fn execute(
        &self,
        job_id: &JobId,
        recipients: Vec<Member>,
        request: BroadcastRequest,
    ) -> Result {
        let interval = self.settings.interval(request.interval_secs);
        let mut processed: u64 = 0;

        for recipient in recipients {
            if self.registry.cancel_requested(job_id).await {
                return self.finish_cancelled(job_id, processed).await;
            }

            // Excluded accounts count as processed but get no outreach, no
            // log row and no delay.
            if recipient.is_bot {
                processed += 1;
                self.registry
                    .update(job_id, |record| {
                        record.processed = processed;
                        if let JobDetail::Broadcast { skipped, .. } = &mut record.detail {
                            *skipped += 1;
                        }
                    })
                    .await;
                tracing::debug!(member = recipient.id, "skipping excluded account");
                continue;
            }

            let outcome = self.send(job_id, &recipient, &request.text).await;
            let (status, error) = match outcome {
                SendOutcome::Delivered => (DeliveryStatus::Sent, None),
                SendOutcome::Failed(reason) => (DeliveryStatus::Failed, Some(reason)),
                SendOutcome::CancelledDuringWait => {
                    return self.finish_cancelled(job_id, processed).await
                }
            };

            let now = Utc::now();
            store::members::mark_contact(&self.db, recipient.id, status, now).await?;
            store::outreach::append(
                &self.db,
                &store::outreach::NewAttempt {
                    job_id: job_id.as_str(),
                    member_id: recipient.id,
                    username: &recipient.username,
                    status,
                    error: error.as_deref(),
                    sent_at: now,
                },
            )
            .await?;

            processed += 1;
            self.registry
                .update(job_id, |record| {
                    record.processed = processed;
                    if let JobDetail::Broadcast { sent, failed, .. } = &mut record.detail {
                        match status {
                            DeliveryStatus::Sent => *sent += 1,
                            DeliveryStatus::Failed => *failed += 1,
                        }
                    }
                })
                .await;

            if self.registry.cancel_requested(job_id).await {
                return self.finish_cancelled(job_id, processed).await;
            }
            tokio::time::sleep(interval).await;
        }

        self.registry
            .update(job_id, |record| record.complete())
            .await;
        tracing::info!(processed, "broadcast completed");
        Ok(())
    }

    /// One recipient's delivery. A mandated wait sleeps and retries the same
    /// recipient; any other error is final for this recipient only.
    async fn send(&self, job_id: &JobId, recipient: &Member, text: &str) -> SendOutcome {
        loop {
            match self.client.dm(recipient.id as u64, text).await {
                Ok(_) => return SendOutcome::Delivered,
                Err(err) => match err.retry_after() {
                    Some(wait) => {
                        tracing::info!(
                            member = recipient.id,
                            wait = wait.as_secs_f64(),
                            "rate limited, waiting"
                        );
                        tokio::time::sleep(wait).await;
                        if self.registry.cancel_requested(job_id).await {
                            return SendOutcome::CancelledDuringWait;
                        }
                    }
                    None => {
                        tracing::warn!(member = recipient.id, %err, "send failed");
                        return SendOutcome::Failed(err.to_string());
                    }
                },
            }
        }
    }

    async fn finish_cancelled(&self, job_id: &JobId, processed: u64) -> Result {
        self.registry
            .update(job_id, |record| {
                record.processed = processed;
                record.cancel();
            })
            .await;
        tracing::info!(processed, "broadcast cancelled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{JobStatus, Registry};
    use crate::messenger::scripted::{rate_limited, terminal, ScriptedMessenger};
    use std::time::Duration;

    async fn harness() -> (
        Broadcaster,
        Arc<ScriptedMessenger>,
        Arc<Registry>,
        sqlx::SqlitePool,
    ) {
        let db = store::connect("sqlite::memory:").await.expect("store");
        let client = Arc::new(ScriptedMessenger::default());
        let registry = Registry::new(Duration::from_secs(3600));
        let broadcaster = Broadcaster::new(
            db.clone(),
            client.clone(),
            registry.clone(),
            BroadcastSettings { interval_secs: 0.0 },
        );
        (broadcaster, client, registry, db)
    }

    fn request(text: &str) -> BroadcastRequest {
        BroadcastRequest {
            text: text.to_string(),
            limit: None,
            source_guild: None,
            interval_secs: Some(0.0),
        }
    }

    async fn seed_member(db: &sqlx::SqlitePool, id: i64, bot: bool) {
        let member = Member {
            id,
            username: format!("user-{id}"),
            display_name: None,
            is_bot: bot,
            source_guild: Some(1),
            added_at: Utc::now(),
            last_contact_at: None,
            last_contact_status: None,
        };
        store::members::upsert(db, &member).await.expect("seed");
    }

    async fn wait_for_terminal(registry: &Registry, job_id: &JobId) -> JobRecord {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(record) = registry.get(job_id).await {
                    if record.status.is_terminal() {
                        return record;
                    }
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("terminal status")
    }

    #[tokio::test]
    async fn empty_snapshot_rejects_the_submission() {
        let (broadcaster, _client, _registry, db) = harness().await;
        seed_member(&db, 1, false).await;
        store::members::mark_contact(&db, 1, DeliveryStatus::Sent, Utc::now())
            .await
            .expect("stamp");

        match broadcaster.submit(request("hi")).await.expect("submit") {
            Submission::Empty => {}
            Submission::Started(_) => panic!("expected empty submission"),
        }
    }

    #[tokio::test]
    async fn excluded_accounts_are_skipped_without_outreach() {
        let (broadcaster, client, registry, db) = harness().await;
        seed_member(&db, 1, false).await;
        seed_member(&db, 2, true).await;
        seed_member(&db, 3, false).await;

        let record = match broadcaster.submit(request("hi")).await.expect("submit") {
            Submission::Started(record) => record,
            Submission::Empty => panic!("expected a job"),
        };
        let record = wait_for_terminal(&registry, &record.id).await;

        assert_eq!(JobStatus::Done, record.status);
        assert_eq!(3, record.processed);
        match record.detail {
            JobDetail::Broadcast { sent, skipped, failed, .. } => {
                assert_eq!(2, sent);
                assert_eq!(1, skipped);
                assert_eq!(0, failed);
            }
            _ => panic!("wrong detail"),
        }

        assert_eq!(vec![1, 3], client.dm_recipients());
        let log = store::outreach::for_job(&db, record.id.as_str(), 0, 10)
            .await
            .expect("log");
        assert_eq!(2, log.len());

        // The excluded account keeps its pending outreach state.
        let pending = store::members::pending_recipients(&db, None, None)
            .await
            .expect("pending");
        assert_eq!(vec![2], pending.iter().map(|m| m.id).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn mandated_wait_retries_the_same_recipient_once_stamped() {
        let (broadcaster, client, registry, db) = harness().await;
        seed_member(&db, 7, false).await;
        client.queue_dm(Err(rate_limited(0.01)));

        let record = match broadcaster.submit(request("hi")).await.expect("submit") {
            Submission::Started(record) => record,
            Submission::Empty => panic!("expected a job"),
        };
        let record = wait_for_terminal(&registry, &record.id).await;

        assert_eq!(JobStatus::Done, record.status);
        assert_eq!(vec![7, 7], client.dm_recipients());

        let log = store::outreach::for_job(&db, record.id.as_str(), 0, 10)
            .await
            .expect("log");
        assert_eq!(1, log.len());
        assert_eq!(DeliveryStatus::Sent, log[0].status);
    }

    #[tokio::test]
    async fn terminal_error_fails_one_recipient_and_moves_on() {
        let (broadcaster, client, registry, db) = harness().await;
        seed_member(&db, 1, false).await;
        seed_member(&db, 2, false).await;
        client.queue_dm(Err(terminal()));

        let record = match broadcaster.submit(request("hi")).await.expect("submit") {
            Submission::Started(record) => record,
            Submission::Empty => panic!("expected a job"),
        };
        let record = wait_for_terminal(&registry, &record.id).await;

        assert_eq!(JobStatus::Done, record.status);
        match record.detail {
            JobDetail::Broadcast { sent, failed, .. } => {
                assert_eq!(1, sent);
                assert_eq!(1, failed);
            }
            _ => panic!("wrong detail"),
        }

        let log = store::outreach::for_job(&db, record.id.as_str(), 0, 10)
            .await
            .expect("log");
        let failed: Vec<_> = log
            .iter()
            .filter(|row| row.status == DeliveryStatus::Failed)
            .collect();
        assert_eq!(1, failed.len());
        assert_eq!(1, failed[0].member_id);
        assert!(failed[0].error.is_some());
    }

    #[tokio::test]
    async fn supersession_cancels_the_running_broadcast() {
        let (broadcaster, _client, registry, db) = harness().await;
        for id in 1..=3 {
            seed_member(&db, id, false).await;
        }

        let mut slow = request("first");
        slow.interval_secs = Some(0.2);
        let first = match broadcaster.submit(slow).await.expect("submit") {
            Submission::Started(record) => record,
            Submission::Empty => panic!("expected a job"),
        };

        // Let the first job stamp at least one recipient before superseding.
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(record) = registry.get(&first.id).await {
                    if record.processed >= 1 {
                        break;
                    }
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("first progress");

        let second = match broadcaster.submit(request("second")).await.expect("submit") {
            Submission::Started(record) => record,
            Submission::Empty => panic!("expected a job"),
        };

        let first = wait_for_terminal(&registry, &first.id).await;
        let second = wait_for_terminal(&registry, &second.id).await;
        assert_eq!(JobStatus::Cancelled, first.status);
        assert_eq!(JobStatus::Done, second.status);

        // Every member was stamped by exactly one job.
        let stats = store::outreach::daily_stats(&db, 1).await.expect("stats");
        assert_eq!(3, stats[0].total);
        let pending = store::members::pending_recipients(&db, None, None)
            .await
            .expect("pending");
        assert!(pending.is_empty());
    }
}
