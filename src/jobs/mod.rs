use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt, sync::Arc, time::Duration};
use tokio::sync::Mutex;
use uuid::Uuid;

pub mod broadcast;
pub mod collect;

/// Opaque identifier handed to the front-end for status polling.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Done,
    Error,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Kind-specific job fields.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum JobDetail {
    Collect {
        guild_id: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        guild_name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        export_path: Option<String>,
    },
    Broadcast {
        sent: u64,
        failed: u64,
        skipped: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        source_guild: Option<u64>,
    },
}

impl JobDetail {
    pub fn collect(guild_id: u64) -> Self {
        Self::Collect {
            guild_id,
            guild_name: None,
            export_path: None,
        }
    }

    pub fn broadcast(source_guild: Option<u64>) -> Self {
        Self::Broadcast {
            sent: 0,
            failed: 0,
            skipped: 0,
            source_guild,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub id: JobId,
    pub status: JobStatus,
    pub processed: u64,
    pub total: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub detail: JobDetail,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    cancel: bool,
}

impl JobRecord {
    fn new(detail: JobDetail) -> Self {
        Self {
            id: JobId::new(),
            status: JobStatus::Running,
            processed: 0,
            total: 0,
            error: None,
            detail,
            started_at: Utc::now(),
            finished_at: None,
            cancel: false,
        }
    }

    pub fn complete(&mut self) {
        self.status = JobStatus::Done;
        self.finished_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: impl ToString) {
        self.status = JobStatus::Error;
        self.error = Some(error.to_string());
        self.finished_at = Some(Utc::now());
    }

    pub fn cancel(&mut self) {
        self.status = JobStatus::Cancelled;
        self.finished_at = Some(Utc::now());
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel
    }
}

#[derive(Debug, Default)]
struct Jobs {
    records: HashMap<JobId, JobRecord>,
    current_broadcast: Option<JobId>,
}

/// In-memory job table shared by the engines and the API. All access goes
/// through the inner mutex; reads hand out clones.
#[derive(Debug)]
pub struct Registry {
    jobs: Mutex<Jobs>,
    retention: Duration,
}

impl Registry {
    pub fn new(retention: Duration) -> Arc<Self> {
        Arc::new(Self {
            jobs: Mutex::new(Jobs::default()),
            retention,
        })
    }

    pub async fn create(&self, detail: JobDetail) -> JobRecord {
        let record = JobRecord::new(detail);
        let mut jobs = self.jobs.lock().await;
        jobs.records.insert(record.id.clone(), record.clone());
        record
    }

    /// Register a broadcast, flagging cancellation on the one it supersedes.
    pub async fn begin_broadcast(&self, detail: JobDetail, total: u64) -> JobRecord {
        let mut record = JobRecord::new(detail);
        record.total = total;
        let mut jobs = self.jobs.lock().await;
        if let Some(previous_id) = jobs.current_broadcast.take() {
            if let Some(previous) = jobs.records.get_mut(&previous_id) {
                if !previous.status.is_terminal() {
                    previous.cancel = true;
                    tracing::info!(superseded = %previous_id, by = %record.id, "broadcast superseded");
                }
            }
        }
        jobs.current_broadcast = Some(record.id.clone());
        jobs.records.insert(record.id.clone(), record.clone());
        record
    }

    /// Stale terminal entries are dropped before the lookup.
    pub async fn get(&self, id: &JobId) -> Option<JobRecord> {
        let mut jobs = self.jobs.lock().await;
        Self::evict(&mut jobs, self.retention);
        jobs.records.get(id).cloned()
    }

    pub async fn update<F>(&self, id: &JobId, apply: F) -> Option<JobRecord>
    where
        F: FnOnce(&mut JobRecord),
    {
        let mut jobs = self.jobs.lock().await;
        let record = jobs.records.get_mut(id)?;
        apply(record);
        Some(record.clone())
    }

    /// Flag cancellation. The owning engine notices at its next checkpoint;
    /// already terminal jobs are returned unchanged.
    pub async fn request_cancel(&self, id: &JobId) -> Option<JobRecord> {
        let mut jobs = self.jobs.lock().await;
        Self::evict(&mut jobs, self.retention);
        let record = jobs.records.get_mut(id)?;
        if !record.status.is_terminal() {
            record.cancel = true;
        }
        Some(record.clone())
    }

    pub async fn cancel_requested(&self, id: &JobId) -> bool {
        let jobs = self.jobs.lock().await;
        jobs.records.get(id).map_or(false, |record| record.cancel)
    }

    pub async fn evict_finished(&self) {
        let mut jobs = self.jobs.lock().await;
        Self::evict(&mut jobs, self.retention);
    }

    fn evict(jobs: &mut Jobs, retention: Duration) {
        let now = Utc::now();
        jobs.records.retain(|_, record| match record.finished_at {
            Some(finished) => now
                .signed_duration_since(finished)
                .to_std()
                .map(|age| age < retention)
                .unwrap_or(true),
            None => true,
        });
        if let Some(current) = &jobs.current_broadcast {
            if !jobs.records.contains_key(current) {
                jobs.current_broadcast = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn eviction_drops_stale_terminal_jobs_only() {
        let registry = Registry::new(Duration::ZERO);
        let finished = registry.create(JobDetail::collect(1)).await;
        let running = registry.create(JobDetail::collect(2)).await;
        registry
            .update(&finished.id, |record| record.complete())
            .await;

        registry.evict_finished().await;

        assert!(registry.get(&finished.id).await.is_none());
        let running = registry.get(&running.id).await.expect("running job");
        assert_eq!(JobStatus::Running, running.status);
    }

    #[tokio::test]
    async fn long_retention_keeps_terminal_jobs() {
        let registry = Registry::new(Duration::from_secs(3600));
        let job = registry.create(JobDetail::collect(1)).await;
        registry.update(&job.id, |record| record.complete()).await;

        registry.evict_finished().await;

        assert!(registry.get(&job.id).await.is_some());
    }

    #[tokio::test]
    async fn new_broadcast_supersedes_the_previous_one() {
        let registry = Registry::new(Duration::from_secs(3600));
        let first = registry
            .begin_broadcast(JobDetail::broadcast(None), 5)
            .await;
        let second = registry
            .begin_broadcast(JobDetail::broadcast(None), 3)
            .await;

        assert!(registry.cancel_requested(&first.id).await);
        assert!(!registry.cancel_requested(&second.id).await);
    }

    #[tokio::test]
    async fn cancel_request_ignores_terminal_jobs() {
        let registry = Registry::new(Duration::from_secs(3600));
        let job = registry.create(JobDetail::collect(1)).await;
        registry.update(&job.id, |record| record.complete()).await;

        let record = registry.request_cancel(&job.id).await.expect("record");
        assert_eq!(JobStatus::Done, record.status);
        assert!(!registry.cancel_requested(&job.id).await);
    }

    #[test]
    fn job_record_serializes_flat_with_kind() {
        let record = JobRecord::new(JobDetail::broadcast(Some(7)));
        let value = serde_json::to_value(&record).expect("json");
        assert_eq!("broadcast", value["kind"]);
        assert_eq!(0, value["sent"]);
        assert_eq!("running", value["status"]);
        assert!(value.get("cancel").is_none());
    }
}
