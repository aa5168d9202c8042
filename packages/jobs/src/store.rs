//! In-memory job store and per-job log sink.
//!
//! Every mutation of a job record goes through [`JobStore::update`], which
//! holds the write lock only for the duration of the closure. Readers take
//! the read lock briefly and copy out what they need, so a reader may see a
//! slightly stale tail but never a partially applied change.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use deploy_core::{JobEvent, JobId, JobRecord, JobStatus};
use tokio::sync::broadcast;

use crate::error::RuntimeError;

/// The serialized form of the store: job id to record, in id order.
pub type JobMap = BTreeMap<JobId, JobRecord>;

/// Why a snapshot was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistReason {
    LogLines,
    Transition,
    Sweep,
}

/// Receiver of snapshot requests raised by the store.
pub trait PersistTrigger: Send + Sync + 'static {
    fn request_persist(&self, reason: PersistReason);
}

pub struct JobStore {
    jobs: RwLock<JobMap>,
    /// Bumped on every mutation; lets persistence skip unchanged stores.
    revision: AtomicU64,
    persist_every: usize,
    trigger: OnceLock<Arc<dyn PersistTrigger>>,
    events: broadcast::Sender<JobEvent>,
}

impl JobStore {
    pub fn new(persist_every: usize) -> Self {
        Self::from_records(JobMap::new(), persist_every)
    }

    pub fn from_records(records: JobMap, persist_every: usize) -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            jobs: RwLock::new(records),
            revision: AtomicU64::new(0),
            persist_every: persist_every.max(1),
            trigger: OnceLock::new(),
            events,
        }
    }

    /// Install the receiver of snapshot requests. Only the first call has an effect.
    pub fn set_persist_trigger(&self, trigger: Arc<dyn PersistTrigger>) {
        if self.trigger.set(trigger).is_err() {
            tracing::warn!("Persist trigger already installed; ignoring replacement");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    fn read(&self) -> RwLockReadGuard<'_, JobMap> {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, JobMap> {
        self.jobs.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn touch(&self) {
        self.revision.fetch_add(1, Ordering::AcqRel);
    }

    fn request_persist(&self, reason: PersistReason) {
        if let Some(trigger) = self.trigger.get() {
            trigger.request_persist(reason);
        }
    }

    fn broadcast(&self, event: JobEvent) {
        tracing::debug!("{}", event.description());
        let _ = self.events.send(event);
    }

    /// Add a new record. Fails if the id is already taken.
    pub fn insert(&self, record: JobRecord) -> Result<(), RuntimeError> {
        let event = JobEvent::Submitted {
            job_id: record.id.clone(),
            kind: record.kind,
            timestamp: record.created_at,
        };
        {
            let mut jobs = self.write();
            if jobs.contains_key(&record.id) {
                return Err(RuntimeError::DuplicateJob(record.id));
            }
            jobs.insert(record.id.clone(), record);
        }
        self.touch();
        self.broadcast(event);
        Ok(())
    }

    pub fn remove(&self, job_id: &JobId) -> Option<JobRecord> {
        let removed = self.write().remove(job_id);
        if removed.is_some() {
            self.touch();
        }
        removed
    }

    /// The single mutation primitive for an existing record.
    ///
    /// `f` returns `Err` to leave the record untouched; `None` means the job is unknown.
    pub fn update<R, E>(
        &self,
        job_id: &JobId,
        f: impl FnOnce(&mut JobRecord) -> Result<R, E>,
    ) -> Option<Result<R, E>> {
        let result = {
            let mut jobs = self.write();
            let record = jobs.get_mut(job_id)?;
            let result = f(record);
            if result.is_ok() {
                record.updated_at = Utc::now();
            }
            result
        };
        if result.is_ok() {
            self.touch();
        }
        Some(result)
    }

    pub fn get(&self, job_id: &JobId) -> Option<JobRecord> {
        self.read().get(job_id).cloned()
    }

    pub fn contains(&self, job_id: &JobId) -> bool {
        self.read().contains_key(job_id)
    }

    pub fn status(&self, job_id: &JobId) -> Option<JobStatus> {
        self.read().get(job_id).map(|r| r.status)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// All jobs without their logs, newest first.
    pub fn list(&self) -> Vec<JobRecord> {
        let mut records: Vec<JobRecord> = self.read().values().map(JobRecord::summary).collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records
    }

    /// Copy of every record, for persistence.
    pub fn snapshot(&self) -> JobMap {
        self.read().clone()
    }

    /// Append one line to a job's log. Unknown jobs are ignored.
    ///
    /// Lines appended after the job reached a terminal status are kept.
    pub fn append(&self, job_id: &JobId, line: impl Into<String>) -> bool {
        let line = line.into();
        let appended = self.update(job_id, |record| {
            tracing::debug!("[{}-{}] {}", record.kind.log_prefix(), job_id, line);
            record.logs.push(line);
            Ok::<_, Infallible>((record.logs.len(), record.status))
        });

        match appended {
            Some(Ok((len, status))) => {
                if status.is_terminal() {
                    tracing::debug!("Job {} received a log line after finishing", job_id);
                }
                if len % self.persist_every == 0 {
                    self.request_persist(PersistReason::LogLines);
                }
                true
            }
            Some(Err(never)) => match never {},
            None => {
                tracing::debug!("Dropping log line for unknown job {}", job_id);
                false
            }
        }
    }

    /// Full log as currently known.
    pub fn read_all(&self, job_id: &JobId) -> Option<Vec<String>> {
        self.read_from(job_id, 0)
    }

    /// Log lines from `offset` on. An offset past the end yields no lines.
    pub fn read_from(&self, job_id: &JobId, offset: usize) -> Option<Vec<String>> {
        self.read()
            .get(job_id)
            .map(|r| r.logs.get(offset..).map(<[String]>::to_vec).unwrap_or_default())
    }

    /// Move a job forward in its lifecycle. Regressions and repeats are refused.
    pub fn transition(&self, job_id: &JobId, next: JobStatus) -> bool {
        let outcome = self.update(job_id, |record| {
            if !record.status.can_advance_to(next) {
                return Err(record.status);
            }
            let now = Utc::now();
            record.status = next;
            match next {
                JobStatus::Running => record.started_at = Some(now),
                JobStatus::Success | JobStatus::Failed => {
                    record.started_at.get_or_insert(now);
                    record.finished_at = Some(now);
                }
                JobStatus::Pending => {}
            }
            Ok((record.kind, record.duration_ms(), now))
        });

        match outcome {
            Some(Ok((kind, duration_ms, timestamp))) => {
                let job_id = job_id.clone();
                let event = if next.is_terminal() {
                    JobEvent::Finished {
                        job_id,
                        kind,
                        status: next,
                        duration_ms,
                        timestamp,
                    }
                } else {
                    JobEvent::Started {
                        job_id,
                        kind,
                        timestamp,
                    }
                };
                self.broadcast(event);
                true
            }
            Some(Err(current)) => {
                tracing::warn!("Refusing status change of job {}: {} -> {}", job_id, current, next);
                false
            }
            None => {
                tracing::warn!("Status change for unknown job {}", job_id);
                false
            }
        }
    }

    /// Set a terminal status on behalf of a job function.
    pub fn mark_terminal(&self, job_id: &JobId, status: JobStatus) -> bool {
        if !status.is_terminal() {
            tracing::warn!("mark_terminal({}) called with non-terminal {}", job_id, status);
            return false;
        }
        let changed = self.transition(job_id, status);
        if changed {
            self.request_persist(PersistReason::Transition);
        }
        changed
    }

    /// Fail jobs that were pending or running when the previous process stopped.
    pub fn recover_interrupted(&self) -> usize {
        let interrupted: Vec<JobId> = self
            .read()
            .values()
            .filter(|r| !r.status.is_terminal())
            .map(|r| r.id.clone())
            .collect();

        for job_id in &interrupted {
            self.append(job_id, "ERROR: interrupted: service restarted before the job finished");
            self.transition(job_id, JobStatus::Failed);
        }
        interrupted.len()
    }

    /// Remove terminal jobs created before `cutoff`. Pending and running jobs stay.
    pub fn purge_created_before(&self, cutoff: DateTime<Utc>) -> usize {
        self.retain(|r| !(r.status.is_terminal() && r.created_at < cutoff))
    }

    /// Remove terminal jobs created more than `age` ago. An age reaching past
    /// the earliest representable time removes nothing.
    pub fn purge_older_than(&self, age: chrono::Duration) -> usize {
        let cutoff = Utc::now()
            .checked_sub_signed(age)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.purge_created_before(cutoff)
    }

    /// Remove every terminal job.
    pub fn clear_terminal(&self) -> usize {
        self.retain(|r| !r.status.is_terminal())
    }

    fn retain(&self, keep: impl Fn(&JobRecord) -> bool) -> usize {
        let removed = {
            let mut jobs = self.write();
            let before = jobs.len();
            jobs.retain(|_, r| keep(r));
            before - jobs.len()
        };
        if removed > 0 {
            self.touch();
            self.request_persist(PersistReason::Sweep);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use std::sync::Mutex;

    use deploy_core::{JobKind, Metadata};

    use super::*;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<PersistReason>>);

    impl PersistTrigger for Recorder {
        fn request_persist(&self, reason: PersistReason) {
            self.0.lock().unwrap().push(reason);
        }
    }

    fn store_with(id: &str) -> JobStore {
        let store = JobStore::new(5);
        store
            .insert(JobRecord::new(JobId::from(id), JobKind::Command, Metadata::new()))
            .unwrap();
        store
    }

    #[test]
    fn append_preserves_order_and_ignores_unknown_jobs() {
        let store = store_with("J1");
        let id = JobId::from("J1");

        assert!(store.append(&id, "a"));
        assert!(store.append(&id, "b"));
        assert!(!store.append(&JobId::from("nope"), "c"));

        assert_eq!(store.read_all(&id).unwrap(), vec!["a", "b"]);
        assert_eq!(store.read_from(&id, 1).unwrap(), vec!["b"]);
        assert!(store.read_from(&id, 7).unwrap().is_empty());
        assert!(store.read_all(&JobId::from("nope")).is_none());
        assert!(!store.contains(&JobId::from("nope")));
    }

    #[test]
    fn every_fifth_line_requests_a_snapshot() {
        let store = store_with("J1");
        let recorder = Arc::new(Recorder::default());
        store.set_persist_trigger(recorder.clone());

        let id = JobId::from("J1");
        for i in 0..12 {
            store.append(&id, format!("line {i}"));
        }

        let requests = recorder.0.lock().unwrap().clone();
        assert_eq!(requests, vec![PersistReason::LogLines, PersistReason::LogLines]);
    }

    #[test]
    fn status_never_regresses() {
        let store = store_with("J1");
        let id = JobId::from("J1");

        assert!(store.transition(&id, JobStatus::Running));
        assert!(!store.transition(&id, JobStatus::Pending));
        assert!(store.mark_terminal(&id, JobStatus::Success));
        assert!(!store.mark_terminal(&id, JobStatus::Failed));
        assert!(!store.transition(&id, JobStatus::Running));

        let record = store.get(&id).unwrap();
        assert_eq!(record.status, JobStatus::Success);
        assert!(record.started_at.is_some());
        assert!(record.finished_at.is_some());
    }

    #[test]
    fn appends_after_terminal_are_kept() {
        let store = store_with("J1");
        let id = JobId::from("J1");
        store.transition(&id, JobStatus::Running);
        store.mark_terminal(&id, JobStatus::Failed);

        assert!(store.append(&id, "late"));
        assert_eq!(store.read_all(&id).unwrap(), vec!["late"]);
        assert_eq!(store.status(&id), Some(JobStatus::Failed));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let store = store_with("J1");
        let dup = JobRecord::new(JobId::from("J1"), JobKind::Sql, Metadata::new());
        assert!(matches!(store.insert(dup), Err(RuntimeError::DuplicateJob(_))));
        assert_eq!(store.get(&JobId::from("J1")).unwrap().kind, JobKind::Command);
    }

    #[test]
    fn purge_keeps_unfinished_jobs() {
        let store = store_with("old-done");
        store
            .insert(JobRecord::new(JobId::from("old-running"), JobKind::File, Metadata::new()))
            .unwrap();

        let done = JobId::from("old-done");
        store.transition(&done, JobStatus::Running);
        store.mark_terminal(&done, JobStatus::Success);
        store.transition(&JobId::from("old-running"), JobStatus::Running);

        let removed = store.purge_created_before(Utc::now() + chrono::Duration::seconds(1));
        assert_eq!(removed, 1);
        assert!(!store.contains(&done));
        assert!(store.contains(&JobId::from("old-running")));
    }

    #[test]
    fn purge_by_age_saturates_on_huge_ages() {
        let store = store_with("J1");
        let id = JobId::from("J1");
        store.transition(&id, JobStatus::Running);
        store.mark_terminal(&id, JobStatus::Failed);

        assert_eq!(store.purge_older_than(chrono::Duration::MAX), 0);
        assert_eq!(store.purge_older_than(chrono::Duration::days(1)), 0);
        assert!(store.contains(&id));

        assert_eq!(store.purge_older_than(-chrono::Duration::seconds(1)), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn interrupted_jobs_are_failed_on_recovery() {
        let store = store_with("J1");
        let id = JobId::from("J1");
        store.transition(&id, JobStatus::Running);

        assert_eq!(store.recover_interrupted(), 1);
        let record = store.get(&id).unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert!(record.logs.last().unwrap().contains("interrupted"));
    }

    #[tokio::test]
    async fn lifecycle_events_are_broadcast() {
        let store = JobStore::new(5);
        let mut events = store.subscribe();
        let id = JobId::from("J1");
        store
            .insert(JobRecord::new(id.clone(), JobKind::Systemd, Metadata::new()))
            .unwrap();
        store.transition(&id, JobStatus::Running);
        store.mark_terminal(&id, JobStatus::Success);

        assert!(matches!(events.recv().await.unwrap(), JobEvent::Submitted { .. }));
        assert!(matches!(events.recv().await.unwrap(), JobEvent::Started { .. }));
        match events.recv().await.unwrap() {
            JobEvent::Finished { status, .. } => assert_eq!(status, JobStatus::Success),
            other => panic!("unexpected event {other:?}"),
        }
    }
}
