//! Housekeeping actor: batches snapshot requests and runs the retention sweep.

use std::sync::Arc;
use std::time::Duration;

use ractor::{Actor, ActorProcessingErr, ActorRef};

use crate::messages::HousekeeperMessage;
use crate::persister::Persister;
use crate::store::{JobStore, PersistReason, PersistTrigger};

impl PersistTrigger for ActorRef<HousekeeperMessage> {
    fn request_persist(&self, reason: PersistReason) {
        if let Err(e) = self.send_message(HousekeeperMessage::Persist { reason }) {
            tracing::debug!("Housekeeper gone, dropping persist request: {}", e);
        }
    }
}

pub struct HousekeeperArgs {
    pub store: Arc<JobStore>,
    pub persister: Arc<Persister>,
    pub interval: Duration,
    pub retention: Option<Duration>,
}

pub struct HousekeeperState {
    store: Arc<JobStore>,
    persister: Arc<Persister>,
    retention: Option<chrono::Duration>,
    saves: u64,
}

impl HousekeeperState {
    async fn persist(&mut self, why: &str) -> bool {
        match self.persister.save_if_dirty().await {
            Ok(saved) => {
                if saved {
                    self.saves += 1;
                }
                true
            }
            Err(e) => {
                tracing::error!("Snapshot save failed ({}): {}", why, e);
                false
            }
        }
    }

    fn sweep(&self) -> usize {
        let Some(retention) = self.retention else {
            return 0;
        };
        let removed = self.store.purge_older_than(retention);
        if removed > 0 {
            tracing::info!("Retention sweep removed {} finished job(s)", removed);
        }
        removed
    }
}

pub struct Housekeeper;

impl Actor for Housekeeper {
    type Msg = HousekeeperMessage;
    type State = HousekeeperState;
    type Arguments = HousekeeperArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting housekeeper (every {:?})", args.interval);

        let retention = args
            .retention
            .map(|d| chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX));

        let myself_clone = myself.clone();
        let period = args.interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                if myself_clone.send_message(HousekeeperMessage::Tick).is_err() {
                    break;
                }
            }
        });

        Ok(HousekeeperState {
            store: args.store,
            persister: args.persister,
            retention,
            saves: 0,
        })
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            HousekeeperMessage::Persist { reason } => {
                tracing::trace!("Persist requested: {:?}", reason);
                state.persist("requested").await;
            }
            HousekeeperMessage::Tick => {
                state.sweep();
                state.persist("tick").await;
            }
            HousekeeperMessage::Flush { reply } => {
                let ok = match state.persister.save().await {
                    Ok(()) => {
                        state.saves += 1;
                        true
                    }
                    Err(e) => {
                        tracing::error!("Snapshot flush failed: {}", e);
                        false
                    }
                };
                let _ = reply.send(ok);
            }
        }
        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        tracing::info!("Housekeeper stopped after {} save(s)", state.saves);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use deploy_core::{JobId, JobKind, JobRecord, JobStatus, Metadata};
    use ractor::rpc::CallResult;
    use storage::{SnapshotConfig, SnapshotStore};

    use super::*;

    #[tokio::test]
    async fn huge_retention_keeps_housekeeper_alive() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JobStore::new(5));
        let id = JobId::from("J1");
        store
            .insert(JobRecord::new(id.clone(), JobKind::File, Metadata::new()))
            .unwrap();
        store.transition(&id, JobStatus::Running);
        store.mark_terminal(&id, JobStatus::Success);

        let persister = Arc::new(Persister::new(
            SnapshotStore::new(SnapshotConfig::in_dir(dir.path())),
            store.clone(),
        ));
        let args = HousekeeperArgs {
            store: store.clone(),
            persister,
            interval: Duration::from_millis(10),
            retention: Some(Duration::from_secs(1_000_000_000_000_000)),
        };
        let (actor, handle) = Actor::spawn(None, Housekeeper, args).await.unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;

        let flushed = ractor::rpc::call(
            &actor,
            |reply| HousekeeperMessage::Flush { reply },
            Some(Duration::from_secs(5)),
        )
        .await
        .unwrap();
        assert!(matches!(flushed, CallResult::Success(true)));
        assert!(store.contains(&id));

        actor.stop(None);
        handle.await.unwrap();
    }
}
