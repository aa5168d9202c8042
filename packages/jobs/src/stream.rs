//! Live tail of a job's log.
//!
//! Each poll reads the status first and the new lines second. A terminal
//! status seen before the read guarantees every line appended before the
//! transition is in that read, so the closing marker always follows the
//! complete log.

use std::sync::Arc;
use std::time::Duration;

use deploy_core::{JobId, StreamEvent};
use futures_util::stream::{self, Stream, StreamExt};

use crate::store::JobStore;

enum TailState {
    Polling { offset: usize, first: bool },
    Done,
}

/// Tail `job_id` from offset 0 until it reaches a terminal status.
///
/// The returned stream holds only an `Arc` to the store; dropping it stops polling.
pub fn tail(
    store: Arc<JobStore>,
    job_id: JobId,
    poll_interval: Duration,
) -> impl Stream<Item = StreamEvent> + Send + 'static {
    let initial = TailState::Polling {
        offset: 0,
        first: true,
    };

    stream::unfold(initial, move |state| {
        let store = store.clone();
        let job_id = job_id.clone();
        async move {
            let TailState::Polling { offset, first } = state else {
                return None;
            };
            if !first {
                tokio::time::sleep(poll_interval).await;
            }

            let Some(status) = store.status(&job_id) else {
                return Some((vec![StreamEvent::NotFound { job_id }], TailState::Done));
            };
            let lines = store.read_from(&job_id, offset).unwrap_or_default();

            let mut events: Vec<StreamEvent> = lines
                .into_iter()
                .enumerate()
                .map(|(i, message)| StreamEvent::Line {
                    index: offset + i,
                    message,
                })
                .collect();
            let next_offset = offset + events.len();

            if status.is_terminal() {
                events.push(StreamEvent::finished(status));
                return Some((events, TailState::Done));
            }
            Some((
                events,
                TailState::Polling {
                    offset: next_offset,
                    first: false,
                },
            ))
        }
    })
    .flat_map(stream::iter)
}
