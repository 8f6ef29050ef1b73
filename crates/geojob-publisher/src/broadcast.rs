//! Push publisher over a tokio broadcast channel.

use crate::{snapshot, JobEventStream, StatusPublisher};
use geojob_types::{Job, JobChangeEvent, JobChangeSink, JobId, JobStore, SubscriptionFilter};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, Weak};
use tokio::sync::broadcast::{self, error::RecvError};

const DEFAULT_CAPACITY: usize = 1024;

/// Fans out every snapshot the store commits. Install it as the store's
/// [`JobChangeSink`], then [`attach_store`](Self::attach_store) so lagging subscribers can
/// resynchronise.
pub struct BroadcastPublisher {
    tx: broadcast::Sender<JobChangeEvent>,
    store: OnceLock<Weak<dyn JobStore>>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            store: OnceLock::new(),
        }
    }

    /// Weak, since the store usually owns this publisher as its sink.
    pub fn attach_store(&self, store: &Arc<dyn JobStore>) {
        if self.store.set(Arc::downgrade(store)).is_err() {
            tracing::warn!("publisher already attached to a store");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl JobChangeSink for BroadcastPublisher {
    fn publish(&self, job: &Job) {
        // Err only means nobody is listening.
        let _ = self.tx.send(JobChangeEvent::now(job.clone()));
    }
}

impl StatusPublisher for BroadcastPublisher {
    fn subscribe(&self, filter: SubscriptionFilter) -> JobEventStream {
        let mut rx = self.tx.subscribe();
        let store = self.store.get().cloned();
        Box::pin(async_stream::stream! {
            // State keys taken from the last resync. A live event for one of these jobs is
            // emitted only once it moves past the resynced snapshot.
            let mut resynced: HashMap<JobId, (u8, u8, u64)> = HashMap::new();
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if !filter.matches(&event.job) {
                            continue;
                        }
                        if let Some(floor) = resynced.get(&event.job.id) {
                            if event.job.state_key() <= *floor {
                                continue;
                            }
                            resynced.remove(&event.job.id);
                        }
                        yield event;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "subscriber lagged; resynchronising from store");
                        // Skip whatever is still buffered; the snapshot supersedes it.
                        rx = rx.resubscribe();
                        resynced.clear();
                        let Some(store) = store.as_ref().and_then(Weak::upgrade) else {
                            continue;
                        };
                        match snapshot(store.as_ref(), &filter).await {
                            Ok(jobs) => {
                                for job in jobs {
                                    resynced.insert(job.id, job.state_key());
                                    yield JobChangeEvent::now(job);
                                }
                            }
                            Err(e) => tracing::warn!(error = %e, "resync failed"),
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}
