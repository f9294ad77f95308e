//! Full-snapshot loading with request coalescing.

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

use crate::error::FetchError;
use crate::types::SnapshotPayload;

/// Anything that can produce a complete graph snapshot.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch(&self) -> Result<SnapshotPayload, FetchError>;
}

/// A snapshot tagged with the sequence number of the fetch that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedSnapshot {
    pub seq: u64,
    pub payload: SnapshotPayload,
}

type SharedFetch = Shared<BoxFuture<'static, Result<Arc<LoadedSnapshot>, FetchError>>>;

/// Fetches snapshots, coalescing concurrent requests into one.
///
/// While a fetch is in flight every caller awaits the same shared future and
/// receives the same `LoadedSnapshot` (same `seq`).
pub struct SnapshotLoader {
    source: Arc<dyn SnapshotSource>,
    in_flight: Mutex<Option<(u64, SharedFetch)>>,
    next_seq: AtomicU64,
}

impl std::fmt::Debug for SnapshotLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotLoader")
            .field("fetches_started", &self.next_seq.load(Ordering::Relaxed))
            .finish()
    }
}

impl SnapshotLoader {
    pub fn new(source: Arc<dyn SnapshotSource>) -> Self {
        Self {
            source,
            in_flight: Mutex::new(None),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Fetch a snapshot, joining the in-flight request if there is one.
    pub async fn fetch(&self) -> Result<Arc<LoadedSnapshot>, FetchError> {
        let (seq, fetch) = {
            let mut slot = self.in_flight.lock().await;
            match slot.as_ref() {
                // A resolved fetch still in the slot is finished, not in flight.
                Some((seq, fetch)) if fetch.peek().is_none() => {
                    tracing::debug!(seq = *seq, "Joining in-flight snapshot fetch");
                    (*seq, fetch.clone())
                }
                _ => {
                    let seq = self.next_seq.fetch_add(1, Ordering::Relaxed) + 1;
                    let source = Arc::clone(&self.source);
                    let fetch = async move {
                        source
                            .fetch()
                            .await
                            .map(|payload| Arc::new(LoadedSnapshot { seq, payload }))
                    }
                    .boxed()
                    .shared();
                    tracing::debug!(seq, "Starting snapshot fetch");
                    *slot = Some((seq, fetch.clone()));
                    (seq, fetch)
                }
            }
        };

        let result = fetch.await;

        let mut slot = self.in_flight.lock().await;
        if slot.as_ref().is_some_and(|(current, _)| *current == seq) {
            *slot = None;
        }
        if let Err(e) = &result {
            tracing::warn!(seq, error = %e, "Snapshot fetch failed");
        }
        result
    }

    /// Whether a fetch is currently in flight.
    pub async fn is_fetching(&self) -> bool {
        self.in_flight.lock().await.is_some()
    }

    /// Number of real fetches started so far.
    pub fn fetches_started(&self) -> u64 {
        self.next_seq.load(Ordering::Relaxed)
    }

    /// Drop the in-flight fetch. Callers still awaiting it keep driving it;
    /// once they are gone the request is aborted.
    pub async fn abandon(&self) {
        if self.in_flight.lock().await.take().is_some() {
            tracing::debug!("Abandoned in-flight snapshot fetch");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Node, NodeKind};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct CountingSource {
        calls: AtomicUsize,
        fail_first: bool,
    }

    impl CountingSource {
        fn new(fail_first: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail_first,
            })
        }
    }

    #[async_trait]
    impl SnapshotSource for CountingSource {
        async fn fetch(&self) -> Result<SnapshotPayload, FetchError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            if self.fail_first && call == 0 {
                return Err(FetchError::Status { status: 502 });
            }
            Ok(SnapshotPayload::new(
                vec![Node::new(format!("n{call}"), NodeKind::Source)],
                vec![],
            ))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_fetches_are_coalesced() {
        let source = CountingSource::new(false);
        let loader = SnapshotLoader::new(source.clone());

        let (a, b) = tokio::join!(loader.fetch(), loader.fetch());
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(a.seq, b.seq);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!loader.is_fetching().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_fetches_get_new_seq() {
        let source = CountingSource::new(false);
        let loader = SnapshotLoader::new(source.clone());

        let first = loader.fetch().await.unwrap();
        let second = loader.fetch().await.unwrap();
        assert_eq!(first.seq, 1);
        assert_eq!(second.seq, 2);
        assert_eq!(second.payload.nodes[0].id, "n1");
        assert_eq!(loader.fetches_started(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_is_shared_and_next_fetch_retries() {
        let source = CountingSource::new(true);
        let loader = SnapshotLoader::new(source.clone());

        let (a, b) = tokio::join!(loader.fetch(), loader.fetch());
        assert_eq!(a.unwrap_err(), FetchError::Status { status: 502 });
        assert_eq!(b.unwrap_err(), FetchError::Status { status: 502 });

        let retry = loader.fetch().await;
        tokio_test::assert_ok!(&retry);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolved_fetch_left_in_slot_is_not_joined() {
        let source = CountingSource::new(false);
        let loader = SnapshotLoader::new(source.clone());

        let first = loader.fetch().await.unwrap();
        // Put the finished fetch back, as if its owner had not cleared the slot yet.
        let finished = futures::future::ready(Ok::<_, FetchError>(Arc::clone(&first)))
            .boxed()
            .shared();
        tokio_test::assert_ok!(finished.clone().await);
        *loader.in_flight.lock().await = Some((first.seq, finished));

        let second = loader.fetch().await.unwrap();
        assert_eq!(second.seq, first.seq + 1);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert!(!loader.is_fetching().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandon_clears_slot() {
        let source = CountingSource::new(false);
        let loader = Arc::new(SnapshotLoader::new(source.clone()));

        let pending = {
            let loader = Arc::clone(&loader);
            tokio::spawn(async move { loader.fetch().await })
        };
        tokio::task::yield_now().await;
        assert!(loader.is_fetching().await);

        loader.abandon().await;
        assert!(!loader.is_fetching().await);
        pending.abort();
    }
}
