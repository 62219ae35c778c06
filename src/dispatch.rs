//! Order-preserving worker pool
//!
//! A batch goes through three stages:
//! 1. cache check: hits and negative entries are answered without a provider call
//! 2. in-batch de-duplication: requests sharing a cache key ride on the first one
//! 3. a bounded pool of workers drains the remaining requests from a shared queue
//!
//! Results come back in input order whatever order the workers finish in.
//! A fatal failure (provider unreachable, credentials refused) cancels the
//! rest of the batch; every unfinished slot then carries that reason.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::cache::{Cache, decode_value, encode_value};
use crate::error::FailureReason;
use crate::models::{EnrichmentRequest, EnrichmentResult, EnrichmentStatus};

/// One kind of provider lookup, as seen by the dispatcher
#[async_trait]
pub trait Lookup: Send + Sync + 'static {
    type Output: Serialize + DeserializeOwned + Clone + Send + Sync + 'static;

    /// Requests with equal keys share a provider call and a cache entry
    fn cache_key(&self, request: &EnrichmentRequest) -> String;

    /// Resolve one request, retries included
    async fn lookup(&self, request: &EnrichmentRequest) -> Result<Self::Output, FailureReason>;
}

struct Job {
    position: usize,
    key: String,
    request: EnrichmentRequest,
}

type Queue = Arc<Mutex<VecDeque<Job>>>;
type Completed<T> = mpsc::UnboundedSender<(usize, EnrichmentStatus<T>)>;
type Fatal = Arc<OnceLock<FailureReason>>;

/// Cache reads in flight while a batch is being checked against the cache
const CACHE_READ_CONCURRENCY: usize = 32;

pub struct Dispatcher {
    cache: Arc<dyn Cache>,
    workers: usize,
    negative_results: bool,
}

impl Dispatcher {
    #[must_use]
    pub fn new(cache: Arc<dyn Cache>, workers: usize, negative_results: bool) -> Self {
        Self {
            cache,
            workers: workers.max(1),
            negative_results,
        }
    }

    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run a batch; the output has one result per request, in request order
    #[instrument(name = "dispatch", skip_all, fields(requests = requests.len()))]
    pub async fn run<L: Lookup>(
        &self,
        lookup: Arc<L>,
        requests: Vec<EnrichmentRequest>,
        cancel: &CancellationToken,
    ) -> Vec<EnrichmentResult<L::Output>> {
        let mut slots: Vec<Option<EnrichmentStatus<L::Output>>> =
            (0..requests.len()).map(|_| None).collect();
        let mut leaders: HashMap<String, usize> = HashMap::new();
        let mut followers: Vec<(usize, usize)> = Vec::new();
        let mut unique: Vec<(usize, String)> = Vec::new();

        for (position, request) in requests.iter().enumerate() {
            let key = lookup.cache_key(request);
            if let Some(&leader) = leaders.get(&key) {
                followers.push((position, leader));
                continue;
            }
            leaders.insert(key.clone(), position);
            unique.push((position, key));
        }

        let hits: Vec<Option<EnrichmentStatus<L::Output>>> = stream::iter(&unique)
            .map(|(_, key)| self.cached(key))
            .buffered(CACHE_READ_CONCURRENCY)
            .collect()
            .await;

        let mut pending = VecDeque::new();
        let mut cache_hits = 0usize;
        for ((position, key), hit) in unique.into_iter().zip(hits) {
            match hit {
                Some(status) => {
                    cache_hits += 1;
                    slots[position] = Some(status);
                }
                None => pending.push_back(Job {
                    position,
                    key,
                    request: requests[position],
                }),
            }
        }

        let dispatched = pending.len();
        info!(
            cache_hits,
            duplicates = followers.len(),
            dispatched,
            "Dispatching batch"
        );

        let fatal: Fatal = Arc::new(OnceLock::new());
        if dispatched > 0 {
            let batch = cancel.child_token();
            let (tx, mut rx) = mpsc::unbounded_channel();
            let queue: Queue = Arc::new(Mutex::new(pending));
            let mut workers = JoinSet::new();

            for worker in 0..self.workers.min(dispatched) {
                workers.spawn(work(
                    worker,
                    Arc::clone(&queue),
                    Arc::clone(&lookup),
                    Arc::clone(&self.cache),
                    self.negative_results,
                    batch.clone(),
                    Arc::clone(&fatal),
                    tx.clone(),
                ));
            }
            drop(tx);

            while let Some((position, status)) = rx.recv().await {
                slots[position] = Some(status);
            }
            while let Some(joined) = workers.join_next().await {
                if let Err(e) = joined {
                    warn!(error = %e, "Worker task failed");
                }
            }
        }

        for (position, leader) in followers {
            slots[position] = slots[leader].clone();
        }

        let unfinished = match fatal.get() {
            Some(reason) => reason.clone(),
            None if cancel.is_cancelled() => FailureReason::Cancelled,
            None => FailureReason::Internal("lookup did not complete".to_string()),
        };
        requests
            .iter()
            .zip(slots)
            .map(|(request, slot)| EnrichmentResult {
                id: request.id,
                status: slot.unwrap_or_else(|| EnrichmentStatus::Failed(unfinished.clone())),
            })
            .collect()
    }

    /// A cache read that fails is treated as a miss
    async fn cached<T: DeserializeOwned>(&self, key: &str) -> Option<EnrichmentStatus<T>> {
        let entry = match self.cache.get(key).await {
            Ok(entry) => entry?,
            Err(e) => {
                warn!(key, error = %e, "Cache read failed, treating as miss");
                return None;
            }
        };

        match entry.value {
            None if self.negative_results => Some(EnrichmentStatus::Failed(FailureReason::NoData)),
            None => None,
            Some(bytes) => match decode_value(&bytes) {
                Ok(value) => Some(EnrichmentStatus::Ok(value)),
                Err(e) => {
                    warn!(key, error = %e, "Unreadable cache entry, treating as miss");
                    None
                }
            },
        }
    }
}

async fn work<L: Lookup>(
    worker: usize,
    queue: Queue,
    lookup: Arc<L>,
    cache: Arc<dyn Cache>,
    negative_results: bool,
    cancel: CancellationToken,
    fatal: Fatal,
    completed: Completed<L::Output>,
) {
    let mut handled = 0usize;

    loop {
        if cancel.is_cancelled() {
            break;
        }
        let Some(job) = queue.lock().await.pop_front() else {
            break;
        };

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            outcome = lookup.lookup(&job.request) => outcome,
        };

        let status = match outcome {
            Ok(value) => {
                match encode_value(&value) {
                    Ok(bytes) => store(&*cache, &job.key, Some(bytes)).await,
                    Err(e) => warn!(key = %job.key, error = %e, "Result not cacheable"),
                }
                EnrichmentStatus::Ok(value)
            }
            Err(reason) => {
                if reason.is_fatal() {
                    warn!(worker, error = %reason, "Aborting batch");
                    let _ = fatal.set(reason.clone());
                    cancel.cancel();
                } else if negative_results && reason.is_negative_cacheable() {
                    store(&*cache, &job.key, None).await;
                }
                EnrichmentStatus::Failed(reason)
            }
        };

        handled += 1;
        if completed.send((job.position, status)).is_err() {
            break;
        }
    }

    debug!(worker, handled, "Worker finished");
}

async fn store(cache: &dyn Cache, key: &str, value: Option<Vec<u8>>) {
    if let Err(e) = cache.put(key, value).await {
        warn!(key, error = %e, "Cache write failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::models::{Coordinate, RequestKind};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Echoes the latitude back; latitude 0 has no data
    #[derive(Default)]
    struct Echo {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Lookup for Echo {
        type Output = f64;

        fn cache_key(&self, request: &EnrichmentRequest) -> String {
            request.coordinate.cache_key("echo")
        }

        async fn lookup(&self, request: &EnrichmentRequest) -> Result<f64, FailureReason> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            let latitude = request.coordinate.latitude;
            if latitude == 0.0 {
                Err(FailureReason::NoData)
            } else {
                Ok(latitude)
            }
        }
    }

    /// Every call fails as if the provider refused our credentials
    #[derive(Default)]
    struct Refusing {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Lookup for Refusing {
        type Output = f64;

        fn cache_key(&self, request: &EnrichmentRequest) -> String {
            request.coordinate.cache_key("refusing")
        }

        async fn lookup(&self, _request: &EnrichmentRequest) -> Result<f64, FailureReason> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(FailureReason::ProviderUnavailable("HTTP 401".to_string()))
        }
    }

    fn requests(latitudes: &[f64]) -> Vec<EnrichmentRequest> {
        let coordinates: Vec<Coordinate> = latitudes
            .iter()
            .map(|&lat| Coordinate::from_degrees(lat, 5.0))
            .collect();
        EnrichmentRequest::batch(&coordinates, RequestKind::Geocode)
    }

    #[tokio::test]
    async fn test_results_follow_input_order() {
        let dispatcher = Dispatcher::new(Arc::new(MemoryCache::new()), 4, true);
        let echo = Arc::new(Echo::default());
        let latitudes: Vec<f64> = (1..=20).map(f64::from).collect();

        let results = dispatcher
            .run(Arc::clone(&echo), requests(&latitudes), &CancellationToken::new())
            .await;

        let got: Vec<f64> = results.iter().map(|r| *r.payload().unwrap()).collect();
        assert_eq!(got, latitudes);
        assert!(results.iter().enumerate().all(|(i, r)| r.id == i));
    }

    #[tokio::test]
    async fn test_duplicates_share_one_call() {
        let dispatcher = Dispatcher::new(Arc::new(MemoryCache::new()), 3, true);
        let echo = Arc::new(Echo::default());

        let results = dispatcher
            .run(
                Arc::clone(&echo),
                requests(&[7.0, 8.0, 7.0, 7.0]),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(echo.calls.load(Ordering::SeqCst), 2);
        assert_eq!(results[3], EnrichmentResult::ok(3, 7.0));
    }

    #[tokio::test]
    async fn test_negative_entries_short_circuit_next_batch() {
        let cache = Arc::new(MemoryCache::new());
        let dispatcher = Dispatcher::new(cache.clone(), 2, true);
        let echo = Arc::new(Echo::default());
        let token = CancellationToken::new();

        let first = dispatcher.run(Arc::clone(&echo), requests(&[0.0, 1.0]), &token).await;
        let second = dispatcher.run(Arc::clone(&echo), requests(&[0.0, 1.0]), &token).await;

        assert_eq!(first, second);
        assert_eq!(second[0].failure(), Some(&FailureReason::NoData));
        assert_eq!(echo.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len().await, 2);
    }

    #[tokio::test]
    async fn test_negative_caching_can_be_disabled() {
        let cache = Arc::new(MemoryCache::new());
        let dispatcher = Dispatcher::new(cache.clone(), 2, false);
        let echo = Arc::new(Echo::default());
        let token = CancellationToken::new();

        dispatcher.run(Arc::clone(&echo), requests(&[0.0]), &token).await;
        dispatcher.run(Arc::clone(&echo), requests(&[0.0]), &token).await;

        assert_eq!(echo.calls.load(Ordering::SeqCst), 2);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let dispatcher = Dispatcher::new(Arc::new(MemoryCache::new()), 2, true);
        let echo = Arc::new(Echo::default());
        let token = CancellationToken::new();
        token.cancel();

        let results = dispatcher
            .run(Arc::clone(&echo), requests(&[1.0, 2.0, 1.0]), &token)
            .await;

        assert_eq!(echo.calls.load(Ordering::SeqCst), 0);
        assert!(
            results
                .iter()
                .all(|r| r.failure() == Some(&FailureReason::Cancelled))
        );
    }

    #[tokio::test]
    async fn test_fatal_failure_aborts_remaining_requests() {
        let cache = Arc::new(MemoryCache::new());
        let dispatcher = Dispatcher::new(cache.clone(), 1, true);
        let refusing = Arc::new(Refusing::default());
        let token = CancellationToken::new();

        let results = dispatcher
            .run(Arc::clone(&refusing), requests(&[1.0, 2.0, 3.0, 4.0, 5.0]), &token)
            .await;

        assert_eq!(refusing.calls.load(Ordering::SeqCst), 1);
        assert_eq!(results.len(), 5);
        assert!(
            results
                .iter()
                .all(|r| r.failure().is_some_and(FailureReason::is_fatal))
        );
        assert!(!token.is_cancelled());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_many_warm_keys_are_all_served_from_cache() {
        let cache = Arc::new(MemoryCache::new());
        let dispatcher = Dispatcher::new(cache.clone(), 4, true);
        let echo = Arc::new(Echo::default());
        let token = CancellationToken::new();
        let latitudes: Vec<f64> = (1..=100).map(f64::from).collect();

        dispatcher.run(Arc::clone(&echo), requests(&latitudes), &token).await;
        let warm = dispatcher.run(Arc::clone(&echo), requests(&latitudes), &token).await;

        assert_eq!(echo.calls.load(Ordering::SeqCst), 100);
        let got: Vec<f64> = warm.iter().map(|r| *r.payload().unwrap()).collect();
        assert_eq!(got, latitudes);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let dispatcher = Dispatcher::new(Arc::new(MemoryCache::new()), 2, true);
        let results = dispatcher
            .run(Arc::new(Echo::default()), Vec::new(), &CancellationToken::new())
            .await;
        assert!(results.is_empty());
    }
}
