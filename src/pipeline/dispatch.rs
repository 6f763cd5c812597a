//! Per-feed event dispatch.
//!
//! Each feed key gets its own queue drained by a single worker task, so events
//! of one feed run in arrival order and never overlap. Workers of different
//! feeds run in parallel, bounded by a shared semaphore.
//!
//! A worker retires once its feed is deleted or it stays idle for the
//! configured timeout. The next event for that feed starts a fresh worker.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, warn};

use super::event::InputEvent;
use super::orchestrator::{Pipeline, RunReport};
use crate::config::DispatchConfig;
use crate::{RelayError, Result};

/// Result of one handled event.
#[derive(Debug)]
pub struct Dispatched {
    pub feed_id: String,
    pub result: Result<RunReport>,
}

struct FeedQueue {
    sender: mpsc::Sender<InputEvent>,
    /// Events handed to `submit` and not yet received by the worker.
    /// Only changed upward while the queue map is locked.
    pending: Arc<AtomicUsize>,
    worker: JoinHandle<()>,
}

type QueueMap = Arc<Mutex<HashMap<String, FeedQueue>>>;

/// Routes input events to per-feed workers.
pub struct Dispatcher {
    pipeline: Arc<Pipeline>,
    queues: QueueMap,
    permits: Arc<Semaphore>,
    queue_capacity: usize,
    idle_timeout: Duration,
    results: mpsc::UnboundedSender<Dispatched>,
}

impl Dispatcher {
    /// Create a dispatcher and the receiver of its results.
    pub fn new(
        pipeline: Arc<Pipeline>,
        config: &DispatchConfig,
    ) -> (Self, mpsc::UnboundedReceiver<Dispatched>) {
        let (results, receiver) = mpsc::unbounded_channel();
        let dispatcher = Self {
            pipeline,
            queues: Arc::new(Mutex::new(HashMap::new())),
            permits: Arc::new(Semaphore::new(config.max_concurrent_feeds.max(1))),
            queue_capacity: config.queue_capacity.max(1),
            idle_timeout: config.idle_timeout(),
            results,
        };
        (dispatcher, receiver)
    }

    /// Queue an event behind earlier events of the same feed.
    ///
    /// Waits while the feed's queue is full.
    pub async fn submit(&self, event: InputEvent) -> Result<()> {
        let feed_id = event.feed_key().to_string();

        let (sender, pending) = {
            let mut queues = self.queues.lock().await;
            let queue = match queues.entry(feed_id.clone()) {
                Entry::Occupied(entry) if !entry.get().sender.is_closed() => entry.into_mut(),
                Entry::Occupied(mut entry) => {
                    entry.insert(self.spawn_worker(&feed_id));
                    entry.into_mut()
                }
                Entry::Vacant(entry) => entry.insert(self.spawn_worker(&feed_id)),
            };
            queue.pending.fetch_add(1, Ordering::SeqCst);
            (queue.sender.clone(), Arc::clone(&queue.pending))
        };

        if sender.send(event).await.is_err() {
            pending.fetch_sub(1, Ordering::SeqCst);
            return Err(RelayError::Validation(format!(
                "queue of feed {feed_id} is closed"
            )));
        }
        Ok(())
    }

    /// Number of feeds with a worker.
    pub async fn active_feeds(&self) -> usize {
        self.queues.lock().await.len()
    }

    /// Stop accepting events and wait until every queued event was handled.
    pub async fn shutdown(self) {
        let queues: Vec<(String, FeedQueue)> = self.queues.lock().await.drain().collect();
        let (feed_ids, workers): (Vec<String>, Vec<JoinHandle<()>>) = queues
            .into_iter()
            .map(|(feed_id, queue)| (feed_id, queue.worker))
            .unzip();

        for (feed_id, joined) in feed_ids.iter().zip(join_all(workers).await) {
            if let Err(e) = joined {
                error!("Worker of feed {} panicked: {}", feed_id, e);
            }
        }
    }

    fn spawn_worker(&self, feed_id: &str) -> FeedQueue {
        let (sender, mut receiver) = mpsc::channel::<InputEvent>(self.queue_capacity);
        let pending = Arc::new(AtomicUsize::new(0));
        let pipeline = Arc::clone(&self.pipeline);
        let permits = Arc::clone(&self.permits);
        let queues = Arc::clone(&self.queues);
        let idle_timeout = self.idle_timeout;
        let results = self.results.clone();
        let worker_pending = Arc::clone(&pending);
        let feed_id = feed_id.to_string();

        debug!("Starting worker for feed {}", feed_id);
        let worker = tokio::spawn(async move {
            let pending = worker_pending;
            loop {
                let event = match timeout(idle_timeout, receiver.recv()).await {
                    Ok(Some(event)) => event,
                    Ok(None) => break,
                    Err(_) => {
                        if retire(&queues, &feed_id, &pending).await {
                            debug!("Worker for feed {} idle, retiring", feed_id);
                            break;
                        }
                        continue;
                    }
                };
                pending.fetch_sub(1, Ordering::SeqCst);
                let deleted = matches!(event, InputEvent::FeedDeleted { .. });

                let result = {
                    let Ok(_permit) = permits.acquire().await else {
                        warn!("Dispatcher closed, dropping events of feed {}", feed_id);
                        break;
                    };
                    pipeline.handle(event).await
                };
                if let Err(e) = &result {
                    if e.is_retryable() {
                        warn!("Event for feed {} failed, may be redelivered: {}", feed_id, e);
                    } else {
                        error!("Event for feed {} failed: {}", feed_id, e);
                    }
                }

                let retired = deleted && retire(&queues, &feed_id, &pending).await;
                if results
                    .send(Dispatched {
                        feed_id: feed_id.clone(),
                        result,
                    })
                    .is_err()
                {
                    debug!("Result receiver dropped");
                }
                if retired {
                    break;
                }
            }
            debug!("Worker for feed {} stopped", feed_id);
        });

        FeedQueue {
            sender,
            pending,
            worker,
        }
    }
}

/// Remove a worker's queue if no event is on its way to it.
///
/// Returns whether the worker may stop. Submitters bump `pending` under the
/// same lock, so no event can arrive after a successful retire.
async fn retire(
    queues: &Mutex<HashMap<String, FeedQueue>>,
    feed_id: &str,
    pending: &Arc<AtomicUsize>,
) -> bool {
    let mut queues = queues.lock().await;
    if pending.load(Ordering::SeqCst) > 0 {
        return false;
    }
    if queues
        .get(feed_id)
        .is_some_and(|queue| Arc::ptr_eq(&queue.pending, pending))
    {
        queues.remove(feed_id);
    }
    true
}
