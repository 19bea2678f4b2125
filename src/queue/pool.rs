use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, error, info};

use crate::utils::error::{DeliveryError, QueueError};

/// Processes one queued item.
pub trait Handler<T>: Send + Sync + 'static {
    fn handle(&self, item: &T) -> Result<(), DeliveryError>;

    /// Called once an item has failed on every attempt the retry policy allows.
    fn exhausted(&self, _item: T, _error: DeliveryError) {}
}

/// Chooses the shard an item is queued on.
pub trait ShardStrategy<T>: Send + Sync + 'static {
    fn shard(&self, item: &T, shards: usize) -> usize;
}

/// Routes every item to the first shard.
#[derive(Debug, Default, Clone, Copy)]
pub struct SingleShard;

impl<T> ShardStrategy<T> for SingleShard {
    fn shard(&self, _item: &T, _shards: usize) -> usize {
        0
    }
}

/// Routes items by hashing a key extracted from the item. Equal keys always
/// land on the same shard.
pub struct KeyedShard<T, K, F> {
    key: F,
    _marker: PhantomData<fn(&T) -> K>,
}

impl<T, K, F> KeyedShard<T, K, F>
where
    F: Fn(&T) -> K,
{
    pub fn new(key: F) -> Self {
        Self {
            key,
            _marker: PhantomData,
        }
    }
}

impl<T, K, F> ShardStrategy<T> for KeyedShard<T, K, F>
where
    T: 'static,
    K: Hash + 'static,
    F: Fn(&T) -> K + Send + Sync + 'static,
{
    fn shard(&self, item: &T, shards: usize) -> usize {
        let mut hasher = DefaultHasher::new();
        (self.key)(item).hash(&mut hasher);
        (hasher.finish() % shards.max(1) as u64) as usize
    }
}

/// How often a failing item is attempted before it is handed to
/// `Handler::exhausted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::ZERO,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

#[derive(Debug, Clone)]
pub struct QueueOptions {
    /// Name used for worker threads and log lines.
    pub name: String,
    pub shards: usize,
    pub workers_per_shard: usize,
    /// Bound of each shard channel; submitters block while a shard is full.
    pub capacity: usize,
    pub retry: RetryPolicy,
}

impl QueueOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shards: 1,
            workers_per_shard: 1,
            capacity: 1024,
            retry: RetryPolicy::none(),
        }
    }

    pub fn shards(mut self, shards: usize) -> Self {
        self.shards = shards;
        self
    }

    pub fn workers_per_shard(mut self, workers: usize) -> Self {
        self.workers_per_shard = workers;
        self
    }

    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// A bounded, sharded work queue served by OS threads.
pub struct WorkQueue<T> {
    name: String,
    senders: RwLock<Vec<Sender<T>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    strategy: Box<dyn ShardStrategy<T>>,
}

impl<T: Send + 'static> WorkQueue<T> {
    /// Spawns `shards * workers_per_shard` workers, all sharing `handler`.
    pub fn start<H, S>(options: QueueOptions, handler: H, strategy: S) -> Self
    where
        H: Handler<T>,
        S: ShardStrategy<T>,
    {
        let shards = options.shards.max(1);
        let per_shard = options.workers_per_shard.max(1);
        let handler = Arc::new(handler);
        let mut senders = Vec::with_capacity(shards);
        let mut workers = Vec::with_capacity(shards * per_shard);

        for shard in 0..shards {
            let (tx, rx) = crossbeam_channel::bounded::<T>(options.capacity.max(1));
            senders.push(tx);
            for worker in 0..per_shard {
                let rx = rx.clone();
                let handler = Arc::clone(&handler);
                let retry = options.retry;
                let thread_name = format!("{}-{shard}-{worker}", options.name);
                let spawned = thread::Builder::new()
                    .name(thread_name.clone())
                    .spawn(move || run_worker(rx, handler, retry));
                match spawned {
                    Ok(handle) => workers.push(handle),
                    Err(e) => error!("Failed to spawn worker {thread_name}: {e}"),
                }
            }
        }

        info!(
            "Work queue '{}' started with {shards} shard(s) x {per_shard} worker(s)",
            options.name
        );

        Self {
            name: options.name,
            senders: RwLock::new(senders),
            workers: Mutex::new(workers),
            strategy: Box::new(strategy),
        }
    }

    /// Queues `item` on the shard picked by the strategy. Blocks while that
    /// shard is full.
    pub fn submit(&self, item: T) -> Result<(), QueueError> {
        let senders = self.senders.read().unwrap_or_else(PoisonError::into_inner);
        if senders.is_empty() {
            return Err(QueueError::Closed);
        }
        let index = self.strategy.shard(&item, senders.len()) % senders.len();
        senders[index].send(item).map_err(|_| QueueError::Closed)
    }

    pub fn shards(&self) -> usize {
        self.senders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shards() == 0
    }

    /// Refuses further submissions, lets the workers drain what is already
    /// queued and joins them. Idempotent.
    pub fn shutdown(&self) {
        let dropped = {
            let mut senders = self.senders.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *senders)
        };
        if dropped.is_empty() {
            return;
        }
        drop(dropped);

        let workers = {
            let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *workers)
        };
        let current = thread::current().id();
        for worker in workers {
            // a handler may shut its own queue down; it cannot join itself
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                error!("Worker of queue '{}' panicked", self.name);
            }
        }
        info!("Work queue '{}' shut down", self.name);
    }
}

impl<T> Drop for WorkQueue<T> {
    fn drop(&mut self) {
        let senders = self.senders.get_mut().unwrap_or_else(PoisonError::into_inner);
        senders.clear();
    }
}

fn run_worker<T, H: Handler<T>>(rx: Receiver<T>, handler: Arc<H>, retry: RetryPolicy) {
    for item in rx.iter() {
        let mut attempt = 1;
        loop {
            let outcome = catch_unwind(AssertUnwindSafe(|| handler.handle(&item)))
                .unwrap_or_else(|_| Err(DeliveryError::new("handler panicked")));
            match outcome {
                Ok(()) => break,
                Err(e) if attempt < retry.max_attempts => {
                    debug!("Attempt {attempt} failed: {e}; retrying");
                    attempt += 1;
                    if !retry.backoff.is_zero() {
                        thread::sleep(retry.backoff);
                    }
                }
                Err(e) => {
                    handler.exhausted(item, e);
                    break;
                }
            }
        }
    }
}
