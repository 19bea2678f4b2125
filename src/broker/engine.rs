//! Broker engine
//!
//! This module contains the in-memory broker responsible for:
//! - the registry of connected subscriber handles and their lifecycle
//! - subject/key subscription bookkeeping and listener notification
//! - synchronous sends (inline or through a worker pool) with aggregate
//!   failure reporting
//! - asynchronous sends through a pipeline sharded by subscriber, so each
//!   subscriber sees its messages in submission order
//! - the replay cache used when a subscriber starts receiving from a past
//!   timestamp
//! - enable/disable admission control and delivery counters
//!
//! Concurrency and usage notes:
//! - The broker is shared as `Arc<Broker>`; every method takes `&self`.
//! - Registry, cache, disabled ids, listeners and each subscription table
//!   have their own lock. Lock order is cache, then registry, then a
//!   subscription table. No lock is held while a delivery target runs,
//!   except the cache lock during a replay.
//! - A delivery target must not publish from inside a replay: the publisher
//!   would wait on the cache lock held by that replay.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard};
use std::time::Duration;

use crossbeam_channel::Sender;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::broker::cache::ReplayCache;
use crate::broker::directory::{Directory, subscriber_name};
use crate::broker::listener::{BrokerListener, ListenerSet};
use crate::broker::message::Message;
use crate::broker::subscriber::{DeliveryTarget, Subscriber, SubscriberId};
use crate::broker::subscription::Key;
use crate::config::BrokerSettings;
use crate::queue::{Handler, KeyedShard, QueueOptions, RetryPolicy, SingleShard, WorkQueue};
use crate::utils::clock::{Clock, SystemClock};
use crate::utils::error::{BrokerError, DeliveryError, DeliveryFailure, Result};
use crate::utils::log_sink::{MessageLogger, TracingLogger};

pub struct Broker {
    settings: BrokerSettings,
    clock: Arc<dyn Clock>,
    registry: RwLock<Vec<Arc<Subscriber>>>,
    disabled: Mutex<HashSet<SubscriberId>>,
    cache: Mutex<ReplayCache>,
    listeners: ListenerSet,
    directory: Option<Arc<dyn Directory>>,
    sync_queue: Option<WorkQueue<SyncJob>>,
    async_queue: Option<WorkQueue<AsyncJob>>,
    delivered: Arc<AtomicU64>,
    closed: AtomicBool,
}

/// Assembles a broker with non-default collaborators.
pub struct BrokerBuilder {
    settings: BrokerSettings,
    clock: Arc<dyn Clock>,
    directory: Option<Arc<dyn Directory>>,
    logger: Arc<dyn MessageLogger>,
}

impl BrokerBuilder {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn directory(mut self, directory: Arc<dyn Directory>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Sink for asynchronous deliveries that failed on every attempt.
    pub fn logger(mut self, logger: Arc<dyn MessageLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn build(self) -> Broker {
        let settings = self.settings;
        let delivered = Arc::new(AtomicU64::new(0));

        let sync_queue = (settings.sync_workers > 1).then(|| {
            WorkQueue::start(
                QueueOptions::new("relaybus-sync")
                    .workers_per_shard(settings.sync_workers)
                    .capacity(settings.queue_capacity),
                SyncDelivery {
                    delivered: Arc::clone(&delivered),
                },
                SingleShard,
            )
        });

        let async_queue = (settings.async_shards > 0).then(|| {
            WorkQueue::start(
                QueueOptions::new("relaybus-async")
                    .shards(settings.async_shards)
                    .capacity(settings.queue_capacity)
                    .retry(RetryPolicy {
                        max_attempts: settings.max_delivery_attempts.max(1),
                        backoff: Duration::from_millis(settings.retry_backoff_ms),
                    }),
                AsyncDelivery {
                    delivered: Arc::clone(&delivered),
                    logger: self.logger,
                },
                KeyedShard::new(|job: &AsyncJob| job.subscriber.id().to_string()),
            )
        });

        info!(
            "Broker started: replay window {}ms, {} sync worker(s), {} async shard(s)",
            settings.replay_window_ms, settings.sync_workers, settings.async_shards
        );

        Broker {
            cache: Mutex::new(ReplayCache::new(settings.replay_window_ms)),
            settings,
            clock: self.clock,
            registry: RwLock::new(Vec::new()),
            disabled: Mutex::new(HashSet::new()),
            listeners: ListenerSet::default(),
            directory: self.directory,
            sync_queue,
            async_queue,
            delivered,
            closed: AtomicBool::new(false),
        }
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

impl Broker {
    pub fn new() -> Self {
        Self::with_settings(BrokerSettings::default())
    }

    pub fn with_settings(settings: BrokerSettings) -> Self {
        Self::builder(settings).build()
    }

    pub fn builder(settings: BrokerSettings) -> BrokerBuilder {
        BrokerBuilder {
            settings,
            clock: Arc::new(SystemClock),
            directory: None,
            logger: Arc::new(TracingLogger),
        }
    }

    pub fn settings(&self) -> &BrokerSettings {
        &self.settings
    }

    /// Current broker time in milliseconds.
    pub fn now(&self) -> i64 {
        self.clock.now_millis()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn registry(&self) -> RwLockReadGuard<'_, Vec<Arc<Subscriber>>> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn disabled(&self) -> MutexGuard<'_, HashSet<SubscriberId>> {
        self.disabled.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cache(&self) -> MutexGuard<'_, ReplayCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscriber(&self, id: &str) -> Option<Arc<Subscriber>> {
        self.registry().iter().find(|s| s.id() == id).cloned()
    }

    fn require(&self, id: &str) -> Result<Arc<Subscriber>> {
        self.subscriber(id)
            .ok_or_else(|| BrokerError::NotConnected { id: id.to_string() })
    }

    pub fn add_listener(&self, listener: Arc<dyn BrokerListener>) {
        self.listeners.add(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn BrokerListener>) -> bool {
        self.listeners.remove(listener)
    }

    /// Registers `target` under `id`, or under a fresh id when none is given.
    ///
    /// Reconnecting the same target under its id is a no-op; binding a
    /// different target to a connected id fails.
    pub fn connect(
        &self,
        id: Option<&str>,
        target: Arc<dyn DeliveryTarget>,
    ) -> Result<SubscriberId> {
        if self.is_closed() {
            return Err(BrokerError::Closed);
        }
        let id = id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let subscriber = {
            let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
            if let Some(existing) = registry.iter().find(|s| s.id() == id) {
                if existing.has_target(&target) {
                    debug!("Subscriber {id} is already connected");
                    return Ok(id);
                }
                return Err(BrokerError::Connect { id });
            }
            let subscriber = Arc::new(Subscriber::new(id.clone(), target));
            subscriber.set_enabled(!self.disabled().contains(&id));
            registry.push(Arc::clone(&subscriber));
            subscriber
        };

        if let Some(directory) = &self.directory {
            if !directory.register(&subscriber_name(&id), Arc::clone(&subscriber)) {
                warn!("Directory already holds an entry for subscriber {id}");
            }
        }

        info!("Subscriber {id} connected");
        self.listeners.notify(|l| l.connected(&id));
        Ok(id)
    }

    /// Removes the handle registered under `id`. Returns false if it was not
    /// connected.
    pub fn disconnect(&self, id: &str) -> bool {
        let removed = {
            let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
            let index = registry.iter().position(|s| s.id() == id);
            index.map(|index| registry.remove(index))
        };
        let Some(subscriber) = removed else {
            return false;
        };
        self.release(&subscriber);
        true
    }

    fn release(&self, subscriber: &Subscriber) {
        subscriber.set_receiving(false);
        if let Some(directory) = &self.directory {
            directory.unregister(&subscriber_name(subscriber.id()));
        }
        info!("Subscriber {} closed", subscriber.id());
        self.listeners.notify(|l| l.closed(subscriber.id()));
    }

    /// Subscribes `id` to `keys` of `subject`, or to every key when `keys`
    /// is `None`. Returns the keys that were newly added.
    pub fn add_subject(&self, id: &str, subject: &str, keys: Option<&[&str]>) -> Result<Vec<Key>> {
        let subscriber = self.require(id)?;
        let changed = subscriber.add_subject(subject, keys);
        if !changed.is_empty() {
            debug!("Subscriber {id} added {subject} {changed:?}");
            self.listeners
                .notify(|l| l.subject_added(id, subject, &changed));
        }
        Ok(changed)
    }

    /// Unsubscribes `id` from `keys` of `subject`; `None` removes the wildcard.
    /// Returns the keys that were actually removed.
    pub fn remove_subject(
        &self,
        id: &str,
        subject: &str,
        keys: Option<&[&str]>,
    ) -> Result<Vec<Key>> {
        let subscriber = self.require(id)?;
        let changed = subscriber.remove_subject(subject, keys);
        if !changed.is_empty() {
            debug!("Subscriber {id} removed {subject} {changed:?}");
            self.listeners
                .notify(|l| l.subject_removed(id, subject, &changed));
        }
        Ok(changed)
    }

    /// Starts live delivery to `id`. With `from` set, every cached message
    /// stamped at or after `from` that the subscriber wants is replayed first,
    /// in cache order. Returns the number of replayed messages.
    ///
    /// The replay runs under the cache lock and the handle is only marked
    /// receiving once it is done, so each message is either replayed or
    /// delivered live, never both.
    pub fn start_receive(&self, id: &str, from: Option<i64>) -> Result<usize> {
        let subscriber = self.require(id)?;
        subscriber.set_replay_from(from);

        let cache = self.cache();
        let mut replayed = 0;
        if let Some(from) = subscriber.replay_from() {
            for message in cache.since(from).filter(|m| subscriber.wants(m)) {
                match deliver(&subscriber, message, &self.delivered) {
                    Ok(true) => replayed += 1,
                    Ok(false) => {}
                    Err(e) => warn!("Replay of {} to {id} failed: {e}", message.id()),
                }
            }
            debug!("Replayed {replayed} message(s) to {id} from {from}");
        }
        subscriber.set_receiving(true);
        drop(cache);

        info!("Subscriber {id} started receiving");
        Ok(replayed)
    }

    pub fn stop_receive(&self, id: &str) -> Result<()> {
        self.require(id)?.set_receiving(false);
        info!("Subscriber {id} stopped receiving");
        Ok(())
    }

    /// Stamps and caches `message`, then picks the handles that accept it.
    /// Recipients are chosen under the cache lock to line up with replay.
    fn prepare(&self, message: Message) -> (Arc<Message>, Vec<Arc<Subscriber>>) {
        let now = self.clock.now_millis();
        let mut cache = self.cache();
        let message = cache.append(message, now);
        let targets = self
            .registry()
            .iter()
            .filter(|s| s.accepts(&message))
            .cloned()
            .collect();
        (message, targets)
    }

    /// Delivers `message` to every matching subscriber and waits for all of
    /// them. Returns the number of matching subscribers.
    ///
    /// Every subscriber is attempted; failures are reported together as
    /// `BrokerError::Delivery` naming the subscribers that failed.
    pub fn send(&self, message: Message) -> Result<usize> {
        if self.is_closed() {
            return Err(BrokerError::Closed);
        }
        self.dispatch(message)
    }

    fn dispatch(&self, message: Message) -> Result<usize> {
        let (message, targets) = self.prepare(message);
        debug!(
            "Sending {} on {:?} to {} subscriber(s)",
            message.id(),
            message.subject(),
            targets.len()
        );
        if targets.is_empty() {
            return Ok(0);
        }

        let failures = match &self.sync_queue {
            Some(queue) => self.fan_out(queue, &message, &targets),
            None => targets
                .iter()
                .filter_map(|subscriber| {
                    deliver(subscriber, &message, &self.delivered)
                        .err()
                        .map(|error| DeliveryFailure {
                            id: subscriber.id().to_string(),
                            error,
                        })
                })
                .collect(),
        };

        if failures.is_empty() {
            Ok(targets.len())
        } else {
            warn!(
                "Message {} failed for {} of {} subscriber(s)",
                message.id(),
                failures.len(),
                targets.len()
            );
            Err(BrokerError::Delivery { failures })
        }
    }

    fn fan_out(
        &self,
        queue: &WorkQueue<SyncJob>,
        message: &Arc<Message>,
        targets: &[Arc<Subscriber>],
    ) -> Vec<DeliveryFailure> {
        let (done_tx, done_rx) = crossbeam_channel::bounded(targets.len());
        let mut failures = Vec::new();
        let mut dispatched = 0;

        for subscriber in targets {
            let job = SyncJob {
                subscriber: Arc::clone(subscriber),
                message: Arc::clone(message),
                done: done_tx.clone(),
            };
            match queue.submit(job) {
                Ok(()) => dispatched += 1,
                Err(e) => failures.push(DeliveryFailure {
                    id: subscriber.id().to_string(),
                    error: DeliveryError::new(e.to_string()),
                }),
            }
        }
        drop(done_tx);

        for _ in 0..dispatched {
            match done_rx.recv() {
                Ok(Some(failure)) => failures.push(failure),
                Ok(None) => {}
                Err(_) => break,
            }
        }
        failures
    }

    /// Queues `message` for every matching subscriber and returns without
    /// waiting. Deliveries to one subscriber keep their submission order.
    /// Failures are retried and then only logged.
    pub fn send_async(&self, message: Message) -> Result<usize> {
        if self.is_closed() {
            return Err(BrokerError::Closed);
        }
        let Some(queue) = &self.async_queue else {
            return Err(BrokerError::Unsupported {
                operation: "send_async",
            });
        };

        let (message, targets) = self.prepare(message);
        debug!(
            "Queueing {} on {:?} for {} subscriber(s)",
            message.id(),
            message.subject(),
            targets.len()
        );
        for subscriber in &targets {
            queue.submit(AsyncJob {
                subscriber: Arc::clone(subscriber),
                message: Arc::clone(&message),
            })?;
        }
        Ok(targets.len())
    }

    /// Shuts the broker down: sends the server-close message to every
    /// subscriber, drains and stops both pipelines and closes every handle.
    /// Later calls do nothing.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Broker closing");

        if let Err(e) = self.dispatch(Message::server_close()) {
            warn!("Server close message was not delivered everywhere: {e}");
        }
        if let Some(queue) = &self.sync_queue {
            queue.shutdown();
        }
        if let Some(queue) = &self.async_queue {
            queue.shutdown();
        }

        let subscribers = {
            let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *registry)
        };
        for subscriber in &subscribers {
            self.release(subscriber);
        }
        info!("Broker closed");
    }

    pub fn enable(&self, id: &str) {
        self.disabled().remove(id);
        if let Some(subscriber) = self.subscriber(id) {
            subscriber.set_enabled(true);
        }
        info!("Subscriber {id} enabled");
    }

    /// Disabled subscribers keep their subscriptions but deliveries to them
    /// are dropped. The state outlives reconnects.
    pub fn disable(&self, id: &str) {
        self.disabled().insert(id.to_string());
        if let Some(subscriber) = self.subscriber(id) {
            subscriber.set_enabled(false);
        }
        info!("Subscriber {id} disabled");
    }

    pub fn is_enabled(&self, id: &str) -> bool {
        !self.disabled().contains(id)
    }

    /// Connected ids in connection order.
    pub fn connected_ids(&self) -> Vec<SubscriberId> {
        self.registry().iter().map(|s| s.id().to_string()).collect()
    }

    pub fn enabled_ids(&self) -> Vec<SubscriberId> {
        self.registry()
            .iter()
            .filter(|s| s.is_enabled())
            .map(|s| s.id().to_string())
            .collect()
    }

    /// Every disabled id, connected or not, sorted.
    pub fn disabled_ids(&self) -> Vec<SubscriberId> {
        let mut ids: Vec<SubscriberId> = self.disabled().iter().cloned().collect();
        ids.sort();
        ids
    }

    /// Messages delivered to `id` since it connected or since the last reset.
    pub fn send_count(&self, id: &str) -> Option<u64> {
        self.subscriber(id).map(|s| s.delivered_count())
    }

    /// Messages delivered to any subscriber since start or the last reset.
    pub fn total_send_count(&self) -> u64 {
        self.delivered.load(Ordering::SeqCst)
    }

    pub fn reset_send_counts(&self) {
        self.delivered.store(0, Ordering::SeqCst);
        for subscriber in self.registry().iter() {
            subscriber.reset_delivered_count();
        }
    }

    pub fn cached_messages(&self) -> usize {
        self.cache().len()
    }

    /// Timestamps of the cached messages, oldest first.
    pub fn cached_timestamps(&self) -> Vec<i64> {
        self.cache().timestamps()
    }
}

/// Returns whether the message actually reached the target.
fn deliver(
    subscriber: &Subscriber,
    message: &Message,
    delivered: &AtomicU64,
) -> Result<bool, DeliveryError> {
    let reached = subscriber.deliver(message)?;
    if reached {
        delivered.fetch_add(1, Ordering::SeqCst);
    }
    Ok(reached)
}

struct SyncJob {
    subscriber: Arc<Subscriber>,
    message: Arc<Message>,
    done: Sender<Option<DeliveryFailure>>,
}

struct SyncDelivery {
    delivered: Arc<AtomicU64>,
}

impl Handler<SyncJob> for SyncDelivery {
    fn handle(&self, job: &SyncJob) -> Result<(), DeliveryError> {
        let failure = deliver(&job.subscriber, &job.message, &self.delivered)
            .err()
            .map(|error| DeliveryFailure {
                id: job.subscriber.id().to_string(),
                error,
            });
        // the sender may have given up waiting; nothing to report to then
        let _ = job.done.send(failure);
        Ok(())
    }
}

struct AsyncJob {
    subscriber: Arc<Subscriber>,
    message: Arc<Message>,
}

struct AsyncDelivery {
    delivered: Arc<AtomicU64>,
    logger: Arc<dyn MessageLogger>,
}

impl Handler<AsyncJob> for AsyncDelivery {
    fn handle(&self, job: &AsyncJob) -> Result<(), DeliveryError> {
        deliver(&job.subscriber, &job.message, &self.delivered).map(|_| ())
    }

    fn exhausted(&self, job: AsyncJob, error: DeliveryError) {
        warn!(
            "Dropping {} for subscriber {}: {error}",
            job.message.id(),
            job.subscriber.id()
        );
        self.logger
            .log(job.message.id(), job.message.payload(), Some(&error));
    }
}
