use parking_lot::Mutex;
use sentinel_common::{StopSignal, TaskHandle};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::store::{LatestResultStore, Published};

pub type ObserverId = u64;

struct Observer {
    tx: mpsc::Sender<Arc<str>>,
    /// Store sequence at registration; only newer results are delivered.
    joined_after: u64,
}

/// Samples the result store on a fixed period and fans the serialized
/// result out to every registered observer.
pub struct Broadcaster {
    store: LatestResultStore,
    observers: Mutex<HashMap<ObserverId, Observer>>,
    next_id: AtomicU64,
    period: Duration,
    queue: usize,
    payload_cache: Mutex<Option<(u64, Arc<str>)>>,
}

impl Broadcaster {
    pub fn new(store: LatestResultStore, period: Duration, queue: usize) -> Self {
        Self {
            store,
            observers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            period,
            queue: queue.max(1),
            payload_cache: Mutex::new(None),
        }
    }

    /// Add an observer. Messages arrive on the returned receiver; it yields
    /// `None` once the broadcaster drops the observer.
    pub fn register(&self) -> (ObserverId, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(self.queue);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut observers = self.observers.lock();
        let joined_after = self.store.current_seq();
        observers.insert(id, Observer { tx, joined_after });
        info!(observer = id, observers = observers.len(), "observer registered");
        (id, rx)
    }

    pub fn unregister(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.lock();
        let removed = observers.remove(&id).is_some();
        if removed {
            info!(observer = id, observers = observers.len(), "observer unregistered");
        }
        removed
    }

    pub fn observer_count(&self) -> usize {
        self.observers.lock().len()
    }

    /// One sampling cycle. Returns how many observers were sent the result.
    pub fn tick(&self) -> usize {
        let Some(published) = self.store.snapshot() else {
            return 0;
        };
        let payload = match self.payload(&published) {
            Ok(payload) => payload,
            Err(e) => {
                error!(seq = published.seq, error = %e, "failed to serialize result");
                return 0;
            }
        };

        let mut delivered = 0;
        let mut observers = self.observers.lock();
        observers.retain(|id, observer| {
            if published.seq <= observer.joined_after {
                return true;
            }
            match observer.tx.try_send(Arc::clone(&payload)) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    info!(observer = id, "observer is not keeping up, dropping it");
                    false
                }
                Err(TrySendError::Closed(_)) => {
                    info!(observer = id, "observer disconnected");
                    false
                }
            }
        });
        debug!(seq = published.seq, delivered, observers = observers.len(), "broadcast tick");
        delivered
    }

    /// Serialize once per published sequence.
    fn payload(&self, published: &Published) -> Result<Arc<str>, serde_json::Error> {
        let mut cache = self.payload_cache.lock();
        if let Some((seq, payload)) = cache.as_ref() {
            if *seq == published.seq {
                return Ok(Arc::clone(payload));
            }
        }
        let payload: Arc<str> = published.result.to_json(published.seq)?.into();
        *cache = Some((published.seq, Arc::clone(&payload)));
        Ok(payload)
    }

    pub fn start(self: Arc<Self>) -> TaskHandle {
        TaskHandle::spawn("broadcaster", move |stop| self.run(stop))
    }

    async fn run(self: Arc<Self>, mut stop: StopSignal) {
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(period = ?self.period, "broadcaster started");

        loop {
            tokio::select! {
                _ = stop.stopped() => break,
                _ = ticker.tick() => {
                    self.tick();
                }
            }
        }

        // Dropping the senders ends every observer's receive loop
        let dropped = {
            let mut observers = self.observers.lock();
            let n = observers.len();
            observers.clear();
            n
        };
        info!(observers = dropped, "broadcaster stopped");
    }
}
