//! Per-key serial execution lanes.
//!
//! At most one job per key runs at a time; jobs submitted for a busy key wait
//! in FIFO order. A running job holds a [`LaneGuard`] and may finish
//! asynchronously (for example after a provider replies): the next job starts
//! only when the guard is dropped. Lanes are removed as soon as they go idle.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::dispatch::WorkerPool;

/// Keys a lane can be identified by.
pub trait LaneKey: Eq + Hash + Clone + Send + 'static {}

impl<T: Eq + Hash + Clone + Send + 'static> LaneKey for T {}

type LaneJob<K> = Box<dyn FnOnce(LaneGuard<K>) + Send + 'static>;

/// Keyed FIFO lanes running on a [`WorkerPool`].
pub struct SerialLanes<K: LaneKey> {
    shared: Arc<LaneShared<K>>,
}

struct LaneShared<K: LaneKey> {
    /// Present while a job for the key runs; holds the jobs waiting behind it.
    lanes: Mutex<HashMap<K, VecDeque<LaneJob<K>>>>,
    pool: WorkerPool,
}

/// Held by the running job of a lane. Dropping it starts the next job.
pub struct LaneGuard<K: LaneKey> {
    shared: Arc<LaneShared<K>>,
    key: K,
}

impl<K: LaneKey> SerialLanes<K> {
    /// Creates lanes whose jobs run on `pool`.
    pub fn new(pool: WorkerPool) -> Self {
        Self {
            shared: Arc::new(LaneShared {
                lanes: Mutex::new(HashMap::new()),
                pool,
            }),
        }
    }

    /// Runs `job` after every job previously submitted for `key` has released
    /// its guard.
    pub fn submit(&self, key: K, job: impl FnOnce(LaneGuard<K>) + Send + 'static) {
        let job: LaneJob<K> = Box::new(job);
        let start_now = {
            let mut lanes = self.shared.lanes.lock();
            match lanes.entry(key.clone()) {
                Entry::Occupied(mut waiting) => {
                    waiting.get_mut().push_back(job);
                    None
                }
                Entry::Vacant(idle) => {
                    idle.insert(VecDeque::new());
                    Some(job)
                }
            }
        };
        if let Some(job) = start_now {
            LaneShared::start(&self.shared, key, job);
        }
    }

    /// Number of keys with a running job.
    pub fn active_lanes(&self) -> usize {
        self.shared.lanes.lock().len()
    }

    /// Number of jobs waiting behind the running one for `key`.
    pub fn queued(&self, key: &K) -> usize {
        self.shared
            .lanes
            .lock()
            .get(key)
            .map(VecDeque::len)
            .unwrap_or(0)
    }
}

impl<K: LaneKey> LaneShared<K> {
    fn start(this: &Arc<Self>, key: K, job: LaneJob<K>) {
        let guard = LaneGuard {
            shared: Arc::clone(this),
            key,
        };
        this.pool.spawn(move || job(guard));
    }

    fn advance(this: &Arc<Self>, key: K) {
        let next = {
            let mut lanes = this.lanes.lock();
            match lanes.get_mut(&key) {
                Some(waiting) => match waiting.pop_front() {
                    Some(job) => Some(job),
                    None => {
                        lanes.remove(&key);
                        None
                    }
                },
                None => None,
            }
        };
        if let Some(job) = next {
            Self::start(this, key, job);
        }
    }
}

impl<K: LaneKey> LaneGuard<K> {
    /// The key this lane serializes.
    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K: LaneKey> Drop for LaneGuard<K> {
    fn drop(&mut self) {
        LaneShared::advance(&self.shared, self.key.clone());
    }
}
