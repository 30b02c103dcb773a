//! Decoded originals with request coalescing.
//!
//! A [`DataSource`] serves an original from the [`OriginalStore`] or, on a
//! miss, asks the injected [`OriginalProvider`] for it. Concurrent requests
//! for the same key share one fetch: the first registers a pending entry,
//! later ones append to it, and every waiter receives the same image in the
//! order it asked. Provider results are persisted before waiters run, so the
//! next request is served from disk.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use vellum_common::ImageKey;

use crate::dispatch::Executors;
use crate::error::ProviderError;
use crate::original::{OriginalStore, SharedImage};

/// Receives a fetched original, or `None` when it could not be produced.
pub(crate) type Waiter = Box<dyn FnOnce(Option<SharedImage>) + Send + 'static>;

type ReplyFn = Box<dyn FnOnce(Result<SharedImage, ProviderError>) + Send + 'static>;

/// Produces source images the store does not have yet.
pub trait OriginalProvider<K>: Send + Sync + 'static {
    /// Starts producing the image for `key`. `reply` may be resolved on any
    /// thread at any later time; dropping it unresolved reports a failure.
    fn produce(&self, key: &K, reply: ProviderReply);
}

impl<K, F> OriginalProvider<K> for F
where
    F: Fn(&K, ProviderReply) + Send + Sync + 'static,
{
    fn produce(&self, key: &K, reply: ProviderReply) {
        self(key, reply)
    }
}

/// A provider that never has anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProvider;

impl<K: ImageKey> OriginalProvider<K> for NoProvider {
    fn produce(&self, key: &K, reply: ProviderReply) {
        reply.fail(ProviderError::NotFound(key.identifier()));
    }
}

/// One-shot handle a provider resolves with its result.
pub struct ProviderReply {
    send: Option<ReplyFn>,
}

impl ProviderReply {
    pub(crate) fn new(
        send: impl FnOnce(Result<SharedImage, ProviderError>) + Send + 'static,
    ) -> Self {
        Self {
            send: Some(Box::new(send)),
        }
    }

    /// Delivers `result`.
    pub fn resolve(mut self, result: Result<SharedImage, ProviderError>) {
        if let Some(send) = self.send.take() {
            send(result);
        }
    }

    /// Delivers an image.
    pub fn succeed(self, image: impl Into<SharedImage>) {
        self.resolve(Ok(image.into()));
    }

    /// Reports that no image can be produced.
    pub fn fail(self, error: ProviderError) {
        self.resolve(Err(error));
    }
}

impl Drop for ProviderReply {
    fn drop(&mut self) {
        if let Some(send) = self.send.take() {
            send(Err(ProviderError::Dropped));
        }
    }
}

/// Coalescing front end over an [`OriginalStore`] and an [`OriginalProvider`].
pub struct DataSource<K: ImageKey> {
    inner: Arc<SourceInner<K>>,
}

impl<K: ImageKey> Clone for DataSource<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct SourceInner<K: ImageKey> {
    store: Arc<OriginalStore<K>>,
    provider: Arc<dyn OriginalProvider<K>>,
    executors: Executors,
    pending: Mutex<HashMap<K, Vec<Waiter>>>,
    provider_calls: AtomicU64,
}

impl<K: ImageKey> DataSource<K> {
    /// Creates a data source.
    pub fn new(
        store: Arc<OriginalStore<K>>,
        provider: Arc<dyn OriginalProvider<K>>,
        executors: Executors,
    ) -> Self {
        Self {
            inner: Arc::new(SourceInner {
                store,
                provider,
                executors,
                pending: Mutex::new(HashMap::new()),
                provider_calls: AtomicU64::new(0),
            }),
        }
    }

    /// Fetches the original for `key` and passes it to `completion` on the
    /// completion context.
    pub fn get(&self, key: K, completion: impl FnOnce(Option<SharedImage>) + Send + 'static) {
        let executors = self.inner.executors.clone();
        self.fetch(
            key,
            Box::new(move |image| executors.complete(move || completion(image))),
        );
    }

    /// Async form of [`get`](Self::get).
    pub async fn get_async(&self, key: K) -> Option<SharedImage> {
        let (tx, rx) = oneshot::channel();
        self.get(key, move |image| {
            let _ = tx.send(image);
        });
        rx.await.unwrap_or(None)
    }

    /// Registers `waiter` for `key`, starting a fetch if none is pending.
    /// The waiter runs on whichever thread resolves the fetch.
    pub(crate) fn fetch(&self, key: K, waiter: Waiter) {
        {
            let mut pending = self.inner.pending.lock();
            match pending.entry(key.clone()) {
                Entry::Occupied(mut waiting) => {
                    waiting.get_mut().push(waiter);
                    return;
                }
                Entry::Vacant(slot) => {
                    slot.insert(vec![waiter]);
                }
            }
        }
        let inner = Arc::clone(&self.inner);
        self.inner
            .executors
            .pool
            .spawn(move || SourceInner::begin(&inner, key));
    }

    /// Number of keys with a fetch in flight.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// How many times the provider has been asked for an image.
    pub fn provider_calls(&self) -> u64 {
        self.inner.provider_calls.load(Ordering::Relaxed)
    }

    /// The backing original store.
    pub fn store(&self) -> &Arc<OriginalStore<K>> {
        &self.inner.store
    }

    /// The executors fetches and completions run on.
    pub fn executors(&self) -> &Executors {
        &self.inner.executors
    }
}

impl<K: ImageKey> SourceInner<K> {
    fn begin(this: &Arc<Self>, key: K) {
        if let Some(image) = this.store.get(&key) {
            this.finish(&key, Some(image));
            return;
        }

        this.provider_calls.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(key = %key.identifier(), "original missing; asking provider");
        let inner = Arc::clone(this);
        let reply_key = key.clone();
        let reply = ProviderReply::new(move |result| {
            let pool = inner.executors.pool.clone();
            pool.spawn(move || inner.complete(reply_key, result));
        });
        this.provider.produce(&key, reply);
    }

    fn complete(&self, key: K, result: Result<SharedImage, ProviderError>) {
        match result {
            Ok(image) => {
                if let Err(e) = self.store.store_image(&image, &key) {
                    tracing::warn!(
                        key = %key.identifier(),
                        error = %e,
                        "failed to persist provided original"
                    );
                }
                self.finish(&key, Some(image));
            }
            Err(e) => {
                tracing::warn!(key = %key.identifier(), error = %e, "provider failed");
                self.finish(&key, None);
            }
        }
    }

    fn finish(&self, key: &K, image: Option<SharedImage>) {
        let waiters = self.pending.lock().remove(key).unwrap_or_default();
        for waiter in waiters {
            waiter(image.clone());
        }
    }
}
