//! Local object cache and eviction
//!
//! Objects delivered over the realtime channel pile up in the cache even when
//! nothing displays them. Instead of checking each one as it arrives, callers
//! schedule a check: ids collect in a pending list and a single timer, armed
//! by the first schedule, checks the whole list once the purge interval has
//! passed. Saved objects that no active query references are destroyed and
//! dropped from the cache.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::debug;

use crate::sync::{ObjectRegistry, SyncTarget};

/// An object the cache can evict
pub trait CachedObject: Send + Sync {
    fn id(&self) -> &str;

    /// Whether the server already has this object
    fn is_saved(&self) -> bool;

    fn is_destroyed(&self) -> bool;

    /// Release the object; called once, when it is evicted
    fn destroy(&self);
}

/// Active result sets
pub trait QueryRegistry: Send + Sync {
    /// Whether any active query currently holds `id`
    fn is_referenced(&self, id: &str) -> bool;
}

struct Inner<T> {
    objects: HashMap<String, Arc<T>>,
    pending: Vec<String>,
    timer_armed: bool,
}

/// Cloneable handle to a shared object cache
pub struct ObjectCache<T> {
    inner: Arc<Mutex<Inner<T>>>,
    queries: Arc<dyn QueryRegistry>,
    purge_interval: Duration,
}

impl<T> Clone for ObjectCache<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            queries: self.queries.clone(),
            purge_interval: self.purge_interval,
        }
    }
}

impl<T: CachedObject + 'static> ObjectCache<T> {
    pub fn new(queries: Arc<dyn QueryRegistry>, purge_interval: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                objects: HashMap::new(),
                pending: Vec::new(),
                timer_armed: false,
            })),
            queries,
            purge_interval,
        }
    }

    fn inner(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, object: Arc<T>) {
        let id = object.id().to_string();
        self.inner().objects.insert(id, object);
    }

    pub fn get(&self, id: &str) -> Option<Arc<T>> {
        self.inner().objects.get(id).cloned()
    }

    pub fn remove(&self, id: &str) -> Option<Arc<T>> {
        self.inner().objects.remove(id)
    }

    pub fn len(&self) -> usize {
        self.inner().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids waiting for the next check
    pub fn pending(&self) -> Vec<String> {
        self.inner().pending.clone()
    }

    /// Queue `id` for an eviction check
    ///
    /// Unsaved objects are never evicted, so they are not queued. Must be
    /// called from within a tokio runtime.
    pub fn schedule_check(&self, id: &str) {
        let arm = {
            let mut inner = self.inner();
            let saved = inner.objects.get(id).is_some_and(|o| o.is_saved());
            if !saved {
                return;
            }
            inner.pending.push(id.to_string());
            !std::mem::replace(&mut inner.timer_armed, true)
        };

        if arm {
            let cache = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(cache.purge_interval).await;
                cache.run_scheduled_check();
            });
        }
    }

    /// Check every pending id now; returns how many objects were evicted
    pub fn run_scheduled_check(&self) -> usize {
        let (checked, evicted) = {
            let mut inner = self.inner();
            inner.timer_armed = false;
            let pending = std::mem::take(&mut inner.pending);

            let mut evicted = Vec::new();
            for id in pending.iter() {
                let Some(object) = inner.objects.get(id) else {
                    continue;
                };
                if object.is_destroyed() || self.queries.is_referenced(id) {
                    continue;
                }
                if let Some(object) = inner.objects.remove(id) {
                    evicted.push(object);
                }
            }
            (pending.len(), evicted)
        };

        // Destroy outside the lock; objects may call back into the cache
        for object in evicted.iter() {
            object.destroy();
        }
        if !evicted.is_empty() {
            debug!("Evicted {} of {} checked objects", evicted.len(), checked);
        }
        evicted.len()
    }
}

impl<T> ObjectRegistry for ObjectCache<T>
where
    T: CachedObject + SyncTarget + 'static,
{
    fn get_object(&self, id: &str) -> Option<Arc<dyn SyncTarget>> {
        self.get(id).map(|object| object as Arc<dyn SyncTarget>)
    }
}
