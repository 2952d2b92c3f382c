//! Reference-counted registry of expensive shared resources keyed by identity.
//!
//! The map lock is held only to locate/install an entry and adjust its count.
//! Creation runs under the entry's own once-cell, so unrelated keys never wait
//! on each other and concurrent first use of one key creates it once.

use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard};

use once_cell::sync::OnceCell;
use tracing::{debug, error};

use crate::error::CacheError;

struct Entry<V> {
    refs: usize,
    cell: Arc<OnceCell<Arc<V>>>,
}

pub struct SharedResourceCache<V> {
    entries: Mutex<HashMap<String, Entry<V>>>,
}

impl<V> SharedResourceCache<V> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns a lease on the value for `key`, running `create` only if no value exists yet.
    ///
    /// A failed `create` gives back this caller's reference; a later caller may try again.
    pub fn get_or_create<E, F>(self: &Arc<Self>, key: &str, create: F) -> Result<Lease<V>, E>
    where
        F: FnOnce() -> Result<V, E>,
        E: From<CacheError>,
    {
        let cell = {
            let mut entries = self.lock()?;
            let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
                refs: 0,
                cell: Arc::new(OnceCell::new()),
            });
            entry.refs += 1;
            Arc::clone(&entry.cell)
        };

        let created = cell.get_or_try_init(|| {
            debug!(key, "creating shared resource");
            create().map(Arc::new)
        });
        match created {
            Ok(value) => Ok(Lease {
                cache: Arc::clone(self),
                key: key.to_string(),
                value: Arc::clone(value),
                released: false,
            }),
            Err(err) => {
                if let Err(release_err) = self.release(key) {
                    error!(key, error = %release_err, "failed to give back reference after failed creation");
                }
                Err(err)
            }
        }
    }

    /// Drops one reference to `key`; the last one removes the entry and lets the value drop.
    pub fn release(&self, key: &str) -> Result<(), CacheError> {
        let removed = {
            let mut entries = self.lock()?;
            let Some(entry) = entries.get_mut(key) else {
                return Err(CacheError::UnknownKey {
                    key: key.to_string(),
                });
            };
            entry.refs -= 1;
            if entry.refs == 0 {
                entries.remove(key)
            } else {
                None
            }
        };
        // Teardown (if this was the last holder) happens here, outside the map lock.
        if removed.is_some() {
            debug!(key, "released last reference to shared resource");
        }
        drop(removed);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        self.ref_count(key) > 0
    }

    pub fn ref_count(&self, key: &str) -> usize {
        self.lock()
            .ok()
            .and_then(|entries| entries.get(key).map(|entry| entry.refs))
            .unwrap_or(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Entry<V>>>, CacheError> {
        self.entries.lock().map_err(|_| CacheError::Poisoned)
    }
}

impl<V> Default for SharedResourceCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// One counted reference to a cached value. Dropping it releases the reference.
pub struct Lease<V> {
    cache: Arc<SharedResourceCache<V>>,
    key: String,
    value: Arc<V>,
    released: bool,
}

impl<V> Lease<V> {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Both leases point at the same cached value.
    pub fn ptr_eq(&self, other: &Lease<V>) -> bool {
        Arc::ptr_eq(&self.value, &other.value)
    }

    /// Releases explicitly so a misuse error can be observed instead of logged.
    pub fn release(mut self) -> Result<(), CacheError> {
        self.released = true;
        self.cache.release(&self.key)
    }
}

impl<V> Deref for Lease<V> {
    type Target = V;

    fn deref(&self) -> &V {
        &self.value
    }
}

impl<V> fmt::Debug for Lease<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("key", &self.key)
            .field("value", &Arc::as_ptr(&self.value))
            .finish()
    }
}

impl<V> Drop for Lease<V> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(err) = self.cache.release(&self.key) {
            error!(key = %self.key, error = %err, "failed to release shared resource");
        }
    }
}
