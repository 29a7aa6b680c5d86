//! Subscriber-counted sharing of stateful composables.
//!
//! A [`Shared`] wraps a factory and hands out [`SharedHandle`]s: the first
//! acquisition builds the unit, later acquisitions reuse it, and dropping
//! the last handle tears the unit down so the next acquisition starts
//! fresh. This replaces module-level singletons with an explicit,
//! deterministic lifecycle.

use std::ops::Deref;
use std::sync::{Arc, Mutex};

struct Entry<T> {
    value: Arc<T>,
    subscribers: usize,
}

struct CacheState<T> {
    entry: Option<Entry<T>>,
    generation: u64,
}

struct SharedInner<T> {
    factory: Box<dyn Fn() -> T + Send + Sync>,
    state: Mutex<CacheState<T>>,
}

/// A reference-counted memoizer around a composable factory.
///
/// Clones share the same cache; at most one unit is ever live per cache.
pub struct Shared<T> {
    inner: Arc<SharedInner<T>>,
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Shared<T> {
    pub fn new(factory: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(SharedInner {
                factory: Box::new(factory),
                state: Mutex::new(CacheState {
                    entry: None,
                    generation: 0,
                }),
            }),
        }
    }

    /// Acquire the shared unit, constructing it if no subscriber holds it.
    ///
    /// The cache lock is held across the factory call, so the factory runs
    /// at most once per generation. The factory must not re-enter
    /// `acquire` on the same `Shared`.
    pub fn acquire(&self) -> SharedHandle<T> {
        let mut state = self.inner.state.lock().expect("shared cache lock poisoned");

        if let Some(entry) = state.entry.as_mut() {
            entry.subscribers += 1;
            return SharedHandle {
                value: Arc::clone(&entry.value),
                owner: Arc::clone(&self.inner),
                generation: state.generation,
            };
        }

        state.generation += 1;
        let value = Arc::new((self.inner.factory)());
        state.entry = Some(Entry {
            value: Arc::clone(&value),
            subscribers: 1,
        });

        SharedHandle {
            value,
            owner: Arc::clone(&self.inner),
            generation: state.generation,
        }
    }

    /// Number of live handles.
    pub fn subscriber_count(&self) -> usize {
        let state = self.inner.state.lock().expect("shared cache lock poisoned");
        state.entry.as_ref().map(|e| e.subscribers).unwrap_or(0)
    }
}

/// A live subscription to a shared unit. Dereferences to the unit; the
/// subscriber count drops exactly once when the handle is dropped.
pub struct SharedHandle<T> {
    value: Arc<T>,
    owner: Arc<SharedInner<T>>,
    generation: u64,
}

impl<T> Deref for SharedHandle<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> SharedHandle<T> {
    /// The unit behind this handle. Useful when a task needs ownership
    /// independent of the handle's lifetime.
    pub fn unit(&self) -> Arc<T> {
        Arc::clone(&self.value)
    }
}

impl<T> Drop for SharedHandle<T> {
    fn drop(&mut self) {
        let mut state = self.owner.state.lock().expect("shared cache lock poisoned");

        // A handle only releases the generation it subscribed to.
        if state.generation != self.generation {
            return;
        }

        if let Some(entry) = state.entry.as_mut() {
            entry.subscribers -= 1;
            if entry.subscribers == 0 {
                state.entry = None;
            }
        }
    }
}
