//! Object pool module
//!
//! Free-list recycler for hot-path objects. Checkout is RAII: a [`Pooled`]
//! guard owns the object exclusively and hands it back on drop, so an object
//! can never sit on the free list while something else still uses it.
//!
//! ```text
//! Pool<T>
//!   free: Mutex<Vec<T>>   (LIFO, preallocated to max_idle)
//!   create: fn() -> T     (used when the free list is empty)
//!
//! get()  -> pop or create          O(1)
//! drop() -> recycle + push         O(1)
//! ```

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Reset hook run when an object goes back to its pool.
///
/// Implementations must clear every reference the object gathered during its
/// last use. They may also poison fields so a missing re-initialization is
/// caught by the next user.
pub trait Recycle {
    fn recycle(&mut self);
}

/// Pool of reusable objects
pub struct Pool<T> {
    free: Mutex<Vec<T>>,
    create: fn() -> T,
    max_idle: usize,
    created: AtomicUsize,
}

impl<T: Recycle> Pool<T> {
    /// Create a pool that keeps at most `max_idle` free objects around
    pub fn new(create: fn() -> T, max_idle: usize) -> Arc<Self> {
        Arc::new(Self {
            free: Mutex::new(Vec::with_capacity(max_idle)),
            create,
            max_idle,
            created: AtomicUsize::new(0),
        })
    }

    /// Take a free object, or construct a new one when the free list is empty
    pub fn get(self: &Arc<Self>) -> Pooled<T> {
        let recycled = self
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();

        let item = recycled.unwrap_or_else(|| {
            self.created.fetch_add(1, Ordering::Relaxed);
            (self.create)()
        });

        Pooled {
            item: Some(item),
            owner: Arc::clone(self),
        }
    }

    /// Number of objects currently on the free list
    pub fn idle(&self) -> usize {
        self.free.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Number of objects constructed over the pool's lifetime
    pub fn created(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }

    fn put(&self, mut item: T) {
        item.recycle();
        let mut free = self.free.lock().unwrap_or_else(PoisonError::into_inner);
        if free.len() < self.max_idle {
            free.push(item);
        }
    }
}

/// Checked-out object; returns itself to the owning pool when dropped
pub struct Pooled<T: Recycle> {
    item: Option<T>,
    owner: Arc<Pool<T>>,
}

impl<T: Recycle> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.item
            .as_ref()
            .expect("pooled object is present until the guard drops")
    }
}

impl<T: Recycle> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.item
            .as_mut()
            .expect("pooled object is present until the guard drops")
    }
}

impl<T: Recycle> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.owner.put(item);
        }
    }
}
