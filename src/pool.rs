use std::ops::Deref;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use tracing::debug;

/// Fixed set of exclusive resources, each with an in-use flag.
///
/// [`acquire`](Self::acquire) blocks until a resource is free and returns a
/// guard that hands it back on drop.
#[derive(Debug)]
pub struct Pool<T> {
    items: Vec<T>,
    in_use: Mutex<Vec<bool>>,
    freed: Condvar,
}

impl<T> Pool<T> {
    pub fn new(items: Vec<T>) -> Self {
        let in_use = Mutex::new(vec![false; items.len()]);
        Self {
            items,
            in_use,
            freed: Condvar::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn flags(&self) -> MutexGuard<'_, Vec<bool>> {
        self.in_use.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take the first free resource, waiting for one if all are in use.
    ///
    /// Blocks forever on an empty pool.
    pub fn acquire(&self) -> PoolGuard<'_, T> {
        let mut flags = self.flags();
        loop {
            if let Some(index) = flags.iter().position(|used| !used) {
                flags[index] = true;
                return PoolGuard { pool: self, index };
            }
            debug!("all pool slots busy, waiting");
            flags = self
                .freed
                .wait(flags)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Take a specific resource if it is free.
    pub fn try_acquire(&self, index: usize) -> Option<PoolGuard<'_, T>> {
        let mut flags = self.flags();
        match flags.get_mut(index) {
            Some(used) if !*used => {
                *used = true;
                Some(PoolGuard { pool: self, index })
            }
            _ => None,
        }
    }

    /// Number of resources currently free.
    pub fn available(&self) -> usize {
        self.flags().iter().filter(|used| !**used).count()
    }

    fn release(&self, index: usize) {
        self.flags()[index] = false;
        self.freed.notify_one();
    }
}

/// Exclusive use of one pooled resource.
#[derive(Debug)]
pub struct PoolGuard<'a, T> {
    pool: &'a Pool<T>,
    index: usize,
}

impl<T> PoolGuard<'_, T> {
    pub fn index(&self) -> usize {
        self.index
    }
}

impl<T> Deref for PoolGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.pool.items[self.index]
    }
}

impl<T> Drop for PoolGuard<'_, T> {
    fn drop(&mut self) {
        self.pool.release(self.index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn guard_returns_slot_on_drop() {
        let pool = Pool::new(vec!["a", "b"]);
        let first = pool.acquire();
        assert_eq!(*first, "a");
        assert_eq!(pool.available(), 1);
        assert!(pool.try_acquire(0).is_none());
        drop(first);
        assert_eq!(pool.available(), 2);
        assert_eq!(*pool.try_acquire(0).unwrap(), "a");
    }

    #[test]
    fn waiters_wake_when_a_slot_frees() {
        let pool = Pool::new(vec![0usize]);
        let busy = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);

        thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    let _slot = pool.acquire();
                    let now = busy.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(5));
                    busy.fetch_sub(1, Ordering::SeqCst);
                });
            }
        });

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn slot_is_released_when_the_holder_panics() {
        let pool = Pool::new(vec![()]);
        let result = thread::scope(|s| {
            s.spawn(|| {
                let _slot = pool.acquire();
                panic!("run crashed");
            })
            .join()
        });
        assert!(result.is_err());
        assert_eq!(pool.available(), 1);
    }
}
