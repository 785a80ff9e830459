//! A reader-preference read-write lock: any number of concurrent readers,
//! one exclusive writer, readers release the writer mutex when the last of
//! them leaves. Grounded in the original's `ReadWriteLock` (a reader counter
//! guarded by its own lock, plus a writer mutex the first reader acquires and
//! the last reader releases) shared by the catalog and order Django apps.
//!
//! Writer starvation is accepted given the low write rate (spec.md §4.4).

use std::sync::{Condvar, Mutex, MutexGuard};

struct ReaderState {
    readers: usize,
    writer_held: bool,
}

pub struct RwPreferReader<T> {
    state: Mutex<ReaderState>,
    writer_free: Condvar,
    data: std::cell::UnsafeCell<T>,
}

// SAFETY: access to `data` is only ever handed out through `ReadGuard`/
// `WriteGuard`, which are only constructed while holding the appropriate
// reader/writer accounting in `state`.
unsafe impl<T: Send> Send for RwPreferReader<T> {}
unsafe impl<T: Send> Sync for RwPreferReader<T> {}

impl<T> RwPreferReader<T> {
    pub fn new(data: T) -> Self {
        Self {
            state: Mutex::new(ReaderState {
                readers: 0,
                writer_held: false,
            }),
            writer_free: Condvar::new(),
            data: std::cell::UnsafeCell::new(data),
        }
    }

    /// Acquire a read guard. Multiple readers may hold this concurrently;
    /// the first reader blocks until no writer is active, subsequent readers
    /// proceed immediately.
    pub fn read(&self) -> ReadGuard<'_, T> {
        let mut state = self.state.lock().unwrap();
        while state.writer_held {
            state = self.writer_free.wait(state).unwrap();
        }
        state.readers += 1;
        drop(state);
        ReadGuard { lock: self }
    }

    /// Acquire an exclusive write guard, blocking until there are no active
    /// readers and no other writer.
    pub fn write(&self) -> WriteGuard<'_, T> {
        let mut state = self.state.lock().unwrap();
        while state.writer_held || state.readers > 0 {
            state = self.writer_free.wait(state).unwrap();
        }
        state.writer_held = true;
        drop(state);
        WriteGuard { lock: self }
    }

    fn release_read(&self) {
        let mut state = self.state.lock().unwrap();
        state.readers -= 1;
        if state.readers == 0 {
            self.writer_free.notify_all();
        }
    }

    fn release_write(&self) {
        let mut state = self.state.lock().unwrap();
        state.writer_held = false;
        self.writer_free.notify_all();
    }

    #[allow(dead_code)]
    fn state_guard(&self) -> MutexGuard<'_, ReaderState> {
        self.state.lock().unwrap()
    }
}

pub struct ReadGuard<'a, T> {
    lock: &'a RwPreferReader<T>,
}

impl<T> std::ops::Deref for ReadGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: a read guard exists only while `readers > 0` and no writer
        // holds the lock, so shared access is sound.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> Drop for ReadGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.release_read();
    }
}

pub struct WriteGuard<'a, T> {
    lock: &'a RwPreferReader<T>,
}

impl<T> std::ops::Deref for WriteGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> std::ops::DerefMut for WriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: a write guard is the sole holder of `writer_held`, so
        // exclusive access is sound.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for WriteGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.release_write();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn concurrent_readers_see_same_value() {
        let lock = Arc::new(RwPreferReader::new(42));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let lock = Arc::clone(&lock);
            handles.push(thread::spawn(move || {
                let guard = lock.read();
                assert_eq!(*guard, 42);
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn writer_is_exclusive_and_visible() {
        let lock = Arc::new(RwPreferReader::new(0));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let lock = Arc::clone(&lock);
            handles.push(thread::spawn(move || {
                let mut guard = lock.write();
                *guard += 1;
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*lock.read(), 16);
    }
}
