//! Process-shared locking primitives.
//!
//! Raw libc calls wrapped in `unsafe` blocks with a `// SAFETY:` comment;
//! `unsafe impl Send`/`Sync` only where justified.

use crate::error::{VsiError, VsiResult};
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

fn check(ret: libc::c_int, what: &'static str) -> VsiResult<()> {
    if ret == 0 {
        Ok(())
    } else {
        Err(VsiError::IoError(format!(
            "{what} failed: {}",
            std::io::Error::from_raw_os_error(ret)
        )))
    }
}

/// A recursive, process-shared `pthread_mutex_t` embedded directly in
/// shared memory. Never moved once initialized — its address is part of
/// its identity for every attached process.
#[repr(transparent)]
pub struct ProcessMutex(libc::pthread_mutex_t);

// SAFETY: the wrapped mutex is a POSIX process-shared primitive; all
// access to its interior goes through libc calls that are themselves
// safe to invoke from any thread once the mutex is initialized.
unsafe impl Send for ProcessMutex {}
unsafe impl Sync for ProcessMutex {}

impl ProcessMutex {
    /// Initializes the mutex in place. Must be called exactly once, by
    /// whichever process first creates the region; every later `open` of
    /// an existing region must skip this and use the bytes as found.
    pub fn init_shared(&mut self) -> VsiResult<()> {
        unsafe {
            let mut attr = MaybeUninit::<libc::pthread_mutexattr_t>::uninit();
            check(
                libc::pthread_mutexattr_init(attr.as_mut_ptr()),
                "pthread_mutexattr_init",
            )?;
            let mut attr = attr.assume_init();
            check(
                libc::pthread_mutexattr_setpshared(&mut attr, libc::PTHREAD_PROCESS_SHARED),
                "pthread_mutexattr_setpshared",
            )?;
            check(
                libc::pthread_mutexattr_settype(&mut attr, libc::PTHREAD_MUTEX_RECURSIVE),
                "pthread_mutexattr_settype",
            )?;
            let res = check(
                libc::pthread_mutex_init(&mut self.0, &attr),
                "pthread_mutex_init",
            );
            libc::pthread_mutexattr_destroy(&mut attr);
            res
        }
    }

    pub fn lock(&self) -> VsiResult<ProcessMutexGuard<'_>> {
        // SAFETY: `self.0` is a valid, initialized process-shared mutex for
        // the lifetime of the mapping that owns it.
        unsafe {
            check(
                libc::pthread_mutex_lock(&self.0 as *const _ as *mut _),
                "pthread_mutex_lock",
            )?;
        }
        Ok(ProcessMutexGuard { mutex: self })
    }

    fn raw(&self) -> *mut libc::pthread_mutex_t {
        &self.0 as *const _ as *mut _
    }
}

/// RAII guard releasing the mutex on every exit path, including unwinding,
/// so a thread cancelled (or panicking) while blocked never leaves the
/// mutex locked for the next waiter.
pub struct ProcessMutexGuard<'a> {
    mutex: &'a ProcessMutex,
}

impl Drop for ProcessMutexGuard<'_> {
    fn drop(&mut self) {
        // SAFETY: this guard is only constructed after a successful lock.
        unsafe {
            libc::pthread_mutex_unlock(self.mutex.raw());
        }
    }
}

/// A process-shared `pthread_cond_t`.
#[repr(transparent)]
pub struct ProcessCondvar(libc::pthread_cond_t);

unsafe impl Send for ProcessCondvar {}
unsafe impl Sync for ProcessCondvar {}

impl ProcessCondvar {
    pub fn init_shared(&mut self) -> VsiResult<()> {
        unsafe {
            let mut attr = MaybeUninit::<libc::pthread_condattr_t>::uninit();
            check(
                libc::pthread_condattr_init(attr.as_mut_ptr()),
                "pthread_condattr_init",
            )?;
            let mut attr = attr.assume_init();
            check(
                libc::pthread_condattr_setpshared(&mut attr, libc::PTHREAD_PROCESS_SHARED),
                "pthread_condattr_setpshared",
            )?;
            let res = check(
                libc::pthread_cond_init(&mut self.0, &attr),
                "pthread_cond_init",
            );
            libc::pthread_condattr_destroy(&mut attr);
            res
        }
    }

    /// Waits on the condition variable, re-acquiring `guard`'s mutex
    /// atomically with the sleep. The caller is responsible for
    /// re-checking its predicate in a loop (spurious/broadcast wakeups).
    fn wait(&self, guard: &ProcessMutexGuard<'_>) -> VsiResult<()> {
        unsafe {
            check(
                libc::pthread_cond_wait(&self.0 as *const _ as *mut _, guard.mutex.raw()),
                "pthread_cond_wait",
            )
        }
    }

    fn broadcast(&self) -> VsiResult<()> {
        unsafe {
            check(
                libc::pthread_cond_broadcast(&self.0 as *const _ as *mut _),
                "pthread_cond_broadcast",
            )
        }
    }
}

/// A (mutex, condvar, generation, waiterCount) tuple whose `post` wakes
/// every waiter rather than one.
///
/// `generation` is a monotonically increasing counter rather than a
/// per-post consumption count: `post` bumps it once and every currently
/// blocked waiter wakes and observes the new value, instead of only the
/// first waiter to reacquire the mutex after the broadcast. This matters
/// when two or more consumers are blocked on the same list: all of them
/// must see the new record before it can be removed, not just the first
/// one to wake while the rest silently go back to sleep.
#[repr(C)]
pub struct BroadcastSemaphore {
    mutex: ProcessMutex,
    condvar: ProcessCondvar,
    generation: AtomicU64,
    waiter_count: AtomicI64,
}

impl BroadcastSemaphore {
    pub fn init_shared(&mut self) -> VsiResult<()> {
        self.mutex.init_shared()?;
        self.condvar.init_shared()?;
        self.generation.store(0, Ordering::SeqCst);
        self.waiter_count.store(0, Ordering::Relaxed);
        Ok(())
    }

    /// Bumps `generation` and broadcasts to every waiter.
    pub fn post(&self) -> VsiResult<()> {
        let guard = self.mutex.lock()?;
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.condvar.broadcast()?;
        drop(guard);
        Ok(())
    }

    /// The current generation, to be captured by a caller *before* it
    /// commits to waiting (typically while still holding whatever lock
    /// also serializes with `post`, so no post can land unobserved between
    /// the caller's last empty-check and this read).
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Blocks until `generation` has advanced past `since`. Does not
    /// consume or decrement anything: every waiter blocked on a given
    /// `since` wakes and returns once a single `post` bumps the counter,
    /// so callers must re-check the condition they were waiting on (e.g.
    /// the list head) themselves rather than assuming they exclusively
    /// claimed the post.
    pub fn wait_for_change_since(&self, since: u64) -> VsiResult<()> {
        let guard = self.mutex.lock()?;
        while self.generation.load(Ordering::SeqCst) == since {
            self.condvar.wait(&guard)?;
        }
        Ok(())
    }

    /// Bumps `generation` and broadcasts — used by `flush` to release
    /// stranded waiters so they re-check the now-empty list. A waiter in
    /// `wait_for_change_since` only stops looping once it observes
    /// `generation` move past the value it captured, so this must advance
    /// the counter exactly like `post`; a broadcast alone would wake every
    /// waiter only to have them immediately re-check an unchanged
    /// `generation` and go straight back to sleep.
    pub fn wake_all(&self) -> VsiResult<()> {
        self.post()
    }

    pub fn inc_waiters(&self) -> i64 {
        self.waiter_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn dec_waiters(&self) -> i64 {
        self.waiter_count.fetch_sub(1, Ordering::SeqCst) - 1
    }

    pub fn waiter_count(&self) -> i64 {
        self.waiter_count.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::time::Duration;

    fn fresh_semaphore() -> Arc<BroadcastSemaphore> {
        // SAFETY: zeroed bytes are a valid starting state for a
        // `BroadcastSemaphore` about to be handed to `init_shared`, which
        // fully initializes the mutex/condvar and resets the counters.
        let mut sem = unsafe { std::mem::MaybeUninit::<BroadcastSemaphore>::zeroed().assume_init() };
        sem.init_shared().unwrap();
        Arc::new(sem)
    }

    /// `wake_all` alone — with no subsequent `post` — must release a
    /// waiter blocked in `wait_for_change_since`. A broadcast that doesn't
    /// also advance `generation` wakes the waiter only to have it
    /// immediately re-check an unchanged `generation` and go straight back
    /// to sleep, which would hang this test; `recv_timeout` bounds that
    /// failure instead of letting it block forever.
    #[test]
    fn wake_all_releases_a_waiter_without_a_subsequent_post() {
        let sem = fresh_semaphore();
        let since = sem.generation();
        let (tx, rx) = mpsc::channel();

        let waiter_sem = sem.clone();
        let handle = std::thread::spawn(move || {
            waiter_sem.wait_for_change_since(since).unwrap();
            tx.send(()).unwrap();
        });

        std::thread::sleep(Duration::from_millis(50));
        sem.wake_all().unwrap();

        rx.recv_timeout(Duration::from_secs(5))
            .expect("wake_all must unblock a waiter on its own");
        handle.join().unwrap();
    }

    #[test]
    fn wait_for_change_since_returns_immediately_if_generation_already_moved() {
        let sem = fresh_semaphore();
        let since = sem.generation();
        sem.post().unwrap();
        sem.wait_for_change_since(since).unwrap();
    }
}
