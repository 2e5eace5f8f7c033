//! Synchronization primitives.
//!
//! Thin wrappers over parking_lot and POSIX semaphores that give the threading layer and the
//! stochastic filters a small, fixed vocabulary:
//! - [`MutexLock`]: scoped exclusive access, not reentrant
//! - [`ConditionVariable`]: wait / signal / broadcast on a [`MutexLock`]
//! - [`Semaphore`]: named POSIX counting semaphore, visible to other processes
//! - [`SingletonCell`]: lazily constructed process-wide state with teardown

use crate::core::error::ResourceError;
use log::{debug, trace, warn};
use std::convert::Infallible;
use std::ffi::{CStr, CString};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Guard returned by [`MutexLock::lock`]; dropping it unlocks.
pub type MutexLockGuard<'a, T> = parking_lot::MutexGuard<'a, T>;

/// Exclusive-acquisition lock around a value.
///
/// Locking twice from the same thread deadlocks.
#[derive(Debug, Default)]
pub struct MutexLock<T = ()> {
    inner: parking_lot::Mutex<T>,
}

impl<T> MutexLock<T> {
    /// Create an unlocked mutex.
    pub const fn new(value: T) -> Self {
        Self {
            inner: parking_lot::const_mutex(value),
        }
    }

    /// Block until the lock is acquired.
    pub fn lock(&self) -> MutexLockGuard<'_, T> {
        self.inner.lock()
    }

    /// Acquire the lock only if it is free.
    pub fn try_lock(&self) -> Option<MutexLockGuard<'_, T>> {
        self.inner.try_lock()
    }

    /// Whether some thread currently holds the lock.
    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }

    /// Mutable access without locking; the borrow proves exclusivity.
    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }

    /// Consume the lock and return the protected value.
    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}

/// Blocks threads until another thread signals a change.
///
/// Wakeups may be spurious; wait in a loop on the predicate or use
/// [`ConditionVariable::wait_while`].
#[derive(Debug, Default)]
pub struct ConditionVariable {
    inner: parking_lot::Condvar,
}

impl ConditionVariable {
    /// Create a condition variable with no waiters.
    pub const fn new() -> Self {
        Self {
            inner: parking_lot::Condvar::new(),
        }
    }

    /// Release the guard's lock, block until woken, then reacquire it.
    pub fn wait<T>(&self, guard: &mut MutexLockGuard<'_, T>) {
        self.inner.wait(guard);
    }

    /// Wait until `condition` returns false.
    pub fn wait_while<T, F>(&self, guard: &mut MutexLockGuard<'_, T>, mut condition: F)
    where
        F: FnMut(&mut T) -> bool,
    {
        while condition(&mut **guard) {
            self.inner.wait(guard);
        }
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`.
    /// Returns `true` when the wait timed out.
    pub fn wait_for<T>(&self, guard: &mut MutexLockGuard<'_, T>, timeout: Duration) -> bool {
        self.inner.wait_for(guard, timeout).timed_out()
    }

    /// Wake one waiter. Returns whether a thread was woken.
    pub fn signal(&self) -> bool {
        self.inner.notify_one()
    }

    /// Wake every waiter. Returns how many threads were woken.
    pub fn broadcast(&self) -> usize {
        self.inner.notify_all()
    }
}

/// Lazily constructed, explicitly torn down process-wide value.
///
/// Concurrent first use constructs exactly one instance: the slot is guarded
/// by a single [`MutexLock`] and an atomic flag short-circuits
/// [`get`](Self::get) before the first construction. The initializer runs
/// with the lock held and must not touch the same cell.
#[derive(Debug)]
pub struct SingletonCell<T> {
    initialized: AtomicBool,
    slot: MutexLock<Option<Arc<T>>>,
}

impl<T> SingletonCell<T> {
    /// Create an empty cell; usable in a `static`.
    pub const fn new() -> Self {
        Self {
            initialized: AtomicBool::new(false),
            slot: MutexLock::new(None),
        }
    }

    /// Return the instance, constructing it on first use.
    pub fn get_or_init<F>(&self, init: F) -> Arc<T>
    where
        F: FnOnce() -> T,
    {
        match self.get_or_try_init(|| Ok::<T, Infallible>(init())) {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }

    /// Return the instance, constructing it on first use with a fallible
    /// initializer. A failed construction leaves the cell empty.
    pub fn get_or_try_init<F, E>(&self, init: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        if let Some(value) = self.get() {
            return Ok(value);
        }

        let mut slot = self.slot.lock();
        if let Some(value) = slot.as_ref() {
            return Ok(Arc::clone(value));
        }

        let value = Arc::new(init()?);
        *slot = Some(Arc::clone(&value));
        self.initialized.store(true, Ordering::Release);
        Ok(value)
    }

    /// The instance, if it has been constructed.
    pub fn get(&self) -> Option<Arc<T>> {
        if !self.initialized.load(Ordering::Acquire) {
            return None;
        }
        self.slot.lock().clone()
    }

    /// Whether the instance exists.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Replace the instance, returning the previous one.
    pub fn set(&self, value: T) -> Option<Arc<T>> {
        let mut slot = self.slot.lock();
        let previous = slot.replace(Arc::new(value));
        self.initialized.store(true, Ordering::Release);
        previous
    }

    /// Drop the cell's reference to the instance. The next access constructs
    /// a fresh one; outstanding `Arc`s stay valid.
    pub fn teardown(&self) -> Option<Arc<T>> {
        let mut slot = self.slot.lock();
        self.initialized.store(false, Ordering::Release);
        slot.take()
    }
}

impl<T> Default for SingletonCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Named semaphores
// ============================================================================

static SEMAPHORE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// `/strata.<pid>.<nanos>.<counter>`, short enough for the 31 byte limit
/// some systems put on semaphore names.
fn unique_semaphore_name() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos() ^ (d.as_secs() as u32))
        .unwrap_or_default();
    let counter = SEMAPHORE_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("/strata.{:x}.{:x}.{:x}", std::process::id(), nanos, counter)
}

fn c_name(name: &str) -> Result<CString, ResourceError> {
    CString::new(name).map_err(|e| {
        system_error(name, "sem_open", io::Error::new(io::ErrorKind::InvalidInput, e))
    })
}

fn system_error(name: &str, operation: &'static str, error: io::Error) -> ResourceError {
    ResourceError::System {
        name: name.to_string(),
        operation,
        message: error.to_string(),
    }
}

/// An open `sem_t` handle, closed on drop.
#[derive(Debug)]
struct SemaphoreHandle {
    sem: *mut libc::sem_t,
}

// SAFETY: POSIX semaphore operations are thread-safe; the handle is only
// closed in `drop`, when no other borrow of it exists.
unsafe impl Send for SemaphoreHandle {}
unsafe impl Sync for SemaphoreHandle {}

impl SemaphoreHandle {
    fn open(name: &CStr, oflag: libc::c_int, initial: u32) -> io::Result<Self> {
        // SAFETY: `name` is NUL terminated; the mode and value are only read
        // when `oflag` contains O_CREAT.
        let sem = unsafe {
            libc::sem_open(
                name.as_ptr(),
                oflag,
                0o600 as libc::c_uint,
                initial as libc::c_uint,
            )
        };
        if sem == libc::SEM_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { sem })
    }

    fn post(&self) -> io::Result<()> {
        // SAFETY: `sem` came from a successful sem_open and is still open.
        if unsafe { libc::sem_post(self.sem) } == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    fn wait(&self) -> io::Result<()> {
        loop {
            // SAFETY: as in `post`.
            if unsafe { libc::sem_wait(self.sem) } == 0 {
                return Ok(());
            }
            let error = io::Error::last_os_error();
            if error.kind() != io::ErrorKind::Interrupted {
                return Err(error);
            }
        }
    }

    /// `Ok(false)` when the count is zero.
    fn try_wait(&self) -> io::Result<bool> {
        loop {
            // SAFETY: as in `post`.
            if unsafe { libc::sem_trywait(self.sem) } == 0 {
                return Ok(true);
            }
            let error = io::Error::last_os_error();
            match error.raw_os_error() {
                Some(libc::EAGAIN) => return Ok(false),
                Some(libc::EINTR) => continue,
                _ => return Err(error),
            }
        }
    }

    #[cfg(not(target_vendor = "apple"))]
    fn value(&self) -> io::Result<u32> {
        let mut value: libc::c_int = 0;
        // SAFETY: as in `post`; `value` outlives the call.
        if unsafe { libc::sem_getvalue(self.sem, &mut value) } != 0 {
            return Err(io::Error::last_os_error());
        }
        // Some systems report waiters as a negative count.
        Ok(value.max(0) as u32)
    }
}

impl Drop for SemaphoreHandle {
    fn drop(&mut self) {
        // SAFETY: `sem` is open and nothing uses it after this point.
        unsafe {
            libc::sem_close(self.sem);
        }
    }
}

/// Named POSIX counting semaphore.
///
/// [`initialize`](Self::initialize) creates a uniquely named semaphore in
/// the operating system's namespace, so other processes can attach to it
/// by name with [`open`](Self::open). The creating handle owns the name
/// and unlinks it when dropped, unless it was removed already.
///
/// Unlinking only removes the name: handles that are already open keep
/// working until they are dropped.
#[derive(Debug, Default)]
pub struct Semaphore {
    name: Option<String>,
    handle: Option<SemaphoreHandle>,
    owner: bool,
    removed: bool,
}

impl Semaphore {
    /// Create an uninitialized handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a handle and initialize it in one step.
    pub fn with_count(initial: u32) -> Result<Self, ResourceError> {
        let mut semaphore = Self::new();
        semaphore.initialize(initial)?;
        Ok(semaphore)
    }

    /// Create a fresh named semaphore holding `initial`.
    ///
    /// A handle that already owns a semaphore removes it first.
    pub fn initialize(&mut self, initial: u32) -> Result<(), ResourceError> {
        if self.owner {
            self.remove()?;
        }

        let name = unique_semaphore_name();
        let handle = SemaphoreHandle::open(&c_name(&name)?, libc::O_CREAT | libc::O_EXCL, initial)
            .map_err(|e| match e.raw_os_error() {
                Some(libc::EEXIST) => ResourceError::AlreadyExists { name: name.clone() },
                _ => system_error(&name, "sem_open", e),
            })?;

        debug!("Created semaphore {} with count {}", name, initial);
        *self = Self {
            name: Some(name),
            handle: Some(handle),
            owner: true,
            removed: false,
        };
        Ok(())
    }

    /// Attach to a semaphore created elsewhere, possibly by another process.
    pub fn open(name: &str) -> Result<Self, ResourceError> {
        let handle = SemaphoreHandle::open(&c_name(name)?, 0, 0).map_err(|e| match e.raw_os_error() {
            Some(libc::ENOENT) => ResourceError::NotFound {
                name: name.to_string(),
            },
            _ => system_error(name, "sem_open", e),
        })?;
        Ok(Self {
            name: Some(name.to_string()),
            handle: Some(handle),
            owner: false,
            removed: false,
        })
    }

    /// System-wide name, once initialized.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn handle(&self) -> Result<(&str, &SemaphoreHandle), ResourceError> {
        match (&self.name, &self.handle) {
            (Some(name), Some(handle)) => Ok((name, handle)),
            (Some(name), None) => Err(ResourceError::Removed { name: name.clone() }),
            (None, _) => Err(ResourceError::NotInitialized),
        }
    }

    /// Increment the count and wake one blocked [`down`](Self::down).
    pub fn up(&self) -> Result<(), ResourceError> {
        let (name, handle) = self.handle()?;
        handle.post().map_err(|e| match e.raw_os_error() {
            Some(libc::EOVERFLOW) => ResourceError::Overflow {
                name: name.to_string(),
            },
            _ => system_error(name, "sem_post", e),
        })
    }

    /// Block while the count is zero, then decrement it.
    pub fn down(&self) -> Result<(), ResourceError> {
        let (name, handle) = self.handle()?;
        handle.wait().map_err(|e| system_error(name, "sem_wait", e))?;
        trace!("Semaphore {} down", name);
        Ok(())
    }

    /// Decrement if the count is positive; never blocks.
    pub fn try_down(&self) -> Result<bool, ResourceError> {
        let (name, handle) = self.handle()?;
        handle
            .try_wait()
            .map_err(|e| system_error(name, "sem_trywait", e))
    }

    /// Current count.
    #[cfg(not(target_vendor = "apple"))]
    pub fn value(&self) -> Result<u32, ResourceError> {
        let (name, handle) = self.handle()?;
        handle
            .value()
            .map_err(|e| system_error(name, "sem_getvalue", e))
    }

    /// Whether this handle has removed its semaphore.
    pub fn is_removed(&self) -> bool {
        self.removed
    }

    /// Unlink the named semaphore and close this handle.
    ///
    /// Removing an uninitialized or already removed semaphore is a no-op,
    /// as is removing a name some other handle unlinked first.
    pub fn remove(&mut self) -> Result<(), ResourceError> {
        let Some(name) = self.name.as_deref() else {
            return Ok(());
        };
        if self.removed {
            return Ok(());
        }

        let c_name = c_name(name)?;
        // SAFETY: `c_name` is NUL terminated.
        if unsafe { libc::sem_unlink(c_name.as_ptr()) } != 0 {
            let error = io::Error::last_os_error();
            if error.raw_os_error() != Some(libc::ENOENT) {
                return Err(system_error(name, "sem_unlink", error));
            }
        }

        debug!("Removed semaphore {}", name);
        self.handle = None;
        self.removed = true;
        Ok(())
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        if self.owner && !self.removed {
            if let Err(e) = self.remove() {
                warn!("Failed to remove semaphore on drop: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[test]
    fn test_mutex_lock_guards_value() {
        let lock = Arc::new(MutexLock::new(0u64));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let lock = Arc::clone(&lock);
                thread::spawn(move || {
                    for _ in 0..1_000 {
                        *lock.lock() += 1;
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*lock.lock(), 4_000);
    }

    #[test]
    fn test_try_lock_fails_while_held() {
        let lock = MutexLock::new(());
        let guard = lock.lock();
        assert!(lock.is_locked());
        assert!(lock.try_lock().is_none());
        drop(guard);
        assert!(lock.try_lock().is_some());
    }

    #[test]
    fn test_condition_variable_signal() {
        let shared = Arc::new((MutexLock::new(false), ConditionVariable::new()));
        let waiter = {
            let shared = Arc::clone(&shared);
            thread::spawn(move || {
                let (lock, cond) = &*shared;
                let mut ready = lock.lock();
                cond.wait_while(&mut ready, |ready| !*ready);
                *ready
            })
        };

        {
            let (lock, cond) = &*shared;
            *lock.lock() = true;
            cond.signal();
        }
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_condition_variable_broadcast_wakes_all() {
        let shared = Arc::new((MutexLock::new(0usize), ConditionVariable::new()));
        let released = Arc::new(AtomicUsize::new(0));

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let shared = Arc::clone(&shared);
                let released = Arc::clone(&released);
                thread::spawn(move || {
                    let (lock, cond) = &*shared;
                    let mut generation = lock.lock();
                    cond.wait_while(&mut generation, |g| *g == 0);
                    released.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();

        {
            let (lock, cond) = &*shared;
            *lock.lock() = 1;
            cond.broadcast();
        }
        for waiter in waiters {
            waiter.join().unwrap();
        }
        assert_eq!(released.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_wait_for_times_out() {
        let lock = MutexLock::new(());
        let cond = ConditionVariable::new();
        let mut guard = lock.lock();
        assert!(cond.wait_for(&mut guard, Duration::from_millis(5)));
    }

    #[test]
    fn test_singleton_constructs_once() {
        static CELL: SingletonCell<usize> = SingletonCell::new();
        static CONSTRUCTIONS: AtomicUsize = AtomicUsize::new(0);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                thread::spawn(|| {
                    *CELL.get_or_init(|| {
                        CONSTRUCTIONS.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(5));
                        42
                    })
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 42);
        }
        assert_eq!(CONSTRUCTIONS.load(Ordering::SeqCst), 1);

        let old = CELL.teardown();
        assert_eq!(old.as_deref(), Some(&42));
        assert!(!CELL.is_initialized());
        assert!(CELL.get().is_none());
        assert_eq!(*CELL.get_or_init(|| 7), 7);
    }

    #[test]
    fn test_singleton_failed_init_leaves_cell_empty() {
        let cell: SingletonCell<u32> = SingletonCell::new();
        let result: Result<_, &str> = cell.get_or_try_init(|| Err("nope"));
        assert!(result.is_err());
        assert!(!cell.is_initialized());
        assert_eq!(*cell.get_or_try_init(|| Ok::<_, &str>(3)).unwrap(), 3);
    }

    #[test]
    fn test_semaphore_names_are_unique() {
        let a = Semaphore::with_count(0).unwrap();
        let b = Semaphore::with_count(0).unwrap();
        assert_ne!(a.name(), b.name());
        assert!(a.name().unwrap().starts_with("/strata."));
        assert!(a.name().unwrap().len() <= 31);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_semaphore_is_visible_to_the_system() {
        let mut semaphore = Semaphore::with_count(0).unwrap();
        let name = semaphore.name().unwrap().to_string();
        let path = std::path::PathBuf::from(format!("/dev/shm/sem.{}", &name[1..]));
        assert!(path.exists());

        semaphore.remove().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_semaphore_down_blocks_until_up() {
        let semaphore = Semaphore::with_count(0).unwrap();
        let name = semaphore.name().unwrap().to_string();
        let done = Arc::new(AtomicBool::new(false));

        let waiter = {
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let handle = Semaphore::open(&name).unwrap();
                handle.down().unwrap();
                done.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(20));
        assert!(!done.load(Ordering::SeqCst));
        semaphore.up().unwrap();
        waiter.join().unwrap();
        assert!(done.load(Ordering::SeqCst));
        assert!(!semaphore.try_down().unwrap());
    }

    #[test]
    fn test_semaphore_counts() {
        let semaphore = Semaphore::with_count(2).unwrap();
        assert!(semaphore.try_down().unwrap());
        assert!(semaphore.try_down().unwrap());
        assert!(!semaphore.try_down().unwrap());
        semaphore.up().unwrap();
        assert!(semaphore.try_down().unwrap());
    }

    #[cfg(not(target_vendor = "apple"))]
    #[test]
    fn test_semaphore_value() {
        let semaphore = Semaphore::with_count(3).unwrap();
        semaphore.down().unwrap();
        assert_eq!(semaphore.value().unwrap(), 2);
    }

    #[test]
    fn test_semaphore_remove_is_idempotent() {
        let mut semaphore = Semaphore::with_count(1).unwrap();
        let name = semaphore.name().unwrap().to_string();

        semaphore.remove().unwrap();
        semaphore.remove().unwrap();
        assert!(semaphore.is_removed());
        assert!(matches!(semaphore.up(), Err(ResourceError::Removed { .. })));
        assert!(matches!(
            Semaphore::open(&name),
            Err(ResourceError::NotFound { .. })
        ));
        // Dropping after an explicit remove must not remove again.
        drop(semaphore);
    }

    #[test]
    fn test_open_handle_survives_unlink() {
        let mut owner = Semaphore::with_count(0).unwrap();
        let other = Semaphore::open(owner.name().unwrap()).unwrap();

        owner.remove().unwrap();
        other.up().unwrap();
        assert!(other.try_down().unwrap());
    }

    #[test]
    fn test_remove_after_another_handle_unlinked() {
        let mut owner = Semaphore::with_count(0).unwrap();
        let mut other = Semaphore::open(owner.name().unwrap()).unwrap();
        other.remove().unwrap();
        assert!(owner.remove().is_ok());
    }

    #[test]
    fn test_drop_unlinks_owner_only() {
        let owner = Semaphore::with_count(0).unwrap();
        let name = owner.name().unwrap().to_string();

        drop(Semaphore::open(&name).unwrap());
        assert!(Semaphore::open(&name).is_ok());

        drop(owner);
        assert!(matches!(
            Semaphore::open(&name),
            Err(ResourceError::NotFound { .. })
        ));
    }

    #[test]
    fn test_uninitialized_semaphore() {
        let mut semaphore = Semaphore::new();
        assert_eq!(semaphore.up(), Err(ResourceError::NotInitialized));
        assert!(semaphore.remove().is_ok());
    }
}
