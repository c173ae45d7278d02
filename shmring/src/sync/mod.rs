use std::cell::UnsafeCell;
use std::io;
use std::ptr::NonNull;
use std::time::Duration;

use raw_sync::locks::{LockGuard, LockImpl};

use crate::errors::RingError;

/// Process-shared counting semaphore living inside the shared segment.
///
/// A thin wrapper over an unnamed POSIX `sem_t` initialized with
/// `pshared = 1`, so waits and posts pair up across every process mapping
/// the segment. A blocked waiter is released only by a matching `post`;
/// there is no spontaneous wakeup.
#[repr(C)]
pub struct Semaphore {
    inner: UnsafeCell<libc::sem_t>,
}

unsafe impl Send for Semaphore {}
unsafe impl Sync for Semaphore {}

impl Semaphore {
    /// Initializes the semaphore in place with `value`.
    ///
    /// `this` must point into memory that outlives every user of the
    /// semaphore and is mapped by every participating process.
    pub(crate) unsafe fn init(this: *mut Semaphore, value: u32) -> Result<(), RingError> {
        if libc::sem_init((*this).inner.get(), 1, value) != 0 {
            return Err(RingError::Semaphore(io::Error::last_os_error()));
        }
        Ok(())
    }

    /// Releases the semaphore's OS resources. Owner-side teardown only,
    /// after all waiters have exited.
    pub(crate) unsafe fn destroy(this: *mut Semaphore) {
        libc::sem_destroy((*this).inner.get());
    }

    /// Blocks until the count is positive, then decrements it.
    pub fn wait(&self) -> Result<(), RingError> {
        loop {
            if unsafe { libc::sem_wait(self.inner.get()) } == 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            return Err(RingError::Semaphore(err));
        }
    }

    /// Like `wait`, but gives up after `timeout`. Returns `Ok(false)` on
    /// timeout, `Ok(true)` when the count was acquired.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<bool, RingError> {
        let deadline = deadline_after(timeout)?;
        loop {
            if unsafe { libc::sem_timedwait(self.inner.get(), &deadline) } == 0 {
                return Ok(true);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::ETIMEDOUT) => return Ok(false),
                Some(libc::EINTR) => continue,
                _ => return Err(RingError::Semaphore(err)),
            }
        }
    }

    /// Increments the count, releasing one blocked waiter if any.
    pub fn post(&self) -> Result<(), RingError> {
        if unsafe { libc::sem_post(self.inner.get()) } != 0 {
            return Err(RingError::Semaphore(io::Error::last_os_error()));
        }
        Ok(())
    }

    /// Current count.
    pub fn value(&self) -> Result<i32, RingError> {
        let mut v = 0;
        if unsafe { libc::sem_getvalue(self.inner.get(), &mut v) } != 0 {
            return Err(RingError::Semaphore(io::Error::last_os_error()));
        }
        Ok(v)
    }
}

// sem_timedwait takes an absolute CLOCK_REALTIME deadline.
fn deadline_after(timeout: Duration) -> Result<libc::timespec, RingError> {
    let mut now = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    if unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut now) } != 0 {
        return Err(RingError::Semaphore(io::Error::last_os_error()));
    }
    let nsec = now.tv_nsec + timeout.subsec_nanos() as libc::c_long;
    Ok(libc::timespec {
        tv_sec: now.tv_sec + timeout.as_secs() as libc::time_t + nsec / 1_000_000_000,
        tv_nsec: nsec % 1_000_000_000,
    })
}

/// The coordination primitives guarding the shared ring: the region mutex
/// plus the fill/empty counting pair.
///
/// The set enforces nothing by itself; the producer and consumer roles
/// sequence it as `empty.wait -> lock -> mutate -> unlock -> fill.post` and
/// the mirror image for consuming. Fairness among waiters on one semaphore
/// is whatever the OS provides; the protocol does not rely on it.
pub struct SyncSet {
    mutex: Box<dyn LockImpl>,
    fill: NonNull<Semaphore>,
    empty: NonNull<Semaphore>,
}

impl SyncSet {
    pub(crate) fn new(
        mutex: Box<dyn LockImpl>,
        fill: NonNull<Semaphore>,
        empty: NonNull<Semaphore>,
    ) -> SyncSet {
        SyncSet { mutex, fill, empty }
    }

    /// Counts items available to consume. Initial value 0.
    pub fn fill(&self) -> &Semaphore {
        unsafe { self.fill.as_ref() }
    }

    /// Counts free slots available to produce into. Initial value C.
    pub fn empty(&self) -> &Semaphore {
        unsafe { self.empty.as_ref() }
    }

    pub(crate) fn lock(&self) -> Result<LockGuard<'_>, RingError> {
        self.mutex.lock().map_err(RingError::Lock)
    }
}

#[cfg(test)]
mod tests {
    use std::mem::MaybeUninit;
    use std::thread;
    use std::time::Duration;

    use super::*;

    fn leaked_semaphore(value: u32) -> &'static Semaphore {
        let slot: &'static mut MaybeUninit<Semaphore> = Box::leak(Box::new(MaybeUninit::uninit()));
        unsafe {
            Semaphore::init(slot.as_mut_ptr(), value).expect("sem_init failed");
            &*slot.as_ptr()
        }
    }

    #[test]
    fn counts_down_to_zero_then_times_out() -> Result<(), RingError> {
        let sem = leaked_semaphore(2);
        assert_eq!(sem.value()?, 2);
        sem.wait()?;
        sem.wait()?;
        assert_eq!(sem.value()?, 0);
        assert!(!sem.wait_timeout(Duration::from_millis(10))?);
        Ok(())
    }

    #[test]
    fn post_releases_a_timed_waiter() -> Result<(), RingError> {
        let sem = leaked_semaphore(0);
        sem.post()?;
        assert!(sem.wait_timeout(Duration::from_millis(100))?);
        Ok(())
    }

    #[test]
    fn post_wakes_blocked_thread() {
        let sem = leaked_semaphore(0);
        let waiter = thread::spawn(move || sem.wait().expect("wait failed"));
        thread::sleep(Duration::from_millis(20));
        sem.post().expect("post failed");
        waiter.join().expect("waiter panicked");
    }
}
