use std::mem;
use std::ptr;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use raw_sync::locks::{LockInit, Mutex};
use serde_derive::{Deserialize, Serialize};
use shared_memory::{Shmem, ShmemConf};
use signal_hook::consts::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};

use crate::errors::RingError;
use crate::ring::Ring;
use crate::sync::{Semaphore, SyncSet};

pub const DEFAULT_CAPACITY: usize = 1000;
pub const MAX_CAPACITY: usize = 1 << 24;

pub static REGION_FILE_NAME: &str = "shmring-region";

// How long an attacher waits for the owner to finish placement
// initialization before giving up.
const READY_WAIT: Duration = Duration::from_secs(5);

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegionConfig {
    pub data_dir: String,
    pub capacity: usize,
}

impl Default for RegionConfig {
    fn default() -> RegionConfig {
        RegionConfig {
            data_dir: ".".to_string(),
            capacity: DEFAULT_CAPACITY,
        }
    }
}

impl RegionConfig {
    fn link_path(&self) -> String {
        format!("{}/{}", &self.data_dir, REGION_FILE_NAME)
    }
}

// Segment layout: Header | mutex area | State (+ ring slots). The offsets
// are recomputed from the mapping base in every process; the base is
// page-aligned, so the carve-out below lands identically everywhere.
#[repr(C)]
struct Header {
    ready: AtomicU8,
    production_done: AtomicU8,
    capacity: u64,
    fill: Semaphore,
    empty: Semaphore,
}

/// Everything guarded by the region mutex. The ring keeps its item slots in
/// the bytes trailing this struct, so it must stay the last field.
#[repr(C)]
pub struct State {
    pub total_consumed: u64,
    pub ring: Ring,
}

#[inline]
fn align8(n: usize) -> usize {
    (n + 7) & !7
}

fn segment_bytes(capacity: usize) -> usize {
    // Mutex::size_of(Some(_)) only adds alignment padding on top of the
    // base size; 64 bytes of slack cover it.
    align8(mem::size_of::<Header>())
        + Mutex::size_of(None)
        + 64
        + mem::size_of::<State>()
        + capacity * mem::size_of::<u64>()
}

// One process-wide closing flag, registered on first use no matter how many
// regions the process attaches.
static CLOSING: Lazy<Arc<AtomicBool>> = Lazy::new(|| {
    let flag = Arc::new(AtomicBool::new(false));
    for sig in &[SIGHUP, SIGINT, SIGQUIT, SIGTERM] {
        // Only fails for invalid or forbidden signal numbers.
        let _ = signal_hook::flag::register(*sig, Arc::clone(&flag));
    }
    flag
});

/// True once the process received a shutdown signal. Role loops poll this
/// between protocol steps and bail out with `RingError::Interrupted`.
pub fn interrupted() -> bool {
    CLOSING.load(Ordering::Relaxed)
}

/// A mapping of the shared region.
///
/// The creator (`create_region`) owns the segment: dropping its `Region`
/// destroys the semaphores and removes the link, and must happen only after
/// every attached role has exited. Attachments (`attach_region`) are
/// non-owning and merely unmap on drop.
pub struct Region {
    shmem: Shmem,
    sync: SyncSet,
    header: NonNull<Header>,
    state: NonNull<State>,
}

/// Allocates and initializes a region for `cfg.capacity` items.
///
/// Initial state: empty ring, `fill = 0`, `empty = capacity`,
/// `production_done = false`, `total_consumed = 0`. Creation is exclusive;
/// a leftover link from a previous run surfaces as an error instead of
/// being silently reused.
pub fn create_region(cfg: &RegionConfig) -> Result<Region, RingError> {
    if cfg.capacity == 0 || cfg.capacity > MAX_CAPACITY {
        return Err(RingError::Invariant(format!(
            "capacity {} outside 1..={}",
            cfg.capacity, MAX_CAPACITY
        )));
    }
    let shmem = ShmemConf::new()
        .size(segment_bytes(cfg.capacity))
        .flink(cfg.link_path())
        .create()?;
    unsafe { Region::init(shmem, cfg.capacity) }
}

/// Opens an existing region as a non-owning attachment.
pub fn attach_region(cfg: &RegionConfig) -> Result<Region, RingError> {
    let shmem = ShmemConf::new().flink(cfg.link_path()).open()?;
    unsafe { Region::open(shmem) }
}

impl Region {
    unsafe fn init(shmem: Shmem, capacity: usize) -> Result<Region, RingError> {
        let base = shmem.as_ptr();
        let header = base as *mut Header;
        ptr::addr_of_mut!((*header).ready).write(AtomicU8::new(0));
        ptr::addr_of_mut!((*header).production_done).write(AtomicU8::new(0));
        ptr::addr_of_mut!((*header).capacity).write(capacity as u64);
        Semaphore::init(ptr::addr_of_mut!((*header).fill), 0)?;
        Semaphore::init(ptr::addr_of_mut!((*header).empty), capacity as u32)?;

        let lock_ptr = base.add(align8(mem::size_of::<Header>()));
        let state_ptr = lock_ptr.add(Mutex::size_of(Some(lock_ptr)));
        let (mutex, _) = Mutex::new(lock_ptr, state_ptr).map_err(RingError::Lock)?;

        let state = state_ptr as *mut State;
        ptr::addr_of_mut!((*state).total_consumed).write(0);
        Ring::init(ptr::addr_of_mut!((*state).ring), capacity);

        let sync = SyncSet::new(
            mutex,
            NonNull::new_unchecked(ptr::addr_of_mut!((*header).fill)),
            NonNull::new_unchecked(ptr::addr_of_mut!((*header).empty)),
        );

        // Publish only after everything above is in place; attachers spin
        // on this flag before touching the layout.
        (*header).ready.store(1, Ordering::Release);

        Ok(Region {
            shmem,
            sync,
            header: NonNull::new_unchecked(header),
            state: NonNull::new_unchecked(state),
        })
    }

    unsafe fn open(shmem: Shmem) -> Result<Region, RingError> {
        let base = shmem.as_ptr();
        let header = base as *mut Header;

        let started = Instant::now();
        while (*header).ready.load(Ordering::Acquire) != 1 {
            if started.elapsed() > READY_WAIT {
                return Err(RingError::Invariant(
                    "shared region never became ready".to_string(),
                ));
            }
            thread::sleep(Duration::from_millis(1));
        }

        let capacity = (*header).capacity as usize;
        if capacity == 0 || capacity > MAX_CAPACITY {
            return Err(RingError::Invariant(format!(
                "attached region reports capacity {}",
                capacity
            )));
        }

        let lock_ptr = base.add(align8(mem::size_of::<Header>()));
        let state_ptr = lock_ptr.add(Mutex::size_of(Some(lock_ptr)));
        let needed = state_ptr as usize - base as usize
            + mem::size_of::<State>()
            + capacity * mem::size_of::<u64>();
        if shmem.len() < needed {
            return Err(RingError::Invariant(format!(
                "segment holds {} bytes, layout needs {}",
                shmem.len(),
                needed
            )));
        }

        let (mutex, _) = Mutex::from_existing(lock_ptr, state_ptr).map_err(RingError::Lock)?;

        let sync = SyncSet::new(
            mutex,
            NonNull::new_unchecked(ptr::addr_of_mut!((*header).fill)),
            NonNull::new_unchecked(ptr::addr_of_mut!((*header).empty)),
        );

        Ok(Region {
            shmem,
            sync,
            header: NonNull::new_unchecked(header),
            state: NonNull::new_unchecked(state_ptr as *mut State),
        })
    }

    pub fn capacity(&self) -> usize {
        unsafe { self.header.as_ref() }.capacity as usize
    }

    pub fn is_owner(&self) -> bool {
        self.shmem.is_owner()
    }

    pub fn sync(&self) -> &SyncSet {
        &self.sync
    }

    pub fn production_done(&self) -> bool {
        unsafe { self.header.as_ref() }
            .production_done
            .load(Ordering::Acquire)
            == 1
    }

    /// Single, final write; only the producer calls this, after its last
    /// `fill` post.
    pub fn mark_production_done(&self) {
        unsafe { self.header.as_ref() }
            .production_done
            .store(1, Ordering::Release);
    }

    /// Runs `f` with the region mutex held. Every ring access and every
    /// `total_consumed` update goes through here.
    pub fn with_state<R, F>(&self, f: F) -> Result<R, RingError>
    where
        F: FnOnce(&mut State) -> R,
    {
        let _guard = self.sync.lock()?;
        let state = unsafe { &mut *self.state.as_ptr() };
        Ok(f(state))
    }

    pub fn total_consumed(&self) -> Result<u64, RingError> {
        self.with_state(|state| state.total_consumed)
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        // The owner tears the primitives down before the mapping and the
        // link go away; all attachments must have exited by then.
        if self.shmem.is_owner() {
            unsafe {
                let header = self.header.as_ptr();
                Semaphore::destroy(ptr::addr_of_mut!((*header).fill));
                Semaphore::destroy(ptr::addr_of_mut!((*header).empty));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use super::*;

    fn config_in(dir: &tempfile::TempDir, capacity: usize) -> RegionConfig {
        RegionConfig {
            data_dir: dir.path().to_str().unwrap().to_string(),
            capacity,
        }
    }

    #[test]
    fn create_then_attach_roundtrip() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let cfg = config_in(&dir, 16);

        let owner = create_region(&cfg)?;
        assert!(owner.is_owner());
        assert_eq!(owner.capacity(), 16);
        assert!(!owner.production_done());
        assert_eq!(owner.total_consumed()?, 0);
        assert_eq!(owner.sync().fill().value()?, 0);
        assert_eq!(owner.sync().empty().value()?, 16);

        let attached = attach_region(&cfg)?;
        assert!(!attached.is_owner());
        assert_eq!(attached.capacity(), 16);

        // A write through one mapping is visible through the other.
        attached.with_state(|state| state.ring.enqueue(7))?;
        let item = owner.with_state(|state| state.ring.dequeue())??;
        assert_eq!(item, 7);
        Ok(())
    }

    #[test]
    fn create_rejects_zero_capacity() {
        let dir = tempfile::tempdir().unwrap();
        match create_region(&config_in(&dir, 0)) {
            Err(RingError::Invariant(_)) => {}
            Err(e) => panic!("unexpected error: {:?}", e),
            Ok(_) => panic!("capacity 0 must be rejected"),
        }
    }

    #[test]
    fn create_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config_in(&dir, 4);
        let _owner = create_region(&cfg).unwrap();
        match create_region(&cfg) {
            Err(RingError::SharedMemory(_)) => {}
            Err(e) => panic!("unexpected error: {:?}", e),
            Ok(_) => panic!("second create on the same link must fail"),
        }
    }

    #[test]
    fn attach_requires_existing_region() {
        let dir = tempfile::tempdir().unwrap();
        match attach_region(&config_in(&dir, 4)) {
            Err(RingError::SharedMemory(_)) => {}
            Err(e) => panic!("unexpected error: {:?}", e),
            Ok(_) => panic!("attach without a region must fail"),
        }
    }

    #[test]
    fn production_done_crosses_mappings() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let cfg = config_in(&dir, 4);
        let owner = create_region(&cfg)?;
        let attached = attach_region(&cfg)?;
        assert!(!attached.production_done());
        owner.mark_production_done();
        assert!(attached.production_done());
        Ok(())
    }
}
