use std::mem;

use crate::errors::RingError;

/// Fixed-capacity circular buffer of opaque items.
///
/// The struct itself is only the bookkeeping header; `capacity` item slots
/// follow it in the same allocation. All operations are O(1) and perform no
/// synchronization of their own: exclusive access is the caller's job, which
/// the region provides by running every mutation under its mutex.
///
/// `head == tail` is ambiguous between empty and full and is disambiguated
/// solely by `full`, so no separate element counter is needed.
#[repr(C)]
pub struct Ring {
    head: usize,
    tail: usize,
    capacity: usize,
    full: bool,
}

impl Ring {
    /// Bytes required for a ring of `capacity` slots, header included.
    pub fn bytes_for(capacity: usize) -> usize {
        mem::size_of::<Ring>() + capacity * mem::size_of::<u64>()
    }

    /// Constructs a ring in place at `ptr`.
    ///
    /// The allocation must hold at least `bytes_for(capacity)` bytes and be
    /// aligned for `Ring`; `capacity` must be non-zero.
    pub(crate) unsafe fn init(ptr: *mut Ring, capacity: usize) {
        debug_assert!(capacity > 0);
        ptr.write(Ring {
            head: 0,
            tail: 0,
            capacity,
            full: false,
        });
    }

    #[inline]
    fn slot(&self, index: usize) -> *mut u64 {
        debug_assert!(index < self.capacity);
        unsafe { ((self as *const Ring).add(1) as *mut u64).add(index) }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn occupancy(&self) -> usize {
        if self.full {
            self.capacity
        } else {
            (self.head + self.capacity - self.tail) % self.capacity
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.full && self.head == self.tail
    }

    pub fn is_full(&self) -> bool {
        self.full
    }

    /// Writes `item` at the head slot and advances the head.
    ///
    /// When called on a full ring the tail advances too, overwriting the
    /// oldest item. The surrounding semaphore protocol never takes that
    /// path in normal operation.
    pub fn enqueue(&mut self, item: u64) {
        unsafe { self.slot(self.head).write(item) };
        self.head = (self.head + 1) % self.capacity;
        if self.full {
            self.tail = (self.tail + 1) % self.capacity;
        }
        self.full = self.head == self.tail;
    }

    /// Removes and returns the tail item.
    ///
    /// Calling this on an empty ring means the caller skipped the fill
    /// reservation, which is a synchronization defect, not a recoverable
    /// condition.
    pub fn dequeue(&mut self) -> Result<u64, RingError> {
        if self.is_empty() {
            return Err(RingError::Invariant("dequeue on empty ring".to_string()));
        }
        let item = unsafe { self.slot(self.tail).read() };
        self.full = false;
        self.tail = (self.tail + 1) % self.capacity;
        Ok(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Heap-backed stand-in for the in-segment placement the region does.
    struct TestRing {
        mem: Vec<u64>,
    }

    impl TestRing {
        fn new(capacity: usize) -> TestRing {
            let words = (Ring::bytes_for(capacity) + 7) / 8;
            let mut t = TestRing {
                mem: vec![0u64; words],
            };
            unsafe { Ring::init(t.mem.as_mut_ptr() as *mut Ring, capacity) };
            t
        }

        fn ring(&mut self) -> &mut Ring {
            unsafe { &mut *(self.mem.as_mut_ptr() as *mut Ring) }
        }
    }

    #[test]
    fn starts_empty() {
        let mut t = TestRing::new(4);
        let ring = t.ring();
        assert!(ring.is_empty());
        assert!(!ring.is_full());
        assert_eq!(ring.capacity(), 4);
        assert_eq!(ring.occupancy(), 0);
    }

    #[test]
    fn fifo_order_across_wraparound() -> Result<(), RingError> {
        let mut t = TestRing::new(3);
        let ring = t.ring();
        ring.enqueue(0);
        ring.enqueue(1);
        ring.enqueue(2);
        assert!(ring.is_full());
        assert_eq!(ring.dequeue()?, 0);
        // Head wraps past the end while 1 and 2 are still queued.
        ring.enqueue(3);
        assert_eq!(ring.dequeue()?, 1);
        assert_eq!(ring.dequeue()?, 2);
        assert_eq!(ring.dequeue()?, 3);
        assert!(ring.is_empty());
        Ok(())
    }

    #[test]
    fn full_and_empty_share_head_tail_position() -> Result<(), RingError> {
        let mut t = TestRing::new(2);
        let ring = t.ring();
        ring.enqueue(10);
        ring.enqueue(11);
        assert!(ring.is_full());
        assert!(!ring.is_empty());
        assert_eq!(ring.occupancy(), 2);
        assert_eq!(ring.dequeue()?, 10);
        assert!(!ring.is_full());
        assert_eq!(ring.dequeue()?, 11);
        // Same head == tail position as when full; only the flag differs.
        assert!(ring.is_empty());
        assert_eq!(ring.occupancy(), 0);
        Ok(())
    }

    #[test]
    fn occupancy_tracks_operations() -> Result<(), RingError> {
        let mut t = TestRing::new(4);
        let ring = t.ring();
        for i in 0..3 {
            ring.enqueue(i);
            assert_eq!(ring.occupancy(), (i + 1) as usize);
        }
        ring.dequeue()?;
        assert_eq!(ring.occupancy(), 2);
        ring.enqueue(3);
        ring.enqueue(4);
        assert_eq!(ring.occupancy(), 4);
        assert!(ring.is_full());
        Ok(())
    }

    #[test]
    fn overwrite_on_full_advances_tail() -> Result<(), RingError> {
        let mut t = TestRing::new(2);
        let ring = t.ring();
        ring.enqueue(1);
        ring.enqueue(2);
        // Contract-violating call: drops the oldest item, stays full.
        ring.enqueue(3);
        assert!(ring.is_full());
        assert_eq!(ring.occupancy(), 2);
        assert_eq!(ring.dequeue()?, 2);
        assert_eq!(ring.dequeue()?, 3);
        assert!(ring.is_empty());
        Ok(())
    }

    #[test]
    fn dequeue_on_empty_reports_invariant_violation() {
        let mut t = TestRing::new(4);
        match t.ring().dequeue() {
            Err(RingError::Invariant(_)) => {}
            Err(e) => panic!("unexpected error: {:?}", e),
            Ok(v) => panic!("dequeue on empty returned {}", v),
        }
    }

    #[test]
    fn single_slot_ring() -> Result<(), RingError> {
        let mut t = TestRing::new(1);
        let ring = t.ring();
        for i in 0..3 {
            assert!(ring.is_empty());
            ring.enqueue(i);
            assert!(ring.is_full());
            assert_eq!(ring.occupancy(), 1);
            assert_eq!(ring.dequeue()?, i);
        }
        assert!(ring.is_empty());
        Ok(())
    }
}
