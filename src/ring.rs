/// Lock-free ring buffers
///
/// Bounded power-of-two queues for the ingestion hot path: a
/// single-producer/single-consumer ring for the driver-to-consumer hand-off
/// and a multi-producer/single-consumer ring for aggregating feeds.
///
/// Counters are monotonic u64s; the cell index is the counter masked by
/// capacity - 1, so wraparound never touches the counters themselves.

use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{fence, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// What a producer does when the ring is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackpressureMode {
    /// Reject the push; the caller counts the drop. Preferred for a
    /// real-time consumer that must not stall the reception thread.
    Drop,
    /// Busy-try with a cooperative yield until space frees or the timeout
    /// elapses (a zero timeout waits forever).
    Block,
}

/// Single-producer/single-consumer lock-free ring buffer.
///
/// Exactly one thread may push and exactly one thread may pop. Pushing
/// from two threads concurrently is a programming error, not a supported
/// mode; use [`MpscRing`] for fan-in.
pub struct SpscRing<T> {
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    capacity: u64,
    mask: u64,
    write: CachePadded<AtomicU64>,
    read: CachePadded<AtomicU64>,
    high_water: CachePadded<AtomicU64>,
}

unsafe impl<T: Send> Send for SpscRing<T> {}
unsafe impl<T: Send> Sync for SpscRing<T> {}

impl<T: Copy> SpscRing<T> {
    /// Create a ring with the given capacity. Panics unless the capacity
    /// is a power of two greater than zero.
    pub fn new(capacity: u64) -> Self {
        assert!(
            capacity > 0 && capacity & (capacity - 1) == 0,
            "ring capacity must be a power of two"
        );
        let slots = (0..capacity)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect();
        SpscRing {
            slots,
            capacity,
            mask: capacity - 1,
            write: CachePadded::new(AtomicU64::new(0)),
            read: CachePadded::new(AtomicU64::new(0)),
            high_water: CachePadded::new(AtomicU64::new(0)),
        }
    }

    #[inline]
    unsafe fn cell_write(&self, pos: u64, value: T) {
        let cell = self.slots.get_unchecked((pos & self.mask) as usize);
        (*cell.get()).write(value);
    }

    #[inline]
    unsafe fn cell_read(&self, pos: u64) -> T {
        let cell = self.slots.get_unchecked((pos & self.mask) as usize);
        (*cell.get()).assume_init()
    }

    /// Racy upper bound is acceptable for a monitoring counter.
    #[inline]
    fn note_high_water(&self, size: u64) {
        if size > self.high_water.load(Ordering::Relaxed) {
            self.high_water.store(size, Ordering::Relaxed);
        }
    }

    /// Push one value. Returns false when the ring is full.
    #[inline]
    pub fn try_push(&self, value: T) -> bool {
        let write = self.write.load(Ordering::Relaxed);
        let read = self.read.load(Ordering::Acquire);
        if write - read >= self.capacity {
            return false;
        }
        // Single producer: plain store of the cell, published by the
        // release store of the write counter.
        unsafe { self.cell_write(write, value) };
        self.write.store(write + 1, Ordering::Release);
        self.note_high_water(write + 1 - read);
        true
    }

    /// Pop one value. Returns None when the ring is empty.
    #[inline]
    pub fn try_pop(&self) -> Option<T> {
        let read = self.read.load(Ordering::Relaxed);
        let write = self.write.load(Ordering::Acquire);
        if read == write {
            return None;
        }
        // Pairs with the producer's release store of `write`: the cell
        // contents are visible before we read them.
        fence(Ordering::Acquire);
        let value = unsafe { self.cell_read(read) };
        self.read.store(read + 1, Ordering::Release);
        Some(value)
    }

    /// Push a contiguous span with one membership check and one counter
    /// update. Returns how many values were accepted.
    pub fn try_push_bulk(&self, values: &[T]) -> usize {
        let write = self.write.load(Ordering::Relaxed);
        let read = self.read.load(Ordering::Acquire);
        let space = self.capacity - (write - read);
        let count = (values.len() as u64).min(space);
        if count == 0 {
            return 0;
        }
        for (i, value) in values[..count as usize].iter().enumerate() {
            unsafe { self.cell_write(write + i as u64, *value) };
        }
        self.write.store(write + count, Ordering::Release);
        self.note_high_water(write + count - read);
        count as usize
    }

    /// Pop up to `out.len()` values. Returns how many were written to the
    /// front of `out`.
    pub fn try_pop_bulk(&self, out: &mut [T]) -> usize {
        let read = self.read.load(Ordering::Relaxed);
        let write = self.write.load(Ordering::Acquire);
        let available = write - read;
        let count = (out.len() as u64).min(available);
        if count == 0 {
            return 0;
        }
        fence(Ordering::Acquire);
        for (i, slot) in out[..count as usize].iter_mut().enumerate() {
            *slot = unsafe { self.cell_read(read + i as u64) };
        }
        self.read.store(read + count, Ordering::Release);
        count as usize
    }

    /// Push with a backpressure policy. `Drop` is exactly [`try_push`];
    /// `Block` busy-tries until space frees, yielding between tries, and
    /// gives up once `timeout` elapses (zero = wait forever).
    ///
    /// [`try_push`]: SpscRing::try_push
    pub fn push_or_block(&self, value: T, timeout: Duration, mode: BackpressureMode) -> bool {
        match mode {
            BackpressureMode::Drop => self.try_push(value),
            BackpressureMode::Block => {
                let deadline = (!timeout.is_zero()).then(|| Instant::now() + timeout);
                loop {
                    if self.try_push(value) {
                        return true;
                    }
                    if let Some(deadline) = deadline {
                        if Instant::now() >= deadline {
                            return false;
                        }
                    }
                    std::thread::yield_now();
                }
            }
        }
    }

    pub fn size(&self) -> u64 {
        let write = self.write.load(Ordering::Acquire);
        let read = self.read.load(Ordering::Acquire);
        write - read
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Maximum observed size; advisory.
    pub fn high_water_mark(&self) -> u64 {
        self.high_water.load(Ordering::Relaxed)
    }
}

/// Multi-producer/single-consumer ring buffer.
///
/// Producers reserve a cell with a compare-and-swap on the write counter
/// and fill it afterwards. The consumer may observe a reserved cell before
/// its producer finished writing; that interleaving is accepted here
/// because every origin is written from exactly one worker thread, so
/// per-origin order is preserved and only cross-origin interleaving is
/// unordered. Cells are value-initialized so a read in that window yields
/// stale data, never uninitialized memory.
pub struct MpscRing<T> {
    slots: Box<[UnsafeCell<T>]>,
    capacity: u64,
    mask: u64,
    write: CachePadded<AtomicU64>,
    read: CachePadded<AtomicU64>,
}

unsafe impl<T: Send> Send for MpscRing<T> {}
unsafe impl<T: Send> Sync for MpscRing<T> {}

impl<T: Copy + Default> MpscRing<T> {
    /// Create a ring with the given capacity. Panics unless the capacity
    /// is a power of two greater than zero.
    pub fn new(capacity: u64) -> Self {
        assert!(
            capacity > 0 && capacity & (capacity - 1) == 0,
            "ring capacity must be a power of two"
        );
        let slots = (0..capacity).map(|_| UnsafeCell::new(T::default())).collect();
        MpscRing {
            slots,
            capacity,
            mask: capacity - 1,
            write: CachePadded::new(AtomicU64::new(0)),
            read: CachePadded::new(AtomicU64::new(0)),
        }
    }

    /// Push one value, retrying the slot reservation on CAS conflicts.
    /// Returns false when the ring is full.
    pub fn try_push(&self, value: T) -> bool {
        loop {
            let write = self.write.load(Ordering::Relaxed);
            let read = self.read.load(Ordering::Acquire);
            if write - read >= self.capacity {
                return false;
            }
            if self
                .write
                .compare_exchange_weak(write, write + 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                let cell = unsafe { self.slots.get_unchecked((write & self.mask) as usize) };
                unsafe { *cell.get() = value };
                return true;
            }
            std::hint::spin_loop();
        }
    }

    /// Pop one value. Identical to the SPSC consumer side.
    pub fn try_pop(&self) -> Option<T> {
        let read = self.read.load(Ordering::Relaxed);
        let write = self.write.load(Ordering::Acquire);
        if read == write {
            return None;
        }
        fence(Ordering::Acquire);
        let cell = unsafe { self.slots.get_unchecked((read & self.mask) as usize) };
        let value = unsafe { *cell.get() };
        self.read.store(read + 1, Ordering::Release);
        Some(value)
    }

    pub fn size(&self) -> u64 {
        let write = self.write.load(Ordering::Acquire);
        let read = self.read.load(Ordering::Acquire);
        write - read
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }
}
