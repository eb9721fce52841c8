//! Pre-allocated bump arenas used to marshal `*_Args` structs and pointer tables across the
//! PJRT FFI boundary. Individual heap allocations on the execute/transfer hot path are
//! expensive; an arena amortizes them across all the values marshalled for one call, and the
//! pool amortizes the arenas themselves across calls.

use std::cell::Cell;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Allocation alignment guaranteed by [`Arena::alloc`] and [`Arena::alloc_slice`].
const ARENA_ALIGN_BYTES: usize = 8;

/// Smallest pooled arena capacity (2 KiB).
const MIN_POOLED_ARENA_SIZE: usize = 2048;

/// Largest pooled arena capacity (16 MiB). Requests beyond this are allocated directly and
/// never returned to the pool.
const MAX_POOLED_ARENA_SIZE: usize = 16 * 1024 * 1024;

const MIN_SHIFT: u32 = MIN_POOLED_ARENA_SIZE.trailing_zeros();
const MAX_SHIFT: u32 = MAX_POOLED_ARENA_SIZE.trailing_zeros();
const BUCKET_COUNT: usize = (MAX_SHIFT - MIN_SHIFT + 1) as usize;

/// A fixed-capacity bump allocator over a stable heap region. The region address never changes
/// for the lifetime of the arena, so pointers into it can be handed to the foreign runtime for
/// the duration of one call. Sub-allocations cannot be freed individually; [`Arena::reset`]
/// invalidates all of them at once and zeroes the used prefix so pooled reuse starts clean.
///
/// Capacity exhaustion is a caller bug (the marshalling code sizes its arena requests), not a
/// runtime condition, and panics.
pub struct Arena {
    /// Backing region, stored as words so the base pointer is 8-byte aligned.
    data: Box<[u64]>,
    capacity: usize,
    current: Cell<usize>,
    /// Pool bucket this arena belongs to; [`None`] for directly-allocated arenas.
    bucket: Option<usize>,
}

impl Arena {
    /// Creates a new arena with the provided fixed capacity in bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u64; capacity.div_ceil(8)].into_boxed_slice(),
            capacity,
            current: Cell::new(0),
            bucket: None,
        }
    }

    /// Total capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes consumed since creation or the last [`Arena::reset`].
    pub fn used(&self) -> usize {
        self.current.get()
    }

    /// Allocates `size_of::<T>()` bytes, 8-byte aligned, and returns a pointer valid until the
    /// arena is reset or dropped. The memory is zeroed.
    ///
    /// Panics when the arena runs out of capacity.
    pub fn alloc<T>(&self) -> *mut T {
        self.alloc_slice::<T>(1)
    }

    /// Allocates a contiguous zeroed region for `count` elements of `T`, 8-byte aligned.
    ///
    /// Panics when the arena runs out of capacity.
    pub fn alloc_slice<T>(&self, count: usize) -> *mut T {
        debug_assert!(align_of::<T>() <= ARENA_ALIGN_BYTES);
        let offset = self.current.get();
        let size = size_of::<T>() * count;
        if offset + size > self.capacity {
            panic!(
                "Arena(capacity={}) out of memory allocating {size} bytes at offset {offset}",
                self.capacity
            );
        }
        self.current.set((offset + size + ARENA_ALIGN_BYTES - 1) & !(ARENA_ALIGN_BYTES - 1));
        unsafe { (self.data.as_ptr() as *mut u8).add(offset) as *mut T }
    }

    /// Copies `bytes` into the arena and returns a pointer to the copy.
    pub fn alloc_bytes(&self, bytes: &[u8]) -> *mut u8 {
        let ptr = self.alloc_slice::<u8>(bytes.len().max(1));
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr, bytes.len()) };
        ptr
    }

    /// Copies a slice of plain values into the arena and returns a pointer to the copy.
    pub fn alloc_copy<T: Copy>(&self, values: &[T]) -> *mut T {
        let ptr = self.alloc_slice::<T>(values.len().max(1));
        unsafe { std::ptr::copy_nonoverlapping(values.as_ptr(), ptr, values.len()) };
        ptr
    }

    /// Invalidates all previous allocations, zeroing the used prefix so the arena can be
    /// reused from a clean state.
    pub fn reset(&mut self) {
        let used = self.current.get().min(self.capacity);
        self.data[..used.div_ceil(8)].fill(0);
        self.current.set(0);
    }
}

// The arena hands out raw pointers, so it is not Sync; moving it between threads is fine.
unsafe impl Send for Arena {}

/// One free-list slot, padded to the cache line so concurrent slots do not false-share.
#[repr(align(64))]
struct ArenaSlot {
    buckets: [Mutex<Vec<Arena>>; BUCKET_COUNT],
}

impl ArenaSlot {
    fn new() -> Self {
        Self { buckets: std::array::from_fn(|_| Mutex::new(Vec::new())) }
    }
}

/// Per-process pool of [`Arena`]s at power-of-two capacities between 2 KiB and 16 MiB. Free
/// lists are striped across cache-line-padded slots indexed by a per-thread slot id, so
/// concurrent callers rarely contend on the same lock (the Rust analogue of the per-P free
/// lists the Go runtime allows via `procPin`).
pub struct ArenaPools {
    slots: Box<[ArenaSlot]>,
}

static NEXT_THREAD_SLOT: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static THREAD_SLOT: usize = NEXT_THREAD_SLOT.fetch_add(1, Ordering::Relaxed);
}

impl ArenaPools {
    /// Creates a pool with one slot per available CPU.
    pub fn new() -> Self {
        let slots = std::thread::available_parallelism().map(|count| count.get()).unwrap_or(1);
        Self { slots: (0..slots).map(|_| ArenaSlot::new()).collect() }
    }

    fn slot(&self) -> &ArenaSlot {
        let index = THREAD_SLOT.with(|slot| *slot) % self.slots.len();
        &self.slots[index]
    }

    /// Returns an arena whose capacity is the smallest supported power of two that is at least
    /// `target_size` (and at least 2 KiB). Requests beyond 16 MiB allocate directly; such
    /// arenas are freed rather than pooled when returned.
    pub fn get(&self, target_size: usize) -> Arena {
        let target_size = target_size.max(MIN_POOLED_ARENA_SIZE);
        let shift = usize::BITS - (target_size - 1).leading_zeros();
        if shift > MAX_SHIFT {
            return Arena::new(target_size);
        }
        let bucket = (shift - MIN_SHIFT) as usize;
        let mut free_list = self.slot().buckets[bucket].lock().unwrap();
        if let Some(arena) = free_list.pop() {
            return arena;
        }
        drop(free_list);
        let mut arena = Arena::new(1 << shift);
        arena.bucket = Some(bucket);
        arena
    }

    /// Returns an arena to the pool, reset and zeroed, ready for reuse. Out-of-range arenas
    /// are dropped.
    pub fn put(&self, mut arena: Arena) {
        let Some(bucket) = arena.bucket else {
            return;
        };
        arena.reset();
        self.slot().buckets[bucket].lock().unwrap().push(arena);
    }
}

impl Default for ArenaPools {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_alignment_and_no_overlap() {
        let arena = Arena::new(4096);
        let base = arena.alloc::<u64>();
        assert_eq!(base as usize % 8, 0);
        let second = arena.alloc::<u8>();
        let third = arena.alloc::<u64>();
        // Consecutive allocations are 8-byte aligned and never overlap.
        assert_eq!(second as usize % 8, 0);
        assert_eq!(third as usize % 8, 0);
        assert!(second as usize >= base as usize + 8);
        assert!(third as usize >= second as usize + 1);

        let slice = arena.alloc_slice::<i64>(4);
        assert_eq!(slice as usize % 8, 0);
        assert!(slice as usize >= third as usize + 8);
    }

    #[test]
    fn test_reset_returns_base_pointer_and_zeroes() {
        let mut arena = Arena::new(256);
        let first = arena.alloc::<u64>();
        unsafe { *first = 0xDEAD_BEEF };
        let base = first as usize;
        arena.reset();
        let again = arena.alloc::<u64>();
        assert_eq!(again as usize, base);
        assert_eq!(unsafe { *again }, 0);
    }

    #[test]
    #[should_panic(expected = "out of memory")]
    fn test_exhaustion_panics() {
        let arena = Arena::new(16);
        let _ = arena.alloc_slice::<u8>(17);
    }

    #[test]
    fn test_alloc_copy() {
        let arena = Arena::new(256);
        let values = [1i64, 2, 3];
        let ptr = arena.alloc_copy(&values);
        let copied = unsafe { std::slice::from_raw_parts(ptr, 3) };
        assert_eq!(copied, &values);

        let bytes = arena.alloc_bytes(b"stablehlo");
        assert_eq!(unsafe { std::slice::from_raw_parts(bytes, 9) }, b"stablehlo");
    }

    #[test]
    fn test_pool_bucket_rounding() {
        let pools = ArenaPools::new();
        assert_eq!(pools.get(1).capacity(), MIN_POOLED_ARENA_SIZE);
        assert_eq!(pools.get(2048).capacity(), 2048);
        assert_eq!(pools.get(2049).capacity(), 4096);
        assert_eq!(pools.get(100_000).capacity(), 131_072);
        assert_eq!(pools.get(MAX_POOLED_ARENA_SIZE).capacity(), MAX_POOLED_ARENA_SIZE);
        // Oversized requests are allocated directly at the requested size.
        assert_eq!(pools.get(MAX_POOLED_ARENA_SIZE + 1).capacity(), MAX_POOLED_ARENA_SIZE + 1);
    }

    #[test]
    fn test_pool_reuse_is_zeroed() {
        let pools = ArenaPools::new();
        let arena = pools.get(2048);
        let ptr = arena.alloc_slice::<u8>(64);
        unsafe { std::ptr::write_bytes(ptr, 0xAB, 64) };
        pools.put(arena);

        // The same bucket serves the next request on this thread, already zeroed.
        let arena = pools.get(2048);
        let ptr = arena.alloc_slice::<u8>(64);
        let contents = unsafe { std::slice::from_raw_parts(ptr, 64) };
        assert!(contents.iter().all(|&byte| byte == 0));
    }

    #[test]
    fn test_pool_concurrent_use() {
        let pools = std::sync::Arc::new(ArenaPools::new());
        let mut threads = Vec::new();
        for _ in 0..8 {
            let pools = pools.clone();
            threads.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    let arena = pools.get(4096);
                    let ptr = arena.alloc_slice::<u64>(16);
                    unsafe { std::ptr::write_bytes(ptr as *mut u8, 0x11, 128) };
                    pools.put(arena);
                }
            }));
        }
        for thread in threads {
            thread.join().unwrap();
        }
    }
}
