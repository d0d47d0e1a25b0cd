//! An index-addressed node arena.
//!
//! The split-reference-counting containers need to CAS a node reference and a
//! count as one atomic unit, which rules out full-width pointers. The arena
//! gives every node a stable `u32` [`Handle`] instead: slots live in chunks
//! that are installed once and never move, so a handle stays valid until the
//! owning container proves the node unreachable and frees it.
//!
//! Freed slots recycle through a Treiber free list of slot indices. The free
//! head packs a generation tag next to the index and every push or pop bumps
//! it, so a pop's `compare_exchange` cannot succeed against a head that was
//! popped and re-pushed in between.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU32, AtomicU64, Ordering};

/// log2 of the first chunk's slot count.
const CHUNK0_BITS: u32 = 6;
/// Chunk sizes double, so 26 chunks cover the whole `u32` handle space.
const NUM_CHUNKS: usize = 26;
/// One index is reserved as the nil sentinel.
const MAX_SLOTS: u32 = u32::MAX - (1 << CHUNK0_BITS);

/// A stable index naming one arena slot.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Handle(u32);

impl Handle {
    /// Raw value of the nil sentinel; never names a live slot.
    pub const NIL_RAW: u32 = u32::MAX;

    pub(crate) fn new(raw: u32) -> Self {
        debug_assert!(raw != Self::NIL_RAW);
        Handle(raw)
    }

    pub(crate) fn from_raw(raw: u32) -> Option<Self> {
        if raw == Self::NIL_RAW {
            None
        } else {
            Some(Handle(raw))
        }
    }

    pub(crate) fn raw(self) -> u32 {
        self.0
    }
}

struct Slot<T> {
    next_free: AtomicU32,
    value: UnsafeCell<MaybeUninit<T>>,
}

impl<T> Slot<T> {
    fn empty() -> Self {
        Slot {
            next_free: AtomicU32::new(Handle::NIL_RAW),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }
}

/// A lock-free slab of `T` slots addressed by [`Handle`].
///
/// Callers are responsible for the reclamation proof: `get` and `free` are
/// unsafe because only the owning container knows when a handle can no longer
/// be reached by any thread.
pub struct Arena<T> {
    chunks: [AtomicPtr<Slot<T>>; NUM_CHUNKS],
    /// Packed `{generation, head index}` of the recycled-slot list.
    free: AtomicU64,
    /// First never-used slot index.
    next_fresh: AtomicU32,
}

unsafe impl<T: Send> Send for Arena<T> {}
unsafe impl<T: Send> Sync for Arena<T> {}

impl<T> Arena<T> {
    const NULL_CHUNK: AtomicPtr<Slot<T>> = AtomicPtr::new(ptr::null_mut());

    pub fn new() -> Self {
        Arena {
            chunks: [Self::NULL_CHUNK; NUM_CHUNKS],
            free: AtomicU64::new(u64::from(Handle::NIL_RAW)),
            next_fresh: AtomicU32::new(0),
        }
    }

    /// Store `value` in a slot and return its handle.
    ///
    /// # Panics
    /// Panics when the `u32` handle space is exhausted; like allocator
    /// exhaustion this is fatal, not a condition callers retry.
    pub fn alloc(&self, value: T) -> Handle {
        let index = match self.pop_free() {
            Some(index) => index,
            None => self.reserve_fresh(),
        };
        unsafe {
            let slot = self.slot(index);
            (*(*slot).value.get()).as_mut_ptr().write(value);
        }
        Handle::new(index)
    }

    /// Shared access to the value behind `handle`.
    ///
    /// # Safety
    /// `handle` must have been returned by `alloc` on this arena and not yet
    /// passed to `free`.
    pub unsafe fn get(&self, handle: Handle) -> &T {
        let slot = self.slot(handle.raw());
        &*(*(*slot).value.get()).as_ptr()
    }

    /// Drop the value behind `handle` and recycle its slot.
    ///
    /// # Safety
    /// `handle` must be live, and no thread may dereference it concurrently
    /// with or after this call.
    pub unsafe fn free(&self, handle: Handle) {
        let index = handle.raw();
        let slot = self.slot(index);
        ptr::drop_in_place((*(*slot).value.get()).as_mut_ptr());

        let mut head = self.free.load(Ordering::Relaxed);
        loop {
            (*slot).next_free.store(head as u32, Ordering::Relaxed);
            let generation = (head >> 32) as u32;
            let new = (u64::from(generation.wrapping_add(1)) << 32) | u64::from(index);
            match self
                .free
                .compare_exchange_weak(head, new, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(current) => head = current,
            }
        }
    }

    fn pop_free(&self) -> Option<u32> {
        let mut head = self.free.load(Ordering::Acquire);
        loop {
            let index = head as u32;
            if index == Handle::NIL_RAW {
                return None;
            }
            let next = unsafe { (*self.slot(index)).next_free.load(Ordering::Relaxed) };
            let generation = (head >> 32) as u32;
            let new = (u64::from(generation.wrapping_add(1)) << 32) | u64::from(next);
            match self
                .free
                .compare_exchange_weak(head, new, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Some(index),
                Err(current) => head = current,
            }
        }
    }

    fn reserve_fresh(&self) -> u32 {
        let index = self.next_fresh.fetch_add(1, Ordering::Relaxed);
        assert!(index < MAX_SLOTS, "arena handle space exhausted");
        let (chunk, _) = locate(index);
        self.ensure_chunk(chunk);
        index
    }

    fn ensure_chunk(&self, chunk: usize) {
        if !self.chunks[chunk].load(Ordering::Acquire).is_null() {
            return;
        }
        let len = chunk_len(chunk);
        let mut slots: Vec<Slot<T>> = Vec::with_capacity(len);
        slots.extend((0..len).map(|_| Slot::empty()));
        let fresh = Box::into_raw(slots.into_boxed_slice()) as *mut Slot<T>;
        if self.chunks[chunk]
            .compare_exchange(ptr::null_mut(), fresh, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            // Another thread installed the chunk first.
            unsafe {
                drop(Box::from_raw(ptr::slice_from_raw_parts_mut(fresh, len)));
            }
        }
    }

    unsafe fn slot(&self, index: u32) -> *const Slot<T> {
        let (chunk, offset) = locate(index);
        let base = self.chunks[chunk].load(Ordering::Acquire);
        debug_assert!(!base.is_null());
        base.add(offset)
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for Arena<T> {
    fn drop(&mut self) {
        // Live values must already have been freed by the owning container;
        // only the chunk storage remains.
        for (chunk, slot_ptr) in self.chunks.iter().enumerate() {
            let base = slot_ptr.load(Ordering::Relaxed);
            if !base.is_null() {
                unsafe {
                    drop(Box::from_raw(ptr::slice_from_raw_parts_mut(
                        base,
                        chunk_len(chunk),
                    )));
                }
            }
        }
    }
}

fn chunk_len(chunk: usize) -> usize {
    1 << (CHUNK0_BITS as usize + chunk)
}

/// Map a slot index to its `(chunk, offset)` position.
fn locate(index: u32) -> (usize, usize) {
    let shifted = u64::from(index) + (1 << CHUNK0_BITS);
    let top = 63 - shifted.leading_zeros();
    let chunk = (top - CHUNK0_BITS) as usize;
    let offset = (shifted - (1 << top)) as usize;
    (chunk, offset)
}

#[cfg(test)]
mod tests {
    use super::{locate, Arena, CHUNK0_BITS};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn locate_maps_chunk_boundaries() {
        assert_eq!(locate(0), (0, 0));
        assert_eq!(locate(63), (0, 63));
        assert_eq!(locate(64), (1, 0));
        assert_eq!(locate(191), (1, 127));
        assert_eq!(locate(192), (2, 0));
    }

    #[test]
    fn alloc_get_free_roundtrip() {
        let arena: Arena<String> = Arena::new();
        let a = arena.alloc("first".to_owned());
        let b = arena.alloc("second".to_owned());
        unsafe {
            assert_eq!(arena.get(a), "first");
            assert_eq!(arena.get(b), "second");
            arena.free(a);
            arena.free(b);
        }
    }

    #[test]
    fn freed_slots_are_recycled() {
        let arena: Arena<u32> = Arena::new();
        let first = arena.alloc(1);
        unsafe { arena.free(first) };
        let second = arena.alloc(2);
        assert_eq!(first, second);
        assert_eq!(unsafe { *arena.get(second) }, 2);
        unsafe { arena.free(second) };
    }

    #[test]
    fn grows_past_the_first_chunk() {
        let arena: Arena<usize> = Arena::new();
        let handles: Vec<_> = (0..(1usize << CHUNK0_BITS) * 3)
            .map(|n| arena.alloc(n))
            .collect();
        for (n, handle) in handles.iter().enumerate() {
            assert_eq!(unsafe { *arena.get(*handle) }, n);
        }
        for handle in handles {
            unsafe { arena.free(handle) };
        }
    }

    struct CountsDrops(Arc<AtomicUsize>);

    impl Drop for CountsDrops {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn free_drops_the_value_exactly_once() {
        let drops = Arc::new(AtomicUsize::new(0));
        let arena: Arena<CountsDrops> = Arena::new();
        let handle = arena.alloc(CountsDrops(drops.clone()));
        unsafe { arena.free(handle) };
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        drop(arena);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn concurrent_alloc_free_keeps_slots_distinct() {
        let arena: Arc<Arena<u64>> = Arc::new(Arena::new());
        let mut workers = Vec::new();
        for t in 0..8u64 {
            let arena = arena.clone();
            workers.push(thread::spawn(move || {
                for n in 0..2000u64 {
                    let tagged = (t << 32) | n;
                    let handle = arena.alloc(tagged);
                    assert_eq!(unsafe { *arena.get(handle) }, tagged);
                    unsafe { arena.free(handle) };
                }
            }));
        }
        for worker in workers {
            worker.join().unwrap();
        }
    }
}
