//! Hazard pointers: per-thread published protection for lock-free reads.
//!
//! A thread about to dereference a node it does not own publishes the node's
//! address in its [`HazardRegistry`] slot. A thread about to free a node first
//! scans every slot; while any slot still holds the address, the node goes to
//! a [`RetireList`] instead and is reclaimed by a later sweep. The registry is
//! an explicit, caller-constructed object shared by `Arc`, never a hidden
//! process-wide table.

use std::error::Error;
use std::fmt;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use log::{debug, trace};

/// Default slot capacity; sized for the maximum number of threads expected to
/// pop concurrently.
pub const DEFAULT_SLOTS: usize = 100;

/// Registration failed because every slot is owned.
///
/// This is a configuration error: the registry must be sized to the maximum
/// concurrent thread count up front, and callers are expected to treat it as
/// fatal rather than retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    ResourceExhausted,
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RegistryError::ResourceExhausted => {
                write!(f, "hazard pointer registry has no free slots")
            }
        }
    }
}

impl Error for RegistryError {}

struct HazardSlot {
    /// 0 when free, otherwise the claiming guard's token.
    owner: AtomicU64,
    /// 0 when nothing is protected, otherwise a node address.
    protected: AtomicUsize,
}

/// A fixed-capacity table of `(owner, protected address)` pairs.
pub struct HazardRegistry {
    slots: Box<[HazardSlot]>,
    next_token: AtomicU64,
}

impl HazardRegistry {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SLOTS)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.extend((0..capacity).map(|_| HazardSlot {
            owner: AtomicU64::new(0),
            protected: AtomicUsize::new(0),
        }));
        HazardRegistry {
            slots: slots.into_boxed_slice(),
            next_token: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Claim a free slot for the calling thread.
    ///
    /// Slot ownership is first-come-first-served via CAS on the owner field.
    pub fn acquire(registry: &Arc<Self>) -> Result<HazardGuard, RegistryError> {
        let token = registry.next_token.fetch_add(1, Ordering::Relaxed) + 1;
        for (index, slot) in registry.slots.iter().enumerate() {
            if slot.owner.load(Ordering::Relaxed) == 0
                && slot
                    .owner
                    .compare_exchange(0, token, Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
            {
                debug!("hazard slot {} claimed by token {}", index, token);
                return Ok(HazardGuard {
                    registry: Arc::clone(registry),
                    index,
                });
            }
        }
        Err(RegistryError::ResourceExhausted)
    }

    /// Whether any slot currently protects `address`.
    ///
    /// O(capacity) scan. The SeqCst loads pair with the SeqCst publication in
    /// [`HazardGuard::protect`]: a protection published before the scan is
    /// never missed.
    pub fn is_protected(&self, address: usize) -> bool {
        debug_assert!(address != 0);
        self.slots
            .iter()
            .any(|slot| slot.protected.load(Ordering::SeqCst) == address)
    }
}

impl Default for HazardRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII claim on one registry slot.
///
/// While the guard holds an address via [`protect`](HazardGuard::protect), no
/// sweep will free the node at that address. Dropping the guard clears the
/// slot and returns it to the registry.
pub struct HazardGuard {
    registry: Arc<HazardRegistry>,
    index: usize,
}

impl std::fmt::Debug for HazardGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HazardGuard")
            .field("index", &self.index)
            .finish()
    }
}

impl HazardGuard {
    /// Publish `node` as this thread's protected address.
    pub fn protect<N>(&self, node: *mut N) {
        self.slot().protected.store(node as usize, Ordering::SeqCst);
    }

    /// Withdraw the published protection.
    pub fn clear(&self) {
        self.slot().protected.store(0, Ordering::SeqCst);
    }

    fn slot(&self) -> &HazardSlot {
        &self.registry.slots[self.index]
    }
}

impl Drop for HazardGuard {
    fn drop(&mut self) {
        let slot = self.slot();
        slot.protected.store(0, Ordering::SeqCst);
        slot.owner.store(0, Ordering::Release);
    }
}

struct Retired<N> {
    node: *mut N,
    next: AtomicPtr<Retired<N>>,
}

/// An unbounded lock-free list of nodes awaiting reclamation.
///
/// Entries keep their concrete node type, so deletion is a plain typed
/// `Box::from_raw` rather than an erased deleter.
pub struct RetireList<N> {
    head: AtomicPtr<Retired<N>>,
}

unsafe impl<N: Send> Send for RetireList<N> {}
unsafe impl<N: Send> Sync for RetireList<N> {}

impl<N> RetireList<N> {
    pub fn new() -> Self {
        RetireList {
            head: AtomicPtr::default(),
        }
    }

    /// Hand `node` over for deferred deletion.
    ///
    /// # Safety
    /// `node` must have come from `Box::into_raw`, and the caller must not
    /// touch it again: the list now owns it and will free it once no hazard
    /// slot protects its address.
    pub unsafe fn retire(&self, node: *mut N) {
        self.push(Box::into_raw(Box::new(Retired {
            node,
            next: AtomicPtr::default(),
        })));
    }

    fn push(&self, entry: *mut Retired<N>) {
        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            unsafe {
                (*entry).next.store(head, Ordering::Relaxed);
            }
            match self
                .head
                .compare_exchange_weak(head, entry, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(current) => head = current,
            }
        }
    }

    /// Detach the whole list and free every entry no longer protected;
    /// entries still protected are re-retired for a later sweep.
    pub fn sweep(&self, registry: &HazardRegistry) {
        let mut current = self.head.swap(ptr::null_mut(), Ordering::AcqRel);
        if current.is_null() {
            return;
        }
        let mut freed = 0usize;
        let mut kept = 0usize;
        while !current.is_null() {
            let next = unsafe { (*current).next.load(Ordering::Relaxed) };
            let node = unsafe { (*current).node };
            if registry.is_protected(node as usize) {
                self.push(current);
                kept += 1;
            } else {
                unsafe {
                    drop(Box::from_raw(node));
                    drop(Box::from_raw(current));
                }
                freed += 1;
            }
            current = next;
        }
        trace!("retire sweep freed {} nodes, kept {}", freed, kept);
    }
}

impl<N> Default for RetireList<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N> Drop for RetireList<N> {
    fn drop(&mut self) {
        // No readers remain once the owning structure is being dropped.
        let mut current = *self.head.get_mut();
        while !current.is_null() {
            unsafe {
                let next = *(*current).next.get_mut();
                drop(Box::from_raw((*current).node));
                drop(Box::from_raw(current));
                current = next;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{HazardRegistry, RegistryError, RetireList};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn acquire_up_to_capacity_then_exhausted() {
        let registry = Arc::new(HazardRegistry::with_capacity(3));
        let guards: Vec<_> = (0..3).map(|_| HazardRegistry::acquire(&registry).unwrap()).collect();
        assert_eq!(
            HazardRegistry::acquire(&registry).unwrap_err(),
            RegistryError::ResourceExhausted
        );
        drop(guards);
        assert!(HazardRegistry::acquire(&registry).is_ok());
    }

    #[test]
    fn protection_is_visible_until_cleared() {
        let registry = Arc::new(HazardRegistry::with_capacity(2));
        let guard = HazardRegistry::acquire(&registry).unwrap();
        let node = Box::into_raw(Box::new(17u32));

        guard.protect(node);
        assert!(registry.is_protected(node as usize));
        guard.clear();
        assert!(!registry.is_protected(node as usize));

        unsafe { drop(Box::from_raw(node)) };
    }

    #[test]
    fn dropping_a_guard_releases_its_protection() {
        let registry = Arc::new(HazardRegistry::with_capacity(1));
        let node = Box::into_raw(Box::new(5u8));
        {
            let guard = HazardRegistry::acquire(&registry).unwrap();
            guard.protect(node);
            assert!(registry.is_protected(node as usize));
        }
        assert!(!registry.is_protected(node as usize));
        unsafe { drop(Box::from_raw(node)) };
    }

    struct CountsDrops(Arc<AtomicUsize>);

    impl Drop for CountsDrops {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn sweep_frees_only_unprotected_nodes() {
        let registry = Arc::new(HazardRegistry::with_capacity(2));
        let guard = HazardRegistry::acquire(&registry).unwrap();
        let drops = Arc::new(AtomicUsize::new(0));
        let list: RetireList<CountsDrops> = RetireList::new();

        let protected = Box::into_raw(Box::new(CountsDrops(drops.clone())));
        let unprotected = Box::into_raw(Box::new(CountsDrops(drops.clone())));
        guard.protect(protected);
        unsafe {
            list.retire(protected);
            list.retire(unprotected);
        }

        list.sweep(&registry);
        assert_eq!(drops.load(Ordering::SeqCst), 1);

        guard.clear();
        list.sweep(&registry);
        assert_eq!(drops.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn dropping_the_list_frees_pending_nodes() {
        let drops = Arc::new(AtomicUsize::new(0));
        {
            let list: RetireList<CountsDrops> = RetireList::new();
            unsafe {
                list.retire(Box::into_raw(Box::new(CountsDrops(drops.clone()))));
                list.retire(Box::into_raw(Box::new(CountsDrops(drops.clone()))));
            }
        }
        assert_eq!(drops.load(Ordering::SeqCst), 2);
    }
}
