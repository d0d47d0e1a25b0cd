//! A lock-free stack reclaimed by split reference counting.
//!
//! Each published head pointer carries an external count of the references
//! handed out through it, and each node carries an internal counter of the
//! claims that have been withdrawn. Whichever thread's release brings the two
//! into balance frees the node, so no registry of threads is needed at all.

use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::sync::atomic::{fence, AtomicI64, AtomicU64, Ordering};

use crate::memory::{Arena, CountedPtr};

/// The memory orderings used at each atomic site of [`CountedStack`].
///
/// The algorithm is identical under every profile; only the strictness of the
/// orderings differs.
pub trait OrderingProfile {
    /// Loads of the head that carry no synchronization duty of their own.
    const UNSYNCED_LOAD: Ordering;
    /// Publishing CAS of `push`.
    const PUBLISH: Ordering;
    const PUBLISH_FAIL: Ordering;
    /// External-count bump of `pop`.
    const CLAIM: Ordering;
    const CLAIM_FAIL: Ordering;
    /// Head-to-next swing of `pop`.
    const SWING: Ordering;
    const SWING_FAIL: Ordering;
    /// The winner's internal-counter credit.
    const SETTLE: Ordering;
    /// A loser's internal-counter release.
    const ABANDON: Ordering;
}

/// Sequentially consistent at every site. The default.
pub struct Strict;

impl OrderingProfile for Strict {
    const UNSYNCED_LOAD: Ordering = Ordering::SeqCst;
    const PUBLISH: Ordering = Ordering::SeqCst;
    const PUBLISH_FAIL: Ordering = Ordering::SeqCst;
    const CLAIM: Ordering = Ordering::SeqCst;
    const CLAIM_FAIL: Ordering = Ordering::SeqCst;
    const SWING: Ordering = Ordering::SeqCst;
    const SWING_FAIL: Ordering = Ordering::SeqCst;
    const SETTLE: Ordering = Ordering::SeqCst;
    const ABANDON: Ordering = Ordering::SeqCst;
}

/// The minimal orderings: release on publish and settle, acquire on claim,
/// relaxed elsewhere. Deletion is still preceded by an acquire fence.
pub struct Optimized;

impl OrderingProfile for Optimized {
    const UNSYNCED_LOAD: Ordering = Ordering::Relaxed;
    const PUBLISH: Ordering = Ordering::Release;
    const PUBLISH_FAIL: Ordering = Ordering::Relaxed;
    const CLAIM: Ordering = Ordering::Acquire;
    const CLAIM_FAIL: Ordering = Ordering::Relaxed;
    const SWING: Ordering = Ordering::Relaxed;
    const SWING_FAIL: Ordering = Ordering::Relaxed;
    const SETTLE: Ordering = Ordering::Release;
    const ABANDON: Ordering = Ordering::Relaxed;
}

struct Node<T> {
    data: UnsafeCell<Option<T>>,
    /// Withdrawn-claim ledger; the node dies when this settles back to zero.
    internal: AtomicI64,
    /// Counted pointer to the next node, written before the node is published.
    next: AtomicU64,
}

/// A lock-free LIFO stack using split reference counting for reclamation.
///
/// Every thread that examines the head node registers itself by CAS-bumping
/// the external count stored alongside the pointer, and withdraws the claim
/// through the node's internal counter. The node is freed exactly once, by
/// whichever thread's withdrawal is the last, regardless of interleaving.
///
/// # Examples
/// ```
/// use lockless::structures::CountedStack;
///
/// let stack: CountedStack<u32> = CountedStack::new();
/// stack.push(4);
/// stack.push(7);
/// assert_eq!(stack.pop(), Some(7));
/// assert_eq!(stack.pop(), Some(4));
/// assert_eq!(stack.pop(), None);
/// ```
pub struct CountedStack<T: Send, P: OrderingProfile = Strict> {
    head: AtomicU64,
    arena: Arena<Node<T>>,
    _ordering: PhantomData<P>,
}

unsafe impl<T: Send, P: OrderingProfile> Send for CountedStack<T, P> {}
unsafe impl<T: Send, P: OrderingProfile> Sync for CountedStack<T, P> {}

impl<T: Send, P: OrderingProfile> CountedStack<T, P> {
    pub fn new() -> Self {
        CountedStack {
            head: AtomicU64::new(CountedPtr::null().bits()),
            arena: Arena::new(),
            _ordering: PhantomData,
        }
    }

    /// Push a value onto the stack. Never blocks.
    pub fn push(&self, value: T) {
        let handle = self.arena.alloc(Node {
            data: UnsafeCell::new(Some(value)),
            internal: AtomicI64::new(0),
            next: AtomicU64::new(CountedPtr::null().bits()),
        });
        let node = unsafe { self.arena.get(handle) };
        let published = CountedPtr::new(handle, 1);
        let mut head = self.head.load(P::UNSYNCED_LOAD);
        loop {
            node.next.store(head, Ordering::Relaxed);
            match self
                .head
                .compare_exchange_weak(head, published.bits(), P::PUBLISH, P::PUBLISH_FAIL)
            {
                Ok(_) => return,
                Err(current) => head = current,
            }
        }
    }

    /// Pop the most recently pushed value, or `None` when the stack is empty.
    /// Never blocks.
    pub fn pop(&self) -> Option<T> {
        let mut head = CountedPtr::from_bits(self.head.load(P::UNSYNCED_LOAD));
        loop {
            head = self.claim(head);
            let handle = match head.handle() {
                Some(handle) => handle,
                None => return None,
            };
            let node = unsafe { self.arena.get(handle) };
            let next = node.next.load(Ordering::Relaxed);
            match self
                .head
                .compare_exchange(head.bits(), next, P::SWING, P::SWING_FAIL)
            {
                Ok(_) => {
                    // The node is unlinked; the payload escapes even though the
                    // node itself may outlive this call under other claims.
                    let value = unsafe { (*node.data.get()).take() };
                    let credit = i64::from(head.count()) - 2;
                    if node.internal.fetch_add(credit, P::SETTLE) == -credit {
                        fence(Ordering::Acquire);
                        unsafe { self.arena.free(handle) };
                    }
                    return value;
                }
                Err(current) => {
                    if node.internal.fetch_sub(1, P::ABANDON) == 1 {
                        fence(Ordering::Acquire);
                        unsafe { self.arena.free(handle) };
                    }
                    head = CountedPtr::from_bits(current);
                }
            }
        }
    }

    /// Register this thread's interest in the head node by bumping the
    /// external count in place. The CAS revalidates the pointer half at the
    /// same time, so the returned copy is a witness that the node was still
    /// the head after the claim existed.
    fn claim(&self, mut head: CountedPtr) -> CountedPtr {
        loop {
            let bumped = head.bumped();
            match self
                .head
                .compare_exchange_weak(head.bits(), bumped.bits(), P::CLAIM, P::CLAIM_FAIL)
            {
                Ok(_) => return bumped,
                Err(current) => head = CountedPtr::from_bits(current),
            }
        }
    }
}

impl<T: Send, P: OrderingProfile> Default for CountedStack<T, P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send, P: OrderingProfile> Drop for CountedStack<T, P> {
    fn drop(&mut self) {
        let mut current = CountedPtr::from_bits(*self.head.get_mut());
        while let Some(handle) = current.handle() {
            let next = unsafe { self.arena.get(handle).next.load(Ordering::Relaxed) };
            unsafe { self.arena.free(handle) };
            current = CountedPtr::from_bits(next);
        }
    }
}
