//! A lock-free multi-producer/multi-consumer queue.
//!
//! The shape is the classic two-pointer linked queue of [Simple, Fast, and
//! Practical Non-Blocking and Blocking Concurrent Queue
//! Algorithms](https://dl.acm.org/citation.cfm?id=248106), with reclamation by
//! reference counting instead of a thread registry: `head` and `tail` are each
//! a counted pointer, and every node tracks both the claims threads have
//! withdrawn and how many of the two shared pointers may still reach it.

use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};

use crate::memory::{Arena, CountedPtr, Handle, NodeCount};

struct Node<T> {
    /// The payload, installed by the first producer to claim this tail slot
    /// and handed out exactly once by exchange-to-null.
    data: AtomicPtr<T>,
    /// Packed [`NodeCount`].
    count: AtomicU64,
    /// Counted pointer to the successor, linked by CAS from null.
    next: AtomicU64,
}

impl<T> Node<T> {
    fn empty() -> Self {
        Node {
            data: AtomicPtr::default(),
            count: AtomicU64::new(NodeCount::fresh().bits()),
            next: AtomicU64::new(CountedPtr::null().bits()),
        }
    }
}

/// A lock-free FIFO queue for any number of producers and consumers.
///
/// Producers race to fill the current tail node's payload slot; the loser
/// helps link the successor node, so a stalled winner never holds anyone
/// hostage. A node is freed exactly once, when its claim ledger balances and
/// neither `head` nor `tail` can reach it any more; the dual slot counter is
/// what keeps a node alive while it is mid-transition from tail to interior.
///
/// # Examples
/// ```
/// use lockless::structures::Queue;
///
/// let queue: Queue<String> = Queue::new();
/// queue.push("hello".to_owned());
/// assert_eq!(queue.pop(), Some("hello".to_owned()));
/// assert_eq!(queue.pop(), None);
/// ```
pub struct Queue<T: Send> {
    head: AtomicU64,
    tail: AtomicU64,
    arena: Arena<Node<T>>,
}

unsafe impl<T: Send> Send for Queue<T> {}
unsafe impl<T: Send> Sync for Queue<T> {}

impl<T: Send> Queue<T> {
    pub fn new() -> Self {
        let arena = Arena::new();
        let dummy = CountedPtr::new(arena.alloc(Node::empty()), 1);
        Queue {
            head: AtomicU64::new(dummy.bits()),
            tail: AtomicU64::new(dummy.bits()),
            arena,
        }
    }

    /// Append a value to the back of the queue. Never blocks.
    pub fn push(&self, value: T) {
        let data = Box::into_raw(Box::new(value));
        let mut spare = self.arena.alloc(Node::empty());
        let mut old_tail = CountedPtr::from_bits(self.tail.load(Ordering::Relaxed));
        loop {
            Self::claim(&self.tail, &mut old_tail);
            let tail_handle = old_tail.handle_unchecked();
            let node = unsafe { self.arena.get(tail_handle) };

            if node
                .data
                .compare_exchange(ptr::null_mut(), data, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                // This tail slot is ours; link a successor, adopting the one a
                // helper may already have linked.
                let mut link = CountedPtr::new(spare, 1);
                if let Err(found) = node.next.compare_exchange(
                    CountedPtr::null().bits(),
                    link.bits(),
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                ) {
                    unsafe { self.arena.free(spare) };
                    link = CountedPtr::from_bits(found);
                }
                self.swing_tail(&mut old_tail, link);
                return;
            }

            // Another producer filled this tail first: help link its
            // successor and advance the tail before retrying.
            let link = CountedPtr::new(spare, 1);
            let next = match node.next.compare_exchange(
                CountedPtr::null().bits(),
                link.bits(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    spare = self.arena.alloc(Node::empty());
                    link
                }
                Err(found) => CountedPtr::from_bits(found),
            };
            self.swing_tail(&mut old_tail, next);
        }
    }

    /// Take the value at the front of the queue, or `None` when it is empty.
    /// Never blocks.
    pub fn pop(&self) -> Option<T> {
        let mut old_head = CountedPtr::from_bits(self.head.load(Ordering::Relaxed));
        loop {
            Self::claim(&self.head, &mut old_head);
            let handle = old_head.handle_unchecked();
            let node = unsafe { self.arena.get(handle) };

            let tail = CountedPtr::from_bits(self.tail.load(Ordering::SeqCst));
            if tail.handle() == Some(handle) {
                // Empty; withdraw the claim registered just above.
                self.release_claim(handle);
                return None;
            }

            let next = node.next.load(Ordering::SeqCst);
            match self
                .head
                .compare_exchange(old_head.bits(), next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => {
                    let data = node.data.swap(ptr::null_mut(), Ordering::SeqCst);
                    self.release_slot(old_head);
                    debug_assert!(!data.is_null());
                    return Some(unsafe { *Box::from_raw(data) });
                }
                Err(current) => {
                    self.release_claim(handle);
                    old_head = CountedPtr::from_bits(current);
                }
            }
        }
    }

    /// Bump the external count of the counted pointer in `slot`. The CAS
    /// revalidates the pointer half, so on return `old` is a registered
    /// reference to a node that cannot be freed under this thread.
    fn claim(slot: &AtomicU64, old: &mut CountedPtr) {
        loop {
            let bumped = old.bumped();
            match slot.compare_exchange_weak(
                old.bits(),
                bumped.bits(),
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    *old = bumped;
                    return;
                }
                Err(current) => *old = CountedPtr::from_bits(current),
            }
        }
    }

    /// Withdraw this thread's claim on `handle`, freeing the node if that was
    /// the last reference of any kind.
    fn release_claim(&self, handle: Handle) {
        let node = unsafe { self.arena.get(handle) };
        let mut current = node.count.load(Ordering::Relaxed);
        loop {
            let released = NodeCount::from_bits(current).release_internal();
            match node.count.compare_exchange_weak(
                current,
                released.bits(),
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    if released.is_unreferenced() {
                        unsafe { self.arena.free(handle) };
                    }
                    return;
                }
                Err(found) => current = found,
            }
        }
    }

    /// Retire a counted pointer displaced from `head` or `tail`, folding its
    /// accumulated external count into the node's claim ledger.
    fn release_slot(&self, old: CountedPtr) {
        let handle = old.handle_unchecked();
        let node = unsafe { self.arena.get(handle) };
        let mut current = node.count.load(Ordering::Relaxed);
        loop {
            let released = NodeCount::from_bits(current).release_slot(old.count());
            match node.count.compare_exchange_weak(
                current,
                released.bits(),
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    if released.is_unreferenced() {
                        unsafe { self.arena.free(handle) };
                    }
                    return;
                }
                Err(found) => current = found,
            }
        }
    }

    /// Advance the shared tail from `old_tail` to `new_tail`. Retries only
    /// while the pointer half is unchanged (other claimants bumping the count
    /// are not a conflict); whoever actually swings it releases the displaced
    /// slot reference, everyone else releases their single claim.
    fn swing_tail(&self, old_tail: &mut CountedPtr, new_tail: CountedPtr) {
        let current = old_tail.handle_unchecked();
        loop {
            match self.tail.compare_exchange_weak(
                old_tail.bits(),
                new_tail.bits(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    self.release_slot(*old_tail);
                    return;
                }
                Err(found) => {
                    let found = CountedPtr::from_bits(found);
                    if found.handle() != Some(current) {
                        self.release_claim(current);
                        return;
                    }
                    *old_tail = found;
                }
            }
        }
    }
}

impl<T: Send> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send> Drop for Queue<T> {
    fn drop(&mut self) {
        let mut current = CountedPtr::from_bits(*self.head.get_mut());
        while let Some(handle) = current.handle() {
            let node = unsafe { self.arena.get(handle) };
            let next = CountedPtr::from_bits(node.next.load(Ordering::Relaxed));
            let data = node.data.load(Ordering::Relaxed);
            if !data.is_null() {
                unsafe { drop(Box::from_raw(data)) };
            }
            unsafe { self.arena.free(handle) };
            current = next;
        }
    }
}
