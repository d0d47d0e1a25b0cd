//! A lock-free stack reclaimed with hazard pointers.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;
use thread_local::ThreadLocal;

use crate::memory::{HazardGuard, HazardRegistry, RegistryError, RetireList};

struct Node<T> {
    data: UnsafeCell<Option<T>>,
    next: AtomicPtr<Node<T>>,
}

/// A lock-free LIFO stack that defers node reclamation through a
/// [`HazardRegistry`].
///
/// Before dereferencing the head, a popping thread publishes the head's
/// address in its registry slot and re-reads the head until the two agree;
/// a node whose address sits in any slot is never freed. This keeps `push`
/// free of any counting at the cost of an O(registry capacity) scan on the
/// reclamation path.
///
/// Threads that pop must hold a registry slot. [`register_current_thread`]
/// acquires one fallibly up front; `pop` acquires one lazily and treats an
/// exhausted registry as a fatal configuration error.
///
/// [`register_current_thread`]: HazardStack::register_current_thread
///
/// # Examples
/// ```
/// use lockless::structures::HazardStack;
///
/// let stack: HazardStack<String> = HazardStack::new();
/// stack.push("hello".to_owned());
/// assert_eq!(stack.pop(), Some("hello".to_owned()));
/// assert_eq!(stack.pop(), None);
/// ```
pub struct HazardStack<T: Send> {
    head: AtomicPtr<Node<T>>,
    registry: Arc<HazardRegistry>,
    guards: ThreadLocal<HazardGuard>,
    retired: RetireList<Node<T>>,
}

impl<T: Send> HazardStack<T> {
    /// Create a stack with a private registry of
    /// [`DEFAULT_SLOTS`](crate::memory::DEFAULT_SLOTS) slots.
    pub fn new() -> Self {
        Self::with_registry(Arc::new(HazardRegistry::new()))
    }

    /// Create a stack protected by `registry`, which may be shared with other
    /// structures. One slot per popping thread per structure is claimed.
    pub fn with_registry(registry: Arc<HazardRegistry>) -> Self {
        HazardStack {
            head: AtomicPtr::default(),
            registry,
            guards: ThreadLocal::new(),
            retired: RetireList::new(),
        }
    }

    /// Claim this thread's registry slot ahead of its first `pop`.
    ///
    /// Returns [`RegistryError::ResourceExhausted`] when the registry is full;
    /// that is a sizing error to fix at configuration time, not a condition to
    /// retry. The slot is held until the stack is dropped.
    pub fn register_current_thread(&self) -> Result<(), RegistryError> {
        self.guard().map(|_| ())
    }

    /// Push a value onto the stack. Never blocks and needs no registration.
    pub fn push(&self, value: T) {
        let node = Box::into_raw(Box::new(Node {
            data: UnsafeCell::new(Some(value)),
            next: AtomicPtr::default(),
        }));
        let mut head = self.head.load(Ordering::Acquire);
        loop {
            unsafe {
                (*node).next.store(head, Ordering::Relaxed);
            }
            match self
                .head
                .compare_exchange_weak(head, node, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return,
                Err(current) => head = current,
            }
        }
    }

    /// Pop the most recently pushed value, or `None` when the stack is empty.
    /// Never blocks.
    ///
    /// # Panics
    /// Panics if this thread holds no registry slot and none is free; see
    /// [`register_current_thread`](HazardStack::register_current_thread).
    pub fn pop(&self) -> Option<T> {
        let guard = self
            .guard()
            .expect("hazard pointer registry exhausted; register threads up front or raise its capacity");

        let mut head = self.head.load(Ordering::Acquire);
        loop {
            // Publish, then re-read until both agree: once they do, the node
            // cannot have been freed between the read and the publication.
            loop {
                guard.protect(head);
                let current = self.head.load(Ordering::Acquire);
                if current == head {
                    break;
                }
                head = current;
            }
            if head.is_null() {
                guard.clear();
                return None;
            }
            let next = unsafe { (*head).next.load(Ordering::Acquire) };
            match self
                .head
                .compare_exchange(head, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => break,
                Err(current) => head = current,
            }
        }

        guard.clear();
        let value = unsafe { (*(*head).data.get()).take() };
        if self.registry.is_protected(head as usize) {
            unsafe { self.retired.retire(head) };
        } else {
            unsafe { drop(Box::from_raw(head)) };
        }
        self.retired.sweep(&self.registry);
        value
    }

    fn guard(&self) -> Result<&HazardGuard, RegistryError> {
        self.guards
            .get_or_try(|| HazardRegistry::acquire(&self.registry))
    }
}

impl<T: Send> Default for HazardStack<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send> Drop for HazardStack<T> {
    fn drop(&mut self) {
        let mut current = *self.head.get_mut();
        while !current.is_null() {
            unsafe {
                let next = *(*current).next.get_mut();
                drop(Box::from_raw(current));
                current = next;
            }
        }
    }
}
