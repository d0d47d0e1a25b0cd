//! A lock-free queue for exactly one producer and one consumer thread.
//!
//! The chain always ends in a dummy node. The producer writes the value into
//! the current dummy, links a fresh dummy behind it and only then publishes
//! the new tail, so the consumer never observes a half-written node. Because
//! the head is touched by one thread and the tail by the other, a popped node
//! can be deleted on the spot, with no reclamation scheme at all.
//!
//! The one-producer/one-consumer topology is enforced by the type system:
//! [`channel`] returns two endpoints, each `Send` but not clonable, whose
//! operations take `&mut self`.

use std::cell::UnsafeCell;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

struct Node<T> {
    data: UnsafeCell<Option<T>>,
    next: AtomicPtr<Node<T>>,
}

impl<T> Node<T> {
    fn dummy() -> *mut Self {
        Box::into_raw(Box::new(Node {
            data: UnsafeCell::new(None),
            next: AtomicPtr::default(),
        }))
    }
}

struct Shared<T> {
    /// Published tail; written by the producer, read by the consumer.
    tail: AtomicPtr<Node<T>>,
    /// Mirror of the consumer's head so the surviving endpoint can drain.
    head: AtomicPtr<Node<T>>,
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        // Both endpoints are gone; walk the residual chain.
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

/// Create an empty queue and hand back its two endpoints.
///
/// # Examples
/// ```
/// let (mut tx, mut rx) = lockless::structures::channel();
/// tx.push(1);
/// tx.push(2);
/// assert_eq!(rx.pop(), Some(1));
/// assert_eq!(rx.pop(), Some(2));
/// assert_eq!(rx.pop(), None);
/// ```
pub fn channel<T: Send>() -> (Producer<T>, Consumer<T>) {
    let dummy = Node::dummy();
    let shared = Arc::new(Shared {
        tail: AtomicPtr::new(dummy),
        head: AtomicPtr::new(dummy),
    });
    (
        Producer {
            shared: shared.clone(),
            tail: dummy,
        },
        Consumer {
            shared,
            head: dummy,
        },
    )
}

/// The pushing endpoint of an SPSC queue.
pub struct Producer<T: Send> {
    shared: Arc<Shared<T>>,
    /// Cached tail; always equal to the published tail between calls.
    tail: *mut Node<T>,
}

unsafe impl<T: Send> Send for Producer<T> {}

impl<T: Send> Producer<T> {
    /// Append a value. Never blocks, never fails.
    pub fn push(&mut self, value: T) {
        let fresh = Node::dummy();
        unsafe {
            *(*self.tail).data.get() = Some(value);
            (*self.tail).next.store(fresh, Ordering::Release);
        }
        self.shared.tail.store(fresh, Ordering::Release);
        self.tail = fresh;
    }
}

/// The popping endpoint of an SPSC queue.
pub struct Consumer<T: Send> {
    shared: Arc<Shared<T>>,
    head: *mut Node<T>,
}

unsafe impl<T: Send> Send for Consumer<T> {}

impl<T: Send> Consumer<T> {
    /// Take the oldest value, or `None` when the queue is empty. Never
    /// blocks.
    pub fn pop(&mut self) -> Option<T> {
        let head = self.head;
        if ptr::eq(head, self.shared.tail.load(Ordering::Acquire)) {
            return None;
        }
        unsafe {
            let value = (*(*head).data.get()).take();
            let next = (*head).next.load(Ordering::Acquire);
            self.head = next;
            self.shared.head.store(next, Ordering::Relaxed);
            drop(Box::from_raw(head));
            value
        }
    }
}

#[cfg(test)]
mod tests {
    use super::channel;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn pop_on_a_fresh_queue_is_empty() {
        let (_tx, mut rx) = channel::<u8>();
        assert_eq!(rx.pop(), None);
    }

    #[test]
    fn values_come_out_in_push_order() {
        let (mut tx, mut rx) = channel();
        for n in 0..100u32 {
            tx.push(n);
        }
        for n in 0..100u32 {
            assert_eq!(rx.pop(), Some(n));
        }
        assert_eq!(rx.pop(), None);
    }

    #[test]
    fn ordering_holds_across_threads() {
        const COUNT: u64 = 100_000;
        let (mut tx, mut rx) = channel();

        let producer = thread::spawn(move || {
            for n in 1..=COUNT {
                tx.push(n);
            }
        });
        let consumer = thread::spawn(move || {
            let mut expected = 1;
            while expected <= COUNT {
                if let Some(value) = rx.pop() {
                    assert_eq!(value, expected);
                    expected += 1;
                }
            }
            assert_eq!(rx.pop(), None);
        });

        producer.join().unwrap();
        consumer.join().unwrap();
    }

    struct CountsDrops(Arc<AtomicUsize>);

    impl Drop for CountsDrops {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn both_drop_orders_drain_residual_values() {
        let drops = Arc::new(AtomicUsize::new(0));
        {
            let (mut tx, rx) = channel();
            tx.push(CountsDrops(drops.clone()));
            tx.push(CountsDrops(drops.clone()));
            drop(rx);
        }
        assert_eq!(drops.load(Ordering::SeqCst), 2);

        let drops = Arc::new(AtomicUsize::new(0));
        {
            let (mut tx, mut rx) = channel();
            tx.push(CountsDrops(drops.clone()));
            tx.push(CountsDrops(drops.clone()));
            drop(tx);
            drop(rx.pop());
            assert_eq!(drops.load(Ordering::SeqCst), 1);
        }
        assert_eq!(drops.load(Ordering::SeqCst), 2);
    }
}
