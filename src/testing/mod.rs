//! Linearizability testing for lock-free data structures, after the strategy
//! described by Lowe in [Testing for Linearizability](http://www.cs.ox.ac.uk/people/gavin.lowe/LinearizabiltyTesting/paper.pdf):
//! worker threads record the real-time interval and observed result of every
//! operation they run against the live structure, and a search then tries to
//! order all recorded operations into a single sequential history that a
//! reference model agrees with.
//!
//! The reference model is any cheap persistent value (`im::Vector` works
//! well) threaded through plain functions of the shape
//! `fn(&Seq, Option<V>) -> (Seq, Option<V>)`.
//!
//! # Example
//! ```
//! use im::Vector;
//! use lockless::structures::Queue;
//! use lockless::testing::{LinearizabilityResult, LinearizabilityTester, ThreadLog};
//!
//! fn model_push(queue: &Vector<u32>, value: Option<u32>) -> (Vector<u32>, Option<u32>) {
//!     let mut next = queue.clone();
//!     next.push_back(value.unwrap());
//!     (next, None)
//! }
//!
//! fn model_pop(queue: &Vector<u32>, _: Option<u32>) -> (Vector<u32>, Option<u32>) {
//!     let mut next = queue.clone();
//!     let value = next.pop_front();
//!     (next, value)
//! }
//!
//! fn worker(id: usize, log: &mut ThreadLog<Queue<u32>, Vector<u32>, u32>) {
//!     for n in 0..20 {
//!         if n % 3 == 0 {
//!             log.log_val(format!("push {}", n), Queue::push, n as u32, model_push);
//!         } else {
//!             log.log("pop", Queue::pop, model_pop);
//!         }
//!     }
//!     let _ = id;
//! }
//!
//! let mut tester = LinearizabilityTester::new(4, Queue::new(), Vector::new());
//! assert_eq!(tester.run(worker), LinearizabilityResult::Success);
//! ```

pub use self::history::{Operation, SequentialOp};
pub use self::linearizability::{LinearizabilityResult, LinearizabilityTester, ThreadLog};

mod history;
mod linearizability;
