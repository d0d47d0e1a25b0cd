//! Lock-free containers for Rust.
//!
//! This crate provides a family of singly-linked LIFO and FIFO containers that
//! can be shared across any number of producer and consumer threads without
//! mutual-exclusion locks, together with the memory-reclamation machinery that
//! makes freeing their nodes safe: a hazard-pointer registry and a
//! split-reference-counting scheme over an index-addressed node arena.
//!
//! The containers never block. `pop` on an empty container returns `None`
//! immediately; every operation is a bounded sequence of atomic steps plus a
//! `compare_exchange_weak` retry loop whose only source of repetition is
//! contention from other threads making progress.

pub mod memory;
pub mod structures;
pub mod testing;
