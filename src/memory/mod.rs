//! Lock-free memory management.
//!
//! The types in this module let lock-free data structures decide when a node
//! is safe to free without ever blocking: a fixed-capacity [`HazardRegistry`]
//! through which threads publish the address they are about to dereference,
//! a [`RetireList`] for nodes that were unlinked while still protected, an
//! index-addressed [`Arena`] that gives nodes stable `u32` handles, and the
//! packed counter words ([`CountedPtr`], [`NodeCount`]) used by the
//! split-reference-counting containers. Together they prevent both
//! use-after-free and the [ABA problem](https://en.wikipedia.org/wiki/ABA_problem).

pub use self::arena::{Arena, Handle};
pub use self::counted::{CountedPtr, NodeCount};
pub use self::hazard::{HazardGuard, HazardRegistry, RegistryError, RetireList, DEFAULT_SLOTS};

pub mod arena;
pub mod counted;
pub mod hazard;
