//! Lock-free data structures.

pub use self::counted_stack::{CountedStack, Optimized, OrderingProfile, Strict};
pub use self::hazard_stack::HazardStack;
pub use self::queue::Queue;
pub use self::spsc::{channel, Consumer, Producer};

mod counted_stack;
mod hazard_stack;
mod queue;
mod spsc;
