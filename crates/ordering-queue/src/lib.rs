//! Ordering queue for incoming actions.
//!
//! Actions are routed to named lanes by type or channel prefix. Within a
//! lane, pairs are authorized and processed strictly in enqueue order;
//! different lanes never wait for each other.
//!
//! Processing one pair runs the resolved hooks (`access`, `resend`,
//! `process`, `finally`), commits approved actions to the log and answers
//! refusals and failures with undo records addressed to the author.
//! `finally` runs for every resolved pair, even when a step panics. A pair
//! whose id is already in flight on another lane is skipped.

mod error;
mod queue;

pub use error::{QueueError, QueueResult};
pub use queue::{OrderingQueue, QueueConfig, MAIN_LANE};
