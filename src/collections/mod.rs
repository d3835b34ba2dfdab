// src/collections/mod.rs
//! Local in-process collections shared by the router input and every
//! outbound queue.

mod deque;

pub use deque::{Deque, QueueError};
