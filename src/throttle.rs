//! Bounded, order-preserving task execution.
//!
//! Every I/O-heavy part of the engine funnels its parallel work through a
//! [`Throttle`]: at most `limit` futures are in flight at once, results come
//! back aligned with input order no matter how completions interleave, and
//! an empty task list completes immediately. The bound exists to cap
//! simultaneously outstanding I/O (file descriptors), not to provide mutual
//! exclusion. Tasks carry their own failures in their output type; there is
//! no separate failure channel and no cancellation.

use std::future::Future;

use futures_util::stream::{self, StreamExt};

/// Default in-flight bound, matching the engine's read concurrency.
pub const DEFAULT_LIMIT: usize = 10;

/// Runs batches of futures with a fixed in-flight bound.
#[derive(Debug, Clone, Copy)]
pub struct Throttle {
    limit: usize,
}

impl Throttle {
    /// A throttle allowing up to `limit` tasks in flight (minimum 1).
    pub fn new(limit: usize) -> Self {
        Throttle {
            limit: limit.max(1),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Drive all `tasks`, at most `limit` concurrently, and return their
    /// results in input order.
    pub async fn run<T, F>(&self, tasks: Vec<F>) -> Vec<T>
    where
        F: Future<Output = T>,
    {
        if tasks.is_empty() {
            return Vec::new();
        }
        stream::iter(tasks).buffered(self.limit).collect().await
    }
}

impl Default for Throttle {
    fn default() -> Self {
        Throttle::new(DEFAULT_LIMIT)
    }
}
