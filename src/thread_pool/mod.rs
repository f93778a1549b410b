//! Fire-and-forget thread pools behind a common trait.
//!
//! Jobs spawned here produce no result. A job that panics is logged and the
//! pool keeps its full number of threads.

use crate::Result;

pub trait ThreadPool {
    /// Starts a pool with `threads` threads, failing if `threads` is zero or
    /// a thread cannot be spawned.
    fn new(threads: u32) -> Result<Self>
    where
        Self: Sized;

    /// Hands a job to the pool. Fails with `PoolError::Closed` once
    /// `shutdown` has been called.
    fn spawn<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static;

    /// Stops accepting jobs and waits for the accepted ones to finish.
    fn shutdown(&self) -> Result<()>;
}

mod rayon;
mod shared;

pub use self::rayon::RayonThreadPool;
pub use self::shared::SharedQueueThreadPool;
