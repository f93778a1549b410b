//! A bounded worker pool with graceful shutdown.
//!
//! [`WorkerPool`] runs submitted closures on a fixed (or resizable) set of
//! worker threads and reports one [`TaskResult`] per task. The
//! [`thread_pool`] module offers fire-and-forget pools behind the
//! [`thread_pool::ThreadPool`] trait.
//!
//! ```rust
//! use workpool::WorkerPool;
//!
//! let pool = WorkerPool::new(3)?;
//! let results = pool.results();
//! let consumer = std::thread::spawn(move || results.map(|r| r.outcome.unwrap()).sum::<u64>());
//! for n in 0..10u64 {
//!     pool.submit(move |_| Ok(n * n))?;
//! }
//! pool.shutdown()?;
//! assert_eq!(consumer.join().unwrap(), 285);
//! # Ok::<(), workpool::PoolError>(())
//! ```

mod config;
mod error;
mod pool;
pub mod thread_pool;

pub use config::{AutoscaleConfig, PoolConfig};
pub use error::{PoolError, Result};
pub use pool::{
    Job, ResizePolicy, Results, TaskError, TaskId, TaskResult, Utilization, WorkerId, WorkerPool,
};
