use crate::config::PoolConfig;
use crate::pool::WorkerPool;
use crate::thread_pool::ThreadPool;
use crate::Result;

/// Fixed set of threads pulling jobs from one bounded queue.
pub struct SharedQueueThreadPool {
    pool: WorkerPool<()>,
}

impl SharedQueueThreadPool {
    /// Builds the pool from `config`, ignoring its result settings since
    /// jobs here produce none.
    pub fn with_config(config: PoolConfig) -> Result<Self> {
        let config = PoolConfig {
            collect_results: false,
            ..config
        };
        Ok(SharedQueueThreadPool {
            pool: WorkerPool::with_config(config)?,
        })
    }
}

impl ThreadPool for SharedQueueThreadPool {
    fn new(threads: u32) -> Result<Self> {
        Self::with_config(PoolConfig {
            thread_name: "shared-queue".into(),
            ..PoolConfig::new(threads as usize)
        })
    }

    fn spawn<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.pool.submit(move |_| {
            job();
            Ok(())
        })?;
        Ok(())
    }

    fn shutdown(&self) -> Result<()> {
        self.pool.shutdown()
    }
}
