use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::warn;

use crate::config::PoolConfig;
use crate::pool::Outstanding;
use crate::thread_pool::ThreadPool;
use crate::{PoolError, Result};

pub struct RayonThreadPool {
    pool: rayon::ThreadPool,
    closing: AtomicBool,
    outstanding: Arc<Outstanding>,
}

/// Marks a job finished even if it unwinds.
struct Done(Arc<Outstanding>);

impl Drop for Done {
    fn drop(&mut self) {
        self.0.done();
    }
}

impl RayonThreadPool {
    /// Builds the pool from the size and thread name of `config`. Rayon
    /// keeps its own unbounded queue, so the capacities are not used.
    pub fn with_config(config: &PoolConfig) -> Result<Self> {
        if config.size == 0 {
            return Err(PoolError::InvalidSize(0));
        }
        let name = config.thread_name.clone();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.size)
            .thread_name(move |i| format!("{}-{}", name, i + 1))
            // Without a handler rayon aborts the process on a panicking job.
            .panic_handler(|payload| {
                let msg = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_default();
                warn!("job panicked: {}", msg);
            })
            .build()
            .map_err(|e| PoolError::Message(e.to_string()))?;
        Ok(RayonThreadPool {
            pool,
            closing: AtomicBool::new(false),
            outstanding: Arc::new(Outstanding::default()),
        })
    }
}

impl ThreadPool for RayonThreadPool {
    fn new(threads: u32) -> Result<Self> {
        Self::with_config(&PoolConfig {
            thread_name: "rayon".into(),
            ..PoolConfig::new(threads as usize)
        })
    }

    fn spawn<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.outstanding.begin();
        let done = Done(self.outstanding.clone());
        if self.closing.load(Ordering::SeqCst) {
            return Err(PoolError::Closed);
        }
        self.pool.spawn(move || {
            let _done = done;
            job();
        });
        Ok(())
    }

    fn shutdown(&self) -> Result<()> {
        if self.pool.current_thread_index().is_some() {
            return Err(PoolError::ShutdownFromWorker);
        }
        if !self.closing.swap(true, Ordering::SeqCst) {
            self.outstanding.wait_idle();
        }
        Ok(())
    }
}
