//! Bounded worker pool with graceful shutdown.
//!
//! A [`WorkerPool`] starts a fixed number of worker threads that pull tasks
//! from a bounded queue and publish one [`TaskResult`] per task into a
//! bounded result sink. Both channels apply backpressure: [`WorkerPool::submit`]
//! blocks while the queue is full and workers block while the sink is full,
//! so whoever owns the pool has to keep draining [`WorkerPool::results`].
//!
//! Shutdown runs in dependency order:
//!
//! 1. mark the pool closed and release submitters blocked on a full queue
//! 2. close the task queue
//! 3. wait until every accepted task has published its result
//! 4. broadcast stop to the workers and join them
//! 5. drop the last sender of the result sink
//!
//! Capacity can be changed while the pool runs with [`WorkerPool::resize`],
//! or automatically with an autoscale policy. Resizing only spawns or
//! retires idle workers, tasks that are already running are never touched.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::channel::{
    bounded, select, unbounded, Receiver, RecvTimeoutError, Sender, TrySendError,
};
use log::{debug, error, info, warn};
use parking_lot::{Mutex, RwLock};

use crate::config::PoolConfig;
use crate::{PoolError, Result};

mod autoscale;
mod gate;
mod supervisor;
mod task;
mod worker;

pub use autoscale::ResizePolicy;
pub use gate::Utilization;
pub use task::{Job, TaskError, TaskId, TaskResult, WorkerId};

use autoscale::Autoscaler;
use gate::Gate;
pub(crate) use gate::Outstanding;
use supervisor::{Command, Supervisor, SupervisorHandle};
use task::Task;

pub(crate) struct Shared<T> {
    pub(crate) tasks: Receiver<Task<T>>,
    pub(crate) retire: Receiver<()>,
    /// Never receives a message, disconnects when the supervisor broadcasts
    /// stop.
    pub(crate) stop: Receiver<()>,
    pub(crate) gate: Gate,
    pub(crate) outstanding: Outstanding,
    pub(crate) live: AtomicUsize,
}

impl<T> Shared<T> {
    pub(crate) fn utilization(&self) -> Utilization {
        self.gate.snapshot(self.tasks.len())
    }
}

pub struct WorkerPool<T: Send + 'static> {
    shared: Arc<Shared<T>>,
    queue: RwLock<Option<Sender<Task<T>>>>,
    closing: AtomicBool,
    closing_tx: Mutex<Option<Sender<()>>>,
    closing_rx: Receiver<()>,
    results: Receiver<TaskResult<T>>,
    commands: Sender<Command>,
    supervisor: Mutex<Option<SupervisorHandle>>,
    autoscaler: Mutex<Option<Autoscaler>>,
    next_task: AtomicU64,
    thread_name: String,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Starts a pool of `size` workers with default settings.
    pub fn new(size: usize) -> Result<Self> {
        Self::with_config(PoolConfig::new(size))
    }

    pub fn with_config(config: PoolConfig) -> Result<Self> {
        config.validate()?;

        let (task_tx, task_rx) = bounded(config.queue_capacity());
        let (retire_tx, retire_rx) = unbounded();
        let (stop_tx, stop_rx) = bounded(0);
        let (closing_tx, closing_rx) = bounded(0);
        let (sink, results) = if config.collect_results {
            let (tx, rx) = bounded(config.result_capacity());
            (Some(tx), rx)
        } else {
            let (_, rx) = bounded(0);
            (None, rx)
        };

        let shared = Arc::new(Shared {
            tasks: task_rx,
            retire: retire_rx,
            stop: stop_rx,
            gate: Gate::new(config.size),
            outstanding: Outstanding::default(),
            live: AtomicUsize::new(0),
        });

        let supervisor = Supervisor::start(
            config.size,
            &config.thread_name,
            shared.clone(),
            sink,
            retire_tx,
            stop_tx,
        )?;
        let commands = supervisor.commands();

        let autoscaler = match &config.autoscale {
            Some(autoscale) => {
                let spawned = Autoscaler::spawn(
                    &config.thread_name,
                    autoscale.policy(),
                    autoscale.interval(),
                    shared.clone(),
                    commands.clone(),
                );
                match spawned {
                    Ok(autoscaler) => Some(autoscaler),
                    Err(e) => {
                        drop(task_tx);
                        let _ = supervisor.stop();
                        return Err(e.into());
                    }
                }
            }
            None => None,
        };

        info!(
            "started pool with {} workers (queue {}, autoscale {})",
            config.size,
            config.queue_capacity(),
            autoscaler.is_some()
        );

        Ok(WorkerPool {
            shared,
            queue: RwLock::new(Some(task_tx)),
            closing: AtomicBool::new(false),
            closing_tx: Mutex::new(Some(closing_tx)),
            closing_rx,
            results,
            commands,
            supervisor: Mutex::new(Some(supervisor)),
            autoscaler: Mutex::new(autoscaler),
            next_task: AtomicU64::new(0),
            thread_name: config.thread_name,
        })
    }

    /// Queues a task, blocking while the queue is full.
    ///
    /// # Errors
    ///
    /// [`PoolError::Closed`] if shutdown has begun, including when it begins
    /// while this call is blocked. The task is not queued in that case.
    pub fn submit<F>(&self, job: F) -> Result<TaskId>
    where
        F: FnOnce(WorkerId) -> anyhow::Result<T> + Send + 'static,
    {
        let queue = self.queue.read();
        let tx = match queue.as_ref() {
            Some(tx) if !self.closing.load(Ordering::SeqCst) => tx,
            _ => return Err(PoolError::Closed),
        };
        let task = self.task(Box::new(job));
        let id = task.id;

        self.shared.outstanding.begin();
        let sent = select! {
            send(tx, task) -> sent => sent.is_ok(),
            recv(self.closing_rx) -> _ => false,
        };
        if sent {
            Ok(id)
        } else {
            self.shared.outstanding.done();
            Err(PoolError::Closed)
        }
    }

    /// Queues a task without blocking.
    ///
    /// # Errors
    ///
    /// [`PoolError::QueueFull`] when the queue is at capacity,
    /// [`PoolError::Closed`] once shutdown has begun.
    pub fn try_submit<F>(&self, job: F) -> Result<TaskId>
    where
        F: FnOnce(WorkerId) -> anyhow::Result<T> + Send + 'static,
    {
        let queue = self.queue.read();
        let tx = match queue.as_ref() {
            Some(tx) if !self.closing.load(Ordering::SeqCst) => tx,
            _ => return Err(PoolError::Closed),
        };
        let task = self.task(Box::new(job));
        let id = task.id;

        self.shared.outstanding.begin();
        match tx.try_send(task) {
            Ok(()) => Ok(id),
            Err(e) => {
                self.shared.outstanding.done();
                match e {
                    TrySendError::Full(_) => Err(PoolError::QueueFull),
                    TrySendError::Disconnected(_) => Err(PoolError::Closed),
                }
            }
        }
    }

    /// A handle on the result sink. Every handle sees the sink close once
    /// shutdown has completed.
    pub fn results(&self) -> Results<T> {
        Results {
            rx: self.results.clone(),
        }
    }

    /// Stops the pool gracefully, returning once every worker has exited.
    ///
    /// Tasks accepted before the call still run and publish their results,
    /// so the result sink must keep being drained while this runs. Calling it
    /// again, from any thread, is a no-op.
    ///
    /// # Errors
    ///
    /// [`PoolError::SinkClosed`] if a worker ever published into a closed
    /// sink. [`PoolError::ShutdownFromWorker`] if called from a task of this
    /// pool, the pool is left running in that case.
    pub fn shutdown(&self) -> Result<()> {
        if worker::is_worker_of(&self.shared) {
            return Err(PoolError::ShutdownFromWorker);
        }
        if !self.begin_close() {
            debug!("shutdown already requested");
            return Ok(());
        }
        info!("shutting down, waiting for accepted tasks");
        self.shared.outstanding.wait_idle();
        self.finish()
    }

    /// Changes the number of workers and the concurrency limit. Returns the
    /// capacity actually applied, which is never below one nor below the
    /// number of tasks running at that moment.
    pub fn resize(&self, target: usize) -> Result<usize> {
        if self.closing.load(Ordering::SeqCst) {
            return Err(PoolError::Closed);
        }
        supervisor::resize(&self.commands, target)
    }

    pub fn utilization(&self) -> Utilization {
        self.shared.utilization()
    }

    pub fn capacity(&self) -> usize {
        self.shared.gate.capacity()
    }

    /// Number of workers alive or about to be spawned, excluding those
    /// already told to retire.
    pub fn workers(&self) -> usize {
        self.shared.live.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    fn task(&self, job: Job<T>) -> Task<T> {
        let id = TaskId(self.next_task.fetch_add(1, Ordering::Relaxed));
        Task::new(id, job)
    }

    /// Marks the pool closed and closes the queue. Returns false if another
    /// caller got there first.
    fn begin_close(&self) -> bool {
        if self.closing.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.closing_tx.lock().take();
        let autoscaler = self.autoscaler.lock().take();
        drop(autoscaler);
        // Blocked submitters have been released, so the write lock means no
        // send is in progress.
        let queue = self.queue.write().take();
        drop(queue);
        true
    }

    fn finish(&self) -> Result<()> {
        let supervisor = self.supervisor.lock().take();
        let stopped = match supervisor {
            Some(supervisor) => supervisor.stop(),
            None => Ok(()),
        };
        info!("pool stopped");
        stopped
    }
}

impl<T: Send + 'static> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        if !self.begin_close() {
            return;
        }
        debug!("pool dropped without shutdown, discarding undelivered results");
        let shared = self.shared.clone();
        let results = self.results.clone();
        let supervisor = self.supervisor.lock().take();

        if !worker::is_worker_of(&self.shared) {
            discard_and_stop(&shared, &results, supervisor);
            return;
        }
        // Dropped by one of our own tasks. That task is still outstanding and
        // its worker has to be joined, so the rest happens elsewhere.
        let spawned = thread::Builder::new()
            .name(format!("{}-reaper", self.thread_name))
            .spawn(move || discard_and_stop(&shared, &results, supervisor));
        if let Err(e) = spawned {
            warn!("could not hand shutdown to a new thread: {}", e);
        }
    }
}

fn discard_and_stop<T>(
    shared: &Shared<T>,
    results: &Receiver<TaskResult<T>>,
    supervisor: Option<SupervisorHandle>,
) {
    while !shared.outstanding.wait_idle_for(Duration::from_millis(10)) {
        while results.try_recv().is_ok() {}
    }
    if let Some(supervisor) = supervisor {
        if let Err(e) = supervisor.stop() {
            error!("shutdown on drop failed: {}", e);
        }
    }
}

pub struct Results<T> {
    rx: Receiver<TaskResult<T>>,
}

impl<T> Clone for Results<T> {
    fn clone(&self) -> Self {
        Results {
            rx: self.rx.clone(),
        }
    }
}

impl<T> Results<T> {
    /// Blocks for the next result, `None` once the pool has shut down and
    /// every result was taken.
    pub fn recv(&self) -> Option<TaskResult<T>> {
        self.rx.recv().ok()
    }

    pub fn try_recv(&self) -> Option<TaskResult<T>> {
        self.rx.try_recv().ok()
    }

    pub fn recv_timeout(
        &self,
        timeout: Duration,
    ) -> std::result::Result<TaskResult<T>, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl<T> Iterator for Results<T> {
    type Item = TaskResult<T>;

    fn next(&mut self) -> Option<Self::Item> {
        self.recv()
    }
}
