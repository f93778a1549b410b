use std::cell::Cell;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{select, Sender};
use log::{debug, trace, warn};

use super::task::{Task, TaskResult, WorkerId};
use super::Shared;
use crate::{PoolError, Result};

/// How a worker thread ended.
#[derive(Debug)]
pub(crate) enum WorkerExit {
    /// Observed the stop broadcast or the closed queue.
    Stopped,
    /// Consumed a retire token while idle.
    Retired,
    /// The worker body returned an error.
    Failed(PoolError),
    /// The worker thread unwound outside of task code.
    Crashed,
}

pub(crate) type ExitEvent = (WorkerId, WorkerExit);

/// Sends the exit event of a worker, or `Crashed` if the thread unwinds
/// before reporting.
struct ExitReporter {
    id: WorkerId,
    exits: Sender<ExitEvent>,
    reported: bool,
}

impl ExitReporter {
    fn report(mut self, exit: WorkerExit) {
        self.reported = true;
        let _ = self.exits.send((self.id, exit));
    }
}

impl Drop for ExitReporter {
    fn drop(&mut self) {
        if !self.reported {
            let _ = self.exits.send((self.id, WorkerExit::Crashed));
        }
    }
}

thread_local! {
    /// Address of the `Shared` state of the pool this thread works for.
    static POOL: Cell<usize> = Cell::new(0);
}

/// Whether the calling thread is one of the workers of the pool owning
/// `shared`.
pub(crate) fn is_worker_of<T>(shared: &Arc<Shared<T>>) -> bool {
    let pool = Arc::as_ptr(shared) as usize;
    POOL.with(|current| current.get() == pool)
}

pub(crate) fn spawn<T: Send + 'static>(
    id: WorkerId,
    name: &str,
    shared: Arc<Shared<T>>,
    sink: Option<Sender<TaskResult<T>>>,
    exits: Sender<ExitEvent>,
) -> io::Result<JoinHandle<()>> {
    let pool = Arc::as_ptr(&shared) as usize;
    thread::Builder::new()
        .name(format!("{}-{}", name, id.0))
        .spawn(move || {
            POOL.with(|current| current.set(pool));
            let reporter = ExitReporter {
                id,
                exits,
                reported: false,
            };
            debug!("{} started", id);
            let exit = match run(id, &shared, sink.as_ref()) {
                Ok(exit) => exit,
                Err(e) => WorkerExit::Failed(e),
            };
            drop(sink);
            reporter.report(exit);
        })
}

fn run<T>(id: WorkerId, shared: &Shared<T>, sink: Option<&Sender<TaskResult<T>>>) -> Result<WorkerExit> {
    loop {
        select! {
            recv(shared.tasks) -> task => match task {
                Ok(task) => execute(id, shared, sink, task)?,
                Err(_) => return Ok(WorkerExit::Stopped),
            },
            recv(shared.retire) -> token => {
                return Ok(match token {
                    Ok(()) => WorkerExit::Retired,
                    Err(_) => WorkerExit::Stopped,
                });
            }
            recv(shared.stop) -> _ => return Ok(WorkerExit::Stopped),
        }
    }
}

fn execute<T>(
    id: WorkerId,
    shared: &Shared<T>,
    sink: Option<&Sender<TaskResult<T>>>,
    task: Task<T>,
) -> Result<()> {
    trace!("{} picked up {}", id, task.id);
    shared.gate.enter();
    let result = task.run(id);
    shared.gate.leave();

    let published = match sink {
        Some(sink) => {
            if let Err(e) = &result.outcome {
                debug!("{} failed on {}: {}", result.task, id, e);
            }
            sink.send(result).map_err(|_| PoolError::SinkClosed)
        }
        None => {
            if let Err(e) = &result.outcome {
                warn!("{} failed on {}: {}", result.task, id, e);
            }
            Ok(())
        }
    };
    shared.outstanding.done();
    published
}
