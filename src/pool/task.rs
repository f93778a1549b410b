use std::any::Any;
use std::fmt::{self, Display};
use std::panic::{self, AssertUnwindSafe};

/// Identity of a worker. The first workers of a pool are numbered from 1,
/// workers spawned later get fresh numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub usize);

impl Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Sequence number handed out when a task is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

pub type Job<T> = Box<dyn FnOnce(WorkerId) -> anyhow::Result<T> + Send + 'static>;

pub(crate) struct Task<T> {
    pub(crate) id: TaskId,
    job: Job<T>,
}

impl<T> Task<T> {
    pub(crate) fn new(id: TaskId, job: Job<T>) -> Self {
        Task { id, job }
    }

    /// Runs the job on the calling thread. A panic inside the job is caught
    /// and turned into [`TaskError::Panicked`].
    pub(crate) fn run(self, worker: WorkerId) -> TaskResult<T> {
        let job = self.job;
        let outcome = match panic::catch_unwind(AssertUnwindSafe(move || job(worker))) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(TaskError::Failed(e)),
            Err(payload) => Err(TaskError::Panicked(panic_message(payload.as_ref()))),
        };
        TaskResult {
            task: self.id,
            worker,
            outcome,
        }
    }
}

#[derive(Debug)]
pub enum TaskError {
    Failed(anyhow::Error),
    Panicked(String),
}

impl Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskError::Failed(e) => write!(f, "task failed: {}", e),
            TaskError::Panicked(msg) => write!(f, "task panicked: {}", msg),
        }
    }
}

impl std::error::Error for TaskError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TaskError::Failed(e) => Some(e.as_ref()),
            TaskError::Panicked(_) => None,
        }
    }
}

/// Outcome of one task, published by the worker that ran it.
#[derive(Debug)]
pub struct TaskResult<T> {
    pub task: TaskId,
    pub worker: WorkerId,
    pub outcome: Result<T, TaskError>,
}

impl<T> TaskResult<T> {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
