use std::time::Duration;

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Utilization {
    pub capacity: usize,
    pub running: usize,
    pub queued: usize,
}

impl Utilization {
    pub fn free(&self) -> usize {
        self.capacity.saturating_sub(self.running)
    }
}

#[derive(Debug)]
struct GateState {
    capacity: usize,
    running: usize,
}

/// Admission gate for task execution. A worker holds a slot for as long as
/// its task runs, so `running <= capacity` at all times.
#[derive(Debug)]
pub(crate) struct Gate {
    state: Mutex<GateState>,
    cond: Condvar,
}

impl Gate {
    pub(crate) fn new(capacity: usize) -> Self {
        Gate {
            state: Mutex::new(GateState {
                capacity,
                running: 0,
            }),
            cond: Condvar::new(),
        }
    }

    pub(crate) fn enter(&self) {
        let mut state = self.state.lock();
        while state.running >= state.capacity {
            self.cond.wait(&mut state);
        }
        state.running += 1;
    }

    pub(crate) fn leave(&self) {
        let mut state = self.state.lock();
        state.running -= 1;
        self.cond.notify_one();
    }

    /// Sets a new capacity, never below one nor below the tasks running
    /// right now. Returns the capacity that was applied.
    pub(crate) fn set_capacity(&self, target: usize) -> usize {
        let mut state = self.state.lock();
        let applied = target.max(state.running).max(1);
        state.capacity = applied;
        self.cond.notify_all();
        applied
    }

    pub(crate) fn capacity(&self) -> usize {
        self.state.lock().capacity
    }

    pub(crate) fn snapshot(&self, queued: usize) -> Utilization {
        let state = self.state.lock();
        Utilization {
            capacity: state.capacity,
            running: state.running,
            queued,
        }
    }
}

/// Counts tasks that were accepted but have not yet published their result.
#[derive(Debug, Default)]
pub(crate) struct Outstanding {
    count: Mutex<usize>,
    idle: Condvar,
}

impl Outstanding {
    pub(crate) fn begin(&self) {
        *self.count.lock() += 1;
    }

    pub(crate) fn done(&self) {
        let mut count = self.count.lock();
        *count -= 1;
        if *count == 0 {
            self.idle.notify_all();
        }
    }

    pub(crate) fn wait_idle(&self) {
        let mut count = self.count.lock();
        while *count > 0 {
            self.idle.wait(&mut count);
        }
    }

    /// Returns true if the counter reached zero within `timeout`.
    pub(crate) fn wait_idle_for(&self, timeout: Duration) -> bool {
        let mut count = self.count.lock();
        if *count > 0 {
            self.idle.wait_for(&mut count, timeout);
        }
        *count == 0
    }
}
