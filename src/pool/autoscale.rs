use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{bounded, select, tick, Sender};
use log::{debug, trace};

use super::gate::Utilization;
use super::supervisor::{self, Command};
use super::Shared;

/// Heuristic used by the autoscaler to pick the next capacity.
///
/// The fractions are tuning knobs rather than guarantees. Shrinking is
/// checked first so a mostly idle, oversized pool always gives workers back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizePolicy {
    pub low_water: usize,
    pub high_water: usize,
    pub max_capacity: usize,
}

impl ResizePolicy {
    /// Returns the capacity to apply, or `None` when no change is needed.
    ///
    /// - more than half free and above the high water mark: shrink by 1/4
    /// - more than a quarter free: keep
    /// - below the low water mark: double
    /// - otherwise grow by half
    ///
    /// Growth never exceeds `max_capacity`.
    pub fn evaluate(&self, utilization: Utilization) -> Option<usize> {
        let capacity = utilization.capacity.max(1);
        let free = utilization.free();

        let next = if free * 2 > capacity && capacity > self.high_water {
            capacity - capacity / 4
        } else if free * 4 > capacity {
            capacity
        } else if capacity < self.low_water {
            (capacity * 2).min(self.max_capacity)
        } else {
            (capacity + (capacity + 1) / 2).min(self.max_capacity)
        }
        .max(utilization.running)
        .max(1);

        if next == utilization.capacity {
            None
        } else {
            Some(next)
        }
    }
}

/// Background thread applying a [`ResizePolicy`] on a fixed interval.
pub(crate) struct Autoscaler {
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl Autoscaler {
    pub(crate) fn spawn<T: Send + 'static>(
        thread_name: &str,
        policy: ResizePolicy,
        interval: Duration,
        shared: Arc<Shared<T>>,
        commands: Sender<Command>,
    ) -> io::Result<Self> {
        let (stop, stopped) = bounded::<()>(0);
        let thread = thread::Builder::new()
            .name(format!("{}-autoscale", thread_name))
            .spawn(move || {
                let ticker = tick(interval);
                loop {
                    select! {
                        recv(ticker) -> _ => {
                            let utilization = shared.utilization();
                            trace!("autoscale check: {:?}", utilization);
                            if let Some(target) = policy.evaluate(utilization) {
                                if let Err(e) = supervisor::resize(&commands, target) {
                                    debug!("autoscaler stopping: {}", e);
                                    break;
                                }
                            }
                        }
                        recv(stopped) -> _ => break,
                    }
                }
            })?;
        Ok(Autoscaler {
            stop: Some(stop),
            thread: Some(thread),
        })
    }
}

impl Drop for Autoscaler {
    fn drop(&mut self) {
        self.stop.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
