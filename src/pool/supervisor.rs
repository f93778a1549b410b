//! The supervisor thread owns every worker handle of a pool.
//!
//! It is the only place where workers are spawned, retired, restarted and
//! joined. Workers report how they ended on a dedicated exit channel, so the
//! supervisor never has to poll thread handles.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{bounded, select, unbounded, Receiver, Sender};
use log::{debug, error, info, warn};

use super::task::{TaskResult, WorkerId};
use super::worker::{self, ExitEvent, WorkerExit};
use super::Shared;
use crate::{PoolError, Result};

pub(crate) enum Command {
    Resize {
        target: usize,
        reply: Sender<Result<usize>>,
    },
    Stop {
        reply: Sender<Option<PoolError>>,
    },
}

/// Asks the supervisor behind `commands` for a new capacity and waits for
/// the capacity it applied.
pub(crate) fn resize(commands: &Sender<Command>, target: usize) -> Result<usize> {
    let (reply, applied) = bounded(1);
    commands
        .send(Command::Resize { target, reply })
        .map_err(|_| PoolError::Closed)?;
    applied.recv().map_err(|_| PoolError::Closed)?
}

pub(crate) struct SupervisorHandle {
    commands: Sender<Command>,
    thread: JoinHandle<()>,
}

impl SupervisorHandle {
    pub(crate) fn commands(&self) -> Sender<Command> {
        self.commands.clone()
    }

    /// Broadcasts stop, joins every worker and closes the result sink.
    pub(crate) fn stop(self) -> Result<()> {
        let (reply, fatal) = bounded(1);
        let fatal = match self.commands.send(Command::Stop { reply }) {
            Ok(()) => fatal.recv().ok().flatten(),
            Err(_) => None,
        };
        self.thread
            .join()
            .map_err(|_| PoolError::Message("supervisor thread panicked".into()))?;
        match fatal {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

pub(crate) struct Supervisor<T: Send + 'static> {
    shared: Arc<Shared<T>>,
    sink: Option<Sender<TaskResult<T>>>,
    thread_name: String,
    workers: HashMap<WorkerId, JoinHandle<()>>,
    /// Workers expected to stay alive, not counting those holding a retire
    /// token.
    live: usize,
    next_id: usize,
    retire: Sender<()>,
    stop: Option<Sender<()>>,
    exits_tx: Sender<ExitEvent>,
    exits_rx: Receiver<ExitEvent>,
    fatal: Option<PoolError>,
    stopping: bool,
}

impl<T: Send + 'static> Supervisor<T> {
    /// Spawns `size` workers on the calling thread, then hands them over to
    /// a new supervisor thread. If any worker fails to spawn the ones already
    /// running are stopped and joined.
    pub(crate) fn start(
        size: usize,
        thread_name: &str,
        shared: Arc<Shared<T>>,
        sink: Option<Sender<TaskResult<T>>>,
        retire: Sender<()>,
        stop: Sender<()>,
    ) -> Result<SupervisorHandle> {
        let (exits_tx, exits_rx) = unbounded();
        let mut supervisor = Supervisor {
            shared,
            sink,
            thread_name: thread_name.to_string(),
            workers: HashMap::with_capacity(size),
            live: 0,
            next_id: 0,
            retire,
            stop: Some(stop),
            exits_tx,
            exits_rx,
            fatal: None,
            stopping: false,
        };

        for _ in 0..size {
            if let Err(e) = supervisor.spawn_worker() {
                error!("could not spawn worker: {}", e);
                supervisor.stop();
                return Err(e);
            }
            supervisor.live += 1;
        }
        supervisor.publish_live();

        let (commands, command_rx) = unbounded();
        let thread = thread::Builder::new()
            .name(format!("{}-supervisor", thread_name))
            .spawn(move || supervisor.run(command_rx))?;
        Ok(SupervisorHandle { commands, thread })
    }

    fn run(mut self, commands: Receiver<Command>) {
        let exits = self.exits_rx.clone();
        loop {
            select! {
                recv(commands) -> command => match command {
                    Ok(Command::Resize { target, reply }) => {
                        let _ = reply.send(self.resize(target));
                    }
                    Ok(Command::Stop { reply }) => {
                        self.stop();
                        let _ = reply.send(self.fatal.take());
                        return;
                    }
                    Err(_) => {
                        self.stop();
                        return;
                    }
                },
                recv(exits) -> event => {
                    if let Ok((id, exit)) = event {
                        self.on_exit(id, exit);
                    }
                }
            }
        }
    }

    fn spawn_worker(&mut self) -> Result<WorkerId> {
        self.next_id += 1;
        let id = WorkerId(self.next_id);
        let handle = worker::spawn(
            id,
            &self.thread_name,
            self.shared.clone(),
            self.sink.clone(),
            self.exits_tx.clone(),
        )?;
        self.workers.insert(id, handle);
        Ok(id)
    }

    fn on_exit(&mut self, id: WorkerId, exit: WorkerExit) {
        if let Some(handle) = self.workers.remove(&id) {
            if handle.join().is_err() {
                debug!("{} thread ended with a panic", id);
            }
        }
        match exit {
            WorkerExit::Retired => debug!("{} retired", id),
            WorkerExit::Stopped => {
                debug!("{} stopped", id);
                self.live = self.live.saturating_sub(1);
            }
            WorkerExit::Failed(e) => {
                error!("invariant violated, {} gave up: {}", id, e);
                self.live = self.live.saturating_sub(1);
                self.fatal.get_or_insert(e);
            }
            WorkerExit::Crashed => {
                self.live = self.live.saturating_sub(1);
                if self.stopping {
                    warn!("{} crashed during shutdown", id);
                } else {
                    match self.spawn_worker() {
                        Ok(replacement) => {
                            warn!("{} crashed, replaced by {}", id, replacement);
                            self.live += 1;
                        }
                        Err(e) => error!("{} crashed and could not be replaced: {}", id, e),
                    }
                }
            }
        }
        self.publish_live();
    }

    fn resize(&mut self, target: usize) -> Result<usize> {
        let applied = self.shared.gate.set_capacity(target);
        if applied > self.live {
            // Idle workers that have not picked up their retire token yet
            // can simply stay.
            while self.live < applied && self.shared.retire.try_recv().is_ok() {
                self.live += 1;
            }
            while self.live < applied {
                let spawned = self.spawn_worker();
                if let Err(e) = spawned {
                    self.publish_live();
                    return Err(e);
                }
                self.live += 1;
            }
        } else {
            for _ in applied..self.live {
                self.retire.send(()).map_err(|_| PoolError::Closed)?;
            }
            self.live = applied;
        }
        self.publish_live();
        info!("capacity set to {} (requested {})", applied, target);
        Ok(applied)
    }

    fn stop(&mut self) {
        self.stopping = true;
        self.stop.take();
        while !self.workers.is_empty() {
            match self.exits_rx.recv() {
                Ok((id, exit)) => self.on_exit(id, exit),
                Err(_) => break,
            }
        }
        self.live = 0;
        self.publish_live();
        // Last sender of the result sink, all workers have exited.
        self.sink.take();
        debug!("all workers joined");
    }

    fn publish_live(&self) {
        self.shared.live.store(self.live, Ordering::SeqCst);
    }
}
