// src/workers/periodic.rs

//! Cooperative periodic worker: a tokio task that repeats a unit of work
//! with a cancellable sleep in between.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{info, warn};

/// What a task wants the loop to do after an iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

#[async_trait]
pub trait PeriodicTask: Send + 'static {
    fn name(&self) -> &'static str;

    async fn run_once(&mut self) -> Flow;
}

/// Receiver half of a worker's stop signal.
pub struct StopSignal {
    stopped: watch::Receiver<bool>,
}

impl StopSignal {
    pub fn is_stopped(&self) -> bool {
        *self.stopped.borrow()
    }

    /// Sleeps for `interval`, returning early (with `true`) when the
    /// worker is stopped in the meantime.
    pub async fn wait(&mut self, interval: Duration) -> bool {
        tokio::select! {
            _ = sleep(interval) => false,
            _ = self.stopped.wait_for(|stopped| *stopped) => true,
        }
    }

    /// Resolves once the worker is asked to stop.
    pub async fn stopped(&mut self) {
        let _ = self.stopped.wait_for(|stopped| *stopped).await;
    }
}

/// Handle to a spawned worker. Stopping is idempotent; `join` consumes
/// the underlying task handle the first time it is called.
pub struct Worker {
    name: &'static str,
    stop_tx: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    /// Spawns a worker from any future factory that honors a stop signal.
    pub fn spawn<F, Fut>(name: &'static str, f: F) -> Self
    where
        F: FnOnce(StopSignal) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (stop_tx, stopped) = watch::channel(false);
        let handle = tokio::spawn(f(StopSignal { stopped }));
        Self {
            name,
            stop_tx,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Spawns a worker that runs `task` every `interval`.
    pub fn spawn_periodic<T: PeriodicTask>(task: T, interval: Duration) -> Self {
        let name = task.name();
        Self::spawn(name, move |stop| run_periodic(task, interval, stop))
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Signals the worker to exit after its current iteration. Safe to
    /// call any number of times.
    pub fn stop(&self) {
        info!("stopping worker '{}'", self.name);
        let _ = self.stop_tx.send(true);
    }

    pub fn is_alive(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Waits for the worker task to finish.
    pub async fn join(&self) {
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("worker '{}' terminated abnormally: {e}", self.name);
            }
        }
    }
}

/// Drives a `PeriodicTask` until it ends its own loop or the worker is
/// stopped.
pub async fn run_periodic<T: PeriodicTask>(mut task: T, interval: Duration, mut stop: StopSignal) {
    while !stop.is_stopped() {
        if task.run_once().await == Flow::Stop {
            break;
        }
        if stop.wait(interval).await {
            break;
        }
    }
    info!("worker '{}' stopped", task.name());
}
