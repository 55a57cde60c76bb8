#![forbid(unsafe_code)]

use crate::clock::Clock;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Named background loops sharing one stop signal.
///
/// Loops check the signal once per iteration. [`BackgroundTasks::stop`] sets
/// it and then waits for each loop to return on its own; calls already in
/// flight are never aborted.
#[derive(Debug, Default)]
pub struct BackgroundTasks {
    cancel: CancellationToken,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn spawn<F>(&mut self, name: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        debug!(task = name, "spawning background task");
        self.handles.push((name, tokio::spawn(task)));
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.handles.iter().map(|(name, _)| *name).collect()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub async fn stop(self) {
        self.cancel.cancel();
        for (name, handle) in self.handles {
            match handle.await {
                Ok(()) => debug!(task = name, "background task stopped"),
                Err(err) => warn!(task = name, %err, "background task ended abnormally"),
            }
        }
    }
}

/// Sleep for `duration` on `clock`, returning early once `cancel` fires.
///
/// Returns `false` when the loop should exit.
pub async fn pause(clock: &dyn Clock, cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = clock.sleep(duration) => !cancel.is_cancelled(),
    }
}
