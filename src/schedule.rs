//! Background timers whose lifetime is tied to a handle.
//!
//! A `ScheduledTask` owns the tokio task it spawned. Dropping the handle or
//! calling `cancel` aborts the task, so a timer can never outlive the screen
//! or command that started it.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

pub struct ScheduledTask {
    name: &'static str,
    handle: Option<JoinHandle<()>>,
}

impl ScheduledTask {
    /// Run `future` in the background until it finishes or the handle goes away
    pub fn spawn<F>(name: &'static str, future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        debug!(timer = name, "timer started");
        Self {
            name,
            handle: Some(tokio::spawn(future)),
        }
    }

    /// Call `tick` every `period`, first after one full period.
    /// A tick that overruns delays the next one instead of bunching them up.
    pub fn every<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::spawn(name, async move {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                tick().await;
            }
        })
    }

    /// Whether the background task is still running
    pub fn is_active(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the timer. Consumes the handle so it cannot be cancelled twice.
    pub fn cancel(mut self) {
        self.abort();
    }

    fn abort(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            debug!(timer = self.name, "timer cancelled");
        }
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.abort();
    }
}
