use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, info};

use crate::config::SecurityConfig;
use crate::schedule::ScheduledTask;

/// What the login form has typed so far. Cleared when the session expires.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn clear(&mut self) {
        self.email.clear();
        self.password.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.email.is_empty() && self.password.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InactivityEvent {
    /// Countdown before expiry; sent once per second
    Warning { seconds_left: u64 },
    /// An interaction arrived during the countdown
    WarningCancelled,
    /// Credentials were cleared; a new inactivity period has begun
    SessionExpired,
}

/// Watches for a gap in user interaction.
///
/// After `timeout` without a call to `reset` it counts down `warning`
/// seconds, then clears the shared credentials, reports `SessionExpired` and
/// starts over. The background task stops when the monitor is dropped.
pub struct InactivityMonitor {
    activity: watch::Sender<Instant>,
    task: ScheduledTask,
}

impl InactivityMonitor {
    pub fn start(
        timeout: Duration,
        warning: Duration,
        credentials: Arc<Mutex<Credentials>>,
    ) -> (Self, mpsc::UnboundedReceiver<InactivityEvent>) {
        let (activity, activity_rx) = watch::channel(Instant::now());
        let (events, events_rx) = mpsc::unbounded_channel();
        let task = ScheduledTask::spawn(
            "inactivity",
            run(activity_rx, timeout, warning, credentials, events),
        );
        (Self { activity, task }, events_rx)
    }

    pub fn from_config(
        config: &SecurityConfig,
        credentials: Arc<Mutex<Credentials>>,
    ) -> (Self, mpsc::UnboundedReceiver<InactivityEvent>) {
        Self::start(config.inactivity_timeout(), config.inactivity_warning(), credentials)
    }

    /// Record an interaction and push the deadline out from now
    pub fn reset(&self) {
        self.activity.send_replace(Instant::now());
    }

    /// A keystroke in one of the credential fields
    pub fn on_keystroke(&self) {
        self.reset();
    }

    /// The app came back to the foreground
    pub fn on_foreground(&self) {
        self.reset();
    }

    pub fn is_running(&self) -> bool {
        self.task.is_active()
    }

    pub fn stop(self) {
        self.task.cancel();
    }
}

const MIN_TIMEOUT: Duration = Duration::from_secs(1);

async fn run(
    mut activity: watch::Receiver<Instant>,
    timeout: Duration,
    warning: Duration,
    credentials: Arc<Mutex<Credentials>>,
    events: mpsc::UnboundedSender<InactivityEvent>,
) {
    // Every cycle sleeps at least once, so a zero timeout cannot spin.
    let timeout = timeout.max(MIN_TIMEOUT);
    // Expiry restarts the period even though no interaction happened.
    let mut floor = *activity.borrow();

    loop {
        // Sleep until the latest deadline has really passed.
        loop {
            let last = (*activity.borrow_and_update()).max(floor);
            let deadline = last + timeout;
            if Instant::now() >= deadline {
                break;
            }
            sleep_until(deadline).await;
        }

        let seen = *activity.borrow_and_update();
        let total = warning.as_secs();
        debug!(seconds = total, "inactivity deadline reached");
        if total > 0 {
            let _ = events.send(InactivityEvent::Warning { seconds_left: total });
        }

        let mut cancelled = false;
        for seconds_left in (0..total).rev() {
            sleep(Duration::from_secs(1)).await;
            if *activity.borrow() != seen {
                cancelled = true;
                break;
            }
            if seconds_left > 0 {
                let _ = events.send(InactivityEvent::Warning { seconds_left });
            }
        }

        if cancelled {
            debug!("inactivity warning cancelled");
            let _ = events.send(InactivityEvent::WarningCancelled);
            continue;
        }

        credentials.lock().unwrap_or_else(|e| e.into_inner()).clear();
        info!("session expired after inactivity");
        let _ = events.send(InactivityEvent::SessionExpired);
        floor = Instant::now();
    }
}
