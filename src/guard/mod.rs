//! Login attempt guard: failed-attempt counting, timed lockout and the
//! inactivity countdown on the login form.

pub mod inactivity;
pub mod login;

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::SecurityConfig;
use crate::schedule::ScheduledTask;
use crate::storage::KeyValueStore;
use crate::utils::pluralize;

pub use inactivity::{Credentials, InactivityEvent, InactivityMonitor};
pub use login::{LoginFlow, LoginOutcome, PasswordResetOutcome, RegisterOutcome};

/// Persisted count of consecutive failures
pub const ATTEMPTS_KEY: &str = "loginAttempts";
/// Persisted lockout deadline, epoch milliseconds
pub const LOCKOUT_KEY: &str = "loginLockoutTime";

/// Source of wall-clock time in epoch milliseconds
pub trait Clock: Send + Sync + 'static {
    fn now_millis(&self) -> i64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        crate::utils::now_millis()
    }
}

/// A clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock(AtomicI64);

impl ManualClock {
    pub fn new(start_millis: i64) -> Self {
        Self(AtomicI64::new(start_millis))
    }

    pub fn advance(&self, by: Duration) {
        self.0.fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }

    pub fn set(&self, millis: i64) {
        self.0.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoginAttemptState {
    pub attempts: u32,
    pub lockout_until: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockoutStatus {
    Unlocked,
    Locked { remaining_secs: u64 },
}

impl LockoutStatus {
    pub fn is_locked(&self) -> bool {
        matches!(self, LockoutStatus::Locked { .. })
    }
}

/// Result of recording a failed login
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Remaining { attempts_left: u32 },
    Locked { remaining_secs: u64 },
}

/// Tracks consecutive failed logins and enforces the lockout window.
///
/// State is mirrored to key-value storage on every change. Storage failures
/// are logged and otherwise ignored; the in-memory state keeps governing.
pub struct AttemptGuard {
    state: LoginAttemptState,
    max_attempts: u32,
    lockout_duration: Duration,
    storage: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
}

impl AttemptGuard {
    /// A guard with no recorded failures
    pub fn new(storage: Arc<dyn KeyValueStore>, config: &SecurityConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: LoginAttemptState::default(),
            max_attempts: config.max_login_attempts.max(1),
            lockout_duration: config.lockout_duration(),
            storage,
            clock,
        }
    }

    /// Restore the persisted counters. An expired lockout is cleared right away.
    pub fn load(storage: Arc<dyn KeyValueStore>, config: &SecurityConfig, clock: Arc<dyn Clock>) -> Self {
        let mut guard = Self::new(storage, config, clock);
        let now = guard.clock.now_millis();

        if let Some(until) = guard.read_scalar::<i64>(LOCKOUT_KEY) {
            if now < until {
                guard.state.lockout_until = Some(until);
            } else {
                debug!("persisted lockout expired, clearing");
                guard.clear();
            }
        }

        if let Some(attempts) = guard.read_scalar::<u32>(ATTEMPTS_KEY) {
            guard.state.attempts = attempts;
        }

        guard
    }

    pub fn state(&self) -> LoginAttemptState {
        self.state
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }

    pub fn record_failed_attempt(&mut self) -> AttemptOutcome {
        let now = self.clock.now_millis();
        self.record_failed_attempt_at(now)
    }

    /// Count one failure. While locked the counter does not move.
    pub fn record_failed_attempt_at(&mut self, now: i64) -> AttemptOutcome {
        if let LockoutStatus::Locked { remaining_secs } = self.check_lockout_at(now) {
            return AttemptOutcome::Locked { remaining_secs };
        }

        self.state.attempts += 1;
        self.write_scalar(ATTEMPTS_KEY, self.state.attempts.to_string());

        if self.state.attempts >= self.max_attempts {
            let until = now + self.lockout_duration.as_millis() as i64;
            self.state.lockout_until = Some(until);
            self.write_scalar(LOCKOUT_KEY, until.to_string());
            info!(attempts = self.state.attempts, "login locked out");
            return AttemptOutcome::Locked {
                remaining_secs: ceil_secs(until - now),
            };
        }

        AttemptOutcome::Remaining {
            attempts_left: self.max_attempts - self.state.attempts,
        }
    }

    pub fn check_lockout(&mut self) -> LockoutStatus {
        let now = self.clock.now_millis();
        self.check_lockout_at(now)
    }

    /// Report whether login is blocked at `now`. An expired lockout clears
    /// both counters as a side effect.
    pub fn check_lockout_at(&mut self, now: i64) -> LockoutStatus {
        match self.state.lockout_until {
            Some(until) if now < until => LockoutStatus::Locked {
                remaining_secs: ceil_secs(until - now),
            },
            Some(_) => {
                info!("lockout expired");
                self.clear();
                LockoutStatus::Unlocked
            }
            None => LockoutStatus::Unlocked,
        }
    }

    pub fn record_success(&mut self) {
        self.clear();
    }

    fn clear(&mut self) {
        self.state = LoginAttemptState::default();
        for key in [ATTEMPTS_KEY, LOCKOUT_KEY] {
            if let Err(e) = self.storage.remove(key) {
                warn!(key, "failed to clear lockout state: {}", e);
            }
        }
    }

    fn read_scalar<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        match self.storage.get(key) {
            Ok(Some(raw)) => match raw.trim().parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!(key, value = %raw, "ignoring unparsable lockout value");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(key, "failed to read lockout state: {}", e);
                None
            }
        }
    }

    fn write_scalar(&self, key: &str, value: String) {
        if let Err(e) = self.storage.set(key, &value) {
            warn!(key, "failed to persist lockout state: {}", e);
        }
    }
}

fn ceil_secs(millis: i64) -> u64 {
    (millis.max(0) as u64).div_ceil(1000)
}

/// "N attempt(s) remaining"
pub fn remaining_attempts_message(attempts_left: u32) -> String {
    format!("{} remaining", pluralize(attempts_left as u64, "attempt"))
}

/// Message shown while login is blocked, in whole minutes rounded up
pub fn lockout_message(remaining_secs: u64) -> String {
    let minutes = remaining_secs.div_ceil(60);
    format!(
        "Too many failed login attempts. Please try again in {}.",
        pluralize(minutes, "minute")
    )
}

/// Render seconds as `m:ss`
pub fn format_countdown(seconds: u64) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

/// Publishes the remaining lockout seconds once per second.
///
/// Each tick re-checks the guard, so the expiry clears the persisted
/// counters even if nobody tries to log in. The last value sent is 0.
pub struct LockoutCountdown;

impl LockoutCountdown {
    pub fn start(guard: Arc<Mutex<AttemptGuard>>) -> (ScheduledTask, mpsc::UnboundedReceiver<u64>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = ScheduledTask::spawn("lockout-countdown", async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            loop {
                ticker.tick().await;
                let status = guard.lock().unwrap_or_else(|e| e.into_inner()).check_lockout();
                match status {
                    LockoutStatus::Locked { remaining_secs } => {
                        if tx.send(remaining_secs).is_err() {
                            break;
                        }
                    }
                    LockoutStatus::Unlocked => {
                        let _ = tx.send(0);
                        break;
                    }
                }
            }
        });
        (task, rx)
    }
}
