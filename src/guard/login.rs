use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::{lockout_message, remaining_attempts_message, AttemptGuard, AttemptOutcome, LockoutCountdown, LockoutStatus};
use crate::auth::{AuthError, AuthService};
use crate::models::User;
use crate::schedule::ScheduledTask;
use crate::validation::{self, ValidationError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    SignedIn(User),
    /// Field errors; nothing was sent to the auth service
    Invalid(Vec<ValidationError>),
    Locked { remaining_secs: u64, message: String },
    Failed {
        error: AuthError,
        message: String,
        attempts_left: u32,
    },
    /// Credentials were right but the address is unconfirmed; signed out again
    Unverified { email: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterOutcome {
    Registered(User),
    Invalid(Vec<ValidationError>),
    Failed { error: AuthError, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PasswordResetOutcome {
    Sent { email: String },
    Invalid(ValidationError),
    Failed { error: AuthError, message: String },
}

/// The login, registration and password-reset procedures of the auth screens.
///
/// Input is validated before anything reaches the auth service, and every
/// failure comes back as an outcome the caller can render and retry from.
pub struct LoginFlow {
    auth: Arc<dyn AuthService>,
    guard: Arc<Mutex<AttemptGuard>>,
    countdown: Option<ScheduledTask>,
}

impl LoginFlow {
    pub fn new(auth: Arc<dyn AuthService>, guard: AttemptGuard) -> Self {
        Self {
            auth,
            guard: Arc::new(Mutex::new(guard)),
            countdown: None,
        }
    }

    pub fn guard(&self) -> MutexGuard<'_, AttemptGuard> {
        self.guard.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn lockout_status(&self) -> LockoutStatus {
        self.guard().check_lockout()
    }

    pub async fn login(&self, email: &str, password: &str) -> LoginOutcome {
        if let LockoutStatus::Locked { remaining_secs } = self.lockout_status() {
            return LoginOutcome::Locked {
                remaining_secs,
                message: lockout_message(remaining_secs),
            };
        }

        let mut errors = Vec::new();
        let email = match validation::validate_email(email) {
            Ok(email) => email,
            Err(e) => {
                errors.push(e);
                String::new()
            }
        };
        if let Err(e) = validation::validate_login_password(password) {
            errors.push(e);
        }
        if !errors.is_empty() {
            return LoginOutcome::Invalid(errors);
        }

        match self.auth.sign_in(&email, password).await {
            Ok(user) if !user.verified => {
                if let Err(e) = self.auth.sign_out().await {
                    warn!("failed to sign out unverified user: {}", e);
                }
                LoginOutcome::Unverified { email: user.email }
            }
            Ok(user) => {
                self.guard().record_success();
                info!(email = %user.email, "login succeeded");
                LoginOutcome::SignedIn(user)
            }
            Err(error) => {
                warn!(code = error.code(), "login failed");
                let outcome = self.guard().record_failed_attempt();
                match outcome {
                    AttemptOutcome::Locked { remaining_secs } => LoginOutcome::Locked {
                        remaining_secs,
                        message: format!(
                            "Too many failed login attempts. Your account has been locked for {}. \
                             You can reset your password to regain access immediately.",
                            crate::utils::pluralize(remaining_secs.div_ceil(60), "minute")
                        ),
                    },
                    AttemptOutcome::Remaining { attempts_left } => {
                        let message = match error {
                            AuthError::UserNotFound => format!(
                                "{} {}.",
                                error.message(),
                                remaining_attempts_message(attempts_left)
                            ),
                            _ if error.is_credential_failure() => format!(
                                "{} {} before account lockout.",
                                error.message(),
                                remaining_attempts_message(attempts_left)
                            ),
                            _ => error.message(),
                        };
                        LoginOutcome::Failed {
                            error,
                            message,
                            attempts_left,
                        }
                    }
                }
            }
        }
    }

    pub async fn register(&self, email: &str, password: &str, confirm: &str) -> RegisterOutcome {
        let mut errors = Vec::new();
        let email = match validation::validate_email(email) {
            Ok(email) => email,
            Err(e) => {
                errors.push(e);
                String::new()
            }
        };
        if let Err(e) = validation::validate_new_password(password) {
            errors.push(e);
        }
        if let Err(e) = validation::validate_confirm_password(password, confirm) {
            errors.push(e);
        }
        if !errors.is_empty() {
            return RegisterOutcome::Invalid(errors);
        }

        match self.auth.sign_up(&email, password).await {
            Ok(user) => RegisterOutcome::Registered(user),
            Err(error) => {
                let message = error.message();
                RegisterOutcome::Failed { error, message }
            }
        }
    }

    pub async fn request_password_reset(&self, email: &str) -> PasswordResetOutcome {
        let email = match validation::validate_email(email) {
            Ok(email) => email,
            Err(e) => return PasswordResetOutcome::Invalid(e),
        };

        match self.auth.send_password_reset(&email).await {
            Ok(()) => PasswordResetOutcome::Sent { email },
            Err(error) => {
                let message = reset_failure_message(&error);
                PasswordResetOutcome::Failed { error, message }
            }
        }
    }

    /// Send the verification message again for an unverified account.
    ///
    /// The account is signed in only long enough to send it. Wrong credentials
    /// count toward the lockout like a normal login. Returns `false` when the
    /// address is already verified and nothing was sent.
    pub async fn resend_verification(&self, email: &str, password: &str) -> Result<bool, AuthError> {
        if self.lockout_status().is_locked() {
            return Err(AuthError::TooManyRequests);
        }
        let email = validation::validate_email(email).map_err(|_| AuthError::InvalidEmail)?;

        let user = match self.auth.sign_in(&email, password).await {
            Ok(user) => user,
            Err(error) => {
                self.guard().record_failed_attempt();
                return Err(error);
            }
        };

        let sent = if user.verified {
            Ok(false)
        } else {
            self.auth.send_email_verification().await.map(|_| true)
        };
        if let Err(e) = self.auth.sign_out().await {
            warn!("failed to sign out after resending verification: {}", e);
        }
        if let Ok(true) = sent {
            info!(email = %user.email, "verification email resent");
        }
        sent
    }

    pub async fn logout(&self) -> Result<(), AuthError> {
        self.auth.sign_out().await
    }

    /// Start publishing the remaining lockout seconds. Any running countdown
    /// is cancelled first. Returns `None` when login is not locked.
    pub fn start_lockout_countdown(&mut self) -> Option<mpsc::UnboundedReceiver<u64>> {
        if let Some(previous) = self.countdown.take() {
            previous.cancel();
        }
        if !self.lockout_status().is_locked() {
            return None;
        }
        let (task, rx) = LockoutCountdown::start(self.guard.clone());
        self.countdown = Some(task);
        Some(rx)
    }
}

fn reset_failure_message(error: &AuthError) -> String {
    match error {
        AuthError::UserNotFound => "No account found with this email address.".to_string(),
        AuthError::InvalidEmail => "Invalid email address format.".to_string(),
        AuthError::TooManyRequests => {
            "Too many password reset requests. Please wait 5 minutes before trying again.".to_string()
        }
        _ => "Unable to send password reset email. Please try again.".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SecurityConfig;
    use crate::guard::ManualClock;
    use crate::storage::MemoryKeyValueStore;
    use crate::validation::{Field, ValidationKind};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Returns queued sign-in results in order and counts calls
    #[derive(Default)]
    struct ScriptedAuth {
        sign_in: Mutex<VecDeque<Result<User, AuthError>>>,
        calls: AtomicUsize,
        sign_outs: AtomicUsize,
        verifications: AtomicUsize,
    }

    impl ScriptedAuth {
        fn queue(&self, result: Result<User, AuthError>) {
            self.sign_in.lock().unwrap().push_back(result);
        }
    }

    #[async_trait]
    impl AuthService for ScriptedAuth {
        async fn sign_in(&self, _email: &str, _password: &str) -> Result<User, AuthError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.sign_in
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(AuthError::InvalidCredentials))
        }

        async fn sign_up(&self, email: &str, _password: &str) -> Result<User, AuthError> {
            if email == "taken@example.com" {
                return Err(AuthError::EmailInUse);
            }
            Ok(User {
                email: email.to_string(),
                verified: false,
            })
        }

        async fn sign_out(&self) -> Result<(), AuthError> {
            self.sign_outs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn send_password_reset(&self, email: &str) -> Result<(), AuthError> {
            match email {
                "jane@example.com" => Ok(()),
                _ => Err(AuthError::from_code("auth/user-not-found")),
            }
        }

        async fn send_email_verification(&self) -> Result<(), AuthError> {
            self.verifications.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn current_user(&self) -> Option<User> {
            None
        }
    }

    fn flow() -> (LoginFlow, Arc<ScriptedAuth>, Arc<ManualClock>) {
        let auth = Arc::new(ScriptedAuth::default());
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let guard = AttemptGuard::new(
            Arc::new(MemoryKeyValueStore::new()),
            &SecurityConfig::default(),
            clock.clone(),
        );
        (LoginFlow::new(auth.clone(), guard), auth, clock)
    }

    fn jane(verified: bool) -> User {
        User {
            email: "jane@example.com".to_string(),
            verified,
        }
    }

    #[tokio::test]
    async fn invalid_input_never_reaches_the_service() {
        let (flow, auth, _) = flow();
        let outcome = flow.login("not-an-email", "123").await;
        let LoginOutcome::Invalid(errors) = outcome else {
            panic!("expected field errors, got {:?}", outcome);
        };
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].field, Field::Email);
        assert_eq!(errors[1].kind, ValidationKind::TooShort);
        assert_eq!(auth.calls.load(Ordering::SeqCst), 0);
        assert_eq!(flow.guard().state().attempts, 0);
    }

    #[tokio::test]
    async fn failures_count_down_then_lock() {
        let (flow, _, _) = flow();

        let outcome = flow.login("jane@example.com", "wrong-pass").await;
        assert_eq!(
            outcome,
            LoginOutcome::Failed {
                error: AuthError::InvalidCredentials,
                message: "Invalid email or password. 4 attempts remaining before account lockout."
                    .to_string(),
                attempts_left: 4,
            }
        );

        for _ in 0..3 {
            flow.login("jane@example.com", "wrong-pass").await;
        }
        let LoginOutcome::Locked { message, .. } = flow.login("jane@example.com", "wrong-pass").await else {
            panic!("fifth attempt should lock");
        };
        assert!(message.contains("locked for 15 minutes"));
    }

    #[tokio::test]
    async fn fifth_failure_locks_and_blocks_further_calls() {
        let (flow, auth, clock) = flow();
        for _ in 0..4 {
            flow.login("jane@example.com", "wrong-pass").await;
        }
        let outcome = flow.login("jane@example.com", "wrong-pass").await;
        assert!(matches!(outcome, LoginOutcome::Locked { remaining_secs: 900, .. }));
        assert_eq!(auth.calls.load(Ordering::SeqCst), 5);

        let outcome = flow.login("jane@example.com", "right-pass").await;
        let LoginOutcome::Locked { message, .. } = outcome else {
            panic!("expected lockout");
        };
        assert_eq!(message, "Too many failed login attempts. Please try again in 15 minutes.");
        assert_eq!(auth.calls.load(Ordering::SeqCst), 5);
        assert_eq!(flow.guard().state().attempts, 5);

        clock.advance(Duration::from_secs(15 * 60));
        auth.queue(Ok(jane(true)));
        assert_eq!(flow.login("jane@example.com", "right-pass").await, LoginOutcome::SignedIn(jane(true)));
        assert_eq!(flow.guard().state().attempts, 0);
    }

    #[tokio::test]
    async fn non_credential_errors_skip_the_attempt_hint() {
        let (flow, auth, _) = flow();
        auth.queue(Err(AuthError::NetworkError));
        let LoginOutcome::Failed { message, attempts_left, .. } = flow.login("jane@example.com", "secret1").await
        else {
            panic!("expected failure");
        };
        assert_eq!(message, "Network error. Please check your internet connection.");
        assert_eq!(attempts_left, 4);
    }

    #[tokio::test]
    async fn unverified_account_is_signed_out() {
        let (flow, auth, _) = flow();
        auth.queue(Ok(jane(false)));
        let outcome = flow.login("jane@example.com", "secret1").await;
        assert_eq!(
            outcome,
            LoginOutcome::Unverified {
                email: "jane@example.com".to_string()
            }
        );
        assert_eq!(auth.sign_outs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_account_hint_omits_lockout_wording() {
        let (flow, auth, _) = flow();
        auth.queue(Err(AuthError::UserNotFound));
        let LoginOutcome::Failed { message, .. } = flow.login("nobody@example.com", "secret1").await else {
            panic!("expected failure");
        };
        assert_eq!(message, "No account found with this email. 4 attempts remaining.");
    }

    #[tokio::test]
    async fn resend_verification_signs_in_sends_and_signs_out() {
        let (flow, auth, _) = flow();
        auth.queue(Ok(jane(false)));
        assert!(matches!(flow.login("jane@example.com", "secret1").await, LoginOutcome::Unverified { .. }));

        auth.queue(Ok(jane(false)));
        assert_eq!(flow.resend_verification("jane@example.com", "secret1").await, Ok(true));
        assert_eq!(auth.verifications.load(Ordering::SeqCst), 1);
        assert_eq!(auth.sign_outs.load(Ordering::SeqCst), 2);

        auth.queue(Ok(jane(true)));
        assert_eq!(flow.resend_verification("jane@example.com", "secret1").await, Ok(false));
        assert_eq!(auth.verifications.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn resend_verification_respects_the_lockout() {
        let (flow, auth, _) = flow();
        assert_eq!(
            flow.resend_verification("jane@example.com", "wrong-pass").await,
            Err(AuthError::InvalidCredentials)
        );
        assert_eq!(flow.guard().state().attempts, 1);

        for _ in 0..4 {
            flow.login("jane@example.com", "wrong-pass").await;
        }
        let calls = auth.calls.load(Ordering::SeqCst);
        assert_eq!(
            flow.resend_verification("jane@example.com", "secret1").await,
            Err(AuthError::TooManyRequests)
        );
        assert_eq!(auth.calls.load(Ordering::SeqCst), calls);
        assert_eq!(auth.verifications.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn success_clears_previous_failures() {
        let (flow, auth, _) = flow();
        flow.login("jane@example.com", "wrong-pass").await;
        flow.login("jane@example.com", "wrong-pass").await;
        auth.queue(Ok(jane(true)));
        assert!(matches!(flow.login("jane@example.com", "secret1").await, LoginOutcome::SignedIn(_)));
        assert_eq!(flow.guard().state().attempts, 0);
    }

    #[tokio::test]
    async fn register_validates_before_calling_service() {
        let (flow, _, _) = flow();
        let RegisterOutcome::Invalid(errors) = flow.register("jane@example.com", "Abcdefg1", "Abcdefg2").await else {
            panic!("expected mismatch");
        };
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, ValidationKind::Mismatch);

        assert_eq!(
            flow.register("taken@example.com", "Abcdefg1", "Abcdefg1").await,
            RegisterOutcome::Failed {
                error: AuthError::EmailInUse,
                message: "An account with this email already exists.".to_string(),
            }
        );
        assert!(matches!(
            flow.register("new@example.com", "Abcdefg1", "Abcdefg1").await,
            RegisterOutcome::Registered(_)
        ));
    }

    #[tokio::test]
    async fn password_reset_messages() {
        let (flow, _, _) = flow();
        assert_eq!(
            flow.request_password_reset(" jane@example.com").await,
            PasswordResetOutcome::Sent {
                email: "jane@example.com".to_string()
            }
        );
        let PasswordResetOutcome::Failed { message, .. } = flow.request_password_reset("bob@example.com").await
        else {
            panic!("expected failure");
        };
        assert_eq!(message, "No account found with this email address.");
        assert!(matches!(
            flow.request_password_reset("").await,
            PasswordResetOutcome::Invalid(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_only_runs_while_locked() {
        let (mut flow, _, _) = flow();
        assert!(flow.start_lockout_countdown().is_none());

        for _ in 0..5 {
            flow.login("jane@example.com", "wrong-pass").await;
        }
        let mut first = flow.start_lockout_countdown().unwrap();
        assert_eq!(first.recv().await, Some(900));

        // Restarting replaces the previous countdown.
        let mut second = flow.start_lockout_countdown().unwrap();
        assert_eq!(first.recv().await, None);
        assert_eq!(second.recv().await, Some(900));
    }
}
