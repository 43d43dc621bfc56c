//! Authentication service contract and provider error mapping.

pub mod local;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::User;

pub use local::LocalAuthService;

/// Fallback text for provider codes without a specific message
pub const GENERIC_AUTH_MESSAGE: &str = "Something went wrong. Please try again.";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Invalid email or password.")]
    InvalidCredentials,
    #[error("Incorrect password.")]
    WrongPassword,
    #[error("No account found with this email.")]
    UserNotFound,
    #[error("Too many failed attempts. Please try again later or reset your password.")]
    TooManyRequests,
    #[error("Network error. Please check your internet connection.")]
    NetworkError,
    #[error("An account with this email already exists.")]
    EmailInUse,
    #[error("Password is too weak.")]
    WeakPassword,
    #[error("Invalid email format.")]
    InvalidEmail,
    #[error("No user is signed in.")]
    NotSignedIn,
    #[error("Authentication backend error: {0}")]
    Backend(String),
    #[error("Authentication failed ({0})")]
    Other(String),
}

impl AuthError {
    /// Map a provider error code such as `auth/user-not-found`
    pub fn from_code(code: &str) -> Self {
        match code {
            "auth/invalid-credential" | "auth/invalid-login-credentials" => AuthError::InvalidCredentials,
            "auth/wrong-password" => AuthError::WrongPassword,
            "auth/user-not-found" => AuthError::UserNotFound,
            "auth/too-many-requests" => AuthError::TooManyRequests,
            "auth/network-request-failed" => AuthError::NetworkError,
            "auth/email-already-in-use" => AuthError::EmailInUse,
            "auth/weak-password" => AuthError::WeakPassword,
            "auth/invalid-email" => AuthError::InvalidEmail,
            other => AuthError::Other(other.to_string()),
        }
    }

    /// The provider code this error corresponds to
    pub fn code(&self) -> &str {
        match self {
            AuthError::InvalidCredentials => "auth/invalid-credential",
            AuthError::WrongPassword => "auth/wrong-password",
            AuthError::UserNotFound => "auth/user-not-found",
            AuthError::TooManyRequests => "auth/too-many-requests",
            AuthError::NetworkError => "auth/network-request-failed",
            AuthError::EmailInUse => "auth/email-already-in-use",
            AuthError::WeakPassword => "auth/weak-password",
            AuthError::InvalidEmail => "auth/invalid-email",
            AuthError::NotSignedIn => "auth/no-current-user",
            AuthError::Backend(_) => "auth/internal-error",
            AuthError::Other(code) => code,
        }
    }

    /// Human-readable message; unmapped codes get the generic text
    pub fn message(&self) -> String {
        match self {
            AuthError::Backend(_) | AuthError::Other(_) => GENERIC_AUTH_MESSAGE.to_string(),
            known => known.to_string(),
        }
    }

    /// Whether the lockout hint ("N attempts remaining") applies to this failure
    pub fn is_credential_failure(&self) -> bool {
        matches!(
            self,
            AuthError::InvalidCredentials
                | AuthError::WrongPassword
                | AuthError::UserNotFound
                | AuthError::Backend(_)
                | AuthError::Other(_)
        )
    }
}

#[async_trait]
pub trait AuthService: Send + Sync + 'static {
    /// Sign in and make the account the current user
    async fn sign_in(&self, email: &str, password: &str) -> Result<User, AuthError>;

    /// Create an account. The new account is not signed in.
    async fn sign_up(&self, email: &str, password: &str) -> Result<User, AuthError>;

    async fn sign_out(&self) -> Result<(), AuthError>;

    async fn send_password_reset(&self, email: &str) -> Result<(), AuthError>;

    /// Re-send the verification message for the current user
    async fn send_email_verification(&self) -> Result<(), AuthError>;

    async fn current_user(&self) -> Option<User>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_known_provider_codes() {
        assert_eq!(AuthError::from_code("auth/user-not-found"), AuthError::UserNotFound);
        assert_eq!(AuthError::from_code("auth/too-many-requests"), AuthError::TooManyRequests);
        assert_eq!(AuthError::from_code("auth/email-already-in-use"), AuthError::EmailInUse);
        assert_eq!(
            AuthError::from_code("auth/network-request-failed").message(),
            "Network error. Please check your internet connection."
        );
    }

    #[test]
    fn unmapped_codes_use_generic_message() {
        let err = AuthError::from_code("auth/quota-exceeded");
        assert_eq!(err.code(), "auth/quota-exceeded");
        assert_eq!(err.message(), GENERIC_AUTH_MESSAGE);
        assert!(err.is_credential_failure());
    }

    #[test]
    fn codes_round_trip_for_known_errors() {
        for err in [
            AuthError::InvalidCredentials,
            AuthError::WrongPassword,
            AuthError::WeakPassword,
            AuthError::InvalidEmail,
        ] {
            assert_eq!(AuthError::from_code(err.code()), err);
        }
    }
}
