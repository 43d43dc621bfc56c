use async_trait::async_trait;
use rand_core::{OsRng, RngCore};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{info, warn};

use super::{AuthError, AuthService};
use crate::database::Database;
use crate::models::User;
use crate::storage::KeyValueStore;
use crate::validation;

/// Key under which the signed-in email is kept
pub const SESSION_KEY: &str = "session.user";

const SALT_LEN: usize = 16;
const HASH_LEN: usize = 32;
const MEMORY_COST_KIB: u32 = 19 * 1024;
/// Passwords shorter than this are rejected with `WeakPassword`
const MIN_PASSWORD_LEN: usize = 6;

/// Offline authentication backed by the `users` table.
///
/// Passwords are stored as Argon2id hashes with a per-account random salt.
/// Local accounts have no mailbox to confirm, so they are created verified.
#[derive(Clone)]
pub struct LocalAuthService {
    db: Database,
    session: Arc<dyn KeyValueStore>,
}

impl LocalAuthService {
    pub fn new(db: Database, session: Arc<dyn KeyValueStore>) -> Self {
        Self { db, session }
    }

    fn hash_password(password: &[u8], salt: &[u8]) -> Result<[u8; HASH_LEN], AuthError> {
        let params = argon2::Params::new(MEMORY_COST_KIB, 2, 1, Some(HASH_LEN))
            .map_err(|e| AuthError::Backend(e.to_string()))?;
        let argon2 = argon2::Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);

        let mut hash = [0u8; HASH_LEN];
        argon2
            .hash_password_into(password, salt, &mut hash)
            .map_err(|e| AuthError::Backend(e.to_string()))?;
        Ok(hash)
    }

    /// Argon2 is memory- and CPU-bound, so it runs on the blocking pool
    async fn hash_blocking(password: &str, salt: Vec<u8>) -> Result<[u8; HASH_LEN], AuthError> {
        let password = password.as_bytes().to_vec();
        tokio::task::spawn_blocking(move || Self::hash_password(&password, &salt))
            .await
            .map_err(|e| AuthError::Backend(e.to_string()))?
    }

    /// Look up (password_hash, salt, verified) for an email
    fn find_user(&self, email: &str) -> Result<Option<(String, String, bool)>, AuthError> {
        let conn = self.db.lock().map_err(|e| AuthError::Backend(e.to_string()))?;
        match conn.query_row(
            "SELECT password_hash, salt, verified FROM users WHERE email = ?1",
            rusqlite::params![email],
            |row| Ok((row.get(0)?, row.get(1)?, row.get::<_, i64>(2)? != 0)),
        ) {
            Ok(found) => Ok(Some(found)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(AuthError::Backend(e.to_string())),
        }
    }

    fn normalize(email: &str) -> String {
        email.trim().to_lowercase()
    }
}

#[async_trait]
impl AuthService for LocalAuthService {
    async fn sign_in(&self, email: &str, password: &str) -> Result<User, AuthError> {
        let email = Self::normalize(email);
        if !validation::is_valid_email(&email) {
            return Err(AuthError::InvalidEmail);
        }

        let (stored_hash, salt_hex, verified) = self.find_user(&email)?.ok_or(AuthError::UserNotFound)?;
        let salt = hex::decode(&salt_hex).map_err(|e| AuthError::Backend(e.to_string()))?;
        let stored = hex::decode(&stored_hash).map_err(|e| AuthError::Backend(e.to_string()))?;
        let computed = Self::hash_blocking(password, salt).await?;
        if !bool::from(computed.as_slice().ct_eq(stored.as_slice())) {
            return Err(AuthError::InvalidCredentials);
        }

        self.session
            .set(SESSION_KEY, &email)
            .map_err(|e| AuthError::Backend(e.to_string()))?;
        info!(%email, "signed in");
        Ok(User { email, verified })
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<User, AuthError> {
        let email = Self::normalize(email);
        if !validation::is_valid_email(&email) {
            return Err(AuthError::InvalidEmail);
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::WeakPassword);
        }
        if self.find_user(&email)?.is_some() {
            return Err(AuthError::EmailInUse);
        }

        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let hash = hex::encode(Self::hash_blocking(password, salt.to_vec()).await?);
        let now = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();

        let conn = self.db.lock().map_err(|e| AuthError::Backend(e.to_string()))?;
        conn.execute(
            "INSERT INTO users (email, password_hash, salt, verified, created_at)
             VALUES (?1, ?2, ?3, 1, ?4)",
            rusqlite::params![email, hash, hex::encode(salt), now],
        )
        .map_err(|e| AuthError::Backend(e.to_string()))?;

        info!(%email, "account created");
        Ok(User { email, verified: true })
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        self.session
            .remove(SESSION_KEY)
            .map_err(|e| AuthError::Backend(e.to_string()))
    }

    async fn send_password_reset(&self, email: &str) -> Result<(), AuthError> {
        let email = Self::normalize(email);
        if !validation::is_valid_email(&email) {
            return Err(AuthError::InvalidEmail);
        }
        if self.find_user(&email)?.is_none() {
            return Err(AuthError::UserNotFound);
        }
        // No mail transport offline; the request is only recorded.
        info!(%email, "password reset requested");
        Ok(())
    }

    async fn send_email_verification(&self) -> Result<(), AuthError> {
        let user = self.current_user().await.ok_or(AuthError::NotSignedIn)?;
        info!(email = %user.email, "verification requested for local account");
        Ok(())
    }

    async fn current_user(&self) -> Option<User> {
        let email = match self.session.get(SESSION_KEY) {
            Ok(email) => email?,
            Err(e) => {
                warn!("failed to read session: {}", e);
                return None;
            }
        };
        match self.find_user(&email) {
            Ok(Some((_, _, verified))) => Some(User { email, verified }),
            Ok(None) => None,
            Err(e) => {
                warn!("failed to load current user: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteKeyValueStore;

    fn service() -> LocalAuthService {
        let db = Database::open_in_memory().unwrap();
        let kv = Arc::new(SqliteKeyValueStore::new(db.clone()));
        LocalAuthService::new(db, kv)
    }

    #[tokio::test]
    async fn sign_up_then_sign_in() {
        let auth = service();
        let user = auth.sign_up("Jane@Example.com ", "Secret123!").await.unwrap();
        assert_eq!(user.email, "jane@example.com");
        assert!(auth.current_user().await.is_none());

        let user = auth.sign_in("jane@example.com", "Secret123!").await.unwrap();
        assert!(user.verified);
        assert_eq!(auth.current_user().await, Some(user));

        auth.sign_out().await.unwrap();
        assert!(auth.current_user().await.is_none());
    }

    #[tokio::test]
    async fn sign_in_failures_map_to_provider_errors() {
        let auth = service();
        auth.sign_up("jane@example.com", "Secret123!").await.unwrap();

        assert_eq!(
            auth.sign_in("jane@example.com", "wrong-pass").await.unwrap_err(),
            AuthError::InvalidCredentials
        );
        assert_eq!(
            auth.sign_in("bob@example.com", "Secret123!").await.unwrap_err(),
            AuthError::UserNotFound
        );
        assert_eq!(auth.sign_in("bob", "Secret123!").await.unwrap_err(), AuthError::InvalidEmail);
    }

    #[tokio::test]
    async fn stored_hash_is_salted_argon2_output() {
        let auth = service();
        auth.sign_up("jane@example.com", "Secret123!").await.unwrap();
        let (stored, salt_hex, _) = auth.find_user("jane@example.com").unwrap().unwrap();

        let salt = hex::decode(salt_hex).unwrap();
        assert_eq!(salt.len(), SALT_LEN);
        let expected = LocalAuthService::hash_password(b"Secret123!", &salt).unwrap();
        assert_eq!(stored, hex::encode(expected));

        // Same password, different salt, different hash.
        auth.sign_up("john@example.com", "Secret123!").await.unwrap();
        let (other, _, _) = auth.find_user("john@example.com").unwrap().unwrap();
        assert_ne!(stored, other);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn hashing_leaves_the_runtime_free() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let auth = service();
        let ticks = Arc::new(AtomicUsize::new(0));
        let ticker = tokio::spawn({
            let ticks = ticks.clone();
            async move {
                loop {
                    ticks.fetch_add(1, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                }
            }
        });

        auth.sign_up("jane@example.com", "Secret123!").await.unwrap();
        assert!(ticks.load(Ordering::SeqCst) > 0);
        ticker.abort();
    }

    #[tokio::test]
    async fn sign_up_rejects_duplicates_and_short_passwords() {
        let auth = service();
        assert_eq!(auth.sign_up("jane@example.com", "123").await.unwrap_err(), AuthError::WeakPassword);
        auth.sign_up("jane@example.com", "Secret123!").await.unwrap();
        assert_eq!(
            auth.sign_up("JANE@example.com", "Other123!").await.unwrap_err(),
            AuthError::EmailInUse
        );
    }

    #[tokio::test]
    async fn password_reset_requires_known_account() {
        let auth = service();
        auth.sign_up("jane@example.com", "Secret123!").await.unwrap();
        assert!(auth.send_password_reset("jane@example.com").await.is_ok());
        assert_eq!(
            auth.send_password_reset("nobody@example.com").await.unwrap_err(),
            AuthError::UserNotFound
        );
        assert_eq!(auth.send_email_verification().await.unwrap_err(), AuthError::NotSignedIn);
    }
}
