use smarttask::auth::{AuthService, LocalAuthService};
use smarttask::config::SecurityConfig;
use smarttask::guard::{AttemptGuard, LoginFlow, LoginOutcome, ManualClock, RegisterOutcome};
use smarttask::storage::SqliteKeyValueStore;
use smarttask::Database;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const START: i64 = 1_714_550_400_000;

fn flow(db: &Database, clock: Arc<ManualClock>) -> LoginFlow {
    let kv = Arc::new(SqliteKeyValueStore::new(db.clone()));
    let auth = Arc::new(LocalAuthService::new(db.clone(), kv.clone()));
    let guard = AttemptGuard::load(kv, &SecurityConfig::default(), clock);
    LoginFlow::new(auth, guard)
}

#[tokio::test]
async fn lockout_persists_across_restarts_and_expires() {
    let dir = TempDir::new().unwrap();
    let db = Database::new(&dir.path().join("app.db").to_string_lossy()).unwrap();
    let clock = Arc::new(ManualClock::new(START));

    let first = flow(&db, clock.clone());
    let registered = first.register("ada@example.com", "Correct#Horse9", "Correct#Horse9").await;
    assert!(matches!(registered, RegisterOutcome::Registered(_)), "{:?}", registered);

    for _ in 0..4 {
        let outcome = first.login("ada@example.com", "wrong-password").await;
        assert!(matches!(outcome, LoginOutcome::Failed { .. }), "{:?}", outcome);
    }
    let outcome = first.login("ada@example.com", "wrong-password").await;
    assert!(matches!(outcome, LoginOutcome::Locked { .. }), "{:?}", outcome);
    drop(first);

    // A fresh process sees the same lockout, even with the right password.
    clock.advance(Duration::from_secs(5 * 60));
    let second = flow(&db, clock.clone());
    match second.login("ada@example.com", "Correct#Horse9").await {
        LoginOutcome::Locked { remaining_secs, message } => {
            assert_eq!(remaining_secs, 10 * 60);
            assert!(message.contains("10 minutes"), "{}", message);
        }
        other => panic!("expected lockout, got {:?}", other),
    }
    drop(second);

    clock.advance(Duration::from_secs(10 * 60));
    let third = flow(&db, clock);
    assert!(!third.lockout_status().is_locked());
    let outcome = third.login("ada@example.com", "Correct#Horse9").await;
    assert!(matches!(outcome, LoginOutcome::SignedIn(_)), "{:?}", outcome);
    assert_eq!(third.guard().state().attempts, 0);
}

#[tokio::test]
async fn signed_in_user_is_remembered_until_logout() {
    let dir = TempDir::new().unwrap();
    let db = Database::new(&dir.path().join("app.db").to_string_lossy()).unwrap();
    let clock = Arc::new(ManualClock::new(START));

    let login = flow(&db, clock.clone());
    login.register("grace@example.com", "Navy&Cobol1959", "Navy&Cobol1959").await;
    let outcome = login.login("grace@example.com", "Navy&Cobol1959").await;
    assert!(matches!(outcome, LoginOutcome::SignedIn(_)), "{:?}", outcome);

    let kv = Arc::new(SqliteKeyValueStore::new(db.clone()));
    let auth = LocalAuthService::new(db.clone(), kv);
    assert_eq!(auth.current_user().await.map(|u| u.email).as_deref(), Some("grace@example.com"));

    login.logout().await.unwrap();
    assert!(auth.current_user().await.is_none());
}
