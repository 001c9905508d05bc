//! Registration, authorization and profile updates

mod common;

use anyhow::Result;
use common::{create_test_setup, STALE_AFTER};
use registry_store::{NewUser, StoreError, UserUpdate};
use std::time::Duration;

fn alice() -> NewUser {
    NewUser::new("alice", "alice@example.com", "secret")
}

#[tokio::test]
async fn test_authorize_checks_password() -> Result<()> {
    let setup = create_test_setup()?;
    let registry = &setup.registry;
    registry.register_user(alice()).await?;

    let profile = registry
        .authorize("alice", "secret")
        .await?
        .expect("correct password should authorize");
    assert_eq!(profile.name, "alice");
    assert_eq!(profile.email, "alice@example.com");

    assert!(registry.authorize("alice", "wrong").await?.is_none());
    assert!(registry.authorize("alice", "").await?.is_none());
    assert!(registry.authorize("nobody", "secret").await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_plaintext_never_persisted() -> Result<()> {
    let setup = create_test_setup()?;
    setup.registry.register_user(alice()).await?;

    let stored = std::fs::read_to_string(&setup.config.storage.users_path)?;
    assert!(stored.contains("alice@example.com"));
    assert!(stored.contains("pbkdf2-sha256$"));
    assert!(!stored.contains("\"secret\""));
    Ok(())
}

#[tokio::test]
async fn test_duplicate_registration_is_conflict() -> Result<()> {
    let setup = create_test_setup()?;
    let registry = &setup.registry;
    registry.register_user(alice()).await?;

    let err = registry
        .register_user(NewUser::new("alice", "other@example.com", "hunter2"))
        .await
        .expect_err("second registration should conflict");
    assert!(matches!(err, StoreError::AlreadyExists(_)));

    // The original credentials still apply
    assert!(registry.authorize("alice", "secret").await?.is_some());
    assert!(registry.authorize("alice", "hunter2").await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_registration_records_date() -> Result<()> {
    let setup = create_test_setup()?;
    let profile = setup.registry.register_user(alice()).await?;
    assert_eq!(profile.date, Some(registry_store::Clock::now(setup.clock.as_ref())));
    Ok(())
}

#[tokio::test]
async fn test_update_changes_password_and_email() -> Result<()> {
    let setup = create_test_setup()?;
    let registry = &setup.registry;
    registry.register_user(alice()).await?;

    let updated = registry
        .update_user(
            "alice",
            UserUpdate {
                email: Some("alice@new.example".to_string()),
                password: Some("rotated".to_string()),
                ..Default::default()
            },
        )
        .await?
        .expect("alice should exist");
    assert_eq!(updated.email, "alice@new.example");

    assert!(registry.authorize("alice", "secret").await?.is_none());
    assert!(registry.authorize("alice", "rotated").await?.is_some());
    Ok(())
}

#[tokio::test]
async fn test_update_unknown_user_is_absent() -> Result<()> {
    let setup = create_test_setup()?;
    let result = setup
        .registry
        .update_user("ghost", UserUpdate::default())
        .await?;
    assert!(result.is_none());
    Ok(())
}

#[tokio::test]
async fn test_update_rejects_empty_password() -> Result<()> {
    let setup = create_test_setup()?;
    let registry = &setup.registry;
    registry.register_user(alice()).await?;

    let err = registry
        .update_user(
            "alice",
            UserUpdate {
                password: Some(String::new()),
                ..Default::default()
            },
        )
        .await
        .expect_err("empty password should be rejected");
    assert_eq!(err.error_code().http_status(), 400);
    assert!(registry.authorize("alice", "secret").await?.is_some());
    Ok(())
}

#[tokio::test]
async fn test_other_process_sees_user_after_window() -> Result<()> {
    let setup = create_test_setup()?;
    let other = setup.sibling()?;

    assert!(other.user("alice").await?.is_none());
    setup.registry.register_user(alice()).await?;
    assert!(other.user("alice").await?.is_none());

    setup.clock.advance(STALE_AFTER + Duration::from_millis(1));
    assert!(other.authorize("alice", "secret").await?.is_some());
    Ok(())
}
