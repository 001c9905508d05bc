//! Concurrent writers within one process

mod common;

use anyhow::Result;
use common::{create_test_setup, publish_payload, TestSetup};
use registry_store::{NewUser, StoreError};
use std::sync::Arc;

fn shared(setup: TestSetup) -> (tempfile::TempDir, Arc<registry_store::Registry>) {
    (setup.temp_dir, Arc::new(setup.registry))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_version_publishes_exactly_once() -> Result<()> {
    let (_temp_dir, registry) = shared(create_test_setup()?);

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                registry
                    .publish_payload(publish_payload("foo", "1.0.0", &format!("user{}", i)))
                    .await
            })
        })
        .collect();

    let mut succeeded = 0;
    let mut conflicts = 0;
    for task in tasks {
        match task.await? {
            Ok(_) => succeeded += 1,
            Err(StoreError::AlreadyExists(_)) => conflicts += 1,
            Err(e) => return Err(e.into()),
        }
    }
    assert_eq!(succeeded, 1);
    assert_eq!(conflicts, 7);

    let doc = registry.local_package("foo").await?.expect("foo should exist");
    assert_eq!(doc.versions.len(), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_publishes_lose_no_updates() -> Result<()> {
    let (_temp_dir, registry) = shared(create_test_setup()?);

    let tasks: Vec<_> = (0..10)
        .map(|i| {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                // Half share one package, half each get their own
                let name = if i % 2 == 0 { "shared".to_string() } else { format!("own-{}", i) };
                registry
                    .publish_payload(publish_payload(&name, &format!("1.0.{}", i), "alice"))
                    .await
            })
        })
        .collect();
    for task in tasks {
        task.await??;
    }

    let shared_doc = registry.local_package("shared").await?.expect("shared should exist");
    assert_eq!(shared_doc.versions.len(), 5);
    assert_eq!(shared_doc.latest(), Some("1.0.8"));
    assert_eq!(registry.metadata().package_names().await?.len(), 6);

    // The flushed file agrees with the cache
    registry.metadata().invalidate().await;
    let reloaded = registry.local_package("shared").await?.expect("shared should reload");
    assert_eq!(reloaded.versions.len(), 5);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_username_registers_once() -> Result<()> {
    let (_temp_dir, registry) = shared(create_test_setup()?);

    let tasks: Vec<_> = (0..4)
        .map(|i| {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                registry
                    .register_user(NewUser::new("alice", "alice@example.com", format!("pw{}", i)))
                    .await
            })
        })
        .collect();

    let mut succeeded = 0;
    for task in tasks {
        match task.await? {
            Ok(_) => succeeded += 1,
            Err(e) => assert!(e.is_conflict(), "unexpected error: {e}"),
        }
    }
    assert_eq!(succeeded, 1);
    Ok(())
}
