mod support;

use std::sync::Arc;

use anyhow::Result;
use serde_json::json;
use support::{caller, fields, service_with, written_password, StaticSource, TEMPLATE};
use tempfile::TempDir;
use userlist_vault::hashing;
use userlist_vault::options::OptionsUpdate;
use userlist_vault::storage::MemoryStorage;
use userlist_vault::userlist::DefaultFileSource;
use userlist_vault::{
    CallerIdentity, CredentialService, Error, ReadMode, SecretDurability,
};

fn memory_service(source: Arc<StaticSource>) -> CredentialService {
    service_with(
        Arc::new(MemoryStorage::new()),
        source,
        SecretDurability::FollowOptions,
    )
}

#[tokio::test]
async fn output_mode_returns_sha256_hash_without_touching_files() -> Result<()> {
    let source = Arc::new(StaticSource::new(TEMPLATE));
    let service = memory_service(source.clone());
    let caller = caller();

    service
        .set_options(
            &caller,
            &OptionsUpdate::new()
                .output_enabled(true)
                .hash_algorithm("sha256"),
        )
        .await?;

    let outcome = service
        .write_secret(&caller, "db1", fields(json!({"pw": "hunter2"})))
        .await?;

    let token = outcome.token.expect("hash returned when output is enabled");
    assert!(token.starts_with("$5$"));
    assert!(hashing::verify("hunter2", &token));
    assert_eq!(source.fetches(), 0);

    let stored = service.read_secret(&caller, "db1", ReadMode::Cached).await?;
    assert_eq!(stored, Some(fields(json!({"pw": "hunter2"}))));

    Ok(())
}

#[tokio::test]
async fn sha512_and_fixed_salt_are_applied() -> Result<()> {
    let service = memory_service(Arc::new(StaticSource::new(TEMPLATE)));
    let caller = caller();

    service
        .set_options(
            &caller,
            &OptionsUpdate::new().hash_algorithm("sha512").salt("pepper"),
        )
        .await?;

    let outcome = service
        .write_secret(&caller, "db1", fields(json!({"password": "s3cret", "user": "bob"})))
        .await?;
    let token = outcome.token.expect("hash returned");
    assert!(token.starts_with("$6$pepper$"));
    assert!(hashing::verify("s3cret", &token));

    Ok(())
}

#[tokio::test]
async fn write_before_options_fails() -> Result<()> {
    let service = memory_service(Arc::new(StaticSource::new(TEMPLATE)));
    let caller = caller();

    let err = service
        .write_secret(&caller, "db1", fields(json!({"pw": "hunter2"})))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::OptionsNotConfigured));
    assert_eq!(service.read_secret(&caller, "db1", ReadMode::Cached).await?, None);

    Ok(())
}

#[tokio::test]
async fn empty_payload_is_rejected() -> Result<()> {
    let service = memory_service(Arc::new(StaticSource::new(TEMPLATE)));
    let caller = caller();
    service.set_options(&caller, &OptionsUpdate::new()).await?;

    let err = service
        .write_secret(&caller, "db1", fields(json!({})))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::EmptyPayload));

    Ok(())
}

#[tokio::test]
async fn ambiguous_payload_is_rejected() -> Result<()> {
    let service = memory_service(Arc::new(StaticSource::new(TEMPLATE)));
    let caller = caller();
    service.set_options(&caller, &OptionsUpdate::new()).await?;

    let err = service
        .write_secret(&caller, "db1", fields(json!({"a": "1", "b": "2"})))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert_eq!(service.read_secret(&caller, "db1", ReadMode::Cached).await?, None);

    Ok(())
}

#[tokio::test]
async fn every_operation_requires_a_caller() -> Result<()> {
    let service = memory_service(Arc::new(StaticSource::new(TEMPLATE)));
    let anonymous = CallerIdentity::new("");

    assert!(matches!(
        service.read_secret(&anonymous, "db1", ReadMode::Cached).await,
        Err(Error::Unauthenticated)
    ));
    assert!(matches!(
        service
            .write_secret(&anonymous, "db1", fields(json!({"pw": "x"})))
            .await,
        Err(Error::Unauthenticated)
    ));
    assert!(matches!(
        service.delete_secret(&anonymous, "db1").await,
        Err(Error::Unauthenticated)
    ));
    assert!(matches!(
        service.read_options(&anonymous),
        Err(Error::Unauthenticated)
    ));
    assert!(matches!(
        service.set_options(&anonymous, &OptionsUpdate::new()).await,
        Err(Error::Unauthenticated)
    ));
    assert!(matches!(
        service.delete_options(&anonymous, None).await,
        Err(Error::Unauthenticated)
    ));

    Ok(())
}

#[tokio::test]
async fn second_write_wins() -> Result<()> {
    let service = memory_service(Arc::new(StaticSource::new(TEMPLATE)));
    let caller = caller();
    service.set_options(&caller, &OptionsUpdate::new()).await?;

    service
        .write_secret(&caller, "db1", fields(json!({"pw": "first"})))
        .await?;
    for _ in 0..2 {
        service
            .write_secret(&caller, "db1", fields(json!({"pw": "second", "port": 5432})))
            .await?;
    }

    let stored = service.read_secret(&caller, "db1", ReadMode::Cached).await?;
    assert_eq!(stored, Some(fields(json!({"pw": "second", "port": 5432}))));

    Ok(())
}

#[tokio::test]
async fn secrets_are_scoped_per_caller() -> Result<()> {
    let service = memory_service(Arc::new(StaticSource::new(TEMPLATE)));
    let alice = CallerIdentity::new("alice");
    let bob = CallerIdentity::new("bob");
    service.set_options(&alice, &OptionsUpdate::new()).await?;

    service
        .write_secret(&alice, "db1", fields(json!({"pw": "a"})))
        .await?;

    assert_eq!(service.read_secret(&bob, "db1", ReadMode::Cached).await?, None);
    service.delete_secret(&bob, "db1").await?;
    assert!(service
        .read_secret(&alice, "db1", ReadMode::Cached)
        .await?
        .is_some());

    Ok(())
}

#[tokio::test]
async fn delete_secret_removes_payload() -> Result<()> {
    let service = memory_service(Arc::new(StaticSource::new(TEMPLATE)));
    let caller = caller();
    service.set_options(&caller, &OptionsUpdate::new()).await?;
    service
        .write_secret(&caller, "db1", fields(json!({"pw": "x"})))
        .await?;

    service.delete_secret(&caller, "db1").await?;
    assert_eq!(service.read_secret(&caller, "db1", ReadMode::Cached).await?, None);
    service.delete_secret(&caller, "db1").await?;

    Ok(())
}

#[tokio::test]
async fn setting_remote_clears_local_and_output() -> Result<()> {
    let service = memory_service(Arc::new(StaticSource::new(TEMPLATE)));
    let caller = caller();

    service
        .set_options(
            &caller,
            &OptionsUpdate::new()
                .output_enabled(true)
                .local_source("/etc/haproxy/users.cfg"),
        )
        .await?;
    service
        .set_options(&caller, &OptionsUpdate::new().remote_source("http://x"))
        .await?;

    let options = service.read_options(&caller)?.expect("options set");
    assert_eq!(options.local_source, None);
    assert_eq!(options.remote_source.as_deref(), Some("http://x"));
    assert!(!options.output_enabled);

    Ok(())
}

#[tokio::test]
async fn delete_one_option_field_keeps_others() -> Result<()> {
    let service = memory_service(Arc::new(StaticSource::new(TEMPLATE)));
    let caller = caller();

    service
        .set_options(
            &caller,
            &OptionsUpdate::new().hash_algorithm("sha512").persist(true),
        )
        .await?;
    service.delete_options(&caller, Some("hashAlgorithm")).await?;

    let options = service.read_options(&caller)?.expect("options kept");
    assert_eq!(options.hash_algorithm, None);
    assert!(options.persist);

    service.delete_options(&caller, None).await?;
    assert_eq!(service.read_options(&caller)?, None);

    Ok(())
}

#[tokio::test]
async fn options_requests_are_validated() -> Result<()> {
    let service = memory_service(Arc::new(StaticSource::new(TEMPLATE)));
    let caller = caller();

    let err = service
        .set_options_json(&caller, json!({"outputEnabled": true, "colour": "blue"}))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    let err = service
        .set_options_json(&caller, json!({"hashAlgorithm": "md5"}))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnsupportedAlgorithm(_)));

    let err = service
        .delete_options(&caller, Some("colour"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    assert_eq!(service.read_options(&caller)?, None);

    let record = service
        .set_options_json(&caller, json!({"crypter": "sha512", "persist": false}))
        .await?;
    assert_eq!(record.effective_algorithm().as_str(), "sha512");

    Ok(())
}

#[tokio::test]
async fn local_source_patches_target_instead_of_returning_hash() -> Result<()> {
    let dir = TempDir::new()?;
    let template = dir.path().join("template.cfg");
    let target = dir.path().join("users.cfg");
    std::fs::write(&template, TEMPLATE)?;

    let service = service_with(
        Arc::new(MemoryStorage::new()),
        Arc::new(DefaultFileSource::new()),
        SecretDurability::FollowOptions,
    );
    let caller = caller();
    service
        .set_options(
            &caller,
            &OptionsUpdate::new()
                .local_source(&template)
                .target_path(&target)
                .hash_algorithm("sha512"),
        )
        .await?;

    let outcome = service
        .write_secret(&caller, "lb/admin", fields(json!({"password": "topsecret"})))
        .await?;
    assert_eq!(outcome.token, None);

    let written = std::fs::read_to_string(&target)?;
    let hash = written_password(&written);
    assert!(hash.starts_with("$6$"));
    assert!(hashing::verify("topsecret", &hash));
    assert!(written.starts_with("global\n  log stdout local0\n\nuserlist lb\n"));
    assert!(written.ends_with(" groups ops\n"));
    assert_eq!(std::fs::read_to_string(&template)?, TEMPLATE);

    let stored = service.read_secret(&caller, "lb/admin", ReadMode::Cached).await?;
    assert_eq!(stored, Some(fields(json!({"password": "topsecret"}))));

    Ok(())
}

#[tokio::test]
async fn missing_target_aborts_before_storing() -> Result<()> {
    let source = Arc::new(StaticSource::new(TEMPLATE));
    let service = memory_service(source.clone());
    let caller = caller();
    service
        .set_options(&caller, &OptionsUpdate::new().remote_source("http://x"))
        .await?;

    let err = service
        .write_secret(&caller, "db1", fields(json!({"pw": "x"})))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MissingOption { field: "targetPath" }));
    assert_eq!(source.fetches(), 0);
    assert_eq!(service.read_secret(&caller, "db1", ReadMode::Cached).await?, None);

    Ok(())
}

#[tokio::test]
async fn output_disabled_without_source_is_reported() -> Result<()> {
    let service = memory_service(Arc::new(StaticSource::new(TEMPLATE)));
    let caller = caller();
    service
        .set_options(
            &caller,
            &OptionsUpdate::new()
                .output_enabled(false)
                .target_path("/tmp/never-written.cfg"),
        )
        .await?;

    let err = service
        .write_secret(&caller, "db1", fields(json!({"pw": "x"})))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MissingOption { field: "remoteSource" }));

    Ok(())
}

#[tokio::test]
async fn malformed_template_aborts_the_write() -> Result<()> {
    let dir = TempDir::new()?;
    let target = dir.path().join("users.cfg");
    let source = Arc::new(StaticSource::new("userlist lb\n  user admin\n"));
    let service = memory_service(source.clone());
    let caller = caller();
    service
        .set_options(
            &caller,
            &OptionsUpdate::new()
                .remote_source("http://x")
                .target_path(&target),
        )
        .await?;

    let err = service
        .write_secret(&caller, "db1", fields(json!({"pw": "x"})))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("password field missing"));
    assert_eq!(source.fetches(), 1);
    assert!(!target.exists());
    assert_eq!(service.read_secret(&caller, "db1", ReadMode::Cached).await?, None);

    Ok(())
}

#[tokio::test]
async fn invalid_paths_are_rejected() -> Result<()> {
    let service = memory_service(Arc::new(StaticSource::new(TEMPLATE)));
    let caller = caller();
    service.set_options(&caller, &OptionsUpdate::new()).await?;

    for path in ["", "../escape", "a//b", "/abs"] {
        let err = service
            .write_secret(&caller, path, fields(json!({"pw": "x"})))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)), "{path:?}");
    }

    Ok(())
}

#[tokio::test]
async fn concurrent_writers_do_not_lose_updates() -> Result<()> {
    let service = Arc::new(memory_service(Arc::new(StaticSource::new(TEMPLATE))));
    service.set_options(&caller(), &OptionsUpdate::new()).await?;

    let mut handles = Vec::new();
    for i in 0..16 {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            let caller = caller();
            service
                .write_secret(&caller, &format!("db{i}"), fields(json!({"pw": format!("pw{i}")})))
                .await
        }));
    }
    for handle in handles {
        handle.await??;
    }

    for i in 0..16 {
        let stored = service
            .read_secret(&caller(), &format!("db{i}"), ReadMode::Cached)
            .await?;
        assert_eq!(stored, Some(fields(json!({"pw": format!("pw{i}")}))));
    }

    Ok(())
}
