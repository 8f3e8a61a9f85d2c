use pretty_assertions::assert_eq;
use serde_json::json;
use waystone::{Error, FailureKind, HookDelivery, LocalWorld, RunQueryStore, RunStatus};

use crate::support::helpers::{builder, drive, event_types, init_test_tracing};
use crate::support::workflows::Approvals;

#[tokio::test]
async fn hook_events_resume_a_restarted_run() -> anyhow::Result<()> {
    init_test_tracing();
    let world = LocalWorld::new();
    let first = builder(&world).workflow(Approvals).build_engine()?;
    let handle = first
        .service
        .start::<Approvals>(&"order-42".to_string())
        .await?;
    first.runtime.tick().await?;
    assert_eq!(handle.status().await?, RunStatus::Suspended);
    drop(first);

    let second = builder(&world).workflow(Approvals).build_engine()?;
    let receipt = second
        .service
        .resume_hook("order-42", HookDelivery::event(json!({ "amount": 5 })))
        .await?;
    assert_eq!(&receipt.run_id, handle.run_id());
    assert_eq!(receipt.index, 0);
    second.runtime.tick().await?;
    assert_eq!(handle.status().await?, RunStatus::Suspended);

    second
        .service
        .resume_hook("order-42", HookDelivery::terminal(json!({ "amount": 7 })))
        .await?;
    assert_eq!(drive(&second, &handle).await?, RunStatus::Completed);
    assert_eq!(handle.return_value().await?, 12);

    // Finishing the run releases its token.
    assert!(world.find_hook("order-42").await?.is_none());
    let types = event_types(&handle.events().await?);
    assert_eq!(types.iter().filter(|t| **t == "HookReceived").count(), 2);
    assert_eq!(types[types.len() - 2..], ["HookDisposed", "RunCompleted"]);
    Ok(())
}

#[tokio::test]
async fn invalid_payloads_are_rejected_without_recording() -> anyhow::Result<()> {
    let world = LocalWorld::new();
    let engine = builder(&world).workflow(Approvals).build_engine()?;
    let handle = engine
        .service
        .start::<Approvals>(&"order-7".to_string())
        .await?;
    engine.runtime.tick().await?;
    let before = handle.events().await?.len();

    let err = engine
        .service
        .resume_hook("order-7", HookDelivery::event(json!({ "amount": "lots" })))
        .await
        .unwrap_err();
    match err {
        Error::HookValidation { token, errors } => {
            assert_eq!(token, "order-7");
            assert!(!errors.is_empty());
        }
        other => panic!("expected validation error, got {other}"),
    }
    assert_eq!(handle.events().await?.len(), before);

    // The hook stays open for a valid payload.
    engine
        .service
        .resume_hook("order-7", HookDelivery::terminal(json!({ "amount": 1 })))
        .await?;
    drive(&engine, &handle).await?;
    assert_eq!(handle.return_value().await?, 1);
    Ok(())
}

#[tokio::test]
async fn terminal_events_close_the_hook() -> anyhow::Result<()> {
    let world = LocalWorld::new();
    let engine = builder(&world).workflow(Approvals).build_engine()?;
    let handle = engine
        .service
        .start::<Approvals>(&"order-9".to_string())
        .await?;
    engine.runtime.tick().await?;

    engine
        .service
        .resume_hook("order-9", HookDelivery::terminal(json!({ "amount": 2 })))
        .await?;
    let err = engine
        .service
        .resume_hook("order-9", HookDelivery::event(json!({ "amount": 3 })))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::HookClosed(ref token) if token == "order-9"), "{err}");

    drive(&engine, &handle).await?;
    assert_eq!(handle.return_value().await?, 2);
    let err = engine
        .service
        .resume_hook("order-9", HookDelivery::event(json!({ "amount": 3 })))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::HookNotFound(_)), "{err}");
    Ok(())
}

#[tokio::test]
async fn tokens_are_unique_across_runs() -> anyhow::Result<()> {
    init_test_tracing();
    let world = LocalWorld::new();
    let engine = builder(&world).workflow(Approvals).build_engine()?;

    let holder = engine
        .service
        .start::<Approvals>(&"shared".to_string())
        .await?;
    engine.runtime.tick().await?;
    let contender = engine
        .service
        .start::<Approvals>(&"shared".to_string())
        .await?;
    assert_eq!(drive(&engine, &contender).await?, RunStatus::Failed);

    let error = contender.record().await?.error.expect("failure recorded");
    assert_eq!(error.kind, FailureKind::Fatal);
    assert!(error.message.contains("already in use"), "{}", error.message);

    assert_eq!(holder.status().await?, RunStatus::Suspended);
    let hook = world.find_hook("shared").await?.expect("token still held");
    assert_eq!(&hook.run_id, holder.run_id());
    Ok(())
}

#[tokio::test]
async fn unknown_tokens_are_not_found() -> anyhow::Result<()> {
    let world = LocalWorld::new();
    let engine = builder(&world).workflow(Approvals).build_engine()?;

    let err = engine
        .service
        .resume_hook("nobody", HookDelivery::event(json!({ "amount": 1 })))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::HookNotFound(ref token) if token == "nobody"));
    Ok(())
}
