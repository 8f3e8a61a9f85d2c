use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use pretty_assertions::assert_eq;
use waystone::{FailureKind, LocalWorld, RunEvent, RunStatus};

use crate::support::helpers::{builder, drive, event_types, init_test_tracing};
use crate::support::workflows::{Add, Explode, Fickle, Pair, Sum, Toggle};

#[tokio::test]
async fn sequential_steps_execute_once_each() -> anyhow::Result<()> {
    init_test_tracing();
    let world = LocalWorld::new();
    let add = Add::default();
    let engine = builder(&world)
        .workflow(Sum)
        .step(add.clone())
        .build_engine()?;

    let handle = engine.service.start::<Sum>(&vec![1, 2, 3]).await?;
    assert_eq!(drive(&engine, &handle).await?, RunStatus::Completed);
    assert_eq!(handle.return_value().await?, 6);

    // Four turns replayed the same log; each call still ran once.
    assert_eq!(add.calls.get(), 3);
    assert_eq!(
        event_types(&handle.events().await?),
        vec![
            "RunCreated",
            "RunStarted",
            "StepScheduled",
            "StepCompleted",
            "StepScheduled",
            "StepCompleted",
            "StepScheduled",
            "StepCompleted",
            "RunCompleted",
        ]
    );
    Ok(())
}

#[tokio::test]
async fn concurrent_calls_are_numbered_in_call_order() -> anyhow::Result<()> {
    init_test_tracing();
    let world = LocalWorld::new();
    let engine = builder(&world)
        .workflow(Pair)
        .step(Add::default())
        .build_engine()?;

    let handle = engine.service.start::<Pair>(&10).await?;
    drive(&engine, &handle).await?;

    assert_eq!(handle.return_value().await?, (11, 12));
    let scheduled: Vec<(u32, serde_json::Value)> = handle
        .events()
        .await?
        .into_iter()
        .filter_map(|e| match e.event {
            RunEvent::StepScheduled { seq, input, .. } => Some((seq, input)),
            _ => None,
        })
        .collect();
    assert_eq!(
        scheduled,
        vec![(0, serde_json::json!([10, 1])), (1, serde_json::json!([10, 2]))]
    );
    Ok(())
}

#[tokio::test]
async fn restarted_runtime_resumes_from_the_log() -> anyhow::Result<()> {
    init_test_tracing();
    let world = LocalWorld::new();
    let first_add = Add::default();
    let first = builder(&world)
        .workflow(Sum)
        .step(first_add.clone())
        .build_engine()?;
    let handle = first.service.start::<Sum>(&vec![5, 7]).await?;

    // One turn and one step, then the process "dies".
    assert!(first.runtime.process_next().await?);
    assert!(first.runtime.process_next().await?);
    drop(first);
    assert_eq!(first_add.calls.get(), 1);

    let second_add = Add::default();
    let second = builder(&world)
        .workflow(Sum)
        .step(second_add.clone())
        .build_engine()?;
    let resumed = second.service.get_run(handle.run_id()).await?;
    assert_eq!(drive(&second, &resumed).await?, RunStatus::Completed);

    assert_eq!(handle.return_value().await?, 12);
    assert_eq!(second_add.calls.get(), 1);
    Ok(())
}

#[tokio::test]
async fn diverging_body_fails_the_run() -> anyhow::Result<()> {
    init_test_tracing();
    let world = LocalWorld::new();
    let toggle = Toggle::default();
    let engine = builder(&world)
        .workflow(Fickle {
            flag: Arc::clone(&toggle.flag),
        })
        .step(toggle)
        .build_engine()?;

    let handle = engine.service.start::<Fickle>(&()).await?;
    assert_eq!(drive(&engine, &handle).await?, RunStatus::Failed);

    let error = handle.record().await?.error.expect("failure recorded");
    assert_eq!(error.kind, FailureKind::ReplayDivergence);
    assert!(error.message.contains("call 0"), "{}", error.message);
    assert!(error.message.contains("sleep"), "{}", error.message);
    Ok(())
}

#[tokio::test]
async fn panicking_body_fails_the_run() -> anyhow::Result<()> {
    let world = LocalWorld::new();
    let engine = builder(&world).workflow(Explode).build_engine()?;

    let handle = engine.service.start::<Explode>(&()).await?;
    assert_eq!(drive(&engine, &handle).await?, RunStatus::Failed);

    let error = handle.record().await?.error.expect("failure recorded");
    assert_eq!(error.kind, FailureKind::Workflow);
    assert!(error.message.contains("boom"), "{}", error.message);
    assert!(matches!(
        handle.return_value().await,
        Err(waystone::Error::RunFailed { .. })
    ));
    Ok(())
}
