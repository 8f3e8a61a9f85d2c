use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use waystone::{
    LocalWorld, OutgoingMessage, Queue, RunStatus, RuntimeConfig, StepFunction, WorkflowFunction,
};

use crate::support::helpers::{builder, drive, event_types, init_test_tracing, test_runtime_config};
use crate::support::workflows::{Add, Sum};

#[tokio::test]
async fn duplicate_deliveries_do_not_rerun_steps() -> anyhow::Result<()> {
    init_test_tracing();
    let world = LocalWorld::new();
    let add = Add::default();
    let engine = builder(&world)
        .workflow(Sum)
        .step(add.clone())
        .build_engine()?;

    let handle = engine.service.start::<Sum>(&vec![2, 3]).await?;
    assert_eq!(drive(&engine, &handle).await?, RunStatus::Completed);
    let events = handle.events().await?;

    // Redeliver the first step job and a workflow wake.
    let step_queue = format!("__wkf_step_{}", Add::ID);
    world
        .enqueue(OutgoingMessage::new(
            step_queue,
            json!({
                "runId": handle.run_id(),
                "seq": 0,
                "stepId": Add::ID,
                "input": [0, 2],
            }),
        ))
        .await?;
    world
        .enqueue(OutgoingMessage::new(
            format!("__wkf_workflow_{}", Sum::ID),
            json!({ "runId": handle.run_id() }),
        ))
        .await?;
    assert_eq!(engine.runtime.tick().await?, 2);

    assert_eq!(add.calls.get(), 2);
    assert_eq!(handle.events().await?, events);
    assert_eq!(world.queue_depth(), 0);
    Ok(())
}

#[tokio::test]
async fn redelivered_steps_are_skipped_while_the_run_continues() -> anyhow::Result<()> {
    init_test_tracing();
    let world = LocalWorld::new();
    let add = Add::default();
    let engine = builder(&world)
        .workflow(Sum)
        .step(add.clone())
        .build_engine()?;

    let handle = engine.service.start::<Sum>(&vec![2, 3]).await?;
    // Turn, first step, turn: call 0 is done and call 1 is queued.
    for _ in 0..3 {
        assert!(engine.runtime.process_next().await?);
    }
    let events = handle.events().await?;
    assert_eq!(
        event_types(&events),
        vec![
            "RunCreated",
            "RunStarted",
            "StepScheduled",
            "StepCompleted",
            "StepScheduled",
        ]
    );

    // Hold call 1's job on another worker so only the duplicate is visible.
    let step_queue = format!("__wkf_step_{}", Add::ID);
    let held = world
        .claim(&[step_queue.clone()], "stalled-worker", Duration::from_secs(60))
        .await?
        .ok_or_else(|| anyhow::anyhow!("call 1 should be queued"))?;
    world
        .enqueue(OutgoingMessage::new(
            step_queue,
            json!({
                "runId": handle.run_id(),
                "seq": 0,
                "stepId": Add::ID,
                "input": [0, 2],
            }),
        ))
        .await?;
    assert!(engine.runtime.process_next().await?);

    assert_eq!(add.calls.get(), 1);
    assert_eq!(handle.events().await?, events);
    assert_eq!(handle.status().await?, RunStatus::Suspended);

    world.reschedule(held.id, Duration::ZERO, None).await?;
    assert_eq!(drive(&engine, &handle).await?, RunStatus::Completed);
    assert_eq!(handle.return_value().await?, 5);
    assert_eq!(add.calls.get(), 2);
    Ok(())
}

#[tokio::test]
async fn idempotency_keys_suppress_duplicate_messages() -> anyhow::Result<()> {
    let world = LocalWorld::new();
    let message = OutgoingMessage::new("__wkf_step_x", json!({})).idempotency_key("run:0");

    let first = world.enqueue(message.clone()).await?;
    let second = world.enqueue(message).await?;

    assert_eq!(first, second);
    assert_eq!(world.queue_depth(), 1);
    Ok(())
}

#[tokio::test]
async fn undecodable_messages_are_dead_lettered() -> anyhow::Result<()> {
    init_test_tracing();
    let world = LocalWorld::new();
    let engine = builder(&world)
        .workflow(Sum)
        .step(Add::default())
        .config(RuntimeConfig {
            max_delivery_attempts: 2,
            ..test_runtime_config()
        })
        .build_engine()?;

    let id = world
        .enqueue(OutgoingMessage::new(
            format!("__wkf_step_{}", Add::ID),
            json!({ "not": "a step job" }),
        ))
        .await?;

    // First failure is redelivered after backoff, the second is dead-lettered.
    let dead = crate::support::helpers::wait_until(
        crate::support::helpers::DEFAULT_TEST_TIMEOUT,
        crate::support::helpers::DEFAULT_POLL_INTERVAL,
        || async {
            engine.runtime.tick().await?;
            let dead = engine.runtime.fetch_dead_letters(10).await?;
            Ok((!dead.is_empty()).then_some(dead))
        },
    )
    .await?;

    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].id, id);
    assert_eq!(dead[0].attempts, 2);
    assert!(dead[0].last_error.is_some());
    assert_eq!(world.queue_depth(), 0);

    assert!(engine.runtime.retry_dead_letter(id).await?);
    assert!(!engine.runtime.retry_dead_letter(id).await?);
    assert_eq!(world.queue_depth(), 1);
    assert!(engine.runtime.fetch_dead_letters(10).await?.is_empty());
    Ok(())
}
