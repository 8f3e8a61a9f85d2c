use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use waystone::{LocalWorld, OutgoingMessage, Queue, RunEvent, RunStatus, WorkflowFunction};

use crate::support::helpers::{builder, drive, event_types, init_test_tracing};
use crate::support::workflows::{Add, Nap};

#[tokio::test]
async fn sleep_suspends_until_the_wake_is_due() -> anyhow::Result<()> {
    init_test_tracing();
    let world = LocalWorld::new();
    let add = Add::default();
    let engine = builder(&world)
        .workflow(Nap)
        .step(add.clone())
        .build_engine()?;

    let handle = engine.service.start::<Nap>(&50).await?;
    engine.runtime.tick().await?;
    assert_eq!(handle.status().await?, RunStatus::Suspended);
    assert_eq!(add.calls.get(), 0);

    assert_eq!(drive(&engine, &handle).await?, RunStatus::Completed);
    assert_eq!(handle.return_value().await?, 42);

    let events = handle.events().await?;
    let types = event_types(&events);
    let created = types.iter().position(|t| *t == "WaitCreated");
    let completed = types.iter().position(|t| *t == "WaitCompleted");
    assert!(created < completed, "{types:?}");

    let created_at = events[0].created_at;
    let woke_at = events
        .iter()
        .find(|e| matches!(e.event, RunEvent::WaitCompleted { .. }))
        .map(|e| e.created_at)
        .expect("wait completed");
    assert!(woke_at - created_at >= Duration::from_millis(50));
    Ok(())
}

#[tokio::test]
async fn early_wakes_are_rescheduled() -> anyhow::Result<()> {
    let world = LocalWorld::new();
    let engine = builder(&world)
        .workflow(Nap)
        .step(Add::default())
        .build_engine()?;

    let handle = engine.service.start::<Nap>(&3_600_000).await?;
    engine.runtime.tick().await?;

    // A stray wake for the sleep arrives an hour early.
    world
        .enqueue(OutgoingMessage::new(
            format!("__wkf_workflow_{}", Nap::ID),
            json!({ "runId": handle.run_id(), "waitSeq": 0 }),
        ))
        .await?;
    assert_eq!(engine.runtime.tick().await?, 1);

    assert_eq!(handle.status().await?, RunStatus::Suspended);
    assert!(!event_types(&handle.events().await?).contains(&"WaitCompleted"));
    // Both the original and the stray wake are still waiting.
    assert_eq!(world.queue_depth(), 2);
    Ok(())
}
