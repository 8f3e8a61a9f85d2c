use pretty_assertions::assert_eq;
use waystone::{FailureKind, LocalWorld, RunEvent, RunStatus, StepError, step_fn};

use crate::support::helpers::{TEST_MAX_ATTEMPTS, builder, drive, event_types, init_test_tracing};
use crate::support::workflows::{
    Checkout, CheckoutInput, Flaky, Orphan, Quote, Reject, SCALE_STEP, Scaled,
};

#[tokio::test]
async fn retryable_failures_are_retried_until_success() -> anyhow::Result<()> {
    init_test_tracing();
    let world = LocalWorld::new();
    let flaky = Flaky {
        failures: 2,
        ..Default::default()
    };
    let engine = builder(&world)
        .workflow(Quote)
        .step(flaky.clone())
        .build_engine()?;

    let handle = engine.service.start::<Quote>(&"ACME".to_string()).await?;
    assert_eq!(drive(&engine, &handle).await?, RunStatus::Completed);

    assert_eq!(handle.return_value().await?, "ACME:42");
    assert_eq!(flaky.calls.get(), 3);
    assert_eq!(flaky.last_attempt.get(), 3);

    let events = handle.events().await?;
    let retries: Vec<u32> = events
        .iter()
        .filter_map(|e| match &e.event {
            RunEvent::StepRetrying { attempt, error, .. } => {
                assert!(error.contains("upstream timeout"), "{error}");
                Some(*attempt)
            }
            _ => None,
        })
        .collect();
    assert_eq!(retries, vec![1, 2]);
    assert_eq!(event_types(&events).last(), Some(&"RunCompleted"));
    Ok(())
}

#[tokio::test]
async fn exhausted_retries_surface_at_the_call_site() -> anyhow::Result<()> {
    init_test_tracing();
    let world = LocalWorld::new();
    let flaky = Flaky {
        failures: u32::MAX,
        ..Default::default()
    };
    let engine = builder(&world)
        .workflow(Quote)
        .step(flaky.clone())
        .build_engine()?;

    let handle = engine.service.start::<Quote>(&"ACME".to_string()).await?;
    assert_eq!(drive(&engine, &handle).await?, RunStatus::Failed);
    assert_eq!(flaky.calls.get(), TEST_MAX_ATTEMPTS);

    let step_failure = handle
        .events()
        .await?
        .into_iter()
        .find_map(|e| match e.event {
            RunEvent::StepFailed { error, .. } => Some(error),
            _ => None,
        })
        .expect("step failure recorded");
    assert_eq!(step_failure.kind, FailureKind::RetriesExhausted);

    let run_error = handle.record().await?.error.expect("run failure recorded");
    assert_eq!(run_error.kind, FailureKind::Fatal);
    assert!(run_error.message.contains("gave up after 3 attempts"), "{}", run_error.message);
    Ok(())
}

#[tokio::test]
async fn fatal_step_errors_are_not_retried() -> anyhow::Result<()> {
    let world = LocalWorld::new();
    let engine = builder(&world)
        .workflow(Checkout)
        .step(Reject)
        .build_engine()?;

    let failing = engine
        .service
        .start::<Checkout>(&CheckoutInput {
            amount: 30,
            recover: false,
        })
        .await?;
    let recovering = engine
        .service
        .start::<Checkout>(&CheckoutInput {
            amount: 40,
            recover: true,
        })
        .await?;

    assert_eq!(drive(&engine, &failing).await?, RunStatus::Failed);
    assert_eq!(drive(&engine, &recovering).await?, RunStatus::Completed);

    assert!(
        !event_types(&failing.events().await?).contains(&"StepRetrying"),
        "fatal errors must not be retried"
    );
    let err = failing.return_value().await.unwrap_err();
    assert!(err.to_string().contains("card declined for 30"), "{err}");
    assert_eq!(
        recovering.return_value().await?,
        "recovered: card declined for 40"
    );
    Ok(())
}

#[tokio::test]
async fn closure_values_reach_dynamic_steps() -> anyhow::Result<()> {
    let world = LocalWorld::new();
    let engine = builder(&world)
        .workflow(Scaled)
        .step_fn(
            SCALE_STEP,
            step_fn(|input, ctx| async move {
                let factor: i64 = ctx.closure_var("factor")?;
                let value = input
                    .as_i64()
                    .ok_or_else(|| StepError::fatal("expected an integer"))?;
                Ok::<_, StepError>(serde_json::json!(value * factor))
            }),
        )
        .build_engine()?;

    let handle = engine.service.start::<Scaled>(&14).await?;
    drive(&engine, &handle).await?;

    assert_eq!(handle.return_value().await?, 42);
    let closure = handle
        .events()
        .await?
        .into_iter()
        .find_map(|e| match e.event {
            RunEvent::StepScheduled { closure, .. } => Some(closure),
            _ => None,
        })
        .expect("step scheduled");
    assert_eq!(closure.get::<i64>("factor")?, 3);
    Ok(())
}

#[tokio::test]
async fn unregistered_steps_fail_the_call() -> anyhow::Result<()> {
    let world = LocalWorld::new();
    let engine = builder(&world).workflow(Orphan).build_engine()?;

    let handle = engine.service.start::<Orphan>(&()).await?;
    assert_eq!(drive(&engine, &handle).await?, RunStatus::Failed);

    let step_failure = handle
        .events()
        .await?
        .into_iter()
        .find_map(|e| match e.event {
            RunEvent::StepFailed { error, .. } => Some(error),
            _ => None,
        })
        .expect("step failure recorded");
    assert_eq!(step_failure.kind, FailureKind::InvalidInvocation);
    assert!(step_failure.message.contains("missing"), "{}", step_failure.message);
    Ok(())
}
