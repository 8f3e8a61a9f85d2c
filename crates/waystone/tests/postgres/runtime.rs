use pretty_assertions::assert_eq;
use serde_json::json;
use sqlx::PgPool;
use test_utils::db_test;
use waystone::{Error, HookDelivery, PgWorld, RunQueryStore, RunStatus};

use crate::support::helpers::{
    DEFAULT_POLL_INTERVAL, DEFAULT_TEST_TIMEOUT, TestApp, builder, init_test_tracing,
    wait_for_terminal,
};
use crate::support::workflows::{Add, Approvals, Flaky, Pair, Quote, Sum};

db_test!(sum_workflow_completes, |pool| {
    init_test_tracing();
    let add = Add::default();
    let engine = builder(pool).workflow(Sum).step(add.clone()).build_engine()?;
    let app = TestApp::spawn(engine);

    let handle = app.service.start::<Sum>(&vec![1, 2, 3, 4]).await?;
    assert_eq!(handle.return_value().await?, 10);
    assert_eq!(add.calls.get(), 4);

    let types: Vec<&str> = handle
        .events()
        .await?
        .iter()
        .map(|e| e.event.type_name())
        .collect();
    assert_eq!(types.first(), Some(&"RunCreated"));
    assert_eq!(types.last(), Some(&"RunCompleted"));
    assert_eq!(types.iter().filter(|t| **t == "StepCompleted").count(), 4);

    app.shutdown().await?;
    Ok(())
});

db_test!(concurrent_steps_run_on_several_workers, |pool| {
    init_test_tracing();
    let add = Add::default();
    let engine = builder(pool).workflow(Pair).step(add.clone()).build_engine()?;
    let app = TestApp::spawn(engine);

    let handle = app.service.start::<Pair>(&10).await?;
    assert_eq!(handle.return_value().await?, (11, 12));
    assert_eq!(add.calls.get(), 2);

    app.shutdown().await?;
    Ok(())
});

db_test!(retried_steps_complete, |pool| {
    init_test_tracing();
    let flaky = Flaky {
        failures: 2,
        ..Default::default()
    };
    let engine = builder(pool)
        .workflow(Quote)
        .step(flaky.clone())
        .build_engine()?;
    let app = TestApp::spawn(engine);

    let handle = app.service.start::<Quote>(&"SYM".to_string()).await?;
    assert_eq!(handle.return_value().await?, "SYM:42");
    assert_eq!(flaky.calls.get(), 3);

    let retries = handle
        .events()
        .await?
        .iter()
        .filter(|e| e.event.type_name() == "StepRetrying")
        .count();
    assert_eq!(retries, 2);

    app.shutdown().await?;
    Ok(())
});

db_test!(hooks_resume_runs_across_runtimes, |pool| {
    init_test_tracing();
    let token = "approvals-pg".to_string();

    let first = TestApp::spawn(builder(pool).workflow(Approvals).build_engine()?);
    let handle = first.service.start::<Approvals>(&token).await?;
    wait_for_hook(pool, &token).await?;
    first
        .service
        .resume_hook(&token, HookDelivery::event(json!({ "amount": 5 })))
        .await?;
    first.shutdown().await?;

    let second = TestApp::spawn(builder(pool).workflow(Approvals).build_engine()?);
    second
        .service
        .resume_hook(&token, HookDelivery::terminal(json!({ "amount": 7 })))
        .await?;

    assert_eq!(wait_for_terminal(&handle).await?, RunStatus::Completed);
    assert_eq!(handle.return_value().await?, 12);

    let late = second
        .service
        .resume_hook(&token, HookDelivery::event(json!({ "amount": 1 })))
        .await;
    assert!(matches!(late, Err(Error::HookNotFound(_))));

    second.shutdown().await?;
    Ok(())
});

/// Poll until a run has registered `token`.
async fn wait_for_hook(pool: &PgPool, token: &str) -> anyhow::Result<()> {
    let world = PgWorld::new(pool.clone());
    let deadline = tokio::time::Instant::now() + DEFAULT_TEST_TIMEOUT;
    while world.find_hook(token).await?.is_none() {
        anyhow::ensure!(
            tokio::time::Instant::now() < deadline,
            "hook {token} was never registered"
        );
        tokio::time::sleep(DEFAULT_POLL_INTERVAL).await;
    }
    Ok(())
}
