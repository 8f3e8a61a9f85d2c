use std::collections::BTreeMap;
use std::time::Duration;

use futures::TryStreamExt;
use pretty_assertions::assert_eq;
use serde_json::json;
use waystone::{
    Error, HookDelivery, LocalWorld, Manifest, ManifestStep, ManifestWorkflow, RunId, RunQuery,
    RunStatus, WorkflowFunction,
};

use crate::support::helpers::{builder, drive, event_types, init_test_tracing};
use crate::support::workflows::{Add, Approvals, Emit, Gate, Held, Report, Sum};

#[tokio::test]
async fn start_rejects_unknown_workflows() -> anyhow::Result<()> {
    let world = LocalWorld::new();
    let engine = builder(&world)
        .workflow(Sum)
        .step(Add::default())
        .build_engine()?;

    let err = engine
        .service
        .start_dynamic("workflow//./src/math.js//product", json!([]))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInvocation(_)), "{err}");

    let err = engine
        .service
        .start_dynamic("step//./src/math.js//add", json!([1, 2]))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("is a step"), "{err}");

    assert_eq!(world.queue_depth(), 0);
    Ok(())
}

#[tokio::test]
async fn dynamic_starts_return_json() -> anyhow::Result<()> {
    let world = LocalWorld::new();
    let engine = builder(&world)
        .workflow(Sum)
        .step(Add::default())
        .build_engine()?;

    let handle = engine.service.start_dynamic(Sum::ID, json!([4, 5])).await?;
    drive(&engine, &handle).await?;
    assert_eq!(handle.return_value().await?, json!(9));
    Ok(())
}

#[tokio::test]
async fn get_run_requires_an_existing_run() -> anyhow::Result<()> {
    let world = LocalWorld::new();
    let engine = builder(&world).workflow(Sum).build_engine()?;

    let err = engine
        .service
        .get_run(&RunId::new("wrun_missing"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::RunNotFound(_)));
    Ok(())
}

#[tokio::test]
async fn cancel_releases_hooks_and_ignores_later_events() -> anyhow::Result<()> {
    let world = LocalWorld::new();
    let engine = builder(&world).workflow(Approvals).build_engine()?;
    let handle = engine
        .service
        .start::<Approvals>(&"order-1".to_string())
        .await?;
    engine.runtime.tick().await?;

    engine.service.cancel(handle.run_id()).await?;
    assert_eq!(handle.status().await?, RunStatus::Cancelled);
    assert!(matches!(
        handle.return_value().await,
        Err(Error::RunCancelled(_))
    ));

    let err = engine
        .service
        .resume_hook("order-1", HookDelivery::event(json!({ "amount": 1 })))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::HookNotFound(_)), "{err}");

    let err = engine.service.cancel(handle.run_id()).await.unwrap_err();
    assert!(matches!(
        err,
        Error::RunFinished {
            status: RunStatus::Cancelled,
            ..
        }
    ));
    Ok(())
}

#[tokio::test]
async fn step_jobs_queued_before_cancel_never_run() -> anyhow::Result<()> {
    init_test_tracing();
    let world = LocalWorld::new();
    let add = Add::default();
    let engine = builder(&world)
        .workflow(Sum)
        .step(add.clone())
        .build_engine()?;

    let handle = engine.service.start::<Sum>(&vec![1]).await?;
    assert!(engine.runtime.process_next().await?);
    assert_eq!(world.queue_depth(), 1);

    engine.service.cancel(handle.run_id()).await?;
    assert_eq!(engine.runtime.tick().await?, 1);

    assert_eq!(add.calls.get(), 0);
    let types = event_types(&handle.events().await?);
    assert!(!types.contains(&"StepCompleted"), "{types:?}");
    assert_eq!(types.last(), Some(&"RunCancelled"));
    assert_eq!(world.queue_depth(), 0);
    Ok(())
}

#[tokio::test]
async fn step_results_arriving_after_cancel_are_discarded() -> anyhow::Result<()> {
    init_test_tracing();
    let world = LocalWorld::new();
    let gate = Gate::default();
    let engine = builder(&world)
        .workflow(Held)
        .step(gate.clone())
        .build_engine()?;

    let handle = engine.service.start::<Held>(&7).await?;
    assert!(engine.runtime.process_next().await?);

    // Cancel while the step body is still running.
    let cancel = async {
        gate.entered.notified().await;
        engine.service.cancel(handle.run_id()).await?;
        gate.release.notify_one();
        anyhow::Ok(())
    };
    let (processed, cancelled) = tokio::join!(engine.runtime.process_next(), cancel);
    assert!(processed?);
    cancelled?;

    assert_eq!(gate.calls.get(), 1);
    assert_eq!(handle.status().await?, RunStatus::Cancelled);
    let types = event_types(&handle.events().await?);
    assert!(!types.contains(&"StepCompleted"), "{types:?}");
    assert_eq!(types.last(), Some(&"RunCancelled"));
    assert_eq!(world.queue_depth(), 0);
    Ok(())
}

#[tokio::test]
async fn list_runs_filters_by_workflow_and_status() -> anyhow::Result<()> {
    let world = LocalWorld::new();
    let engine = builder(&world)
        .workflow(Sum)
        .workflow(Approvals)
        .step(Add::default())
        .build_engine()?;

    let sum = engine.service.start::<Sum>(&vec![1]).await?;
    engine
        .service
        .start::<Approvals>(&"order-3".to_string())
        .await?;
    drive(&engine, &sum).await?;

    let sums = engine
        .service
        .list_runs(&RunQuery::new().workflow_id(Sum::ID))
        .await?;
    assert_eq!(sums.len(), 1);
    assert_eq!(&sums[0].run_id, sum.run_id());

    let waiting = engine
        .service
        .list_runs(&RunQuery::new().status(RunStatus::Suspended))
        .await?;
    assert_eq!(waiting.len(), 1);
    assert_eq!(waiting[0].workflow_id, Approvals::ID);

    assert_eq!(engine.service.list_runs(&RunQuery::new().limit(1)).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn readable_streams_chunks_written_by_steps() -> anyhow::Result<()> {
    let world = LocalWorld::new();
    let engine = builder(&world)
        .workflow(Report)
        .step(Emit)
        .build_engine()?;
    let items = vec!["alpha".to_string(), "beta".to_string(), "gamma".to_string()];

    let handle = engine.service.start::<Report>(&items).await?;
    let reader = tokio::spawn({
        let handle = handle.clone();
        async move { handle.readable().try_collect::<Vec<_>>().await }
    });

    drive(&engine, &handle).await?;
    assert_eq!(handle.return_value().await?, 3);

    let chunks = tokio::time::timeout(Duration::from_secs(5), reader).await???;
    assert_eq!(chunks, vec![json!("alpha"), json!("beta"), json!("gamma")]);
    Ok(())
}

#[tokio::test]
async fn verify_manifest_reports_missing_registrations() -> anyhow::Result<()> {
    let world = LocalWorld::new();
    let manifest = Manifest {
        workflows: BTreeMap::from([(
            "sum".to_string(),
            ManifestWorkflow {
                workflow_id: Sum::ID.to_string(),
            },
        )]),
        steps: BTreeMap::from([(
            "add".to_string(),
            ManifestStep {
                step_id: "step//./src/math.js//add".to_string(),
                closure_vars: Vec::new(),
            },
        )]),
    };

    let partial = builder(&world).workflow(Sum);
    let err = partial.verify_manifest(&manifest).unwrap_err();
    assert!(err.to_string().contains("step//./src/math.js//add"), "{err}");

    let complete = partial.step(Add::default());
    complete.verify_manifest(&manifest)?;
    Ok(())
}
