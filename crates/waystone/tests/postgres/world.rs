use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use test_utils::db_test;
use time::OffsetDateTime;
use waystone::{
    BeginResult, Error, FunctionId, HookRecord, NewRun, OutgoingMessage, PgWorld, Queue, RunEvent,
    RunId, RunQuery, RunQueryStore, RunRecord, RunStatus, Store, StreamStore, UnitOfWork,
};

const WORKFLOW: &str = "workflow//./src/orders.js//fulfil";
const VISIBILITY: Duration = Duration::from_secs(30);

async fn create_run(world: &PgWorld) -> anyhow::Result<RunRecord> {
    let run_id = RunId::generate();
    let workflow_id: FunctionId = WORKFLOW.parse()?;
    let first = OutgoingMessage::new(workflow_id.queue_name(), json!({ "runId": run_id }))
        .idempotency_key(format!("{run_id}:start"));
    let run = world
        .create_run(
            NewRun {
                run_id,
                workflow_id,
                input: json!({ "order": 7 }),
            },
            first,
        )
        .await?;
    Ok(run)
}

fn hook(run_id: &RunId, token: &str) -> HookRecord {
    HookRecord {
        token: token.to_string(),
        run_id: run_id.clone(),
        seq: 0,
        schema: json!({ "type": "object" }),
        metadata: json!(null),
        created_at: OffsetDateTime::now_utc(),
    }
}

db_test!(create_run_records_event_and_first_message, |pool| {
    let world = PgWorld::new(pool.clone());
    let run = create_run(&world).await?;

    assert_eq!(run.status, RunStatus::Pending);
    assert_eq!(run.workflow_id, WORKFLOW);

    let events = world.fetch_run_events(&run.run_id).await?;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].sequence, 0);
    assert_eq!(
        events[0].event,
        RunEvent::RunCreated {
            workflow_id: WORKFLOW.to_string(),
            input: json!({ "order": 7 }),
        }
    );

    let message = world
        .claim(&["__wkf_workflow_".to_string()], "w1", VISIBILITY)
        .await?
        .expect("first message should be visible");
    assert_eq!(message.payload, json!({ "runId": run.run_id }));
    assert_eq!(message.attempt, 1);
    Ok(())
});

db_test!(unit_of_work_commits_atomically, |pool| {
    let world = PgWorld::new(pool.clone());
    let run = create_run(&world).await?;

    // Dropped without commit: nothing persists.
    match world.begin(&run.run_id).await? {
        BeginResult::Active { mut uow, .. } => {
            uow.append_events(vec![RunEvent::RunStarted]).await?;
            uow.set_status(RunStatus::Running);
        }
        BeginResult::Finished(_) => panic!("run should be active"),
    }
    assert_eq!(world.fetch_run_events(&run.run_id).await?.len(), 1);

    match world.begin(&run.run_id).await? {
        BeginResult::Active { events, mut uow, .. } => {
            assert_eq!(events.len(), 1);
            uow.append_events(vec![RunEvent::RunStarted]).await?;
            uow.append_events(vec![RunEvent::RunCompleted { output: json!(42) }])
                .await?;
            uow.set_status(RunStatus::Completed);
            uow.set_output(json!(42));
            uow.commit().await?;
        }
        BeginResult::Finished(_) => panic!("run should be active"),
    }

    let stored = world.fetch_run_events(&run.run_id).await?;
    let sequences: Vec<i64> = stored.iter().map(|e| e.sequence).collect();
    assert_eq!(sequences, vec![0, 1, 2]);

    let record = world.get_run(&run.run_id).await?.expect("run exists");
    assert_eq!(record.status, RunStatus::Completed);
    assert_eq!(record.output, Some(json!(42)));

    assert!(matches!(
        world.begin(&run.run_id).await?,
        BeginResult::Finished(r) if r.status == RunStatus::Completed
    ));
    Ok(())
});

db_test!(begin_fails_for_unknown_runs, |pool| {
    let world = PgWorld::new(pool.clone());
    let result = world.begin(&RunId::generate()).await;
    assert!(matches!(result, Err(Error::RunNotFound(_))));
    Ok(())
});

db_test!(claims_skip_locked_messages_and_filter_by_prefix, |pool| {
    let world = PgWorld::new(pool.clone());
    world
        .enqueue(OutgoingMessage::new("__wkf_step_a", json!(1)))
        .await?;
    world
        .enqueue(OutgoingMessage::new("__wkf_step_b", json!(2)))
        .await?;
    world
        .enqueue(OutgoingMessage::new("__wkf_workflow_c", json!(3)))
        .await?;
    // `_` must not act as a wildcard.
    world
        .enqueue(OutgoingMessage::new("__wkfXstep_d", json!(4)))
        .await?;

    let steps = ["__wkf_step_".to_string()];
    let first = world.claim(&steps, "w1", VISIBILITY).await?.expect("first");
    let second = world.claim(&steps, "w2", VISIBILITY).await?.expect("second");
    assert_eq!(first.payload, json!(1));
    assert_eq!(second.payload, json!(2));
    assert!(world.claim(&steps, "w3", VISIBILITY).await?.is_none());

    world.acknowledge(first.id).await?;
    let applied = world.reschedule(second.id, Duration::ZERO, Some("busy")).await?;
    assert_eq!(applied.applied, Duration::ZERO);

    let again = world.claim(&steps, "w3", VISIBILITY).await?.expect("rescheduled");
    assert_eq!(again.id, second.id);
    assert_eq!(again.attempt, 2);
    Ok(())
});

db_test!(delayed_messages_become_visible_later, |pool| {
    let world = PgWorld::new(pool.clone());
    world
        .enqueue(OutgoingMessage::new("__wkf_step_a", json!(1)).delay(Duration::from_millis(300)))
        .await?;

    let steps = ["__wkf_step_".to_string()];
    assert!(world.claim(&steps, "w1", VISIBILITY).await?.is_none());
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(world.claim(&steps, "w1", VISIBILITY).await?.is_some());
    Ok(())
});

db_test!(idempotency_keys_survive_acknowledgement, |pool| {
    let world = PgWorld::new(pool.clone());
    let message = OutgoingMessage::new("__wkf_step_a", json!({})).idempotency_key("run:0");

    let first = world.enqueue(message.clone()).await?;
    let claimed = world
        .claim(&["__wkf_step_".to_string()], "w1", VISIBILITY)
        .await?
        .expect("visible");
    world.acknowledge(claimed.id).await?;

    let second = world.enqueue(message).await?;
    assert_eq!(first, second);
    assert!(
        world
            .claim(&["__wkf_step_".to_string()], "w1", VISIBILITY)
            .await?
            .is_none()
    );
    Ok(())
});

db_test!(dead_letters_can_be_retried, |pool| {
    let world = PgWorld::new(pool.clone());
    let steps = ["__wkf_step_".to_string()];
    world
        .enqueue(OutgoingMessage::new("__wkf_step_a", json!("bad")))
        .await?;

    let message = world.claim(&steps, "w1", VISIBILITY).await?.expect("visible");
    world.dead_letter(message.id, "undecodable payload").await?;
    assert!(world.claim(&steps, "w1", VISIBILITY).await?.is_none());

    let dead = world.fetch_dead_letters(10).await?;
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].id, message.id);
    assert_eq!(dead[0].attempts, 1);
    assert_eq!(dead[0].last_error.as_deref(), Some("undecodable payload"));

    assert!(world.retry_dead_letter(message.id).await?);
    assert!(!world.retry_dead_letter(message.id).await?);
    assert!(world.fetch_dead_letters(10).await?.is_empty());
    assert!(world.claim(&steps, "w1", VISIBILITY).await?.is_some());
    Ok(())
});

db_test!(hook_tokens_are_unique_until_disposed, |pool| {
    let world = PgWorld::new(pool.clone());
    let owner = create_run(&world).await?;
    let contender = create_run(&world).await?;

    let BeginResult::Active { mut uow, .. } = world.begin(&owner.run_id).await? else {
        panic!("run should be active");
    };
    uow.register_hook(hook(&owner.run_id, "order-7")).await?;
    uow.commit().await?;

    let found = world.find_hook("order-7").await?.expect("hook registered");
    assert_eq!(found.run_id, owner.run_id);

    let BeginResult::Active { mut uow, .. } = world.begin(&contender.run_id).await? else {
        panic!("run should be active");
    };
    let result = uow.register_hook(hook(&contender.run_id, "order-7")).await;
    assert!(matches!(result, Err(Error::HookConflict(token)) if token == "order-7"));
    drop(uow);

    let BeginResult::Active { mut uow, .. } = world.begin(&owner.run_id).await? else {
        panic!("run should be active");
    };
    uow.dispose_hooks(vec!["order-7".to_string()]).await?;
    uow.commit().await?;
    assert!(world.find_hook("order-7").await?.is_none());

    let BeginResult::Active { mut uow, .. } = world.begin(&contender.run_id).await? else {
        panic!("run should be active");
    };
    uow.register_hook(hook(&contender.run_id, "order-7")).await?;
    uow.commit().await?;
    Ok(())
});

db_test!(stream_chunks_are_indexed_per_stream, |pool| {
    let world = PgWorld::new(pool.clone());
    let run = create_run(&world).await?;

    let mut writes = Vec::new();
    for i in 0..8 {
        let world = world.clone();
        let run_id = run.run_id.clone();
        writes.push(tokio::spawn(async move {
            world.write_chunk(&run_id, "default", json!(i)).await
        }));
    }
    let mut indexes = Vec::new();
    for write in writes {
        indexes.push(write.await??);
    }
    indexes.sort_unstable();
    assert_eq!(indexes, (0..8).collect::<Vec<u64>>());

    assert_eq!(world.write_chunk(&run.run_id, "audit", json!("x")).await?, 0);

    let page = world.read_chunks(&run.run_id, "default", 5, 10).await?;
    let positions: Vec<u64> = page.iter().map(|c| c.index).collect();
    assert_eq!(positions, vec![5, 6, 7]);
    Ok(())
});

db_test!(list_runs_filters_and_orders_newest_first, |pool| {
    let world = PgWorld::new(pool.clone());
    let older = create_run(&world).await?;
    let newer = create_run(&world).await?;

    let BeginResult::Active { mut uow, .. } = world.begin(&older.run_id).await? else {
        panic!("run should be active");
    };
    uow.set_status(RunStatus::Cancelled);
    uow.commit().await?;

    let all = world.list_runs(&RunQuery::new()).await?;
    let ids: Vec<RunId> = all.into_iter().map(|r| r.run_id).collect();
    assert_eq!(ids, vec![newer.run_id.clone(), older.run_id.clone()]);

    let cancelled = world
        .list_runs(&RunQuery::new().status(RunStatus::Cancelled))
        .await?;
    assert_eq!(cancelled.len(), 1);
    assert_eq!(cancelled[0].run_id, older.run_id);

    let limited = world
        .list_runs(&RunQuery::new().workflow_id(WORKFLOW).limit(1).offset(1))
        .await?;
    assert_eq!(limited.len(), 1);
    assert_eq!(limited[0].run_id, older.run_id);
    Ok(())
});
