//! End-to-end tests of the node against the scriptable and in-process engines.

use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::engine::{MemoryEngine, MemoryEngineConfig};
use crate::errors::{CODE_CAT_FAILED, CODE_PIN_FAILED, CODE_SUCCESS};
use crate::events::{CollectingEventSink, MockEventSink};
use crate::runtime::LoopError;
use crate::testing::{EngineCall, ManualEngine, OutcomeRecorder};

const SOME_CID: &str = "QmT78zSuBmuS4z925WZfrqQ1qHaJ56DQaTfyMUF7F8ff5o";

fn manual_node(engine: &Arc<ManualEngine>) -> Node {
    Node::start(
        engine.clone(),
        &LoopHandle::current().expect("current-thread loop"),
        "/repo",
        NodeConfig::default(),
    )
    .expect("manual engine starts")
}

fn memory_node(engine: &MemoryEngine, dir: &Path, online: bool) -> Node {
    Node::start(
        Arc::new(engine.clone()),
        &LoopHandle::current().expect("current-thread loop"),
        dir,
        NodeConfig::default().with_online(online),
    )
    .expect("memory engine starts")
}

async fn idle(node: &Node) {
    tokio::time::timeout(Duration::from_secs(10), node.loop_handle().until_idle())
        .await
        .expect("loop should become idle");
}

// Manual engine: resolution semantics

#[tokio::test]
async fn test_continuation_runs_once_on_the_loop_thread() {
    let engine = Arc::new(ManualEngine::new());
    let node = manual_node(&engine);
    let recorder = OutcomeRecorder::new();

    node.cat_with(SOME_CID, recorder.continuation())
        .expect("cat issued");

    let remote = engine.clone();
    std::thread::spawn(move || remote.complete(0, CODE_SUCCESS, b"payload"))
        .join()
        .expect("engine thread");
    idle(&node).await;

    assert_eq!(recorder.outcomes(), vec![Outcome::Success(b"payload".to_vec())]);
    assert_eq!(recorder.threads(), vec![std::thread::current().id()]);
    assert_eq!(node.pending_operations(), 0);
    assert_eq!(engine.live_signals(), 0);
}

#[tokio::test]
async fn test_foreign_completions_all_resolve_on_the_loop_thread() {
    let engine = Arc::new(ManualEngine::new());
    let node = manual_node(&engine);
    let recorder = OutcomeRecorder::new();

    for _ in 0..64 {
        node.cat_with(SOME_CID, recorder.continuation()).expect("cat issued");
    }
    let completers: Vec<_> = (0..64)
        .map(|index| {
            let remote = engine.clone();
            std::thread::spawn(move || remote.complete(index, CODE_SUCCESS, b"x"))
        })
        .collect();
    for completer in completers {
        completer.join().expect("engine thread");
    }
    idle(&node).await;

    let mut threads = recorder.threads();
    threads.dedup();
    assert_eq!(recorder.len(), 64);
    assert_eq!(threads, vec![std::thread::current().id()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_multi_thread_runtime_cannot_host_a_node() {
    assert!(matches!(
        LoopHandle::current(),
        Err(LoopError::NotCurrentThread(_))
    ));
}

#[tokio::test]
async fn test_engine_failure_codes_are_translated() {
    let engine = Arc::new(ManualEngine::new());
    let node = manual_node(&engine);

    let pin = node.pin(SOME_CID).expect("pin issued");
    let resolve = node.resolve("peer").expect("resolve issued");
    engine.complete(0, CODE_PIN_FAILED, &[]);
    engine.complete(1, 42, &[]);

    assert_eq!(pin.await, Outcome::Failure(EngineCode::PinFailed));
    assert_eq!(resolve.await, Outcome::Failure(EngineCode::Unknown(42)));
}

#[tokio::test]
async fn test_operations_reach_the_engine_with_their_arguments() {
    let engine = Arc::new(ManualEngine::new());
    let node = manual_node(&engine);

    let _add = node
        .add_with_options(b"bytes", AddOptions::only_hash())
        .expect("add issued");
    let _publish = node
        .publish(SOME_CID, Duration::from_millis(90_500))
        .expect("publish issued");

    let add = engine.call(0).expect("add recorded");
    assert_eq!(add.call, EngineCall::Add);
    assert_eq!(add.argument, b"bytes".to_vec());
    assert!(add.flag);
    assert_eq!(add.signal, None);

    let publish = engine.call(1).expect("publish recorded");
    assert_eq!(publish.call, EngineCall::Publish);
    assert_eq!(publish.ttl_seconds, Some(90));
    assert!(publish.signal.is_some());
    assert_eq!(engine.live_signals(), 1);
}

#[tokio::test]
async fn test_malformed_input_is_rejected_before_the_engine() {
    let engine = Arc::new(ManualEngine::new());
    let node = manual_node(&engine);
    let short = "QmShort";

    for err in [
        node.cat(short).map(drop),
        node.pin(short).map(drop),
        node.unpin(short).map(drop),
        node.publish(short, Duration::from_secs(1)).map(drop),
    ] {
        assert!(matches!(
            err,
            Err(NodeError::InvalidCid { len: 7, expected: 46 })
        ));
    }
    assert!(matches!(node.resolve(""), Err(NodeError::EmptyName)));

    assert_eq!(engine.call_count(), 0);
    assert_eq!(engine.live_signals(), 0);
    assert_eq!(node.pending_operations(), 0);
}

#[tokio::test]
async fn test_cancel_before_response_resolves_aborted() {
    let engine = Arc::new(ManualEngine::new().with_abort_on_cancel());
    let node = manual_node(&engine);

    let cat = node.cat(SOME_CID).expect("cat issued");
    let token = cat.cancel_token().expect("cat is cancellable");
    token.cancel();
    token.cancel();

    assert_eq!(cat.await, Outcome::Aborted);
    assert_eq!(engine.cancelled().len(), 1);
    assert_eq!(engine.live_signals(), 0);
}

#[tokio::test]
async fn test_cancel_only_asks_the_engine() {
    let engine = Arc::new(ManualEngine::new());
    let node = manual_node(&engine);
    let recorder = OutcomeRecorder::new();

    let token = node
        .pin_with(SOME_CID, recorder.continuation())
        .expect("pin issued");
    token.cancel();
    idle_briefly().await;

    // The engine has not honoured the request yet.
    assert!(recorder.is_empty());
    assert_eq!(node.pending_operations(), 1);

    engine.abort(0);
    idle(&node).await;
    assert_eq!(recorder.outcomes(), vec![Outcome::Aborted]);
}

#[tokio::test]
async fn test_token_after_resolution_is_a_no_op() {
    let engine = Arc::new(ManualEngine::new().with_abort_on_cancel());
    let node = manual_node(&engine);
    let recorder = OutcomeRecorder::new();

    let token = node
        .cat_with(SOME_CID, recorder.continuation())
        .expect("cat issued");
    engine.complete(0, CODE_SUCCESS, b"done");
    idle(&node).await;

    token.cancel();
    idle(&node).await;
    assert_eq!(recorder.outcomes(), vec![Outcome::Success(b"done".to_vec())]);
}

#[tokio::test]
async fn test_operation_without_engine_signal_is_not_cancellable() {
    let engine = Arc::new(ManualEngine::new().without_signals());
    let node = manual_node(&engine);

    let cat = node.cat(SOME_CID).expect("cat issued");
    let token = cat.cancel_token().expect("cat has a token");
    assert!(!token.is_cancellable());
    token.cancel();
    assert!(engine.cancelled().is_empty());
    assert_eq!(engine.call(0).expect("cat recorded").signal, Some(INVALID_ID));

    engine.complete(0, CODE_SUCCESS, b"still delivered");
    assert_eq!(cat.await, Outcome::Success(b"still delivered".to_vec()));
}

#[tokio::test]
async fn test_add_token_is_inert() {
    let engine = Arc::new(ManualEngine::new());
    let node = manual_node(&engine);

    let add = node.add_str("hello").expect("add issued");
    let token = add.cancel_token().expect("add has a token");
    assert!(!token.is_cancellable());
    token.cancel();
    assert!(engine.cancelled().is_empty());

    engine.complete(0, CODE_SUCCESS, SOME_CID.as_bytes());
    assert_eq!(add.await, Outcome::Success(SOME_CID.to_string()));
}

#[tokio::test]
async fn test_dropped_trampoline_resolves_aborted() {
    let engine = Arc::new(ManualEngine::new());
    let node = manual_node(&engine);

    let unpin = node.unpin(SOME_CID).expect("unpin issued");
    assert!(engine.abandon(0));
    assert_eq!(unpin.await, Outcome::Aborted);
}

#[tokio::test]
async fn test_teardown_aborts_every_pending_operation() {
    let engine = Arc::new(ManualEngine::new());
    let node = manual_node(&engine);
    let recorders: Vec<OutcomeRecorder<()>> = (0..3).map(|_| OutcomeRecorder::new()).collect();

    node.pin_with(SOME_CID, recorders[0].continuation()).expect("pin");
    node.unpin_with(SOME_CID, recorders[1].continuation()).expect("unpin");
    node.publish_with(SOME_CID, Duration::from_secs(5), recorders[2].continuation())
        .expect("publish");
    assert_eq!(node.pending_operations(), 3);

    node.stop();
    assert!(node.is_stopped());
    assert_eq!(node.pending_operations(), 0);
    // Scheduled, not run.
    assert!(recorders.iter().all(OutcomeRecorder::is_empty));

    idle(&node).await;
    for recorder in &recorders {
        assert_eq!(recorder.outcomes(), vec![Outcome::Aborted]);
    }

    assert!(matches!(node.cat(SOME_CID), Err(NodeError::Stopped)));
    assert!(matches!(node.add(b"late"), Err(NodeError::Stopped)));
    assert!(matches!(node.identity(), Err(NodeError::Stopped)));
    assert_eq!(engine.call_count(), 3);
}

#[tokio::test]
async fn test_completion_after_teardown_is_discarded() {
    let engine = Arc::new(ManualEngine::new());
    let node = manual_node(&engine);
    let recorder = OutcomeRecorder::new();

    node.cat_with(SOME_CID, recorder.continuation()).expect("cat");
    node.stop();
    assert!(engine.complete(0, CODE_SUCCESS, b"too late"));
    idle(&node).await;

    assert_eq!(recorder.outcomes(), vec![Outcome::Aborted]);
}

#[tokio::test]
async fn test_completion_racing_teardown_resolves_once() {
    for _ in 0..50 {
        let engine = Arc::new(ManualEngine::new());
        let node = manual_node(&engine);
        let recorder = OutcomeRecorder::new();
        node.cat_with(SOME_CID, recorder.continuation()).expect("cat");

        let remote = engine.clone();
        let completer = std::thread::spawn(move || remote.complete(0, CODE_SUCCESS, b"x"));
        node.stop();
        completer.join().expect("engine thread");
        idle(&node).await;

        assert_eq!(recorder.len(), 1);
    }
}

#[tokio::test]
async fn test_stop_is_idempotent_and_frees_once() {
    let engine = Arc::new(ManualEngine::new());
    let node = manual_node(&engine);
    let instance = node.instance().expect("started");

    node.stop();
    node.stop();
    drop(node);

    assert_eq!(engine.stopped(), vec![instance]);
    assert_eq!(engine.freed(), vec![instance]);
}

#[tokio::test]
async fn test_registry_outlives_node_until_completions_settle() {
    let engine = Arc::new(ManualEngine::new());
    let node = manual_node(&engine);
    let cat = node.cat(SOME_CID).expect("cat");
    let loop_handle = node.loop_handle().clone();

    drop(node);
    assert_eq!(cat.await, Outcome::Aborted);
    // The engine still holds the trampoline.
    assert!(engine.freed().is_empty());

    engine.abandon_all();
    loop_handle.until_idle().await;
    assert_eq!(engine.freed(), vec![0]);
}

#[tokio::test]
async fn test_failed_start_releases_the_instance() {
    let engine = Arc::new(ManualEngine::new().with_start_code(1));
    let started = Node::start(
        engine.clone(),
        &LoopHandle::current().expect("current-thread loop"),
        "/repo",
        NodeConfig::offline(),
    );

    assert!(matches!(
        started,
        Err(NodeError::Engine(EngineCode::RepoCreationFailed))
    ));
    assert_eq!(engine.started().len(), 1);
    assert!(!engine.started()[0].2);
    assert_eq!(engine.freed(), vec![0]);
    assert!(engine.stopped().is_empty());
}

#[tokio::test]
async fn test_build_resolves_with_a_node() {
    let engine = Arc::new(ManualEngine::new());
    let build = Node::build(
        engine.clone(),
        &LoopHandle::current().expect("current-thread loop"),
        "/repo",
        NodeConfig::default(),
    );

    let call = engine.call(0).expect("start recorded");
    assert_eq!(call.call, EngineCall::StartAsync);
    assert_eq!(call.argument, b"/repo".to_vec());
    assert!(call.flag);

    engine.complete(0, CODE_SUCCESS, &5u64.to_le_bytes());
    let node = build.await.into_result().expect("node");
    assert_eq!(node.instance(), Some(5));
    assert_eq!(node.identity().expect("identity"), "QmManualEngineNode");

    drop(node);
    assert_eq!(engine.stopped(), vec![5]);
    assert_eq!(engine.freed(), vec![5]);
}

#[tokio::test]
async fn test_build_failure_resolves_with_the_engine_code() {
    let engine = Arc::new(ManualEngine::new());
    let recorder = OutcomeRecorder::<()>::new();
    let record = recorder.continuation();
    let loop_handle = LoopHandle::current().expect("current-thread loop");

    Node::build_with(
        engine.clone(),
        &loop_handle,
        "/repo",
        NodeConfig::default(),
        move |outcome: Outcome<Node>| record(outcome.map(drop)),
    );
    engine.complete(0, 1, &[]);
    loop_handle.until_idle().await;

    assert_eq!(
        recorder.outcomes(),
        vec![Outcome::Failure(EngineCode::RepoCreationFailed)]
    );
    assert!(engine.freed().is_empty());
}

#[tokio::test]
async fn test_build_with_malformed_instance_id_fails() {
    let engine = Arc::new(ManualEngine::new());
    let build = Node::build(
        engine.clone(),
        &LoopHandle::current().expect("current-thread loop"),
        "/repo",
        NodeConfig::default(),
    );

    engine.complete(0, CODE_SUCCESS, &[1, 2, 3]);
    assert!(matches!(
        build.await,
        Outcome::Failure(EngineCode::RepoCreationFailed)
    ));
    assert!(engine.freed().is_empty());
}

#[tokio::test]
async fn test_identity_unavailable() {
    let engine = Arc::new(ManualEngine::new().with_node_id(None));
    let node = manual_node(&engine);
    assert!(matches!(node.identity(), Err(NodeError::IdentityUnavailable)));
}

#[tokio::test]
async fn test_lifecycle_events() {
    let engine = Arc::new(ManualEngine::new());
    let sink = Arc::new(CollectingEventSink::new());
    let node = Node::start(
        engine.clone(),
        &LoopHandle::current().expect("current-thread loop"),
        "/repo",
        NodeConfig::default().with_event_sink(sink.clone()),
    )
    .expect("start");

    let pin = node.pin(SOME_CID).expect("pin");
    engine.complete(0, CODE_SUCCESS, &[]);
    assert!(pin.await.is_success());
    node.stop();

    assert_eq!(
        sink.event_types(),
        vec![
            "node.started",
            "operation.issued",
            "operation.resolved",
            "node.stopped"
        ]
    );

    let resolved = sink.payloads_of("operation.resolved");
    let data = resolved[0].as_ref().expect("payload");
    assert_eq!(data["operation"], "pin");
    assert_eq!(data["outcome"], "success");
}

#[tokio::test]
async fn test_events_reach_a_custom_sink() {
    let mut sink = MockEventSink::new();
    sink.expect_try_emit()
        .withf(|event_type, _| event_type.to_string() == "node.started")
        .times(1)
        .return_const(());
    sink.expect_try_emit()
        .withf(|event_type, _| event_type.to_string() == "node.stopped")
        .times(1)
        .return_const(());

    let engine = Arc::new(ManualEngine::new());
    let node = Node::start(
        engine,
        &LoopHandle::current().expect("current-thread loop"),
        "/repo",
        NodeConfig::default().with_event_sink(Arc::new(sink)),
    )
    .expect("start");
    drop(node);
}

// Memory engine: end to end

#[tokio::test]
async fn test_add_then_cat_round_trips() {
    let dir = tempfile::tempdir().expect("tempdir");
    let engine = MemoryEngine::default();
    let node = memory_node(&engine, dir.path(), false);

    let large: Vec<u8> = (0..(1024 * 1024 + 17)).map(|i| (i % 251) as u8).collect();
    for data in [Vec::new(), vec![7u8], large] {
        let cid = node.add(&data).expect("add").await.into_result().expect("cid");
        assert_eq!(cid.len(), crate::cid::CID_SIZE);

        let content = node.cat(&cid).expect("cat").await.into_result().expect("content");
        assert_eq!(content.len(), data.len());
        assert!(content == data);
    }
}

#[tokio::test]
async fn test_hello_in_an_empty_repository() {
    let dir = tempfile::tempdir().expect("tempdir");
    let engine: Arc<dyn Engine> = Arc::new(MemoryEngine::default());
    let node = Node::build(engine, &LoopHandle::current().expect("current-thread loop"), dir.path(), NodeConfig::offline())
        .await
        .into_result()
        .expect("node");

    let cid = node.add_str("hello").expect("add").await.into_result().expect("cid");
    assert_eq!(cid.len(), 46);
    assert!(cid.starts_with("Qm"));

    let content = node.cat(&cid).expect("cat").await.into_result().expect("content");
    assert_eq!(content, b"hello".to_vec());
    assert!(dir.path().join("config.json").exists());
}

#[tokio::test]
async fn test_concurrent_operations_resolve_independently() {
    let dir = tempfile::tempdir().expect("tempdir");
    let engine = MemoryEngine::default();
    let node = memory_node(&engine, dir.path(), false);

    let adds: Vec<_> = (0..8)
        .map(|i| node.add(format!("item {i}")).expect("add"))
        .collect();
    let cids: Vec<String> = futures::future::join_all(adds)
        .await
        .into_iter()
        .map(|outcome| outcome.into_result().expect("cid"))
        .collect();

    let cats: Vec<_> = cids.iter().map(|cid| node.cat(cid).expect("cat")).collect();
    for (i, outcome) in futures::future::join_all(cats).await.into_iter().enumerate() {
        assert_eq!(outcome, Outcome::Success(format!("item {i}").into_bytes()));
    }
    assert_eq!(node.pending_operations(), 0);
}

#[tokio::test]
async fn test_pin_and_unpin() {
    let dir = tempfile::tempdir().expect("tempdir");
    let engine = MemoryEngine::default();
    let node = memory_node(&engine, dir.path(), false);

    let cid = node.add_str("keep me").expect("add").await.into_result().expect("cid");
    assert!(node.pin(&cid).expect("pin").await.is_success());
    assert!(node.unpin(&cid).expect("unpin").await.is_success());
    assert_eq!(
        node.unpin(&cid).expect("unpin").await,
        Outcome::Failure(EngineCode::UnpinFailed)
    );
}

#[tokio::test]
async fn test_stalled_cat_cancelled_then_destroyed() {
    let dir = tempfile::tempdir().expect("tempdir");
    let engine = MemoryEngine::default();
    let node = memory_node(&engine, dir.path(), true);
    let loop_handle = node.loop_handle().clone();

    let missing = node
        .add_with_options(b"never stored", AddOptions::only_hash())
        .expect("hash")
        .await
        .into_result()
        .expect("cid");

    let recorder = OutcomeRecorder::new();
    let token = node
        .cat_with(&missing, recorder.continuation())
        .expect("cat issued");
    token.cancel();
    drop(node);

    tokio::time::timeout(Duration::from_secs(10), loop_handle.until_idle())
        .await
        .expect("idle");
    assert_eq!(recorder.outcomes(), vec![Outcome::Aborted]);

    tokio::time::timeout(Duration::from_secs(10), async {
        while engine.instance_count() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("instance freed");
}

#[tokio::test]
async fn test_fetch_times_out() {
    let dir = tempfile::tempdir().expect("tempdir");
    let engine =
        MemoryEngine::new(MemoryEngineConfig::new().with_fetch_timeout(Duration::from_millis(50)));
    let node = memory_node(&engine, dir.path(), true);

    let missing = node
        .add_with_options(b"only hashed", AddOptions::only_hash())
        .expect("hash")
        .await
        .into_result()
        .expect("cid");
    assert_eq!(
        node.cat(&missing).expect("cat").await,
        Outcome::Failure(EngineCode::from_raw(CODE_CAT_FAILED))
    );
}

#[tokio::test]
async fn test_online_peers_share_content() {
    let (first_dir, second_dir, offline_dir) = (
        tempfile::tempdir().expect("tempdir"),
        tempfile::tempdir().expect("tempdir"),
        tempfile::tempdir().expect("tempdir"),
    );
    let engine =
        MemoryEngine::new(MemoryEngineConfig::new().with_fetch_timeout(Duration::from_millis(100)));
    let first = memory_node(&engine, first_dir.path(), true);
    let second = memory_node(&engine, second_dir.path(), true);
    let offline = memory_node(&engine, offline_dir.path(), false);

    let cid = first.add_str("shared").expect("add").await.into_result().expect("cid");

    let fetched = second.cat(&cid).expect("cat").await.into_result().expect("content");
    assert_eq!(fetched, b"shared".to_vec());
    assert_eq!(
        offline.cat(&cid).expect("cat").await,
        Outcome::Failure(EngineCode::CatFailed)
    );
}

#[tokio::test]
async fn test_publish_then_resolve_across_nodes() {
    let (first_dir, second_dir) = (
        tempfile::tempdir().expect("tempdir"),
        tempfile::tempdir().expect("tempdir"),
    );
    let engine = MemoryEngine::default();
    let first = memory_node(&engine, first_dir.path(), true);
    let second = memory_node(&engine, second_dir.path(), true);

    let cid = first.add_str("record").expect("add").await.into_result().expect("cid");
    assert!(first
        .publish(&cid, Duration::from_secs(60))
        .expect("publish")
        .await
        .is_success());

    let name = first.identity().expect("identity");
    let value = second.resolve(&name).expect("resolve").await.into_result().expect("value");
    assert_eq!(value, cid);

    let prefixed = format!("/ipns/{name}");
    let value = second.resolve(&prefixed).expect("resolve").await.into_result().expect("value");
    assert_eq!(value, cid);

    assert_eq!(
        second.resolve("QmNobodyPublishedThis").expect("resolve").await,
        Outcome::Failure(EngineCode::ResolveFailed)
    );
}

#[tokio::test]
async fn test_identity_survives_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let engine = MemoryEngine::default();

    let first = memory_node(&engine, dir.path(), false).identity().expect("identity");
    let second = memory_node(&engine, dir.path(), false).identity().expect("identity");
    assert_eq!(first, second);
    assert_eq!(first.len(), 46);
}

async fn idle_briefly() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}
