//! Benchmarks for issuing and resolving operations.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::Arc;

use ipfs_bridge::errors::CODE_SUCCESS;
use ipfs_bridge::prelude::*;
use ipfs_bridge::testing::ManualEngine;

const CID: &str = "QmT78zSuBmuS4z925WZfrqQ1qHaJ56DQaTfyMUF7F8ff5o";

fn operation_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("runtime");

    c.bench_function("cat_issue_resolve", |b| {
        b.iter(|| {
            runtime.block_on(async {
                let engine = Arc::new(ManualEngine::new());
                let node = Node::start(
                    engine.clone(),
                    &LoopHandle::current().expect("current-thread loop"),
                    "/bench",
                    NodeConfig::default(),
                )
                .expect("start");

                let cat = node.cat(CID).expect("cat");
                engine.complete(0, CODE_SUCCESS, b"payload");
                black_box(cat.await)
            })
        });
    });

    c.bench_function("teardown_with_pending", |b| {
        b.iter(|| {
            runtime.block_on(async {
                let engine = Arc::new(ManualEngine::new());
                let node = Node::start(
                    engine.clone(),
                    &LoopHandle::current().expect("current-thread loop"),
                    "/bench",
                    NodeConfig::default(),
                )
                .expect("start");
                let loop_handle = node.loop_handle().clone();

                for _ in 0..16 {
                    let _ = node.pin(CID).expect("pin");
                }
                drop(node);
                engine.abandon_all();
                loop_handle.until_idle().await;
            });
        });
    });
}

criterion_group!(benches, operation_benchmark);
criterion_main!(benches);
