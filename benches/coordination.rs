// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Benchmarks for the hub's in-memory coordination paths.
//!
//! No git and no agent processes are involved:
//! - Port lease acquire/release
//! - Task creation and step updates
//! - Solicitation creation and sorted listing
//! - Event fan-out
//!
//! Run with: `cargo bench --bench coordination`

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;

use hive::hub::{EventHub, HubEvent};
use hive::port::{AcquireRequest, PortRegistry, ReleaseRequest};
use hive::solicitation::{CreateRequest, SolicitationFilter, SolicitationManager, Urgency};
use hive::task::{CreateStepRequest, CreateTaskRequest, StepStatus, TaskManager, UpdateStepRequest};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("tokio runtime")
}

/// Benchmark a full lease cycle on an uncontended port.
fn bench_port_leases(c: &mut Criterion) {
    let rt = runtime();
    let registry = {
        let _guard = rt.enter();
        PortRegistry::new(None)
    };

    let mut group = c.benchmark_group("port_registry");
    group.bench_function("acquire_release", |b| {
        b.to_async(&rt).iter(|| async {
            let resp = registry
                .acquire(AcquireRequest::new(45_000, "bench").with_service("vite"))
                .await
                .unwrap();
            black_box(resp.is_acquired());
            registry
                .release(ReleaseRequest {
                    port: 45_000,
                    agent_id: "bench".to_string(),
                })
                .unwrap();
        });
    });

    group.bench_function("busy", |b| {
        rt.block_on(registry.acquire(AcquireRequest::new(45_001, "holder")))
            .unwrap();
        b.to_async(&rt).iter(|| async {
            black_box(
                registry
                    .acquire(AcquireRequest::new(45_001, "other"))
                    .await
                    .unwrap(),
            )
        });
    });
    group.finish();
}

/// Benchmark task creation and progress updates.
fn bench_tasks(c: &mut Criterion) {
    let rt = runtime();
    let _guard = rt.enter();
    let tasks = TaskManager::new(None);

    let mut group = c.benchmark_group("task_manager");
    group.bench_function("create", |b| {
        b.iter(|| {
            let req = CreateTaskRequest::new("Add login page")
                .with_agent("a1", "frontend")
                .with_step(CreateStepRequest::new("Write form", &["form renders"]))
                .with_step(CreateStepRequest::new("Wire API", &["login works"]));
            black_box(tasks.create(req).unwrap())
        });
    });

    group.bench_function("update_step", |b| {
        let task = tasks
            .create(
                CreateTaskRequest::new("Refactor")
                    .with_agent("a2", "backend")
                    .with_step(CreateStepRequest::new("Split module", &["tests pass"])),
            )
            .unwrap();
        tasks.start(&task.id).unwrap();
        b.iter(|| {
            black_box(
                tasks
                    .update_step(&task.id, 1, UpdateStepRequest::new(StepStatus::InProgress))
                    .unwrap(),
            )
        });
    });
    group.finish();
}

/// Benchmark listing pending solicitations at different backlog sizes.
fn bench_solicitations(c: &mut Criterion) {
    let rt = runtime();
    let _guard = rt.enter();

    let mut group = c.benchmark_group("solicitation_list");
    for size in [10usize, 100, 1000] {
        let manager = SolicitationManager::new(None);
        let urgencies = [Urgency::Low, Urgency::Medium, Urgency::High, Urgency::Critical];
        for i in 0..size {
            manager
                .create(
                    CreateRequest::new(format!("a{}", i % 8), format!("question {}", i))
                        .with_urgency(urgencies[i % urgencies.len()]),
                )
                .unwrap();
        }

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| black_box(manager.list(&SolicitationFilter::pending())))
        });
    }
    group.finish();
}

/// Benchmark publishing to a set of subscribers.
fn bench_event_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_hub");
    for subscribers in [0usize, 1, 16] {
        let hub = EventHub::new();
        let _receivers: Vec<_> = (0..subscribers).map(|_| hub.subscribe()).collect();

        group.bench_with_input(
            BenchmarkId::new("publish", subscribers),
            &subscribers,
            |b, _| {
                b.iter(|| {
                    hub.publish(HubEvent::new(
                        "task.progress",
                        serde_json::json!({ "progress": 50 }),
                    ))
                })
            },
        );
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_port_leases,
    bench_tasks,
    bench_solicitations,
    bench_event_fanout,
);
criterion_main!(benches);
