use aion_scheduler::priority::ReadyQueue;
use aion_domain::task::GpuClass;
use chrono::{Duration, Utc};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use uuid::Uuid;

fn fill_queue(n: usize) -> ReadyQueue {
    let mut queue = ReadyQueue::new();
    for i in 0..n {
        let deadline = if i % 3 == 0 {
            Some(Utc::now() + Duration::seconds(30 + i as i64))
        } else {
            None
        };
        queue.push(
            Uuid::new_v4(),
            aion_domain::task::TaskHandle(i as u32),
            GpuClass::A100,
            1.0 + (i % 5) as f64,
            deadline,
            60 + (i as u64 % 120),
        );
    }
    queue
}

fn push_1000(c: &mut Criterion) {
    c.bench_function("ready_queue_push_1000", |b| {
        b.iter(|| {
            let queue = fill_queue(black_box(1000));
            black_box(queue.len());
        });
    });
}

fn pop_all_from_1000(c: &mut Criterion) {
    c.bench_function("ready_queue_drain_1000", |b| {
        b.iter_batched(
            || fill_queue(1000),
            |mut queue| {
                while let Some(entry) = queue.pop_next() {
                    black_box(entry.priority);
                }
            },
            criterion::BatchSize::LargeInput,
        );
    });
}

criterion_group!(benches, push_1000, pop_all_from_1000);
criterion_main!(benches);
