use aion_cost_optimizer::window::PriceWindow;
use aion_providers::ProviderRouter;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn ewma_smoothing_throughput(c: &mut Criterion) {
    c.bench_function("price_window_observe_10000", |b| {
        b.iter(|| {
            let mut window = PriceWindow::default();
            for i in 0..10_000 {
                window.observe(black_box(1.0 + (i % 37) as f64 * 0.01));
            }
            black_box(window.smoothed());
        });
    });
}

fn migration_trigger_evaluation(c: &mut Criterion) {
    c.bench_function("migration_worthwhile_10000", |b| {
        b.iter(|| {
            for i in 0..10_000 {
                let current = 1.0 + (i % 11) as f64 * 0.05;
                let candidate = current * (0.7 + (i % 5) as f64 * 0.02);
                black_box(ProviderRouter::migration_worthwhile(
                    current,
                    candidate,
                    0.15,
                    0.5,
                    10.0,
                ));
            }
        });
    });
}

criterion_group!(benches, ewma_smoothing_throughput, migration_trigger_evaluation);
criterion_main!(benches);
