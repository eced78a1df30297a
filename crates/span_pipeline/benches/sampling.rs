use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use span_pipeline::span::{HTTP_ROUTE, HTTP_STATUS_CODE};
use span_pipeline::{
    Attributes, PipelineConfig, PipelineCoordinator, Sampler, Span, SpanStatus, Timestamp,
};

const TRACE_IDS: usize = 1024;

fn trace_ids() -> Vec<String> {
    (0..TRACE_IDS as u128)
        .map(|i| format!("{:032x}", i.wrapping_mul(0x9e37_79b9_7f4a_7c15_f39c_c060_5ced_c834)))
        .collect()
}

fn bench_head_decision(c: &mut Criterion) {
    let sampler = Sampler::builtin();
    let ids = trace_ids();
    let ok = Attributes::new();
    let mut failed = Attributes::new();
    failed.insert(HTTP_STATUS_CODE.to_owned(), 503i64.into());

    let mut group = c.benchmark_group("should_sample");
    group.throughput(Throughput::Elements(TRACE_IDS as u64));

    let cases = [
        ("health", "/health/live", &ok),
        ("auth", "/api/auth/login", &ok),
        ("api", "/api/orders", &ok),
        ("default", "/static/app.js", &ok),
        ("error_override", "/api/orders", &failed),
    ];
    for (label, path, attributes) in cases {
        group.bench_with_input(BenchmarkId::from_parameter(label), &path, |b, path| {
            b.iter(|| {
                for id in &ids {
                    black_box(sampler.should_sample(black_box(id), path, attributes));
                }
            });
        });
    }

    group.finish();
}

fn bench_end_to_end(c: &mut Criterion) {
    let config = PipelineConfig {
        enabled: true,
        test_mode: true,
        ..Default::default()
    };
    // No sink: measures sampling, enrichment and reconciliation only.
    let pipeline = match PipelineCoordinator::builder(config).build() {
        Ok(pipeline) => pipeline,
        Err(e) => panic!("pipeline config: {e}"),
    };
    let ids = trace_ids();

    let mut group = c.benchmark_group("lifecycle");
    group.throughput(Throughput::Elements(TRACE_IDS as u64));

    for (label, latency_ms, status) in [("fast_ok", 40u64, 200i64), ("slow", 2_500, 200), ("failed", 30, 500)] {
        group.bench_function(label, |b| {
            b.iter(|| {
                for id in &ids {
                    let mut span = Span::new(id.as_str(), "00f067aa0ba902b7", "GET")
                        .with_attribute(HTTP_ROUTE, "/api/orders")
                        .with_times(Timestamp::new(1, 0), Timestamp::from_millis(1_000 + latency_ms));
                    pipeline.on_start(&mut span);
                    span.set_attribute(HTTP_STATUS_CODE, status);
                    span.status = if status >= 500 { SpanStatus::Error } else { SpanStatus::Ok };
                    black_box(pipeline.on_end(span));
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_head_decision, bench_end_to_end);
criterion_main!(benches);
