//! # Adaptive Sampling Demo
//!
//! Drives simulated HTTP requests through the pipeline and reports what the
//! head sampler kept, what the tail processors rescued and what was dropped.
//!
//! Each simulated request picks a route from a weighted mix (health checks,
//! metrics scrapes, auth, admin and general API traffic), a latency and a
//! status code. About 3% of requests are slow and about 5% fail, so the
//! rescue path is visible even though the default API rate is 10%.
//!
//! ## Running
//!
//! ```bash
//! # 5000 requests, summary only
//! cargo run -p span_pipeline --bin demo --release
//!
//! # Fewer requests, print every exported batch
//! cargo run -p span_pipeline --bin demo -- --requests 200 --verbose
//!
//! # Write exported spans as JSON lines
//! cargo run -p span_pipeline --bin demo -- --json spans.jsonl
//!
//! # See pipeline logs
//! RUST_LOG=span_pipeline=debug cargo run -p span_pipeline --bin demo
//! ```
//!
//! Ctrl-C stops the simulation early and still drains the exporter.

use rand::Rng;
use span_pipeline::{
    shutdown_on_signal, Disposition, ExportError, JsonFileExporter, PipelineConfig, PipelineCoordinator,
    SamplerMode, Span, SpanBatch, SpanExporter, SpanExporterBoxed, SpanStatus, StdoutExporter, Timestamp,
};
use span_pipeline::span::{HTTP_ROUTE, HTTP_STATUS_CODE};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const ROUTES: [(&str, u32); 7] = [
    ("/health", 20),
    ("/metrics", 10),
    ("/api/auth/login", 5),
    ("/api/admin/users", 5),
    ("/api/orders", 35),
    ("/api/orders/{id}", 20),
    ("/static/app.js", 5),
];

struct Args {
    requests: usize,
    verbose: bool,
    json: Option<String>,
}

impl Args {
    fn parse() -> Self {
        let mut args = Self {
            requests: 5_000,
            verbose: false,
            json: None,
        };
        let mut iter = std::env::args().skip(1);
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--requests" => {
                    if let Some(n) = iter.next().and_then(|v| v.parse().ok()) {
                        args.requests = n;
                    }
                }
                "--verbose" => args.verbose = true,
                "--json" => args.json = iter.next(),
                other => eprintln!("ignoring unknown argument `{other}`"),
            }
        }
        args
    }
}

/// Wraps the real exporter and counts what reaches the backend.
struct CountingExporter {
    inner: Arc<dyn SpanExporterBoxed>,
    exported: AtomicU64,
    rescued: AtomicU64,
}

impl CountingExporter {
    fn new(inner: Arc<dyn SpanExporterBoxed>) -> Self {
        Self {
            inner,
            exported: AtomicU64::new(0),
            rescued: AtomicU64::new(0),
        }
    }
}

impl SpanExporter for CountingExporter {
    async fn export(&self, batch: SpanBatch) -> Result<(), ExportError> {
        let rescued = batch
            .spans
            .iter()
            .filter(|s| s.sampling_decision.is_some_and(|d| !d.is_sampled()))
            .count() as u64;
        let total = batch.len() as u64;
        self.inner.export_boxed(batch).await?;
        self.exported.fetch_add(total, Ordering::Relaxed);
        self.rescued.fetch_add(rescued, Ordering::Relaxed);
        Ok(())
    }

    fn name(&self) -> &str {
        "counting"
    }
}

#[derive(Default)]
struct Tally {
    head_sampled: u64,
    rescued: u64,
    discarded: u64,
    rejected: u64,
}

const FAILURE_STATUSES: [i64; 4] = [404, 429, 500, 503];

/// A finished request span and the status code its response carried.
fn simulated_request(rng: &mut impl Rng, now_ms: u64) -> (Span, i64) {
    let total_weight: u32 = ROUTES.iter().map(|(_, w)| w).sum();
    let mut pick = rng.gen_range(0..total_weight);
    let route = ROUTES
        .iter()
        .find(|(_, weight)| {
            if pick < *weight {
                true
            } else {
                pick -= weight;
                false
            }
        })
        .map_or("/api/orders", |(route, _)| *route);

    let latency_ms = if rng.gen_bool(0.03) {
        rng.gen_range(2_001..6_000)
    } else {
        rng.gen_range(5..900)
    };
    let status = if rng.gen_bool(0.05) {
        FAILURE_STATUSES[rng.gen_range(0..FAILURE_STATUSES.len())]
    } else {
        200
    };

    let trace_id = format!("{:032x}", rng.gen::<u128>());
    let span_id = format!("{:016x}", rng.gen::<u64>());
    let mut span = Span::new(trace_id, span_id, format!("GET {route}"))
        .with_attribute(HTTP_ROUTE, route)
        .with_times(Timestamp::from_millis(now_ms), Timestamp::from_millis(now_ms + latency_ms));
    span.status = if status >= 500 { SpanStatus::Error } else { SpanStatus::Ok };
    (span, status)
}

async fn simulate(pipeline: &PipelineCoordinator, requests: usize) -> Tally {
    let mut rng = rand::thread_rng();
    let mut tally = Tally::default();
    let start_ms = Timestamp::now().as_nanos() as u64 / 1_000_000;

    for i in 0..requests {
        let (mut span, status) = simulated_request(&mut rng, start_ms + i as u64);
        pipeline.on_start(&mut span);
        // The status code is only known once the response is written.
        span.set_attribute(HTTP_STATUS_CODE, status);

        match pipeline.on_end(span) {
            Disposition::Exported { rescued: false } => tally.head_sampled += 1,
            Disposition::Exported { rescued: true } => tally.rescued += 1,
            Disposition::Discarded => tally.discarded += 1,
            Disposition::Rejected(_) => tally.rejected += 1,
        }

        if i % 256 == 0 {
            tokio::task::yield_now().await;
        }
    }
    tally
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let mut config = PipelineConfig::from_env();
    config.enabled = true;
    config.sampler_mode = SamplerMode::RuleBased;
    config.test_mode = true;
    config.endpoint.get_or_insert_with(|| "http://localhost:4318".to_owned());
    config.service.name = "demo".to_owned();

    let backend: Arc<dyn SpanExporterBoxed> = match &args.json {
        Some(path) => Arc::new(JsonFileExporter::new(path.clone())),
        None => Arc::new(StdoutExporter::new(args.verbose)),
    };
    let counting = Arc::new(CountingExporter::new(backend));

    let factory_exporter = Arc::clone(&counting);
    let pipeline = match PipelineCoordinator::init(config, move |settings| {
        tracing::info!(endpoint = %settings.endpoint, "exporter configured");
        Ok(factory_exporter as Arc<dyn SpanExporterBoxed>)
    }) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            eprintln!("invalid telemetry configuration: {e}");
            std::process::exit(1);
        }
    };

    println!("Simulating {} requests (Ctrl-C to stop early)...", args.requests);
    let tally = tokio::select! {
        tally = simulate(&pipeline, args.requests) => Some(tally),
        outcome = shutdown_on_signal(&pipeline) => {
            println!("Interrupted, shutdown: {outcome:?}");
            None
        }
    };
    let outcome = pipeline.shutdown().await;

    println!();
    println!("=== Results ===");
    if let Some(tally) = tally {
        let total = (tally.head_sampled + tally.rescued + tally.discarded + tally.rejected).max(1);
        println!("Head sampled:    {:>6}", tally.head_sampled);
        println!("Rescued by tail: {:>6}", tally.rescued);
        println!("Discarded:       {:>6}", tally.discarded);
        println!("Rejected:        {:>6}", tally.rejected);
        println!(
            "Export ratio:    {:>6.2}%",
            (tally.head_sampled + tally.rescued) as f64 * 100.0 / total as f64
        );
    }
    println!(
        "Backend received {} spans ({} rescued)",
        counting.exported.load(Ordering::Relaxed),
        counting.rescued.load(Ordering::Relaxed)
    );
    println!("Shutdown: {outcome:?}");
}
