//! Console reporter for metrics with real-time updates

use std::collections::HashSet;
use std::io::{self, Write};

use bankload_core::metrics::percentile;
use bankload_core::{
    names, MetricsAggregator, RunReport, RunStatus, SeriesSnapshot,
    ThresholdEvaluator, Verdict,
};
use tokio::time::{interval, Duration};

use super::system::{SystemMetrics, SystemMonitor};

/// Everything the live view reads while the run is in progress.
#[derive(Clone)]
pub struct LiveView {
    pub profile: String,
    pub metrics: MetricsAggregator,
    pub status: RunStatus,
    pub thresholds: ThresholdEvaluator,
    pub system: SystemMonitor,
}

/// Start periodic metrics reporting (every N seconds)
///
/// With `redraw` the screen is cleared and redrawn in place; otherwise a
/// one-line summary is logged. Threshold breaches are logged either way,
/// once per rule, while the run continues.
pub async fn start_periodic_reporter(view: LiveView, interval_secs: u64, redraw: bool) {
    let mut ticker = interval(Duration::from_secs(interval_secs.max(1)));
    let mut breached: HashSet<String> = HashSet::new();

    // the first tick completes immediately
    ticker.tick().await;

    loop {
        ticker.tick().await;

        let system = view.system.sample();
        let verdict = view.thresholds.evaluate(&view.metrics.snapshot());

        if redraw {
            print_live_metrics(&view, &system, &verdict);
        } else {
            log_progress(&view, &system);
        }

        for outcome in &verdict.outcomes {
            let key = outcome.rule.to_string();
            // rules on metrics with no data yet are not breaches
            if !outcome.passed && outcome.observed.is_some() && breached.insert(key) {
                tracing::warn!(
                    "Threshold breached: {} (observed {})",
                    outcome.rule,
                    format_observed(outcome.observed)
                );
            }
        }
    }
}

fn log_progress(view: &LiveView, system: &SystemMetrics) {
    let elapsed = view.metrics.elapsed().as_secs();
    let requests = view.metrics.counter_total(names::HTTP_REQS);
    let (failed, total) = view.metrics.rate_counts(names::HTTP_REQ_FAILED);
    let latency = view.metrics.http_latency_stats();

    tracing::info!(
        "[{:02}:{:02}] vus={} (active {}) reqs={} failed={:.2}% p95={}ms cpu={:.1}%",
        elapsed / 60,
        elapsed % 60,
        view.status.total_live(),
        view.status.total_active(),
        requests,
        ratio(failed, total) * 100.0,
        latency.p95,
        system.cpu_usage
    );
}

/// Print live metrics (clears screen and updates in place)
pub fn print_live_metrics(view: &LiveView, system: &SystemMetrics, verdict: &Verdict) {
    // Clear screen and move cursor to top
    print!("\x1B[2J\x1B[1;1H");

    let elapsed = view.metrics.elapsed().as_secs();
    let latency = view.metrics.http_latency_stats();
    let requests = view.metrics.counter_total(names::HTTP_REQS);
    let iterations = view.metrics.counter_total(names::ITERATIONS);
    let (failed, total) = view.metrics.rate_counts(names::HTTP_REQ_FAILED);

    println!("╔════════════════════════════════════════════════════════════════╗");
    println!("║             Bank Load Test - Live Metrics ({:<8})           ║", view.profile);
    println!("╚════════════════════════════════════════════════════════════════╝");

    println!(
        "\n⏱️  Elapsed Time: {:02}:{:02}:{:02}",
        elapsed / 3600,
        (elapsed % 3600) / 60,
        elapsed % 60
    );

    println!("\n┌─ SCENARIOS ─────────────────────────────────────────────────┐");
    for (name, status) in view.status.snapshot() {
        println!(
            "│  {:<20} {:<9} VUs {:>4}/{:<4} retiring {:>4} iters {:>8} │",
            truncate(&name, 20),
            status.phase.to_string(),
            status.live(),
            status.target,
            status.retiring,
            status.iterations
        );
    }
    println!("└─────────────────────────────────────────────────────────────┘");

    println!("\n┌─ HTTP ──────────────────────────────────────────────────────┐");
    println!(
        "│  Requests:     {:>8}    Iterations: {:>8}              │",
        requests, iterations
    );
    let throughput = if elapsed > 0 {
        requests / elapsed as f64
    } else {
        0.0
    };
    println!(
        "│  Failed:       {:>7.2}%    Throughput: {:>7.2}/sec        │",
        ratio(failed, total) * 100.0,
        throughput
    );
    println!("└─────────────────────────────────────────────────────────────┘");

    if latency.count > 0 {
        println!("\n┌─ HTTP LATENCY (ms) ─────────────────────────────────────────┐");
        println!(
            "│  Min: {:>6}  P50: {:>6}  P95: {:>6}  P99: {:>6}  Max: {:>6}│",
            latency.min, latency.p50, latency.p95, latency.p99, latency.max
        );
        println!(
            "│  Mean: {:>8.2} ms    Count: {:>10}                    │",
            latency.mean, latency.count
        );
        println!("└─────────────────────────────────────────────────────────────┘");
    }

    if !verdict.outcomes.is_empty() {
        println!("\n┌─ THRESHOLDS ────────────────────────────────────────────────┐");
        for outcome in &verdict.outcomes {
            println!(
                "│  {} {:<40} {:>12} │",
                mark(outcome.passed),
                truncate(&outcome.rule.to_string(), 40),
                format_observed(outcome.observed)
            );
        }
        println!("└─────────────────────────────────────────────────────────────┘");
    }

    println!("\n┌─ SYSTEM ────────────────────────────────────────────────────┐");
    println!(
        "│  CPU Usage:    {:>6.1}%    Memory: {:>6} / {:>6} MB       │",
        system.cpu_usage, system.memory_used_mb, system.memory_total_mb
    );
    println!("└─────────────────────────────────────────────────────────────┘");

    println!("\n  [Press Ctrl+C to stop test]");

    // Flush stdout to ensure immediate display
    let _ = io::stdout().flush();
}

/// Print final summary report
pub fn print_final_report(profile: &str, report: &RunReport) {
    let snapshot = &report.snapshot;
    let elapsed = snapshot.elapsed.as_secs_f64();

    println!("\n╔════════════════════════════════════════════════════════════════╗");
    println!("║                    FINAL TEST REPORT                           ║");
    println!("╚════════════════════════════════════════════════════════════════╝");
    println!("\n   Profile:              {:>10}", profile);

    if let Some(setup) = &report.provisioning {
        println!("\n👥 PROVISIONING");
        println!("   Identities Created:   {:>10} / {}", setup.created, setup.attempted);
        println!("   Setup Time:           {:>10.2} s", setup.elapsed.as_secs_f64());
        for failure in &setup.failures {
            println!(
                "   slot {:>4} failed at {}: {}",
                failure.slot, failure.step, failure.error
            );
        }
    }

    println!("\n🚦 SCENARIOS");
    for scenario in &report.scenarios {
        println!(
            "   {:<22} iterations {:>8}   peak VUs {:>5}",
            scenario.name, scenario.iterations, scenario.peak_vus
        );
    }

    println!("\n📊 METRICS");
    for (name, series) in &snapshot.metrics {
        if name.starts_with(names::OPERATION_SUCCESS) {
            continue;
        }
        println!("   {:<36} {}", name, describe(series, elapsed));
    }

    let operations = snapshot.operation_counts();
    if !operations.is_empty() {
        println!("\n⚙️  OPERATIONS");
        for (operation, total, succeeded) in operations {
            println!(
                "   {:<16} {:>8} calls   {:>7.2}% ok",
                operation.name(),
                total,
                ratio(succeeded, total) * 100.0
            );
        }
    }

    println!("\n✅ THRESHOLDS");
    if report.verdict.outcomes.is_empty() {
        println!("   (none)");
    }
    for outcome in &report.verdict.outcomes {
        println!(
            "   {} {:<44} observed {}",
            mark(outcome.passed),
            outcome.rule.to_string(),
            format_observed(outcome.observed)
        );
    }

    println!("\n⏱️  Test Duration: {:.2} seconds", report.elapsed.as_secs_f64());
    println!(
        "   Result: {}",
        if report.verdict.pass { "PASSED" } else { "FAILED" }
    );
    println!("════════════════════════════════════════════════════════════════\n");
}

/// avg/min/med/max/p90/p95/p99 over ascending samples.
#[derive(Debug, Clone, PartialEq)]
pub struct TrendStats {
    pub avg: f64,
    pub min: f64,
    pub med: f64,
    pub max: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

pub fn trend_stats(sorted: &[f64]) -> Option<TrendStats> {
    let (min, max) = (*sorted.first()?, *sorted.last()?);
    Some(TrendStats {
        avg: sorted.iter().sum::<f64>() / sorted.len() as f64,
        min,
        med: percentile(sorted, 50.0)?,
        max,
        p90: percentile(sorted, 90.0)?,
        p95: percentile(sorted, 95.0)?,
        p99: percentile(sorted, 99.0)?,
    })
}

fn describe(series: &SeriesSnapshot, elapsed_secs: f64) -> String {
    match series {
        SeriesSnapshot::Trend(sorted) => match trend_stats(sorted) {
            Some(s) => format!(
                "avg={:.2} min={:.2} med={:.2} max={:.2} p(90)={:.2} p(95)={:.2} p(99)={:.2}",
                s.avg, s.min, s.med, s.max, s.p90, s.p95, s.p99
            ),
            None => "no samples".to_string(),
        },
        SeriesSnapshot::Rate { hits, total } => {
            format!("{:.2}% ({} of {})", ratio(*hits, *total) * 100.0, hits, total)
        }
        SeriesSnapshot::Counter { sum, .. } => {
            let rate = if elapsed_secs > 0.0 {
                sum / elapsed_secs
            } else {
                0.0
            };
            format!("{} ({:.2}/s)", sum, rate)
        }
    }
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

fn mark(passed: bool) -> &'static str {
    if passed {
        "✓"
    } else {
        "✗"
    }
}

fn format_observed(observed: Option<f64>) -> String {
    match observed {
        Some(value) => format!("{:.4}", value),
        None => "no data".to_string(),
    }
}

fn truncate(text: &str, width: usize) -> String {
    text.chars().take(width).collect()
}
