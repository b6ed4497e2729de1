//! Metrics registry containing all observability metrics for the service.
//!
//! Counters are lock-free atomics; per-label breakdowns use concurrent
//! hashmaps.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;

use super::Histogram;

/// Central registry for all observability metrics.
pub struct MetricsRegistry {
    /// Contract-number allocation metrics
    pub allocation: Arc<AllocationMetrics>,
    /// Generated, downloaded and uploaded documents
    pub documents: Arc<DocumentMetrics>,
    /// Background PDF conversion metrics
    pub conversion: Arc<ConversionMetrics>,
    /// Per-route request and error metrics
    pub api: Arc<ApiMetrics>,
    start_time: Instant,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            allocation: Arc::new(AllocationMetrics::default()),
            documents: Arc::new(DocumentMetrics::default()),
            conversion: Arc::new(ConversionMetrics::default()),
            api: Arc::new(ApiMetrics::default()),
            start_time: Instant::now(),
        }
    }

    pub fn uptime_secs(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }

    /// Formats all metrics in Prometheus exposition format.
    pub fn format_prometheus(&self) -> String {
        let mut output = String::with_capacity(8192);

        write_metric(
            &mut output,
            "contractor_uptime_secs",
            "gauge",
            "Server uptime in seconds",
            format!("{:.3}", self.uptime_secs()),
        );
        output.push_str(&self.allocation.format_prometheus());
        output.push_str(&self.documents.format_prometheus());
        output.push_str(&self.conversion.format_prometheus());
        output.push_str(&self.api.format_prometheus());

        output
    }
}

fn write_metric(output: &mut String, name: &str, kind: &str, help: &str, value: impl std::fmt::Display) {
    let _ = writeln!(output, "# HELP {} {}", name, help);
    let _ = writeln!(output, "# TYPE {} {}", name, kind);
    let _ = writeln!(output, "{} {}", name, value);
    output.push('\n');
}

fn load(v: &AtomicU64) -> u64 {
    v.load(Ordering::Relaxed)
}

/// Metrics for contract-number allocation.
#[derive(Default)]
pub struct AllocationMetrics {
    /// Numbers issued by the primary counter store
    pub allocations_total: AtomicU64,
    /// Allocations whose sequence cycled back to 1 after the first cycle
    pub wraps_total: AtomicU64,
    /// Allocations that failed on the primary counter store
    pub failures_total: AtomicU64,
    /// Numbers issued by the degraded fallback store
    pub fallback_allocations_total: AtomicU64,
    /// Latency of a single allocation in microseconds
    pub allocation_latency_us: Histogram,
}

impl AllocationMetrics {
    #[inline]
    pub fn record_allocation(&self, latency_us: u64, wrapped: bool) {
        self.allocations_total.fetch_add(1, Ordering::Relaxed);
        if wrapped {
            self.wraps_total.fetch_add(1, Ordering::Relaxed);
        }
        self.allocation_latency_us.observe(latency_us);
    }

    #[inline]
    pub fn record_failure(&self) {
        self.failures_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_fallback(&self) {
        self.fallback_allocations_total
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn format_prometheus(&self) -> String {
        let mut output = String::with_capacity(2048);

        write_metric(
            &mut output,
            "contractor_allocations_total",
            "counter",
            "Contract numbers issued by the primary counter store",
            load(&self.allocations_total),
        );
        write_metric(
            &mut output,
            "contractor_allocation_wraps_total",
            "counter",
            "Allocations that cycled the sequence back to 001",
            load(&self.wraps_total),
        );
        write_metric(
            &mut output,
            "contractor_allocation_failures_total",
            "counter",
            "Allocations that failed on the primary counter store",
            load(&self.failures_total),
        );
        write_metric(
            &mut output,
            "contractor_fallback_allocations_total",
            "counter",
            "Contract numbers issued by the degraded fallback store",
            load(&self.fallback_allocations_total),
        );
        output.push_str(&self.allocation_latency_us.format_prometheus(
            "contractor_allocation_latency_us",
            "Allocation latency histogram in microseconds",
        ));
        output.push('\n');

        output
    }
}

/// Metrics for generated, downloaded and uploaded documents.
#[derive(Default)]
pub struct DocumentMetrics {
    pub contracts_generated_total: AtomicU64,
    /// Generate requests answered from the duplicate-client cache
    pub cached_responses_total: AtomicU64,
    pub validation_failures_total: AtomicU64,
    pub downloads_total: AtomicU64,
    pub signed_uploads_total: AtomicU64,
    pub signed_upload_bytes_total: AtomicU64,
}

impl DocumentMetrics {
    #[inline]
    pub fn record_generated(&self) {
        self.contracts_generated_total
            .fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_cached(&self) {
        self.cached_responses_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_validation_failure(&self) {
        self.validation_failures_total
            .fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_download(&self) {
        self.downloads_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_signed_upload(&self, bytes: u64) {
        self.signed_uploads_total.fetch_add(1, Ordering::Relaxed);
        self.signed_upload_bytes_total
            .fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn format_prometheus(&self) -> String {
        let mut output = String::with_capacity(1024);

        write_metric(
            &mut output,
            "contractor_contracts_generated_total",
            "counter",
            "Contracts generated",
            load(&self.contracts_generated_total),
        );
        write_metric(
            &mut output,
            "contractor_cached_responses_total",
            "counter",
            "Generate requests answered from the duplicate-client cache",
            load(&self.cached_responses_total),
        );
        write_metric(
            &mut output,
            "contractor_validation_failures_total",
            "counter",
            "Requests rejected by validation",
            load(&self.validation_failures_total),
        );
        write_metric(
            &mut output,
            "contractor_downloads_total",
            "counter",
            "Documents served for download",
            load(&self.downloads_total),
        );
        write_metric(
            &mut output,
            "contractor_signed_uploads_total",
            "counter",
            "Signed contract copies uploaded",
            load(&self.signed_uploads_total),
        );
        write_metric(
            &mut output,
            "contractor_signed_upload_bytes_total",
            "counter",
            "Bytes of signed contract copies uploaded",
            load(&self.signed_upload_bytes_total),
        );

        output
    }
}

/// Metrics for background PDF conversion.
#[derive(Default)]
pub struct ConversionMetrics {
    pub started_total: AtomicU64,
    pub succeeded_total: AtomicU64,
    pub failed_total: AtomicU64,
    /// Conversions currently running
    pub inflight: AtomicU64,
    pub duration_us: Histogram,
}

impl ConversionMetrics {
    #[inline]
    pub fn record_started(&self) {
        self.started_total.fetch_add(1, Ordering::Relaxed);
        self.inflight.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_finished(&self, success: bool, duration_us: u64) {
        if success {
            self.succeeded_total.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_total.fetch_add(1, Ordering::Relaxed);
        }
        self.inflight.fetch_sub(1, Ordering::Relaxed);
        self.duration_us.observe(duration_us);
    }

    pub fn format_prometheus(&self) -> String {
        let mut output = String::with_capacity(2048);

        write_metric(
            &mut output,
            "contractor_conversions_started_total",
            "counter",
            "PDF conversions started",
            load(&self.started_total),
        );
        write_metric(
            &mut output,
            "contractor_conversions_succeeded_total",
            "counter",
            "PDF conversions that produced a stored PDF",
            load(&self.succeeded_total),
        );
        write_metric(
            &mut output,
            "contractor_conversions_failed_total",
            "counter",
            "PDF conversions that failed or timed out",
            load(&self.failed_total),
        );
        write_metric(
            &mut output,
            "contractor_conversions_inflight",
            "gauge",
            "PDF conversions currently running",
            load(&self.inflight),
        );
        output.push_str(&self.duration_us.format_prometheus(
            "contractor_conversion_duration_us",
            "PDF conversion duration histogram in microseconds",
        ));
        output.push('\n');

        output
    }
}

/// Per-route request counts, error codes and generate latency.
#[derive(Default)]
pub struct ApiMetrics {
    pub requests_by_route: DashMap<&'static str, AtomicU64>,
    pub errors_by_code: DashMap<&'static str, AtomicU64>,
    /// End-to-end latency of the generate endpoint
    pub generate_latency_us: Histogram,
}

impl ApiMetrics {
    #[inline]
    pub fn record_request(&self, route: &'static str) {
        self.requests_by_route
            .entry(route)
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_error(&self, code: &'static str) {
        self.errors_by_code
            .entry(code)
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn errors_total(&self) -> u64 {
        self.errors_by_code.iter().map(|e| load(e.value())).sum()
    }

    pub fn format_prometheus(&self) -> String {
        let mut output = String::with_capacity(2048);

        let _ = writeln!(
            output,
            "# HELP contractor_requests_total Requests per route"
        );
        let _ = writeln!(output, "# TYPE contractor_requests_total counter");
        let mut routes: Vec<(&str, u64)> = self
            .requests_by_route
            .iter()
            .map(|e| (*e.key(), load(e.value())))
            .collect();
        routes.sort_unstable();
        for (route, count) in routes {
            let _ = writeln!(
                output,
                "contractor_requests_total{{route=\"{}\"}} {}",
                route, count
            );
        }
        output.push('\n');

        let _ = writeln!(
            output,
            "# HELP contractor_errors_total Error responses per error code"
        );
        let _ = writeln!(output, "# TYPE contractor_errors_total counter");
        let mut codes: Vec<(&str, u64)> = self
            .errors_by_code
            .iter()
            .map(|e| (*e.key(), load(e.value())))
            .collect();
        codes.sort_unstable();
        for (code, count) in codes {
            let _ = writeln!(
                output,
                "contractor_errors_total{{code=\"{}\"}} {}",
                code, count
            );
        }
        output.push('\n');

        output.push_str(&self.generate_latency_us.format_prometheus(
            "contractor_generate_latency_us",
            "Generate endpoint latency histogram in microseconds",
        ));
        output.push('\n');

        output
    }
}
