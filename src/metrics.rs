//! Prometheus metrics for the registry server.
//!
//! # Metric categories
//!
//! - **HTTP**: request counts, latencies, in-flight gauge by method/path/status
//! - **Storage**: blob/manifest object operations, bytes transferred, latencies
//! - **Registry**: push/pull counts, quota usage, policy decisions
//! - **Scan**: scan durations and outcomes by status
//! - **GC**: sweep outcomes

#[cfg(feature = "metrics")]
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};

#[cfg(feature = "metrics")]
const HTTP_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

#[cfg(feature = "metrics")]
const STORAGE_LATENCY_BUCKETS: &[f64] = &[
    0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

#[cfg(feature = "metrics")]
const SCAN_LATENCY_BUCKETS: &[f64] = &[0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0];

#[cfg(feature = "metrics")]
#[derive(Clone)]
pub struct RegistryMetrics {
    pub registry: Registry,

    // ============ HTTP ============
    pub http_requests_total: IntCounterVec,
    pub http_request_duration_seconds: HistogramVec,
    pub http_requests_in_flight: IntGauge,

    // ============ Storage ============
    pub storage_operations_total: IntCounterVec,
    pub storage_operation_duration_seconds: HistogramVec,
    pub storage_bytes_total: IntCounterVec,
    pub storage_errors_total: IntCounterVec,

    // ============ Registry ============
    pub blob_pushes_total: IntCounter,
    pub manifest_pushes_total: IntCounterVec,
    pub manifest_pulls_total: IntCounterVec,
    pub policy_denials_total: IntCounterVec,
    pub namespace_usage_bytes: IntGaugeVec,

    // ============ Scan ============
    pub scans_total: IntCounterVec,
    pub scan_duration_seconds: Histogram,

    // ============ GC ============
    pub gc_runs_total: IntCounter,
    pub gc_blobs_deleted_total: IntCounter,
    pub gc_manifests_deleted_total: IntCounter,
    pub gc_space_freed_bytes_total: IntCounter,
}

#[cfg(feature = "metrics")]
impl RegistryMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        Self::with_registry(Registry::new())
    }

    pub fn with_registry(registry: Registry) -> Result<Self, prometheus::Error> {
        let http_requests_total = IntCounterVec::new(
            Opts::new("registry_http_requests_total", "Total HTTP requests").namespace("registry"),
            &["method", "path", "status"],
        )?;

        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "registry_http_request_duration_seconds",
                "HTTP request duration in seconds",
            )
            .namespace("registry")
            .buckets(HTTP_LATENCY_BUCKETS.to_vec()),
            &["method", "path"],
        )?;

        let http_requests_in_flight = IntGauge::new(
            "registry_http_requests_in_flight",
            "Currently in-flight HTTP requests",
        )?;

        let storage_operations_total = IntCounterVec::new(
            Opts::new("registry_storage_operations_total", "Storage operations by type")
                .namespace("registry"),
            &["operation", "backend"],
        )?;

        let storage_operation_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "registry_storage_operation_duration_seconds",
                "Storage operation duration in seconds",
            )
            .namespace("registry")
            .buckets(STORAGE_LATENCY_BUCKETS.to_vec()),
            &["operation", "backend"],
        )?;

        let storage_bytes_total = IntCounterVec::new(
            Opts::new("registry_storage_bytes_total", "Storage bytes transferred")
                .namespace("registry"),
            &["direction", "backend"],
        )?;

        let storage_errors_total = IntCounterVec::new(
            Opts::new("registry_storage_errors_total", "Storage operation errors")
                .namespace("registry"),
            &["operation", "backend"],
        )?;

        let blob_pushes_total = IntCounter::new(
            "registry_blob_pushes_total",
            "Total blob upload completions",
        )?;

        let manifest_pushes_total = IntCounterVec::new(
            Opts::new("registry_manifest_pushes_total", "Manifest pushes by outcome")
                .namespace("registry"),
            &["outcome"],
        )?;

        let manifest_pulls_total = IntCounterVec::new(
            Opts::new("registry_manifest_pulls_total", "Manifest pulls by outcome")
                .namespace("registry"),
            &["outcome"],
        )?;

        let policy_denials_total = IntCounterVec::new(
            Opts::new("registry_policy_denials_total", "Pull-time policy denials by repository")
                .namespace("registry"),
            &["repository"],
        )?;

        let namespace_usage_bytes = IntGaugeVec::new(
            Opts::new("registry_namespace_usage_bytes", "Deduplicated reachable blob bytes per namespace")
                .namespace("registry"),
            &["namespace"],
        )?;

        let scans_total = IntCounterVec::new(
            Opts::new("registry_scans_total", "Completed scans by status")
                .namespace("registry"),
            &["status"],
        )?;

        let scan_duration_seconds = Histogram::with_opts(
            HistogramOpts::new("registry_scan_duration_seconds", "Scan duration in seconds")
                .namespace("registry")
                .buckets(SCAN_LATENCY_BUCKETS.to_vec()),
        )?;

        let gc_runs_total = IntCounter::new("registry_gc_runs_total", "Total GC sweeps run")?;
        let gc_blobs_deleted_total =
            IntCounter::new("registry_gc_blobs_deleted_total", "Total blobs deleted by GC")?;
        let gc_manifests_deleted_total = IntCounter::new(
            "registry_gc_manifests_deleted_total",
            "Total manifests deleted by GC",
        )?;
        let gc_space_freed_bytes_total = IntCounter::new(
            "registry_gc_space_freed_bytes_total",
            "Total bytes freed by GC",
        )?;

        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration_seconds.clone()))?;
        registry.register(Box::new(http_requests_in_flight.clone()))?;

        registry.register(Box::new(storage_operations_total.clone()))?;
        registry.register(Box::new(storage_operation_duration_seconds.clone()))?;
        registry.register(Box::new(storage_bytes_total.clone()))?;
        registry.register(Box::new(storage_errors_total.clone()))?;

        registry.register(Box::new(blob_pushes_total.clone()))?;
        registry.register(Box::new(manifest_pushes_total.clone()))?;
        registry.register(Box::new(manifest_pulls_total.clone()))?;
        registry.register(Box::new(policy_denials_total.clone()))?;
        registry.register(Box::new(namespace_usage_bytes.clone()))?;

        registry.register(Box::new(scans_total.clone()))?;
        registry.register(Box::new(scan_duration_seconds.clone()))?;

        registry.register(Box::new(gc_runs_total.clone()))?;
        registry.register(Box::new(gc_blobs_deleted_total.clone()))?;
        registry.register(Box::new(gc_manifests_deleted_total.clone()))?;
        registry.register(Box::new(gc_space_freed_bytes_total.clone()))?;

        Ok(Self {
            registry,
            http_requests_total,
            http_request_duration_seconds,
            http_requests_in_flight,
            storage_operations_total,
            storage_operation_duration_seconds,
            storage_bytes_total,
            storage_errors_total,
            blob_pushes_total,
            manifest_pushes_total,
            manifest_pulls_total,
            policy_denials_total,
            namespace_usage_bytes,
            scans_total,
            scan_duration_seconds,
            gc_runs_total,
            gc_blobs_deleted_total,
            gc_manifests_deleted_total,
            gc_space_freed_bytes_total,
        })
    }

    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        encoder.encode_to_string(&families)
    }

    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let status_str = status.to_string();
        self.http_requests_total
            .with_label_values(&[method, path, &status_str])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, path])
            .observe(duration_secs);
    }

    pub fn record_storage_operation(
        &self,
        operation: &str,
        backend: &str,
        duration_secs: f64,
        bytes: Option<u64>,
        success: bool,
    ) {
        self.storage_operations_total
            .with_label_values(&[operation, backend])
            .inc();
        self.storage_operation_duration_seconds
            .with_label_values(&[operation, backend])
            .observe(duration_secs);

        if let Some(bytes) = bytes {
            let direction = match operation {
                "put" | "append" | "copy" => "upload",
                "get" => "download",
                _ => return,
            };
            self.storage_bytes_total
                .with_label_values(&[direction, backend])
                .inc_by(bytes);
        }

        if !success {
            self.storage_errors_total
                .with_label_values(&[operation, backend])
                .inc();
        }
    }

    pub fn record_manifest_push(&self, outcome: &str) {
        self.manifest_pushes_total.with_label_values(&[outcome]).inc();
    }

    pub fn record_manifest_pull(&self, outcome: &str) {
        self.manifest_pulls_total.with_label_values(&[outcome]).inc();
    }

    pub fn record_policy_denial(&self, repository: &str) {
        self.policy_denials_total.with_label_values(&[repository]).inc();
    }

    pub fn set_namespace_usage(&self, namespace: &str, bytes: i64) {
        self.namespace_usage_bytes.with_label_values(&[namespace]).set(bytes);
    }

    pub fn record_scan(&self, status: &str, duration_secs: f64) {
        self.scans_total.with_label_values(&[status]).inc();
        self.scan_duration_seconds.observe(duration_secs);
    }

    pub fn record_gc_run(&self, blobs_deleted: u64, manifests_deleted: u64, space_freed_bytes: u64) {
        self.gc_runs_total.inc();
        self.gc_blobs_deleted_total.inc_by(blobs_deleted);
        self.gc_manifests_deleted_total.inc_by(manifests_deleted);
        self.gc_space_freed_bytes_total.inc_by(space_freed_bytes);
    }
}

/// Timer guard for recording a storage-operation histogram observation on drop.
#[cfg(feature = "metrics")]
pub struct MetricTimer {
    start: std::time::Instant,
    histogram: Histogram,
}

#[cfg(feature = "metrics")]
impl MetricTimer {
    pub fn new(histogram: Histogram) -> Self {
        Self {
            start: std::time::Instant::now(),
            histogram,
        }
    }

    pub fn stop(self) -> f64 {
        let duration = self.start.elapsed().as_secs_f64();
        self.histogram.observe(duration);
        duration
    }
}

#[cfg(test)]
#[cfg(feature = "metrics")]
mod tests {
    use super::*;

    #[test]
    fn metrics_creation_and_encode() {
        let metrics = RegistryMetrics::new().expect("failed to create metrics");
        metrics.record_http_request("GET", "/v2/alice/app/manifests/latest", 200, 0.02);
        metrics.record_storage_operation("put", "filesystem", 0.1, Some(1024), true);
        metrics.record_manifest_push("accepted");
        metrics.record_manifest_pull("allowed");
        metrics.record_policy_denial("alice/app");
        metrics.set_namespace_usage("alice", 1024 * 1024);
        metrics.record_scan("completed", 4.2);
        metrics.record_gc_run(2, 1, 2048);

        let output = metrics.encode().expect("failed to encode metrics");
        assert!(output.contains("registry_http_requests_total"));
        assert!(output.contains("registry_storage_operations_total"));
        assert!(output.contains("registry_manifest_pushes_total"));
        assert!(output.contains("registry_policy_denials_total"));
        assert!(output.contains("registry_scans_total"));
        assert!(output.contains("registry_gc_runs_total"));
    }

    #[test]
    fn storage_bytes_only_recorded_for_known_directions() {
        let metrics = RegistryMetrics::new().expect("failed to create metrics");
        metrics.record_storage_operation("delete", "filesystem", 0.01, Some(999), true);
        let output = metrics.encode().expect("failed to encode metrics");
        assert!(!output.contains("direction=\"upload\""));
        assert!(!output.contains("direction=\"download\""));
    }

    #[test]
    fn failed_storage_operation_increments_error_counter() {
        let metrics = RegistryMetrics::new().expect("failed to create metrics");
        metrics.record_storage_operation("get", "s3", 0.2, None, false);
        let output = metrics.encode().expect("failed to encode metrics");
        assert!(output.contains("registry_storage_errors_total"));
    }
}
