//! Prometheus metrics for the discovery engine
//!
//! Exposes metrics via HTTP endpoint for Prometheus scraping.

use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry};
use std::sync::OnceLock;

/// Global metrics registry
static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Get the global metrics instance
pub fn metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::new)
}

/// Discovery metrics collection
pub struct Metrics {
    /// Registry for all metrics
    pub registry: Registry,

    // Tick metrics
    /// Ticks by group and outcome (`resolved` or a resolution error label)
    pub ticks_total: IntCounterVec,
    /// Tick latency histogram (in seconds)
    pub tick_duration_seconds: HistogramVec,
    /// Ticks not run, by reason (`in_flight`, `not_leader`)
    pub skipped_ticks_total: IntCounterVec,

    // Topology metrics
    /// Published primary changes
    pub primary_changes_total: IntCounterVec,

    // Probe metrics
    /// Failed probes by kind
    pub probe_failures_total: IntCounterVec,

    /// Groups currently registered
    pub groups_registered: IntGauge,
}

impl Metrics {
    /// Create a new metrics collection
    ///
    /// # Panics
    ///
    /// If [`Metrics::try_new`] fails. Names, help texts and label sets are
    /// constants and the registry is fresh, so that is a bug in this module.
    pub fn new() -> Self {
        match Self::try_new() {
            Ok(metrics) => metrics,
            Err(e) => panic!("invalid metric definition: {}", e),
        }
    }

    pub fn try_new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let ticks_total = IntCounterVec::new(
            Opts::new(
                "athena_discovery_ticks_total",
                "Total number of monitor ticks by outcome",
            ),
            &["group", "outcome"],
        )?;

        let tick_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "athena_discovery_tick_duration_seconds",
                "Primary resolution latency in seconds",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
            &["group"],
        )?;

        let skipped_ticks_total = IntCounterVec::new(
            Opts::new(
                "athena_discovery_skipped_ticks_total",
                "Total number of ticks skipped without probing",
            ),
            &["group", "reason"],
        )?;

        let primary_changes_total = IntCounterVec::new(
            Opts::new(
                "athena_discovery_primary_changes_total",
                "Total number of primary changes published",
            ),
            &["group"],
        )?;

        let probe_failures_total = IntCounterVec::new(
            Opts::new(
                "athena_discovery_probe_failures_total",
                "Total number of failed member probes",
            ),
            &["kind"], // unreachable, malformed_response, permission_denied
        )?;

        let groups_registered = IntGauge::new(
            "athena_discovery_groups_registered",
            "Current number of monitored replication groups",
        )?;

        registry.register(Box::new(ticks_total.clone()))?;
        registry.register(Box::new(tick_duration_seconds.clone()))?;
        registry.register(Box::new(skipped_ticks_total.clone()))?;
        registry.register(Box::new(primary_changes_total.clone()))?;
        registry.register(Box::new(probe_failures_total.clone()))?;
        registry.register(Box::new(groups_registered.clone()))?;

        Ok(Self {
            registry,
            ticks_total,
            tick_duration_seconds,
            skipped_ticks_total,
            primary_changes_total,
            probe_failures_total,
            groups_registered,
        })
    }

    /// Record a finished tick
    pub fn record_tick(&self, group: &str, outcome: &str, duration_secs: f64) {
        self.ticks_total.with_label_values(&[group, outcome]).inc();
        self.tick_duration_seconds
            .with_label_values(&[group])
            .observe(duration_secs);
    }

    pub fn record_skipped_tick(&self, group: &str, reason: &str) {
        self.skipped_ticks_total
            .with_label_values(&[group, reason])
            .inc();
    }

    pub fn record_primary_change(&self, group: &str) {
        self.primary_changes_total.with_label_values(&[group]).inc();
    }

    pub fn record_probe_failure(&self, kind: &str) {
        self.probe_failures_total.with_label_values(&[kind]).inc();
    }

    /// Get metrics as Prometheus text format
    pub fn gather(&self) -> prometheus::Result<String> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Start the metrics HTTP server
pub async fn start_metrics_server(addr: &str) -> anyhow::Result<()> {
    use http_body_util::Full;
    use hyper::body::Bytes;
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use std::convert::Infallible;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;
    use tracing::{error, info};

    fn respond(status: StatusCode, body: String) -> Response<Full<Bytes>> {
        let mut response = Response::new(Full::new(Bytes::from(body)));
        *response.status_mut() = status;
        response
    }

    async fn handle_request(
        req: Request<hyper::body::Incoming>,
    ) -> Result<Response<Full<Bytes>>, Infallible> {
        match req.uri().path() {
            "/metrics" => match metrics().gather() {
                Ok(body) => {
                    let mut response = respond(StatusCode::OK, body);
                    response.headers_mut().insert(
                        CONTENT_TYPE,
                        HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
                    );
                    Ok(response)
                }
                Err(e) => Ok(respond(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
            },
            "/health" => Ok(respond(StatusCode::OK, "OK".to_string())),
            _ => Ok(respond(StatusCode::NOT_FOUND, "Not Found".to_string())),
        }
    }

    let addr: SocketAddr = addr.parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "Metrics server listening");

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(handle_request))
                .await
            {
                error!(error = %e, "Metrics server connection error");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_contains_recorded_series() {
        let m = metrics();
        m.record_tick("metrics_test_group", "resolved", 0.01);
        m.record_probe_failure("unreachable");
        m.record_skipped_tick("metrics_test_group", "in_flight");

        let text = m.gather().unwrap();
        assert!(text.contains("athena_discovery_ticks_total"));
        assert!(text.contains("group=\"metrics_test_group\""));
        assert!(text.contains("athena_discovery_probe_failures_total"));
        assert!(text.contains("reason=\"in_flight\""));
    }

    #[test]
    fn test_separate_registries() {
        let a = Metrics::try_new().unwrap();
        let b = Metrics::new();
        a.groups_registered.set(2);
        assert_eq!(b.groups_registered.get(), 0);
    }
}
