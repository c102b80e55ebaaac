//! Prometheus metrics

use metrics::{gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;

/// Latency metric types
#[derive(Debug, Clone, Copy)]
pub enum LatencyMetric {
    /// One full engine cycle
    Cycle,
    /// Concurrent market snapshot fetch
    Snapshot,
    /// Order submission round trip
    OrderSubmission,
}

/// Gauge metric types
#[derive(Debug, Clone, Copy)]
pub enum GaugeMetric {
    Equity,
    Balance,
    /// Trades in OPEN state
    OpenTrades,
    /// Trades awaiting confirmation or reconciliation
    PendingTrades,
    /// Consecutive transient cycle failures
    CycleFailures,
}

impl LatencyMetric {
    fn name(self) -> &'static str {
        match self {
            LatencyMetric::Cycle => "hydra_cycle_latency_ms",
            LatencyMetric::Snapshot => "hydra_snapshot_latency_ms",
            LatencyMetric::OrderSubmission => "hydra_order_submission_latency_ms",
        }
    }
}

impl GaugeMetric {
    fn name(self) -> &'static str {
        match self {
            GaugeMetric::Equity => "hydra_equity",
            GaugeMetric::Balance => "hydra_balance",
            GaugeMetric::OpenTrades => "hydra_open_trades",
            GaugeMetric::PendingTrades => "hydra_pending_trades",
            GaugeMetric::CycleFailures => "hydra_cycle_failures",
        }
    }
}

/// Record a latency measurement
pub fn record_latency(metric: LatencyMetric, duration: Duration) {
    histogram!(metric.name()).record(duration.as_secs_f64() * 1000.0);
}

/// Set a gauge value
pub fn set_gauge(metric: GaugeMetric, value: f64) {
    gauge!(metric.name()).set(value);
}

/// Install the Prometheus recorder and serve `/metrics` on `port`
pub fn init_metrics(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install metrics exporter: {}", e))?;
    tracing::info!(%addr, "Prometheus metrics exporter started");
    Ok(())
}
