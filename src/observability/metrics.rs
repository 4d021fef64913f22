//! Pipeline metrics
//!
//! Counters are named `tgw_{phase}_{name}_total` via `phase_metric!`. Without an
//! installed recorder every call is a no-op, so library code records
//! unconditionally and only the binary decides whether to export.

use std::sync::Once;
use tracing::{info, warn};

static INIT: Once = Once::new();

macro_rules! phase_metric {
    (counter, $phase:literal, $name:literal) => {
        concat!("tgw_", $phase, "_", $name, "_total")
    };
    (histogram, $phase:literal, $name:literal) => {
        concat!("tgw_", $phase, "_", $name)
    };
}

/// Install the Prometheus exporter when `METRICS_ADDR` is set. Idempotent.
pub fn init_metrics() {
    INIT.call_once(|| {
        let addr_str = match std::env::var("METRICS_ADDR") {
            Ok(v) if !v.trim().is_empty() => v,
            _ => {
                info!("METRICS_ADDR not set, metrics exporter disabled");
                return;
            }
        };
        let addr = match addr_str.parse::<std::net::SocketAddr>() {
            Ok(addr) => addr,
            Err(e) => {
                warn!("Invalid METRICS_ADDR '{}': {}", addr_str, e);
                return;
            }
        };
        match metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
        {
            Ok(()) => info!("Prometheus exporter listening on http://{}/metrics", addr),
            Err(e) => warn!("Failed to install Prometheus exporter: {}", e),
        }
    });
}

pub mod fetcher {
    pub fn page_fetched(messages: usize) {
        ::metrics::counter!(phase_metric!(counter, "fetcher", "pages")).increment(1);
        ::metrics::histogram!(phase_metric!(histogram, "fetcher", "page_size"))
            .record(messages as f64);
    }

    pub fn flood_wait(secs: u64) {
        ::metrics::counter!(phase_metric!(counter, "fetcher", "flood_waits")).increment(1);
        ::metrics::counter!(phase_metric!(counter, "fetcher", "flood_wait_seconds")).increment(secs);
    }

    pub fn attachment_downloaded() {
        ::metrics::counter!(phase_metric!(counter, "fetcher", "attachments")).increment(1);
    }

    pub fn download_skipped() {
        ::metrics::counter!(phase_metric!(counter, "fetcher", "downloads_skipped")).increment(1);
    }

    pub fn channel_aborted() {
        ::metrics::counter!(phase_metric!(counter, "fetcher", "channels_aborted")).increment(1);
    }
}

pub mod landing {
    pub fn records_written(count: usize, bytes: usize) {
        ::metrics::counter!(phase_metric!(counter, "landing", "records")).increment(count as u64);
        ::metrics::counter!(phase_metric!(counter, "landing", "bytes")).increment(bytes as u64);
    }

    pub fn write_error() {
        ::metrics::counter!(phase_metric!(counter, "landing", "write_errors")).increment(1);
    }
}

pub mod loader {
    pub fn rows(table: &'static str, inserted: usize, duplicates: usize, skipped: usize) {
        ::metrics::counter!(phase_metric!(counter, "loader", "inserted"), "table" => table)
            .increment(inserted as u64);
        ::metrics::counter!(phase_metric!(counter, "loader", "duplicates"), "table" => table)
            .increment(duplicates as u64);
        ::metrics::counter!(phase_metric!(counter, "loader", "skipped"), "table" => table)
            .increment(skipped as u64);
    }
}

pub mod enrichment {
    pub fn image_classified(category: &'static str) {
        ::metrics::counter!(phase_metric!(counter, "enrichment", "images"), "category" => category)
            .increment(1);
    }

    pub fn detector_failed() {
        ::metrics::counter!(phase_metric!(counter, "enrichment", "detector_failures")).increment(1);
    }
}

pub mod coordinator {
    pub fn stage_finished(stage: &'static str, success: bool, duration_secs: f64) {
        let outcome = if success { "success" } else { "failure" };
        ::metrics::counter!(phase_metric!(counter, "coordinator", "stages"), "stage" => stage, "outcome" => outcome)
            .increment(1);
        ::metrics::histogram!(phase_metric!(histogram, "coordinator", "stage_duration_seconds"), "stage" => stage)
            .record(duration_secs);
    }
}
