use metrics::{counter, histogram};
use tracing::trace;

pub fn inc_requests(route: &'static str) {
    counter!("enricher_requests_total", "route" => route).increment(1);
    trace!(target = "enricher.metrics", route = route, "requests_total_inc");
}

pub fn row_outcome(outcome: &'static str) {
    counter!("enricher_rows_total", "outcome" => outcome).increment(1);
}

pub fn lookup_elapsed(elapsed_ms: u128) {
    histogram!("enricher_lookup_ms").record(elapsed_ms as f64);
    trace!(
        target = "enricher.metrics",
        elapsed_ms = elapsed_ms as u64,
        "lookup_elapsed"
    );
}
