use std::sync::Arc;

use serde::Serialize;
use warp::reply::Json;

use crate::metrics::MetricsCollector;

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
}

pub fn health() -> Json {
    warp::reply::json(&HealthBody { status: "ok" })
}

/// Operator-facing metrics snapshot, read-only. Not wired to any external
/// sink — there is no analytics collector behind this, just the counters
/// `MetricsCollector` already keeps in memory.
pub fn metrics(collector: Arc<MetricsCollector>) -> Json {
    warp::reply::json(&collector.snapshot())
}
