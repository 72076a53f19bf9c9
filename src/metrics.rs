use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::env;
use tracing::{error, info};

use crate::outcome::Outcome;

lazy_static::lazy_static! {
    pub static ref METRIC_NAMESPACE: String =
        env::var("METRIC_NAMESPACE").unwrap_or_else(|_| "rps_loadtest".to_string());

    pub static ref REQUESTS_SENT: IntCounter =
        IntCounter::with_opts(
            Opts::new("requests_sent_total", "Requests dispatched by the scheduler")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref REQUESTS_COMPLETED: IntCounter =
        IntCounter::with_opts(
            Opts::new("requests_completed_total", "Requests that produced an outcome")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref RESPONSE_STATUS_CODES: IntCounterVec =
        IntCounterVec::new(
            Opts::new("response_status_codes_total", "Completed requests by status code")
                .namespace(METRIC_NAMESPACE.as_str()),
            &["status_code"]
        ).unwrap();

    pub static ref REQUEST_ERRORS_BY_CATEGORY: IntCounterVec =
        IntCounterVec::new(
            Opts::new("request_errors_total", "Failed requests by error category")
                .namespace(METRIC_NAMESPACE.as_str()),
            &["category"]
        ).unwrap();

    pub static ref IN_FLIGHT_REQUESTS: IntGauge =
        IntGauge::with_opts(
            Opts::new("in_flight_requests", "Requests dispatched but not yet completed")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref REQUEST_DURATION_SECONDS: Histogram =
        Histogram::with_opts(
            HistogramOpts::new("request_duration_seconds", "Request latencies in seconds")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();
}

/// Registers all metrics with the given registry.
pub fn register_metrics(registry: &Registry) -> Result<(), prometheus::Error> {
    registry.register(Box::new(REQUESTS_SENT.clone()))?;
    registry.register(Box::new(REQUESTS_COMPLETED.clone()))?;
    registry.register(Box::new(RESPONSE_STATUS_CODES.clone()))?;
    registry.register(Box::new(REQUEST_ERRORS_BY_CATEGORY.clone()))?;
    registry.register(Box::new(IN_FLIGHT_REQUESTS.clone()))?;
    registry.register(Box::new(REQUEST_DURATION_SECONDS.clone()))?;
    Ok(())
}

/// Called by the scheduler for every dispatched request.
pub fn observe_dispatch() {
    REQUESTS_SENT.inc();
    IN_FLIGHT_REQUESTS.inc();
}

/// Called by the collector for every outcome.
pub fn observe_outcome(outcome: &Outcome) {
    IN_FLIGHT_REQUESTS.dec();
    REQUESTS_COMPLETED.inc();

    let label = outcome.status.code().map_or("error", status_code_label);
    RESPONSE_STATUS_CODES.with_label_values(&[label]).inc();

    if let Some(category) = outcome.status.error_category() {
        REQUEST_ERRORS_BY_CATEGORY
            .with_label_values(&[category.label()])
            .inc();
    }

    REQUEST_DURATION_SECONDS.observe(outcome.elapsed_ms as f64 / 1000.0);
}

/// Returns a static string label for common HTTP status codes.
///
/// Uncommon codes fall back to "other" to keep label cardinality bounded.
pub fn status_code_label(code: u16) -> &'static str {
    match code {
        200 => "200",
        201 => "201",
        202 => "202",
        204 => "204",
        301 => "301",
        302 => "302",
        304 => "304",
        400 => "400",
        401 => "401",
        403 => "403",
        404 => "404",
        408 => "408",
        409 => "409",
        422 => "422",
        429 => "429",
        500 => "500",
        502 => "502",
        503 => "503",
        504 => "504",
        _ => "other",
    }
}

/// Encodes every metric in the registry in the text exposition format.
pub fn gather_metrics_string(registry: &Registry) -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&registry.gather(), &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

/// HTTP handler for the Prometheus metrics endpoint.
async fn metrics_handler(
    _req: Request<Body>,
    registry: Registry,
) -> Result<Response<Body>, hyper::Error> {
    let response = match gather_metrics_string(&registry) {
        Ok(text) => Response::new(Body::from(text)),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            let mut response = Response::new(Body::from("# ERROR ENCODING METRICS"));
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            response
        }
    };
    Ok(response)
}

/// Starts the Prometheus metrics HTTP server. Runs until the process exits.
pub async fn start_metrics_server(port: u16, registry: Registry) {
    let addr = ([0, 0, 0, 0], port).into();

    let make_svc = make_service_fn(move |_conn| {
        let registry = registry.clone();
        async move {
            Ok::<_, hyper::Error>(service_fn(move |req| {
                metrics_handler(req, registry.clone())
            }))
        }
    });

    let server = match Server::try_bind(&addr) {
        Ok(builder) => builder.serve(make_svc),
        Err(e) => {
            error!(port, error = %e, "Failed to bind metrics server");
            return;
        }
    };
    info!(port, addr = %addr, "Metrics server listening");

    if let Err(e) = server.await {
        error!(error = %e, "Metrics server error");
    }
}
