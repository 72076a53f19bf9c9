use prometheus::Registry;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use rps_loadtest::config::Config;
use rps_loadtest::metrics::{register_metrics, start_metrics_server};
use rps_loadtest::runner;

/// Prints helpful configuration documentation.
fn print_config_help() {
    eprintln!("Required environment variables:");
    eprintln!(
        "  TARGET_URL              - The URL to load test (must start with http:// or https://)"
    );
    eprintln!("                            BASE_URL is accepted as an alias");
    eprintln!();
    eprintln!("Optional environment variables:");
    eprintln!("  TOKEN                   - Bearer token sent as Authorization header");
    eprintln!("  REQUEST_TYPE            - HTTP method: GET or POST (default: GET)");
    eprintln!("  REQUESTS_PER_SECOND     - Requests dispatched per second (default: 50)");
    eprintln!("  TEST_DURATION           - Test duration: 20, 20s, 5m, 1h (default: 20s)");
    eprintln!("  LOG_ALL_RESPONSES       - Log every response, not only failures (default: false)");
    eprintln!();
    eprintln!("Result log:");
    eprintln!("  RESULTS_DIR             - Directory for the result log (default: results)");
    eprintln!(
        "  RESULTS_FILE            - File name (default: results.txt, post_results.txt for POST)"
    );
    eprintln!("  RESULTS_FORMAT          - text or jsonl (default: text)");
    eprintln!();
    eprintln!("Payloads:");
    eprintln!("  QUERY_PARAMS            - GET: JSON array of objects, cycled per request");
    eprintln!("  QUERY_PARAMS_FILE       - GET: CSV file with a header row, one set per row");
    eprintln!("  JSON_TEMPLATE           - POST: JSON body; {{\"$generator\": ...}} objects are");
    eprintln!("                            random_int, random_hex, timestamp, sequence_number");
    eprintln!();
    eprintln!("Advanced configuration:");
    eprintln!("  REQUEST_TIMEOUT         - Per-request timeout (default: 30s)");
    eprintln!("  SKIP_TLS_VERIFY         - Skip TLS certificate verification (default: false)");
    eprintln!("  CUSTOM_HEADERS          - Comma-separated headers (use \\, for literal commas)");
    eprintln!("  METRICS_PORT            - Serve Prometheus metrics on this port");
    eprintln!("  METRIC_NAMESPACE        - Prometheus metric namespace (default: rps_loadtest)");
    eprintln!("  LOG_FORMAT              - json for JSON log lines (default: text)");
    eprintln!("  RUST_LOG                - Log filter (default: info)");
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let result = if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init()
    };
    if let Err(err) = result {
        eprintln!("Failed to set global default subscriber: {}", err);
    }
}

#[tokio::main]
async fn main() {
    init_logging();

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}\n", e);
            print_config_help();
            std::process::exit(1);
        }
    };

    if let Some(port) = config.metrics_port {
        let registry = Registry::new();
        match register_metrics(&registry) {
            Ok(()) => {
                tokio::spawn(start_metrics_server(port, registry));
            }
            Err(e) => warn!(error = %e, "Failed to register metrics, metrics server disabled"),
        }
    }

    config.print_summary();

    let handle = match runner::start(&config) {
        Ok(handle) => handle,
        Err(e) => {
            error!(error = %e, "Failed to start load test");
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let canceller = handle.canceller();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping dispatch");
            canceller.cancel();
        }
    });

    match handle.wait().await {
        Ok(summary) => println!("{}", summary.format_report()),
        Err(e) => {
            error!(error = %e, "Load test failed");
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
