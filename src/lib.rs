pub mod client;
pub mod config;
pub mod errors;
pub mod metrics;
pub mod outcome;
pub mod payload;
pub mod percentiles;
pub mod recorder;
pub mod request;
pub mod runner;
pub mod scheduler;
pub mod summary;
pub mod utils;
