pub mod analytics;
pub mod api;
pub mod cache;
pub mod config;
pub mod evaluator;
pub mod flags;
pub mod hashing;
pub mod metrics;
pub mod router;
pub mod server;
pub mod store;
pub mod targeting;
pub mod time;

// Fixtures shared by unit and integration tests; compiled into the library
// so tests/ can reach them.
pub mod test_utils;
