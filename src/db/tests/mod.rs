//! Shared database repository test infrastructure
//!
//! The same test bodies run against both backends:
//!
//! - **SQLite**: in-memory databases with real migrations, run with every `cargo test`
//! - **PostgreSQL**: testcontainers-based, run with `cargo test -- --ignored`
//!
//! Each test is an async function taking `&dyn BandwidthRepo`; the backend
//! modules at the bottom of `bandwidth.rs` instantiate them via macros.
