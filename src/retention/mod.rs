//! Background retention of bandwidth samples.
//!
//! The sweeper wakes at a random point between the configured minimum and
//! maximum interval, deletes samples older than the retention horizon from
//! every partition table, and goes back to sleep. Failures are logged and the
//! next tick retries. Deletes are batched and support dry-run mode.

mod worker;

pub use worker::{RetentionSweeper, SweeperHandle};
