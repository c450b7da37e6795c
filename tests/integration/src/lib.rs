//! Cross-crate integration tests for Beacon
//!
//! This test suite validates:
//! - Engine events reaching live connections through the broadcast bus
//! - The full WebSocket path from `task:register` to pushed task frames
//! - Dispatch lifecycles persisted in an on-disk SQLite store
//! - Geofence crossings raised by check-ins

pub mod test_utils;

#[cfg(test)]
mod realtime_delivery_tests;

#[cfg(test)]
mod sqlite_lifecycle_tests;

#[cfg(test)]
mod geofence_tests;
