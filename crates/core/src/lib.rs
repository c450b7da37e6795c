//! Core functionality for the Beacon emergency-response platform.
//!
//! This crate provides the leaf utilities shared across the Beacon
//! workspace: geographic distance, the injectable clock, configuration
//! loading and logging initialization.

pub mod clock;
pub mod config;
pub mod error;
pub mod geo;
pub mod logging;

pub use clock::{elapsed_minutes, Clock, ManualClock, SystemClock};
pub use config::{Config, DispatchConfig, LoggingConfig, ServerConfig, StorageConfig};
pub use error::{CoreError, Result};
pub use geo::{distance_meters, haversine_distance, GeoCoordinate, EARTH_RADIUS_M};
