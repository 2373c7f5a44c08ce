//! Gas leak detection library
//!
//! This crate provides the core functionality for:
//! - Loading labelled sensor readings
//! - Windowing, stratified splitting and feature scaling
//! - Sequence classifiers and threshold calibration
//! - Persisting and serving model generations
//! - Health checks and observability

pub mod calibration;
pub mod classifier;
pub mod dataset;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod preprocess;
pub mod serving;
pub mod training;

pub use error::{DetectorError, Result, WindowShape};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{DetectorMetrics, StructuredLogger};
