//! Leak detector serving process
//!
//! Loads one model generation at startup and exposes it over HTTP.

pub mod api;
pub mod config;
