//! # Seatkeeper Service
//!
//! Process wiring for the reservation engine: configuration loaded from the
//! environment, and a [`ResourceManager`] that connects the `PostgreSQL`
//! stores and hands out a [`seatkeeper_runtime::ReservationCoordinator`] and
//! [`seatkeeper_runtime::Reconciler`] built over them.
//!
//! The `reconciler` binary runs the background repair pass and exposes
//! Prometheus metrics.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bootstrap;
pub mod config;

pub use bootstrap::{BootstrapError, ResourceManager};
pub use config::{Config, ConfigError};
