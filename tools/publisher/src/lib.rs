//! Market Data Publisher & Live Grid Demo
//!
//! Synthetic quote source for the view engine, plus the pieces of the
//! `live-grid` demo binary.
//!
//! # Modules
//! - `generator`: Seeded random-walk quote generator over a fixed ticker set
//! - `publisher`: Paced tokio publishing loop with explicit lifecycle
//! - `config`: `GRID_*` environment configuration for the demo
//! - `render`: Text rendering of grid snapshots
//! - `runner`: The demo's run loop with deadline and shutdown handling

pub mod config;
pub mod generator;
pub mod publisher;
pub mod render;
pub mod runner;

/// Crate version constant
pub const VERSION: &str = "1.0.0";
