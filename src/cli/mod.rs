//! CLI command handlers

pub mod commands;

pub use commands::{analyze, audit, cycles, metrics, order, sensitivity, tables};
