//! Configuration module for objarchive
//!
//! Provides CLI arguments, trigger payload parsing, request normalization
//! and engine tuning.

mod settings;

pub use settings::*;
