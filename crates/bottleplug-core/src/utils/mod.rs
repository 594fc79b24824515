//! Utility functions for display formatting.

pub mod format;

pub use format::{format_date, format_remaining, format_ugx, truncate_string};
