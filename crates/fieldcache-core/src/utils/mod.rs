//! Utility functions for display formatting.

pub mod format;

// Re-export commonly used functions at module level
pub use format::{age_display, format_size, truncate};
