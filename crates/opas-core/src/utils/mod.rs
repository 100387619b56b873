//! Display helpers shared by front ends.

pub mod format;

pub use format::{format_date, format_optional, format_timestamp, truncate};
