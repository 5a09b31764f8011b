//! # Log Module
//!
//! Reads the timestamped text log and tracks which lines are on screen.

pub mod buffer;

pub use buffer::{LogBuffer, LogLine, END_OF_LOG, TIMESTAMP_WIDTH};
