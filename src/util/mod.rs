//! Util Module - Shared Utilities
//!
//! Utilities and helper functions used throughout the collector.

pub mod alignment;

pub use alignment::Alignment;
