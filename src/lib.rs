//! # vmgc - tri-colour mark-and-sweep collector and monitor layer
//!
//! `vmgc` is the memory-management core for an embedding managed runtime:
//! a non-incremental, stop-the-world, tri-colour mark-and-sweep collector
//! over a block-structured heap, a fixed-size allocation-class registry, a
//! finalizer worker, and an independent address-keyed recursive monitor
//! layer for the runtime's object locks.
//!
//! ## Quick start
//!
//! ```rust
//! use std::sync::Arc;
//! use vmgc::{Collector, GcConfig};
//! use vmgc::registry::Finalize;
//! use vmgc::roots::StaticRoots;
//!
//! let roots = Arc::new(StaticRoots::new());
//! let collector = Collector::new(GcConfig::default(), roots.clone())?;
//! collector.register_gc(0, None, Finalize::Normal, None, "plain")?;
//! collector.enable();
//!
//! let addr = collector.malloc(64, 0)?;
//! roots.add(addr);
//!
//! collector.invoke(true);
//! assert!(collector.object_size(addr)?.is_some());
//! # Ok::<(), vmgc::GcError>(())
//! ```
//!
//! ## Modules
//!
//! - [`error`]: the crate's error taxonomy and the `fatal` abort path.
//! - [`config`]: collector and monitor tuning parameters.
//! - [`object`]: per-unit colour and lifecycle-state metadata.
//! - [`registry`]: the fixed-size allocation-class table.
//! - [`heap`]: the block-structured heap and its intrusive colour lists.
//! - [`stats`]: running allocation/collection counters.
//! - [`logging`]: structured events and verbose-GC text output.
//! - [`safepoint`]: the stop-the-world contract mutators cooperate with.
//! - [`allocator`]: `malloc`/`realloc`/`free` over a locked heap.
//! - [`roots`]: the root-scanner contract and its marking capability.
//! - [`collector`]: the `Collector` driving allocation and collection.
//! - [`monitor`]: the address-keyed recursive monitor layer.

pub mod allocator;
pub mod collector;
pub mod config;
pub mod error;
pub mod heap;
pub mod logging;
pub mod monitor;
pub mod object;
pub mod registry;
pub mod roots;
pub mod safepoint;
pub mod stats;
mod util;

pub use collector::Collector;
pub use config::GcConfig;
pub use error::{fatal, GcError, Result};
pub use monitor::Monitor;

/// Crate version, from `Cargo.toml`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
