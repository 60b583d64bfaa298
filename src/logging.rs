//! Diagnostics: structured logging events plus verbose-GC text output.
//!
//! Call sites use the `log` crate's macros directly so the crate stays
//! logger-agnostic; `GcEvent` exists for embedders who want a typed event
//! rather than scraping formatted text.

use crate::stats::GcStats;
use std::time::Duration;

/// A notable event in the collector's lifecycle, for embedders building a
/// structured monitoring pipeline on top of the `log` facade.
#[derive(Debug, Clone)]
pub enum GcEvent {
    CycleStart { cycle: u64, forced: bool },
    CycleEnd { cycle: u64, duration: Duration, freed_objects: u64, freed_bytes: u64 },
    CycleSkipped { reason: &'static str },
    FinalizerRun { objects: u64 },
}

pub fn log_event(event: &GcEvent) {
    match event {
        GcEvent::CycleStart { cycle, forced } => {
            log::debug!("gc cycle {cycle} starting (forced={forced})");
        }
        GcEvent::CycleEnd {
            cycle,
            duration,
            freed_objects,
            freed_bytes,
        } => {
            log::info!(
                "gc cycle {cycle} finished in {:?}: freed {freed_objects} objects ({freed_bytes} bytes)",
                duration
            );
        }
        GcEvent::CycleSkipped { reason } => {
            log::trace!("gc cycle skipped: {reason}");
        }
        GcEvent::FinalizerRun { objects } => {
            log::debug!("finalizer drained {objects} objects");
        }
    }
}

/// Print the verbose-GC summary line for level 1 and 2, matching the
/// historical `-verbose:gc` behavior: level 1 is a one-line cycle summary,
/// level 2 additionally gets per-class live counts from the caller (which
/// has access to the registry) via [`print_class_summary`].
pub fn print_cycle_summary(verbose: u8, cycle: u64, duration: Duration, stats: &GcStats) {
    if verbose == 0 {
        return;
    }
    let now = chrono::Local::now();
    println!(
        "[{}] gc: cycle {} freed {} objects ({} bytes), marked {} objects ({} bytes), {:?}",
        now.format("%Y-%m-%d %H:%M:%S%.3f"),
        cycle,
        stats.freedobj,
        stats.freedmem,
        stats.markedobj,
        stats.markedmem,
        duration,
    );
}

pub fn print_class_summary(verbose: u8, description: &str, live_objects: u64, live_bytes: u64) {
    if verbose < 2 {
        return;
    }
    println!("    class {description}: {live_objects} live objects, {live_bytes} live bytes");
}
