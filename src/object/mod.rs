//! Per-unit tracing metadata: colour and lifecycle state.
//!
//! Both fields are plain (non-atomic): every write happens either with the
//! world stopped or under the allocator lock, so there is never a need for
//! atomic access (see the data model's statistics-counter invariant, which
//! applies equally here).

/// Tracing colour of a managed unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Colour {
    /// Not yet proven reachable this cycle (or reclaimed/idle between cycles).
    White,
    /// Reachable, not yet walked; queued on the grey list.
    Grey,
    /// Reachable and walked.
    Black,
    /// Outside GC entirely; never placed on a colour list.
    Fixed,
}

/// Finalization progression of a managed unit. Monotonic: a unit never moves
/// backward, and is finalized at most once per lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// No finalizer, or a finalizer that has already run (indistinguishable
    /// from "no finalizer" for future collections).
    Normal,
    /// Has a finalizer that has not yet been scheduled.
    NeedFinalize,
    /// Finalizer scheduled; promoted to grey so its referents survive.
    InFinalize,
    /// Finalizer has run. Never transitions again.
    Finalized,
}

/// The list a unit currently belongs to. Tracked independently of colour: a
/// unit on the finalise list is coloured White (see the data model notes),
/// distinguishing "pending finalization, not garbage" from "reclaimable."
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListId {
    White,
    Grey,
    Black,
    Finalise,
    MustFree,
}

impl ListId {
    pub const ALL: [ListId; 5] = [
        ListId::White,
        ListId::Grey,
        ListId::Black,
        ListId::Finalise,
        ListId::MustFree,
    ];

    pub(crate) fn slot(self) -> usize {
        match self {
            ListId::White => 0,
            ListId::Grey => 1,
            ListId::Black => 2,
            ListId::Finalise => 3,
            ListId::MustFree => 4,
        }
    }
}
