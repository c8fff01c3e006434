//! Diff computation and application between the desired entry set and the
//! entries currently in the calendar store.

mod diff_kind;
mod entry_diff;
mod reconcile;

pub use diff_kind::DiffKind;
pub use entry_diff::{EntryChange, EntryDiff};
pub use reconcile::{DesiredEntry, ReconcileOutcome, ReconcilePlan, reconcile};
