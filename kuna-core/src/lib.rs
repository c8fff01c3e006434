//! Calendar sync engine for kuna.
//!
//! Mirrors tasks from a remote task service into calendars of a local
//! calendar store, either all into one calendar or one calendar per project.
//! Entries the engine creates carry an ownership tag; nothing without one is
//! ever modified. With two-way sync enabled, edits made in the calendar are
//! detected and pushed back to the task service according to a conflict
//! policy.
//!
//! The platform side is supplied through three traits:
//! - [`CalendarStore`](calendar_store::CalendarStore) for the calendar store
//! - [`TaskService`](remote::TaskService) for the remote task service
//! - [`SettingsStore`](settings::SettingsStore) for persisted state
//!
//! [`SyncEngine`](engine::SyncEngine) ties them together.

pub mod calendar_store;
pub mod config;
pub mod conflict;
pub mod dates;
pub mod diff;
pub mod engine;
pub mod entry;
pub mod error;
pub mod migrate;
pub mod preferences;
pub mod remote;
pub mod resolver;
pub mod settings;
pub mod state;
pub mod tag;
pub mod task;
pub mod trigger;
pub mod window;

#[cfg(test)]
mod testing;

pub use config::{EngineConfig, KunaConfig};
pub use engine::{Disposition, OnboardingChoice, SyncEngine, SyncReport, SyncState, SyncTrigger};
pub use error::{KunaError, KunaResult};
