//! ICS encoding of calendar entries.
//!
//! Each entry is stored as a single-event VCALENDAR. Only the fields the
//! sync engine cares about are written; anything else found when parsing is
//! ignored.

mod generate;
mod parse;

pub use generate::generate_ics;
pub use parse::parse_entry;
