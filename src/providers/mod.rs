//! Task service implementations.

pub mod vikunja;

pub use vikunja::VikunjaClient;
