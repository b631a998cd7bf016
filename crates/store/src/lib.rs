//! Durable coordination for Reagent.
//!
//! [`SqliteStore`] implements the confirmation, stop-signal and context-store
//! collaborators on one SQLite file so that `reagent approve`, `reagent
//! reject` and `reagent stop` can steer a run happening in another process.

pub mod confirmation;
pub mod sqlite;

pub use sqlite::SqliteStore;
