//! Persistence layer: libSQL-backed storage for users, entries and prompts.

pub mod libsql_backend;
pub mod migrations;
pub mod model;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use model::{Entry, EntryImage, Inspiration, NewEntry, NewUser, Tier, User};
pub use traits::Database;
