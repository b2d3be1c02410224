// crates/db/src/queries/mod.rs
// Session, project, and indexer-state operations for the tokenscope database.

mod indexer_state;
mod projects;
pub(crate) mod row_types;
mod sessions;
mod types;

pub use types::*;
