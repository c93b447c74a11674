// crates/db/src/queries/mod.rs
// Job and active-pointer queries for the jobstream SQLite database.

mod active;
pub(crate) mod jobs;
pub(crate) mod row_types;
