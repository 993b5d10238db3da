//! Row structs for the pipeline's tables.
//!
//! Each submodule holds a `FromRow` struct matching the database row and,
//! where the domain has its own type, the conversion into it.

pub mod analysis;
pub mod drill;
pub mod queue;
pub mod video;
