//! Process-wide durable state: contacts/groups configuration, statistics,
//! message history and media blobs. Each store serializes writes behind its
//! own lock and persists through atomic temp-file renames, so a crash never
//! leaves a truncated file.

pub mod config;
pub mod media;
pub mod messages;
pub mod stats;

use derive_more::{Display, Error};

/// Outcome of a mutating store operation, mapped onto HTTP status classes
/// at the API boundary.
#[derive(Debug, Display, Error, PartialEq)]
pub enum MutationError {
    #[display("duplicate: {_0}")]
    Duplicate(#[error(not(source))] String),
    #[display("invalid: {_0}")]
    Invalid(#[error(not(source))] String),
    #[display("not found: {_0}")]
    NotFound(#[error(not(source))] String),
}
