//! # corpwatch-id
//!
//! Typed identifiers for the EVE Online entities corpwatch deals with.
//!
//! ## Design Principles
//!
//! - IDs are assigned by the game (ESI) and never generated locally
//! - IDs are opaque: equality is by value, ordering only exists so that
//!   derived output can be sorted deterministically
//! - IDs are typed to prevent mixing corporations with alliances
//!
//! ## ID Format
//!
//! ESI ids are positive integers. Their canonical string form is the plain
//! decimal value, and they serialize to JSON as numbers:
//!
//! - `98633922` (corporation)
//! - `99010468` (alliance)

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;
