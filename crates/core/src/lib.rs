//! Domain types for the lookbook campaign workflow.
//!
//! Pure data and validation: no I/O lives in this crate.

pub mod catalog;
pub mod collection;
pub mod error;
pub mod naming;
pub mod state;
pub mod types;
