//! Shared alert suppression contracts.
//!
//! This crate is the Rust source of truth for the JSON shapes exchanged by the
//! suppression engine:
//! - matched source documents handed to a rule evaluation cycle
//! - the suppression policy attached to a detection rule
//! - alert records written to the alert store (field names are a fixed contract)
//! - cycle requests and cycle summaries carried over NATS

pub mod alert;
pub mod cycle;
pub mod document;
pub mod keys;
pub mod policy;

pub use alert::*;
pub use cycle::*;
pub use document::*;
pub use keys::*;
pub use policy::*;
