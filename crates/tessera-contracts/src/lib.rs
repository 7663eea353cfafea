//! # tessera-contracts
//!
//! Shared types and error definitions for the TESSERA audit ledger.
//!
//! Every crate in the workspace imports from here. No ledger logic lives in
//! this crate, only data definitions, constructors, and error types.

pub mod entry;
pub mod error;
pub mod event;
pub mod ids;
pub mod operation;
pub mod query;
pub mod report;
