//! benchmatrix-core — Core execution engine, traits, and scoring model.
//!
//! This crate defines the matrix data model, the backend and scorer traits,
//! and the pure policies (timeouts, extraction, failure classification,
//! value comparison) that the rest of benchmatrix builds on.

pub mod classify;
pub mod compare;
pub mod engine;
pub mod error;
pub mod extract;
pub mod model;
pub mod prompt;
pub mod report;
pub mod results;
pub mod spec;
pub mod statistics;
pub mod timeout;
pub mod traits;
pub mod value;
