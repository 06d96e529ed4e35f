//! Protocol-driven test execution for standardized physical test protocols.
//!
//! A [`model::ProtocolDefinition`] is loaded once through a [`protocol::ProtocolLoader`]
//! and stays immutable for the lifetime of every [`model::TestRun`] bound to it. The
//! [`engine`] drives runs through their phase/step state machine, the [`ledger`] keeps
//! the append-only measurement record, and [`acceptance`] turns the ledger into
//! pass/fail verdicts. Statistical QC lives in the `qualify-metrics` crate.

pub mod acceptance;
pub mod config;
pub mod engine;
pub mod errors;
pub mod fingerprint;
pub mod ledger;
pub mod model;
pub mod protocol;
pub mod storage;

pub use errors::{ConfigError, EngineError, ProtocolError};
