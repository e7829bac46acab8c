//! Core modules for plugin-gate.
//!
//! The contract loader, spec rules and artifact shapes are shared by the
//! generator (`scaffold`) and the validator (`validate`); everything else is
//! plumbing for those two.

pub mod artifacts;
pub mod assets;
pub mod config;
pub mod contract;
pub mod error;
pub mod output;
pub mod sandbox;
pub mod scaffold;
pub mod scan;
pub mod spec;
pub mod time;
pub mod validate;
