//! Deterministic, pure decision logic.
//!
//! Core modules must be free of I/O side effects. The one outside question
//! (branch divergence) is answered through the injected
//! [`requirements::DivergenceOracle`].

pub mod context;
pub mod requirements;
pub mod types;
