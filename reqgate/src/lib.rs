//! Admission control for plan, apply, and import commands.
//!
//! Given a requested command against one project of a change request, the
//! gate decides whether it may run, based on an ordered list of configured
//! requirements and the observed state of the change request:
//!
//! - **[`core`]**: Pure requirement and dependency validation. No I/O;
//!   branch divergence is asked of an injected oracle.
//! - **[`io`]**: Config and snapshot loading, and the git-backed oracle.
//!
//! [`check`] combines the two for the CLI.

pub mod check;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
