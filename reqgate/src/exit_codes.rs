//! Stable exit codes for reqgate CLI commands.

/// Command is allowed to proceed.
pub const OK: i32 = 0;
/// Invalid config or snapshot, or an infrastructure failure (e.g. git).
pub const INVALID: i32 = 1;
/// A requirement or dependency rejected the command.
pub const DENIED: i32 = 2;
