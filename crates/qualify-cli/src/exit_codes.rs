//! Process exit codes. Part of the CLI contract.

pub const OK: i32 = 0;
/// The run finished FAIL, was aborted, or QC found a blocking problem.
pub const TEST_FAILED: i32 = 1;
/// Configuration, protocol or session input could not be used.
pub const CONFIG_ERROR: i32 = 2;
