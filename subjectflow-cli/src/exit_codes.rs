//! Exit codes for the CLI

/// Every node finished
pub const SUCCESS: u8 = 0;

/// At least one node failed or was skipped, or an export failed
pub const RUN_INCOMPLETE: u8 = 1;

/// Invalid configuration, pipeline or inputs; nothing was run
pub const CONFIG_ERROR: u8 = 2;
