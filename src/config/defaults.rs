/// Configuration default values
///
/// All defaults live here so they can be changed in one place.
// Web server defaults
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_CORS_ORIGIN: &str = "*";

// Storage defaults
pub const DEFAULT_JOBS_DIR_NAME: &str = "rpy-workbench-jobs";
pub const DEFAULT_JOB_TTL_SECS: u64 = 60 * 60;
pub const DEFAULT_MAX_UPLOAD_SIZE_MB: u64 = 11111;
pub const DEFAULT_MAX_TEXT_SIZE_KB: u64 = 2048;

// External tool defaults
pub const DEFAULT_UNRPYC_COMMAND: &str = "unrpyc";
pub const DEFAULT_UNRPA_COMMAND: &str = "unrpa";
pub const DEFAULT_RPATOOL_COMMAND: &str = "rpatool";
pub const DEFAULT_PYTHON_COMMAND: &str = "python3";
pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 5 * 60;

// Env override prefix, e.g. RPY_WORKBENCH_STORAGE__JOB_TTL=2h
pub const ENV_PREFIX: &str = "RPY_WORKBENCH_";
