// Monitor constants (no magic values)

/// Acquisition executable, relative to the working directory
pub const DEFAULT_EXECUTABLE: &str = "./estherdaq";

/// Cap of each rolling display buffer (1 MiB)
pub const DEFAULT_MAX_BUFFER_BYTES: usize = 1024 * 1024;

/// Shown on the error pane when a start arrives while a session is active
pub const BUSY_MESSAGE: &str = "Process not finished";

pub const EXECUTING_MESSAGE: &str = "Executing process";

pub const FINISHED_MESSAGE: &str = "Process finished.";
