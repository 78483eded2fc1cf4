// Application Layer - Process monitor use case

pub mod monitor;

// Re-exports
pub use monitor::{MonitorConfig, MonitorEvent, ProcessMonitor};
