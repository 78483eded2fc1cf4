// Port Layer - Interfaces for external dependencies

pub mod process_launcher;
pub mod time_provider;

// Re-exports
pub use process_launcher::mocks;
pub use process_launcher::{
    EventSink, ExecutionError, LaunchHandle, ProcessEvent, ProcessEventKind, ProcessLauncher,
};
pub use time_provider::TimeProvider;
