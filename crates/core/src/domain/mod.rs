// Domain Layer - Pure logic and entities

pub mod buffer;
pub mod error;
pub mod progress;
pub mod session;
pub mod trigger;

// Re-exports
pub use buffer::RollingBuffer;
pub use error::DomainError;
pub use progress::{parse_delay, Progress};
pub use session::{CommandLine, ProcessSession, ProcessState, SessionId, SessionState};
pub use trigger::{encode_multiplier, wrap_twos_complement, ThresholdPair, TriggerSettings};
