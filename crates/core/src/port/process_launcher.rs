// Process Launcher Port
// Abstraction for spawning the acquisition executable and streaming its output

use crate::domain::{CommandLine, ProcessState, SessionId};
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// Raw event produced by a launcher for one session
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessEvent {
    pub session: SessionId,
    pub kind: ProcessEventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProcessEventKind {
    StateChanged(ProcessState),
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
    Finished { exit_code: Option<i32> },
}

/// Sending half handed to a launcher; tags every event with its session
#[derive(Debug, Clone)]
pub struct EventSink {
    session: SessionId,
    tx: mpsc::UnboundedSender<ProcessEvent>,
}

impl EventSink {
    pub fn new(session: SessionId, tx: mpsc::UnboundedSender<ProcessEvent>) -> Self {
        Self { session, tx }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn state_changed(&self, state: ProcessState) {
        self.send(ProcessEventKind::StateChanged(state));
    }

    pub fn stdout(&self, bytes: Vec<u8>) {
        self.send(ProcessEventKind::Stdout(bytes));
    }

    pub fn stderr(&self, bytes: Vec<u8>) {
        self.send(ProcessEventKind::Stderr(bytes));
    }

    pub fn finished(&self, exit_code: Option<i32>) {
        self.send(ProcessEventKind::Finished { exit_code });
    }

    fn send(&self, kind: ProcessEventKind) {
        // Monitor gone: nobody left to deliver to
        let _ = self.tx.send(ProcessEvent {
            session: self.session,
            kind,
        });
    }
}

/// Returned once the OS accepted the spawn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchHandle {
    pub pid: Option<u32>,
}

/// Launch errors
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Spawn failed: {0}")]
    SpawnFailed(String),
}

/// Process Launcher trait
///
/// Implementations:
/// - SubprocessLauncher: spawns a real child process (infra-system)
/// - mocks::ScriptedLauncher: replays a fixed event script
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    /// Spawn `command` and stream its lifecycle into `sink`
    ///
    /// Must return without waiting for the child to exit. On success the
    /// launcher emits `StateChanged(Running)` first, then output chunks in
    /// read order per stream, then `StateChanged(NotRunning)` and
    /// `Finished` once the child exited and its pending output was
    /// delivered.
    ///
    /// # Errors
    /// - ExecutionError::SpawnFailed if the executable cannot be started
    async fn launch(
        &self,
        command: &CommandLine,
        sink: EventSink,
    ) -> Result<LaunchHandle, ExecutionError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Replays a fixed list of events after confirming the spawn
    #[derive(Clone)]
    pub struct ScriptedLauncher {
        script: Vec<ProcessEventKind>,
        launches: Arc<Mutex<Vec<CommandLine>>>,
    }

    impl ScriptedLauncher {
        pub fn new(script: Vec<ProcessEventKind>) -> Self {
            Self {
                script,
                launches: Arc::new(Mutex::new(Vec::new())),
            }
        }

        /// Child that confirms the spawn and never exits
        pub fn hanging() -> Self {
            Self::new(Vec::new())
        }

        /// Child that prints `stdout` and exits with `exit_code`
        pub fn printing(stdout: &str, exit_code: i32) -> Self {
            Self::new(vec![
                ProcessEventKind::Stdout(stdout.as_bytes().to_vec()),
                ProcessEventKind::StateChanged(ProcessState::NotRunning),
                ProcessEventKind::Finished {
                    exit_code: Some(exit_code),
                },
            ])
        }

        pub fn launches(&self) -> Vec<CommandLine> {
            self.launches
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone()
        }
    }

    #[async_trait]
    impl ProcessLauncher for ScriptedLauncher {
        async fn launch(
            &self,
            command: &CommandLine,
            sink: EventSink,
        ) -> Result<LaunchHandle, ExecutionError> {
            self.launches
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(command.clone());

            sink.state_changed(ProcessState::Running);
            for kind in &self.script {
                sink.send(kind.clone());
            }

            Ok(LaunchHandle { pid: Some(4242) })
        }
    }

    /// Always fails to spawn
    pub struct FailingLauncher {
        message: String,
    }

    impl FailingLauncher {
        pub fn new(message: impl Into<String>) -> Self {
            Self {
                message: message.into(),
            }
        }
    }

    #[async_trait]
    impl ProcessLauncher for FailingLauncher {
        async fn launch(
            &self,
            _command: &CommandLine,
            _sink: EventSink,
        ) -> Result<LaunchHandle, ExecutionError> {
            Err(ExecutionError::SpawnFailed(self.message.clone()))
        }
    }
}
