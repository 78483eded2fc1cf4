// Process Session Domain Model

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::buffer::RollingBuffer;
use super::error::{DomainError, Result};
use super::progress::Progress;

/// Session identifier (monotonic per monitor)
pub type SessionId = u64;

/// Program and ordered arguments of one invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandLine {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl CommandLine {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl std::fmt::Display for CommandLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            if arg.is_empty() {
                write!(f, " ''")?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// OS-level state of the child process, as reported by the launcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessState {
    NotRunning,
    Starting,
    Running,
}

impl ProcessState {
    /// Human-readable label for display
    pub fn label(&self) -> &'static str {
        match self {
            ProcessState::NotRunning => "Not running",
            ProcessState::Starting => "Starting",
            ProcessState::Running => "Running",
        }
    }
}

impl TryFrom<i32> for ProcessState {
    type Error = DomainError;

    fn try_from(code: i32) -> Result<Self> {
        match code {
            0 => Ok(ProcessState::NotRunning),
            1 => Ok(ProcessState::Starting),
            2 => Ok(ProcessState::Running),
            other => Err(DomainError::UnknownProcessState(other)),
        }
    }
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    NotStarted,
    Starting,
    Running,
    Finished,
}

impl SessionState {
    /// Starting or Running: the monitor refuses a new start
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Starting | SessionState::Running)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::NotStarted => write!(f, "NOT_STARTED"),
            SessionState::Starting => write!(f, "STARTING"),
            SessionState::Running => write!(f, "RUNNING"),
            SessionState::Finished => write!(f, "FINISHED"),
        }
    }
}

/// One run of the acquisition executable
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessSession {
    pub id: SessionId,
    pub command_line: CommandLine,
    pub state: SessionState,

    pub stdout_buffer: RollingBuffer,
    pub stderr_buffer: RollingBuffer,
    pub last_progress: Option<Progress>,

    pub pid: Option<u32>,
    pub started_at: Option<i64>, // epoch ms
    pub finished_at: Option<i64>,
    pub exit_code: Option<i32>,
}

impl ProcessSession {
    pub fn new(id: SessionId, command_line: CommandLine, buffer_capacity: usize) -> Self {
        Self {
            id,
            command_line,
            state: SessionState::NotStarted,
            stdout_buffer: RollingBuffer::new(buffer_capacity),
            stderr_buffer: RollingBuffer::new(buffer_capacity),
            last_progress: None,
            pid: None,
            started_at: None,
            finished_at: None,
            exit_code: None,
        }
    }

    /// NotStarted -> Starting
    pub fn begin(&mut self, now: i64) -> Result<()> {
        self.transition(SessionState::Starting)?;
        self.started_at = Some(now);
        Ok(())
    }

    /// Starting -> Running (OS confirmed the spawn)
    pub fn confirm_running(&mut self, pid: Option<u32>) -> Result<()> {
        self.transition(SessionState::Running)?;
        if pid.is_some() {
            self.pid = pid;
        }
        Ok(())
    }

    /// Starting | Running -> Finished, regardless of exit code
    pub fn finish(&mut self, now: i64, exit_code: Option<i32>) -> Result<()> {
        self.transition(SessionState::Finished)?;
        self.finished_at = Some(now);
        self.exit_code = exit_code;
        Ok(())
    }

    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }

    fn transition(&mut self, to: SessionState) -> Result<()> {
        let allowed = matches!(
            (self.state, to),
            (SessionState::NotStarted, SessionState::Starting)
                | (SessionState::Starting, SessionState::Running)
                | (SessionState::Starting, SessionState::Finished)
                | (SessionState::Running, SessionState::Finished)
        );

        if !allowed {
            return Err(DomainError::InvalidStateTransition {
                from: self.state.to_string(),
                to: to.to_string(),
            });
        }

        self.state = to;
        Ok(())
    }
}
