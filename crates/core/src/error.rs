// Central Error Type for the Application

use thiserror::Error;

/// Application-level error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    /// A start request arrived while a session is Starting or Running
    #[error("Process not finished: {command_line}")]
    AlreadyRunning { command_line: String },
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
