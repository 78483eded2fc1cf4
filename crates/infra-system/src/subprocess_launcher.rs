// Subprocess launcher implementation
// reason: async-trait, tokio for async process management and pipe streaming
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use esther_core::domain::{CommandLine, ProcessState};
use esther_core::port::{EventSink, ExecutionError, LaunchHandle, ProcessLauncher};

/// Read size for stdout/stderr pipes
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// How long pipes may stay open after the child exited
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy)]
enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    fn name(&self) -> &'static str {
        match self {
            OutputStream::Stdout => "stdout",
            OutputStream::Stderr => "stderr",
        }
    }
}

/// Subprocess launcher
/// Spawns the child with piped output and forwards it chunk by chunk
pub struct SubprocessLauncher {
    working_dir: Option<PathBuf>,
    chunk_size: usize,
    drain_timeout: Duration,
}

impl SubprocessLauncher {
    /// Create a launcher that inherits the current working directory
    ///
    /// # Example
    /// ```ignore
    /// let launcher = SubprocessLauncher::new().with_working_dir("/opt/esther");
    /// ```
    pub fn new() -> Self {
        Self {
            working_dir: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    fn build_command(&self, command: &CommandLine) -> Command {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        cmd
    }

    fn spawn_reader<R>(
        &self,
        reader: Option<R>,
        stream: OutputStream,
        sink: &EventSink,
    ) -> Option<JoinHandle<()>>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let reader = reader?;
        let sink = sink.clone();
        let chunk_size = self.chunk_size;
        Some(tokio::spawn(forward_output(reader, stream, sink, chunk_size)))
    }
}

impl Default for SubprocessLauncher {
    fn default() -> Self {
        Self::new()
    }
}

/// Forward one pipe until EOF, preserving read order
async fn forward_output<R>(
    mut reader: R,
    stream: OutputStream,
    sink: EventSink,
    chunk_size: usize,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; chunk_size];

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let chunk = buf[..n].to_vec();
                match stream {
                    OutputStream::Stdout => sink.stdout(chunk),
                    OutputStream::Stderr => sink.stderr(chunk),
                }
            }
            Err(e) => {
                warn!(
                    session = sink.session(),
                    stream = stream.name(),
                    error = %e,
                    "Pipe read failed, stopping reader"
                );
                break;
            }
        }
    }

    debug!(session = sink.session(), stream = stream.name(), "Pipe closed");
}

/// Wait for the child to exit, then give the readers a bounded window
///
/// Output already written by the child is forwarded before Finished. A pipe
/// kept open by a background descendant does not hold the session open past
/// `drain_timeout`; its reader is aborted.
async fn supervise(
    mut child: Child,
    mut readers: Vec<JoinHandle<()>>,
    sink: EventSink,
    drain_timeout: Duration,
) {
    let exit_code = match child.wait().await {
        Ok(status) => status.code(),
        Err(e) => {
            warn!(session = sink.session(), error = %e, "Failed to collect exit status");
            None
        }
    };

    let drain = async {
        for reader in readers.iter_mut() {
            if let Err(e) = reader.await {
                warn!(session = sink.session(), error = %e, "Output reader task failed");
            }
        }
    };

    if tokio::time::timeout(drain_timeout, drain).await.is_err() {
        warn!(
            session = sink.session(),
            timeout_ms = drain_timeout.as_millis() as u64,
            "Output still open after exit, abandoning readers"
        );
        for reader in &readers {
            reader.abort();
        }
    }

    info!(
        session = sink.session(),
        exit_code = ?exit_code,
        "Subprocess exited"
    );

    sink.state_changed(ProcessState::NotRunning);
    sink.finished(exit_code);
}

#[async_trait]
impl ProcessLauncher for SubprocessLauncher {
    async fn launch(
        &self,
        command: &CommandLine,
        sink: EventSink,
    ) -> Result<LaunchHandle, ExecutionError> {
        info!(
            session = sink.session(),
            program = %command.program.display(),
            args = ?command.args,
            working_dir = ?self.working_dir,
            "Spawning subprocess"
        );

        let mut child = self
            .build_command(command)
            .spawn()
            .map_err(|e| ExecutionError::SpawnFailed(e.to_string()))?;

        let pid = child.id();
        sink.state_changed(ProcessState::Running);

        let readers: Vec<JoinHandle<()>> = [
            self.spawn_reader(child.stdout.take(), OutputStream::Stdout, &sink),
            self.spawn_reader(child.stderr.take(), OutputStream::Stderr, &sink),
        ]
        .into_iter()
        .flatten()
        .collect();

        tokio::spawn(supervise(child, readers, sink, self.drain_timeout));

        Ok(LaunchHandle { pid })
    }
}
