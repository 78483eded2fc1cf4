// Process Monitor
// Owns at most one acquisition session and turns launcher events into
// display events. All state is mutated by the task that owns the monitor.

pub mod constants;
pub mod decoder;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::domain::{
    parse_delay, CommandLine, ProcessSession, ProcessState, Progress, RollingBuffer, SessionId,
    TriggerSettings,
};
use crate::error::{AppError, Result};
use crate::port::{EventSink, ProcessEvent, ProcessEventKind, ProcessLauncher, TimeProvider};

use constants::{
    BUSY_MESSAGE, DEFAULT_EXECUTABLE, DEFAULT_MAX_BUFFER_BYTES, EXECUTING_MESSAGE,
    FINISHED_MESSAGE,
};
use decoder::Utf8StreamDecoder;

/// Monitor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Program started by `start`
    pub executable: PathBuf,
    /// Cap of each display and session buffer
    pub max_buffer_bytes: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from(DEFAULT_EXECUTABLE),
            max_buffer_bytes: DEFAULT_MAX_BUFFER_BYTES,
        }
    }
}

/// Event delivered to subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    /// Decoded stdout text, in read order
    Stdout(String),
    /// Decoded stderr text and monitor diagnostics, in read order
    Stderr(String),
    /// A `Delay:` marker was found in stdout
    Progress(Progress),
    StateChanged(ProcessState),
    Finished {
        session: SessionId,
        exit_code: Option<i32>,
    },
    /// Informational line from the monitor itself
    Notice(String),
}

pub struct ProcessMonitor {
    launcher: Arc<dyn ProcessLauncher>,
    time_provider: Arc<dyn TimeProvider>,
    config: MonitorConfig,

    active: Option<ProcessSession>,
    last_session: Option<ProcessSession>,
    next_session_id: SessionId,

    events_tx: mpsc::UnboundedSender<ProcessEvent>,
    events_rx: mpsc::UnboundedReceiver<ProcessEvent>,
    subscribers: Vec<mpsc::UnboundedSender<MonitorEvent>>,

    stdout_decoder: Utf8StreamDecoder,
    stderr_decoder: Utf8StreamDecoder,
    stdout_display: RollingBuffer,
    stderr_display: RollingBuffer,
    last_progress: Option<Progress>,
}

impl ProcessMonitor {
    pub fn new(
        launcher: Arc<dyn ProcessLauncher>,
        time_provider: Arc<dyn TimeProvider>,
        config: MonitorConfig,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let capacity = config.max_buffer_bytes;

        Self {
            launcher,
            time_provider,
            config,
            active: None,
            last_session: None,
            next_session_id: 0,
            events_tx,
            events_rx,
            subscribers: Vec::new(),
            stdout_decoder: Utf8StreamDecoder::new(),
            stderr_decoder: Utf8StreamDecoder::new(),
            stdout_display: RollingBuffer::new(capacity),
            stderr_display: RollingBuffer::new(capacity),
            last_progress: None,
        }
    }

    /// Register a subscriber; every later event is delivered to it in order
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<MonitorEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    /// Start the configured executable with `args`
    ///
    /// # Errors
    /// - AppError::AlreadyRunning if a session is Starting or Running
    pub async fn start(&mut self, args: Vec<String>) -> Result<()> {
        let command = CommandLine::new(self.config.executable.clone(), args);
        self.start_command(command).await
    }

    /// Start the configured executable with arguments built from `settings`
    pub async fn start_with(&mut self, settings: &TriggerSettings) -> Result<()> {
        let args = settings.to_args()?;
        self.start(args).await
    }

    /// Start an arbitrary command line
    ///
    /// Returns once the spawn attempt completed. A spawn failure is reported
    /// on the stderr stream and finalises the session; it is not an error
    /// of this call.
    pub async fn start_command(&mut self, command: CommandLine) -> Result<()> {
        if let Some(active) = self.active.as_ref().filter(|s| s.state.is_active()) {
            let running = active.command_line.to_string();
            warn!(session = active.id, command = %running, "Start rejected, process not finished");
            self.emit_stderr(format!("{}\n", BUSY_MESSAGE));
            return Err(AppError::AlreadyRunning {
                command_line: running,
            });
        }

        self.next_session_id += 1;
        let id = self.next_session_id;

        let mut session = ProcessSession::new(id, command.clone(), self.config.max_buffer_bytes);
        session.begin(self.time_provider.now_millis())?;

        self.stderr_display.clear();
        self.stdout_decoder = Utf8StreamDecoder::new();
        self.stderr_decoder = Utf8StreamDecoder::new();
        self.active = Some(session);

        info!(session = id, command = %command, "Starting acquisition process");
        self.notice(EXECUTING_MESSAGE);
        self.on_state_changed(ProcessState::Starting);

        let sink = EventSink::new(id, self.events_tx.clone());
        match self.launcher.launch(&command, sink).await {
            Ok(handle) => {
                debug!(session = id, pid = ?handle.pid, "Process spawned");
                if let Some(session) = self.active.as_mut() {
                    session.pid = handle.pid;
                }
            }
            Err(e) => {
                error!(session = id, error = %e, "Failed to launch process");
                self.on_stderr_text(format!(
                    "Failed to start {}: {}\n",
                    command.program.display(),
                    e
                ));
                self.on_state_changed(ProcessState::NotRunning);
                self.on_finished(None);
            }
        }

        Ok(())
    }

    /// Wait for the next launcher event and apply it
    pub async fn next_event(&mut self) -> Option<ProcessEvent> {
        let event = self.events_rx.recv().await?;
        self.handle_event(event.clone());
        Some(event)
    }

    /// Apply every event already queued, without waiting; returns the count
    pub fn process_pending(&mut self) -> usize {
        let mut count = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event);
            count += 1;
        }
        count
    }

    /// Apply events until the active session (if any) has finished
    pub async fn run_until_finished(&mut self) {
        while self.is_busy() {
            if self.next_event().await.is_none() {
                break;
            }
        }
    }

    /// Dispatch one launcher event; events of other sessions are dropped
    pub fn handle_event(&mut self, event: ProcessEvent) {
        let current = self.active.as_ref().map(|s| s.id);
        if current != Some(event.session) {
            debug!(
                session = event.session,
                current = ?current,
                "Dropping event of inactive session"
            );
            return;
        }

        match event.kind {
            ProcessEventKind::StateChanged(state) => self.on_state_changed(state),
            ProcessEventKind::Stdout(bytes) => self.on_stdout_chunk(&bytes),
            ProcessEventKind::Stderr(bytes) => self.on_stderr_chunk(&bytes),
            ProcessEventKind::Finished { exit_code } => self.on_finished(exit_code),
        }
    }

    pub fn on_stdout_chunk(&mut self, bytes: &[u8]) {
        let text = self.stdout_decoder.decode(bytes);
        self.on_stdout_text(text);
    }

    pub fn on_stderr_chunk(&mut self, bytes: &[u8]) {
        let text = self.stderr_decoder.decode(bytes);
        self.on_stderr_text(text);
    }

    pub fn on_state_changed(&mut self, state: ProcessState) {
        debug!(state = %state, "Process state changed");

        if state == ProcessState::Running {
            if let Some(session) = self.active.as_mut() {
                if let Err(e) = session.confirm_running(None) {
                    warn!(session = session.id, error = %e, "Unexpected Running state");
                }
            }
        }

        self.stdout_display
            .push_line(&format!("State changed: {}", state.label()));
        self.emit(MonitorEvent::StateChanged(state));
    }

    /// Finalise the active session and accept new starts again
    pub fn on_finished(&mut self, exit_code: Option<i32>) {
        let tail = self.stdout_decoder.finish();
        self.on_stdout_text(tail);
        let tail = self.stderr_decoder.finish();
        self.on_stderr_text(tail);

        let Some(mut session) = self.active.take() else {
            debug!("Finished event without an active session");
            return;
        };

        if let Err(e) = session.finish(self.time_provider.now_millis(), exit_code) {
            warn!(session = session.id, error = %e, "Unexpected finish");
        }

        info!(
            session = session.id,
            exit_code = ?exit_code,
            duration_ms = ?session.duration_ms(),
            "Acquisition process finished"
        );

        let id = session.id;
        self.last_session = Some(session);
        self.notice(FINISHED_MESSAGE);
        self.emit(MonitorEvent::Finished {
            session: id,
            exit_code,
        });
    }

    /// A session is Starting or Running
    pub fn is_busy(&self) -> bool {
        self.active.as_ref().is_some_and(|s| s.state.is_active())
    }

    /// The active session, if any
    pub fn session(&self) -> Option<&ProcessSession> {
        self.active.as_ref()
    }

    /// The most recently finished session
    pub fn last_session(&self) -> Option<&ProcessSession> {
        self.last_session.as_ref()
    }

    /// Command line of the active session, else of the last finished one
    pub fn last_command_line(&self) -> Option<&CommandLine> {
        self.active
            .as_ref()
            .or(self.last_session.as_ref())
            .map(|s| &s.command_line)
    }

    /// Output pane: stdout text plus monitor notices
    pub fn stdout_buffer(&self) -> &str {
        self.stdout_display.as_str()
    }

    /// Error pane: stderr text plus diagnostics; cleared on each start
    pub fn stderr_buffer(&self) -> &str {
        self.stderr_display.as_str()
    }

    pub fn last_progress(&self) -> Option<Progress> {
        self.last_progress
    }

    fn on_stdout_text(&mut self, text: String) {
        if text.is_empty() {
            return;
        }

        let progress = parse_delay(&text);
        if let Some(session) = self.active.as_mut() {
            session.stdout_buffer.push(&text);
            if progress.is_some() {
                session.last_progress = progress;
            }
        }
        self.stdout_display.push(&text);
        self.emit(MonitorEvent::Stdout(text));

        if let Some(progress) = progress {
            debug!(
                ticks = progress.ticks,
                delay_us = progress.delay_us(),
                velocity_m_per_s = ?progress.velocity_m_per_s(),
                "Delay marker decoded"
            );
            self.last_progress = Some(progress);
            self.emit(MonitorEvent::Progress(progress));
        }
    }

    fn on_stderr_text(&mut self, text: String) {
        if text.is_empty() {
            return;
        }

        if let Some(session) = self.active.as_mut() {
            session.stderr_buffer.push(&text);
        }
        self.emit_stderr(text);
    }

    fn emit_stderr(&mut self, text: String) {
        self.stderr_display.push(&text);
        self.emit(MonitorEvent::Stderr(text));
    }

    fn notice(&mut self, message: &str) {
        self.stdout_display.push_line(message);
        self.emit(MonitorEvent::Notice(message.to_string()));
    }

    fn emit(&mut self, event: MonitorEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SessionState;
    use crate::port::mocks::{FailingLauncher, ScriptedLauncher};
    use crate::port::time_provider::FixedTimeProvider;

    fn monitor_with(launcher: Arc<dyn ProcessLauncher>) -> ProcessMonitor {
        ProcessMonitor::new(
            launcher,
            Arc::new(FixedTimeProvider(1_000)),
            MonitorConfig::default(),
        )
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<MonitorEvent>) -> Vec<MonitorEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_start_emits_lifecycle_in_order() {
        let launcher = ScriptedLauncher::printing("noise Delay:  123 more\n", 0);
        let mut monitor = monitor_with(Arc::new(launcher.clone()));
        let mut rx = monitor.subscribe();

        monitor.start(vec!["-s".to_string()]).await.unwrap();
        assert!(monitor.is_busy());
        assert_eq!(monitor.session().unwrap().state, SessionState::Starting);
        assert_eq!(monitor.session().unwrap().pid, Some(4242));

        assert_eq!(monitor.process_pending(), 4);
        assert!(!monitor.is_busy());

        let events = drain(&mut rx);
        assert_eq!(
            events,
            vec![
                MonitorEvent::Notice(EXECUTING_MESSAGE.to_string()),
                MonitorEvent::StateChanged(ProcessState::Starting),
                MonitorEvent::StateChanged(ProcessState::Running),
                MonitorEvent::Stdout("noise Delay:  123 more\n".to_string()),
                MonitorEvent::Progress(Progress::new(123)),
                MonitorEvent::StateChanged(ProcessState::NotRunning),
                MonitorEvent::Notice(FINISHED_MESSAGE.to_string()),
                MonitorEvent::Finished {
                    session: 1,
                    exit_code: Some(0)
                },
            ]
        );

        let last = monitor.last_session().unwrap();
        assert_eq!(last.state, SessionState::Finished);
        assert_eq!(last.exit_code, Some(0));
        assert_eq!(last.last_progress, Some(Progress::new(123)));
        assert_eq!(monitor.last_progress(), Some(Progress::new(123)));
        assert_eq!(launcher.launches()[0].program, PathBuf::from(DEFAULT_EXECUTABLE));
    }

    #[tokio::test]
    async fn test_second_start_is_rejected_while_running() {
        let launcher = ScriptedLauncher::hanging();
        let mut monitor = monitor_with(Arc::new(launcher.clone()));

        monitor.start(vec!["-a".to_string(), "first".to_string()]).await.unwrap();
        monitor.process_pending();
        assert_eq!(monitor.session().unwrap().state, SessionState::Running);

        let result = monitor.start(vec!["-a".to_string(), "second".to_string()]).await;
        assert!(matches!(result, Err(AppError::AlreadyRunning { .. })));

        let session = monitor.session().unwrap();
        assert_eq!(session.id, 1);
        assert_eq!(session.state, SessionState::Running);
        assert_eq!(session.command_line.args, vec!["-a", "first"]);
        assert_eq!(launcher.launches().len(), 1);
        assert!(monitor.stderr_buffer().contains(BUSY_MESSAGE));
    }

    #[tokio::test]
    async fn test_start_is_rejected_while_starting() {
        let mut monitor = monitor_with(Arc::new(ScriptedLauncher::hanging()));

        monitor.start(vec![]).await.unwrap();
        // Running confirmation not processed yet
        assert_eq!(monitor.session().unwrap().state, SessionState::Starting);
        assert!(matches!(
            monitor.start(vec![]).await,
            Err(AppError::AlreadyRunning { .. })
        ));
    }

    #[tokio::test]
    async fn test_launch_failure_finalises_session() {
        let mut monitor = monitor_with(Arc::new(FailingLauncher::new("No such file")));
        let mut rx = monitor.subscribe();

        monitor.start(vec![]).await.unwrap();

        assert!(!monitor.is_busy());
        assert!(monitor.session().is_none());
        assert_eq!(
            monitor.last_session().unwrap().state,
            SessionState::Finished
        );
        assert!(monitor.stderr_buffer().contains("Failed to start ./estherdaq"));
        assert!(monitor.stderr_buffer().contains("No such file"));

        let events = drain(&mut rx);
        assert!(events.contains(&MonitorEvent::StateChanged(ProcessState::NotRunning)));
        assert!(matches!(
            events.last(),
            Some(MonitorEvent::Finished {
                session: 1,
                exit_code: None
            })
        ));

        // Ready for another attempt
        assert!(monitor.start(vec![]).await.is_ok());
        assert_eq!(monitor.last_session().unwrap().id, 2);
    }

    #[tokio::test]
    async fn test_stdout_without_marker_is_still_buffered() {
        let mut monitor = monitor_with(Arc::new(ScriptedLauncher::printing("Script stdout 1\n", 0)));
        monitor.start(vec![]).await.unwrap();
        monitor.process_pending();

        assert!(monitor.stdout_buffer().contains("Script stdout 1\n"));
        assert_eq!(monitor.last_progress(), None);
        assert_eq!(
            monitor.last_session().unwrap().stdout_buffer.as_str(),
            "Script stdout 1\n"
        );
    }

    #[tokio::test]
    async fn test_stderr_is_not_parsed() {
        let launcher = ScriptedLauncher::new(vec![ProcessEventKind::Stderr(
            b"Delay: 55\n".to_vec(),
        )]);
        let mut monitor = monitor_with(Arc::new(launcher));
        monitor.start(vec![]).await.unwrap();
        monitor.process_pending();

        assert_eq!(monitor.stderr_buffer(), "Delay: 55\n");
        assert_eq!(monitor.last_progress(), None);
    }

    #[tokio::test]
    async fn test_split_utf8_across_chunks() {
        let bytes = "0.984 µs\n".as_bytes();
        let cut = bytes.iter().position(|&b| b == 0xc2).unwrap() + 1;
        let launcher = ScriptedLauncher::new(vec![
            ProcessEventKind::Stdout(bytes[..cut].to_vec()),
            ProcessEventKind::Stdout(bytes[cut..].to_vec()),
        ]);
        let mut monitor = monitor_with(Arc::new(launcher));
        monitor.start(vec![]).await.unwrap();
        monitor.process_pending();

        assert_eq!(
            monitor.session().unwrap().stdout_buffer.as_str(),
            "0.984 µs\n"
        );
        assert!(!monitor.stdout_buffer().contains('\u{FFFD}'));
    }

    #[tokio::test]
    async fn test_events_of_finished_session_are_dropped() {
        let mut monitor = monitor_with(Arc::new(ScriptedLauncher::printing("done\n", 0)));
        monitor.start(vec![]).await.unwrap();
        monitor.process_pending();
        let before = monitor.stdout_buffer().to_string();

        monitor.handle_event(ProcessEvent {
            session: 1,
            kind: ProcessEventKind::Stdout(b"late Delay: 9\n".to_vec()),
        });

        assert_eq!(monitor.stdout_buffer(), before);
        assert_eq!(monitor.last_progress(), None);
    }

    #[tokio::test]
    async fn test_restart_clears_error_pane_only() {
        let launcher = ScriptedLauncher::new(vec![
            ProcessEventKind::Stdout(b"out\n".to_vec()),
            ProcessEventKind::Stderr(b"err\n".to_vec()),
            ProcessEventKind::Finished { exit_code: Some(2) },
        ]);
        let mut monitor = monitor_with(Arc::new(launcher));

        monitor.start(vec![]).await.unwrap();
        monitor.process_pending();
        assert_eq!(monitor.stderr_buffer(), "err\n");

        monitor.start(vec![]).await.unwrap();
        assert!(monitor.stderr_buffer().is_empty());
        assert!(monitor.stdout_buffer().contains("out\n"));
        assert_eq!(monitor.session().unwrap().id, 2);
        assert!(monitor.session().unwrap().stdout_buffer.is_empty());
    }

    #[tokio::test]
    async fn test_start_with_settings_builds_arguments() {
        let launcher = ScriptedLauncher::hanging();
        let mut monitor = monitor_with(Arc::new(launcher.clone()));
        let settings = TriggerSettings::default();

        monitor.start_with(&settings).await.unwrap();

        assert_eq!(launcher.launches()[0].args, settings.to_args().unwrap());
        assert_eq!(
            monitor.last_command_line().unwrap().args,
            settings.to_args().unwrap()
        );
    }

    #[tokio::test]
    async fn test_invalid_settings_do_not_start() {
        let launcher = ScriptedLauncher::hanging();
        let mut monitor = monitor_with(Arc::new(launcher.clone()));
        let settings = TriggerSettings {
            multiplier: f64::NAN,
            ..Default::default()
        };

        assert!(matches!(
            monitor.start_with(&settings).await,
            Err(AppError::Domain(_))
        ));
        assert!(launcher.launches().is_empty());
        assert!(!monitor.is_busy());
    }

    #[tokio::test]
    async fn test_closed_subscribers_are_pruned() {
        let mut monitor = monitor_with(Arc::new(ScriptedLauncher::hanging()));
        let rx = monitor.subscribe();
        let mut kept = monitor.subscribe();
        drop(rx);

        monitor.start(vec![]).await.unwrap();

        assert_eq!(monitor.subscribers.len(), 1);
        assert!(!drain(&mut kept).is_empty());
    }

    #[test]
    fn test_state_labels_reach_output_pane() {
        let mut monitor = monitor_with(Arc::new(ScriptedLauncher::hanging()));
        monitor.on_state_changed(ProcessState::Running);
        assert_eq!(monitor.stdout_buffer(), "State changed: Running\n");
    }
}
