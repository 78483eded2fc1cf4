//! End-to-end tests: ProcessMonitor driving real child processes
//!
//! Verifies output ordering, progress extraction and the argument list
//! received by the acquisition executable.
#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use esther_core::application::{MonitorConfig, MonitorEvent, ProcessMonitor};
use esther_core::domain::{
    encode_multiplier, wrap_twos_complement, CommandLine, Progress, SessionState, ThresholdPair,
    TriggerSettings,
};
use esther_core::port::time_provider::SystemTimeProvider;
use esther_infra_system::SubprocessLauncher;
use tokio::sync::mpsc;
use tokio::time::timeout;

const DUMMY_SCRIPT: &str = concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/tests/fixtures/dummy_script.sh"
);
const ECHO_ARGS: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/echo_args.sh");

const RUN_TIMEOUT: Duration = Duration::from_secs(10);

fn sh_monitor() -> ProcessMonitor {
    ProcessMonitor::new(
        Arc::new(SubprocessLauncher::new()),
        Arc::new(SystemTimeProvider),
        MonitorConfig {
            executable: "sh".into(),
            ..Default::default()
        },
    )
}

async fn run_to_end(monitor: &mut ProcessMonitor) {
    timeout(RUN_TIMEOUT, monitor.run_until_finished())
        .await
        .expect("child process did not finish in time");
}

fn drain(rx: &mut mpsc::UnboundedReceiver<MonitorEvent>) -> Vec<MonitorEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Fixture script: stdout and stderr accumulate in emission order
#[tokio::test]
async fn test_fixture_output_accumulates_in_order() {
    let mut monitor = sh_monitor();
    let mut rx = monitor.subscribe();

    monitor.start(vec![DUMMY_SCRIPT.to_string()]).await.unwrap();
    run_to_end(&mut monitor).await;

    let expected_stdout = "Script stdout 1\nScript stdout 2\nScript stdout 3\n\
                           name=Martin\nScript stdout 4\nScript stdout 5\n\
                           country=Nederland\n\
                           Script stdout 6\nScript stdout 7\nwebsite=www.mfitzp.com\n";
    let expected_stderr = "Total time: 00:05:00\nTotal complete: 10%\n\
                           Total complete: 30%\n\
                           Elapsed time: 00:00:10\nElapsed time: 00:00:50\nTotal complete: 50%\n\
                           Elapsed time: 00:01:10\nTotal complete: 100%\n";

    let session = monitor.last_session().unwrap();
    assert_eq!(session.state, SessionState::Finished);
    assert_eq!(session.exit_code, Some(0));
    assert_eq!(session.stdout_buffer.as_str(), expected_stdout);
    assert_eq!(session.stderr_buffer.as_str(), expected_stderr);
    assert_eq!(monitor.stderr_buffer(), expected_stderr);
    assert!(monitor.stdout_buffer().contains(expected_stdout));
    assert_eq!(monitor.last_progress(), None);

    let events = drain(&mut rx);
    let streamed_stdout: String = events
        .iter()
        .filter_map(|e| match e {
            MonitorEvent::Stdout(text) => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(streamed_stdout, expected_stdout);

    assert!(matches!(
        events.last(),
        Some(MonitorEvent::Finished {
            exit_code: Some(0),
            ..
        })
    ));
}

#[tokio::test]
async fn test_delay_marker_from_child_stdout() {
    let mut monitor = sh_monitor();

    monitor
        .start(vec![
            "-c".to_string(),
            "echo 'noise Delay:  123 more'".to_string(),
        ])
        .await
        .unwrap();
    run_to_end(&mut monitor).await;

    assert_eq!(monitor.last_progress(), Some(Progress::new(123)));
    assert!(monitor.stdout_buffer().contains("noise Delay:  123 more\n"));
}

/// The executable receives exactly the encoded argument list
#[tokio::test]
async fn test_end_to_end_argument_scenario() {
    let settings = TriggerSettings {
        channel_a: ThresholdPair::new(9000, -300),
        channel_b: ThresholdPair::new(9000, -500),
        channel_c: ThresholdPair::new(9000, -500),
        acq_size: "0x200000".to_string(),
        multiplier: 3.1,
        soft_trigger: false,
    };
    let args = settings.to_args().unwrap();

    let pair = |high: i64, low: i64| {
        format!(
            "0x{:04x}{:04x}",
            wrap_twos_complement(high, 16),
            wrap_twos_complement(low, 16)
        )
    };
    let expected = vec![
        "-a".to_string(),
        pair(9000, -300),
        "-b".to_string(),
        pair(9000, -500),
        "-c".to_string(),
        pair(9000, -500),
        "-s".to_string(),
        "0x200000".to_string(),
        "-m".to_string(),
        encode_multiplier(3.1).unwrap(),
        String::new(),
    ];
    assert_eq!(args, expected);

    let mut monitor = sh_monitor();
    let mut command_args = vec![ECHO_ARGS.to_string()];
    command_args.extend(args.iter().cloned());
    monitor
        .start_command(CommandLine::new("sh", command_args))
        .await
        .unwrap();
    run_to_end(&mut monitor).await;

    let received: Vec<String> = monitor
        .last_session()
        .unwrap()
        .stdout_buffer
        .as_str()
        .lines()
        .filter_map(|line| line.strip_prefix('[')?.strip_suffix(']'))
        .map(str::to_string)
        .collect();
    assert_eq!(received, expected);
    assert_eq!(monitor.last_progress(), Some(Progress::new(123)));
}

#[tokio::test]
async fn test_soft_trigger_reaches_executable() {
    let settings = TriggerSettings {
        soft_trigger: true,
        ..Default::default()
    };

    let mut monitor = sh_monitor();
    let mut command_args = vec![ECHO_ARGS.to_string()];
    command_args.extend(settings.to_args().unwrap());
    monitor
        .start_command(CommandLine::new("sh", command_args))
        .await
        .unwrap();
    run_to_end(&mut monitor).await;

    assert!(monitor.stdout_buffer().contains("[-t]\n"));
    assert!(!monitor.stdout_buffer().contains("[]\n"));
}
