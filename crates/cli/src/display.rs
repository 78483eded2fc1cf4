//! Terminal rendering of monitor events

use colored::Colorize;
use std::io::Write;
use tabled::{Table, Tabled};
use tokio::sync::mpsc;

use esther_core::application::MonitorEvent;
use esther_core::domain::{ProcessSession, Progress};

/// Print events until the monitor drops its end of the channel
pub async fn print_events(mut events: mpsc::UnboundedReceiver<MonitorEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            MonitorEvent::Stdout(text) => {
                print!("{}", text);
                let _ = std::io::stdout().flush();
            }
            MonitorEvent::Stderr(text) => {
                eprint!("{}", text.red());
            }
            MonitorEvent::Progress(progress) => println!("{}", format_progress(&progress)),
            MonitorEvent::StateChanged(state) => {
                println!("{}", format!("State changed: {}", state.label()).dimmed())
            }
            MonitorEvent::Notice(message) => println!("{}", message.dimmed()),
            MonitorEvent::Finished { .. } => {}
        }
    }
}

pub fn format_progress(progress: &Progress) -> String {
    let velocity = progress
        .velocity_m_per_s()
        .map(|v| format!(", {:.3} m/s", v))
        .unwrap_or_default();
    format!(
        "{} {:.3} us ({} ticks{})",
        "Delay:".cyan().bold(),
        progress.delay_us(),
        progress.ticks,
        velocity
    )
}

#[derive(Tabled)]
struct SummaryRow {
    #[tabled(rename = "Field")]
    field: &'static str,
    #[tabled(rename = "Value")]
    value: String,
}

fn or_dash<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

/// Summary table of a finished session
pub fn summary_table(session: &ProcessSession) -> String {
    let rows = vec![
        SummaryRow {
            field: "Session",
            value: session.id.to_string(),
        },
        SummaryRow {
            field: "Command",
            value: session.command_line.to_string(),
        },
        SummaryRow {
            field: "State",
            value: session.state.to_string(),
        },
        SummaryRow {
            field: "PID",
            value: or_dash(session.pid),
        },
        SummaryRow {
            field: "Exit code",
            value: or_dash(session.exit_code),
        },
        SummaryRow {
            field: "Duration (ms)",
            value: or_dash(session.duration_ms()),
        },
        SummaryRow {
            field: "Delay (us)",
            value: or_dash(session.last_progress.map(|p| format!("{:.3}", p.delay_us()))),
        },
    ];

    Table::new(rows).to_string()
}
