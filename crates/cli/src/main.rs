//! Esther Trigger CLI - launches the acquisition executable with encoded
//! trigger thresholds and streams its output

mod display;
mod logging;
mod settings;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};

use esther_core::application::ProcessMonitor;
use esther_core::domain::TriggerSettings;
use esther_core::port::time_provider::SystemTimeProvider;
use esther_infra_system::SubprocessLauncher;

use settings::Settings;

#[derive(Parser)]
#[command(name = "esther-trigger")]
#[command(about = "Esther trigger acquisition controller", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file (TOML)
    #[arg(long, global = true, env = "ESTHER_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch the acquisition executable and stream its output
    Run {
        #[command(flatten)]
        trigger: TriggerArgs,

        #[command(flatten)]
        target: TargetArgs,
    },

    /// Print the argument list without launching anything
    #[command(name = "args")]
    ShowArgs {
        #[command(flatten)]
        trigger: TriggerArgs,

        #[command(flatten)]
        target: TargetArgs,
    },

    /// Print the effective settings as JSON
    Config,
}

/// Threshold fields; unset values come from the settings file
#[derive(clap::Args, Debug, Default)]
struct TriggerArgs {
    /// Channel A high level
    #[arg(long, allow_hyphen_values = true)]
    a_high: Option<String>,

    /// Channel A low level
    #[arg(long, allow_hyphen_values = true)]
    a_low: Option<String>,

    /// Channel B high level
    #[arg(long, allow_hyphen_values = true)]
    b_high: Option<String>,

    /// Channel B low level
    #[arg(long, allow_hyphen_values = true)]
    b_low: Option<String>,

    /// Channel C high level
    #[arg(long, allow_hyphen_values = true)]
    c_high: Option<String>,

    /// Channel C low level
    #[arg(long, allow_hyphen_values = true)]
    c_low: Option<String>,

    /// Acquisition size, passed verbatim (e.g. 0x200000)
    #[arg(long)]
    acq_size: Option<String>,

    /// Multiplier parameter (16.16 fixed point)
    #[arg(long, allow_hyphen_values = true)]
    multiplier: Option<String>,

    /// Start the acquisition with a software trigger
    #[arg(long, conflicts_with = "no_soft_trigger")]
    soft_trigger: bool,

    /// Disable the software trigger even if the settings file enables it
    #[arg(long)]
    no_soft_trigger: bool,
}

impl TriggerArgs {
    /// Overlay the flags on `base`, validating them like text fields
    fn apply(&self, base: &TriggerSettings) -> Result<TriggerSettings> {
        let field = |flag: &Option<String>, default: i64| {
            flag.clone().unwrap_or_else(|| default.to_string())
        };

        let a = (
            field(&self.a_high, base.channel_a.high),
            field(&self.a_low, base.channel_a.low),
        );
        let b = (
            field(&self.b_high, base.channel_b.high),
            field(&self.b_low, base.channel_b.low),
        );
        let c = (
            field(&self.c_high, base.channel_c.high),
            field(&self.c_low, base.channel_c.low),
        );
        let acq_size = self.acq_size.clone().unwrap_or_else(|| base.acq_size.clone());
        let multiplier = self
            .multiplier
            .clone()
            .unwrap_or_else(|| base.multiplier.to_string());

        let settings = TriggerSettings::from_fields(
            [
                (a.0.as_str(), a.1.as_str()),
                (b.0.as_str(), b.1.as_str()),
                (c.0.as_str(), c.1.as_str()),
            ],
            &acq_size,
            &multiplier,
            self.soft_trigger_or(base.soft_trigger),
        )?;

        Ok(settings)
    }

    fn soft_trigger_or(&self, base: bool) -> bool {
        match (self.soft_trigger, self.no_soft_trigger) {
            (true, _) => true,
            (_, true) => false,
            _ => base,
        }
    }
}

#[derive(clap::Args, Debug, Default)]
struct TargetArgs {
    /// Acquisition executable (default: ./estherdaq)
    #[arg(long)]
    executable: Option<PathBuf>,

    /// Working directory of the executable
    #[arg(long)]
    working_dir: Option<PathBuf>,
}

impl TargetArgs {
    fn apply(&self, settings: &mut Settings) {
        if let Some(executable) = &self.executable {
            settings.monitor.executable = executable.clone();
        }
        if let Some(dir) = &self.working_dir {
            settings.working_dir = Some(dir.clone());
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref())?;
    let _log_guard = logging::init(&settings.log)?;

    info!("Esther Trigger v{} starting...", esther_core::VERSION);

    match cli.command {
        Commands::Run { trigger, target } => {
            target.apply(&mut settings);
            settings.trigger = trigger
                .apply(&settings.trigger)
                .context("Invalid trigger parameters")?;
            run(settings).await
        }
        Commands::ShowArgs { trigger, target } => {
            target.apply(&mut settings);
            let trigger = trigger
                .apply(&settings.trigger)
                .context("Invalid trigger parameters")?;
            let command = trigger.command_line(&settings.monitor.executable)?;
            println!("{}", command);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&settings)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Run one acquisition; the exit code mirrors the child's
async fn run(settings: Settings) -> Result<ExitCode> {
    let mut launcher = SubprocessLauncher::new();
    if let Some(dir) = &settings.working_dir {
        launcher = launcher.with_working_dir(dir);
    }

    let mut monitor = ProcessMonitor::new(
        Arc::new(launcher),
        Arc::new(SystemTimeProvider),
        settings.monitor.clone(),
    );
    let printer = tokio::spawn(display::print_events(monitor.subscribe()));

    monitor
        .start_with(&settings.trigger)
        .await
        .context("Failed to start acquisition")?;

    tokio::select! {
        _ = monitor.run_until_finished() => {}
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted; the acquisition process is left running");
        }
    }

    let session = monitor.last_session().cloned();
    // Closing the subscriber channel lets the printer drain and exit
    drop(monitor);
    printer.await.context("Output printer failed")?;

    let Some(session) = session else {
        return Ok(ExitCode::FAILURE);
    };

    println!("{}", display::summary_table(&session));

    let code = session.exit_code.unwrap_or(1).clamp(0, 255) as u8;
    Ok(ExitCode::from(code))
}
