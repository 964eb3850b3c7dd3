//! strike - MIDI-triggered servo dispatcher
//!
//! Note-on events from a raw MIDI device and commands typed on stdin are
//! mapped to channels and handed to the dispatcher.
//!
//! ## Environment Variables
//! - `STRIKE_CONFIG`: TOML configuration file
//! - `STRIKE_MIDI_DEVICE`: raw MIDI device (e.g. `/dev/snd/midiC1D0`)
//! - `MAX_CONCURRENT_TASKS`, `ADMISSION_POLICY`, `PWM_FREQUENCY`,
//!   `MIN_PULSE_WIDTH`, `MAX_PULSE_WIDTH`, `ANGLE_RANGE`, `ENABLE_MANUAL_INPUT`
//! - `RUST_LOG`: log filter (default: `strike=info,strike_orchestration=info,strike_actuator=info`)

mod manual;
mod midi;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use colored::*;
use strike_actuator::{ActuationSurface, SimulatedSurface, SysfsPwmSurface};
use strike_core::{AdmissionPolicy, DispatchRequest, ShutdownMode, StrikeConfig};
use strike_orchestration::{DispatchOutcome, Dispatcher};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use manual::ManualCommand;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SurfaceKind {
    /// In-memory surface, logs writes
    Simulated,
    /// Linux sysfs PWM chip
    Sysfs,
}

#[derive(Parser)]
#[command(name = "strike")]
#[command(author = "Strike Contributors")]
#[command(version = "2026.10.1")]
#[command(about = "MIDI-triggered servo dispatcher", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, value_name = "FILE", env = "STRIKE_CONFIG")]
    config: Option<PathBuf>,

    /// Raw MIDI device to read note-on events from
    #[arg(short, long, value_name = "DEVICE", env = "STRIKE_MIDI_DEVICE")]
    midi_device: Option<PathBuf>,

    /// Actuation surface
    #[arg(long, value_enum, default_value_t = SurfaceKind::Simulated)]
    surface: SurfaceKind,

    /// PWM chip used by the sysfs surface
    #[arg(long, default_value = "/sys/class/pwm/pwmchip0", env = "STRIKE_PWM_CHIP")]
    pwm_chip: PathBuf,

    /// Admission policy (global-busy, permit-pool, single-slot)
    #[arg(long)]
    policy: Option<AdmissionPolicy>,

    /// Concurrency bound
    #[arg(long)]
    max_concurrent: Option<usize>,

    /// Shutdown mode (drain, abort)
    #[arg(long)]
    shutdown: Option<ShutdownMode>,

    /// Do not read commands from stdin
    #[arg(long, default_value_t = false)]
    no_manual_input: bool,

    /// Print the effective configuration and exit
    #[arg(long, default_value_t = false)]
    print_config: bool,
}

impl Args {
    fn apply(&self, config: &mut StrikeConfig) {
        if let Some(policy) = self.policy {
            config.policy = policy;
        }
        if let Some(max) = self.max_concurrent {
            config.max_concurrent_tasks = max;
        }
        if let Some(mode) = self.shutdown {
            config.shutdown = mode;
        }
        if self.no_manual_input {
            config.enable_manual_input = false;
        }
    }
}

/// Everything the event sources feed into the main loop
#[derive(Debug)]
pub(crate) enum Input {
    Note { note: u8, velocity: u8 },
    Command(ManualCommand),
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "strike=info,strike_orchestration=info,strike_actuator=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{:#}", err);
            eprintln!("{} {:#}", "error:".red().bold(), err);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let mut config =
        StrikeConfig::load(args.config.as_deref()).context("failed to load configuration")?;
    args.apply(&mut config);
    config.validate().context("invalid configuration")?;

    if args.print_config {
        print!("{}", config.to_toml_string()?);
        return Ok(());
    }

    let surface = open_surface(&args, &config)?;
    let dispatcher = Dispatcher::new(&config, surface).context("failed to start dispatcher")?;

    let (tx, mut rx) = mpsc::channel::<Input>(64);
    if let Some(device) = &args.midi_device {
        let file = midi::open(device).await?;
        let tx = tx.clone();
        tokio::spawn(async move {
            if let Err(err) = midi::listen(file, tx).await {
                error!("{:#}", err);
            }
        });
        info!(device = %device.display(), "listening for MIDI notes");
    }
    if config.enable_manual_input {
        manual::spawn_reader(tx.clone()).context("failed to start manual input")?;
        manual::print_help();
    }
    drop(tx);

    let signal = shutdown_signal();
    tokio::pin!(signal);
    let mut sources_open = true;

    loop {
        tokio::select! {
            input = rx.recv(), if sources_open => match input {
                Some(Input::Note { note, velocity }) => {
                    dispatcher.dispatch(DispatchRequest::note(note, velocity));
                }
                Some(Input::Command(command)) => {
                    if !handle_command(&dispatcher, command) {
                        info!("quit requested");
                        break;
                    }
                }
                None => {
                    info!("no event source left; waiting for a shutdown signal");
                    sources_open = false;
                }
            },
            _ = &mut signal => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    let stats = dispatcher
        .shutdown(config.shutdown)
        .await
        .context("shutdown failed")?;
    info!(stats = %serde_json::to_string(&stats)?, "final statistics");
    Ok(())
}

fn open_surface(args: &Args, config: &StrikeConfig) -> Result<Arc<dyn ActuationSurface>> {
    let surface: Arc<dyn ActuationSurface> = match args.surface {
        SurfaceKind::Simulated => Arc::new(SimulatedSurface::new(config.channels)),
        SurfaceKind::Sysfs => Arc::new(
            SysfsPwmSurface::open(&args.pwm_chip, config.channels, config.pwm.frequency_hz)
                .with_context(|| format!("cannot open PWM chip {}", args.pwm_chip.display()))?,
        ),
    };
    info!(surface = surface.name(), channels = surface.channel_count(), "surface ready");
    Ok(surface)
}

/// Returns `false` when the operator asked to quit
fn handle_command(dispatcher: &Dispatcher, command: ManualCommand) -> bool {
    match command {
        ManualCommand::Channel(channel) => {
            let outcome = dispatcher.dispatch(DispatchRequest::manual(channel));
            match outcome {
                DispatchOutcome::Accepted => {
                    println!("{} channel {}", "Triggered".green().bold(), channel)
                }
                other => println!("{} channel {}: {}", "Rejected".yellow().bold(), channel, other),
            }
        }
        ManualCommand::ToggleSequence => {
            let alternate = dispatcher.toggle_sequence_mode();
            let name = if alternate { "alternate" } else { "normal" };
            println!("{} {} sequence", "Using".green().bold(), name.cyan());
        }
        ManualCommand::Calibrate => match dispatcher.spawn_calibration() {
            Ok(()) => println!("{}", "Calibrating every channel...".green().bold()),
            Err(err) => println!("{} {}", "Rejected".yellow().bold(), err),
        },
        ManualCommand::Stats => match serde_json::to_string_pretty(&dispatcher.stats()) {
            Ok(json) => println!("{}", json),
            Err(err) => warn!(error = %err, "cannot render statistics"),
        },
        ManualCommand::Help => manual::print_help(),
        ManualCommand::Quit => return false,
    }
    true
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let args = Args::parse_from([
            "strike",
            "--policy",
            "single-slot",
            "--max-concurrent",
            "5",
            "--shutdown",
            "abort",
            "--no-manual-input",
        ]);
        let mut config = StrikeConfig::default();
        args.apply(&mut config);

        assert_eq!(config.policy, AdmissionPolicy::SingleSlot);
        assert_eq!(config.max_concurrent_tasks, 5);
        assert_eq!(config.shutdown, ShutdownMode::Abort);
        assert!(!config.enable_manual_input);
    }

    #[test]
    fn test_defaults_leave_config_alone() {
        let args = Args::parse_from(["strike"]);
        let mut config = StrikeConfig::default();
        args.apply(&mut config);
        assert_eq!(config, StrikeConfig::default());
        assert_eq!(args.surface, SurfaceKind::Simulated);
    }

    #[test]
    fn test_bad_policy_is_rejected() {
        assert!(Args::try_parse_from(["strike", "--policy", "fifo"]).is_err());
    }

    #[tokio::test]
    async fn test_commands_drive_dispatcher() {
        let mut config = StrikeConfig::default();
        config.motion.hold_ms = 1;
        let dispatcher = Dispatcher::new(&config, Arc::new(SimulatedSurface::new(16))).unwrap();

        assert!(handle_command(&dispatcher, ManualCommand::Channel(2)));
        assert!(handle_command(&dispatcher, ManualCommand::ToggleSequence));
        assert!(dispatcher.mode().use_alternate_sequence());
        assert!(handle_command(&dispatcher, ManualCommand::Stats));
        assert!(!handle_command(&dispatcher, ManualCommand::Quit));

        let stats = dispatcher.shutdown(ShutdownMode::Drain).await.unwrap();
        assert_eq!(stats.accepted, 1);
    }
}
