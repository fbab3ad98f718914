//! unify-status CLI: publishes Unifying receiver device status.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use unify_status_core::config::{self, Config};
use unify_status_core::mqtt::MqttSink;
use unify_status_core::session::{SessionControl, SessionOptions, Supervisor};
use unify_status_core::sink::{JsonLinesSink, LogSink};
use unify_status_core::transport::{ChannelProvider, HidapiProvider};

#[derive(Parser)]
#[command(
    name = "unify-status",
    version,
    about = "Publish Logitech Unifying device connection status"
)]
struct Cli {
    /// Config file (defaults to the per-user config directory).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Append logs to this file instead of stderr.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the receiver and publish status changes until interrupted.
    Run {
        /// Where publications go.
        #[arg(long, value_enum, default_value_t = Output::Mqtt)]
        output: Output,
    },
    /// Print the OS paths of both receiver collections.
    Locate,
    /// Print the effective config file path.
    ConfigPath,
}

#[derive(Clone, Copy, ValueEnum)]
enum Output {
    /// Publish to the broker named in the config file.
    Mqtt,
    /// One JSON `{"topic", "payload"}` object per line on stdout.
    Json,
    /// Log publications only.
    Log,
}

fn init_logging(log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file '{}'", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

/// Console counterpart of a tray menu: `devices`, `restart`, `quit`.
fn spawn_console(control: SessionControl) -> Result<()> {
    thread::Builder::new()
        .name("console".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                match line.trim() {
                    "devices" => {
                        for (i, dev) in control.devices().iter().enumerate() {
                            eprintln!("dev{i}: {} - {}", dev.display_name(i), dev.status);
                        }
                    }
                    "restart" => control.restart(),
                    "quit" => {
                        control.shutdown();
                        break;
                    }
                    "" => {}
                    other => eprintln!("unknown command '{other}' (devices, restart, quit)"),
                }
            }
        })
        .context("failed to spawn console thread")?;
    Ok(())
}

fn run(config: &Config, output: Output) -> Result<()> {
    // Connect before spawning so a bad broker address fails the command.
    let mqtt = match output {
        Output::Mqtt => Some(
            MqttSink::connect(&config.mqtt, &config.node_id)
                .context("failed to start MQTT client")?,
        ),
        Output::Json | Output::Log => None,
    };

    let control = SessionControl::new();
    {
        let control = control.clone();
        ctrlc::set_handler(move || control.shutdown())
            .context("failed to install Ctrl-C handler")?;
    }

    let options = SessionOptions::from(config);
    let worker_control = control.clone();
    let worker = thread::Builder::new()
        .name("receiver".into())
        .spawn(move || -> Result<()> {
            let provider = HidapiProvider::new()?;
            match (output, mqtt) {
                (_, Some(sink)) => {
                    Supervisor::new(provider, sink, options, worker_control).run();
                }
                (Output::Json, None) => {
                    let sink = JsonLinesSink::new(std::io::stdout());
                    Supervisor::new(provider, sink, options, worker_control).run();
                }
                (_, None) => {
                    Supervisor::new(provider, LogSink, options, worker_control).run();
                }
            }
            Ok(())
        })
        .context("failed to spawn receiver thread")?;

    spawn_console(control)?;

    let result = worker
        .join()
        .map_err(|_| anyhow::anyhow!("receiver thread panicked"))?;
    match &result {
        Ok(()) => info!("Receiver thread exited"),
        Err(e) => error!(error = %e, "Receiver thread failed"),
    }
    result
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_file.as_deref())?;

    let config_path = match cli.config {
        Some(path) => path,
        None => config::config_path()?,
    };

    match cli.command {
        Commands::Run { output } => {
            let config = config::load_config(&config_path)?;
            info!(path = %config_path.display(), "Loaded config");
            run(&config, output)?;
        }
        Commands::Locate => {
            let config = config::load_config(&config_path)?;
            let mut provider = HidapiProvider::new()?;
            for (label, endpoint) in [
                ("primary", config.receiver.primary()),
                ("responder", config.receiver.responder()),
            ] {
                match provider.find_path(&endpoint) {
                    Some(path) => println!("{label}: {path}"),
                    None => println!(
                        "{label}: not found (VID: 0x{:04X}, PID: 0x{:04X}, interface {}, usage 0x{:04X}:0x{:04X})",
                        endpoint.vendor_id,
                        endpoint.product_id,
                        endpoint.interface,
                        endpoint.usage_page,
                        endpoint.usage
                    ),
                }
            }
        }
        Commands::ConfigPath => {
            println!("{}", config_path.display());
        }
    }

    Ok(())
}
