// src/main.rs - printer-host command line front end
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use marlin_host::communication::{EventBus, HostEvent, NativeSerial, SerialInterface, SerialLink};
use marlin_host::config::{self, ConfigError, HostConfig};
use marlin_host::file_manager::{FileManager, GCODE_EXTENSIONS};
use marlin_host::gcode::commands::{self, Axis, PreheatProfile};
use marlin_host::print_job::PrintJobController;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Parser)]
#[command(name = "printer-host", version, about = "Serial control host for Marlin 3D printers")]
struct Cli {
    /// TOML configuration file; defaults are used when it does not exist
    #[arg(short, long, default_value = "printer.toml")]
    config: String,
    /// Serial port identifier, overrides the configuration
    #[arg(short, long)]
    port: Option<String>,
    /// Baud rate, overrides the configuration
    #[arg(short, long)]
    baud: Option<u32>,
    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
    /// Print events as JSON lines
    #[arg(long)]
    json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List available serial ports
    Ports,
    /// Send commands and show the replies
    Send {
        #[arg(required = true)]
        commands: Vec<String>,
        /// How long to wait for replies after the last command
        #[arg(long, default_value_t = 1000)]
        wait_ms: u64,
    },
    /// Stream a G-code file to the printer
    Print { file: String },
    /// Interactive console
    Monitor,
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let cli = Cli::parse();

    // Initialize logging; stdout is reserved for printer events
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)))
        .with_writer(std::io::stderr)
        .init();

    let config = load_host_config(&cli)?;
    let interface: Arc<dyn SerialInterface> = Arc::new(NativeSerial);

    if let Command::Ports = cli.command {
        let ports = interface.available_ports();
        if ports.is_empty() {
            println!("No serial ports found");
        }
        for port in ports {
            println!("{}", port);
        }
        return Ok(());
    }

    let events = EventBus::new(config.events.capacity);
    let printer = tokio::spawn(print_events(events.subscribe(), cli.json));
    let link = Arc::new(SerialLink::with_config(interface, events.clone(), &config.serial));
    let controller = PrintJobController::new(link.clone(), events.clone(), &config.job);

    let port = resolve_port(&config, &link)?;
    let baud = config.serial.baud;

    let result = match cli.command {
        Command::Ports => Ok(()),
        Command::Send { commands, wait_ms } => run_send(&link, &port, baud, &commands, wait_ms).await,
        Command::Print { file } => run_print(&link, &controller, &port, baud, &file).await,
        Command::Monitor => run_monitor(&link, &controller, &port, baud).await,
    };

    link.disconnect().await;
    // Let the event printer drain what is already queued
    tokio::time::sleep(Duration::from_millis(50)).await;
    printer.abort();
    result
}

fn load_host_config(cli: &Cli) -> Result<HostConfig, BoxError> {
    let mut config = match config::load_config(&cli.config) {
        Ok(config) => config,
        Err(ConfigError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!("No configuration at '{}', using defaults", cli.config);
            HostConfig::default()
        }
        Err(e) => return Err(Box::new(e)),
    };
    if let Some(port) = &cli.port {
        config.serial.port = Some(port.clone());
    }
    if let Some(baud) = cli.baud {
        config.serial.baud = baud;
    }
    config.validate()?;
    Ok(config)
}

fn resolve_port(config: &HostConfig, link: &SerialLink) -> Result<String, BoxError> {
    if let Some(port) = &config.serial.port {
        return Ok(port.clone());
    }
    match link.available_ports().into_iter().next() {
        Some(port) => {
            tracing::info!("No port configured, using {}", port);
            Ok(port)
        }
        None => Err("No serial ports available; pass --port".into()),
    }
}

async fn print_events(mut rx: tokio::sync::broadcast::Receiver<HostEvent>, json: bool) {
    loop {
        match rx.recv().await {
            Ok(event) if json => match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => tracing::warn!("Failed to encode event: {}", e),
            },
            Ok(HostEvent::Log(line)) => println!("{}", line),
            Ok(HostEvent::Telemetry(sample)) => {
                println!("Hotend: {:.1} °C  Bed: {:.1} °C", sample.hotend, sample.bed)
            }
            Ok(HostEvent::Progress { percent }) => println!("Progress: {}%", percent),
            Ok(HostEvent::StateChanged { state }) => tracing::info!("Print state: {:?}", state),
            Ok(HostEvent::Connection { connected }) => tracing::debug!("Connected: {}", connected),
            Err(RecvError::Lagged(n)) => tracing::warn!("Event display fell behind, {} events dropped", n),
            Err(RecvError::Closed) => break,
        }
    }
}

fn warn_unless_gcode(path: &str) {
    if !FileManager::is_gcode_file(path) {
        tracing::warn!("'{}' does not have a G-code extension ({}), loading anyway", path, GCODE_EXTENSIONS.join(", "));
    }
}

async fn run_send(link: &SerialLink, port: &str, baud: u32, commands: &[String], wait_ms: u64) -> Result<(), BoxError> {
    link.connect(port, baud).await?;
    link.send_all(commands).await?;
    tokio::time::sleep(Duration::from_millis(wait_ms)).await;
    Ok(())
}

async fn run_print(
    link: &SerialLink,
    controller: &PrintJobController,
    port: &str,
    baud: u32,
    file: &str,
) -> Result<(), BoxError> {
    let files = FileManager::new();
    warn_unless_gcode(file);
    let lines = files.read_gcode_lines(file).await?;
    controller.load_job(&FileManager::display_name(file), lines).await?;
    link.connect(port, baud).await?;
    controller.start().await?;

    let stopper = controller.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, stopping print");
            let _ = stopper.stop().await;
        }
    });

    let state = controller.wait_until_finished().await;
    ctrl_c.abort();
    tracing::info!("Print ended in state {:?}", state);
    Ok(())
}

async fn run_monitor(
    link: &SerialLink,
    controller: &PrintJobController,
    port: &str,
    baud: u32,
) -> Result<(), BoxError> {
    link.connect(port, baud).await?;
    println!("Type G-code to send, or :help for console commands");

    let files = FileManager::new();
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = stdin.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line.strip_prefix(':') {
            Some(console) => {
                if !run_console_command(console, link, controller, &files).await {
                    break;
                }
            }
            None => {
                // Failures are already reported as events
                let _ = link.send(line).await;
            }
        }
    }
    Ok(())
}

const CONSOLE_HELP: &str = "\
:load <file>  :start  :pause  :resume  :stop
:home  :reset  :preheat pla|abs  :fan <0-255>
:jog <x|y|z> <distance> [speed]  :extrude [mm]  :retract [mm]
:ports  :status  :quit";

/// Returns false when the console should exit.
async fn run_console_command(
    input: &str,
    link: &SerialLink,
    controller: &PrintJobController,
    files: &FileManager,
) -> bool {
    let mut parts = input.split_whitespace();
    let Some(name) = parts.next() else {
        return true;
    };
    let args: Vec<&str> = parts.collect();

    // Rejected operations and link failures are already reported as events.
    match name {
        "quit" | "exit" => {
            let _ = controller.stop().await;
            return false;
        }
        "help" => println!("{}", CONSOLE_HELP),
        "load" => match args.first() {
            Some(path) => {
                warn_unless_gcode(path);
                match files.read_gcode_lines(path).await {
                    Ok(lines) => {
                        let _ = controller.load_job(&FileManager::display_name(path), lines).await;
                    }
                    Err(e) => link.events().error(e.to_string()),
                }
            }
            None => println!("usage: :load <file>"),
        },
        "start" => {
            let _ = controller.start().await;
        }
        "pause" => {
            let _ = controller.pause().await;
        }
        "resume" => {
            let _ = controller.resume().await;
        }
        "stop" => {
            let _ = controller.stop().await;
        }
        "home" => {
            let _ = link.send(&commands::home_all()).await;
        }
        "reset" => {
            let _ = link.send(&commands::reset()).await;
        }
        "preheat" => match args.first().and_then(|p| PreheatProfile::by_name(p)) {
            Some(profile) => {
                let _ = link.send_all(profile.commands()).await;
            }
            None => println!("usage: :preheat pla|abs"),
        },
        "fan" => {
            let value = args.first().and_then(|v| v.parse::<i32>().ok()).unwrap_or(0);
            let _ = link.send(&commands::fan_speed(value)).await;
        }
        "jog" => {
            let axis = args.first().and_then(|a| a.parse::<Axis>().ok());
            let distance = args.get(1).and_then(|d| d.parse::<f64>().ok());
            match (axis, distance) {
                (Some(axis), Some(distance)) => {
                    let speed = args.get(2).copied().unwrap_or("");
                    let _ = link.send_all(commands::jog(axis, distance, speed)).await;
                }
                _ => println!("usage: :jog <x|y|z> <distance> [speed]"),
            }
        }
        "extrude" => {
            let _ = link.send_all(commands::extrude(args.first().copied().unwrap_or(""))).await;
        }
        "retract" => {
            let _ = link.send_all(commands::retract(args.first().copied().unwrap_or(""))).await;
        }
        "ports" => {
            for port in link.available_ports() {
                println!("{}", port);
            }
        }
        "status" => {
            println!(
                "{:?} {}/{} lines ({}%), connected: {}",
                controller.state().await,
                controller.cursor().await,
                controller.total_lines().await,
                controller.progress().await,
                link.is_connected().await
            );
        }
        other => println!("unknown console command ':{}', try :help", other),
    }
    true
}
