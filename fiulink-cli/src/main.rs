//! fiulink CLI - configure and actuate fault injection units over UART.
//!
//! ## Features
//!
//! - Configure channels and run synchronous, triggered or control output
//! - Apply TOML channel profiles, or simulate them without hardware
//! - Encode frames offline for inspection
//! - Serial port discovery and shell completion generation

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use fiulink::{ChannelMask, ConfigParams, MAX_CHANNEL, OutputFault, PeripheralFault, Request, WorkMode};
use log::debug;
use std::env;
use std::path::PathBuf;

mod commands;
mod config;
mod profile;

use config::Config;

/// fiulink - drive a fault injection unit over a serial link.
///
/// Environment variables:
///   FIULINK_PORT        - Default serial port
///   FIULINK_BAUD        - Default baud rate (default: 115200)
///   FIULINK_TIMEOUT_MS  - Acknowledgment timeout in milliseconds (default: 100)
#[derive(Parser)]
#[command(name = "fiulink")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "FIULINK_PORT")]
    port: Option<String>,

    /// Baud rate.
    #[arg(short, long, global = true, env = "FIULINK_BAUD")]
    baud: Option<u32>,

    /// Acknowledgment timeout in milliseconds.
    #[arg(long, global = true, env = "FIULINK_TIMEOUT_MS", value_name = "MS")]
    timeout_ms: Option<u64>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    #[command(flatten)]
    Op(Operation),

    /// Run every step of a channel profile against the device.
    Apply {
        /// Path to the profile TOML file.
        profile: PathBuf,

        /// Output results as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Run a channel profile against the built-in simulated device.
    Simulate {
        /// Path to the profile TOML file.
        profile: PathBuf,

        /// Make the simulated device misbehave.
        #[arg(long, value_parser = parse_fault_injection)]
        inject: Option<PeripheralFault>,

        /// Output results as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Print the frame for a command without sending it.
    Encode {
        #[command(subcommand)]
        op: Operation,

        /// Output the frame as JSON to stdout.
        #[arg(long, global = true)]
        json: bool,
    },

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions.
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Single FIU commands.
#[derive(Subcommand, Clone, Debug)]
enum Operation {
    /// Configure one channel (SetConfig).
    Config(ConfigArgs),

    /// Start synchronous output (SynchronousOp).
    Sync(MaskArgs),

    /// Fire triggered output (TriggerOp).
    Trigger(TriggerArgs),

    /// Apply control output (ControlOp).
    Control(MaskArgs),
}

#[derive(Args, Clone, Debug)]
struct ConfigArgs {
    /// Channel id (0-63).
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=i64::from(MAX_CHANNEL)))]
    channel: u8,

    /// Output fault code (0x00-0x0A).
    #[arg(long, value_parser = parse_fault, default_value = "0")]
    fault: OutputFault,

    /// Work mode: stop, control, sync, trigger (or 0-3).
    #[arg(long, value_parser = parse_mode)]
    mode: WorkMode,

    /// High phase duration (sync and trigger modes).
    #[arg(long, default_value_t = 0)]
    high_time: u16,

    /// Low phase duration (sync and trigger modes).
    #[arg(long, default_value_t = 0)]
    low_time: u16,

    /// Pulse count (sync mode).
    #[arg(long, default_value_t = 0)]
    cycles: u8,
}

#[derive(Args, Clone, Debug)]
struct MaskArgs {
    /// Channels to act on, e.g. 1,2,5-7 (default: channels configured in this run).
    #[arg(long, value_parser = parse_channels)]
    channels: Option<ChannelMask>,
}

#[derive(Args, Clone, Debug)]
struct TriggerArgs {
    /// Channels to act on, e.g. 1,2,5-7.
    #[arg(long, value_parser = parse_channels)]
    channels: ChannelMask,
}

impl Operation {
    fn to_request(&self) -> Request {
        match self {
            Self::Config(args) => Request::SetConfig(
                ConfigParams::new(args.channel, args.fault, args.mode)
                    .with_timing(args.high_time, args.low_time)
                    .with_cycles(args.cycles),
            ),
            Self::Sync(args) => Request::Synchronous(args.channels),
            Self::Trigger(args) => Request::Trigger(Some(args.channels)),
            Self::Control(args) => Request::Control(args.channels),
        }
    }
}

/// Parse a number in decimal or `0x` hexadecimal.
fn parse_u8(s: &str) -> Result<u8, String> {
    let s = s.trim();
    let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u8::from_str_radix(hex, 16)
    } else {
        s.parse()
    };
    parsed.map_err(|e| format!("Invalid number '{s}': {e}"))
}

/// Parse an output fault code.
fn parse_fault(s: &str) -> Result<OutputFault, String> {
    OutputFault::try_from(parse_u8(s)?).map_err(|e| e.to_string())
}

/// Parse a work mode by name or number.
fn parse_mode(s: &str) -> Result<WorkMode, String> {
    match s.to_ascii_lowercase().as_str() {
        "stop" => Ok(WorkMode::Stop),
        "control" => Ok(WorkMode::Control),
        "sync" | "synchronous" => Ok(WorkMode::Synchronous),
        "trigger" | "triggered" => Ok(WorkMode::Triggered),
        other => WorkMode::try_from(parse_u8(other)?).map_err(|e| e.to_string()),
    }
}

/// Parse a channel list such as `1,2,5-7`.
fn parse_channels(s: &str) -> Result<ChannelMask, String> {
    let mut mask = ChannelMask::EMPTY;
    for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (first, last) = match part.split_once('-') {
            Some((a, b)) => (parse_u8(a)?, parse_u8(b)?),
            None => {
                let ch = parse_u8(part)?;
                (ch, ch)
            },
        };
        if first > last {
            return Err(format!("Invalid channel range '{part}'"));
        }
        if last > MAX_CHANNEL {
            return Err(format!("Channel {last} out of range 0-{MAX_CHANNEL}"));
        }
        for ch in first..=last {
            mask.set(ch);
        }
    }
    if mask.is_empty() {
        return Err("No channels given".to_string());
    }
    Ok(mask)
}

/// Parse a simulated device fault.
fn parse_fault_injection(s: &str) -> Result<PeripheralFault, String> {
    match s {
        "silent" => Ok(PeripheralFault::Silent),
        "wrong-command-id" => Ok(PeripheralFault::WrongCommandId),
        "bad-checksum" => Ok(PeripheralFault::BadChecksum),
        other => Err(format!(
            "Unknown fault '{other}' (expected silent, wrong-command-id or bad-checksum)"
        )),
    }
}

fn main() {
    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "fiulink v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    if let Err(e) = run(&cli) {
        eprintln!("{} {e:#}", style("Error:").red().bold());
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = match &cli.config_path {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    };
    let settings = config.resolve(cli.port.clone(), cli.baud, cli.timeout_ms);

    match &cli.command {
        Commands::Op(op) => {
            commands::link::cmd_run(cli, &settings, &[op.to_request()], false)?;
        },
        Commands::Apply { profile, json } => {
            let profile = profile::Profile::load(profile)?;
            commands::link::cmd_run(cli, &settings, &profile.requests(), *json)?;
        },
        Commands::Simulate {
            profile,
            inject,
            json,
        } => {
            let profile = profile::Profile::load(profile)?;
            commands::link::cmd_simulate(cli, &settings, &profile.requests(), *inject, *json)?;
        },
        Commands::Encode { op, json } => {
            commands::encode::cmd_encode(&op.to_request(), *json)?;
        },
        Commands::ListPorts { json } => {
            commands::ports::cmd_list_ports(*json);
        },
        Commands::Completions { shell } => {
            commands::completions::cmd_completions(*shell);
        },
    }

    Ok(())
}

#[cfg(test)]
mod cli_tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_command_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_parse_config() {
        let cli = Cli::try_parse_from([
            "fiulink", "-p", "/dev/ttyUSB0", "config", "--channel", "3", "--fault", "0x01",
            "--mode", "sync", "--high-time", "100", "--low-time", "200", "--cycles", "5",
        ])
        .unwrap();
        assert_eq!(cli.port.as_deref(), Some("/dev/ttyUSB0"));
        let Commands::Op(op) = cli.command else {
            panic!("expected an operation");
        };
        let Request::SetConfig(params) = op.to_request() else {
            panic!("expected set-config");
        };
        assert_eq!(params.channel, 3);
        assert_eq!(params.fault, OutputFault::LoadNoFault);
        assert_eq!(params.mode, WorkMode::Synchronous);
        assert_eq!((params.high_time, params.low_time, params.cycles), (100, 200, 5));
    }

    #[test]
    fn test_cli_rejects_channel_out_of_range() {
        let result =
            Cli::try_parse_from(["fiulink", "config", "--channel", "64", "--mode", "stop"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_sync_without_channels() {
        let cli = Cli::try_parse_from(["fiulink", "sync"]).unwrap();
        let Commands::Op(op) = cli.command else {
            panic!("expected an operation");
        };
        assert_eq!(op.to_request(), Request::Synchronous(None));
    }

    #[test]
    fn test_cli_trigger_requires_channels() {
        assert!(Cli::try_parse_from(["fiulink", "trigger"]).is_err());
        assert!(Cli::try_parse_from(["fiulink", "trigger", "--channels", "1"]).is_ok());
    }

    #[test]
    fn test_cli_global_options() {
        let cli = Cli::try_parse_from([
            "fiulink",
            "list-ports",
            "--baud",
            "9600",
            "--timeout-ms",
            "250",
            "-vv",
        ])
        .unwrap();
        assert_eq!(cli.baud, Some(9600));
        assert_eq!(cli.timeout_ms, Some(250));
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn test_cli_encode_json_after_subcommand() {
        let cli =
            Cli::try_parse_from(["fiulink", "encode", "control", "--channels", "0", "--json"])
                .unwrap();
        assert!(matches!(cli.command, Commands::Encode { json: true, .. }));
    }

    #[test]
    fn test_parse_channels() {
        assert_eq!(parse_channels("1,3").unwrap(), ChannelMask::from_bits(0b1010));
        assert_eq!(parse_channels("4-6").unwrap(), ChannelMask::from_bits(0b111_0000));
        assert_eq!(parse_channels(" 63 ").unwrap(), ChannelMask::from_bits(1 << 63));
        assert!(parse_channels("64").is_err());
        assert!(parse_channels("5-2").is_err());
        assert!(parse_channels("").is_err());
        assert!(parse_channels("x").is_err());
    }

    #[test]
    fn test_parse_mode_and_fault() {
        assert_eq!(parse_mode("Trigger").unwrap(), WorkMode::Triggered);
        assert_eq!(parse_mode("1").unwrap(), WorkMode::Control);
        assert!(parse_mode("4").is_err());
        assert_eq!(parse_fault("0x0A").unwrap(), OutputFault::LinShortToGround);
        assert_eq!(parse_fault("5").unwrap(), OutputFault::LoadShortToGround);
        assert!(parse_fault("11").is_err());
    }

    #[test]
    fn test_parse_fault_injection() {
        assert_eq!(parse_fault_injection("silent").unwrap(), PeripheralFault::Silent);
        assert!(parse_fault_injection("loud").is_err());
    }
}
