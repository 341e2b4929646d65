//! Commands that talk to a device: single operations, `apply` and
//! `simulate`.

use anyhow::{Context, Result, anyhow};
use console::style;
use fiulink::{
    CommandLink, Peripheral, PeripheralFault, Request, SerialConfig, SerialSession, SimulatedLink,
};
use log::info;
use serde::Serialize;

use crate::Cli;
use crate::config::Settings;

/// Space-separated uppercase hex.
pub(crate) fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Result of one executed request.
#[derive(Debug, Serialize)]
pub(crate) struct StepReport {
    command: &'static str,
    request: String,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Run `requests` in order on `link`, stopping at the first failure.
///
/// Returns the reports of every attempted step and whether all succeeded.
pub(crate) fn run_steps(
    link: &mut dyn CommandLink,
    requests: &[Request],
    quiet: bool,
) -> (Vec<StepReport>, bool) {
    let mut reports = Vec::with_capacity(requests.len());

    for request in requests {
        let result = link.execute(request);
        let report = StepReport {
            command: request.command().name(),
            request: request.to_string(),
            success: result.is_ok(),
            payload: result.as_ref().ok().map(|p| hex(p)),
            error: result.as_ref().err().map(ToString::to_string),
        };

        if !quiet {
            match &result {
                Ok(_) => eprintln!("{} {request}", style("✓").green()),
                Err(e) => eprintln!("{} {request}: {e}", style("✗").red()),
            }
        }
        reports.push(report);
        if result.is_err() {
            return (reports, false);
        }
    }

    (reports, true)
}

fn print_reports(reports: &[StepReport], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(reports)?);
    } else {
        for report in reports.iter().filter(|r| r.success) {
            println!(
                "{} {}",
                report.command,
                report.payload.as_deref().unwrap_or_default()
            );
        }
    }
    Ok(())
}

fn finish(reports: &[StepReport], all_ok: bool) -> Result<()> {
    if all_ok {
        return Ok(());
    }
    let failed = reports
        .last()
        .map_or("unknown step", |r| r.request.as_str());
    Err(anyhow!("{failed} failed"))
}

/// Open the configured (or auto-detected) port and run `requests` on it.
pub(crate) fn cmd_run(cli: &Cli, settings: &Settings, requests: &[Request], json: bool) -> Result<()> {
    let port = match &settings.port {
        Some(port) => port.clone(),
        None => {
            fiulink::auto_detect_port()
                .context("No serial port given and none detected; use --port")?
                .name
        },
    };

    if !cli.quiet {
        eprintln!(
            "{} Using {} @ {} baud",
            style("🔌").cyan(),
            style(&port).cyan(),
            settings.baud
        );
    }

    let mut session = SerialSession::open(&SerialConfig::new(&port, settings.baud), settings.link)
        .with_context(|| format!("Failed to open {port}"))?;
    let (reports, all_ok) = run_steps(&mut session, requests, cli.quiet);
    session.close();

    print_reports(&reports, json)?;
    finish(&reports, all_ok)
}

/// Run `requests` against the simulated device.
pub(crate) fn cmd_simulate(
    cli: &Cli,
    settings: &Settings,
    requests: &[Request],
    inject: Option<PeripheralFault>,
    json: bool,
) -> Result<()> {
    let peripheral = match inject {
        Some(fault) => {
            info!("Simulated device will misbehave: {fault:?}");
            Peripheral::with_fault(fault)
        },
        None => Peripheral::new(),
    };
    let mut link = SimulatedLink::with_config(peripheral, settings.link)?;

    let (reports, all_ok) = run_steps(&mut link, requests, cli.quiet);

    if json {
        let exchanges: Vec<serde_json::Value> = link
            .exchanges()
            .iter()
            .map(|x| {
                serde_json::json!({
                    "tx": x.sent.as_ref().map(|b| hex(b)),
                    "rx": x.reply.as_ref().map(|b| hex(b)),
                })
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "steps": reports,
                "exchanges": exchanges,
                "tracked": link.tracked_channels().bits(),
            }))?
        );
    } else {
        for exchange in link.exchanges() {
            if let Some(tx) = &exchange.sent {
                println!("TX {}", hex(tx));
            }
            match &exchange.reply {
                Some(rx) => println!("RX {}", hex(rx)),
                None => println!("RX -"),
            }
        }
        if !cli.quiet {
            eprintln!(
                "{} Tracked channels: {}",
                style("ℹ").blue(),
                link.tracked_channels()
            );
        }
    }

    finish(&reports, all_ok)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fiulink::{ChannelMask, ConfigParams, OutputFault, WorkMode};

    #[test]
    fn test_hex() {
        assert_eq!(hex(&[0x5A, 0x01, 0xFF]), "5A 01 FF");
        assert_eq!(hex(&[]), "");
    }

    #[test]
    fn test_run_steps_stops_at_first_failure() {
        let mut link = SimulatedLink::new(Peripheral::new()).unwrap();
        let requests = [
            Request::SetConfig(ConfigParams::new(1, OutputFault::LoadNoFault, WorkMode::Control)),
            Request::Trigger(None),
            Request::Control(None),
        ];

        let (reports, all_ok) = run_steps(&mut link, &requests, true);
        assert!(!all_ok);
        assert_eq!(reports.len(), 2);
        assert!(reports[0].success);
        assert_eq!(reports[0].command, "set-config");
        assert!(reports[1].error.as_deref().unwrap().contains("Invalid parameters"));
        assert!(finish(&reports, all_ok).is_err());
    }

    #[test]
    fn test_run_steps_reports_payloads() {
        let mut link = SimulatedLink::new(Peripheral::new()).unwrap();
        let (reports, all_ok) = run_steps(
            &mut link,
            &[Request::Control(Some(ChannelMask::from_bits(0x80)))],
            true,
        );
        assert!(all_ok);
        assert_eq!(reports[0].payload.as_deref(), Some("80 00 00 00 00 00 00 00"));
    }
}
