// SPDX-License-Identifier: GPL-3.0-only
/*
 * Copyright (c) 2025 Code Construct
 */

//! Capture and analyse device profiles.
//!
//! Capture mode runs the read-only sweep against a drive behind an
//! enclosure slot and writes the profile JSON. Analysis modes operate
//! on saved profiles: summary, replay verification, comparison, and a
//! hardware-free mock capture.
//!
//! Exit codes: 0 ok, 1 usage, 2 device error, 3 integrity error.

use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use log::{debug, LevelFilter};
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};

use nvme_mi_host::nvme_mi::response::from_hex;
use nvme_mi_host::profiler::{CaptureConfig, DeviceProfile, DeviceProfiler};
use nvme_mi_host::transport::mock::MockTransport;
use nvme_mi_host::transport::Transport;
use nvme_mi_host::{Error, ErrorKind};

/// Capture or analyse NVMe-MI device profiles.
#[derive(Parser, Debug)]
#[command(name = "mi-profile", version)]
struct Cli {
    /// Serial device of the enclosure CLI (capture mode).
    #[arg(long)]
    port: Option<String>,

    /// Target slot (1-8).
    #[arg(long, default_value_t = 1)]
    slot: u8,

    /// Destination endpoint id.
    #[arg(long, default_value_t = 0)]
    eid: u8,

    /// Output path for the captured profile.
    #[arg(long, default_value = "device_profile.json")]
    output: PathBuf,

    /// Skip the chunked VPD read.
    #[arg(long)]
    skip_vpd: bool,

    /// Skip tunneled Admin commands.
    #[arg(long)]
    skip_admin: bool,

    /// Per-command timeout in seconds.
    #[arg(long, default_value_t = 3.0)]
    timeout: f64,

    /// Delay between commands in milliseconds.
    #[arg(long, default_value_t = 50)]
    delay: u64,

    /// Load an existing profile instead of capturing.
    #[arg(long)]
    load: Option<PathBuf>,

    /// Print a summary of the loaded profile.
    #[arg(long)]
    summary: bool,

    /// Replay the loaded profile against the mock and verify responses.
    #[arg(long)]
    verify: bool,

    /// Compare the loaded profile against another.
    #[arg(long)]
    compare: Option<PathBuf>,

    /// Capture a profile from the built-in mock (no hardware).
    #[arg(long)]
    mock_test: bool,

    /// Verbose logging.
    #[arg(short, long)]
    verbose: bool,
}

/// Packet transport over the enclosure's line-oriented CLI: each packet
/// goes out as `packet <eid> <hex bytes>`, responses come back as one
/// line of hex bytes. The serial device must already be configured; the
/// physical driver is not this tool's concern.
struct EnclosureCliTransport {
    reader: BufReader<File>,
    writer: File,
    fragment_delay: Duration,
}

impl EnclosureCliTransport {
    fn open(path: &str, delay: Duration) -> Result<Self, Error> {
        let writer = File::options().read(true).write(true).open(path)?;
        let reader = BufReader::new(writer.try_clone()?);
        Ok(Self {
            reader,
            writer,
            fragment_delay: delay,
        })
    }
}

impl Transport for EnclosureCliTransport {
    fn send_packet(&mut self, packet: &[u8]) -> Result<(), Error> {
        if packet.len() < 6 {
            return Err(Error::ShortPacket { len: packet.len() });
        }
        let dest_eid = packet[5];
        let hex: Vec<String> = packet.iter().map(|b| format!("{b:02x}")).collect();
        let line = format!("packet {dest_eid} {}\n", hex.join(" "));
        debug!("-> {}", line.trim_end());
        self.writer.write_all(line.as_bytes())?;
        self.writer.flush()?;
        Ok(())
    }

    fn receive_packet(&mut self, timeout: Duration) -> Result<Vec<u8>, Error> {
        let mut line = String::new();
        let read = self.reader.read_line(&mut line)?;
        if read == 0 {
            return Err(Error::Timeout(timeout));
        }
        debug!("<- {}", line.trim_end());
        from_hex(&line).ok_or_else(|| Error::Transport(format!("unparseable response: {line}")))
    }

    fn inter_packet_delay(&self) -> Duration {
        self.fragment_delay
    }
}

fn capture_config(cli: &Cli) -> CaptureConfig {
    CaptureConfig {
        capture_vpd: !cli.skip_vpd,
        capture_admin: !cli.skip_admin,
        command_delay: Duration::from_millis(cli.delay),
        timeout: Duration::from_secs_f64(cli.timeout),
        ..CaptureConfig::default()
    }
}

fn capture<T: Transport>(
    transport: T,
    cli: &Cli,
    name: &str,
) -> Result<(), Error> {
    let mut profiler = DeviceProfiler::new(transport, cli.eid, capture_config(cli));
    let profile = profiler.capture_full_profile(name)?;
    profile.save(&cli.output)?;
    println!("{}", profile.summary());
    println!("Profile written to {}", cli.output.display());
    Ok(())
}

fn analyse(cli: &Cli, path: &PathBuf) -> Result<(), Error> {
    let profile = DeviceProfile::load(path)?;

    if let Some(other_path) = &cli.compare {
        let other = DeviceProfile::load(other_path)?;
        print!("{}", profile.compare(&other));
        return Ok(());
    }

    if cli.verify || cli.mock_test {
        let report = profile.verify()?;
        println!(
            "Replayed {} commands: {} passed, {} failed",
            report.passed + report.failed.len(),
            report.passed,
            report.failed.len()
        );
        for fingerprint in &report.failed {
            println!("  FAILED {fingerprint}");
        }
        if !report.ok() {
            return Err(Error::Transport("profile replay mismatch".to_string()));
        }
        return Ok(());
    }

    // Default analysis mode.
    print!("{}", profile.summary());
    if cli.verbose {
        for command in profile.all_commands() {
            println!(
                "  {} {:>8.2} ms  {} -> {} bytes",
                command.fingerprint(),
                command.latency_ms,
                command.request_hex.len() / 2,
                command.response_hex.len() / 2,
            );
        }
    }
    Ok(())
}

fn run(cli: &Cli) -> Result<(), Error> {
    if let Some(path) = &cli.load {
        return analyse(cli, path);
    }

    if cli.mock_test {
        // Hardware-free smoke test: capture from the mock, then replay.
        let mut transport = MockTransport::new();
        transport.set_temperature(40);
        capture(transport, cli, "mock-device")?;
        let profile = DeviceProfile::load(&cli.output)?;
        let report = profile.verify()?;
        println!(
            "Mock replay: {} passed, {} failed",
            report.passed,
            report.failed.len()
        );
        if !report.ok() {
            return Err(Error::Transport("mock replay mismatch".to_string()));
        }
        return Ok(());
    }

    let Some(port) = &cli.port else {
        return Err(Error::Usage(
            "--port is required for capture (or use --load / --mock-test)".to_string(),
        ));
    };
    if !(1..=8).contains(&cli.slot) {
        return Err(Error::Usage(format!("slot must be 1-8, got {}", cli.slot)));
    }

    let transport =
        EnclosureCliTransport::open(port, nvme_mi_host::mctp_smbus::INTER_FRAGMENT_DELAY)?;
    let name = format!("slot{}-{}", cli.slot, chrono::Utc::now().format("%Y%m%d"));
    capture(transport, cli, &name)
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return ExitCode::from(1);
        }
    };

    let _ = TermLogger::init(
        if cli.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        },
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    );

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            match err.kind() {
                ErrorKind::Usage => ExitCode::from(1),
                ErrorKind::Integrity => ExitCode::from(3),
                _ => ExitCode::from(2),
            }
        }
    }
}
