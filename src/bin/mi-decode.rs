// SPDX-License-Identifier: GPL-3.0-only
/*
 * Copyright (c) 2025 Code Construct
 */

//! Decode captured NVMe-MI response bytes from the command line.
//!
//! Accepts either a complete SMBus/MCTP frame (integrity-checked before
//! decoding) or a bare response message payload.
//!
//! Exit codes: 0 decoded, 2 decode failure, 3 checksum failure.

use std::process::ExitCode;

use clap::Parser;
use log::LevelFilter;
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};

use nvme_mi_host::mctp_smbus::frame;
use nvme_mi_host::mctp_smbus::MCTP_SMBUS_COMMAND_CODE;
use nvme_mi_host::nvme_mi::decode::decode_response;
use nvme_mi_host::nvme_mi::registry::DecoderRegistry;
use nvme_mi_host::nvme_mi::response::from_hex;
use nvme_mi_host::ErrorKind;

fn parse_u8(s: &str) -> Result<u8, String> {
    parse_u32(s).and_then(|v| u8::try_from(v).map_err(|_| format!("{s} out of range")))
}

fn parse_u16(s: &str) -> Result<u16, String> {
    parse_u32(s).and_then(|v| u16::try_from(v).map_err(|_| format!("{s} out of range")))
}

fn parse_u32(s: &str) -> Result<u32, String> {
    let (digits, radix) = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => (hex, 16),
        None => (s, 10),
    };
    u32::from_str_radix(digits, radix).map_err(|e| format!("{s}: {e}"))
}

/// Decode NVMe-MI response bytes.
#[derive(Parser, Debug)]
#[command(name = "mi-decode", version)]
struct Cli {
    /// Expected opcode of the response.
    #[arg(long, value_parser = parse_u8)]
    opcode: u8,

    /// Vendor id steering decoder resolution.
    #[arg(long, value_parser = parse_u16)]
    vendor_id: Option<u16>,

    /// Emit JSON instead of the field table.
    #[arg(long)]
    json: bool,

    /// Fail on opcodes without a registered decoder.
    #[arg(long)]
    strict: bool,

    /// Verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Response bytes as hex, whitespace optional.
    hex_bytes: Vec<String>,
}

fn run(cli: &Cli) -> Result<(), nvme_mi_host::Error> {
    let joined = cli.hex_bytes.join("");
    let bytes = from_hex(&joined)
        .ok_or_else(|| nvme_mi_host::Error::Usage(format!("unparseable hex input: {joined}")))?;

    // A full frame leads with the slave address and the MCTP command
    // code; anything else is treated as a bare message payload.
    let payload = if bytes.len() >= frame::MIN_FRAME_LEN && bytes[1] == MCTP_SMBUS_COMMAND_CODE {
        frame::parse(&bytes)?.payload
    } else {
        bytes
    };

    let registry = DecoderRegistry::with_builtin();
    let response = decode_response(&payload, &registry, cli.vendor_id, cli.strict)?;

    if response.opcode != cli.opcode {
        return Err(nvme_mi_host::Error::UnknownOpcode(response.opcode));
    }

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&response.to_json()).unwrap_or_default());
    } else {
        print!("{}", response.pretty_print());
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return ExitCode::from(2);
        }
    };

    let _ = TermLogger::init(
        if cli.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Warn
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
                ErrorKind::Integrity => ExitCode::from(3),
                _ => ExitCode::from(2),
            }
        }
    }
}
