// SPDX-License-Identifier: GPL-3.0-only
/*
 * Copyright (c) 2025 Code Construct
 */

//! Host-side NVMe-MI over MCTP/SMBus protocol library.
//!
//! The crate speaks the NVM Express Management Interface out-of-band, with
//! MCTP as the message layer and an SMBus/I2C byte transport underneath,
//! typically provided by an enclosure controller that owns the serial link
//! and slot multiplexer.
//!
//! Layering, bottom up:
//!
//! - [`integrity`]: SMBus PEC (CRC-8) and MCTP MIC (CRC-32C) primitives.
//! - [`mctp_smbus`]: SMBus envelope and MCTP transport header framing,
//!   plus message fragmentation and reassembly.
//! - [`nvme_mi`]: MI and tunneled Admin command encoding, response
//!   decoding into ordered field tables, the decoder registry, and the
//!   session client.
//! - [`transport`]: the packet send/receive boundary, with an enclosure
//!   controller adapter and a deterministic mock endpoint.
//! - [`profiler`]: a curated read-only probe sweep persisted as JSON for
//!   mock replay.
//!
//! ```no_run
//! use nvme_mi_host::transport::mock::MockTransport;
//! use nvme_mi_host::MiClient;
//!
//! let mut client = MiClient::new(MockTransport::new(), 1);
//! let health = client.health_status_poll().unwrap();
//! assert!(health.success);
//! println!("{}", health.pretty_print());
//! ```

use std::time::Duration;

pub mod integrity;
pub mod mctp_smbus;
pub mod nvme_mi;
pub mod profiler;
pub mod transport;

pub use nvme_mi::client::MiClient;
pub use nvme_mi::response::{DecodedField, DecodedResponse, FieldValue};

/// Broad classification of an [`Error`], used for exit-code mapping and
/// retry policy at the call sites.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// PEC or MIC mismatch.
    Integrity,
    /// Malformed SMBus/MCTP envelope.
    Framing,
    /// Fragment ordering violation.
    Sequencing,
    /// Per-command or reassembly deadline expired.
    Timeout,
    /// Non-zero NVMe-MI status.
    Protocol,
    /// Response did not match the expected layout.
    Decode,
    /// Underlying byte transport failure.
    Transport,
    /// Invalid argument; a programming bug at the call site.
    Usage,
}

/// Crate-wide error type.
///
/// Integrity, framing and sequencing errors are surfaced directly; the
/// library never retries on the caller's behalf. Protocol errors are
/// non-fatal to a session: the decoded response carries `success = false`
/// alongside the status code, and the [`Error::Protocol`] variant only
/// appears where no response object can be produced at all.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("PEC mismatch at offset {offset}: calculated {calculated:#04x}, found {found:#04x}")]
    BadPec {
        calculated: u8,
        found: u8,
        offset: usize,
    },

    #[error("MIC mismatch: calculated {calculated:#010x}, found {found:#010x}")]
    BadMic { calculated: u32, found: u32 },

    #[error("packet too short: {len} bytes")]
    ShortPacket { len: usize },

    #[error("unsupported MCTP header version {0}")]
    BadVersion(u8),

    #[error("unexpected SMBus command code {0:#04x}")]
    WrongCommandCode(u8),

    #[error("reserved MCTP header bits set")]
    ReservedBitsSet,

    #[error("start of message arrived while reassembly was in progress")]
    UnexpectedSom,

    #[error("fragment sequence gap: expected {expected}, found {found}")]
    SequenceGap { expected: u8, found: u8 },

    #[error("end of message never arrived")]
    MissingEom,

    #[error("message tag mismatch: expected {expected}, found {found}")]
    TagMismatch { expected: u8, found: u8 },

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("command failed with NVMe-MI status {0:#04x}")]
    Protocol(u8),

    #[error("truncated response for {what}: need {need} bytes, have {have}")]
    TruncatedResponse {
        what: &'static str,
        need: usize,
        have: usize,
    },

    #[error("no decoder registered for opcode {0:#04x}")]
    UnknownOpcode(u8),

    #[error("wire codec failure: {0}")]
    Codec(String),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("{0}")]
    Usage(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::BadPec { .. } | Error::BadMic { .. } => ErrorKind::Integrity,
            Error::ShortPacket { .. }
            | Error::BadVersion(_)
            | Error::WrongCommandCode(_)
            | Error::ReservedBitsSet => ErrorKind::Framing,
            Error::UnexpectedSom
            | Error::SequenceGap { .. }
            | Error::MissingEom
            | Error::TagMismatch { .. } => ErrorKind::Sequencing,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::Protocol(_) => ErrorKind::Protocol,
            Error::TruncatedResponse { .. } | Error::UnknownOpcode(_) | Error::Codec(_) => {
                ErrorKind::Decode
            }
            Error::Transport(_) => ErrorKind::Transport,
            Error::Usage(_) => ErrorKind::Usage,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Transport(err.to_string())
    }
}

impl From<deku::DekuError> for Error {
    fn from(err: deku::DekuError) -> Self {
        Error::Codec(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
