// SPDX-License-Identifier: GPL-3.0-only
/*
 * Copyright (c) 2025 Code Construct
 */

//! Response decoding.
//!
//! The dispatcher validates the message header, lifts the status byte,
//! and hands the data segment to an opcode-specific decoder resolved via
//! the registry. Decoders populate named fields together with the raw
//! span each was read from.
//!
//! Responses whose opcode admits several shapes (data-structure reads,
//! log pages) get an envelope decoder in the registry; the typed client
//! helpers, which know what they asked for, run the specific decoder
//! directly via [`decode_with`].

use deku::DekuContainerRead;
use log::warn;

use crate::{Error, Result};

use super::layout::{
    ControllerHealthEntry, ControllerHealthHeader, ControllerList, DataStructureHeader,
    ErrorLogEntry, FirmwareSlotLog, IdentifyControllerPrefix, MessageHeader, MtusConfig,
    SmartLog, SmbusFrequencyConfig, SubsystemHealthData, SubsystemHealthDataExt, SubsystemInfo,
    trim_ascii,
};
use super::registry::DecoderRegistry;
use super::response::{to_hex, DecodedResponse, FieldValue};
use super::{describe_warnings, kelvin_to_celsius, MessageKind, MiStatus, ROR_RESPONSE};

/// An opcode-specific response decoder.
///
/// `data` is the data segment of the response: everything following the
/// 4-byte message header, so `data[0]` is the NVMe-MI status byte. The
/// dispatcher has already recorded status and success; decoders add the
/// opcode-specific fields.
pub trait ResponseDecoder {
    fn decode(&self, data: &[u8], resp: &mut DecodedResponse) -> Result<()>;
}

fn require(data: &[u8], need: usize, what: &'static str) -> Result<()> {
    if data.len() < need {
        return Err(Error::TruncatedResponse {
            what,
            need,
            have: data.len(),
        });
    }
    Ok(())
}

fn celsius_text(kelvin: u16) -> String {
    format!("{}°C", kelvin_to_celsius(kelvin))
}

fn percent_text(value: u8) -> String {
    format!("{value}%")
}

/// Split a response payload into its header and data segment.
fn begin(payload: &[u8]) -> Result<(DecodedResponse, &[u8])> {
    require(payload, MessageHeader::LEN + 1, "response header")?;

    let ((_, _), header) = MessageHeader::from_bytes((payload, 0))?;
    if header.mt & ROR_RESPONSE == 0 {
        warn!("decoding a message with ROR clear: {:#04x}", header.mt);
    }

    let nmimt = header.mt & !ROR_RESPONSE;
    let Some(kind) = MessageKind::from_nmimt(nmimt) else {
        return Err(Error::Codec(format!("unhandled NMIMT {nmimt:#04x}")));
    };

    let data = &payload[MessageHeader::LEN..];
    let status = data[0];
    let mut resp = DecodedResponse::new(kind, header.opcode, status, payload.to_vec());
    resp.add_field(
        "Status",
        FieldValue::Text(MiStatus::describe(status)),
        &data[..1],
    );
    Ok((resp, data))
}

/// Decode a response payload with a registry-resolved decoder.
///
/// A non-zero status stops after the status field with `success = false`.
/// A truncated body yields whatever fields were recovered, marked
/// `partial`. With `strict` set, an opcode nobody registered is an error
/// instead of a hex dump.
pub fn decode_response(
    payload: &[u8],
    registry: &DecoderRegistry,
    vendor_id: Option<u16>,
    strict: bool,
) -> Result<DecodedResponse> {
    let (resp, data) = begin(payload)?;
    if !resp.success {
        return Ok(resp);
    }

    let decoder = match registry.resolve_registered(resp.kind, resp.opcode, vendor_id) {
        Some(decoder) => decoder,
        None if strict => return Err(Error::UnknownOpcode(resp.opcode)),
        None => registry.generic(),
    };

    finish(decoder, data, resp)
}

/// Decode a response payload with an explicitly chosen decoder.
pub fn decode_with(payload: &[u8], decoder: &dyn ResponseDecoder) -> Result<DecodedResponse> {
    let (resp, data) = begin(payload)?;
    if !resp.success {
        return Ok(resp);
    }
    finish(decoder, data, resp)
}

fn finish(
    decoder: &dyn ResponseDecoder,
    data: &[u8],
    mut resp: DecodedResponse,
) -> Result<DecodedResponse> {
    match decoder.decode(data, &mut resp) {
        Ok(()) => Ok(resp),
        Err(Error::TruncatedResponse { what, need, have }) => {
            warn!("truncated {what}: need {need}, have {have}");
            resp.partial = true;
            Ok(resp)
        }
        Err(err) => Err(err),
    }
}

/// Fallback: everything after the status byte as one hex field.
pub struct GenericHexDecoder;

impl ResponseDecoder for GenericHexDecoder {
    fn decode(&self, data: &[u8], resp: &mut DecodedResponse) -> Result<()> {
        let body = &data[1..];
        if !body.is_empty() {
            resp.add_field("Data", FieldValue::Text(to_hex(body)), body);
        }
        Ok(())
    }
}

/// NVM Subsystem Health Status Poll. The 20-byte (MI 1.2) and 32-byte
/// (MI 2.x) shapes are distinguished by length alone; version discovery
/// is a different command.
pub struct SubsystemHealthDecoder;

impl ResponseDecoder for SubsystemHealthDecoder {
    fn decode(&self, data: &[u8], resp: &mut DecodedResponse) -> Result<()> {
        require(data, SubsystemHealthData::LEN, "subsystem health")?;

        let extended = data.len() >= SubsystemHealthDataExt::LEN;
        let (_, health) = SubsystemHealthData::from_bytes((data, 0))?;

        resp.add_field(
            "NVM Subsystem Status",
            FieldValue::Text(format!("{:#04x}", health.nss)),
            &data[1..2],
        );
        resp.add_field(
            "SMART Warnings",
            FieldValue::Text(describe_warnings(health.sw)),
            &data[2..3],
        );
        resp.add_field(
            "Composite Temperature",
            FieldValue::Text(celsius_text(health.ctemp)),
            &data[3..5],
        );
        resp.add_field(
            "Drive Life Used",
            FieldValue::Text(percent_text(health.pdlu)),
            &data[5..6],
        );
        resp.add_field(
            "Available Spare",
            FieldValue::Text(percent_text(health.spare)),
            &data[6..7],
        );

        if extended {
            let (_, ext) = SubsystemHealthDataExt::from_bytes((data, 0))?;
            resp.add_field(
                "Endurance Group Warning",
                FieldValue::Text(format!("{:#010x}", ext.egcw)),
                &data[20..24],
            );
            resp.add_field(
                "Vendor Specific",
                FieldValue::Text(format!("{:#010x}", ext.vendor)),
                &data[28..32],
            );
        }
        Ok(())
    }
}

/// Controller Health Status Poll: a count header, then per-controller
/// entries of 16 (MI 1.2) or 32 (MI 2.x) bytes, again split by length.
pub struct ControllerHealthDecoder;

impl ResponseDecoder for ControllerHealthDecoder {
    fn decode(&self, data: &[u8], resp: &mut DecodedResponse) -> Result<()> {
        require(data, ControllerHealthHeader::LEN, "controller health header")?;
        let (_, header) = ControllerHealthHeader::from_bytes((data, 0))?;

        resp.add_field(
            "Reported Entries",
            FieldValue::Uint(header.rent as u64),
            &data[3..4],
        );

        if header.rent == 0 {
            return Ok(());
        }

        let body = &data[ControllerHealthHeader::LEN..];
        let entry_len = if body.len() / header.rent as usize >= ControllerHealthEntry::LEN_EXT {
            ControllerHealthEntry::LEN_EXT
        } else {
            ControllerHealthEntry::LEN
        };
        require(
            data,
            ControllerHealthHeader::LEN + entry_len * header.rent as usize,
            "controller health entries",
        )?;

        for (i, chunk) in body.chunks(entry_len).take(header.rent as usize).enumerate() {
            let (_, entry) = ControllerHealthEntry::from_bytes((chunk, 0))?;
            let prefix = if header.rent > 1 {
                format!("Controller {} ", entry.ctlid)
            } else {
                String::new()
            };
            let base = ControllerHealthHeader::LEN + i * entry_len;

            if prefix.is_empty() {
                resp.add_field(
                    "Controller ID",
                    FieldValue::Uint(entry.ctlid as u64),
                    &data[base..base + 2],
                );
            }
            resp.add_field(
                format!("{prefix}Controller Ready"),
                FieldValue::Text(if entry.ready() { "Yes" } else { "No" }.to_string()),
                &data[base + 2..base + 4],
            );
            resp.add_field(
                format!("{prefix}Composite Temperature"),
                FieldValue::Text(celsius_text(entry.ctemp)),
                &data[base + 4..base + 6],
            );
            resp.add_field(
                format!("{prefix}Drive Life Used"),
                FieldValue::Text(percent_text(entry.pdlu)),
                &data[base + 6..base + 7],
            );
            resp.add_field(
                format!("{prefix}Available Spare"),
                FieldValue::Text(percent_text(entry.spare)),
                &data[base + 7..base + 8],
            );
            resp.add_field(
                format!("{prefix}Critical Warning"),
                FieldValue::Text(describe_warnings(entry.cwarn)),
                &data[base + 8..base + 9],
            );
        }
        Ok(())
    }
}

/// Read NVMe-MI Data Structure envelope: length and raw payload. The
/// typed sub-decoders below interpret specific structure types.
pub struct DataStructureEnvelopeDecoder;

impl ResponseDecoder for DataStructureEnvelopeDecoder {
    fn decode(&self, data: &[u8], resp: &mut DecodedResponse) -> Result<()> {
        require(data, DataStructureHeader::LEN, "data structure header")?;
        let (_, header) = DataStructureHeader::from_bytes((data, 0))?;

        resp.add_field(
            "Response Data Length",
            FieldValue::Uint(header.rdl as u64),
            &data[1..3],
        );

        let body = &data[DataStructureHeader::LEN..];
        let body = &body[..body.len().min(header.rdl as usize)];
        if !body.is_empty() {
            resp.add_field("Data", FieldValue::Text(to_hex(body)), body);
        }
        Ok(())
    }
}

/// NVM subsystem information structure.
pub struct SubsystemInfoDecoder;

impl ResponseDecoder for SubsystemInfoDecoder {
    fn decode(&self, data: &[u8], resp: &mut DecodedResponse) -> Result<()> {
        require(data, DataStructureHeader::LEN + 4, "subsystem information")?;
        let body = &data[DataStructureHeader::LEN..];
        let info = match SubsystemInfo::from_bytes((body, 0)) {
            Ok((_, info)) => info,
            Err(_) => {
                // Short structure from a 1.2 endpoint; only the first
                // dword is defined anyway.
                let mut padded = body.to_vec();
                padded.resize(SubsystemInfo::LEN, 0);
                let (_, info) = SubsystemInfo::from_bytes((padded.as_slice(), 0))?;
                info
            }
        };

        resp.add_field(
            "Number of Ports",
            FieldValue::Uint(info.nump as u64 + 1),
            &data[4..5],
        );
        resp.add_field(
            "NVMe-MI Version",
            FieldValue::Text(format!("{}.{}", info.mjr, info.mnr)),
            &data[5..7],
        );
        resp.add_field(
            "Optional Commands Supported",
            FieldValue::Text(format!("{:#04x}", info.nnsc)),
            &data[7..8],
        );
        Ok(())
    }
}

/// Port information structure.
pub struct PortInfoDecoder;

impl ResponseDecoder for PortInfoDecoder {
    fn decode(&self, data: &[u8], resp: &mut DecodedResponse) -> Result<()> {
        require(data, DataStructureHeader::LEN + 8, "port information")?;
        let body = &data[DataStructureHeader::LEN..];
        let port = match super::layout::PortInfo::from_bytes((body, 0)) {
            Ok((_, port)) => port,
            Err(_) => {
                // Short structure from a 1.2 endpoint; pad out the
                // reserved region.
                let mut padded = body.to_vec();
                padded.resize(super::layout::PortInfo::LEN, 0);
                let (_, port) = super::layout::PortInfo::from_bytes((padded.as_slice(), 0))?;
                port
            }
        };

        resp.add_field(
            "Port Type",
            FieldValue::Text(port.port_type_name().to_string()),
            &data[4..5],
        );
        resp.add_field(
            "Port Capabilities",
            FieldValue::Text(format!("{:#04x}", port.prtcap)),
            &data[5..6],
        );
        resp.add_field(
            "Max MCTP Transmission Unit",
            FieldValue::Uint(port.mmtus as u64),
            &data[6..8],
        );
        resp.add_field(
            "Management Endpoint Buffer Size",
            FieldValue::Uint(port.mebs as u64),
            &data[8..12],
        );
        Ok(())
    }
}

/// Controller list structure.
pub struct ControllerListDecoder;

impl ResponseDecoder for ControllerListDecoder {
    fn decode(&self, data: &[u8], resp: &mut DecodedResponse) -> Result<()> {
        require(data, DataStructureHeader::LEN + 2, "controller list")?;
        let body = &data[DataStructureHeader::LEN..];
        let (_, list) = ControllerList::from_bytes((body, 0))?;

        resp.add_field(
            "Number of Controllers",
            FieldValue::Uint(list.ids.len() as u64),
            &data[4..6],
        );
        let span_end = 6 + 2 * list.ids.len();
        resp.add_field(
            "Controller IDs",
            FieldValue::List(list.ids),
            &data[6..span_end.min(data.len())],
        );
        Ok(())
    }
}

/// Configuration Get, SMBus/I2C frequency identifier.
pub struct SmbusFrequencyDecoder;

impl ResponseDecoder for SmbusFrequencyDecoder {
    fn decode(&self, data: &[u8], resp: &mut DecodedResponse) -> Result<()> {
        require(data, SmbusFrequencyConfig::LEN, "SMBus frequency")?;
        let (_, config) = SmbusFrequencyConfig::from_bytes((data, 0))?;
        resp.add_field(
            "SMBus Frequency",
            FieldValue::Text(config.frequency_name().to_string()),
            &data[1..2],
        );
        Ok(())
    }
}

/// Configuration Get, MCTP transmission unit identifier.
pub struct MtusDecoder;

impl ResponseDecoder for MtusDecoder {
    fn decode(&self, data: &[u8], resp: &mut DecodedResponse) -> Result<()> {
        require(data, MtusConfig::LEN, "MCTP transmission unit")?;
        let (_, config) = MtusConfig::from_bytes((data, 0))?;
        resp.add_field(
            "MCTP Transmission Unit Size",
            FieldValue::Uint(config.mtus as u64),
            &data[1..3],
        );
        Ok(())
    }
}

/// VPD Read: length plus the raw chunk; callers consume the raw span.
pub struct VpdDecoder;

impl ResponseDecoder for VpdDecoder {
    fn decode(&self, data: &[u8], resp: &mut DecodedResponse) -> Result<()> {
        let chunk = &data[1..];
        resp.add_field("Length", FieldValue::Uint(chunk.len() as u64), &[]);
        resp.add_field("VPD Data", FieldValue::Text(to_hex(chunk)), chunk);
        Ok(())
    }
}

/// Admin responses carry a dword-aligned status, then the tunneled data.
pub const ADMIN_DATA_OFFSET: usize = 4;

/// Get Log Page envelope for log identifiers without a typed decoder.
pub struct LogPageDecoder;

impl ResponseDecoder for LogPageDecoder {
    fn decode(&self, data: &[u8], resp: &mut DecodedResponse) -> Result<()> {
        require(data, ADMIN_DATA_OFFSET, "log page")?;
        let body = &data[ADMIN_DATA_OFFSET..];
        resp.add_field("Log Length", FieldValue::Uint(body.len() as u64), &[]);
        if !body.is_empty() {
            resp.add_field("Log Data", FieldValue::Text(to_hex(body)), body);
        }
        Ok(())
    }
}

/// SMART / Health Information log page (LID 0x02).
pub struct SmartLogDecoder;

impl ResponseDecoder for SmartLogDecoder {
    fn decode(&self, data: &[u8], resp: &mut DecodedResponse) -> Result<()> {
        require(data, ADMIN_DATA_OFFSET + SmartLog::LEN, "SMART log")?;
        let log_data = &data[ADMIN_DATA_OFFSET..];
        let (_, log) = SmartLog::from_bytes((log_data, 0))?;
        let at = |off: usize, len: usize| &log_data[off..off + len];

        resp.add_field(
            "Critical Warning",
            FieldValue::Text(describe_warnings(log.cw)),
            at(0, 1),
        );
        resp.add_field(
            "Composite Temperature",
            FieldValue::Text(celsius_text(log.ctemp)),
            at(1, 2),
        );
        resp.add_field(
            "Available Spare",
            FieldValue::Text(percent_text(log.avsp)),
            at(3, 1),
        );
        resp.add_field(
            "Available Spare Threshold",
            FieldValue::Text(percent_text(log.avspt)),
            at(4, 1),
        );
        resp.add_field(
            "Percentage Used",
            FieldValue::Text(percent_text(log.pused)),
            at(5, 1),
        );

        let counters: [(&str, u128, usize); 10] = [
            ("Data Units Read", log.dur, 32),
            ("Data Units Written", log.duw, 48),
            ("Host Read Commands", log.hrc, 64),
            ("Host Write Commands", log.hwc, 80),
            ("Controller Busy Time", log.cbt, 96),
            ("Power Cycles", log.pwrc, 112),
            ("Power On Hours", log.poh, 128),
            ("Unsafe Shutdowns", log.upl, 144),
            ("Media and Data Integrity Errors", log.mdie, 160),
            ("Error Log Entries", log.neile, 176),
        ];
        for (name, value, offset) in counters {
            resp.add_field(name, FieldValue::Text(value.to_string()), at(offset, 16));
        }

        for (i, &sensor) in log.tsen.iter().enumerate() {
            if sensor != 0 {
                resp.add_field(
                    format!("Temperature Sensor {}", i + 1),
                    FieldValue::Text(celsius_text(sensor)),
                    at(200 + 2 * i, 2),
                );
            }
        }
        Ok(())
    }
}

/// Identify Controller (CNS 0x01).
pub struct IdentifyControllerDecoder;

impl ResponseDecoder for IdentifyControllerDecoder {
    fn decode(&self, data: &[u8], resp: &mut DecodedResponse) -> Result<()> {
        require(
            data,
            ADMIN_DATA_OFFSET + IdentifyControllerPrefix::LEN,
            "identify controller",
        )?;
        let body = &data[ADMIN_DATA_OFFSET..];
        let (_, identify) = IdentifyControllerPrefix::from_bytes((body, 0))?;

        resp.add_field(
            "PCI Vendor ID",
            FieldValue::Text(format!("{:#06x}", identify.vid)),
            &body[0..2],
        );
        resp.add_field(
            "PCI Subsystem Vendor ID",
            FieldValue::Text(format!("{:#06x}", identify.ssvid)),
            &body[2..4],
        );
        resp.add_field(
            "Serial Number",
            FieldValue::Text(trim_ascii(&identify.sn)),
            &body[4..24],
        );
        resp.add_field(
            "Model Number",
            FieldValue::Text(trim_ascii(&identify.mn)),
            &body[24..64],
        );
        resp.add_field(
            "Firmware Revision",
            FieldValue::Text(trim_ascii(&identify.fr)),
            &body[64..72],
        );
        Ok(())
    }
}

/// Firmware Slot Information log page (LID 0x03).
pub struct FirmwareSlotDecoder;

impl ResponseDecoder for FirmwareSlotDecoder {
    fn decode(&self, data: &[u8], resp: &mut DecodedResponse) -> Result<()> {
        require(data, ADMIN_DATA_OFFSET + FirmwareSlotLog::LEN, "firmware slot log")?;
        let body = &data[ADMIN_DATA_OFFSET..];
        let (_, log) = FirmwareSlotLog::from_bytes((body, 0))?;

        resp.add_field(
            "Active Firmware Slot",
            FieldValue::Uint((log.afi & 0x07) as u64),
            &body[0..1],
        );
        for (i, slot) in log.frs.iter().enumerate() {
            let revision = trim_ascii(slot);
            if !revision.is_empty() {
                resp.add_field(
                    format!("Slot {} Firmware Revision", i + 1),
                    FieldValue::Text(revision),
                    &body[8 + 8 * i..16 + 8 * i],
                );
            }
        }
        Ok(())
    }
}

/// Error Information log page (LID 0x01), 64-byte entries.
pub struct ErrorLogDecoder;

impl ResponseDecoder for ErrorLogDecoder {
    fn decode(&self, data: &[u8], resp: &mut DecodedResponse) -> Result<()> {
        require(data, ADMIN_DATA_OFFSET + ErrorLogEntry::LEN, "error log")?;
        let body = &data[ADMIN_DATA_OFFSET..];

        let mut populated = 0u64;
        for (i, chunk) in body.chunks_exact(ErrorLogEntry::LEN).enumerate() {
            let (_, entry) = ErrorLogEntry::from_bytes((chunk, 0))?;
            if entry.error_count == 0 {
                continue;
            }
            populated += 1;
            let base = i * ErrorLogEntry::LEN;
            resp.add_field(
                format!("Entry {i} Error Count"),
                FieldValue::Uint(entry.error_count),
                &body[base..base + 8],
            );
            resp.add_field(
                format!("Entry {i} Status"),
                FieldValue::Text(format!("{:#06x}", entry.status)),
                &body[base + 12..base + 14],
            );
            resp.add_field(
                format!("Entry {i} LBA"),
                FieldValue::Uint(entry.lba),
                &body[base + 16..base + 24],
            );
            resp.add_field(
                format!("Entry {i} Namespace"),
                FieldValue::Uint(entry.nsid as u64),
                &body[base + 24..base + 28],
            );
        }
        resp.add_field("Error Entries", FieldValue::Uint(populated), &[]);
        Ok(())
    }
}
