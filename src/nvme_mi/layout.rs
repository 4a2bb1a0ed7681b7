// SPDX-License-Identifier: GPL-3.0-only
/*
 * Copyright (c) 2025 Code Construct
 */

//! Wire layouts shared by the response decoders and the mock endpoint.
//!
//! Each struct mirrors one figure of the NVMe-MI or NVMe Base
//! specification, little-endian throughout. The decoders read these; the
//! mock writes them, so any layout drift shows up as a decode failure in
//! the loopback tests.

use deku::{DekuRead, DekuWrite};

/// Message header common to requests and responses: NMIMT/ROR byte,
/// opcode, two reserved bytes.
#[derive(Debug, DekuRead, DekuWrite)]
#[deku(endian = "little")]
pub struct MessageHeader {
    pub mt: u8,
    #[deku(pad_bytes_after = "2")]
    pub opcode: u8,
}

impl MessageHeader {
    pub const LEN: usize = 4;
}

// MI v2.0, 5.6, Figure 108, padded to the 1.2 response length.
#[derive(Debug, Default, DekuRead, DekuWrite)]
#[deku(endian = "little")]
pub struct SubsystemHealthData {
    pub status: u8,
    pub nss: u8,
    pub sw: u8,
    pub ctemp: u16,
    pub pdlu: u8,
    #[deku(pad_bytes_after = "13")]
    pub spare: u8,
}

impl SubsystemHealthData {
    pub const LEN: usize = 20;
}

// MI 2.x extension: trailing endurance group warning, reserved, and
// vendor dwords after the 1.2 region.
#[derive(Debug, Default, DekuRead, DekuWrite)]
#[deku(endian = "little")]
pub struct SubsystemHealthDataExt {
    pub status: u8,
    pub nss: u8,
    pub sw: u8,
    pub ctemp: u16,
    pub pdlu: u8,
    #[deku(pad_bytes_after = "13")]
    pub spare: u8,
    pub egcw: u32,
    pub rsvd: u32,
    pub vendor: u32,
}

impl SubsystemHealthDataExt {
    pub const LEN: usize = 32;
}

// MI v2.0, 5.3, Figure 96: status, two reserved bytes, entry count.
#[derive(Debug, DekuRead, DekuWrite)]
#[deku(endian = "little")]
pub struct ControllerHealthHeader {
    #[deku(pad_bytes_after = "2")]
    pub status: u8,
    pub rent: u8,
}

impl ControllerHealthHeader {
    pub const LEN: usize = 4;
}

// MI v2.0, 5.3, Figure 97
#[derive(Clone, Copy, Debug, Default, DekuRead, DekuWrite)]
#[deku(endian = "little")]
pub struct ControllerHealthEntry {
    pub ctlid: u16,
    pub csts: u16,
    pub ctemp: u16,
    pub pdlu: u8,
    pub spare: u8,
    pub cwarn: u8,
    #[deku(pad_bytes_after = "5")]
    pub chsc: u16,
}

impl ControllerHealthEntry {
    pub const LEN: usize = 16;
    /// MI 2.x reports 32-byte entries; the tail is reserved.
    pub const LEN_EXT: usize = 32;

    /// CSTS bit 0: controller ready.
    pub fn ready(&self) -> bool {
        self.csts & 0x01 != 0
    }
}

// MI v2.0, 5.7, Figure 111
#[derive(Debug, DekuRead, DekuWrite)]
#[deku(endian = "little")]
pub struct DataStructureHeader {
    pub status: u8,
    #[deku(pad_bytes_after = "1")]
    pub rdl: u16,
}

impl DataStructureHeader {
    pub const LEN: usize = 4;
}

// MI v2.0, 5.7.1, Figure 112
#[derive(Debug, Default, DekuRead, DekuWrite)]
#[deku(endian = "little")]
pub struct SubsystemInfo {
    pub nump: u8,
    pub mjr: u8,
    pub mnr: u8,
    #[deku(pad_bytes_after = "28")]
    pub nnsc: u8,
}

impl SubsystemInfo {
    pub const LEN: usize = 32;
}

// MI v2.0, 5.7.2, Figure 114
#[derive(Debug, Default, DekuRead, DekuWrite)]
#[deku(endian = "little")]
pub struct PortInfo {
    pub prttyp: u8,
    pub prtcap: u8,
    pub mmtus: u16,
    #[deku(pad_bytes_after = "24")]
    pub mebs: u32,
}

impl PortInfo {
    pub const LEN: usize = 32;

    pub fn port_type_name(&self) -> &'static str {
        match self.prttyp {
            0x00 => "Inactive",
            0x01 => "PCIe",
            0x02 => "Two-Wire",
            _ => "Reserved",
        }
    }
}

// Base v2.1, 5.1.13.2.12, Figure 137
#[derive(Debug, Default, DekuRead, DekuWrite)]
#[deku(endian = "little")]
pub struct ControllerList {
    #[deku(update = "self.ids.len()")]
    pub numids: u16,
    #[deku(count = "numids")]
    pub ids: Vec<u16>,
}

// MI v2.0, 5.1.1, Figure 77
#[derive(Debug, DekuRead, DekuWrite)]
#[deku(endian = "little")]
pub struct SmbusFrequencyConfig {
    pub status: u8,
    #[deku(pad_bytes_after = "2")]
    pub sfreq: u8,
}

impl SmbusFrequencyConfig {
    pub const LEN: usize = 4;

    pub fn frequency_name(&self) -> &'static str {
        match self.sfreq {
            0x00 => "Not Supported",
            0x01 => "100 kHz",
            0x02 => "400 kHz",
            0x03 => "1 MHz",
            _ => "Reserved",
        }
    }
}

// MI v2.0, 5.1.3, Figure 79
#[derive(Debug, DekuRead, DekuWrite)]
#[deku(endian = "little")]
pub struct MtusConfig {
    pub status: u8,
    #[deku(pad_bytes_after = "1")]
    pub mtus: u16,
}

impl MtusConfig {
    pub const LEN: usize = 4;
}

// Base v2.1, 5.1.12.1.3, Figure 206
#[derive(Debug, Default, DekuRead, DekuWrite)]
#[deku(endian = "little")]
pub struct SmartLog {
    pub cw: u8,
    pub ctemp: u16,
    pub avsp: u8,
    pub avspt: u8,
    pub pused: u8,
    #[deku(pad_bytes_after = "25")]
    pub egcws: u8,
    pub dur: u128,
    pub duw: u128,
    pub hrc: u128,
    pub hwc: u128,
    pub cbt: u128,
    pub pwrc: u128,
    pub poh: u128,
    pub upl: u128,
    pub mdie: u128,
    pub neile: u128,
    pub wctt: u32,
    pub cctt: u32,
    pub tsen: [u16; 8],
    pub tmt1c: u32,
    pub tmt2c: u32,
    pub tmt1t: u32,
    #[deku(pad_bytes_after = "280")]
    pub tmt2t: u32,
}

impl SmartLog {
    pub const LEN: usize = 512;
}

// Base v2.1, 5.1.13.2.1, Figure 312: the identification prefix; the
// remainder of the 4096-byte structure is opaque here.
#[derive(Debug, DekuRead, DekuWrite)]
#[deku(endian = "little")]
pub struct IdentifyControllerPrefix {
    pub vid: u16,
    pub ssvid: u16,
    pub sn: [u8; 20],
    pub mn: [u8; 40],
    pub fr: [u8; 8],
}

impl IdentifyControllerPrefix {
    pub const LEN: usize = 72;
    pub const FULL_LEN: usize = 4096;
}

// Base v2.1, 5.1.12.1.4, Figure 209
#[derive(Debug, Default, DekuRead, DekuWrite)]
#[deku(endian = "little")]
pub struct FirmwareSlotLog {
    #[deku(pad_bytes_after = "7")]
    pub afi: u8,
    #[deku(pad_bytes_after = "448")]
    pub frs: [[u8; 8]; 7],
}

impl FirmwareSlotLog {
    pub const LEN: usize = 512;
}

// Base v2.1, 5.1.12.1.2, Figure 205
#[derive(Debug, Default, DekuRead, DekuWrite)]
#[deku(endian = "little")]
pub struct ErrorLogEntry {
    pub error_count: u64,
    pub sqid: u16,
    pub cid: u16,
    pub status: u16,
    pub pel: u16,
    pub lba: u64,
    #[deku(pad_bytes_after = "36")]
    pub nsid: u32,
}

impl ErrorLogEntry {
    pub const LEN: usize = 64;
}

/// Trim trailing NULs and spaces from a fixed-width ASCII field.
pub fn trim_ascii(raw: &[u8]) -> String {
    let text: String = raw
        .iter()
        .map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '\0'
            }
        })
        .collect();
    text.trim_end_matches(['\0', ' ']).to_string()
}

/// Pad an ASCII string into a fixed-width field, space-filled.
pub fn pad_ascii<const N: usize>(text: &str) -> [u8; N] {
    let mut field = [b' '; N];
    for (dst, src) in field.iter_mut().zip(text.bytes()) {
        *dst = src;
    }
    field
}

#[cfg(test)]
mod tests {
    use super::*;
    use deku::{DekuContainerRead, DekuContainerWrite};

    #[test]
    fn subsystem_health_lengths() {
        let bytes = SubsystemHealthData::default().to_bytes().unwrap();
        assert_eq!(bytes.len(), SubsystemHealthData::LEN);
        let bytes = SubsystemHealthDataExt::default().to_bytes().unwrap();
        assert_eq!(bytes.len(), SubsystemHealthDataExt::LEN);
    }

    #[test]
    fn smart_log_length() {
        let bytes = SmartLog::default().to_bytes().unwrap();
        assert_eq!(bytes.len(), SmartLog::LEN);
    }

    #[test]
    fn firmware_slot_log_length() {
        let bytes = FirmwareSlotLog::default().to_bytes().unwrap();
        assert_eq!(bytes.len(), FirmwareSlotLog::LEN);
    }

    #[test]
    fn error_log_entry_length() {
        let bytes = ErrorLogEntry::default().to_bytes().unwrap();
        assert_eq!(bytes.len(), ErrorLogEntry::LEN);
    }

    #[test]
    fn controller_list_round_trip() {
        let mut list = ControllerList::default();
        list.ids = vec![1, 4, 9];
        list.numids = list.ids.len() as u16;
        let bytes = list.to_bytes().unwrap();
        assert_eq!(bytes.len(), 2 + 3 * 2);
        let (_, parsed) = ControllerList::from_bytes((bytes.as_slice(), 0)).unwrap();
        assert_eq!(parsed.ids, vec![1, 4, 9]);
    }

    #[test]
    fn ascii_trim_and_pad() {
        let field: [u8; 8] = pad_ascii("FW1.0");
        assert_eq!(&field, b"FW1.0   ");
        assert_eq!(trim_ascii(&field), "FW1.0");
    }
}
