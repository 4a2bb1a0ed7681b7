// SPDX-License-Identifier: GPL-3.0-only
/*
 * Copyright (c) 2025 Code Construct
 */

//! Building and parsing of MCTP-over-SMBus frames.

use log::debug;
use mctp::{Eid, MsgType, TagValue, MCTP_HEADER_VERSION_1};

use crate::integrity::{message_mic, pec};
use crate::{Error, Result};

use super::{DEFAULT_DEST_ADDR, DEFAULT_SRC_ADDR, MCTP_SMBUS_COMMAND_CODE};

/// Number of bytes preceding the MCTP transport header: destination
/// address, command code, byte count, source address.
pub const SMBUS_PREFIX_LEN: usize = 4;

/// Smallest parseable frame: SMBus prefix, transport header, message-type
/// byte, PEC.
pub const MIN_FRAME_LEN: usize = SMBUS_PREFIX_LEN + MctpHeader::LEN + 1 + 1;

/// MCTP transport header (DSP0236, version 1).
#[derive(Clone, Copy, Debug)]
pub struct MctpHeader {
    pub dest: Eid,
    pub src: Eid,
    pub som: bool,
    pub eom: bool,
    pub seq: u8,
    pub to: bool,
    pub tag: TagValue,
}

impl MctpHeader {
    pub const LEN: usize = 4;

    /// Decode the four header bytes.
    ///
    /// The version nibble must be 1 and the reserved high nibble of the
    /// first byte must be clear; EIDs are not checked for validity.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let Some(header) = bytes.get(..Self::LEN) else {
            return Err(Error::ShortPacket { len: bytes.len() });
        };

        if header[0] & 0xf0 != 0 {
            return Err(Error::ReservedBitsSet);
        }

        let version = header[0] & 0x0f;
        if version != MCTP_HEADER_VERSION_1 {
            return Err(Error::BadVersion(version));
        }

        let flags = header[3];
        Ok(Self {
            dest: Eid(header[1]),
            src: Eid(header[2]),
            som: flags & 0x80 != 0,
            eom: flags & 0x40 != 0,
            seq: (flags >> 4) & mctp::MCTP_SEQ_MASK,
            to: flags & 0x08 != 0,
            tag: TagValue(flags & mctp::MCTP_TAG_MAX),
        })
    }

    pub fn encode(&self) -> [u8; Self::LEN] {
        [
            MCTP_HEADER_VERSION_1,
            self.dest.0,
            self.src.0,
            self.flags(),
        ]
    }

    /// Flags byte: `SOM<<7 | EOM<<6 | (seq & 3)<<4 | TO<<3 | (tag & 7)`.
    pub fn flags(&self) -> u8 {
        (self.som as u8) << 7
            | (self.eom as u8) << 6
            | (self.seq & mctp::MCTP_SEQ_MASK) << 4
            | (self.to as u8) << 3
            | (self.tag.0 & mctp::MCTP_TAG_MAX)
    }
}

/// Everything needed to place one packet on the wire, minus the chunk.
#[derive(Clone, Copy, Debug)]
pub struct FrameParams {
    pub dest_eid: Eid,
    pub msg_type: MsgType,
    pub ic: bool,
    pub som: bool,
    pub eom: bool,
    pub seq: u8,
    pub to: bool,
    pub tag: TagValue,
}

/// A parsed and integrity-checked frame.
///
/// `payload` excludes the message-type byte and, where one was present,
/// the MIC. The MIC travels on the frame carrying EOM; it is only
/// validated here for single-packet messages (`som && eom`), since for a
/// fragmented message it covers the reassembled payload and must be
/// checked by the reassembler instead.
#[derive(Clone, Debug)]
pub struct ParsedFrame {
    pub dest_addr: u8,
    pub src_addr: u8,
    pub header: MctpHeader,
    pub msg_type: u8,
    pub ic: bool,
    pub payload: Vec<u8>,
    pub mic: Option<u32>,
    pub pec_ok: bool,
    pub mic_ok: Option<bool>,
}

/// Frame builder holding per-session defaults and the message tag
/// counter.
///
/// The builder never mutates caller buffers; every build returns a fresh
/// packet. Tags increment modulo 8 per session.
#[derive(Debug)]
pub struct FrameBuilder {
    dest_addr: u8,
    src_addr: u8,
    src_eid: Eid,
    tag: u8,
}

impl Default for FrameBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameBuilder {
    pub fn new() -> Self {
        Self {
            dest_addr: DEFAULT_DEST_ADDR,
            src_addr: DEFAULT_SRC_ADDR,
            src_eid: Eid(0),
            tag: 0,
        }
    }

    pub fn with_addresses(dest_addr: u8, src_addr: u8) -> Self {
        Self {
            dest_addr,
            src_addr,
            ..Self::new()
        }
    }

    pub fn set_src_eid(&mut self, eid: Eid) {
        self.src_eid = eid;
    }

    /// The tag the next message will be assigned.
    pub fn current_tag(&self) -> u8 {
        self.tag
    }

    pub fn reset_tag(&mut self) {
        self.tag = 0;
    }

    /// Allocate the next message tag, advancing the counter modulo 8.
    pub fn next_tag(&mut self) -> TagValue {
        let tag = TagValue(self.tag);
        self.tag = (self.tag + 1) & mctp::MCTP_TAG_MAX;
        tag
    }

    /// Build a single-packet message: SOM=EOM=1, seq=0, TO=1, next tag.
    ///
    /// With `ic` set, bit 7 of the message-type byte is set and a 4-byte
    /// MIC over the plain message-type value and payload is inserted
    /// before the PEC.
    pub fn build_single(
        &mut self,
        dest_eid: Eid,
        msg_type: MsgType,
        payload: &[u8],
        ic: bool,
    ) -> Vec<u8> {
        let tag = self.next_tag();
        let params = FrameParams {
            dest_eid,
            msg_type,
            ic,
            som: true,
            eom: true,
            seq: 0,
            to: true,
            tag,
        };
        let mic = ic.then(|| message_mic(msg_type.0, payload));
        self.build_raw(&params, payload, mic)
    }

    /// Build one packet with explicit SOM/EOM/seq/tag control.
    ///
    /// `mic` is appended (little-endian, before the PEC) when given; the
    /// fragmenter passes it only on the final fragment of a message.
    pub fn build_raw(&self, params: &FrameParams, chunk: &[u8], mic: Option<u32>) -> Vec<u8> {
        let header = MctpHeader {
            dest: params.dest_eid,
            src: self.src_eid,
            som: params.som,
            eom: params.eom,
            seq: params.seq,
            to: params.to,
            tag: params.tag,
        };

        let byte_count = MctpHeader::LEN + 1 + chunk.len() + if mic.is_some() { 4 } else { 0 };
        debug_assert!(byte_count <= u8::MAX as usize);

        let mut packet = Vec::with_capacity(byte_count + 6);
        packet.push(self.dest_addr);
        packet.push(MCTP_SMBUS_COMMAND_CODE);
        packet.push(byte_count as u8);
        packet.push(self.src_addr);
        packet.extend_from_slice(&header.encode());
        packet.push(params.msg_type.0 | if params.ic { 0x80 } else { 0 });
        packet.extend_from_slice(chunk);
        if let Some(mic) = mic {
            packet.extend_from_slice(&mic.to_le_bytes());
        }
        packet.push(pec(&packet));
        packet
    }
}

/// Parse and validate one frame.
///
/// Checks, in order: length, PEC, SMBus command code, byte-count
/// consistency, transport header (version and reserved bits), and for
/// single-packet messages with IC set, the MIC.
pub fn parse(bytes: &[u8]) -> Result<ParsedFrame> {
    if bytes.len() < MIN_FRAME_LEN {
        return Err(Error::ShortPacket { len: bytes.len() });
    }

    let (body, trailer) = bytes.split_at(bytes.len() - 1);
    let calculated = pec(body);
    if calculated != trailer[0] {
        return Err(Error::BadPec {
            calculated,
            found: trailer[0],
            offset: bytes.len() - 1,
        });
    }

    if bytes[1] != MCTP_SMBUS_COMMAND_CODE {
        return Err(Error::WrongCommandCode(bytes[1]));
    }

    let byte_count = bytes[2] as usize;
    // dest + cmd + count, then src + the counted region, then the PEC
    if byte_count + SMBUS_PREFIX_LEN + 1 != bytes.len() {
        debug!(
            "byte count {} inconsistent with frame length {}",
            byte_count,
            bytes.len()
        );
        return Err(Error::ShortPacket { len: bytes.len() });
    }

    let header = MctpHeader::decode(&bytes[SMBUS_PREFIX_LEN..])?;

    let type_byte = bytes[SMBUS_PREFIX_LEN + MctpHeader::LEN];
    let ic = type_byte & 0x80 != 0;
    let msg_type = type_byte & 0x7f;

    let mut payload = bytes[SMBUS_PREFIX_LEN + MctpHeader::LEN + 1..bytes.len() - 1].to_vec();

    // The MIC rides the EOM packet of a message.
    let mut mic = None;
    let mut mic_ok = None;
    if ic && header.eom {
        if payload.len() < 4 {
            return Err(Error::ShortPacket { len: bytes.len() });
        }
        let tail = payload.split_off(payload.len() - 4);
        let found = u32::from_le_bytes([tail[0], tail[1], tail[2], tail[3]]);
        mic = Some(found);

        if header.som {
            let calculated = message_mic(msg_type, &payload);
            if calculated != found {
                return Err(Error::BadMic { calculated, found });
            }
            mic_ok = Some(true);
        }
    }

    Ok(ParsedFrame {
        dest_addr: bytes[0],
        src_addr: bytes[3],
        header,
        msg_type,
        ic,
        payload,
        mic,
        pec_ok: true,
        mic_ok,
    })
}
