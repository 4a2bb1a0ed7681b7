// SPDX-License-Identifier: GPL-3.0-only
/*
 * Copyright (c) 2025 Code Construct
 */

//! Packet integrity primitives.
//!
//! Two checks cover an MCTP-over-SMBus frame: the SMBus Packet Error Code
//! trailing every packet, and the optional Message Integrity Check
//! appended to a message when the IC bit of the message-type byte is set.

use crc::Crc;

/// SMBus 2.0 PEC: CRC-8, polynomial 0x07, init 0, no reflection.
const SMBUS: Crc<u8> = Crc::<u8>::new(&crc::CRC_8_SMBUS);

/// MCTP MIC: CRC-32C (Castagnoli), reflected, init/xorout 0xFFFFFFFF.
const ISCSI: Crc<u32> = Crc::<u32>::new(&crc::CRC_32_ISCSI);

/// Compute the SMBus PEC over `data`.
///
/// Callers define the span; for a transmitted frame it is every byte
/// preceding the PEC itself, including the destination address.
pub fn pec(data: &[u8]) -> u8 {
    SMBUS.checksum(data)
}

/// Compute the MIC over `data`.
///
/// The span is the plain message-type value (IC bit clear) followed by the
/// complete message payload; for fragmented messages the payload is the
/// reassembled message, not an individual chunk. Emitted little-endian on
/// the wire.
pub fn mic(data: &[u8]) -> u32 {
    ISCSI.checksum(data)
}

/// MIC over a message given as message type plus payload, avoiding an
/// intermediate copy of the payload.
pub fn message_mic(msg_type: u8, payload: &[u8]) -> u32 {
    let mut digest = ISCSI.digest();
    digest.update(&[msg_type]);
    digest.update(payload);
    digest.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pec_of_empty_is_zero() {
        assert_eq!(pec(&[]), 0x00);
    }

    #[test]
    fn pec_single_byte() {
        // CRC-8/SMBUS check value for the standard "123456789" vector.
        assert_eq!(pec(b"123456789"), 0xf4);
    }

    #[test]
    fn mic_matches_iscsi_check() {
        // CRC-32/ISCSI check value for the standard "123456789" vector.
        assert_eq!(mic(b"123456789"), 0xe306_9283);
    }

    #[test]
    fn message_mic_equals_contiguous_mic() {
        let payload = [0x01, 0x01, 0x00, 0x00];
        let mut contiguous = vec![0x04];
        contiguous.extend_from_slice(&payload);
        assert_eq!(message_mic(0x04, &payload), mic(&contiguous));
    }
}
