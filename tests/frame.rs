// SPDX-License-Identifier: GPL-3.0-only
/*
 * Copyright (c) 2025 Code Construct
 */
use mctp::{Eid, MsgType, MCTP_TYPE_NVME};

use nvme_mi_host::integrity::{mic, pec};
use nvme_mi_host::mctp_smbus::frame::{parse, FrameBuilder, FrameParams};
use nvme_mi_host::nvme_mi::request::MiRequest;
use nvme_mi_host::{Error, ErrorKind};

mod common;
use common::setup;

/// Canonical Health Status Poll frame: dest EID 0, tag 0, no IC.
#[rustfmt::skip]
const HEALTH_POLL_PRE_PEC: [u8; 13] = [
    0x3a, 0x0f, 0x09, 0x21,
    0x01, 0x00, 0x00, 0xc8,
    0x04, 0x01, 0x01, 0x00, 0x00,
];

#[test]
fn health_status_poll_canonical_bytes() {
    setup();

    let mut builder = FrameBuilder::new();
    let payload = MiRequest::subsystem_health_status_poll().pack();
    let packet = builder.build_single(Eid(0), MCTP_TYPE_NVME, &payload, false);

    assert_eq!(packet.len(), 14);
    assert_eq!(&packet[..13], &HEALTH_POLL_PRE_PEC);
    assert_eq!(packet[13], pec(&HEALTH_POLL_PRE_PEC));
}

#[test]
fn integrity_check_inserts_mic_before_pec() {
    setup();

    let mut builder = FrameBuilder::new();
    let payload = MiRequest::subsystem_health_status_poll().pack();
    let packet = builder.build_single(Eid(0), MCTP_TYPE_NVME, &payload, true);

    // Four extra bytes, reflected in the byte count.
    assert_eq!(packet.len(), 18);
    assert_eq!(packet[2], 13);
    // IC bit on the message-type byte.
    assert_eq!(packet[8], 0x84);

    // MIC over the plain message type and payload, little-endian,
    // immediately before the PEC.
    let expected = mic(&[0x04, 0x01, 0x01, 0x00, 0x00]);
    assert_eq!(&packet[13..17], &expected.to_le_bytes());
    assert_eq!(packet[17], pec(&packet[..17]));
}

#[test]
fn parse_accepts_what_build_produces() {
    setup();

    let payload = [0x01u8, 0x02, 0x03, 0x04, 0x05];
    for ic in [false, true] {
        let mut builder = FrameBuilder::new();
        let packet = builder.build_single(Eid(9), MCTP_TYPE_NVME, &payload, ic);
        let frame = parse(&packet).unwrap();

        assert_eq!(frame.payload, payload);
        assert!(frame.pec_ok);
        assert_eq!(frame.ic, ic);
        assert_eq!(frame.mic_ok, ic.then_some(true));
        assert!(frame.header.som);
        assert!(frame.header.eom);
        assert_eq!(frame.header.seq, 0);
        assert!(frame.header.to);
        assert_eq!(frame.header.dest.0, 9);
    }
}

#[test]
fn parse_build_round_trip() {
    setup();

    let mut builder = FrameBuilder::new();
    let packet = builder.build_single(Eid(3), MCTP_TYPE_NVME, &[0xaa, 0xbb, 0xcc], true);

    let frame = parse(&packet).unwrap();
    let mut rebuilt_builder = FrameBuilder::with_addresses(frame.dest_addr, frame.src_addr);
    rebuilt_builder.set_src_eid(frame.header.src);
    let params = FrameParams {
        dest_eid: frame.header.dest,
        msg_type: MsgType(frame.msg_type),
        ic: frame.ic,
        som: frame.header.som,
        eom: frame.header.eom,
        seq: frame.header.seq,
        to: frame.header.to,
        tag: frame.header.tag,
    };
    let rebuilt = rebuilt_builder.build_raw(&params, &frame.payload, frame.mic);
    assert_eq!(rebuilt, packet);
}

#[test]
fn every_bit_flip_is_detected() {
    setup();

    let mut builder = FrameBuilder::new();
    for ic in [false, true] {
        let packet = builder.build_single(Eid(0), MCTP_TYPE_NVME, &[0x01, 0x01, 0x00, 0x00], ic);
        for byte in 0..packet.len() {
            for bit in 0..8 {
                let mut corrupt = packet.clone();
                corrupt[byte] ^= 1 << bit;
                let err = parse(&corrupt).expect_err("corruption must not parse");
                assert!(
                    matches!(err.kind(), ErrorKind::Integrity | ErrorKind::Framing),
                    "byte {byte} bit {bit}: unexpected {err:?}"
                );
            }
        }
    }
}

#[test]
fn short_packet_rejected() {
    setup();

    let mut builder = FrameBuilder::new();
    let packet = builder.build_single(Eid(0), MCTP_TYPE_NVME, &[], false);
    assert!(matches!(
        parse(&packet[..5]),
        Err(Error::ShortPacket { len: 5 })
    ));
}

#[test]
fn wrong_command_code_rejected() {
    setup();

    let mut builder = FrameBuilder::new();
    let mut packet = builder.build_single(Eid(0), MCTP_TYPE_NVME, &[0x00], false);
    packet[1] = 0x0e;
    let len = packet.len();
    packet[len - 1] = pec(&packet[..len - 1]);
    assert!(matches!(parse(&packet), Err(Error::WrongCommandCode(0x0e))));
}

#[test]
fn bad_version_rejected() {
    setup();

    let mut builder = FrameBuilder::new();
    let mut packet = builder.build_single(Eid(0), MCTP_TYPE_NVME, &[0x00], false);
    packet[4] = 0x02;
    let len = packet.len();
    packet[len - 1] = pec(&packet[..len - 1]);
    assert!(matches!(parse(&packet), Err(Error::BadVersion(2))));
}

#[test]
fn reserved_bits_rejected() {
    setup();

    let mut builder = FrameBuilder::new();
    let mut packet = builder.build_single(Eid(0), MCTP_TYPE_NVME, &[0x00], false);
    packet[4] |= 0x10;
    let len = packet.len();
    packet[len - 1] = pec(&packet[..len - 1]);
    assert!(matches!(parse(&packet), Err(Error::ReservedBitsSet)));
}

#[test]
fn corrupt_payload_with_fixed_pec_fails_mic() {
    setup();

    let mut builder = FrameBuilder::new();
    let mut packet = builder.build_single(Eid(0), MCTP_TYPE_NVME, &[0x11, 0x22, 0x33], true);
    // Corrupt a payload byte, then repair the PEC so only the MIC can
    // catch it.
    packet[10] ^= 0xff;
    let len = packet.len();
    packet[len - 1] = pec(&packet[..len - 1]);
    assert!(matches!(parse(&packet), Err(Error::BadMic { .. })));
}

#[test]
fn tags_advance_per_message() {
    setup();

    let mut builder = FrameBuilder::new();
    for expected in [0u8, 1, 2, 3, 4, 5, 6, 7, 0] {
        let packet = builder.build_single(Eid(0), MCTP_TYPE_NVME, &[], false);
        let frame = parse(&packet).unwrap();
        assert_eq!(frame.header.tag.0, expected);
    }
}
