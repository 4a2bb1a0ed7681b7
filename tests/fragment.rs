// SPDX-License-Identifier: GPL-3.0-only
/*
 * Copyright (c) 2025 Code Construct
 */
use std::thread::sleep;
use std::time::Duration;

use mctp::{Eid, MCTP_TYPE_NVME};

use nvme_mi_host::integrity::pec;
use nvme_mi_host::mctp_smbus::fragment::{fragment, Reassembler};
use nvme_mi_host::mctp_smbus::frame::parse;
use nvme_mi_host::mctp_smbus::MAX_TX_PAYLOAD;
use nvme_mi_host::{Error, ErrorKind};

mod common;
use common::setup;

fn payload_of(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i & 0xff) as u8).collect()
}

#[test]
fn three_hundred_bytes_make_three_fragments() {
    setup();

    let payload = payload_of(300);
    let mut builder = nvme_mi_host::mctp_smbus::frame::FrameBuilder::new();
    let message = fragment(&mut builder, Eid(0), MCTP_TYPE_NVME, &payload, false);

    assert_eq!(message.fragments.len(), 3);
    let chunk_lens: Vec<usize> = message
        .fragments
        .iter()
        // dest, cmd, count, src + header + msg type ... PEC
        .map(|f| f.bytes.len() - 10)
        .collect();
    assert_eq!(chunk_lens, [120, 120, 60]);

    // Flags: SOM on the first fragment only, EOM on the last only, seq
    // advancing, TO set throughout, tag 0.
    let flags: Vec<u8> = message.fragments.iter().map(|f| f.bytes[7]).collect();
    assert_eq!(flags, [0x88, 0x18, 0x68]);

    let mut reassembler = Reassembler::new();
    let mut result = None;
    for packet in message.packets() {
        result = reassembler.push(&parse(packet).unwrap()).unwrap();
    }
    assert_eq!(result.unwrap().payload, payload);
}

#[test]
fn fragment_count_is_ceiling_of_chunks() {
    setup();

    let mut builder = nvme_mi_host::mctp_smbus::frame::FrameBuilder::new();
    for (len, expected) in [(0, 1), (1, 1), (120, 1), (121, 2), (240, 2), (241, 3)] {
        let message = fragment(
            &mut builder,
            Eid(0),
            MCTP_TYPE_NVME,
            &payload_of(len),
            false,
        );
        assert_eq!(message.fragments.len(), expected, "payload of {len}");

        let soms = message.fragments.iter().filter(|f| f.som).count();
        let eoms = message.fragments.iter().filter(|f| f.eom).count();
        assert_eq!((soms, eoms), (1, 1));
    }
}

#[test]
fn sequence_numbers_wrap_modulo_four() {
    setup();

    let payload = payload_of(MAX_TX_PAYLOAD * 5 + 1);
    let mut builder = nvme_mi_host::mctp_smbus::frame::FrameBuilder::new();
    let message = fragment(&mut builder, Eid(0), MCTP_TYPE_NVME, &payload, false);

    let seqs: Vec<u8> = message.fragments.iter().map(|f| f.seq).collect();
    assert_eq!(seqs, [0, 1, 2, 3, 0, 1]);

    // Same (TO, tag) across every fragment of the message.
    for fragment in &message.fragments {
        let frame = parse(&fragment.bytes).unwrap();
        assert!(frame.header.to);
        assert_eq!(frame.header.tag.0, message.tag.0);
    }

    let mut reassembler = Reassembler::new();
    let mut result = None;
    for packet in message.packets() {
        result = reassembler.push(&parse(packet).unwrap()).unwrap();
    }
    assert_eq!(result.unwrap().payload, payload);
}

#[test]
fn fragmented_mic_verified_on_reassembly() {
    setup();

    let payload = payload_of(250);
    let mut builder = nvme_mi_host::mctp_smbus::frame::FrameBuilder::new();
    let message = fragment(&mut builder, Eid(0), MCTP_TYPE_NVME, &payload, true);

    // Only the final fragment carries the MIC.
    let counts: Vec<u8> = message.fragments.iter().map(|f| f.bytes[2]).collect();
    assert_eq!(counts, [125, 125, 19]);

    let mut reassembler = Reassembler::new();
    let mut result = None;
    for packet in message.packets() {
        result = reassembler.push(&parse(packet).unwrap()).unwrap();
    }
    let complete = result.unwrap();
    assert!(complete.ic);
    assert_eq!(complete.payload, payload);
}

#[test]
fn corrupted_middle_fragment_fails_message_mic() {
    setup();

    let payload = payload_of(250);
    let mut builder = nvme_mi_host::mctp_smbus::frame::FrameBuilder::new();
    let message = fragment(&mut builder, Eid(0), MCTP_TYPE_NVME, &payload, true);

    let mut packets: Vec<Vec<u8>> = message.packets().map(|p| p.to_vec()).collect();
    // Corrupt a payload byte of the middle fragment and repair its PEC;
    // only the end-of-message MIC can catch this.
    packets[1][20] ^= 0x01;
    let len = packets[1].len();
    packets[1][len - 1] = pec(&packets[1][..len - 1]);

    let mut reassembler = Reassembler::new();
    assert!(reassembler.push(&parse(&packets[0]).unwrap()).unwrap().is_none());
    assert!(reassembler.push(&parse(&packets[1]).unwrap()).unwrap().is_none());
    let err = reassembler.push(&parse(&packets[2]).unwrap()).unwrap_err();
    assert!(matches!(err, Error::BadMic { .. }));
}

#[test]
fn sequence_gap_detected() {
    setup();

    let payload = payload_of(300);
    let mut builder = nvme_mi_host::mctp_smbus::frame::FrameBuilder::new();
    let message = fragment(&mut builder, Eid(0), MCTP_TYPE_NVME, &payload, false);

    let mut reassembler = Reassembler::new();
    reassembler.push(&parse(&message.fragments[0].bytes).unwrap()).unwrap();
    // Skip the middle fragment.
    let err = reassembler
        .push(&parse(&message.fragments[2].bytes).unwrap())
        .unwrap_err();
    assert!(matches!(
        err,
        Error::SequenceGap {
            expected: 1,
            found: 2
        }
    ));
    // The buffer was dropped with the error.
    assert_eq!(reassembler.pending(), 0);
}

#[test]
fn som_mid_message_is_rejected() {
    setup();

    let payload = payload_of(300);
    let mut builder = nvme_mi_host::mctp_smbus::frame::FrameBuilder::new();
    let message = fragment(&mut builder, Eid(0), MCTP_TYPE_NVME, &payload, false);

    let mut reassembler = Reassembler::new();
    reassembler.push(&parse(&message.fragments[0].bytes).unwrap()).unwrap();
    let err = reassembler
        .push(&parse(&message.fragments[0].bytes).unwrap())
        .unwrap_err();
    assert!(matches!(err, Error::UnexpectedSom));
}

#[test]
fn orphan_fragment_is_rejected() {
    setup();

    let payload = payload_of(300);
    let mut builder = nvme_mi_host::mctp_smbus::frame::FrameBuilder::new();
    let message = fragment(&mut builder, Eid(0), MCTP_TYPE_NVME, &payload, false);

    let mut reassembler = Reassembler::new();
    let err = reassembler
        .push(&parse(&message.fragments[1].bytes).unwrap())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Sequencing);
}

#[test]
fn reassembly_deadline_drops_the_buffer() {
    setup();

    let payload = payload_of(300);
    let mut builder = nvme_mi_host::mctp_smbus::frame::FrameBuilder::new();
    let message = fragment(&mut builder, Eid(0), MCTP_TYPE_NVME, &payload, false);

    let mut reassembler = Reassembler::with_timeout(Duration::from_millis(10));
    reassembler.push(&parse(&message.fragments[0].bytes).unwrap()).unwrap();
    sleep(Duration::from_millis(25));
    let err = reassembler
        .push(&parse(&message.fragments[1].bytes).unwrap())
        .unwrap_err();
    assert!(matches!(err, Error::MissingEom));
    assert_eq!(reassembler.pending(), 0);
}

#[test]
fn expire_reaps_stale_buffers() {
    setup();

    let payload = payload_of(300);
    let mut builder = nvme_mi_host::mctp_smbus::frame::FrameBuilder::new();
    let message = fragment(&mut builder, Eid(0), MCTP_TYPE_NVME, &payload, false);

    let mut reassembler = Reassembler::with_timeout(Duration::from_millis(10));
    reassembler.push(&parse(&message.fragments[0].bytes).unwrap()).unwrap();
    assert_eq!(reassembler.pending(), 1);
    assert_eq!(reassembler.expire(), 0);
    sleep(Duration::from_millis(25));
    assert_eq!(reassembler.expire(), 1);
    assert_eq!(reassembler.pending(), 0);
}
