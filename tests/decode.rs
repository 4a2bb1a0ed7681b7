// SPDX-License-Identifier: GPL-3.0-only
/*
 * Copyright (c) 2025 Code Construct
 */
use deku::DekuContainerWrite;

use nvme_mi_host::nvme_mi::decode::{
    decode_response, decode_with, IdentifyControllerDecoder, SmartLogDecoder,
};
use nvme_mi_host::nvme_mi::layout::{pad_ascii, IdentifyControllerPrefix, SmartLog};
use nvme_mi_host::nvme_mi::registry::DecoderRegistry;
use nvme_mi_host::nvme_mi::MessageKind;

mod common;
use common::setup;

fn mi_response(opcode: u8, data: &[u8]) -> Vec<u8> {
    let mut payload = vec![MessageKind::Mi.response_byte(), opcode, 0x00, 0x00];
    payload.extend_from_slice(data);
    payload
}

fn admin_response(opcode: u8, body: &[u8]) -> Vec<u8> {
    let mut payload = vec![
        MessageKind::Admin.response_byte(),
        opcode,
        0x00,
        0x00,
        0x00,
        0x00,
        0x00,
        0x00,
    ];
    payload.extend_from_slice(body);
    payload
}

#[test]
fn health_poll_twelve_layout() {
    setup();

    // status, NSS, warnings, ctemp = 297 K, PDLU, spare, reserved to 20.
    #[rustfmt::skip]
    let data: [u8; 20] = [
        0x00, 0x08, 0x00,
        0x29, 0x01,
        0x05, 0x5a,
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    ];
    let registry = DecoderRegistry::with_builtin();
    let resp = decode_response(&mi_response(0x01, &data), &registry, None, false).unwrap();

    assert!(resp.success);
    assert_eq!(resp.status, 0);
    assert_eq!(resp.value("Composite Temperature").as_deref(), Some("24°C"));
    assert_eq!(resp.value("Drive Life Used").as_deref(), Some("5%"));
    assert_eq!(resp.value("Available Spare").as_deref(), Some("90%"));
    assert_eq!(resp.value("SMART Warnings").as_deref(), Some("None"));
    // No 2.x fields on a 20-byte response.
    assert!(resp.get("Endurance Group Warning").is_none());

    // Raw spans cover the decoded bytes.
    let temp = resp.get("Composite Temperature").unwrap();
    assert_eq!(temp.raw, vec![0x29, 0x01]);
}

#[test]
fn health_poll_extended_layout_by_length() {
    setup();

    let mut data = vec![0u8; 32];
    data[3] = 0x2c; // 300 K
    data[4] = 0x01;
    data[20] = 0x01; // endurance group warning
    let registry = DecoderRegistry::with_builtin();
    let resp = decode_response(&mi_response(0x01, &data), &registry, None, false).unwrap();

    assert_eq!(resp.value("Composite Temperature").as_deref(), Some("27°C"));
    assert_eq!(
        resp.value("Endurance Group Warning").as_deref(),
        Some("0x00000001")
    );
}

#[test]
fn warnings_are_spelled_out() {
    setup();

    let mut data = vec![0u8; 20];
    data[2] = 0x03;
    data[3] = 0x2a;
    data[4] = 0x01;
    let registry = DecoderRegistry::with_builtin();
    let resp = decode_response(&mi_response(0x01, &data), &registry, None, false).unwrap();
    assert_eq!(
        resp.value("SMART Warnings").as_deref(),
        Some("Spare Below Threshold, Temperature Exceeded")
    );
}

#[test]
fn percentages_above_one_hundred_pass_through() {
    setup();

    let mut data = vec![0u8; 20];
    data[3] = 0x2a;
    data[4] = 0x01;
    data[5] = 120; // drive life used beyond 100%
    let registry = DecoderRegistry::with_builtin();
    let resp = decode_response(&mi_response(0x01, &data), &registry, None, false).unwrap();
    assert_eq!(resp.value("Drive Life Used").as_deref(), Some("120%"));
}

#[test]
fn sub_zero_temperatures_render_negative() {
    setup();

    let mut data = vec![0u8; 20];
    data[3] = 0x07; // 263 K = -10°C
    data[4] = 0x01;
    let registry = DecoderRegistry::with_builtin();
    let resp = decode_response(&mi_response(0x01, &data), &registry, None, false).unwrap();
    assert_eq!(resp.value("Composite Temperature").as_deref(), Some("-10°C"));
}

#[test]
fn smart_log_temperature_and_spare() {
    setup();

    // Composite temperature bytes 1-2 = 0x0129 (297 K), spare byte 3.
    let log = SmartLog {
        ctemp: 0x0129,
        avsp: 0x5a,
        avspt: 0x0a,
        pused: 0x07,
        poh: 1337,
        ..SmartLog::default()
    };
    let payload = admin_response(0x02, &log.to_bytes().unwrap());
    let resp = decode_with(&payload, &SmartLogDecoder).unwrap();

    assert!(resp.success);
    assert_eq!(resp.value("Composite Temperature").as_deref(), Some("24°C"));
    assert_eq!(resp.value("Available Spare").as_deref(), Some("90%"));
    assert_eq!(resp.value("Available Spare Threshold").as_deref(), Some("10%"));
    assert_eq!(resp.value("Percentage Used").as_deref(), Some("7%"));
    assert_eq!(resp.value("Power On Hours").as_deref(), Some("1337"));
}

#[test]
fn truncated_smart_log_is_partial() {
    setup();

    let payload = admin_response(0x02, &[0u8; 100]);
    let resp = decode_with(&payload, &SmartLogDecoder).unwrap();
    assert!(resp.success);
    assert!(resp.partial);
    // The status field survived.
    assert_eq!(resp.field_count(), 1);
}

#[test]
fn identify_controller_strings_are_trimmed() {
    setup();

    let mut body = IdentifyControllerPrefix {
        vid: 0x1b36,
        ssvid: 0x1b36,
        sn: pad_ascii("S4ABC123  "),
        mn: pad_ascii("Example NVMe Drive"),
        fr: pad_ascii("2.1b"),
    }
    .to_bytes()
    .unwrap();
    body.resize(4096, 0);
    let payload = admin_response(0x06, &body);
    let resp = decode_with(&payload, &IdentifyControllerDecoder).unwrap();

    assert_eq!(resp.value("Serial Number").as_deref(), Some("S4ABC123"));
    assert_eq!(
        resp.value("Model Number").as_deref(),
        Some("Example NVMe Drive")
    );
    assert_eq!(resp.value("Firmware Revision").as_deref(), Some("2.1b"));
    assert_eq!(resp.value("PCI Vendor ID").as_deref(), Some("0x1b36"));
}

#[test]
fn protocol_failure_keeps_status_code() {
    setup();

    let registry = DecoderRegistry::with_builtin();
    let resp =
        decode_response(&mi_response(0x01, &[0x04, 0xff]), &registry, None, false).unwrap();
    assert!(!resp.success);
    assert_eq!(resp.status, 0x04);
    assert_eq!(resp.value("Status").as_deref(), Some("Invalid Parameter"));
}

#[test]
fn json_export_keeps_field_order_and_raw_spans() {
    setup();

    let mut data = vec![0u8; 20];
    data[3] = 0x29;
    data[4] = 0x01;
    let registry = DecoderRegistry::with_builtin();
    let resp = decode_response(&mi_response(0x01, &data), &registry, None, false).unwrap();
    let json = resp.to_json();

    let keys: Vec<&String> = json["fields"].as_object().unwrap().keys().collect();
    assert_eq!(
        keys,
        [
            "Status",
            "NVM Subsystem Status",
            "SMART Warnings",
            "Composite Temperature",
            "Drive Life Used",
            "Available Spare",
        ]
    );
    assert_eq!(
        json["fields"]["Composite Temperature"]["raw"],
        serde_json::json!("2901")
    );
}
