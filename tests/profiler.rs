// SPDX-License-Identifier: GPL-3.0-only
/*
 * Copyright (c) 2025 Code Construct
 */
use std::time::Duration;

use nvme_mi_host::profiler::{CaptureConfig, DeviceProfile, DeviceProfiler};
use nvme_mi_host::transport::mock::MockTransport;
use nvme_mi_host::MiClient;

mod common;
use common::setup;

fn quick_config() -> CaptureConfig {
    CaptureConfig {
        command_delay: Duration::ZERO,
        timeout: Duration::from_millis(500),
        ..CaptureConfig::default()
    }
}

fn capture_mock_profile() -> DeviceProfile {
    let mut transport = MockTransport::new();
    transport.set_temperature(40);
    let mut profiler = DeviceProfiler::new(transport, 0, quick_config());
    profiler.capture_full_profile("test-device").unwrap()
}

#[test]
fn full_sweep_populates_every_category() {
    setup();

    let profile = capture_mock_profile();

    // Subsystem poll plus one controller poll.
    assert_eq!(profile.health_commands.len(), 2);
    // Controller list, subsystem info, port info.
    assert_eq!(profile.data_structure_commands.len(), 3);
    // The three standard configuration identifiers.
    assert_eq!(profile.configuration_commands.len(), 3);
    // 128 bytes of VPD in 32-byte chunks, then the end-of-data probe.
    assert_eq!(profile.vpd_commands.len(), 5);
    // Identify Controller and the SMART log.
    assert_eq!(profile.admin_commands.len(), 2);

    assert_eq!(
        profile.metadata.total_commands,
        profile.all_commands().count()
    );
    assert!(profile.metadata.avg_latency_ms >= 0.0);
}

#[test]
fn metadata_extracted_from_device() {
    setup();

    let profile = capture_mock_profile();
    let meta = &profile.metadata;

    assert_eq!(meta.serial_number.as_deref(), Some("MOCK00012345"));
    assert_eq!(meta.model_number.as_deref(), Some("Mock NVMe SSD"));
    assert_eq!(meta.firmware_revision.as_deref(), Some("1.0.0"));
    assert_eq!(meta.nvme_mi_major_version, 1);
    assert_eq!(meta.nvme_mi_minor_version, 2);
    assert!(!meta.capture_date.is_empty());
}

#[test]
fn fingerprints_use_opcode_and_sorted_params() {
    setup();

    let profile = capture_mock_profile();

    // Health poll has no parameters.
    assert!(profile.response_table.contains_key("01:"));
    // Data structure reads carry their type discriminator.
    assert!(profile.response_table.contains_key("00:dtyp=0x00,id=0"));
    assert!(profile.response_table.contains_key("00:dtyp=0x02,id=0"));
    // VPD reads are keyed by offset and length.
    assert!(profile
        .response_table
        .contains_key("05:length=32,offset=0"));
    // The failed end-of-data probe is not in the replay table.
    assert!(!profile
        .response_table
        .contains_key("05:length=32,offset=128"));
}

#[test]
fn save_load_round_trip() {
    setup();

    let profile = capture_mock_profile();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("device_profile.json");

    profile.save(&path).unwrap();
    let loaded = DeviceProfile::load(&path).unwrap();

    assert_eq!(loaded.profile_version, "1.0");
    assert_eq!(loaded.profile_name, profile.profile_name);
    assert_eq!(loaded.metadata.serial_number, profile.metadata.serial_number);
    assert_eq!(
        loaded.all_commands().count(),
        profile.all_commands().count()
    );
    assert_eq!(loaded.response_table, profile.response_table);
}

#[test]
fn replay_verification_passes_against_mock() {
    setup();

    let profile = capture_mock_profile();
    let report = profile.verify().unwrap();
    assert!(report.ok(), "failed replays: {:?}", report.failed);
    assert!(report.passed > 0);
}

#[test]
fn mock_seeded_from_profile_replays_captures() {
    setup();

    let profile = capture_mock_profile();
    let mock = MockTransport::from_profile(&profile);
    let mut client = MiClient::new(mock, 0);

    // The capture ran with the temperature forced to 40°C; the replayed
    // bytes must reproduce it even though the fresh mock state differs.
    let resp = client.health_status_poll().unwrap();
    assert!(resp.success);
    assert_eq!(resp.value("Composite Temperature").as_deref(), Some("40°C"));
}

#[test]
fn comparison_against_self_is_clean() {
    setup();

    let profile = capture_mock_profile();
    let comparison = profile.compare(&profile);
    assert!(comparison.only_first.is_empty());
    assert!(comparison.only_second.is_empty());
    assert!(!comparison.common.is_empty());
}

#[test]
fn skip_flags_narrow_the_sweep() {
    setup();

    let config = CaptureConfig {
        capture_vpd: false,
        capture_admin: false,
        ..quick_config()
    };
    let mut profiler = DeviceProfiler::new(MockTransport::new(), 0, config);
    let profile = profiler.capture_full_profile("narrow").unwrap();

    assert!(profile.vpd_commands.is_empty());
    assert!(profile.admin_commands.is_empty());
    assert!(!profile.health_commands.is_empty());
    // Without Identify Controller there is no serial metadata.
    assert_eq!(profile.metadata.serial_number, None);
}
