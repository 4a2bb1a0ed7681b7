// SPDX-License-Identifier: GPL-3.0-only
/*
 * Copyright (c) 2025 Code Construct
 */
#![allow(dead_code)]

use log::LevelFilter;
use nvme_mi_host::transport::mock::{MockDeviceState, MockTransport};
use nvme_mi_host::MiClient;
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};

pub fn setup() {
    let _ = TermLogger::init(
        LevelFilter::Debug,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    );
}

/// A client over a default mock device.
pub fn mock_client() -> MiClient<MockTransport> {
    MiClient::new(MockTransport::new(), 0)
}

/// A client over a mock reporting NVMe-MI 2.0 (32-byte health layouts).
pub fn mock_client_v2() -> MiClient<MockTransport> {
    let state = MockDeviceState {
        mi_version: (2, 0),
        ..MockDeviceState::default()
    };
    MiClient::new(MockTransport::with_state(state), 0)
}
