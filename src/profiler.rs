// SPDX-License-Identifier: GPL-3.0-only
/*
 * Copyright (c) 2025 Code Construct
 */

//! Device profiling: a curated, read-only probe sweep persisted as JSON.
//!
//! A profile captures request/response payloads, per-command latency and
//! a replay table keyed by request fingerprint. The mock endpoint loads
//! profiles to answer with real captured bytes, which makes regression
//! suites built on captures and on the synthetic mock interchangeable.
//!
//! The sweep is closed: only the hard-coded read-only commands below are
//! ever issued. Nothing here writes to a device.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::nvme_mi::client::MiClient;
use crate::nvme_mi::layout::MessageHeader;
use crate::nvme_mi::response::{from_hex, to_hex, DecodedResponse};
use crate::nvme_mi::{ConfigId, MessageKind, MiOpcode, ADMIN_GET_LOG_PAGE, ADMIN_IDENTIFY};
use crate::transport::Transport;
use crate::{Error, Result};

pub const PROFILE_VERSION: &str = "1.0";

/// VPD is pulled in chunks of this size until the device reports
/// end-of-data.
pub const VPD_CHUNK: u16 = 32;

/// MI opcodes the sweep may issue. Closed list; everything is read-only.
const ALLOWED_MI_OPCODES: [u8; 5] = [0x00, 0x01, 0x02, 0x04, 0x05];

/// Tunneled Admin opcodes the sweep may issue.
const ALLOWED_ADMIN_OPCODES: [u8; 2] = [ADMIN_GET_LOG_PAGE, ADMIN_IDENTIFY];

/// Canonical (opcode, parameter) extraction from a request payload.
///
/// Both the profiler (when recording) and the mock (when replaying)
/// derive fingerprints through this one function, so the two sides can
/// never disagree on the key.
pub fn request_params(payload: &[u8]) -> Option<(u8, BTreeMap<String, String>)> {
    if payload.len() < MessageHeader::LEN {
        return None;
    }
    let opcode = payload[1];
    let data = &payload[MessageHeader::LEN..];
    let mut params = BTreeMap::new();

    match MessageKind::from_nmimt(payload[0] & 0x7f)? {
        MessageKind::Mi => match MiOpcode::try_from(opcode) {
            Ok(MiOpcode::ReadDataStructure) if data.len() >= 2 => {
                params.insert("dtyp".to_string(), format!("{:#04x}", data[0]));
                params.insert("id".to_string(), data[1].to_string());
            }
            Ok(MiOpcode::ControllerHealthStatusPoll) if data.len() >= 2 => {
                let ctlid = u16::from_le_bytes([data[0], data[1]]);
                params.insert("ctlid".to_string(), ctlid.to_string());
            }
            Ok(MiOpcode::ConfigurationGet) if data.len() >= 2 => {
                params.insert("cfg".to_string(), format!("{:#04x}", data[0]));
                params.insert("port".to_string(), data[1].to_string());
            }
            Ok(MiOpcode::VpdRead) if data.len() >= 4 => {
                let offset = u16::from_le_bytes([data[0], data[1]]);
                let length = u16::from_le_bytes([data[2], data[3]]);
                params.insert("offset".to_string(), offset.to_string());
                params.insert("length".to_string(), length.to_string());
            }
            _ => (),
        },
        MessageKind::Admin => {
            if data.len() >= 4 + 14 * 4 {
                let cdw10 = u32::from_le_bytes([data[36], data[37], data[38], data[39]]);
                match opcode {
                    ADMIN_IDENTIFY => {
                        params.insert("cns".to_string(), format!("{:#04x}", cdw10 & 0xff));
                        params.insert("cntid".to_string(), (cdw10 >> 16).to_string());
                    }
                    ADMIN_GET_LOG_PAGE => {
                        params.insert("lid".to_string(), format!("{:#04x}", cdw10 & 0xff));
                        params.insert("numdl".to_string(), (cdw10 >> 16).to_string());
                    }
                    _ => {
                        params.insert("cdw10".to_string(), format!("{cdw10:#010x}"));
                    }
                }
            }
        }
    }
    Some((opcode, params))
}

/// Fingerprint: opcode in hex, then the sorted `k=v` parameter pairs.
pub fn fingerprint(opcode: u8, params: &BTreeMap<String, String>) -> String {
    let kv: Vec<String> = params.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!("{opcode:02x}:{}", kv.join(","))
}

/// Fingerprint straight from a request payload.
pub fn request_fingerprint(payload: &[u8]) -> Option<String> {
    let (opcode, params) = request_params(payload)?;
    Some(fingerprint(opcode, &params))
}

fn default_true() -> bool {
    true
}

/// One captured command exchange.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CapturedCommand {
    pub opcode: u8,
    pub params: BTreeMap<String, String>,
    pub request_hex: String,
    pub response_hex: String,
    pub latency_ms: f64,
    pub timestamp: String,
    #[serde(default = "default_true")]
    pub success: bool,
}

impl CapturedCommand {
    pub fn request_bytes(&self) -> Option<Vec<u8>> {
        from_hex(&self.request_hex)
    }

    pub fn response_bytes(&self) -> Option<Vec<u8>> {
        from_hex(&self.response_hex)
    }

    pub fn fingerprint(&self) -> String {
        fingerprint(self.opcode, &self.params)
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ProfileMetadata {
    pub serial_number: Option<String>,
    pub model_number: Option<String>,
    pub firmware_revision: Option<String>,
    pub nvme_mi_major_version: u8,
    pub nvme_mi_minor_version: u8,
    pub capture_date: String,
    pub total_commands: usize,
    pub avg_latency_ms: f64,
}

/// A captured device profile (schema version 1.0).
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DeviceProfile {
    pub profile_name: String,
    pub profile_version: String,
    pub metadata: ProfileMetadata,
    pub health_commands: Vec<CapturedCommand>,
    pub data_structure_commands: Vec<CapturedCommand>,
    pub configuration_commands: Vec<CapturedCommand>,
    pub vpd_commands: Vec<CapturedCommand>,
    /// Tunneled Admin captures; absent in minimal profiles.
    #[serde(default)]
    pub admin_commands: Vec<CapturedCommand>,
    pub response_table: BTreeMap<String, String>,
}

impl DeviceProfile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            profile_name: name.into(),
            profile_version: PROFILE_VERSION.to_string(),
            metadata: ProfileMetadata::default(),
            health_commands: Vec::new(),
            data_structure_commands: Vec::new(),
            configuration_commands: Vec::new(),
            vpd_commands: Vec::new(),
            admin_commands: Vec::new(),
            response_table: BTreeMap::new(),
        }
    }

    pub fn all_commands(&self) -> impl Iterator<Item = &CapturedCommand> {
        self.health_commands
            .iter()
            .chain(&self.data_structure_commands)
            .chain(&self.configuration_commands)
            .chain(&self.vpd_commands)
            .chain(&self.admin_commands)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        JsonFileSink::new(path.as_ref()).write(self)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        let profile: Self = serde_json::from_str(&text)
            .map_err(|e| Error::Usage(format!("unparseable profile: {e}")))?;
        if profile.profile_version != PROFILE_VERSION {
            warn!(
                "profile version {} differs from supported {}",
                profile.profile_version, PROFILE_VERSION
            );
        }
        Ok(profile)
    }

    /// Multi-line capture overview.
    pub fn summary(&self) -> String {
        let meta = &self.metadata;
        let mut out = format!(
            "Profile: {}\n\
             Model: {}\n\
             Serial: {}\n\
             Firmware: {}\n\
             NVMe-MI: {}.{}\n\
             Captured: {}\n",
            self.profile_name,
            meta.model_number.as_deref().unwrap_or("Unknown"),
            meta.serial_number.as_deref().unwrap_or("Unknown"),
            meta.firmware_revision.as_deref().unwrap_or("Unknown"),
            meta.nvme_mi_major_version,
            meta.nvme_mi_minor_version,
            meta.capture_date,
        );
        out.push_str(&format!(
            "Commands: {} total ({} health, {} data structure, {} configuration, {} VPD, {} admin)\n",
            meta.total_commands,
            self.health_commands.len(),
            self.data_structure_commands.len(),
            self.configuration_commands.len(),
            self.vpd_commands.len(),
            self.admin_commands.len(),
        ));
        out.push_str(&format!("Average latency: {:.2} ms\n", meta.avg_latency_ms));
        out
    }

    /// Replay every captured request against a mock seeded with this
    /// profile's response table and compare the responses byte for byte.
    pub fn verify(&self) -> Result<VerifyReport> {
        let mock = crate::transport::mock::MockTransport::from_profile(self);
        let mut client = MiClient::new(mock, 0);

        let mut report = VerifyReport::default();
        for command in self.all_commands().filter(|c| c.success) {
            let (Some(request), Some(expected)) =
                (command.request_bytes(), command.response_bytes())
            else {
                report.failed.push(command.fingerprint());
                continue;
            };
            match client.execute_payload(request) {
                Ok(response) if response == expected => report.passed += 1,
                Ok(_) | Err(_) => report.failed.push(command.fingerprint()),
            }
        }
        Ok(report)
    }

    /// Compare command coverage and latency against another profile.
    pub fn compare(&self, other: &DeviceProfile) -> ProfileComparison {
        let ours: BTreeMap<String, &CapturedCommand> = self
            .all_commands()
            .filter(|c| c.success)
            .map(|c| (c.fingerprint(), c))
            .collect();
        let theirs: BTreeMap<String, &CapturedCommand> = other
            .all_commands()
            .filter(|c| c.success)
            .map(|c| (c.fingerprint(), c))
            .collect();

        let mut comparison = ProfileComparison::default();
        for (fp, command) in &ours {
            match theirs.get(fp) {
                Some(theirs_cmd) => comparison.common.push(LatencyDelta {
                    fingerprint: fp.clone(),
                    first_ms: command.latency_ms,
                    second_ms: theirs_cmd.latency_ms,
                }),
                None => comparison.only_first.push(fp.clone()),
            }
        }
        for fp in theirs.keys() {
            if !ours.contains_key(fp) {
                comparison.only_second.push(fp.clone());
            }
        }
        comparison
    }
}

#[derive(Debug, Default)]
pub struct VerifyReport {
    pub passed: usize,
    pub failed: Vec<String>,
}

impl VerifyReport {
    pub fn ok(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Clone, Debug)]
pub struct LatencyDelta {
    pub fingerprint: String,
    pub first_ms: f64,
    pub second_ms: f64,
}

#[derive(Debug, Default)]
pub struct ProfileComparison {
    pub common: Vec<LatencyDelta>,
    pub only_first: Vec<String>,
    pub only_second: Vec<String>,
}

impl std::fmt::Display for ProfileComparison {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Common commands: {}", self.common.len())?;
        writeln!(f, "Only in first: {}", self.only_first.len())?;
        for fp in &self.only_first {
            writeln!(f, "  - {fp}")?;
        }
        writeln!(f, "Only in second: {}", self.only_second.len())?;
        for fp in &self.only_second {
            writeln!(f, "  - {fp}")?;
        }
        for delta in &self.common {
            writeln!(
                f,
                "  {:<32} {:>8.1} ms {:>8.1} ms {:>+8.1} ms",
                delta.fingerprint,
                delta.first_ms,
                delta.second_ms,
                delta.second_ms - delta.first_ms,
            )?;
        }
        Ok(())
    }
}

/// Where a finished profile goes.
pub trait ProfileSink {
    fn write(&mut self, profile: &DeviceProfile) -> Result<()>;
}

/// Default sink: pretty-printed JSON at a path.
pub struct JsonFileSink {
    path: PathBuf,
}

impl JsonFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ProfileSink for JsonFileSink {
    fn write(&mut self, profile: &DeviceProfile) -> Result<()> {
        let text = serde_json::to_string_pretty(profile)
            .map_err(|e| Error::Usage(format!("profile serialization failed: {e}")))?;
        fs::write(&self.path, text)?;
        info!("profile written to {}", self.path.display());
        Ok(())
    }
}

/// What the sweep covers and how it paces itself.
#[derive(Clone, Debug)]
pub struct CaptureConfig {
    pub capture_health: bool,
    pub capture_data_structures: bool,
    pub capture_configuration: bool,
    pub capture_vpd: bool,
    pub capture_admin: bool,
    /// Pause between successive commands.
    pub command_delay: Duration,
    /// Per-command response deadline.
    pub timeout: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            capture_health: true,
            capture_data_structures: true,
            capture_configuration: true,
            capture_vpd: true,
            capture_admin: true,
            command_delay: Duration::from_millis(50),
            timeout: Duration::from_secs(3),
        }
    }
}

enum Category {
    Health,
    DataStructure,
    Configuration,
    Vpd,
    Admin,
}

/// Runs the sweep over a client and assembles the profile.
pub struct DeviceProfiler<T: Transport> {
    client: MiClient<T>,
    config: CaptureConfig,
}

impl<T: Transport> DeviceProfiler<T> {
    pub fn new(transport: T, dest_eid: u8, config: CaptureConfig) -> Self {
        let mut client = MiClient::new(transport, dest_eid);
        client.set_timeout(config.timeout);
        Self { client, config }
    }

    pub fn into_client(self) -> MiClient<T> {
        self.client
    }

    /// Record one exchange into the given category.
    ///
    /// Protocol-level failures (non-zero status) are captured with
    /// `success = false`; transport failures abort the sweep.
    fn record(
        &mut self,
        profile: &mut DeviceProfile,
        category: Category,
        run: impl FnOnce(&mut MiClient<T>) -> Result<DecodedResponse>,
    ) -> Result<Option<DecodedResponse>> {
        sleep(self.config.command_delay);
        let response = match run(&mut self.client) {
            Ok(response) => response,
            Err(err) if err.kind() == crate::ErrorKind::Timeout => {
                debug!("command timed out during capture: {err}");
                return Ok(None);
            }
            Err(err) => return Err(err),
        };

        let Some(exchange) = self.client.last_exchange() else {
            return Ok(Some(response));
        };

        let (opcode, params) =
            request_params(&exchange.request_payload).unwrap_or((0, BTreeMap::new()));
        debug_assert!(
            ALLOWED_MI_OPCODES.contains(&opcode) || ALLOWED_ADMIN_OPCODES.contains(&opcode),
            "profiler issued an opcode outside its allowed list: {opcode:#04x}"
        );

        let command = CapturedCommand {
            opcode,
            params: params.clone(),
            request_hex: to_hex(&exchange.request_payload),
            response_hex: to_hex(&exchange.response_payload),
            latency_ms: exchange.latency.as_secs_f64() * 1e3,
            timestamp: chrono::Utc::now().to_rfc3339(),
            success: response.success,
        };

        if response.success {
            profile
                .response_table
                .insert(fingerprint(opcode, &params), command.response_hex.clone());
        }

        match category {
            Category::Health => profile.health_commands.push(command),
            Category::DataStructure => profile.data_structure_commands.push(command),
            Category::Configuration => profile.configuration_commands.push(command),
            Category::Vpd => profile.vpd_commands.push(command),
            Category::Admin => profile.admin_commands.push(command),
        }
        Ok(Some(response))
    }

    /// Run the full read-only sweep.
    pub fn capture_full_profile(&mut self, name: impl Into<String>) -> Result<DeviceProfile> {
        let mut profile = DeviceProfile::new(name);
        profile.metadata.capture_date = chrono::Utc::now().to_rfc3339();

        let mut controller_ids: Vec<u16> = Vec::new();

        if self.config.capture_health {
            info!("capturing subsystem health");
            self.record(&mut profile, Category::Health, |c| c.health_status_poll())?;
        }

        if self.config.capture_data_structures {
            info!("capturing data structures");
            let list = self.record(&mut profile, Category::DataStructure, |c| {
                c.get_controller_list()
            })?;
            if let Some(list) = list {
                if let Some(field) = list.get("Controller IDs") {
                    if let crate::nvme_mi::response::FieldValue::List(ids) = &field.value {
                        controller_ids = ids.clone();
                    }
                }
            }

            if self.config.capture_health {
                for ctlid in controller_ids.clone() {
                    self.record(&mut profile, Category::Health, |c| {
                        c.controller_health_status(ctlid)
                    })?;
                }
            }

            let info = self.record(&mut profile, Category::DataStructure, |c| {
                c.get_subsystem_info()
            })?;
            if let Some(info) = info {
                if let Some(version) = info.value("NVMe-MI Version") {
                    let mut parts = version.split('.');
                    profile.metadata.nvme_mi_major_version = parts
                        .next()
                        .and_then(|p| p.parse().ok())
                        .unwrap_or_default();
                    profile.metadata.nvme_mi_minor_version = parts
                        .next()
                        .and_then(|p| p.parse().ok())
                        .unwrap_or_default();
                }
            }

            self.record(&mut profile, Category::DataStructure, |c| c.get_port_info(0))?;
        }

        if self.config.capture_configuration {
            info!("capturing configuration");
            for config in [
                ConfigId::SmbusFrequency,
                ConfigId::HealthStatusChange,
                ConfigId::MctpTransmissionUnit,
            ] {
                self.record(&mut profile, Category::Configuration, |c| {
                    c.configuration_get(config, 0)
                })?;
            }
        }

        if self.config.capture_vpd {
            info!("capturing VPD");
            let mut offset = 0u16;
            loop {
                let response = self.record(&mut profile, Category::Vpd, |c| {
                    c.vpd_read(offset, VPD_CHUNK)
                })?;
                let Some(response) = response else { break };
                if !response.success {
                    break;
                }
                let chunk = response
                    .get("VPD Data")
                    .map(|f| f.raw.len())
                    .unwrap_or_default();
                if chunk < VPD_CHUNK as usize {
                    break;
                }
                offset = offset.saturating_add(VPD_CHUNK);
            }
        }

        if self.config.capture_admin {
            info!("capturing tunneled admin commands");
            let identify = self.record(&mut profile, Category::Admin, |c| {
                c.identify_controller()
            })?;
            if let Some(identify) = identify {
                profile.metadata.serial_number = identify.value("Serial Number");
                profile.metadata.model_number = identify.value("Model Number");
                profile.metadata.firmware_revision = identify.value("Firmware Revision");
            }
            self.record(&mut profile, Category::Admin, |c| c.get_smart_log())?;
        }

        profile.metadata.total_commands = profile.all_commands().count();
        let latencies: Vec<f64> = profile.all_commands().map(|c| c.latency_ms).collect();
        if !latencies.is_empty() {
            profile.metadata.avg_latency_ms =
                latencies.iter().sum::<f64>() / latencies.len() as f64;
        }

        Ok(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nvme_mi::request::{AdminRequest, MiRequest};

    #[test]
    fn fingerprint_format() {
        let mut params = BTreeMap::new();
        params.insert("dtyp".to_string(), "0x02".to_string());
        params.insert("id".to_string(), "0".to_string());
        assert_eq!(fingerprint(0x00, &params), "00:dtyp=0x02,id=0");
        assert_eq!(fingerprint(0x01, &BTreeMap::new()), "01:");
    }

    #[test]
    fn params_from_mi_request() {
        let payload = MiRequest::vpd_read(64, 32).pack();
        let (opcode, params) = request_params(&payload).unwrap();
        assert_eq!(opcode, 0x05);
        assert_eq!(params["offset"], "64");
        assert_eq!(params["length"], "32");
    }

    #[test]
    fn params_from_admin_request() {
        let payload = AdminRequest::get_log_page(0x02, 128, 0, u32::MAX, false).pack();
        let (opcode, params) = request_params(&payload).unwrap();
        assert_eq!(opcode, 0x02);
        assert_eq!(params["lid"], "0x02");
    }
}
