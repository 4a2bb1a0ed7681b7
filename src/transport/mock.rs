// SPDX-License-Identifier: GPL-3.0-only
/*
 * Copyright (c) 2025 Code Construct
 */

//! Deterministic mock endpoint.
//!
//! A single-threaded state machine standing in for a real drive: it
//! parses each request, synthesizes a spec-shaped response from its
//! state, frames it with ROR set and the request's tag echoed, and
//! queues the packets for `receive_packet`. Responses above the
//! transmit payload limit come back as a properly sequenced fragment
//! train.
//!
//! When a response table captured from real hardware is loaded, request
//! fingerprints are looked up first and hits are replayed verbatim
//! (re-framed); synthesis is the fallback. That keeps the mock and real
//! captures behaviorally interchangeable.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use deku::DekuContainerWrite;
use log::{debug, warn};
use mctp::MCTP_TYPE_NVME;

use crate::mctp_smbus::fragment::fragment_with;
use crate::mctp_smbus::frame::{parse, FrameBuilder, ParsedFrame};
use crate::mctp_smbus::{DEFAULT_DEST_ADDR, RESPONSE_ADDR};
use crate::nvme_mi::layout::{
    pad_ascii, ControllerHealthEntry, ControllerHealthHeader, ControllerList,
    DataStructureHeader, FirmwareSlotLog, IdentifyControllerPrefix, MessageHeader, MtusConfig,
    SmartLog, SmbusFrequencyConfig, SubsystemHealthData, SubsystemHealthDataExt, SubsystemInfo,
};
use crate::nvme_mi::response::from_hex;
use crate::nvme_mi::{
    celsius_to_kelvin, MessageKind, MiOpcode, MiStatus, ADMIN_GET_FEATURES, ADMIN_GET_LOG_PAGE,
    ADMIN_IDENTIFY, ADMIN_SET_FEATURES, CNS_IDENTIFY_CONTROLLER, CNS_IDENTIFY_NAMESPACE,
    LID_ERROR_INFORMATION, LID_FIRMWARE_SLOT, LID_SMART_HEALTH,
};
use crate::profiler::{request_fingerprint, DeviceProfile};
use crate::transport::Transport;
use crate::{Error, Result};

/// Health state of one simulated controller.
#[derive(Clone, Debug)]
pub struct ControllerHealth {
    pub ctlid: u16,
    pub ready: bool,
    pub temperature_kelvin: u16,
    pub life_used: u8,
    pub available_spare: u8,
    pub critical_warning: u8,
}

impl ControllerHealth {
    pub fn new(ctlid: u16) -> Self {
        Self {
            ctlid,
            ready: true,
            temperature_kelvin: 298,
            life_used: 2,
            available_spare: 100,
            critical_warning: 0,
        }
    }
}

/// Simulated device state.
///
/// The MI version selects the 20-byte (1.2) or 32-byte (2.x) health
/// layouts; everything else feeds the corresponding response fields
/// directly.
#[derive(Clone, Debug)]
pub struct MockDeviceState {
    pub temperature_kelvin: u16,
    pub available_spare: u8,
    pub spare_threshold: u8,
    pub life_used: u8,
    pub critical_warning: u8,
    pub subsystem_status: u8,
    pub mi_version: (u8, u8),
    pub controllers: Vec<ControllerHealth>,
    pub serial_number: String,
    pub model_number: String,
    pub firmware_revision: String,
    pub pci_vendor_id: u16,
    pub num_ports: u8,
    pub mtus: u16,
    pub smbus_freq: u8,
    pub vpd: Vec<u8>,
    /// Fingerprint → captured response payload, replayed verbatim.
    pub response_table: HashMap<String, Vec<u8>>,
}

impl Default for MockDeviceState {
    fn default() -> Self {
        Self {
            temperature_kelvin: 298,
            available_spare: 100,
            spare_threshold: 10,
            life_used: 2,
            critical_warning: 0,
            // P0LA: port 0 link active
            subsystem_status: 0x08,
            mi_version: (1, 2),
            controllers: vec![ControllerHealth::new(0)],
            serial_number: "MOCK00012345".to_string(),
            model_number: "Mock NVMe SSD".to_string(),
            firmware_revision: "1.0.0".to_string(),
            pci_vendor_id: 0x1b36,
            num_ports: 2,
            mtus: 64,
            smbus_freq: 0x01,
            vpd: (0u8..128).collect(),
            response_table: HashMap::new(),
        }
    }
}

/// Loopback [`Transport`] answering from a [`MockDeviceState`].
pub struct MockTransport {
    pub state: MockDeviceState,
    builder: FrameBuilder,
    pending: VecDeque<Vec<u8>>,
    /// Every request packet seen, in order.
    pub sent_packets: Vec<Vec<u8>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self::with_state(MockDeviceState::default())
    }

    pub fn with_state(state: MockDeviceState) -> Self {
        Self {
            state,
            builder: FrameBuilder::with_addresses(RESPONSE_ADDR, DEFAULT_DEST_ADDR),
            pending: VecDeque::new(),
            sent_packets: Vec::new(),
        }
    }

    /// Seed the mock from a captured profile: metadata plus the replay
    /// table.
    pub fn from_profile(profile: &DeviceProfile) -> Self {
        let mut state = MockDeviceState::default();
        if let Some(serial) = &profile.metadata.serial_number {
            state.serial_number = serial.clone();
        }
        if let Some(model) = &profile.metadata.model_number {
            state.model_number = model.clone();
        }
        if let Some(firmware) = &profile.metadata.firmware_revision {
            state.firmware_revision = firmware.clone();
        }
        state.mi_version = (
            profile.metadata.nvme_mi_major_version,
            profile.metadata.nvme_mi_minor_version,
        );
        for (fingerprint, hex) in &profile.response_table {
            if let Some(bytes) = from_hex(hex) {
                state.response_table.insert(fingerprint.clone(), bytes);
            } else {
                warn!("unparseable response table entry for {fingerprint}");
            }
        }
        Self::with_state(state)
    }

    /// Set the composite temperature in Celsius, subsystem-wide.
    pub fn set_temperature(&mut self, celsius: i32) {
        let kelvin = celsius_to_kelvin(celsius);
        self.state.temperature_kelvin = kelvin;
        for ctlr in &mut self.state.controllers {
            ctlr.temperature_kelvin = kelvin;
        }
    }

    /// The most recent request packet.
    pub fn last_request(&self) -> Option<&[u8]> {
        self.sent_packets.last().map(|p| p.as_slice())
    }

    /// Opcode byte of the most recent request.
    pub fn last_opcode(&self) -> Option<u8> {
        let frame = parse(self.last_request()?).ok()?;
        frame.payload.get(1).copied()
    }

    fn respond(&mut self, frame: &ParsedFrame, payload: Vec<u8>) {
        self.builder.set_src_eid(frame.header.dest);
        let message = fragment_with(
            &self.builder,
            frame.header.src,
            frame.header.tag,
            false,
            MCTP_TYPE_NVME,
            &payload,
            frame.ic,
        );
        for packet in message.packets() {
            self.pending.push_back(packet.to_vec());
        }
    }

    fn respond_status(&mut self, frame: &ParsedFrame, kind: MessageKind, opcode: u8, status: MiStatus) {
        let payload = vec![kind.response_byte(), opcode, 0x00, 0x00, status as u8, 0x00, 0x00, 0x00];
        self.respond(frame, payload);
    }

    fn handle(&mut self, frame: &ParsedFrame) -> Result<()> {
        let payload = &frame.payload;
        if payload.len() < MessageHeader::LEN {
            debug!("request too short for a message header");
            return Ok(());
        }

        // Captured responses take precedence over synthesis.
        if !self.state.response_table.is_empty() {
            if let Some(fingerprint) = request_fingerprint(payload) {
                if let Some(bytes) = self.state.response_table.get(&fingerprint) {
                    let bytes = bytes.clone();
                    self.respond(frame, bytes);
                    return Ok(());
                }
            }
        }

        let opcode = payload[1];
        let data = &payload[MessageHeader::LEN..];
        match MessageKind::from_nmimt(payload[0] & 0x7f) {
            Some(MessageKind::Mi) => self.handle_mi(frame, opcode, data),
            Some(MessageKind::Admin) => self.handle_admin(frame, opcode, data),
            None => {
                debug!("unhandled NMIMT {:#04x}", payload[0]);
                Ok(())
            }
        }
    }

    fn mi_response(opcode: u8, body: &[u8]) -> Vec<u8> {
        let mut payload = vec![MessageKind::Mi.response_byte(), opcode, 0x00, 0x00];
        payload.extend_from_slice(body);
        payload
    }

    fn handle_mi(&mut self, frame: &ParsedFrame, opcode: u8, data: &[u8]) -> Result<()> {
        match MiOpcode::try_from(opcode) {
            Ok(MiOpcode::SubsystemHealthStatusPoll) => {
                let body = self.subsystem_health_body()?;
                self.respond(frame, Self::mi_response(opcode, &body));
            }
            Ok(MiOpcode::ControllerHealthStatusPoll) => {
                if data.len() < 2 {
                    self.respond_status(frame, MessageKind::Mi, opcode, MiStatus::InvalidCommandSize);
                    return Ok(());
                }
                let ctlid = u16::from_le_bytes([data[0], data[1]]);
                match self.controller_health_body(ctlid)? {
                    Some(body) => self.respond(frame, Self::mi_response(opcode, &body)),
                    None => self.respond_status(
                        frame,
                        MessageKind::Mi,
                        opcode,
                        MiStatus::InvalidParameter,
                    ),
                }
            }
            Ok(MiOpcode::ReadDataStructure) => {
                if data.len() < 2 {
                    self.respond_status(frame, MessageKind::Mi, opcode, MiStatus::InvalidCommandSize);
                    return Ok(());
                }
                match self.data_structure_body(data[0], data[1])? {
                    Some(body) => self.respond(frame, Self::mi_response(opcode, &body)),
                    None => self.respond_status(
                        frame,
                        MessageKind::Mi,
                        opcode,
                        MiStatus::InvalidParameter,
                    ),
                }
            }
            Ok(MiOpcode::ConfigurationGet) => {
                if data.is_empty() {
                    self.respond_status(frame, MessageKind::Mi, opcode, MiStatus::InvalidCommandSize);
                    return Ok(());
                }
                match self.configuration_body(data[0])? {
                    Some(body) => self.respond(frame, Self::mi_response(opcode, &body)),
                    None => self.respond_status(
                        frame,
                        MessageKind::Mi,
                        opcode,
                        MiStatus::InvalidParameter,
                    ),
                }
            }
            Ok(MiOpcode::ConfigurationSet) => {
                if data.is_empty() {
                    self.respond_status(frame, MessageKind::Mi, opcode, MiStatus::InvalidCommandSize);
                    return Ok(());
                }
                match data[0] {
                    0x01 if data.len() >= 5 => self.state.smbus_freq = data[4],
                    0x02 => (),
                    0x03 if data.len() >= 6 => {
                        self.state.mtus = u16::from_le_bytes([data[4], data[5]]);
                    }
                    _ => {
                        self.respond_status(
                            frame,
                            MessageKind::Mi,
                            opcode,
                            MiStatus::InvalidParameter,
                        );
                        return Ok(());
                    }
                }
                self.respond(frame, Self::mi_response(opcode, &[0x00, 0x00, 0x00, 0x00]));
            }
            Ok(MiOpcode::VpdRead) => {
                if data.len() < 4 {
                    self.respond_status(frame, MessageKind::Mi, opcode, MiStatus::InvalidCommandSize);
                    return Ok(());
                }
                let offset = u16::from_le_bytes([data[0], data[1]]) as usize;
                let length = u16::from_le_bytes([data[2], data[3]]) as usize;
                if offset >= self.state.vpd.len() {
                    // End of data.
                    self.respond_status(frame, MessageKind::Mi, opcode, MiStatus::InvalidParameter);
                    return Ok(());
                }
                let end = (offset + length).min(self.state.vpd.len());
                let mut body = vec![0x00];
                body.extend_from_slice(&self.state.vpd[offset..end]);
                self.respond(frame, Self::mi_response(opcode, &body));
            }
            Ok(MiOpcode::VpdWrite) => {
                if data.len() < 4 {
                    self.respond_status(frame, MessageKind::Mi, opcode, MiStatus::InvalidCommandSize);
                    return Ok(());
                }
                let offset = u16::from_le_bytes([data[0], data[1]]) as usize;
                let bytes = &data[4..];
                if offset + bytes.len() > self.state.vpd.len() {
                    self.state.vpd.resize(offset + bytes.len(), 0);
                }
                self.state.vpd[offset..offset + bytes.len()].copy_from_slice(bytes);
                self.respond(frame, Self::mi_response(opcode, &[0x00, 0x00, 0x00, 0x00]));
            }
            Ok(MiOpcode::Reset) => {
                self.respond(frame, Self::mi_response(opcode, &[0x00, 0x00, 0x00, 0x00]));
            }
            _ => {
                debug!("unimplemented MI opcode {opcode:#04x}");
                self.respond_status(frame, MessageKind::Mi, opcode, MiStatus::InvalidCommandOpcode);
            }
        }
        Ok(())
    }

    fn subsystem_health_body(&self) -> Result<Vec<u8>> {
        let state = &self.state;
        if state.mi_version.0 >= 2 {
            Ok(SubsystemHealthDataExt {
                status: 0,
                nss: state.subsystem_status,
                sw: state.critical_warning,
                ctemp: state.temperature_kelvin,
                pdlu: state.life_used,
                spare: state.available_spare,
                egcw: 0,
                rsvd: 0,
                vendor: 0,
            }
            .to_bytes()?)
        } else {
            Ok(SubsystemHealthData {
                status: 0,
                nss: state.subsystem_status,
                sw: state.critical_warning,
                ctemp: state.temperature_kelvin,
                pdlu: state.life_used,
                spare: state.available_spare,
            }
            .to_bytes()?)
        }
    }

    fn controller_health_body(&self, ctlid: u16) -> Result<Option<Vec<u8>>> {
        let Some(ctlr) = self.state.controllers.iter().find(|c| c.ctlid == ctlid) else {
            return Ok(None);
        };

        let mut body = ControllerHealthHeader { status: 0, rent: 1 }.to_bytes()?;
        let entry = ControllerHealthEntry {
            ctlid: ctlr.ctlid,
            csts: ctlr.ready as u16,
            ctemp: ctlr.temperature_kelvin,
            pdlu: ctlr.life_used,
            spare: ctlr.available_spare,
            cwarn: ctlr.critical_warning,
            chsc: 0,
        }
        .to_bytes()?;
        body.extend_from_slice(&entry);
        if self.state.mi_version.0 >= 2 {
            body.resize(
                ControllerHealthHeader::LEN + ControllerHealthEntry::LEN_EXT,
                0,
            );
        }
        Ok(Some(body))
    }

    fn data_structure_body(&self, dtyp: u8, id: u8) -> Result<Option<Vec<u8>>> {
        let body = match dtyp {
            0x00 => SubsystemInfo {
                nump: self.state.num_ports.saturating_sub(1),
                mjr: self.state.mi_version.0,
                mnr: self.state.mi_version.1,
                nnsc: 0,
            }
            .to_bytes()?,
            0x01 => {
                if id >= self.state.num_ports {
                    return Ok(None);
                }
                crate::nvme_mi::layout::PortInfo {
                    // Port 0 carries PCIe, the rest the two-wire
                    // management link.
                    prttyp: if id == 0 { 0x01 } else { 0x02 },
                    prtcap: 0x01,
                    mmtus: self.state.mtus,
                    mebs: 0,
                }
                .to_bytes()?
            }
            0x02 => {
                let mut list = ControllerList::default();
                list.ids = self.state.controllers.iter().map(|c| c.ctlid).collect();
                list.numids = list.ids.len() as u16;
                list.to_bytes()?
            }
            0x03 => {
                if !self.state.controllers.iter().any(|c| c.ctlid == id as u16) {
                    return Ok(None);
                }
                vec![0u8; 32]
            }
            _ => return Ok(None),
        };

        let mut out = DataStructureHeader {
            status: 0,
            rdl: body.len() as u16,
        }
        .to_bytes()?;
        out.extend_from_slice(&body);
        Ok(Some(out))
    }

    fn configuration_body(&self, config: u8) -> Result<Option<Vec<u8>>> {
        let body = match config {
            0x01 => SmbusFrequencyConfig {
                status: 0,
                sfreq: self.state.smbus_freq,
            }
            .to_bytes()?,
            0x02 => vec![0x00, 0x00, 0x00, 0x00],
            0x03 => MtusConfig {
                status: 0,
                mtus: self.state.mtus,
            }
            .to_bytes()?,
            _ => return Ok(None),
        };
        Ok(Some(body))
    }

    fn admin_response(opcode: u8, body: &[u8]) -> Vec<u8> {
        let mut payload = vec![
            MessageKind::Admin.response_byte(),
            opcode,
            0x00,
            0x00,
            // Status dword
            0x00,
            0x00,
            0x00,
            0x00,
        ];
        payload.extend_from_slice(body);
        payload
    }

    fn handle_admin(&mut self, frame: &ParsedFrame, opcode: u8, data: &[u8]) -> Result<()> {
        // NSID, then CDW2..CDW15
        if data.len() < 4 + 14 * 4 {
            self.respond_status(frame, MessageKind::Admin, opcode, MiStatus::InvalidCommandSize);
            return Ok(());
        }
        let cdw = |n: usize| -> u32 {
            let base = 4 + (n - 2) * 4;
            u32::from_le_bytes([data[base], data[base + 1], data[base + 2], data[base + 3]])
        };

        match opcode {
            ADMIN_IDENTIFY => {
                let cns = (cdw(10) & 0xff) as u8;
                let body = match cns {
                    CNS_IDENTIFY_CONTROLLER => {
                        let mut body = IdentifyControllerPrefix {
                            vid: self.state.pci_vendor_id,
                            ssvid: self.state.pci_vendor_id,
                            sn: pad_ascii(&self.state.serial_number),
                            mn: pad_ascii(&self.state.model_number),
                            fr: pad_ascii(&self.state.firmware_revision),
                        }
                        .to_bytes()?;
                        body.resize(IdentifyControllerPrefix::FULL_LEN, 0);
                        body
                    }
                    CNS_IDENTIFY_NAMESPACE => vec![0u8; IdentifyControllerPrefix::FULL_LEN],
                    _ => {
                        self.respond_status(
                            frame,
                            MessageKind::Admin,
                            opcode,
                            MiStatus::InvalidParameter,
                        );
                        return Ok(());
                    }
                };
                self.respond(frame, Self::admin_response(opcode, &body));
            }
            ADMIN_GET_LOG_PAGE => {
                let lid = (cdw(10) & 0xff) as u8;
                let numd = (cdw(10) >> 16 | (cdw(11) & 0xffff) << 16) as usize + 1;
                let dlen = numd * 4;
                let mut body = match lid {
                    LID_SMART_HEALTH => self.smart_log_body()?,
                    LID_FIRMWARE_SLOT => self.firmware_log_body()?,
                    LID_ERROR_INFORMATION => vec![0u8; dlen.min(4096)],
                    _ => {
                        self.respond_status(
                            frame,
                            MessageKind::Admin,
                            opcode,
                            MiStatus::InvalidParameter,
                        );
                        return Ok(());
                    }
                };
                body.truncate(dlen);
                self.respond(frame, Self::admin_response(opcode, &body));
            }
            ADMIN_GET_FEATURES => {
                self.respond(frame, Self::admin_response(opcode, &[0x00; 4]));
            }
            ADMIN_SET_FEATURES => {
                self.respond(frame, Self::admin_response(opcode, &[]));
            }
            _ => {
                debug!("unimplemented Admin opcode {opcode:#04x}");
                self.respond_status(
                    frame,
                    MessageKind::Admin,
                    opcode,
                    MiStatus::InvalidCommandOpcode,
                );
            }
        }
        Ok(())
    }

    fn smart_log_body(&self) -> Result<Vec<u8>> {
        let state = &self.state;
        let log = SmartLog {
            cw: state.critical_warning,
            ctemp: state.temperature_kelvin,
            avsp: state.available_spare,
            avspt: state.spare_threshold,
            pused: state.life_used,
            egcws: 0,
            dur: 1_204_967,
            duw: 892_341,
            hrc: 19_287_465,
            hwc: 14_876_210,
            cbt: 312,
            pwrc: 42,
            poh: 1_337,
            upl: 3,
            mdie: 0,
            neile: 0,
            wctt: 0,
            cctt: 0,
            tsen: [state.temperature_kelvin, 0, 0, 0, 0, 0, 0, 0],
            tmt1c: 0,
            tmt2c: 0,
            tmt1t: 0,
            tmt2t: 0,
        };
        Ok(log.to_bytes()?)
    }

    fn firmware_log_body(&self) -> Result<Vec<u8>> {
        let mut log = FirmwareSlotLog::default();
        log.afi = 0x01;
        log.frs[0] = pad_ascii(&self.state.firmware_revision);
        Ok(log.to_bytes()?)
    }
}

impl Transport for MockTransport {
    fn send_packet(&mut self, packet: &[u8]) -> Result<()> {
        self.sent_packets.push(packet.to_vec());
        let frame = match parse(packet) {
            Ok(frame) => frame,
            Err(err) => {
                // A real endpoint stays silent on integrity failures;
                // the host's timeout surfaces the loss.
                debug!("dropping malformed request: {err}");
                return Ok(());
            }
        };
        if !(frame.header.som && frame.header.eom) {
            debug!("fragmented requests are not simulated");
            return Ok(());
        }
        self.handle(&frame)
    }

    fn receive_packet(&mut self, timeout: Duration) -> Result<Vec<u8>> {
        self.pending.pop_front().ok_or(Error::Timeout(timeout))
    }

    fn inter_packet_delay(&self) -> Duration {
        // Synchronous loopback; no settle time needed.
        Duration::ZERO
    }
}
