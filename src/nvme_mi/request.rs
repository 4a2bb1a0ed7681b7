// SPDX-License-Identifier: GPL-3.0-only
/*
 * Copyright (c) 2025 Code Construct
 */

//! Request payload construction.
//!
//! Both command sets share the 4-byte message header; everything after it
//! is command-specific. MI request data is small and fixed per opcode;
//! Admin requests tunnel the NVMe Admin SQE dwords.

use crate::{Error, Result};

use super::{
    ConfigId, DataStructureType, MessageKind, MiOpcode, ADMIN_GET_FEATURES, ADMIN_GET_LOG_PAGE,
    ADMIN_IDENTIFY, ADMIN_SET_FEATURES, CNS_IDENTIFY_CONTROLLER, CNS_IDENTIFY_NAMESPACE,
};

/// An NVMe-MI Management Interface command request.
///
/// Payload layout: `0x01 | opcode | 0x00 0x00 | request-data`.
#[derive(Clone, Debug)]
pub struct MiRequest {
    pub opcode: u8,
    pub data: Vec<u8>,
}

impl MiRequest {
    pub fn new(opcode: MiOpcode) -> Self {
        Self {
            opcode: opcode as u8,
            data: Vec::new(),
        }
    }

    pub fn with_data(opcode: MiOpcode, data: Vec<u8>) -> Self {
        Self {
            opcode: opcode as u8,
            data,
        }
    }

    /// Vendor-specific request; the opcode must sit in 0xC0-0xFF.
    pub fn vendor(opcode: u8, data: Vec<u8>) -> Result<Self> {
        if !MiOpcode::is_vendor_specific(opcode) {
            return Err(Error::Usage(format!(
                "vendor opcode must be 0xC0-0xFF, got {opcode:#04x}"
            )));
        }
        Ok(Self { opcode, data })
    }

    // MI v2.0, 5.6
    pub fn subsystem_health_status_poll() -> Self {
        Self::new(MiOpcode::SubsystemHealthStatusPoll)
    }

    // MI v2.0, 5.3: controller ID in the first request dword.
    pub fn controller_health_status_poll(ctlid: u16) -> Self {
        let mut data = ctlid.to_le_bytes().to_vec();
        data.extend_from_slice(&[0x00, 0x00]);
        Self::with_data(MiOpcode::ControllerHealthStatusPoll, data)
    }

    // MI v2.0, 5.7: `[DTYP][Port or Controller ID][reserved x2]`.
    pub fn read_data_structure(dtyp: DataStructureType, port_id: u8, ctlid: u8) -> Self {
        let id = match dtyp {
            DataStructureType::PortInformation => port_id,
            DataStructureType::ControllerInformation => ctlid,
            _ => 0,
        };
        Self::with_data(
            MiOpcode::ReadDataStructure,
            vec![dtyp as u8, id, 0x00, 0x00],
        )
    }

    // MI v2.0, 5.1: `[Config ID][Port ID][reserved x2]`.
    pub fn configuration_get(config: ConfigId, port_id: u8) -> Self {
        Self::with_data(
            MiOpcode::ConfigurationGet,
            vec![config as u8, port_id, 0x00, 0x00],
        )
    }

    // MI v2.0, 5.2: as Configuration Get, then the new value.
    pub fn configuration_set(config: ConfigId, port_id: u8, value: &[u8]) -> Self {
        let mut data = vec![config as u8, port_id, 0x00, 0x00];
        data.extend_from_slice(value);
        Self::with_data(MiOpcode::ConfigurationSet, data)
    }

    // MI v2.0, 5.9: `[Offset LE u16][Length LE u16]`.
    pub fn vpd_read(offset: u16, length: u16) -> Self {
        let mut data = offset.to_le_bytes().to_vec();
        data.extend_from_slice(&length.to_le_bytes());
        Self::with_data(MiOpcode::VpdRead, data)
    }

    // MI v2.0, 5.10: offset and length, then the bytes to store.
    pub fn vpd_write(offset: u16, bytes: &[u8]) -> Self {
        let mut data = offset.to_le_bytes().to_vec();
        data.extend_from_slice(&(bytes.len() as u16).to_le_bytes());
        data.extend_from_slice(bytes);
        Self::with_data(MiOpcode::VpdWrite, data)
    }

    pub fn reset() -> Self {
        Self::new(MiOpcode::Reset)
    }

    /// Serialize into the MCTP message payload.
    pub fn pack(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(4 + self.data.len());
        payload.push(MessageKind::Mi.request_byte());
        payload.push(self.opcode);
        payload.extend_from_slice(&[0x00, 0x00]);
        payload.extend_from_slice(&self.data);
        payload
    }
}

/// A tunneled NVMe Admin command request.
///
/// Payload layout: `0x04 | opcode | 0x00 0x00 | NSID LE u32 | CDW2..CDW15`.
#[derive(Clone, Debug)]
pub struct AdminRequest {
    pub opcode: u8,
    pub nsid: u32,
    cdw: [u32; 14],
}

impl AdminRequest {
    pub fn new(opcode: u8) -> Self {
        Self {
            opcode,
            nsid: 0,
            cdw: [0; 14],
        }
    }

    /// Set a command dword by its SQE number (2..=15).
    pub fn cdw(mut self, n: usize, value: u32) -> Self {
        debug_assert!((2..=15).contains(&n), "CDW{n} out of range");
        self.cdw[n - 2] = value;
        self
    }

    pub fn nsid(mut self, nsid: u32) -> Self {
        self.nsid = nsid;
        self
    }

    // Base v2.1, 5.1.13.1: CNS 0x01, CNTID in CDW10 bits 16..32.
    pub fn identify_controller(cntid: u16) -> Self {
        Self::new(ADMIN_IDENTIFY).cdw(10, CNS_IDENTIFY_CONTROLLER as u32 | (cntid as u32) << 16)
    }

    // Base v2.1, 5.1.13.1: CNS 0x00 against the target namespace.
    pub fn identify_namespace(nsid: u32) -> Self {
        Self::new(ADMIN_IDENTIFY)
            .nsid(nsid)
            .cdw(10, CNS_IDENTIFY_NAMESPACE as u32)
    }

    /// Base v2.1, 5.1.12: `num_dwords` is the requested transfer size;
    /// the 0's-based NUMDL/NUMDU split and the LPOL/LPOU byte offset are
    /// derived here.
    pub fn get_log_page(lid: u8, num_dwords: u32, offset: u64, nsid: u32, rae: bool) -> Self {
        let numd = num_dwords.saturating_sub(1);
        Self::new(ADMIN_GET_LOG_PAGE)
            .nsid(nsid)
            .cdw(
                10,
                lid as u32 | (rae as u32) << 15 | (numd & 0xffff) << 16,
            )
            .cdw(11, numd >> 16)
            .cdw(12, offset as u32)
            .cdw(13, (offset >> 32) as u32)
    }

    // Base v2.1, 5.1.11: FID and select in CDW10.
    pub fn get_features(fid: u8, sel: u8, cdw11: u32) -> Self {
        Self::new(ADMIN_GET_FEATURES)
            .cdw(10, fid as u32 | ((sel & 0x7) as u32) << 8)
            .cdw(11, cdw11)
    }

    // Base v2.1, 5.1.25.
    pub fn set_features(fid: u8, cdw11: u32, cdw12: u32) -> Self {
        Self::new(ADMIN_SET_FEATURES)
            .cdw(10, fid as u32)
            .cdw(11, cdw11)
            .cdw(12, cdw12)
    }

    /// Serialize into the MCTP message payload: 4-byte header, NSID, then
    /// CDW2..CDW15, all little-endian.
    pub fn pack(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(4 + 4 + 14 * 4);
        payload.push(MessageKind::Admin.request_byte());
        payload.push(self.opcode);
        payload.extend_from_slice(&[0x00, 0x00]);
        payload.extend_from_slice(&self.nsid.to_le_bytes());
        for dw in &self.cdw {
            payload.extend_from_slice(&dw.to_le_bytes());
        }
        payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mi_request_header() {
        let payload = MiRequest::subsystem_health_status_poll().pack();
        assert_eq!(payload, vec![0x01, 0x01, 0x00, 0x00]);
    }

    #[test]
    fn identify_controller_dwords() {
        let payload = AdminRequest::identify_controller(0).pack();
        assert_eq!(payload.len(), 64);
        assert_eq!(&payload[..4], &[0x04, 0x06, 0x00, 0x00]);
        // NSID clear
        assert_eq!(&payload[4..8], &[0; 4]);
        // CDW10 = CNS 0x01
        assert_eq!(&payload[40..44], &[0x01, 0x00, 0x00, 0x00]);
        assert!(payload[44..].iter().all(|&b| b == 0));
    }

    #[test]
    fn get_log_page_numd_split() {
        let payload = AdminRequest::get_log_page(0x02, 128, 0, u32::MAX, false).pack();
        let cdw10 = u32::from_le_bytes(payload[40..44].try_into().unwrap());
        let cdw11 = u32::from_le_bytes(payload[44..48].try_into().unwrap());
        assert_eq!(cdw10 & 0xff, 0x02);
        assert_eq!(cdw10 >> 16, 127);
        assert_eq!(cdw11, 0);
    }

    #[test]
    fn vendor_opcode_validation() {
        assert!(MiRequest::vendor(0x41, Vec::new()).is_err());
        assert!(MiRequest::vendor(0xc1, Vec::new()).is_ok());
    }
}
