// SPDX-License-Identifier: GPL-3.0-only
/*
 * Copyright (c) 2025 Code Construct
 */

//! NVMe-MI command encoding and response decoding.

use flagset::{flags, FlagSet};

pub mod client;
pub mod decode;
pub mod layout;
pub mod registry;
pub mod request;
pub mod response;

/// NMIMT values carried in bits 0..7 of the first message byte; bit 7 is
/// the Request-or-Response flag.
pub const NMIMT_CONTROL: u8 = 0x00;
pub const NMIMT_MI_COMMAND: u8 = 0x01;
pub const NMIMT_ADMIN_COMMAND: u8 = 0x04;

/// ROR flag: clear for requests, set for responses.
pub const ROR_RESPONSE: u8 = 0x80;

/// Which command set a message belongs to. MI and Admin opcode spaces
/// overlap, so decoder selection always pairs the opcode with this.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum MessageKind {
    Mi,
    Admin,
}

impl MessageKind {
    pub fn from_nmimt(nmimt: u8) -> Option<Self> {
        match nmimt {
            NMIMT_MI_COMMAND => Some(Self::Mi),
            NMIMT_ADMIN_COMMAND => Some(Self::Admin),
            _ => None,
        }
    }

    /// First message byte of a request.
    pub fn request_byte(self) -> u8 {
        match self {
            Self::Mi => NMIMT_MI_COMMAND,
            Self::Admin => NMIMT_ADMIN_COMMAND,
        }
    }

    /// First message byte of a response: ROR set.
    pub fn response_byte(self) -> u8 {
        self.request_byte() | ROR_RESPONSE
    }
}

// MI v2.0, 5, Figure 68
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum MiOpcode {
    ReadDataStructure = 0x00,
    SubsystemHealthStatusPoll = 0x01,
    ControllerHealthStatusPoll = 0x02,
    ConfigurationSet = 0x03,
    ConfigurationGet = 0x04,
    VpdRead = 0x05,
    VpdWrite = 0x06,
    Reset = 0x07,
    SesReceive = 0x08,
    SesSend = 0x09,
    ManagementEndpointBufferRead = 0x0a,
    ManagementEndpointBufferWrite = 0x0b,
    Shutdown = 0x0c,
}

impl MiOpcode {
    /// Vendor-specific MI opcodes occupy 0xC0-0xFF.
    pub fn is_vendor_specific(opcode: u8) -> bool {
        opcode >= 0xc0
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::ReadDataStructure => "Read NVMe-MI Data Structure",
            Self::SubsystemHealthStatusPoll => "NVM Subsystem Health Status Poll",
            Self::ControllerHealthStatusPoll => "Controller Health Status Poll",
            Self::ConfigurationSet => "Configuration Set",
            Self::ConfigurationGet => "Configuration Get",
            Self::VpdRead => "VPD Read",
            Self::VpdWrite => "VPD Write",
            Self::Reset => "Reset",
            Self::SesReceive => "SES Receive",
            Self::SesSend => "SES Send",
            Self::ManagementEndpointBufferRead => "Management Endpoint Buffer Read",
            Self::ManagementEndpointBufferWrite => "Management Endpoint Buffer Write",
            Self::Shutdown => "Shutdown",
        }
    }

    /// Human-readable name for an arbitrary opcode byte.
    pub fn describe(opcode: u8) -> String {
        match Self::try_from(opcode) {
            Ok(op) => op.name().to_string(),
            Err(_) if Self::is_vendor_specific(opcode) => {
                format!("Vendor Specific ({opcode:#04x})")
            }
            Err(_) => format!("Reserved ({opcode:#04x})"),
        }
    }
}

impl TryFrom<u8> for MiOpcode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            0x00 => Ok(Self::ReadDataStructure),
            0x01 => Ok(Self::SubsystemHealthStatusPoll),
            0x02 => Ok(Self::ControllerHealthStatusPoll),
            0x03 => Ok(Self::ConfigurationSet),
            0x04 => Ok(Self::ConfigurationGet),
            0x05 => Ok(Self::VpdRead),
            0x06 => Ok(Self::VpdWrite),
            0x07 => Ok(Self::Reset),
            0x08 => Ok(Self::SesReceive),
            0x09 => Ok(Self::SesSend),
            0x0a => Ok(Self::ManagementEndpointBufferRead),
            0x0b => Ok(Self::ManagementEndpointBufferWrite),
            0x0c => Ok(Self::Shutdown),
            _ => Err(value),
        }
    }
}

// MI v2.0, 4.1.2, Figure 29
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum MiStatus {
    Success = 0x00,
    InternalError = 0x02,
    InvalidCommandOpcode = 0x03,
    InvalidParameter = 0x04,
    InvalidCommandSize = 0x05,
    InvalidCommandInputDataSize = 0x06,
}

impl MiStatus {
    pub fn describe(status: u8) -> String {
        let name = match status {
            0x00 => "Success",
            0x02 => "Internal Error",
            0x03 => "Invalid Command Opcode",
            0x04 => "Invalid Parameter",
            0x05 => "Invalid Command Size",
            0x06 => "Invalid Command Input Data Size",
            _ => return format!("Unknown ({status:#04x})"),
        };
        name.to_string()
    }
}

// MI v2.0, 5.7, Figure 109, DTYP
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum DataStructureType {
    SubsystemInformation = 0x00,
    PortInformation = 0x01,
    ControllerList = 0x02,
    ControllerInformation = 0x03,
    OptionallySupportedCommands = 0x04,
    EndpointBufferCommandSupport = 0x05,
}

// MI v2.0, 5, Figure 75
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum ConfigId {
    SmbusFrequency = 0x01,
    HealthStatusChange = 0x02,
    MctpTransmissionUnit = 0x03,
}

// Admin opcodes tunneled through the management endpoint.
pub const ADMIN_GET_LOG_PAGE: u8 = 0x02;
pub const ADMIN_IDENTIFY: u8 = 0x06;
pub const ADMIN_SET_FEATURES: u8 = 0x09;
pub const ADMIN_GET_FEATURES: u8 = 0x0a;

/// Human-readable name for a tunneled Admin opcode byte.
pub fn describe_admin_opcode(opcode: u8) -> String {
    match opcode {
        ADMIN_GET_LOG_PAGE => "Get Log Page".to_string(),
        ADMIN_IDENTIFY => "Identify".to_string(),
        ADMIN_SET_FEATURES => "Set Features".to_string(),
        ADMIN_GET_FEATURES => "Get Features".to_string(),
        _ => format!("Admin ({opcode:#04x})"),
    }
}

// Base v2.1, 5.1.12 LIDs and 5.1.13.1 CNS values used over the tunnel.
pub const LID_ERROR_INFORMATION: u8 = 0x01;
pub const LID_SMART_HEALTH: u8 = 0x02;
pub const LID_FIRMWARE_SLOT: u8 = 0x03;
pub const CNS_IDENTIFY_NAMESPACE: u8 = 0x00;
pub const CNS_IDENTIFY_CONTROLLER: u8 = 0x01;

// Base v2.1, 5.1.12.1.3, Figure 206, CW
flags! {
    pub enum CriticalWarningFlags: u8 {
        SpareBelowThreshold = 1 << 0,
        TemperatureExceeded = 1 << 1,
        ReliabilityDegraded = 1 << 2,
        ReadOnlyMode = 1 << 3,
        VolatileBackupFailed = 1 << 4,
        PmrReadOnly = 1 << 5,
    }
}

/// Render a critical-warning bitmap as a comma-separated list, or
/// `"None"` when no warning is raised. Reserved bits are shown raw.
pub fn describe_warnings(bits: u8) -> String {
    let Ok(set) = FlagSet::<CriticalWarningFlags>::new(bits) else {
        return format!("{bits:#04x}");
    };
    if set.is_empty() {
        return "None".to_string();
    }
    let names: Vec<&str> = set
        .into_iter()
        .map(|flag| match flag {
            CriticalWarningFlags::SpareBelowThreshold => "Spare Below Threshold",
            CriticalWarningFlags::TemperatureExceeded => "Temperature Exceeded",
            CriticalWarningFlags::ReliabilityDegraded => "Reliability Degraded",
            CriticalWarningFlags::ReadOnlyMode => "Read Only Mode",
            CriticalWarningFlags::VolatileBackupFailed => "Volatile Backup Failed",
            CriticalWarningFlags::PmrReadOnly => "PMR Read Only",
        })
        .collect();
    names.join(", ")
}

/// NVMe temperatures are unsigned Kelvin; presentation subtracts 273.
pub const KELVIN_OFFSET: i32 = 273;

pub fn kelvin_to_celsius(kelvin: u16) -> i32 {
    kelvin as i32 - KELVIN_OFFSET
}

pub fn celsius_to_kelvin(celsius: i32) -> u16 {
    (celsius + KELVIN_OFFSET).clamp(0, u16::MAX as i32) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vendor_range() {
        assert!(!MiOpcode::is_vendor_specific(0x05));
        assert!(MiOpcode::is_vendor_specific(0xc0));
        assert!(MiOpcode::is_vendor_specific(0xff));
    }

    #[test]
    fn warning_rendering() {
        assert_eq!(describe_warnings(0), "None");
        assert_eq!(
            describe_warnings(0x03),
            "Spare Below Threshold, Temperature Exceeded"
        );
    }

    #[test]
    fn temperature_conversion() {
        assert_eq!(kelvin_to_celsius(297), 24);
        assert_eq!(celsius_to_kelvin(45), 318);
        assert_eq!(kelvin_to_celsius(celsius_to_kelvin(-5)), -5);
    }
}
