// SPDX-License-Identifier: GPL-3.0-only
/*
 * Copyright (c) 2025 Code Construct
 */

//! The session client.
//!
//! One client serializes requests over one transport: the nth command
//! completes (or fails) before the next is encoded. Tags are assigned
//! monotonically modulo 8 per session; a received packet whose tag does
//! not match the in-flight request is logged and dropped.

use std::thread::sleep;
use std::time::{Duration, Instant};

use log::{debug, warn};
use mctp::{Eid, MCTP_TYPE_NVME};

use crate::mctp_smbus::fragment::{fragment, Reassembler};
use crate::mctp_smbus::frame::{parse, FrameBuilder};
use crate::mctp_smbus::MAX_RX_PACKET;
use crate::transport::{Transport, DEFAULT_COMMAND_TIMEOUT};
use crate::{Error, Result};

use super::decode::{
    decode_response, decode_with, ControllerListDecoder, GenericHexDecoder, MtusDecoder,
    PortInfoDecoder, ResponseDecoder, SmartLogDecoder, SmbusFrequencyDecoder,
    SubsystemInfoDecoder, ErrorLogDecoder, FirmwareSlotDecoder,
};
use super::registry::DecoderRegistry;
use super::request::{AdminRequest, MiRequest};
use super::response::DecodedResponse;
use super::{
    ConfigId, DataStructureType, LID_ERROR_INFORMATION, LID_FIRMWARE_SLOT, LID_SMART_HEALTH,
};

/// The raw bytes and timing of the most recent completed command.
#[derive(Clone, Debug)]
pub struct Exchange {
    /// The message payload that was sent (before framing).
    pub request_payload: Vec<u8>,
    /// The reassembled response message payload.
    pub response_payload: Vec<u8>,
    pub latency: Duration,
}

/// NVMe-MI session client over any [`Transport`].
pub struct MiClient<T> {
    transport: T,
    builder: FrameBuilder,
    reassembler: Reassembler,
    registry: DecoderRegistry,
    dest_eid: Eid,
    timeout: Duration,
    integrity_check: bool,
    strict: bool,
    last_exchange: Option<Exchange>,
}

impl<T: Transport> MiClient<T> {
    pub fn new(transport: T, dest_eid: u8) -> Self {
        Self {
            transport,
            builder: FrameBuilder::new(),
            reassembler: Reassembler::new(),
            registry: DecoderRegistry::with_builtin(),
            dest_eid: Eid(dest_eid),
            timeout: DEFAULT_COMMAND_TIMEOUT,
            integrity_check: false,
            strict: false,
            last_exchange: None,
        }
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Request the MIC on outbound messages.
    pub fn set_integrity_check(&mut self, ic: bool) {
        self.integrity_check = ic;
    }

    /// In strict mode, responses without a registered decoder error out
    /// instead of falling back to a hex dump.
    pub fn set_strict(&mut self, strict: bool) {
        self.strict = strict;
    }

    pub fn registry_mut(&mut self) -> &mut DecoderRegistry {
        &mut self.registry
    }

    pub fn registry(&self) -> &DecoderRegistry {
        &self.registry
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn last_exchange(&self) -> Option<&Exchange> {
        self.last_exchange.as_ref()
    }

    /// Send a message payload and return the reassembled response
    /// payload.
    ///
    /// Framing, fragmentation, tag matching and reassembly happen here;
    /// decoding is layered on top by the typed entry points.
    pub fn execute_payload(&mut self, payload: Vec<u8>) -> Result<Vec<u8>> {
        let started = Instant::now();
        let message = fragment(
            &mut self.builder,
            self.dest_eid,
            MCTP_TYPE_NVME,
            &payload,
            self.integrity_check,
        );

        let delay = self.transport.inter_packet_delay();
        for (i, packet) in message.packets().enumerate() {
            if i > 0 {
                sleep(delay);
            }
            self.transport.send_packet(packet)?;
        }

        let deadline = started + self.timeout;
        let response = loop {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                self.reassembler.expire();
                return Err(Error::Timeout(self.timeout));
            };

            let packet = self.transport.receive_packet(remaining)?;
            if packet.len() > MAX_RX_PACKET {
                warn!("dropping oversize packet of {} bytes", packet.len());
                continue;
            }

            let frame = parse(&packet)?;
            if frame.header.tag.0 != message.tag.0 {
                // Likely a late response to a cancelled command.
                debug!(
                    "dropping packet with tag {} while waiting for {}",
                    frame.header.tag.0, message.tag.0
                );
                continue;
            }

            if let Some(complete) = self.reassembler.push(&frame)? {
                break complete.payload;
            }
        };

        self.last_exchange = Some(Exchange {
            request_payload: payload,
            response_payload: response.clone(),
            latency: started.elapsed(),
        });
        Ok(response)
    }

    /// Issue an MI command, decoding via the registry.
    pub fn execute_mi(&mut self, request: &MiRequest) -> Result<DecodedResponse> {
        let response = self.execute_payload(request.pack())?;
        decode_response(&response, &self.registry, None, self.strict)
    }

    /// Issue a tunneled Admin command, decoding via the registry.
    pub fn execute_admin(&mut self, request: &AdminRequest) -> Result<DecodedResponse> {
        let response = self.execute_payload(request.pack())?;
        decode_response(&response, &self.registry, None, self.strict)
    }

    /// Issue a vendor-specific MI command; `vendor_id` steers decoder
    /// resolution.
    pub fn vendor_command(
        &mut self,
        opcode: u8,
        data: Vec<u8>,
        vendor_id: Option<u16>,
    ) -> Result<DecodedResponse> {
        let request = MiRequest::vendor(opcode, data)?;
        let response = self.execute_payload(request.pack())?;
        decode_response(&response, &self.registry, vendor_id, self.strict)
    }

    fn execute_with(
        &mut self,
        payload: Vec<u8>,
        decoder: &dyn ResponseDecoder,
    ) -> Result<DecodedResponse> {
        let response = self.execute_payload(payload)?;
        decode_with(&response, decoder)
    }

    // ------------------------------------------------------------------
    // MI command surface
    // ------------------------------------------------------------------

    pub fn health_status_poll(&mut self) -> Result<DecodedResponse> {
        self.execute_mi(&MiRequest::subsystem_health_status_poll())
    }

    pub fn controller_health_status(&mut self, ctlid: u16) -> Result<DecodedResponse> {
        self.execute_mi(&MiRequest::controller_health_status_poll(ctlid))
    }

    pub fn get_subsystem_info(&mut self) -> Result<DecodedResponse> {
        let request =
            MiRequest::read_data_structure(DataStructureType::SubsystemInformation, 0, 0);
        self.execute_with(request.pack(), &SubsystemInfoDecoder)
    }

    pub fn get_port_info(&mut self, port_id: u8) -> Result<DecodedResponse> {
        let request = MiRequest::read_data_structure(DataStructureType::PortInformation, port_id, 0);
        self.execute_with(request.pack(), &PortInfoDecoder)
    }

    pub fn get_controller_list(&mut self) -> Result<DecodedResponse> {
        let request = MiRequest::read_data_structure(DataStructureType::ControllerList, 0, 0);
        self.execute_with(request.pack(), &ControllerListDecoder)
    }

    pub fn configuration_get(&mut self, config: ConfigId, port_id: u8) -> Result<DecodedResponse> {
        let request = MiRequest::configuration_get(config, port_id);
        match config {
            ConfigId::SmbusFrequency => self.execute_with(request.pack(), &SmbusFrequencyDecoder),
            ConfigId::MctpTransmissionUnit => self.execute_with(request.pack(), &MtusDecoder),
            ConfigId::HealthStatusChange => self.execute_with(request.pack(), &GenericHexDecoder),
        }
    }

    pub fn vpd_read(&mut self, offset: u16, length: u16) -> Result<DecodedResponse> {
        self.execute_mi(&MiRequest::vpd_read(offset, length))
    }

    // ------------------------------------------------------------------
    // Tunneled Admin command surface
    // ------------------------------------------------------------------

    pub fn identify_controller(&mut self) -> Result<DecodedResponse> {
        self.execute_admin(&AdminRequest::identify_controller(0))
    }

    pub fn identify_namespace(&mut self, nsid: u32) -> Result<DecodedResponse> {
        // No typed namespace decoder; expose the raw structure.
        self.execute_with(
            AdminRequest::identify_namespace(nsid).pack(),
            &GenericHexDecoder,
        )
    }

    pub fn get_log_page(&mut self, lid: u8, num_dwords: u32) -> Result<DecodedResponse> {
        self.execute_admin(&AdminRequest::get_log_page(
            lid,
            num_dwords,
            0,
            u32::MAX,
            false,
        ))
    }

    pub fn get_smart_log(&mut self) -> Result<DecodedResponse> {
        let request = AdminRequest::get_log_page(LID_SMART_HEALTH, 128, 0, u32::MAX, false);
        self.execute_with(request.pack(), &SmartLogDecoder)
    }

    pub fn get_firmware_slot_info(&mut self) -> Result<DecodedResponse> {
        let request = AdminRequest::get_log_page(LID_FIRMWARE_SLOT, 128, 0, u32::MAX, false);
        self.execute_with(request.pack(), &FirmwareSlotDecoder)
    }

    pub fn get_error_log(&mut self, entries: u32) -> Result<DecodedResponse> {
        let request =
            AdminRequest::get_log_page(LID_ERROR_INFORMATION, entries * 16, 0, u32::MAX, false);
        self.execute_with(request.pack(), &ErrorLogDecoder)
    }

    pub fn get_features(&mut self, fid: u8, sel: u8, cdw11: u32) -> Result<DecodedResponse> {
        self.execute_admin(&AdminRequest::get_features(fid, sel, cdw11))
    }

    pub fn set_features(&mut self, fid: u8, cdw11: u32, cdw12: u32) -> Result<DecodedResponse> {
        self.execute_admin(&AdminRequest::set_features(fid, cdw11, cdw12))
    }
}
