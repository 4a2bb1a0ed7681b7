// SPDX-License-Identifier: GPL-3.0-only
/*
 * Copyright (c) 2025 Code Construct
 */

//! Enclosure controller transport adapter.
//!
//! The physical link is owned by an enclosure controller (serial port,
//! slot multiplexer, I2C engines); this module only defines the
//! interface the adapter drives and the packet-level framing over it.

use std::thread::sleep;
use std::time::{Duration, Instant};

use log::{debug, trace};

use crate::mctp_smbus::{RESPONSE_ADDR, MCTP_SMBUS_COMMAND_CODE};
use crate::{Error, Result};

use super::Transport;

/// Slot range exposed by the enclosure multiplexer.
pub const SLOT_RANGE: std::ops::RangeInclusive<u8> = 1..=8;

/// The controller-side operations the adapter needs.
///
/// Implemented by whatever owns the serial link to the enclosure; the
/// library never opens the device itself.
pub trait EnclosureController {
    /// Write `data` to `address` on the bus behind `slot`.
    fn i2c_write(&mut self, slot: u8, address: u8, data: &[u8]) -> Result<()>;

    /// Read `length` bytes from `register` at `address` behind `slot`.
    /// An empty result means nothing was pending.
    fn i2c_read(&mut self, slot: u8, address: u8, register: u8, length: usize)
        -> Result<Vec<u8>>;
}

/// [`Transport`] over an [`EnclosureController`], pinned to one slot.
pub struct ControllerTransport<C> {
    controller: C,
    slot: u8,
    response_addr: u8,
    /// Wait after a write before the device is polled for its response.
    settle: Duration,
    /// Gap between fragments of one outbound message.
    fragment_delay: Duration,
}

impl<C: EnclosureController> ControllerTransport<C> {
    /// Wrap `controller`, targeting `slot` (1..=8).
    pub fn new(controller: C, slot: u8) -> Result<Self> {
        if !SLOT_RANGE.contains(&slot) {
            return Err(Error::Usage(format!("slot must be 1-8, got {slot}")));
        }
        Ok(Self {
            controller,
            slot,
            response_addr: RESPONSE_ADDR,
            settle: Duration::from_millis(5),
            fragment_delay: crate::mctp_smbus::INTER_FRAGMENT_DELAY,
        })
    }

    pub fn slot(&self) -> u8 {
        self.slot
    }

    pub fn set_slot(&mut self, slot: u8) -> Result<()> {
        if !SLOT_RANGE.contains(&slot) {
            return Err(Error::Usage(format!("slot must be 1-8, got {slot}")));
        }
        self.slot = slot;
        Ok(())
    }

    /// Override the inter-fragment gap (a transport timing concern).
    pub fn set_fragment_delay(&mut self, delay: Duration) {
        self.fragment_delay = delay;
    }

    pub fn controller_mut(&mut self) -> &mut C {
        &mut self.controller
    }
}

impl<C: EnclosureController> Transport for ControllerTransport<C> {
    fn send_packet(&mut self, packet: &[u8]) -> Result<()> {
        if packet.len() < 4 {
            return Err(Error::ShortPacket { len: packet.len() });
        }
        // The controller addresses the bus itself; the frame's first
        // byte is the destination address and the remainder is the write
        // payload.
        let address = packet[0];
        trace!("TX slot={} addr={address:#04x} {} bytes", self.slot, packet.len());
        self.controller.i2c_write(self.slot, address, &packet[1..])?;
        sleep(self.settle);
        Ok(())
    }

    fn receive_packet(&mut self, timeout: Duration) -> Result<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        loop {
            // Probe the SMBus header first; its byte count tells us how
            // much more to pull.
            let header = self.controller.i2c_read(
                self.slot,
                self.response_addr,
                MCTP_SMBUS_COMMAND_CODE,
                3,
            )?;

            if header.len() >= 3 {
                let byte_count = header[2] as usize;
                // dest + cmd + count, src + counted region, PEC
                let total = byte_count + 5;
                let packet = self.controller.i2c_read(
                    self.slot,
                    self.response_addr,
                    MCTP_SMBUS_COMMAND_CODE,
                    total,
                )?;
                if packet.is_empty() {
                    return Err(Error::Timeout(timeout));
                }
                trace!("RX slot={} {} bytes", self.slot, packet.len());
                return Ok(packet);
            }

            if Instant::now() >= deadline {
                debug!("no response from slot {} within {timeout:?}", self.slot);
                return Err(Error::Timeout(timeout));
            }
            sleep(Duration::from_millis(1));
        }
    }

    fn inter_packet_delay(&self) -> Duration {
        self.fragment_delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullController;

    impl EnclosureController for NullController {
        fn i2c_write(&mut self, _slot: u8, _address: u8, _data: &[u8]) -> Result<()> {
            Ok(())
        }

        fn i2c_read(
            &mut self,
            _slot: u8,
            _address: u8,
            _register: u8,
            _length: usize,
        ) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn slot_range_enforced() {
        assert!(ControllerTransport::new(NullController, 0).is_err());
        assert!(ControllerTransport::new(NullController, 9).is_err());
        assert!(ControllerTransport::new(NullController, 1).is_ok());
        assert!(ControllerTransport::new(NullController, 8).is_ok());
    }

    #[test]
    fn empty_reads_time_out() {
        let mut transport = ControllerTransport::new(NullController, 1).unwrap();
        let err = transport
            .receive_packet(Duration::from_millis(5))
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Timeout);
    }
}
