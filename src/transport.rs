// SPDX-License-Identifier: GPL-3.0-only
/*
 * Copyright (c) 2025 Code Construct
 */

//! The packet transport boundary.
//!
//! A transport moves opaque packets; it never interprets bytes beyond
//! what addressing a single device slot requires. Two backends are
//! provided: [`controller::ControllerTransport`] adapting an enclosure
//! controller, and [`mock::MockTransport`] answering synchronously from
//! a simulated device.

use std::time::Duration;

use crate::Result;

pub mod controller;
pub mod mock;

/// Default per-command response deadline.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(2);

/// A byte-packet transport to one device slot.
///
/// Suspension is only permitted here: `send_packet` may block briefly
/// while the hardware accepts bytes, and `receive_packet` blocks until a
/// packet arrives or the caller's timeout passes.
pub trait Transport {
    /// Transmit one wire-ready packet.
    fn send_packet(&mut self, packet: &[u8]) -> Result<()>;

    /// Receive the next packet, waiting at most `timeout`.
    fn receive_packet(&mut self, timeout: Duration) -> Result<Vec<u8>>;

    /// Settle time to insert between fragments of one outbound message.
    fn inter_packet_delay(&self) -> Duration {
        crate::mctp_smbus::INTER_FRAGMENT_DELAY
    }
}
