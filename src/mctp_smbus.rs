// SPDX-License-Identifier: GPL-3.0-only
/*
 * Copyright (c) 2025 Code Construct
 */

//! MCTP over SMBus/I2C: envelope framing, transport header handling, and
//! message fragmentation.
//!
//! Wire format of a single packet, per DSP0237:
//!
//! ```text
//! Dest | 0x0F | ByteCount | Src | Ver | DestEID | SrcEID | Flags | MsgType | ...Payload... | [MIC 4B LE] | PEC
//! ```
//!
//! ByteCount covers the MCTP transport header, the message-type byte, the
//! payload, and the MIC when present. The PEC trails every packet and is
//! computed over all preceding bytes.

use std::time::Duration;

pub mod fragment;
pub mod frame;

/// SMBus command code identifying an MCTP packet (DSP0237).
pub const MCTP_SMBUS_COMMAND_CODE: u8 = 0x0f;

/// Default destination slave address: the NVMe-MI management endpoint.
pub const DEFAULT_DEST_ADDR: u8 = 0x3a;

/// Default source slave address for the host side.
pub const DEFAULT_SRC_ADDR: u8 = 0x21;

/// SMBus address the endpoint directs responses at.
pub const RESPONSE_ADDR: u8 = 0x20;

/// Largest packet the enclosure controller will transmit.
pub const MAX_TX_PACKET: usize = 128;

/// Largest packet the enclosure controller can receive.
pub const MAX_RX_PACKET: usize = 256;

/// Largest message chunk carried by a single transmitted packet.
pub const MAX_TX_PAYLOAD: usize = 120;

/// Target settle time between fragments of one message. A transport
/// timing concern: transports consume it, the fragmenter does not.
pub const INTER_FRAGMENT_DELAY: Duration = Duration::from_millis(5);

/// Deadline from SOM to EOM of a fragmented message.
pub const REASSEMBLY_TIMEOUT: Duration = Duration::from_millis(100);
