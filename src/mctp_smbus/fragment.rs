// SPDX-License-Identifier: GPL-3.0-only
/*
 * Copyright (c) 2025 Code Construct
 */

//! Message fragmentation and reassembly.
//!
//! Outbound messages larger than [`MAX_TX_PAYLOAD`](super::MAX_TX_PAYLOAD)
//! are split across packets sharing one (TO, tag) pair, with SOM on the
//! first, EOM on the last, and a 2-bit sequence number that wraps
//! 0→1→2→3→0 across the message. The MIC, when requested, covers the
//! complete reassembled payload and travels in the final fragment.
//!
//! Inbound, the [`Reassembler`] tracks one buffer per (source EID, tag,
//! TO) triple. A SOM resets the buffer and arms the reassembly deadline;
//! fragments that skip a sequence number, repeat SOM mid-message, or
//! outlive the deadline drop the buffer and surface an error.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use log::{debug, warn};
use mctp::{Eid, MsgType, TagValue};

use crate::integrity::message_mic;
use crate::{Error, Result};

use super::frame::{FrameBuilder, FrameParams, ParsedFrame};
use super::{MAX_TX_PAYLOAD, REASSEMBLY_TIMEOUT};

/// One packet of a fragmented message, with its position metadata.
#[derive(Clone, Debug)]
pub struct Fragment {
    pub index: usize,
    pub seq: u8,
    pub som: bool,
    pub eom: bool,
    pub bytes: Vec<u8>,
}

/// An outbound message split into wire-ready packets.
#[derive(Clone, Debug)]
pub struct FragmentedMessage {
    pub fragments: Vec<Fragment>,
    pub payload_len: usize,
    pub tag: TagValue,
}

impl FragmentedMessage {
    pub fn packets(&self) -> impl Iterator<Item = &[u8]> {
        self.fragments.iter().map(|f| f.bytes.as_slice())
    }

    pub fn is_fragmented(&self) -> bool {
        self.fragments.len() > 1
    }
}

/// Fragment `payload` into packets, allocating the next message tag from
/// `builder`. TO is set on every fragment.
pub fn fragment(
    builder: &mut FrameBuilder,
    dest_eid: Eid,
    msg_type: MsgType,
    payload: &[u8],
    ic: bool,
) -> FragmentedMessage {
    let tag = builder.next_tag();
    fragment_with(builder, dest_eid, tag, true, msg_type, payload, ic)
}

/// Fragment `payload` under an explicit (tag, TO) pair.
///
/// Used directly by responders, which must echo the request tag with the
/// owner bit clear rather than allocate one.
pub fn fragment_with(
    builder: &FrameBuilder,
    dest_eid: Eid,
    tag: TagValue,
    to: bool,
    msg_type: MsgType,
    payload: &[u8],
    ic: bool,
) -> FragmentedMessage {
    let mic = ic.then(|| message_mic(msg_type.0, payload));

    let mut chunks: Vec<&[u8]> = payload.chunks(MAX_TX_PAYLOAD).collect();
    if chunks.is_empty() {
        chunks.push(&[]);
    }
    let last = chunks.len() - 1;

    let fragments = chunks
        .iter()
        .enumerate()
        .map(|(index, chunk)| {
            let som = index == 0;
            let eom = index == last;
            let seq = (index as u8) & mctp::MCTP_SEQ_MASK;
            let params = FrameParams {
                dest_eid,
                msg_type,
                ic,
                som,
                eom,
                seq,
                to,
                tag,
            };
            let bytes = builder.build_raw(&params, chunk, if eom { mic } else { None });
            Fragment {
                index,
                seq,
                som,
                eom,
                bytes,
            }
        })
        .collect();

    FragmentedMessage {
        fragments,
        payload_len: payload.len(),
        tag,
    }
}

#[derive(Debug)]
struct ReassemblyBuffer {
    msg_type: u8,
    ic: bool,
    payload: Vec<u8>,
    next_seq: u8,
    deadline: Instant,
}

/// A complete reassembled message.
#[derive(Clone, Debug)]
pub struct ReassembledMessage {
    pub src_eid: Eid,
    pub tag: TagValue,
    pub msg_type: u8,
    pub ic: bool,
    pub payload: Vec<u8>,
}

/// Inbound reassembly state, keyed by (source EID, tag, TO).
///
/// Buffers live only until their message completes or the deadline
/// passes; expired buffers are dropped the next time their key is
/// touched, or eagerly via [`Reassembler::expire`].
#[derive(Debug)]
pub struct Reassembler {
    buffers: HashMap<(u8, u8, bool), ReassemblyBuffer>,
    timeout: Duration,
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Reassembler {
    pub fn new() -> Self {
        Self::with_timeout(REASSEMBLY_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            buffers: HashMap::new(),
            timeout,
        }
    }

    /// Number of in-progress messages.
    pub fn pending(&self) -> usize {
        self.buffers.len()
    }

    /// Drop buffers whose deadline has passed; returns how many were
    /// dropped.
    pub fn expire(&mut self) -> usize {
        let now = Instant::now();
        let before = self.buffers.len();
        self.buffers.retain(|_, buf| buf.deadline > now);
        before - self.buffers.len()
    }

    /// Feed one parsed frame; yields the reassembled message when its EOM
    /// fragment arrives.
    ///
    /// A single-packet frame (SOM and EOM both set) completes
    /// immediately. For fragmented messages with IC, the MIC carried by
    /// the EOM fragment is verified here over the reassembled payload.
    pub fn push(&mut self, frame: &ParsedFrame) -> Result<Option<ReassembledMessage>> {
        let key = (
            frame.header.src.0,
            frame.header.tag.0,
            frame.header.to,
        );
        let now = Instant::now();

        if let Some(buf) = self.buffers.get(&key) {
            if buf.deadline <= now {
                debug!("reassembly deadline passed for {key:?}");
                self.buffers.remove(&key);
                return Err(Error::MissingEom);
            }
        }

        if frame.header.som {
            if self.buffers.remove(&key).is_some() {
                warn!("SOM for {key:?} while reassembly was in progress");
                return Err(Error::UnexpectedSom);
            }

            if frame.header.eom {
                // Single-packet message; the MIC was already validated by
                // the frame parser.
                return Ok(Some(ReassembledMessage {
                    src_eid: frame.header.src,
                    tag: frame.header.tag,
                    msg_type: frame.msg_type,
                    ic: frame.ic,
                    payload: frame.payload.clone(),
                }));
            }

            self.buffers.insert(
                key,
                ReassemblyBuffer {
                    msg_type: frame.msg_type,
                    ic: frame.ic,
                    payload: frame.payload.clone(),
                    next_seq: (frame.header.seq + 1) & mctp::MCTP_SEQ_MASK,
                    deadline: now + self.timeout,
                },
            );
            return Ok(None);
        }

        let Some(mut buf) = self.buffers.remove(&key) else {
            debug!("fragment for {key:?} with no message in progress");
            return Err(Error::SequenceGap {
                expected: 0,
                found: frame.header.seq,
            });
        };

        if frame.header.seq != buf.next_seq {
            return Err(Error::SequenceGap {
                expected: buf.next_seq,
                found: frame.header.seq,
            });
        }

        buf.next_seq = (buf.next_seq + 1) & mctp::MCTP_SEQ_MASK;
        buf.payload.extend_from_slice(&frame.payload);

        if !frame.header.eom {
            self.buffers.insert(key, buf);
            return Ok(None);
        }
        if buf.ic {
            let Some(found) = frame.mic else {
                debug!("IC message for {key:?} completed without a MIC");
                return Err(Error::BadMic {
                    calculated: message_mic(buf.msg_type, &buf.payload),
                    found: 0,
                });
            };
            let calculated = message_mic(buf.msg_type, &buf.payload);
            if calculated != found {
                return Err(Error::BadMic { calculated, found });
            }
        }

        Ok(Some(ReassembledMessage {
            src_eid: frame.header.src,
            tag: frame.header.tag,
            msg_type: buf.msg_type,
            ic: buf.ic,
            payload: buf.payload,
        }))
    }
}
