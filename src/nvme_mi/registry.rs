// SPDX-License-Identifier: GPL-3.0-only
/*
 * Copyright (c) 2025 Code Construct
 */

//! Decoder registry.
//!
//! Maps (message kind, opcode, optional vendor id) to a decoder.
//! Registration is an explicit API returning a handle; registering over
//! an existing key replaces it, surfacing a warning rather than
//! aborting. Resolution prefers the vendor-specific entry, then the
//! plain opcode entry, then the generic hex decoder.

use std::collections::HashMap;

use log::warn;

use super::decode::{
    ControllerHealthDecoder, DataStructureEnvelopeDecoder, GenericHexDecoder,
    IdentifyControllerDecoder, LogPageDecoder, ResponseDecoder, SubsystemHealthDecoder,
    VpdDecoder,
};
use super::{MessageKind, ADMIN_GET_LOG_PAGE, ADMIN_IDENTIFY, MiOpcode};

pub type BoxedDecoder = Box<dyn ResponseDecoder + Send + Sync>;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
struct DecoderKey {
    kind: MessageKind,
    opcode: u8,
    vendor_id: Option<u16>,
}

/// Returned by [`DecoderRegistry::register`]; identifies the
/// registration for later removal.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DecoderHandle(u64);

pub struct DecoderRegistry {
    decoders: HashMap<DecoderKey, (DecoderHandle, BoxedDecoder)>,
    generic: BoxedDecoder,
    next_handle: u64,
}

impl Default for DecoderRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl DecoderRegistry {
    /// An empty registry: everything resolves to the generic decoder.
    pub fn new() -> Self {
        Self {
            decoders: HashMap::new(),
            generic: Box::new(GenericHexDecoder),
            next_handle: 0,
        }
    }

    /// A registry pre-loaded with the standard decoders.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(
            MessageKind::Mi,
            MiOpcode::ReadDataStructure as u8,
            None,
            Box::new(DataStructureEnvelopeDecoder),
        );
        registry.register(
            MessageKind::Mi,
            MiOpcode::SubsystemHealthStatusPoll as u8,
            None,
            Box::new(SubsystemHealthDecoder),
        );
        registry.register(
            MessageKind::Mi,
            MiOpcode::ControllerHealthStatusPoll as u8,
            None,
            Box::new(ControllerHealthDecoder),
        );
        registry.register(
            MessageKind::Mi,
            MiOpcode::VpdRead as u8,
            None,
            Box::new(VpdDecoder),
        );
        registry.register(
            MessageKind::Admin,
            ADMIN_GET_LOG_PAGE,
            None,
            Box::new(LogPageDecoder),
        );
        registry.register(
            MessageKind::Admin,
            ADMIN_IDENTIFY,
            None,
            Box::new(IdentifyControllerDecoder),
        );
        registry
    }

    /// Register a decoder; a later registration for the same key wins.
    pub fn register(
        &mut self,
        kind: MessageKind,
        opcode: u8,
        vendor_id: Option<u16>,
        decoder: BoxedDecoder,
    ) -> DecoderHandle {
        let key = DecoderKey {
            kind,
            opcode,
            vendor_id,
        };
        let handle = DecoderHandle(self.next_handle);
        self.next_handle += 1;
        if self.decoders.insert(key, (handle, decoder)).is_some() {
            warn!(
                "replacing decoder for {kind:?} opcode {opcode:#04x} vendor {vendor_id:?}"
            );
        }
        handle
    }

    /// Remove a registration by handle. Returns whether anything was
    /// removed; a handle superseded by a later registration no longer
    /// matches.
    pub fn unregister(&mut self, handle: DecoderHandle) -> bool {
        let before = self.decoders.len();
        self.decoders.retain(|_, (h, _)| *h != handle);
        self.decoders.len() != before
    }

    /// Resolve to a registered decoder, preferring the vendor-specific
    /// entry; `None` when nothing matched.
    pub fn resolve_registered(
        &self,
        kind: MessageKind,
        opcode: u8,
        vendor_id: Option<u16>,
    ) -> Option<&dyn ResponseDecoder> {
        if vendor_id.is_some() {
            let key = DecoderKey {
                kind,
                opcode,
                vendor_id,
            };
            if let Some((_, decoder)) = self.decoders.get(&key) {
                return Some(decoder.as_ref());
            }
        }
        let key = DecoderKey {
            kind,
            opcode,
            vendor_id: None,
        };
        self.decoders
            .get(&key)
            .map(|(_, d)| d.as_ref() as &dyn ResponseDecoder)
    }

    /// Resolve with the generic fallback.
    pub fn resolve(
        &self,
        kind: MessageKind,
        opcode: u8,
        vendor_id: Option<u16>,
    ) -> &dyn ResponseDecoder {
        self.resolve_registered(kind, opcode, vendor_id)
            .unwrap_or(self.generic.as_ref())
    }

    pub fn generic(&self) -> &dyn ResponseDecoder {
        self.generic.as_ref()
    }
}
