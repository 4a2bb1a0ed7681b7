// SPDX-License-Identifier: GPL-3.0-only
/*
 * Copyright (c) 2025 Code Construct
 */

//! Decoded response representation.
//!
//! Decoders populate an ordered field table: names stay in insertion
//! order so pretty-printing and the JSON export are stable run to run.
//! Each field keeps the raw byte span it was decoded from, which lets
//! captures be cross-checked against their decode.

use std::fmt;

use serde_json::{json, Map, Value};

use super::{describe_admin_opcode, MessageKind, MiOpcode, MiStatus};

/// A decoded field value.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Text(String),
    Uint(u64),
    List(Vec<u16>),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(text) => f.write_str(text),
            FieldValue::Uint(n) => write!(f, "{n}"),
            FieldValue::List(items) => {
                let rendered: Vec<String> = items.iter().map(|id| id.to_string()).collect();
                write!(f, "[{}]", rendered.join(", "))
            }
        }
    }
}

impl FieldValue {
    fn to_json(&self) -> Value {
        match self {
            FieldValue::Text(text) => json!(text),
            FieldValue::Uint(n) => json!(n),
            FieldValue::List(items) => json!(items),
        }
    }
}

/// One named field with the raw span it consumed.
#[derive(Clone, Debug)]
pub struct DecodedField {
    pub name: String,
    pub value: FieldValue,
    pub raw: Vec<u8>,
}

/// A decoded NVMe-MI response.
#[derive(Clone, Debug)]
pub struct DecodedResponse {
    /// NVMe-MI status was zero.
    pub success: bool,
    /// Raw NVMe-MI status byte.
    pub status: u8,
    /// Opcode echoed in the response header.
    pub opcode: u8,
    /// Which command set the opcode belongs to.
    pub kind: MessageKind,
    /// Set when decoding stopped early but some fields were recovered.
    pub partial: bool,
    fields: Vec<DecodedField>,
    /// The complete message payload the decode ran over.
    pub raw: Vec<u8>,
}

impl DecodedResponse {
    pub fn new(kind: MessageKind, opcode: u8, status: u8, raw: Vec<u8>) -> Self {
        Self {
            success: status == 0,
            status,
            opcode,
            kind,
            partial: false,
            fields: Vec::new(),
            raw,
        }
    }

    /// Command name for display.
    pub fn command_name(&self) -> String {
        match self.kind {
            MessageKind::Mi => MiOpcode::describe(self.opcode),
            MessageKind::Admin => describe_admin_opcode(self.opcode),
        }
    }

    /// Append a field, preserving insertion order.
    pub fn add_field(&mut self, name: impl Into<String>, value: FieldValue, raw: &[u8]) {
        self.fields.push(DecodedField {
            name: name.into(),
            value,
            raw: raw.to_vec(),
        });
    }

    pub fn get(&self, name: &str) -> Option<&DecodedField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Rendered value of a field, if present.
    pub fn value(&self, name: &str) -> Option<String> {
        self.get(name).map(|f| f.value.to_string())
    }

    pub fn fields(&self) -> impl Iterator<Item = &DecodedField> {
        self.fields.iter()
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Multi-line rendering: command, status, then one line per field.
    pub fn pretty_print(&self) -> String {
        let mut out = format!(
            "{} ({:#04x})\nStatus: {} ({:#04x})\n",
            self.command_name(),
            self.opcode,
            MiStatus::describe(self.status),
            self.status
        );
        for field in &self.fields {
            out.push_str(&format!("  {:<28}: {}\n", field.name, field.value));
        }
        if self.partial {
            out.push_str("  (partial decode)\n");
        }
        out
    }

    /// One-line rendering.
    pub fn summary(&self) -> String {
        format!(
            "{}: {} ({} field{})",
            self.command_name(),
            if self.success { "OK" } else { "FAILED" },
            self.fields.len(),
            if self.fields.len() == 1 { "" } else { "s" },
        )
    }

    /// Ordered JSON export: status metadata plus a `fields` object in
    /// insertion order, each with its rendered value and raw hex span.
    pub fn to_json(&self) -> Value {
        let mut fields = Map::new();
        for field in &self.fields {
            fields.insert(
                field.name.clone(),
                json!({
                    "value": field.value.to_json(),
                    "raw": to_hex(&field.raw),
                }),
            );
        }
        json!({
            "command": self.command_name(),
            "opcode": self.opcode,
            "success": self.success,
            "status": self.status,
            "partial": self.partial,
            "fields": Value::Object(fields),
        })
    }
}

/// Lower-case hex, no separators.
pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Inverse of [`to_hex`]; accepts optional whitespace between bytes.
pub fn from_hex(text: &str) -> Option<Vec<u8>> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.len() % 2 != 0 {
        return None;
    }
    (0..compact.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&compact[i..i + 2], 16).ok())
        .collect()
}
