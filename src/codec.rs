// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! Conversion between typed [Template]s and the flat per-attribute
//! request/response fields exchanged with the native module.
//!
//! Values are encoded the way the native ABI expects them: booleans as a
//! single CK_BBOOL byte, numbers and mechanism lists as native endian
//! CK_ULONGs, dates as 8 ASCII digits and char strings according to the
//! process wide text encoding. Nested templates are carried as a self
//! describing block of `code, length, payload` entries, see
//! [encode_nested].

use crate::attribute::{
    bytes_to_text, text_to_bytes, AttrType, Attribute, AttributeValue, Date,
    Template,
};
use crate::error::{Error, Result};
use crate::pkcs11::*;

/// Marks a nested entry with no payload
const NESTED_NO_PAYLOAD: u64 = u64::MAX;

/// One raw attribute as exchanged with the native module
///
/// On requests `payload` is None and `len` is zero. On responses a
/// missing payload means the module returned no value: `len` is then
/// [CK_UNAVAILABLE_INFORMATION] when the module recognized the attribute
/// but could not provide its value.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RawAttribute {
    pub ck_type: CK_ATTRIBUTE_TYPE,
    pub payload: Option<Vec<u8>>,
    pub len: CK_ULONG,
}

impl RawAttribute {
    /// An empty field used to request an attribute value
    pub fn request(ck_type: CK_ATTRIBUTE_TYPE) -> RawAttribute {
        RawAttribute {
            ck_type: ck_type,
            payload: None,
            len: 0,
        }
    }

    pub fn with_payload(
        ck_type: CK_ATTRIBUTE_TYPE,
        payload: Vec<u8>,
    ) -> Result<RawAttribute> {
        let len = CK_ULONG::try_from(payload.len())?;
        Ok(RawAttribute {
            ck_type: ck_type,
            payload: Some(payload),
            len: len,
        })
    }

    /// A field whose value could not be obtained
    pub fn unavailable(ck_type: CK_ATTRIBUTE_TYPE) -> RawAttribute {
        RawAttribute {
            ck_type: ck_type,
            payload: None,
            len: CK_UNAVAILABLE_INFORMATION,
        }
    }

    /// Stores a value returned by the native module
    pub fn set_payload(&mut self, payload: Vec<u8>) -> Result<()> {
        self.len = CK_ULONG::try_from(payload.len())?;
        self.payload = Some(payload);
        Ok(())
    }

    /// Marks the field as returned without a value
    pub fn clear_payload(&mut self, len: CK_ULONG) {
        self.payload = None;
        self.len = len;
    }
}

fn ulong_to_bytes(val: CK_ULONG) -> Vec<u8> {
    val.to_ne_bytes().to_vec()
}

/// Reads a native endian CK_ULONG, zero-extending shorter buffers
fn bytes_to_ulong(b: &[u8]) -> Option<CK_ULONG> {
    if b.is_empty() || b.len() > CK_ULONG_SIZE {
        return None;
    }
    let mut buf = [0u8; CK_ULONG_SIZE];
    if cfg!(target_endian = "little") {
        buf[..b.len()].copy_from_slice(b);
    } else {
        buf[CK_ULONG_SIZE - b.len()..].copy_from_slice(b);
    }
    Some(CK_ULONG::from_ne_bytes(buf))
}

fn bytes_to_ulong_array(b: &[u8]) -> Option<Vec<CK_ULONG>> {
    if b.len() % CK_ULONG_SIZE != 0 {
        return None;
    }
    b.chunks_exact(CK_ULONG_SIZE)
        .map(bytes_to_ulong)
        .collect::<Option<Vec<CK_ULONG>>>()
}

/// Encodes the raw fields of a nested template in a single block.
///
/// Each entry is the attribute code and the payload length as 64 bit
/// little endian integers followed by the payload. Entries without a
/// payload carry the all-ones length and no data.
pub fn encode_nested(fields: &[RawAttribute]) -> Result<Vec<u8>> {
    let mut block = Vec::new();
    for f in fields {
        let len = match &f.payload {
            Some(p) => u64::try_from(p.len())?,
            None => NESTED_NO_PAYLOAD,
        };
        block.extend_from_slice(&u64::try_from(f.ck_type).map_err(Error::other_error)?.to_le_bytes());
        block.extend_from_slice(&len.to_le_bytes());
        if let Some(p) = &f.payload {
            block.extend_from_slice(p);
        }
    }
    Ok(block)
}

fn read_u64(block: &[u8], pos: &mut usize) -> Option<u64> {
    let end = pos.checked_add(8)?;
    let bytes: [u8; 8] = block.get(*pos..end)?.try_into().ok()?;
    *pos = end;
    Some(u64::from_le_bytes(bytes))
}

/// Splits a nested template block back into raw fields, returns None if
/// the block is malformed
pub fn decode_nested(block: &[u8]) -> Option<Vec<RawAttribute>> {
    let mut fields = Vec::new();
    let mut pos = 0;
    while pos < block.len() {
        let ck_type = CK_ULONG::try_from(read_u64(block, &mut pos)?).ok()?;
        let len = read_u64(block, &mut pos)?;
        if len == NESTED_NO_PAYLOAD {
            fields.push(RawAttribute::unavailable(ck_type));
            continue;
        }
        let end = pos.checked_add(usize::try_from(len).ok()?)?;
        let payload = block.get(pos..end)?.to_vec();
        pos = end;
        fields.push(RawAttribute::with_payload(ck_type, payload).ok()?);
    }
    Some(fields)
}

/// Encodes a single value, None for values that are not sent
pub fn encode_value(value: &AttributeValue) -> Result<Option<Vec<u8>>> {
    Ok(Some(match value {
        AttributeValue::Absent => return Ok(None),
        AttributeValue::Bool(b) => vec![CK_BBOOL::from(*b)],
        AttributeValue::Ulong(n) => ulong_to_bytes(*n),
        AttributeValue::Bytes(v) => v.clone(),
        AttributeValue::Text(s) => text_to_bytes(s),
        AttributeValue::Date(d) => d.to_bytes(),
        AttributeValue::Mechanisms(m) => {
            m.iter().flat_map(|n| n.to_ne_bytes()).collect()
        }
        AttributeValue::Template(t) => encode_nested(&encode(t)?)?,
    }))
}

/// Encodes a template in iteration order, skipping attributes with no
/// value
pub fn encode(template: &Template) -> Result<Vec<RawAttribute>> {
    let mut fields = Vec::with_capacity(template.len());
    for attr in template {
        if let Some(payload) = encode_value(attr.value())? {
            let raw = RawAttribute::with_payload(attr.get_type(), payload)?;
            fields.push(raw);
        }
    }
    Ok(fields)
}

/// Interprets raw bytes according to the classification of the attribute
/// code.
///
/// Payloads that do not fit the expected shape are returned as byte
/// strings rather than rejected.
pub fn decode_value(ck_type: CK_ATTRIBUTE_TYPE, b: &[u8]) -> AttributeValue {
    let bytes = || AttributeValue::Bytes(b.to_vec());
    match AttrType::attr_id_to_attrtype(ck_type) {
        /* tokens are not consistent in the width of booleans */
        AttrType::BoolType => {
            AttributeValue::Bool(b.iter().any(|&c| c != 0))
        }
        AttrType::NumType => match bytes_to_ulong(b) {
            Some(n) => AttributeValue::Ulong(n),
            None => bytes(),
        },
        AttrType::StringType => AttributeValue::Text(bytes_to_text(b)),
        AttrType::BytesType => bytes(),
        AttrType::DateType => match Date::from_bytes(b) {
            Some(d) => AttributeValue::Date(d),
            None => bytes(),
        },
        AttrType::UlongArrayType => match bytes_to_ulong_array(b) {
            Some(m) => AttributeValue::Mechanisms(m),
            None => bytes(),
        },
        AttrType::TemplateType => match decode_nested(b) {
            Some(fields) => AttributeValue::Template(
                fields.iter().map(decode).collect::<Template>(),
            ),
            None => bytes(),
        },
    }
}

/// Decodes a response field into an attribute, setting its read-back
/// flags
pub fn decode(raw: &RawAttribute) -> Attribute {
    let mut attr = Attribute::absent(raw.ck_type);
    match &raw.payload {
        Some(p) => {
            attr.set_value(decode_value(raw.ck_type, p));
            attr.set_present(true);
        }
        None => {
            /* recognized, but the value can't be obtained */
            attr.set_present(raw.len == CK_UNAVAILABLE_INFORMATION);
        }
    }
    attr
}
