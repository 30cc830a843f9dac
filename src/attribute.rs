// Copyright 2023 Simo Sorce
// See LICENSE.txt file for terms

//! This module provides the typed attribute model: a closed set of value
//! kinds ([AttributeValue]), a single attribute carrying its read-back
//! flags ([Attribute]) and an ordered, deduplicated container of attributes
//! ([Template]). It also defines the mappings between PKCS#11 attribute
//! type values and the data type they represent as described in the
//! [AttrType] enumeration.

use std::cmp::Ordering;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

use crate::error::{Error, Result};
use crate::pkcs11::*;

/// List of attribute types we understand
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum AttrType {
    BoolType,
    NumType,
    StringType,
    BytesType,
    UlongArrayType,
    DateType,
    TemplateType,
}

impl AttrType {
    /// Finds and return the attribute id and type from its CKA_ name
    pub fn attr_name_to_id_type(s: &str) -> Result<(CK_ULONG, AttrType)> {
        match Attrmap::search_by_name(s) {
            Some(a) => Ok((a.id, a.atype)),
            None => Err(Error::not_found(s.to_string())),
        }
    }

    /// Finds the attribute type from the attribute id
    ///
    /// Unknown attribute ids are handled as byte strings
    pub fn attr_id_to_attrtype(id: CK_ULONG) -> AttrType {
        match Attrmap::search_by_id(id) {
            Some(a) => a.atype,
            None => AttrType::BytesType,
        }
    }
}

/// Returns the printable name of an attribute type, or its hexadecimal
/// value for attributes not known to this crate
pub fn attribute_name(id: CK_ATTRIBUTE_TYPE) -> String {
    match Attrmap::search_by_id(id) {
        Some(a) => a.name.to_string(),
        None => format!("0x{:08X}", id),
    }
}

/// Struct to map a PKCS#11 attribute to a type and a printable name
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct Attrmap<'a> {
    id: CK_ULONG,
    name: &'a str,
    atype: AttrType,
}

impl PartialOrd for Attrmap<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Attrmap<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl Attrmap<'_> {
    /// Convenience function to efficiently search for a mapping by id
    pub fn search_by_id(id: CK_ULONG) -> Option<&'static Attrmap<'static>> {
        match ATTRMAP.binary_search_by(|a| a.id.cmp(&id)) {
            Ok(i) => Some(&ATTRMAP[i]),
            Err(_) => None,
        }
    }

    /// Convenience function to search for a mapping by name
    pub fn search_by_name(s: &str) -> Option<&'static Attrmap<'static>> {
        ATTRMAP.iter().find(|a| a.name == s)
    }
}

/// Helper macro to populate the static attributes map
macro_rules! attrmap_element {
    ($id:expr; as $attrtype:ident) => {
        Attrmap {
            id: $id,
            name: stringify!($id),
            atype: AttrType::$attrtype,
        }
    };
}

/// The main attributes map, list all known attributes sorted by id
static ATTRMAP: &[Attrmap<'static>] = &[
    attrmap_element!(CKA_CLASS; as NumType),
    attrmap_element!(CKA_TOKEN; as BoolType),
    attrmap_element!(CKA_PRIVATE; as BoolType),
    attrmap_element!(CKA_LABEL; as StringType),
    attrmap_element!(CKA_UNIQUE_ID; as StringType),
    attrmap_element!(CKA_APPLICATION; as StringType),
    attrmap_element!(CKA_VALUE; as BytesType),
    attrmap_element!(CKA_OBJECT_ID; as BytesType),
    attrmap_element!(CKA_CERTIFICATE_TYPE; as NumType),
    attrmap_element!(CKA_ISSUER; as BytesType),
    attrmap_element!(CKA_SERIAL_NUMBER; as BytesType),
    attrmap_element!(CKA_AC_ISSUER; as BytesType),
    attrmap_element!(CKA_OWNER; as BytesType),
    attrmap_element!(CKA_ATTR_TYPES; as BytesType),
    attrmap_element!(CKA_TRUSTED; as BoolType),
    attrmap_element!(CKA_CERTIFICATE_CATEGORY; as NumType),
    attrmap_element!(CKA_JAVA_MIDP_SECURITY_DOMAIN; as NumType),
    attrmap_element!(CKA_URL; as StringType),
    attrmap_element!(CKA_HASH_OF_SUBJECT_PUBLIC_KEY; as BytesType),
    attrmap_element!(CKA_HASH_OF_ISSUER_PUBLIC_KEY; as BytesType),
    attrmap_element!(CKA_NAME_HASH_ALGORITHM; as NumType),
    attrmap_element!(CKA_CHECK_VALUE; as BytesType),
    attrmap_element!(CKA_KEY_TYPE; as NumType),
    attrmap_element!(CKA_SUBJECT; as BytesType),
    attrmap_element!(CKA_ID; as BytesType),
    attrmap_element!(CKA_SENSITIVE; as BoolType),
    attrmap_element!(CKA_ENCRYPT; as BoolType),
    attrmap_element!(CKA_DECRYPT; as BoolType),
    attrmap_element!(CKA_WRAP; as BoolType),
    attrmap_element!(CKA_UNWRAP; as BoolType),
    attrmap_element!(CKA_SIGN; as BoolType),
    attrmap_element!(CKA_SIGN_RECOVER; as BoolType),
    attrmap_element!(CKA_VERIFY; as BoolType),
    attrmap_element!(CKA_VERIFY_RECOVER; as BoolType),
    attrmap_element!(CKA_DERIVE; as BoolType),
    attrmap_element!(CKA_START_DATE; as DateType),
    attrmap_element!(CKA_END_DATE; as DateType),
    attrmap_element!(CKA_MODULUS; as BytesType),
    attrmap_element!(CKA_MODULUS_BITS; as NumType),
    attrmap_element!(CKA_PUBLIC_EXPONENT; as BytesType),
    attrmap_element!(CKA_PRIVATE_EXPONENT; as BytesType),
    attrmap_element!(CKA_PRIME_1; as BytesType),
    attrmap_element!(CKA_PRIME_2; as BytesType),
    attrmap_element!(CKA_EXPONENT_1; as BytesType),
    attrmap_element!(CKA_EXPONENT_2; as BytesType),
    attrmap_element!(CKA_COEFFICIENT; as BytesType),
    attrmap_element!(CKA_PUBLIC_KEY_INFO; as BytesType),
    attrmap_element!(CKA_PRIME; as BytesType),
    attrmap_element!(CKA_SUBPRIME; as BytesType),
    attrmap_element!(CKA_BASE; as BytesType),
    attrmap_element!(CKA_PRIME_BITS; as NumType),
    attrmap_element!(CKA_SUBPRIME_BITS; as NumType),
    attrmap_element!(CKA_VALUE_BITS; as NumType),
    attrmap_element!(CKA_VALUE_LEN; as NumType),
    attrmap_element!(CKA_EXTRACTABLE; as BoolType),
    attrmap_element!(CKA_LOCAL; as BoolType),
    attrmap_element!(CKA_NEVER_EXTRACTABLE; as BoolType),
    attrmap_element!(CKA_ALWAYS_SENSITIVE; as BoolType),
    attrmap_element!(CKA_KEY_GEN_MECHANISM; as NumType),
    attrmap_element!(CKA_MODIFIABLE; as BoolType),
    attrmap_element!(CKA_COPYABLE; as BoolType),
    attrmap_element!(CKA_DESTROYABLE; as BoolType),
    attrmap_element!(CKA_EC_PARAMS; as BytesType),
    attrmap_element!(CKA_EC_POINT; as BytesType),
    attrmap_element!(CKA_ALWAYS_AUTHENTICATE; as BoolType),
    attrmap_element!(CKA_WRAP_WITH_TRUSTED; as BoolType),
    attrmap_element!(CKA_OTP_FORMAT; as NumType),
    attrmap_element!(CKA_OTP_LENGTH; as NumType),
    attrmap_element!(CKA_OTP_TIME_INTERVAL; as NumType),
    attrmap_element!(CKA_OTP_USER_FRIENDLY_MODE; as BoolType),
    attrmap_element!(CKA_OTP_CHALLENGE_REQUIREMENT; as NumType),
    attrmap_element!(CKA_OTP_TIME_REQUIREMENT; as NumType),
    attrmap_element!(CKA_OTP_COUNTER_REQUIREMENT; as NumType),
    attrmap_element!(CKA_OTP_PIN_REQUIREMENT; as NumType),
    attrmap_element!(CKA_OTP_USER_IDENTIFIER; as StringType),
    attrmap_element!(CKA_OTP_SERVICE_IDENTIFIER; as StringType),
    attrmap_element!(CKA_OTP_SERVICE_LOGO; as BytesType),
    attrmap_element!(CKA_OTP_SERVICE_LOGO_TYPE; as StringType),
    attrmap_element!(CKA_OTP_COUNTER; as BytesType),
    attrmap_element!(CKA_OTP_TIME; as StringType),
    attrmap_element!(CKA_GOSTR3410_PARAMS; as BytesType),
    attrmap_element!(CKA_GOSTR3411_PARAMS; as BytesType),
    attrmap_element!(CKA_GOST28147_PARAMS; as BytesType),
    attrmap_element!(CKA_HW_FEATURE_TYPE; as NumType),
    attrmap_element!(CKA_RESET_ON_INIT; as BoolType),
    attrmap_element!(CKA_HAS_RESET; as BoolType),
    attrmap_element!(CKA_PIXEL_X; as NumType),
    attrmap_element!(CKA_PIXEL_Y; as NumType),
    attrmap_element!(CKA_RESOLUTION; as NumType),
    attrmap_element!(CKA_CHAR_ROWS; as NumType),
    attrmap_element!(CKA_CHAR_COLUMNS; as NumType),
    attrmap_element!(CKA_COLOR; as BoolType),
    attrmap_element!(CKA_BITS_PER_PIXEL; as NumType),
    attrmap_element!(CKA_CHAR_SETS; as StringType),
    attrmap_element!(CKA_ENCODING_METHODS; as StringType),
    attrmap_element!(CKA_MIME_TYPES; as StringType),
    attrmap_element!(CKA_MECHANISM_TYPE; as NumType),
    attrmap_element!(CKA_REQUIRED_CMS_ATTRIBUTES; as BytesType),
    attrmap_element!(CKA_DEFAULT_CMS_ATTRIBUTES; as BytesType),
    attrmap_element!(CKA_SUPPORTED_CMS_ATTRIBUTES; as BytesType),
    attrmap_element!(CKA_PROFILE_ID; as NumType),
    attrmap_element!(CKA_WRAP_TEMPLATE; as TemplateType),
    attrmap_element!(CKA_UNWRAP_TEMPLATE; as TemplateType),
    attrmap_element!(CKA_DERIVE_TEMPLATE; as TemplateType),
    attrmap_element!(CKA_ALLOWED_MECHANISMS; as UlongArrayType),
];

/* Process wide char-string encoding toggle */
static LEGACY_TEXT_ENCODING: AtomicBool = AtomicBool::new(false);

/// Selects how char-string attributes are converted to and from raw
/// bytes: UTF-8 (the default) or the legacy single byte (Latin-1)
/// encoding some older tokens use.
pub fn set_legacy_text_encoding(enable: bool) {
    LEGACY_TEXT_ENCODING.store(enable, AtomicOrdering::Relaxed);
}

pub fn legacy_text_encoding() -> bool {
    LEGACY_TEXT_ENCODING.load(AtomicOrdering::Relaxed)
}

/// Encodes a string according to the current text encoding.
/// Characters not representable in Latin-1 become '?'.
pub fn text_to_bytes(s: &str) -> Vec<u8> {
    if legacy_text_encoding() {
        s.chars()
            .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
            .collect()
    } else {
        s.as_bytes().to_vec()
    }
}

/// Decodes raw bytes according to the current text encoding
pub fn bytes_to_text(b: &[u8]) -> String {
    if legacy_text_encoding() {
        b.iter().map(|&c| char::from(c)).collect()
    } else {
        String::from_utf8_lossy(b).to_string()
    }
}

/// A CK_DATE value
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Date {
    pub year: u16,
    pub month: u8,
    pub day: u8,
}

impl Date {
    /// Parses the 8 ASCII digits (YYYYMMDD) representation
    pub fn from_bytes(b: &[u8]) -> Option<Date> {
        if b.len() != 8 || !b.iter().all(|c| c.is_ascii_digit()) {
            return None;
        }
        let num = |s: &[u8]| {
            s.iter().fold(0u16, |acc, c| acc * 10 + u16::from(c - b'0'))
        };
        Some(Date {
            year: num(&b[0..4]),
            month: u8::try_from(num(&b[4..6])).ok()?,
            day: u8::try_from(num(&b[6..8])).ok()?,
        })
    }

    /// Returns the 8 ASCII digits (YYYYMMDD) representation
    pub fn to_bytes(&self) -> Vec<u8> {
        format!("{:04}{:02}{:02}", self.year, self.month, self.day)
            .into_bytes()
    }
}

impl fmt::Display for Date {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

/// The value of an attribute
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    /// No value: not set by the caller, or not disclosed by the token
    Absent,
    Bool(bool),
    Ulong(CK_ULONG),
    Bytes(Vec<u8>),
    Text(String),
    Date(Date),
    Mechanisms(Vec<CK_MECHANISM_TYPE>),
    Template(Template),
}

/// A typed attribute
///
/// The `present` and `sensitive` flags are only meaningful on attributes
/// read back from a token. Two attributes compare equal when code and
/// value match; the read-back flags are not part of the comparison.
#[derive(Debug, Clone)]
pub struct Attribute {
    ck_type: CK_ATTRIBUTE_TYPE,
    value: AttributeValue,
    present: bool,
    sensitive: bool,
}

impl PartialEq for Attribute {
    fn eq(&self, other: &Self) -> bool {
        self.ck_type == other.ck_type && self.value == other.value
    }
}

macro_rules! attr_getter {
    (make $name:ident; with $r:ty; $variant:ident) => {
        #[doc = concat!("Returns the value as a `", stringify!($r), "`")]
        ///
        /// Returns a CKR_ATTRIBUTE_TYPE_INVALID error if the value is of a
        /// different kind, and an attribute not found error if no value
        /// is available
        pub fn $name(&self) -> Result<$r> {
            match &self.value {
                AttributeValue::$variant(v) => Ok(v.clone()),
                AttributeValue::Absent => {
                    Err(Error::not_found(attribute_name(self.ck_type)))
                }
                _ => Err(CKR_ATTRIBUTE_TYPE_INVALID)?,
            }
        }
    };
}

impl Attribute {
    /// Creates an attribute from a code and a value
    pub fn new(t: CK_ATTRIBUTE_TYPE, value: AttributeValue) -> Attribute {
        Attribute {
            ck_type: t,
            value: value,
            present: false,
            sensitive: false,
        }
    }

    /// Creates an attribute with no value
    pub fn absent(t: CK_ATTRIBUTE_TYPE) -> Attribute {
        Self::new(t, AttributeValue::Absent)
    }

    pub fn from_bool(t: CK_ATTRIBUTE_TYPE, val: bool) -> Attribute {
        Self::new(t, AttributeValue::Bool(val))
    }

    pub fn from_ulong(t: CK_ATTRIBUTE_TYPE, val: CK_ULONG) -> Attribute {
        Self::new(t, AttributeValue::Ulong(val))
    }

    pub fn from_bytes(t: CK_ATTRIBUTE_TYPE, val: Vec<u8>) -> Attribute {
        Self::new(t, AttributeValue::Bytes(val))
    }

    pub fn from_string(t: CK_ATTRIBUTE_TYPE, val: String) -> Attribute {
        Self::new(t, AttributeValue::Text(val))
    }

    pub fn from_date(t: CK_ATTRIBUTE_TYPE, val: Date) -> Attribute {
        Self::new(t, AttributeValue::Date(val))
    }

    pub fn from_mechanisms(
        t: CK_ATTRIBUTE_TYPE,
        val: Vec<CK_MECHANISM_TYPE>,
    ) -> Attribute {
        Self::new(t, AttributeValue::Mechanisms(val))
    }

    pub fn from_template(t: CK_ATTRIBUTE_TYPE, val: Template) -> Attribute {
        Self::new(t, AttributeValue::Template(val))
    }

    /// Returns the PKCS#11 attribute 'type' which is the attribute ID
    pub fn get_type(&self) -> CK_ATTRIBUTE_TYPE {
        self.ck_type
    }

    pub fn value(&self) -> &AttributeValue {
        &self.value
    }

    pub fn set_value(&mut self, value: AttributeValue) {
        self.value = value;
    }

    pub fn clear_value(&mut self) {
        self.value = AttributeValue::Absent;
    }

    pub fn has_value(&self) -> bool {
        self.value != AttributeValue::Absent
    }

    /// The token recognizes this attribute on the object
    pub fn present(&self) -> bool {
        self.present
    }

    /// The token confirmed the attribute exists but refused to disclose
    /// its value
    pub fn sensitive(&self) -> bool {
        self.sensitive
    }

    pub fn set_present(&mut self, present: bool) {
        self.present = present;
    }

    pub fn set_sensitive(&mut self, sensitive: bool) {
        self.sensitive = sensitive;
    }

    /// Returns the name of the attribute as an allocated String
    pub fn name(&self) -> String {
        attribute_name(self.ck_type)
    }

    attr_getter!(make to_bool; with bool; Bool);
    attr_getter!(make to_ulong; with CK_ULONG; Ulong);
    attr_getter!(make to_bytes; with Vec<u8>; Bytes);
    attr_getter!(make to_string; with String; Text);
    attr_getter!(make to_date; with Date; Date);
    attr_getter!(make to_mechanisms; with Vec<CK_MECHANISM_TYPE>; Mechanisms);
    attr_getter!(make to_template; with Template; Template);

    /// Returns a reference to the byte string value, if that is the kind
    /// of value this attribute holds
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match &self.value {
            AttributeValue::Bytes(v) => Some(v.as_slice()),
            _ => None,
        }
    }
}

/// An ordered set of attributes where each attribute code appears at most
/// once.
///
/// Setting an attribute whose code is already in the template removes the
/// previous entry and appends the new one, so iteration follows the order
/// of the last write of each code.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Template {
    attributes: Vec<Attribute>,
}

impl Template {
    pub fn new() -> Template {
        Template {
            attributes: Vec::new(),
        }
    }

    /// Inserts an attribute, replacing any previous one with the same code
    pub fn set(&mut self, attr: Attribute) -> &mut Self {
        let t = attr.get_type();
        self.attributes.retain(|a| a.get_type() != t);
        self.attributes.push(attr);
        self
    }

    pub fn with(mut self, attr: Attribute) -> Self {
        self.set(attr);
        self
    }

    pub fn with_bool(self, t: CK_ATTRIBUTE_TYPE, val: bool) -> Self {
        self.with(Attribute::from_bool(t, val))
    }

    pub fn with_ulong(self, t: CK_ATTRIBUTE_TYPE, val: CK_ULONG) -> Self {
        self.with(Attribute::from_ulong(t, val))
    }

    pub fn with_bytes(self, t: CK_ATTRIBUTE_TYPE, val: &[u8]) -> Self {
        self.with(Attribute::from_bytes(t, val.to_vec()))
    }

    pub fn with_string(self, t: CK_ATTRIBUTE_TYPE, val: &str) -> Self {
        self.with(Attribute::from_string(t, val.to_string()))
    }

    pub fn with_date(self, t: CK_ATTRIBUTE_TYPE, val: Date) -> Self {
        self.with(Attribute::from_date(t, val))
    }

    pub fn with_mechanisms(
        self,
        t: CK_ATTRIBUTE_TYPE,
        val: &[CK_MECHANISM_TYPE],
    ) -> Self {
        self.with(Attribute::from_mechanisms(t, val.to_vec()))
    }

    pub fn with_template(self, t: CK_ATTRIBUTE_TYPE, val: Template) -> Self {
        self.with(Attribute::from_template(t, val))
    }

    pub fn get(&self, t: CK_ATTRIBUTE_TYPE) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.get_type() == t)
    }

    pub fn get_mut(&mut self, t: CK_ATTRIBUTE_TYPE) -> Option<&mut Attribute> {
        self.attributes.iter_mut().find(|a| a.get_type() == t)
    }

    pub fn contains(&self, t: CK_ATTRIBUTE_TYPE) -> bool {
        self.get(t).is_some()
    }

    pub fn remove(&mut self, t: CK_ATTRIBUTE_TYPE) -> Option<Attribute> {
        let idx = self.attributes.iter().position(|a| a.get_type() == t)?;
        Some(self.attributes.remove(idx))
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Attribute> {
        self.attributes.iter()
    }

    /// Returns the attribute codes in iteration order
    pub fn codes(&self) -> Vec<CK_ATTRIBUTE_TYPE> {
        self.attributes.iter().map(|a| a.get_type()).collect()
    }
}

impl FromIterator<Attribute> for Template {
    fn from_iter<I: IntoIterator<Item = Attribute>>(iter: I) -> Self {
        let mut tmpl = Template::new();
        for a in iter {
            tmpl.set(a);
        }
        tmpl
    }
}

impl IntoIterator for Template {
    type Item = Attribute;
    type IntoIter = std::vec::IntoIter<Attribute>;

    fn into_iter(self) -> Self::IntoIter {
        self.attributes.into_iter()
    }
}

impl<'a> IntoIterator for &'a Template {
    type Item = &'a Attribute;
    type IntoIter = std::slice::Iter<'a, Attribute>;

    fn into_iter(self) -> Self::IntoIter {
        self.attributes.iter()
    }
}
