// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! Vendor code quirks
//!
//! Tokens disagree on the numeric values of non standard mechanisms and
//! key types. A vendor code file lists blocks of rules; each block names
//! the modules it applies to and the values those modules use for the
//! generic `CKM_VENDOR_*` and `CKK_VENDOR_*` codes:
//!
//! ```text
//! <vendorcode>
//! module.path libacme:acme-p11
//! module.mid Acme
//! module.version 2.0-2.9:3.1
//! CKK_VENDOR_SM2 0X80000146
//! CKM_VENDOR_SM2 2147516418
//! </vendorcode>
//! ```
//!
//! The first block matching the loaded module is used to build a
//! [VendorCodeTable].

use std::fs;

use crate::error::{Error, Result};
use crate::misc::module_file_name;
use crate::pkcs11::vendor::{
    vendor_code_to_name, vendor_name_to_code, CodeKind,
};
use crate::pkcs11::*;

use bimap::BiMap;
use log::{debug, info};

const BLOCK_START: &str = "<vendorcode>";
const BLOCK_END: &str = "</vendorcode>";

/// The identity of a loaded module, as matched by vendor rules
#[derive(Debug, Clone, Default)]
pub struct ModuleIdentity {
    /// Path the module was loaded from, only the file name is matched
    pub path: String,
    pub manufacturer: String,
    pub description: String,
    /// Library (major, minor) version
    pub version: (u8, u8),
}

/// Inclusive range of packed `(major << 8) | minor` versions
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
struct VersionRange {
    low: u16,
    high: u16,
}

impl VersionRange {
    fn contains(&self, version: u16) -> bool {
        self.low <= version && version <= self.high
    }
}

fn pack_version(major: u8, minor: u8) -> u16 {
    (u16::from(major) << 8) | u16::from(minor)
}

fn parse_version(s: &str) -> Result<u16> {
    let (major, minor) = match s.split_once('.') {
        Some(v) => v,
        None => {
            return Err(Error::config_error(format!("invalid version '{}'", s)))
        }
    };
    let major = major.trim().parse::<u8>().map_err(|_| {
        Error::config_error(format!("invalid major version in '{}'", s))
    })?;
    let minor = minor.trim().parse::<u8>().map_err(|_| {
        Error::config_error(format!("invalid minor version in '{}'", s))
    })?;
    Ok(pack_version(major, minor))
}

fn parse_version_range(s: &str) -> Result<VersionRange> {
    match s.split_once('-') {
        Some((low, high)) => Ok(VersionRange {
            low: parse_version(low)?,
            high: parse_version(high)?,
        }),
        None => {
            let v = parse_version(s)?;
            Ok(VersionRange { low: v, high: v })
        }
    }
}

fn parse_code(s: &str) -> Result<CK_ULONG> {
    let parsed = match s.strip_prefix("0X").or_else(|| s.strip_prefix("0x")) {
        Some(hex) => CK_ULONG::from_str_radix(hex, 16),
        None => s.parse::<CK_ULONG>(),
    };
    parsed.map_err(|_| Error::config_error(format!("invalid code '{}'", s)))
}

/// Splits a colon separated list of match strings
fn parse_match_list(s: &str) -> Vec<String> {
    s.split(':')
        .map(|m| m.trim().to_lowercase())
        .filter(|m| !m.is_empty())
        .collect()
}

/// One `<vendorcode>` block
#[derive(Debug, Clone, Default)]
pub struct VendorRule {
    paths: Vec<String>,
    manufacturers: Vec<String>,
    descriptions: Vec<String>,
    versions: Vec<VersionRange>,
    mechanisms: Vec<(CK_MECHANISM_TYPE, CK_MECHANISM_TYPE)>,
    key_types: Vec<(CK_KEY_TYPE, CK_KEY_TYPE)>,
}

/// Adds a generic -> vendor pair to one code space of a block, each
/// generic name and each vendor value may appear only once
fn add_code(
    list: &mut Vec<(CK_ULONG, CK_ULONG)>,
    kind: CodeKind,
    name: &str,
    generic: CK_ULONG,
    vendor: CK_ULONG,
) -> Result<()> {
    if list.iter().any(|(g, _)| *g == generic) {
        return Err(Error::config_error(format!(
            "vendor code name '{}' is defined twice",
            name
        )));
    }
    if let Some((g, _)) = list.iter().find(|(_, v)| *v == vendor) {
        return Err(Error::config_error(format!(
            "vendor value {:#X} of '{}' is already used by {}",
            vendor,
            name,
            vendor_code_to_name(kind, *g).unwrap_or("another name")
        )));
    }
    list.push((generic, vendor));
    Ok(())
}

fn contains_any(value: &str, list: &[String]) -> bool {
    let value = value.to_lowercase();
    list.iter().any(|m| value.contains(m.as_str()))
}

impl VendorRule {
    fn set_line(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "module.path" => self.paths = parse_match_list(value),
            "module.mid" => self.manufacturers = parse_match_list(value),
            "module.description" => {
                self.descriptions = parse_match_list(value)
            }
            "module.version" => {
                self.versions = value
                    .split(':')
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(parse_version_range)
                    .collect::<Result<Vec<VersionRange>>>()?
            }
            name => {
                let code = parse_code(value)?;
                match vendor_name_to_code(name) {
                    Some((kind, generic)) => {
                        let list = match kind {
                            CodeKind::Mechanism => &mut self.mechanisms,
                            CodeKind::KeyType => &mut self.key_types,
                        };
                        add_code(list, kind, name, generic, code)?
                    }
                    None => {
                        return Err(Error::config_error(format!(
                            "unknown vendor code name '{}'",
                            name
                        )))
                    }
                }
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.paths.is_empty()
            && self.manufacturers.is_empty()
            && self.descriptions.is_empty()
        {
            return Err(Error::config_error(
                "vendor code block has no module.path, module.mid or \
                 module.description selector"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Returns true if every populated predicate accepts the identity
    pub fn matches(&self, id: &ModuleIdentity) -> bool {
        if !self.paths.is_empty()
            && !contains_any(&module_file_name(&id.path), &self.paths)
        {
            return false;
        }
        if !self.manufacturers.is_empty()
            && !contains_any(&id.manufacturer, &self.manufacturers)
        {
            return false;
        }
        if !self.descriptions.is_empty()
            && !contains_any(&id.description, &self.descriptions)
        {
            return false;
        }
        if !self.versions.is_empty() {
            let version = pack_version(id.version.0, id.version.1);
            if !self.versions.iter().any(|r| r.contains(version)) {
                return false;
            }
        }
        true
    }
}

/// The ordered list of rules of a vendor code file
#[derive(Debug, Clone, Default)]
pub struct VendorRules {
    rules: Vec<VendorRule>,
}

impl VendorRules {
    /// Parses the vendor code file format
    pub fn parse(data: &str) -> Result<VendorRules> {
        let mut rules = Vec::new();
        let mut current: Option<VendorRule> = None;
        for (num, line) in data.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let lerr = |msg: &str| {
                Error::config_error(format!("line {}: {}", num + 1, msg))
            };
            match line {
                BLOCK_START => {
                    if current.is_some() {
                        return Err(lerr("nested vendor code block"));
                    }
                    current = Some(VendorRule::default());
                }
                BLOCK_END => match current.take() {
                    Some(rule) => {
                        rule.validate().map_err(|e| lerr(&e.to_string()))?;
                        rules.push(rule);
                    }
                    None => return Err(lerr("unexpected block end")),
                },
                _ => {
                    let rule = match current.as_mut() {
                        Some(r) => r,
                        None => return Err(lerr("line outside of a block")),
                    };
                    let (key, value) =
                        match line.split_once(char::is_whitespace) {
                            Some((k, v)) => (k, v.trim()),
                            None => return Err(lerr("missing value")),
                        };
                    rule.set_line(key, value)
                        .map_err(|e| lerr(&e.to_string()))?;
                }
            }
        }
        if current.is_some() {
            return Err(Error::config_error(
                "unterminated vendor code block".to_string(),
            ));
        }
        Ok(VendorRules { rules: rules })
    }

    pub fn from_file(filename: &str) -> Result<VendorRules> {
        let data = fs::read_to_string(filename).map_err(|e| {
            Error::config_error(format!(
                "failed to read vendor code file {}: {}",
                filename, e
            ))
        })?;
        Self::parse(&data)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Selects the first rule matching the module and builds its code
    /// table, None when no rule matches
    pub fn select(&self, id: &ModuleIdentity) -> Option<VendorCodeTable> {
        let (idx, rule) =
            self.rules.iter().enumerate().find(|(_, r)| r.matches(id))?;
        info!(
            "Vendor code block {} selected for module {}",
            idx + 1,
            module_file_name(&id.path)
        );
        Some(VendorCodeTable::from_rule(rule))
    }
}

/// Bidirectional generic <-> vendor code maps of one module
#[derive(Debug, Clone, Default)]
pub struct VendorCodeTable {
    mechanisms: BiMap<CK_MECHANISM_TYPE, CK_MECHANISM_TYPE>,
    key_types: BiMap<CK_KEY_TYPE, CK_KEY_TYPE>,
}

impl VendorCodeTable {
    fn from_rule(rule: &VendorRule) -> VendorCodeTable {
        let mut table = VendorCodeTable::default();
        /* pairs are unique on both sides once the block parsed */
        for (generic, vendor) in &rule.mechanisms {
            let _ = table.mechanisms.insert_no_overwrite(*generic, *vendor);
        }
        for (generic, vendor) in &rule.key_types {
            let _ = table.key_types.insert_no_overwrite(*generic, *vendor);
        }
        debug!(
            "Vendor code table: {} mechanisms, {} key types",
            table.mechanisms.len(),
            table.key_types.len()
        );
        table
    }

    fn map(&self, kind: CodeKind) -> &BiMap<CK_ULONG, CK_ULONG> {
        match kind {
            CodeKind::Mechanism => &self.mechanisms,
            CodeKind::KeyType => &self.key_types,
        }
    }

    /// Translates a vendor code to the generic one, unknown codes are
    /// returned unchanged
    pub fn vendor_to_generic(
        &self,
        kind: CodeKind,
        code: CK_ULONG,
    ) -> CK_ULONG {
        match self.map(kind).get_by_right(&code) {
            Some(generic) => *generic,
            None => code,
        }
    }

    /// Translates a generic code to the vendor one, unknown codes are
    /// returned unchanged
    pub fn generic_to_vendor(
        &self,
        kind: CodeKind,
        code: CK_ULONG,
    ) -> CK_ULONG {
        match self.map(kind).get_by_left(&code) {
            Some(vendor) => *vendor,
            None => code,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.mechanisms.is_empty() && self.key_types.is_empty()
    }

    /// Returns the (generic, vendor) pairs of one code space, sorted by
    /// generic code
    pub fn entries(&self, kind: CodeKind) -> Vec<(CK_ULONG, CK_ULONG)> {
        let mut v: Vec<(CK_ULONG, CK_ULONG)> =
            self.map(kind).iter().map(|(g, v)| (*g, *v)).collect();
        v.sort();
        v
    }
}
