// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! A loaded native module together with the state this layer keeps for
//! it: the vendor code table selected for its identity and the adaptive
//! repair flags.

use crate::attribute::{
    set_legacy_text_encoding, Attribute, AttributeValue, Template,
};
use crate::codec::{encode, RawAttribute};
use crate::config::Config;
use crate::ec::point::repair_ec_point;
use crate::ec::signature::repair_signature;
use crate::ec::SignatureFamily;
use crate::error::Result;
use crate::ffi::Pkcs11Library;
use crate::fixup::{AdaptiveFixes, FixKind, FixState};
use crate::logger;
use crate::native::{ModuleInfo, NativeModule};
use crate::pkcs11::vendor::CodeKind;
use crate::pkcs11::*;
use crate::vendorcode::{ModuleIdentity, VendorCodeTable, VendorRules};

use log::{debug, info};

/// Direction of a vendor code translation
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum Direction {
    ToGeneric,
    ToVendor,
}

pub struct Module {
    native: Box<dyn NativeModule>,
    path: String,
    info: ModuleInfo,
    vendor: Option<VendorCodeTable>,
    fixes: AdaptiveFixes,
    ec_params_cache_size: usize,
}

impl std::fmt::Debug for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Module")
            .field("path", &self.path)
            .field("info", &self.info)
            .field("vendor", &self.vendor)
            .finish()
    }
}

impl Module {
    /// Loads and initializes the cryptoki library at `path`
    pub fn load(path: &str, config: &Config) -> Result<Module> {
        logger::init();
        let native = Pkcs11Library::load(path)?;
        Self::new(Box::new(native), path, config)
    }

    /// Sets up a module, loading the vendor code file named in the
    /// configuration if any.
    ///
    /// A malformed vendor code file is a fatal error, a file with no
    /// block matching the module is not.
    pub fn new(
        native: Box<dyn NativeModule>,
        path: &str,
        config: &Config,
    ) -> Result<Module> {
        let rules = match &config.vendor.file {
            Some(file) => Some(VendorRules::from_file(file)?),
            None => None,
        };
        Self::with_vendor_rules(native, path, config, rules.as_ref())
    }

    /// Sets up a module with an already parsed set of vendor rules
    pub fn with_vendor_rules(
        native: Box<dyn NativeModule>,
        path: &str,
        config: &Config,
        rules: Option<&VendorRules>,
    ) -> Result<Module> {
        let info = native.info()?;
        info!(
            "Module {}: {} ({}) version {}.{}",
            path,
            info.manufacturer,
            info.description,
            info.library_version.0,
            info.library_version.1
        );
        if config.attributes.legacy_text_encoding {
            set_legacy_text_encoding(true);
        }
        let identity = ModuleIdentity {
            path: path.to_string(),
            manufacturer: info.manufacturer.clone(),
            description: info.description.clone(),
            version: info.library_version,
        };
        let vendor = match rules {
            Some(r) => {
                let table = r.select(&identity);
                if table.is_none() {
                    debug!("No vendor code block matches {}", path);
                }
                table
            }
            None => None,
        };
        Ok(Module {
            native: native,
            path: path.to_string(),
            info: info,
            vendor: vendor,
            fixes: AdaptiveFixes::new(config.fixups.adaptive),
            ec_params_cache_size: config.fixups.ec_params_cache_size,
        })
    }

    pub fn native(&self) -> &dyn NativeModule {
        self.native.as_ref()
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn info(&self) -> &ModuleInfo {
        &self.info
    }

    pub fn vendor_table(&self) -> Option<&VendorCodeTable> {
        self.vendor.as_ref()
    }

    pub(crate) fn ec_params_cache_size(&self) -> usize {
        self.ec_params_cache_size
    }

    pub fn fix_state(&self, kind: FixKind) -> FixState {
        self.fixes.state(kind)
    }

    /// Translates a code returned by the module to the generic code
    pub fn vendor_to_generic(
        &self,
        kind: CodeKind,
        code: CK_ULONG,
    ) -> CK_ULONG {
        match &self.vendor {
            Some(t) => t.vendor_to_generic(kind, code),
            None => code,
        }
    }

    /// Translates a generic code to the code the module understands
    pub fn generic_to_vendor(
        &self,
        kind: CodeKind,
        code: CK_ULONG,
    ) -> CK_ULONG {
        match &self.vendor {
            Some(t) => t.generic_to_vendor(kind, code),
            None => code,
        }
    }

    /// Translates a mechanism type before it is passed to the module
    pub fn mechanism_to_vendor(
        &self,
        mech: CK_MECHANISM_TYPE,
    ) -> CK_MECHANISM_TYPE {
        self.generic_to_vendor(CodeKind::Mechanism, mech)
    }

    /// Translates a list of mechanisms returned by the module
    pub fn mechanisms_to_generic(
        &self,
        mechs: &[CK_MECHANISM_TYPE],
    ) -> Vec<CK_MECHANISM_TYPE> {
        mechs
            .iter()
            .map(|m| self.vendor_to_generic(CodeKind::Mechanism, *m))
            .collect()
    }

    /// Returns the mechanisms supported by a slot, as generic codes
    pub fn mechanism_list(
        &self,
        slot: CK_SLOT_ID,
    ) -> Result<Vec<CK_MECHANISM_TYPE>> {
        let mechs = self.native.mechanism_list(slot)?;
        Ok(self.mechanisms_to_generic(&mechs))
    }

    fn translate(
        &self,
        dir: Direction,
        kind: CodeKind,
        code: CK_ULONG,
    ) -> CK_ULONG {
        match dir {
            Direction::ToGeneric => self.vendor_to_generic(kind, code),
            Direction::ToVendor => self.generic_to_vendor(kind, code),
        }
    }

    /// Translates the code carrying attributes of `attr`, descending into
    /// nested templates
    fn translate_attribute(&self, dir: Direction, attr: &mut Attribute) {
        let value = match (attr.get_type(), attr.value()) {
            (CKA_KEY_TYPE, AttributeValue::Ulong(k)) => {
                AttributeValue::Ulong(
                    self.translate(dir, CodeKind::KeyType, *k),
                )
            }
            (CKA_KEY_GEN_MECHANISM, AttributeValue::Ulong(m)) => {
                AttributeValue::Ulong(
                    self.translate(dir, CodeKind::Mechanism, *m),
                )
            }
            (CKA_ALLOWED_MECHANISMS, AttributeValue::Mechanisms(list)) => {
                AttributeValue::Mechanisms(
                    list.iter()
                        .map(|m| self.translate(dir, CodeKind::Mechanism, *m))
                        .collect(),
                )
            }
            (_, AttributeValue::Template(tmpl)) => {
                AttributeValue::Template(self.translate_template(dir, tmpl))
            }
            _ => return,
        };
        attr.set_value(value);
    }

    fn translate_template(
        &self,
        dir: Direction,
        tmpl: &Template,
    ) -> Template {
        tmpl.iter()
            .map(|a| {
                let mut a = a.clone();
                self.translate_attribute(dir, &mut a);
                a
            })
            .collect()
    }

    /// Translates the codes of attributes read from the module
    pub fn attributes_to_generic(&self, attrs: &mut [Attribute]) {
        if self.vendor.is_none() {
            return;
        }
        for a in attrs.iter_mut() {
            self.translate_attribute(Direction::ToGeneric, a);
        }
    }

    /// Encodes a template for a write call to the module, translating
    /// generic key types and mechanisms to the vendor ones
    pub fn build_write_fields(
        &self,
        template: &Template,
    ) -> Result<Vec<RawAttribute>> {
        if self.vendor.is_none() {
            return encode(template);
        }
        encode(&self.translate_template(Direction::ToVendor, template))
    }

    /// Normalizes a CKA_EC_POINT value returned by the module
    pub fn normalize_ec_point(
        &self,
        point: Vec<u8>,
        params: &[u8],
    ) -> Vec<u8> {
        self.fixes
            .apply(FixKind::EcPoint, point, |p| repair_ec_point(p, params))
    }

    /// Normalizes a signature returned by the module.
    ///
    /// Signatures are left alone when the order length of the key curve
    /// can not be determined.
    pub fn normalize_signature(
        &self,
        signature: Vec<u8>,
        params: Option<&[u8]>,
        family: SignatureFamily,
    ) -> Vec<u8> {
        let order_len = match family.order_len(params) {
            Some(l) => l,
            None => return signature,
        };
        let kind = match family {
            SignatureFamily::Ecdsa => FixKind::Ecdsa,
            SignatureFamily::Sm2 => FixKind::Sm2,
        };
        self.fixes
            .apply(kind, signature, |s| repair_signature(s, order_len))
    }
}
