// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! The interface this crate needs from a native cryptoki module.
//!
//! Attribute reads and the module identity are the core of what is
//! consumed; object creation and mechanism lists are optional.

use crate::codec::RawAttribute;
use crate::error::Result;
use crate::pkcs11::*;

/// Identity information reported by a module
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ModuleInfo {
    pub manufacturer: String,
    pub description: String,
    /// Library (major, minor) version
    pub library_version: (u8, u8),
    /// Cryptoki interface (major, minor) version
    pub cryptoki_version: (u8, u8),
}

pub trait NativeModule: Send + Sync {
    /// Returns the module identity
    fn info(&self) -> Result<ModuleInfo>;

    /// Reads several attributes of an object in a single call.
    ///
    /// For every field the module recognized and could return, `payload`
    /// is filled; other fields are left without payload, with `len` set
    /// to [CK_UNAVAILABLE_INFORMATION] when the module reports the value
    /// as unavailable. The return value is the call outcome, which for
    /// most modules is an error as soon as any single field fails.
    fn get_attribute_values(
        &self,
        session: CK_SESSION_HANDLE,
        object: CK_OBJECT_HANDLE,
        fields: &mut [RawAttribute],
    ) -> CK_RV;

    /// Reads a single attribute, the return value is specific to it
    fn get_attribute_value(
        &self,
        session: CK_SESSION_HANDLE,
        object: CK_OBJECT_HANDLE,
        field: &mut RawAttribute,
    ) -> CK_RV {
        self.get_attribute_values(session, object, std::slice::from_mut(field))
    }

    /// Creates an object from already encoded (and vendor translated)
    /// fields
    fn create_object(
        &self,
        _session: CK_SESSION_HANDLE,
        _fields: &[RawAttribute],
    ) -> Result<CK_OBJECT_HANDLE> {
        Err(CKR_FUNCTION_NOT_SUPPORTED)?
    }

    /// Returns the mechanisms supported by a slot, as vendor codes
    fn mechanism_list(
        &self,
        _slot: CK_SLOT_ID,
    ) -> Result<Vec<CK_MECHANISM_TYPE>> {
        Err(CKR_FUNCTION_NOT_SUPPORTED)?
    }
}
