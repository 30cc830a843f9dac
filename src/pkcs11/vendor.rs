// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! Generic vendor codes
//!
//! Algorithms that are not standardized (SM2/SM3/SM4 for example) are
//! exposed to callers under a fixed set of generic codes. Each token
//! vendor assigns its own values to these algorithms; the vendor code
//! table maps the generic codes below to the values a specific module
//! actually understands.

use crate::pkcs11::*;

pub const CKBR_VENDOR_OFFSET: CK_ULONG = 0xFFFFF000;

/* Key types */
pub const CKK_VENDOR_SM2: CK_KEY_TYPE = CKBR_VENDOR_OFFSET + 1;
pub const CKK_VENDOR_SM4: CK_KEY_TYPE = CKBR_VENDOR_OFFSET + 2;

/* Mechanisms */
pub const CKM_VENDOR_SM2_KEY_PAIR_GEN: CK_MECHANISM_TYPE =
    CKBR_VENDOR_OFFSET + 1;
pub const CKM_VENDOR_SM2: CK_MECHANISM_TYPE = CKBR_VENDOR_OFFSET + 2;
pub const CKM_VENDOR_SM2_SM3: CK_MECHANISM_TYPE = CKBR_VENDOR_OFFSET + 3;
pub const CKM_VENDOR_SM2_ENCRYPT: CK_MECHANISM_TYPE = CKBR_VENDOR_OFFSET + 4;
pub const CKM_VENDOR_SM3: CK_MECHANISM_TYPE = CKBR_VENDOR_OFFSET + 5;
pub const CKM_VENDOR_SM4_KEY_GEN: CK_MECHANISM_TYPE = CKBR_VENDOR_OFFSET + 6;
pub const CKM_VENDOR_SM4_ECB: CK_MECHANISM_TYPE = CKBR_VENDOR_OFFSET + 7;
pub const CKM_VENDOR_SM4_CBC: CK_MECHANISM_TYPE = CKBR_VENDOR_OFFSET + 8;
pub const CKM_VENDOR_SM4_MAC_GENERAL: CK_MECHANISM_TYPE =
    CKBR_VENDOR_OFFSET + 9;
pub const CKM_VENDOR_SM4_MAC: CK_MECHANISM_TYPE = CKBR_VENDOR_OFFSET + 10;
pub const CKM_VENDOR_ISO2_SM4_MAC_GENERAL: CK_MECHANISM_TYPE =
    CKBR_VENDOR_OFFSET + 11;
pub const CKM_VENDOR_ISO2_SM4_MAC: CK_MECHANISM_TYPE = CKBR_VENDOR_OFFSET + 12;
pub const CKM_VENDOR_SM4_ECB_ENCRYPT_DATA: CK_MECHANISM_TYPE =
    CKBR_VENDOR_OFFSET + 13;

/// Which code space a generic vendor name lives in
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum CodeKind {
    Mechanism,
    KeyType,
}

/// Maps a vendor symbolic name to its code
#[derive(Clone, Copy, Debug)]
struct VendorName {
    name: &'static str,
    kind: CodeKind,
    code: CK_ULONG,
}

macro_rules! vendor_name {
    ($id:ident; as $kind:ident) => {
        VendorName {
            name: stringify!($id),
            kind: CodeKind::$kind,
            code: $id,
        }
    };
}

static VENDOR_NAMES: [VendorName; 15] = [
    vendor_name!(CKK_VENDOR_SM2; as KeyType),
    vendor_name!(CKK_VENDOR_SM4; as KeyType),
    vendor_name!(CKM_VENDOR_SM2_KEY_PAIR_GEN; as Mechanism),
    vendor_name!(CKM_VENDOR_SM2; as Mechanism),
    vendor_name!(CKM_VENDOR_SM2_SM3; as Mechanism),
    vendor_name!(CKM_VENDOR_SM2_ENCRYPT; as Mechanism),
    vendor_name!(CKM_VENDOR_SM3; as Mechanism),
    vendor_name!(CKM_VENDOR_SM4_KEY_GEN; as Mechanism),
    vendor_name!(CKM_VENDOR_SM4_ECB; as Mechanism),
    vendor_name!(CKM_VENDOR_SM4_CBC; as Mechanism),
    vendor_name!(CKM_VENDOR_SM4_MAC_GENERAL; as Mechanism),
    vendor_name!(CKM_VENDOR_SM4_MAC; as Mechanism),
    vendor_name!(CKM_VENDOR_ISO2_SM4_MAC_GENERAL; as Mechanism),
    vendor_name!(CKM_VENDOR_ISO2_SM4_MAC; as Mechanism),
    vendor_name!(CKM_VENDOR_SM4_ECB_ENCRYPT_DATA; as Mechanism),
];

/// Resolves a generic vendor name (`CKM_VENDOR_*` or `CKK_VENDOR_*`)
/// to its kind and generic code
pub fn vendor_name_to_code(name: &str) -> Option<(CodeKind, CK_ULONG)> {
    VENDOR_NAMES
        .iter()
        .find(|v| v.name == name)
        .map(|v| (v.kind, v.code))
}

/// Returns the symbolic name of a generic vendor code
pub fn vendor_code_to_name(
    kind: CodeKind,
    code: CK_ULONG,
) -> Option<&'static str> {
    VENDOR_NAMES
        .iter()
        .find(|v| v.kind == kind && v.code == code)
        .map(|v| v.name)
}
