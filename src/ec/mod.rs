// Copyright 2023 - 2024 Simo Sorce, Jakub Jelen
// See LICENSE.txt file for terms

//! This module resolves elliptic curve sizes from encoded domain
//! parameters (CKA_EC_PARAMS) and hosts the repair routines applied to
//! EC points and ECDSA-family signatures returned by tokens.

use std::collections::HashMap;
use std::sync::LazyLock;

use crate::kasn1::oid::*;
use crate::kasn1::{der_oid, ECParameters};
use crate::pkcs11::vendor::*;
use crate::pkcs11::*;

use asn1;

pub mod point;
pub mod signature;

/* Fixed encoding sizes for Edwards and Montgomery curves */
pub const BITS_ED25519: usize = 256;
pub const BITS_ED448: usize = 456;
pub const BITS_X25519: usize = 256;
pub const BITS_X448: usize = 448;

const EC_POINT_BYTES_ED25519: usize = (BITS_ED25519 + 7) / 8;
const EC_POINT_BYTES_ED448: usize = (BITS_ED448 + 7) / 8;
const EC_POINT_BYTES_X25519: usize = (BITS_X25519 + 7) / 8;
const EC_POINT_BYTES_X448: usize = (BITS_X448 + 7) / 8;

/// Order length used for SM2 signatures when the key domain parameters
/// are not available
pub const SM2_ORDER_BYTES: usize = 32;

/* Curve names as used in CurveName PrinableString */
pub const PRIME256V1: &str = "prime256v1";
pub const SECP256R1: &str = "secp256r1";
pub const SECP256K1: &str = "secp256k1";
pub const SECP384R1: &str = "secp384r1";
pub const SECP521R1: &str = "secp521r1";
pub const SM2P256V1: &str = "sm2p256v1";
pub const EDWARDS25519: &str = "edwards25519";
pub const EDWARDS448: &str = "edwards448";
pub const CURVE25519: &str = "curve25519";
pub const CURVE448: &str = "curve448";

/// Byte lengths of a Weierstrass curve
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct CurveSize {
    /// Length of a field element, the size of each point coordinate
    pub field_bytes: usize,
    /// Length of the group order, the size of each signature component
    pub order_bytes: usize,
}

/// Parses the bundled curve table.
///
/// Each line holds the hex encoding of the DER encoded curve OID, the
/// field size in bits and, optionally, the order size in bits when it
/// differs from the field size.
fn parse_curve_table(data: &str) -> HashMap<String, CurveSize> {
    let mut table = HashMap::new();
    for line in data.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        let bits: Vec<usize> = match fields[1..]
            .iter()
            .map(|f| f.parse::<usize>())
            .collect::<std::result::Result<Vec<usize>, _>>()
        {
            Ok(b) => b,
            Err(_) => continue,
        };
        let (field_bits, order_bits) = match bits.as_slice() {
            [f] => (*f, *f),
            [f, o] => (*f, *o),
            _ => continue,
        };
        table.insert(
            fields[0].to_ascii_lowercase(),
            CurveSize {
                field_bytes: (field_bits + 7) / 8,
                order_bytes: (order_bits + 7) / 8,
            },
        );
    }
    table
}

static CURVE_TABLE: LazyLock<HashMap<String, CurveSize>> =
    LazyLock::new(|| parse_curve_table(include_str!("curves.txt")));

/// Return the OID for the given named curve
fn curvename_to_oid(name: &str) -> Option<asn1::ObjectIdentifier> {
    match name {
        PRIME256V1 | SECP256R1 => Some(EC_SECP256R1),
        SECP256K1 => Some(EC_SECP256K1),
        SECP384R1 => Some(EC_SECP384R1),
        SECP521R1 => Some(EC_SECP521R1),
        SM2P256V1 => Some(EC_SM2P256V1),
        EDWARDS25519 => Some(ED25519_OID),
        EDWARDS448 => Some(ED448_OID),
        CURVE25519 => Some(X25519_OID),
        CURVE448 => Some(X448_OID),
        _ => None,
    }
}

/// Returns the curve OID referenced by the domain parameters, either
/// directly or through a curve name
pub fn params_to_oid(params: &[u8]) -> Option<asn1::ObjectIdentifier> {
    match asn1::parse_single::<ECParameters>(params).ok()? {
        ECParameters::OId(oid) => Some(oid),
        ECParameters::CurveName(c) => curvename_to_oid(c.as_str()),
        ECParameters::ImplicitlyCA(_) => None,
    }
}

/// Returns the field and order byte lengths of a Weierstrass curve given
/// its encoded domain parameters, or None for unknown curves
pub fn curve_size(params: &[u8]) -> Option<CurveSize> {
    if let Some(cs) = CURVE_TABLE.get(&hex::encode(params)) {
        return Some(*cs);
    }
    /* maybe a curve name, look it up by the OID it stands for */
    let oid = params_to_oid(params)?;
    let der = der_oid(&oid).ok()?;
    if der.as_slice() == params {
        return None;
    }
    CURVE_TABLE.get(&hex::encode(der)).copied()
}

/// Returns the fixed public key length of an Edwards or Montgomery curve
pub fn fixed_point_len(params: &[u8]) -> Option<usize> {
    match params_to_oid(params)? {
        ED25519_OID => Some(EC_POINT_BYTES_ED25519),
        ED448_OID => Some(EC_POINT_BYTES_ED448),
        X25519_OID => Some(EC_POINT_BYTES_X25519),
        X448_OID => Some(EC_POINT_BYTES_X448),
        _ => None,
    }
}

/// Signature schemes whose output may need repairing
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SignatureFamily {
    Ecdsa,
    Sm2,
}

impl SignatureFamily {
    /// Returns the signature family of a (generic) mechanism, or None for
    /// mechanisms producing signatures that are never repaired
    pub fn from_mechanism(mech: CK_MECHANISM_TYPE) -> Option<SignatureFamily> {
        match mech {
            CKM_ECDSA | CKM_ECDSA_SHA1 | CKM_ECDSA_SHA224
            | CKM_ECDSA_SHA256 | CKM_ECDSA_SHA384 | CKM_ECDSA_SHA512
            | CKM_ECDSA_SHA3_224 | CKM_ECDSA_SHA3_256 | CKM_ECDSA_SHA3_384
            | CKM_ECDSA_SHA3_512 => Some(SignatureFamily::Ecdsa),
            CKM_VENDOR_SM2 | CKM_VENDOR_SM2_SM3 => Some(SignatureFamily::Sm2),
            _ => None,
        }
    }

    /// The order length to use for a key whose domain parameters are
    /// `params`
    pub fn order_len(&self, params: Option<&[u8]>) -> Option<usize> {
        match params.and_then(curve_size) {
            Some(cs) => Some(cs.order_bytes),
            None => match self {
                SignatureFamily::Sm2 => Some(SM2_ORDER_BYTES),
                SignatureFamily::Ecdsa => None,
            },
        }
    }
}
