// Copyright 2023 Simo Sorce
// See LICENSE.txt file for terms

//! This module provides helpers to (de)serialize the few Abstract Syntax
//! Notation One (ASN.1) structures token output normalization needs, using
//! DER (Distinguished Encoding Rules) encoding.

use crate::error::Result;

use asn1;

pub mod oid;

/// DER tag of the OCTET STRING type
pub const DER_OCTET_STRING_TAG: u8 = 0x04;
/// DER tag of the constructed SEQUENCE type
pub const DER_SEQUENCE_TAG: u8 = 0x30;
/// DER tag of the INTEGER type
pub const DER_INTEGER_TAG: u8 = 0x02;

/// Defined in ANSI X9.62
///
/// This structure has been modified to remove the CHOICE of explicit
/// parameters, tokens that use explicit parameters are not handled
///
/// An older version is also defined in [RFC 5480](https://www.rfc-editor.org/rfc/rfc5480)
/// but this version does not define the CurveName CHOICE
#[derive(asn1::Asn1Read, asn1::Asn1Write)]
pub enum ECParameters<'a> {
    /// Aka as namedCurve, is an oid that identifies the curve
    OId(asn1::ObjectIdentifier),

    /// Aka implicitCurve, indicates that the parameters are defined out of band
    ///
    /// Should never be used
    ImplicitlyCA(asn1::Null),

    /// Identifies the curve via its standard printable name
    CurveName(asn1::PrintableString<'a>),
}

/// Wraps a buffer in a DER OCTET STRING
pub fn der_octet_string(data: &[u8]) -> Result<Vec<u8>> {
    Ok(asn1::write_single(&data)?)
}

/// Returns the DER encoding of an object identifier
pub fn der_oid(oid: &asn1::ObjectIdentifier) -> Result<Vec<u8>> {
    Ok(asn1::write_single(oid)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ec_parameters() {
        let der = der_oid(&oid::EC_SECP256R1).unwrap();
        assert_eq!(hex::encode(&der), "06082a8648ce3d030107");
        match asn1::parse_single::<ECParameters>(&der).unwrap() {
            ECParameters::OId(o) => assert_eq!(o, oid::EC_SECP256R1),
            _ => panic!("wrong choice"),
        }

        let name = ECParameters::CurveName(
            asn1::PrintableString::new("edwards25519").unwrap(),
        );
        let der = asn1::write_single(&name).unwrap();
        assert_eq!(der[0], 0x13);
        match asn1::parse_single::<ECParameters>(&der).unwrap() {
            ECParameters::CurveName(c) => {
                assert_eq!(c.as_str(), "edwards25519")
            }
            _ => panic!("wrong choice"),
        }
    }

    #[test]
    fn octet_string() {
        assert_eq!(der_octet_string(&[1, 2, 3]).unwrap(), vec![4, 3, 1, 2, 3]);
        let big = vec![0xAAu8; 200];
        let der = der_octet_string(&big).unwrap();
        assert_eq!(&der[..3], &[DER_OCTET_STRING_TAG, 0x81, 200]);
        assert_eq!(&der[3..], big.as_slice());
    }
}
