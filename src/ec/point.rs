// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! CKA_EC_POINT repair
//!
//! The standard requires CKA_EC_POINT to hold the DER encoding of an
//! OCTET STRING wrapping the point. Some tokens return the bare point,
//! and a few even omit the uncompressed form indicator.

use crate::ec::{curve_size, fixed_point_len};
use crate::fixup::Repair;
use crate::kasn1::der_octet_string;

/// Uncompressed point form indicator
const POINT_UNCOMPRESSED: u8 = 0x04;
/// Compressed point form indicators
const POINT_COMPRESSED_EVEN: u8 = 0x02;
const POINT_COMPRESSED_ODD: u8 = 0x03;

fn wrap(point: &[u8]) -> Repair {
    match der_octet_string(point) {
        Ok(der) => Repair::Fixed(der),
        Err(_) => Repair::Undecided,
    }
}

/// Classifies `point` against the curve described by `params` and returns
/// the DER wrapped point when the token returned a bare one.
///
/// Points of unknown curves are never touched.
pub fn repair_ec_point(point: &[u8], params: &[u8]) -> Repair {
    if let Some(len) = fixed_point_len(params) {
        if point.len() == len {
            return wrap(point);
        }
        return Repair::Unchanged;
    }

    let field_len = match curve_size(params) {
        Some(cs) => cs.field_bytes,
        None => return Repair::Undecided,
    };

    if point.len() == 2 * field_len {
        /* no form indicator at all */
        let mut full = Vec::with_capacity(point.len() + 1);
        full.push(POINT_UNCOMPRESSED);
        full.extend_from_slice(point);
        return wrap(&full);
    }
    match point.first() {
        Some(&POINT_UNCOMPRESSED) if point.len() == 1 + 2 * field_len => {
            wrap(point)
        }
        Some(&POINT_COMPRESSED_EVEN) | Some(&POINT_COMPRESSED_ODD)
            if point.len() == 1 + field_len =>
        {
            wrap(point)
        }
        _ => Repair::Unchanged,
    }
}
