// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! ECDSA and SM2 signature repair
//!
//! PKCS#11 mandates the raw `r || s` format for these signatures, each
//! component padded to the curve order length. Some tokens return the
//! DER encoded Ecdsa-Sig-Value structure instead.

use crate::fixup::Repair;
use crate::kasn1::{DER_INTEGER_TAG, DER_SEQUENCE_TAG};

/// Minimal DER reader that supports only the short length form and the
/// 0x81 long form.
///
/// Tokens emit non-canonical encodings (a 0x81 length below 0x80,
/// integers with redundant zero padding) that a strict DER parser
/// rejects, so lengths are not checked for minimality.
struct DerReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> DerReader<'a> {
    fn new(data: &'a [u8]) -> DerReader<'a> {
        DerReader { data: data, pos: 0 }
    }

    fn byte(&mut self) -> Option<u8> {
        let b = *self.data.get(self.pos)?;
        self.pos += 1;
        Some(b)
    }

    fn length(&mut self) -> Option<usize> {
        match self.byte()? {
            l if l < 0x80 => Some(usize::from(l)),
            0x81 => Some(usize::from(self.byte()?)),
            _ => None,
        }
    }

    /// Reads a tag-length-value element, returning its content
    fn element(&mut self, tag: u8) -> Option<&'a [u8]> {
        if self.byte()? != tag {
            return None;
        }
        let len = self.length()?;
        let end = self.pos.checked_add(len)?;
        let data: &'a [u8] = self.data;
        let content = data.get(self.pos..end)?;
        self.pos = end;
        Some(content)
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }
}

/// Parses SEQUENCE { INTEGER r, INTEGER s }
fn parse_sig_value(sig: &[u8]) -> Option<(&[u8], &[u8])> {
    let mut outer = DerReader::new(sig);
    let seq = outer.element(DER_SEQUENCE_TAG)?;
    let mut inner = DerReader::new(seq);
    let r = inner.element(DER_INTEGER_TAG)?;
    let s = inner.element(DER_INTEGER_TAG)?;
    if !inner.is_empty() {
        return None;
    }
    Some((r, s))
}

/// Strips the sign padding byte, if any, and left pads to `len` bytes
fn fixed_len_integer(int: &[u8], len: usize, out: &mut Vec<u8>) -> bool {
    let int = match int.first() {
        Some(0) => &int[1..],
        _ => int,
    };
    if int.len() > len {
        return false;
    }
    out.resize(out.len() + len - int.len(), 0);
    out.extend_from_slice(int);
    true
}

/// Converts a DER encoded signature into the fixed length `r || s` form
/// expected by callers.
///
/// Signatures that already have the expected length, or that are not a
/// DER SEQUENCE, are left alone.
pub fn repair_signature(sig: &[u8], order_len: usize) -> Repair {
    if sig.len() == 2 * order_len || sig.first() != Some(&DER_SEQUENCE_TAG) {
        return Repair::Unchanged;
    }
    let (r, s) = match parse_sig_value(sig) {
        Some(rs) => rs,
        None => return Repair::Undecided,
    };
    let mut out = Vec::with_capacity(2 * order_len);
    if !fixed_len_integer(r, order_len, &mut out)
        || !fixed_len_integer(s, order_len, &mut out)
    {
        return Repair::Undecided;
    }
    Repair::Fixed(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn der_int(v: &[u8]) -> Vec<u8> {
        let mut out = vec![DER_INTEGER_TAG];
        if v[0] & 0x80 != 0 {
            out.push(u8::try_from(v.len() + 1).unwrap());
            out.push(0);
        } else {
            out.push(u8::try_from(v.len()).unwrap());
        }
        out.extend_from_slice(v);
        out
    }

    fn der_sig(r: &[u8], s: &[u8]) -> Vec<u8> {
        let mut body = der_int(r);
        body.extend(der_int(s));
        let mut out = vec![DER_SEQUENCE_TAG];
        if body.len() >= 0x80 {
            out.push(0x81);
        }
        out.push(u8::try_from(body.len()).unwrap());
        out.extend(body);
        out
    }

    #[test]
    fn der_to_raw() {
        let r = [0x81u8; 32];
        let s = [0x7Fu8; 32];
        let mut raw = r.to_vec();
        raw.extend_from_slice(&s);
        assert_eq!(repair_signature(&der_sig(&r, &s), 32), Repair::Fixed(raw));
    }

    #[test]
    fn short_integers_are_padded() {
        let r = [0x01u8, 0x02];
        let s = [0x7Fu8; 31];
        let fixed = match repair_signature(&der_sig(&r, &s), 32) {
            Repair::Fixed(f) => f,
            r => panic!("unexpected outcome {:?}", r),
        };
        assert_eq!(fixed.len(), 64);
        assert_eq!(&fixed[..30], &[0u8; 30]);
        assert_eq!(&fixed[30..32], &r);
        assert_eq!(fixed[32], 0);
        assert_eq!(&fixed[33..], &s);
    }

    #[test]
    fn long_form_length() {
        let r = [0xC1u8; 66];
        let s = [0xC2u8; 66];
        let der = der_sig(&r, &s);
        assert_eq!(der[1], 0x81);
        match repair_signature(&der, 66) {
            Repair::Fixed(f) => {
                assert_eq!(&f[..66], &r);
                assert_eq!(&f[66..], &s);
            }
            r => panic!("unexpected outcome {:?}", r),
        }
    }

    #[test]
    fn non_canonical_encodings() {
        let r = [0x11u8; 32];
        let s = [0x22u8; 32];
        let mut raw = r.to_vec();
        raw.extend_from_slice(&s);

        /* 0x81 length form used for a short body */
        let mut der = vec![DER_SEQUENCE_TAG, 0x81, 0x44];
        der.extend(der_int(&r));
        der.extend(der_int(&s));
        assert_eq!(repair_signature(&der, 32), Repair::Fixed(raw.clone()));

        /* redundant zero byte in front of positive integers */
        let mut body = vec![DER_INTEGER_TAG, 33, 0];
        body.extend_from_slice(&r);
        body.extend([DER_INTEGER_TAG, 33, 0]);
        body.extend_from_slice(&s);
        let mut der = vec![DER_SEQUENCE_TAG, 70];
        der.extend(body);
        assert_eq!(repair_signature(&der, 32), Repair::Fixed(raw));

        /* only one padding byte is stripped */
        let mut int = vec![0u8, 0];
        int.extend_from_slice(&r);
        let mut body = vec![DER_INTEGER_TAG, 34];
        body.extend(&int);
        body.extend(der_int(&s));
        let mut der = vec![DER_SEQUENCE_TAG, 70];
        der.extend(body);
        assert_eq!(repair_signature(&der, 32), Repair::Undecided);

        /* ... which still fits when the order allows it */
        let fixed = match repair_signature(&der, 33) {
            Repair::Fixed(f) => f,
            r => panic!("unexpected outcome {:?}", r),
        };
        assert_eq!(fixed.len(), 66);
        assert_eq!(fixed[0], 0);
        assert_eq!(&fixed[1..33], &r);
        assert_eq!(fixed[33], 0);
        assert_eq!(&fixed[34..], &s);
    }

    #[test]
    fn pass_through() {
        let raw = [0x30u8; 64];
        assert_eq!(repair_signature(&raw, 32), Repair::Unchanged);
        let not_der = [0x01u8, 0x02, 0x03];
        assert_eq!(repair_signature(&not_der, 32), Repair::Unchanged);
        /* truncated structure */
        let truncated = [0x30u8, 0x10, 0x02];
        assert_eq!(repair_signature(&truncated, 32), Repair::Undecided);
        /* 0x82 length form is not supported */
        assert_eq!(
            repair_signature(&[0x30, 0x82, 0x00, 0x04, 0x02, 0x01, 1], 32),
            Repair::Undecided
        );
        /* integers longer than the order */
        let r = [0x11u8; 33];
        assert_eq!(repair_signature(&der_sig(&r, &r), 32), Repair::Undecided);
    }
}
