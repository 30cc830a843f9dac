// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! Attribute fetch protocol
//!
//! Attributes are first requested in a single batch. Modules are not
//! reliable in the way they report per attribute failures in batch
//! calls, so whenever the batch call fails every attribute is requested
//! again on its own and the error of each single read is classified.

use crate::attribute::{attribute_name, Attribute};
use crate::codec::{decode, RawAttribute};
use crate::error::{Error, PartialFailure, Result};
use crate::native::NativeModule;
use crate::pkcs11::*;

use log::{debug, warn};

/// Applies the outcome of a single attribute read to `attr`.
///
/// Outcomes that only describe the attribute state are absorbed, any
/// other error is returned.
fn classify(rv: CK_RV, attr: &mut Attribute) -> Result<()> {
    match rv {
        CKR_OK => Ok(()),
        CKR_ATTRIBUTE_TYPE_INVALID => {
            attr.clear_value();
            attr.set_present(false);
            attr.set_sensitive(false);
            Ok(())
        }
        CKR_ATTRIBUTE_SENSITIVE => {
            attr.clear_value();
            attr.set_present(true);
            attr.set_sensitive(true);
            Ok(())
        }
        CKR_ARGUMENTS_BAD | CKR_FUNCTION_FAILED | CKR_FUNCTION_REJECTED => {
            warn!(
                "Non conformant reply 0x{:08x} reading {}, assuming absent",
                rv,
                attr.name()
            );
            attr.clear_value();
            attr.set_present(false);
            attr.set_sensitive(false);
            Ok(())
        }
        _ => {
            attr.clear_value();
            attr.set_present(false);
            attr.set_sensitive(false);
            Err(Error::ck_rv_with_errmsg(
                rv,
                format!(
                    "reading {} failed with CK_RV 0x{:08x}",
                    attribute_name(attr.get_type()),
                    rv
                ),
            ))
        }
    }
}

/// Reads a single attribute.
///
/// The returned attribute always reflects the classified outcome; the
/// error is only set for failures that are not a statement about the
/// attribute itself.
fn read_single(
    native: &dyn NativeModule,
    session: CK_SESSION_HANDLE,
    object: CK_OBJECT_HANDLE,
    ck_type: CK_ATTRIBUTE_TYPE,
) -> (Attribute, Result<()>) {
    let mut field = RawAttribute::request(ck_type);
    let rv = native.get_attribute_value(session, object, &mut field);
    if rv == CKR_OK {
        return (decode(&field), Ok(()));
    }
    let mut attr = Attribute::absent(ck_type);
    let res = classify(rv, &mut attr);
    (attr, res)
}

/// Reads one attribute of an object
pub fn fetch_one(
    native: &dyn NativeModule,
    session: CK_SESSION_HANDLE,
    object: CK_OBJECT_HANDLE,
    ck_type: CK_ATTRIBUTE_TYPE,
) -> Result<Attribute> {
    let (attr, res) = read_single(native, session, object, ck_type);
    res?;
    Ok(attr)
}

/// Reads several attributes of an object.
///
/// All attributes are always attempted. If any of them hits a hard
/// failure the first such failure is returned together with every
/// attribute, in request order, so that callers can still use the ones
/// that resolved.
pub fn fetch_all(
    native: &dyn NativeModule,
    session: CK_SESSION_HANDLE,
    object: CK_OBJECT_HANDLE,
    codes: &[CK_ATTRIBUTE_TYPE],
) -> std::result::Result<Vec<Attribute>, PartialFailure> {
    if codes.len() > 1 {
        let mut fields: Vec<RawAttribute> =
            codes.iter().map(|c| RawAttribute::request(*c)).collect();
        let rv = native.get_attribute_values(session, object, &mut fields);
        if rv == CKR_OK {
            return Ok(fields.iter().map(decode).collect());
        }
        debug!(
            "Batch read of {} attributes failed (0x{:08x}), \
             retrying one at a time",
            codes.len(),
            rv
        );
    }

    let mut attributes = Vec::with_capacity(codes.len());
    let mut first_error: Option<Error> = None;
    for code in codes {
        let (attr, res) = read_single(native, session, object, *code);
        if let Err(e) = res {
            debug!("Hard failure: {}", e);
            if first_error.is_none() {
                first_error = Some(e);
            }
        }
        attributes.push(attr);
    }
    match first_error {
        None => Ok(attributes),
        Some(error) => Err(PartialFailure {
            error: error,
            attributes: attributes,
        }),
    }
}
