// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

use super::*;

use crate::fetch;

const OBJ: CK_OBJECT_HANDLE = 11;

fn labelled_key(mock: &MockModule) {
    mock.set(OBJ, CKA_LABEL, b"Test Key");
    mock.set_ulong(OBJ, CKA_CLASS, CKO_PRIVATE_KEY);
    mock.set(OBJ, CKA_SIGN, &[1]);
}

#[test]
fn test_batch_read() {
    let mock = MockModule::generic();
    labelled_key(&mock);

    let attrs = fetch::fetch_all(
        &mock,
        TEST_SESSION,
        OBJ,
        &[CKA_LABEL, CKA_CLASS, CKA_SIGN],
    )
    .unwrap();
    assert_eq!(mock.batch_calls(), 1);
    assert_eq!(mock.single_calls(), 0);

    assert_eq!(attrs.len(), 3);
    assert_eq!(attrs[0].to_string().unwrap(), "Test Key");
    assert_eq!(attrs[1].to_ulong().unwrap(), CKO_PRIVATE_KEY);
    assert_eq!(attrs[2].to_bool().unwrap(), true);
    assert!(attrs.iter().all(|a| a.present() && !a.sensitive()));
}

#[test]
fn test_fallback_classification() {
    let mock = MockModule::generic();
    labelled_key(&mock);
    mock.fail(OBJ, CKA_VALUE, CKR_ATTRIBUTE_SENSITIVE);
    mock.fail(OBJ, CKA_ID, CKR_ARGUMENTS_BAD);
    mock.fail(OBJ, CKA_SUBJECT, CKR_FUNCTION_FAILED);

    let codes = [
        CKA_LABEL,
        CKA_VALUE,
        CKA_MODULUS,
        CKA_ID,
        CKA_SUBJECT,
        CKA_CLASS,
    ];
    let attrs = fetch::fetch_all(&mock, TEST_SESSION, OBJ, &codes).unwrap();
    assert_eq!(mock.batch_calls(), 1);
    assert_eq!(mock.single_calls(), codes.len());

    /* request order is kept */
    let got: Vec<CK_ATTRIBUTE_TYPE> =
        attrs.iter().map(|a| a.get_type()).collect();
    assert_eq!(got, codes);

    assert_eq!(attrs[0].to_string().unwrap(), "Test Key");

    /* sensitive: present, without a value */
    assert!(attrs[1].present());
    assert!(attrs[1].sensitive());
    assert!(!attrs[1].has_value());

    /* not on the object */
    assert!(!attrs[2].present());
    assert!(!attrs[2].sensitive());

    /* non conformant replies are treated as absent */
    assert!(!attrs[3].present());
    assert!(!attrs[4].present());

    assert_eq!(attrs[5].to_ulong().unwrap(), CKO_PRIVATE_KEY);
}

#[test]
fn test_unreliable_batch_status() {
    /* every attribute is readable, yet the batch call reports a failure */
    let mock = MockModule::generic();
    labelled_key(&mock);
    mock.set_batch_rv(CKR_GENERAL_ERROR);

    let attrs = fetch::fetch_all(
        &mock,
        TEST_SESSION,
        OBJ,
        &[CKA_LABEL, CKA_CLASS, CKA_SIGN],
    )
    .unwrap();
    assert_eq!(mock.single_calls(), 3);
    assert!(attrs.iter().all(|a| a.present() && a.has_value()));
}

#[test]
fn test_partial_failure() {
    let mock = MockModule::generic();
    labelled_key(&mock);
    mock.fail(OBJ, CKA_VALUE, CKR_DEVICE_ERROR);
    mock.fail(OBJ, CKA_ID, CKR_SESSION_HANDLE_INVALID);

    let codes = [CKA_LABEL, CKA_VALUE, CKA_MODULUS, CKA_ID, CKA_CLASS];
    let pf = match fetch::fetch_all(&mock, TEST_SESSION, OBJ, &codes) {
        Ok(_) => panic!("hard failures must be reported"),
        Err(pf) => pf,
    };
    /* first hard failure, in request order */
    assert_eq!(pf.rv(), CKR_DEVICE_ERROR);

    /* every attribute was attempted */
    assert_eq!(mock.single_calls(), codes.len());
    assert_eq!(pf.attributes.len(), codes.len());
    assert_eq!(pf.attributes[0].to_string().unwrap(), "Test Key");
    assert!(!pf.attributes[1].present());
    assert!(!pf.attributes[2].present());
    assert!(!pf.attributes[3].present());
    assert_eq!(pf.attributes[4].to_ulong().unwrap(), CKO_PRIVATE_KEY);

    let err: Error = pf.into();
    assert_eq!(err.rv(), CKR_DEVICE_ERROR);
}

#[test]
fn test_fetch_one() {
    let mock = MockModule::generic();
    labelled_key(&mock);
    mock.fail(OBJ, CKA_VALUE, CKR_ATTRIBUTE_SENSITIVE);
    mock.fail(OBJ, CKA_ID, CKR_DEVICE_ERROR);

    let label = fetch::fetch_one(&mock, TEST_SESSION, OBJ, CKA_LABEL).unwrap();
    assert_eq!(label.to_string().unwrap(), "Test Key");

    let value = fetch::fetch_one(&mock, TEST_SESSION, OBJ, CKA_VALUE).unwrap();
    assert!(value.sensitive());
    assert!(value.to_bytes().unwrap_err().attr_not_found());

    let missing =
        fetch::fetch_one(&mock, TEST_SESSION, OBJ, CKA_MODULUS).unwrap();
    assert!(!missing.present());

    let err = fetch::fetch_one(&mock, TEST_SESSION, OBJ, CKA_ID).unwrap_err();
    assert_eq!(err.rv(), CKR_DEVICE_ERROR);

    /* a single read never goes through the batch path */
    assert_eq!(mock.batch_calls(), 0);
}

#[test]
fn test_unknown_object() {
    let mock = MockModule::generic();
    let pf = fetch::fetch_all(&mock, TEST_SESSION, 99, &[CKA_LABEL, CKA_ID])
        .unwrap_err();
    assert_eq!(pf.rv(), CKR_OBJECT_HANDLE_INVALID);
    assert_eq!(pf.attributes.len(), 2);
}
