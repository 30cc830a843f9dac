// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

use super::*;

use crate::attribute::set_legacy_text_encoding;
use crate::codec::encode_nested;
use crate::pkcs11::vendor::*;

use serial_test::{parallel, serial};

const KEY: CK_OBJECT_HANDLE = 21;

const ACME_SM2: CK_KEY_TYPE = 0x80000146;
const ACME_SM2_KEY_PAIR_GEN: CK_MECHANISM_TYPE = 0x80008001;
const ACME_SM2_SIGN: CK_MECHANISM_TYPE = 0x80008002;
const ACME_SM2_SM3: CK_MECHANISM_TYPE = 0x80008003;

fn ulongs(list: &[CK_ULONG]) -> Vec<u8> {
    list.iter().flat_map(|v| v.to_ne_bytes()).collect()
}

#[test]
#[parallel]
fn test_vendor_selection() {
    let rules = test_rules();
    let config = Config::new();

    let module = acme_mock(&[]).module_at(ACME_PATH, &config, Some(&rules));
    let table = module.vendor_table().unwrap();
    assert_eq!(
        table.generic_to_vendor(CodeKind::KeyType, CKK_VENDOR_SM2),
        ACME_SM2
    );

    /* same module, outside the version range of the first block, and
     * not matching the second one */
    let mock = MockModule::new("Acme Security Inc.", "Acme HSM", (3, 0), &[]);
    let module = mock.module_at(ACME_PATH, &config, Some(&rules));
    assert!(module.vendor_table().is_none());
    assert_eq!(
        module.generic_to_vendor(CodeKind::KeyType, CKK_VENDOR_SM2),
        CKK_VENDOR_SM2
    );

    /* matched by description only */
    let mock = MockModule::new("Sansec", "SansecHSM v1", (1, 0), &[]);
    let module = mock.module(&config, Some(&rules));
    assert_eq!(
        module.generic_to_vendor(CodeKind::Mechanism, CKM_VENDOR_SM2),
        2147516418
    );

    /* no rules at all */
    let module = acme_mock(&[]).module_at(ACME_PATH, &config, None);
    assert!(module.vendor_table().is_none());
}

#[test]
#[parallel]
fn test_first_block_wins() {
    let rules = VendorRules::parse(
        "<vendorcode>\n\
         module.mid acme\n\
         CKK_VENDOR_SM2 0x80000001\n\
         </vendorcode>\n\
         <vendorcode>\n\
         module.description hsm\n\
         CKK_VENDOR_SM2 0x80000002\n\
         </vendorcode>\n",
    )
    .unwrap();
    let module =
        acme_mock(&[]).module_at(ACME_PATH, &Config::new(), Some(&rules));
    assert_eq!(
        module.generic_to_vendor(CodeKind::KeyType, CKK_VENDOR_SM2),
        0x80000001
    );
}

#[test]
#[parallel]
fn test_read_translation() {
    let mock = acme_mock(&[]);
    mock.set_ulong(KEY, CKA_CLASS, CKO_PRIVATE_KEY);
    mock.set_ulong(KEY, CKA_KEY_TYPE, ACME_SM2);
    mock.set_ulong(KEY, CKA_KEY_GEN_MECHANISM, ACME_SM2_KEY_PAIR_GEN);
    mock.set(
        KEY,
        CKA_ALLOWED_MECHANISMS,
        &ulongs(&[ACME_SM2_SIGN, CKM_SHA256, ACME_SM2_SM3]),
    );
    let nested = encode_nested(&[
        RawAttribute::with_payload(CKA_KEY_TYPE, ulongs(&[ACME_SM2]))
            .unwrap(),
        RawAttribute::with_payload(CKA_SIGN, vec![1]).unwrap(),
    ])
    .unwrap();
    mock.set(KEY, CKA_UNWRAP_TEMPLATE, &nested);

    let module = Arc::new(mock.module_at(
        ACME_PATH,
        &Config::new(),
        Some(&test_rules()),
    ));
    let session = Session::new(module, TEST_SESSION).unwrap();
    let attrs = session
        .fetch_all(
            KEY,
            &[
                CKA_CLASS,
                CKA_KEY_TYPE,
                CKA_KEY_GEN_MECHANISM,
                CKA_ALLOWED_MECHANISMS,
                CKA_UNWRAP_TEMPLATE,
            ],
        )
        .unwrap();

    /* the class is not a code carrying attribute */
    assert_eq!(attrs[0].to_ulong().unwrap(), CKO_PRIVATE_KEY);
    assert_eq!(attrs[1].to_ulong().unwrap(), CKK_VENDOR_SM2);
    assert_eq!(attrs[2].to_ulong().unwrap(), CKM_VENDOR_SM2_KEY_PAIR_GEN);
    assert_eq!(
        attrs[3].to_mechanisms().unwrap(),
        vec![CKM_VENDOR_SM2, CKM_SHA256, CKM_VENDOR_SM2_SM3]
    );
    let tmpl = attrs[4].to_template().unwrap();
    assert_eq!(
        tmpl.get(CKA_KEY_TYPE).unwrap().to_ulong().unwrap(),
        CKK_VENDOR_SM2
    );
    assert_eq!(tmpl.get(CKA_SIGN).unwrap().to_bool().unwrap(), true);

    /* single reads get the same treatment */
    let key_type = session.fetch_one(KEY, CKA_KEY_TYPE).unwrap();
    assert_eq!(key_type.to_ulong().unwrap(), CKK_VENDOR_SM2);
}

#[test]
#[parallel]
fn test_write_translation() {
    let mock = acme_mock(&[]);
    let module = Arc::new(mock.module_at(
        ACME_PATH,
        &Config::new(),
        Some(&test_rules()),
    ));

    let template = Template::new()
        .with_ulong(CKA_CLASS, CKO_PUBLIC_KEY)
        .with_ulong(CKA_KEY_TYPE, CKK_VENDOR_SM2)
        .with_mechanisms(
            CKA_ALLOWED_MECHANISMS,
            &[CKM_VENDOR_SM2_SM3, CKM_ECDSA],
        )
        .with_template(
            CKA_WRAP_TEMPLATE,
            Template::new().with_ulong(CKA_KEY_TYPE, CKK_VENDOR_SM2),
        )
        .with_string(CKA_LABEL, "sm2 key");

    let fields = module.build_write_fields(&template).unwrap();
    assert_eq!(fields.len(), 5);
    assert_eq!(fields[0].payload, Some(ulongs(&[CKO_PUBLIC_KEY])));
    assert_eq!(fields[1].payload, Some(ulongs(&[ACME_SM2])));
    assert_eq!(
        fields[2].payload,
        Some(ulongs(&[ACME_SM2_SM3, CKM_ECDSA]))
    );
    let nested = encode_nested(&[RawAttribute::with_payload(
        CKA_KEY_TYPE,
        ulongs(&[ACME_SM2]),
    )
    .unwrap()])
    .unwrap();
    assert_eq!(fields[3].payload, Some(nested));
    assert_eq!(fields[4].payload, Some(b"sm2 key".to_vec()));

    /* the caller template is not modified */
    assert_eq!(
        template.get(CKA_KEY_TYPE).unwrap().to_ulong().unwrap(),
        CKK_VENDOR_SM2
    );

    let session = Session::new(module, TEST_SESSION).unwrap();
    let handle = session.create_object(&template).unwrap();
    assert_eq!(handle, 101);
    let created = mock.created();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0], fields);
}

#[test]
#[parallel]
fn test_mechanism_list_translation() {
    let mock = acme_mock(&[CKM_SHA256, ACME_SM2_SIGN, ACME_SM2_SM3]);
    let module = mock.module_at(ACME_PATH, &Config::new(), Some(&test_rules()));
    assert_eq!(
        module.mechanism_list(0).unwrap(),
        vec![CKM_SHA256, CKM_VENDOR_SM2, CKM_VENDOR_SM2_SM3]
    );
    assert_eq!(module.mechanism_to_vendor(CKM_VENDOR_SM2_SM3), ACME_SM2_SM3);
    assert_eq!(module.mechanism_to_vendor(CKM_SHA256), CKM_SHA256);

    /* without a table codes are passed through */
    let module = mock.module(&Config::new(), None);
    assert_eq!(
        module.mechanism_list(0).unwrap(),
        vec![CKM_SHA256, ACME_SM2_SIGN, ACME_SM2_SM3]
    );
}

#[test]
#[serial]
fn test_module_from_config() {
    let config = Config::from_file("testdata/ckbridge.conf").unwrap();
    let module = Module::new(
        Box::new(acme_mock(&[])),
        "/opt/acme/libacmehsm.so",
        &config,
    )
    .unwrap();
    assert!(module.vendor_table().is_some());
    set_legacy_text_encoding(false);

    /* a broken vendor file is fatal */
    let mut config = Config::new();
    config.vendor.file = Some("testdata/ckbridge.conf".to_string());
    let err = Module::new(Box::new(acme_mock(&[])), ACME_PATH, &config)
        .unwrap_err();
    assert!(err.is_config());
}
