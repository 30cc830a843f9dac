// Copyright 2023 Simo Sorce
// See LICENSE.txt file for terms

use super::*;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::pkcs11::*;

mod fetch;
mod vendor;

/* DER encoded prime256v1 OID */
const P256_PARAMS: &str = "06082a8648ce3d030107";
/* DER encoded sm2p256v1 OID */
const SM2_PARAMS: &str = "06082a811ccf5501822d";

const TEST_SESSION: CK_SESSION_HANDLE = 7;

/// How the mock replies to a read of one attribute
#[derive(Debug, Clone)]
enum Reply {
    Value(Vec<u8>),
    Fail(CK_RV),
}

#[derive(Debug, Default)]
struct MockState {
    info: ModuleInfo,
    objects: Mutex<HashMap<CK_OBJECT_HANDLE, HashMap<CK_ULONG, Reply>>>,
    /* overrides the outcome of batch reads */
    batch_rv: Mutex<Option<CK_RV>>,
    batch_calls: AtomicUsize,
    single_calls: AtomicUsize,
    created: Mutex<Vec<Vec<RawAttribute>>>,
    mechanisms: Vec<CK_MECHANISM_TYPE>,
}

/// A scriptable native module
#[derive(Debug, Clone)]
struct MockModule(Arc<MockState>);

impl MockModule {
    fn new(
        manufacturer: &str,
        description: &str,
        version: (u8, u8),
        mechanisms: &[CK_MECHANISM_TYPE],
    ) -> MockModule {
        MockModule(Arc::new(MockState {
            info: ModuleInfo {
                manufacturer: manufacturer.to_string(),
                description: description.to_string(),
                library_version: version,
                cryptoki_version: (3, 0),
            },
            mechanisms: mechanisms.to_vec(),
            ..Default::default()
        }))
    }

    fn generic() -> MockModule {
        Self::new("Generic Vendor", "Generic Token", (1, 0), &[])
    }

    fn set(&self, object: CK_OBJECT_HANDLE, ck_type: CK_ULONG, value: &[u8]) {
        self.0
            .objects
            .lock()
            .unwrap()
            .entry(object)
            .or_default()
            .insert(ck_type, Reply::Value(value.to_vec()));
    }

    fn set_ulong(
        &self,
        object: CK_OBJECT_HANDLE,
        ck_type: CK_ULONG,
        v: CK_ULONG,
    ) {
        self.set(object, ck_type, &v.to_ne_bytes());
    }

    fn fail(&self, object: CK_OBJECT_HANDLE, ck_type: CK_ULONG, rv: CK_RV) {
        self.0
            .objects
            .lock()
            .unwrap()
            .entry(object)
            .or_default()
            .insert(ck_type, Reply::Fail(rv));
    }

    fn set_batch_rv(&self, rv: CK_RV) {
        *self.0.batch_rv.lock().unwrap() = Some(rv);
    }

    fn batch_calls(&self) -> usize {
        self.0.batch_calls.load(Ordering::SeqCst)
    }

    fn single_calls(&self) -> usize {
        self.0.single_calls.load(Ordering::SeqCst)
    }

    fn created(&self) -> Vec<Vec<RawAttribute>> {
        self.0.created.lock().unwrap().clone()
    }

    fn module_at(
        &self,
        path: &str,
        config: &Config,
        rules: Option<&VendorRules>,
    ) -> Module {
        Module::with_vendor_rules(Box::new(self.clone()), path, config, rules)
            .unwrap()
    }

    fn module(&self, config: &Config, rules: Option<&VendorRules>) -> Module {
        self.module_at("/usr/lib/pkcs11/libmock.so", config, rules)
    }
}

impl NativeModule for MockModule {
    fn info(&self) -> Result<ModuleInfo> {
        Ok(self.0.info.clone())
    }

    fn get_attribute_values(
        &self,
        _session: CK_SESSION_HANDLE,
        object: CK_OBJECT_HANDLE,
        fields: &mut [RawAttribute],
    ) -> CK_RV {
        if fields.len() == 1 {
            self.0.single_calls.fetch_add(1, Ordering::SeqCst);
        } else {
            self.0.batch_calls.fetch_add(1, Ordering::SeqCst);
        }
        let objects = self.0.objects.lock().unwrap();
        let attrs = match objects.get(&object) {
            Some(a) => a,
            None => return CKR_OBJECT_HANDLE_INVALID,
        };
        let mut rv = CKR_OK;
        for field in fields.iter_mut() {
            let outcome = match attrs.get(&field.ck_type) {
                Some(Reply::Value(v)) => {
                    field.set_payload(v.clone()).unwrap();
                    CKR_OK
                }
                Some(Reply::Fail(r)) => {
                    field.clear_payload(CK_UNAVAILABLE_INFORMATION);
                    *r
                }
                None => {
                    field.clear_payload(CK_UNAVAILABLE_INFORMATION);
                    CKR_ATTRIBUTE_TYPE_INVALID
                }
            };
            if rv == CKR_OK {
                rv = outcome;
            }
        }
        if fields.len() > 1 {
            if let Some(forced) = *self.0.batch_rv.lock().unwrap() {
                return forced;
            }
        }
        rv
    }

    fn create_object(
        &self,
        _session: CK_SESSION_HANDLE,
        fields: &[RawAttribute],
    ) -> Result<CK_OBJECT_HANDLE> {
        let mut created = self.0.created.lock().unwrap();
        created.push(fields.to_vec());
        Ok(CK_OBJECT_HANDLE::try_from(created.len())? + 100)
    }

    fn mechanism_list(
        &self,
        _slot: CK_SLOT_ID,
    ) -> Result<Vec<CK_MECHANISM_TYPE>> {
        Ok(self.0.mechanisms.clone())
    }
}

const ACME_PATH: &str = "/usr/lib/libacmehsm.so.2";

/// A module matching the first block of the test vendor code file
fn acme_mock(mechanisms: &[CK_MECHANISM_TYPE]) -> MockModule {
    MockModule::new("Acme Security Inc.", "Acme HSM", (2, 4), mechanisms)
}

fn test_rules() -> VendorRules {
    VendorRules::from_file("testdata/vendorcode.conf").unwrap()
}

/// A DER wrapped uncompressed P-256 point
fn p256_point() -> (Vec<u8>, Vec<u8>) {
    let mut bare = vec![0x04];
    bare.extend((1..=64).map(|b| b as u8));
    let mut der = vec![0x04, 0x41];
    der.extend_from_slice(&bare);
    (bare, der)
}

/// DER encodes an ECDSA-Sig-Value, `r` and `s` must be shorter than 60
/// bytes
fn der_signature(r: &[u8], s: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    for int in [r, s] {
        body.push(0x02);
        if int[0] & 0x80 != 0 {
            body.push(u8::try_from(int.len() + 1).unwrap());
            body.push(0);
        } else {
            body.push(u8::try_from(int.len()).unwrap());
        }
        body.extend_from_slice(int);
    }
    let mut out = vec![0x30, u8::try_from(body.len()).unwrap()];
    out.extend(body);
    out
}
