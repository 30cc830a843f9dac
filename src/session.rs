// Copyright 2023 Simo Sorce
// See LICENSE.txt file for terms

//! Per session access to object attributes.
//!
//! A [Session] binds a native session handle to its [Module] and caches
//! the domain parameters of the EC keys it works with, so that points
//! and signatures can be normalized without re-reading them each time.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::attribute::{Attribute, AttributeValue, Template};
use crate::ec::SignatureFamily;
use crate::error::{Error, PartialFailure, Result};
use crate::fetch;
use crate::module::Module;
use crate::pkcs11::*;

use log::debug;
use lru::LruCache;

/// Bounded LRU map of object handle to CKA_EC_PARAMS
#[derive(Debug)]
pub struct EcParamsCache(Mutex<LruCache<CK_OBJECT_HANDLE, Vec<u8>>>);

impl EcParamsCache {
    pub fn new(capacity: usize) -> Result<EcParamsCache> {
        let cap = match NonZeroUsize::new(capacity) {
            Some(c) => c,
            None => {
                return Err(Error::config_error(
                    "the EC parameters cache needs a capacity".to_string(),
                ))
            }
        };
        Ok(EcParamsCache(Mutex::new(LruCache::new(cap))))
    }

    fn cache(&self) -> MutexGuard<'_, LruCache<CK_OBJECT_HANDLE, Vec<u8>>> {
        /* a poisoned cache is still a valid cache */
        match self.0.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn get(&self, object: CK_OBJECT_HANDLE) -> Option<Vec<u8>> {
        self.cache().get(&object).cloned()
    }

    pub fn put(&self, object: CK_OBJECT_HANDLE, params: Vec<u8>) {
        self.cache().put(object, params);
    }

    pub fn clear(&self) {
        self.cache().clear();
    }

    pub fn len(&self) -> usize {
        self.cache().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache().is_empty()
    }
}

#[derive(Debug)]
pub struct Session {
    module: Arc<Module>,
    handle: CK_SESSION_HANDLE,
    ec_params: EcParamsCache,
}

impl Session {
    pub fn new(
        module: Arc<Module>,
        handle: CK_SESSION_HANDLE,
    ) -> Result<Session> {
        let ec_params = EcParamsCache::new(module.ec_params_cache_size())?;
        Ok(Session {
            module: module,
            handle: handle,
            ec_params: ec_params,
        })
    }

    pub fn handle(&self) -> CK_SESSION_HANDLE {
        self.handle
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn ec_params_cache(&self) -> &EcParamsCache {
        &self.ec_params
    }

    /// Returns the domain parameters of an EC key, from the cache or
    /// from the module
    pub fn ec_params(&self, object: CK_OBJECT_HANDLE) -> Option<Vec<u8>> {
        if let Some(params) = self.ec_params.get(object) {
            return Some(params);
        }
        let attr = match fetch::fetch_one(
            self.module.native(),
            self.handle,
            object,
            CKA_EC_PARAMS,
        ) {
            Ok(a) => a,
            Err(e) => {
                debug!("Failed to read EC params of {}: {}", object, e);
                return None;
            }
        };
        let params = attr.as_bytes()?.to_vec();
        self.ec_params.put(object, params.clone());
        Some(params)
    }

    /// Vendor code translation and EC point normalization of attributes
    /// read from the module
    fn post_process(
        &self,
        object: CK_OBJECT_HANDLE,
        attrs: &mut [Attribute],
    ) {
        self.module.attributes_to_generic(attrs);

        let read_params = attrs
            .iter()
            .find(|a| a.get_type() == CKA_EC_PARAMS)
            .and_then(|a| a.as_bytes())
            .map(|b| b.to_vec());
        if let Some(params) = &read_params {
            self.ec_params.put(object, params.clone());
        }

        let point = match attrs.iter_mut().find(|a| {
            a.get_type() == CKA_EC_POINT && a.as_bytes().is_some()
        }) {
            Some(p) => p,
            None => return,
        };
        let params = match read_params {
            Some(p) => p,
            None => match self.ec_params(object) {
                Some(p) => p,
                None => return,
            },
        };
        if let Ok(bytes) = point.to_bytes() {
            let fixed = self.module.normalize_ec_point(bytes, &params);
            point.set_value(AttributeValue::Bytes(fixed));
        }
    }

    /// Reads several attributes of an object, see [fetch::fetch_all]
    pub fn fetch_all(
        &self,
        object: CK_OBJECT_HANDLE,
        codes: &[CK_ATTRIBUTE_TYPE],
    ) -> std::result::Result<Vec<Attribute>, PartialFailure> {
        match fetch::fetch_all(self.module.native(), self.handle, object, codes)
        {
            Ok(mut attrs) => {
                self.post_process(object, &mut attrs);
                Ok(attrs)
            }
            Err(mut pf) => {
                self.post_process(object, &mut pf.attributes);
                Err(pf)
            }
        }
    }

    /// Reads a single attribute of an object
    pub fn fetch_one(
        &self,
        object: CK_OBJECT_HANDLE,
        ck_type: CK_ATTRIBUTE_TYPE,
    ) -> Result<Attribute> {
        let native = self.module.native();
        let attr = fetch::fetch_one(native, self.handle, object, ck_type)?;
        let mut attrs = [attr];
        self.post_process(object, &mut attrs);
        let [attr] = attrs;
        Ok(attr)
    }

    /// Normalizes a signature produced with `key` and the generic
    /// mechanism `mech`
    pub fn fix_signature(
        &self,
        key: CK_OBJECT_HANDLE,
        mech: CK_MECHANISM_TYPE,
        signature: Vec<u8>,
    ) -> Vec<u8> {
        let family = match SignatureFamily::from_mechanism(mech) {
            Some(f) => f,
            None => return signature,
        };
        let params = self.ec_params(key);
        self.module
            .normalize_signature(signature, params.as_deref(), family)
    }

    /// Creates an object, translating generic codes in the template
    pub fn create_object(
        &self,
        template: &Template,
    ) -> Result<CK_OBJECT_HANDLE> {
        let fields = self.module.build_write_fields(template)?;
        self.module.native().create_object(self.handle, &fields)
    }

    /// Drops all session scoped state
    pub fn close(&self) {
        self.ec_params.clear();
    }
}
