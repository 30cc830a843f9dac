// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! Native module implementation backed by a cryptoki shared library
//! loaded at runtime.

use std::marker::PhantomData;
use std::ptr;

use crate::attribute::AttrType;
use crate::codec::{decode_nested, encode_nested, RawAttribute};
use crate::error::{Error, Result};
use crate::misc::trim_padded;
use crate::native::{ModuleInfo, NativeModule};
use crate::pkcs11::*;
use crate::{bytes_to_vec, void_ptr};

use libloading::{Library, Symbol};
use log::{debug, error, warn};

type GetFunctionListFn =
    unsafe extern "C" fn(*mut *mut CK_FUNCTION_LIST) -> CK_RV;

fn is_template_attribute(ck_type: CK_ATTRIBUTE_TYPE) -> bool {
    AttrType::attr_id_to_attrtype(ck_type) == AttrType::TemplateType
}

/// Return values of C_GetAttributeValue after which the output template
/// holds meaningful data
fn attribute_rv_is_usable(rv: CK_RV) -> bool {
    match rv {
        CKR_OK | CKR_ATTRIBUTE_TYPE_INVALID | CKR_ATTRIBUTE_SENSITIVE => true,
        _ => false,
    }
}

fn empty_attribute(ck_type: CK_ATTRIBUTE_TYPE) -> CK_ATTRIBUTE {
    CK_ATTRIBUTE {
        type_: ck_type,
        pValue: ptr::null_mut(),
        ulValueLen: 0,
    }
}

/// A `CK_ATTRIBUTE` array referencing encoded raw fields, suitable to be
/// passed to native calls that take a template.
///
/// Nested template blocks are expanded into their own `CK_ATTRIBUTE`
/// arrays which are owned by this structure.
pub struct CkAttrs<'a> {
    attrs: Vec<CK_ATTRIBUTE>,
    /* backing storage for nested templates, referenced by attrs */
    _nested: Vec<Vec<CK_ATTRIBUTE>>,
    _nested_fields: Vec<Vec<RawAttribute>>,
    _fields: PhantomData<&'a [RawAttribute]>,
}

impl<'a> CkAttrs<'a> {
    pub fn from_fields(fields: &'a [RawAttribute]) -> Result<CkAttrs<'a>> {
        let mut nested_fields = Vec::new();
        for f in fields {
            if !is_template_attribute(f.ck_type) {
                continue;
            }
            if let Some(p) = &f.payload {
                match decode_nested(p) {
                    Some(inner) => nested_fields.push(inner),
                    None => Err(CKR_TEMPLATE_INCONSISTENT)?,
                }
            }
        }

        let mut nested = Vec::with_capacity(nested_fields.len());
        for inner in &nested_fields {
            let mut arr = Vec::with_capacity(inner.len());
            for f in inner {
                arr.push(Self::field_to_attribute(f)?);
            }
            nested.push(arr);
        }

        let mut attrs = Vec::with_capacity(fields.len());
        let mut next_nested = nested.iter_mut();
        for f in fields {
            if is_template_attribute(f.ck_type) && f.payload.is_some() {
                let arr = match next_nested.next() {
                    Some(a) => a,
                    None => Err(CKR_GENERAL_ERROR)?,
                };
                attrs.push(CK_ATTRIBUTE {
                    type_: f.ck_type,
                    pValue: arr.as_mut_ptr() as CK_VOID_PTR,
                    ulValueLen: CK_ULONG::try_from(
                        arr.len() * std::mem::size_of::<CK_ATTRIBUTE>(),
                    )?,
                });
            } else {
                attrs.push(Self::field_to_attribute(f)?);
            }
        }

        Ok(CkAttrs {
            attrs: attrs,
            _nested: nested,
            _nested_fields: nested_fields,
            _fields: PhantomData,
        })
    }

    fn field_to_attribute(f: &RawAttribute) -> Result<CK_ATTRIBUTE> {
        Ok(match &f.payload {
            Some(p) => CK_ATTRIBUTE {
                type_: f.ck_type,
                pValue: void_ptr!(p.as_ptr()),
                ulValueLen: CK_ULONG::try_from(p.len())?,
            },
            None => CK_ATTRIBUTE {
                type_: f.ck_type,
                pValue: ptr::null_mut(),
                ulValueLen: f.len,
            },
        })
    }

    pub fn as_slice(&self) -> &[CK_ATTRIBUTE] {
        &self.attrs
    }

    pub fn as_mut_ptr(&mut self) -> CK_ATTRIBUTE_PTR {
        self.attrs.as_mut_ptr()
    }

    pub fn len(&self) -> CK_ULONG {
        /* usize always fits in a CK_ULONG on supported platforms */
        self.attrs.len() as CK_ULONG
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }
}

/// Output buffers of an attribute read
enum ReadBuffer {
    Unavailable,
    Bytes(Vec<u8>),
    Nested(Vec<CK_ATTRIBUTE>, Vec<Vec<u8>>),
}

/// A cryptoki shared library
pub struct Pkcs11Library {
    fntable: *mut CK_FUNCTION_LIST,
    path: String,
    /* false when the module was already initialized by someone else */
    finalize_on_drop: bool,
    /* must outlive fntable */
    _library: Library,
}

/* The module is initialized with CKF_OS_LOCKING_OK, it is required to
 * be callable from multiple threads */
unsafe impl Send for Pkcs11Library {}
unsafe impl Sync for Pkcs11Library {}

impl Pkcs11Library {
    /// Loads and initializes the library at `path`
    pub fn load(path: &str) -> Result<Pkcs11Library> {
        let library = unsafe { Library::new(path)? };
        let fntable = unsafe {
            let list_fn: Symbol<GetFunctionListFn> =
                library.get(b"C_GetFunctionList")?;
            let mut fn_list: *mut CK_FUNCTION_LIST = ptr::null_mut();
            let rv = list_fn(&mut fn_list);
            if rv != CKR_OK {
                return Err(Error::ck_rv_with_errmsg(
                    rv,
                    format!("Failed to load pkcs11 function list: {}", rv),
                ));
            }
            if fn_list.is_null() {
                return Err(Error::ck_rv_with_errmsg(
                    CKR_GENERAL_ERROR,
                    format!("{}: empty function list", path),
                ));
            }
            fn_list
        };
        let mut lib = Pkcs11Library {
            fntable: fntable,
            path: path.to_string(),
            finalize_on_drop: false,
            _library: library,
        };
        lib.finalize_on_drop = lib.initialize()?;
        debug!("Loaded cryptoki module {}", path);
        Ok(lib)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn fntable(&self) -> &CK_FUNCTION_LIST {
        unsafe { &*self.fntable }
    }

    /// Initializes the module, returns false if it was already initialized
    fn initialize(&self) -> Result<bool> {
        let func = match self.fntable().C_Initialize {
            Some(f) => f,
            None => {
                return Err(Error::ck_rv_with_errmsg(
                    CKR_GENERAL_ERROR,
                    "Broken pkcs11 module, no C_Initialize function"
                        .to_string(),
                ))
            }
        };
        let mut args = CK_C_INITIALIZE_ARGS {
            CreateMutex: None,
            DestroyMutex: None,
            LockMutex: None,
            UnlockMutex: None,
            flags: CKF_OS_LOCKING_OK,
            pReserved: ptr::null_mut(),
        };
        let rv = unsafe {
            func(&mut args as *mut CK_C_INITIALIZE_ARGS as CK_VOID_PTR)
        };
        match rv {
            CKR_OK => Ok(true),
            CKR_CRYPTOKI_ALREADY_INITIALIZED => {
                warn!("{} was already initialized", self.path);
                Ok(false)
            }
            _ => Err(Error::ck_rv_with_errmsg(
                rv,
                format!("Pkcs11 module initialization failed: {}", rv),
            )),
        }
    }

    fn finalize(&self) -> Result<()> {
        let func = match self.fntable().C_Finalize {
            Some(f) => f,
            None => Err(CKR_FUNCTION_NOT_SUPPORTED)?,
        };
        let rv = unsafe { func(ptr::null_mut()) };
        if rv != CKR_OK {
            Err(rv)?
        }
        Ok(())
    }

    /// Runs the sizing pass and allocates the output buffers
    fn read_attributes(
        &self,
        session: CK_SESSION_HANDLE,
        object: CK_OBJECT_HANDLE,
        fields: &mut [RawAttribute],
    ) -> Result<CK_RV> {
        let func = match self.fntable().C_GetAttributeValue {
            Some(f) => f,
            None => return Ok(CKR_FUNCTION_NOT_SUPPORTED),
        };
        let count = CK_ULONG::try_from(fields.len())?;
        let mut attrs: Vec<CK_ATTRIBUTE> =
            fields.iter().map(|f| empty_attribute(f.ck_type)).collect();

        /* first pass, get sizes */
        let rv = unsafe { func(session, object, attrs.as_mut_ptr(), count) };
        if !attribute_rv_is_usable(rv) {
            return Ok(rv);
        }

        let mut buffers = Vec::with_capacity(attrs.len());
        let mut has_nested = false;
        for a in attrs.iter_mut() {
            if a.ulValueLen == CK_UNAVAILABLE_INFORMATION {
                buffers.push(ReadBuffer::Unavailable);
                continue;
            }
            let len = usize::try_from(a.ulValueLen)?;
            if is_template_attribute(a.type_) {
                let n = len / std::mem::size_of::<CK_ATTRIBUTE>();
                let mut inner: Vec<CK_ATTRIBUTE> =
                    (0..n).map(|_| empty_attribute(0)).collect();
                a.pValue = inner.as_mut_ptr() as CK_VOID_PTR;
                buffers.push(ReadBuffer::Nested(inner, Vec::new()));
                has_nested = true;
            } else {
                let mut buf = vec![0u8; len];
                a.pValue = buf.as_mut_ptr() as CK_VOID_PTR;
                buffers.push(ReadBuffer::Bytes(buf));
            }
        }

        /* second pass, get values (and nested sizes) */
        let mut rv =
            unsafe { func(session, object, attrs.as_mut_ptr(), count) };

        if has_nested && attribute_rv_is_usable(rv) {
            for buf in buffers.iter_mut() {
                if let ReadBuffer::Nested(inner, values) = buf {
                    for ia in inner.iter_mut() {
                        if ia.ulValueLen == CK_UNAVAILABLE_INFORMATION {
                            values.push(Vec::new());
                            continue;
                        }
                        let mut v = vec![0u8; usize::try_from(ia.ulValueLen)?];
                        ia.pValue = v.as_mut_ptr() as CK_VOID_PTR;
                        values.push(v);
                    }
                }
            }
            /* third pass, get nested values */
            rv = unsafe { func(session, object, attrs.as_mut_ptr(), count) };
        }
        if !attribute_rv_is_usable(rv) {
            return Ok(rv);
        }

        for ((field, a), buf) in fields.iter_mut().zip(&attrs).zip(buffers) {
            if a.ulValueLen == CK_UNAVAILABLE_INFORMATION {
                field.clear_payload(CK_UNAVAILABLE_INFORMATION);
                continue;
            }
            match buf {
                ReadBuffer::Unavailable => {
                    field.clear_payload(CK_UNAVAILABLE_INFORMATION)
                }
                ReadBuffer::Bytes(mut v) => {
                    v.truncate(usize::try_from(a.ulValueLen)?);
                    field.set_payload(v)?;
                }
                ReadBuffer::Nested(inner, _values) => {
                    let mut raw = Vec::with_capacity(inner.len());
                    for ia in &inner {
                        if ia.ulValueLen == CK_UNAVAILABLE_INFORMATION {
                            raw.push(RawAttribute::unavailable(ia.type_));
                        } else {
                            raw.push(RawAttribute::with_payload(
                                ia.type_,
                                bytes_to_vec!(ia.pValue, ia.ulValueLen),
                            )?);
                        }
                    }
                    field.set_payload(encode_nested(&raw)?)?;
                }
            }
        }
        Ok(rv)
    }
}

impl Drop for Pkcs11Library {
    fn drop(&mut self) {
        if !self.finalize_on_drop {
            return;
        }
        if let Err(e) = self.finalize() {
            error!("Failed to finalize {}: {}", self.path, e);
        }
    }
}

impl NativeModule for Pkcs11Library {
    fn info(&self) -> Result<ModuleInfo> {
        let func = match self.fntable().C_GetInfo {
            Some(f) => f,
            None => Err(CKR_FUNCTION_NOT_SUPPORTED)?,
        };
        let mut info: CK_INFO = unsafe { std::mem::zeroed() };
        let rv = unsafe { func(&mut info) };
        if rv != CKR_OK {
            Err(rv)?
        }
        Ok(ModuleInfo {
            manufacturer: trim_padded(&info.manufacturerID),
            description: trim_padded(&info.libraryDescription),
            library_version: (
                info.libraryVersion.major,
                info.libraryVersion.minor,
            ),
            cryptoki_version: (
                info.cryptokiVersion.major,
                info.cryptokiVersion.minor,
            ),
        })
    }

    fn get_attribute_values(
        &self,
        session: CK_SESSION_HANDLE,
        object: CK_OBJECT_HANDLE,
        fields: &mut [RawAttribute],
    ) -> CK_RV {
        match self.read_attributes(session, object, fields) {
            Ok(rv) => rv,
            Err(e) => e.rv(),
        }
    }

    /// Creates an object from encoded fields
    fn create_object(
        &self,
        session: CK_SESSION_HANDLE,
        fields: &[RawAttribute],
    ) -> Result<CK_OBJECT_HANDLE> {
        let func = match self.fntable().C_CreateObject {
            Some(f) => f,
            None => Err(CKR_FUNCTION_NOT_SUPPORTED)?,
        };
        let mut attrs = CkAttrs::from_fields(fields)?;
        let mut handle: CK_OBJECT_HANDLE = CK_INVALID_HANDLE;
        let rv = unsafe {
            func(session, attrs.as_mut_ptr(), attrs.len(), &mut handle)
        };
        if rv != CKR_OK {
            Err(rv)?
        }
        Ok(handle)
    }

    /// Returns the mechanisms supported by a slot, as vendor codes
    fn mechanism_list(
        &self,
        slot: CK_SLOT_ID,
    ) -> Result<Vec<CK_MECHANISM_TYPE>> {
        let func = match self.fntable().C_GetMechanismList {
            Some(f) => f,
            None => Err(CKR_FUNCTION_NOT_SUPPORTED)?,
        };
        let mut count: CK_ULONG = 0;
        let rv = unsafe { func(slot, ptr::null_mut(), &mut count) };
        if rv != CKR_OK {
            Err(rv)?
        }
        let mut list: Vec<CK_MECHANISM_TYPE> =
            vec![0; usize::try_from(count)?];
        let rv = unsafe { func(slot, list.as_mut_ptr(), &mut count) };
        if rv != CKR_OK {
            Err(rv)?
        }
        list.truncate(usize::try_from(count)?);
        Ok(list)
    }
}
