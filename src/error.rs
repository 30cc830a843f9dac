// Copyright 2023 Simo Sorce
// See LICENSE.txt file for terms

//! Error type used across the crate.
//!
//! Errors carry a `CK_RV` so that failures reported by the native module
//! can be classified by value, plus an optional origin error or message.

use std::error;
use std::fmt;

use crate::attribute::Attribute;
use crate::pkcs11::*;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    origin: Option<Box<dyn error::Error + Send + Sync>>,
    errmsg: Option<String>,
    ckrv: CK_RV,
}

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[non_exhaustive]
pub enum ErrorKind {
    /* A Cryptoki-style error, see ckrv Error field */
    CkError,
    /* The attribute was not found, see errmsg */
    AttributeNotFound,
    /* Malformed configuration, see errmsg */
    Config,
    /* Other error, see origin */
    Nested,
}

impl Error {
    pub fn ck_rv(ckrv: CK_RV) -> Error {
        Error {
            kind: ErrorKind::CkError,
            origin: None,
            errmsg: None,
            ckrv: ckrv,
        }
    }

    pub fn ck_rv_from_error<E>(ckrv: CK_RV, error: E) -> Error
    where
        E: Into<Box<dyn error::Error + Send + Sync>>,
    {
        Error {
            kind: ErrorKind::CkError,
            origin: Some(error.into()),
            errmsg: None,
            ckrv: ckrv,
        }
    }

    pub fn ck_rv_with_errmsg(ckrv: CK_RV, errmsg: String) -> Error {
        Error {
            kind: ErrorKind::CkError,
            origin: None,
            errmsg: Some(errmsg),
            ckrv: ckrv,
        }
    }

    pub fn not_found(errmsg: String) -> Error {
        Error {
            kind: ErrorKind::AttributeNotFound,
            origin: None,
            errmsg: Some(errmsg),
            ckrv: CKR_GENERAL_ERROR,
        }
    }

    /// A configuration error, fatal at module initialization
    pub fn config_error(errmsg: String) -> Error {
        Error {
            kind: ErrorKind::Config,
            origin: None,
            errmsg: Some(errmsg),
            ckrv: CKR_GENERAL_ERROR,
        }
    }

    pub fn other_error<E>(error: E) -> Error
    where
        E: Into<Box<dyn error::Error + Send + Sync>>,
    {
        Error {
            kind: ErrorKind::Nested,
            origin: Some(error.into()),
            errmsg: None,
            ckrv: CKR_GENERAL_ERROR,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn attr_not_found(&self) -> bool {
        self.kind == ErrorKind::AttributeNotFound
    }

    pub fn is_config(&self) -> bool {
        self.kind == ErrorKind::Config
    }

    pub fn rv(&self) -> CK_RV {
        self.ckrv
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.kind {
            ErrorKind::CkError => {
                if let Some(ref e) = self.errmsg {
                    write!(f, "{}", e)
                } else if let Some(ref o) = self.origin {
                    write!(f, "{} (CK_RV 0x{:08x})", o, self.ckrv)
                } else {
                    match self.ckrv {
                        CKR_GENERAL_ERROR => {
                            write!(f, std::stringify!(CKR_GENERAL_ERROR))
                        }
                        CKR_ATTRIBUTE_TYPE_INVALID => {
                            write!(f, "CKR_ATTRIBUTE_TYPE_INVALID")
                        }
                        CKR_ATTRIBUTE_SENSITIVE => {
                            write!(f, "CKR_ATTRIBUTE_SENSITIVE")
                        }
                        _ => write!(f, "CK_RV 0x{:08x}", self.ckrv),
                    }
                }
            }
            ErrorKind::AttributeNotFound => write!(
                f,
                "attribute not found: {}",
                self.errmsg.as_deref().unwrap_or_default()
            ),
            ErrorKind::Config => write!(
                f,
                "configuration error: {}",
                self.errmsg.as_deref().unwrap_or_default()
            ),
            ErrorKind::Nested => match self.origin {
                Some(ref o) => o.fmt(f),
                None => write!(f, "unknown error"),
            },
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self.origin {
            Some(ref o) => Some(o.as_ref()),
            None => None,
        }
    }
}

impl From<CK_RV> for Error {
    fn from(rv: CK_RV) -> Error {
        Error::ck_rv(rv)
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Error {
        Error::other_error(error)
    }
}

impl From<std::num::TryFromIntError> for Error {
    fn from(error: std::num::TryFromIntError) -> Error {
        Error::other_error(error)
    }
}

impl From<std::num::ParseIntError> for Error {
    fn from(error: std::num::ParseIntError) -> Error {
        Error::other_error(error)
    }
}

impl From<toml::de::Error> for Error {
    fn from(error: toml::de::Error) -> Error {
        Error::config_error(error.to_string())
    }
}

impl From<libloading::Error> for Error {
    fn from(error: libloading::Error) -> Error {
        Error::ck_rv_from_error(CKR_GENERAL_ERROR, error)
    }
}

impl From<asn1::ParseError> for Error {
    fn from(error: asn1::ParseError) -> Error {
        Error::ck_rv_with_errmsg(
            CKR_ATTRIBUTE_VALUE_INVALID,
            format!("ASN.1 parse error: {:?}", error),
        )
    }
}

impl From<asn1::WriteError> for Error {
    fn from(_: asn1::WriteError) -> Error {
        Error::ck_rv(CKR_GENERAL_ERROR)
    }
}

/// The outcome of a batch attribute read that hit at least one hard
/// per-attribute failure.
///
/// `error` is the first hard failure encountered; `attributes` holds every
/// requested attribute in request order, including the ones that resolved
/// successfully, so callers may choose to proceed with them.
#[derive(Debug)]
pub struct PartialFailure {
    pub error: Error,
    pub attributes: Vec<Attribute>,
}

impl PartialFailure {
    pub fn rv(&self) -> CK_RV {
        self.error.rv()
    }
}

impl fmt::Display for PartialFailure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "partial attribute read failure ({} attributes): {}",
            self.attributes.len(),
            self.error
        )
    }
}

impl error::Error for PartialFailure {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        Some(&self.error)
    }
}

impl From<PartialFailure> for Error {
    fn from(pf: PartialFailure) -> Error {
        pf.error
    }
}
