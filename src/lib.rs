// Copyright 2023 Simo Sorce
// See LICENSE.txt file for terms

//! This is ckbridge
//!
//! A bridging layer that sits between applications and native PKCS #11
//! modules. It reads and writes object attributes through a uniform,
//! strongly typed representation, translates vendor specific key type
//! and mechanism codes to a generic set, and repairs the EC points and
//! signatures that some modules return in non conformant encodings.
//!
//! The usual entry points are [Module::load], which loads a cryptoki
//! library and selects its vendor code table, and [Session], which reads
//! attributes of the objects reachable through an open session handle.

pub mod pkcs11;

pub mod error;
#[macro_use]
mod misc;
pub mod logger;

pub mod attribute;
pub mod codec;
pub mod config;
pub mod ec;
pub mod fetch;
pub mod ffi;
pub mod fixup;
mod kasn1;
pub mod module;
pub mod native;
pub mod session;
pub mod vendorcode;

pub use attribute::{Attribute, AttributeValue, AttrType, Date, Template};
pub use codec::RawAttribute;
pub use config::Config;
pub use error::{Error, ErrorKind, PartialFailure, Result};
pub use fixup::{FixKind, FixState};
pub use module::Module;
pub use native::{ModuleInfo, NativeModule};
pub use session::Session;
pub use vendorcode::{ModuleIdentity, VendorCodeTable, VendorRules};

#[cfg(test)]
mod tests;
