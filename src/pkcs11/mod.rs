// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! Standard cryptoki ABI definitions plus the generic vendor codes this
//! crate understands.

#![allow(non_upper_case_globals)]
#![allow(non_camel_case_types)]
#![allow(non_snake_case)]

pub use cryptoki_sys::*;

pub mod vendor;

// the generated value is not representable on 32b architectures
pub const CK_UNAVAILABLE_INFORMATION: CK_ULONG = CK_ULONG::MAX;

/// Size of a CK_ULONG in bytes on this platform
pub const CK_ULONG_SIZE: usize = std::mem::size_of::<CK_ULONG>();
