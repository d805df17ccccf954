//! Silt ABI crate: stable contracts shared by the host engine and native extensions.

pub mod ffi;
pub mod value;

pub use ffi::*;
pub use value::*;
