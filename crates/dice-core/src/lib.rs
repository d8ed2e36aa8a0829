//! dice-auth core library
//!
//! Distinguished name primitives shared by the authentication strategy and
//! its CLI: parsing of slash- and comma-delimited DNs, and rendering in the
//! attribute order a DN-keyed directory server expects.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod dn;

pub use dn::{DEFAULT_ATTRIBUTE_ORDER, DistinguishedName, DnError, DnOptions, Rdn, canonicalize};
