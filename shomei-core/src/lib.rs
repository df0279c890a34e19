//! Detects embedded code signatures in Windows PE, Mach-O and universal
//! (fat) Mach-O executables.
//!
//! This is a presence check only: it locates the PE security directory or
//! the Mach-O `LC_CODE_SIGNATURE` load command and never validates the
//! signature it points at.

pub mod endian;
pub mod error;
pub mod format;
mod header;
pub mod probe;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use endian::{Endian, Width};
pub use error::{ParseError, ProbeError};
pub use format::*;
pub use header::fat::{FatArch, FatHeader};
pub use header::macho::{LinkeditData, LoadCommand, MachHeader};
pub use header::pe::{DataDirectory, PeHeader, PeVariant};
pub use header::Header;
pub use probe::*;
