use std::fmt;

use crate::endian::{Endian, Width};
use crate::header::macho::LinkeditData;
use crate::header::pe::{DataDirectory, PeVariant};

/// Container format chosen by the prober.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerFormat {
    Pe,
    MachO,
    FatMachO,
    Unknown,
}

impl ContainerFormat {
    /// Human-readable label used in reports.
    pub fn label(self) -> &'static str {
        match self {
            ContainerFormat::Pe => "Windows PE",
            ContainerFormat::MachO => "macOS Mach-O",
            ContainerFormat::FatMachO => "macOS Universal Binary",
            ContainerFormat::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for ContainerFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Outcome of a successful probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignaturePresence {
    pub format: ContainerFormat,
    pub signed: bool,
    pub details: Details,
}

/// Format-specific facts gathered on the way to the verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Details {
    Pe {
        variant: PeVariant,
        machine: u16,
        /// `None` when the data-directory table has no security slot.
        security_directory: Option<DataDirectory>,
    },
    MachO(SliceDetails),
    FatMachO { slices: Vec<SliceDetails> },
}

/// One Mach-O image, standalone or inside a universal binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceDetails {
    pub arch: String,
    pub endian: Endian,
    pub width: Width,
    pub signed: bool,
    pub code_signature: Option<LinkeditData>,
}
