use anyhow::Result;
use serde::Serialize;
use shomei_core::{DataDirectory, Details, LinkeditData, SignaturePresence, SliceDetails};
use std::path::Path;

pub fn print_text(path: &Path, size: u64, presence: &SignaturePresence) {
    println!("File: {}", path.display());
    println!("Size: {size} bytes");
    println!("Type: {}", presence.format);
    println!("Signed: {}", if presence.signed { "Yes" } else { "No" });
}

pub fn print_json(path: &Path, size: u64, presence: &SignaturePresence) -> Result<()> {
    let report = Report {
        file: path.display().to_string(),
        size,
        kind: presence.format.label(),
        signed: presence.signed,
        details: DetailsReport::from(&presence.details),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[derive(Serialize)]
struct Report {
    file: String,
    size: u64,
    #[serde(rename = "type")]
    kind: &'static str,
    signed: bool,
    details: DetailsReport,
}

#[derive(Serialize)]
#[serde(tag = "format", rename_all = "snake_case")]
enum DetailsReport {
    Pe {
        variant: &'static str,
        machine: String,
        security_directory: Option<Directory>,
    },
    #[serde(rename = "macho")]
    MachO {
        slice: Slice,
    },
    Fat {
        slices: Vec<Slice>,
    },
}

#[derive(Serialize)]
struct Directory {
    virtual_address: u32,
    size: u32,
}

#[derive(Serialize)]
struct Slice {
    arch: String,
    endian: String,
    bits: u32,
    signed: bool,
    code_signature: Option<Blob>,
}

#[derive(Serialize)]
struct Blob {
    offset: u32,
    size: u32,
}

impl From<&Details> for DetailsReport {
    fn from(details: &Details) -> Self {
        match details {
            Details::Pe {
                variant,
                machine,
                security_directory,
            } => DetailsReport::Pe {
                variant: variant.name(),
                machine: format!("{machine:#06x}"),
                security_directory: security_directory.map(Directory::from),
            },
            Details::MachO(slice) => DetailsReport::MachO {
                slice: Slice::from(slice),
            },
            Details::FatMachO { slices } => DetailsReport::Fat {
                slices: slices.iter().map(Slice::from).collect(),
            },
        }
    }
}

impl From<DataDirectory> for Directory {
    fn from(dir: DataDirectory) -> Self {
        Self {
            virtual_address: dir.virtual_address,
            size: dir.size,
        }
    }
}

impl From<&SliceDetails> for Slice {
    fn from(slice: &SliceDetails) -> Self {
        Self {
            arch: slice.arch.clone(),
            endian: slice.endian.to_string(),
            bits: slice.width.bits(),
            signed: slice.signed,
            code_signature: slice.code_signature.map(Blob::from),
        }
    }
}

impl From<LinkeditData> for Blob {
    fn from(data: LinkeditData) -> Self {
        Self {
            offset: data.dataoff,
            size: data.datasize,
        }
    }
}
