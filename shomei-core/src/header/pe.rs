use crate::error::{truncated, ParseError};
use crate::format::{ContainerFormat, Details};
use crate::header::{read_magic, Header};
use byteorder::{ReadBytesExt, LE};
use goblin::pe::header::{DOS_MAGIC, PE_MAGIC};
use goblin::pe::optional_header::{MAGIC_32, MAGIC_64};
use std::io::{self, SeekFrom};

/// Offset of `e_lfanew` inside the DOS header.
const PE_POINTER_OFFSET: u64 = 0x3c;

/// Slot of the certificate table in the data-directory array.
pub const IMAGE_DIRECTORY_ENTRY_SECURITY: usize = 4;

/// Optional header variant, selected by its magic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeVariant {
    /// `0x10b`
    Pe32,
    /// `0x20b`
    Pe32Plus,
}

impl PeVariant {
    fn from_magic(magic: u16) -> Option<Self> {
        match magic {
            MAGIC_32 => Some(PeVariant::Pe32),
            MAGIC_64 => Some(PeVariant::Pe32Plus),
            _ => None,
        }
    }

    /// Bytes of the optional header before the data-directory array,
    /// `NumberOfRvaAndSizes` included.
    fn fixed_size(self) -> u64 {
        match self {
            PeVariant::Pe32 => 96,
            PeVariant::Pe32Plus => 112,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PeVariant::Pe32 => "PE32",
            PeVariant::Pe32Plus => "PE32+",
        }
    }
}

/// One `(virtual_address, size)` slot of the data-directory array.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DataDirectory {
    /// RVA of the table. For the security slot this is a file offset
    /// into the certificate blob appended after the image.
    pub virtual_address: u32,
    pub size: u32,
}

impl DataDirectory {
    /// A slot is in use only when both its address and size are non-zero.
    pub fn is_populated(&self) -> bool {
        self.size > 0 && self.virtual_address > 0
    }
}

/// The parts of a PE image needed to reach the security directory.
///
/// Reference: [PE Format](https://learn.microsoft.com/en-us/windows/win32/debug/pe-format)
#[derive(Debug, Clone)]
pub struct PeHeader {
    /// File offset of the `PE\0\0` signature.
    pub e_lfanew: u32,

    /// COFF machine type, e.g. `0x8664` for x86-64 or `0xaa64` for ARM64.
    pub machine: u16,

    /// Declared size of the optional header in bytes.
    pub size_of_optional_header: u16,

    /// PE32 or PE32+.
    pub variant: PeVariant,

    /// Data-directory array in declaration order. Its length is the
    /// header's `NumberOfRvaAndSizes`, which may be smaller than 16.
    pub data_directories: Vec<DataDirectory>,
}

impl PeHeader {
    /// Returns the certificate table entry, if the array reaches that far.
    pub fn security_directory(&self) -> Option<DataDirectory> {
        self.data_directories
            .get(IMAGE_DIRECTORY_ENTRY_SECURITY)
            .copied()
    }
}

impl Header for PeHeader {
    const FORMAT: ContainerFormat = ContainerFormat::Pe;

    fn from_reader<R: io::Read + io::Seek>(cur: &mut R) -> Result<Option<Self>, ParseError> {
        let start = cur.stream_position()?;

        let Some(mz) = read_magic::<_, 2>(cur)? else {
            return Ok(None);
        };
        if u16::from_le_bytes(mz) != DOS_MAGIC {
            return Ok(None);
        }

        // A bare DOS executable carries MZ but no PE signature; that is not
        // this format rather than a broken one.
        cur.seek(SeekFrom::Start(start + PE_POINTER_OFFSET))?;
        let Some(lfanew) = read_magic::<_, 4>(cur)? else {
            return Ok(None);
        };
        let e_lfanew = u32::from_le_bytes(lfanew);
        cur.seek(SeekFrom::Start(start + u64::from(e_lfanew)))?;
        match read_magic::<_, 4>(cur)? {
            Some(sig) if u32::from_le_bytes(sig) == PE_MAGIC => {}
            _ => {
                log::debug!("MZ header without PE signature at {e_lfanew:#x}");
                return Ok(None);
            }
        }

        let coff = || truncated("COFF file header");
        let machine = cur.read_u16::<LE>().map_err(coff())?;
        // NumberOfSections, TimeDateStamp, PointerToSymbolTable, NumberOfSymbols
        cur.seek(SeekFrom::Current(14))?;
        let size_of_optional_header = cur.read_u16::<LE>().map_err(coff())?;
        let _characteristics = cur.read_u16::<LE>().map_err(coff())?;

        if size_of_optional_header == 0 {
            return Err(ParseError::UnsupportedPe("no optional header".to_string()));
        }

        let optional_start = cur.stream_position()?;
        let opt = || truncated("optional header");
        let magic = cur.read_u16::<LE>().map_err(opt())?;
        let variant = PeVariant::from_magic(magic).ok_or_else(|| {
            ParseError::UnsupportedPe(format!("optional header magic {magic:#x}"))
        })?;

        let declared = u64::from(size_of_optional_header);
        let fixed = variant.fixed_size();
        if declared < fixed {
            return Err(ParseError::invalid_structure(
                "optional header",
                optional_start,
                format!(
                    "{} bytes declared, {} variant needs at least {fixed}",
                    declared,
                    variant.name()
                ),
            ));
        }

        cur.seek(SeekFrom::Start(optional_start + fixed - 4))?;
        let count = cur.read_u32::<LE>().map_err(opt())?;
        if (declared - fixed) / 8 < u64::from(count) {
            return Err(ParseError::invalid_structure(
                "data directory table",
                optional_start + fixed,
                format!("{count} entries do not fit in a {declared}-byte optional header"),
            ));
        }

        let dirs = || truncated("data directory table");
        let mut data_directories = Vec::with_capacity(count as usize);
        for _ in 0..count {
            data_directories.push(DataDirectory {
                virtual_address: cur.read_u32::<LE>().map_err(dirs())?,
                size: cur.read_u32::<LE>().map_err(dirs())?,
            });
        }

        if data_directories.len() <= IMAGE_DIRECTORY_ENTRY_SECURITY {
            log::warn!(
                "{} image declares only {} data directories; no security slot",
                variant.name(),
                data_directories.len()
            );
        }
        log::debug!(
            "{} image, machine {machine:#x}, {} data directories",
            variant.name(),
            data_directories.len()
        );

        Ok(Some(PeHeader {
            e_lfanew,
            machine,
            size_of_optional_header,
            variant,
            data_directories,
        }))
    }

    fn is_signed(&self) -> bool {
        self.security_directory()
            .is_some_and(|dir| dir.is_populated())
    }

    fn details(&self) -> Details {
        Details::Pe {
            variant: self.variant,
            machine: self.machine,
            security_directory: self.security_directory(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::PeBuilder;
    use std::io::Cursor;

    fn parse(bytes: Vec<u8>) -> Result<Option<PeHeader>, ParseError> {
        PeHeader::from_reader(&mut Cursor::new(bytes))
    }

    #[test]
    fn test_signed_pe32_plus() {
        let bytes = PeBuilder::new(PeVariant::Pe32Plus)
            .security(0x1000, 0x2000)
            .build();
        let pe = parse(bytes).unwrap().unwrap();

        assert_eq!(pe.variant, PeVariant::Pe32Plus);
        assert_eq!(pe.data_directories.len(), 16);
        assert_eq!(
            pe.security_directory(),
            Some(DataDirectory {
                virtual_address: 0x1000,
                size: 0x2000
            })
        );
        assert!(pe.is_signed());
    }

    #[test]
    fn test_empty_security_slot_is_unsigned() {
        let pe = parse(PeBuilder::new(PeVariant::Pe32Plus).build())
            .unwrap()
            .unwrap();
        assert!(!pe.is_signed());
    }

    #[test]
    fn test_half_populated_slot_is_unsigned() {
        for (va, size) in [(0, 0x2000), (0x1000, 0)] {
            let bytes = PeBuilder::new(PeVariant::Pe32).security(va, size).build();
            let pe = parse(bytes).unwrap().unwrap();
            assert!(!pe.is_signed(), "va={va:#x} size={size:#x}");
        }
    }

    #[test]
    fn test_signed_pe32() {
        let bytes = PeBuilder::new(PeVariant::Pe32).security(0x600, 0x1a8).build();
        let pe = parse(bytes).unwrap().unwrap();
        assert_eq!(pe.variant, PeVariant::Pe32);
        assert!(pe.is_signed());
    }

    #[test]
    fn test_short_directory_table_has_no_signature() {
        let bytes = PeBuilder::new(PeVariant::Pe32Plus)
            .directories(4)
            .security(0x1000, 0x2000)
            .build();
        let pe = parse(bytes).unwrap().unwrap();
        assert_eq!(pe.data_directories.len(), 4);
        assert_eq!(pe.security_directory(), None);
        assert!(!pe.is_signed());
    }

    #[test]
    fn test_unknown_optional_magic_is_unsupported() {
        // 0x107 is the ROM image magic.
        let bytes = PeBuilder::new(PeVariant::Pe32).optional_magic(0x107).build();
        let err = parse(bytes).unwrap_err();
        assert!(matches!(err, ParseError::UnsupportedPe(_)));
        assert!(err.to_string().starts_with("unsupported PE format"));
    }

    #[test]
    fn test_missing_optional_header_is_unsupported() {
        let bytes = PeBuilder::new(PeVariant::Pe32Plus)
            .size_of_optional_header(0)
            .build();
        assert!(matches!(
            parse(bytes).unwrap_err(),
            ParseError::UnsupportedPe(_)
        ));
    }

    #[test]
    fn test_directory_count_exceeding_header_is_invalid() {
        let bytes = PeBuilder::new(PeVariant::Pe32Plus)
            .size_of_optional_header(112 + 8 * 8)
            .build();
        assert!(matches!(
            parse(bytes).unwrap_err(),
            ParseError::InvalidStructure {
                kind: "data directory table",
                ..
            }
        ));
    }

    #[test]
    fn test_truncated_directory_table() {
        let mut bytes = PeBuilder::new(PeVariant::Pe32Plus).build();
        bytes.truncate(bytes.len() - 20);
        assert!(matches!(
            parse(bytes).unwrap_err(),
            ParseError::Truncated {
                context: "data directory table"
            }
        ));
    }

    #[test]
    fn test_not_a_pe() {
        assert!(parse(b"#!/bin/sh\necho hi\n".to_vec()).unwrap().is_none());
        assert!(parse(Vec::new()).unwrap().is_none());
        assert!(parse(vec![0xcf, 0xfa, 0xed, 0xfe, 0, 0, 0, 0]).unwrap().is_none());
    }

    #[test]
    fn test_dos_stub_without_pe_signature() {
        let mut bytes = vec![0u8; 0x80];
        bytes[0] = b'M';
        bytes[1] = b'Z';
        bytes[0x3c] = 0x40;
        assert!(parse(bytes).unwrap().is_none());
    }
}
