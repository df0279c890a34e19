//! Builders for minimal synthetic PE, Mach-O and universal images.
//!
//! The images carry only the structures the decoders read: headers, the
//! data-directory array, load commands, and the fat architecture table.

use crate::endian::{Endian, Width};
use crate::header::pe::{PeVariant, IMAGE_DIRECTORY_ENTRY_SECURITY};
use byteorder::{WriteBytesExt, BE, LE};
use goblin::mach::load_command::LC_CODE_SIGNATURE;

pub const CPU_TYPE_X86_64: u32 = 0x0100_0007;
pub const CPU_TYPE_ARM64: u32 = 0x0100_000c;

const CPU_SUBTYPE_X86_64_ALL: u32 = 3;
const CPU_SUBTYPE_ARM64_ALL: u32 = 0;

const IMAGE_FILE_MACHINE_I386: u16 = 0x014c;
const IMAGE_FILE_MACHINE_AMD64: u16 = 0x8664;

const MH_EXECUTE: u32 = 0x2;

/// Builds a PE image: DOS header, `PE\0\0`, COFF header, optional header.
#[derive(Debug, Clone)]
pub struct PeBuilder {
    variant: PeVariant,
    optional_magic: u16,
    directories: u32,
    security: (u32, u32),
    size_of_optional_header: Option<u16>,
}

impl PeBuilder {
    pub fn new(variant: PeVariant) -> Self {
        let optional_magic = match variant {
            PeVariant::Pe32 => 0x10b,
            PeVariant::Pe32Plus => 0x20b,
        };
        Self {
            variant,
            optional_magic,
            directories: 16,
            security: (0, 0),
            size_of_optional_header: None,
        }
    }

    /// Sets the certificate table entry (`virtual_address`, `size`).
    pub fn security(mut self, virtual_address: u32, size: u32) -> Self {
        self.security = (virtual_address, size);
        self
    }

    /// Sets `NumberOfRvaAndSizes`.
    pub fn directories(mut self, count: u32) -> Self {
        self.directories = count;
        self
    }

    /// Overrides the optional header magic while keeping the variant's layout.
    pub fn optional_magic(mut self, magic: u16) -> Self {
        self.optional_magic = magic;
        self
    }

    /// Overrides `SizeOfOptionalHeader` in the COFF header.
    pub fn size_of_optional_header(mut self, size: u16) -> Self {
        self.size_of_optional_header = Some(size);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let (fixed, machine) = match self.variant {
            PeVariant::Pe32 => (96usize, IMAGE_FILE_MACHINE_I386),
            PeVariant::Pe32Plus => (112usize, IMAGE_FILE_MACHINE_AMD64),
        };
        let optional_size = fixed + 8 * self.directories as usize;

        let mut out = vec![0u8; 0x40];
        out[0] = b'M';
        out[1] = b'Z';
        out[0x3c] = 0x40;

        out.extend_from_slice(b"PE\0\0");
        out.write_u16::<LE>(machine).unwrap();
        out.write_u16::<LE>(0).unwrap(); // NumberOfSections
        out.write_u32::<LE>(0).unwrap(); // TimeDateStamp
        out.write_u32::<LE>(0).unwrap(); // PointerToSymbolTable
        out.write_u32::<LE>(0).unwrap(); // NumberOfSymbols
        out.write_u16::<LE>(self.size_of_optional_header.unwrap_or(optional_size as u16))
            .unwrap();
        out.write_u16::<LE>(0x0022).unwrap(); // EXECUTABLE_IMAGE | LARGE_ADDRESS_AWARE

        let optional_start = out.len();
        out.write_u16::<LE>(self.optional_magic).unwrap();
        out.resize(optional_start + fixed - 4, 0);
        out.write_u32::<LE>(self.directories).unwrap();
        for index in 0..self.directories as usize {
            let (va, size) = if index == IMAGE_DIRECTORY_ENTRY_SECURITY {
                self.security
            } else {
                (0, 0)
            };
            out.write_u32::<LE>(va).unwrap();
            out.write_u32::<LE>(size).unwrap();
        }
        out
    }
}

/// Builds a thin Mach-O image with an arbitrary load-command list.
#[derive(Debug, Clone)]
pub struct MachOBuilder {
    endian: Endian,
    width: Width,
    cputype: u32,
    ncmds: Option<u32>,
    /// (cmd, declared cmdsize, body bytes)
    commands: Vec<(u32, u32, Vec<u8>)>,
}

impl MachOBuilder {
    pub fn new(endian: Endian, width: Width) -> Self {
        Self {
            endian,
            width,
            cputype: CPU_TYPE_X86_64,
            ncmds: None,
            commands: Vec::new(),
        }
    }

    pub fn cputype(mut self, cputype: u32) -> Self {
        self.cputype = cputype;
        self
    }

    /// Appends a well-formed command with `body_len` zero bytes of payload.
    pub fn command(self, cmd: u32, body_len: u32) -> Self {
        self.raw_command(cmd, 8 + body_len, body_len)
    }

    /// Appends a command whose declared size may disagree with its body.
    pub fn raw_command(mut self, cmd: u32, cmdsize: u32, body_len: u32) -> Self {
        self.commands
            .push((cmd, cmdsize, vec![0u8; body_len as usize]));
        self
    }

    /// Appends an `LC_CODE_SIGNATURE` command pointing at `dataoff`/`datasize`.
    pub fn code_signature(mut self, dataoff: u32, datasize: u32) -> Self {
        let mut body = Vec::with_capacity(8);
        self.write_u32(&mut body, dataoff);
        self.write_u32(&mut body, datasize);
        self.commands.push((LC_CODE_SIGNATURE, 16, body));
        self
    }

    /// Overrides `ncmds` in the header.
    pub fn ncmds(mut self, ncmds: u32) -> Self {
        self.ncmds = Some(ncmds);
        self
    }

    fn write_u32(&self, out: &mut Vec<u8>, value: u32) {
        match self.endian {
            Endian::Little => out.write_u32::<LE>(value).unwrap(),
            Endian::Big => out.write_u32::<BE>(value).unwrap(),
        }
    }

    pub fn build(&self) -> Vec<u8> {
        let mut area = Vec::new();
        for (cmd, cmdsize, body) in &self.commands {
            self.write_u32(&mut area, *cmd);
            self.write_u32(&mut area, *cmdsize);
            area.extend_from_slice(body);
        }

        let magic: u32 = match (self.endian, self.width) {
            (Endian::Big, Width::Bits32) => 0xfeed_face,
            (Endian::Little, Width::Bits32) => 0xcefa_edfe,
            (Endian::Big, Width::Bits64) => 0xfeed_facf,
            (Endian::Little, Width::Bits64) => 0xcffa_edfe,
        };
        let cpusubtype = match self.cputype {
            CPU_TYPE_X86_64 => CPU_SUBTYPE_X86_64_ALL,
            _ => CPU_SUBTYPE_ARM64_ALL,
        };

        let mut out = magic.to_be_bytes().to_vec();
        self.write_u32(&mut out, self.cputype);
        self.write_u32(&mut out, cpusubtype);
        self.write_u32(&mut out, MH_EXECUTE);
        self.write_u32(&mut out, self.ncmds.unwrap_or(self.commands.len() as u32));
        self.write_u32(&mut out, area.len() as u32);
        self.write_u32(&mut out, 0); // flags
        if self.width == Width::Bits64 {
            self.write_u32(&mut out, 0);
        }
        out.extend_from_slice(&area);
        out
    }
}

/// Builds a universal binary with page-aligned slices.
#[derive(Debug, Clone, Default)]
pub struct FatBuilder {
    wide: bool,
    slices: Vec<(u32, Vec<u8>)>,
}

impl FatBuilder {
    const ALIGN_LOG2: u32 = 12;

    pub fn new() -> Self {
        Self::default()
    }

    /// Emits a `0xcafebabf` header with 64-bit offsets.
    pub fn wide(mut self) -> Self {
        self.wide = true;
        self
    }

    /// Appends a slice. `cputype` goes into the architecture table only;
    /// `image` is copied verbatim.
    pub fn slice(mut self, cputype: u32, image: Vec<u8>) -> Self {
        self.slices.push((cputype, image));
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let align = 1usize << Self::ALIGN_LOG2;
        let mut out = Vec::new();
        out.write_u32::<BE>(if self.wide { 0xcafe_babf } else { 0xcafe_babe })
            .unwrap();
        out.write_u32::<BE>(self.slices.len() as u32).unwrap();

        let mut offset = align;
        for (cputype, image) in &self.slices {
            out.write_u32::<BE>(*cputype).unwrap();
            out.write_u32::<BE>(0).unwrap();
            if self.wide {
                out.write_u64::<BE>(offset as u64).unwrap();
                out.write_u64::<BE>(image.len() as u64).unwrap();
                out.write_u32::<BE>(Self::ALIGN_LOG2).unwrap();
                out.write_u32::<BE>(0).unwrap();
            } else {
                out.write_u32::<BE>(offset as u32).unwrap();
                out.write_u32::<BE>(image.len() as u32).unwrap();
                out.write_u32::<BE>(Self::ALIGN_LOG2).unwrap();
            }
            offset += image.len().div_ceil(align) * align;
        }

        for (_, image) in &self.slices {
            let at = out.len().div_ceil(align) * align;
            out.resize(at, 0);
            out.extend_from_slice(image);
        }
        out
    }
}
