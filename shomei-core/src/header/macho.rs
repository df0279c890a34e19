use crate::endian::{Endian, Width};
use crate::error::{truncated, ParseError};
use crate::format::{ContainerFormat, Details, SliceDetails};
use crate::header::{read_magic, stream_len, Header};
use goblin::mach::cputype::get_arch_name_from_types;
use goblin::mach::header::{MH_CIGAM, MH_CIGAM_64, MH_MAGIC, MH_MAGIC_64};
use goblin::mach::load_command::LC_CODE_SIGNATURE;
use std::io::{self, Cursor, Read, Seek};

/// Every load command starts with `cmd` and `cmdsize`.
const LOAD_COMMAND_HEADER_SIZE: u32 = 8;

/// Capability bits carried in the high byte of `cpusubtype`.
const CPU_SUBTYPE_MASK: u32 = 0xff00_0000;

/// A raw load command. Only `cmd` is interpreted for signature
/// detection; the payload is kept as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadCommand {
    pub cmd: u32,
    pub cmdsize: u32,
    /// Bytes following the 8-byte command header.
    pub payload: Vec<u8>,
}

impl LoadCommand {
    pub fn is_code_signature(&self) -> bool {
        self.cmd == LC_CODE_SIGNATURE
    }
}

/// `linkedit_data_command` body: where the signature blob lives in `__LINKEDIT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkeditData {
    pub dataoff: u32,
    pub datasize: u32,
}

/// A single-architecture Mach-O header and its load-command list.
///
/// Reference: `<mach-o/loader.h>`
#[derive(Debug, Clone)]
pub struct MachHeader {
    /// Byte order announced by the magic number.
    pub endian: Endian,

    /// 32-bit (`mach_header`, 28 bytes) or 64-bit (`mach_header_64`, 32 bytes).
    pub width: Width,

    pub cputype: u32,
    pub cpusubtype: u32,

    /// `MH_EXECUTE`, `MH_DYLIB`, ...
    pub filetype: u32,

    /// Size of the load-command area that follows the header.
    pub sizeofcmds: u32,

    pub flags: u32,

    /// Load commands in file order; `ncmds` of them.
    pub load_commands: Vec<LoadCommand>,
}

impl MachHeader {
    /// Maps a magic read as big-endian to the header layout it announces.
    fn layout(magic: [u8; 4]) -> Option<(Endian, Width)> {
        match u32::from_be_bytes(magic) {
            MH_MAGIC => Some((Endian::Big, Width::Bits32)),
            MH_CIGAM => Some((Endian::Little, Width::Bits32)),
            MH_MAGIC_64 => Some((Endian::Big, Width::Bits64)),
            MH_CIGAM_64 => Some((Endian::Little, Width::Bits64)),
            _ => None,
        }
    }

    /// Decodes a Mach-O image at the current position. `limit` is the
    /// absolute offset the image must not extend past: end of file for a
    /// standalone image, end of the slice inside a universal binary.
    pub(crate) fn decode<R: Read + Seek>(
        cur: &mut R,
        limit: u64,
    ) -> Result<Option<Self>, ParseError> {
        let start = cur.stream_position()?;
        let Some((endian, width)) = read_magic::<_, 4>(cur)?.and_then(Self::layout) else {
            return Ok(None);
        };

        let hdr = || truncated("Mach-O header");
        let cputype = endian.read_u32(cur).map_err(hdr())?;
        let cpusubtype = endian.read_u32(cur).map_err(hdr())?;
        let filetype = endian.read_u32(cur).map_err(hdr())?;
        let ncmds = endian.read_u32(cur).map_err(hdr())?;
        let sizeofcmds = endian.read_u32(cur).map_err(hdr())?;
        let flags = endian.read_u32(cur).map_err(hdr())?;
        if width == Width::Bits64 {
            let _reserved = endian.read_u32(cur).map_err(hdr())?;
        }

        let commands_start = cur.stream_position()?;
        if commands_start + u64::from(sizeofcmds) > limit {
            return Err(ParseError::Truncated {
                context: "load command area",
            });
        }
        let mut block = vec![0u8; sizeofcmds as usize];
        cur.read_exact(&mut block)
            .map_err(truncated("load command area"))?;

        let load_commands = walk_load_commands(&block, ncmds, endian, commands_start)?;

        log::debug!(
            "Mach-O at {start:#x}: {endian}-endian {}-bit, cputype {cputype:#x}, {} load commands",
            width.bits(),
            load_commands.len()
        );

        Ok(Some(MachHeader {
            endian,
            width,
            cputype,
            cpusubtype,
            filetype,
            sizeofcmds,
            flags,
            load_commands,
        }))
    }

    /// Architecture name such as `x86_64` or `arm64`.
    pub fn arch_name(&self) -> String {
        get_arch_name_from_types(self.cputype, self.cpusubtype & !CPU_SUBTYPE_MASK)
            .map(str::to_string)
            .unwrap_or_else(|| format!("cputype {:#x}", self.cputype))
    }

    /// Location of the signature blob, if an `LC_CODE_SIGNATURE` command is
    /// present and long enough to carry one.
    pub fn code_signature(&self) -> Option<LinkeditData> {
        let lc = self
            .load_commands
            .iter()
            .find(|lc| lc.is_code_signature())?;
        let mut body = Cursor::new(&lc.payload);
        Some(LinkeditData {
            dataoff: self.endian.read_u32(&mut body).ok()?,
            datasize: self.endian.read_u32(&mut body).ok()?,
        })
    }

    pub(crate) fn slice_details(&self) -> SliceDetails {
        SliceDetails {
            arch: self.arch_name(),
            endian: self.endian,
            width: self.width,
            signed: self.is_signed(),
            code_signature: self.code_signature(),
        }
    }
}

/// Splits the load-command area into commands using each command's
/// self-declared size. `base` is the file offset of `block`, for errors.
fn walk_load_commands(
    block: &[u8],
    ncmds: u32,
    endian: Endian,
    base: u64,
) -> Result<Vec<LoadCommand>, ParseError> {
    let mut commands = Vec::new();
    let mut offset = 0usize;

    for index in 0..ncmds {
        let at = base + offset as u64;
        let rest = &block[offset..];
        if rest.len() < LOAD_COMMAND_HEADER_SIZE as usize {
            return Err(ParseError::invalid_structure(
                "load command",
                at,
                format!("command {index} of {ncmds} starts past the load command area"),
            ));
        }

        let mut head = Cursor::new(rest);
        let cmd = endian.read_u32(&mut head)?;
        let cmdsize = endian.read_u32(&mut head)?;

        if cmdsize < LOAD_COMMAND_HEADER_SIZE {
            return Err(ParseError::invalid_structure(
                "load command",
                at,
                format!("declared size {cmdsize} is below the 8-byte minimum"),
            ));
        }
        if cmdsize as usize > rest.len() {
            return Err(ParseError::invalid_structure(
                "load command",
                at,
                format!(
                    "declared size {cmdsize} runs past the load command area ({} bytes left)",
                    rest.len()
                ),
            ));
        }

        commands.push(LoadCommand {
            cmd,
            cmdsize,
            payload: rest[LOAD_COMMAND_HEADER_SIZE as usize..cmdsize as usize].to_vec(),
        });
        offset += cmdsize as usize;
    }

    Ok(commands)
}

impl Header for MachHeader {
    const FORMAT: ContainerFormat = ContainerFormat::MachO;

    fn from_reader<R: io::Read + io::Seek>(cur: &mut R) -> Result<Option<Self>, ParseError> {
        let limit = stream_len(cur)?;
        Self::decode(cur, limit)
    }

    /// Scans every load command; segment layout plays no part.
    fn is_signed(&self) -> bool {
        self.load_commands.iter().any(LoadCommand::is_code_signature)
    }

    fn details(&self) -> Details {
        Details::MachO(self.slice_details())
    }
}
