use crate::endian::{Endian, Width};
use crate::error::{truncated, ParseError};
use crate::format::{ContainerFormat, Details};
use crate::header::macho::MachHeader;
use crate::header::{read_magic, stream_len, Header};
use goblin::mach::fat::FAT_MAGIC;
use std::io::{self, SeekFrom};

/// 64-bit fat header: `fat_arch_64` entries with 64-bit offsets and sizes.
const FAT_MAGIC_64: u32 = 0xcafe_babf;

/// Java class files share `0xcafebabe`; their major version (>= 45) sits
/// where a fat header keeps its architecture count.
const JAVA_CLASS_MIN_VERSION: u32 = 45;

/// Universal binaries are always big-endian on disk.
const FAT_ENDIAN: Endian = Endian::Big;

/// Raw `fat_arch` / `fat_arch_64` table entry.
struct ArchEntry {
    /// File offset of the entry itself, for errors.
    at: u64,
    cputype: u32,
    cpusubtype: u32,
    offset: u64,
    size: u64,
    align: u32,
}

impl ArchEntry {
    fn read<R: io::Read + io::Seek>(cur: &mut R, width: Width) -> Result<Self, ParseError> {
        let at = cur.stream_position()?;
        let entry = || truncated("fat architecture table");
        let cputype = FAT_ENDIAN.read_u32(cur).map_err(entry())?;
        let cpusubtype = FAT_ENDIAN.read_u32(cur).map_err(entry())?;
        let offset = FAT_ENDIAN.read_word(cur, width).map_err(entry())?;
        let size = FAT_ENDIAN.read_word(cur, width).map_err(entry())?;
        let align = FAT_ENDIAN.read_u32(cur).map_err(entry())?;
        if width == Width::Bits64 {
            let _reserved = FAT_ENDIAN.read_u32(cur).map_err(entry())?;
        }
        Ok(ArchEntry {
            at,
            cputype,
            cpusubtype,
            offset,
            size,
            align,
        })
    }
}

/// One `fat_arch` / `fat_arch_64` entry and the image it points at.
#[derive(Debug, Clone)]
pub struct FatArch {
    pub cputype: u32,
    pub cpusubtype: u32,
    /// Offset of the slice from the start of the universal binary.
    pub offset: u64,
    pub size: u64,
    /// Alignment as a power of two.
    pub align: u32,
    pub image: MachHeader,
}

/// A universal binary: an ordered list of single-architecture slices.
#[derive(Debug, Clone)]
pub struct FatHeader {
    pub width: Width,
    pub arches: Vec<FatArch>,
}

impl Header for FatHeader {
    const FORMAT: ContainerFormat = ContainerFormat::FatMachO;

    fn from_reader<R: io::Read + io::Seek>(cur: &mut R) -> Result<Option<Self>, ParseError> {
        let start = cur.stream_position()?;
        let file_end = stream_len(cur)?;

        let Some(magic) = read_magic::<_, 4>(cur)? else {
            return Ok(None);
        };
        let width = match u32::from_be_bytes(magic) {
            FAT_MAGIC => Width::Bits32,
            FAT_MAGIC_64 => Width::Bits64,
            _ => return Ok(None),
        };

        let nfat_arch = FAT_ENDIAN
            .read_u32(cur)
            .map_err(truncated("fat header"))?;
        if width == Width::Bits32 && nfat_arch >= JAVA_CLASS_MIN_VERSION {
            log::debug!("0xcafebabe followed by {nfat_arch}: Java class file, not a universal binary");
            return Ok(None);
        }
        if nfat_arch == 0 {
            return Err(ParseError::invalid_structure(
                "fat header",
                start,
                "universal binary contains no architectures",
            ));
        }

        let entry_size: u64 = match width {
            Width::Bits32 => 20,
            Width::Bits64 => 32,
        };
        if start + 8 + u64::from(nfat_arch) * entry_size > file_end {
            return Err(ParseError::Truncated {
                context: "fat architecture table",
            });
        }

        let mut entries = Vec::with_capacity(nfat_arch as usize);
        for _ in 0..nfat_arch {
            entries.push(ArchEntry::read(cur, width)?);
        }

        let mut arches = Vec::with_capacity(entries.len());
        for (index, entry) in entries.into_iter().enumerate() {
            let slice = |source: ParseError| ParseError::Slice {
                index,
                source: Box::new(source),
            };

            let ArchEntry {
                at,
                cputype,
                cpusubtype,
                offset,
                size,
                align,
            } = entry;
            let slice_end = start
                .checked_add(offset)
                .and_then(|slice_start| slice_start.checked_add(size))
                .filter(|&end| end <= file_end)
                .ok_or_else(|| {
                    slice(ParseError::invalid_structure(
                        "fat architecture",
                        at,
                        format!(
                            "slice {offset:#x}+{size:#x} extends past end of file ({file_end:#x})"
                        ),
                    ))
                })?;
            let slice_start = slice_end - size;

            cur.seek(SeekFrom::Start(slice_start))?;
            let image = MachHeader::decode(cur, slice_end)
                .map_err(slice)?
                .ok_or_else(|| {
                    slice(ParseError::invalid_structure(
                        "fat architecture",
                        slice_start,
                        "slice is not a Mach-O image",
                    ))
                })?;

            if image.cputype != cputype {
                return Err(slice(ParseError::invalid_structure(
                    "fat architecture",
                    slice_start,
                    format!(
                        "slice cputype {:#x} does not match table entry {cputype:#x}",
                        image.cputype
                    ),
                )));
            }

            arches.push(FatArch {
                cputype,
                cpusubtype,
                offset,
                size,
                align,
                image,
            });
        }

        log::debug!("universal binary with {} slices", arches.len());
        Ok(Some(FatHeader { width, arches }))
    }

    /// Signed when any slice is signed.
    fn is_signed(&self) -> bool {
        self.arches.iter().any(|arch| arch.image.is_signed())
    }

    fn details(&self) -> Details {
        Details::FatMachO {
            slices: self
                .arches
                .iter()
                .map(|arch| arch.image.slice_details())
                .collect(),
        }
    }
}
