use crate::error::{ParseError, ProbeError};
use crate::format::{ContainerFormat, SignaturePresence};
use crate::header::fat::FatHeader;
use crate::header::macho::MachHeader;
use crate::header::pe::PeHeader;
use crate::header::Header;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek};
use std::path::Path;

/// Result of trying one candidate format.
#[derive(Debug)]
pub enum Attempt<T> {
    Matched(T),
    NotThisFormat,
    Malformed(ParseError),
}

impl<T> From<Result<Option<T>, ParseError>> for Attempt<T> {
    fn from(res: Result<Option<T>, ParseError>) -> Self {
        match res {
            Ok(Some(found)) => Attempt::Matched(found),
            Ok(None) => Attempt::NotThisFormat,
            Err(err) => Attempt::Malformed(err),
        }
    }
}

type Candidate<R> = fn(&mut R) -> Attempt<SignaturePresence>;

fn attempt<H: Header, R: Read + Seek>(cur: &mut R) -> Attempt<SignaturePresence> {
    Attempt::from(H::from_reader(cur)).map(|header| header.presence())
}

impl<T> Attempt<T> {
    fn map<U>(self, f: impl FnOnce(T) -> U) -> Attempt<U> {
        match self {
            Attempt::Matched(found) => Attempt::Matched(f(found)),
            Attempt::NotThisFormat => Attempt::NotThisFormat,
            Attempt::Malformed(err) => Attempt::Malformed(err),
        }
    }
}

/// Candidates in priority order.
fn candidates<R: Read + Seek>() -> [(ContainerFormat, Candidate<R>); 3] {
    [
        (ContainerFormat::Pe, attempt::<PeHeader, R> as Candidate<R>),
        (ContainerFormat::MachO, attempt::<MachHeader, R> as Candidate<R>),
        (ContainerFormat::FatMachO, attempt::<FatHeader, R> as Candidate<R>),
    ]
}

/// Classifies the file at `path` and reports whether it carries a signature.
pub fn probe<P: AsRef<Path>>(path: P) -> Result<SignaturePresence, ProbeError> {
    let path = path.as_ref();
    log::debug!("probing {}", path.display());
    probe_with(|| File::open(path).map(BufReader::new))
}

/// Runs the candidates in order, reopening the source for each one.
///
/// Every source returned by `open` is dropped before the next candidate
/// runs. A candidate whose magic matches decides the outcome, including
/// when its structure turns out to be broken.
pub fn probe_with<R, F>(mut open: F) -> Result<SignaturePresence, ProbeError>
where
    R: Read + Seek,
    F: FnMut() -> io::Result<R>,
{
    for (format, candidate) in candidates::<R>() {
        let outcome = {
            let mut source = open()?;
            candidate(&mut source)
        };

        match outcome {
            Attempt::Matched(presence) => {
                log::info!("detected {format}, signed: {}", presence.signed);
                return Ok(presence);
            }
            Attempt::NotThisFormat => log::debug!("not a {format}"),
            Attempt::Malformed(ParseError::Io(err)) => return Err(ProbeError::Io(err)),
            Attempt::Malformed(source) => {
                log::warn!("{format} magic matched but structure is invalid: {source}");
                return Err(ProbeError::Malformed { format, source });
            }
        }
    }

    Err(ProbeError::UnsupportedFormat)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endian::{Endian, Width};
    use crate::format::Details;
    use crate::header::pe::{DataDirectory, PeVariant};
    use crate::testing::{FatBuilder, MachOBuilder, PeBuilder, CPU_TYPE_ARM64, CPU_TYPE_X86_64};
    use goblin::mach::load_command::{LC_SEGMENT_64, LC_UUID};
    use std::io::{Cursor, Write};
    use tempfile::NamedTempFile;

    /// Probes an in-memory image and counts how many times it was opened.
    fn probe_counting(bytes: &[u8]) -> (Result<SignaturePresence, ProbeError>, usize) {
        let mut opens = 0;
        let res = probe_with(|| {
            opens += 1;
            Ok(Cursor::new(bytes))
        });
        (res, opens)
    }

    fn write_temp(bytes: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(bytes).unwrap();
        file.flush().unwrap();
        file
    }

    fn unsigned_macho() -> Vec<u8> {
        MachOBuilder::new(Endian::Little, Width::Bits64)
            .command(LC_SEGMENT_64, 72)
            .command(LC_UUID, 16)
            .build()
    }

    #[test]
    fn test_signed_pe() {
        let bytes = PeBuilder::new(PeVariant::Pe32Plus)
            .security(0x1000, 0x2000)
            .build();
        let (res, opens) = probe_counting(&bytes);
        let presence = res.unwrap();

        assert_eq!(opens, 1);
        assert_eq!(presence.format, ContainerFormat::Pe);
        assert!(presence.signed);
        assert_eq!(
            presence.details,
            Details::Pe {
                variant: PeVariant::Pe32Plus,
                machine: 0x8664,
                security_directory: Some(DataDirectory {
                    virtual_address: 0x1000,
                    size: 0x2000
                }),
            }
        );
    }

    #[test]
    fn test_unsigned_pe() {
        let bytes = PeBuilder::new(PeVariant::Pe32Plus).build();
        let presence = probe_counting(&bytes).0.unwrap();
        assert_eq!(presence.format, ContainerFormat::Pe);
        assert!(!presence.signed);
    }

    #[test]
    fn test_macho_tried_second() {
        let (res, opens) = probe_counting(&unsigned_macho());
        let presence = res.unwrap();
        assert_eq!(opens, 2);
        assert_eq!(presence.format, ContainerFormat::MachO);
        assert!(!presence.signed);
    }

    #[test]
    fn test_fat_tried_last() {
        let arm = MachOBuilder::new(Endian::Little, Width::Bits64)
            .cputype(CPU_TYPE_ARM64)
            .code_signature(0x4000, 0x200)
            .build();
        let intel = MachOBuilder::new(Endian::Little, Width::Bits64)
            .cputype(CPU_TYPE_X86_64)
            .build();
        let bytes = FatBuilder::new()
            .slice(CPU_TYPE_X86_64, intel)
            .slice(CPU_TYPE_ARM64, arm)
            .build();

        let (res, opens) = probe_counting(&bytes);
        let presence = res.unwrap();
        assert_eq!(opens, 3);
        assert_eq!(presence.format, ContainerFormat::FatMachO);
        assert!(presence.signed);
    }

    #[test]
    fn test_unsupported_format() {
        let (res, opens) = probe_counting(b"just some text\n");
        assert_eq!(opens, 3);
        let err = res.unwrap_err();
        assert!(matches!(err, ProbeError::UnsupportedFormat));
        assert_eq!(err.to_string(), "unsupported file format");
    }

    #[test]
    fn test_empty_file_is_unsupported() {
        assert!(matches!(
            probe_counting(&[]).0.unwrap_err(),
            ProbeError::UnsupportedFormat
        ));
    }

    #[test]
    fn test_malformed_container_stops_the_probe() {
        let bytes = MachOBuilder::new(Endian::Big, Width::Bits32)
            .raw_command(LC_UUID, 0, 0)
            .build();
        let (res, opens) = probe_counting(&bytes);
        assert_eq!(opens, 2);
        match res.unwrap_err() {
            ProbeError::Malformed { format, .. } => assert_eq!(format, ContainerFormat::MachO),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unsupported_pe_variant_is_malformed() {
        let bytes = PeBuilder::new(PeVariant::Pe32).optional_magic(0x107).build();
        let err = probe_counting(&bytes).0.unwrap_err();
        assert!(err.to_string().contains("unsupported PE format"), "{err}");
    }

    #[test]
    fn test_open_failure_is_io() {
        let res = probe_with(|| -> io::Result<Cursor<Vec<u8>>> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied"))
        });
        assert!(matches!(res.unwrap_err(), ProbeError::Io(_)));
    }

    #[test]
    fn test_probe_path() {
        let file = write_temp(&unsigned_macho());
        let presence = probe(file.path()).unwrap();
        assert_eq!(presence.format, ContainerFormat::MachO);
        assert!(!presence.signed);
    }

    #[test]
    fn test_probe_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = probe(dir.path().join("absent.exe")).unwrap_err();
        assert!(matches!(err, ProbeError::Io(ref e) if e.kind() == io::ErrorKind::NotFound));
    }

    #[test]
    fn test_probe_is_idempotent() {
        let bytes = PeBuilder::new(PeVariant::Pe32)
            .security(0x800, 0x400)
            .build();
        let file = write_temp(&bytes);
        let first = probe(file.path()).unwrap();
        let second = probe(file.path()).unwrap();
        assert_eq!(first, second);
    }
}
