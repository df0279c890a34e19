pub mod fat;
pub mod macho;
pub mod pe;

use std::io::{self, Read, Seek, SeekFrom};

use crate::error::ParseError;
use crate::format::{ContainerFormat, Details, SignaturePresence};

pub trait Header: std::fmt::Debug + Sized {
    /// Format this header decodes.
    const FORMAT: ContainerFormat;

    /// Decodes the container starting at the reader's current position.
    ///
    /// Returns `Ok(None)` when the leading magic does not belong to this
    /// format. Errors are reserved for containers whose magic matched but
    /// whose structure is broken.
    fn from_reader<R: Read + Seek>(cur: &mut R) -> Result<Option<Self>, ParseError>;

    /// Returns true if the container carries an embedded signature.
    fn is_signed(&self) -> bool;

    fn details(&self) -> Details;

    fn presence(&self) -> SignaturePresence {
        SignaturePresence {
            format: Self::FORMAT,
            signed: self.is_signed(),
            details: self.details(),
        }
    }
}

/// Reads a fixed-size magic, or `None` if the input is shorter than that.
pub(crate) fn read_magic<R: Read, const N: usize>(
    cur: &mut R,
) -> Result<Option<[u8; N]>, ParseError> {
    let mut buf = [0u8; N];
    match cur.read_exact(&mut buf) {
        Ok(()) => Ok(Some(buf)),
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
        Err(err) => Err(ParseError::Io(err)),
    }
}

/// Total length of the stream, leaving the position untouched.
pub(crate) fn stream_len<R: Seek>(cur: &mut R) -> io::Result<u64> {
    let pos = cur.stream_position()?;
    let end = cur.seek(SeekFrom::End(0))?;
    cur.seek(SeekFrom::Start(pos))?;
    Ok(end)
}
