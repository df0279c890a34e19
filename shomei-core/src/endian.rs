//! Byte-order and word-width parameters shared by the Mach-O decoders.

use byteorder::{ReadBytesExt, BE, LE};
use std::fmt;
use std::io;

/// Byte order recorded by a container's magic number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

impl Endian {
    pub fn read_u32<R: io::Read>(self, cur: &mut R) -> io::Result<u32> {
        match self {
            Endian::Little => cur.read_u32::<LE>(),
            Endian::Big => cur.read_u32::<BE>(),
        }
    }

    pub fn read_u64<R: io::Read>(self, cur: &mut R) -> io::Result<u64> {
        match self {
            Endian::Little => cur.read_u64::<LE>(),
            Endian::Big => cur.read_u64::<BE>(),
        }
    }

    /// Reads a word-sized field, widening 32-bit values.
    pub fn read_word<R: io::Read>(self, cur: &mut R, width: Width) -> io::Result<u64> {
        match width {
            Width::Bits32 => self.read_u32(cur).map(u64::from),
            Width::Bits64 => self.read_u64(cur),
        }
    }
}

impl fmt::Display for Endian {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endian::Little => write!(f, "little"),
            Endian::Big => write!(f, "big"),
        }
    }
}

/// Word width of a header variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    Bits32,
    Bits64,
}

impl Width {
    pub fn bits(self) -> u32 {
        match self {
            Width::Bits32 => 32,
            Width::Bits64 => 64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_read_both_orders() {
        let bytes = [0x1d, 0x00, 0x00, 0x00];
        assert_eq!(Endian::Little.read_u32(&mut Cursor::new(bytes)).unwrap(), 0x1d);
        assert_eq!(Endian::Big.read_u32(&mut Cursor::new(bytes)).unwrap(), 0x1d00_0000);
    }

    #[test]
    fn test_read_word_widens() {
        let bytes = [0, 0, 0x10, 0, 0, 0, 0, 0];
        let mut cur = Cursor::new(bytes);
        assert_eq!(Endian::Big.read_word(&mut cur, Width::Bits32).unwrap(), 0x1000);
        assert_eq!(cur.position(), 4);

        let mut cur = Cursor::new(bytes);
        assert_eq!(
            Endian::Little.read_word(&mut cur, Width::Bits64).unwrap(),
            0x0010_0000
        );
    }
}
