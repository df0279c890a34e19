//! Error types for container decoding and format probing.

use std::io;
use thiserror::Error;

use crate::format::ContainerFormat;

/// Structural failure inside a container whose magic already matched.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The file ended before a fixed-size structure was complete.
    #[error("truncated {context}")]
    Truncated { context: &'static str },

    /// A structure was present but internally inconsistent.
    #[error("invalid {kind} at offset {offset:#x}: {reason}")]
    InvalidStructure {
        kind: &'static str,
        offset: u64,
        reason: String,
    },

    /// PE image with no optional header, or one that is neither PE32 nor PE32+.
    #[error("unsupported PE format: {0}")]
    UnsupportedPe(String),

    /// Failure inside one architecture slice of a universal binary.
    #[error("architecture slice {index}: {source}")]
    Slice {
        index: usize,
        source: Box<ParseError>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ParseError {
    pub fn invalid_structure(kind: &'static str, offset: u64, reason: impl Into<String>) -> Self {
        Self::InvalidStructure {
            kind,
            offset,
            reason: reason.into(),
        }
    }
}

/// Maps a short read to [`ParseError::Truncated`] and anything else to [`ParseError::Io`].
pub(crate) fn truncated(context: &'static str) -> impl FnOnce(io::Error) -> ParseError {
    move |err| match err.kind() {
        io::ErrorKind::UnexpectedEof => ParseError::Truncated { context },
        _ => ParseError::Io(err),
    }
}

/// Reasons the prober could not classify a file.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error(transparent)]
    Io(#[from] io::Error),

    /// No candidate format recognised the file's magic.
    #[error("unsupported file format")]
    UnsupportedFormat,

    /// A candidate's magic matched but its structure did not parse.
    #[error("malformed {format}: {source}")]
    Malformed {
        format: ContainerFormat,
        source: ParseError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ParseError::invalid_structure("load command", 0x20, "declared size 4 is below 8");
        assert_eq!(
            err.to_string(),
            "invalid load command at offset 0x20: declared size 4 is below 8"
        );

        let err = ProbeError::Malformed {
            format: ContainerFormat::MachO,
            source: ParseError::Truncated {
                context: "Mach-O header",
            },
        };
        assert_eq!(err.to_string(), "malformed macOS Mach-O: truncated Mach-O header");
        assert_eq!(ProbeError::UnsupportedFormat.to_string(), "unsupported file format");
    }

    #[test]
    fn test_truncated_mapping() {
        let eof = io::Error::new(io::ErrorKind::UnexpectedEof, "eof");
        assert!(matches!(
            truncated("fat header")(eof),
            ParseError::Truncated { context: "fat header" }
        ));

        let denied = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        assert!(matches!(truncated("fat header")(denied), ParseError::Io(_)));
    }
}
