use std::io;

use thiserror::Error;

/// Fieldless outcome classes, stable enough for scripts to branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArgument,
    ProcessNotFound,
    AccessDenied,
    SegmentNotFound,
    ReadFailure,
    PatternNotFound,
    WriteFailure,
    VerificationFailed,
}

impl ErrorKind {
    /// Exit status reported by the binary for this kind of failure
    pub fn exit_code(self) -> u8 {
        match self {
            ErrorKind::InvalidArgument => 2,
            ErrorKind::ProcessNotFound => 3,
            ErrorKind::AccessDenied => 4,
            ErrorKind::SegmentNotFound => 5,
            ErrorKind::ReadFailure => 6,
            ErrorKind::PatternNotFound => 7,
            ErrorKind::WriteFailure => 8,
            ErrorKind::VerificationFailed => 9,
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    InvalidArgument(String),

    #[error("Process {pid} not found")]
    ProcessNotFound { pid: i32 },

    #[error("Permission denied opening /proc/{pid}/{resource}. Run with sudo")]
    AccessDenied { pid: i32, resource: &'static str },

    #[error("Heap not found in process {pid}")]
    SegmentNotFound { pid: i32 },

    #[error("Error reading /proc/{pid}/{resource}: {source}")]
    ReadFailure {
        pid: i32,
        resource: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("String '{}' not found in heap of process {pid}", .pattern.escape_ascii())]
    PatternNotFound { pid: i32, pattern: Vec<u8> },

    #[error("Error writing to heap memory of process {pid} at {address:#x}: {source}")]
    WriteFailure {
        pid: i32,
        address: u64,
        #[source]
        source: io::Error,
    },

    #[error(
        "Patch did not land in process {pid} at {address:#x}: expected '{}', found '{}'",
        .expected.escape_ascii(),
        .found.escape_ascii()
    )]
    VerificationFailed {
        pid: i32,
        address: u64,
        expected: Vec<u8>,
        found: Vec<u8>,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Error::ProcessNotFound { .. } => ErrorKind::ProcessNotFound,
            Error::AccessDenied { .. } => ErrorKind::AccessDenied,
            Error::SegmentNotFound { .. } => ErrorKind::SegmentNotFound,
            Error::ReadFailure { .. } => ErrorKind::ReadFailure,
            Error::PatternNotFound { .. } => ErrorKind::PatternNotFound,
            Error::WriteFailure { .. } => ErrorKind::WriteFailure,
            Error::VerificationFailed { .. } => ErrorKind::VerificationFailed,
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.kind().exit_code()
    }

    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        Error::InvalidArgument(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_exit_codes_are_distinct() {
        let kinds = [
            ErrorKind::InvalidArgument,
            ErrorKind::ProcessNotFound,
            ErrorKind::AccessDenied,
            ErrorKind::SegmentNotFound,
            ErrorKind::ReadFailure,
            ErrorKind::PatternNotFound,
            ErrorKind::WriteFailure,
            ErrorKind::VerificationFailed,
        ];
        let codes: HashSet<u8> = kinds.iter().map(|k| k.exit_code()).collect();
        assert_eq!(codes.len(), kinds.len());
        assert!(!codes.contains(&0));
    }

    #[test]
    fn test_messages_carry_context() {
        let err = Error::PatternNotFound {
            pid: 42,
            pattern: b"hello".to_vec(),
        };
        assert_eq!(err.kind(), ErrorKind::PatternNotFound);
        assert_eq!(
            err.to_string(),
            "String 'hello' not found in heap of process 42"
        );

        let err = Error::WriteFailure {
            pid: 7,
            address: 0x55d0_1000,
            source: io::Error::from(io::ErrorKind::WriteZero),
        };
        assert_eq!(err.exit_code(), 8);
        assert!(err.to_string().contains("0x55d01000"));
        assert!(err.to_string().contains("process 7"));
    }

    #[test]
    fn test_non_printable_pattern_is_escaped() {
        let err = Error::PatternNotFound {
            pid: 1,
            pattern: vec![b'a', 0, 0xff],
        };
        assert_eq!(
            err.to_string(),
            "String 'a\\x00\\xff' not found in heap of process 1"
        );
    }
}
