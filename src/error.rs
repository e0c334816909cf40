//! Error taxonomy for the decoder.
//!
//! Every fallible operation returns [`PstError`].  Callers that walk many
//! nodes whose purpose is not known ahead of time should branch on
//! [`PstError::kind`] (or the [`PstError::is_benign`] shortcut) and skip
//! benign failures instead of aborting the walk.

use serde::Serialize;
use std::io;
use thiserror::Error;

use crate::heap::ClientSignature;
use crate::ids::{Bid, Nid};

pub type Result<T> = std::result::Result<T, PstError>;

#[derive(Error, Debug)]
pub enum PstError {
    #[error("Not a PST file (magic {0:#010x})")]
    NotPst(u32),
    #[error("Unsupported file format version: {0}")]
    UnknownVersion(u16),
    #[error("Unknown encryption method: {0:#04x}")]
    UnknownEncryption(u8),
    #[error("{what} CRC mismatch: stored {stored:#010x}, calculated {calculated:#010x}")]
    CrcMismatch {
        what: &'static str,
        stored: u32,
        calculated: u32,
    },
    #[error("Bad data tree block type {btype:#04x} in block {bid}")]
    BadXBlockType { bid: Bid, btype: u8 },
    #[error("Bad data tree level {level} in block {bid}")]
    BadXBlockLevel { bid: Bid, level: u8 },
    #[error("Block {bid} failed to inflate: {detail}")]
    Decompression { bid: Bid, detail: String },
    #[error("Block {0} not found in the block index")]
    BlockNotFound(Bid),
    #[error("Node {0} not found in the node index")]
    NodeNotFound(Nid),
    #[error("Node {0} has no data block")]
    NullDataBlock(Nid),
    #[error("Not a heap-on-node block (signature {0:#04x})")]
    NotHeapNode(u8),
    #[error("Unknown heap client signature {0:#04x}")]
    UnknownClientSignature(u8),
    #[error("Expected a {expected} heap, found {found}")]
    UnexpectedClientSignature {
        expected: ClientSignature,
        found: ClientSignature,
    },
    #[error("Unimplemented property type {0:#06x}")]
    UnimplementedPropertyType(u16),
    #[error("Unknown property type {0:#06x}")]
    UnknownPropertyType(u16),
    #[error("Row data is {found} bytes, expected {expected}")]
    RowSizeMismatch { expected: usize, found: usize },
    #[error("Row data continues past the {0} rows declared by the row index")]
    DataOverflow(usize),
    #[error("Named property stream {0} not found")]
    NameIdStreamMissing(&'static str),
    #[error("Field {0} missing from record")]
    MissingField(&'static str),
    #[error("Corrupt structure: {detail}")]
    Corrupt { detail: String },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Coarse classification of a [`PstError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    /// The byte source is not a PST/OST file at all.
    NotThisFormat,
    /// A PST file of a version or encryption method this build does not read.
    UnsupportedFormat,
    /// A stored CRC disagrees with the computed one.
    Integrity,
    /// Damaged or inconsistent structure.
    Structural,
    /// The node is not what the caller probed for; safe to skip.
    Benign,
    /// A recognized property type without a decoder.
    Unimplemented,
    /// A property type code outside the known registry.
    Unknown,
    /// A compressed block did not inflate.
    Decompression,
    Io,
}

impl PstError {
    pub(crate) fn corrupt(detail: impl Into<String>) -> Self {
        PstError::Corrupt { detail: detail.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            PstError::NotPst(_) => ErrorKind::NotThisFormat,
            PstError::UnknownVersion(_) | PstError::UnknownEncryption(_) => {
                ErrorKind::UnsupportedFormat
            }
            PstError::CrcMismatch { .. } => ErrorKind::Integrity,
            PstError::BadXBlockType { .. }
            | PstError::BadXBlockLevel { .. }
            | PstError::BlockNotFound(_)
            | PstError::NodeNotFound(_)
            | PstError::RowSizeMismatch { .. }
            | PstError::DataOverflow(_)
            | PstError::NameIdStreamMissing(_)
            | PstError::MissingField(_)
            | PstError::Corrupt { .. } => ErrorKind::Structural,
            PstError::NullDataBlock(_)
            | PstError::NotHeapNode(_)
            | PstError::UnknownClientSignature(_)
            | PstError::UnexpectedClientSignature { .. } => ErrorKind::Benign,
            PstError::UnimplementedPropertyType(_) => ErrorKind::Unimplemented,
            PstError::UnknownPropertyType(_) => ErrorKind::Unknown,
            PstError::Decompression { .. } => ErrorKind::Decompression,
            PstError::Io(_) => ErrorKind::Io,
        }
    }

    /// True when a structural scan should skip the offending node and go on.
    pub fn is_benign(&self) -> bool {
        self.kind() == ErrorKind::Benign
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn benign_kinds_are_skippable() {
        assert!(PstError::UnknownClientSignature(0x42).is_benign());
        assert!(PstError::NotHeapNode(0x00).is_benign());
        assert!(!PstError::NotPst(0).is_benign());
        assert!(!PstError::CrcMismatch { what: "block", stored: 1, calculated: 2 }.is_benign());
    }

    #[test]
    fn unimplemented_is_distinct_from_unknown() {
        assert_eq!(PstError::UnimplementedPropertyType(0xfd).kind(), ErrorKind::Unimplemented);
        assert_eq!(PstError::UnknownPropertyType(0x77).kind(), ErrorKind::Unknown);
    }
}
