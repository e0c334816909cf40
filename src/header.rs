//! File header (superblock) at offset 0.
//!
//! # Layout
//!
//! A 24-byte common prefix (magic, partial CRC, version fields) is followed by
//! a variant-specific tail: 488 bytes for ANSI files, 540 bytes for the wide
//! variants.  Two CRCs protect the header, both computed from offset 8:
//!
//! - `dwCRCPartial` over 471 bytes (every variant),
//! - `dwCRCFull` over 516 bytes (wide variants only).
//!
//! Validation order is magic, partial CRC, version, full CRC, so a file with
//! the wrong magic is rejected before any CRC is computed.

use serde::Serialize;
use std::io::Read;
use tracing::debug;

use crate::crc;
use crate::crypto::Encryption;
use crate::error::{PstError, Result};
use crate::fields::{field, record_size, Field, FieldBag, FieldKind as K};
use crate::format::FormatVariant;
use crate::ids::{Bid, Bref};
use crate::options::DecodeOptions;

/// "!BDN" read as a little-endian u32.
pub const MAGIC: u32 = 0x4e44_4221;
/// "SM", the client magic of a PST file.
pub const MAGIC_CLIENT_PST: u16 = 0x4d53;
/// "SO", the client magic of an OST file.
pub const MAGIC_CLIENT_OST: u16 = 0x4f53;

pub const CRC_START: usize = 8;
pub const CRC_PARTIAL_LEN: usize = 471;
pub const CRC_FULL_LEN: usize = 516;

pub const HEADER_SIZE_ANSI: usize = 512;
pub const HEADER_SIZE_UNICODE: usize = 564;

/// Offset of `bCryptMethod` in each layout.
pub const CRYPT_METHOD_OFFSET_ANSI: usize = 461;
pub const CRYPT_METHOD_OFFSET_UNICODE: usize = 513;

const COMMON: &[Field] = &[
    field("dwMagic", K::U32),
    field("dwCRCPartial", K::U32),
    field("wMagicClient", K::U16),
    field("wVer", K::U16),
    field("wVerClient", K::U16),
    field("bPlatformCreate", K::U8),
    field("bPlatformAccess", K::U8),
    field("dwReserved1", K::Skip(4)),
    field("dwReserved2", K::Skip(4)),
];

const UNICODE_TAIL: &[Field] = &[
    field("bidUnused", K::Skip(8)),
    field("bidNextP", K::Bid),
    field("dwUnique", K::U32),
    field("rgnid", K::Skip(128)),
    field("qwUnused", K::Skip(8)),
    field("dwRootReserved", K::Skip(4)),
    field("ibFileEOF", K::Ib),
    field("ibAMapLast", K::Ib),
    field("cbAMapFree", K::U64),
    field("cbPMapFree", K::U64),
    field("BREFNBT", K::Bref),
    field("BREFBBT", K::Bref),
    field("fAMapValid", K::U8),
    field("bRootReserved", K::Skip(1)),
    field("wRootReserved", K::Skip(2)),
    field("dwAlign", K::Skip(4)),
    field("rgbFM", K::Skip(128)),
    field("rgbFP", K::Skip(128)),
    field("bSentinel", K::U8),
    field("bCryptMethod", K::U8),
    field("rgbReserved", K::Skip(2)),
    field("bidNextB", K::Bid),
    field("dwCRCFull", K::U32),
    field("rgbReserved2", K::Skip(3)),
    field("bReserved", K::Skip(1)),
    field("rgbReserved3", K::Skip(32)),
];

const ANSI_TAIL: &[Field] = &[
    field("bidNextP", K::Bid),
    field("bidNextB", K::Bid),
    field("dwUnique", K::U32),
    field("rgnid", K::Skip(128)),
    field("dwRootReserved", K::Skip(4)),
    field("ibFileEOF", K::Ib),
    field("ibAMapLast", K::Ib),
    field("cbAMapFree", K::U32),
    field("cbPMapFree", K::U32),
    field("BREFNBT", K::Bref),
    field("BREFBBT", K::Bref),
    field("fAMapValid", K::U8),
    field("bRootReserved", K::Skip(1)),
    field("wRootReserved", K::Skip(2)),
    field("rgbFM", K::Skip(128)),
    field("rgbFP", K::Skip(128)),
    field("bSentinel", K::U8),
    field("bCryptMethod", K::U8),
    field("rgbReserved", K::Skip(2)),
    field("ullReserved", K::Skip(8)),
    field("dwReserved", K::Skip(4)),
    field("rgbReserved2", K::Skip(3)),
    field("bReserved", K::Skip(1)),
    field("rgbReserved3", K::Skip(32)),
];

#[derive(Debug, Clone, Serialize)]
pub struct Header {
    pub magic: u32,
    pub magic_client: u16,
    pub version: u16,
    pub client_version: u16,
    pub platform_create: u8,
    pub platform_access: u8,
    pub variant: FormatVariant,
    pub crc_partial: u32,
    /// Present on the wide variants only.
    pub crc_full: Option<u32>,
    pub encryption: Encryption,
    pub file_eof: u64,
    pub next_page_bid: Bid,
    pub next_block_bid: Bid,
    pub unique: u32,
    pub amap_valid: u8,
    pub nbt_root: Bref,
    pub bbt_root: Bref,
}

impl Header {
    /// Read and validate the header from the start of `reader`.
    pub fn read<R: Read>(reader: R, options: &DecodeOptions) -> Result<Self> {
        let mut bytes = Vec::with_capacity(HEADER_SIZE_UNICODE);
        reader.take(HEADER_SIZE_UNICODE as u64).read_to_end(&mut bytes)?;
        Self::parse(&bytes, options)
    }

    pub fn parse(bytes: &[u8], options: &DecodeOptions) -> Result<Self> {
        let magic = match bytes.get(..4) {
            Some(m) => u32::from_le_bytes([m[0], m[1], m[2], m[3]]),
            None => return Err(PstError::NotPst(0)),
        };
        if magic != MAGIC {
            return Err(PstError::NotPst(magic));
        }

        // The version is only trusted once the partial CRC holds.
        let mut bag = FieldBag::read(bytes, COMMON, FormatVariant::Ansi)?;
        let crc_partial = bag.u32("dwCRCPartial")?;
        if options.check_crc {
            verify_crc(bytes, "header partial", crc_partial, CRC_PARTIAL_LEN)?;
        }

        let variant = FormatVariant::from_version(bag.u16("wVer")?)?;
        let tail = if variant.is_wide() { UNICODE_TAIL } else { ANSI_TAIL };
        let prefix = record_size(COMMON, variant);
        let rest = bytes.get(prefix..).unwrap_or_default();
        bag.read_more(rest, tail, variant)?;

        let crc_full = if variant.is_wide() {
            let stored = bag.u32("dwCRCFull")?;
            if options.check_crc {
                verify_crc(bytes, "header full", stored, CRC_FULL_LEN)?;
            }
            Some(stored)
        } else {
            None
        };

        let header = Header {
            magic,
            magic_client: bag.u16("wMagicClient")?,
            version: bag.u16("wVer")?,
            client_version: bag.u16("wVerClient")?,
            platform_create: bag.u8("bPlatformCreate")?,
            platform_access: bag.u8("bPlatformAccess")?,
            variant,
            crc_partial,
            crc_full,
            encryption: Encryption::from_method(bag.u8("bCryptMethod")?)?,
            file_eof: bag.ib("ibFileEOF")?.0,
            next_page_bid: bag.bid("bidNextP")?,
            next_block_bid: bag.bid("bidNextB")?,
            unique: bag.u32("dwUnique")?,
            amap_valid: bag.u8("fAMapValid")?,
            nbt_root: bag.bref("BREFNBT")?,
            bbt_root: bag.bref("BREFBBT")?,
        };
        debug!(
            variant = %header.variant,
            encryption = %header.encryption,
            nbt_root = %header.nbt_root,
            bbt_root = %header.bbt_root,
            "parsed header"
        );
        Ok(header)
    }

    pub fn is_ost(&self) -> bool {
        self.magic_client == MAGIC_CLIENT_OST
    }
}

fn verify_crc(bytes: &[u8], what: &'static str, stored: u32, len: usize) -> Result<()> {
    let calculated = crc::crc(bytes, CRC_START, len).ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "header truncated")
    })?;
    if calculated != stored {
        return Err(PstError::CrcMismatch { what, stored, calculated });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal Unicode header with valid CRCs and the given roots.
    fn unicode_header() -> Vec<u8> {
        let mut h = vec![0u8; HEADER_SIZE_UNICODE];
        h[0..4].copy_from_slice(&MAGIC.to_le_bytes());
        h[8..10].copy_from_slice(&MAGIC_CLIENT_PST.to_le_bytes());
        h[10..12].copy_from_slice(&23u16.to_le_bytes());
        h[12..14].copy_from_slice(&19u16.to_le_bytes());
        // BREFNBT at 216, BREFBBT at 232.
        h[216..224].copy_from_slice(&0x22u64.to_le_bytes());
        h[224..232].copy_from_slice(&0x4400u64.to_le_bytes());
        h[232..240].copy_from_slice(&0x24u64.to_le_bytes());
        h[240..248].copy_from_slice(&0x4600u64.to_le_bytes());
        h[CRYPT_METHOD_OFFSET_UNICODE] = 1;
        let partial = crc::crc(&h, CRC_START, CRC_PARTIAL_LEN).unwrap();
        h[4..8].copy_from_slice(&partial.to_le_bytes());
        let full = crc::crc(&h, CRC_START, CRC_FULL_LEN).unwrap();
        h[524..528].copy_from_slice(&full.to_le_bytes());
        h
    }

    #[test]
    fn parses_roots_and_encryption() {
        let header = Header::parse(&unicode_header(), &DecodeOptions::default()).unwrap();
        assert_eq!(header.variant, FormatVariant::Unicode);
        assert_eq!(header.encryption, Encryption::Permute);
        assert_eq!(header.nbt_root.bid.raw(), 0x22);
        assert_eq!(header.nbt_root.ib.0, 0x4400);
        assert_eq!(header.bbt_root.bid.raw(), 0x24);
        assert_eq!(header.bbt_root.ib.0, 0x4600);
        assert!(header.crc_full.is_some());
        assert!(!header.is_ost());
    }

    #[test]
    fn bad_magic_wins_over_bad_crc() {
        let mut h = unicode_header();
        h[0] = b'X';
        h[100] ^= 0xff;
        assert!(matches!(Header::parse(&h, &DecodeOptions::default()), Err(PstError::NotPst(_))));
    }

    #[test]
    fn partial_crc_checked_only_when_enabled() {
        let mut h = unicode_header();
        h[4] ^= 0x01;
        let err = Header::parse(&h, &DecodeOptions::default()).unwrap_err();
        assert!(matches!(err, PstError::CrcMismatch { what: "header partial", .. }));
        assert!(Header::parse(&h, &DecodeOptions::default().with_crc(false)).is_ok());
    }

    #[test]
    fn full_crc_covers_the_crypt_method() {
        let mut h = unicode_header();
        // Byte 500 is inside the full range but outside the partial one.
        h[500] ^= 0x10;
        let err = Header::parse(&h, &DecodeOptions::default()).unwrap_err();
        assert!(matches!(err, PstError::CrcMismatch { what: "header full", .. }));
    }

    #[test]
    fn unknown_version_rejected() {
        let mut h = unicode_header();
        h[10..12].copy_from_slice(&20u16.to_le_bytes());
        let err = Header::parse(&h, &DecodeOptions::default().with_crc(false)).unwrap_err();
        assert!(matches!(err, PstError::UnknownVersion(20)));
    }
}
