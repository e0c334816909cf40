//! Block store: pages and blocks straight off the byte source.
//!
//! # Simple blocks
//!
//! A block is `cb` payload bytes, zero padding, then a trailer, the whole
//! rounded up to the variant's block alignment:
//!
//! ```text
//! ┌──────────── cb ────────────┬─ pad ─┬──── trailer ────┐
//! │ payload (encrypted,        │       │ cb wSig CRC bid │  (wide order)
//! │ possibly deflated)         │       │ cb wSig bid CRC │  (ANSI order)
//! └────────────────────────────┴───────┴─────────────────┘
//! ```
//!
//! The CRC covers the payload as stored, before decryption.  Blocks with an
//! internal BID (data trees, subnode trees) are never encrypted.
//!
//! # Pages
//!
//! Paged B-tree pages have a fixed size and their own trailer carrying the
//! page type, which is checked against the tree being walked.

use byteorder::{LittleEndian, ReadBytesExt};
use flate2::read::{DeflateDecoder, ZlibDecoder};
use std::io::Read;
use tracing::{debug, warn};

use crate::btree::BbtEntry;
use crate::crc::crc_of;
use crate::crypto::Encryption;
use crate::error::{PstError, Result};
use crate::fields::{field, Field, FieldBag, FieldKind as K};
use crate::format::FormatVariant;
use crate::ids::{Bid, Bref};
use crate::options::DecodeOptions;
use crate::source::ReadAt;

/// `btype` of XBLOCK and XXBLOCK.
pub const BLOCK_TYPE_DATA_TREE: u8 = 0x01;
/// `btype` of SLBLOCK and SIBLOCK.
pub const BLOCK_TYPE_SUBNODE: u8 = 0x02;

// ── Trailers ─────────────────────────────────────────────────────────────────

const BLOCK_TRAILER_ANSI: &[Field] = &[
    field("cb", K::U16),
    field("wSig", K::U16),
    field("bid", K::Bid),
    field("dwCRC", K::U32),
];

const BLOCK_TRAILER_UNICODE: &[Field] = &[
    field("cb", K::U16),
    field("wSig", K::U16),
    field("dwCRC", K::U32),
    field("bid", K::Bid),
];

const BLOCK_TRAILER_4K: &[Field] = &[
    field("cb", K::U16),
    field("wSig", K::U16),
    field("dwCRC", K::U32),
    field("bid", K::Bid),
    field("unused", K::Skip(8)),
];

const PAGE_TRAILER_ANSI: &[Field] = &[
    field("ptype", K::U8),
    field("ptypeRepeat", K::U8),
    field("wSig", K::U16),
    field("bid", K::Bid),
    field("dwCRC", K::U32),
];

const PAGE_TRAILER_WIDE: &[Field] = &[
    field("ptype", K::U8),
    field("ptypeRepeat", K::U8),
    field("wSig", K::U16),
    field("dwCRC", K::U32),
    field("bid", K::Bid),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockTrailer {
    pub cb: u16,
    pub signature: u16,
    pub crc: u32,
    pub bid: Bid,
}

impl BlockTrailer {
    pub fn layout(variant: FormatVariant) -> &'static [Field] {
        match variant {
            FormatVariant::Ansi => BLOCK_TRAILER_ANSI,
            FormatVariant::Unicode => BLOCK_TRAILER_UNICODE,
            FormatVariant::Unicode4k => BLOCK_TRAILER_4K,
        }
    }

    pub fn read(bytes: &[u8], variant: FormatVariant) -> Result<Self> {
        let bag = FieldBag::read(bytes, Self::layout(variant), variant)?;
        Ok(Self {
            cb: bag.u16("cb")?,
            signature: bag.u16("wSig")?,
            crc: bag.u32("dwCRC")?,
            bid: bag.bid("bid")?,
        })
    }
}

/// Which paged B-tree a page belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    BlockIndex,
    NodeIndex,
}

impl PageType {
    pub fn code(self) -> u8 {
        match self {
            PageType::BlockIndex => 0x80,
            PageType::NodeIndex => 0x81,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageTrailer {
    pub ptype: u8,
    pub ptype_repeat: u8,
    pub signature: u16,
    pub crc: u32,
    pub bid: Bid,
}

impl PageTrailer {
    pub fn layout(variant: FormatVariant) -> &'static [Field] {
        if variant.is_wide() { PAGE_TRAILER_WIDE } else { PAGE_TRAILER_ANSI }
    }

    pub fn read(bytes: &[u8], variant: FormatVariant) -> Result<Self> {
        let bag = FieldBag::read(bytes, Self::layout(variant), variant)?;
        Ok(Self {
            ptype: bag.u8("ptype")?,
            ptype_repeat: bag.u8("ptypeRepeat")?,
            signature: bag.u16("wSig")?,
            crc: bag.u32("dwCRC")?,
            bid: bag.bid("bid")?,
        })
    }
}

/// The 16-bit signature stored in block and page trailers.
pub fn block_signature(ib: u64, bid: u64) -> u16 {
    let folded = (ib ^ bid) as u32;
    ((folded >> 16) ^ (folded & 0xffff)) as u16
}

// ── Data tree header ─────────────────────────────────────────────────────────

/// Header of an XBLOCK (level 1) or XXBLOCK (level 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataTreeHeader {
    pub level: u8,
    pub count: u16,
    /// Byte count of all leaf data beneath this block.
    pub total: u32,
}

/// Parse an XBLOCK/XXBLOCK body into its header and child ids.
pub fn parse_data_tree(bid: Bid, data: &[u8], variant: FormatVariant) -> Result<(DataTreeHeader, Vec<Bid>)> {
    let mut reader = data;
    let btype = reader.read_u8()?;
    if btype != BLOCK_TYPE_DATA_TREE {
        return Err(PstError::BadXBlockType { bid, btype });
    }
    let level = reader.read_u8()?;
    if level != 1 && level != 2 {
        return Err(PstError::BadXBlockLevel { bid, level });
    }
    let count = reader.read_u16::<LittleEndian>()?;
    let total = reader.read_u32::<LittleEndian>()?;
    let children = (0..count)
        .map(|_| Bid::read(&mut reader, variant))
        .collect::<std::io::Result<Vec<_>>>()?;
    Ok((DataTreeHeader { level, count, total }, children))
}

// ── Store ────────────────────────────────────────────────────────────────────

/// Reads, verifies, decrypts and inflates pages and blocks.
pub struct BlockStore {
    source: Box<dyn ReadAt>,
    variant: FormatVariant,
    encryption: Encryption,
    options: DecodeOptions,
}

impl BlockStore {
    pub fn new(
        source: Box<dyn ReadAt>,
        variant: FormatVariant,
        encryption: Encryption,
        options: DecodeOptions,
    ) -> Self {
        Self { source, variant, encryption, options }
    }

    pub fn variant(&self) -> FormatVariant {
        self.variant
    }

    pub fn encryption(&self) -> Encryption {
        self.encryption
    }

    pub fn options(&self) -> &DecodeOptions {
        &self.options
    }

    pub fn source(&self) -> &dyn ReadAt {
        self.source.as_ref()
    }

    /// Read one paged B-tree page and validate its trailer.
    pub fn read_page(&self, bref: Bref, expected: PageType) -> Result<Vec<u8>> {
        let v = self.variant;
        let page = self.source.read_vec(bref.ib.0, v.page_size())?;
        let trailer_at = v.page_size() - v.page_trailer_size();
        let trailer = PageTrailer::read(&page[trailer_at..], v)?;

        if trailer.ptype != expected.code() || trailer.ptype_repeat != expected.code() {
            return Err(PstError::corrupt(format!(
                "page {bref} has type {:#04x}/{:#04x}, expected {:#04x}",
                trailer.ptype,
                trailer.ptype_repeat,
                expected.code()
            )));
        }
        if self.options.check_crc {
            let calculated = crc_of(&page[..trailer_at]);
            if calculated != trailer.crc {
                return Err(PstError::CrcMismatch { what: "page", stored: trailer.crc, calculated });
            }
        }
        if trailer.bid != bref.bid {
            warn!(expected = %bref.bid, found = %trailer.bid, "page trailer names a different bid");
        }
        Ok(page)
    }

    /// Read the payload of one simple block.
    pub fn read_block(&self, entry: &BbtEntry) -> Result<Vec<u8>> {
        let v = self.variant;
        let bid = entry.bref.bid;
        let cb = usize::from(entry.size);
        let size = v.block_size(cb);
        let mut raw = self.source.read_vec(entry.bref.ib.0, size)?;

        let trailer = BlockTrailer::read(&raw[size - v.block_trailer_size()..], v)?;
        if self.options.check_crc {
            let calculated = crc_of(&raw[..cb]);
            if calculated != trailer.crc {
                return Err(PstError::CrcMismatch { what: "block", stored: trailer.crc, calculated });
            }
        }
        if trailer.bid.key() != bid.key() {
            warn!(expected = %bid, found = %trailer.bid, "block trailer names a different bid");
        }
        if usize::from(trailer.cb) != cb {
            warn!(%bid, index = cb, trailer = trailer.cb, "block size disagrees with its trailer");
        }
        let expected_sig = block_signature(entry.bref.ib.0, bid.raw());
        if trailer.signature != expected_sig {
            debug!(%bid, stored = trailer.signature, expected = expected_sig, "block signature mismatch");
        }

        raw.truncate(cb);
        if !bid.is_internal() {
            self.encryption.decrypt(&mut raw, bid.crypt_key());
        }
        let inflated = usize::from(entry.inflated_size);
        if inflated != cb {
            raw = inflate(bid, &raw, inflated)?;
        }
        Ok(raw)
    }
}

fn has_zlib_header(data: &[u8]) -> bool {
    match data {
        [cmf, flg, ..] => cmf & 0x0f == 8 && (u16::from(*cmf) << 8 | u16::from(*flg)) % 31 == 0,
        _ => false,
    }
}

fn inflate(bid: Bid, data: &[u8], expected: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(expected);
    let result = if has_zlib_header(data) {
        ZlibDecoder::new(data).read_to_end(&mut out)
    } else {
        DeflateDecoder::new(data).read_to_end(&mut out)
    };
    result.map_err(|e| PstError::Decompression { bid, detail: e.to_string() })?;
    if out.len() != expected {
        return Err(PstError::Decompression {
            bid,
            detail: format!("inflated to {} bytes, expected {expected}", out.len()),
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::Ib;
    use crate::source::SeekSource;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::{Cursor, Write};

    /// Lay out one block at offset 0 the way a writer would.
    fn block_image(variant: FormatVariant, bid: Bid, payload: &[u8], crypt: Encryption) -> Vec<u8> {
        let mut stored = payload.to_vec();
        if !bid.is_internal() {
            crypt.encrypt(&mut stored, bid.crypt_key());
        }
        let size = variant.block_size(stored.len());
        let mut image = stored.clone();
        image.resize(size - variant.block_trailer_size(), 0);
        let crc = crc_of(&stored);
        let sig = block_signature(0, bid.raw());
        image.extend_from_slice(&(stored.len() as u16).to_le_bytes());
        image.extend_from_slice(&sig.to_le_bytes());
        match variant {
            FormatVariant::Ansi => {
                image.extend_from_slice(&(bid.raw() as u32).to_le_bytes());
                image.extend_from_slice(&crc.to_le_bytes());
            }
            _ => {
                image.extend_from_slice(&crc.to_le_bytes());
                image.extend_from_slice(&bid.raw().to_le_bytes());
            }
        }
        image.resize(size, 0);
        image
    }

    fn store(image: Vec<u8>, variant: FormatVariant, crypt: Encryption, check_crc: bool) -> BlockStore {
        BlockStore::new(
            Box::new(SeekSource::new(Cursor::new(image))),
            variant,
            crypt,
            DecodeOptions::default().with_crc(check_crc),
        )
    }

    fn entry(bid: Bid, size: usize, inflated: usize) -> BbtEntry {
        BbtEntry {
            bref: Bref { bid, ib: Ib(0) },
            size: size as u16,
            inflated_size: inflated as u16,
            ref_count: 1,
        }
    }

    #[test]
    fn decrypts_with_low_bid_bits() {
        let payload = b"the quick brown fox".to_vec();
        for variant in [FormatVariant::Ansi, FormatVariant::Unicode] {
            for crypt in [Encryption::None, Encryption::Permute, Encryption::Cyclic] {
                let bid = Bid::from_raw(0x1_0000_0014 & if variant.is_wide() { u64::MAX } else { 0xffff_ffff });
                let image = block_image(variant, bid, &payload, crypt);
                let s = store(image, variant, crypt, true);
                let out = s.read_block(&entry(bid, payload.len(), payload.len())).unwrap();
                assert_eq!(out, payload, "{variant} {crypt}");
            }
        }
    }

    #[test]
    fn internal_blocks_are_not_decrypted() {
        let payload = vec![0x01, 0x01, 0x00, 0x00, 0, 0, 0, 0];
        let bid = Bid::from_raw(0x26);
        let image = block_image(FormatVariant::Unicode, bid, &payload, Encryption::Permute);
        let s = store(image, FormatVariant::Unicode, Encryption::Permute, true);
        assert_eq!(s.read_block(&entry(bid, payload.len(), payload.len())).unwrap(), payload);
    }

    #[test]
    fn crc_mismatch_respects_option() {
        let payload = b"payload".to_vec();
        let bid = Bid::from_raw(0x8);
        let mut image = block_image(FormatVariant::Unicode, bid, &payload, Encryption::None);
        image[0] ^= 0xff;
        let strict = store(image.clone(), FormatVariant::Unicode, Encryption::None, true);
        let err = strict.read_block(&entry(bid, payload.len(), payload.len())).unwrap_err();
        assert!(matches!(err, PstError::CrcMismatch { what: "block", .. }));

        let lenient = store(image, FormatVariant::Unicode, Encryption::None, false);
        let out = lenient.read_block(&entry(bid, payload.len(), payload.len())).unwrap();
        assert_eq!(out[0], payload[0] ^ 0xff);
    }

    #[test]
    fn compressed_blocks_inflate() {
        let payload: Vec<u8> = b"abcabcabc".iter().cycle().take(900).copied().collect();
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(&payload).unwrap();
        let packed = enc.finish().unwrap();
        let bid = Bid::from_raw(0x40);
        let image = block_image(FormatVariant::Unicode4k, bid, &packed, Encryption::None);
        let s = store(image, FormatVariant::Unicode4k, Encryption::None, true);
        let out = s.read_block(&entry(bid, packed.len(), payload.len())).unwrap();
        assert_eq!(out, payload);
    }

    #[test]
    fn garbage_marked_compressed_is_a_decompression_error() {
        let bid = Bid::from_raw(0x40);
        let junk = vec![0xffu8; 32];
        let image = block_image(FormatVariant::Unicode4k, bid, &junk, Encryption::None);
        let s = store(image, FormatVariant::Unicode4k, Encryption::None, true);
        let err = s.read_block(&entry(bid, junk.len(), 100)).unwrap_err();
        assert!(matches!(err, PstError::Decompression { .. }));
    }

    #[test]
    fn data_tree_levels() {
        let mut body = vec![BLOCK_TYPE_DATA_TREE, 1, 2, 0, 10, 0, 0, 0];
        body.extend_from_slice(&8u64.to_le_bytes());
        body.extend_from_slice(&12u64.to_le_bytes());
        let (hdr, kids) = parse_data_tree(Bid::from_raw(6), &body, FormatVariant::Unicode).unwrap();
        assert_eq!(hdr.level, 1);
        assert_eq!(hdr.total, 10);
        assert_eq!(kids, vec![Bid::from_raw(8), Bid::from_raw(12)]);

        body[1] = 3;
        assert!(matches!(
            parse_data_tree(Bid::from_raw(6), &body, FormatVariant::Unicode),
            Err(PstError::BadXBlockLevel { level: 3, .. })
        ));
        body[0] = 0x02;
        assert!(matches!(
            parse_data_tree(Bid::from_raw(6), &body, FormatVariant::Unicode),
            Err(PstError::BadXBlockType { btype: 0x02, .. })
        ));
    }

    #[test]
    fn signature_folds_offset_and_bid() {
        assert_eq!(block_signature(0, 0), 0);
        assert_eq!(block_signature(0x0001_0000, 0x0000_0001), 0x0000 ^ 0x0001 ^ 0x0001);
    }
}
