//! Declarative record reader.
//!
//! Fixed-layout records are described as a static slice of [`Field`]s and read
//! in one pass into a [`FieldBag`], keyed by field name.  Width-dependent kinds
//! (`Bid`, `Ib`, `Bref`) are sized by the [`FormatVariant`] given at read time,
//! so a single description can serve several layouts when only the key widths
//! differ.
//!
//! ```ignore
//! const TRAILER: &[Field] = &[
//!     field("cb", FieldKind::U16),
//!     field("wSig", FieldKind::U16),
//!     field("dwCRC", FieldKind::U32),
//!     field("bid", FieldKind::Bid),
//! ];
//! let bag = FieldBag::read(&bytes[..], TRAILER, variant)?;
//! let crc = bag.u32("dwCRC")?;
//! ```

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{self, Read};

use crate::error::{PstError, Result};
use crate::format::FormatVariant;
use crate::ids::{Bid, Bref, Ib, Nid};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    U8,
    U16,
    U32,
    U64,
    Bid,
    Ib,
    Bref,
    Nid,
    /// Kept as raw bytes.
    Bytes(usize),
    /// Consumed and discarded.
    Skip(usize),
}

impl FieldKind {
    pub fn size(self, variant: FormatVariant) -> usize {
        match self {
            FieldKind::U8 => 1,
            FieldKind::U16 => 2,
            FieldKind::U32 | FieldKind::Nid => 4,
            FieldKind::U64 => 8,
            FieldKind::Bid => variant.bid_size(),
            FieldKind::Ib => variant.ib_size(),
            FieldKind::Bref => variant.bref_size(),
            FieldKind::Bytes(n) | FieldKind::Skip(n) => n,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Field {
    pub name: &'static str,
    pub kind: FieldKind,
}

pub const fn field(name: &'static str, kind: FieldKind) -> Field {
    Field { name, kind }
}

/// Total byte length of a record description.
pub fn record_size(fields: &[Field], variant: FormatVariant) -> usize {
    fields.iter().map(|f| f.kind.size(variant)).sum()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    Bid(Bid),
    Ib(Ib),
    Bref(Bref),
    Nid(Nid),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone, Default)]
pub struct FieldBag {
    values: Vec<(&'static str, FieldValue)>,
}

impl FieldBag {
    pub fn read<R: Read>(reader: R, fields: &[Field], variant: FormatVariant) -> io::Result<Self> {
        let mut bag = FieldBag::default();
        bag.read_more(reader, fields, variant)?;
        Ok(bag)
    }

    /// Continue reading into an existing bag, e.g. a variant-specific tail
    /// after a common prefix.
    pub fn read_more<R: Read>(
        &mut self,
        mut reader: R,
        fields: &[Field],
        variant: FormatVariant,
    ) -> io::Result<()> {
        for f in fields {
            let value = match f.kind {
                FieldKind::U8 => FieldValue::U8(reader.read_u8()?),
                FieldKind::U16 => FieldValue::U16(reader.read_u16::<LittleEndian>()?),
                FieldKind::U32 => FieldValue::U32(reader.read_u32::<LittleEndian>()?),
                FieldKind::U64 => FieldValue::U64(reader.read_u64::<LittleEndian>()?),
                FieldKind::Bid => FieldValue::Bid(Bid::read(&mut reader, variant)?),
                FieldKind::Ib => FieldValue::Ib(Ib::read(&mut reader, variant)?),
                FieldKind::Bref => FieldValue::Bref(Bref::read(&mut reader, variant)?),
                FieldKind::Nid => FieldValue::Nid(Nid::read(&mut reader)?),
                FieldKind::Bytes(n) => {
                    let mut buf = vec![0u8; n];
                    reader.read_exact(&mut buf)?;
                    FieldValue::Bytes(buf)
                }
                FieldKind::Skip(n) => {
                    io::copy(&mut (&mut reader).take(n as u64), &mut io::sink())?;
                    continue;
                }
            };
            self.values.push((f.name, value));
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.values.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &FieldValue)> {
        self.values.iter().map(|(n, v)| (*n, v))
    }

    fn require(&self, name: &'static str) -> Result<&FieldValue> {
        self.get(name).ok_or(PstError::MissingField(name))
    }

    pub fn u8(&self, name: &'static str) -> Result<u8> {
        match self.require(name)? {
            FieldValue::U8(v) => Ok(*v),
            _ => Err(PstError::MissingField(name)),
        }
    }

    pub fn u16(&self, name: &'static str) -> Result<u16> {
        match self.require(name)? {
            FieldValue::U16(v) => Ok(*v),
            _ => Err(PstError::MissingField(name)),
        }
    }

    pub fn u32(&self, name: &'static str) -> Result<u32> {
        match self.require(name)? {
            FieldValue::U32(v) => Ok(*v),
            _ => Err(PstError::MissingField(name)),
        }
    }

    /// Any integer field, widened.
    pub fn uint(&self, name: &'static str) -> Result<u64> {
        match self.require(name)? {
            FieldValue::U8(v) => Ok(u64::from(*v)),
            FieldValue::U16(v) => Ok(u64::from(*v)),
            FieldValue::U32(v) => Ok(u64::from(*v)),
            FieldValue::U64(v) => Ok(*v),
            FieldValue::Ib(v) => Ok(v.0),
            _ => Err(PstError::MissingField(name)),
        }
    }

    pub fn bid(&self, name: &'static str) -> Result<Bid> {
        match self.require(name)? {
            FieldValue::Bid(v) => Ok(*v),
            _ => Err(PstError::MissingField(name)),
        }
    }

    pub fn ib(&self, name: &'static str) -> Result<Ib> {
        match self.require(name)? {
            FieldValue::Ib(v) => Ok(*v),
            _ => Err(PstError::MissingField(name)),
        }
    }

    pub fn bref(&self, name: &'static str) -> Result<Bref> {
        match self.require(name)? {
            FieldValue::Bref(v) => Ok(*v),
            _ => Err(PstError::MissingField(name)),
        }
    }

    pub fn nid(&self, name: &'static str) -> Result<Nid> {
        match self.require(name)? {
            FieldValue::Nid(v) => Ok(*v),
            _ => Err(PstError::MissingField(name)),
        }
    }

    pub fn bytes(&self, name: &'static str) -> Result<&[u8]> {
        match self.require(name)? {
            FieldValue::Bytes(v) => Ok(v),
            _ => Err(PstError::MissingField(name)),
        }
    }
}
