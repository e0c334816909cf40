use byteorder::{LittleEndian, ReadBytesExt};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{PstError, Result};
use crate::ndb::NodeDatabase;
use crate::subnode::SubnodeEntry;

use super::{stored_type, PropertyTag, PropertyType};

/// 100ns intervals between 1601-01-01 and the Unix epoch.
const FILETIME_UNIX_OFFSET: i64 = 116_444_736_000_000_000;

/// `PtypServerId`: a folder/message pair when the id belongs to this store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ServerId {
    Ours { folder_id: u64, message_id: u64, instance: u32 },
    Foreign(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum PropertyValue {
    Null,
    I16(i16),
    I32(i32),
    F32(f32),
    F64(f64),
    /// Fixed point, scaled by 10,000.
    Currency(i64),
    /// OLE automation date.
    FloatingTime(f64),
    Error(u32),
    Boolean(bool),
    I64(i64),
    String8(String),
    String(String),
    Time(DateTime<Utc>),
    Guid(Uuid),
    ServerId(ServerId),
    Object(Vec<u8>),
    Binary(Vec<u8>),
    MultipleI16(Vec<i16>),
    MultipleI32(Vec<i32>),
    MultipleF32(Vec<f32>),
    MultipleF64(Vec<f64>),
    MultipleCurrency(Vec<i64>),
    MultipleFloatingTime(Vec<f64>),
    MultipleI64(Vec<i64>),
    MultipleString8(Vec<String>),
    MultipleString(Vec<String>),
    MultipleTime(Vec<DateTime<Utc>>),
    MultipleGuid(Vec<Uuid>),
    MultipleBinary(Vec<Vec<u8>>),
    /// Stored in a subnode; read on demand.
    Deferred(Resolver),
    /// A recognised type with no decoder.
    Unimplemented { ptype: u16, raw: Vec<u8> },
    /// A type code outside the registry.
    Unknown { ptype: u16, raw: Vec<u8> },
}

impl PropertyValue {
    pub fn is_deferred(&self) -> bool {
        matches!(self, PropertyValue::Deferred(_))
    }

    /// Read a deferred value; any other value is returned as is.
    pub fn resolve(&self) -> Result<PropertyValue> {
        match self {
            PropertyValue::Deferred(resolver) => resolver.resolve(),
            other => Ok(other.clone()),
        }
    }

    /// Turn the two forward-compatibility variants into their errors.
    pub fn known(&self) -> Result<&PropertyValue> {
        match self {
            PropertyValue::Unimplemented { ptype, .. } => Err(PstError::UnimplementedPropertyType(*ptype)),
            PropertyValue::Unknown { ptype, .. } => Err(PstError::UnknownPropertyType(*ptype)),
            other => Ok(other),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) | PropertyValue::String8(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            PropertyValue::I32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            PropertyValue::Binary(b) | PropertyValue::Object(b) => Some(b),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
            let parts: Vec<String> = items.iter().map(ToString::to_string).collect();
            write!(f, "[{}]", parts.join(", "))
        }
        match self {
            PropertyValue::Null => f.write_str("null"),
            PropertyValue::I16(v) => write!(f, "{v}"),
            PropertyValue::I32(v) => write!(f, "{v}"),
            PropertyValue::F32(v) => write!(f, "{v}"),
            PropertyValue::F64(v) | PropertyValue::FloatingTime(v) => write!(f, "{v}"),
            PropertyValue::Currency(v) => {
                let sign = if *v < 0 { "-" } else { "" };
                let units = v.unsigned_abs();
                write!(f, "{sign}{}.{:04}", units / 10_000, units % 10_000)
            }
            PropertyValue::Error(v) => write!(f, "error {v:#010x}"),
            PropertyValue::Boolean(v) => write!(f, "{v}"),
            PropertyValue::I64(v) => write!(f, "{v}"),
            PropertyValue::String8(s) | PropertyValue::String(s) => write!(f, "{s:?}"),
            PropertyValue::Time(t) => write!(f, "{}", t.to_rfc3339()),
            PropertyValue::Guid(g) => write!(f, "{{{g}}}"),
            PropertyValue::ServerId(ServerId::Ours { folder_id, message_id, instance }) => {
                write!(f, "folder {folder_id:#x} message {message_id:#x} instance {instance}")
            }
            PropertyValue::ServerId(ServerId::Foreign(b)) => write!(f, "foreign {}", hex::encode(b)),
            PropertyValue::Object(b) | PropertyValue::Binary(b) => f.write_str(&hex::encode(b)),
            PropertyValue::MultipleI16(v) => list(f, v),
            PropertyValue::MultipleI32(v) => list(f, v),
            PropertyValue::MultipleF32(v) => list(f, v),
            PropertyValue::MultipleF64(v) | PropertyValue::MultipleFloatingTime(v) => list(f, v),
            PropertyValue::MultipleCurrency(v) | PropertyValue::MultipleI64(v) => list(f, v),
            PropertyValue::MultipleString8(v) | PropertyValue::MultipleString(v) => {
                let quoted: Vec<String> = v.iter().map(|s| format!("{s:?}")).collect();
                list(f, &quoted)
            }
            PropertyValue::MultipleTime(v) => {
                let times: Vec<String> = v.iter().map(|t| t.to_rfc3339()).collect();
                list(f, &times)
            }
            PropertyValue::MultipleGuid(v) => list(f, v),
            PropertyValue::MultipleBinary(v) => {
                let blobs: Vec<String> = v.iter().map(hex::encode).collect();
                list(f, &blobs)
            }
            PropertyValue::Deferred(r) => write!(f, "<subnode {}>", r.location().nid),
            PropertyValue::Unimplemented { ptype, raw } => write!(f, "<unimplemented {ptype:#06x}> {}", hex::encode(raw)),
            PropertyValue::Unknown { ptype, raw } => write!(f, "<unknown {ptype:#06x}> {}", hex::encode(raw)),
        }
    }
}

/// Location of a value kept in the owning node's subnode tree.
#[derive(Clone, Serialize)]
pub struct Resolver {
    #[serde(skip)]
    ndb: Arc<NodeDatabase>,
    tag: PropertyTag,
    location: SubnodeEntry,
}

impl Resolver {
    pub(crate) fn new(ndb: Arc<NodeDatabase>, tag: PropertyTag, location: SubnodeEntry) -> Self {
        Self { ndb, tag, location }
    }

    pub fn tag(&self) -> PropertyTag {
        self.tag
    }

    pub fn location(&self) -> &SubnodeEntry {
        &self.location
    }

    /// The stored bytes, data trees assembled.
    pub fn read_raw(&self) -> Result<Vec<u8>> {
        if self.location.data.is_null() {
            return Err(PstError::NullDataBlock(self.location.nid));
        }
        self.ndb.read_data(self.location.data)
    }

    pub fn resolve(&self) -> Result<PropertyValue> {
        let raw = self.read_raw()?;
        decode_value(stored_type(self.tag, &raw), &raw)
    }
}

impl PartialEq for Resolver {
    fn eq(&self, other: &Self) -> bool {
        self.tag == other.tag && self.location == other.location
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("tag", &self.tag)
            .field("location", &self.location)
            .finish()
    }
}

fn filetime(ticks: i64) -> Result<DateTime<Utc>> {
    let out_of_range = || PstError::corrupt(format!("FILETIME {ticks} out of range"));
    let unix = ticks.checked_sub(FILETIME_UNIX_OFFSET).ok_or_else(out_of_range)?;
    let secs = unix.div_euclid(10_000_000);
    let nanos = (unix.rem_euclid(10_000_000) * 100) as u32;
    DateTime::<Utc>::from_timestamp(secs, nanos).ok_or_else(out_of_range)
}

fn string8(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect::<String>().trim_end_matches('\0').to_string()
}

fn utf16(bytes: &[u8]) -> String {
    let units = bytes.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]]));
    char::decode_utf16(units)
        .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect::<String>()
        .trim_end_matches('\0')
        .to_string()
}

fn guid(bytes: &[u8]) -> Result<Uuid> {
    let raw: [u8; 16] = bytes
        .get(..16)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| PstError::corrupt("GUID shorter than 16 bytes"))?;
    Ok(Uuid::from_bytes_le(raw))
}

/// Split a variable-size multi-value: count, count offsets, then data.
fn variable_items(bytes: &[u8]) -> Result<Vec<&[u8]>> {
    let mut reader = bytes;
    let count = match reader.read_u32::<LittleEndian>() {
        Ok(c) => c as usize,
        Err(_) => return Ok(vec![bytes]),
    };
    let table_end = count.checked_mul(4).and_then(|n| n.checked_add(4));
    if table_end.map_or(true, |end| end > bytes.len()) {
        return Ok(vec![bytes]);
    }
    let mut offsets = (0..count)
        .map(|_| reader.read_u32::<LittleEndian>().map(|o| o as usize))
        .collect::<std::io::Result<Vec<_>>>()?;
    offsets.push(bytes.len());
    offsets
        .windows(2)
        .map(|w| {
            bytes
                .get(w[0]..w[1])
                .ok_or_else(|| PstError::corrupt(format!("multi-value item {}..{} out of bounds", w[0], w[1])))
        })
        .collect()
}

fn fixed<T>(bytes: &[u8], size: usize, read: impl Fn(&[u8]) -> Result<T>) -> Result<Vec<T>> {
    bytes.chunks_exact(size).map(read).collect()
}

/// Decode `bytes` as a value of type `ptype`.
pub fn decode_value(ptype: PropertyType, bytes: &[u8]) -> Result<PropertyValue> {
    use PropertyType as T;
    use PropertyValue as V;

    let mut r = bytes;
    Ok(match ptype {
        T::Unspecified | T::Null => V::Null,
        T::I16 => V::I16(r.read_i16::<LittleEndian>()?),
        T::I32 => V::I32(r.read_i32::<LittleEndian>()?),
        T::F32 => V::F32(r.read_f32::<LittleEndian>()?),
        T::F64 => V::F64(r.read_f64::<LittleEndian>()?),
        T::Currency => V::Currency(r.read_i64::<LittleEndian>()?),
        T::FloatingTime => V::FloatingTime(r.read_f64::<LittleEndian>()?),
        T::Error => V::Error(r.read_u32::<LittleEndian>()?),
        T::Boolean => V::Boolean(r.read_u8()? != 0),
        T::I64 => V::I64(r.read_i64::<LittleEndian>()?),
        T::Time => V::Time(filetime(r.read_i64::<LittleEndian>()?)?),
        T::String8 => V::String8(string8(bytes)),
        T::String => V::String(utf16(bytes)),
        T::Guid => V::Guid(guid(bytes)?),
        T::Object => V::Object(bytes.to_vec()),
        T::Binary => V::Binary(bytes.to_vec()),
        T::ServerId => {
            let _count = r.read_u16::<LittleEndian>()?;
            if r.read_u8()? == 1 {
                V::ServerId(ServerId::Ours {
                    folder_id: r.read_u64::<LittleEndian>()?,
                    message_id: r.read_u64::<LittleEndian>()?,
                    instance: r.read_u32::<LittleEndian>()?,
                })
            } else {
                V::ServerId(ServerId::Foreign(r.to_vec()))
            }
        }
        T::MultipleI16 => V::MultipleI16(fixed(bytes, 2, |mut c| Ok(c.read_i16::<LittleEndian>()?))?),
        T::MultipleI32 => V::MultipleI32(fixed(bytes, 4, |mut c| Ok(c.read_i32::<LittleEndian>()?))?),
        T::MultipleF32 => V::MultipleF32(fixed(bytes, 4, |mut c| Ok(c.read_f32::<LittleEndian>()?))?),
        T::MultipleF64 => V::MultipleF64(fixed(bytes, 8, |mut c| Ok(c.read_f64::<LittleEndian>()?))?),
        T::MultipleCurrency => V::MultipleCurrency(fixed(bytes, 8, |mut c| Ok(c.read_i64::<LittleEndian>()?))?),
        T::MultipleFloatingTime => {
            V::MultipleFloatingTime(fixed(bytes, 8, |mut c| Ok(c.read_f64::<LittleEndian>()?))?)
        }
        T::MultipleI64 => V::MultipleI64(fixed(bytes, 8, |mut c| Ok(c.read_i64::<LittleEndian>()?))?),
        T::MultipleTime => V::MultipleTime(fixed(bytes, 8, |mut c| filetime(c.read_i64::<LittleEndian>()?))?),
        T::MultipleGuid => V::MultipleGuid(fixed(bytes, 16, guid)?),
        T::MultipleString8 => V::MultipleString8(variable_items(bytes)?.into_iter().map(string8).collect()),
        T::MultipleString => V::MultipleString(variable_items(bytes)?.into_iter().map(utf16).collect()),
        T::MultipleBinary => {
            V::MultipleBinary(variable_items(bytes)?.into_iter().map(<[u8]>::to_vec).collect())
        }
        T::Restriction | T::RuleAction => V::Unimplemented { ptype: ptype.code(), raw: bytes.to_vec() },
        T::Unknown(code) => V::Unknown { ptype: code, raw: bytes.to_vec() },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utf16le(s: &str) -> Vec<u8> {
        s.encode_utf16().flat_map(u16::to_le_bytes).collect()
    }

    #[test]
    fn scalars() {
        assert_eq!(decode_value(PropertyType::I32, &(-5i32).to_le_bytes()).unwrap(), PropertyValue::I32(-5));
        assert_eq!(decode_value(PropertyType::I16, &[0x34, 0x12, 0xff, 0xff]).unwrap(), PropertyValue::I16(0x1234));
        assert_eq!(decode_value(PropertyType::Boolean, &[1, 0, 0, 0]).unwrap(), PropertyValue::Boolean(true));
        assert_eq!(
            decode_value(PropertyType::Currency, &123_4500i64.to_le_bytes()).unwrap().to_string(),
            "123.4500"
        );
        assert!(matches!(decode_value(PropertyType::I64, &[0; 4]), Err(PstError::Io(_))));
    }

    #[test]
    fn filetime_to_utc() {
        // 2009-02-13T23:31:30Z is Unix time 1234567890.
        let ticks = 1_234_567_890i64 * 10_000_000 + FILETIME_UNIX_OFFSET;
        match decode_value(PropertyType::Time, &ticks.to_le_bytes()).unwrap() {
            PropertyValue::Time(t) => assert_eq!(t.timestamp(), 1_234_567_890),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn strings_trim_trailing_nuls() {
        let mut wide = utf16le("Inbox");
        wide.extend_from_slice(&[0, 0]);
        assert_eq!(decode_value(PropertyType::String, &wide).unwrap(), PropertyValue::String("Inbox".into()));
        assert_eq!(
            decode_value(PropertyType::String8, b"caf\xe9\0").unwrap(),
            PropertyValue::String8("caf\u{e9}".into())
        );
    }

    #[test]
    fn guid_is_little_endian() {
        let bytes = [
            0x28, 0x03, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0xc0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x46,
        ];
        let value = decode_value(PropertyType::Guid, &bytes).unwrap();
        assert_eq!(value.to_string(), "{00020328-0000-0000-c000-000000000046}");
    }

    #[test]
    fn multi_valued_strings() {
        let a = utf16le("one");
        let b = utf16le("two");
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&2u32.to_le_bytes());
        bytes.extend_from_slice(&12u32.to_le_bytes());
        bytes.extend_from_slice(&(12 + a.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&a);
        bytes.extend_from_slice(&b);
        assert_eq!(
            decode_value(PropertyType::MultipleString, &bytes).unwrap(),
            PropertyValue::MultipleString(vec!["one".into(), "two".into()])
        );

        // Too short for the count/offset layout: the whole buffer is one item.
        assert_eq!(
            decode_value(PropertyType::MultipleBinary, &[9, 9]).unwrap(),
            PropertyValue::MultipleBinary(vec![vec![9, 9]])
        );
    }

    #[test]
    fn multi_valued_fixed() {
        let bytes: Vec<u8> = [7i32, -1, 42].iter().flat_map(|v| v.to_le_bytes()).collect();
        assert_eq!(
            decode_value(PropertyType::MultipleI32, &bytes).unwrap(),
            PropertyValue::MultipleI32(vec![7, -1, 42])
        );
    }

    #[test]
    fn server_id() {
        let mut bytes = vec![1, 0, 1];
        bytes.extend_from_slice(&0x1122u64.to_le_bytes());
        bytes.extend_from_slice(&0x3344u64.to_le_bytes());
        bytes.extend_from_slice(&7u32.to_le_bytes());
        assert_eq!(
            decode_value(PropertyType::ServerId, &bytes).unwrap(),
            PropertyValue::ServerId(ServerId::Ours { folder_id: 0x1122, message_id: 0x3344, instance: 7 })
        );
        assert_eq!(
            decode_value(PropertyType::ServerId, &[1, 0, 0, 0xab]).unwrap(),
            PropertyValue::ServerId(ServerId::Foreign(vec![0xab]))
        );
    }

    #[test]
    fn unimplemented_and_unknown_stay_distinct() {
        let restriction = decode_value(PropertyType::Restriction, &[1, 2]).unwrap();
        assert!(matches!(restriction.known(), Err(PstError::UnimplementedPropertyType(0x00fd))));
        let unknown = decode_value(PropertyType::Unknown(0x0077), &[3]).unwrap();
        assert!(matches!(unknown.known(), Err(PstError::UnknownPropertyType(0x0077))));
        assert!(PropertyValue::I32(1).known().is_ok());
    }
}
