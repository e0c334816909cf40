//! Named-property map.
//!
//! Node 0x61 is a property bag carrying three binary streams.  Each 8-byte
//! entry maps a property set GUID plus either a numeric id (LID) or a string
//! name to a property id in the named range starting at 0x8000.

use byteorder::{LittleEndian, ReadBytesExt};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::{uuid, Uuid};

use crate::error::{PstError, Result};
use crate::ids::Nid;
use crate::ndb::NodeDatabase;
use crate::property::{PropertyBag, PropertyTag};

pub const TAG_GUID_STREAM: PropertyTag = PropertyTag::from_raw(0x0002_0102);
pub const TAG_ENTRY_STREAM: PropertyTag = PropertyTag::from_raw(0x0003_0102);
pub const TAG_STRING_STREAM: PropertyTag = PropertyTag::from_raw(0x0004_0102);

pub const PS_MAPI: Uuid = uuid!("00020328-0000-0000-c000-000000000046");
pub const PS_PUBLIC_STRINGS: Uuid = uuid!("00020329-0000-0000-c000-000000000046");

/// First id handed out to named properties.
pub const NAMED_ID_BASE: u16 = 0x8000;

const ENTRY_SIZE: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum PropertyName {
    Lid(u32),
    Name(String),
}

impl fmt::Display for PropertyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyName::Lid(lid) => write!(f, "lid {lid:#06x}"),
            PropertyName::Name(name) => write!(f, "{name:?}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamedProperty {
    pub id: u16,
    pub guid: Uuid,
    pub name: PropertyName,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct NamedPropertyMap {
    by_id: BTreeMap<u16, NamedProperty>,
}

impl NamedPropertyMap {
    pub fn read(ndb: &Arc<NodeDatabase>) -> Result<Self> {
        let bag = PropertyBag::read(ndb, Nid::NAME_TO_ID_MAP)?;
        let guids = stream(&bag, TAG_GUID_STREAM, "guid")?;
        let entries = stream(&bag, TAG_ENTRY_STREAM, "entry")?;
        let strings = stream(&bag, TAG_STRING_STREAM, "string")?;
        let map = Self::from_streams(&guids, &entries, &strings)?;
        debug!(named = map.len(), "read named-property map");
        Ok(map)
    }

    pub fn from_streams(guids: &[u8], entries: &[u8], strings: &[u8]) -> Result<Self> {
        if entries.len() % ENTRY_SIZE != 0 {
            warn!(len = entries.len(), "entry stream has a partial record");
        }
        let mut by_id = BTreeMap::new();
        for mut record in entries.chunks_exact(ENTRY_SIZE) {
            let value = record.read_u32::<LittleEndian>()?;
            let flags = record.read_u16::<LittleEndian>()?;
            let index = record.read_u16::<LittleEndian>()?;

            let guid = resolve_guid(guids, flags >> 1)?;
            let name = if flags & 1 != 0 {
                PropertyName::Name(read_name(strings, value as usize)?)
            } else {
                PropertyName::Lid(value)
            };
            let id = NAMED_ID_BASE + (index & 0x7fff);
            by_id.insert(id, NamedProperty { id, guid, name });
        }
        Ok(Self { by_id })
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn get(&self, id: u16) -> Option<&NamedProperty> {
        self.by_id.get(&id)
    }

    pub fn name(&self, id: u16) -> Option<&PropertyName> {
        self.get(id).map(|p| &p.name)
    }

    pub fn guid(&self, id: u16) -> Option<Uuid> {
        self.get(id).map(|p| p.guid)
    }

    pub fn id_for_lid(&self, guid: Uuid, lid: u32) -> Option<u16> {
        self.find(guid, |n| *n == PropertyName::Lid(lid))
    }

    pub fn id_for_name(&self, guid: Uuid, name: &str) -> Option<u16> {
        self.find(guid, |n| matches!(n, PropertyName::Name(s) if s == name))
    }

    fn find(&self, guid: Uuid, matches: impl Fn(&PropertyName) -> bool) -> Option<u16> {
        self.by_id.values().find(|p| p.guid == guid && matches(&p.name)).map(|p| p.id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &NamedProperty> {
        self.by_id.values()
    }
}

fn stream(bag: &PropertyBag, tag: PropertyTag, what: &'static str) -> Result<Vec<u8>> {
    let value = bag.get(tag).ok_or(PstError::NameIdStreamMissing(what))?.resolve()?;
    value
        .as_bytes()
        .map(<[u8]>::to_vec)
        .ok_or_else(|| PstError::corrupt(format!("{what} stream {tag} is not binary")))
}

fn resolve_guid(guids: &[u8], index: u16) -> Result<Uuid> {
    match index {
        1 => Ok(PS_MAPI),
        2 => Ok(PS_PUBLIC_STRINGS),
        i if i >= 3 => {
            let start = usize::from(i - 3) * 16;
            let bytes: [u8; 16] = guids
                .get(start..start + 16)
                .and_then(|b| b.try_into().ok())
                .ok_or_else(|| PstError::corrupt(format!("GUID index {i} past the GUID stream")))?;
            Ok(Uuid::from_bytes_le(bytes))
        }
        _ => Ok(Uuid::nil()),
    }
}

fn read_name(strings: &[u8], offset: usize) -> Result<String> {
    let out_of_bounds = || PstError::corrupt(format!("name at {offset} past the string stream"));
    let mut reader = strings.get(offset..).ok_or_else(out_of_bounds)?;
    let len = reader.read_u32::<LittleEndian>().map_err(|_| out_of_bounds())? as usize;
    let bytes = reader.get(..len).ok_or_else(out_of_bounds)?;
    let units = bytes.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]]));
    Ok(char::decode_utf16(units).map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER)).collect())
}
