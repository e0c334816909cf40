use serde::{Deserialize, Serialize};

/// How the Block and Node indexes are held in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IndexMode {
    /// Read every page once at open time and keep the tree.
    #[default]
    Eager,
    /// Keep only the root reference and walk pages from disk on every lookup.
    OnDemand,
}

/// Decoder settings, passed explicitly to [`crate::PstFile::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeOptions {
    /// Verify header, page and block CRCs.  Turn off to salvage damaged files.
    pub check_crc: bool,
    /// Reject heaps with a bad block signature or an unrecognized client
    /// signature instead of tolerating them.
    pub strict_heap_nodes: bool,
    pub index_mode: IndexMode,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            check_crc: true,
            strict_heap_nodes: false,
            index_mode: IndexMode::Eager,
        }
    }
}

impl DecodeOptions {
    pub fn with_crc(mut self, check_crc: bool) -> Self {
        self.check_crc = check_crc;
        self
    }

    pub fn strict(mut self, strict_heap_nodes: bool) -> Self {
        self.strict_heap_nodes = strict_heap_nodes;
        self
    }

    pub fn with_index_mode(mut self, index_mode: IndexMode) -> Self {
        self.index_mode = index_mode;
        self
    }
}
