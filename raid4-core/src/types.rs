// vim: tw=80
//! Shared data-model types: Object, Copy, Extent, Layout, Medium, Split.
//!
//! These are deliberately thin.  The DSS (the external catalog) owns the
//! durable copies of these structures; the layout engine only ever borrows
//! them for the duration of one transfer.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// `NAME_MAX` on every POSIX filesystem this engine targets.
pub const NAME_MAX: usize = 255;

/// Maximum length of an extent tag (`spec.md` §6: "extent tag <= 8").
pub const EXTENT_TAG_MAX: usize = 8;

/// A medium identity: `(family, name, library)`.  Extents reference media by
/// value, never by pointer (`spec.md` §9: "no cyclic ownership").
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct PhoId {
    pub family: String,
    pub name: String,
    pub library: String,
}

impl PhoId {
    pub fn new(family: impl Into<String>, name: impl Into<String>,
        library: impl Into<String>) -> Self
    {
        PhoId { family: family.into(), name: name.into(), library: library.into() }
    }
}

/// Lifecycle status of a `Copy`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum CopyStatus {
    Incomplete,
    Readable,
    Complete,
}

/// Lifecycle status of an `Extent`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ExtentState {
    Pending,
    Sync,
    Orphan,
}

/// Which layout algorithm a `Layout` uses.  Only `Raid4` is implemented here;
/// `Raid1` is named so `Layout::kind` has somewhere to point for copies this
/// engine doesn't touch (multi-parity codes are an explicit non-goal).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum LayoutKind {
    Raid1,
    Raid4,
}

/// One extent: a contiguous run of bytes of one object stored on one medium.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Extent {
    pub uuid: Uuid,
    pub layout_idx: u32,
    pub state: ExtentState,
    pub size: u64,
    pub medium: PhoId,
    pub address: String,
    pub offset: u64,
    pub md5: Option<[u8; 16]>,
    pub xxh128: Option<[u8; 16]>,
    pub creation_time: Timestamp,
    /// Per-layout attributes, e.g. `raid4.chunk_size`.
    pub attrs: std::collections::BTreeMap<String, String>,
}

impl Extent {
    pub fn new(layout_idx: u32, medium: PhoId, size: u64) -> Self {
        Extent {
            uuid: Uuid::new_v4(),
            layout_idx,
            state: ExtentState::Pending,
            size,
            medium,
            address: String::new(),
            offset: 0,
            md5: None,
            xxh128: None,
            creation_time: Timestamp::now(),
            attrs: std::collections::BTreeMap::new(),
        }
    }

    pub fn chunk_size(&self) -> Option<u64> {
        self.attrs.get("raid4.chunk_size").and_then(|s| s.parse().ok())
    }

    pub fn set_chunk_size(&mut self, chunk_size: u64) {
        self.attrs.insert("raid4.chunk_size".to_string(), chunk_size.to_string());
    }
}

/// A layout: the ordered set of extents covering one copy of an object.
///
/// For RAID4, extents are grouped into triples `(data-0, data-1, parity)` at
/// indices `(3k, 3k+1, 3k+2)` — one triple per `Split`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Layout {
    pub kind: LayoutKind,
    pub module_version: u32,
    pub write_chunk_size: u64,
    pub extents: Vec<Extent>,
    pub copy_name: String,
}

impl Layout {
    pub fn new_raid4(write_chunk_size: u64, copy_name: impl Into<String>) -> Self {
        Layout {
            kind: LayoutKind::Raid4,
            module_version: 1,
            write_chunk_size,
            extents: Vec::new(),
            copy_name: copy_name.into(),
        }
    }

    /// Number of splits (triples of extents) in this layout.
    pub fn n_splits(&self) -> usize {
        self.extents.len() / 3
    }

    /// The three extents making up split `idx`, sorted as (data-0, data-1, parity).
    pub fn split_extents(&self, idx: usize) -> Option<(&Extent, &Extent, &Extent)> {
        let base = idx * 3;
        if base + 2 >= self.extents.len() {
            return None;
        }
        Some((&self.extents[base], &self.extents[base + 1], &self.extents[base + 2]))
    }

    /// `true` iff `extents.len() % 3 == 0`, the RAID4 invariant from
    /// `spec.md` §3.
    pub fn is_well_formed(&self) -> bool {
        self.extents.len() % 3 == 0
    }
}

/// An object copy: one durable instantiation of an object's bytes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Copy {
    pub copy_name: String,
    pub status: CopyStatus,
    pub layout: Layout,
}

/// The logical object a copy belongs to.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Object {
    pub oid: String,
    pub uuid: Uuid,
    pub version: u32,
    pub size: u64,
    pub user_md: serde_json::Value,
}

/// A medium: a storable unit identified by `PhoId`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Medium {
    pub id: PhoId,
    pub fs_root: String,
    pub avail_size: u64,
    pub can_put: bool,
    pub can_get: bool,
    pub can_delete: bool,
    pub is_tape: bool,
}

/// A device: a drive attached to a host.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum DeviceOpState {
    Empty,
    Loaded,
    Mounted,
    Failed,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Device {
    pub uuid: Uuid,
    pub model: String,
    pub host: String,
    pub op_state: DeviceOpState,
}

/// The 26-character fixed timestamp format from `spec.md` §6:
/// `"YYYY-mm-dd HH:MM:SS.uuuuuu"`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Timestamp(pub SystemTime);

impl Timestamp {
    pub fn now() -> Self {
        Timestamp(SystemTime::now())
    }

    pub fn format(&self) -> String {
        let odt = time::OffsetDateTime::from(self.0);
        let micros = odt.microsecond();
        format!(
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}.{:06}",
            odt.year(), u8::from(odt.month()), odt.day(),
            odt.hour(), odt.minute(), odt.second(), micros,
        )
    }

    pub fn parse(s: &str) -> Option<Self> {
        if s.len() != 26 {
            return None;
        }
        let format = time::macros::format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:6]"
        );
        let odt = time::PrimitiveDateTime::parse(s, &format).ok()?;
        let secs = odt.assume_utc().unix_timestamp();
        let nanos = odt.microsecond() as u32 * 1000;
        let st = UNIX_EPOCH.checked_add(Duration::new(secs.max(0) as u64, nanos))?;
        Some(Timestamp(st))
    }
}
