// vim: tw=80
//! The I/O Adapter: chunked byte movement plus extended-attribute metadata,
//! polymorphic over filesystem flavour.
//!
//! `spec.md` §9 calls for "tagged variants ... plus a vtable of layout ops"
//! rather than a class hierarchy; here that's a plain trait (`IoAdapter`)
//! with two small implementors (`posix::PosixAdapter`,
//! `ltfs::LtfsAdapter`), exactly the shape the teacher uses for its own
//! `Vdev`/`VdevRaidApi` family (tagged by which concrete type you hold, not
//! by a trait object hierarchy with many layers).

pub mod ltfs;
pub mod posix;

use std::{collections::BTreeMap, path::PathBuf};

use crate::{
    error::Result,
    mapper::{clean_path, hash1},
    types::NAME_MAX,
};

/// Which Mapper scheme an adapter uses to synthesise extent addresses.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MapperKind {
    Clean,
    Hash1,
}

impl MapperKind {
    pub fn resolve(self, obj_id: &str, ext_tag: &str) -> Result<String> {
        match self {
            MapperKind::Clean => clean_path(obj_id, ext_tag, NAME_MAX),
            MapperKind::Hash1 => hash1(obj_id, ext_tag, NAME_MAX),
        }
    }
}

/// Where one extent lives: a medium's root plus its (possibly not yet
/// assigned) address within that root.
#[derive(Clone, Debug)]
pub struct ExtentLocation {
    pub root_path: PathBuf,
    pub address: Option<String>,
    pub obj_id: String,
    pub ext_tag: String,
}

impl ExtentLocation {
    pub fn new(root_path: PathBuf, obj_id: impl Into<String>, ext_tag: impl Into<String>) -> Self {
        ExtentLocation { root_path, address: None, obj_id: obj_id.into(), ext_tag: ext_tag.into() }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn full_path(&self) -> Option<PathBuf> {
        self.address.as_ref().map(|a| self.root_path.join(a))
    }
}

/// Flags governing `open`/`set_md`/`del`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct OpenFlags {
    /// Allow opening an existing extent file for write (skip `O_EXCL`), and
    /// overwrite existing xattr values instead of failing on collision.
    pub replace: bool,
    /// Short-circuit `open` to metadata access only; no data I/O.
    pub md_only: bool,
    /// `fsync` on close.
    pub sync: bool,
}

/// An open extent: the live half of the adapter's `open`/`close` pair.
pub trait IoHandle: Send {
    fn location(&self) -> &ExtentLocation;
    fn is_md_only(&self) -> bool;
}

/// Polymorphic I/O adapter, one implementation per filesystem flavour.
pub trait IoAdapter: Send + Sync {
    type Handle: IoHandle;

    /// `open`: builds the full path, creates missing parent directories on
    /// put, and synthesises the extent address via the Mapper if unset.
    fn open(&self, loc: ExtentLocation, flags: OpenFlags, is_put: bool) -> Result<Self::Handle>;

    /// `write`: loops over partial writes; aborts with `ShortWrite` after ten
    /// consecutive zero-byte returns. On error, the extent file is unlinked
    /// and the handle is released.
    fn write(&self, handle: &mut Self::Handle, buf: &[u8]) -> Result<usize>;

    /// `read`: returns <= `buf.len()` bytes; `0` means end-of-extent.
    fn read(&self, handle: &mut Self::Handle, buf: &mut [u8]) -> Result<usize>;

    /// `close`: closes the handle, syncing and dropping cache pages per
    /// `flags`.
    fn close(&self, handle: Self::Handle, flags: OpenFlags) -> Result<()>;

    /// `del`: unlinks the extent file. Tolerant of a missing address: it is
    /// regenerated via the Mapper (with a warning) so the right path can
    /// still be unlinked.
    fn del(&self, loc: &mut ExtentLocation, mapper: MapperKind) -> Result<()>;

    /// `medium_sync`: flush a whole medium (not just one extent) to stable
    /// storage.
    fn medium_sync(&self, root: &std::path::Path) -> Result<()>;

    /// `set_md`: store `attrs` as extended attributes under the `user.`
    /// prefix. `flags.replace` selects create-only vs overwrite.
    fn set_md(&self, handle: &Self::Handle, attrs: &BTreeMap<String, String>, flags: OpenFlags) -> Result<()>;

    /// `get_md`: read back the named extended attributes.
    fn get_md(&self, loc: &ExtentLocation, keys: &[String]) -> Result<BTreeMap<String, String>>;

    /// Remove named metadata keys, tolerating "not present".
    fn del_md(&self, handle: &Self::Handle, keys: &[String]) -> Result<()>;

    fn mapper_kind(&self) -> MapperKind;
}
