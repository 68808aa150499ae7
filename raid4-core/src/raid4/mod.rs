// vim: tw=80
//! RAID4 layout operations: the concrete implementations plugged into the
//! Data Processor (`spec.md` §4.5/§4.6).
//!
//! `spec.md` §9 describes "a vtable of layout ops" selected per layout kind;
//! `LayoutOps` is that vtable's trait, with `Raid4Ops` its only (for now)
//! implementor — RAID1 is named in the data model but out of scope for this
//! engine, matching the spec's Non-goals (no multi-parity codes, single
//! redundant layout implemented here).

pub mod ops;

use crate::{
    error::Result,
    hash::HashAccumulator,
    io_adapter::IoAdapter,
    types::Extent,
};

/// One extent open for the duration of a split, paired with its hash
/// accumulator and a running count of bytes physically moved through it.
pub struct Iod<H> {
    pub handle: H,
    pub hash: HashAccumulator,
    pub written: u64,
}

impl<H> Iod<H> {
    pub fn new(handle: H, hash: HashAccumulator) -> Self {
        Iod { handle, hash, written: 0 }
    }
}

/// The operations a layout kind must provide to the Data Processor.
pub trait LayoutOps<A: IoAdapter> {
    /// Drain bytes from the central buffer into this split's extents.
    /// Returns `true` once the whole object has been written.
    #[allow(clippy::too_many_arguments)]
    fn write_from_buff(
        &self,
        adapter: &A,
        buffer: &[u8],
        chunk_size: usize,
        object_size: u64,
        writer_offset: &mut u64,
        data0: &mut Iod<A::Handle>,
        data1: &mut Iod<A::Handle>,
        parity: &mut Iod<A::Handle>,
    ) -> Result<bool>;

    /// Populate `extent` with this layout's per-extent attributes (for
    /// RAID4, `raid4.chunk_size`).
    fn set_extra_attrs(&self, extent: &mut Extent, chunk_size: u64);

    /// Read back the chunk size an extent was written with.
    fn get_chunk_size(&self, extent: &Extent) -> Option<u64>;
}
