// vim: tw=80
//! The Data Processor: a single-threaded cooperative state machine driving
//! one object transfer (`spec.md` §4.4, §5, §9).
//!
//! The external scheduler (the LRS, out of scope here — only its protocol is
//! modeled) drives the processor by feeding it `Response`s and collecting the
//! `Request`s each `step` emits. This mirrors the request/response enum-pair
//! shape the daemon RPC protocol uses elsewhere in this codebase, generalized
//! from a fixed catalogue of filesystem operations to the smaller, fixed
//! catalogue of allocation/release operations the layout engine needs.
//!
//! `spec.md` §9 is explicit that this must stay a plain function of
//! `(last_response) -> (next_requests, done)` rather than a coroutine or
//! async task, so that the scheduler interaction is testable without async
//! machinery. That is a deliberate departure from this codebase's usual
//! async style elsewhere: the processor's `step` is synchronous by design,
//! not by omission.
//!
//! Three variants share this module: [`WriteProcessor`] (encode),
//! [`ReadProcessor`] (decode, tolerating one missing extent per split), and
//! [`EraseProcessor`] (delete). Each owns its central buffer implicitly (the
//! byte vector passed through the RAID4 ops) and its own per-extent I/O
//! descriptors; none of them share state.

use std::{
    collections::HashMap,
    io::{Read, Write},
    path::PathBuf,
};

use crate::{
    error::{Error, ErrorKind, Result},
    hash::{HashAccumulator, HashConfig},
    io_adapter::{ExtentLocation, IoAdapter, OpenFlags},
    raid4::{ops, Iod},
    types::{Extent, ExtentState, Layout, PhoId},
};

/// Number of media one RAID4 split always spans: data-0, data-1, parity.
pub const SPLIT_WIDTH: u32 = 3;

#[derive(Clone, Debug)]
pub struct WriteAllocRequest {
    pub size: u64,
    pub n_media: u32,
    pub tags: Vec<String>,
    pub family: String,
}

#[derive(Clone, Debug)]
pub struct MediumGrant {
    pub medium: PhoId,
    pub fs_root: String,
    pub avail_size: u64,
}

#[derive(Clone, Debug)]
pub struct WriteAllocResponse {
    pub media: Vec<MediumGrant>,
}

#[derive(Clone, Debug)]
pub struct ReadAllocRequest {
    pub media_id: Vec<PhoId>,
}

#[derive(Clone, Debug)]
pub struct ExtentLease {
    pub medium: PhoId,
    pub fs_root: String,
}

#[derive(Clone, Debug)]
pub struct ReadAllocResponse {
    pub extents: Vec<ExtentLease>,
}

#[derive(Clone, Debug)]
pub struct DeleteAllocRequest {
    pub media_id: Vec<PhoId>,
}

#[derive(Clone, Debug)]
pub struct DeleteAllocResponse {
    pub fs_root: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct ReleaseRequest {
    pub medium: PhoId,
    pub rc: u32,
    pub size_written: u64,
    pub to_sync: bool,
}

#[derive(Clone, Debug)]
pub struct ReleaseResponse {
    pub medium: PhoId,
    pub rc: u32,
}

#[derive(Clone, Debug)]
pub struct ErrorResponse {
    pub req_kind: String,
    pub rc: i32,
}

#[derive(Clone, Debug)]
pub enum Request {
    WriteAlloc(WriteAllocRequest),
    ReadAlloc(ReadAllocRequest),
    DeleteAlloc(DeleteAllocRequest),
    Release(ReleaseRequest),
}

#[derive(Clone, Debug)]
pub enum Response {
    WriteAlloc(WriteAllocResponse),
    ReadAlloc(ReadAllocResponse),
    DeleteAlloc(DeleteAllocResponse),
    Release(ReleaseResponse),
    Error(ErrorResponse),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    NeedWriteAlloc,
    Writing,
    WaitRelease,
    NeedReadAlloc,
    NeedDeleteAlloc,
    Cleanup,
    Done,
}

/// A split in progress on the write path: the three open extents, the
/// medium each was granted on, and the per-medium refcounts pending
/// release.
struct ActiveSplit<H> {
    data0: Iod<H>,
    data1: Iod<H>,
    parity: Iod<H>,
    media: [PhoId; 3],
    split_remaining: u64,
    to_release: HashMap<PhoId, u32>,
}

/// The writer variant of the Data Processor: encodes one object into a
/// sequence of RAID4 splits (`spec.md` §4.4 "writer" transitions).
pub struct WriteProcessor<A: IoAdapter> {
    adapter: A,
    object_id: String,
    object_size: u64,
    writer_offset: u64,
    chunk_size: usize,
    hash_config: HashConfig,
    family: String,
    tags: Vec<String>,
    source: Box<dyn Read + Send>,
    state: State,
    active: Option<ActiveSplit<A::Handle>>,
    /// Per-medium release refcounts for the split that just finished,
    /// tracked independently of `active` (whose extents are already closed
    /// by the time `WaitRelease` begins). `spec.md` §5: "Release
    /// acknowledgements may arrive in any order; the Processor must track
    /// them by medium id with refcounts."
    pending_release: Option<HashMap<PhoId, u32>>,
    layout: Layout,
    first_error: Option<Error>,
}

impl<A: IoAdapter> WriteProcessor<A> {
    /// Central buffer size, in data-chunks, per `Writing` step. Two is the
    /// spec's stated minimum (one data-0 chunk plus its data-1 pair).
    const BUFFER_CHUNKS: u64 = 2;

    #[allow(clippy::too_many_arguments)]
    pub fn new(
        adapter: A,
        object_id: impl Into<String>,
        object_size: u64,
        chunk_size: usize,
        hash_config: HashConfig,
        family: impl Into<String>,
        tags: Vec<String>,
        source: Box<dyn Read + Send>,
    ) -> Self {
        WriteProcessor {
            adapter,
            object_id: object_id.into(),
            object_size,
            writer_offset: 0,
            chunk_size,
            hash_config,
            family: family.into(),
            tags,
            source,
            state: State::NeedWriteAlloc,
            active: None,
            pending_release: None,
            layout: Layout::new_raid4(chunk_size as u64, "copy0"),
            first_error: None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Record an error without overwriting one already seen
    /// (`spec.md` §7: "surface the first error; subsequent cleanup errors
    /// are logged but never mask the original").
    fn note_error(&mut self, e: Error) {
        if self.first_error.is_none() {
            self.first_error = Some(e);
        } else {
            tracing::warn!(error = %e, "additional error during cleanup, original preserved");
        }
    }

    pub fn step(&mut self, response: Option<Response>) -> Result<(Vec<Request>, bool)> {
        if let Some(Response::Error(e)) = &response {
            tracing::warn!(req_kind = %e.req_kind, rc = e.rc, "scheduler error, entering cleanup");
            self.note_error(Error::with_msg(ErrorKind::Cancelled, e.req_kind.clone()));
            self.state = State::Cleanup;
        }

        match self.state {
            State::NeedWriteAlloc => self.on_need_write_alloc(),
            State::Writing => self.on_writing(),
            State::WaitRelease => self.on_wait_release(response),
            State::Cleanup => self.on_cleanup(),
            State::Done => Ok((Vec::new(), true)),
            State::NeedReadAlloc | State::NeedDeleteAlloc => {
                unreachable!("write processor never enters reader/eraser states")
            }
        }
    }

    fn on_need_write_alloc(&mut self) -> Result<(Vec<Request>, bool)> {
        let remaining = self.object_size - self.writer_offset;
        let req = WriteAllocRequest {
            size: remaining,
            n_media: SPLIT_WIDTH,
            tags: self.tags.clone(),
            family: self.family.clone(),
        };
        // Consumed by `on_write_alloc_response` once the caller re-enters
        // with the matching `WriteAllocResponse`; the state stays
        // `NeedWriteAlloc` until then.
        Ok((vec![Request::WriteAlloc(req)], false))
    }

    /// Called by the scheduler loop with the `WriteAllocResponse` that
    /// answers the pending `WriteAllocRequest`.
    pub fn on_write_alloc_response(&mut self, resp: WriteAllocResponse) -> Result<()> {
        if resp.media.len() != SPLIT_WIDTH as usize {
            return Err(Error::invalid_input("write alloc must grant exactly 3 media"));
        }
        let avail = resp.media.iter().map(|m| m.avail_size).min().unwrap_or(0);
        let split_remaining = avail.saturating_mul(2).min(self.object_size - self.writer_offset);

        let open = |grant: &MediumGrant, tag: &str| -> Result<Iod<A::Handle>> {
            let loc = ExtentLocation::new(PathBuf::from(&grant.fs_root), self.object_id.clone(), tag);
            let handle = self.adapter.open(loc, OpenFlags::default(), true)?;
            let attrs = std::collections::BTreeMap::from([
                ("id".to_string(), self.object_id.clone()),
                ("raid4.chunk_size".to_string(), self.chunk_size.to_string()),
            ]);
            self.adapter.set_md(&handle, &attrs, OpenFlags::default())?;
            Ok(Iod::new(handle, HashAccumulator::init(self.hash_config)))
        };
        let data0 = open(&resp.media[0], "d0")?;
        let data1 = open(&resp.media[1], "d1")?;
        let parity = open(&resp.media[2], "dp")?;

        let mut to_release = HashMap::new();
        for grant in &resp.media {
            *to_release.entry(grant.medium.clone()).or_insert(0u32) += 1;
        }
        let media = [resp.media[0].medium.clone(), resp.media[1].medium.clone(), resp.media[2].medium.clone()];

        self.active = Some(ActiveSplit { data0, data1, parity, media, split_remaining, to_release });
        self.state = State::Writing;
        Ok(())
    }

    fn on_writing(&mut self) -> Result<(Vec<Request>, bool)> {
        let active = self.active.as_mut().expect("Writing state always has an active split");
        // Central buffer bounded to a small multiple of the chunk size
        // (`spec.md` §2/§9: "sized to the LCM of the stripe size, at least
        // two data-chunks, so a full stripe and its XOR always fit without
        // re-allocation") rather than the whole remaining split, so a
        // large object is streamed through `write_from_buff` across many
        // `Writing` steps instead of loaded into memory in one shot.
        let buffer_cap = (self.chunk_size as u64).saturating_mul(Self::BUFFER_CHUNKS);
        let to_write = active.split_remaining.min(self.object_size - self.writer_offset).min(buffer_cap);
        let mut buffer = vec![0u8; to_write as usize];
        if to_write > 0 {
            if let Err(e) = self.source.read_exact(&mut buffer) {
                self.note_error(Error::from(e));
                self.state = State::Cleanup;
                return Ok((Vec::new(), false));
            }
        }

        let result = ops::write_from_buff(
            &self.adapter,
            &buffer,
            self.chunk_size,
            self.object_size,
            &mut self.writer_offset,
            &mut active.data0,
            &mut active.data1,
            &mut active.parity,
        );
        let all_is_written = match result {
            Ok(done) => done,
            Err(e) => {
                self.note_error(e);
                self.state = State::Cleanup;
                return Ok((Vec::new(), false));
            }
        };
        active.split_remaining -= to_write;

        if active.split_remaining == 0 || all_is_written {
            let active = self.active.take().unwrap();
            let to_release = active.to_release.clone();
            if let Err(e) = self.finish_split(active) {
                self.note_error(e);
                self.state = State::Cleanup;
                return Ok((Vec::new(), false));
            }

            let releases: Vec<Request> = to_release
                .iter()
                .map(|(medium, rc)| {
                    Request::Release(ReleaseRequest {
                        medium: medium.clone(),
                        rc: *rc,
                        size_written: self.writer_offset,
                        to_sync: true,
                    })
                })
                .collect();
            self.pending_release = Some(to_release);
            self.state = State::WaitRelease;
            return Ok((releases, false));
        }
        Ok((Vec::new(), false))
    }

    /// Close the split's three handles, stash each extent's final size and
    /// digests, and append the triple to the layout in `(data-0, data-1,
    /// parity)` order (`spec.md` §3: "RAID4 triples are (data-0, data-1,
    /// parity) at indices (3k, 3k+1, 3k+2)").
    fn finish_split(&mut self, active: ActiveSplit<A::Handle>) -> Result<()> {
        let split_idx = self.layout.n_splits() as u32;
        let ActiveSplit { data0, data1, parity, media, .. } = active;
        for (idx, iod, medium) in [
            (0u32, data0, media[0].clone()),
            (1u32, data1, media[1].clone()),
            (2u32, parity, media[2].clone()),
        ] {
            let address = iod.handle.location().address.clone().unwrap_or_default();
            let size = iod.written;
            let digests = iod.hash.digest();
            self.adapter.close(iod.handle, OpenFlags { sync: true, ..Default::default() })?;

            let mut extent = Extent::new(split_idx * 3 + idx, medium, size);
            extent.state = ExtentState::Sync;
            extent.address = address;
            extent.md5 = digests.md5;
            extent.xxh128 = digests.xxh128;
            extent.set_chunk_size(self.chunk_size as u64);
            self.layout.extents.push(extent);
        }
        Ok(())
    }

    fn on_wait_release(&mut self, response: Option<Response>) -> Result<(Vec<Request>, bool)> {
        if let Some(Response::Release(r)) = response {
            if let Some(pending) = self.pending_release.as_mut() {
                if let Some(count) = pending.get_mut(&r.medium) {
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        pending.remove(&r.medium);
                    }
                }
            }
        }
        let drained = self.pending_release.as_ref().map(|p| p.is_empty()).unwrap_or(true);
        if !drained {
            return Ok((Vec::new(), false));
        }
        self.pending_release = None;
        if self.writer_offset >= self.object_size {
            self.state = State::Done;
            Ok((Vec::new(), true))
        } else {
            self.state = State::NeedWriteAlloc;
            Ok((Vec::new(), false))
        }
    }

    fn on_cleanup(&mut self) -> Result<(Vec<Request>, bool)> {
        if let Some(active) = self.active.take() {
            let handles = [
                (active.data0.handle, active.media[0].clone()),
                (active.data1.handle, active.media[1].clone()),
                (active.parity.handle, active.media[2].clone()),
            ];
            for (handle, medium) in handles {
                let mut loc = handle.location().clone();
                let mapper_kind = self.adapter.mapper_kind();
                if let Err(e) = self.adapter.close(handle, OpenFlags::default()) {
                    tracing::warn!(error = %e, medium = %medium.name, "cleanup close failed, continuing");
                }
                if let Err(e) = self.adapter.del(&mut loc, mapper_kind) {
                    tracing::warn!(error = %e, "cleanup delete failed, continuing");
                }
            }
        }
        self.state = State::Done;
        Err(self.first_error.clone().unwrap_or_else(|| Error::new(ErrorKind::Cancelled)))
    }
}

/// One split's worth of read state: the two extents actually present, in
/// ascending `layout_idx` order, and the handles/hashes open against them.
struct ActiveRead<H> {
    roles: ops::PresentRoles,
    a: (H, HashAccumulator, Extent),
    b: (H, HashAccumulator, Extent),
    data0_size: u64,
    data1_size: u64,
}

/// The reader variant: decodes an existing layout back into a byte stream,
/// reconstructing through whichever one extent per split is missing
/// (`spec.md` §4.4 "Reader ... mirrors [writer], additionally verifies
/// hashes at each extent end").
pub struct ReadProcessor<A: IoAdapter> {
    adapter: A,
    layout: Layout,
    /// For each split, the `layout_idx` of the two extents to request,
    /// ascending. Populated by whatever resolved the read route (typically
    /// [`crate::locate`]); this processor does not call Locate itself.
    present: Vec<[u32; 2]>,
    check_hash: bool,
    dest: Box<dyn Write + Send>,
    current_split: usize,
    state: State,
    active: Option<ActiveRead<A::Handle>>,
    first_error: Option<Error>,
}

impl<A: IoAdapter> ReadProcessor<A> {
    pub fn new(
        adapter: A,
        layout: Layout,
        present: Vec<[u32; 2]>,
        check_hash: bool,
        dest: Box<dyn Write + Send>,
    ) -> Self {
        assert_eq!(present.len(), layout.n_splits(), "one present-pair per split");
        ReadProcessor {
            adapter,
            layout,
            present,
            check_hash,
            dest,
            current_split: 0,
            state: State::NeedReadAlloc,
            active: None,
            first_error: None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    fn note_error(&mut self, e: Error) {
        if self.first_error.is_none() {
            self.first_error = Some(e);
        }
    }

    pub fn step(&mut self, response: Option<Response>) -> Result<(Vec<Request>, bool)> {
        if let Some(Response::Error(e)) = &response {
            self.note_error(Error::with_msg(ErrorKind::Cancelled, e.req_kind.clone()));
            self.state = State::Cleanup;
        }
        match self.state {
            State::NeedReadAlloc => self.on_need_read_alloc(),
            State::Cleanup => self.on_cleanup(),
            State::Done => Ok((Vec::new(), true)),
            _ => unreachable!("read processor only uses NeedReadAlloc/Cleanup/Done"),
        }
    }

    fn on_need_read_alloc(&mut self) -> Result<(Vec<Request>, bool)> {
        if self.current_split >= self.layout.n_splits() {
            self.state = State::Done;
            return Ok((Vec::new(), true));
        }
        let pair = self.present[self.current_split];
        let extents: Vec<&Extent> = self
            .layout
            .extents
            .iter()
            .filter(|e| pair.contains(&e.layout_idx))
            .collect();
        let media = extents.iter().map(|e| e.medium.clone()).collect();
        Ok((vec![Request::ReadAlloc(ReadAllocRequest { media_id: media })], false))
    }

    /// Answers the pending `ReadAllocRequest`: opens the two granted
    /// extents, reconstructs this split into `dest`, and advances.
    pub fn on_read_alloc_response(&mut self, resp: ReadAllocResponse) -> Result<()> {
        let split = self.current_split;
        let (d0, d1, dp) = self.layout.split_extents(split).expect("split in range");
        let pair = self.present[split];
        let by_idx = |idx: u32| -> Extent {
            [d0, d1, dp].into_iter().find(|e| e.layout_idx == idx).expect("present extent in triple").clone()
        };
        let ext_a = by_idx(pair[0]);
        let ext_b = by_idx(pair[1]);
        let (data0_size, data1_size) = (d0.size, d1.size);

        if resp.extents.len() != 2 {
            return Err(Error::invalid_input("read alloc must grant exactly 2 extents"));
        }

        let open = |ext: &Extent, lease: &ExtentLease| -> Result<A::Handle> {
            let loc = ExtentLocation::new(PathBuf::from(&lease.fs_root), self.layout.copy_name.clone(), "")
                .with_address(ext.address.clone());
            self.adapter.open(loc, OpenFlags::default(), false)
        };
        let h_a = open(&ext_a, &resp.extents[0])?;
        let h_b = open(&ext_b, &resp.extents[1])?;

        let roles = ops::detect_roles([&ext_a, &ext_b]);
        let hash_config = HashConfig { use_md5: ext_a.md5.is_some(), use_xxh128: ext_a.xxh128.is_some() };
        let chunk_size = d0.chunk_size().unwrap_or(65536) as usize;

        self.active = Some(ActiveRead {
            roles,
            a: (h_a, HashAccumulator::init(hash_config), ext_a),
            b: (h_b, HashAccumulator::init(hash_config), ext_b),
            data0_size,
            data1_size,
        });

        let active = self.active.as_mut().unwrap();
        let result = ops::read_into_buff(
            &self.adapter,
            chunk_size,
            active.roles,
            active.data0_size,
            active.data1_size,
            self.check_hash,
            (&mut active.a.0, &mut active.a.1, &active.a.2),
            (&mut active.b.0, &mut active.b.1, &active.b.2),
            &mut self.dest,
        );

        let active = self.active.take().unwrap();
        self.adapter.close(active.a.0, OpenFlags::default())?;
        self.adapter.close(active.b.0, OpenFlags::default())?;
        result?;

        self.current_split += 1;
        Ok(())
    }

    fn on_cleanup(&mut self) -> Result<(Vec<Request>, bool)> {
        self.state = State::Done;
        Err(self.first_error.clone().unwrap_or_else(|| Error::new(ErrorKind::Cancelled)))
    }
}

/// The eraser variant: deletes every extent of a layout. Tape-family media
/// are never hard-deleted (`spec.md` §5); their delete counts silently drop
/// to zero.
pub struct EraseProcessor<A: IoAdapter> {
    adapter: A,
    layout: Layout,
    current_split: usize,
    state: State,
    first_error: Option<Error>,
}

impl<A: IoAdapter> EraseProcessor<A> {
    pub fn new(adapter: A, layout: Layout) -> Self {
        EraseProcessor { adapter, layout, current_split: 0, state: State::NeedDeleteAlloc, first_error: None }
    }

    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    fn note_error(&mut self, e: Error) {
        if self.first_error.is_none() {
            self.first_error = Some(e);
        }
    }

    pub fn step(&mut self, response: Option<Response>) -> Result<(Vec<Request>, bool)> {
        if let Some(Response::Error(e)) = &response {
            self.note_error(Error::with_msg(ErrorKind::Cancelled, e.req_kind.clone()));
            self.state = State::Cleanup;
        }
        match self.state {
            State::NeedDeleteAlloc => self.on_need_delete_alloc(),
            State::Cleanup => {
                self.state = State::Done;
                Err(self.first_error.clone().unwrap_or_else(|| Error::new(ErrorKind::Cancelled)))
            }
            State::Done => Ok((Vec::new(), true)),
            _ => unreachable!("erase processor only uses NeedDeleteAlloc/Cleanup/Done"),
        }
    }

    fn on_need_delete_alloc(&mut self) -> Result<(Vec<Request>, bool)> {
        if self.current_split >= self.layout.n_splits() {
            self.state = State::Done;
            return Ok((Vec::new(), true));
        }
        let (d0, d1, dp) = self.layout.split_extents(self.current_split).expect("split in range");
        let media = vec![d0.medium.clone(), d1.medium.clone(), dp.medium.clone()];
        Ok((vec![Request::DeleteAlloc(DeleteAllocRequest { media_id: media })], false))
    }

    /// Answers the pending `DeleteAllocRequest`: deletes this split's three
    /// extents (skipping tape) and advances.
    pub fn on_delete_alloc_response(&mut self, resp: DeleteAllocResponse) -> Result<()> {
        let (d0, d1, dp) = self.layout.split_extents(self.current_split).expect("split in range");
        if resp.fs_root.len() != 3 {
            return Err(Error::invalid_input("delete alloc must grant exactly 3 roots"));
        }
        let mut locations = [
            ExtentLocation::new(PathBuf::from(&resp.fs_root[0]), self.layout.copy_name.clone(), "d0")
                .with_address(d0.address.clone()),
            ExtentLocation::new(PathBuf::from(&resp.fs_root[1]), self.layout.copy_name.clone(), "d1")
                .with_address(d1.address.clone()),
            ExtentLocation::new(PathBuf::from(&resp.fs_root[2]), self.layout.copy_name.clone(), "dp")
                .with_address(dp.address.clone()),
        ];
        let families = [d0.medium.family.as_str(), d1.medium.family.as_str(), dp.medium.family.as_str()];
        let mapper_kind = self.adapter.mapper_kind();
        ops::delete_split(&self.adapter, &mut locations, families, mapper_kind)?;
        self.current_split += 1;
        Ok(())
    }
}
