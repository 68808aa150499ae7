// vim: tw=80
//! The RAID4 chunk loop: the write-side XOR kernel and the three read-side
//! reconstruction cases (`spec.md` §4.5/§4.6).

use crate::{
    error::{Error, Result},
    hash::HashAccumulator,
    io_adapter::IoAdapter,
    raid4::{Iod, LayoutOps},
    types::Extent,
};

#[derive(Clone, Copy, Debug, Default)]
pub struct Raid4Ops;

impl<A: IoAdapter> LayoutOps<A> for Raid4Ops {
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
    ) -> Result<bool> {
        write_from_buff(adapter, buffer, chunk_size, object_size, writer_offset, data0, data1, parity)
    }

    fn set_extra_attrs(&self, extent: &mut Extent, chunk_size: u64) {
        extent.set_chunk_size(chunk_size);
    }

    fn get_chunk_size(&self, extent: &Extent) -> Option<u64> {
        extent.chunk_size()
    }
}

/// The write-side chunk loop (`spec.md` §4.5).
///
/// `buffer` holds exactly the fresh bytes available this call. Each round
/// takes up to `chunk_size` bytes for data-0 (`m`), then up to `chunk_size`
/// bytes of what remains for data-1 (`n <= m`). When `n < m` — only possible
/// on the object's final round, when its size is odd with respect to
/// `2 * chunk_size` — the missing data-1 tail is treated as zero when
/// building parity, per the zero-padding rule.
#[allow(clippy::too_many_arguments)]
pub fn write_from_buff<A: IoAdapter>(
    adapter: &A,
    buffer: &[u8],
    chunk_size: usize,
    object_size: u64,
    writer_offset: &mut u64,
    data0: &mut Iod<A::Handle>,
    data1: &mut Iod<A::Handle>,
    parity: &mut Iod<A::Handle>,
) -> Result<bool> {
    let mut pos = 0usize;
    let mut remaining = buffer.len();
    let mut all_is_written = false;
    let mut scratch = vec![0u8; chunk_size];

    while remaining > 0 {
        let m = remaining.min(chunk_size);
        let data0_chunk = &buffer[pos..pos + m];
        adapter.write(&mut data0.handle, data0_chunk)?;
        data0.hash.update(data0_chunk);
        data0.written += m as u64;
        *writer_offset += m as u64;
        pos += m;
        remaining -= m;

        let n = remaining.min(chunk_size).min(m);
        let data1_chunk = &buffer[pos..pos + n];
        if n > 0 {
            adapter.write(&mut data1.handle, data1_chunk)?;
            data1.hash.update(data1_chunk);
            data1.written += n as u64;
        }
        pos += n;
        remaining -= n;
        *writer_offset += n as u64;
        if *writer_offset >= object_size {
            all_is_written = true;
        }

        scratch[..m].copy_from_slice(data0_chunk);
        for i in 0..n {
            scratch[i] ^= data1_chunk[i];
        }
        adapter.write(&mut parity.handle, &scratch[..m])?;
        parity.hash.update(&scratch[..m]);
        parity.written += m as u64;
    }
    Ok(all_is_written)
}

fn read_full<A: IoAdapter>(adapter: &A, handle: &mut A::Handle, buf: &mut [u8]) -> Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = adapter.read(handle, &mut buf[filled..])?;
        if n == 0 {
            return Err(Error::io_failed("unexpected end of extent"));
        }
        filled += n;
    }
    Ok(())
}

/// Which of the three roles in a split are physically present, given the two
/// extent records that were actually resolved for reading (sorted ascending
/// by `layout_idx`).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PresentRoles {
    pub data0: bool,
    pub data1: bool,
    pub parity: bool,
}

pub fn detect_roles(extents: [&Extent; 2]) -> PresentRoles {
    let with_extent_0 = extents[0].layout_idx % 3 == 0;
    let with_xor = extents[1].layout_idx % 3 == 2;
    let with_extent_1 = !with_extent_0 || !with_xor;
    PresentRoles { data0: with_extent_0, parity: with_xor, data1: with_extent_1 }
}

/// Reconstruct a split and write the whole object's worth of bytes it holds
/// into `out`, in object order (data-0 bytes interleaved with data-1 bytes,
/// reconstructed transparently when one of the two is missing).
#[allow(clippy::too_many_arguments)]
pub fn read_into_buff<A: IoAdapter>(
    adapter: &A,
    chunk_size: usize,
    roles: PresentRoles,
    data0_size: u64,
    data1_size: u64,
    check_hash: bool,
    present_a: (&mut A::Handle, &mut HashAccumulator, &Extent),
    present_b: (&mut A::Handle, &mut HashAccumulator, &Extent),
    out: &mut dyn std::io::Write,
) -> Result<()> {
    if roles.data0 && roles.data1 {
        read_both_data(adapter, chunk_size, data0_size, data1_size, check_hash, present_a, present_b, out)
    } else if roles.data0 && roles.parity {
        read_data0_parity(adapter, chunk_size, data0_size, data1_size, check_hash, present_a, present_b, out)
    } else {
        read_data1_parity(adapter, chunk_size, data0_size, data1_size, check_hash, present_a, present_b, out)
    }
}

#[allow(clippy::too_many_arguments)]
fn read_both_data<A: IoAdapter>(
    adapter: &A,
    chunk_size: usize,
    data0_size: u64,
    data1_size: u64,
    check_hash: bool,
    data0: (&mut A::Handle, &mut HashAccumulator, &Extent),
    data1: (&mut A::Handle, &mut HashAccumulator, &Extent),
    out: &mut dyn std::io::Write,
) -> Result<()> {
    let (h0, hash0, ext0) = data0;
    let (h1, hash1, ext1) = data1;
    let mut rem0 = data0_size;
    let mut rem1 = data1_size;
    let mut buf = vec![0u8; chunk_size];
    while rem0 > 0 || rem1 > 0 {
        if rem0 > 0 {
            let m = rem0.min(chunk_size as u64) as usize;
            read_full(adapter, h0, &mut buf[..m])?;
            hash0.update(&buf[..m]);
            out.write_all(&buf[..m]).map_err(Error::from)?;
            rem0 -= m as u64;
        }
        if rem1 > 0 {
            let n = rem1.min(chunk_size as u64) as usize;
            read_full(adapter, h1, &mut buf[..n])?;
            hash1.update(&buf[..n]);
            out.write_all(&buf[..n]).map_err(Error::from)?;
            rem1 -= n as u64;
        }
    }
    if check_hash {
        hash0.finish().compare(ext0)?;
        hash1.finish().compare(ext1)?;
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn read_data0_parity<A: IoAdapter>(
    adapter: &A,
    chunk_size: usize,
    data0_size: u64,
    data1_size: u64,
    check_hash: bool,
    data0: (&mut A::Handle, &mut HashAccumulator, &Extent),
    parity: (&mut A::Handle, &mut HashAccumulator, &Extent),
    out: &mut dyn std::io::Write,
) -> Result<()> {
    let (h0, hash0, ext0) = data0;
    let (hp, hashp, extp) = parity;
    let mut rem0 = data0_size;
    let mut rem1 = data1_size;
    let mut buf0 = vec![0u8; chunk_size];
    let mut bufp = vec![0u8; chunk_size];
    while rem0 > 0 {
        let m = rem0.min(chunk_size as u64) as usize;
        read_full(adapter, h0, &mut buf0[..m])?;
        hash0.update(&buf0[..m]);
        out.write_all(&buf0[..m]).map_err(Error::from)?;

        read_full(adapter, hp, &mut bufp[..m])?;
        hashp.update(&bufp[..m]);

        let n = rem1.min(m as u64) as usize;
        let mut recon1 = vec![0u8; n];
        for i in 0..n {
            recon1[i] = buf0[i] ^ bufp[i];
        }
        out.write_all(&recon1).map_err(Error::from)?;

        rem0 -= m as u64;
        rem1 -= n as u64;
    }
    if check_hash {
        hash0.finish().compare(ext0)?;
        hashp.finish().compare(extp)?;
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn read_data1_parity<A: IoAdapter>(
    adapter: &A,
    chunk_size: usize,
    data0_size: u64,
    data1_size: u64,
    check_hash: bool,
    data1: (&mut A::Handle, &mut HashAccumulator, &Extent),
    parity: (&mut A::Handle, &mut HashAccumulator, &Extent),
    out: &mut dyn std::io::Write,
) -> Result<()> {
    let (h1, hash1, ext1) = data1;
    let (hp, hashp, extp) = parity;
    let mut rem0 = data0_size;
    let mut rem1 = data1_size;
    let mut bufp = vec![0u8; chunk_size];
    let mut buf1 = vec![0u8; chunk_size];
    while rem0 > 0 {
        let m = rem0.min(chunk_size as u64) as usize;
        let n = rem1.min(m as u64) as usize;

        // Parity always carries `m` bytes for this chunk (data-1 is
        // zero-padded over `[n, m)` when it writes), so the whole chunk must
        // be read from parity, not just the `n` bytes data-1 also covers.
        read_full(adapter, hp, &mut bufp[..m])?;
        hashp.update(&bufp[..m]);

        read_full(adapter, h1, &mut buf1[..n])?;
        hash1.update(&buf1[..n]);

        let mut recon0 = vec![0u8; m];
        recon0[..n].copy_from_slice(&bufp[..n]);
        for i in 0..n {
            recon0[i] ^= buf1[i];
        }
        // Beyond `n`, data-1 contributed zero, so parity equals data-0
        // directly.
        recon0[n..m].copy_from_slice(&bufp[n..m]);
        out.write_all(&recon0).map_err(Error::from)?;
        out.write_all(&buf1[..n]).map_err(Error::from)?;

        rem0 -= m as u64;
        rem1 -= n as u64;
    }
    if check_hash {
        hash1.finish().compare(ext1)?;
        hashp.finish().compare(extp)?;
    }
    Ok(())
}

/// Delete a split's three extents. Tape-family media never hard-delete
/// (`spec.md` §5): those extents are skipped, not failed.
pub fn delete_split<A: IoAdapter>(
    adapter: &A,
    locations: &mut [crate::io_adapter::ExtentLocation; 3],
    families: [&str; 3],
    mapper: crate::io_adapter::MapperKind,
) -> Result<()> {
    for (loc, family) in locations.iter_mut().zip(families) {
        if family == "tape" {
            continue;
        }
        adapter.del(loc, mapper)?;
    }
    Ok(())
}

#[cfg(test)]
mod t {
    use super::*;
    use crate::{
        hash::HashConfig,
        io_adapter::{posix::PosixAdapter, ExtentLocation, MapperKind, OpenFlags},
        types::PhoId,
    };
    use tempfile::tempdir;

    fn medium(n: &str) -> PhoId {
        PhoId::new("dir", n, "lib")
    }

    fn open_triple(adapter: &PosixAdapter, root: &std::path::Path, obj: &str)
        -> (Iod<crate::io_adapter::posix::PosixHandle>,
            Iod<crate::io_adapter::posix::PosixHandle>,
            Iod<crate::io_adapter::posix::PosixHandle>)
    {
        let config = HashConfig { use_md5: false, use_xxh128: true };
        let h0 = adapter.open(ExtentLocation::new(root.to_path_buf(), obj, "d0"), OpenFlags::default(), true).unwrap();
        let h1 = adapter.open(ExtentLocation::new(root.to_path_buf(), obj, "d1"), OpenFlags::default(), true).unwrap();
        let hp = adapter.open(ExtentLocation::new(root.to_path_buf(), obj, "dp"), OpenFlags::default(), true).unwrap();
        (Iod::new(h0, HashAccumulator::init(config)),
         Iod::new(h1, HashAccumulator::init(config)),
         Iod::new(hp, HashAccumulator::init(config)))
    }

    #[test]
    fn aligned_object_splits_evenly() {
        let dir = tempdir().unwrap();
        let adapter = PosixAdapter::new(MapperKind::Clean);
        let object = vec![0xABu8; 1_048_576];
        let chunk_size = 65_536usize;
        let (mut d0, mut d1, mut dp) = open_triple(&adapter, dir.path(), "obj1");
        let mut writer_offset = 0u64;
        let done = write_from_buff(&adapter, &object, chunk_size, object.len() as u64,
            &mut writer_offset, &mut d0, &mut d1, &mut dp).unwrap();
        assert!(done);
        assert_eq!(writer_offset, 1_048_576);

        let ext0 = Extent::new(0, medium("m0"), 524_288);
        let ext1 = Extent::new(1, medium("m1"), 524_288);
        let extp = Extent::new(2, medium("m2"), 524_288);
        let mut buf = Vec::new();
        read_both_data(&adapter, chunk_size, 524_288, 524_288, false,
            (&mut d0.handle, &mut d0.hash, &ext0),
            (&mut d1.handle, &mut d1.hash, &ext1),
            &mut buf).unwrap();
        assert_eq!(buf, object);
        let _ = extp;
    }

    #[test]
    fn odd_sized_object_leaves_one_byte_residual() {
        let dir = tempdir().unwrap();
        let adapter = PosixAdapter::new(MapperKind::Clean);
        let mut object = vec![0x11u8; 1_048_576];
        object.push(0x99);
        let chunk_size = 65_536usize;
        let (mut d0, mut d1, mut dp) = open_triple(&adapter, dir.path(), "obj2");
        let mut writer_offset = 0u64;
        let done = write_from_buff(&adapter, &object, chunk_size, object.len() as u64,
            &mut writer_offset, &mut d0, &mut d1, &mut dp).unwrap();
        assert!(done);
        assert_eq!(writer_offset, 1_048_577);

        let ext0 = Extent::new(0, medium("m0"), 524_289);
        let ext1 = Extent::new(1, medium("m1"), 524_288);
        let extp = Extent::new(2, medium("m2"), 524_289);

        let mut buf = Vec::new();
        read_both_data(&adapter, chunk_size, 524_289, 524_288, false,
            (&mut d0.handle, &mut d0.hash, &ext0),
            (&mut d1.handle, &mut d1.hash, &ext1),
            &mut buf).unwrap();
        assert_eq!(buf, object);
        let _ = extp;
    }

    #[test]
    fn reconstructs_missing_data1_from_parity() {
        let dir = tempdir().unwrap();
        let adapter = PosixAdapter::new(MapperKind::Clean);
        // Three full chunk-pairs: data-0 and data-1 split evenly.
        let object: Vec<u8> = (0..24_576u32).map(|i| (i % 251) as u8).collect();
        let chunk_size = 4096usize;
        let (mut d0, mut d1, mut dp) = open_triple(&adapter, dir.path(), "obj3");
        let mut writer_offset = 0u64;
        write_from_buff(&adapter, &object, chunk_size, object.len() as u64,
            &mut writer_offset, &mut d0, &mut d1, &mut dp).unwrap();
        let data0_size = 12_288u64;
        let data1_size = 12_288u64;

        let ext0 = Extent::new(0, medium("m0"), data0_size);
        let extp = Extent::new(2, medium("m2"), data0_size);

        let roles = detect_roles([&ext0, &extp]);
        assert!(roles.data0 && roles.parity && !roles.data1);

        let mut buf = Vec::new();
        read_data0_parity(&adapter, chunk_size, data0_size, data1_size, false,
            (&mut d0.handle, &mut d0.hash, &ext0),
            (&mut dp.handle, &mut dp.hash, &extp),
            &mut buf).unwrap();
        assert_eq!(buf, object);
    }

    #[test]
    fn reconstructs_missing_data0_from_parity() {
        let dir = tempdir().unwrap();
        let adapter = PosixAdapter::new(MapperKind::Clean);
        // One byte past three full chunk-pairs: data-1 runs exactly one byte
        // short of data-0/parity in the final chunk (n = m - 1).
        let mut object = vec![0x22u8; 24_576];
        object.push(0x77);
        let chunk_size = 4096usize;
        let (mut d0, mut d1, mut dp) = open_triple(&adapter, dir.path(), "obj4");
        let mut writer_offset = 0u64;
        write_from_buff(&adapter, &object, chunk_size, object.len() as u64,
            &mut writer_offset, &mut d0, &mut d1, &mut dp).unwrap();
        let data0_size = 12_289u64;
        let data1_size = 12_288u64;

        let ext1 = Extent::new(1, medium("m1"), data1_size);
        let extp = Extent::new(2, medium("m2"), data0_size);

        let roles = detect_roles([&ext1, &extp]);
        assert!(roles.data1 && roles.parity && !roles.data0);

        let mut buf = Vec::new();
        read_data1_parity(&adapter, chunk_size, data0_size, data1_size, false,
            (&mut d1.handle, &mut d1.hash, &ext1),
            (&mut dp.handle, &mut dp.hash, &extp),
            &mut buf).unwrap();
        assert_eq!(buf, object);
    }

    #[test]
    fn detect_roles_matches_all_three_combinations() {
        let e0 = Extent::new(0, medium("m0"), 1);
        let e1 = Extent::new(1, medium("m1"), 1);
        let e2 = Extent::new(2, medium("m2"), 1);

        let r = detect_roles([&e0, &e1]);
        assert_eq!(r, PresentRoles { data0: true, data1: true, parity: false });

        let r = detect_roles([&e0, &e2]);
        assert_eq!(r, PresentRoles { data0: true, data1: false, parity: true });

        let r = detect_roles([&e1, &e2]);
        assert_eq!(r, PresentRoles { data0: false, data1: true, parity: true });
    }

    #[test]
    fn delete_split_skips_tape_family() {
        let dir = tempdir().unwrap();
        let adapter = PosixAdapter::new(MapperKind::Clean);
        let (d0, d1, dp) = open_triple(&adapter, dir.path(), "obj5");
        let path0 = d0.handle.location().full_path().unwrap();
        let path1 = d1.handle.location().full_path().unwrap();
        let pathp = dp.handle.location().full_path().unwrap();
        let mut loc0 = d0.handle.location().clone();
        let mut loc1 = d1.handle.location().clone();
        let mut locp = dp.handle.location().clone();
        adapter.close(d0.handle, OpenFlags::default()).unwrap();
        adapter.close(d1.handle, OpenFlags::default()).unwrap();
        adapter.close(dp.handle, OpenFlags::default()).unwrap();

        let mut locs = [loc0.clone(), loc1.clone(), locp.clone()];
        delete_split(&adapter, &mut locs, ["tape", "dir", "dir"], MapperKind::Clean).unwrap();
        loc0 = locs[0].clone();
        loc1 = locs[1].clone();
        locp = locs[2].clone();
        let _ = (&loc0, &loc1, &locp);

        assert!(path0.exists(), "tape-family extent must not be hard-deleted");
        assert!(!path1.exists());
        assert!(!pathp.exists());
    }
}
