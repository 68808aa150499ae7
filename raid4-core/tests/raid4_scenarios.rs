// vim: tw=80
//! End-to-end scenarios S1-S6 from `spec.md` §8, driven the way a real
//! scheduler would: answer each `Request` the processor emits, feed the
//! matching response back in, repeat until done.

use std::io::Cursor;

use raid4_core::{
    error::ErrorKind,
    hash::HashConfig,
    io_adapter::{posix::PosixAdapter, MapperKind},
    mapper,
    processor::{
        DeleteAllocResponse, EraseProcessor, ExtentLease, MediumGrant, ReadAllocResponse,
        ReadProcessor, Request, Response, ReleaseResponse, WriteAllocResponse, WriteProcessor,
    },
    types::PhoId,
};
use tempfile::tempdir;

fn media(root: &std::path::Path) -> [(PhoId, std::path::PathBuf); 3] {
    ["m0", "m1", "m2"].map(|n| {
        let p = root.join(n);
        std::fs::create_dir_all(&p).unwrap();
        (PhoId::new("dir", n, "lib"), p)
    })
}

fn drive_write(proc: &mut WriteProcessor<PosixAdapter>, roots: &[(PhoId, std::path::PathBuf); 3]) {
    let mut pending: Option<Response> = None;
    loop {
        let (reqs, done) = proc.step(pending.take()).unwrap();
        if done {
            return;
        }
        for req in reqs {
            match req {
                Request::WriteAlloc(r) => {
                    let media = roots
                        .iter()
                        .map(|(m, p)| MediumGrant { medium: m.clone(), fs_root: p.display().to_string(), avail_size: r.size.max(1) })
                        .collect();
                    proc.on_write_alloc_response(WriteAllocResponse { media }).unwrap();
                }
                Request::Release(r) => {
                    let (more, release_done) = proc
                        .step(Some(Response::Release(ReleaseResponse { medium: r.medium, rc: r.rc })))
                        .unwrap();
                    assert!(more.is_empty());
                    if release_done {
                        return;
                    }
                }
                other => panic!("unexpected request from writer: {other:?}"),
            }
        }
    }
}

fn drive_read(proc: &mut ReadProcessor<PosixAdapter>, root: &std::path::Path) -> raid4_core::error::Result<()> {
    loop {
        let (reqs, done) = proc.step(None)?;
        if done {
            return Ok(());
        }
        for req in reqs {
            match req {
                Request::ReadAlloc(r) => {
                    let extents = r
                        .media_id
                        .iter()
                        .map(|m| ExtentLease { medium: m.clone(), fs_root: root.join(&m.name).display().to_string() })
                        .collect();
                    proc.on_read_alloc_response(ReadAllocResponse { extents })?;
                }
                other => panic!("unexpected request from reader: {other:?}"),
            }
        }
    }
}

fn drive_erase(proc: &mut EraseProcessor<PosixAdapter>, root: &std::path::Path) {
    loop {
        let (reqs, done) = proc.step(None).unwrap();
        if done {
            return;
        }
        for req in reqs {
            match req {
                Request::DeleteAlloc(r) => {
                    let fs_root = r.media_id.iter().map(|m| root.join(&m.name).display().to_string()).collect();
                    proc.on_delete_alloc_response(DeleteAllocResponse { fs_root }).unwrap();
                }
                other => panic!("unexpected request from eraser: {other:?}"),
            }
        }
    }
}

fn put_object(root: &std::path::Path, object_id: &str, bytes: &[u8], chunk_size: usize) -> raid4_core::types::Layout {
    let roots = media(root);
    let adapter = PosixAdapter::new(MapperKind::Clean);
    let config = HashConfig { use_md5: true, use_xxh128: true };
    let mut proc = WriteProcessor::new(
        adapter,
        object_id,
        bytes.len() as u64,
        chunk_size,
        config,
        "dir",
        Vec::new(),
        Box::new(Cursor::new(bytes.to_vec())),
    );
    drive_write(&mut proc, &roots);
    proc.layout().clone()
}

#[test]
fn s1_round_trip_aligned() {
    let dir = tempdir().unwrap();
    let object: Vec<u8> = (0..1_048_576u32).map(|i| (i % 256) as u8).collect();
    let layout = put_object(dir.path(), "obj-s1", &object, 65_536);

    assert_eq!(layout.extents.len(), 3);
    assert_eq!(layout.extents[0].size, 524_288);
    assert_eq!(layout.extents[1].size, 524_288);
    assert_eq!(layout.extents[2].size, 524_288);
    assert!(layout.extents.iter().all(|e| e.md5.is_some() && e.xxh128.is_some()));

    let mut out = Vec::new();
    let adapter = PosixAdapter::new(MapperKind::Clean);
    let mut reader = ReadProcessor::new(adapter, layout, vec![[0, 1]], true, Box::new(std::io::Cursor::new(&mut out)));
    drive_read(&mut reader, dir.path()).unwrap();
    assert_eq!(out, object);
}

#[test]
fn s2_round_trip_odd_size() {
    let dir = tempdir().unwrap();
    let mut object: Vec<u8> = (0..1_048_576u32).map(|i| (i % 256) as u8).collect();
    object.push(0x42);
    let layout = put_object(dir.path(), "obj-s2", &object, 65_536);

    assert_eq!(layout.extents[0].size, 524_289);
    assert_eq!(layout.extents[1].size, 524_288);
    assert_eq!(layout.extents[2].size, 524_289);

    let mut out = Vec::new();
    let adapter = PosixAdapter::new(MapperKind::Clean);
    let mut reader = ReadProcessor::new(adapter, layout, vec![[0, 1]], true, Box::new(std::io::Cursor::new(&mut out)));
    drive_read(&mut reader, dir.path()).unwrap();
    assert_eq!(out, object);
}

#[test]
fn s3_reconstruct_without_data1() {
    let dir = tempdir().unwrap();
    let object: Vec<u8> = (0..1_048_576u32).map(|i| (i % 256) as u8).collect();
    let layout = put_object(dir.path(), "obj-s3", &object, 65_536);

    let mut out = Vec::new();
    let adapter = PosixAdapter::new(MapperKind::Clean);
    // Present pair [0, 2]: data-0 and parity only.
    let mut reader = ReadProcessor::new(adapter, layout, vec![[0, 2]], true, Box::new(std::io::Cursor::new(&mut out)));
    drive_read(&mut reader, dir.path()).unwrap();
    assert_eq!(out, object);
}

#[test]
fn s4_reconstruct_without_data0() {
    let dir = tempdir().unwrap();
    let mut object: Vec<u8> = (0..1_048_576u32).map(|i| (i % 256) as u8).collect();
    object.push(0x7a);
    let layout = put_object(dir.path(), "obj-s4", &object, 65_536);

    let mut out = Vec::new();
    let adapter = PosixAdapter::new(MapperKind::Clean);
    // Present pair [1, 2]: data-1 and parity only; parity is consumed first.
    let mut reader = ReadProcessor::new(adapter, layout, vec![[1, 2]], true, Box::new(std::io::Cursor::new(&mut out)));
    drive_read(&mut reader, dir.path()).unwrap();
    assert_eq!(out, object);
}

#[test]
fn s5_mapper_known_vectors() {
    let p = mapper::clean_path("my file;1", "p2", 64).unwrap();
    assert_eq!(p, "my_file_1.p2");

    let p = mapper::hash1("abc", "p0", 64).unwrap();
    assert!(p.starts_with("a9/99/"));
}

#[test]
fn s6_hash_mismatch_aborts_read_with_check_enabled() {
    let dir = tempdir().unwrap();
    let object: Vec<u8> = (0..1_048_576u32).map(|i| (i % 256) as u8).collect();
    let layout = put_object(dir.path(), "obj-s6", &object, 65_536);

    // Flip one byte of data-0 on disk.
    let addr = layout.extents[0].address.clone();
    let path = dir.path().join("m0").join(&addr);
    let mut bytes = std::fs::read(&path).unwrap();
    bytes[0] ^= 0xff;
    std::fs::write(&path, &bytes).unwrap();

    let adapter = PosixAdapter::new(MapperKind::Clean);
    let mut out = Vec::new();
    let mut reader = ReadProcessor::new(
        adapter,
        layout.clone(),
        vec![[0, 1]],
        true,
        Box::new(std::io::Cursor::new(&mut out)),
    );
    let err = drive_read(&mut reader, dir.path()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::HashMismatch);

    // With check_hash disabled, data-1 is still recoverable via parity even
    // though data-0 itself is now corrupt on the direct path... here we
    // exercise the degraded read instead, which never touches the flipped
    // data-0 bytes for reconstruction.
    let adapter2 = PosixAdapter::new(MapperKind::Clean);
    let mut out2 = Vec::new();
    let mut degraded = ReadProcessor::new(
        adapter2,
        layout,
        vec![[1, 2]],
        false,
        Box::new(std::io::Cursor::new(&mut out2)),
    );
    drive_read(&mut degraded, dir.path()).unwrap();
    assert_eq!(out2, object);
}

#[test]
fn delete_removes_all_extents() {
    let dir = tempdir().unwrap();
    let object = vec![0xEEu8; 4096];
    let layout = put_object(dir.path(), "obj-del", &object, 1024);
    let paths: Vec<_> = layout
        .extents
        .iter()
        .enumerate()
        .map(|(i, e)| dir.path().join(format!("m{i}")).join(&e.address))
        .collect();
    assert!(paths.iter().all(|p| p.exists()));

    let adapter = PosixAdapter::new(MapperKind::Clean);
    let mut eraser = EraseProcessor::new(adapter, layout);
    drive_erase(&mut eraser, dir.path());

    assert!(paths.iter().all(|p| !p.exists()));
}
