// vim: tw=80
//! POSIX-directory flavour of the I/O Adapter: plain files under a
//! directory tree, extended attributes under the `user.` prefix.

use std::{
    collections::BTreeMap,
    fs::{self, File, OpenOptions},
    io::{Read, Write},
    os::unix::{
        fs::{DirBuilderExt, OpenOptionsExt},
        io::AsRawFd,
    },
    path::Path,
};

use xattr::FileExt;

use crate::{
    error::{Error, ErrorKind, Result},
    io_adapter::{ExtentLocation, IoAdapter, IoHandle, MapperKind, OpenFlags},
};

/// Consecutive zero-byte writes tolerated before `write` gives up and
/// reports `ShortWrite` (`spec.md` §4.2).
const MAX_ZERO_WRITES: u32 = 10;

/// Permission bits for directories created on the put path.
const DIR_MODE: u32 = 0o750;

pub struct PosixHandle {
    file: Option<File>,
    loc: ExtentLocation,
    md_only: bool,
}

impl IoHandle for PosixHandle {
    fn location(&self) -> &ExtentLocation {
        &self.loc
    }

    fn is_md_only(&self) -> bool {
        self.md_only
    }
}

impl PosixHandle {
    fn file(&mut self) -> Result<&mut File> {
        self.file.as_mut().ok_or_else(|| Error::io_failed("extent handle already released"))
    }
}

/// Tolerate an xattr error that just means "not present" — Linux reports
/// this as `ENODATA`, which `std::io::Error` surfaces as `ErrorKind::Other`
/// with that raw OS error code.
fn tolerate_missing_xattr(e: std::io::Error) -> Result<()> {
    const ENODATA: i32 = 61;
    match e.raw_os_error() {
        Some(ENODATA) => Ok(()),
        _ => Err(e.into()),
    }
}

#[derive(Clone, Copy, Debug)]
pub struct PosixAdapter {
    mapper_kind: MapperKind,
}

impl PosixAdapter {
    pub fn new(mapper_kind: MapperKind) -> Self {
        PosixAdapter { mapper_kind }
    }

    fn resolve_address(&self, loc: &mut ExtentLocation) -> Result<()> {
        if loc.address.is_none() {
            let addr = self.mapper_kind.resolve(&loc.obj_id, &loc.ext_tag)?;
            loc.address = Some(addr);
        }
        Ok(())
    }

    fn create_parents(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::DirBuilder::new()
                .recursive(true)
                .mode(DIR_MODE)
                .create(parent)
                .or_else(|e| if e.kind() == std::io::ErrorKind::AlreadyExists { Ok(()) } else { Err(e) })?;
        }
        Ok(())
    }

    fn drop_caches(file: &File) {
        let fd = file.as_raw_fd();
        // Best-effort: failures here are warnings, never operation failures
        // (`spec.md` §7: "fadvise failures ... are logged but do not fail
        // the operation").
        unsafe {
            if libc::posix_fadvise(fd, 0, 0, libc::POSIX_FADV_DONTNEED) != 0 {
                tracing::warn!("posix_fadvise(DONTNEED) failed");
            }
            if libc::posix_fadvise(fd, 0, 0, libc::POSIX_FADV_NOREUSE) != 0 {
                tracing::warn!("posix_fadvise(NOREUSE) failed");
            }
        }
    }
}

impl IoAdapter for PosixAdapter {
    type Handle = PosixHandle;

    fn open(&self, mut loc: ExtentLocation, flags: OpenFlags, is_put: bool) -> Result<Self::Handle> {
        if is_put {
            self.resolve_address(&mut loc)?;
        }
        let path = loc.full_path().ok_or_else(|| Error::invalid_input("extent address not set"))?;

        if flags.md_only {
            let file = OpenOptions::new().read(true).open(&path)?;
            return Ok(PosixHandle { file: Some(file), loc, md_only: true });
        }

        let file = if is_put {
            Self::create_parents(&path)?;
            let mut opts = OpenOptions::new();
            opts.write(true).create(true);
            if !flags.replace {
                opts.custom_flags(libc::O_EXCL);
            }
            opts.open(&path)?
        } else {
            OpenOptions::new().read(true).open(&path)?
        };
        Ok(PosixHandle { file: Some(file), loc, md_only: false })
    }

    fn write(&self, handle: &mut Self::Handle, buf: &[u8]) -> Result<usize> {
        let path = handle.loc.full_path();
        let mut written = 0usize;
        let mut zero_streak = 0u32;
        let result = loop {
            if written >= buf.len() {
                break Ok(written);
            }
            let file = match handle.file() {
                Ok(f) => f,
                Err(e) => break Err(e),
            };
            match file.write(&buf[written..]) {
                Ok(0) => {
                    zero_streak += 1;
                    if zero_streak >= MAX_ZERO_WRITES {
                        break Err(Error::short_write());
                    }
                }
                Ok(n) => {
                    written += n;
                    zero_streak = 0;
                }
                Err(e) => break Err(e.into()),
            }
        };
        if result.is_err() {
            // Any write failure unlinks the extent and releases the handle.
            if let Some(p) = &path {
                let _ = fs::remove_file(p);
            }
            handle.file = None;
        }
        result
    }

    fn read(&self, handle: &mut Self::Handle, buf: &mut [u8]) -> Result<usize> {
        let file = handle.file()?;
        Ok(file.read(buf)?)
    }

    fn close(&self, mut handle: Self::Handle, flags: OpenFlags) -> Result<()> {
        if let Some(file) = handle.file.take() {
            if flags.sync {
                file.sync_all()?;
            }
            Self::drop_caches(&file);
            // file closes on drop
        }
        Ok(())
    }

    fn del(&self, loc: &mut ExtentLocation, mapper: MapperKind) -> Result<()> {
        if loc.address.is_none() {
            tracing::warn!(obj_id = %loc.obj_id, ext_tag = %loc.ext_tag,
                "extent address missing on delete; regenerating via mapper");
            loc.address = Some(mapper.resolve(&loc.obj_id, &loc.ext_tag)?);
        }
        let path = loc.full_path().unwrap();
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn medium_sync(&self, root: &Path) -> Result<()> {
        let dir = File::open(root)?;
        let rc = unsafe { libc::syncfs(dir.as_raw_fd()) };
        if rc != 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(())
    }

    fn set_md(&self, handle: &Self::Handle, attrs: &BTreeMap<String, String>, flags: OpenFlags) -> Result<()> {
        let file = handle.file.as_ref().ok_or_else(|| Error::io_failed("extent handle already released"))?;
        for (key, value) in attrs {
            let name = format!("user.{key}");
            if !flags.replace && file.get_xattr(&name)?.is_some() {
                return Err(Error::invalid_input(format!("attribute {name} already exists")));
            }
            file.set_xattr(&name, value.as_bytes())?;
        }
        Ok(())
    }

    fn get_md(&self, loc: &ExtentLocation, keys: &[String]) -> Result<BTreeMap<String, String>> {
        let path = loc.full_path().ok_or_else(|| Error::invalid_input("extent address not set"))?;
        let file = File::open(&path)?;
        let mut out = BTreeMap::new();
        for key in keys {
            let name = format!("user.{key}");
            if let Some(value) = file.get_xattr(&name)? {
                out.insert(key.clone(), String::from_utf8_lossy(&value).into_owned());
            }
        }
        Ok(out)
    }

    fn del_md(&self, handle: &Self::Handle, keys: &[String]) -> Result<()> {
        let file = handle.file.as_ref().ok_or_else(|| Error::io_failed("extent handle already released"))?;
        for key in keys {
            let name = format!("user.{key}");
            if let Err(e) = file.remove_xattr(&name) {
                tolerate_missing_xattr(e)?;
            }
        }
        Ok(())
    }

    fn mapper_kind(&self) -> MapperKind {
        self.mapper_kind
    }
}
