// vim: tw=80
//! Streaming hash accumulation for extents.
//!
//! Each extent being written (or, on read, each data extent when checking is
//! enabled) gets one `HashAccumulator`.  It wraps whichever of MD5/XXH128 are
//! configured, feeds them bytes as they flow through the buffer, and at the
//! end of the extent produces digests that get stashed on the `Extent`
//! record or compared against what's already there.

use md5::{Digest, Md5};
use xxhash_rust::xxh3::Xxh3;

use crate::{
    error::{Error, Result},
    types::Extent,
};

/// Which digests to compute for a given extent.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct HashConfig {
    pub use_md5: bool,
    pub use_xxh128: bool,
}

impl HashConfig {
    pub fn none() -> Self {
        HashConfig { use_md5: false, use_xxh128: false }
    }

    pub fn is_enabled(self) -> bool {
        self.use_md5 || self.use_xxh128
    }
}

/// A streaming hash accumulator for a single extent.
#[derive(Clone, Default)]
pub struct HashAccumulator {
    config: HashConfig,
    md5: Option<Md5>,
    xxh128: Option<Xxh3>,
}

impl HashAccumulator {
    /// `init`: create an accumulator configured per `config`.
    pub fn init(config: HashConfig) -> Self {
        HashAccumulator {
            config,
            md5: config.use_md5.then(Md5::new),
            xxh128: config.use_xxh128.then(Xxh3::new),
        }
    }

    /// `update`: feed another run of physical bytes into the accumulator.
    pub fn update(&mut self, bytes: &[u8]) {
        if let Some(md5) = self.md5.as_mut() {
            md5.update(bytes);
        }
        if let Some(xxh) = self.xxh128.as_mut() {
            xxh.update(bytes);
        }
    }

    /// `digest`: finalize, consuming the accumulator.
    pub fn digest(self) -> Digests {
        Digests {
            md5: self.md5.map(|h| h.finalize().into()),
            xxh128: self.xxh128.map(|h| h.digest128().to_be_bytes()),
        }
    }

    /// `finish`: finalize a clone, leaving the original accumulator usable.
    /// Useful when a caller needs the digest mid-stream without giving up
    /// ownership (e.g. comparing against a stored value while still holding
    /// the accumulator in a longer-lived struct).
    pub fn finish(&self) -> Digests {
        self.clone().digest()
    }

    /// `copy_to_extent`: finalize and stash the result on `extent`.
    pub fn copy_to_extent(self, extent: &mut Extent) {
        let digests = self.digest();
        extent.md5 = digests.md5;
        extent.xxh128 = digests.xxh128;
    }

    pub fn config(&self) -> HashConfig {
        self.config
    }
}

/// The finalized pair of digests an accumulator can produce.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Digests {
    pub md5: Option<[u8; 16]>,
    pub xxh128: Option<[u8; 16]>,
}

impl Digests {
    /// `compare`: fail with `HashMismatch` when a configured digest disagrees
    /// with `extent`'s stored one, or is missing from the extent record.
    pub fn compare(&self, extent: &Extent) -> Result<()> {
        if let Some(expected) = self.md5 {
            match extent.md5 {
                Some(stored) if stored == expected => {}
                Some(_) => return Err(Error::hash_mismatch("md5 digest mismatch")),
                None => return Err(Error::hash_mismatch("md5 digest missing from extent record")),
            }
        }
        if let Some(expected) = self.xxh128 {
            match extent.xxh128 {
                Some(stored) if stored == expected => {}
                Some(_) => return Err(Error::hash_mismatch("xxh128 digest mismatch")),
                None => return Err(Error::hash_mismatch("xxh128 digest missing from extent record")),
            }
        }
        Ok(())
    }
}
