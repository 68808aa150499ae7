// vim: tw=80
//! Operator configuration, loaded from TOML (`spec.md` §6: "Configuration
//! keys consumed").
//!
//! Only the keys the layout engine itself reads are modeled as live fields;
//! the two `hsm.*` thresholds are carried as inert passthrough data for the
//! companion release tool this crate does not implement (`SPEC_FULL.md`
//! §2's ambient-stack note).

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    hash::HashConfig,
};

/// `[layout_raid4]` section: the four keys `spec.md` §6 names.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutRaid4Config {
    pub extent_xxh128: bool,
    pub extent_md5: bool,
    pub check_hash: bool,
}

impl Default for LayoutRaid4Config {
    fn default() -> Self {
        // XXH128 is always available in this crate (the `xxhash-rust` crate
        // has no optional system dependency), so it defaults on; MD5 is the
        // heavier legacy choice and defaults off.
        LayoutRaid4Config { extent_xxh128: true, extent_md5: false, check_hash: true }
    }
}

impl From<LayoutRaid4Config> for HashConfig {
    fn from(c: LayoutRaid4Config) -> Self {
        HashConfig { use_md5: c.extent_md5, use_xxh128: c.extent_xxh128 }
    }
}

/// `[hsm]` section: passthrough knobs for the release tool this crate
/// doesn't implement (`spec.md` §1's "out of scope" list names the HSM
/// release tool explicitly).
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct HsmConfig {
    pub release_delay_second: u32,
    pub dir_release_higher_threshold: u8,
    pub dir_release_lower_threshold: u8,
}

impl Default for HsmConfig {
    fn default() -> Self {
        HsmConfig {
            release_delay_second: 0,
            dir_release_higher_threshold: 90,
            dir_release_lower_threshold: 70,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub layout_raid4: LayoutRaid4Config,
    pub hsm: HsmConfig,
}

impl Config {
    /// Load a config from a TOML file on disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::invalid_input(format!("reading config: {e}")))?;
        Self::parse(&text)
    }

    /// Parse a config from a TOML string, for callers that don't hold a
    /// path (e.g. embedded defaults, tests).
    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::invalid_input(format!("parsing config: {e}")))
    }
}

#[cfg(test)]
mod t {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let c = Config::default();
        assert!(c.layout_raid4.extent_xxh128);
        assert!(!c.layout_raid4.extent_md5);
        assert!(c.layout_raid4.check_hash);
    }

    #[test]
    fn parses_partial_overrides() {
        let c = Config::parse(
            r#"
            [layout_raid4]
            extent_md5 = true
            check_hash = false
            "#,
        )
        .unwrap();
        assert!(c.layout_raid4.extent_md5);
        assert!(!c.layout_raid4.check_hash);
        // xxh128 not mentioned, falls back to its own default.
        assert!(c.layout_raid4.extent_xxh128);
    }

    #[test]
    fn rejects_malformed_toml() {
        let err = Config::parse("not = [valid").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidInput);
    }
}
