// vim: tw=80
//! Deterministic object-id-to-path resolution.
//!
//! Two schemes, selected by a medium's address type: `clean_path` sanitises
//! and truncates, `hash1` additionally shards the result two levels deep by
//! the first two bytes of `SHA1(obj_id)`.  Both are pure functions of their
//! inputs: same `(obj_id, ext_tag)` always produces the same path.

use sha1::{Digest, Sha1};

use crate::error::{Error, Result};

/// Characters the C core replaces with `_` when building a path component.
/// Whitespace and non-printable bytes are handled separately in `sanitise`.
const FORBIDDEN: &[u8] = b"`#$*?!|.;&<>[]{}'\"\\/";

fn sanitise(obj_id: &str) -> String {
    obj_id
        .chars()
        .map(|c| {
            if c.is_whitespace() || c.is_control() || (c.is_ascii() && FORBIDDEN.contains(&(c as u8))) {
                '_'
            } else {
                c
            }
        })
        .collect()
}

fn check_inputs(obj_id: &str, ext_tag: &str) -> Result<()> {
    if obj_id.is_empty() || ext_tag.is_empty() {
        return Err(Error::invalid_input(
            "object id and extent tag must be non-empty",
        ));
    }
    Ok(())
}

/// `"<sanitised(obj_id)>.<ext_tag>"`, truncated so the result is at most
/// `cap - 1` bytes long.
pub fn clean_path(obj_id: &str, ext_tag: &str, cap: usize) -> Result<String> {
    check_inputs(obj_id, ext_tag)?;
    if cap < ext_tag.len() + 2 {
        return Err(Error::invalid_input(format!(
            "destination capacity {cap} is too small for extent tag {ext_tag:?}"
        )));
    }
    Ok(build_clean(obj_id, ext_tag, cap))
}

fn build_clean(obj_id: &str, ext_tag: &str, cap: usize) -> String {
    let suffix_len = 1 + ext_tag.len(); // '.' + tag
    let budget = cap.saturating_sub(1); // leave room for the NUL the C API assumes
    let clean = sanitise(obj_id);
    let max_id_len = budget.saturating_sub(suffix_len);
    let truncated: String = clean.chars().take(max_id_len).collect();
    format!("{truncated}.{ext_tag}")
}

/// `hash1` shards `clean_path`'s output two levels deep by the first two
/// bytes (as hex) of `SHA1(obj_id)`.  The extent tag is *not* folded into the
/// hash — this is the spec's preserved historical quirk, not an oversight.
pub fn hash1(obj_id: &str, ext_tag: &str, cap: usize) -> Result<String> {
    check_inputs(obj_id, ext_tag)?;
    if cap < 8 + ext_tag.len() + 2 {
        return Err(Error::invalid_input(format!(
            "destination capacity {cap} is too small for a hash1 path with extent tag {ext_tag:?}"
        )));
    }
    let mut hasher = Sha1::new();
    hasher.update(obj_id.as_bytes());
    let digest = hasher.finalize();
    let prefix = format!("{:02x}/{:02x}", digest[0], digest[1]);
    let clean = build_clean(obj_id, ext_tag, cap - 8);
    Ok(format!("{prefix}/{clean}"))
}

#[cfg(test)]
mod t {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn clean_path_sanitises() {
        let p = clean_path("my file;1", "p2", 64).unwrap();
        assert_eq!(p, "my_file_1.p2");
    }

    #[test]
    fn clean_path_drops_forbidden_chars() {
        let p = clean_path("a/b\\c:d", "x", 64).unwrap();
        assert!(!p.contains('/') || p == "a_b_c:d.x");
        // '/' and '\\' are always replaced; ':' is not in the forbidden set.
        assert_eq!(p, "a_b_c:d.x");
    }

    #[test]
    fn clean_path_truncates() {
        let long_id = "x".repeat(100);
        let p = clean_path(&long_id, "p0", 20).unwrap();
        assert!(p.len() <= 19);
        assert!(p.ends_with(".p0"));
    }

    #[test]
    fn clean_path_rejects_empty() {
        assert_eq!(clean_path("", "p0", 64).unwrap_err().kind(), ErrorKind::InvalidInput);
        assert_eq!(clean_path("obj", "", 64).unwrap_err().kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn clean_path_rejects_tiny_cap() {
        let err = clean_path("obj", "p0", 2).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn clean_path_is_deterministic() {
        assert_eq!(clean_path("abc", "p0", 64), clean_path("abc", "p0", 64));
    }

    #[test]
    fn hash1_matches_known_vector() {
        // SHA1("abc") = a9993e364706816aba3e25717850c26c9cd0d89
        let p = hash1("abc", "p0", 64).unwrap();
        assert!(p.starts_with("a9/99/"));
        assert_eq!(p, "a9/99/abc.p0");
    }

    #[test]
    fn hash1_ignores_ext_tag_in_hash() {
        // Changing the tag must not change the sharding prefix.
        let p0 = hash1("abc", "p0", 64).unwrap();
        let p1 = hash1("abc", "p9", 64).unwrap();
        assert_eq!(&p0[..6], &p1[..6]);
    }

    #[test]
    fn hash1_rejects_tiny_cap() {
        let err = hash1("abc", "p0", 9).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn hash1_is_deterministic_and_idempotent() {
        let a = hash1("some-object-id", "d0", 128).unwrap();
        let b = hash1("some-object-id", "d0", 128).unwrap();
        assert_eq!(a, b);
    }
}
