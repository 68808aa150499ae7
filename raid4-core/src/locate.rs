// vim: tw=80
//! Locate: given an existing object's layout, pick the best host able to
//! read it and reserve media locks for that host (`spec.md` §4.7).
//!
//! The DSS (medium-lock directory) and the device inventory are both
//! external collaborators this crate treats as opaque — `MediaLocks` and the
//! plain `&[Device]` slice below stand in for them, the same "only the
//! contract matters" stance `spec.md` §1 takes for the DSS and LRS at large.

use std::collections::{HashMap, HashSet};

use crate::{
    error::{Error, Result},
    types::{Device, Layout, PhoId},
};

/// The distributed lock directory: `(family, name, library) -> hostname`.
/// `spec.md` §5: "a distributed lock maps `(family, name, library) ->
/// hostname` and is refreshed periodically."
pub trait MediaLocks {
    /// Current holder of `medium`'s lock, if any.
    fn holder(&self, medium: &PhoId) -> Option<String>;

    /// Reserve `medium`'s lock for `host`. Fails if another host holds it.
    fn lock(&mut self, medium: &PhoId, host: &str) -> Result<()>;

    /// Release a lock this call took. Idempotent.
    fn unlock(&mut self, medium: &PhoId, host: &str);
}

/// A tape-drive-model compatibility oracle: can `device` read/write a
/// medium whose model string is `medium_model`? POSIX directories and RADOS
/// pools are universally compatible with any "device" that targets their
/// family; only tape asks this question for real.
#[cfg_attr(test, mockall::automock)]
pub trait ModelCompat {
    fn compatible(&self, device: &Device, medium: &PhoId) -> bool;
}

/// Compatibility oracle for the common case: every device of a directory
/// or RADOS family is compatible with every medium of that family in the
/// same library. Tape setups should supply their own model table instead.
pub struct FamilyCompat;

impl ModelCompat for FamilyCompat {
    fn compatible(&self, _device: &Device, _medium: &PhoId) -> bool {
        true
    }
}

/// Number of data extents a read needs per split for this layout kind.
/// RAID4 tolerates the loss of exactly one of three, so `n_data == 2`.
pub const RAID4_N_DATA: usize = 2;

/// Run the six-step algorithm from `spec.md` §4.7 and return the chosen
/// host. Locks are not taken here; call [`reserve_locks`] with the result
/// to actually reserve and count them (step 6).
pub fn locate(
    layout: &Layout,
    devices: &[Device],
    locks: &dyn MediaLocks,
    compat: &dyn ModelCompat,
    n_data: usize,
    focus_host: &str,
) -> Result<String> {
    let n_splits = layout.n_splits();
    if n_splits == 0 {
        return Err(Error::no_route_to_object("layout has no splits"));
    }

    // Step 1/2: which hosts can reach which extents.
    // host -> set of extent layout_idx it can serve.
    let mut host_reach: HashMap<String, HashSet<u32>> = HashMap::new();
    let mut reachable_extents: HashSet<u32> = HashSet::new();
    for dev in devices {
        for extent in &layout.extents {
            if compat.compatible(dev, &extent.medium) {
                host_reach.entry(dev.host.clone()).or_default().insert(extent.layout_idx);
                reachable_extents.insert(extent.layout_idx);
            }
        }
    }

    // Step 3: any split with zero accessible extents is a dead end.
    for split in 0..n_splits {
        let (d0, d1, dp) = layout.split_extents(split).expect("split index in range");
        let any_reachable = [d0, d1, dp].iter().any(|e| reachable_extents.contains(&e.layout_idx));
        if !any_reachable {
            return Err(Error::no_route_to_object(format!("split {split} has no reachable extent")));
        }
    }

    // Step 4: drop hosts that can't field n_data compatible devices for
    // every split's extents.
    let mut candidates: Vec<String> = host_reach.keys().cloned().collect();
    candidates.retain(|host| {
        let reach = &host_reach[host];
        (0..n_splits).all(|split| {
            let (d0, d1, dp) = layout.split_extents(split).unwrap();
            let count = [d0, d1, dp].iter().filter(|e| reach.contains(&e.layout_idx)).count();
            count >= n_data
        })
    });
    if candidates.is_empty() {
        return Err(Error::no_route_to_object("no host has enough compatible devices for every split"));
    }

    // Step 5: prefer the host with the most existing locks on reachable
    // extents, ties broken toward `focus_host`.
    let existing_locks = |host: &str| -> usize {
        layout
            .extents
            .iter()
            .filter(|e| host_reach[host].contains(&e.layout_idx))
            .filter(|e| locks.holder(&e.medium).as_deref() == Some(host))
            .count()
    };
    candidates.sort_by(|a, b| {
        let la = existing_locks(a);
        let lb = existing_locks(b);
        lb.cmp(&la).then_with(|| (b == focus_host).cmp(&(a == focus_host)))
    });
    let chosen = candidates.into_iter().next().expect("non-empty after step 4");

    Ok(chosen)
}

/// Step 6: attempt to reserve missing locks on `host`, up to `n_data` per
/// split. On insufficient locks, unlocks anything newly acquired this call
/// and fails with `TryAgain`.
pub fn reserve_locks(
    layout: &Layout,
    host: &str,
    n_data: usize,
    locks: &mut dyn MediaLocks,
) -> Result<u32> {
    let mut newly_locked: Vec<PhoId> = Vec::new();
    let mut nb_new_locks = 0u32;

    for split in 0..layout.n_splits() {
        let (d0, d1, dp) = layout.split_extents(split).unwrap();
        let extents = [d0, d1, dp];
        let mut have = 0usize;
        let mut to_try: Vec<&PhoId> = Vec::new();
        for e in &extents {
            match locks.holder(&e.medium) {
                Some(h) if h == host => have += 1,
                Some(_other) => {} // held elsewhere, not usable
                None => to_try.push(&e.medium),
            }
        }
        for medium in to_try {
            if have >= n_data {
                break;
            }
            if locks.lock(medium, host).is_ok() {
                newly_locked.push(medium.clone());
                nb_new_locks += 1;
                have += 1;
            }
        }
        if have < n_data {
            for medium in &newly_locked {
                locks.unlock(medium, host);
            }
            return Err(Error::try_again(format!(
                "split {split}: only {have} of {n_data} required locks available on {host}"
            )));
        }
    }
    Ok(nb_new_locks)
}
