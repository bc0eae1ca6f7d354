//! Reverse index from status bit to the files carrying it.

use crate::core::file_ref::FileRef;
use crate::core::status::{StatusInfo, StatusMask};
use std::collections::{BTreeSet, HashMap};
use std::ops::Bound;

/// Status bit -> files, derived from the directory entries.
///
/// Sets are ordered by path so that everything beneath a root is a single
/// contiguous range starting right after the root.
#[derive(Debug, Default, Clone)]
pub struct ReverseIndex {
    by_bit: HashMap<u32, BTreeSet<FileRef>>,
}

impl ReverseIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, file: &FileRef, info: &StatusInfo) {
        for bit in info.mask().single_bits() {
            self.by_bit
                .entry(bit.bits())
                .or_default()
                .insert(file.clone());
        }
    }

    /// Drop `file` from the sets named by `info`
    pub fn remove(&mut self, file: &FileRef, info: &StatusInfo) {
        for bit in info.mask().single_bits() {
            if let Some(set) = self.by_bit.get_mut(&bit.bits()) {
                set.remove(file);
                if set.is_empty() {
                    self.by_bit.remove(&bit.bits());
                }
            }
        }
    }

    /// Replace the indexed value of `file`
    pub fn update(&mut self, file: &FileRef, old: Option<&StatusInfo>, new: Option<&StatusInfo>) {
        if let Some(old) = old {
            self.remove(file, old);
        }
        if let Some(new) = new {
            self.insert(file, new);
        }
    }

    /// Strict descendants of `root` whose status intersects `mask`
    pub fn files_under(&self, root: &FileRef, mask: StatusMask) -> BTreeSet<FileRef> {
        let mut found = BTreeSet::new();
        for bit in mask.single_bits() {
            if let Some(set) = self.by_bit.get(&bit.bits()) {
                found.extend(descendants(set, root).cloned());
            }
        }
        found
    }

    pub fn any_under(&self, root: &FileRef, mask: StatusMask) -> bool {
        mask.single_bits().any(|bit| {
            self.by_bit
                .get(&bit.bits())
                .is_some_and(|set| descendants(set, root).next().is_some())
        })
    }

    /// Every indexed file carrying a bit of `mask`
    pub fn all_files(&self, mask: StatusMask) -> BTreeSet<FileRef> {
        mask.single_bits()
            .filter_map(|bit| self.by_bit.get(&bit.bits()))
            .flat_map(|set| set.iter().cloned())
            .collect()
    }

    pub fn rebuild<'a>(&mut self, entries: impl IntoIterator<Item = (&'a FileRef, &'a StatusInfo)>) {
        self.by_bit.clear();
        for (file, info) in entries {
            self.insert(file, info);
        }
    }

    /// Number of (bit, file) pairs
    pub fn len(&self) -> usize {
        self.by_bit.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_bit.is_empty()
    }
}

fn descendants<'a>(
    set: &'a BTreeSet<FileRef>,
    root: &'a FileRef,
) -> impl Iterator<Item = &'a FileRef> + 'a {
    set.range((Bound::Excluded(root), Bound::Unbounded))
        .take_while(move |file| file.is_under(root))
}
