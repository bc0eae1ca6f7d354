//! Type-safe file status model.
//!
//! This module defines the status classification stored by the cache and the raw
//! backend record it is derived from.
//!
//! # Public API
//! - [`FileStatus`]: exactly one primary classification per file
//! - [`StatusFlags`]: orthogonal lock/remote/property bits
//! - [`StatusMask`]: bit set over both, used for listing and the reverse index
//! - [`StatusRecord`]: plain backend record with optional fields
//! - [`RepositoryHint`]: repository-side status supplied by a caller
//! - [`StatusInfo`]: immutable cached value with the equivalence rule

use crate::core::error::StatusCacheError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign, Not};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

/// Primary status of a file relative to its last-known repository state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileStatus {
    UpToDate,
    Modified,
    Added,
    /// Missing on disk without being scheduled for removal
    DeletedLocally,
    /// Scheduled for removal
    RemovedLocally,
    ConflictContent,
    ConflictTree,
    Merged,
    NewLocally,
    Excluded,
    NotManaged,
    /// Exists in the repository only, reported through a repository hint
    NewInRepository,
    Unknown,
}

impl FileStatus {
    pub const ALL: [FileStatus; 13] = [
        FileStatus::UpToDate,
        FileStatus::Modified,
        FileStatus::Added,
        FileStatus::DeletedLocally,
        FileStatus::RemovedLocally,
        FileStatus::ConflictContent,
        FileStatus::ConflictTree,
        FileStatus::Merged,
        FileStatus::NewLocally,
        FileStatus::Excluded,
        FileStatus::NotManaged,
        FileStatus::NewInRepository,
        FileStatus::Unknown,
    ];

    pub fn bit(self) -> StatusMask {
        let shift = match self {
            FileStatus::UpToDate => 0,
            FileStatus::Modified => 1,
            FileStatus::Added => 2,
            FileStatus::DeletedLocally => 3,
            FileStatus::RemovedLocally => 4,
            FileStatus::ConflictContent => 5,
            FileStatus::ConflictTree => 6,
            FileStatus::Merged => 7,
            FileStatus::NewLocally => 8,
            FileStatus::Excluded => 9,
            FileStatus::NotManaged => 10,
            FileStatus::NewInRepository => 11,
            FileStatus::Unknown => 12,
        };
        StatusMask(1 << shift)
    }

    /// Short status code for listings
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::UpToDate => "-",
            FileStatus::Modified => "M",
            FileStatus::Added => "A",
            FileStatus::DeletedLocally => "!",
            FileStatus::RemovedLocally => "D",
            FileStatus::ConflictContent => "C",
            FileStatus::ConflictTree => "T",
            FileStatus::Merged => "G",
            FileStatus::NewLocally => "?",
            FileStatus::Excluded => "I",
            FileStatus::NotManaged => "X",
            FileStatus::NewInRepository => "N",
            FileStatus::Unknown => " ",
        }
    }

    /// Get human-readable description for status
    pub fn description(&self) -> &'static str {
        match self {
            FileStatus::UpToDate => "up-to-date",
            FileStatus::Modified => "modified",
            FileStatus::Added => "added",
            FileStatus::DeletedLocally => "deleted",
            FileStatus::RemovedLocally => "removed",
            FileStatus::ConflictContent => "conflict",
            FileStatus::ConflictTree => "tree-conflict",
            FileStatus::Merged => "merged",
            FileStatus::NewLocally => "new",
            FileStatus::Excluded => "ignored",
            FileStatus::NotManaged => "not-managed",
            FileStatus::NewInRepository => "remotely-new",
            FileStatus::Unknown => "unknown",
        }
    }

    pub fn is_versioned(&self) -> bool {
        !matches!(
            self,
            FileStatus::NewLocally
                | FileStatus::Excluded
                | FileStatus::NotManaged
                | FileStatus::NewInRepository
                | FileStatus::Unknown
        )
    }

    /// Directory disappearance/reappearance states that invalidate children
    pub fn is_deletion(&self) -> bool {
        matches!(self, FileStatus::DeletedLocally | FileStatus::RemovedLocally)
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

impl FromStr for FileStatus {
    type Err = StatusCacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        FileStatus::ALL
            .iter()
            .copied()
            .find(|status| status.description() == name)
            .ok_or_else(|| StatusCacheError::invalid_status_name(s))
    }
}

/// Orthogonal status bits carried alongside the primary status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct StatusFlags {
    pub locked: bool,
    pub locked_remotely: bool,
    pub remote_modified: bool,
    pub remote_removed: bool,
    pub property_modified: bool,
}

impl StatusFlags {
    pub const LOCKED: StatusMask = StatusMask(1 << 16);
    pub const LOCKED_REMOTELY: StatusMask = StatusMask(1 << 17);
    pub const REMOTE_MODIFIED: StatusMask = StatusMask(1 << 18);
    pub const REMOTE_REMOVED: StatusMask = StatusMask(1 << 19);
    pub const PROPERTY_MODIFIED: StatusMask = StatusMask(1 << 20);

    pub fn mask(&self) -> StatusMask {
        let mut mask = StatusMask::NONE;
        if self.locked {
            mask |= Self::LOCKED;
        }
        if self.locked_remotely {
            mask |= Self::LOCKED_REMOTELY;
        }
        if self.remote_modified {
            mask |= Self::REMOTE_MODIFIED;
        }
        if self.remote_removed {
            mask |= Self::REMOTE_REMOVED;
        }
        if self.property_modified {
            mask |= Self::PROPERTY_MODIFIED;
        }
        mask
    }

    pub fn is_empty(&self) -> bool {
        self.mask().is_empty()
    }
}

/// Bit set over [`FileStatus`] bits and [`StatusFlags`] bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct StatusMask(u32);

impl StatusMask {
    pub const NONE: StatusMask = StatusMask(0);
    pub const ALL: StatusMask = StatusMask(u32::MAX);

    /// Statuses that count as a local change for commit purposes
    pub const LOCAL_CHANGE: StatusMask = StatusMask(
        (1 << 1) | (1 << 2) | (1 << 3) | (1 << 4) | (1 << 5) | (1 << 6) | (1 << 7) | (1 << 8)
            | (1 << 20),
    );

    pub const NOT_VERSIONED: StatusMask = StatusMask((1 << 8) | (1 << 9) | (1 << 10));

    /// Everything except up-to-date files
    pub const INTERESTING: StatusMask = StatusMask(!1);

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn from_bits(bits: u32) -> Self {
        StatusMask(bits)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn intersects(self, other: StatusMask) -> bool {
        self.0 & other.0 != 0
    }

    /// Each set bit as its own single-bit mask
    pub fn single_bits(self) -> impl Iterator<Item = StatusMask> {
        (0..32u32)
            .map(|shift| 1u32 << shift)
            .filter(move |bit| self.0 & bit != 0)
            .map(StatusMask)
    }
}

impl BitOr for StatusMask {
    type Output = StatusMask;
    fn bitor(self, rhs: StatusMask) -> StatusMask {
        StatusMask(self.0 | rhs.0)
    }
}

impl BitOrAssign for StatusMask {
    fn bitor_assign(&mut self, rhs: StatusMask) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for StatusMask {
    type Output = StatusMask;
    fn bitand(self, rhs: StatusMask) -> StatusMask {
        StatusMask(self.0 & rhs.0)
    }
}

impl Not for StatusMask {
    type Output = StatusMask;
    fn not(self) -> StatusMask {
        StatusMask(!self.0)
    }
}

impl From<FileStatus> for StatusMask {
    fn from(status: FileStatus) -> Self {
        status.bit()
    }
}

/// Parses "modified,added" or the named groups "changes", "all", "interesting"
impl FromStr for StatusMask {
    type Err = StatusCacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut mask = StatusMask::NONE;
        for name in s.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            mask |= match name.to_ascii_lowercase().as_str() {
                "changes" => StatusMask::LOCAL_CHANGE,
                "all" => StatusMask::ALL,
                "interesting" => StatusMask::INTERESTING,
                "locked" => StatusFlags::LOCKED,
                "property-modified" => StatusFlags::PROPERTY_MODIFIED,
                _ => name.parse::<FileStatus>()?.bit(),
            };
        }
        Ok(mask)
    }
}

// --- Backend records -------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    File,
    Dir,
    Unknown,
}

/// Working-copy text status as reported by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextStatus {
    None,
    Normal,
    Modified,
    Added,
    Deleted,
    Missing,
    Replaced,
    Merged,
    Conflicted,
    Obstructed,
    Ignored,
    Unversioned,
    Incomplete,
    External,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropStatus {
    None,
    Normal,
    Modified,
    Conflicted,
}

/// Raw per-file record from the last backend query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub path: PathBuf,
    pub kind: NodeKind,
    pub text: TextStatus,
    pub props: PropStatus,
    pub tree_conflict: bool,
    pub copied: bool,
    pub url: Option<String>,
    pub revision: Option<String>,
    pub lock_owner: Option<String>,
}

impl StatusRecord {
    pub fn new(path: impl Into<PathBuf>, kind: NodeKind, text: TextStatus) -> Self {
        Self {
            path: path.into(),
            kind,
            text,
            props: PropStatus::None,
            tree_conflict: false,
            copied: false,
            url: None,
            revision: None,
            lock_owner: None,
        }
    }

    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(revision.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Revision comparison is meaningless for files that have none yet
    fn has_comparable_revision(&self) -> bool {
        !matches!(
            self.text,
            TextStatus::Ignored | TextStatus::Unversioned | TextStatus::Added
        )
    }

    /// Record equality as used by [`StatusInfo::is_equivalent`]
    pub fn is_equivalent(&self, other: &StatusRecord) -> bool {
        if self.has_comparable_revision() && self.revision != other.revision {
            return false;
        }
        self.copied == other.copied && self.url == other.url
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RemoteChange {
    None,
    Modified,
    Deleted,
    Added,
    Replaced,
}

/// Repository-side status supplied by a caller processing server output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryHint {
    pub text: RemoteChange,
    pub props_modified: bool,
    pub lock_owner: Option<String>,
    pub kind: NodeKind,
    /// The local record the hint came with; replaces the backend query
    pub local: Option<StatusRecord>,
}

impl RepositoryHint {
    pub fn new(text: RemoteChange, kind: NodeKind) -> Self {
        Self {
            text,
            props_modified: false,
            lock_owner: None,
            kind,
            local: None,
        }
    }

    pub fn with_local(mut self, record: StatusRecord) -> Self {
        self.local = Some(record);
        self
    }

    fn remote_flags(&self) -> StatusFlags {
        StatusFlags {
            remote_modified: self.text == RemoteChange::Modified || self.props_modified,
            remote_removed: self.text == RemoteChange::Deleted,
            locked_remotely: self.lock_owner.is_some(),
            ..StatusFlags::default()
        }
    }
}

// --- Cached value ------------------------------------------------------------

/// Immutable status value stored in the cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusInfo {
    status: FileStatus,
    flags: StatusFlags,
    entry: Option<Arc<StatusRecord>>,
    directory: bool,
}

impl StatusInfo {
    pub fn new(status: FileStatus, directory: bool) -> Self {
        Self {
            status,
            flags: StatusFlags::default(),
            entry: None,
            directory,
        }
    }

    pub fn with_flags(mut self, flags: StatusFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_entry(mut self, entry: StatusRecord) -> Self {
        self.entry = Some(Arc::new(entry));
        self
    }

    pub fn unknown() -> Self {
        Self::new(FileStatus::Unknown, false)
    }

    pub fn not_managed(directory: bool) -> Self {
        Self::new(FileStatus::NotManaged, directory)
    }

    pub fn status(&self) -> FileStatus {
        self.status
    }

    pub fn flags(&self) -> StatusFlags {
        self.flags
    }

    pub fn entry(&self) -> Option<&StatusRecord> {
        self.entry.as_deref()
    }

    pub fn is_directory(&self) -> bool {
        self.directory
    }

    /// Primary status bit together with every flag bit
    pub fn mask(&self) -> StatusMask {
        self.status.bit() | self.flags.mask()
    }

    pub fn matches(&self, mask: StatusMask) -> bool {
        self.mask().intersects(mask)
    }

    pub fn lock_owner(&self) -> Option<&str> {
        self.entry().and_then(|e| e.lock_owner.as_deref())
    }

    pub fn url(&self) -> Option<&str> {
        self.entry().and_then(|e| e.url.as_deref())
    }

    /// Sparse storage: up-to-date plain files and unknown files are never kept
    pub fn is_storable(&self) -> bool {
        match self.status {
            FileStatus::Unknown => false,
            FileStatus::UpToDate => self.directory || !self.flags.is_empty(),
            _ => true,
        }
    }

    /// Same status, directory flag and (where comparable) backing entry
    pub fn is_equivalent(&self, other: &StatusInfo) -> bool {
        if self.status != other.status
            || self.directory != other.directory
            || self.flags != other.flags
        {
            return false;
        }
        match (&self.entry, &other.entry) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b) || a.is_equivalent(b),
            _ => true,
        }
    }

    /// Same info with its record carrying a different revision
    pub fn with_patched_revision(&self, revision: &str) -> Option<StatusInfo> {
        let entry = self.entry()?;
        if entry.revision.as_deref() == Some(revision) || entry.revision.is_none() {
            return None;
        }
        let mut patched = entry.clone();
        patched.revision = Some(revision.to_string());
        Some(StatusInfo {
            entry: Some(Arc::new(patched)),
            ..self.clone()
        })
    }

    /// Derive the cached status from a versioned backend record.
    ///
    /// Returns `None` for records that say "not versioned"; those are
    /// classified from local filesystem facts instead.
    pub fn from_record(record: StatusRecord, hint: Option<&RepositoryHint>) -> Option<StatusInfo> {
        let directory = record.kind == NodeKind::Dir;
        let mut flags = hint.map(RepositoryHint::remote_flags).unwrap_or_default();
        flags.locked = record.lock_owner.is_some();

        let status = match record.props {
            PropStatus::Conflicted => Some(FileStatus::ConflictContent),
            PropStatus::Modified => {
                flags.property_modified = true;
                None
            }
            PropStatus::None | PropStatus::Normal => None,
        };

        let status = match status {
            Some(status) => status,
            None if record.tree_conflict => FileStatus::ConflictTree,
            None => match record.text {
                TextStatus::None => return Some(StatusInfo::unknown()),
                TextStatus::Normal | TextStatus::External => FileStatus::UpToDate,
                TextStatus::Modified => FileStatus::Modified,
                TextStatus::Added | TextStatus::Replaced => FileStatus::Added,
                TextStatus::Deleted => FileStatus::RemovedLocally,
                TextStatus::Missing => FileStatus::DeletedLocally,
                TextStatus::Merged => FileStatus::Merged,
                TextStatus::Conflicted | TextStatus::Obstructed | TextStatus::Incomplete => {
                    FileStatus::ConflictContent
                }
                TextStatus::Ignored => {
                    flags.property_modified = false;
                    FileStatus::Excluded
                }
                TextStatus::Unversioned => return None,
            },
        };

        Some(StatusInfo {
            status,
            flags,
            entry: Some(Arc::new(record)),
            directory,
        })
    }
}

impl fmt::Display for StatusInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.status)?;
        if self.flags.locked {
            write!(f, " [locked]")?;
        }
        if self.flags.property_modified {
            write!(f, " [props]")?;
        }
        if self.flags.remote_modified || self.flags.remote_removed {
            write!(f, " [remote]")?;
        }
        Ok(())
    }
}
