#![forbid(unsafe_code)]
//! Filesystem abstraction shared by all shoalfs backends.
//!
//! Defines the [`FileSystem`], [`File`] and [`Watcher`] traits, the
//! [`OpenFlag`] and [`Mode`] bit sets, file [`Metadata`], the change
//! notification [`Event`] type, and generic utilities (tree walk, recursive
//! directory creation, glob matching, recursive watch) that work against any
//! backend.

use std::fmt;
use std::io::SeekFrom;
use std::ops::{BitAnd, BitOr, BitOrAssign};
use std::time::SystemTime;

use crossbeam_channel::Sender;

pub use shoal_error::{Error, ErrorKind, PathError, Result, is_exist, is_kind, is_not_exist};

mod glob;
pub mod path;
mod util;

pub use glob::{has_meta, match_pattern};
pub use util::{
    TreeWatcher, WalkState, glob, mkdir_all, read_dir_names, read_file, walk, watch_tree,
    write_file,
};

// ── Open flags ──────────────────────────────────────────────────────────────

/// Flags passed to [`FileSystem::open_file`] controlling how a file is
/// opened.
///
/// Exactly one of [`OpenFlag::RDONLY`], [`OpenFlag::WRONLY`] or
/// [`OpenFlag::RDWR`] is the access mode; `RDONLY` is the zero value, so an
/// empty flag set means read-only. The remaining bits may be or'ed in to
/// control behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct OpenFlag(u32);

impl OpenFlag {
    /// Open the file in read-only mode.
    pub const RDONLY: Self = Self(0);
    /// Open the file in write-only mode.
    pub const WRONLY: Self = Self(1);
    /// Open the file for reading and writing.
    pub const RDWR: Self = Self(1 << 1);
    /// Seek the open file to the end.
    pub const APPEND: Self = Self(1 << 2);
    /// Create the file if it does not exist.
    pub const CREATE: Self = Self(1 << 3);
    /// With [`OpenFlag::CREATE`], fail if the file already exists.
    pub const EXCL: Self = Self(1 << 4);
    /// Truncate the file when it is opened for writing.
    pub const TRUNC: Self = Self(1 << 5);

    /// The raw bit representation.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Whether `flag` is set. If `flag` is the zero value ([`OpenFlag::RDONLY`])
    /// this checks that the receiver itself is zero.
    #[must_use]
    pub fn has(self, flag: Self) -> bool {
        if flag.0 == 0 {
            return self.0 == 0;
        }
        self.0 & flag.0 == flag.0
    }

    /// Validate the flag combination.
    ///
    /// Write-only together with read-write is invalid, and the append,
    /// create, truncate and exclusive bits all require a writable access
    /// mode. Returns a bare [`ErrorKind::InvalidFlags`].
    pub fn check(self) -> Result<()> {
        if self.has(Self::WRONLY) && self.has(Self::RDWR) {
            return Err(ErrorKind::InvalidFlags.into());
        }
        if self.0 != 0
            && (self.has(Self::APPEND)
                || self.has(Self::CREATE)
                || self.has(Self::TRUNC)
                || self.has(Self::EXCL))
            && !self.has(Self::WRONLY)
            && !self.has(Self::RDWR)
        {
            return Err(ErrorKind::InvalidFlags.into());
        }
        Ok(())
    }
}

impl BitOr for OpenFlag {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for OpenFlag {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

// ── File mode ───────────────────────────────────────────────────────────────

/// File mode: permission bits plus type bits.
///
/// A regular file carries no type bits; directories and symbolic links are
/// marked by the high [`Mode::DIR`] and [`Mode::SYMLINK`] bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Mode(u32);

impl Mode {
    /// Type bit: directory.
    pub const DIR: Self = Self(1 << 31);
    /// Type bit: symbolic link.
    pub const SYMLINK: Self = Self(1 << 27);
    /// Mask covering the Unix permission bits.
    pub const PERM_MASK: Self = Self(0o777);

    /// Construct a mode from raw bits.
    #[must_use]
    pub const fn new(bits: u32) -> Self {
        Self(bits)
    }

    /// The raw bit representation.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Whether every bit of `other` is set in `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether the directory type bit is set.
    #[must_use]
    pub const fn is_dir(self) -> bool {
        self.contains(Self::DIR)
    }

    /// Whether the symbolic link type bit is set.
    #[must_use]
    pub const fn is_symlink(self) -> bool {
        self.contains(Self::SYMLINK)
    }

    /// Whether no type bits are set.
    #[must_use]
    pub const fn is_regular(self) -> bool {
        !self.is_dir() && !self.is_symlink()
    }

    /// The Unix permission bits.
    #[must_use]
    pub const fn perm(self) -> Self {
        Self(self.0 & Self::PERM_MASK.0)
    }
}

impl From<u32> for Mode {
    fn from(bits: u32) -> Self {
        Self(bits)
    }
}

impl BitOr for Mode {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitAnd for Mode {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_dir() {
            'd'
        } else if self.is_symlink() {
            'l'
        } else {
            '-'
        };
        write!(f, "{kind}")?;
        for shift in [6u32, 3, 0] {
            let triple = (self.0 >> shift) & 0o7;
            let r = if triple & 0o4 != 0 { 'r' } else { '-' };
            let w = if triple & 0o2 != 0 { 'w' } else { '-' };
            let x = if triple & 0o1 != 0 { 'x' } else { '-' };
            write!(f, "{r}{w}{x}")?;
        }
        Ok(())
    }
}

// ── Metadata ────────────────────────────────────────────────────────────────

/// A snapshot of a filesystem object's metadata.
#[derive(Debug, Clone)]
pub struct Metadata {
    name: String,
    size: u64,
    mode: Mode,
    modified: SystemTime,
    sys: Option<std::fs::Metadata>,
}

impl Metadata {
    /// Construct metadata for the in-memory backend.
    #[must_use]
    pub fn new(name: impl Into<String>, size: u64, mode: Mode, modified: SystemTime) -> Self {
        Self {
            name: name.into(),
            size,
            mode,
            modified,
            sys: None,
        }
    }

    /// Attach the host metadata record the snapshot was derived from.
    #[must_use]
    pub fn with_sys(mut self, sys: std::fs::Metadata) -> Self {
        self.sys = Some(sys);
        self
    }

    /// The base name of the file.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Length in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Mode bits: permissions plus type.
    #[must_use]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Last modification time.
    #[must_use]
    pub fn modified(&self) -> SystemTime {
        self.modified
    }

    /// Whether this describes a directory.
    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.mode.is_dir()
    }

    /// The backend-specific source record; `None` for the memory backend.
    #[must_use]
    pub fn sys(&self) -> Option<&std::fs::Metadata> {
        self.sys.as_ref()
    }
}

// ── Events ──────────────────────────────────────────────────────────────────

/// The kind of a change notification event.
///
/// Kinds are bit flags so a mask can be tested with [`EventKind::matches`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventKind(u32);

impl EventKind {
    /// A directory entry was created.
    pub const CREATE: Self = Self(1);
    /// A regular file's content was modified.
    pub const MODIFY: Self = Self(1 << 1);
    /// A directory entry was removed.
    pub const REMOVE: Self = Self(1 << 2);
    /// A directory entry was renamed.
    pub const RENAME: Self = Self(1 << 3);
    /// File attributes changed.
    pub const ATTRIBUTE: Self = Self(1 << 4);
    /// The watch backend reported an error.
    pub const ERROR: Self = Self(1 << 5);

    /// Whether every bit of `other` is set in `self`.
    #[must_use]
    pub const fn matches(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for EventKind {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match *self {
            Self::CREATE => "create",
            Self::MODIFY => "modify",
            Self::REMOVE => "remove",
            Self::RENAME => "rename",
            Self::ATTRIBUTE => "attribute",
            Self::ERROR => "error",
            _ => "unknown",
        };
        f.write_str(name)
    }
}

/// A change notification delivered to a watcher's channel.
#[derive(Debug)]
pub struct Event {
    /// What happened.
    pub kind: EventKind,
    /// The path the event applies to, relative to the watched root.
    pub path: String,
    /// The error carried by [`EventKind::ERROR`] events.
    pub error: Option<Error>,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            path::dir(&self.path),
            self.kind,
            path::base(&self.path)
        )
    }
}

// ── Traits ──────────────────────────────────────────────────────────────────

/// An open file or directory handle.
///
/// A regular-file handle answers `read`/`write`/`seek` and rejects the
/// directory operations with [`ErrorKind::NotDir`]; a directory handle does
/// the reverse, rejecting file I/O with [`ErrorKind::IsDir`].
pub trait File: Send {
    /// The path this handle was opened with.
    fn name(&self) -> &str;

    /// Read up to `buf.len()` bytes at the current offset, advancing the
    /// offset. Returns `Ok(0)` at end of file.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write `buf` at the current offset, advancing the offset.
    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Reposition the handle offset; returns the new offset.
    fn seek(&mut self, pos: SeekFrom) -> Result<u64>;

    /// Read directory entries.
    ///
    /// If `n <= 0` every remaining entry is returned; otherwise at most `n`
    /// entries are returned and a short result signals the end of the
    /// directory.
    fn readdir(&mut self, n: isize) -> Result<Vec<Metadata>>;

    /// Like [`File::readdir`] but returns only the entry names.
    fn readdir_names(&mut self, n: isize) -> Result<Vec<String>>;

    /// Close the handle. Closing a second time returns
    /// [`ErrorKind::Closed`].
    fn close(&mut self) -> Result<()>;
}

impl fmt::Debug for dyn File {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("File")
            .field("name", &self.name())
            .finish_non_exhaustive()
    }
}

/// A subscription delivering change events for watched paths.
pub trait Watcher: Send {
    /// Subscribe to events for `path`.
    fn watch(&mut self, path: &str) -> Result<()>;

    /// Drop the subscription for `path`.
    fn remove(&mut self, path: &str) -> Result<()>;

    /// Drop every subscription and close the event channel.
    fn close(&mut self) -> Result<()>;
}

/// The capability set every shoalfs backend satisfies.
pub trait FileSystem: Send + Sync {
    /// Change the mode of the named file to `mode`.
    fn chmod(&self, path: &str, mode: Mode) -> Result<()>;

    /// Create the named file with mode `0o666`, truncating it if it already
    /// exists.
    fn create(&self, path: &str) -> Result<Box<dyn File>> {
        self.open_file(
            path,
            OpenFlag::RDWR | OpenFlag::CREATE | OpenFlag::TRUNC,
            Mode::new(0o666),
        )
    }

    /// Open the named file for reading.
    fn open(&self, path: &str) -> Result<Box<dyn File>> {
        self.open_file(path, OpenFlag::RDONLY, Mode::default())
    }

    /// The generalized open call; most callers use [`FileSystem::open`] or
    /// [`FileSystem::create`] instead.
    fn open_file(&self, path: &str, flag: OpenFlag, perm: Mode) -> Result<Box<dyn File>>;

    /// Create a new directory with the given permission bits.
    fn mkdir(&self, path: &str, perm: Mode) -> Result<()>;

    /// Remove the named file or empty directory.
    fn remove(&self, path: &str) -> Result<()>;

    /// Rename `old` to `new`, moving it between directories if their parents
    /// differ.
    fn rename(&self, old: &str, new: &str) -> Result<()>;

    /// Metadata for the named file without following a final symbolic link.
    fn lstat(&self, path: &str) -> Result<Metadata>;

    /// Metadata for the named file, following symbolic links.
    fn stat(&self, path: &str) -> Result<Metadata>;

    /// Release the filesystem's resources. The filesystem is unusable
    /// afterwards.
    fn close(&self) -> Result<()>;

    /// Create a watcher delivering events into `events`.
    ///
    /// Delivery is best-effort: an event for a channel with no spare
    /// capacity is dropped.
    fn watcher(&self, events: Sender<Event>) -> Result<Box<dyn Watcher>>;
}
