#![forbid(unsafe_code)]
//! Virtual filesystem abstraction with two backends: a fully in-memory
//! inode/block filesystem and a passthrough rooted on the host.
//!
//! The [`FileSystem`] trait is the surface both backends satisfy; the
//! utilities ([`walk`], [`mkdir_all`], [`glob`], [`watch_tree`],
//! [`read_file`], [`write_file`]) work against either.

pub use shoal_error::{Error, ErrorKind, PathError, Result, is_exist, is_kind, is_not_exist};
pub use shoal_mem::{BLOCK_SIZE, MemFs};
pub use shoal_os::OsFs;
pub use shoal_vfs::{
    Event, EventKind, File, FileSystem, Metadata, Mode, OpenFlag, TreeWatcher, WalkState, Watcher,
    glob, has_meta, match_pattern, mkdir_all, path, read_dir_names, read_file, walk, watch_tree,
    write_file,
};
