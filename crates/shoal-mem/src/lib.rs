#![forbid(unsafe_code)]
//! A completely in-memory filesystem.
//!
//! Reimplements the semantics of a classical Unix-like filesystem without
//! touching a disk: an inode table and fixed-size block store with free-list
//! reuse, directory files holding serialized entries, symbolic links, path
//! resolution, rename across directories, and per-inode change notification
//! with best-effort delivery.
//!
//! The filesystem is usable from multiple threads. Locks are layered file
//! handle over inode over filesystem, acquired outermost first; the
//! filesystem-level lock guards the block table, the inode table, both free
//! lists and the watcher table.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};

use crossbeam_channel::{Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, trace};

use shoal_error::{Error, ErrorKind, Result, is_kind};
use shoal_vfs::{Event, EventKind, File, FileSystem, Metadata, Mode, OpenFlag, Watcher, path};

mod block;
mod dir;
mod dirent;
mod file;
mod inode;
mod watch;

pub use block::BLOCK_SIZE;
pub use watch::MemWatcher;

use block::BlockStore;
use dir::MemDir;
use file::MemFile;
use inode::Inode;
use watch::WatchEntry;

/// How many symbolic links `stat` follows before giving up on a cycle.
const SYMLINK_FOLLOW_LIMIT: u32 = 40;

/// State shared by the filesystem, its open handles and its watchers.
pub(crate) struct Shared {
    pub(crate) state: Mutex<State>,
}

pub(crate) struct State {
    pub(crate) blocks: BlockStore,
    inodes: Vec<Arc<Inode>>,
    free_inodes: VecDeque<usize>,
    pub(crate) watchers: HashMap<usize, HashMap<u64, WatchEntry>>,
    next_watcher_id: u64,
    closed: bool,
}

impl Shared {
    /// Look up an allocated inode by number.
    pub(crate) fn inode(&self, num: usize) -> Result<Arc<Inode>> {
        let state = self.state.lock();
        state
            .inodes
            .get(num)
            .cloned()
            .ok_or_else(|| ErrorKind::Closed.into())
    }

    /// Walk the directory chain for `path` and return the inode it names.
    ///
    /// Leading and trailing separators are trimmed; the empty remainder
    /// resolves to the root. Errors are bare kinds; the public surface adds
    /// the operation and path.
    pub(crate) fn resolve(self: &Arc<Self>, path: &str) -> Result<Arc<Inode>> {
        if self.state.lock().closed {
            return Err(ErrorKind::Closed.into());
        }
        let trimmed = path.trim_matches('/');
        let mut inode = self.inode(0)?;
        if trimmed.is_empty() {
            return Ok(inode);
        }
        for segment in trimmed.split('/') {
            if !inode.is_dir() {
                return Err(ErrorKind::NotDir.into());
            }
            let mut dir = MemDir::over(Arc::clone(self), inode);
            match dir.find(segment)? {
                Some(num) => inode = self.inode(num as usize)?,
                None => return Err(ErrorKind::NotExist.into()),
            }
        }
        Ok(inode)
    }

    /// Allocate an inode (recycling a freed number if any) and link it into
    /// `parent` under `name`.
    pub(crate) fn create_node(
        self: &Arc<Self>,
        name: &str,
        parent: &Arc<Inode>,
        mode: Mode,
    ) -> Result<Arc<Inode>> {
        let mut state = self.state.lock();
        let inode = if let Some(num) = state.free_inodes.pop_front() {
            Arc::clone(&state.inodes[num])
        } else {
            let num = state.inodes.len();
            let inode = Arc::new(Inode::new(num, Arc::downgrade(self)));
            state.inodes.push(Arc::clone(&inode));
            inode
        };
        drop(state);

        inode.init(mode, parent.num());
        let mut dir = MemDir::over(Arc::clone(self), Arc::clone(parent));
        dir.append(inode.num() as u64, name)?;
        inode.touch();
        trace!(target: "shoal::mem", inode = inode.num(), name, "inode linked");
        Ok(inode)
    }

    /// Return an inode's number and data blocks to their free lists.
    fn free_inode(&self, num: usize) {
        let Ok(inode) = self.inode(num) else {
            return;
        };
        let freed = inode.reset();
        let mut state = self.state.lock();
        state.blocks.free(freed);
        state.free_inodes.push_back(num);
        trace!(target: "shoal::mem", inode = num, "inode freed");
    }

    /// Fan an event out to every watcher registered under `parent`.
    ///
    /// Sends are non-blocking; an event for a full channel is dropped.
    pub(crate) fn notify(&self, kind: EventKind, parent: usize, name: &str) {
        let state = self.state.lock();
        let Some(entries) = state.watchers.get(&parent) else {
            return;
        };
        for entry in entries.values() {
            let event = Event {
                kind,
                path: path::join(&entry.path, name),
                error: None,
            };
            match entry.sender.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(event)) => {
                    trace!(
                        target: "shoal::mem",
                        path = %event.path,
                        "event dropped, channel full"
                    );
                }
                Err(TrySendError::Disconnected(_)) => {}
            }
        }
    }
}

/// The in-memory [`FileSystem`] backend.
///
/// Well suited to unit tests: behavior matches the passthrough backend
/// without touching the host.
pub struct MemFs {
    pub(crate) shared: Arc<Shared>,
}

impl MemFs {
    /// Create an empty filesystem containing only the root directory.
    #[must_use]
    pub fn new() -> Self {
        let shared = Arc::new_cyclic(|weak: &Weak<Shared>| {
            let root = Arc::new(Inode::new(0, weak.clone()));
            root.init(Mode::DIR, 0);
            root.touch();
            Shared {
                state: Mutex::new(State {
                    blocks: BlockStore::default(),
                    inodes: vec![root],
                    free_inodes: VecDeque::new(),
                    watchers: HashMap::new(),
                    next_watcher_id: 0,
                    closed: false,
                }),
            }
        });
        debug!(target: "shoal::mem", "memory filesystem created");
        Self { shared }
    }

    /// Create a symbolic link at `link` pointing at `target`.
    ///
    /// The target is not required to exist. `stat` follows the link;
    /// `lstat` describes the link itself.
    pub fn symlink(&self, target: &str, link: &str) -> Result<()> {
        let link_path = normalize(link);
        if self.shared.resolve(&link_path).is_ok() {
            return Err(Error::from(ErrorKind::Exists).with_path("symlink", link_path));
        }
        let parent = self
            .shared
            .resolve(&path::dir(&link_path))
            .map_err(|err| err.with_path("symlink", link_path.clone()))?;
        if !parent.is_dir() {
            return Err(Error::from(ErrorKind::NotDir).with_path("symlink", link_path));
        }
        let inode = self.shared.create_node(
            path::base(&link_path),
            &parent,
            Mode::SYMLINK | Mode::new(0o777),
        )?;
        inode.set_link(target);
        Ok(())
    }

    fn stat_following(&self, path_str: &str, links_left: u32) -> Result<Metadata> {
        let p = normalize(path_str);
        let inode = self
            .shared
            .resolve(&p)
            .map_err(|err| err.with_path("stat", p.clone()))?;
        if inode.mode().is_symlink() {
            if links_left == 0 {
                // Too many links: almost certainly a cycle.
                return Err(Error::from(ErrorKind::NotExist).with_path("stat", p));
            }
            return self.stat_following(&inode.link(), links_left - 1);
        }
        Ok(inode.metadata(path::base(&p)))
    }
}

impl Default for MemFs {
    fn default() -> Self {
        Self::new()
    }
}

/// Root a path at `/` and lexically clean it.
fn normalize(p: &str) -> String {
    if p.starts_with('/') {
        path::clean(p)
    } else {
        path::clean(&format!("/{p}"))
    }
}

impl FileSystem for MemFs {
    fn chmod(&self, path_str: &str, mode: Mode) -> Result<()> {
        let p = normalize(path_str);
        let inode = self
            .shared
            .resolve(&p)
            .map_err(|err| err.with_path("chmod", p))?;
        inode.set_mode(mode);
        Ok(())
    }

    fn open_file(&self, path_str: &str, flag: OpenFlag, perm: Mode) -> Result<Box<dyn File>> {
        flag.check()?;
        let p = normalize(path_str);
        debug!(target: "shoal::mem", path = %p, flag = ?flag, "open");

        match self.shared.resolve(&p) {
            Ok(inode) => {
                if flag.has(OpenFlag::CREATE) && flag.has(OpenFlag::EXCL) {
                    return Err(Error::from(ErrorKind::Exists).with_path("open", p));
                }
                let file = MemFile::new(Arc::clone(&self.shared), Arc::clone(&inode), p.clone());
                file.apply_flags(flag)
                    .map_err(|err| err.with_path("open", p))?;
                if inode.is_dir() {
                    Ok(Box::new(MemDir::new(file)))
                } else {
                    Ok(Box::new(file))
                }
            }
            Err(err) if is_kind(&err, ErrorKind::NotExist) => {
                let parent_path = path::dir(&p);
                let parent = self
                    .shared
                    .resolve(&parent_path)
                    .map_err(|err| err.with_path("open", parent_path.clone()))?;
                if !parent.is_dir() {
                    return Err(Error::from(ErrorKind::NotDir).with_path("open", parent_path));
                }
                if flag.has(OpenFlag::CREATE)
                    && (flag.has(OpenFlag::RDWR) || flag.has(OpenFlag::WRONLY))
                {
                    let inode = self.shared.create_node(path::base(&p), &parent, perm)?;
                    let file = MemFile::new(Arc::clone(&self.shared), inode, p.clone());
                    file.apply_flags(flag)
                        .map_err(|err| err.with_path("open", p))?;
                    Ok(Box::new(file))
                } else {
                    Err(Error::from(ErrorKind::NotExist).with_path("open", p))
                }
            }
            Err(err) => Err(err.with_path("open", p)),
        }
    }

    fn mkdir(&self, path_str: &str, perm: Mode) -> Result<()> {
        let p = normalize(path_str);
        if self.shared.resolve(&p).is_ok() {
            return Err(Error::from(ErrorKind::Exists).with_path("mkdir", p));
        }
        let parent = self
            .shared
            .resolve(&path::dir(&p))
            .map_err(|err| err.with_path("mkdir", p.clone()))?;
        if !parent.is_dir() {
            return Err(Error::from(ErrorKind::NotDir).with_path("mkdir", p));
        }
        self.shared
            .create_node(path::base(&p), &parent, Mode::DIR | perm)?;
        debug!(target: "shoal::mem", path = %p, "mkdir");
        Ok(())
    }

    fn remove(&self, path_str: &str) -> Result<()> {
        let p = normalize(path_str);
        let parent = self
            .shared
            .resolve(&path::dir(&p))
            .map_err(|err| err.with_path("remove", p.clone()))?;
        if !parent.is_dir() {
            return Err(Error::from(ErrorKind::NotDir).with_path("remove", p));
        }
        let mut dir = MemDir::over(Arc::clone(&self.shared), parent);
        let ent = dir
            .remove(path::base(&p))
            .map_err(|err| err.with_path("remove", p.clone()))?;
        self.shared.free_inode(ent.inode as usize);
        debug!(target: "shoal::mem", path = %p, "removed");
        Ok(())
    }

    fn rename(&self, old: &str, new: &str) -> Result<()> {
        let old_p = normalize(old);
        let new_p = normalize(new);
        let old_dir_path = path::dir(&old_p);
        let new_dir_path = path::dir(&new_p);

        let old_parent = self
            .shared
            .resolve(&old_dir_path)
            .map_err(|err| err.with_path("rename", old_dir_path.clone()))?;
        let mut old_dir = MemDir::over(Arc::clone(&self.shared), old_parent);

        if old_dir_path == new_dir_path {
            old_dir
                .rename(path::base(&old_p), path::base(&new_p))
                .map_err(|err| err.with_path("rename", old_p.clone()))?;
        } else {
            let new_parent = self
                .shared
                .resolve(&new_dir_path)
                .map_err(|err| err.with_path("rename", new_dir_path.clone()))?;
            let ent = old_dir
                .unlink(path::base(&old_p))
                .map_err(|err| err.with_path("rename", old_p.clone()))?;
            let new_parent_num = new_parent.num();
            let mut new_dir = MemDir::over(Arc::clone(&self.shared), new_parent);
            new_dir
                .append(ent.inode, path::base(&new_p))
                .map_err(|err| err.with_path("rename", new_p.clone()))?;
            // The back-reference feeds notification paths for later writes.
            self.shared.inode(ent.inode as usize)?.set_parent(new_parent_num);
        }
        debug!(target: "shoal::mem", from = %old_p, to = %new_p, "renamed");
        Ok(())
    }

    fn lstat(&self, path_str: &str) -> Result<Metadata> {
        let p = normalize(path_str);
        let inode = self
            .shared
            .resolve(&p)
            .map_err(|err| err.with_path("lstat", p.clone()))?;
        Ok(inode.metadata(path::base(&p)))
    }

    fn stat(&self, path_str: &str) -> Result<Metadata> {
        self.stat_following(path_str, SYMLINK_FOLLOW_LIMIT)
    }

    fn close(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        state.closed = true;
        state.blocks.clear();
        state.inodes.clear();
        state.free_inodes.clear();
        state.watchers.clear();
        debug!(target: "shoal::mem", "memory filesystem closed");
        Ok(())
    }

    fn watcher(&self, events: Sender<Event>) -> Result<Box<dyn Watcher>> {
        let id = {
            let mut state = self.shared.state.lock();
            state.next_watcher_id += 1;
            state.next_watcher_id
        };
        Ok(Box::new(MemWatcher::new(
            Arc::clone(&self.shared),
            id,
            events,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shoal_vfs::write_file;

    fn block_free_list(fs: &MemFs) -> Vec<usize> {
        fs.shared.state.lock().blocks.free_list().collect()
    }

    fn inode_free_list(fs: &MemFs) -> Vec<usize> {
        fs.shared.state.lock().free_inodes.iter().copied().collect()
    }

    #[test]
    fn remove_returns_resources_to_free_lists() {
        let fs = MemFs::new();
        let content = vec![0xAB_u8; BLOCK_SIZE * 3];
        // Block 0 holds the root directory's entry; the content lands in
        // blocks 1..=3.
        write_file(&fs, "/big.bin", &content, Mode::new(0o644)).expect("write");

        let (inode_num, data_blocks) = {
            let inode = fs.shared.resolve("/big.bin").expect("resolve");
            (inode.num(), inode.block_count())
        };
        assert_eq!(data_blocks, 3);
        assert!(block_free_list(&fs).is_empty());

        fs.remove("/big.bin").expect("remove");
        assert!(is_kind(
            &fs.stat("/big.bin").expect_err("gone"),
            ErrorKind::NotExist
        ));
        assert_eq!(inode_free_list(&fs), vec![inode_num]);
        // The emptied root directory frees its entry block, then the
        // removed inode's data blocks follow.
        assert_eq!(block_free_list(&fs), vec![0, 1, 2, 3]);

        // The earliest freed indices are recycled first: the root's new
        // entry block takes 0, the content takes 1.
        write_file(&fs, "/next.bin", &[1, 2, 3], Mode::new(0o644)).expect("write");
        let reused = fs.shared.resolve("/next.bin").expect("resolve");
        assert_eq!(reused.num(), inode_num);
        assert_eq!(block_free_list(&fs), vec![2, 3]);
    }

    #[test]
    fn recycled_inode_starts_from_zero_values() {
        let fs = MemFs::new();
        write_file(&fs, "/a", &[9u8; 100], Mode::new(0o600)).expect("write");
        fs.remove("/a").expect("remove");

        let file = fs.create("/b").expect("create");
        drop(file);
        let md = fs.stat("/b").expect("stat");
        assert_eq!(md.size(), 0);
        assert_eq!(md.mode().perm(), Mode::new(0o666));
    }

    #[test]
    fn symlink_stat_follows_lstat_does_not() {
        let fs = MemFs::new();
        write_file(&fs, "/real.txt", b"payload", Mode::new(0o644)).expect("write");
        fs.symlink("/real.txt", "/alias").expect("symlink");

        let followed = fs.stat("/alias").expect("stat");
        assert_eq!(followed.name(), "real.txt");
        assert_eq!(followed.size(), 7);
        assert!(followed.mode().is_regular());

        let link = fs.lstat("/alias").expect("lstat");
        assert!(link.mode().is_symlink());
        assert_eq!(link.name(), "alias");
    }

    #[test]
    fn symlink_cycle_is_bounded() {
        let fs = MemFs::new();
        fs.symlink("/b", "/a").expect("symlink a");
        fs.symlink("/a", "/b").expect("symlink b");
        let err = fs.stat("/a").expect_err("cycle");
        assert!(is_kind(&err, ErrorKind::NotExist));
    }

    #[test]
    fn dangling_symlink_stat_is_not_exist() {
        let fs = MemFs::new();
        fs.symlink("/missing", "/dangling").expect("symlink");
        assert!(is_kind(
            &fs.stat("/dangling").expect_err("dangling"),
            ErrorKind::NotExist
        ));
        assert!(fs.lstat("/dangling").is_ok());
    }

    #[test]
    fn open_exclusive_create_on_existing_file() {
        let fs = MemFs::new();
        write_file(&fs, "/taken", b"x", Mode::new(0o644)).expect("write");
        let err = fs
            .open_file(
                "/taken",
                OpenFlag::WRONLY | OpenFlag::CREATE | OpenFlag::EXCL,
                Mode::new(0o644),
            )
            .expect_err("excl");
        assert!(is_kind(&err, ErrorKind::Exists));
        // The existing content must survive a rejected exclusive create,
        // even with a truncate flag in the mix.
        let err = fs
            .open_file(
                "/taken",
                OpenFlag::WRONLY | OpenFlag::CREATE | OpenFlag::EXCL | OpenFlag::TRUNC,
                Mode::new(0o644),
            )
            .expect_err("excl+trunc");
        assert!(is_kind(&err, ErrorKind::Exists));
        assert_eq!(fs.stat("/taken").expect("stat").size(), 1);
    }

    #[test]
    fn open_without_create_on_missing_file() {
        let fs = MemFs::new();
        let err = fs.open("/nope").expect_err("missing");
        assert!(is_kind(&err, ErrorKind::NotExist));
        let err = fs
            .open_file("/nope", OpenFlag::WRONLY, Mode::new(0o644))
            .expect_err("missing");
        assert!(is_kind(&err, ErrorKind::NotExist));
    }

    #[test]
    fn open_through_file_is_not_dir() {
        let fs = MemFs::new();
        write_file(&fs, "/plain", b"x", Mode::new(0o644)).expect("write");
        let err = fs.create("/plain/child").expect_err("through file");
        assert!(is_kind(&err, ErrorKind::NotDir));
    }

    #[test]
    fn mkdir_on_existing_path_is_exists() {
        let fs = MemFs::new();
        fs.mkdir("/d", Mode::new(0o755)).expect("mkdir");
        let err = fs.mkdir("/d", Mode::new(0o755)).expect_err("again");
        assert!(is_kind(&err, ErrorKind::Exists));
        let err = fs.mkdir("/", Mode::new(0o755)).expect_err("root");
        assert!(is_kind(&err, ErrorKind::Exists));
    }

    #[test]
    fn chmod_missing_file_is_not_exist() {
        let fs = MemFs::new();
        let err = fs.chmod("/ghost", Mode::new(0o600)).expect_err("missing");
        assert!(is_kind(&err, ErrorKind::NotExist));
    }

    #[test]
    fn path_error_carries_operation_and_path() {
        let fs = MemFs::new();
        let err = fs.stat("/missing/deep").expect_err("missing");
        assert_eq!(
            err.to_string(),
            "stat /missing/deep: no such file or directory"
        );
    }

    #[test]
    fn relative_paths_are_rooted() {
        let fs = MemFs::new();
        fs.mkdir("rel", Mode::new(0o755)).expect("mkdir");
        assert!(fs.stat("/rel").expect("stat").is_dir());
        write_file(&fs, "rel/f", b"1", Mode::new(0o644)).expect("write");
        assert_eq!(fs.stat("/rel/f").expect("stat").size(), 1);
    }

    #[test]
    fn closed_filesystem_rejects_operations() {
        let fs = MemFs::new();
        fs.mkdir("/d", Mode::new(0o755)).expect("mkdir");
        fs.close().expect("close");
        let err = fs.stat("/d").expect_err("closed");
        assert!(is_kind(&err, ErrorKind::Closed));
    }

    #[test]
    fn cross_directory_rename_updates_parent_reference() {
        let fs = MemFs::new();
        fs.mkdir("/src", Mode::new(0o755)).expect("mkdir");
        fs.mkdir("/dst", Mode::new(0o755)).expect("mkdir");
        write_file(&fs, "/src/f", b"data", Mode::new(0o644)).expect("write");

        let moved = fs.shared.resolve("/src/f").expect("resolve").num();
        fs.rename("/src/f", "/dst/g").expect("rename");

        assert!(is_kind(
            &fs.stat("/src/f").expect_err("old gone"),
            ErrorKind::NotExist
        ));
        let after = fs.shared.resolve("/dst/g").expect("resolve");
        assert_eq!(after.num(), moved);
        let dst = fs.shared.resolve("/dst").expect("resolve");
        assert_eq!(after.parent(), dst.num());
    }

    #[test]
    fn rename_missing_parent_names_the_failing_path() {
        let fs = MemFs::new();
        write_file(&fs, "/f", b"1", Mode::new(0o644)).expect("write");
        let err = fs.rename("/f", "/nosuch/g").expect_err("bad dest");
        assert!(is_kind(&err, ErrorKind::NotExist));
        assert!(err.to_string().contains("/nosuch"));
    }
}
