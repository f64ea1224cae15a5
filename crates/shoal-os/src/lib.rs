#![forbid(unsafe_code)]
//! Host filesystem passthrough.
//!
//! [`OsFs`] delegates to the operating system, rooting every path under a
//! fixed base directory. Paths are clamped lexically before they touch the
//! host, so `..` components cannot escape the root. Change notification is
//! forwarded from the host's watch facility with paths reported relative to
//! the root.

use std::collections::VecDeque;
use std::fs;
use std::io::{self, Read as _, Seek as _, SeekFrom, Write as _};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crossbeam_channel::Sender;
use notify::{RecommendedWatcher, RecursiveMode, Watcher as _};
use tracing::debug;

use shoal_error::{Error, ErrorKind, Result};
use shoal_vfs::{
    Event, EventKind, File, FileSystem, Metadata, Mode, OpenFlag, Watcher, path,
};

/// A [`FileSystem`] backed by the host, rooted under a base directory.
pub struct OsFs {
    root: PathBuf,
}

impl OsFs {
    /// Create a passthrough filesystem rooted at `root`. The directory is
    /// expected to exist.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        debug!(target: "shoal::os", root = %root.display(), "passthrough filesystem created");
        Self { root }
    }

    /// Map a virtual path onto the host, clamped under the root.
    fn host_path(&self, p: &str) -> PathBuf {
        let rooted = if p.starts_with('/') {
            path::clean(p)
        } else {
            path::clean(&format!("/{p}"))
        };
        self.root.join(rooted.trim_start_matches('/'))
    }
}

fn wrap_io(err: io::Error, op: &'static str, p: &str) -> Error {
    Error::Io(err).with_path(op, p)
}

#[cfg(unix)]
fn perm_bits(md: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    md.permissions().mode() & 0o777
}

#[cfg(not(unix))]
fn perm_bits(md: &fs::Metadata) -> u32 {
    if md.permissions().readonly() { 0o555 } else { 0o777 }
}

/// Convert a host metadata record into the backend-neutral form, keeping
/// the original record reachable through `sys`.
fn convert_metadata(name: &str, md: fs::Metadata) -> Metadata {
    let mut mode = Mode::new(perm_bits(&md));
    if md.is_dir() {
        mode = mode | Mode::DIR;
    }
    if md.file_type().is_symlink() {
        mode = mode | Mode::SYMLINK;
    }
    let modified = md.modified().unwrap_or(SystemTime::UNIX_EPOCH);
    Metadata::new(name, md.len(), mode, modified).with_sys(md)
}

enum Inner {
    Regular(fs::File),
    Dir {
        host: PathBuf,
        entries: Option<VecDeque<Metadata>>,
    },
}

/// An open handle on the host: either a real file or a directory cursor.
struct OsFile {
    name: String,
    inner: Inner,
    closed: bool,
}

impl OsFile {
    fn regular(name: String, file: fs::File) -> Self {
        Self {
            name,
            inner: Inner::Regular(file),
            closed: false,
        }
    }

    fn dir(name: String, host: PathBuf) -> Self {
        Self {
            name,
            inner: Inner::Dir {
                host,
                entries: None,
            },
            closed: false,
        }
    }

    fn guard_open(&self) -> Result<()> {
        if self.closed {
            return Err(ErrorKind::Closed.into());
        }
        Ok(())
    }

    /// Load the directory listing on first use; later calls keep draining
    /// the same cursor.
    fn entries(&mut self) -> Result<&mut VecDeque<Metadata>> {
        let name = self.name.clone();
        match &mut self.inner {
            Inner::Regular(_) => Err(ErrorKind::NotDir.into()),
            Inner::Dir { host, entries } => match entries {
                Some(loaded) => Ok(loaded),
                None => {
                    let mut loaded = VecDeque::new();
                    let listing =
                        fs::read_dir(&*host).map_err(|e| wrap_io(e, "readdir", &name))?;
                    for dirent in listing {
                        let dirent = dirent.map_err(|e| wrap_io(e, "readdir", &name))?;
                        let md = dirent
                            .metadata()
                            .map_err(|e| wrap_io(e, "readdir", &name))?;
                        loaded.push_back(convert_metadata(
                            &dirent.file_name().to_string_lossy(),
                            md,
                        ));
                    }
                    Ok(entries.insert(loaded))
                }
            },
        }
    }
}

impl File for OsFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.guard_open()?;
        match &mut self.inner {
            Inner::Regular(file) => file
                .read(buf)
                .map_err(|e| wrap_io(e, "read", &self.name)),
            Inner::Dir { .. } => Err(ErrorKind::IsDir.into()),
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.guard_open()?;
        match &mut self.inner {
            Inner::Regular(file) => file
                .write(buf)
                .map_err(|e| wrap_io(e, "write", &self.name)),
            Inner::Dir { .. } => Err(ErrorKind::IsDir.into()),
        }
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.guard_open()?;
        match &mut self.inner {
            Inner::Regular(file) => file
                .seek(pos)
                .map_err(|e| wrap_io(e, "seek", &self.name)),
            Inner::Dir { .. } => Err(ErrorKind::IsDir.into()),
        }
    }

    fn readdir(&mut self, n: isize) -> Result<Vec<Metadata>> {
        self.guard_open()?;
        let entries = self.entries()?;
        let mut out = Vec::new();
        while n <= 0 || out.len() < n as usize {
            match entries.pop_front() {
                Some(md) => out.push(md),
                None => break,
            }
        }
        Ok(out)
    }

    fn readdir_names(&mut self, n: isize) -> Result<Vec<String>> {
        Ok(self.readdir(n)?.into_iter().map(|md| md.name().to_owned()).collect())
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Err(ErrorKind::Closed.into());
        }
        self.closed = true;
        Ok(())
    }
}

impl FileSystem for OsFs {
    fn chmod(&self, p: &str, mode: Mode) -> Result<()> {
        let host = self.host_path(p);
        let md = fs::metadata(&host).map_err(|e| wrap_io(e, "chmod", p))?;
        let mut perms = md.permissions();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            perms.set_mode(mode.perm().bits());
        }
        #[cfg(not(unix))]
        {
            perms.set_readonly(mode.perm().bits() & 0o200 == 0);
        }
        fs::set_permissions(&host, perms).map_err(|e| wrap_io(e, "chmod", p))
    }

    fn open_file(&self, p: &str, flag: OpenFlag, perm: Mode) -> Result<Box<dyn File>> {
        flag.check()?;
        let host = self.host_path(p);

        if let Ok(md) = fs::metadata(&host) {
            if md.is_dir() {
                if flag.has(OpenFlag::WRONLY)
                    || flag.has(OpenFlag::RDWR)
                    || flag.has(OpenFlag::APPEND)
                    || flag.has(OpenFlag::CREATE)
                    || flag.has(OpenFlag::TRUNC)
                {
                    return Err(Error::from(ErrorKind::IsDir).with_path("open", p));
                }
                return Ok(Box::new(OsFile::dir(p.to_owned(), host)));
            }
        }

        let mut options = fs::OpenOptions::new();
        options
            .read(!flag.has(OpenFlag::WRONLY))
            .write(flag.has(OpenFlag::WRONLY) || flag.has(OpenFlag::RDWR))
            .append(flag.has(OpenFlag::APPEND))
            .truncate(flag.has(OpenFlag::TRUNC))
            .create(flag.has(OpenFlag::CREATE));
        if flag.has(OpenFlag::CREATE) && flag.has(OpenFlag::EXCL) {
            options.create_new(true);
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(perm.perm().bits());
        }
        #[cfg(not(unix))]
        let _ = perm;

        let file = options.open(&host).map_err(|e| wrap_io(e, "open", p))?;
        Ok(Box::new(OsFile::regular(p.to_owned(), file)))
    }

    fn mkdir(&self, p: &str, perm: Mode) -> Result<()> {
        let host = self.host_path(p);
        fs::create_dir(&host).map_err(|e| wrap_io(e, "mkdir", p))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(perm.perm().bits());
            fs::set_permissions(&host, perms).map_err(|e| wrap_io(e, "mkdir", p))?;
        }
        #[cfg(not(unix))]
        let _ = perm;
        Ok(())
    }

    fn remove(&self, p: &str) -> Result<()> {
        let host = self.host_path(p);
        let md = fs::symlink_metadata(&host).map_err(|e| wrap_io(e, "remove", p))?;
        if md.is_dir() {
            fs::remove_dir(&host).map_err(|e| wrap_io(e, "remove", p))
        } else {
            fs::remove_file(&host).map_err(|e| wrap_io(e, "remove", p))
        }
    }

    fn rename(&self, old: &str, new: &str) -> Result<()> {
        fs::rename(self.host_path(old), self.host_path(new))
            .map_err(|e| wrap_io(e, "rename", old))
    }

    fn lstat(&self, p: &str) -> Result<Metadata> {
        let md = fs::symlink_metadata(self.host_path(p)).map_err(|e| wrap_io(e, "lstat", p))?;
        Ok(convert_metadata(path::base(p), md))
    }

    fn stat(&self, p: &str) -> Result<Metadata> {
        let md = fs::metadata(self.host_path(p)).map_err(|e| wrap_io(e, "stat", p))?;
        Ok(convert_metadata(path::base(p), md))
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }

    fn watcher(&self, events: Sender<Event>) -> Result<Box<dyn Watcher>> {
        Ok(Box::new(OsWatcher::new(self.root.clone(), events)?))
    }
}

/// Map a host notification kind onto the backend-neutral event set.
fn map_kind(kind: &notify::EventKind) -> Option<EventKind> {
    use notify::event::ModifyKind;
    match kind {
        notify::EventKind::Create(_) => Some(EventKind::CREATE),
        notify::EventKind::Modify(ModifyKind::Name(_)) => Some(EventKind::RENAME),
        notify::EventKind::Modify(ModifyKind::Metadata(_)) => Some(EventKind::ATTRIBUTE),
        notify::EventKind::Modify(_) => Some(EventKind::MODIFY),
        notify::EventKind::Remove(_) => Some(EventKind::REMOVE),
        _ => None,
    }
}

/// Report a host path relative to the watch root, slash-separated.
fn virtual_path(root: &Path, host: &Path) -> String {
    let rel = host.strip_prefix(root).unwrap_or(host);
    path::clean(&format!("/{}", rel.to_string_lossy()))
}

/// Forwards host change notifications as [`Event`]s.
pub struct OsWatcher {
    fs_root: PathBuf,
    watcher: Option<RecommendedWatcher>,
}

impl OsWatcher {
    fn new(fs_root: PathBuf, events: Sender<Event>) -> Result<Self> {
        let root = fs_root.clone();
        let watcher = notify::recommended_watcher(move |outcome: notify::Result<notify::Event>| {
            match outcome {
                Ok(event) => {
                    let Some(kind) = map_kind(&event.kind) else {
                        return;
                    };
                    for host_path in &event.paths {
                        let _ = events.send(Event {
                            kind,
                            path: virtual_path(&root, host_path),
                            error: None,
                        });
                    }
                }
                Err(err) => {
                    let _ = events.send(Event {
                        kind: EventKind::ERROR,
                        path: String::new(),
                        error: Some(Error::Io(io::Error::other(err))),
                    });
                }
            }
        })
        .map_err(|e| Error::Io(io::Error::other(e)))?;
        Ok(Self {
            fs_root,
            watcher: Some(watcher),
        })
    }

    fn host(&self, p: &str) -> PathBuf {
        let rooted = if p.starts_with('/') {
            path::clean(p)
        } else {
            path::clean(&format!("/{p}"))
        };
        self.fs_root.join(rooted.trim_start_matches('/'))
    }
}

impl Watcher for OsWatcher {
    fn watch(&mut self, p: &str) -> Result<()> {
        let host = self.host(p);
        let Some(watcher) = self.watcher.as_mut() else {
            return Err(ErrorKind::Closed.into());
        };
        watcher
            .watch(&host, RecursiveMode::NonRecursive)
            .map_err(|e| Error::Io(io::Error::other(e)).with_path("watch", p))
    }

    fn remove(&mut self, p: &str) -> Result<()> {
        let host = self.host(p);
        let Some(watcher) = self.watcher.as_mut() else {
            return Err(ErrorKind::Closed.into());
        };
        watcher
            .unwatch(&host)
            .map_err(|e| Error::Io(io::Error::other(e)).with_path("watch", p))
    }

    fn close(&mut self) -> Result<()> {
        // Dropping the host watcher drops the forwarding callback and with
        // it the channel sender.
        self.watcher = None;
        Ok(())
    }
}
