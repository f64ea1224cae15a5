//! Generic helpers that work against any [`FileSystem`] backend.

use std::sync::Arc;
use std::thread;

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use tracing::{debug, trace};

use shoal_error::{Error, ErrorKind, Result};

use crate::glob::{has_meta, match_pattern};
use crate::{Event, FileSystem, Metadata, Mode, OpenFlag, Watcher, path};

// ── Whole-file helpers ──────────────────────────────────────────────────────

/// Read the entire content of the file named by `path`.
///
/// A failure while closing the handle is reported only if no earlier error
/// was observed.
pub fn read_file(fs: &dyn FileSystem, path: &str) -> Result<Vec<u8>> {
    let mut file = fs.open(path)?;
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];
    let mut result = loop {
        match file.read(&mut buf) {
            Ok(0) => break Ok(()),
            Ok(n) => data.extend_from_slice(&buf[..n]),
            Err(err) => break Err(err),
        }
    };
    if let Err(err) = file.close() {
        result = result.and(Err(err));
    }
    result.map(|()| data)
}

/// Write `content` to the file named by `path`, creating it with permissions
/// `perm` if it does not exist and truncating it otherwise.
pub fn write_file(fs: &dyn FileSystem, path: &str, content: &[u8], perm: Mode) -> Result<()> {
    let mut file = fs.open_file(
        path,
        OpenFlag::WRONLY | OpenFlag::CREATE | OpenFlag::TRUNC,
        perm,
    )?;
    let mut result = match file.write(content) {
        Ok(n) if n < content.len() => Err(ErrorKind::ShortWrite.into()),
        Ok(_) => Ok(()),
        Err(err) => Err(err),
    };
    if let Err(err) = file.close() {
        result = result.and(Err(err));
    }
    result
}

/// Read the directory named by `dirname` and return its entry names sorted
/// lexicographically.
pub fn read_dir_names(fs: &dyn FileSystem, dirname: &str) -> Result<Vec<String>> {
    let mut dir = fs.open(dirname)?;
    let result = dir.readdir_names(-1);
    let _ = dir.close();
    let mut names = result?;
    names.sort();
    Ok(names)
}

// ── Tree walk ───────────────────────────────────────────────────────────────

/// Control decision returned by a [`walk`] callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkState {
    /// Keep walking.
    Continue,
    /// Prune: when returned for a directory, skip its contents; when
    /// returned for a file, skip the remaining files in the containing
    /// directory. Never treated as a failure.
    SkipDir,
}

/// Walk the tree rooted at `root` in depth-first pre-order, calling `visit`
/// for every file or directory, including `root` itself.
///
/// Entries within a directory are visited in lexicographic order. Errors
/// encountered while statting or listing are handed to `visit`, which
/// decides whether the walk continues. Symbolic links are not followed.
pub fn walk<F>(fs: &dyn FileSystem, root: &str, visit: &mut F) -> Result<()>
where
    F: FnMut(&str, Option<&Metadata>, Option<Error>) -> Result<WalkState>,
{
    match fs.lstat(root) {
        Ok(info) => {
            walk_tree(fs, root, &info, visit)?;
        }
        Err(err) => {
            visit(root, None, Some(err))?;
        }
    }
    Ok(())
}

fn walk_tree<F>(fs: &dyn FileSystem, dir: &str, info: &Metadata, visit: &mut F) -> Result<WalkState>
where
    F: FnMut(&str, Option<&Metadata>, Option<Error>) -> Result<WalkState>,
{
    if !info.is_dir() {
        return visit(dir, Some(info), None);
    }

    let names = match read_dir_names(fs, dir) {
        Ok(names) => names,
        Err(read_err) => {
            // The directory cannot be listed; the callback decides whether
            // that aborts the walk.
            visit(dir, Some(info), Some(read_err))?;
            return Ok(WalkState::Continue);
        }
    };

    if visit(dir, Some(info), None)? == WalkState::SkipDir {
        return Ok(WalkState::Continue);
    }

    for name in names {
        let child = path::join(dir, &name);
        match fs.lstat(&child) {
            Err(err) => {
                visit(&child, None, Some(err))?;
            }
            Ok(child_info) => {
                if walk_tree(fs, &child, &child_info, visit)? == WalkState::SkipDir {
                    // SkipDir from a file prunes the rest of this directory.
                    break;
                }
            }
        }
    }
    Ok(WalkState::Continue)
}

// ── Recursive directory creation ────────────────────────────────────────────

/// Create the directory named by `path` along with any missing parents.
///
/// The permission bits `perm` are used for every directory created. An
/// existing directory is a success; an existing non-directory is
/// [`ErrorKind::NotDir`].
pub fn mkdir_all(fs: &dyn FileSystem, path: &str, perm: Mode) -> Result<()> {
    match fs.stat(path) {
        Ok(info) if info.is_dir() => return Ok(()),
        Ok(_) => return Err(Error::from(ErrorKind::NotDir).with_path("mkdir", path)),
        Err(_) => {}
    }

    let parent = path::dir(path);
    if parent != path {
        mkdir_all(fs, &parent, perm)?;
    }

    if let Err(err) = fs.mkdir(path, perm) {
        // A concurrent creator or a trailing "/." component may have made
        // the directory appear; re-check before failing.
        match fs.lstat(path) {
            Ok(info) if info.is_dir() => return Ok(()),
            _ => return Err(err),
        }
    }
    Ok(())
}

// ── Glob ────────────────────────────────────────────────────────────────────

/// Return the names of all files matching `pattern`, or an empty vector if
/// there is no matching file.
///
/// Filesystem errors such as unreadable directories are ignored; the only
/// possible error is [`ErrorKind::BadPattern`].
pub fn glob(fs: &dyn FileSystem, pattern: &str) -> Result<Vec<String>> {
    if !has_meta(pattern) {
        if fs.lstat(pattern).is_err() {
            return Ok(Vec::new());
        }
        return Ok(vec![pattern.to_owned()]);
    }

    let (dir, file) = path::split(pattern);
    let dir = clean_glob_path(dir);

    if !has_meta(dir) {
        return glob_in_dir(fs, dir, file, Vec::new());
    }

    // A pattern that is its own directory part cannot make progress.
    if dir == pattern {
        return Err(ErrorKind::BadPattern.into());
    }

    let mut matches = Vec::new();
    for candidate in glob(fs, dir)? {
        matches = glob_in_dir(fs, &candidate, file, matches)?;
    }
    Ok(matches)
}

/// Append the names in `dir` matching `pattern` to `matches`, in
/// lexicographic order. Unreadable or non-directory `dir`s contribute
/// nothing.
fn glob_in_dir(
    fs: &dyn FileSystem,
    dir: &str,
    pattern: &str,
    mut matches: Vec<String>,
) -> Result<Vec<String>> {
    let Ok(info) = fs.stat(dir) else {
        return Ok(matches);
    };
    if !info.is_dir() {
        return Ok(matches);
    }
    let Ok(mut handle) = fs.open(dir) else {
        return Ok(matches);
    };
    let mut names = handle.readdir_names(-1).unwrap_or_default();
    let _ = handle.close();
    names.sort();
    for name in &names {
        if match_pattern(pattern, name)? {
            matches.push(path::join(dir, name));
        }
    }
    Ok(matches)
}

/// Prepare the directory part of a pattern for matching.
fn clean_glob_path(dir: &str) -> &str {
    match dir {
        "" => ".",
        "/" => "/",
        _ => &dir[..dir.len() - 1], // chop off trailing separator
    }
}

// ── Recursive watch ─────────────────────────────────────────────────────────

/// A watcher covering an entire directory tree.
///
/// Returned by [`watch_tree`]; closing it tears down every subscription and
/// ends the forwarding thread.
pub struct TreeWatcher {
    inner: Arc<Mutex<Box<dyn Watcher>>>,
}

impl Watcher for TreeWatcher {
    fn watch(&mut self, path: &str) -> Result<()> {
        self.inner.lock().watch(path)
    }

    fn remove(&mut self, path: &str) -> Result<()> {
        self.inner.lock().remove(path)
    }

    fn close(&mut self) -> Result<()> {
        self.inner.lock().close()
    }
}

/// Watch the tree rooted at `root`, forwarding events into `events`.
///
/// Every directory that currently exists under `root` is subscribed, and a
/// background thread keeps the subscription set up to date: whenever a
/// forwarded event names a newly created directory, that directory is
/// subscribed as well. The thread ends when the watcher is closed.
pub fn watch_tree(
    fs: Arc<dyn FileSystem>,
    root: &str,
    events: Sender<Event>,
) -> Result<TreeWatcher> {
    let info = fs.stat(root)?;

    let capacity = events.capacity().unwrap_or(16).max(1);
    let (tx, rx) = crossbeam_channel::bounded(capacity);
    let inner: Arc<Mutex<Box<dyn Watcher>>> = Arc::new(Mutex::new(fs.watcher(tx)?));

    if info.is_dir() {
        let subscribe = Arc::clone(&inner);
        let _ = walk(fs.as_ref(), root, &mut |p, md, err| {
            if let Some(err) = err {
                return Err(err);
            }
            if md.is_some_and(Metadata::is_dir) {
                trace!(target: "shoal::watch", path = %p, "subscribe");
                let _ = subscribe.lock().watch(p);
            }
            Ok(WalkState::Continue)
        });
    }

    let forward = Arc::clone(&inner);
    debug!(target: "shoal::watch", root = %root, "tree watch started");
    thread::spawn(move || {
        for event in rx {
            // A newly created directory extends the watched tree.
            if let Ok(md) = fs.stat(&event.path) {
                if md.is_dir() {
                    let _ = forward.lock().watch(&event.path);
                }
            }
            if events.send(event).is_err() {
                break;
            }
        }
    });

    Ok(TreeWatcher { inner })
}
