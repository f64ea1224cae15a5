//! End-to-end behavior of the in-memory filesystem, including the generic
//! utilities layered on top of it.

use std::io::SeekFrom;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crossbeam_channel::bounded;

use shoal_error::{ErrorKind, is_kind, is_not_exist};
use shoal_mem::{BLOCK_SIZE, MemFs};
use shoal_vfs::{
    EventKind, FileSystem, Mode, OpenFlag, WalkState, Watcher, glob, mkdir_all, read_file, walk,
    watch_tree, write_file,
};

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 251) as u8).collect()
}

#[test]
fn mkdir_create_write_read() {
    let fs = MemFs::new();
    fs.mkdir("/tmp", Mode::new(0o755)).expect("mkdir");
    assert!(fs.stat("/tmp").expect("stat").is_dir());

    let mut file = fs.create("/tmp/x.txt").expect("create");
    assert_eq!(file.write(&[1, 2, 3, 4, 5]).expect("write"), 5);
    file.close().expect("close");

    assert_eq!(read_file(&fs, "/tmp/x.txt").expect("read"), [1, 2, 3, 4, 5]);
}

#[test]
fn end_to_end_file_lifecycle() {
    let fs = MemFs::new();
    let write_path = "/tmp/write_file_test.txt";
    let create_path = "/tmp/foo/create_file_test.txt";
    let mut want = pattern(BLOCK_SIZE * 3 - 42);

    fs.mkdir("/tmp", Mode::new(0o755)).expect("mkdir /tmp");
    fs.mkdir("/tmp/foo", Mode::new(0o755)).expect("mkdir /tmp/foo");

    // Nothing exists yet.
    assert!(is_not_exist(&fs.stat(write_path).expect_err("stat")));
    assert!(is_not_exist(&fs.open(write_path).expect_err("open")));
    assert!(is_not_exist(
        &fs.chmod(write_path, Mode::new(0)).expect_err("chmod")
    ));

    write_file(&fs, write_path, &want, Mode::new(0o644)).expect("write_file");

    let mut file = fs.create(create_path).expect("create");
    file.close().expect("close");
    assert!(fs.stat(create_path).is_ok());

    let md = fs.stat(write_path).expect("stat");
    assert_eq!(md.name(), "write_file_test.txt");
    assert_eq!(md.size(), want.len() as u64);
    assert_eq!(md.mode().perm(), Mode::new(0o644));
    assert!(!md.is_dir());
    assert!(md.modified() > SystemTime::UNIX_EPOCH);
    assert!(md.sys().is_none());

    assert_eq!(read_file(&fs, write_path).expect("read_file"), want);

    // Append through an append-mode handle.
    let extra = pattern(42);
    let mut appender = fs
        .open_file(write_path, OpenFlag::WRONLY | OpenFlag::APPEND, Mode::new(0))
        .expect("open append");
    appender.write(&extra).expect("append");
    appender.close().expect("close");
    want.extend_from_slice(&extra);
    assert_eq!(read_file(&fs, write_path).expect("read_file"), want);

    fs.chmod(write_path, Mode::new(0o755)).expect("chmod");
    assert_eq!(
        fs.stat(write_path).expect("stat").mode().perm(),
        Mode::new(0o755)
    );
}

#[test]
fn access_mode_and_directory_handles() {
    let fs = MemFs::new();

    let mut writer = fs
        .open_file("/t", OpenFlag::WRONLY | OpenFlag::CREATE, Mode::new(0o644))
        .expect("open");
    writer.write(&[10, 20, 30]).expect("write");
    writer.close().expect("close");

    let mut reader = fs.open("/t").expect("open read-only");
    let err = reader.write(&[1]).expect_err("write on read-only");
    assert!(is_kind(&err, ErrorKind::ReadOnly));

    fs.mkdir("/z", Mode::new(0)).expect("mkdir");
    let mut dir = fs.open("/z").expect("open dir");
    let err = dir.read(&mut [0u8; 4]).expect_err("read on dir");
    assert!(is_kind(&err, ErrorKind::IsDir));
    let err = dir.seek(SeekFrom::Start(0)).expect_err("seek on dir");
    assert!(is_kind(&err, ErrorKind::IsDir));

    // Opening a directory with writing flags is rejected outright.
    let err = fs
        .open_file("/z", OpenFlag::RDWR, Mode::new(0))
        .expect_err("writable dir open");
    assert!(is_kind(&err, ErrorKind::IsDir));

    // A regular file handle rejects directory listing.
    let mut file = fs.open("/t").expect("open");
    let err = file.readdir_names(-1).expect_err("readdir on file");
    assert!(is_kind(&err, ErrorKind::NotDir));
}

#[test]
fn rename_preserves_content_and_identity() {
    let fs = MemFs::new();
    write_file(&fs, "/old.txt", b"payload", Mode::new(0o644)).expect("write");
    let before = fs.lstat("/old.txt").expect("lstat");

    fs.rename("/old.txt", "/new.txt").expect("rename");

    assert!(is_not_exist(&fs.lstat("/old.txt").expect_err("old gone")));
    let after = fs.lstat("/new.txt").expect("lstat");
    assert_eq!(after.size(), before.size());
    assert_eq!(after.mode().bits(), before.mode().bits());
    assert_eq!(read_file(&fs, "/new.txt").expect("read"), b"payload");
}

#[test]
fn watcher_sees_lifecycle_events_in_order() {
    let fs = MemFs::new();
    let (tx, rx) = bounded(10);
    let mut watcher = fs.watcher(tx).expect("watcher");
    watcher.watch("/").expect("watch root");

    let mut file = fs.create("/foo.txt").expect("create");
    file.close().expect("close");

    let mut writer = fs
        .open_file("/foo.txt", OpenFlag::WRONLY, Mode::new(0))
        .expect("open");
    writer.write(&[1, 2, 3, 4, 5]).expect("write");
    writer.close().expect("close");

    fs.rename("/foo.txt", "/bar.txt").expect("rename");
    fs.remove("/bar.txt").expect("remove");
    watcher.close().expect("close watcher");

    let got: Vec<(EventKind, String)> = rx.into_iter().map(|e| (e.kind, e.path)).collect();
    assert_eq!(
        got,
        vec![
            (EventKind::CREATE, "/foo.txt".to_owned()),
            (EventKind::MODIFY, "/foo.txt".to_owned()),
            (EventKind::CREATE, "/bar.txt".to_owned()),
            (EventKind::RENAME, "/foo.txt".to_owned()),
            (EventKind::REMOVE, "/bar.txt".to_owned()),
        ]
    );
}

#[test]
fn full_watcher_channel_drops_events() {
    let fs = MemFs::new();
    let (tx, rx) = bounded(2);
    let mut watcher = fs.watcher(tx).expect("watcher");
    watcher.watch("/").expect("watch root");

    for name in ["/a", "/b", "/c", "/d"] {
        fs.create(name).expect("create").close().expect("close");
    }
    watcher.close().expect("close watcher");

    // Only the first two creates fit; the rest were dropped, and order is
    // preserved for the delivered prefix.
    let got: Vec<String> = rx.into_iter().map(|e| e.path).collect();
    assert_eq!(got, vec!["/a".to_owned(), "/b".to_owned()]);
}

#[test]
fn watcher_on_subdirectory_sees_entry_names() {
    let fs = MemFs::new();
    fs.mkdir("/d", Mode::new(0o755)).expect("mkdir");
    let (tx, rx) = bounded(10);
    let mut watcher = fs.watcher(tx).expect("watcher");
    watcher.watch("/d").expect("watch");

    fs.create("/d/inner.txt").expect("create").close().expect("close");
    watcher.close().expect("close");

    let got: Vec<String> = rx.into_iter().map(|e| e.path).collect();
    assert_eq!(got, vec!["/d/inner.txt".to_owned()]);
}

#[test]
fn walk_is_preorder_and_lexicographic() {
    let fs = MemFs::new();
    fs.mkdir("/d", Mode::new(0o777)).expect("mkdir");
    for name in ["/d/a", "/d/b", "/d/c"] {
        fs.create(name).expect("create").close().expect("close");
    }

    let mut visited = Vec::new();
    walk(&fs, "/", &mut |path, md, err| {
        assert!(err.is_none(), "unexpected walk error at {path}");
        assert!(md.is_some());
        visited.push(path.to_owned());
        Ok(WalkState::Continue)
    })
    .expect("walk");

    assert_eq!(visited, ["/", "/d", "/d/a", "/d/b", "/d/c"]);
}

#[test]
fn deep_walk_visits_every_node_once() {
    let fs = MemFs::new();
    let dirs = ["/testdata", "/testdata/b", "/testdata/d", "/testdata/d/y", "/testdata/d/z"];
    let files = [
        "/testdata/a",
        "/testdata/c",
        "/testdata/d/x",
        "/testdata/d/z/u",
        "/testdata/d/z/v",
    ];
    for dir in dirs {
        fs.mkdir(dir, Mode::new(0o770)).expect("mkdir");
    }
    for file in files {
        fs.create(file).expect("create").close().expect("close");
    }

    let mut visited = Vec::new();
    walk(&fs, "/testdata", &mut |path, _, err| {
        assert!(err.is_none());
        visited.push(path.to_owned());
        Ok(WalkState::Continue)
    })
    .expect("walk");

    assert_eq!(
        visited,
        [
            "/testdata",
            "/testdata/a",
            "/testdata/b",
            "/testdata/c",
            "/testdata/d",
            "/testdata/d/x",
            "/testdata/d/y",
            "/testdata/d/z",
            "/testdata/d/z/u",
            "/testdata/d/z/v",
        ]
    );
}

#[test]
fn skip_dir_prunes_without_aborting() {
    let fs = MemFs::new();
    fs.mkdir("/keep", Mode::new(0o755)).expect("mkdir");
    fs.mkdir("/skip", Mode::new(0o755)).expect("mkdir");
    fs.create("/keep/f").expect("create").close().expect("close");
    fs.create("/skip/hidden").expect("create").close().expect("close");
    fs.create("/tail").expect("create").close().expect("close");

    let mut visited = Vec::new();
    walk(&fs, "/", &mut |path, md, _| {
        visited.push(path.to_owned());
        if md.is_some_and(|m| m.is_dir()) && path == "/skip" {
            return Ok(WalkState::SkipDir);
        }
        Ok(WalkState::Continue)
    })
    .expect("walk");

    assert_eq!(visited, ["/", "/keep", "/keep/f", "/skip", "/tail"]);
}

#[test]
fn skip_dir_on_file_skips_remaining_siblings() {
    let fs = MemFs::new();
    fs.mkdir("/d", Mode::new(0o755)).expect("mkdir");
    for name in ["/d/a", "/d/b", "/d/c"] {
        fs.create(name).expect("create").close().expect("close");
    }
    fs.create("/z").expect("create").close().expect("close");

    let mut visited = Vec::new();
    walk(&fs, "/", &mut |path, _, _| {
        visited.push(path.to_owned());
        if path == "/d/a" {
            return Ok(WalkState::SkipDir);
        }
        Ok(WalkState::Continue)
    })
    .expect("walk");

    // /d/b and /d/c are skipped; the walk still reaches /z.
    assert_eq!(visited, ["/", "/d", "/d/a", "/z"]);
}

#[test]
fn mkdir_all_creates_chain_and_is_idempotent() {
    let fs = MemFs::new();
    mkdir_all(&fs, "/a/b/c", Mode::new(0o755)).expect("mkdir_all");
    for path in ["/a", "/a/b", "/a/b/c"] {
        assert!(fs.stat(path).expect("stat").is_dir(), "{path} should be a dir");
    }
    mkdir_all(&fs, "/a/b/c", Mode::new(0o755)).expect("second run");

    write_file(&fs, "/a/file", b"x", Mode::new(0o644)).expect("write");
    let err = mkdir_all(&fs, "/a/file", Mode::new(0o755)).expect_err("over file");
    assert!(is_kind(&err, ErrorKind::NotDir));
}

#[test]
fn glob_matches_shell_patterns() {
    let fs = MemFs::new();
    fs.create("foo.bar").expect("create").close().expect("close");
    fs.create("fubar.go").expect("create").close().expect("close");
    fs.mkdir("/fun", Mode::new(0o750)).expect("mkdir");
    fs.create("/fun/foo.bar").expect("create").close().expect("close");

    assert_eq!(
        glob(&fs, "/*").expect("glob"),
        ["/foo.bar", "/fubar.go", "/fun"]
    );
    assert_eq!(glob(&fs, "/*/foo.bar").expect("glob"), ["/fun/foo.bar"]);
    assert!(glob(&fs, "no_match").expect("glob").is_empty());
    assert_eq!(glob(&fs, "/f?bar.go").expect("glob"), ["/fubar.go"]);
    assert_eq!(
        glob(&fs, "/f[ou]*").expect("glob"),
        ["/foo.bar", "/fubar.go", "/fun"]
    );
}

#[test]
fn readdir_names_through_public_handle() {
    let fs = MemFs::new();
    fs.mkdir("/d", Mode::new(0o755)).expect("mkdir");
    for name in ["/d/one", "/d/two", "/d/three"] {
        fs.create(name).expect("create").close().expect("close");
    }

    let mut dir = fs.open("/d").expect("open");
    let names = dir.readdir_names(-1).expect("readdir_names");
    assert_eq!(names, ["one", "two", "three"]);

    let mut dir = fs.open("/d").expect("open");
    let entries = dir.readdir(2).expect("bounded readdir");
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].name(), "one");
    assert!(!entries[0].is_dir());
}

#[test]
fn tree_watch_follows_new_directories() {
    let fs: Arc<dyn FileSystem> = Arc::new(MemFs::new());
    let (tx, rx) = bounded(16);
    let mut tree = watch_tree(Arc::clone(&fs), "/", tx).expect("watch_tree");

    fs.mkdir("/d", Mode::new(0o755)).expect("mkdir");
    let event = rx
        .recv_timeout(Duration::from_secs(5))
        .expect("mkdir event");
    assert_eq!(event.kind, EventKind::CREATE);
    assert_eq!(event.path, "/d");

    // The forwarding thread subscribed /d before delivering its event, so a
    // create inside it is observed too.
    fs.create("/d/inner").expect("create").close().expect("close");
    let event = rx
        .recv_timeout(Duration::from_secs(5))
        .expect("inner event");
    assert_eq!(event.kind, EventKind::CREATE);
    assert_eq!(event.path, "/d/inner");

    tree.close().expect("close");
    for event in rx {
        // Drain whatever was in flight; the channel must disconnect.
        drop(event);
    }
}

#[test]
fn write_visible_across_handles() {
    let fs = MemFs::new();
    let mut writer = fs.create("/shared").expect("create");
    writer.write(b"first").expect("write");

    let mut reader = fs.open("/shared").expect("open");
    let mut buf = [0u8; 16];
    let n = reader.read(&mut buf).expect("read");
    assert_eq!(&buf[..n], b"first");

    writer.write(b" second").expect("write");
    let n = reader.read(&mut buf).expect("read rest");
    assert_eq!(&buf[..n], b" second");

    writer.close().expect("close");
    reader.close().expect("close");
}

#[test]
fn concurrent_writers_do_not_corrupt_tables() {
    let fs = Arc::new(MemFs::new());
    let mut handles = Vec::new();
    for worker in 0..8 {
        let fs = Arc::clone(&fs);
        handles.push(std::thread::spawn(move || {
            let path = format!("/w{worker}");
            let content = pattern(BLOCK_SIZE + worker * 37);
            write_file(fs.as_ref(), &path, &content, Mode::new(0o644)).expect("write");
            assert_eq!(read_file(fs.as_ref(), &path).expect("read"), content);
            fs.remove(&path).expect("remove");
        }));
    }
    for handle in handles {
        handle.join().expect("worker");
    }
    // Every worker's file is gone again.
    for worker in 0..8 {
        assert!(is_not_exist(
            &fs.stat(&format!("/w{worker}")).expect_err("gone")
        ));
    }
}
