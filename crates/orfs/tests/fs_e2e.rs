//! End-to-end scenarios over an in-memory cluster: connect, tree mutation,
//! byte I/O, rename across directories, persistence across reconnects, and
//! the orphan sweep.

use orfs::{Cluster, Filesystem, MemCluster, Mode, O_CREATE, OrfsError, Stat};
use parking_lot::Mutex;
use std::io::{SeekFrom, Write};
use std::sync::Arc;

fn connected(cluster: &Arc<MemCluster>) -> Filesystem {
    let mut fs = Filesystem::new(
        Arc::clone(cluster) as Arc<dyn Cluster>,
        "data",
        "data-metadata",
        1024,
    );
    fs.connect().expect("connect");
    fs
}

fn fresh_fs() -> Filesystem {
    connected(&Arc::new(MemCluster::new()))
}

fn list(fs: &Filesystem, path: &str) -> Vec<Stat> {
    let handle = fs.open_file(path, 0, Mode::dir(0o755)).expect("open dir");
    let mut entries = handle.readdir().expect("readdir");
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    entries
}

#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn connect_empty_fs_has_empty_root() {
    let fs = fresh_fs();
    assert!(list(&fs, "/").is_empty());

    let root = fs.stat("/").expect("stat root");
    assert!(root.is_dir);
    assert_eq!(root.name, "/");
    assert_eq!(root.inode, uuid::Uuid::nil());
}

#[test]
fn mkdir_shows_up_in_listing() {
    let fs = fresh_fs();
    fs.mkdir("/test", Mode::dir(0o755)).expect("mkdir");

    let entries = list(&fs, "/");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, "test");
    assert!(entries[0].is_dir);
    assert!(entries[0].mode.is_dir());
}

#[test]
fn mkdir_requires_parent_and_rejects_duplicates() {
    let fs = fresh_fs();
    assert!(matches!(
        fs.mkdir("/no/such/parent", Mode::dir(0o755)),
        Err(OrfsError::NotExist(_))
    ));

    fs.mkdir("/test", Mode::dir(0o755)).unwrap();
    assert!(matches!(
        fs.mkdir("/test", Mode::dir(0o755)),
        Err(OrfsError::Exist(_))
    ));
}

#[test]
fn write_then_read_through_new_handle() {
    let fs = fresh_fs();
    fs.mkdir("/test", Mode::dir(0o755)).unwrap();

    let mut file = fs
        .open_file("/test/f", O_CREATE, Mode::file(0o644))
        .expect("create file");
    assert_eq!(file.write(b"hello").unwrap(), 5);
    file.close().unwrap();

    let mut file = fs.open_file("/test/f", 0, Mode::file(0o644)).expect("reopen");
    let mut buf = [0_u8; 5];
    assert_eq!(file.read(&mut buf).unwrap(), 5);
    assert_eq!(&buf, b"hello");

    assert_eq!(fs.stat("/test/f").unwrap().size, 5);
}

#[test]
fn open_without_create_fails_on_missing() {
    let fs = fresh_fs();
    assert!(matches!(
        fs.open_file("/nope", 0, Mode::file(0o644)),
        Err(OrfsError::NotExist(_))
    ));
}

#[test]
fn seek_end_uses_fresh_store_size() {
    let fs = fresh_fs();
    let mut file = fs
        .open_file("/f", O_CREATE, Mode::file(0o644))
        .unwrap();
    file.write(b"0123456789").unwrap();
    assert_eq!(file.seek(SeekFrom::End(-4)).unwrap(), 6);
    let mut buf = [0_u8; 4];
    file.read(&mut buf).unwrap();
    assert_eq!(&buf, b"6789");
}

#[test]
fn rename_across_directories_leaves_no_ghost() {
    let fs = fresh_fs();
    fs.mkdir("/a", Mode::dir(0o755)).unwrap();
    fs.mkdir("/b", Mode::dir(0o755)).unwrap();
    let mut file = fs
        .open_file("/a/x", O_CREATE, Mode::file(0o644))
        .unwrap();
    file.close().unwrap();

    fs.rename("/a/x", "/b/x").expect("rename");

    assert!(list(&fs, "/a").is_empty());
    let in_b = list(&fs, "/b");
    assert_eq!(in_b.len(), 1);
    assert_eq!(in_b[0].name, "x");

    assert!(matches!(fs.stat("/a/x"), Err(OrfsError::NotExist(_))));
    assert!(fs.stat("/b/x").is_ok());
}

#[test]
fn rename_within_directory_changes_the_name() {
    let fs = fresh_fs();
    fs.mkdir("/a", Mode::dir(0o755)).unwrap();
    let mut file = fs
        .open_file("/a/old", O_CREATE, Mode::file(0o644))
        .unwrap();
    file.close().unwrap();

    fs.rename("/a/old", "/a/new").expect("rename");
    let entries = list(&fs, "/a");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, "new");
}

#[test]
fn rename_onto_existing_name_is_exist() {
    let fs = fresh_fs();
    fs.mkdir("/a", Mode::dir(0o755)).unwrap();
    fs.open_file("/a/x", O_CREATE, Mode::file(0o644)).unwrap();
    fs.open_file("/a/y", O_CREATE, Mode::file(0o644)).unwrap();
    assert!(matches!(
        fs.rename("/a/x", "/a/y"),
        Err(OrfsError::Exist(_))
    ));
}

#[test]
fn remove_all_deletes_leaf() {
    let fs = fresh_fs();
    fs.mkdir("/d", Mode::dir(0o755)).unwrap();
    let mut file = fs
        .open_file("/d/f", O_CREATE, Mode::file(0o644))
        .unwrap();
    file.write(b"bytes").unwrap();
    file.close().unwrap();

    fs.remove_all("/d/f").expect("remove file");
    assert!(matches!(fs.stat("/d/f"), Err(OrfsError::NotExist(_))));
    assert!(list(&fs, "/d").is_empty());

    fs.remove_all("/d").expect("remove dir");
    assert!(matches!(fs.stat("/d"), Err(OrfsError::NotExist(_))));
    assert!(matches!(
        fs.remove_all("/d"),
        Err(OrfsError::NotExist(_))
    ));
}

#[test]
fn structure_survives_reconnect() {
    let cluster = Arc::new(MemCluster::new());
    {
        let fs = connected(&cluster);
        fs.mkdir("/persist", Mode::dir(0o755)).unwrap();
        let mut file = fs
            .open_file("/persist/f", O_CREATE, Mode::file(0o644))
            .unwrap();
        file.write(b"durable").unwrap();
        file.close().unwrap();
    }

    // A second client with its own cache replays the logs from the store.
    let fs = connected(&cluster);
    let entries = list(&fs, "/persist");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, "f");

    let mut file = fs.open_file("/persist/f", 0, Mode::file(0o644)).unwrap();
    let mut buf = [0_u8; 7];
    assert_eq!(file.read(&mut buf).unwrap(), 7);
    assert_eq!(&buf, b"durable");
}

#[test]
fn corrupt_log_entry_is_skipped_and_reported() {
    let cluster = Arc::new(MemCluster::new());
    let fs = connected(&cluster);
    let debug = SharedBuf::default();
    fs.set_debug_log(Box::new(debug.clone()));

    fs.mkdir("/ok", Mode::dir(0o755)).unwrap();
    // Scribble a bogus entry into the root's log behind the cache's back.
    let md = cluster.open_pool("data-metadata").unwrap();
    md.append(
        &uuid::Uuid::nil().to_string(),
        b"\n+f;3;zzz;not-a-number;0;00000000-0000-0000-0000-000000000001;beef",
    )
    .unwrap();

    // Replay still applies everything else.
    let entries = list(&fs, "/");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, "ok");
    assert!(debug.contents().contains("rejected MD entry"));
}

#[test]
fn pool_stats_reflect_written_bytes() {
    let fs = fresh_fs();
    let mut file = fs
        .open_file("/f", O_CREATE, Mode::file(0o644))
        .unwrap();
    file.write(b"12345").unwrap();
    file.close().unwrap();

    let stats = fs.pool_stats().unwrap();
    assert_eq!(stats.data.num_objects, 1);
    assert_eq!(stats.data.num_bytes, 5);
    // Root log at minimum.
    assert!(stats.metadata.num_objects >= 1);
}

#[test]
fn scrub_finds_subtree_stranded_by_remove_all() {
    let fs = fresh_fs();
    fs.mkdir("/d", Mode::dir(0o755)).unwrap();
    fs.mkdir("/d/inner", Mode::dir(0o755)).unwrap();
    let mut file = fs
        .open_file("/d/inner/f", O_CREATE, Mode::file(0o644))
        .unwrap();
    file.write(b"stranded").unwrap();
    file.close().unwrap();

    let clean = fs.scrub().unwrap();
    assert!(clean.is_clean(), "fresh tree should be clean: {clean:?}");
    assert_eq!(clean.directories, 3); // root, d, inner
    assert_eq!(clean.files, 1);

    // Non-recursive removal strands inner and its file.
    fs.remove_all("/d").unwrap();
    let report = fs.scrub().unwrap();
    assert_eq!(report.orphan_md_objects.len(), 1); // inner's log
    assert_eq!(report.orphan_data_objects.len(), 1); // f's bytes
}

#[test]
fn get_object_resolves_parent() {
    let fs = fresh_fs();
    fs.mkdir("/a", Mode::dir(0o755)).unwrap();
    fs.open_file("/a/f", O_CREATE, Mode::file(0o644)).unwrap();

    let parent = fs.get_object("/a/f", true).unwrap();
    assert_eq!(parent.name(), "a");
    let target = fs.get_object("/a/f", false).unwrap();
    assert_eq!(target.name(), "f");
    let root = fs.get_object("/", false).unwrap();
    assert_eq!(root.name(), "/");
}
