#![forbid(unsafe_code)]
//! ORFS: a hierarchical, POSIX-like filesystem over a flat object store.
//!
//! The store knows nothing about directories; ORFS supplies the structure.
//! Paths map to stable inode UUIDs, parent→child membership lives in
//! per-directory append logs in the metadata pool, and file bytes live in
//! per-file objects in the data pool. Concurrent mutation of one directory
//! serialises through the store's exclusive object locks.
//!
//! ```
//! use orfs::{Filesystem, MemCluster, Mode, O_CREATE};
//! use std::sync::Arc;
//!
//! let cluster = Arc::new(MemCluster::new());
//! let mut fs = Filesystem::new(cluster, "data", "data-metadata", 1024);
//! fs.connect().unwrap();
//!
//! fs.mkdir("/test", Mode::dir(0o755)).unwrap();
//! let mut file = fs
//!     .open_file("/test/hello", O_CREATE, Mode::file(0o644))
//!     .unwrap();
//! file.write(b"hello").unwrap();
//! file.close().unwrap();
//!
//! assert_eq!(fs.stat("/test/hello").unwrap().size, 5);
//! ```

mod cache;
mod file;
mod inode;
mod scrub;
mod sink;

pub use crate::file::FileHandle;
pub use crate::inode::Inode;
pub use crate::scrub::ScrubReport;
pub use orfs_error::{OrfsError, Result};
pub use orfs_store::{Cluster, MemCluster, MemPool, ObjectStat, Pool, PoolStats};
pub use orfs_types::{Mode, O_CREATE, O_RDONLY, O_RDWR, O_WRONLY, Stat};

use crate::cache::InodeCache;
use crate::inode::FsCtx;
use crate::sink::Sinks;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::Arc;
use tracing::debug;

/// Pool statistics for the two namespaces a filesystem spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsPoolStats {
    pub data: PoolStats,
    pub metadata: PoolStats,
}

/// One mounted ORFS instance.
///
/// Both pools may be the same pool as long as it supports partial writes;
/// an erasure-coded pool is not supported for metadata.
pub struct Filesystem {
    cluster: Arc<dyn Cluster>,
    data_pool: String,
    md_pool: String,
    data: Option<Arc<dyn Pool>>,
    md: Option<Arc<dyn Pool>>,
    cache: Arc<InodeCache>,
    sinks: Arc<Sinks>,
    root: Option<Arc<Inode>>,
}

impl Filesystem {
    /// Create an unconnected filesystem over `data_pool` and `md_pool`.
    /// `cache_size` bounds the inode cache (number of records).
    #[must_use]
    pub fn new(
        cluster: Arc<dyn Cluster>,
        data_pool: &str,
        md_pool: &str,
        cache_size: usize,
    ) -> Self {
        Self {
            cluster,
            data_pool: data_pool.to_owned(),
            md_pool: md_pool.to_owned(),
            data: None,
            md: None,
            cache: Arc::new(InodeCache::new(cache_size)),
            sinks: Arc::new(Sinks::discard()),
            root: None,
        }
    }

    /// Route the operational log to `writer`. Default is to discard.
    pub fn set_log(&self, writer: Box<dyn Write + Send>) {
        self.sinks.log.set(writer);
    }

    /// Route the debug log to `writer`; rejected metadata entries land here
    /// with their raw bytes. Default is to discard.
    pub fn set_debug_log(&self, writer: Box<dyn Write + Send>) {
        self.sinks.debug.set(writer);
    }

    /// Open both pool contexts and materialise the root directory.
    pub fn connect(&mut self) -> Result<()> {
        self.sinks
            .debug
            .write_line(&format!("Connect: opening pool context for {}", self.data_pool));
        let data = self.cluster.open_pool(&self.data_pool)?;
        self.sinks
            .debug
            .write_line(&format!("Connect: opening pool context for {}", self.md_pool));
        let md = self.cluster.open_pool(&self.md_pool)?;
        self.data = Some(data);
        self.md = Some(md);

        let root = Arc::new(Inode::root());
        root.resync(&self.ctx()?)?;
        self.root = Some(root);

        debug!(
            target: "orfs::fs",
            event = "connected",
            data_pool = %self.data_pool,
            md_pool = %self.md_pool
        );
        self.sinks.log.write_line("Loaded rootdir");
        Ok(())
    }

    fn pools(&self) -> Result<(&Arc<dyn Pool>, &Arc<dyn Pool>)> {
        match (&self.data, &self.md) {
            (Some(data), Some(md)) => Ok((data, md)),
            _ => Err(OrfsError::Invalid(
                "filesystem is not connected".to_owned(),
            )),
        }
    }

    fn ctx(&self) -> Result<FsCtx<'_>> {
        let (data, md) = self.pools()?;
        Ok(FsCtx {
            data,
            md,
            cache: self.cache.as_ref(),
            sinks: self.sinks.as_ref(),
        })
    }

    fn root(&self) -> Result<&Arc<Inode>> {
        self.root
            .as_ref()
            .ok_or_else(|| OrfsError::Invalid("filesystem is not connected".to_owned()))
    }

    /// Resolve `path` to an inode; with `get_parent` the walk stops one
    /// segment early. The empty segment sequence is the root.
    pub fn get_object(&self, path: &str, get_parent: bool) -> Result<Arc<Inode>> {
        let ctx = self.ctx()?;
        let segments = path_split(path);
        let take = segments.len().saturating_sub(usize::from(get_parent));

        let mut current = Arc::clone(self.root()?);
        for segment in &segments[..take] {
            current = current.get(&ctx, segment).map_err(|err| err.at_path(path))?;
        }
        Ok(current)
    }

    /// Create a directory at `path`; the parent must exist.
    pub fn mkdir(&self, path: &str, mode: Mode) -> Result<()> {
        self.sinks.debug.write_line(&format!("Mkdir: {path}"));
        let ctx = self.ctx()?;
        let parent = self.get_object(path, true)?;
        let name = leaf(path)?;
        let subdir = Inode::create(&ctx, name, true, mode)?;
        parent.add(&ctx, &subdir)
    }

    /// Open a file or directory. With [`O_CREATE`] a missing leaf is created
    /// as a file under the resolved parent; other flag bits are accepted and
    /// ignored. Opening a directory yields a handle whose one meaningful
    /// operation is [`FileHandle::readdir`].
    pub fn open_file(&self, path: &str, flags: u32, mode: Mode) -> Result<FileHandle> {
        self.sinks
            .debug
            .write_line(&format!("OpenFile: {path}, flags: {flags:#o}"));
        let ctx = self.ctx()?;
        let inode = match self.get_object(path, false) {
            Ok(inode) => inode,
            Err(OrfsError::NotExist(_)) if flags & O_CREATE != 0 => {
                let parent = self.get_object(path, true)?;
                let name = leaf(path)?;
                let file = Inode::create(&ctx, name, false, mode)?;
                parent.add(&ctx, &file)?;
                file
            }
            Err(err) => return Err(err),
        };

        let (data, md) = self.pools()?;
        Ok(FileHandle::open(
            inode,
            Arc::clone(data),
            Arc::clone(md),
            Arc::clone(&self.cache),
            Arc::clone(&self.sinks),
        ))
    }

    /// Remove the object at `path`: unlink from its parent and delete its
    /// backing storage. Not recursive; removing a populated directory
    /// strands its subtree (see [`Filesystem::scrub`]).
    pub fn remove_all(&self, path: &str) -> Result<()> {
        self.sinks.debug.write_line(&format!("RemoveAll: {path}"));
        let ctx = self.ctx()?;
        let parent = self.get_object(path, true)?;
        let name = leaf(path)?;
        let subject = parent.get(&ctx, name).map_err(|err| err.at_path(path))?;
        parent.delete(&ctx, &subject)
    }

    /// Move `old` to `new`. Not atomic: the subject is linked into the new
    /// parent before the old binding is removed, so a crash in between
    /// leaves it visible in both directories.
    pub fn rename(&self, old: &str, new: &str) -> Result<()> {
        self.sinks
            .debug
            .write_line(&format!("Rename: {old} -> {new}"));
        let ctx = self.ctx()?;

        let old_parent = self.get_object(old, true)?;
        let old_name = leaf(old)?;
        let subject = old_parent.get(&ctx, old_name).map_err(|err| err.at_path(old))?;

        let new_parent = self.get_object(new, true)?;
        let new_name = leaf(new)?;

        subject.set_name(new_name);
        new_parent.add(&ctx, &subject)?;
        old_parent.unlink_named(&ctx, &subject, old_name)
    }

    /// Stat the object at `path` after refreshing it from the store.
    pub fn stat(&self, path: &str) -> Result<Stat> {
        self.sinks.debug.write_line(&format!("Stat: {path}"));
        let ctx = self.ctx()?;
        let subject = self.get_object(path, false)?;
        subject.read_md(&ctx).map_err(|err| err.at_path(path))?;
        Ok(subject.stat())
    }

    /// Aggregate statistics for both pools.
    pub fn pool_stats(&self) -> Result<FsPoolStats> {
        let (data, md) = self.pools()?;
        Ok(FsPoolStats {
            data: data.pool_stats()?,
            metadata: md.pool_stats()?,
        })
    }

    /// Sweep both pools for objects unreachable from the root.
    pub fn scrub(&self) -> Result<ScrubReport> {
        scrub::sweep(&self.ctx()?)
    }
}

/// Split a path on `/`, discarding empty segments; leading, trailing and
/// duplicate slashes all collapse. The root is the empty sequence.
#[must_use]
pub fn path_split(path: &str) -> Vec<&str> {
    path.split('/').filter(|segment| !segment.is_empty()).collect()
}

fn leaf(path: &str) -> Result<&str> {
    path_split(path)
        .last()
        .copied()
        .ok_or_else(|| OrfsError::Invalid(format!("path {path:?} has no leaf")))
}
