//! Byte-oriented handles over a file inode's backing data object.
//!
//! A handle is a transient cursor; it holds no lock. Writes are synchronous
//! and all-or-nothing: when the store reports an error, zero bytes were
//! written. Files are not striped; one inode maps to one data object.

use crate::cache::InodeCache;
use crate::inode::{FsCtx, Inode};
use crate::sink::Sinks;
use orfs_error::{OrfsError, Result};
use orfs_store::Pool;
use orfs_types::{Mode, Stat, unix_secs};
use std::io::SeekFrom;
use std::sync::Arc;
use tracing::trace;

/// Pool handles and shared state captured from the façade at open time.
struct HandleIo {
    data: Arc<dyn Pool>,
    md: Arc<dyn Pool>,
    cache: Arc<InodeCache>,
    sinks: Arc<Sinks>,
}

/// An open file (or directory) handle.
pub struct FileHandle {
    inode: Arc<Inode>,
    pos: u64,
    io: Option<HandleIo>,
}

impl FileHandle {
    pub(crate) fn open(
        inode: Arc<Inode>,
        data: Arc<dyn Pool>,
        md: Arc<dyn Pool>,
        cache: Arc<InodeCache>,
        sinks: Arc<Sinks>,
    ) -> Self {
        trace!(target: "orfs::file", event = "open", inode = %inode.id());
        Self {
            inode,
            pos: 0,
            io: Some(HandleIo {
                data,
                md,
                cache,
                sinks,
            }),
        }
    }

    /// The inode this handle points at.
    #[must_use]
    pub fn inode(&self) -> &Arc<Inode> {
        &self.inode
    }

    fn io(&self) -> Result<&HandleIo> {
        self.io
            .as_ref()
            .ok_or_else(|| OrfsError::Invalid("file handle is closed".to_owned()))
    }

    fn require_file(&self) -> Result<()> {
        if self.inode.is_dir() {
            return Err(OrfsError::Invalid(format!(
                "{} is a directory",
                self.inode.name()
            )));
        }
        Ok(())
    }

    /// Read at the cursor, advancing by the bytes returned. A data object
    /// that does not exist yet reads as empty.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let io = self.io()?;
        self.require_file()?;
        let n = match io.data.read(&self.inode.oid(), buf, self.pos) {
            Ok(n) => n,
            Err(err) if err.is_not_found() => 0,
            Err(err) => return Err(err),
        };
        self.pos += n as u64;
        Ok(n)
    }

    /// Write at the cursor. On error the store wrote nothing; on success the
    /// cursor advances and the in-memory inode size grows if passed.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let io = self.io()?;
        self.require_file()?;
        // The store is fully consistent: an error means the write was
        // aborted, so the caller is told zero bytes were written.
        io.data.write(&self.inode.oid(), buf, self.pos)?;
        self.pos += buf.len() as u64;
        self.inode.grow_to(self.pos);
        Ok(buf.len())
    }

    /// Move the cursor. `SeekFrom::End` resolves the size with a fresh stat
    /// of the data object; a missing object counts as empty.
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let io = self.io()?;
        let new_pos = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
            SeekFrom::End(delta) => {
                self.require_file()?;
                let size = match io.data.stat(&self.inode.oid()) {
                    Ok(object) => object.size,
                    Err(err) if err.is_not_found() => 0,
                    Err(err) => return Err(err),
                };
                size.checked_add_signed(delta)
            }
        };
        let Some(new_pos) = new_pos else {
            return Err(OrfsError::Invalid("seek before start of file".to_owned()));
        };
        self.pos = new_pos;
        Ok(self.pos)
    }

    /// List the directory this handle was opened on.
    pub fn readdir(&self) -> Result<Vec<Stat>> {
        let io = self.io()?;
        let ctx = FsCtx {
            data: &io.data,
            md: &io.md,
            cache: io.cache.as_ref(),
            sinks: io.sinks.as_ref(),
        };
        let entries = self.inode.list(&ctx)?;
        Ok(entries.iter().map(|inode| inode.stat()).collect())
    }

    /// Fresh stat: size and mtime from the backing data object, identity
    /// from the inode. Directories report their cached attributes.
    pub fn stat(&self) -> Result<Stat> {
        let io = self.io()?;
        if self.inode.is_dir() {
            return Ok(self.inode.stat());
        }
        let mut stat = self.inode.stat();
        match io.data.stat(&self.inode.oid()) {
            Ok(object) => {
                stat.size = i64::try_from(object.size).unwrap_or(i64::MAX);
                stat.mtime = unix_secs(object.mtime);
                stat.mode = Mode::file(stat.mode.perm());
            }
            // Never written: the inode's own view stands.
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err),
        }
        Ok(stat)
    }

    /// Zero the cursor and drop the pool references. Idempotent; writes are
    /// synchronous, so there is nothing to flush.
    pub fn close(&mut self) -> Result<()> {
        trace!(target: "orfs::file", event = "close", inode = %self.inode.id());
        self.pos = 0;
        self.io = None;
        Ok(())
    }
}
