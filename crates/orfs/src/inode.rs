//! Inode records and the directory-log lifecycle.
//!
//! A directory's authoritative membership is the replayed log in the
//! metadata pool: one `I` entry for the directory itself, then `+`/`-`
//! entries, later entries overriding earlier ones. The in-memory children
//! map is a cache of that replay, refreshed when the store object's mtime
//! moves past `last_read`. Appends serialise through the store's exclusive
//! object lock; compaction rewrites the log as a fresh snapshot under the
//! same lock discipline.
//!
//! Inodes hold no back-pointer to the filesystem; operations take a
//! [`FsCtx`] carrying the two pool handles, the inode cache and the log
//! sinks.

use crate::cache::InodeCache;
use crate::sink::Sinks;
use orfs_error::{OrfsError, Result};
use orfs_md::{STATE_ADD, STATE_REMOVE, STATE_SELF};
use orfs_store::{ExclusiveLock, Pool};
use orfs_types::{Mode, Stat, systime_from_unix, unix_secs};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// Lock name serialising appends to one directory log.
const LOCK_ADD_ENTRY: &str = "AddEntry";
/// Lock name serialising compaction of one directory log.
const LOCK_SYNC: &str = "Sync";

/// Directory logs are read in contiguous blocks of this size and
/// concatenated before splitting into entries.
const READ_BLOCK: usize = 4 * 1024 * 1024;

/// Everything an inode operation needs from the filesystem façade.
pub(crate) struct FsCtx<'a> {
    pub(crate) data: &'a Arc<dyn Pool>,
    pub(crate) md: &'a Arc<dyn Pool>,
    pub(crate) cache: &'a InodeCache,
    pub(crate) sinks: &'a Sinks,
}

/// Mutable attributes and membership of one inode.
#[derive(Debug)]
struct InodeState {
    name: String,
    size: i64,
    mode: Mode,
    /// Full-resolution in memory; truncated to whole seconds on the wire.
    mtime: SystemTime,
    is_dir: bool,
    /// Wall clock of the last successful log load; epoch means never.
    last_read: SystemTime,
    /// Child name → inode id. Always empty for files.
    children: HashMap<String, Uuid>,
}

/// A directory or file inode.
#[derive(Debug)]
pub struct Inode {
    id: Uuid,
    state: RwLock<InodeState>,
}

impl Inode {
    fn with_state(id: Uuid, state: InodeState) -> Self {
        Self {
            id,
            state: RwLock::new(state),
        }
    }

    fn new_inode(name: &str, is_dir: bool, mode: Mode, id: Uuid) -> Self {
        Self::with_state(
            id,
            InodeState {
                name: name.to_owned(),
                size: 0,
                mode,
                mtime: SystemTime::now(),
                is_dir,
                last_read: UNIX_EPOCH,
                children: HashMap::new(),
            },
        )
    }

    /// In-memory root directory; the log object materialises on first
    /// `resync`.
    pub(crate) fn root() -> Self {
        Self::new_inode("/", true, Mode::dir(0o755), orfs_types::ROOT_INODE)
    }

    /// Inode populated from a log entry's stat: attributes known, log not
    /// yet loaded.
    #[must_use]
    pub fn from_stat(stat: &Stat) -> Self {
        Self::with_state(
            stat.inode,
            InodeState {
                name: stat.name.clone(),
                size: stat.size,
                mode: stat.mode,
                mtime: systime_from_unix(stat.mtime),
                is_dir: stat.is_dir,
                last_read: UNIX_EPOCH,
                children: HashMap::new(),
            },
        )
    }

    /// Bare skeleton for an inode known only by id (cache miss during
    /// resolution); `read_md` fills in the rest.
    fn skeleton(id: Uuid, name: &str) -> Self {
        Self::with_state(
            id,
            InodeState {
                name: name.to_owned(),
                size: 0,
                mode: Mode::file(0),
                mtime: UNIX_EPOCH,
                is_dir: false,
                last_read: UNIX_EPOCH,
                children: HashMap::new(),
            },
        )
    }

    /// Create a new inode with a freshly drawn unique id and persist it
    /// (directories get their initial log; file data objects appear on
    /// first write).
    pub fn create(ctx: &FsCtx<'_>, name: &str, is_dir: bool, mode: Mode) -> Result<Arc<Self>> {
        validate_name(name)?;
        let pool = if is_dir { ctx.md } else { ctx.data };

        let mut id = Uuid::new_v4();
        loop {
            match pool.stat(&id.to_string()) {
                // Already taken: draw again.
                Ok(_) => id = Uuid::new_v4(),
                Err(err) if err.is_not_found() => break,
                Err(err) => return Err(err),
            }
        }

        let mode = if is_dir {
            Mode::dir(mode.perm())
        } else {
            Mode::file(mode.perm())
        };
        let inode = Arc::new(Self::new_inode(name, is_dir, mode, id));
        inode.resync(ctx)?;
        debug!(
            target: "orfs::inode",
            event = "created",
            inode = %id,
            name,
            is_dir
        );
        Ok(inode)
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Canonical object key for this inode in either pool.
    #[must_use]
    pub fn oid(&self) -> String {
        self.id.to_string()
    }

    #[must_use]
    pub fn name(&self) -> String {
        self.state.read().name.clone()
    }

    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.state.read().is_dir
    }

    /// Snapshot of the current attributes.
    #[must_use]
    pub fn stat(&self) -> Stat {
        let state = self.state.read();
        Stat {
            name: state.name.clone(),
            size: state.size,
            mode: state.mode,
            mtime: unix_secs(state.mtime),
            is_dir: state.is_dir,
            inode: self.id,
        }
    }

    pub(crate) fn set_name(&self, name: &str) {
        let mut state = self.state.write();
        state.name = name.to_owned();
        state.mtime = SystemTime::now();
    }

    /// Raise the in-memory size after a write moved the cursor past it.
    pub(crate) fn grow_to(&self, size: u64) {
        let mut state = self.state.write();
        let size = i64::try_from(size).unwrap_or(i64::MAX);
        if size > state.size {
            state.size = size;
        }
    }

    #[must_use]
    pub fn has_child(&self, name: &str) -> bool {
        self.state.read().children.contains_key(name)
    }

    /// Look up a child by name through the cache, fabricating and loading a
    /// skeleton when the record was evicted.
    pub fn get(&self, ctx: &FsCtx<'_>, name: &str) -> Result<Arc<Inode>> {
        let child_id = self.state.read().children.get(name).copied();
        let Some(child_id) = child_id else {
            debug!(
                target: "orfs::inode",
                event = "lookup_miss",
                dir = %self.id,
                name
            );
            return Err(OrfsError::NotExist(name.to_owned()));
        };
        get_obj_inode(ctx, child_id, Some(name))
    }

    /// Reload the log, then snapshot the children as inode handles.
    pub fn list(&self, ctx: &FsCtx<'_>) -> Result<Vec<Arc<Inode>>> {
        if !self.is_dir() {
            return Err(OrfsError::Invalid(format!(
                "{} is not a directory",
                self.name()
            )));
        }
        self.read_md(ctx)?;
        let children: Vec<(String, Uuid)> = {
            let state = self.state.read();
            state
                .children
                .iter()
                .map(|(name, id)| (name.clone(), *id))
                .collect()
        };
        children
            .into_iter()
            .map(|(name, id)| get_obj_inode(ctx, id, Some(&name)))
            .collect()
    }

    /// Link `child` into this directory: persist the child, append a `+`
    /// entry under the store lock, then update the in-memory map and cache.
    pub fn add(&self, ctx: &FsCtx<'_>, child: &Arc<Inode>) -> Result<()> {
        if !self.is_dir() {
            return Err(OrfsError::NotExist(self.name()));
        }
        let child_name = child.name();
        validate_name(&child_name)?;

        let mut state = self.state.write();
        if state.children.contains_key(&child_name) {
            return Err(OrfsError::Exist(child_name));
        }

        child.resync(ctx)?;
        add_md_entry(ctx, self.id, STATE_ADD, &child.stat())?;
        state.children.insert(child_name, child.id());
        ctx.cache.insert(Arc::clone(child));
        Ok(())
    }

    /// Remove the binding for `child` under its current name. The child's
    /// backing storage is untouched.
    pub fn unlink(&self, ctx: &FsCtx<'_>, child: &Arc<Inode>) -> Result<()> {
        self.unlink_named(ctx, child, &child.name())
    }

    /// Remove the binding `binding` → `child`. The `-` entry carries the
    /// binding name, which after a rename differs from the child's current
    /// name.
    pub(crate) fn unlink_named(
        &self,
        ctx: &FsCtx<'_>,
        child: &Arc<Inode>,
        binding: &str,
    ) -> Result<()> {
        let mut state = self.state.write();
        let mut stat = child.stat();
        stat.name = binding.to_owned();
        add_md_entry(ctx, self.id, STATE_REMOVE, &stat)?;
        state.children.remove(binding);
        Ok(())
    }

    /// Unlink `child`, then delete its backing object.
    pub fn delete(&self, ctx: &FsCtx<'_>, child: &Arc<Inode>) -> Result<()> {
        if !self.is_dir() {
            return Err(OrfsError::NotExist(self.name()));
        }
        self.unlink(ctx, child)?;
        child.fdelete(ctx)
    }

    /// Delete this inode's backing object from its pool. A file that was
    /// never written has no data object; that is not an error.
    pub(crate) fn fdelete(&self, ctx: &FsCtx<'_>) -> Result<()> {
        let pool = if self.is_dir() { ctx.md } else { ctx.data };
        match pool.delete(&self.oid()) {
            Err(err) if err.is_not_found() => Ok(()),
            result => result,
        }
    }

    /// Replay the directory log from the metadata pool if the store object
    /// is newer than the last load. A no-op for file inodes, whose
    /// attributes live in their parent's log.
    pub fn read_md(&self, ctx: &FsCtx<'_>) -> Result<()> {
        let oid = self.oid();
        let object = match ctx.md.stat(&oid) {
            Ok(object) => object,
            Err(err) if err.is_not_found() && !self.is_dir() => return Ok(()),
            Err(err) => return Err(err),
        };

        let mut state = self.state.write();
        if object.mtime <= state.last_read {
            // Memory already has the latest version.
            return Ok(());
        }

        let data = read_log_bytes(ctx.md.as_ref(), &oid)?;
        for raw in data.split(|&b| b == b'\n') {
            match orfs_md::decode_entry(raw) {
                Err(OrfsError::MdEmpty) => {}
                Err(err) => {
                    // Rejected entries are logged and skipped; the rest of
                    // the replay still applies.
                    ctx.sinks.debug.write_line(&format!(
                        "rejected MD entry in {oid}: {err}; raw: {:?}",
                        String::from_utf8_lossy(raw)
                    ));
                    warn!(
                        target: "orfs::inode",
                        event = "md_entry_rejected",
                        dir = %oid,
                        error = %err
                    );
                }
                Ok((STATE_ADD, stat)) => {
                    trace!(
                        target: "orfs::inode",
                        event = "replay_add",
                        dir = %oid,
                        name = %stat.name,
                        child = %stat.inode
                    );
                    state.children.insert(stat.name.clone(), stat.inode);
                    ctx.cache
                        .get_or_insert_with(stat.inode, || Arc::new(Inode::from_stat(&stat)));
                }
                Ok((STATE_REMOVE, stat)) => {
                    trace!(
                        target: "orfs::inode",
                        event = "replay_remove",
                        dir = %oid,
                        name = %stat.name
                    );
                    state.children.remove(&stat.name);
                }
                Ok((STATE_SELF, stat)) => {
                    state.name = stat.name;
                    state.size = stat.size;
                    state.mode = stat.mode;
                    state.mtime = systime_from_unix(stat.mtime);
                    state.is_dir = stat.is_dir;
                }
                Ok((status, _)) => {
                    ctx.sinks.debug.write_line(&format!(
                        "weird status {status:#04x} in {oid}; aborting replay"
                    ));
                    return Err(OrfsError::WeirdStatus { status });
                }
            }
        }
        state.last_read = SystemTime::now();
        Ok(())
    }

    /// Compact this directory's log: one fresh `I` entry plus one `+` per
    /// current child, written in a single `write_full` under the store's
    /// exclusive lock. Triggered when the in-memory mtime has moved past
    /// `last_read`; a no-op for files.
    pub fn resync(&self, ctx: &FsCtx<'_>) -> Result<()> {
        {
            let state = self.state.read();
            if !state.is_dir || state.mtime <= state.last_read {
                return Ok(());
            }
        }

        let oid = self.oid();
        let exists = match ctx.md.stat(&oid) {
            Ok(_) => true,
            Err(err) if err.is_not_found() => false,
            Err(err) => return Err(err),
        };
        let _guard = if exists {
            Some(ExclusiveLock::acquire(
                ctx.md.as_ref(),
                &oid,
                LOCK_SYNC,
                &oid,
                "Sync of dir",
            )?)
        } else {
            None
        };

        // Re-read under the lock so compaction cannot lose concurrent
        // appends; only "not found" is acceptable here.
        match self.read_md(ctx) {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err),
        }

        let (self_stat, children) = {
            let state = self.state.read();
            let children: Vec<(String, Uuid)> = state
                .children
                .iter()
                .map(|(name, id)| (name.clone(), *id))
                .collect();
            drop(state);
            (self.stat(), children)
        };

        let mut payload = orfs_md::encode_entry(STATE_SELF, &self_stat);
        for (name, child_id) in children {
            // Children come from the cache to pick up current attributes;
            // the binding name is authoritative.
            let child = get_obj_inode(ctx, child_id, Some(&name))?;
            let mut child_stat = child.stat();
            child_stat.name = name;
            payload.extend_from_slice(&orfs_md::encode_entry_newline(STATE_ADD, &child_stat));
        }
        debug_assert!(!payload.is_empty(), "compacted log always has an I entry");

        ctx.md.write_full(&oid, &payload)?;
        trace!(
            target: "orfs::inode",
            event = "compacted",
            dir = %oid,
            bytes = payload.len()
        );
        Ok(())
    }
}

/// Fetch an inode by id through the cache; on a miss a skeleton is
/// fabricated (named by `name_hint` when the caller knows the binding) and
/// populated via `read_md`.
pub(crate) fn get_obj_inode(
    ctx: &FsCtx<'_>,
    id: Uuid,
    name_hint: Option<&str>,
) -> Result<Arc<Inode>> {
    let inode = ctx.cache.get_or_insert_with(id, || {
        debug!(target: "orfs::inode", event = "cache_miss", inode = %id);
        Arc::new(Inode::skeleton(id, name_hint.unwrap_or_default()))
    });
    inode.read_md(ctx)?;
    Ok(inode)
}

/// Append one entry to a directory's log under the store's exclusive lock.
/// The cookie is the subject inode's id, so concurrent holders are
/// distinguishable.
pub(crate) fn add_md_entry(ctx: &FsCtx<'_>, dir: Uuid, state: u8, stat: &Stat) -> Result<()> {
    let oid = dir.to_string();
    let cookie = stat.inode.to_string();
    let _guard = ExclusiveLock::acquire(
        ctx.md.as_ref(),
        &oid,
        LOCK_ADD_ENTRY,
        &cookie,
        "Lock for entry addition",
    )?;
    trace!(
        target: "orfs::inode",
        event = "append_entry",
        dir = %oid,
        state = %(state as char),
        name = %stat.name,
        subject = %stat.inode
    );
    ctx.md.append(&oid, &orfs_md::encode_entry_newline(state, stat))
}

/// Read an entire log object in contiguous blocks, concatenating before the
/// caller splits on newlines. Entries may straddle block boundaries.
pub(crate) fn read_log_bytes(pool: &dyn Pool, oid: &str) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    let mut buf = vec![0_u8; READ_BLOCK];
    let mut pos = 0_u64;
    loop {
        let n = pool.read(oid, &mut buf, pos)?;
        data.extend_from_slice(&buf[..n]);
        if n < buf.len() {
            break;
        }
        pos += n as u64;
    }
    Ok(data)
}

/// Names bind inside `/`-separated paths and newline-separated logs, so
/// they may contain neither.
fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(OrfsError::Invalid("empty name".to_owned()));
    }
    if name == "/" {
        // The root's own name; never a binding.
        return Ok(());
    }
    if name.contains('/') || name.contains('\n') {
        return Err(OrfsError::Invalid(format!("name {name:?} contains a reserved character")));
    }
    Ok(())
}
