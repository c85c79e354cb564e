//! Consistency sweep over both pools.
//!
//! Walks the directory tree from the root by replaying logs straight from
//! the metadata pool, then compares the reachable set against `iter_objects`
//! on each pool. Non-recursive removal of a populated directory strands its
//! subtree in the store; this is how those strays are found.

use crate::inode::{FsCtx, read_log_bytes};
use orfs_error::Result;
use orfs_md::{STATE_ADD, STATE_REMOVE, STATE_SELF, decode_entry};
use orfs_types::ROOT_INODE;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::warn;
use uuid::Uuid;

/// Result of one sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrubReport {
    /// Directories reachable from the root, the root included.
    pub directories: usize,
    /// File inodes bound somewhere in the reachable tree.
    pub files: usize,
    /// Metadata-pool objects no reachable directory refers to.
    pub orphan_md_objects: Vec<String>,
    /// Data-pool objects no reachable file binding refers to.
    pub orphan_data_objects: Vec<String>,
}

impl ScrubReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.orphan_md_objects.is_empty() && self.orphan_data_objects.is_empty()
    }
}

pub(crate) fn sweep(ctx: &FsCtx<'_>) -> Result<ScrubReport> {
    let mut reachable_dirs: HashSet<Uuid> = HashSet::from([ROOT_INODE]);
    let mut reachable_files: HashSet<Uuid> = HashSet::new();

    let mut queue = VecDeque::from([ROOT_INODE]);
    while let Some(dir) = queue.pop_front() {
        let oid = dir.to_string();
        let bytes = match read_log_bytes(ctx.md.as_ref(), &oid) {
            Ok(bytes) => bytes,
            // Referenced but gone; its subtree is unreachable by definition.
            Err(err) if err.is_not_found() => continue,
            Err(err) => return Err(err),
        };

        let mut members: HashMap<String, (Uuid, bool)> = HashMap::new();
        for raw in bytes.split(|&b| b == b'\n') {
            match decode_entry(raw) {
                Ok((STATE_ADD, stat)) => {
                    members.insert(stat.name, (stat.inode, stat.is_dir));
                }
                Ok((STATE_REMOVE, stat)) => {
                    members.remove(&stat.name);
                }
                Ok((STATE_SELF, _)) | Err(orfs_error::OrfsError::MdEmpty) => {}
                Ok((status, _)) => {
                    warn!(
                        target: "orfs::scrub",
                        event = "weird_status_skipped",
                        dir = %oid,
                        status
                    );
                }
                Err(err) => {
                    ctx.sinks.debug.write_line(&format!(
                        "scrub: rejected MD entry in {oid}: {err}; raw: {:?}",
                        String::from_utf8_lossy(raw)
                    ));
                }
            }
        }

        for (id, is_dir) in members.into_values() {
            if is_dir {
                if reachable_dirs.insert(id) {
                    queue.push_back(id);
                }
            } else {
                reachable_files.insert(id);
            }
        }
    }

    let orphan_md_objects = orphans(ctx.md.iter_objects()?, &reachable_dirs);
    let orphan_data_objects = orphans(ctx.data.iter_objects()?, &reachable_files);

    Ok(ScrubReport {
        directories: reachable_dirs.len(),
        files: reachable_files.len(),
        orphan_md_objects,
        orphan_data_objects,
    })
}

/// Keys in the pool that no reachable inode accounts for. Keys that are not
/// inode UUIDs at all are foreign and reported too.
fn orphans(keys: Vec<String>, reachable: &HashSet<Uuid>) -> Vec<String> {
    let mut orphans: Vec<String> = keys
        .into_iter()
        .filter(|key| !Uuid::try_parse(key).is_ok_and(|id| reachable.contains(&id)))
        .collect();
    orphans.sort_unstable();
    orphans
}
