#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Inode id of the root directory (the all-zero UUID).
pub const ROOT_INODE: Uuid = Uuid::nil();

// ── POSIX file mode constants ────────────────────────────────────────────────

/// File type mask (upper 4 bits of mode).
pub const S_IFMT: u32 = 0o170_000;
/// Directory.
pub const S_IFDIR: u32 = 0o040_000;
/// Regular file.
pub const S_IFREG: u32 = 0o100_000;
/// Permission bits (rwx for user/group/other plus setuid/setgid/sticky).
pub const S_PERM_MASK: u32 = 0o007_777;

// ── Open flags ──────────────────────────────────────────────────────────────

/// Open read-only.
pub const O_RDONLY: u32 = 0o0;
/// Open write-only.
pub const O_WRONLY: u32 = 0o1;
/// Open read-write.
pub const O_RDWR: u32 = 0o2;
/// Create the file if it does not exist.
pub const O_CREATE: u32 = 0o100;

/// Permission + type bitset for an inode.
///
/// The directory flag lives in the type bits (`S_IFDIR`), separate from the
/// rwx permission bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Mode(u32);

impl Mode {
    /// Directory mode with the given permission bits.
    #[must_use]
    pub const fn dir(perm: u32) -> Self {
        Self(S_IFDIR | (perm & S_PERM_MASK))
    }

    /// Regular-file mode with the given permission bits.
    #[must_use]
    pub const fn file(perm: u32) -> Self {
        Self(S_IFREG | (perm & S_PERM_MASK))
    }

    /// Reconstruct a mode from raw bits.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn is_dir(self) -> bool {
        self.0 & S_IFMT == S_IFDIR
    }

    /// Permission bits only (type bits stripped).
    #[must_use]
    pub const fn perm(self) -> u32 {
        self.0 & S_PERM_MASK
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#o}", self.0)
    }
}

/// Immutable snapshot of an inode's attributes.
///
/// `mtime` is whole seconds since the Unix epoch; `size` is signed to match
/// the POSIX stat convention even though the store never reports negative
/// sizes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stat {
    pub name: String,
    pub size: i64,
    pub mode: Mode,
    pub mtime: i64,
    pub is_dir: bool,
    pub inode: Uuid,
}

impl Stat {
    /// Stat of a freshly created inode: size 0, mtime now.
    #[must_use]
    pub fn newborn(name: impl Into<String>, is_dir: bool, mode: Mode, inode: Uuid) -> Self {
        Self {
            name: name.into(),
            size: 0,
            mode,
            mtime: unix_now(),
            is_dir,
            inode,
        }
    }
}

impl fmt::Display for Stat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, {} bytes, mode {}, inode {})",
            self.name,
            if self.is_dir { "dir" } else { "file" },
            self.size,
            self.mode,
            self.inode
        )
    }
}

/// Current wall-clock time as whole seconds since the Unix epoch.
#[must_use]
pub fn unix_now() -> i64 {
    unix_secs(SystemTime::now())
}

/// Whole seconds since the Unix epoch for `t`; times before the epoch clamp
/// to 0.
#[must_use]
pub fn unix_secs(t: SystemTime) -> i64 {
    let since_epoch = t.duration_since(UNIX_EPOCH).unwrap_or_default();
    i64::try_from(since_epoch.as_secs()).unwrap_or(i64::MAX)
}

/// `SystemTime` for whole seconds since the Unix epoch; negative values clamp
/// to the epoch.
#[must_use]
pub fn systime_from_unix(secs: i64) -> SystemTime {
    match u64::try_from(secs) {
        Ok(secs) => UNIX_EPOCH + std::time::Duration::from_secs(secs),
        Err(_) => UNIX_EPOCH,
    }
}
