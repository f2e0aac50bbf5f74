//! Directory usage sampling
//!
//! The tracker never measures disk usage itself; it asks a
//! `DirUsageSampler`. The filesystem implementation walks the directory
//! tree for `used` and asks the OS for free space.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Source of `used` and `free` byte counts for a WAL directory.
pub trait DirUsageSampler: Send + Sync {
    /// Bytes currently occupied under `path`.
    fn sample_used(&self, path: &Path) -> io::Result<u64>;

    /// Bytes still free on the filesystem holding `path`.
    fn free_space(&self, path: &Path) -> io::Result<u64>;
}

/// Samples the real filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsUsageSampler;

impl DirUsageSampler for FsUsageSampler {
    fn sample_used(&self, path: &Path) -> io::Result<u64> {
        let mut total = 0u64;
        let mut pending = vec![path.to_path_buf()];

        while let Some(dir) = pending.pop() {
            for entry in fs::read_dir(&dir)? {
                let entry = entry?;
                let meta = match entry.path().symlink_metadata() {
                    Ok(meta) => meta,
                    // Deleted between listing and stat: a WAL was just replayed.
                    Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                    Err(e) => return Err(e),
                };
                if meta.is_dir() {
                    pending.push(entry.path());
                } else if meta.is_file() {
                    total += meta.len();
                }
            }
        }
        Ok(total)
    }

    fn free_space(&self, path: &Path) -> io::Result<u64> {
        free_space(path)
    }
}

#[cfg(unix)]
fn free_space(path: &Path) -> io::Result<u64> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains NUL byte"))?;

    // SAFETY: statvfs only writes into the zeroed struct we own, and c_path
    // is a valid NUL-terminated string for the duration of the call.
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok((stat.f_bavail as u64).saturating_mul(stat.f_frsize as u64))
}

#[cfg(not(unix))]
fn free_space(_path: &Path) -> io::Result<u64> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "free space probing is only implemented for unix",
    ))
}

/// Returns fixed values per directory. For tests and dry runs.
///
/// Unknown directories sample as `used = 0`, `free = 0`. A directory can be
/// switched into failure mode to exercise I/O error handling.
#[derive(Debug, Default)]
pub struct StaticUsageSampler {
    values: Mutex<HashMap<PathBuf, StaticUsage>>,
}

#[derive(Debug, Clone, Copy, Default)]
struct StaticUsage {
    used: u64,
    free: u64,
    failing: bool,
}

impl StaticUsageSampler {
    pub fn new() -> Self {
        Self::default()
    }

    fn update(&self, path: &Path, f: impl FnOnce(&mut StaticUsage)) {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        f(values.entry(path.to_path_buf()).or_default());
    }

    pub fn set_used(&self, path: &Path, used: u64) {
        self.update(path, |v| v.used = used);
    }

    pub fn set_free(&self, path: &Path, free: u64) {
        self.update(path, |v| v.free = free);
    }

    /// Make every sample of `path` fail with an I/O error.
    pub fn set_failing(&self, path: &Path, failing: bool) {
        self.update(path, |v| v.failing = failing);
    }

    fn get(&self, path: &Path) -> io::Result<StaticUsage> {
        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        let usage = values.get(path).copied().unwrap_or_default();
        if usage.failing {
            return Err(io::Error::other(format!("sampling {} failed", path.display())));
        }
        Ok(usage)
    }
}

impl DirUsageSampler for StaticUsageSampler {
    fn sample_used(&self, path: &Path) -> io::Result<u64> {
        self.get(path).map(|u| u.used)
    }

    fn free_space(&self, path: &Path) -> io::Result<u64> {
        self.get(path).map(|u| u.free)
    }
}
