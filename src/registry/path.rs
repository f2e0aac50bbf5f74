//! WAL path encoding
//!
//! ```text
//! <wal_dir>/<db_id>/<table_id>/<version>_<backend_id>_<wal_id>_<label>[.prepare]
//! ```
//!
//! The path alone is enough to recover (db_id, table_id, wal_id, label)
//! after a crash. The `.prepare` suffix marks a WAL whose writer never
//! finished.

use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use crate::wal::{PREPARE_SUFFIX, WAL_VERSION};

/// Per-directory quarantine for WALs that failed replay permanently.
/// Never scanned for recovery.
pub const QUARANTINE_DIR: &str = "tmp";

static FILE_NAME_RE: OnceLock<Regex> = OnceLock::new();

fn file_name_re() -> &'static Regex {
    FILE_NAME_RE.get_or_init(|| {
        Regex::new(r"^(\d+)_(-?\d+)_(-?\d+)_(.+?)(\.prepare)?$").expect("static WAL name pattern")
    })
}

/// The file-name component of a WAL path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalFileName {
    pub version: u32,
    pub backend_id: i64,
    pub wal_id: i64,
    pub label: String,
    /// Writer never called `finish()`
    pub incomplete: bool,
}

impl WalFileName {
    /// Name for a new WAL at the current codec version.
    pub fn new(backend_id: i64, wal_id: i64, label: &str) -> Self {
        Self {
            version: WAL_VERSION,
            backend_id,
            wal_id,
            label: sanitize_label(label),
            incomplete: false,
        }
    }

    /// Final file name (never carries the `.prepare` suffix).
    pub fn file_name(&self) -> String {
        format!(
            "{}_{}_{}_{}",
            self.version, self.backend_id, self.wal_id, self.label
        )
    }

    /// Decode a file name. `None` for anything that is not a WAL.
    pub fn parse(name: &str) -> Option<Self> {
        let caps = file_name_re().captures(name)?;
        Some(Self {
            version: caps[1].parse().ok()?,
            backend_id: caps[2].parse().ok()?,
            wal_id: caps[3].parse().ok()?,
            label: caps[4].to_string(),
            incomplete: caps.get(5).is_some(),
        })
    }
}

/// Where a WAL lives, decoded from its path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalLocation {
    pub db_id: i64,
    pub table_id: i64,
    pub name: WalFileName,
}

/// Labels become file-name components; path separators would escape the
/// table dir, and a trailing `.prepare` would read back as an unfinished WAL.
fn sanitize_label(label: &str) -> String {
    let mut cleaned: String = label
        .chars()
        .map(|c| if c == '/' || c == '\\' || c == '\0' { '_' } else { c })
        .collect();
    if cleaned.ends_with(PREPARE_SUFFIX) {
        let dot = cleaned.len() - PREPARE_SUFFIX.len();
        cleaned.replace_range(dot..dot + 1, "_");
    }
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

/// Directory holding one table's WALs.
pub fn table_dir(wal_dir: &Path, db_id: i64, table_id: i64) -> PathBuf {
    wal_dir.join(db_id.to_string()).join(table_id.to_string())
}

/// Final path of a WAL.
pub fn wal_path(wal_dir: &Path, db_id: i64, table_id: i64, name: &WalFileName) -> PathBuf {
    table_dir(wal_dir, db_id, table_id).join(name.file_name())
}

/// Decode `<wal_dir>/<db>/<table>/<file>`. `None` if `path` is not shaped like a WAL.
pub fn decode_wal_path(wal_dir: &Path, path: &Path) -> Option<WalLocation> {
    let rel = path.strip_prefix(wal_dir).ok()?;
    let parts: Vec<&str> = rel
        .components()
        .map(|c| match c {
            Component::Normal(s) => s.to_str(),
            _ => None,
        })
        .collect::<Option<Vec<_>>>()?;

    match parts.as_slice() {
        [db, table, file] => Some(WalLocation {
            db_id: db.parse().ok()?,
            table_id: table.parse().ok()?,
            name: WalFileName::parse(file)?,
        }),
        _ => None,
    }
}

/// Strip the `.prepare` suffix if present.
pub fn final_path_of(path: &Path) -> PathBuf {
    match path.file_name().and_then(|n| n.to_str()) {
        Some(name) if name.ends_with(PREPARE_SUFFIX) => {
            path.with_file_name(&name[..name.len() - PREPARE_SUFFIX.len()])
        }
        _ => path.to_path_buf(),
    }
}

/// Where a failed WAL is moved: `<wal_dir>/tmp/<db>_<table>_<file name>`.
pub fn quarantine_path(wal_dir: &Path, db_id: i64, table_id: i64, wal_path: &Path) -> PathBuf {
    let file = wal_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    wal_dir
        .join(QUARANTINE_DIR)
        .join(format!("{}_{}_{}", db_id, table_id, file))
}
