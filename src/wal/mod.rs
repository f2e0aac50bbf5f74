//! WAL record codec
//!
//! The manager never inspects WAL contents. It only hands out writers at
//! registered paths and readers for replay. This module is the byte-level
//! collaborator behind those handles.

mod checksum;
mod errors;
mod reader;
mod writer;

use std::ffi::OsString;
use std::path::{Path, PathBuf};

pub use checksum::{compute_checksum, verify_checksum};
pub use errors::{WalError, WalResult};
pub use reader::WalReader;
pub use writer::WalWriter;

/// File magic at offset 0 of every WAL
pub const WAL_MAGIC: &[u8; 4] = b"AWAL";

/// Current codec version, also the first component of every WAL file name
pub const WAL_VERSION: u32 = 1;

/// Suffix carried by a WAL file until its writer calls `finish()`
pub const PREPARE_SUFFIX: &str = ".prepare";

/// Path a WAL occupies while it is still being written.
pub fn prepare_path_for(final_path: &Path) -> PathBuf {
    let mut name: OsString = final_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(PREPARE_SUFFIX);
    final_path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_path_appends_suffix() {
        let p = Path::new("/wal/1/2/1_0_9_load.csv");
        assert_eq!(
            prepare_path_for(p),
            PathBuf::from("/wal/1/2/1_0_9_load.csv.prepare")
        );
    }
}
