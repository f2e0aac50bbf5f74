//! WAL writer
//!
//! A WAL is written under its `.prepare` name and renamed to its final name
//! by `finish()`. A crash before `finish()` leaves the `.prepare` file behind,
//! which the recovery scan registers as incomplete.
//!
//! File layout (little-endian):
//!
//! ```text
//! header: magic "AWAL" | version u32 | column_count u32 | column u32 * n | crc32 u32
//! block:  len u32 | bytes | crc32 u32
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::checksum::compute_checksum;
use super::errors::{WalError, WalResult};
use super::{prepare_path_for, WAL_MAGIC, WAL_VERSION};

/// Appends length-prefixed, checksummed blocks to a WAL file.
pub struct WalWriter {
    final_path: PathBuf,
    prepare_path: PathBuf,
    file: File,
    bytes_written: u64,
    blocks_written: u64,
}

impl WalWriter {
    /// Creates the `.prepare` file for `final_path` and writes the header.
    ///
    /// `column_indexes` records how the block columns map onto the table
    /// schema at write time.
    pub fn create(final_path: &Path, column_indexes: &[usize]) -> WalResult<Self> {
        let prepare_path = prepare_path_for(final_path);

        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                WalError::io(parent, "failed to create WAL directory", e)
            })?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&prepare_path)
            .map_err(|e| WalError::io(&prepare_path, "failed to open WAL for write", e))?;

        let header = encode_header(column_indexes);
        file.write_all(&header)
            .map_err(|e| WalError::io(&prepare_path, "failed to write WAL header", e))?;

        Ok(Self {
            final_path: final_path.to_path_buf(),
            prepare_path,
            file,
            bytes_written: header.len() as u64,
            blocks_written: 0,
        })
    }

    /// Appends one block. Returns the number of bytes the block occupies on disk.
    pub fn append_block(&mut self, block: &[u8]) -> WalResult<u64> {
        let len = u32::try_from(block.len()).map_err(|_| {
            WalError::corruption(&self.prepare_path, self.bytes_written, "block larger than 4GiB")
        })?;

        let mut buf = Vec::with_capacity(block.len() + 8);
        buf.extend_from_slice(&len.to_le_bytes());
        buf.extend_from_slice(block);
        buf.extend_from_slice(&compute_checksum(block).to_le_bytes());

        self.file.write_all(&buf).map_err(|e| {
            WalError::io(
                &self.prepare_path,
                format!("failed to append block {}", self.blocks_written),
                e,
            )
        })?;

        self.bytes_written += buf.len() as u64;
        self.blocks_written += 1;
        Ok(buf.len() as u64)
    }

    /// fsync the file.
    pub fn sync(&mut self) -> WalResult<()> {
        self.file
            .sync_all()
            .map_err(|e| WalError::io(&self.prepare_path, "fsync failed", e))
    }

    /// Make the WAL durable and move it to its final name.
    pub fn finish(mut self) -> WalResult<PathBuf> {
        self.sync()?;
        fs::rename(&self.prepare_path, &self.final_path).map_err(|e| {
            WalError::io(&self.final_path, "failed to rename finished WAL", e)
        })?;
        if let Some(parent) = self.final_path.parent() {
            // Directory fsync is best effort; not every platform supports it.
            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }
        }
        Ok(self.final_path)
    }

    /// Final path of the WAL once finished.
    pub fn path(&self) -> &Path {
        &self.final_path
    }

    /// Bytes written so far, header included.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn blocks_written(&self) -> u64 {
        self.blocks_written
    }
}

fn encode_header(column_indexes: &[usize]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(16 + column_indexes.len() * 4);
    buf.extend_from_slice(WAL_MAGIC);
    buf.extend_from_slice(&WAL_VERSION.to_le_bytes());
    buf.extend_from_slice(&(column_indexes.len() as u32).to_le_bytes());
    for idx in column_indexes {
        buf.extend_from_slice(&(*idx as u32).to_le_bytes());
    }
    let checksum = compute_checksum(&buf);
    buf.extend_from_slice(&checksum.to_le_bytes());
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_writes_under_prepare_name_until_finished() {
        let dir = TempDir::new().unwrap();
        let final_path = dir.path().join("1/2/0_0_7_label");

        let mut writer = WalWriter::create(&final_path, &[0, 1]).unwrap();
        writer.append_block(b"rows").unwrap();

        assert!(prepare_path_for(&final_path).exists());
        assert!(!final_path.exists());

        let path = writer.finish().unwrap();
        assert_eq!(path, final_path);
        assert!(final_path.exists());
        assert!(!prepare_path_for(&final_path).exists());
    }

    #[test]
    fn test_byte_accounting() {
        let dir = TempDir::new().unwrap();
        let final_path = dir.path().join("wal");

        let mut writer = WalWriter::create(&final_path, &[]).unwrap();
        let header = writer.bytes_written();
        assert_eq!(header, 4 + 4 + 4 + 4);

        let block = writer.append_block(&[9u8; 10]).unwrap();
        assert_eq!(block, 4 + 10 + 4);
        assert_eq!(writer.bytes_written(), header + block);
        assert_eq!(writer.blocks_written(), 1);
    }
}
