//! WAL reader
//!
//! Validates the header on open and every block checksum on read. Any
//! mismatch or short read is reported as corruption; the reader never
//! skips or repairs a block.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use super::checksum::verify_checksum;
use super::errors::{WalError, WalResult};
use super::{WAL_MAGIC, WAL_VERSION};

/// Sequential reader over the blocks of one WAL file.
#[derive(Debug)]
pub struct WalReader {
    path: PathBuf,
    reader: BufReader<File>,
    offset: u64,
    file_size: u64,
    column_indexes: Vec<usize>,
}

impl WalReader {
    /// Opens a WAL file and validates its header.
    pub fn open(path: &Path) -> WalResult<Self> {
        let file = File::open(path).map_err(|e| WalError::io(path, "failed to open WAL", e))?;
        let file_size = file
            .metadata()
            .map_err(|e| WalError::io(path, "failed to read WAL metadata", e))?
            .len();

        let mut reader = Self {
            path: path.to_path_buf(),
            reader: BufReader::new(file),
            offset: 0,
            file_size,
            column_indexes: Vec::new(),
        };
        reader.read_header()?;
        Ok(reader)
    }

    fn read_header(&mut self) -> WalResult<()> {
        let mut fixed = [0u8; 12];
        self.read_exact_at_offset(&mut fixed, "truncated WAL header")?;

        if &fixed[0..4] != WAL_MAGIC {
            return Err(WalError::corruption(&self.path, 0, "bad magic"));
        }
        let version = u32::from_le_bytes([fixed[4], fixed[5], fixed[6], fixed[7]]);
        if version != WAL_VERSION {
            return Err(WalError::UnsupportedVersion {
                path: self.path.clone(),
                found: version,
            });
        }
        let count = u32::from_le_bytes([fixed[8], fixed[9], fixed[10], fixed[11]]) as u64;
        if count * 4 + 4 > self.remaining() {
            return Err(WalError::corruption(
                &self.path,
                self.offset,
                format!("header declares {} columns past end of file", count),
            ));
        }

        let mut columns = vec![0u8; count as usize * 4];
        self.read_exact_at_offset(&mut columns, "truncated column list")?;
        let mut crc = [0u8; 4];
        self.read_exact_at_offset(&mut crc, "truncated header checksum")?;

        let mut covered = Vec::with_capacity(fixed.len() + columns.len());
        covered.extend_from_slice(&fixed);
        covered.extend_from_slice(&columns);
        if !verify_checksum(&covered, u32::from_le_bytes(crc)) {
            return Err(WalError::corruption(&self.path, 0, "header checksum mismatch"));
        }

        self.column_indexes = columns
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]) as usize)
            .collect();
        Ok(())
    }

    fn remaining(&self) -> u64 {
        self.file_size.saturating_sub(self.offset)
    }

    fn read_exact_at_offset(&mut self, buf: &mut [u8], what: &str) -> WalResult<()> {
        if (buf.len() as u64) > self.remaining() {
            return Err(WalError::corruption(&self.path, self.offset, what));
        }
        self.reader.read_exact(buf).map_err(|e| {
            WalError::io(&self.path, format!("{} at byte {}", what, self.offset), e)
        })?;
        self.offset += buf.len() as u64;
        Ok(())
    }

    /// Column positions recorded by the writer.
    pub fn column_indexes(&self) -> &[usize] {
        &self.column_indexes
    }

    /// Reads the next block.
    ///
    /// - `Ok(Some(block))` for a valid block
    /// - `Ok(None)` at a clean end of file
    /// - `Err` on a torn or corrupted block
    pub fn read_block(&mut self) -> WalResult<Option<Vec<u8>>> {
        if self.remaining() == 0 {
            return Ok(None);
        }
        let start = self.offset;

        let mut len_buf = [0u8; 4];
        self.read_exact_at_offset(&mut len_buf, "truncated block length")?;
        let len = u32::from_le_bytes(len_buf) as u64;

        if len + 4 > self.remaining() {
            return Err(WalError::corruption(
                &self.path,
                start,
                format!("block length {} exceeds remaining file size", len),
            ));
        }

        let mut block = vec![0u8; len as usize];
        self.read_exact_at_offset(&mut block, "truncated block body")?;
        let mut crc = [0u8; 4];
        self.read_exact_at_offset(&mut crc, "truncated block checksum")?;

        if !verify_checksum(&block, u32::from_le_bytes(crc)) {
            return Err(WalError::corruption(&self.path, start, "block checksum mismatch"));
        }
        Ok(Some(block))
    }

    /// Reads every remaining block.
    pub fn read_all(&mut self) -> WalResult<Vec<Vec<u8>>> {
        let mut blocks = Vec::new();
        while let Some(block) = self.read_block()? {
            blocks.push(block);
        }
        Ok(blocks)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Byte offset of the next unread block.
    pub fn offset(&self) -> u64 {
        self.offset
    }
}
