//! On-disk layout of the double-write log.
//!
//! ```text
//! offset 0                  : LogHeader { page_count: i64 }
//! offset LogHeader::SIZE    : slot[0] = { file_id: i32, pad: u32, page_num: i64, page }
//! offset + 1 * SLOT_SIZE    : slot[1]
//! ...
//! ```
//!
//! All integers are native byte order. `page_count` only ever covers slots
//! that were synced before the header was written.

use super::PageLocator;
use crate::page::{Page, CHECKSUM_SENTINEL, PAGE_SIZE};
use crate::{Result, StorageError};
use bytes::{Buf, BufMut, BytesMut};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Encoded size of a `PageLocator` inside a slot, padding included.
const LOCATOR_SIZE: usize = 16;

pub const SLOT_SIZE: usize = LOCATOR_SIZE + PAGE_SIZE;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogHeader {
    /// Number of slots holding fully written pages.
    pub page_count: i64,
}

impl LogHeader {
    pub const SIZE: usize = 8;

    fn to_bytes(self) -> [u8; Self::SIZE] {
        self.page_count.to_ne_bytes()
    }

    fn from_bytes(bytes: [u8; Self::SIZE]) -> Self {
        Self {
            page_count: i64::from_ne_bytes(bytes),
        }
    }
}

/// One staged page as laid out in a log slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSlot {
    pub locator: PageLocator,
    pub page: Page,
}

impl LogSlot {
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(SLOT_SIZE);
        buf.put_i32_ne(self.locator.file_id);
        buf.put_u32_ne(0);
        buf.put_i64_ne(self.locator.page_num);
        buf.put_slice(self.page.as_bytes());
        buf
    }

    pub fn decode(mut bytes: &[u8]) -> Result<Self> {
        if bytes.len() != SLOT_SIZE {
            return Err(StorageError::InvalidPageSize {
                expected: SLOT_SIZE,
                actual: bytes.len(),
            });
        }

        let file_id = bytes.get_i32_ne();
        bytes.advance(4);
        let page_num = bytes.get_i64_ne();
        let page = Page::from_bytes(bytes)?;

        Ok(Self {
            locator: PageLocator::new(file_id, page_num),
            page,
        })
    }
}

pub fn slot_offset(index: i64) -> u64 {
    LogHeader::SIZE as u64 + index as u64 * SLOT_SIZE as u64
}

/// Positional reader/writer over the log file.
pub struct DoubleWriteLog {
    file: File,
    path: PathBuf,
}

impl DoubleWriteLog {
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|source| {
                log::error!("failed to open double write log {}: {}", path.display(), source);
                StorageError::IoOpen {
                    path: path.to_path_buf(),
                    source,
                }
            })?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the header. A short read means no header was ever persisted.
    pub fn read_header(&mut self) -> Result<LogHeader> {
        self.seek(0)?;

        let mut bytes = [0u8; LogHeader::SIZE];
        let n = read_full(&mut self.file, &mut bytes)
            .map_err(|source| StorageError::IoRead { offset: 0, source })?;
        if n < LogHeader::SIZE {
            log::debug!(
                "double write log {} has no header ({} bytes), starting empty",
                self.path.display(),
                n
            );
            return Ok(LogHeader::default());
        }

        Ok(LogHeader::from_bytes(bytes))
    }

    pub fn write_header(&mut self, header: LogHeader) -> Result<()> {
        self.write_synced(0, &header.to_bytes())
    }

    pub fn write_slot(&mut self, index: i64, slot: &LogSlot) -> Result<()> {
        self.write_synced(slot_offset(index), &slot.encode())
    }

    /// Reads slot `index`.
    ///
    /// Returns `None` when the file ends exactly where the slot would start,
    /// and `IoRead` when only part of the slot is present.
    pub fn read_slot(&mut self, index: i64) -> Result<Option<LogSlot>> {
        let offset = slot_offset(index);
        self.seek(offset)?;

        let mut bytes = slot_read_buffer();
        let n = read_full(&mut self.file, &mut bytes)
            .map_err(|source| StorageError::IoRead { offset, source })?;
        if n == 0 {
            return Ok(None);
        }
        if n < SLOT_SIZE {
            log::error!(
                "double write log {} truncated in slot {}: read {} of {} bytes",
                self.path.display(),
                index,
                n,
                SLOT_SIZE
            );
            return Err(StorageError::IoRead {
                offset,
                source: io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("short read: expected {} bytes, got {}", SLOT_SIZE, n),
                ),
            });
        }

        LogSlot::decode(&bytes).map(Some)
    }

    fn seek(&mut self, offset: u64) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(offset))
            .map(|_| ())
            .map_err(|source| {
                log::error!("failed to seek double write log to {}: {}", offset, source);
                StorageError::IoSeek { offset, source }
            })
    }

    fn write_synced(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        self.seek(offset)?;
        self.file
            .write_all(bytes)
            .and_then(|_| self.file.sync_data())
            .map_err(|source| {
                log::error!("failed to write double write log at {}: {}", offset, source);
                StorageError::IoWrite { offset, source }
            })
    }
}

/// Zeroed slot buffer whose page checksum holds the sentinel.
///
/// Short reads are rejected before any checksum is looked at, so the
/// sentinel only matters if a read ever hands back a partly filled buffer.
fn slot_read_buffer() -> Vec<u8> {
    let mut bytes = vec![0u8; SLOT_SIZE];
    let checksum_at = LOCATOR_SIZE + Page::CHECKSUM_OFFSET;
    bytes[checksum_at..checksum_at + 4].copy_from_slice(&CHECKSUM_SENTINEL.to_ne_bytes());
    bytes
}

/// Reads until `buf` is full or the file ends, returning the bytes read.
fn read_full(file: &mut File, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
