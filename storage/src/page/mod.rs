pub mod checksum;

pub use checksum::{compute_checksum, verify_checksum, CHECKSUM_SENTINEL};

use crate::{Result, StorageError};
use std::fmt;

pub const PAGE_SIZE: usize = 8192;

/// Bytes of the page available to the owning engine.
pub const PAGE_DATA_SIZE: usize = PAGE_SIZE - Page::HEADER_SIZE;

#[repr(C)] // Ensure consistent memory layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageHeader {
    pub lsn: u64,      // 8 bytes - log sequence number of the last change
    pub checksum: u32, // 4 bytes - CRC32 over the data region
    _padding: u32,     // 4 bytes - align to 16 bytes total
}

#[repr(C, align(8))]
#[derive(Clone, PartialEq, Eq)]
pub struct Page {
    data: [u8; PAGE_SIZE], // The actual 8KB block
}

impl Page {
    pub const HEADER_SIZE: usize = std::mem::size_of::<PageHeader>();

    /// Byte offset of `PageHeader::checksum` inside the page.
    pub const CHECKSUM_OFFSET: usize = std::mem::offset_of!(PageHeader, checksum);

    pub fn new() -> Self {
        Self {
            data: [0; PAGE_SIZE],
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != PAGE_SIZE {
            return Err(StorageError::InvalidPageSize {
                expected: PAGE_SIZE,
                actual: bytes.len(),
            });
        }

        let mut page = Self::new();
        page.data.copy_from_slice(bytes);
        Ok(page)
    }

    pub fn as_bytes(&self) -> &[u8; PAGE_SIZE] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8; PAGE_SIZE] {
        &mut self.data
    }

    pub fn header(&self) -> &PageHeader {
        unsafe {
            // SAFETY:
            // - PageHeader is #[repr(C)], 16 bytes, which fits in PAGE_SIZE
            // - Page is #[repr(C, align(8))] and `data` is its only field, so the
            //   pointer is 8-byte aligned, enough for the u64 in PageHeader
            // - PageHeader has no invalid bit patterns (all fields are integers)
            // - The returned reference borrows &self
            &*(self.data.as_ptr() as *const PageHeader)
        }
    }

    pub fn header_mut(&mut self) -> &mut PageHeader {
        unsafe {
            // SAFETY: same layout argument as `header`, and &mut self gives
            // exclusive access to the bytes behind the reference.
            &mut *(self.data.as_mut_ptr() as *mut PageHeader)
        }
    }

    pub fn lsn(&self) -> u64 {
        self.header().lsn
    }

    pub fn set_lsn(&mut self, lsn: u64) {
        self.header_mut().lsn = lsn;
    }

    pub fn checksum(&self) -> u32 {
        self.header().checksum
    }

    pub fn set_checksum(&mut self, checksum: u32) {
        self.header_mut().checksum = checksum;
    }

    /// The data region covered by the checksum.
    pub fn data(&self) -> &[u8] {
        &self.data[Self::HEADER_SIZE..]
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data[Self::HEADER_SIZE..]
    }

    pub fn compute_checksum(&self) -> u32 {
        compute_checksum(self.data())
    }

    pub fn update_checksum(&mut self) {
        let checksum = self.compute_checksum();
        self.set_checksum(checksum);
    }

    pub fn verify_checksum(&self) -> bool {
        verify_checksum(self.data(), self.checksum())
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("lsn", &self.lsn())
            .field("checksum", &format_args!("{:#010x}", self.checksum()))
            .finish_non_exhaustive()
    }
}
