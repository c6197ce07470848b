//! Storage engine for JDB database
//!
//! This crate provides the physical-write-safety layer of the page store:
//! fixed-size checksummed pages, disk-backed page files, and the double-write
//! buffer that protects in-place page writes against torn pages.

pub mod dblwr;
pub mod file;
pub mod page;
pub mod registry;
pub mod store;

pub use dblwr::{
    new_double_write_buffer, ClearPolicy, DiskDoubleWriteBuffer, DoubleWriteBuffer,
    DoubleWriteConfig, PageLocator, RecoveryReport, VacuousDoubleWriteBuffer,
};
pub use file::{DiskPageFile, PageFile};
pub use page::{Page, PageHeader, PAGE_DATA_SIZE, PAGE_SIZE};
pub use registry::{BufferPoolManager, FileRegistry};
pub use store::PageStore;

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Identifier of a page file, assigned by the buffer pool manager.
pub type FileId = i32;

/// Index of a page within its page file.
pub type PageNum = i64;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("double write buffer is already open: {}", .path.display())]
    AlreadyOpen { path: PathBuf },

    #[error("double write buffer is not open")]
    NotOpen,

    #[error("failed to open {}: {source}", .path.display())]
    IoOpen { path: PathBuf, source: io::Error },

    #[error("failed to seek to offset {offset}: {source}")]
    IoSeek { offset: u64, source: io::Error },

    #[error("failed to read at offset {offset}: {source}")]
    IoRead { offset: u64, source: io::Error },

    #[error("failed to write at offset {offset}: {source}")]
    IoWrite { offset: u64, source: io::Error },

    #[error("no page file registered for file id {0}")]
    UnresolvedFile(FileId),

    #[error("cleared {written} pages of {filename} before failing, {unwritten} pages not written: {source}")]
    PartialClear {
        filename: String,
        written: usize,
        unwritten: usize,
        source: Box<StorageError>,
    },

    #[error("Invalid page number {0}")]
    InvalidPageNum(PageNum),

    #[error("Invalid page size: expected {expected}, got {actual}")]
    InvalidPageSize { expected: usize, actual: usize },

    #[error("Checksum mismatch for page {0}")]
    ChecksumMismatch(PageNum),

    #[error("Invalid page file: {0}")]
    InvalidFile(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;
