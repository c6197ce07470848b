//! Double-write buffering.
//!
//! A page about to be overwritten in place is first staged, checksummed, in a
//! separate log file. If the in-place write tears because of a crash, the
//! staged copy is still intact and `recover` replays it on the next start.

pub mod disk;
pub mod logfile;
pub mod vacuous;

pub use disk::DiskDoubleWriteBuffer;
pub use vacuous::VacuousDoubleWriteBuffer;

use crate::file::DiskPageFile;
use crate::page::Page;
use crate::registry::BufferPoolManager;
use crate::{FileId, PageNum, Result, StorageError};
use std::path::Path;
use std::sync::Arc;

/// Where a staged page belongs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageLocator {
    pub file_id: FileId,
    pub page_num: PageNum,
}

impl PageLocator {
    pub fn new(file_id: FileId, page_num: PageNum) -> Self {
        Self { file_id, page_num }
    }
}

/// Outcome of a startup recovery pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Slot count recorded in the log header.
    pub slot_count: i64,
    /// Slots whose checksum matched and were written to their file.
    pub replayed: usize,
    /// Slots that failed checksum validation.
    pub skipped: usize,
}

/// What `clear_pages` reports when a write fails part way through a file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ClearPolicy {
    /// Return `StorageError::PartialClear`.
    #[default]
    Strict,
    /// Log the failure and report success.
    BestEffort,
}

/// Staging contract shared by the protecting and pass-through buffers.
pub trait DoubleWriteBuffer: Send + Sync {
    /// Opens or creates the backing log file.
    fn open(&self, path: &Path) -> Result<()>;

    /// Stages `page` so it can be replayed if its in-place write tears.
    fn add_page(&self, file_id: FileId, page_num: PageNum, page: &Page) -> Result<()>;

    /// Returns the staged copy of a page, if any.
    fn read_page(&self, file_id: FileId, page_num: PageNum) -> Option<Page>;

    /// Writes out and drops every staged page of `file`. Call before closing it.
    fn clear_pages(&self, file: &dyn DiskPageFile) -> Result<()>;

    /// Writes every staged page to its real location and empties the stage.
    fn flush_page(&self) -> Result<()>;

    /// Replays verified pages left in the log by an unclean shutdown.
    fn recover(&self) -> Result<RecoveryReport>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DoubleWriteConfig {
    /// Use the protecting buffer; otherwise pages pass straight through.
    pub enabled: bool,
    /// Staged pages allowed before a forced flush.
    pub max_pages: usize,
    pub clear_policy: ClearPolicy,
}

impl DoubleWriteConfig {
    pub const DEFAULT_MAX_PAGES: usize = 16;

    pub fn new() -> Self {
        Self {
            enabled: true,
            max_pages: Self::DEFAULT_MAX_PAGES,
            clear_policy: ClearPolicy::Strict,
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new()
        }
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages;
        self
    }

    pub fn with_clear_policy(mut self, clear_policy: ClearPolicy) -> Self {
        self.clear_policy = clear_policy;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_pages == 0 {
            return Err(StorageError::InvalidConfig("max_pages must be > 0"));
        }
        Ok(())
    }
}

impl Default for DoubleWriteConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds the buffer variant selected by `config`.
pub fn new_double_write_buffer(
    config: &DoubleWriteConfig,
    manager: Arc<dyn BufferPoolManager>,
) -> Result<Box<dyn DoubleWriteBuffer>> {
    config.validate()?;

    if config.enabled {
        Ok(Box::new(DiskDoubleWriteBuffer::new(
            manager,
            config.max_pages,
            config.clear_policy,
        )))
    } else {
        log::info!("double write buffer disabled, pages are written in place");
        Ok(Box::new(VacuousDoubleWriteBuffer::new(manager)))
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_config_defaults() {
        let config = DoubleWriteConfig::default();
        assert!(config.enabled);
        assert_eq!(config.max_pages, 16);
        assert_eq!(config.clear_policy, ClearPolicy::Strict);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let config = DoubleWriteConfig::new().with_max_pages(0);
        assert!(matches!(
            config.validate(),
            Err(StorageError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_factory_selects_variant() {
        let dir = tempdir().unwrap();
        let manager = RecordingManager::with_files(&[1]);

        let protecting =
            new_double_write_buffer(&DoubleWriteConfig::new(), manager.clone()).unwrap();
        protecting.open(&dir.path().join("dwb")).unwrap();
        protecting.add_page(1, 1, &page_with(1)).unwrap();
        assert!(protecting.read_page(1, 1).is_some());
        assert!(manager.file(1).written_page_nums().is_empty());

        let passthrough =
            new_double_write_buffer(&DoubleWriteConfig::disabled(), manager.clone()).unwrap();
        passthrough.add_page(1, 2, &page_with(2)).unwrap();
        assert!(passthrough.read_page(1, 2).is_none());
        assert_eq!(manager.file(1).written_page_nums(), vec![2]);
    }

    #[test]
    fn test_factory_rejects_invalid_config() {
        let manager = RecordingManager::with_files(&[]);
        let config = DoubleWriteConfig::new().with_max_pages(0);
        assert!(new_double_write_buffer(&config, manager).is_err());
    }
}
