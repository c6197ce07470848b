//! The protecting double-write buffer.

use super::logfile::{DoubleWriteLog, LogHeader, LogSlot};
use super::{ClearPolicy, DoubleWriteBuffer, PageLocator, RecoveryReport};
use crate::file::DiskPageFile;
use crate::page::Page;
use crate::registry::BufferPoolManager;
use crate::{FileId, PageNum, Result, StorageError};
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;

struct StagedPage {
    slot: i64,
    page: Page,
}

type FileCache = IndexMap<FileId, Arc<dyn DiskPageFile>>;

struct Inner {
    log: Option<DoubleWriteLog>,
    /// Last header persisted to the log.
    header: LogHeader,
    /// Next unused slot of the current log generation.
    next_slot: i64,
    /// Insertion order is flush order.
    staged: IndexMap<PageLocator, StagedPage>,
}

/// Stages pages in a checksummed log before they reach their real location.
///
/// Slots are handed out in increasing order within a log generation, so a
/// newer copy of a page always sits in a later slot than an older one and a
/// replay in slot order ends on the newest copy. A generation ends when a
/// flush or a recovery has made every staged page durable in its own file;
/// the header is then reset and slots are reused from 0.
pub struct DiskDoubleWriteBuffer {
    manager: Arc<dyn BufferPoolManager>,
    max_pages: usize,
    clear_policy: ClearPolicy,
    inner: Mutex<Inner>,
}

impl DiskDoubleWriteBuffer {
    pub fn new(
        manager: Arc<dyn BufferPoolManager>,
        max_pages: usize,
        clear_policy: ClearPolicy,
    ) -> Self {
        Self {
            manager,
            max_pages,
            clear_policy,
            inner: Mutex::new(Inner {
                log: None,
                header: LogHeader::default(),
                next_slot: 0,
                staged: IndexMap::new(),
            }),
        }
    }

    /// Number of pages currently staged.
    pub fn staged_count(&self) -> usize {
        self.inner.lock().staged.len()
    }
}

impl Inner {
    fn log_mut(&mut self) -> Result<&mut DoubleWriteLog> {
        self.log.as_mut().ok_or(StorageError::NotOpen)
    }

    /// Writes every staged page to its file, then starts a new log
    /// generation. On error nothing is dropped, so a retry rewrites the same
    /// pages.
    fn flush(&mut self, manager: &dyn BufferPoolManager) -> Result<usize> {
        if self.staged.is_empty() {
            return Ok(0);
        }

        let mut files = FileCache::new();
        for (locator, staged) in &self.staged {
            let file = cached_file(manager, &mut files, locator.file_id)?;
            file.write_page(locator.page_num, &staged.page)
                .map_err(|e| {
                    log::error!(
                        "failed to flush page {} of {}: {}",
                        locator.page_num,
                        file.filename(),
                        e
                    );
                    e
                })?;
        }
        sync_all(&files)?;

        let flushed = self.staged.len();
        self.staged.clear();
        self.reset_generation()?;

        log::debug!("flushed {} staged pages", flushed);
        Ok(flushed)
    }

    fn reset_generation(&mut self) -> Result<()> {
        self.next_slot = 0;
        if self.header.page_count != 0 {
            self.log_mut()?.write_header(LogHeader::default())?;
            self.header = LogHeader::default();
        }
        Ok(())
    }
}

impl DoubleWriteBuffer for DiskDoubleWriteBuffer {
    fn open(&self, path: &Path) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(log) = &inner.log {
            log::error!(
                "double write buffer has already opened {}",
                log.path().display()
            );
            return Err(StorageError::AlreadyOpen {
                path: log.path().to_path_buf(),
            });
        }

        let mut log = DoubleWriteLog::open(path)?;
        let header = log.read_header()?;
        if header.page_count > 0 {
            log::info!(
                "double write log {} holds {} slots from a previous run",
                path.display(),
                header.page_count
            );
        }

        inner.header = header;
        inner.next_slot = 0;
        inner.log = Some(log);
        log::info!("opened double write buffer {}", path.display());
        Ok(())
    }

    fn add_page(&self, file_id: FileId, page_num: PageNum, page: &Page) -> Result<()> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if inner.log.is_none() {
            return Err(StorageError::NotOpen);
        }

        let locator = PageLocator::new(file_id, page_num);
        let mut entry = LogSlot {
            locator,
            page: page.clone(),
        };
        entry.page.update_checksum();

        if let Some(slot) = inner.staged.get(&locator).map(|s| s.slot) {
            inner.log_mut()?.write_slot(slot, &entry)?;
            if let Some(staged) = inner.staged.get_mut(&locator) {
                staged.page = entry.page;
            }
            log::trace!("restaged page {}:{} in slot {}", file_id, page_num, slot);
            return Ok(());
        }

        if inner.next_slot as usize >= self.max_pages {
            inner.flush(&*self.manager).map_err(|e| {
                log::error!("failed to flush pages in double write buffer");
                e
            })?;
        }

        let slot = inner.next_slot;
        inner.log_mut()?.write_slot(slot, &entry)?;
        if slot + 1 > inner.header.page_count {
            let header = LogHeader {
                page_count: slot + 1,
            };
            inner.log_mut()?.write_header(header)?;
            inner.header = header;
        }

        inner.next_slot = slot + 1;
        inner.staged.insert(
            locator,
            StagedPage {
                slot,
                page: entry.page,
            },
        );
        log::trace!("staged page {}:{} in slot {}", file_id, page_num, slot);
        Ok(())
    }

    fn read_page(&self, file_id: FileId, page_num: PageNum) -> Option<Page> {
        let inner = self.inner.lock();
        inner
            .staged
            .get(&PageLocator::new(file_id, page_num))
            .map(|staged| staged.page.clone())
    }

    fn clear_pages(&self, file: &dyn DiskPageFile) -> Result<()> {
        // Held until the pages are durable so their slots cannot be reused
        // while the in-place writes are in flight.
        let mut inner = self.inner.lock();

        let file_id = file.id();
        let mut pages = Vec::new();
        inner.staged.retain(|locator, staged| {
            if locator.file_id == file_id {
                pages.push((locator.page_num, std::mem::take(&mut staged.page)));
                false
            } else {
                true
            }
        });

        log::info!(
            "clear pages in double write buffer. file name={}, page count={}",
            file.filename(),
            pages.len()
        );

        // Ascending order keeps the confirmed writes a prefix by page number.
        pages.sort_unstable_by_key(|(page_num, _)| *page_num);

        let total = pages.len();
        let mut written = 0;
        let mut failure = None;
        for (page_num, page) in &pages {
            if let Err(e) = file.write_page(*page_num, page) {
                log::warn!(
                    "Failed to write page {}:{} to disk. {}",
                    file.filename(),
                    page_num,
                    e
                );
                failure = Some(e);
                break;
            }
            written += 1;
        }
        if failure.is_none() && total > 0 {
            failure = file.sync().err();
        }
        drop(inner);

        match (failure, self.clear_policy) {
            (None, _) => Ok(()),
            (Some(source), ClearPolicy::Strict) => Err(StorageError::PartialClear {
                filename: file.filename().to_string(),
                written,
                unwritten: total - written,
                source: Box::new(source),
            }),
            (Some(source), ClearPolicy::BestEffort) => {
                log::warn!(
                    "dropped {} unwritten pages of {}: {}",
                    total - written,
                    file.filename(),
                    source
                );
                Ok(())
            }
        }
    }

    fn flush_page(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.flush(&*self.manager)?;
        Ok(())
    }

    fn recover(&self) -> Result<RecoveryReport> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let log = inner.log_mut()?;

        let header = log.read_header()?;
        let mut report = RecoveryReport {
            slot_count: header.page_count,
            ..RecoveryReport::default()
        };

        let mut files = FileCache::new();
        for index in 0..header.page_count {
            let Some(slot) = log.read_slot(index)? else {
                log::warn!(
                    "double write log ends before slot {} of {}",
                    index,
                    header.page_count
                );
                break;
            };

            if !slot.page.verify_checksum() {
                log::warn!(
                    "skipping torn slot {} for page {}:{}",
                    index,
                    slot.locator.file_id,
                    slot.locator.page_num
                );
                report.skipped += 1;
                continue;
            }

            let file = cached_file(&*self.manager, &mut files, slot.locator.file_id)?;
            file.write_page(slot.locator.page_num, &slot.page)?;
            report.replayed += 1;
        }
        sync_all(&files)?;

        // Everything staged is now durable in its own file.
        inner.staged.clear();
        inner.header = header;
        inner.reset_generation()?;

        log::info!(
            "double write recovery done: {} slots, {} replayed, {} skipped",
            report.slot_count,
            report.replayed,
            report.skipped
        );
        Ok(report)
    }
}

impl Drop for DiskDoubleWriteBuffer {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if let Err(e) = inner.flush(&*self.manager) {
            log::error!("failed to flush double write buffer on close: {}", e);
        }
    }
}

fn cached_file<'a>(
    manager: &dyn BufferPoolManager,
    files: &'a mut FileCache,
    file_id: FileId,
) -> Result<&'a Arc<dyn DiskPageFile>> {
    if !files.contains_key(&file_id) {
        let file = manager.get_page_file(file_id).ok_or_else(|| {
            log::error!("failed to get page file of {}", file_id);
            StorageError::UnresolvedFile(file_id)
        })?;
        files.insert(file_id, file);
    }
    Ok(&files[&file_id])
}

fn sync_all(files: &FileCache) -> Result<()> {
    for file in files.values() {
        file.sync()?;
    }
    Ok(())
}
