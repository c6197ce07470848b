//! Page files of one directory behind a double-write buffer.

use crate::dblwr::{
    new_double_write_buffer, DoubleWriteBuffer, DoubleWriteConfig, RecoveryReport,
};
use crate::file::{DiskPageFile, PageFile};
use crate::page::Page;
use crate::registry::FileRegistry;
use crate::{FileId, PageNum, Result, StorageError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Name of the double-write log inside the store directory.
pub const DOUBLE_WRITE_LOG: &str = "double_write.log";

/// Extension of page files managed by the store.
pub const PAGE_FILE_EXTENSION: &str = "pgf";

pub struct PageStore {
    dir: PathBuf,
    registry: Arc<FileRegistry>,
    files: RwLock<HashMap<FileId, Arc<PageFile>>>,
    buffer: Box<dyn DoubleWriteBuffer>,
    recovery: RecoveryReport,
}

impl PageStore {
    /// Opens every page file in `dir`, then repairs torn pages left by the
    /// previous run. A store whose recovery fails is not returned.
    pub fn open(dir: &Path, config: &DoubleWriteConfig) -> Result<Self> {
        std::fs::create_dir_all(dir)?;

        let registry = Arc::new(FileRegistry::new());
        let mut files = HashMap::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(PAGE_FILE_EXTENSION) {
                continue;
            }
            let file = Arc::new(PageFile::open(&path)?);
            registry.register(file.clone());
            files.insert(file.id(), file);
        }

        let buffer = new_double_write_buffer(config, registry.clone())?;
        buffer.open(&dir.join(DOUBLE_WRITE_LOG))?;
        let recovery = buffer.recover().map_err(|e| {
            log::error!("double write recovery of {} failed: {}", dir.display(), e);
            e
        })?;

        log::info!(
            "opened page store {} with {} files",
            dir.display(),
            files.len()
        );
        Ok(Self {
            dir: dir.to_path_buf(),
            registry,
            files: RwLock::new(files),
            buffer,
            recovery,
        })
    }

    /// What the startup recovery did.
    pub fn recovery(&self) -> RecoveryReport {
        self.recovery
    }

    pub fn create_file(&self, name: &str) -> Result<FileId> {
        let id = self.registry.next_file_id();
        let file = Arc::new(PageFile::create_new(id, &self.path_of(name))?);
        self.registry.register(file.clone());
        self.files.write().insert(id, file);
        Ok(id)
    }

    /// Returns the id of `name`, opening it if it is not open yet.
    pub fn open_file(&self, name: &str) -> Result<FileId> {
        let path = self.path_of(name);
        let filename = path.display().to_string();
        if let Some(file) = self
            .files
            .read()
            .values()
            .find(|f| f.filename() == filename)
        {
            return Ok(file.id());
        }

        let file = Arc::new(PageFile::open(&path)?);
        let id = file.id();
        self.registry.register(file.clone());
        self.files.write().insert(id, file);
        Ok(id)
    }

    /// Stages a page write; it reaches the file on the next flush or close.
    ///
    /// Page 0 holds the file header. A page the file would refuse is rejected
    /// here, before it can reach the double-write log.
    pub fn write_page(&self, file_id: FileId, page_num: PageNum, page: &Page) -> Result<()> {
        self.file(file_id)?;
        if page_num <= 0 {
            return Err(StorageError::InvalidPageNum(page_num));
        }

        let mut page = page.clone();
        page.update_checksum();
        self.buffer.add_page(file_id, page_num, &page)
    }

    /// Reads the newest version of a page, preferring a staged copy.
    pub fn read_page(&self, file_id: FileId, page_num: PageNum) -> Result<Page> {
        let file = self.file(file_id)?;
        match self.buffer.read_page(file_id, page_num) {
            Some(page) => Ok(page),
            None => file.read_page(page_num),
        }
    }

    /// Writes out the file's staged pages and closes it.
    pub fn close_file(&self, file_id: FileId) -> Result<()> {
        let file = self.file(file_id)?;
        let cleared = self.buffer.clear_pages(&*file);

        self.registry.unregister(file_id);
        self.files.write().remove(&file_id);
        log::debug!("closed page file {}", file.filename());
        cleared
    }

    pub fn flush(&self) -> Result<()> {
        self.buffer.flush_page()
    }

    fn file(&self, file_id: FileId) -> Result<Arc<PageFile>> {
        self.files
            .read()
            .get(&file_id)
            .cloned()
            .ok_or(StorageError::UnresolvedFile(file_id))
    }

    fn path_of(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.{PAGE_FILE_EXTENSION}"))
    }
}
