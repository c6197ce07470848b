use super::{DoubleWriteBuffer, RecoveryReport};
use crate::file::DiskPageFile;
use crate::page::Page;
use crate::registry::BufferPoolManager;
use crate::{FileId, PageNum, Result, StorageError};
use std::path::Path;
use std::sync::Arc;

/// Double-write buffer that stages nothing: `add_page` writes straight to
/// the owning file.
pub struct VacuousDoubleWriteBuffer {
    manager: Arc<dyn BufferPoolManager>,
}

impl VacuousDoubleWriteBuffer {
    pub fn new(manager: Arc<dyn BufferPoolManager>) -> Self {
        Self { manager }
    }
}

impl DoubleWriteBuffer for VacuousDoubleWriteBuffer {
    fn open(&self, _path: &Path) -> Result<()> {
        Ok(())
    }

    fn add_page(&self, file_id: FileId, page_num: PageNum, page: &Page) -> Result<()> {
        let file = self
            .manager
            .get_page_file(file_id)
            .ok_or(StorageError::UnresolvedFile(file_id))?;
        file.write_page(page_num, page)
    }

    fn read_page(&self, _file_id: FileId, _page_num: PageNum) -> Option<Page> {
        None
    }

    fn clear_pages(&self, _file: &dyn DiskPageFile) -> Result<()> {
        Ok(())
    }

    fn flush_page(&self) -> Result<()> {
        Ok(())
    }

    fn recover(&self) -> Result<RecoveryReport> {
        Ok(RecoveryReport::default())
    }
}
