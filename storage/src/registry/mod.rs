//! Resolution of file identifiers to live page files.

use crate::file::DiskPageFile;
use crate::FileId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

/// Owner of the open page files.
///
/// The double-write buffer only stores `(file_id, page_num)` locators; it goes
/// through this trait whenever a staged page has to reach its real location.
pub trait BufferPoolManager: Send + Sync {
    fn get_page_file(&self, file_id: FileId) -> Option<Arc<dyn DiskPageFile>>;
}

#[derive(Default)]
pub struct FileRegistry {
    files: RwLock<HashMap<FileId, Arc<dyn DiskPageFile>>>,
    next_id: AtomicI32,
}

impl FileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hands out a file id that has not been returned before.
    pub fn next_file_id(&self) -> FileId {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Registers `file` under its own id, replacing any previous entry.
    ///
    /// Ids handed out by `next_file_id` afterwards are greater than `file.id()`.
    pub fn register(&self, file: Arc<dyn DiskPageFile>) {
        log::debug!("registering page file {} as {}", file.filename(), file.id());
        self.next_id.fetch_max(file.id(), Ordering::Relaxed);
        self.files.write().insert(file.id(), file);
    }

    pub fn unregister(&self, file_id: FileId) -> Option<Arc<dyn DiskPageFile>> {
        self.files.write().remove(&file_id)
    }

    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BufferPoolManager for FileRegistry {
    fn get_page_file(&self, file_id: FileId) -> Option<Arc<dyn DiskPageFile>> {
        self.files.read().get(&file_id).cloned()
    }
}
