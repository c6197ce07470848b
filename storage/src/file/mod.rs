// storage/src/file/mod.rs

use crate::page::{Page, PAGE_SIZE};
use crate::{FileId, PageNum, Result, StorageError};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Magic number to identify page files
const FILE_MAGIC: [u8; 4] = *b"PGF1";

const FILE_VERSION: u32 = 1;

const HEADER_SIZE: usize = 512;

/// Byte range of `header_checksum` inside the encoded header.
const CHECKSUM_RANGE: std::ops::Range<usize> = 36..40;

/// A file of fixed-size pages that commits a page to its real location.
///
/// This is the surface the double-write buffer needs from the files it
/// protects: writes through it are the in-place writes that may tear.
pub trait DiskPageFile: Send + Sync {
    fn id(&self) -> FileId;

    /// Used for diagnostics only.
    fn filename(&self) -> &str;

    fn write_page(&self, page_num: PageNum, page: &Page) -> Result<()>;

    /// Makes every completed `write_page` durable.
    fn sync(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct FileHeader {
    magic: [u8; 4],   // "PGF1"
    version: u32,     // File format version
    header_size: u32, // Size of this header (512)
    page_size: u32,   // Page size (8192)

    file_id: FileId, // Identifier the double-write log refers to
    page_count: u64, // Pages in file, including the header page
    created_at: u64, // Creation timestamp

    header_checksum: u32, // CRC32 of header
}

impl FileHeader {
    fn new(file_id: FileId) -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        Self {
            magic: FILE_MAGIC,
            version: FILE_VERSION,
            header_size: HEADER_SIZE as u32,
            page_size: PAGE_SIZE as u32,
            file_id,
            page_count: 1, // Start with 1 to account for header page
            created_at: now,
            header_checksum: 0,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.magic != FILE_MAGIC {
            return Err(StorageError::InvalidFile("wrong magic number".into()));
        }

        if self.version > FILE_VERSION {
            return Err(StorageError::InvalidFile(format!(
                "unsupported file version: {}",
                self.version
            )));
        }

        if self.page_size != PAGE_SIZE as u32 {
            return Err(StorageError::InvalidFile(format!(
                "expected page size {}, got {}",
                PAGE_SIZE, self.page_size
            )));
        }

        if !self.verify_checksum() {
            return Err(StorageError::InvalidFile("header checksum mismatch".into()));
        }

        Ok(())
    }

    fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];

        bytes[0..4].copy_from_slice(&self.magic);
        bytes[4..8].copy_from_slice(&self.version.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.header_size.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.page_size.to_le_bytes());
        bytes[16..20].copy_from_slice(&self.file_id.to_le_bytes());
        bytes[20..28].copy_from_slice(&self.page_count.to_le_bytes());
        bytes[28..36].copy_from_slice(&self.created_at.to_le_bytes());
        bytes[CHECKSUM_RANGE].copy_from_slice(&self.header_checksum.to_le_bytes());

        bytes
    }

    fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> Result<Self> {
        let u32_at = |at: usize| {
            u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
        };
        let u64_at = |at: usize| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes[at..at + 8]);
            u64::from_le_bytes(raw)
        };

        let header = Self {
            magic: [bytes[0], bytes[1], bytes[2], bytes[3]],
            version: u32_at(4),
            header_size: u32_at(8),
            page_size: u32_at(12),
            file_id: u32_at(16) as FileId,
            page_count: u64_at(20),
            created_at: u64_at(28),
            header_checksum: u32_at(CHECKSUM_RANGE.start),
        };

        header.validate()?;
        Ok(header)
    }

    fn compute_checksum(&self) -> u32 {
        let bytes = self.to_bytes();

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&bytes[..CHECKSUM_RANGE.start]); // Hash everything before checksum field
        hasher.update(&bytes[CHECKSUM_RANGE.end..]); // Hash everything after checksum field
        hasher.finalize()
    }

    fn update_checksum(&mut self) {
        self.header_checksum = self.compute_checksum();
    }

    fn verify_checksum(&self) -> bool {
        self.compute_checksum() == self.header_checksum
    }
}

struct Inner {
    file: File,
    header: FileHeader,
}

/// Page file with a header page at offset 0 and data page `n` at
/// `n * PAGE_SIZE`.
pub struct PageFile {
    id: FileId,
    filename: String,
    inner: Mutex<Inner>,
}

impl PageFile {
    pub fn create_new(id: FileId, path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|source| StorageError::IoOpen {
                path: path.to_path_buf(),
                source,
            })?;

        let mut inner = Inner {
            file,
            header: FileHeader::new(id),
        };
        Self::write_header(&mut inner)?;

        log::debug!("created page file {} with id {}", path.display(), id);
        Ok(Self {
            id,
            filename: path.display().to_string(),
            inner: Mutex::new(inner),
        })
    }

    /// Opens an existing page file under the id stored in its header.
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| StorageError::IoOpen {
                path: path.to_path_buf(),
                source,
            })?;

        let header = Self::read_header(&mut file)?;

        log::debug!(
            "opened page file {} with id {}, {} pages",
            path.display(),
            header.file_id,
            header.page_count
        );
        Ok(Self {
            id: header.file_id,
            filename: path.display().to_string(),
            inner: Mutex::new(Inner { file, header }),
        })
    }

    /// Reads a data page and verifies its checksum.
    pub fn read_page(&self, page_num: PageNum) -> Result<Page> {
        let mut inner = self.inner.lock();
        if page_num <= 0 || page_num as u64 >= inner.header.page_count {
            return Err(StorageError::InvalidPageNum(page_num));
        }

        let offset = page_offset(page_num);
        inner
            .file
            .seek(SeekFrom::Start(offset))
            .map_err(|source| StorageError::IoSeek { offset, source })?;

        let mut buffer = [0u8; PAGE_SIZE];
        inner
            .file
            .read_exact(&mut buffer)
            .map_err(|source| StorageError::IoRead { offset, source })?;

        let page = Page::from_bytes(&buffer)?;
        if !page.verify_checksum() {
            return Err(StorageError::ChecksumMismatch(page_num));
        }

        Ok(page)
    }

    pub fn page_count(&self) -> u64 {
        self.inner.lock().header.page_count
    }

    fn write_header(inner: &mut Inner) -> Result<()> {
        inner.header.update_checksum();

        // Header occupies a full page so data pages stay page-aligned
        let mut header_page = [0u8; PAGE_SIZE];
        header_page[..HEADER_SIZE].copy_from_slice(&inner.header.to_bytes());

        inner
            .file
            .seek(SeekFrom::Start(0))
            .map_err(|source| StorageError::IoSeek { offset: 0, source })?;
        inner
            .file
            .write_all(&header_page)
            .map_err(|source| StorageError::IoWrite { offset: 0, source })?;

        Ok(())
    }

    fn read_header(file: &mut File) -> Result<FileHeader> {
        file.seek(SeekFrom::Start(0))
            .map_err(|source| StorageError::IoSeek { offset: 0, source })?;

        let mut buffer = [0u8; HEADER_SIZE];
        file.read_exact(&mut buffer)
            .map_err(|source| StorageError::IoRead { offset: 0, source })?;

        FileHeader::from_bytes(&buffer)
    }
}

impl DiskPageFile for PageFile {
    fn id(&self) -> FileId {
        self.id
    }

    fn filename(&self) -> &str {
        &self.filename
    }

    fn write_page(&self, page_num: PageNum, page: &Page) -> Result<()> {
        // Page 0 is reserved for the file header
        if page_num <= 0 {
            return Err(StorageError::InvalidPageNum(page_num));
        }

        let mut inner = self.inner.lock();
        let offset = page_offset(page_num);
        inner
            .file
            .seek(SeekFrom::Start(offset))
            .map_err(|source| StorageError::IoSeek { offset, source })?;
        inner
            .file
            .write_all(page.as_bytes())
            .map_err(|source| StorageError::IoWrite { offset, source })?;

        // Update header if this extends the file
        if page_num as u64 >= inner.header.page_count {
            inner.header.page_count = page_num as u64 + 1;
            Self::write_header(&mut inner)?;
        }

        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.inner.lock().file.sync_all().map_err(StorageError::Io)
    }
}

fn page_offset(page_num: PageNum) -> u64 {
    page_num as u64 * PAGE_SIZE as u64
}
