use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Once;

use rand::{Rng, SeedableRng};
use storage::{Page, PAGE_SIZE};

static INIT: Once = Once::new();

pub fn setup() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// A page filled with reproducible noise.
pub fn random_page(seed: u64) -> Page {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let mut page = Page::new();
    rng.fill(page.data_mut());
    page.set_lsn(seed);
    page
}

/// Overwrites the second half of `page_num` in a page file with the second
/// half of `page`, as an in-place write interrupted mid-page would.
pub fn tear_page(path: &Path, page_num: u64, page: &Page) {
    let half = PAGE_SIZE / 2;
    let mut file = OpenOptions::new().write(true).open(path).unwrap();
    file.seek(SeekFrom::Start(page_num * PAGE_SIZE as u64 + half as u64))
        .unwrap();
    file.write_all(&page.as_bytes()[half..]).unwrap();
    file.sync_all().unwrap();
}
