use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{Page, PageId, PAGE_SIZE};

// Directory page layout:
// - record_count: u32 (4 bytes)
// - records: fixed 36-byte entries (32-byte name field, root_page_id: i32)
const COUNT_SIZE: usize = 4;
const NAME_SIZE: usize = 32;
const RECORD_SIZE: usize = NAME_SIZE + 4;
const MAX_RECORDS: usize = (PAGE_SIZE - COUNT_SIZE) / RECORD_SIZE;

/// Accessor for the index directory kept on page 0. Each record maps an
/// index name to the page id of that index's root node.
pub struct HeaderPage;

impl Default for HeaderPage {
    fn default() -> Self {
        Self::new()
    }
}

impl HeaderPage {
    pub fn new() -> Self {
        Self
    }

    pub fn record_count(&self, page: &Page) -> usize {
        LittleEndian::read_u32(&page.data[0..COUNT_SIZE]) as usize
    }

    /// Register a new index. Returns false if the directory is full, the
    /// name does not fit, or the name is already present.
    pub fn insert_record(&self, page: &mut Page, name: &str, root_page_id: PageId) -> bool {
        if name.len() > NAME_SIZE {
            return false;
        }
        let count = self.record_count(page);
        if count >= MAX_RECORDS || self.find_record(page, name).is_some() {
            return false;
        }

        let offset = COUNT_SIZE + count * RECORD_SIZE;
        page.data[offset..offset + NAME_SIZE].fill(0);
        page.data[offset..offset + name.len()].copy_from_slice(name.as_bytes());
        LittleEndian::write_i32(&mut page.data[offset + NAME_SIZE..offset + RECORD_SIZE], root_page_id);
        LittleEndian::write_u32(&mut page.data[0..COUNT_SIZE], (count + 1) as u32);
        true
    }

    /// Point an existing index at a new root. Returns false if the name is
    /// not registered.
    pub fn update_record(&self, page: &mut Page, name: &str, root_page_id: PageId) -> bool {
        match self.find_record(page, name) {
            Some(slot) => {
                let offset = COUNT_SIZE + slot * RECORD_SIZE;
                LittleEndian::write_i32(
                    &mut page.data[offset + NAME_SIZE..offset + RECORD_SIZE],
                    root_page_id,
                );
                true
            }
            None => false,
        }
    }

    pub fn get_root_id(&self, page: &Page, name: &str) -> Option<PageId> {
        self.find_record(page, name).map(|slot| {
            let offset = COUNT_SIZE + slot * RECORD_SIZE;
            LittleEndian::read_i32(&page.data[offset + NAME_SIZE..offset + RECORD_SIZE])
        })
    }

    fn find_record(&self, page: &Page, name: &str) -> Option<usize> {
        let count = self.record_count(page);
        (0..count).find(|&slot| {
            let offset = COUNT_SIZE + slot * RECORD_SIZE;
            let field = &page.data[offset..offset + NAME_SIZE];
            let stored = &field[..field.iter().position(|&b| b == 0).unwrap_or(NAME_SIZE)];
            stored == name.as_bytes()
        })
    }
}
