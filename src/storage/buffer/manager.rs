use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use parking_lot::Mutex;
use log::debug;

use crate::common::types::{Page, PageId, PagePtr, FrameId, INVALID_PAGE_ID};
use crate::storage::disk::DiskManager;
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::replacer::LruReplacer;

/// One slot of the pool. The page contents are shared out through `PagePtr`;
/// the bookkeeping stays behind the pool latch.
struct Frame {
    page: PagePtr,
    pin_count: u32,
    is_dirty: bool,
}

struct BufferPoolInner {
    frames: Vec<Frame>,
    page_table: HashMap<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
    replacer: LruReplacer,
}

/// Caches a bounded set of disk pages in memory. Every frame is in exactly
/// one of three states: on the free list, tracked by the replacer, or
/// pinned. All operations, disk I/O included, run under one latch; the pool
/// never suspends while holding it.
pub struct BufferPoolManager {
    pool_size: usize,
    inner: Mutex<BufferPoolInner>,
    disk_manager: Arc<DiskManager>,
}

impl BufferPoolManager {
    pub fn new(pool_size: usize, db_path: impl AsRef<Path>) -> Result<Self, BufferPoolError> {
        let disk_manager = Arc::new(DiskManager::new(db_path)?);
        Ok(Self::with_disk_manager(pool_size, disk_manager))
    }

    pub fn with_disk_manager(pool_size: usize, disk_manager: Arc<DiskManager>) -> Self {
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);

        for frame_id in 0..pool_size {
            frames.push(Frame {
                page: Arc::new(parking_lot::RwLock::new(Page::new(INVALID_PAGE_ID))),
                pin_count: 0,
                is_dirty: false,
            });
            free_list.push_back(frame_id);
        }

        Self {
            pool_size,
            inner: Mutex::new(BufferPoolInner {
                frames,
                page_table: HashMap::new(),
                free_list,
                replacer: LruReplacer::new(pool_size),
            }),
            disk_manager,
        }
    }

    /// Fetch a page from the buffer pool or disk. The page comes back
    /// pinned; the caller owns one `unpin_page` for it.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        if page_id < 0 {
            return Err(BufferPoolError::InvalidPageId(page_id));
        }

        let mut inner = self.inner.lock();

        // Already resident: pin and return
        if let Some(&frame_id) = inner.page_table.get(&page_id) {
            let frame = &mut inner.frames[frame_id];
            frame.pin_count += 1;
            let page = frame.page.clone();
            inner.replacer.pin(frame_id);
            return Ok(page);
        }

        let frame_id = self.find_victim(&mut inner)?;

        let mut new_page = Page::new(page_id);
        self.disk_manager.read_page(page_id, &mut new_page)?;

        let frame = &mut inner.frames[frame_id];
        *frame.page.write() = new_page;
        frame.pin_count = 1;
        frame.is_dirty = false;

        inner.page_table.insert(page_id, frame_id);
        Ok(inner.frames[frame_id].page.clone())
    }

    /// Allocate a fresh page on disk and install it pinned in a zeroed frame
    pub fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        let mut inner = self.inner.lock();

        let frame_id = self.find_victim(&mut inner)?;
        let page_id = self.disk_manager.allocate_page()?;

        let frame = &mut inner.frames[frame_id];
        *frame.page.write() = Page::new(page_id);
        frame.pin_count = 1;
        frame.is_dirty = false;

        inner.page_table.insert(page_id, frame_id);
        Ok((inner.frames[frame_id].page.clone(), page_id))
    }

    /// Drop one pin on a page, ORing `is_dirty` into its flag. Returns false
    /// if the page is not resident or not pinned. A pin count reaching zero
    /// hands the frame to the replacer.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let mut inner = self.inner.lock();

        let frame_id = match inner.page_table.get(&page_id) {
            Some(&id) => id,
            None => return false,
        };

        let frame = &mut inner.frames[frame_id];
        if frame.pin_count == 0 {
            return false;
        }

        frame.pin_count -= 1;
        frame.is_dirty |= is_dirty;
        let pin_count = frame.pin_count;

        if pin_count == 0 {
            inner.replacer.unpin(frame_id);
        }
        true
    }

    /// Write a resident page to disk if it is dirty. Returns whether the
    /// page was resident. The dirty flag stays set; it is cleared when the
    /// page leaves the page table.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool, BufferPoolError> {
        let inner = self.inner.lock();

        let frame_id = match inner.page_table.get(&page_id) {
            Some(&id) => id,
            None => return Ok(false),
        };

        let frame = &inner.frames[frame_id];
        if frame.is_dirty {
            let snapshot = frame.page.read().clone();
            self.disk_manager.write_page(&snapshot)?;
        }
        Ok(true)
    }

    /// Write every dirty resident page to disk
    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        let inner = self.inner.lock();

        for frame in &inner.frames {
            if frame.is_dirty {
                let snapshot = frame.page.read().clone();
                self.disk_manager.write_page(&snapshot)?;
            }
        }
        Ok(())
    }

    /// Remove a page from the pool and deallocate it on disk. An absent page
    /// counts as success; a pinned page cannot be deleted.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool, BufferPoolError> {
        let mut inner = self.inner.lock();

        let frame_id = match inner.page_table.get(&page_id) {
            Some(&id) => id,
            None => {
                self.disk_manager.deallocate_page(page_id);
                return Ok(true);
            }
        };

        if inner.frames[frame_id].pin_count > 0 {
            return Ok(false);
        }

        inner.page_table.remove(&page_id);

        let frame = &mut inner.frames[frame_id];
        *frame.page.write() = Page::new(INVALID_PAGE_ID);
        frame.is_dirty = false;
        frame.pin_count = 0;

        // The frame may still be tracked by the replacer; it must leave the
        // replacer before it can enter the free list.
        inner.replacer.pin(frame_id);
        inner.free_list.push_back(frame_id);

        self.disk_manager.deallocate_page(page_id);
        Ok(true)
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Number of frames on the free list
    pub fn free_frame_count(&self) -> usize {
        self.inner.lock().free_list.len()
    }

    /// Number of frames eligible for eviction
    pub fn replacer_size(&self) -> usize {
        self.inner.lock().replacer.len()
    }

    pub fn disk_manager(&self) -> Arc<DiskManager> {
        self.disk_manager.clone()
    }

    /// Pick a frame for reuse, free list first, then the replacer. Evicting
    /// a resident page writes it back when dirty and always drops its page
    /// table entry.
    fn find_victim(&self, inner: &mut BufferPoolInner) -> Result<FrameId, BufferPoolError> {
        if let Some(frame_id) = inner.free_list.pop_front() {
            return Ok(frame_id);
        }

        let frame_id = inner.replacer.victim().ok_or(BufferPoolError::BufferPoolFull)?;

        let (old_page_id, snapshot) = {
            let frame = &inner.frames[frame_id];
            let page = frame.page.read();
            let snapshot = if frame.is_dirty { Some(page.clone()) } else { None };
            (page.page_id, snapshot)
        };

        if let Some(page) = snapshot {
            debug!("evicting dirty page {} from frame {}", old_page_id, frame_id);
            self.disk_manager.write_page(&page)?;
        }

        if old_page_id != INVALID_PAGE_ID {
            inner.page_table.remove(&old_page_id);
        }
        inner.frames[frame_id].is_dirty = false;

        Ok(frame_id)
    }
}
