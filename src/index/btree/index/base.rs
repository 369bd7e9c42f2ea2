use std::marker::PhantomData;
use std::sync::Arc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::common::types::{PageId, PagePtr, Rid, HEADER_PAGE_ID, INVALID_PAGE_ID};
use crate::storage::buffer::BufferPoolManager;
use crate::storage::page::HeaderPage;
use crate::index::btree::error::BTreeError;
use crate::index::btree::node::{LeafNode, TreeNode};
use crate::index::btree::serialization::{
    calculate_internal_capacity, calculate_leaf_capacity, deserialize_node, serialize_node,
};

/// Disk-resident B+Tree index. Keys are unique; values are record ids.
///
/// A single tree-wide latch (the mutex around the root pointer) is held for
/// the full duration of every public operation. All page pins taken during
/// an operation are released before it returns, except the leaf pin handed
/// to an iterator.
pub struct BPlusTree<K> {
    pub(crate) index_name: String,
    pub(crate) buffer_pool: Arc<BufferPoolManager>,
    pub(crate) root_page_id: Mutex<PageId>,
    pub(crate) leaf_max_size: usize,
    pub(crate) internal_max_size: usize,
    pub(crate) _phantom: PhantomData<K>,
}

impl<K> BPlusTree<K>
where
    K: Clone + Ord + Serialize + for<'de> Deserialize<'de> + Send + Sync + 'static,
{
    /// Open or register the named index, sizing nodes from the key width
    pub fn new(
        index_name: impl Into<String>,
        buffer_pool: Arc<BufferPoolManager>,
    ) -> Result<Self, BTreeError> {
        let leaf_max_size = calculate_leaf_capacity::<K>();
        let internal_max_size = calculate_internal_capacity::<K>();
        Self::with_max_sizes(index_name, buffer_pool, leaf_max_size, internal_max_size)
    }

    /// Open or register the named index with explicit node capacities
    pub fn with_max_sizes(
        index_name: impl Into<String>,
        buffer_pool: Arc<BufferPoolManager>,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self, BTreeError> {
        let index_name = index_name.into();

        // The directory on page 0 remembers the root across reopens
        let header_page = buffer_pool.fetch_page(HEADER_PAGE_ID)?;
        let header = HeaderPage::new();
        let existing = {
            let guard = header_page.read();
            header.get_root_id(&guard, &index_name)
        };
        let root_page_id = match existing {
            Some(page_id) => {
                buffer_pool.unpin_page(HEADER_PAGE_ID, false);
                page_id
            }
            None => {
                {
                    let mut guard = header_page.write();
                    header.insert_record(&mut guard, &index_name, INVALID_PAGE_ID);
                }
                buffer_pool.unpin_page(HEADER_PAGE_ID, true);
                INVALID_PAGE_ID
            }
        };

        // An internal node overflows to max_size + 1 children before it is
        // split; keeping one slot in reserve makes the split point valid.
        // The floor of 4 keeps min_size at 2, so a rebalancing child always
        // has a sibling to borrow from or merge with.
        let internal_max_size = internal_max_size.saturating_sub(1).max(4);

        Ok(Self {
            index_name,
            buffer_pool,
            root_page_id: Mutex::new(root_page_id),
            leaf_max_size: leaf_max_size.max(3),
            internal_max_size,
            _phantom: PhantomData,
        })
    }

    pub fn root_page_id(&self) -> PageId {
        *self.root_page_id.lock()
    }

    pub fn is_empty(&self) -> bool {
        self.root_page_id() == INVALID_PAGE_ID
    }

    /// Point lookup. Returns the record id stored under `key`, if any.
    pub fn get_value(&self, key: &K) -> Result<Option<Rid>, BTreeError> {
        let root = self.root_page_id.lock();
        if *root == INVALID_PAGE_ID {
            return Ok(None);
        }

        let (_page, leaf) = self.find_leaf(*root, key)?;
        let result = leaf.lookup(key);
        self.buffer_pool.unpin_page(leaf.page_id, false);
        Ok(result)
    }

    /// Number of levels in the tree; 0 for an empty tree
    pub fn height(&self) -> Result<usize, BTreeError> {
        let root = self.root_page_id.lock();
        if *root == INVALID_PAGE_ID {
            return Ok(0);
        }

        let mut levels = 1;
        let mut page_id = *root;
        loop {
            let (_page, node) = self.fetch_tree_node(page_id)?;
            self.buffer_pool.unpin_page(page_id, false);
            match node {
                TreeNode::Leaf(_) => return Ok(levels),
                TreeNode::Internal(internal) => {
                    page_id = internal.value_at(0);
                    levels += 1;
                }
            }
        }
    }

    /// Walk root to leaf along `key`, unpinning interior pages on the way
    /// down. The returned leaf is still pinned.
    pub(crate) fn find_leaf(
        &self,
        root: PageId,
        key: &K,
    ) -> Result<(PagePtr, LeafNode<K>), BTreeError> {
        let mut page_id = root;
        loop {
            let (page, node) = self.fetch_tree_node(page_id)?;
            match node {
                TreeNode::Leaf(leaf) => return Ok((page, leaf)),
                TreeNode::Internal(internal) => {
                    let child = internal.lookup(key);
                    self.buffer_pool.unpin_page(page_id, false);
                    page_id = child;
                }
            }
        }
    }

    /// Like `find_leaf` but always follows the leftmost child
    pub(crate) fn find_leftmost_leaf(
        &self,
        root: PageId,
    ) -> Result<(PagePtr, LeafNode<K>), BTreeError> {
        let mut page_id = root;
        loop {
            let (page, node) = self.fetch_tree_node(page_id)?;
            match node {
                TreeNode::Leaf(leaf) => return Ok((page, leaf)),
                TreeNode::Internal(internal) => {
                    let child = internal.value_at(0);
                    self.buffer_pool.unpin_page(page_id, false);
                    page_id = child;
                }
            }
        }
    }

    /// Fetch and decode a node, leaving its page pinned
    pub(crate) fn fetch_tree_node(
        &self,
        page_id: PageId,
    ) -> Result<(PagePtr, TreeNode<K>), BTreeError> {
        let page = self.buffer_pool.fetch_page(page_id)?;
        let decoded = {
            let guard = page.read();
            deserialize_node::<K>(&guard)
        };
        match decoded {
            Ok(node) => Ok((page, node)),
            Err(e) => {
                self.buffer_pool.unpin_page(page_id, false);
                Err(e)
            }
        }
    }

    /// Encode a node back into its pinned page
    pub(crate) fn write_tree_node(
        &self,
        page: &PagePtr,
        node: &TreeNode<K>,
    ) -> Result<(), BTreeError> {
        let mut guard = page.write();
        serialize_node(node, &mut guard)
    }

    /// Rewrite a child's parent pointer (used when entries migrate between
    /// internal nodes).
    pub(crate) fn reparent(&self, child: PageId, parent: PageId) -> Result<(), BTreeError> {
        let (page, mut node) = self.fetch_tree_node(child)?;
        node.set_parent_page_id(parent);
        let written = self.write_tree_node(&page, &node);
        self.buffer_pool.unpin_page(child, written.is_ok());
        written
    }

    /// Record a root change in the directory on page 0
    pub(crate) fn update_root_record(&self, root: PageId) -> Result<(), BTreeError> {
        let page = self.buffer_pool.fetch_page(HEADER_PAGE_ID)?;
        let header = HeaderPage::new();
        {
            let mut guard = page.write();
            if !header.update_record(&mut guard, &self.index_name, root) {
                header.insert_record(&mut guard, &self.index_name, root);
            }
        }
        self.buffer_pool.unpin_page(HEADER_PAGE_ID, true);
        Ok(())
    }

    /// Integrity walk: parent pointers, occupancy bounds, key ordering, and
    /// separator bounds over the whole tree, then leaf-chain monotonicity.
    pub fn validate(&self) -> Result<(), BTreeError> {
        let root = self.root_page_id.lock();
        if *root == INVALID_PAGE_ID {
            return Ok(());
        }

        self.check_subtree(*root, INVALID_PAGE_ID, None, None, true)?;
        self.check_leaf_chain(*root)
    }

    fn check_subtree(
        &self,
        page_id: PageId,
        expected_parent: PageId,
        lower: Option<K>,
        upper: Option<K>,
        is_root: bool,
    ) -> Result<(), BTreeError> {
        let (_page, node) = self.fetch_tree_node(page_id)?;

        let result = (|| {
            if node.parent_page_id() != expected_parent {
                return Err(BTreeError::IntegrityViolation(format!(
                    "page {} has parent {}, expected {}",
                    page_id,
                    node.parent_page_id(),
                    expected_parent
                )));
            }

            match &node {
                TreeNode::Leaf(leaf) => {
                    if leaf.size() >= leaf.max_size {
                        return Err(BTreeError::IntegrityViolation(format!(
                            "leaf {} at or above max size",
                            page_id
                        )));
                    }
                    if !is_root && leaf.size() < leaf.min_size() {
                        return Err(BTreeError::IntegrityViolation(format!(
                            "leaf {} below min size",
                            page_id
                        )));
                    }
                    for window in leaf.entries.windows(2) {
                        if window[0].0 >= window[1].0 {
                            return Err(BTreeError::IntegrityViolation(format!(
                                "leaf {} keys out of order",
                                page_id
                            )));
                        }
                    }
                    for (key, _) in &leaf.entries {
                        if let Some(lo) = &lower {
                            if key < lo {
                                return Err(BTreeError::IntegrityViolation(format!(
                                    "leaf {} key below subtree bound",
                                    page_id
                                )));
                            }
                        }
                        if let Some(hi) = &upper {
                            if key >= hi {
                                return Err(BTreeError::IntegrityViolation(format!(
                                    "leaf {} key above subtree bound",
                                    page_id
                                )));
                            }
                        }
                    }
                    Ok(())
                }
                TreeNode::Internal(internal) => {
                    if internal.size() > internal.max_size {
                        return Err(BTreeError::IntegrityViolation(format!(
                            "internal {} above max size",
                            page_id
                        )));
                    }
                    let min = if is_root { 2 } else { internal.min_size() };
                    if internal.size() < min {
                        return Err(BTreeError::IntegrityViolation(format!(
                            "internal {} below min size",
                            page_id
                        )));
                    }
                    for window in internal.entries[1..].windows(2) {
                        if window[0].0 >= window[1].0 {
                            return Err(BTreeError::IntegrityViolation(format!(
                                "internal {} separators out of order",
                                page_id
                            )));
                        }
                    }
                    for i in 0..internal.size() {
                        let child_lower = if i == 0 {
                            lower.clone()
                        } else {
                            Some(internal.key_at(i).clone())
                        };
                        let child_upper = if i + 1 < internal.size() {
                            Some(internal.key_at(i + 1).clone())
                        } else {
                            upper.clone()
                        };
                        self.check_subtree(
                            internal.value_at(i),
                            page_id,
                            child_lower,
                            child_upper,
                            false,
                        )?;
                    }
                    Ok(())
                }
            }
        })();

        self.buffer_pool.unpin_page(page_id, false);
        result
    }

    fn check_leaf_chain(&self, root: PageId) -> Result<(), BTreeError> {
        let (_page, first) = self.find_leftmost_leaf(root)?;
        let mut last_key: Option<K> = None;
        let mut leaf = first;

        loop {
            for (key, _) in &leaf.entries {
                if let Some(prev) = &last_key {
                    if key <= prev {
                        return Err(BTreeError::IntegrityViolation(format!(
                            "leaf chain out of order at page {}",
                            leaf.page_id
                        )));
                    }
                }
                last_key = Some(key.clone());
            }

            let next = leaf.next_page_id;
            self.buffer_pool.unpin_page(leaf.page_id, false);
            if next == INVALID_PAGE_ID {
                return Ok(());
            }

            let (_next_page, next_leaf) = match self.fetch_tree_node(next)? {
                (page, TreeNode::Leaf(node)) => (page, node),
                (_, TreeNode::Internal(_)) => {
                    self.buffer_pool.unpin_page(next, false);
                    return Err(BTreeError::IntegrityViolation(format!(
                        "leaf chain points at internal page {}",
                        next
                    )));
                }
            };
            leaf = next_leaf;
        }
    }
}
